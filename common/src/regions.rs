#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RegionInfo {
    id: u16,
    name: &'static str,
}

const fn region(id: u16, name: &'static str) -> RegionInfo {
    RegionInfo { id, name }
}

const REGIONS: &[RegionInfo] = &[
    region(0, "Тестовий регіон"),
    region(3, "Хмельницька область"),
    region(4, "Вінницька область"),
    region(5, "Рівненська область"),
    region(8, "Волинська область"),
    region(9, "Дніпропетровська область"),
    region(10, "Житомирська область"),
    region(11, "Закарпатська область"),
    region(12, "Запорізька область"),
    region(13, "Івано-Франківська область"),
    region(14, "Київська область"),
    region(15, "Кіровоградська область"),
    region(16, "Луганська область"),
    region(17, "Миколаївська область"),
    region(18, "Одеська область"),
    region(19, "Полтавська область"),
    region(20, "Сумська область"),
    region(21, "Тернопільська область"),
    region(22, "Харківська область"),
    region(23, "Херсонська область"),
    region(24, "Черкаська область"),
    region(25, "Чернігівська область"),
    region(26, "Чернівецька область"),
    region(27, "Львівська область"),
    region(28, "Донецька область"),
    region(31, "м. Київ"),
    region(564, "м. Запоріжжя"),
    region(1293, "м. Харків"),
    region(9999, "АР Крим"),
];

// Stripped so names fit the status screen.
const NAME_SUFFIXES: [&str; 2] = [" область", " територіальна громада"];
const NAME_PREFIXES: [&str; 1] = ["Автономна Республіка "];

pub fn name_for_region(id: u16) -> String {
    let Some(info) = REGIONS.iter().find(|info| info.id == id) else {
        return format!("Region {id}");
    };

    let mut name = info.name;
    for suffix in NAME_SUFFIXES {
        name = name.strip_suffix(suffix).unwrap_or(name);
    }
    for prefix in NAME_PREFIXES {
        name = name.strip_prefix(prefix).unwrap_or(name);
    }
    name.to_string()
}
