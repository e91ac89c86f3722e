use chrono::{DateTime, FixedOffset, Timelike};

pub const MINUTES_PER_DAY: u16 = 24 * 60;

pub fn minute_of_day(now: DateTime<FixedOffset>) -> u16 {
    now.hour() as u16 * 60 + now.minute() as u16
}

pub fn format_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

pub fn format_uptime(now_ms: u64) -> String {
    let secs = now_ms / 1_000;
    format!(
        "{:02}:{:02}:{:02}",
        secs / 3_600,
        (secs % 3_600) / 60,
        secs % 60
    )
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn minute_of_day_uses_local_offset() {
        let now = FixedOffset::east_opt(2 * 3600)
            .unwrap()
            .with_ymd_and_hms(2026, 3, 2, 8, 30, 59)
            .unwrap();
        assert_eq!(minute_of_day(now), 510);
    }

    #[test]
    fn formats_labels() {
        assert_eq!(format_minute(0), "00:00");
        assert_eq!(format_minute(750), "12:30");
        assert_eq!(format_minute(MINUTES_PER_DAY), "24:00");
        assert_eq!(format_uptime(3_723_000), "01:02:03");
    }
}
