use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb::new(0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub const fn from_hex(value: u32) -> Self {
        Self {
            r: ((value >> 16) & 0xFF) as u8,
            g: ((value >> 8) & 0xFF) as u8,
            b: (value & 0xFF) as u8,
        }
    }

    pub fn to_hex(self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | self.b as u32
    }

    pub fn scaled(self, percent: u8) -> Self {
        let percent = percent.min(100) as u16;
        let scale = |channel: u8| (channel as u16 * percent / 100) as u8;
        Self {
            r: scale(self.r),
            g: scale(self.g),
            b: scale(self.b),
        }
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl From<Rgb> for String {
    fn from(color: Rgb) -> Self {
        color.to_string()
    }
}

impl TryFrom<String> for Rgb {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let digits = value.trim().trim_start_matches('#');
        let digits = digits
            .strip_prefix("0x")
            .or_else(|| digits.strip_prefix("0X"))
            .unwrap_or(digits);
        if digits.len() != 6 {
            return Err(format!("invalid color `{value}`, expected #RRGGBB"));
        }
        u32::from_str_radix(digits, 16)
            .map(Self::from_hex)
            .map_err(|_| format!("invalid color `{value}`, expected #RRGGBB"))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertStatusView {
    #[serde(rename = "alertActive")]
    pub alert_active: bool,
    #[serde(rename = "regionName")]
    pub region_name: String,
    pub status: String,
    #[serde(rename = "lastCallTime")]
    pub last_call_time: String,
    #[serde(rename = "lastHttpCode")]
    pub last_http_code: Option<u16>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
    #[serde(rename = "lastResponse")]
    pub last_response: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutageSlotView {
    #[serde(rename = "timeRange")]
    pub time_range: String,
    #[serde(rename = "isActive")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutageStatusView {
    pub queue: String,
    #[serde(rename = "currentlyOutage")]
    pub currently_outage: bool,
    #[serde(rename = "emergencyShutdown")]
    pub emergency_shutdown: bool,
    pub slots: Vec<OutageSlotView>,
    #[serde(rename = "lastCallTime")]
    pub last_call_time: String,
    #[serde(rename = "lastHttpCode")]
    pub last_http_code: Option<u16>,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
    #[serde(rename = "lastResponse")]
    pub last_response: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RgbStatusView {
    pub mode: String,
    pub color: Rgb,
    pub blinking: bool,
    #[serde(rename = "testMode")]
    pub test_mode: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceStatus {
    pub alert: AlertStatusView,
    pub outage: OutageStatusView,
    pub rgb: RgbStatusView,
    #[serde(rename = "timeSynced")]
    pub time_synced: bool,
    #[serde(rename = "uptimeMs")]
    pub uptime_ms: u64,
}
