use serde::{Deserialize, Serialize};

use crate::types::Rgb;

pub const MIN_ALERT_INTERVAL_SEC: u32 = 5;
pub const MIN_OUTAGE_INTERVAL_SEC: u32 = 60;
pub const MIN_BLINK_PHASE_MS: u16 = 50;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AlertConfig {
    pub api_url: String,
    pub region_id: u16,
    pub check_interval_sec: u32,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            api_url: "https://air-save.ops.ajax.systems/api/mobile/status/regions/v2?regions="
                .to_string(),
            region_id: 16,
            check_interval_sec: 30,
        }
    }
}

impl AlertConfig {
    pub fn request_url(&self) -> String {
        format!("{}{}", self.api_url, self.region_id)
    }

    pub fn check_interval_ms(&self) -> u64 {
        self.check_interval_sec as u64 * 1_000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutageConfig {
    pub api_url: String,
    pub queue: String,
    pub check_interval_sec: u32,
}

impl Default for OutageConfig {
    fn default() -> Self {
        Self {
            api_url: "https://app.yasno.ua/api/blackout-service/public/shutdowns/regions/25/dsos/902/planned-outages"
                .to_string(),
            queue: "6.2".to_string(),
            check_interval_sec: 900,
        }
    }
}

impl OutageConfig {
    pub fn check_interval_ms(&self) -> u64 {
        self.check_interval_sec as u64 * 1_000
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RgbConfig {
    pub ambient_brightness: u8,
    pub color_no_alert: Rgb,
    pub color_alert: Rgb,
    pub color_outage: Rgb,
    pub color_no_status: Rgb,
    pub blink_on_ms: u16,
    pub blink_off_ms: u16,
    pub blink_total_sec: u16,
    pub color_blink_alert: Rgb,
    pub color_blink_alert_dismiss: Rgb,
    pub color_blink_outage: Rgb,
    pub color_blink_restore: Rgb,
}

impl Default for RgbConfig {
    fn default() -> Self {
        Self {
            ambient_brightness: 10,
            color_no_alert: Rgb::from_hex(0x00FF00),
            color_alert: Rgb::from_hex(0xFF0000),
            color_outage: Rgb::from_hex(0x0000FF),
            color_no_status: Rgb::from_hex(0x808080),
            blink_on_ms: 500,
            blink_off_ms: 500,
            blink_total_sec: 30,
            color_blink_alert: Rgb::from_hex(0xFF0000),
            color_blink_alert_dismiss: Rgb::from_hex(0x00FF00),
            color_blink_outage: Rgb::from_hex(0x00008B),
            color_blink_restore: Rgb::from_hex(0xFFFF00),
        }
    }
}

impl RgbConfig {
    pub fn blink_total_ms(&self) -> u64 {
        self.blink_total_sec as u64 * 1_000
    }

    pub fn sanitize(&mut self) {
        self.ambient_brightness = self.ambient_brightness.min(100);
        self.blink_on_ms = self.blink_on_ms.max(MIN_BLINK_PHASE_MS);
        self.blink_off_ms = self.blink_off_ms.max(MIN_BLINK_PHASE_MS);
        self.blink_total_sec = self.blink_total_sec.max(1);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub web_port: u16,
    pub timezone: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            web_port: 8080,
            timezone: "Europe/Kyiv".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedHardwareConfig {
    pub data_pin: i32,
    pub rmt_channel: u8,
}

impl Default for LedHardwareConfig {
    fn default() -> Self {
        Self {
            data_pin: 38,
            rmt_channel: 0,
        }
    }
}

impl LedHardwareConfig {
    pub fn sanitize(&mut self) {
        if self.data_pin < 0 {
            self.data_pin = Self::default().data_pin;
        }
        if self.rmt_channel > 7 {
            self.rmt_channel = 0;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RuntimeConfig {
    pub alert: AlertConfig,
    pub outage: OutageConfig,
    pub rgb: RgbConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub led: LedHardwareConfig,
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.alert.check_interval_sec = self.alert.check_interval_sec.max(MIN_ALERT_INTERVAL_SEC);
        self.outage.check_interval_sec =
            self.outage.check_interval_sec.max(MIN_OUTAGE_INTERVAL_SEC);
        self.outage.queue = self.outage.queue.trim().to_string();
        self.rgb.sanitize();
        self.led.sanitize();

        if self.network.web_port == 0 {
            self.network.web_port = 8080;
        }
    }
}
