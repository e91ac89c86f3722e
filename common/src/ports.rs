use std::time::Duration;

use crate::{error::PollError, types::Rgb};

pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

pub trait HttpFetch {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<HttpResponse, PollError>;
}

pub trait StatusEvents {
    fn on_alert_started(&mut self);
    fn on_alert_dismissed(&mut self);
    fn on_outage_started(&mut self);
    fn on_power_restored(&mut self);
}

pub trait StatusSource {
    fn is_alert_active(&self) -> bool;
    fn alert_check_ok(&self) -> bool;
    fn is_currently_outage(&self) -> bool;
    fn is_emergency_shutdown(&self) -> bool;
}

pub trait RgbOutput {
    fn set_color(&mut self, color: Rgb);
}
