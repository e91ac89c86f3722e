pub mod alert;
pub mod clock;
pub mod config;
pub mod error;
pub mod outage;
pub mod ports;
pub mod regions;
pub mod rgb;
pub mod status;
pub mod types;

#[cfg(test)]
mod testing;

pub use alert::AlertPoller;
pub use config::{
    AlertConfig, LedHardwareConfig, NetworkConfig, OutageConfig, RgbConfig, RuntimeConfig,
};
pub use error::{PollError, PollErrorKind};
pub use outage::{OutagePoller, OutageSlot};
pub use ports::{HttpFetch, HttpResponse, RgbOutput, StatusEvents, StatusSource, HTTP_TIMEOUT};
pub use rgb::{BlinkKind, PresentationMode, RgbStateMachine, TestCommand, TestPattern};
pub use status::{AlertLight, PendingPolls, PollResults, StatusView};
pub use types::{DeviceStatus, Rgb};
