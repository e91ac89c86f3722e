use std::fmt::Debug;

use alertlight_common::{Rgb, RgbOutput};
use anyhow::anyhow;
use serde::Serialize;
use smart_leds::{SmartLedsWrite, RGB8};
use log::warn;

pub struct PixelLed<W> {
    writer: Option<W>,
    current: Option<Rgb>,
    frames_sent: u64,
    failed_frames: u64,
    last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedDiagnostics {
    pub enabled: bool,
    pub color: Option<Rgb>,
    #[serde(rename = "framesSent")]
    pub frames_sent: u64,
    #[serde(rename = "failedFrames")]
    pub failed_frames: u64,
    #[serde(rename = "lastError")]
    pub last_error: Option<String>,
}

impl<W> PixelLed<W>
where
    W: SmartLedsWrite<Color = RGB8>,
    W::Error: Debug,
{
    pub fn with_writer(writer: W) -> Self {
        Self {
            writer: Some(writer),
            ..Self::disabled()
        }
    }

    pub fn disabled() -> Self {
        Self {
            writer: None,
            current: None,
            frames_sent: 0,
            failed_frames: 0,
            last_error: None,
        }
    }

    pub fn diagnostics(&self) -> LedDiagnostics {
        LedDiagnostics {
            enabled: self.writer.is_some(),
            color: self.current,
            frames_sent: self.frames_sent,
            failed_frames: self.failed_frames,
            last_error: self.last_error.clone(),
        }
    }

    fn write(&mut self, color: Rgb) -> anyhow::Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };

        let pixel = RGB8::new(color.r, color.g, color.b);
        writer
            .write(std::iter::once(pixel))
            .map_err(|err| anyhow!("failed to transmit WS2812 frame: {err:?}"))
    }
}

impl<W> RgbOutput for PixelLed<W>
where
    W: SmartLedsWrite<Color = RGB8>,
    W::Error: Debug,
{
    fn set_color(&mut self, color: Rgb) {
        if self.current == Some(color) {
            return;
        }

        match self.write(color) {
            Ok(()) => {
                self.current = Some(color);
                self.frames_sent = self.frames_sent.saturating_add(1);
                self.last_error = None;
            }
            Err(err) => {
                self.failed_frames = self.failed_frames.saturating_add(1);
                if self.last_error.is_none() {
                    warn!("LED write failed: {err:#}");
                }
                self.last_error = Some(format!("{err:#}"));
            }
        }
    }
}

#[cfg(feature = "esp32")]
pub use self::rmt::Ws2812;

#[cfg(feature = "esp32")]
mod rmt {
    use anyhow::anyhow;
    use esp_idf_hal::{gpio::OutputPin, peripheral::Peripheral, rmt::RmtChannel};
    use ws2812_esp32_rmt_driver::Ws2812Esp32Rmt;

    use super::PixelLed;

    pub type Ws2812 = PixelLed<Ws2812Esp32Rmt<'static>>;

    impl Ws2812 {
        pub fn new<C, P>(
            channel: impl Peripheral<P = C> + 'static,
            pin: impl Peripheral<P = P> + 'static,
        ) -> anyhow::Result<Self>
        where
            C: RmtChannel,
            P: OutputPin,
        {
            let driver = Ws2812Esp32Rmt::new(channel, pin)
                .map_err(|err| anyhow!("failed to init RMT LED driver: {err:?}"))?;
            Ok(Self::with_writer(driver))
        }
    }
}
