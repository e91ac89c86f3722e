use std::str::FromStr;

use tracing::{debug, info};

use crate::{
    config::RgbConfig,
    ports::{RgbOutput, StatusEvents, StatusSource},
    types::{Rgb, RgbStatusView},
};

pub const AMBIENT_RANK: u8 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlinkKind {
    AlertStart,
    AlertDismiss,
    OutageStart,
    PowerRestore,
}

impl BlinkKind {
    pub fn rank(self) -> u8 {
        match self {
            Self::AlertStart => 4,
            Self::AlertDismiss => 3,
            Self::OutageStart => 2,
            Self::PowerRestore => 1,
        }
    }

    pub fn color(self, cfg: &RgbConfig) -> Rgb {
        match self {
            Self::AlertStart => cfg.color_blink_alert,
            Self::AlertDismiss => cfg.color_blink_alert_dismiss,
            Self::OutageStart => cfg.color_blink_outage,
            Self::PowerRestore => cfg.color_blink_restore,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::AlertStart => "Alert Started",
            Self::AlertDismiss => "Alert Dismissed",
            Self::OutageStart => "Outage Started",
            Self::PowerRestore => "Power Restored",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPattern {
    Hold,
    Ambient,
    Blink(BlinkKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentationMode {
    Ambient,
    Blink(BlinkKind),
    Test(TestPattern),
}

impl PresentationMode {
    pub fn rank(self) -> u8 {
        match self {
            Self::Blink(kind) => kind.rank(),
            Self::Ambient | Self::Test(_) => AMBIENT_RANK,
        }
    }

    pub fn label(self) -> String {
        match self {
            Self::Ambient => "Ambient".to_string(),
            Self::Blink(kind) => kind.label().to_string(),
            Self::Test(TestPattern::Hold) => "Test Mode".to_string(),
            Self::Test(TestPattern::Ambient) => "Test: Ambient".to_string(),
            Self::Test(TestPattern::Blink(kind)) => format!("Test: {}", kind.label()),
        }
    }
}

pub fn may_preempt(current_rank: u8, new_rank: u8) -> bool {
    new_rank >= current_rank
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestCommand {
    Blink(BlinkKind),
    Ambient,
    Exit,
}

impl FromStr for TestCommand {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "alert_start" => Ok(Self::Blink(BlinkKind::AlertStart)),
            "alert_dismiss" => Ok(Self::Blink(BlinkKind::AlertDismiss)),
            "outage_start" => Ok(Self::Blink(BlinkKind::OutageStart)),
            "restore" => Ok(Self::Blink(BlinkKind::PowerRestore)),
            "ambient" => Ok(Self::Ambient),
            "exit" => Ok(Self::Exit),
            other => Err(format!(
                "unknown test mode `{other}`; use alert_start, alert_dismiss, outage_start, restore, ambient or exit"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RgbStateMachine {
    mode: PresentationMode,
    blink_start_ms: u64,
    last_toggle_ms: u64,
    blink_on: bool,
    now_ms: u64,
    output: Rgb,
}

impl Default for RgbStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl RgbStateMachine {
    pub fn new() -> Self {
        Self {
            mode: PresentationMode::Ambient,
            blink_start_ms: 0,
            last_toggle_ms: 0,
            blink_on: false,
            now_ms: 0,
            output: Rgb::BLACK,
        }
    }

    pub fn mode(&self) -> PresentationMode {
        self.mode
    }

    pub fn mode_label(&self) -> String {
        self.mode.label()
    }

    pub fn current_color(&self) -> Rgb {
        self.output
    }

    pub fn is_blinking(&self) -> bool {
        matches!(
            self.mode,
            PresentationMode::Blink(_) | PresentationMode::Test(TestPattern::Blink(_))
        )
    }

    pub fn is_test_mode(&self) -> bool {
        matches!(self.mode, PresentationMode::Test(_))
    }

    pub fn blink_elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        self.is_blinking()
            .then(|| now_ms.saturating_sub(self.blink_start_ms))
    }

    pub fn advance(&mut self, cfg: &RgbConfig, now_ms: u64) {
        self.now_ms = now_ms;

        if let PresentationMode::Blink(kind) = self.mode {
            if now_ms.saturating_sub(self.blink_start_ms) >= cfg.blink_total_ms() {
                info!("{} blink finished, back to ambient", kind.label());
                self.mode = PresentationMode::Ambient;
            }
        }
    }

    pub fn update(
        &mut self,
        cfg: &RgbConfig,
        now_ms: u64,
        status: &impl StatusSource,
        led: &mut impl RgbOutput,
    ) -> Rgb {
        self.advance(cfg, now_ms);

        let color = match self.mode {
            PresentationMode::Ambient | PresentationMode::Test(TestPattern::Ambient) => {
                ambient_color(cfg, status)
            }
            PresentationMode::Blink(kind) | PresentationMode::Test(TestPattern::Blink(kind)) => {
                self.blink_color(cfg, kind, now_ms)
            }
            PresentationMode::Test(TestPattern::Hold) => self.output,
        };

        self.output = color;
        led.set_color(color);
        color
    }

    pub fn enter_test(&mut self) {
        if !self.is_test_mode() {
            info!("RGB test mode enabled");
            self.mode = PresentationMode::Test(TestPattern::Hold);
        }
    }

    pub fn test_blink(&mut self, kind: BlinkKind, now_ms: u64) {
        self.enter_test();
        self.mode = PresentationMode::Test(TestPattern::Blink(kind));
        self.restart_blink(now_ms);
        info!("RGB test: {} blink", kind.label());
    }

    pub fn test_ambient(&mut self) {
        self.enter_test();
        self.mode = PresentationMode::Test(TestPattern::Ambient);
    }

    pub fn exit_test(&mut self) {
        if self.is_test_mode() {
            info!("RGB test mode disabled, back to ambient");
        }
        self.mode = PresentationMode::Ambient;
    }

    pub fn apply_test_command(&mut self, command: TestCommand, now_ms: u64) {
        match command {
            TestCommand::Blink(kind) => self.test_blink(kind, now_ms),
            TestCommand::Ambient => self.test_ambient(),
            TestCommand::Exit => self.exit_test(),
        }
    }

    pub fn snapshot(&self) -> RgbStatusView {
        RgbStatusView {
            mode: self.mode_label(),
            color: self.output,
            blinking: self.is_blinking(),
            test_mode: self.is_test_mode(),
        }
    }

    fn request_blink(&mut self, kind: BlinkKind) {
        if self.is_test_mode() {
            debug!("{} ignored in test mode", kind.label());
            return;
        }

        let current = self.mode.rank();
        if !may_preempt(current, kind.rank()) {
            debug!(
                "{} (rank {}) dropped, {} has rank {current}",
                kind.label(),
                kind.rank(),
                self.mode.label()
            );
            return;
        }

        self.mode = PresentationMode::Blink(kind);
        self.restart_blink(self.now_ms);
        info!("{} blink started", kind.label());
    }

    fn restart_blink(&mut self, now_ms: u64) {
        self.blink_start_ms = now_ms;
        self.last_toggle_ms = now_ms;
        self.blink_on = true;
    }

    fn blink_color(&mut self, cfg: &RgbConfig, kind: BlinkKind, now_ms: u64) -> Rgb {
        let phase_ms = if self.blink_on {
            cfg.blink_on_ms
        } else {
            cfg.blink_off_ms
        } as u64;

        if now_ms.saturating_sub(self.last_toggle_ms) >= phase_ms {
            self.last_toggle_ms = now_ms;
            self.blink_on = !self.blink_on;
        }

        if self.blink_on {
            kind.color(cfg)
        } else {
            Rgb::BLACK
        }
    }
}

impl StatusEvents for RgbStateMachine {
    fn on_alert_started(&mut self) {
        self.request_blink(BlinkKind::AlertStart);
    }

    fn on_alert_dismissed(&mut self) {
        self.request_blink(BlinkKind::AlertDismiss);
    }

    fn on_outage_started(&mut self) {
        self.request_blink(BlinkKind::OutageStart);
    }

    fn on_power_restored(&mut self) {
        self.request_blink(BlinkKind::PowerRestore);
    }
}

pub fn ambient_color(cfg: &RgbConfig, status: &impl StatusSource) -> Rgb {
    let base = if status.is_alert_active() {
        cfg.color_alert
    } else if status.is_emergency_shutdown() || status.is_currently_outage() {
        cfg.color_outage
    } else if status.alert_check_ok() {
        cfg.color_no_alert
    } else {
        cfg.color_no_status
    };
    base.scaled(cfg.ambient_brightness)
}
