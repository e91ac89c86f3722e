use crate::{
    alert::AlertPoller,
    config::RuntimeConfig,
    error::PollError,
    outage::OutagePoller,
    ports::{HttpFetch, HttpResponse, RgbOutput, StatusSource, HTTP_TIMEOUT},
    rgb::{RgbStateMachine, TestCommand},
    types::{DeviceStatus, Rgb},
};

#[derive(Debug, Clone, Copy)]
pub struct StatusView<'a> {
    pub alert: &'a AlertPoller,
    pub outage: &'a OutagePoller,
}

impl StatusSource for StatusView<'_> {
    fn is_alert_active(&self) -> bool {
        self.alert.is_alert_active()
    }

    fn alert_check_ok(&self) -> bool {
        self.alert.last_check_ok()
    }

    fn is_currently_outage(&self) -> bool {
        self.outage.is_currently_outage()
    }

    fn is_emergency_shutdown(&self) -> bool {
        self.outage.is_emergency_shutdown()
    }
}

// URLs due this tick. Results go back through `AlertLight::finish_tick`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingPolls {
    pub alert: Option<String>,
    pub outage: Option<String>,
}

#[derive(Debug, Default)]
pub struct PollResults {
    pub alert: Option<Result<HttpResponse, PollError>>,
    pub outage: Option<Result<HttpResponse, PollError>>,
}

impl PendingPolls {
    pub fn is_empty(&self) -> bool {
        self.alert.is_none() && self.outage.is_none()
    }

    pub fn fetch(&self, http: &mut impl HttpFetch) -> PollResults {
        PollResults {
            alert: self.alert.as_deref().map(|url| http.get(url, HTTP_TIMEOUT)),
            outage: self.outage.as_deref().map(|url| http.get(url, HTTP_TIMEOUT)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AlertLight {
    alert: AlertPoller,
    outage: OutagePoller,
    rgb: RgbStateMachine,
}

impl AlertLight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alert(&self) -> &AlertPoller {
        &self.alert
    }

    pub fn outage(&self) -> &OutagePoller {
        &self.outage
    }

    pub fn rgb(&self) -> &RgbStateMachine {
        &self.rgb
    }

    pub fn tick(
        &mut self,
        cfg: &RuntimeConfig,
        now_ms: u64,
        local_minute: Option<u16>,
        http: &mut impl HttpFetch,
        led: &mut impl RgbOutput,
    ) -> Rgb {
        self.tick_with_link(cfg, now_ms, local_minute, true, http, led)
    }

    pub fn tick_with_link(
        &mut self,
        cfg: &RuntimeConfig,
        now_ms: u64,
        local_minute: Option<u16>,
        online: bool,
        http: &mut impl HttpFetch,
        led: &mut impl RgbOutput,
    ) -> Rgb {
        let results = self.pending_polls(cfg, now_ms, online).fetch(http);
        self.finish_tick(cfg, now_ms, local_minute, results, led)
    }

    // Alert polls wait for the link; outage polls do not.
    pub fn pending_polls(
        &self,
        cfg: &RuntimeConfig,
        now_ms: u64,
        online: bool,
    ) -> PendingPolls {
        PendingPolls {
            alert: (online && self.alert.is_due(&cfg.alert, now_ms))
                .then(|| cfg.alert.request_url()),
            outage: self
                .outage
                .is_due(&cfg.outage, now_ms)
                .then(|| cfg.outage.api_url.clone()),
        }
    }

    pub fn finish_tick(
        &mut self,
        cfg: &RuntimeConfig,
        now_ms: u64,
        local_minute: Option<u16>,
        results: PollResults,
        led: &mut impl RgbOutput,
    ) -> Rgb {
        self.rgb.advance(&cfg.rgb, now_ms);
        if let Some(response) = results.alert {
            self.alert
                .apply_response(&cfg.alert, now_ms, response, &mut self.rgb);
        }
        match results.outage {
            Some(response) => self.outage.apply_response(
                &cfg.outage,
                now_ms,
                local_minute,
                response,
                &mut self.rgb,
            ),
            None => self
                .outage
                .refresh_active_states(local_minute, &mut self.rgb),
        }

        let view = StatusView {
            alert: &self.alert,
            outage: &self.outage,
        };
        self.rgb.update(&cfg.rgb, now_ms, &view, led)
    }

    pub fn force_check_alert(
        &mut self,
        cfg: &RuntimeConfig,
        now_ms: u64,
        http: &mut impl HttpFetch,
    ) {
        self.rgb.advance(&cfg.rgb, now_ms);
        self.alert.force_check(&cfg.alert, now_ms, http, &mut self.rgb);
    }

    pub fn force_check_outage(
        &mut self,
        cfg: &RuntimeConfig,
        now_ms: u64,
        local_minute: Option<u16>,
        http: &mut impl HttpFetch,
    ) {
        self.rgb.advance(&cfg.rgb, now_ms);
        self.outage
            .force_check(&cfg.outage, now_ms, local_minute, http, &mut self.rgb);
    }

    pub fn apply_alert_response(
        &mut self,
        cfg: &RuntimeConfig,
        now_ms: u64,
        response: Result<HttpResponse, PollError>,
    ) {
        self.rgb.advance(&cfg.rgb, now_ms);
        self.alert
            .apply_response(&cfg.alert, now_ms, response, &mut self.rgb);
    }

    pub fn apply_outage_response(
        &mut self,
        cfg: &RuntimeConfig,
        now_ms: u64,
        local_minute: Option<u16>,
        response: Result<HttpResponse, PollError>,
    ) {
        self.rgb.advance(&cfg.rgb, now_ms);
        self.outage.apply_response(
            &cfg.outage,
            now_ms,
            local_minute,
            response,
            &mut self.rgb,
        );
    }

    pub fn on_network_restored(&mut self) {
        self.alert.force_update();
        self.outage.force_update();
    }

    pub fn apply_test_command(&mut self, command: TestCommand, now_ms: u64) {
        self.rgb.apply_test_command(command, now_ms);
    }

    pub fn status(&self, now_ms: u64, time_synced: bool) -> DeviceStatus {
        DeviceStatus {
            alert: self.alert.snapshot(),
            outage: self.outage.snapshot(),
            rgb: self.rgb.snapshot(),
            time_synced,
            uptime_ms: now_ms,
        }
    }
}
