use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    clock::format_uptime,
    config::AlertConfig,
    error::PollError,
    ports::{HttpFetch, HttpResponse, StatusEvents, HTTP_TIMEOUT},
    regions::name_for_region,
    types::AlertStatusView,
};

pub const STATUS_NO_ALERT: &str = "No Alert";
pub const STATUS_ACTIVE_ALERT: &str = "Active Alert";

#[derive(Debug, Deserialize)]
struct AlarmsResponse {
    alarms: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AlertOutcome {
    active: bool,
    status_text: String,
}

#[derive(Debug, Clone)]
pub struct AlertPoller {
    last_check_ms: Option<u64>,
    last_call_time: String,
    last_http_status: Option<u16>,
    last_error: Option<String>,
    last_response: String,

    alert_active: bool,
    previous_alert_active: bool,
    region_name: String,
    status_text: String,
}

impl Default for AlertPoller {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertPoller {
    pub fn new() -> Self {
        Self {
            last_check_ms: None,
            last_call_time: "Never".to_string(),
            last_http_status: None,
            last_error: None,
            last_response: String::new(),
            alert_active: false,
            previous_alert_active: false,
            region_name: "Unknown".to_string(),
            status_text: "Not checked yet".to_string(),
        }
    }

    pub fn is_alert_active(&self) -> bool {
        self.alert_active
    }

    pub fn region_name(&self) -> &str {
        &self.region_name
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    pub fn last_check_ms(&self) -> Option<u64> {
        self.last_check_ms
    }

    pub fn last_call_time(&self) -> &str {
        &self.last_call_time
    }

    pub fn last_http_status(&self) -> Option<u16> {
        self.last_http_status
    }

    pub fn last_check_ok(&self) -> bool {
        self.last_http_status == Some(200)
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_response(&self) -> &str {
        &self.last_response
    }

    pub fn is_due(&self, cfg: &AlertConfig, now_ms: u64) -> bool {
        self.last_check_ms
            .map(|last| now_ms.saturating_sub(last) >= cfg.check_interval_ms())
            .unwrap_or(true)
    }

    pub fn update(
        &mut self,
        cfg: &AlertConfig,
        now_ms: u64,
        http: &mut impl HttpFetch,
        events: &mut impl StatusEvents,
    ) -> bool {
        if !self.is_due(cfg, now_ms) {
            return false;
        }
        self.poll(cfg, now_ms, http, events);
        true
    }

    pub fn force_check(
        &mut self,
        cfg: &AlertConfig,
        now_ms: u64,
        http: &mut impl HttpFetch,
        events: &mut impl StatusEvents,
    ) {
        self.poll(cfg, now_ms, http, events);
    }

    pub fn force_update(&mut self) {
        self.last_check_ms = None;
    }

    pub fn snapshot(&self) -> AlertStatusView {
        AlertStatusView {
            alert_active: self.alert_active,
            region_name: self.region_name.clone(),
            status: self.status_text.clone(),
            last_call_time: self.last_call_time.clone(),
            last_http_code: self.last_http_status,
            last_error: self.last_error.clone(),
            last_response: self.last_response.clone(),
        }
    }

    pub fn apply_response(
        &mut self,
        cfg: &AlertConfig,
        now_ms: u64,
        response: Result<HttpResponse, PollError>,
        events: &mut impl StatusEvents,
    ) {
        self.last_check_ms = Some(now_ms);
        self.last_call_time = format_uptime(now_ms);

        let result = match response {
            Ok(response) => {
                self.last_http_status = Some(response.status);
                if response.status == 200 {
                    let outcome = parse_alarms(&response.body, cfg.region_id);
                    self.last_response = response.body;
                    outcome
                } else {
                    self.last_response.clear();
                    Err(PollError::Status(response.status))
                }
            }
            Err(err) => {
                self.last_http_status = None;
                self.last_response.clear();
                Err(err)
            }
        };

        match result {
            Ok(outcome) => {
                self.last_error = None;
                self.region_name = name_for_region(cfg.region_id);
                self.alert_active = outcome.active;
                self.status_text = outcome.status_text;
                self.emit_edge(events);
            }
            Err(err) => {
                warn!("alert check for region {} failed: {err}", cfg.region_id);
                self.last_error = Some(err.to_string());
            }
        }
    }

    fn poll(
        &mut self,
        cfg: &AlertConfig,
        now_ms: u64,
        http: &mut impl HttpFetch,
        events: &mut impl StatusEvents,
    ) {
        let response = http.get(&cfg.request_url(), HTTP_TIMEOUT);
        self.apply_response(cfg, now_ms, response, events);
    }

    fn emit_edge(&mut self, events: &mut impl StatusEvents) {
        if self.alert_active == self.previous_alert_active {
            return;
        }

        self.previous_alert_active = self.alert_active;
        if self.alert_active {
            info!("alert started in {} ({})", self.region_name, self.status_text);
            events.on_alert_started();
        } else {
            info!("alert dismissed in {}", self.region_name);
            events.on_alert_dismissed();
        }
    }
}

fn parse_alarms(body: &str, region_id: u16) -> Result<AlertOutcome, PollError> {
    let response: AlarmsResponse = serde_json::from_str(body)?;

    let matching = response.alarms.iter().find(|alarm| {
        let id = alarm.get("regionId").and_then(Value::as_i64);
        if id.is_none() {
            debug!("skipping alarm entry without a numeric regionId: {alarm}");
        }
        id == Some(i64::from(region_id))
    });

    Ok(match matching {
        Some(alarm) => AlertOutcome {
            active: true,
            status_text: match alarm.get("alarmType").and_then(Value::as_str) {
                Some(kind) if !kind.is_empty() => format!("{kind} Alert"),
                _ => STATUS_ACTIVE_ALERT.to_string(),
            },
        },
        None => AlertOutcome {
            active: false,
            status_text: STATUS_NO_ALERT.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        error::PollErrorKind,
        testing::{Event, RecordingEvents, ScriptedFetcher},
    };

    const KYIV_ALARM: &str = r#"{"alarms":[{"regionId":14,"alarmType":"AIR"}]}"#;
    const OTHER_ALARM: &str = r#"{"alarms":[{"regionId":22,"alarmType":"AIR"}]}"#;
    const NO_ALARMS: &str = r#"{"alarms":[]}"#;

    fn config() -> AlertConfig {
        AlertConfig {
            api_url: "https://alerts.test/status?regions=".to_string(),
            region_id: 14,
            check_interval_sec: 30,
        }
    }

    fn activate(poller: &mut AlertPoller, events: &mut RecordingEvents) {
        let mut http = ScriptedFetcher::default().ok(KYIV_ALARM);
        poller.force_check(&config(), 1_000, &mut http, events);
        assert!(poller.is_alert_active());
    }

    #[test]
    fn empty_alarm_list_clears_alert() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        activate(&mut poller, &mut events);

        let mut http = ScriptedFetcher::default().ok(NO_ALARMS);
        poller.force_check(&config(), 2_000, &mut http, &mut events);

        assert!(!poller.is_alert_active());
        assert_eq!(poller.status_text(), STATUS_NO_ALERT);
        assert_eq!(
            events.take(),
            vec![Event::AlertStarted, Event::AlertDismissed]
        );
    }

    #[test]
    fn empty_alarm_list_from_fresh_state_emits_nothing() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        let mut http = ScriptedFetcher::default().ok(NO_ALARMS);

        poller.force_check(&config(), 0, &mut http, &mut events);

        assert!(!poller.is_alert_active());
        assert_eq!(poller.status_text(), STATUS_NO_ALERT);
        assert!(events.events.is_empty());
    }

    #[test]
    fn matching_region_fires_alert_started_once() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        let mut http = ScriptedFetcher::default().ok(KYIV_ALARM).ok(KYIV_ALARM);

        poller.force_check(&config(), 0, &mut http, &mut events);
        poller.force_check(&config(), 30_000, &mut http, &mut events);

        assert!(poller.is_alert_active());
        assert_eq!(poller.status_text(), "AIR Alert");
        assert_eq!(poller.region_name(), "Київська");
        assert_eq!(events.take(), vec![Event::AlertStarted]);
        assert_eq!(
            http.requests,
            vec!["https://alerts.test/status?regions=14".to_string(); 2]
        );
    }

    #[test]
    fn other_region_alarm_is_not_ours() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        let mut http = ScriptedFetcher::default().ok(OTHER_ALARM);

        poller.force_check(&config(), 0, &mut http, &mut events);

        assert!(!poller.is_alert_active());
        assert_eq!(poller.status_text(), STATUS_NO_ALERT);
        assert!(events.events.is_empty());
    }

    #[test]
    fn missing_alarm_type_uses_generic_text() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        let mut http = ScriptedFetcher::default().ok(r#"{"alarms":[{"regionId":14}]}"#);

        poller.force_check(&config(), 0, &mut http, &mut events);

        assert_eq!(poller.status_text(), STATUS_ACTIVE_ALERT);
    }

    #[test]
    fn malformed_alarm_entries_do_not_hide_our_region() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        let mut http = ScriptedFetcher::default().ok(
            r#"{"alarms":[
                {"regionId":"nine","alarmType":"AIR"},
                {"alarmType":7},
                "garbage",
                {"regionId":14,"alarmType":{"code":"AIR"}}
            ]}"#,
        );

        poller.force_check(&config(), 0, &mut http, &mut events);

        assert_eq!(poller.last_error(), None);
        assert!(poller.is_alert_active());
        assert_eq!(poller.status_text(), STATUS_ACTIVE_ALERT);
        assert_eq!(events.take(), vec![Event::AlertStarted]);
    }

    #[test]
    fn failures_preserve_alert_state() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        activate(&mut poller, &mut events);
        events.take();

        let mut http = ScriptedFetcher::default()
            .status(503)
            .fail("timed out")
            .ok("{not json")
            .ok(r#"{"regions":[]}"#);

        poller.force_check(&config(), 2_000, &mut http, &mut events);
        assert_eq!(poller.last_http_status(), Some(503));
        assert_eq!(poller.last_error(), Some("HTTP error 503"));

        poller.force_check(&config(), 3_000, &mut http, &mut events);
        assert_eq!(poller.last_http_status(), None);
        assert_eq!(poller.last_error(), Some("Connection failed: timed out"));
        assert!(!poller.last_check_ok());

        poller.force_check(&config(), 4_000, &mut http, &mut events);
        assert!(poller.last_check_ok());
        assert!(poller
            .last_error()
            .unwrap()
            .starts_with("Failed to parse JSON response"));
        assert_eq!(poller.last_response(), "{not json");

        poller.force_check(&config(), 5_000, &mut http, &mut events);
        assert!(poller.last_error().is_some());

        assert!(poller.is_alert_active());
        assert_eq!(poller.status_text(), "AIR Alert");
        assert!(events.events.is_empty());
    }

    #[test]
    fn update_respects_interval() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        let mut http = ScriptedFetcher::default()
            .ok(NO_ALARMS)
            .ok(NO_ALARMS)
            .ok(NO_ALARMS);

        assert!(poller.update(&config(), 10_000, &mut http, &mut events));
        assert!(!poller.update(&config(), 39_999, &mut http, &mut events));
        assert!(poller.update(&config(), 40_000, &mut http, &mut events));
        assert_eq!(http.requests.len(), 2);
        assert_eq!(poller.last_check_ms(), Some(40_000));
    }

    #[test]
    fn force_update_makes_next_update_due_without_polling() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        let mut http = ScriptedFetcher::default().ok(NO_ALARMS).ok(NO_ALARMS);

        poller.update(&config(), 1_000, &mut http, &mut events);
        poller.force_update();
        assert_eq!(http.requests.len(), 1);

        assert!(poller.update(&config(), 1_001, &mut http, &mut events));
        assert_eq!(http.requests.len(), 2);
    }

    #[test]
    fn region_change_applies_on_next_poll() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        let mut http = ScriptedFetcher::default().ok(KYIV_ALARM).ok(KYIV_ALARM);

        poller.force_check(&config(), 0, &mut http, &mut events);
        assert_eq!(poller.region_name(), "Київська");

        let mut cfg = config();
        cfg.region_id = 31;
        assert_eq!(poller.region_name(), "Київська");

        poller.force_check(&cfg, 1_000, &mut http, &mut events);
        assert_eq!(poller.region_name(), "м. Київ");
        assert!(!poller.is_alert_active());
        assert_eq!(events.take(), vec![Event::AlertStarted, Event::AlertDismissed]);
    }

    #[test]
    fn applied_response_counts_as_a_check() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        let response = Ok(HttpResponse {
            status: 200,
            body: KYIV_ALARM.to_string(),
        });

        poller.apply_response(&config(), 5_000, response, &mut events);

        assert!(poller.is_alert_active());
        assert_eq!(poller.last_check_ms(), Some(5_000));
        assert!(!poller.is_due(&config(), 34_999));
        assert_eq!(events.take(), vec![Event::AlertStarted]);
    }

    #[test]
    fn parse_errors_are_classified() {
        let err = parse_alarms("[]", 14).unwrap_err();
        assert_eq!(err.kind(), PollErrorKind::Parse);
    }

    #[test]
    fn snapshot_reports_diagnostics() {
        let mut poller = AlertPoller::new();
        let mut events = RecordingEvents::default();
        let mut http = ScriptedFetcher::default().ok(KYIV_ALARM);

        poller.force_check(&config(), 3_723_000, &mut http, &mut events);
        let view = poller.snapshot();

        assert!(view.alert_active);
        assert_eq!(view.last_call_time, "01:02:03");
        assert_eq!(view.last_http_code, Some(200));
        assert_eq!(view.last_response, KYIV_ALARM);
        assert_eq!(view.last_error, None);
    }
}
