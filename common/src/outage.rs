use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    clock::{format_minute, format_uptime, MINUTES_PER_DAY},
    config::OutageConfig,
    error::PollError,
    ports::{HttpFetch, HttpResponse, StatusEvents, HTTP_TIMEOUT},
    types::{OutageSlotView, OutageStatusView},
};

pub const STATUS_EMERGENCY: &str = "EmergencyShutdowns";
pub const SLOT_TYPE_DEFINITE: &str = "Definite";

#[derive(Debug, Deserialize)]
struct DayPayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    slots: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutageSlot {
    start_minute: u16,
    end_minute: u16,
    label: String,
    active_now: bool,
}

impl OutageSlot {
    pub fn new(start_minute: u16, end_minute: u16) -> Option<Self> {
        if start_minute >= end_minute || end_minute > MINUTES_PER_DAY {
            return None;
        }
        Some(Self {
            start_minute,
            end_minute,
            label: format!(
                "{}-{}",
                format_minute(start_minute),
                format_minute(end_minute)
            ),
            active_now: false,
        })
    }

    pub fn start_minute(&self) -> u16 {
        self.start_minute
    }

    pub fn end_minute(&self) -> u16 {
        self.end_minute
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_active_now(&self) -> bool {
        self.active_now
    }

    // Half-open: the end minute is already outside the slot.
    pub fn contains(&self, minute: u16) -> bool {
        (self.start_minute..self.end_minute).contains(&minute)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScheduleUpdate {
    Emergency,
    Slots(Vec<OutageSlot>),
}

#[derive(Debug, Clone)]
pub struct OutagePoller {
    last_check_ms: Option<u64>,
    last_call_time: String,
    last_http_status: Option<u16>,
    last_error: Option<String>,
    last_response: String,

    queue: String,
    slots: Vec<OutageSlot>,
    emergency_shutdown: bool,
    currently_outage: bool,
    previous_outage: bool,
}

impl Default for OutagePoller {
    fn default() -> Self {
        Self::new()
    }
}

impl OutagePoller {
    pub fn new() -> Self {
        Self {
            last_check_ms: None,
            last_call_time: "Never".to_string(),
            last_http_status: None,
            last_error: None,
            last_response: String::new(),
            queue: String::new(),
            slots: Vec::new(),
            emergency_shutdown: false,
            currently_outage: false,
            previous_outage: false,
        }
    }

    pub fn is_currently_outage(&self) -> bool {
        self.currently_outage
    }

    pub fn is_emergency_shutdown(&self) -> bool {
        self.emergency_shutdown
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn slots(&self) -> &[OutageSlot] {
        &self.slots
    }

    pub fn slot_labels(&self) -> Vec<(String, bool)> {
        self.slots
            .iter()
            .map(|slot| (slot.label.clone(), slot.active_now))
            .collect()
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

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn last_response(&self) -> &str {
        &self.last_response
    }

    pub fn is_due(&self, cfg: &OutageConfig, now_ms: u64) -> bool {
        self.last_check_ms
            .map(|last| now_ms.saturating_sub(last) >= cfg.check_interval_ms())
            .unwrap_or(true)
    }

    pub fn update(
        &mut self,
        cfg: &OutageConfig,
        now_ms: u64,
        local_minute: Option<u16>,
        http: &mut impl HttpFetch,
        events: &mut impl StatusEvents,
    ) -> bool {
        if !self.is_due(cfg, now_ms) {
            self.refresh_active_states(local_minute, events);
            return false;
        }
        self.force_check(cfg, now_ms, local_minute, http, events);
        true
    }

    pub fn force_check(
        &mut self,
        cfg: &OutageConfig,
        now_ms: u64,
        local_minute: Option<u16>,
        http: &mut impl HttpFetch,
        events: &mut impl StatusEvents,
    ) {
        let response = http.get(&cfg.api_url, HTTP_TIMEOUT);
        self.apply_response(cfg, now_ms, local_minute, response, events);
    }

    pub fn force_update(&mut self) {
        self.last_check_ms = None;
    }

    pub fn refresh_active_states(
        &mut self,
        local_minute: Option<u16>,
        events: &mut impl StatusEvents,
    ) {
        if let Some(minute) = local_minute {
            for slot in &mut self.slots {
                slot.active_now = slot.contains(minute);
            }
        }

        self.currently_outage =
            self.emergency_shutdown || self.slots.iter().any(OutageSlot::is_active_now);
        self.emit_edge(events);
    }

    pub fn snapshot(&self) -> OutageStatusView {
        OutageStatusView {
            queue: self.queue.clone(),
            currently_outage: self.currently_outage,
            emergency_shutdown: self.emergency_shutdown,
            slots: self
                .slots
                .iter()
                .map(|slot| OutageSlotView {
                    time_range: slot.label.clone(),
                    is_active: slot.active_now,
                })
                .collect(),
            last_call_time: self.last_call_time.clone(),
            last_http_code: self.last_http_status,
            last_error: self.last_error.clone(),
            last_response: self.last_response.clone(),
        }
    }

    pub fn apply_response(
        &mut self,
        cfg: &OutageConfig,
        now_ms: u64,
        local_minute: Option<u16>,
        response: Result<HttpResponse, PollError>,
        events: &mut impl StatusEvents,
    ) {
        self.last_check_ms = Some(now_ms);
        self.last_call_time = match local_minute {
            Some(minute) => format_minute(minute),
            None => format_uptime(now_ms),
        };

        let result = match response {
            Ok(response) => {
                self.last_http_status = Some(response.status);
                if response.status == 200 {
                    self.queue = cfg.queue.clone();
                    let update = parse_schedule(&response.body, &cfg.queue);
                    self.last_response = response.body;
                    update
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
            Ok(ScheduleUpdate::Emergency) => {
                self.last_error = None;
                if !self.emergency_shutdown {
                    info!("queue {}: emergency shutdowns in effect", self.queue);
                }
                self.emergency_shutdown = true;
                self.currently_outage = true;
                self.slots.clear();
            }
            Ok(ScheduleUpdate::Slots(slots)) => {
                self.last_error = None;
                info!("queue {}: {} definite outage slot(s) today", self.queue, slots.len());
                self.emergency_shutdown = false;
                self.slots = slots;
            }
            Err(err) => {
                warn!("outage schedule check for queue {} failed: {err}", cfg.queue);
                self.last_error = Some(err.to_string());
            }
        }

        self.refresh_active_states(local_minute, events);
    }

    fn emit_edge(&mut self, events: &mut impl StatusEvents) {
        if self.currently_outage == self.previous_outage {
            return;
        }

        self.previous_outage = self.currently_outage;
        if self.currently_outage {
            info!("outage started for queue {}", self.queue);
            events.on_outage_started();
        } else {
            info!("power restored for queue {}", self.queue);
            events.on_power_restored();
        }
    }
}

fn parse_schedule(body: &str, queue: &str) -> Result<ScheduleUpdate, PollError> {
    let root: Value = serde_json::from_str(body)?;
    if !root.is_object() {
        return Err(PollError::Parse("expected a JSON object".to_string()));
    }

    let queue_data = root
        .get(queue)
        .ok_or_else(|| PollError::MissingKey(queue.to_string()))?;
    let today = queue_data
        .get("today")
        .ok_or_else(|| PollError::MissingKey(format!("{queue}.today")))?;
    let day = DayPayload::deserialize(today)?;

    if day.status.as_deref() == Some(STATUS_EMERGENCY) {
        return Ok(ScheduleUpdate::Emergency);
    }

    let slots = day
        .slots
        .iter()
        .filter(|slot| slot.get("type").and_then(Value::as_str) == Some(SLOT_TYPE_DEFINITE))
        .filter_map(|slot| {
            let minute = |key: &str| {
                slot.get(key)
                    .and_then(Value::as_u64)
                    .and_then(|minute| u16::try_from(minute).ok())
            };
            let parsed = minute("start")
                .zip(minute("end"))
                .and_then(|(start, end)| OutageSlot::new(start, end));
            if parsed.is_none() {
                warn!("dropping invalid outage slot {slot}");
            }
            parsed
        })
        .collect();

    Ok(ScheduleUpdate::Slots(slots))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        error::PollErrorKind,
        testing::{Event, RecordingEvents, ScriptedFetcher},
    };

    const MORNING_SCHEDULE: &str = r#"{
        "6.2": {
            "today": {
                "status": "ScheduleApplies",
                "slots": [
                    {"type": "Definite", "start": 480, "end": 600},
                    {"type": "NotPlanned", "start": 600, "end": 720},
                    {"type": "Possible", "start": 720, "end": 840},
                    {"type": "Definite", "start": 1200, "end": 1440}
                ]
            },
            "tomorrow": {"status": "WaitingForSchedule", "slots": []}
        }
    }"#;
    const EMERGENCY: &str = r#"{"6.2": {"today": {"status": "EmergencyShutdowns", "slots": []}}}"#;
    const CLEAR_DAY: &str = r#"{"6.2": {"today": {"status": "ScheduleApplies", "slots": []}}}"#;

    fn config() -> OutageConfig {
        OutageConfig {
            api_url: "https://outages.test/planned".to_string(),
            queue: "6.2".to_string(),
            check_interval_sec: 900,
        }
    }

    fn loaded(body: &str, minute: u16, events: &mut RecordingEvents) -> OutagePoller {
        let mut poller = OutagePoller::new();
        let mut http = ScriptedFetcher::default().ok(body);
        poller.force_check(&config(), 0, Some(minute), &mut http, events);
        poller
    }

    #[test]
    fn keeps_only_definite_slots_in_source_order() {
        let mut events = RecordingEvents::default();
        let poller = loaded(MORNING_SCHEDULE, 300, &mut events);

        assert_eq!(
            poller.slot_labels(),
            vec![
                ("08:00-10:00".to_string(), false),
                ("20:00-24:00".to_string(), false),
            ]
        );
        assert_eq!(poller.queue(), "6.2");
        assert!(!poller.is_currently_outage());
        assert!(events.events.is_empty());
    }

    #[test]
    fn slot_boundary_is_half_open() {
        let slot = OutageSlot::new(480, 600).unwrap();
        assert!(!slot.contains(479));
        for minute in 480..600 {
            assert!(slot.contains(minute), "minute {minute}");
        }
        assert!(!slot.contains(600));
    }

    #[test]
    fn rejects_inverted_or_out_of_day_slots() {
        assert!(OutageSlot::new(600, 600).is_none());
        assert!(OutageSlot::new(700, 600).is_none());
        assert!(OutageSlot::new(0, 1441).is_none());
        assert!(OutageSlot::new(0, 1440).is_some());
    }

    #[test]
    fn odd_slot_entries_do_not_discard_definite_slots() {
        let mut events = RecordingEvents::default();
        let poller = loaded(
            r#"{"6.2": {"today": {"slots": [
                {"type": "Definite", "start": 480, "end": 600},
                {"type": "Possible"},
                {"start": 700, "end": 800},
                {"type": "Definite", "start": "noon", "end": 800},
                {"type": "Definite", "start": -60, "end": 30},
                {"type": 3, "start": 0, "end": 60}
            ]}}}"#,
            500,
            &mut events,
        );

        assert_eq!(poller.last_error(), None);
        assert_eq!(poller.slot_labels(), vec![("08:00-10:00".to_string(), true)]);
        assert!(poller.is_currently_outage());
        assert_eq!(events.take(), vec![Event::OutageStarted]);
    }

    #[test]
    fn clock_drives_outage_edges_without_polling() {
        let mut events = RecordingEvents::default();
        let mut poller = loaded(MORNING_SCHEDULE, 479, &mut events);
        let mut http = ScriptedFetcher::default();

        poller.update(&config(), 60_000, Some(480), &mut http, &mut events);
        assert!(poller.is_currently_outage());
        assert!(poller.slots()[0].is_active_now());

        poller.update(&config(), 120_000, Some(599), &mut http, &mut events);
        assert!(poller.is_currently_outage());

        poller.update(&config(), 180_000, Some(600), &mut http, &mut events);
        assert!(!poller.is_currently_outage());
        assert!(!poller.slots()[0].is_active_now());

        assert!(http.requests.is_empty());
        assert_eq!(
            events.take(),
            vec![Event::OutageStarted, Event::PowerRestored]
        );
    }

    #[test]
    fn poll_into_active_slot_fires_outage_started() {
        let mut events = RecordingEvents::default();
        let poller = loaded(MORNING_SCHEDULE, 540, &mut events);

        assert!(poller.is_currently_outage());
        assert_eq!(events.take(), vec![Event::OutageStarted]);
    }

    #[test]
    fn emergency_overrides_previous_slots() {
        let mut events = RecordingEvents::default();
        let mut poller = loaded(MORNING_SCHEDULE, 300, &mut events);
        let mut http = ScriptedFetcher::default().ok(EMERGENCY);

        poller.force_check(&config(), 1_000, Some(300), &mut http, &mut events);

        assert!(poller.is_emergency_shutdown());
        assert!(poller.is_currently_outage());
        assert!(poller.slots().is_empty());
        assert_eq!(events.take(), vec![Event::OutageStarted]);

        // Emergency does not depend on the clock.
        poller.refresh_active_states(None, &mut events);
        poller.refresh_active_states(Some(1_000), &mut events);
        assert!(poller.is_currently_outage());
        assert!(events.events.is_empty());
    }

    #[test]
    fn lifting_emergency_restores_power() {
        let mut events = RecordingEvents::default();
        let mut poller = loaded(EMERGENCY, 300, &mut events);
        let mut http = ScriptedFetcher::default().ok(CLEAR_DAY);

        poller.force_check(&config(), 1_000, Some(300), &mut http, &mut events);

        assert!(!poller.is_emergency_shutdown());
        assert!(!poller.is_currently_outage());
        assert_eq!(
            events.take(),
            vec![Event::OutageStarted, Event::PowerRestored]
        );
    }

    #[test]
    fn failures_preserve_schedule() {
        let mut events = RecordingEvents::default();
        let mut poller = loaded(MORNING_SCHEDULE, 540, &mut events);
        events.take();
        let mut cfg = config();
        let mut http = ScriptedFetcher::default()
            .fail("dns lookup failed")
            .status(500)
            .ok("<html>")
            .ok(r#"{"6.2": {"yesterday": {}}}"#)
            .ok(MORNING_SCHEDULE);

        poller.force_check(&cfg, 1_000, Some(540), &mut http, &mut events);
        assert_eq!(poller.last_error(), Some("Connection failed: dns lookup failed"));

        poller.force_check(&cfg, 2_000, Some(540), &mut http, &mut events);
        assert_eq!(poller.last_http_status(), Some(500));

        poller.force_check(&cfg, 3_000, Some(540), &mut http, &mut events);
        assert!(poller.last_error().unwrap().starts_with("Failed to parse"));

        poller.force_check(&cfg, 4_000, Some(540), &mut http, &mut events);
        assert_eq!(poller.last_error(), Some("Missing key `6.2.today` in response"));

        cfg.queue = "1.1".to_string();
        poller.force_check(&cfg, 5_000, Some(540), &mut http, &mut events);
        assert_eq!(poller.last_error(), Some("Missing key `1.1` in response"));

        assert_eq!(poller.slots().len(), 2);
        assert!(poller.is_currently_outage());
        assert!(events.events.is_empty());
    }

    #[test]
    fn applied_response_refreshes_slots_and_restarts_interval() {
        let mut events = RecordingEvents::default();
        let mut poller = OutagePoller::new();
        let response = Ok(HttpResponse {
            status: 200,
            body: MORNING_SCHEDULE.to_string(),
        });

        poller.apply_response(&config(), 10_000, Some(1_300), response, &mut events);

        assert!(poller.slots()[1].is_active_now());
        assert!(poller.is_currently_outage());
        assert_eq!(poller.last_call_time(), "21:40");
        assert!(!poller.is_due(&config(), 909_999));
        assert!(poller.is_due(&config(), 910_000));
        assert_eq!(events.take(), vec![Event::OutageStarted]);
    }

    #[test]
    fn missing_queue_is_classified() {
        let err = parse_schedule(CLEAR_DAY, "2.1").unwrap_err();
        assert_eq!(err.kind(), PollErrorKind::MissingKey);

        let err = parse_schedule("[1, 2]", "2.1").unwrap_err();
        assert_eq!(err.kind(), PollErrorKind::Parse);
    }

    #[test]
    fn unsynchronized_clock_leaves_slots_untouched() {
        let mut events = RecordingEvents::default();
        let mut poller = OutagePoller::new();
        let mut http = ScriptedFetcher::default().ok(MORNING_SCHEDULE);

        poller.update(&config(), 0, None, &mut http, &mut events);
        assert_eq!(poller.slots().len(), 2);
        assert!(!poller.is_currently_outage());
        assert_eq!(poller.last_call_time(), "00:00:00");

        poller.update(&config(), 1_000, Some(500), &mut http, &mut events);
        assert!(poller.is_currently_outage());
        assert_eq!(events.take(), vec![Event::OutageStarted]);

        // Losing the clock keeps the last evaluation.
        poller.update(&config(), 2_000, None, &mut http, &mut events);
        assert!(poller.is_currently_outage());
        assert!(events.events.is_empty());
    }

    #[test]
    fn update_respects_interval_and_force_update() {
        let mut events = RecordingEvents::default();
        let mut poller = OutagePoller::new();
        let mut http = ScriptedFetcher::default()
            .ok(CLEAR_DAY)
            .ok(CLEAR_DAY)
            .ok(CLEAR_DAY);

        assert!(poller.update(&config(), 0, Some(0), &mut http, &mut events));
        assert!(!poller.update(&config(), 899_999, Some(0), &mut http, &mut events));
        poller.force_update();
        assert!(poller.update(&config(), 900_000, Some(0), &mut http, &mut events));
        assert!(!poller.update(&config(), 900_001, Some(0), &mut http, &mut events));
        assert_eq!(http.requests.len(), 2);
    }
}
