use std::{collections::VecDeque, time::Duration};

use crate::{
    error::PollError,
    ports::{HttpFetch, HttpResponse, RgbOutput, StatusEvents},
    types::Rgb,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    AlertStarted,
    AlertDismissed,
    OutageStarted,
    PowerRestored,
}

#[derive(Debug, Default)]
pub struct RecordingEvents {
    pub events: Vec<Event>,
}

impl RecordingEvents {
    pub fn take(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.events)
    }
}

impl StatusEvents for RecordingEvents {
    fn on_alert_started(&mut self) {
        self.events.push(Event::AlertStarted);
    }

    fn on_alert_dismissed(&mut self) {
        self.events.push(Event::AlertDismissed);
    }

    fn on_outage_started(&mut self) {
        self.events.push(Event::OutageStarted);
    }

    fn on_power_restored(&mut self) {
        self.events.push(Event::PowerRestored);
    }
}

#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    pub responses: VecDeque<Result<HttpResponse, PollError>>,
    pub requests: Vec<String>,
}

impl ScriptedFetcher {
    pub fn ok(mut self, body: &str) -> Self {
        self.responses.push_back(Ok(HttpResponse {
            status: 200,
            body: body.to_string(),
        }));
        self
    }

    pub fn status(mut self, status: u16) -> Self {
        self.responses.push_back(Ok(HttpResponse {
            status,
            body: String::new(),
        }));
        self
    }

    pub fn fail(mut self, reason: &str) -> Self {
        self.responses
            .push_back(Err(PollError::Connect(reason.to_string())));
        self
    }
}

impl HttpFetch for ScriptedFetcher {
    fn get(&mut self, url: &str, _timeout: Duration) -> Result<HttpResponse, PollError> {
        self.requests.push(url.to_string());
        self.responses
            .pop_front()
            .unwrap_or_else(|| Err(PollError::Connect("no route to host".to_string())))
    }
}

#[derive(Debug, Default)]
pub struct RecordingLed {
    pub colors: Vec<Rgb>,
}

impl RecordingLed {
    pub fn last(&self) -> Option<Rgb> {
        self.colors.last().copied()
    }
}

impl RgbOutput for RecordingLed {
    fn set_color(&mut self, color: Rgb) {
        self.colors.push(color);
    }
}
