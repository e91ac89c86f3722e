use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
    time::{Duration, Instant},
};

use alertlight_common::{
    clock::minute_of_day, AlertLight, DeviceStatus, HttpFetch, HttpResponse, PollError,
    PollResults, Rgb, RgbOutput, RuntimeConfig, TestCommand, HTTP_TIMEOUT,
};
use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tokio::{net::TcpListener, sync::Mutex};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

const TICK_INTERVAL: Duration = Duration::from_millis(200);
const USER_AGENT: &str = concat!("alertlight/", env!("CARGO_PKG_VERSION"));

#[derive(Clone)]
struct AppState {
    light: Arc<Mutex<AlertLight>>,
    runtime: Arc<RuntimeConfig>,
    time_synced: Arc<AtomicBool>,
    http: ReqwestFetcher,
}

impl AppState {
    fn local_minute(&self) -> Option<u16> {
        let local_minute = now_in_timezone(&self.runtime.network.timezone).map(minute_of_day);
        self.time_synced
            .store(local_minute.is_some(), Ordering::Relaxed);
        local_minute
    }

    async fn status(&self) -> DeviceStatus {
        let time_synced = self.time_synced.load(Ordering::Relaxed);
        self.light.lock().await.status(monotonic_ms(), time_synced)
    }

    async fn fetch(&self, url: String) -> Result<HttpResponse, PollError> {
        let mut http = self.http.clone();
        tokio::task::spawn_blocking(move || http.get(&url, HTTP_TIMEOUT))
            .await
            .unwrap_or_else(|err| Err(PollError::Connect(format!("fetch task failed: {err}"))))
    }
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
struct ReqwestFetcher {
    client: reqwest::blocking::Client,
}

impl ReqwestFetcher {
    fn new() -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpFetch for ReqwestFetcher {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<HttpResponse, PollError> {
        let response = self
            .client
            .get(url)
            .timeout(timeout)
            .send()
            .map_err(|err| PollError::Connect(err.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .map_err(|err| PollError::Connect(err.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

#[derive(Debug, Default)]
struct LogLed {
    last: Option<Rgb>,
}

impl RgbOutput for LogLed {
    fn set_color(&mut self, color: Rgb) {
        if self.last != Some(color) {
            debug!("led color {color}");
            self.last = Some(color);
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut runtime, |key| std::env::var(key).ok());
    runtime.sanitize();

    info!(
        "region {} ({}), outage queue {}",
        runtime.alert.region_id,
        alertlight_common::regions::name_for_region(runtime.alert.region_id),
        runtime.outage.queue
    );

    let http = tokio::task::spawn_blocking(ReqwestFetcher::new)
        .await
        .context("HTTP client setup task failed")??;

    let app_state = AppState {
        light: Arc::new(Mutex::new(AlertLight::new())),
        runtime: Arc::new(runtime),
        time_synced: Arc::new(AtomicBool::new(false)),
        http,
    };

    spawn_control_loop(app_state.clone());

    let port = app_state.runtime.network.web_port;
    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/alert/check", post(handle_alert_check))
        .route("/api/outage/check", post(handle_outage_check))
        .route("/api/rgb/test", post(handle_rgb_test))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind alertlight server at {addr}"))?;

    info!("alertlight listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn spawn_control_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TICK_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut led = LogLed::default();

        loop {
            interval.tick().await;
            let now_ms = monotonic_ms();

            let pending = {
                let light = app_state.light.lock().await;
                light.pending_polls(&app_state.runtime, now_ms, true)
            };

            let mut results = PollResults::default();
            if let Some(url) = pending.alert {
                results.alert = Some(app_state.fetch(url).await);
            }
            if let Some(url) = pending.outage {
                results.outage = Some(app_state.fetch(url).await);
            }

            let local_minute = app_state.local_minute();
            let mut light = app_state.light.lock().await;
            light.finish_tick(&app_state.runtime, now_ms, local_minute, results, &mut led);
        }
    });
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.status().await)
}

async fn handle_alert_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = state.fetch(state.runtime.alert.request_url()).await;
    {
        let mut light = state.light.lock().await;
        light.apply_alert_response(&state.runtime, monotonic_ms(), response);
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_outage_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = state.fetch(state.runtime.outage.api_url.clone()).await;
    let local_minute = state.local_minute();
    {
        let mut light = state.light.lock().await;
        light.apply_outage_response(&state.runtime, monotonic_ms(), local_minute, response);
    }

    handle_get_status(State(state)).await.into_response()
}

async fn handle_rgb_test(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(mode) = params.get("mode") else {
        return error_response(StatusCode::BAD_REQUEST, "Missing 'mode' parameter");
    };
    let command = match mode.parse::<TestCommand>() {
        Ok(command) => command,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, &message),
    };

    {
        let mut light = state.light.lock().await;
        light.apply_test_command(command, monotonic_ms());
    }
    handle_get_status(State(state)).await.into_response()
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("ALERTLIGHT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.alertlight"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<RuntimeConfig>(&raw).with_context(|| {
                format!("invalid runtime config in {}", self.runtime_path.display())
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

fn apply_env_overrides(runtime: &mut RuntimeConfig, var: impl Fn(&str) -> Option<String>) {
    if let Some(region) = var("ALERTLIGHT_REGION") {
        match region.trim().parse::<u16>() {
            Ok(region_id) => runtime.alert.region_id = region_id,
            Err(_) => warn!("ignoring invalid ALERTLIGHT_REGION `{region}`"),
        }
    }

    if let Some(queue) = var("ALERTLIGHT_QUEUE") {
        runtime.outage.queue = queue;
    }

    if let Some(port) = var("ALERTLIGHT_HTTP_PORT") {
        match port.trim().parse::<u16>() {
            Ok(port) => runtime.network.web_port = port,
            Err(_) => warn!("ignoring invalid ALERTLIGHT_HTTP_PORT `{port}`"),
        }
    }
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
