use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use alertlight_common::{
    clock::minute_of_day, config::NetworkConfig, AlertLight, DeviceStatus, HttpFetch,
    HttpResponse, LedHardwareConfig, PollError, PollResults, RuntimeConfig, TestCommand,
    HTTP_TIMEOUT,
};
use anyhow::{anyhow, Context};
use chrono::{Offset, Utc};
use chrono_tz::Tz;
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::{Read, Write},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{gpio::AnyOutputPin, modem::Modem, prelude::Peripherals, rmt::RMT},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    http::server::{Configuration as HttpConfiguration, EspHttpServer},
    log::EspLogger,
    nvs::{EspDefaultNvsPartition, EspNvs},
    sntp::EspSntp,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};
use serde::Serialize;

use crate::ws2812::Ws2812;

const NVS_NAMESPACE: &str = "alertlight";
const NVS_RUNTIME_KEY: &str = "runtime_json";
const MAX_RESPONSE_BYTES: usize = 64 * 1024;
const RESPONSE_CHUNK_SIZE: usize = 1024;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_RESTART_GRACE_MS: u64 = 300_000;
const WIFI_RECONNECT_INTERVAL_MS: u64 = 10_000;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const TICK_INTERVAL_MS: u64 = 200;
// 2024-01-01T00:00:00Z; anything earlier means SNTP has not synced yet.
const MIN_VALID_EPOCH: i64 = 1_704_067_200;

#[derive(Clone)]
struct SharedState {
    light: Arc<Mutex<AlertLight>>,
    runtime: Arc<RuntimeConfig>,
    led: Arc<Mutex<Ws2812>>,
    time_synced: Arc<AtomicBool>,
    wifi_connected: Arc<AtomicBool>,
}

impl SharedState {
    fn light(&self) -> MutexGuard<'_, AlertLight> {
        self.light.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn led(&self) -> MutexGuard<'_, Ws2812> {
        self.led.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn local_minute(&self) -> Option<u16> {
        let local_minute = local_minute(&self.runtime.network.timezone);
        self.time_synced
            .store(local_minute.is_some(), Ordering::Relaxed);
        local_minute
    }

    fn status(&self) -> DeviceStatus {
        let time_synced = self.time_synced.load(Ordering::Relaxed);
        self.light().status(monotonic_ms(), time_synced)
    }
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
}

#[derive(Debug, Serialize)]
struct NetworkStatus {
    #[serde(rename = "wifiConnected")]
    wifi_connected: bool,
    #[serde(rename = "timeSynced")]
    time_synced: bool,
    timezone: String,
}

struct EspFetcher;

impl HttpFetch for EspFetcher {
    fn get(&mut self, url: &str, timeout: Duration) -> Result<HttpResponse, PollError> {
        let conf = HttpClientConfiguration {
            timeout: Some(timeout),
            crt_bundle_attach: Some(esp_idf_svc::sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&conf)
            .map_err(|err| PollError::Connect(format!("{err:?}")))?;
        let mut client = HttpClient::wrap(connection);
        let request = client
            .request(Method::Get, url, &[("Accept", "application/json")])
            .map_err(|err| PollError::Connect(format!("{err:?}")))?;
        let mut response = request
            .submit()
            .map_err(|err| PollError::Connect(format!("{err:?}")))?;

        let status = response.status();
        let mut body = Vec::new();
        let mut chunk = [0_u8; RESPONSE_CHUNK_SIZE];
        loop {
            let read = response
                .read(&mut chunk)
                .map_err(|err| PollError::Connect(format!("{err:?}")))?;
            if read == 0 {
                break;
            }
            if body.len() + read > MAX_RESPONSE_BYTES {
                return Err(PollError::Parse(format!(
                    "response larger than {MAX_RESPONSE_BYTES} bytes"
                )));
            }
            body.extend_from_slice(&chunk[..read]);
        }

        let body = String::from_utf8(body).map_err(|err| PollError::Parse(err.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    ensure_wifi_defaults(&mut runtime);
    runtime.sanitize();

    info!(
        "NVS config loaded: ssid=`{}`, region={} ({}), queue={}",
        runtime.network.wifi_ssid,
        runtime.alert.region_id,
        alertlight_common::regions::name_for_region(runtime.alert.region_id),
        runtime.outage.queue,
    );

    let Peripherals { modem, rmt, .. } = Peripherals::take()?;
    let led = match init_led(rmt, &runtime.led) {
        Ok(led) => {
            info!(
                "WS2812 initialized on RMT channel{} / GPIO{}",
                runtime.led.rmt_channel, runtime.led.data_pin
            );
            led
        }
        Err(err) => {
            warn!("failed to initialize WS2812, running without LED: {err:#}");
            Ws2812::disabled()
        }
    };

    let wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;
    disable_wifi_power_save();

    let _sntp = EspSntp::new_default().context("failed to start SNTP")?;
    info!("SNTP initialized");

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;

    let shared_state = SharedState {
        light: Arc::new(Mutex::new(AlertLight::new())),
        runtime: Arc::new(runtime),
        led: Arc::new(Mutex::new(led)),
        time_synced: Arc::new(AtomicBool::new(false)),
        wifi_connected: Arc::new(AtomicBool::new(is_wifi_station_connected())),
    };

    spawn_control_loop(shared_state.clone())?;
    let server = create_http_server(shared_state)?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn ensure_wifi_defaults(runtime: &mut RuntimeConfig) {
    if runtime.network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            runtime.network.wifi_ssid = ssid.to_string();
        }
    }

    if runtime.network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            runtime.network.wifi_pass = pass.to_string();
        }
    }
}

fn create_http_server(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        http_port: state.runtime.network.web_port,
        stack_size: 16 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    {
        let state = state.clone();
        server.fn_handler("/api/status", Method::Get, move |req| {
            write_json(req, &state.status())
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/api/alert/check", Method::Post, move |req| {
            if !state.wifi_connected.load(Ordering::Relaxed) {
                return write_error(req, 503, "WiFi not connected");
            }
            let response = EspFetcher.get(&state.runtime.alert.request_url(), HTTP_TIMEOUT);
            state
                .light()
                .apply_alert_response(&state.runtime, monotonic_ms(), response);
            write_json(req, &state.status())
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/api/outage/check", Method::Post, move |req| {
            if !state.wifi_connected.load(Ordering::Relaxed) {
                return write_error(req, 503, "WiFi not connected");
            }
            let response = EspFetcher.get(&state.runtime.outage.api_url, HTTP_TIMEOUT);
            let local_minute = state.local_minute();
            state.light().apply_outage_response(
                &state.runtime,
                monotonic_ms(),
                local_minute,
                response,
            );
            write_json(req, &state.status())
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/api/rgb/test", Method::Post, move |req| {
            let uri = req.uri().to_string();
            let Some(mode) = query_param(&uri, "mode") else {
                return write_error(req, 400, "Missing 'mode' parameter");
            };
            let command = match mode.parse::<TestCommand>() {
                Ok(command) => command,
                Err(message) => return write_error(req, 400, &message),
            };

            state.light().apply_test_command(command, monotonic_ms());
            write_json(req, &state.status())
        })?;
    }

    {
        let state = state.clone();
        server.fn_handler("/api/led/diagnostics", Method::Get, move |req| {
            let diagnostics = state.led().diagnostics();
            write_json(req, &diagnostics)
        })?;
    }

    server.fn_handler("/api/network", Method::Get, move |req| {
        let status = NetworkStatus {
            wifi_connected: state.wifi_connected.load(Ordering::Relaxed),
            time_synced: state.time_synced.load(Ordering::Relaxed),
            timezone: state.runtime.network.timezone.clone(),
        };
        write_json(req, &status)
    })?;

    Ok(server)
}

fn write_json<T: Serialize>(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    payload: &T,
) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn write_error(
    req: esp_idf_svc::http::server::Request<
        &mut esp_idf_svc::http::server::EspHttpConnection<'_>,
    >,
    status_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    let payload = serde_json::json!({ "error": message });
    let body = serde_json::to_vec(&payload)?;
    req.into_response(
        status_code,
        None,
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn query_param(uri: &str, key: &str) -> Option<String> {
    let query = uri.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=').unwrap_or((pair, ""));
        (name == key).then(|| value.replace('+', " "))
    })
}

fn init_led(rmt: RMT, led: &LedHardwareConfig) -> anyhow::Result<Ws2812> {
    if led.data_pin < 0 {
        return Err(anyhow!("invalid LED data pin: {}", led.data_pin));
    }

    let pin = led.data_pin;
    match led.rmt_channel {
        0 => unsafe { Ws2812::new(rmt.channel0, AnyOutputPin::new(pin)) },
        1 => unsafe { Ws2812::new(rmt.channel1, AnyOutputPin::new(pin)) },
        2 => unsafe { Ws2812::new(rmt.channel2, AnyOutputPin::new(pin)) },
        3 => unsafe { Ws2812::new(rmt.channel3, AnyOutputPin::new(pin)) },
        #[cfg(any(esp32, esp32s3))]
        4 => unsafe { Ws2812::new(rmt.channel4, AnyOutputPin::new(pin)) },
        #[cfg(any(esp32, esp32s3))]
        5 => unsafe { Ws2812::new(rmt.channel5, AnyOutputPin::new(pin)) },
        #[cfg(any(esp32, esp32s3))]
        6 => unsafe { Ws2812::new(rmt.channel6, AnyOutputPin::new(pin)) },
        #[cfg(any(esp32, esp32s3))]
        7 => unsafe { Ws2812::new(rmt.channel7, AnyOutputPin::new(pin)) },
        _ => Err(anyhow!("unsupported RMT channel: {}", led.rmt_channel)),
    }
}

// Failing to join is not fatal; the control loop keeps retrying.
fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    if network.wifi_ssid.trim().is_empty() {
        warn!("wifi credentials missing; running offline");
        return Ok(esp_wifi);
    }

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        info!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS}");
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected and netif up on attempt {attempt}");
                return Ok(esp_wifi);
            }
            Err(err) => warn!("wifi connect failed on attempt {attempt}: {err:#}"),
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    warn!("all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed; retrying from control loop");
    Ok(esp_wifi)
}

fn spawn_control_loop(state: SharedState) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("control-loop".into())
        .stack_size(16 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register control loop with watchdog: {err:#}");
            }

            let mut http = EspFetcher;
            let mut wifi_was_connected = state.wifi_connected.load(Ordering::Relaxed);
            let mut wifi_disconnected_since_ms: Option<u64> = None;
            let mut last_reconnect_ms = 0_u64;

            loop {
                feed_watchdog();
                let now_ms = monotonic_ms();
                let wifi_connected = is_wifi_station_connected();
                state
                    .wifi_connected
                    .store(wifi_connected, Ordering::Relaxed);

                if wifi_connected {
                    if !wifi_was_connected {
                        info!("wifi reconnected; refreshing alert and outage status");
                        state.light().on_network_restored();
                    }
                    wifi_disconnected_since_ms = None;
                } else {
                    let since = *wifi_disconnected_since_ms.get_or_insert(now_ms);
                    if now_ms.saturating_sub(since) >= WIFI_RESTART_GRACE_MS {
                        warn!(
                            "wifi disconnected for {}s; restarting device for recovery",
                            WIFI_RESTART_GRACE_MS / 1000
                        );
                        thread::sleep(Duration::from_millis(100));
                        unsafe { esp_idf_svc::sys::esp_restart() };
                    }
                    if now_ms.saturating_sub(last_reconnect_ms) >= WIFI_RECONNECT_INTERVAL_MS {
                        last_reconnect_ms = now_ms;
                        request_wifi_reconnect();
                    }
                }
                wifi_was_connected = wifi_connected;

                let pending = state
                    .light()
                    .pending_polls(&state.runtime, now_ms, wifi_connected);

                // Each fetch may take up to HTTP_TIMEOUT; feed in between.
                let mut results = PollResults::default();
                if let Some(url) = pending.alert {
                    results.alert = Some(http.get(&url, HTTP_TIMEOUT));
                    feed_watchdog();
                }
                if let Some(url) = pending.outage {
                    results.outage = Some(http.get(&url, HTTP_TIMEOUT));
                    feed_watchdog();
                }

                let local_minute = state.local_minute();
                {
                    let mut led = state.led();
                    state.light().finish_tick(
                        &state.runtime,
                        now_ms,
                        local_minute,
                        results,
                        &mut *led,
                    );
                }

                thread::sleep(Duration::from_millis(TICK_INTERVAL_MS));
            }
        })
        .context("failed to spawn control loop thread")?;
    Ok(())
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}

fn disable_wifi_power_save() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_set_ps(0) };
    if rc == esp_idf_svc::sys::ESP_OK {
        info!("wifi power save disabled");
    } else {
        warn!("failed to disable wifi power save: esp_err_t={rc}");
    }
}

fn is_wifi_station_connected() -> bool {
    let mut ap_info = esp_idf_svc::sys::wifi_ap_record_t::default();
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_sta_get_ap_info(&mut ap_info) };
    rc == esp_idf_svc::sys::ESP_OK
}

fn request_wifi_reconnect() {
    let rc = unsafe { esp_idf_svc::sys::esp_wifi_connect() };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("wifi reconnect request failed: esp_err_t={rc}");
    }
}

fn local_minute(timezone: &str) -> Option<u16> {
    if Utc::now().timestamp() < MIN_VALID_EPOCH {
        return None;
    }
    now_in_timezone(timezone).map(minute_of_day)
}

fn now_in_timezone(timezone: &str) -> Option<chrono::DateTime<chrono::FixedOffset>> {
    let tz: Tz = timezone.parse().ok()?;
    let local = Utc::now().with_timezone(&tz);
    Some(local.with_timezone(&local.offset().fix()))
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
