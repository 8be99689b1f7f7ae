use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Form, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use chrono_tz::Tz;
use rumqttc::{AsyncClient, Event, Incoming, LastWill, MqttOptions, QoS};
use tokio::{net::TcpListener, sync::Mutex, task::JoinHandle};
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

use relay_common::{
    PinMap, RelayAction, RelayDevice, Storage, StorageError, WallClock, IMAGE_CAPACITY,
};

const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const DEFAULT_UID: &str = "000000";

#[derive(Clone)]
struct AppState {
    device: Arc<Mutex<RelayDevice<FileStorage>>>,
    breathing: Arc<Mutex<Option<JoinHandle<()>>>>,
    mqtt: Option<AsyncClient>,
}

/// Config image kept in a file, buffered in memory until commit.
struct FileStorage {
    path: PathBuf,
    bytes: Vec<u8>,
}

impl FileStorage {
    fn open(path: PathBuf) -> anyhow::Result<Self> {
        let mut bytes = match std::fs::read(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(err).with_context(|| format!("failed to read {}", path.display()))
            }
        };
        bytes.resize(IMAGE_CAPACITY, 0xFF);
        Ok(Self { path, bytes })
    }

    fn range(&self, offset: usize, len: usize) -> Result<std::ops::Range<usize>, StorageError> {
        match offset.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(offset..end),
            _ => Err(StorageError::OutOfBounds {
                offset,
                len,
                capacity: self.bytes.len(),
            }),
        }
    }
}

impl Storage for FileStorage {
    fn capacity(&self) -> usize {
        self.bytes.len()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), StorageError> {
        let range = self.range(offset, buf.len())?;
        buf.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), StorageError> {
        let range = self.range(offset, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), StorageError> {
        let backend = |err: std::io::Error| StorageError::Backend(err.to_string());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(backend)?;
        }
        std::fs::write(&self.path, &self.bytes).map_err(backend)
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let data_dir = std::env::var("RELAY_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./.relay"));
    let storage = FileStorage::open(data_dir.join("config.bin"))?;
    let pins = load_pin_map(&data_dir.join("pins.json")).unwrap_or_else(|err| {
        warn!("failed to load pin map: {err:#}");
        PinMap::ch3()
    });
    let uid = std::env::var("RELAY_UID").unwrap_or_else(|_| DEFAULT_UID.to_string());

    let (device, boot_actions) = RelayDevice::boot(storage, &pins, uid, &WallClock::invalid())
        .context("failed to start relay device")?;
    let clock = wall_clock(&device.config().timezone);
    let http_port = std::env::var("RELAY_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(device.config().http_port);

    let (mqtt, eventloop) = match mqtt_options(&device) {
        Some(options) => {
            let (client, eventloop) = AsyncClient::new(options, 64);
            (Some(client), Some(eventloop))
        }
        None => {
            warn!("no mqtt server configured, messaging disabled");
            (None, None)
        }
    };

    let app_state = AppState {
        device: Arc::new(Mutex::new(device)),
        breathing: Arc::new(Mutex::new(None)),
        mqtt,
    };

    if let Some(eventloop) = eventloop {
        spawn_mqtt_loop(app_state.clone(), eventloop);
    }
    {
        let mut device = app_state.device.lock().await;
        execute_actions(&app_state, boot_actions).await;

        // Boot ran before the wall clock was read; render with it now.
        let actions = device.refresh_indicators(&clock);
        execute_actions(&app_state, actions).await;
    }
    spawn_tick_loop(app_state.clone());

    let web_root = format!("{}/web", env!("CARGO_MANIFEST_DIR"));
    let app = Router::new()
        .route("/relay_do", get(handle_relay_do).post(handle_relay_do))
        .route("/rf_do", get(handle_rf_do).post(handle_rf_do))
        .route(
            "/relay_setting",
            get(handle_relay_setting).post(handle_relay_setting),
        )
        .route("/api/status", get(handle_get_status))
        .fallback_service(ServeDir::new(web_root))
        .with_state(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind relay server at {addr}"))?;

    info!("relay controller listening on http://{addr}");
    axum::serve(listener, app).await?;
    Ok(())
}

fn load_pin_map(path: &Path) -> anyhow::Result<PinMap> {
    match std::fs::read(path) {
        Ok(raw) => Ok(serde_json::from_slice(&raw)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(PinMap::ch3()),
        Err(err) => Err(err.into()),
    }
}

fn mqtt_options(device: &RelayDevice<FileStorage>) -> Option<MqttOptions> {
    let config = device.config();
    let host = std::env::var("MQTT_HOST").unwrap_or_else(|_| config.mqtt.server.clone());
    if host.trim().is_empty() {
        return None;
    }
    let port = std::env::var("MQTT_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(config.mqtt.port);

    let mut options = MqttOptions::new(device.topics().hostname(), host, port);
    options.set_keep_alive(Duration::from_secs(30));

    let (will_topic, will_payload) = device.last_will();
    options.set_last_will(LastWill::new(
        will_topic,
        will_payload,
        QoS::AtMostOnce,
        true,
    ));

    let user = std::env::var("MQTT_USER").unwrap_or_else(|_| config.mqtt.user.clone());
    let pass = std::env::var("MQTT_PASS").unwrap_or_else(|_| config.mqtt.pass.clone());
    if !user.is_empty() {
        options.set_credentials(user, pass);
    }
    Some(options)
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    handle_mqtt_message(&app_state, &message.topic, &message.payload).await;
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    if let Err(err) = on_mqtt_connected(&app_state).await {
                        warn!("mqtt session setup failed: {err:#}");
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

async fn on_mqtt_connected(app_state: &AppState) -> anyhow::Result<()> {
    let Some(mqtt) = &app_state.mqtt else {
        return Ok(());
    };

    let subscriptions = app_state.device.lock().await.subscriptions();
    for filter in subscriptions {
        mqtt.subscribe(filter, QoS::AtMostOnce).await?;
    }

    let device = app_state.device.lock().await;
    execute_actions(app_state, device.on_connected()).await;
    Ok(())
}

async fn handle_mqtt_message(app_state: &AppState, topic: &str, payload: &[u8]) {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return;
    }
    let Ok(message) = std::str::from_utf8(payload) else {
        warn!("non utf8 mqtt payload on {topic}");
        return;
    };

    let mut device = app_state.device.lock().await;
    let actions = device.handle_message(topic, message.trim());
    execute_actions(app_state, actions).await;
}

fn spawn_tick_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;

            let mut device = app_state.device.lock().await;
            let clock = wall_clock(&device.config().timezone);
            let actions = device.on_second(&clock);
            execute_actions(&app_state, actions).await;
        }
    });
}

/// Callers hold the device lock, so effects are applied in the order the
/// device state changed. Publishing never waits on the event loop.
async fn execute_actions(app_state: &AppState, actions: Vec<RelayAction>) {
    for action in actions {
        match action {
            RelayAction::Publish {
                topic,
                payload,
                retain,
            } => {
                let Some(mqtt) = &app_state.mqtt else {
                    continue;
                };
                if let Err(err) =
                    mqtt.try_publish(topic.as_str(), QoS::AtMostOnce, retain, payload)
                {
                    warn!("publish to {topic} failed: {err}");
                }
            }
            RelayAction::StartBreathing { interval_ms } => {
                start_breathing(app_state, interval_ms).await;
            }
            RelayAction::StopBreathing => {
                if let Some(task) = app_state.breathing.lock().await.take() {
                    task.abort();
                }
            }
            output => apply_output(&output),
        }
    }
}

/// No hardware on the host: pin writes are only logged.
fn apply_output(action: &RelayAction) {
    match action {
        RelayAction::SetRelay { channel, pin, on } => {
            info!("relay {} (gpio {pin}) -> {}", channel + 1, if *on { "ON" } else { "OFF" });
        }
        RelayAction::SetLed { channel, pin, duty } => {
            debug!("led {} (gpio {pin}) duty {duty}", channel + 1);
        }
        _ => {}
    }
}

async fn start_breathing(app_state: &AppState, interval_ms: u32) {
    let mut slot = app_state.breathing.lock().await;
    if let Some(previous) = slot.take() {
        previous.abort();
    }

    let device = app_state.device.clone();
    *slot = Some(tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_millis(u64::from(interval_ms)));
        loop {
            interval.tick().await;
            let mut device = device.lock().await;
            device.on_breathe_tick().iter().for_each(apply_output);
        }
    }));
}

async fn handle_relay_do(
    State(state): State<AppState>,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let mut device = state.device.lock().await;
    let (reply, actions) = device.http_set_relay(&params);
    execute_actions(&state, actions).await;
    Json(reply)
}

async fn handle_rf_do(
    State(state): State<AppState>,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let reply = {
        let mut device = state.device.lock().await;
        device.http_clear_radio_codes(&params)
    };
    Json(reply)
}

async fn handle_relay_setting(
    State(state): State<AppState>,
    Form(params): Form<HashMap<String, String>>,
) -> impl IntoResponse {
    let mut device = state.device.lock().await;
    let clock = wall_clock(&device.config().timezone);
    let (reply, actions) = device.http_update_settings(&params, &clock);
    execute_actions(&state, actions).await;
    Json(reply)
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.device.lock().await.status();
    Json(status)
}

/// The host clock is always synced; only an unknown timezone leaves it invalid.
fn wall_clock(timezone: &str) -> WallClock {
    match timezone.parse::<Tz>() {
        Ok(tz) => WallClock::from_time(&Utc::now().with_timezone(&tz)),
        Err(_) => WallClock::invalid(),
    }
}
