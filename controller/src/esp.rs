use core::convert::TryInto;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Duration,
};

use anyhow::{anyhow, Context};
use chrono::Utc;
use chrono_tz::Tz;
use embedded_svc::{
    http::{Headers, Method},
    io::{Read, Write},
    mqtt::client::{Details, EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::gpio::{Output, PinDriver, Pull};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{
        gpio::{AnyIOPin, AnyOutputPin},
        modem::Modem,
        prelude::Peripherals,
    },
    http::server::{Configuration as HttpConfiguration, EspHttpConnection, EspHttpServer, Request},
    log::EspLogger,
    mqtt::client::{EspMqttClient, EspMqttConnection, LwtConfiguration, MqttClientConfiguration},
    nvs::{EspDefaultNvsPartition, EspNvs, NvsDefault},
    sntp::EspSntp,
    timer::{EspTaskTimerService, EspTimer},
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};
use serde::Serialize;

use relay_common::{
    config::NetworkConfig, merge_form_params, ApiReply, ChannelPins, PinMap, RelayAction,
    RelayDevice, Storage, StorageError, WallClock, IMAGE_CAPACITY,
};

const NVS_NAMESPACE: &str = "relay";
const NVS_IMAGE_KEY: &str = "config_img";
const MAX_HTTP_BODY: usize = 1024;
const MAX_MQTT_PAYLOAD_BYTES: usize = 512;
const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const BUTTON_POLL_MS: u64 = 20;
const LED_PWM_FREQ_HZ: u32 = 1_000;
/// System time before 2024-01-01 means SNTP has not synced yet.
const MIN_SYNCED_EPOCH: i64 = 1_704_067_200;

const INDEX_HTML: &str = include_str!("../web/index.html");

type Device = RelayDevice<NvsStorage>;
type HttpRequest<'a, 'b> = Request<&'a mut EspHttpConnection<'b>>;
type ApiHandler = fn(&SharedState, &HashMap<String, String>) -> ApiReply;

#[derive(Clone)]
struct SharedState {
    device: Arc<Mutex<Device>>,
    board: Arc<Mutex<Board>>,
    breathing: Arc<Mutex<EspTimer<'static>>>,
    mqtt: Arc<Mutex<Option<EspMqttClient<'static>>>>,
}

/// Config image mirrored in RAM and committed as a single NVS blob.
struct NvsStorage {
    nvs: EspNvs<NvsDefault>,
    bytes: Vec<u8>,
}

impl NvsStorage {
    fn open(partition: EspDefaultNvsPartition) -> anyhow::Result<Self> {
        let nvs = EspNvs::new(partition, NVS_NAMESPACE, true)?;
        let mut bytes = vec![0xFF_u8; IMAGE_CAPACITY];
        let len = nvs
            .get_raw(NVS_IMAGE_KEY, &mut bytes)?
            .map(<[u8]>::len)
            .unwrap_or(0);
        bytes[len..].fill(0xFF);
        Ok(Self { nvs, bytes })
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

impl Storage for NvsStorage {
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
        self.nvs
            .set_raw(NVS_IMAGE_KEY, &self.bytes)
            .map(|_| ())
            .map_err(|err| StorageError::Backend(err.to_string()))
    }
}

/// Relay outputs and LEDC-driven indicators, indexed by channel.
struct Board {
    relays: Vec<Option<PinDriver<'static, AnyOutputPin, Output>>>,
    leds: Vec<Option<u32>>,
}

impl Board {
    fn new(channels: &[ChannelPins]) -> Self {
        let relays = channels
            .iter()
            .map(|pins| {
                let driver = unsafe { PinDriver::output(AnyOutputPin::new(i32::from(pins.relay))) };
                driver
                    .map_err(|err| warn!("relay output unavailable on GPIO{}: {err}", pins.relay))
                    .ok()
            })
            .collect();

        let leds = if init_led_timer() {
            channels
                .iter()
                .enumerate()
                .map(|(channel, pins)| init_led_channel(channel, pins.led?))
                .collect()
        } else {
            vec![None; channels.len()]
        };

        Self { relays, leds }
    }

    fn apply(&mut self, action: &RelayAction) {
        match *action {
            RelayAction::SetRelay { channel, pin, on } => {
                let Some(Some(driver)) = self.relays.get_mut(channel) else {
                    return;
                };
                let result = if on {
                    driver.set_high()
                } else {
                    driver.set_low()
                };
                if let Err(err) = result {
                    warn!("failed to drive relay GPIO{pin}: {err}");
                }
            }
            RelayAction::SetLed { channel, duty, .. } => {
                if let Some(Some(ledc_channel)) = self.leds.get(channel) {
                    set_led_duty(*ledc_channel, u32::from(duty));
                }
            }
            _ => {}
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let storage = NvsStorage::open(nvs_partition.clone()).context("failed to open NVS")?;

    let pins = board_pin_map();
    let uid = device_uid();
    let (device, boot_actions) = RelayDevice::boot(storage, &pins, uid, &WallClock::invalid())
        .context("failed to start relay device")?;
    let network = effective_network(&device.config().network);
    info!(
        "config loaded: ssid=`{}`, mqtt=`{}:{}`, host=`{}`",
        network.wifi_ssid,
        device.config().mqtt.server,
        device.config().mqtt.port,
        device.topics().hostname(),
    );

    let channels = pins.channels();
    let device = Arc::new(Mutex::new(device));
    let board = Arc::new(Mutex::new(Board::new(&channels)));
    let breathing = create_breathing_timer(&EspTaskTimerService::new()?, &device, &board)?;
    let shared_state = SharedState {
        device,
        board,
        breathing: Arc::new(Mutex::new(breathing)),
        mqtt: Arc::new(Mutex::new(None)),
    };
    // Relays follow the power-on policy before the network comes up.
    with_device(&shared_state, |_| ((), boot_actions));

    let Peripherals { modem, .. } = Peripherals::take()?;
    let wifi = match connect_wifi(modem, sys_loop, nvs_partition, &network) {
        Ok(wifi) => Some(wifi),
        Err(err) => {
            warn!("wifi unavailable, running offline: {err:#}");
            None
        }
    };

    let _sntp = EspSntp::new_default().context("failed to start SNTP")?;
    info!("SNTP initialized");

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;

    if wifi.is_some() {
        match create_mqtt_client(&shared_state) {
            Ok((client, conn)) => {
                *lock(&shared_state.mqtt) = Some(client);
                spawn_mqtt_receiver(shared_state.clone(), conn)?;
            }
            Err(err) => warn!("mqtt disabled: {err:#}"),
        }
    }

    spawn_tick_loop(shared_state.clone())?;
    spawn_button_poller(shared_state.clone(), &channels)?;

    let server = create_http_server(shared_state)?;

    // Keep services alive for the program lifetime.
    let _wifi = wifi;
    let _server = server;

    loop {
        thread::sleep(Duration::from_secs(60));
    }
}

fn board_pin_map() -> PinMap {
    match option_env!("RELAY_PIN_MAP").map(serde_json::from_str::<PinMap>) {
        Some(Ok(pins)) => pins,
        Some(Err(err)) => {
            warn!("invalid RELAY_PIN_MAP, using 3-channel template: {err}");
            PinMap::ch3()
        }
        None => PinMap::ch3(),
    }
}

/// Last three MAC bytes in hex.
fn device_uid() -> String {
    let mut mac = [0_u8; 6];
    let rc = unsafe { esp_idf_svc::sys::esp_efuse_mac_get_default(mac.as_mut_ptr()) };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("failed to read MAC address: esp_err_t={rc}");
    }
    format!("{:02X}{:02X}{:02X}", mac[3], mac[4], mac[5])
}

fn effective_network(stored: &NetworkConfig) -> NetworkConfig {
    let mut network = stored.clone();
    if network.wifi_ssid.is_empty() {
        if let Some(ssid) = option_env!("WIFI_SSID") {
            network.wifi_ssid = ssid.to_string();
        }
    }

    if network.wifi_pass.is_empty() {
        if let Some(pass) = option_env!("WIFI_PASS") {
            network.wifi_pass = pass.to_string();
        }
    }
    network
}

fn create_http_server(state: SharedState) -> anyhow::Result<EspHttpServer<'static>> {
    let conf = HttpConfiguration {
        stack_size: 10 * 1024,
        ..Default::default()
    };

    let mut server = EspHttpServer::new(&conf)?;

    server.fn_handler::<anyhow::Error, _>("/", Method::Get, move |req| {
        req.into_ok_response()?.write_all(INDEX_HTML.as_bytes())?;
        Ok(())
    })?;

    {
        let state = state.clone();
        server.fn_handler("/api/status", Method::Get, move |req| {
            let status = lock(&state.device).status();
            write_json(req, &status)
        })?;
    }

    add_api_route(&mut server, "/relay_do", &state, handle_relay_do)?;
    add_api_route(&mut server, "/rf_do", &state, handle_rf_do)?;
    add_api_route(&mut server, "/relay_setting", &state, handle_relay_setting)?;

    Ok(server)
}

/// Registers `handler` for GET (query string) and POST (form body).
fn add_api_route(
    server: &mut EspHttpServer<'static>,
    path: &str,
    state: &SharedState,
    handler: ApiHandler,
) -> anyhow::Result<()> {
    for method in [Method::Get, Method::Post] {
        let state = state.clone();
        server.fn_handler::<anyhow::Error, _>(path, method, move |mut req| {
            let params = request_params(&mut req)?;
            let reply = handler(&state, &params);
            write_json(req, &reply)
        })?;
    }
    Ok(())
}

fn handle_relay_do(state: &SharedState, params: &HashMap<String, String>) -> ApiReply {
    with_device(state, |device| device.http_set_relay(params))
}

fn handle_rf_do(state: &SharedState, params: &HashMap<String, String>) -> ApiReply {
    lock(&state.device).http_clear_radio_codes(params)
}

fn handle_relay_setting(state: &SharedState, params: &HashMap<String, String>) -> ApiReply {
    with_device(state, |device| {
        let clock = wall_clock(&device.config().timezone);
        device.http_update_settings(params, &clock)
    })
}

fn request_params(req: &mut HttpRequest<'_, '_>) -> anyhow::Result<HashMap<String, String>> {
    let mut params = HashMap::new();
    if let Some((_, query)) = req.uri().split_once('?') {
        merge_form_params(query, &mut params);
    }

    let len = req.content_len().unwrap_or(0) as usize;
    if len > MAX_HTTP_BODY {
        return Err(anyhow!("request body too large"));
    }
    if len > 0 {
        let mut body = vec![0_u8; len];
        req.read_exact(&mut body)?;
        merge_form_params(core::str::from_utf8(&body)?, &mut params);
    }
    Ok(params)
}

fn write_json<T: Serialize>(req: HttpRequest<'_, '_>, payload: &T) -> anyhow::Result<()> {
    let body = serde_json::to_vec(payload)?;
    req.into_response(
        200,
        Some("OK"),
        &[("Content-Type", "application/json; charset=utf-8")],
    )?
    .write_all(&body)?;
    Ok(())
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    if network.wifi_ssid.trim().is_empty() {
        return Err(anyhow!("wifi credentials missing"));
    }

    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

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

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                last_err = None;
                break;
            }
            Err(err) => {
                warn!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS} failed: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    match last_err {
        None => Ok(esp_wifi),
        Some(err) => {
            let _ = wifi.disconnect();
            let _ = wifi.stop();
            Err(anyhow!("all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed: {err:#}"))
        }
    }
}

fn create_mqtt_client(
    state: &SharedState,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let device = lock(&state.device);
    let config = device.config();
    if config.mqtt.server.trim().is_empty() {
        return Err(anyhow!("no mqtt server configured"));
    }

    let url = format!("mqtt://{}:{}", config.mqtt.server, config.mqtt.port);
    let (will_topic, will_payload) = device.last_will();
    let conf = MqttClientConfiguration {
        client_id: Some(device.topics().hostname()),
        username: (!config.mqtt.user.is_empty()).then_some(config.mqtt.user.as_str()),
        password: (!config.mqtt.pass.is_empty()).then_some(config.mqtt.pass.as_str()),
        lwt: Some(LwtConfiguration {
            topic: &will_topic,
            payload: will_payload.as_bytes(),
            qos: QoS::AtMostOnce,
            retain: true,
        }),
        ..Default::default()
    };

    Ok(EspMqttClient::new(url.as_str(), &conf)?)
}

fn spawn_mqtt_receiver(state: SharedState, mut conn: EspMqttConnection) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("mqtt-rx".into())
        .stack_size(8 * 1024)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        info!("mqtt connected");
                        on_mqtt_connected(&state);
                    }
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        details,
                        ..
                    } => {
                        // We only process full MQTT payloads.
                        if !matches!(details, Details::Complete) {
                            continue;
                        }

                        if data.len() > MAX_MQTT_PAYLOAD_BYTES {
                            warn!(
                                "dropping oversized MQTT payload on topic {} ({} bytes)",
                                topic,
                                data.len()
                            );
                            continue;
                        }

                        if let Ok(message) = core::str::from_utf8(data) {
                            with_device(&state, |device| {
                                ((), device.handle_message(topic, message.trim()))
                            });
                        }
                    }
                    _ => {}
                },
                Err(err) => {
                    warn!("mqtt receive loop error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                }
            }
        })
        .context("failed to spawn mqtt receiver thread")?;
    Ok(())
}

fn on_mqtt_connected(state: &SharedState) {
    let subscriptions = lock(&state.device).subscriptions();
    if let Some(client) = lock(&state.mqtt).as_mut() {
        for filter in &subscriptions {
            if let Err(err) = client.subscribe(filter, QoS::AtMostOnce) {
                warn!("mqtt subscribe to {filter} failed: {err:?}");
            }
        }
    }
    with_device(state, |device| ((), device.on_connected()));
}

fn spawn_tick_loop(state: SharedState) -> anyhow::Result<()> {
    thread::Builder::new()
        .name("tick".into())
        .stack_size(8 * 1024)
        .spawn(move || {
            if let Err(err) = add_current_task_to_watchdog() {
                warn!("failed to register tick loop with watchdog: {err:#}");
            }

            loop {
                feed_watchdog();
                with_device(&state, |device| {
                    let clock = wall_clock(&device.config().timezone);
                    ((), device.on_second(&clock))
                });
                thread::sleep(Duration::from_secs(1));
            }
        })
        .context("failed to spawn tick thread")?;
    Ok(())
}

/// Active-low push buttons, one per channel; a falling edge toggles the relay.
fn spawn_button_poller(state: SharedState, channels: &[ChannelPins]) -> anyhow::Result<()> {
    let mut buttons = Vec::new();
    for (channel, pins) in channels.iter().enumerate() {
        let Some(gpio) = pins.button else {
            continue;
        };
        let mut driver = unsafe { PinDriver::input(AnyIOPin::new(i32::from(gpio))) }
            .with_context(|| format!("button input unavailable on GPIO{gpio}"))?;
        driver.set_pull(Pull::Up)?;
        buttons.push((channel, driver, true));
    }
    // TODO: decode 433 MHz frames on the radio-receive pin and feed
    // RelayDevice::radio_code_matched / learn_radio_code.

    if buttons.is_empty() {
        return Ok(());
    }

    thread::Builder::new()
        .name("buttons".into())
        .stack_size(4 * 1024)
        .spawn(move || loop {
            for (channel, driver, released) in buttons.iter_mut() {
                let high = driver.is_high();
                if *released && !high {
                    let channel = *channel;
                    with_device(&state, |device| match device.button_pressed(channel) {
                        Ok(actions) => ((), actions),
                        Err(err) => {
                            warn!("button {}: {err}", channel + 1);
                            ((), Vec::new())
                        }
                    });
                }
                *released = high;
            }
            thread::sleep(Duration::from_millis(BUTTON_POLL_MS));
        })
        .context("failed to spawn button thread")?;
    Ok(())
}

/// Runs `f` against the device and performs the returned actions before the
/// device lock is released, so hardware and broker see effects in state order.
fn with_device<R>(
    state: &SharedState,
    f: impl FnOnce(&mut Device) -> (R, Vec<RelayAction>),
) -> R {
    let mut device = lock(&state.device);
    let (result, actions) = f(&mut device);
    execute_actions(state, actions);
    drop(device);
    result
}

/// Lock order: device, then board / breathing / mqtt.
fn execute_actions(state: &SharedState, actions: Vec<RelayAction>) {
    for action in actions {
        match action {
            RelayAction::Publish {
                topic,
                payload,
                retain,
            } => publish(state, &topic, &payload, retain),
            RelayAction::StartBreathing { interval_ms } => {
                let timer = lock(&state.breathing);
                let period = Duration::from_millis(u64::from(interval_ms));
                if let Err(err) = timer.cancel().and_then(|_| timer.every(period)) {
                    warn!("failed to start breathing timer: {err}");
                }
            }
            RelayAction::StopBreathing => {
                if let Err(err) = lock(&state.breathing).cancel() {
                    warn!("failed to stop breathing timer: {err}");
                }
            }
            output => lock(&state.board).apply(&output),
        }
    }
}

fn publish(state: &SharedState, topic: &str, payload: &str, retain: bool) {
    let mut mqtt = lock(&state.mqtt);
    let Some(client) = mqtt.as_mut() else {
        debug!("mqtt offline, dropping publish to {topic}");
        return;
    };
    if let Err(err) = client.enqueue(topic, QoS::AtMostOnce, retain, payload.as_bytes()) {
        warn!("publish to {topic} failed: {err:?}");
    }
}

/// One timer for the device lifetime; breathing cancels and re-arms it.
fn create_breathing_timer(
    timers: &EspTaskTimerService,
    device: &Arc<Mutex<Device>>,
    board: &Arc<Mutex<Board>>,
) -> anyhow::Result<EspTimer<'static>> {
    let device = device.clone();
    let board = board.clone();
    let timer = timers.timer(move || {
        let mut device = lock(&device);
        let actions = device.on_breathe_tick();
        let mut board = lock(&board);
        for action in &actions {
            board.apply(action);
        }
    })?;
    Ok(timer)
}

fn init_led_timer() -> bool {
    let config = esp_idf_svc::sys::ledc_timer_config_t {
        speed_mode: esp_idf_svc::sys::ledc_mode_t_LEDC_LOW_SPEED_MODE,
        duty_resolution: esp_idf_svc::sys::ledc_timer_bit_t_LEDC_TIMER_10_BIT,
        timer_num: esp_idf_svc::sys::ledc_timer_t_LEDC_TIMER_0,
        freq_hz: LED_PWM_FREQ_HZ,
        ..Default::default()
    };
    let rc = unsafe { esp_idf_svc::sys::ledc_timer_config(&config) };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("LEDC timer setup failed: esp_err_t={rc}");
        return false;
    }
    true
}

fn init_led_channel(channel: usize, gpio: u8) -> Option<u32> {
    let ledc_channel = esp_idf_svc::sys::ledc_channel_t_LEDC_CHANNEL_0 + channel as u32;
    let config = esp_idf_svc::sys::ledc_channel_config_t {
        gpio_num: i32::from(gpio),
        speed_mode: esp_idf_svc::sys::ledc_mode_t_LEDC_LOW_SPEED_MODE,
        channel: ledc_channel,
        timer_sel: esp_idf_svc::sys::ledc_timer_t_LEDC_TIMER_0,
        duty: 0,
        ..Default::default()
    };
    let rc = unsafe { esp_idf_svc::sys::ledc_channel_config(&config) };
    if rc != esp_idf_svc::sys::ESP_OK {
        warn!("LEDC channel setup failed on GPIO{gpio}: esp_err_t={rc}");
        return None;
    }
    Some(ledc_channel)
}

fn set_led_duty(ledc_channel: u32, duty: u32) {
    let mode = esp_idf_svc::sys::ledc_mode_t_LEDC_LOW_SPEED_MODE;
    let rc = unsafe {
        match esp_idf_svc::sys::ledc_set_duty(mode, ledc_channel, duty) {
            esp_idf_svc::sys::ESP_OK => esp_idf_svc::sys::ledc_update_duty(mode, ledc_channel),
            err => err,
        }
    };
    if rc != esp_idf_svc::sys::ESP_OK {
        debug!("LEDC duty update failed on channel {ledc_channel}: esp_err_t={rc}");
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

/// Invalid until SNTP has set the system clock.
fn wall_clock(timezone: &str) -> WallClock {
    let now = Utc::now();
    if now.timestamp() < MIN_SYNCED_EPOCH {
        return WallClock::invalid();
    }
    match timezone.parse::<Tz>() {
        Ok(tz) => WallClock::from_time(&now.with_timezone(&tz)),
        Err(_) => WallClock::invalid(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
