use std::collections::HashMap;

use log::{debug, info, warn};
use serde_json::{json, Map, Value};

use crate::{
    config::{ConfigRecord, RelaySettings, MAX_CHANNELS},
    error::{RelayError, SettingsError},
    led::{duty_ceiling, LedAnimator, IDLE_DUTY},
    pins::ChannelPins,
    topics::{
        discovery_topic, power_key, TopicScheme, KEY_POWER, PAYLOAD_OFF, PAYLOAD_OFFLINE,
        PAYLOAD_ON, PAYLOAD_ONLINE,
    },
    types::{LedType, PowerOnState},
    window::{is_valid_hhmm, TimeWindow, WallClock, WindowGate},
};

const FALLBACK_LED_LIGHT: u8 = 100;
const FALLBACK_LED_TIME_MS: u32 = 2;

/// Side effects requested by the controller, executed by the firmware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayAction {
    SetRelay { channel: usize, pin: u8, on: bool },
    SetLed { channel: usize, pin: u8, duty: u16 },
    Publish { topic: String, payload: String, retain: bool },
    StartBreathing { interval_ms: u32 },
    StopBreathing,
}

/// `ON` and `OFF` select a state, anything else toggles.
pub fn resolve_command(payload: &str, current: bool) -> bool {
    match payload {
        PAYLOAD_ON => true,
        PAYLOAD_OFF => false,
        _ => !current,
    }
}

/// Maps a `.../POWER[n]` command topic to a channel index.
pub fn parse_power_command(topic: &str, channel_count: usize) -> Option<usize> {
    let key = topic.rsplit('/').next()?;
    let suffix = key.strip_prefix(KEY_POWER)?;
    let channel = match suffix.as_bytes() {
        [] => 0,
        [digit @ b'1'..=b'4'] => usize::from(digit - b'1'),
        _ => return None,
    };
    (channel < channel_count).then_some(channel)
}

/// Parsed `/relay_setting` parameters. Absent fields leave settings unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsUpdate {
    pub power_on_state: Option<PowerOnState>,
    pub led_type: Option<LedType>,
    pub led_window: Option<(u16, u16)>,
    pub led_light: Option<u8>,
    pub led_time_ms: Option<u32>,
}

impl SettingsUpdate {
    /// Collects every valid parameter; rejected ones are returned alongside.
    pub fn from_params(params: &HashMap<String, String>) -> (Self, Vec<SettingsError>) {
        let mut update = Self::default();
        let mut rejected = Vec::new();

        let field = |name| param(params, name);

        if let Some((name, raw)) = field("power_on_state") {
            match raw.parse().ok().and_then(PowerOnState::from_code) {
                Some(state) => update.power_on_state = Some(state),
                None => rejected.push(invalid(name, raw)),
            }
        }

        if let Some((name, raw)) = field("led_type") {
            match raw.parse().ok().and_then(LedType::from_code) {
                Some(kind) => update.led_type = Some(kind),
                None => rejected.push(invalid(name, raw)),
            }
        }

        match (field("led_start"), field("led_end")) {
            (Some((start_name, start)), Some((end_name, end))) => {
                let parsed = |raw: &str| raw.parse::<u16>().ok().filter(|&v| is_valid_hhmm(v));
                match (parsed(start), parsed(end)) {
                    (Some(start), Some(end)) => update.led_window = Some((start, end)),
                    (None, _) => rejected.push(invalid(start_name, start)),
                    (_, None) => rejected.push(invalid(end_name, end)),
                }
            }
            (Some((present, _)), None) => rejected.push(SettingsError::Incomplete {
                present,
                missing: "led_end",
            }),
            (None, Some((present, _))) => rejected.push(SettingsError::Incomplete {
                present,
                missing: "led_start",
            }),
            (None, None) => {}
        }

        if let Some((name, raw)) = field("led_light") {
            match raw.parse::<u8>().ok().filter(|light| (1..=100).contains(light)) {
                Some(light) => update.led_light = Some(light),
                None => rejected.push(invalid(name, raw)),
            }
        }

        if let Some((name, raw)) = field("relay_led_time") {
            match raw.parse::<u32>().ok().filter(|&ms| ms > 0) {
                Some(ms) => update.led_time_ms = Some(ms),
                None => rejected.push(invalid(name, raw)),
            }
        }

        (update, rejected)
    }
}

fn param<'a>(
    params: &'a HashMap<String, String>,
    name: &'static str,
) -> Option<(&'static str, &'a str)> {
    params.get(name).map(|value| (name, value.trim()))
}

fn invalid(name: &'static str, value: &str) -> SettingsError {
    SettingsError::InvalidValue {
        name,
        value: value.to_string(),
    }
}

/// Relay channels, their indicators and the breathing animation.
///
/// Configuration is passed into every call; the controller only keeps the
/// live channel state.
#[derive(Debug, Clone)]
pub struct RelayController {
    channels: Vec<ChannelPins>,
    state: Vec<bool>,
    animator: LedAnimator,
    gate: WindowGate,
    topics: TopicScheme,
}

impl RelayController {
    pub fn new(channels: Vec<ChannelPins>, topics: TopicScheme) -> Result<Self, RelayError> {
        if channels.is_empty() {
            return Err(RelayError::NoChannels);
        }
        if channels.len() > MAX_CHANNELS {
            return Err(RelayError::TooManyChannels {
                requested: channels.len(),
                max: MAX_CHANNELS,
            });
        }

        let state = vec![false; channels.len()];
        Ok(Self {
            channels,
            state,
            animator: LedAnimator::default(),
            gate: WindowGate::default(),
            topics,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_on(&self, channel: usize) -> Option<bool> {
        self.state.get(channel).copied()
    }

    pub fn states(&self) -> &[bool] {
        &self.state
    }

    pub fn indicator_open(&self) -> bool {
        self.gate.is_open()
    }

    pub fn is_breathing(&self) -> bool {
        self.animator.is_active()
    }

    pub fn topics(&self) -> &TopicScheme {
        &self.topics
    }

    pub fn state_topic(&self, channel: usize) -> String {
        self.topics.stat(&power_key(channel, self.channels.len()))
    }

    pub fn command_topic(&self, channel: usize) -> String {
        self.topics.command(&power_key(channel, self.channels.len()))
    }

    /// Applies the power-on policy to every channel, then renders indicators.
    pub fn power_on(&mut self, config: &mut ConfigRecord, clock: &WallClock) -> Vec<RelayAction> {
        let settings = &mut config.module;
        if settings.led_light == 0 {
            settings.led_light = FALLBACK_LED_LIGHT;
        }
        if settings.led_time_ms == 0 {
            settings.led_time_ms = FALLBACK_LED_TIME_MS;
        }

        let policy = settings.power_on_state;
        let mut actions = Vec::new();
        for channel in 0..self.channels.len() {
            let on = policy.startup_state(config.module.last_state[channel]);
            self.apply_switch(config, channel, on, false, &mut actions);
        }
        info!(
            "{} relay channel(s) restored ({policy:?})",
            self.channels.len()
        );

        actions.extend(self.evaluate_gate(&config.module, clock, true));
        actions
    }

    pub fn switch_relay(
        &mut self,
        config: &mut ConfigRecord,
        channel: usize,
        on: bool,
        persist: bool,
    ) -> Result<Vec<RelayAction>, RelayError> {
        self.check_channel(channel)?;
        let mut actions = Vec::new();
        self.apply_switch(config, channel, on, persist, &mut actions);
        Ok(actions)
    }

    pub fn toggle(
        &mut self,
        config: &mut ConfigRecord,
        channel: usize,
    ) -> Result<Vec<RelayAction>, RelayError> {
        self.check_channel(channel)?;
        let on = !self.state[channel];
        self.switch_relay(config, channel, on, true)
    }

    /// Handles an inbound command message. Unknown topics yield no actions.
    pub fn handle_command(
        &mut self,
        config: &mut ConfigRecord,
        topic: &str,
        payload: &str,
    ) -> Vec<RelayAction> {
        let Some(channel) = parse_power_command(topic, self.channels.len()) else {
            debug!("ignoring message on {topic}");
            return Vec::new();
        };

        let on = resolve_command(payload, self.state[channel]);
        let mut actions = Vec::new();
        self.apply_switch(config, channel, on, true, &mut actions);
        actions
    }

    /// One breathing step: OFF channels follow the level, ON channels stay dark.
    pub fn breathe_tick(&mut self, settings: &RelaySettings) -> Vec<RelayAction> {
        if !self.animator.is_active() {
            return Vec::new();
        }

        let level = self.animator.advance(duty_ceiling(settings.led_light));
        self.channels
            .iter()
            .zip(&self.state)
            .enumerate()
            .filter_map(|(channel, (pins, &on))| {
                Some(RelayAction::SetLed {
                    channel,
                    pin: pins.led?,
                    duty: if on { IDLE_DUTY } else { level },
                })
            })
            .collect()
    }

    /// Re-renders every indicator when the window result changes, or always
    /// when `force` is set.
    pub fn evaluate_gate(
        &mut self,
        settings: &RelaySettings,
        clock: &WallClock,
        force: bool,
    ) -> Vec<RelayAction> {
        let window = TimeWindow::new(settings.led_start, settings.led_end);
        let Some(open) = self.gate.evaluate(window, clock, force) else {
            return Vec::new();
        };

        let mut actions = Vec::new();
        if (!open || settings.led_type != LedType::Breathing) && self.animator.stop() {
            info!("breathing stopped");
            actions.push(RelayAction::StopBreathing);
        }

        for channel in 0..self.channels.len() {
            let Some(pin) = self.channels[channel].led else {
                continue;
            };
            if open && settings.led_type != LedType::Disabled {
                self.render_led(settings, channel, &mut actions);
            } else {
                actions.push(RelayAction::SetLed {
                    channel,
                    pin,
                    duty: IDLE_DUTY,
                });
            }
        }
        actions
    }

    /// Applies a settings update and re-renders the indicators.
    pub fn apply_settings(
        &mut self,
        config: &mut ConfigRecord,
        update: &SettingsUpdate,
        clock: &WallClock,
    ) -> Vec<RelayAction> {
        let settings = &mut config.module;
        let mut actions = Vec::new();

        if let Some(state) = update.power_on_state {
            settings.power_on_state = state;
        }
        if let Some(kind) = update.led_type {
            settings.led_type = kind;
        }
        if let Some((start, end)) = update.led_window {
            settings.led_start = start;
            settings.led_end = end;
        }
        if let Some(light) = update.led_light {
            settings.led_light = light;
        }
        if let Some(ms) = update.led_time_ms {
            settings.led_time_ms = ms;
            // Restarted by the re-render below with the new cadence.
            if self.animator.stop() {
                actions.push(RelayAction::StopBreathing);
            }
        }

        actions.extend(self.evaluate_gate(&config.module, clock, true));
        actions
    }

    /// Clears the learned radio code of one channel, or of every slot.
    pub fn clear_learned_codes(
        &self,
        settings: &mut RelaySettings,
        channel: Option<usize>,
    ) -> Result<(), RelayError> {
        match channel {
            Some(channel) => {
                self.check_channel(channel)?;
                settings.study_index[channel] = 0;
            }
            None => settings.study_index = [0; MAX_CHANNELS],
        }
        Ok(())
    }

    pub fn learn_radio_code(
        &self,
        settings: &mut RelaySettings,
        channel: usize,
        index: u8,
    ) -> Result<(), RelayError> {
        self.check_channel(channel)?;
        settings.study_index[channel] = index;
        info!("radio code {index} learned for relay {}", channel + 1);
        Ok(())
    }

    /// `{"relay_1": 0|1, ...}`
    pub fn status_data(&self) -> Map<String, Value> {
        self.state
            .iter()
            .enumerate()
            .map(|(channel, &on)| (format!("relay_{}", channel + 1), json!(u8::from(on))))
            .collect()
    }

    /// Announces every channel, or removes the announcements when `enable` is false.
    pub fn discovery(&self, config: &ConfigRecord, uid: &str, enable: bool) -> Vec<RelayAction> {
        let availability = self.topics.availability();
        (0..self.channels.len())
            .map(|channel| {
                let topic = discovery_topic(&config.mqtt.discovery_prefix, uid, channel);
                let payload = if enable {
                    json!({
                        "name": format!("{} {}", self.topics.hostname(), channel + 1),
                        "unique_id": format!("{uid}_{}", channel + 1),
                        "command_topic": self.command_topic(channel),
                        "state_topic": self.state_topic(channel),
                        "payload_on": PAYLOAD_ON,
                        "payload_off": PAYLOAD_OFF,
                        "availability_topic": availability,
                        "payload_available": PAYLOAD_ONLINE,
                        "payload_not_available": PAYLOAD_OFFLINE,
                    })
                    .to_string()
                } else {
                    String::new()
                };
                RelayAction::Publish {
                    topic,
                    payload,
                    retain: true,
                }
            })
            .collect()
    }

    /// Current state of every channel on its state topic.
    pub fn report(&self, config: &ConfigRecord) -> Vec<RelayAction> {
        self.state
            .iter()
            .enumerate()
            .map(|(channel, &on)| RelayAction::Publish {
                topic: self.state_topic(channel),
                payload: power_payload(on).to_string(),
                retain: config.mqtt.retain,
            })
            .collect()
    }

    fn check_channel(&self, channel: usize) -> Result<(), RelayError> {
        if channel < self.channels.len() {
            Ok(())
        } else {
            warn!("invalid channel {channel}");
            Err(RelayError::InvalidChannel {
                channel,
                available: self.channels.len(),
            })
        }
    }

    fn apply_switch(
        &mut self,
        config: &mut ConfigRecord,
        channel: usize,
        on: bool,
        persist: bool,
        actions: &mut Vec<RelayAction>,
    ) {
        info!("relay {} {}", channel + 1, power_payload(on));

        self.state[channel] = on;
        actions.push(RelayAction::SetRelay {
            channel,
            pin: self.channels[channel].relay,
            on,
        });
        actions.push(RelayAction::Publish {
            topic: self.state_topic(channel),
            payload: power_payload(on).to_string(),
            retain: config.mqtt.retain,
        });

        let settings = &mut config.module;
        if persist && settings.power_on_state.remembers_last_state() {
            settings.last_state[channel] = on;
        }

        if self.gate.is_open() {
            self.render_led(settings, channel, actions);
        }
    }

    fn render_led(
        &mut self,
        settings: &RelaySettings,
        channel: usize,
        actions: &mut Vec<RelayAction>,
    ) {
        let on = self.state[channel];
        // Channels without an indicator still count towards "all ON".
        if settings.led_type == LedType::Breathing
            && on
            && self.animator.is_active()
            && self.state.iter().all(|&on| on)
        {
            self.animator.stop();
            info!("breathing stopped");
            actions.push(RelayAction::StopBreathing);
        }

        let Some(pin) = self.channels[channel].led else {
            return;
        };
        match settings.led_type {
            LedType::Disabled => {}
            LedType::Static => actions.push(RelayAction::SetLed {
                channel,
                pin,
                duty: if on {
                    IDLE_DUTY
                } else {
                    duty_ceiling(settings.led_light)
                },
            }),
            LedType::Breathing if on => actions.push(RelayAction::SetLed {
                channel,
                pin,
                duty: IDLE_DUTY,
            }),
            LedType::Breathing => {
                if self.animator.start() {
                    info!("breathing started ({} ms)", settings.led_time_ms);
                    actions.push(RelayAction::StartBreathing {
                        interval_ms: settings.led_time_ms,
                    });
                }
            }
        }
    }
}

fn power_payload(on: bool) -> &'static str {
    if on {
        PAYLOAD_ON
    } else {
        PAYLOAD_OFF
    }
}
