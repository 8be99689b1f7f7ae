use std::collections::HashMap;

use log::{info, warn};
use serde_json::{json, Map, Value};

use crate::{
    config::ConfigRecord,
    error::RelayError,
    pins::PinMap,
    relay::{resolve_command, RelayAction, RelayController, SettingsUpdate},
    storage::Storage,
    store::{ConfigStore, LoadOutcome, SWEEP_INTERVAL_TICKS},
    topics::{device_hostname, TopicScheme, PAYLOAD_OFFLINE, PAYLOAD_ONLINE},
    types::ApiReply,
    window::WallClock,
};

const MSG_OK: &str = "ok";
const MSG_SETTINGS_SAVED: &str = "settings saved";
const MSG_BAD_PARAMETER: &str = "invalid parameter";
const MSG_BAD_CHANNEL: &str = "invalid relay channel";
const MSG_SAVE_FAILED: &str = "failed to save config";

/// The relay firmware state: persisted config plus live channel state.
///
/// All inputs (ticks, messages, HTTP requests, buttons) go through this
/// single owner, which returns the hardware/network effects to perform.
pub struct RelayDevice<S> {
    store: ConfigStore<S>,
    relay: RelayController,
    uid: String,
    ticks: u32,
}

impl<S: Storage> RelayDevice<S> {
    /// Loads (or repairs) the config image and applies the power-on policy.
    pub fn boot(
        storage: S,
        pins: &PinMap,
        uid: impl Into<String>,
        clock: &WallClock,
    ) -> Result<(Self, Vec<RelayAction>), RelayError> {
        let uid = uid.into();
        let mut store = ConfigStore::new(storage);
        match store.read_config(true) {
            Ok(LoadOutcome::Restored { .. }) => {}
            Ok(LoadOutcome::Reset) => warn!("config image invalid, factory defaults written"),
            Err(err) => warn!("config reset could not be persisted: {err}"),
        }

        let record = store.record();
        let topics = TopicScheme::new(
            &record.mqtt.topic,
            device_hostname(record.module_type, &uid),
        );
        let mut relay = RelayController::new(pins.channels(), topics)?;
        let actions = relay.power_on(store.record_mut(), clock);
        info!(
            "device {} up with {} channel(s)",
            relay.topics().hostname(),
            relay.channel_count()
        );

        Ok((
            Self {
                store,
                relay,
                uid,
                ticks: 0,
            },
            actions,
        ))
    }

    pub fn config(&self) -> &ConfigRecord {
        self.store.record()
    }

    pub fn store(&self) -> &ConfigStore<S> {
        &self.store
    }

    pub fn relay(&self) -> &RelayController {
        &self.relay
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn topics(&self) -> &TopicScheme {
        self.relay.topics()
    }

    /// Filters to subscribe to after every (re)connect.
    pub fn subscriptions(&self) -> Vec<String> {
        vec![self.topics().command_filter()]
    }

    /// Last-will message: `(topic, payload)`.
    pub fn last_will(&self) -> (String, String) {
        (self.topics().availability(), PAYLOAD_OFFLINE.to_string())
    }

    /// One-second tick. Every minute the config is checked for drift and the
    /// indicator window re-evaluated.
    pub fn on_second(&mut self, clock: &WallClock) -> Vec<RelayAction> {
        self.ticks = self.ticks.wrapping_add(1);
        if self.ticks % SWEEP_INTERVAL_TICKS != 0 {
            return Vec::new();
        }

        if let Err(err) = self.store.check_drift() {
            warn!("config sweep failed: {err}");
        }
        self.relay
            .evaluate_gate(&self.store.record().module, clock, false)
    }

    /// Forced indicator re-render, e.g. once the wall clock becomes known.
    pub fn refresh_indicators(&mut self, clock: &WallClock) -> Vec<RelayAction> {
        self.relay
            .evaluate_gate(&self.store.record().module, clock, true)
    }

    pub fn on_breathe_tick(&mut self) -> Vec<RelayAction> {
        self.relay.breathe_tick(&self.store.record().module)
    }

    pub fn handle_message(&mut self, topic: &str, payload: &str) -> Vec<RelayAction> {
        self.relay
            .handle_command(self.store.record_mut(), topic, payload)
    }

    /// Availability, discovery (or its removal) and a state report.
    pub fn on_connected(&self) -> Vec<RelayAction> {
        let config = self.store.record();
        let mut actions = vec![RelayAction::Publish {
            topic: self.topics().availability(),
            payload: PAYLOAD_ONLINE.to_string(),
            retain: true,
        }];
        actions.extend(
            self.relay
                .discovery(config, &self.uid, config.mqtt.discovery),
        );
        actions.extend(self.relay.report(config));
        actions
    }

    pub fn button_pressed(&mut self, channel: usize) -> Result<Vec<RelayAction>, RelayError> {
        info!("button {} pressed", channel + 1);
        self.relay.toggle(self.store.record_mut(), channel)
    }

    pub fn radio_code_matched(&mut self, channel: usize) -> Result<Vec<RelayAction>, RelayError> {
        info!("radio code for relay {} received", channel + 1);
        self.relay.toggle(self.store.record_mut(), channel)
    }

    pub fn learn_radio_code(&mut self, channel: usize, index: u8) -> Result<(), RelayError> {
        self.relay
            .learn_radio_code(&mut self.store.record_mut().module, channel, index)?;
        self.save();
        Ok(())
    }

    /// `/relay_do?c=<1-4>&do=<ON|OFF|other>`
    pub fn http_set_relay(&mut self, params: &HashMap<String, String>) -> (ApiReply, Vec<RelayAction>) {
        let Some(channel) = params.get("c").and_then(|c| channel_param(c)) else {
            return (ApiReply::error(MSG_BAD_PARAMETER), Vec::new());
        };
        let Some(current) = self.relay.is_on(channel) else {
            return (ApiReply::error(MSG_BAD_CHANNEL), Vec::new());
        };

        let command = params.get("do").map(String::as_str).unwrap_or_default();
        let on = resolve_command(command, current);
        match self
            .relay
            .switch_relay(self.store.record_mut(), channel, on, true)
        {
            Ok(actions) => (ApiReply::ok_with(MSG_OK, self.relay.status_data()), actions),
            Err(err) => (ApiReply::error(err.to_string()), Vec::new()),
        }
    }

    /// `/rf_do?c=<0-4>`, `0` clears every channel.
    pub fn http_clear_radio_codes(&mut self, params: &HashMap<String, String>) -> ApiReply {
        let selector = match params.get("c").map(String::as_str) {
            Some("0") => None,
            Some(c) => match channel_param(c) {
                Some(channel) => Some(channel),
                None => return ApiReply::error(MSG_BAD_PARAMETER),
            },
            None => return ApiReply::error(MSG_BAD_PARAMETER),
        };

        if let Err(err) = self
            .relay
            .clear_learned_codes(&mut self.store.record_mut().module, selector)
        {
            return ApiReply::error(err.to_string());
        }
        if !self.save() {
            return ApiReply::error(MSG_SAVE_FAILED);
        }
        ApiReply::ok(MSG_OK)
    }

    /// `/relay_setting`: applies every valid parameter, ignores the rest,
    /// re-renders the indicators and saves.
    pub fn http_update_settings(
        &mut self,
        params: &HashMap<String, String>,
        clock: &WallClock,
    ) -> (ApiReply, Vec<RelayAction>) {
        let (update, rejected) = SettingsUpdate::from_params(params);
        for err in &rejected {
            warn!("setting ignored: {err}");
        }

        let actions = self
            .relay
            .apply_settings(self.store.record_mut(), &update, clock);
        let reply = if self.save() {
            ApiReply::ok(MSG_SETTINGS_SAVED)
        } else {
            ApiReply::error(MSG_SAVE_FAILED)
        };
        (reply, actions)
    }

    /// Channel states plus whether indicators may currently light.
    pub fn status(&self) -> Map<String, Value> {
        let mut status = self.relay.status_data();
        status.insert("indicator_open".to_string(), json!(self.relay.indicator_open()));
        status.insert("breathing".to_string(), json!(self.relay.is_breathing()));
        status
    }

    fn save(&mut self) -> bool {
        match self.store.save_config() {
            Ok(()) => true,
            Err(err) => {
                warn!("config save failed: {err}");
                false
            }
        }
    }
}

/// Merges an `application/x-www-form-urlencoded` string (query or body)
/// into `params`, decoding `+` and `%XX` escapes. Later keys win.
pub fn merge_form_params(raw: &str, params: &mut HashMap<String, String>) {
    match serde_urlencoded::from_str::<Vec<(String, String)>>(raw) {
        Ok(pairs) => params.extend(pairs),
        Err(err) => warn!("malformed form data ignored: {err}"),
    }
}

/// `"1"`..`"4"` to a zero-based channel index.
fn channel_param(raw: &str) -> Option<usize> {
    match raw.trim() {
        "1" => Some(0),
        "2" => Some(1),
        "3" => Some(2),
        "4" => Some(3),
        _ => None,
    }
}
