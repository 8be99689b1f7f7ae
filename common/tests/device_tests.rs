use std::collections::HashMap;

use pretty_assertions::assert_eq;
use relay_common::{
    ConfigStore, LedType, MemoryStorage, PinMap, PowerOnState, RelayAction, RelayDevice,
    Storage, WallClock, IMAGE_CAPACITY,
};

fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn boot(storage: MemoryStorage) -> (RelayDevice<MemoryStorage>, Vec<RelayAction>) {
    RelayDevice::boot(storage, &PinMap::ch3(), "C0FFEE", &WallClock::invalid()).unwrap()
}

fn reboot(device: &RelayDevice<MemoryStorage>) -> RelayDevice<MemoryStorage> {
    boot(device.store().storage().clone()).0
}

#[test]
fn first_boot_writes_factory_image() {
    let (device, actions) = boot(MemoryStorage::new(IMAGE_CAPACITY));

    assert_eq!(device.store().storage().commit_count(), 1);
    assert_eq!(device.relay().states(), &[false, false, false]);
    assert_eq!(
        actions
            .iter()
            .filter(|a| matches!(a, RelayAction::SetRelay { on: false, .. }))
            .count(),
        3
    );

    let mut store = ConfigStore::new(device.store().storage().clone());
    assert!(store.read_config(false).is_ok());
    assert_eq!(store.record(), device.config());
}

#[test]
fn restore_policy_survives_reboot_through_sweep() {
    let (mut device, _) = boot(MemoryStorage::new(IMAGE_CAPACITY));
    let (reply, _) = device.http_update_settings(
        &params(&[("power_on_state", "3")]),
        &WallClock::invalid(),
    );
    assert!(reply.is_ok());

    device.handle_message("cmnd/sonoff_C0FFEE/POWER1", "ON");
    device.handle_message("cmnd/sonoff_C0FFEE/POWER3", "TOGGLE");

    // Not yet flushed: a reboot now would lose the change.
    assert_eq!(reboot(&device).relay().states(), &[false, false, false]);

    for _ in 0..60 {
        device.on_second(&WallClock::invalid());
    }
    assert_eq!(reboot(&device).relay().states(), &[true, false, true]);
}

#[test]
fn invert_policy_flips_last_state() {
    let (mut device, _) = boot(MemoryStorage::new(IMAGE_CAPACITY));
    device.http_update_settings(&params(&[("power_on_state", "2")]), &WallClock::invalid());
    device.button_pressed(1).unwrap();
    device.http_clear_radio_codes(&params(&[("c", "0")]));

    assert_eq!(reboot(&device).relay().states(), &[true, false, true]);
}

#[test]
fn corrupted_image_is_replaced_with_defaults() {
    let (mut device, _) = boot(MemoryStorage::new(IMAGE_CAPACITY));
    device.http_update_settings(&params(&[("led_light", "80")]), &WallClock::invalid());

    let mut storage = device.store().storage().clone();
    storage.bytes_mut()[10] ^= 0xFF;
    let commits = storage.commit_count();
    let (reloaded, _) = boot(storage);

    assert_eq!(reloaded.config().module.led_light, 50);
    assert_eq!(reloaded.store().storage().commit_count(), commits + 1);
}

#[test]
fn invalid_settings_are_ignored_but_valid_ones_apply() {
    let (mut device, _) = boot(MemoryStorage::new(IMAGE_CAPACITY));
    let (reply, _) = device.http_update_settings(
        &params(&[
            ("power_on_state", "7"),
            ("led_type", "2"),
            ("led_light", "250"),
            ("led_start", "2200"),
            ("led_end", "0600"),
        ]),
        &WallClock::invalid(),
    );

    assert!(reply.is_ok());
    let module = &device.config().module;
    assert_eq!(module.power_on_state, PowerOnState::AlwaysOff);
    assert_eq!(module.led_type, LedType::Breathing);
    assert_eq!(module.led_light, 50);
    assert_eq!((module.led_start, module.led_end), (2200, 600));
}

#[test]
fn breathing_window_closes_on_minute_sweep() {
    let (mut device, _) = boot(MemoryStorage::new(IMAGE_CAPACITY));
    let (_, actions) = device.http_update_settings(
        &params(&[("led_type", "2"), ("led_start", "2200"), ("led_end", "0600")]),
        &WallClock::at(23, 15),
    );
    assert!(actions.contains(&RelayAction::StartBreathing { interval_ms: 3 }));
    assert!(!device.on_breathe_tick().is_empty());

    let mut closing = Vec::new();
    for _ in 0..60 {
        closing.extend(device.on_second(&WallClock::at(6, 0)));
    }

    assert!(closing.contains(&RelayAction::StopBreathing));
    assert!(device.on_breathe_tick().is_empty());
    assert_eq!(device.status()["indicator_open"], false);
}

#[test]
fn clear_radio_codes_validates_selector() {
    let (mut device, _) = boot(MemoryStorage::new(IMAGE_CAPACITY));
    device.learn_radio_code(0, 3).unwrap();
    device.learn_radio_code(2, 5).unwrap();

    assert_eq!(device.http_clear_radio_codes(&params(&[("c", "9")])).code, 0);
    assert_eq!(device.http_clear_radio_codes(&params(&[])).code, 0);

    assert!(device.http_clear_radio_codes(&params(&[("c", "1")])).is_ok());
    assert_eq!(device.config().module.study_index, [0, 0, 5, 0]);

    let reloaded = reboot(&device);
    assert_eq!(reloaded.config().module.study_index, [0, 0, 5, 0]);
}

#[test]
fn storage_failure_keeps_device_running() {
    struct ReadOnly(MemoryStorage);

    impl Storage for ReadOnly {
        fn capacity(&self) -> usize {
            self.0.capacity()
        }

        fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), relay_common::StorageError> {
            self.0.read(offset, buf)
        }

        fn write(&mut self, _: usize, _: &[u8]) -> Result<(), relay_common::StorageError> {
            Err(relay_common::StorageError::Backend("write protected".to_string()))
        }

        fn commit(&mut self) -> Result<(), relay_common::StorageError> {
            Ok(())
        }
    }

    let (mut device, _) = RelayDevice::boot(
        ReadOnly(MemoryStorage::new(IMAGE_CAPACITY)),
        &PinMap::ch3(),
        "C0FFEE",
        &WallClock::invalid(),
    )
    .unwrap();

    let (reply, _) = device.http_set_relay(&params(&[("c", "1"), ("do", "ON")]));
    assert!(reply.is_ok());

    let (reply, _) =
        device.http_update_settings(&params(&[("led_light", "10")]), &WallClock::invalid());
    assert_eq!(reply.code, 0);
    assert_eq!(device.config().module.led_light, 10);
}
