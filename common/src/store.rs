//! CRC-protected configuration image.
//!
//! ```text
//! offset 0  magic     u16 big-endian
//! offset 2  length    u16 big-endian, clamped to MAX_PAYLOAD_SIZE on read
//! offset 4  crc16     u16 big-endian, over exactly `length` payload bytes
//! offset 6  payload   JSON-encoded ConfigRecord
//! ```

use log::{debug, info, warn};

use crate::{
    checksum::crc16,
    config::ConfigRecord,
    error::{ImageFault, StoreError},
    storage::Storage,
};

pub const CONFIG_MAGIC: u16 = 0x5AA5;
pub const HEADER_LEN: usize = 6;
pub const MAX_PAYLOAD_SIZE: usize = 2048;
pub const IMAGE_CAPACITY: usize = HEADER_LEN + MAX_PAYLOAD_SIZE;

/// Number of one-second ticks between integrity sweeps.
pub const SWEEP_INTERVAL_TICKS: u32 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A valid image was decoded.
    Restored { len: usize },
    /// The image was unusable; factory defaults were written in its place.
    Reset,
}

pub struct ConfigStore<S> {
    storage: S,
    record: ConfigRecord,
    saved_crc: u16,
}

impl<S: Storage> ConfigStore<S> {
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            record: ConfigRecord::default(),
            saved_crc: 0,
        }
    }

    pub fn record(&self) -> &ConfigRecord {
        &self.record
    }

    pub fn record_mut(&mut self) -> &mut ConfigRecord {
        &mut self.record
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Checksum of the last image this store wrote or loaded.
    pub fn saved_crc(&self) -> u16 {
        self.saved_crc
    }

    pub fn reset_config(&mut self) {
        self.record = ConfigRecord::factory();
        info!("config reset to factory defaults");
    }

    pub fn read_config(&mut self, reset_on_error: bool) -> Result<LoadOutcome, StoreError> {
        match self.load_image() {
            Ok((record, len)) => {
                self.record = record;
                self.record.apply_fixups();
                info!("config loaded ({len} bytes)");
                Ok(LoadOutcome::Restored { len })
            }
            Err(err) => {
                warn!("config image rejected: {err}");
                self.record = ConfigRecord::minimal();
                if !reset_on_error {
                    return Err(err);
                }
                self.reset_config();
                self.save_config()?;
                Ok(LoadOutcome::Reset)
            }
        }
    }

    /// Writes the current record. The previous image is left untouched when
    /// encoding fails.
    pub fn save_config(&mut self) -> Result<(), StoreError> {
        let payload = self.encode()?;
        let crc = crc16(&payload);
        // encode() bounds the payload well below u16::MAX.
        let len = payload.len() as u16;

        let mut header = [0u8; HEADER_LEN];
        header[0..2].copy_from_slice(&CONFIG_MAGIC.to_be_bytes());
        header[2..4].copy_from_slice(&len.to_be_bytes());
        header[4..6].copy_from_slice(&crc.to_be_bytes());

        self.storage.write(0, &header)?;
        self.storage.write(HEADER_LEN, &payload)?;
        self.storage.commit()?;

        self.saved_crc = crc;
        info!("config saved ({len} bytes, crc {crc:#06x})");
        Ok(())
    }

    /// Saves the record when it no longer matches the last saved image.
    /// Returns whether a save happened.
    pub fn check_drift(&mut self) -> Result<bool, StoreError> {
        let crc = crc16(&self.encode()?);
        if crc == self.saved_crc {
            debug!("config crc unchanged");
            return Ok(false);
        }

        info!("config drifted from saved image, saving");
        self.save_config()?;
        Ok(true)
    }

    fn payload_limit(&self) -> usize {
        MAX_PAYLOAD_SIZE.min(self.storage.capacity().saturating_sub(HEADER_LEN))
    }

    fn encode(&self) -> Result<Vec<u8>, StoreError> {
        let payload =
            serde_json::to_vec(&self.record).map_err(|err| StoreError::Encode(err.to_string()))?;
        let max = self.payload_limit();
        if payload.len() > max {
            return Err(StoreError::PayloadTooLarge {
                len: payload.len(),
                max,
            });
        }
        Ok(payload)
    }

    fn load_image(&mut self) -> Result<(ConfigRecord, usize), StoreError> {
        let mut header = [0u8; HEADER_LEN];
        self.storage.read(0, &mut header)?;

        let magic = u16::from_be_bytes([header[0], header[1]]);
        if magic != CONFIG_MAGIC {
            return Err(ImageFault::BadMagic { found: magic }.into());
        }

        let len = usize::from(u16::from_be_bytes([header[2], header[3]])).min(self.payload_limit());
        let stored = u16::from_be_bytes([header[4], header[5]]);
        self.saved_crc = stored;

        let mut payload = vec![0u8; len];
        self.storage.read(HEADER_LEN, &mut payload)?;

        let computed = crc16(&payload);
        if computed != stored {
            return Err(ImageFault::Checksum { stored, computed }.into());
        }

        let record = serde_json::from_slice(&payload)
            .map_err(|err| ImageFault::Decode(err.to_string()))?;
        Ok((record, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use pretty_assertions::assert_eq;

    fn saved_store() -> ConfigStore<MemoryStorage> {
        let mut store = ConfigStore::new(MemoryStorage::new(IMAGE_CAPACITY));
        store.reset_config();
        store.record_mut().network.wifi_ssid = "garage".to_string();
        store.save_config().unwrap();
        store
    }

    fn image_len(store: &ConfigStore<MemoryStorage>) -> usize {
        let bytes = store.storage().as_bytes();
        HEADER_LEN + usize::from(u16::from_be_bytes([bytes[2], bytes[3]]))
    }

    #[test]
    fn header_layout_is_big_endian() {
        let store = saved_store();
        let bytes = store.storage().as_bytes();
        let len = image_len(&store) - HEADER_LEN;

        assert_eq!(&bytes[0..2], &CONFIG_MAGIC.to_be_bytes());
        assert_eq!(
            u16::from_be_bytes([bytes[4], bytes[5]]),
            crc16(&bytes[HEADER_LEN..HEADER_LEN + len])
        );
        assert_eq!(store.saved_crc(), u16::from_be_bytes([bytes[4], bytes[5]]));
    }

    #[test]
    fn save_then_read_restores_record() {
        let store = saved_store();
        let expected = store.record().clone();

        let mut reloaded = ConfigStore::new(store.storage().clone());
        let outcome = reloaded.read_config(false).unwrap();

        assert!(matches!(outcome, LoadOutcome::Restored { .. }));
        assert_eq!(reloaded.record(), &expected);
        assert_eq!(reloaded.saved_crc(), store.saved_crc());
    }

    #[test]
    fn erased_storage_is_invalid() {
        let mut store = ConfigStore::new(MemoryStorage::new(IMAGE_CAPACITY));
        let err = store.read_config(false).unwrap_err();

        assert!(matches!(
            err,
            StoreError::Invalid(ImageFault::BadMagic { found: 0xFFFF })
        ));
        assert_eq!(store.record(), &ConfigRecord::minimal());
    }

    #[test]
    fn single_byte_corruption_is_detected() {
        let store = saved_store();
        let len = image_len(&store);
        // Length bytes are excluded: they only select how much is checksummed.
        let offsets = (0..2).chain(4..len);

        for offset in offsets {
            let mut storage = store.storage().clone();
            storage.bytes_mut()[offset] ^= 0x01;

            let mut reloaded = ConfigStore::new(storage);
            assert!(
                reloaded.read_config(false).is_err(),
                "corruption at offset {offset} went unnoticed"
            );
        }
    }

    #[test]
    fn reset_on_error_writes_fresh_defaults() {
        let mut store = ConfigStore::new(MemoryStorage::new(IMAGE_CAPACITY));
        let outcome = store.read_config(true).unwrap();

        assert_eq!(outcome, LoadOutcome::Reset);
        assert_eq!(store.record(), &ConfigRecord::factory());
        assert_eq!(store.storage().commit_count(), 1);

        let mut reloaded = ConfigStore::new(store.storage().clone());
        assert!(reloaded.read_config(false).is_ok());
        assert_eq!(reloaded.record(), &ConfigRecord::factory());
    }

    #[test]
    fn zero_http_port_repaired_on_load() {
        let mut store = ConfigStore::new(MemoryStorage::new(IMAGE_CAPACITY));
        store.record_mut().http_port = 0;
        store.save_config().unwrap();

        let mut reloaded = ConfigStore::new(store.storage().clone());
        reloaded.read_config(false).unwrap();
        assert_eq!(reloaded.record().http_port, 80);
    }

    #[test]
    fn oversized_record_leaves_previous_image() {
        let mut store = saved_store();
        let before = store.storage().as_bytes().to_vec();

        store.record_mut().mqtt.pass = "x".repeat(MAX_PAYLOAD_SIZE);
        let err = store.save_config().unwrap_err();

        assert!(matches!(err, StoreError::PayloadTooLarge { .. }));
        assert_eq!(store.storage().as_bytes(), before.as_slice());
        assert_eq!(store.storage().commit_count(), 1);
    }

    #[test]
    fn drift_triggers_save_only_on_change() {
        let mut store = saved_store();

        assert!(!store.check_drift().unwrap());
        assert_eq!(store.storage().commit_count(), 1);

        store.record_mut().mqtt.retain = true;
        assert!(store.check_drift().unwrap());
        assert_eq!(store.storage().commit_count(), 2);
        assert!(!store.check_drift().unwrap());
    }

    #[test]
    fn oversized_length_field_is_clamped() {
        let store = saved_store();
        let mut storage = store.storage().clone();
        storage.bytes_mut()[2..4].copy_from_slice(&u16::MAX.to_be_bytes());

        let mut reloaded = ConfigStore::new(storage);
        let err = reloaded.read_config(false).unwrap_err();

        // The clamped read covers erased bytes past the payload, so the checksum fails.
        assert!(matches!(
            err,
            StoreError::Invalid(ImageFault::Checksum { .. })
        ));
    }
}
