pub mod checksum;
pub mod config;
#[cfg(feature = "relay")]
pub mod device;
pub mod error;
pub mod led;
pub mod pins;
#[cfg(feature = "relay")]
pub mod relay;
pub mod storage;
pub mod store;
pub mod topics;
pub mod types;
pub mod window;

pub use checksum::crc16;
pub use config::{ConfigRecord, ModuleDefaults, ModuleSettings, MAX_CHANNELS};
#[cfg(feature = "relay")]
pub use device::{merge_form_params, RelayDevice};
pub use error::{ImageFault, RelayError, SettingsError, StorageError, StoreError};
pub use pins::{ChannelPins, GpioRole, PinMap, PIN_NOT_PRESENT};
#[cfg(feature = "relay")]
pub use relay::{RelayAction, RelayController, SettingsUpdate};
pub use storage::{MemoryStorage, Storage};
pub use store::{ConfigStore, LoadOutcome, IMAGE_CAPACITY, SWEEP_INTERVAL_TICKS};
pub use topics::TopicScheme;
pub use types::{ApiReply, LedType, ModuleVariant, PowerOnState};
pub use window::{TimeWindow, WallClock};
