use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("access of {len} bytes at offset {offset} exceeds capacity {capacity}")]
    OutOfBounds {
        offset: usize,
        len: usize,
        capacity: usize,
    },
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Reason a stored image was rejected as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageFault {
    #[error("magic marker mismatch (found {found:#06x})")]
    BadMagic { found: u16 },
    #[error("checksum mismatch (stored {stored:#06x}, computed {computed:#06x})")]
    Checksum { stored: u16, computed: u16 },
    #[error("payload decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("stored image invalid: {0}")]
    Invalid(#[from] ImageFault),
    #[error("config encode failed: {0}")]
    Encode(String),
    #[error("encoded config is {len} bytes, limit is {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("invalid channel {channel} (device has {available})")]
    InvalidChannel { channel: usize, available: usize },
    #[error("{requested} channels requested, at most {max} supported")]
    TooManyChannels { requested: usize, max: usize },
    #[error("no relay channel is wired")]
    NoChannels,
}

/// A single rejected settings parameter. Rejections never abort the update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
    #[error("invalid value `{value}` for `{name}`")]
    InvalidValue { name: &'static str, value: String },
    #[error("`{present}` given without `{missing}`")]
    Incomplete {
        present: &'static str,
        missing: &'static str,
    },
}
