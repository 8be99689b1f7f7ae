use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel state applied right after power-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum PowerOnState {
    #[default]
    AlwaysOff,
    AlwaysOn,
    InvertLast,
    RestoreLast,
}

impl PowerOnState {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::AlwaysOff),
            1 => Some(Self::AlwaysOn),
            2 => Some(Self::InvertLast),
            3 => Some(Self::RestoreLast),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::AlwaysOff => 0,
            Self::AlwaysOn => 1,
            Self::InvertLast => 2,
            Self::RestoreLast => 3,
        }
    }

    /// Startup state for a channel whose last persisted state was `last_on`.
    pub fn startup_state(self, last_on: bool) -> bool {
        match self {
            Self::AlwaysOff => false,
            Self::AlwaysOn => true,
            Self::InvertLast => !last_on,
            Self::RestoreLast => last_on,
        }
    }

    pub fn remembers_last_state(self) -> bool {
        matches!(self, Self::InvertLast | Self::RestoreLast)
    }
}

impl TryFrom<u8> for PowerOnState {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown power-on state {code}"))
    }
}

impl From<PowerOnState> for u8 {
    fn from(state: PowerOnState) -> Self {
        state.code()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum LedType {
    #[default]
    Disabled,
    Static,
    Breathing,
}

impl LedType {
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Disabled),
            1 => Some(Self::Static),
            2 => Some(Self::Breathing),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Disabled => 0,
            Self::Static => 1,
            Self::Breathing => 2,
        }
    }
}

impl TryFrom<u8> for LedType {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Self::from_code(code).ok_or_else(|| format!("unknown led type {code}"))
    }
}

impl From<LedType> for u8 {
    fn from(kind: LedType) -> Self {
        kind.code()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleVariant {
    Relay,
    Cover,
    Ventilation,
}

impl ModuleVariant {
    /// Name used as the hostname prefix of the device.
    pub fn module_name(self) -> &'static str {
        match self {
            Self::Relay => "sonoff",
            Self::Cover => "cover",
            Self::Ventilation => "zinguo",
        }
    }
}

/// Body returned by every HTTP command endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiReply {
    pub code: u8,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Map<String, Value>>,
}

impl ApiReply {
    pub fn ok(msg: impl Into<String>) -> Self {
        Self {
            code: 1,
            msg: msg.into(),
            data: None,
        }
    }

    pub fn ok_with(msg: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            code: 1,
            msg: msg.into(),
            data: Some(data),
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            code: 0,
            msg: msg.into(),
            data: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == 1
    }
}
