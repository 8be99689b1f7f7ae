use serde::{Deserialize, Serialize};

use crate::types::{LedType, ModuleVariant, PowerOnState};

/// Upper bound on relay channels a device can expose.
pub const MAX_CHANNELS: usize = 4;

pub const DEFAULT_HTTP_PORT: u16 = 80;
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_FULL_TOPIC: &str = "%prefix%/%hostname%/";
pub const DEFAULT_DISCOVERY_PREFIX: &str = "homeassistant";
pub const DEFAULT_TIMEZONE: &str = "Asia/Shanghai";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub retain: bool,
    /// Full-topic template, see [`crate::topics::TopicScheme`].
    pub topic: String,
    pub discovery: bool,
    pub discovery_prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelaySettings {
    pub power_on_state: PowerOnState,
    pub led_type: LedType,
    /// Indicator brightness in percent (1-100).
    pub led_light: u8,
    /// Breathing step interval.
    pub led_time_ms: u32,
    /// Indicator window start, HHMM.
    pub led_start: u16,
    /// Indicator window end, HHMM.
    pub led_end: u16,
    pub last_state: [bool; MAX_CHANNELS],
    pub study_index: [u8; MAX_CHANNELS],
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverSettings {
    pub position: u8,
    pub direction: u8,
    pub hand_pull: u8,
    pub weak_switch: u8,
    pub power_switch: u8,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VentilationSettings {
    pub dual_motor: bool,
    pub dual_warm: bool,
    pub delay_blow: u8,
    pub linkage: u8,
    pub max_temp: u8,
    pub close_warm: u8,
    pub close_ventilation: u8,
    pub beep: bool,
}

/// Module-specific settings and their factory values.
pub trait ModuleDefaults: Sized {
    const VARIANT: ModuleVariant;

    fn factory() -> Self;
}

impl ModuleDefaults for RelaySettings {
    const VARIANT: ModuleVariant = ModuleVariant::Relay;

    fn factory() -> Self {
        Self {
            led_light: 50,
            led_time_ms: 3,
            ..Self::default()
        }
    }
}

impl ModuleDefaults for CoverSettings {
    const VARIANT: ModuleVariant = ModuleVariant::Cover;

    fn factory() -> Self {
        Self {
            position: 127,
            direction: 127,
            hand_pull: 127,
            weak_switch: 127,
            power_switch: 127,
        }
    }
}

impl ModuleDefaults for VentilationSettings {
    const VARIANT: ModuleVariant = ModuleVariant::Ventilation;

    fn factory() -> Self {
        Self {
            dual_motor: true,
            dual_warm: true,
            delay_blow: 30,
            linkage: 1,
            max_temp: 40,
            close_warm: 30,
            close_ventilation: 30,
            beep: true,
        }
    }
}

#[cfg(feature = "relay")]
pub type ModuleSettings = RelaySettings;

#[cfg(feature = "cover")]
pub type ModuleSettings = CoverSettings;

#[cfg(feature = "ventilation")]
pub type ModuleSettings = VentilationSettings;

#[cfg(not(any(feature = "relay", feature = "cover", feature = "ventilation")))]
compile_error!("select a module variant: enable one of the `relay`, `cover` or `ventilation` features");

#[cfg(any(
    all(feature = "relay", feature = "cover"),
    all(feature = "relay", feature = "ventilation"),
    all(feature = "cover", feature = "ventilation"),
))]
compile_error!(
    "module variant features are exclusive: build with `default-features = false` and enable exactly one of `relay`, `cover` or `ventilation`"
);

impl Default for ModuleVariant {
    fn default() -> Self {
        <ModuleSettings as ModuleDefaults>::VARIANT
    }
}

/// Everything the device keeps across power loss.
///
/// `Default` is the all-zero record; [`ConfigRecord::factory`] carries the
/// build defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigRecord {
    pub network: NetworkConfig,
    pub mqtt: MqttConfig,
    pub http_port: u16,
    pub timezone: String,
    pub debug: bool,
    pub module_type: ModuleVariant,
    pub module: ModuleSettings,
}

impl ConfigRecord {
    pub fn factory() -> Self {
        Self {
            network: NetworkConfig {
                wifi_ssid: option_env!("WIFI_SSID").unwrap_or_default().to_string(),
                wifi_pass: option_env!("WIFI_PASS").unwrap_or_default().to_string(),
            },
            mqtt: MqttConfig {
                server: option_env!("MQTT_SERVER").unwrap_or_default().to_string(),
                port: option_env!("MQTT_PORT")
                    .and_then(|port| port.parse().ok())
                    .unwrap_or(DEFAULT_MQTT_PORT),
                user: option_env!("MQTT_USER").unwrap_or_default().to_string(),
                pass: option_env!("MQTT_PASS").unwrap_or_default().to_string(),
                retain: false,
                topic: option_env!("MQTT_FULLTOPIC")
                    .unwrap_or(DEFAULT_FULL_TOPIC)
                    .to_string(),
                discovery: false,
                discovery_prefix: DEFAULT_DISCOVERY_PREFIX.to_string(),
            },
            http_port: DEFAULT_HTTP_PORT,
            timezone: option_env!("TIMEZONE")
                .unwrap_or(DEFAULT_TIMEZONE)
                .to_string(),
            debug: true,
            module_type: ModuleSettings::VARIANT,
            module: ModuleSettings::factory(),
        }
    }

    /// Zero record with debug output enabled, used when the stored image is unusable.
    pub fn minimal() -> Self {
        Self {
            debug: true,
            ..Self::default()
        }
    }

    /// Repairs fields that older images may lack.
    pub fn apply_fixups(&mut self) {
        if self.http_port == 0 {
            self.http_port = DEFAULT_HTTP_PORT;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn factory_carries_variant_defaults() {
        let record = ConfigRecord::factory();

        assert_eq!(record.http_port, 80);
        assert!(record.debug);
        assert!(!record.mqtt.discovery);
        assert_eq!(record.mqtt.discovery_prefix, "homeassistant");
        assert_eq!(record.module_type, ModuleSettings::VARIANT);
    }

    #[cfg(feature = "relay")]
    #[test]
    fn relay_factory_values() {
        let record = ConfigRecord::factory();

        assert_eq!(record.module.led_light, 50);
        assert_eq!(record.module.led_time_ms, 3);
        assert_eq!(record.module.power_on_state, PowerOnState::AlwaysOff);
        assert_eq!(record.module.led_type, LedType::Disabled);
    }

    #[test]
    fn exactly_one_variant_is_built() {
        let enabled = [
            cfg!(feature = "relay"),
            cfg!(feature = "cover"),
            cfg!(feature = "ventilation"),
        ];
        assert_eq!(enabled.iter().filter(|&&on| on).count(), 1);
    }

    #[test]
    fn other_variant_factory_values() {
        let cover = CoverSettings::factory();
        assert_eq!(cover.position, 127);
        assert_eq!(cover.power_switch, 127);

        let ventilation = VentilationSettings::factory();
        assert!(ventilation.dual_motor);
        assert_eq!(ventilation.delay_blow, 30);
        assert_eq!(ventilation.max_temp, 40);
        assert!(ventilation.beep);
    }

    #[test]
    fn zero_http_port_is_repaired() {
        let mut record = ConfigRecord::default();
        record.apply_fixups();
        assert_eq!(record.http_port, 80);

        record.http_port = 8081;
        record.apply_fixups();
        assert_eq!(record.http_port, 8081);
    }

    #[test]
    fn round_trips_through_json() {
        let mut record = ConfigRecord::factory();
        record.network.wifi_ssid = "attic".to_string();
        record.mqtt.retain = true;
        record.http_port = 8080;

        let encoded = serde_json::to_vec(&record).unwrap();
        let decoded: ConfigRecord = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(decoded, record);
    }

    #[test]
    fn missing_fields_decode_as_zero() {
        let decoded: ConfigRecord =
            serde_json::from_str(r#"{"network":{"wifi_ssid":"old"}}"#).unwrap();

        assert_eq!(decoded.network.wifi_ssid, "old");
        assert_eq!(decoded.http_port, 0);
        assert_eq!(decoded.module, ModuleSettings::default());
    }
}
