use crate::{config::DEFAULT_FULL_TOPIC, types::ModuleVariant};

pub const PREFIX_COMMAND: &str = "cmnd";
pub const PREFIX_STAT: &str = "stat";
pub const PREFIX_TELE: &str = "tele";

pub const KEY_POWER: &str = "POWER";
pub const KEY_AVAILABILITY: &str = "availability";

pub const PAYLOAD_ON: &str = "ON";
pub const PAYLOAD_OFF: &str = "OFF";
pub const PAYLOAD_ONLINE: &str = "online";
pub const PAYLOAD_OFFLINE: &str = "offline";

/// Expands a full-topic template such as `%prefix%/%hostname%/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicScheme {
    template: String,
    hostname: String,
}

impl TopicScheme {
    pub fn new(template: &str, hostname: impl Into<String>) -> Self {
        let template = if template.trim().is_empty() {
            DEFAULT_FULL_TOPIC
        } else {
            template
        };
        Self {
            template: template.to_string(),
            hostname: hostname.into(),
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn topic(&self, prefix: &str, key: &str) -> String {
        let mut topic = self
            .template
            .replace("%prefix%", prefix)
            .replace("%hostname%", &self.hostname);
        if !topic.ends_with('/') {
            topic.push('/');
        }
        topic.push_str(key);
        topic
    }

    pub fn command(&self, key: &str) -> String {
        self.topic(PREFIX_COMMAND, key)
    }

    pub fn stat(&self, key: &str) -> String {
        self.topic(PREFIX_STAT, key)
    }

    pub fn tele(&self, key: &str) -> String {
        self.topic(PREFIX_TELE, key)
    }

    /// Subscription filter covering every command key.
    pub fn command_filter(&self) -> String {
        self.command("+")
    }

    pub fn availability(&self) -> String {
        self.tele(KEY_AVAILABILITY)
    }
}

/// `POWER` on single-channel devices, `POWER<n>` (1-based) otherwise.
pub fn power_key(channel: usize, channel_count: usize) -> String {
    if channel_count == 1 {
        KEY_POWER.to_string()
    } else {
        format!("{KEY_POWER}{}", channel + 1)
    }
}

pub fn device_hostname(variant: ModuleVariant, uid: &str) -> String {
    format!("{}_{uid}", variant.module_name())
}

pub fn discovery_topic(discovery_prefix: &str, uid: &str, channel: usize) -> String {
    format!("{discovery_prefix}/light/{uid}_{}/config", channel + 1)
}
