use serde::{Deserialize, Serialize};

use crate::config::MAX_CHANNELS;

/// Pin number meaning "role not wired on this board".
pub const PIN_NOT_PRESENT: u8 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpioRole {
    Relay(usize),
    Led(usize),
    Button(usize),
    RadioReceive,
}

/// Pins a single relay channel is wired to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPins {
    pub relay: u8,
    pub led: Option<u8>,
    pub button: Option<u8>,
}

/// Board template mapping GPIO roles to pin numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinMap {
    pub relay: [u8; MAX_CHANNELS],
    pub led: [u8; MAX_CHANNELS],
    pub button: [u8; MAX_CHANNELS],
    pub radio_receive: u8,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            relay: [PIN_NOT_PRESENT; MAX_CHANNELS],
            led: [PIN_NOT_PRESENT; MAX_CHANNELS],
            button: [PIN_NOT_PRESENT; MAX_CHANNELS],
            radio_receive: PIN_NOT_PRESENT,
        }
    }
}

impl PinMap {
    /// Three-gang wall switch: relays on 12/5/4, touch keys on 0/9/10.
    pub fn ch3() -> Self {
        Self {
            relay: [12, 5, 4, PIN_NOT_PRESENT],
            led: [13, 14, 15, PIN_NOT_PRESENT],
            button: [0, 9, 10, PIN_NOT_PRESENT],
            radio_receive: 3,
        }
    }

    pub fn pin(&self, role: GpioRole) -> Option<u8> {
        let raw = match role {
            GpioRole::Relay(ch) => *self.relay.get(ch)?,
            GpioRole::Led(ch) => *self.led.get(ch)?,
            GpioRole::Button(ch) => *self.button.get(ch)?,
            GpioRole::RadioReceive => self.radio_receive,
        };
        (raw != PIN_NOT_PRESENT).then_some(raw)
    }

    /// Wired channels in slot order. Slots without a relay pin are skipped.
    pub fn channels(&self) -> Vec<ChannelPins> {
        (0..MAX_CHANNELS)
            .filter_map(|slot| {
                Some(ChannelPins {
                    relay: self.pin(GpioRole::Relay(slot))?,
                    led: self.pin(GpioRole::Led(slot)),
                    button: self.pin(GpioRole::Button(slot)),
                })
            })
            .collect()
    }
}
