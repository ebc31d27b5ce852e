use bitflags::bitflags;
use evdev::{EventType, KeyCode};
use std::fmt;

bitflags! {
    /// Modifier state, maintained from the key transitions seen on the
    /// intercepted devices.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Mods: u32 {
        const SHIFT = 1 << 0;
        const CTRL = 1 << 1;
        const ALT = 1 << 2;
        const META = 1 << 3;
    }
}

impl Mods {
    /// The modifier bit a key contributes, if it is a modifier key.
    pub fn bit_for(code: KeyCode) -> Option<Mods> {
        if code == KeyCode::KEY_LEFTSHIFT || code == KeyCode::KEY_RIGHTSHIFT {
            Some(Mods::SHIFT)
        } else if code == KeyCode::KEY_LEFTCTRL || code == KeyCode::KEY_RIGHTCTRL {
            Some(Mods::CTRL)
        } else if code == KeyCode::KEY_LEFTALT || code == KeyCode::KEY_RIGHTALT {
            Some(Mods::ALT)
        } else if code == KeyCode::KEY_LEFTMETA || code == KeyCode::KEY_RIGHTMETA {
            Some(Mods::META)
        } else {
            None
        }
    }
}

/// How a key signal applies its key.
///
/// `Both` is a full keystroke in one signal; kernel autorepeat arrives as
/// this. `Toggle` flips the pressed state and is only produced through the
/// synthesis path, never by a physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyApply {
    Set,
    Unset,
    Both,
    Toggle,
}

impl KeyApply {
    /// Map a raw event value. Anything outside the known range is a
    /// malformed signal and yields `None`.
    pub fn from_event_value(value: i32) -> Option<KeyApply> {
        match value {
            0 => Some(KeyApply::Unset),
            1 => Some(KeyApply::Set),
            2 => Some(KeyApply::Both),
            _ => None,
        }
    }
}

impl fmt::Display for KeyApply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KeyApply::Set => "set",
            KeyApply::Unset => "unset",
            KeyApply::Both => "both",
            KeyApply::Toggle => "toggle",
        };
        f.write_str(name)
    }
}

/// One dispatched input occurrence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// A key transition.
    Key { code: KeyCode, apply: KeyApply },
    /// Any other event kind (relative axis, switch, led, ...).
    Other { kind: EventType, code: u16, value: i32 },
}

impl Signal {
    pub fn kind_name(&self) -> String {
        match self {
            Signal::Key { .. } => "KEY".to_string(),
            Signal::Other { kind, .. } => format!("{kind:?}"),
        }
    }
}

/// Handles one dispatched signal. The return value tells the interceptor
/// whether the signal should continue to downstream consumers; it only has
/// an effect in blocking mode, where `true` triggers re-injection.
pub trait SignalReceiver: Send + Sync {
    fn receive(&self, signal: &Signal, mods: Mods) -> bool;
}

/// Resolve a key code to its display name.
pub fn key_name(code: KeyCode) -> String {
    format!("{code:?}")
}

/// Reverse lookup over the key name table: accepts a numeric code, a full
/// name like `KEY_Q`, or a bare suffix like `q`.
pub fn key_by_name(name: &str) -> Option<KeyCode> {
    if let Ok(code) = name.parse::<u16>() {
        return Some(KeyCode::new(code));
    }
    let wanted = name.to_ascii_uppercase();
    let prefixed = format!("KEY_{wanted}");
    (0..=0x2ff)
        .map(KeyCode::new)
        .find(|key| {
            let known = format!("{key:?}");
            known == wanted || known == prefixed
        })
}
