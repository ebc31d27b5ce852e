use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::devices::{DEFAULT_DEVICES_FILE, DEFAULT_INPUT_DIR};

/// Runtime interception policy.
///
/// The original demo hard-wired these as compile-time switches; here they
/// are plain settings, read from an optional `config.json` and overridden
/// by command-line flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Policy {
    /// Dispatch key signals only.
    pub keys_only: bool,
    /// Require the `kbd` handler token when auto-detecting keyboards.
    pub require_kbd: bool,
    /// Grab devices exclusively. Intercepted events then reach other
    /// consumers only through re-injection.
    pub block: bool,
    /// Re-inject every intercepted key as its neighbor (code + 1).
    pub mangle: bool,
    /// Quit key, by name or numeric code.
    pub quit_key: String,
    /// Device status listing to enumerate from.
    pub devices_file: PathBuf,
    /// Directory holding the event character devices.
    pub input_dir: PathBuf,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            keys_only: true,
            require_kbd: true,
            block: false,
            mangle: false,
            quit_key: "KEY_Q".to_string(),
            devices_file: PathBuf::from(DEFAULT_DEVICES_FILE),
            input_dir: PathBuf::from(DEFAULT_INPUT_DIR),
        }
    }
}

impl Policy {
    /// Load the policy file if there is one. A missing file means
    /// defaults; a malformed one is reported and also means defaults.
    pub fn load() -> Self {
        let Some(path) = config_file() else {
            return Self::default();
        };
        let Ok(content) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            eprintln!("⚠️  Ignoring malformed policy file {}: {e}", path.display());
            Self::default()
        })
    }

    /// Mangling replaces the re-injected key, so it only makes sense with
    /// exclusive grabs.
    pub fn normalize(&mut self) {
        if self.mangle {
            self.block = true;
        }
    }
}

fn config_file() -> Option<PathBuf> {
    Some(dirs::config_dir()?.join("pressq").join("config.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_variant() {
        let policy = Policy::default();
        assert!(policy.keys_only);
        assert!(policy.require_kbd);
        assert!(!policy.block);
        assert!(!policy.mangle);
        assert_eq!(policy.quit_key, "KEY_Q");
        assert_eq!(policy.devices_file, PathBuf::from("/proc/bus/input/devices"));
        assert_eq!(policy.input_dir, PathBuf::from("/dev/input"));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let policy: Policy = serde_json::from_str("{}").unwrap();
        assert_eq!(policy, Policy::default());

        let policy: Policy = serde_json::from_str(r#"{"block": true}"#).unwrap();
        assert!(policy.block);
        assert!(policy.keys_only);
        assert_eq!(policy.quit_key, "KEY_Q");
    }

    #[test]
    fn mangle_forces_blocking() {
        let mut policy = Policy {
            mangle: true,
            ..Policy::default()
        };
        policy.normalize();
        assert!(policy.block);
    }

    #[test]
    fn policy_round_trips_through_json() {
        let mut policy = Policy::default();
        policy.quit_key = "KEY_ESC".to_string();
        policy.keys_only = false;
        let json = serde_json::to_string(&policy).unwrap();
        assert_eq!(serde_json::from_str::<Policy>(&json).unwrap(), policy);
    }
}
