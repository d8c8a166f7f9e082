use log::{debug, info, warn};
use serde::Deserialize;
use std::fmt;
use std::ops::Deref;
use std::path::Path;

/// String with sensitive content (debug and display output redacted).
#[derive(Default, Deserialize, Clone)]
pub struct SensitiveString(String);

impl fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            self.0.fmt(f)
        } else {
            "<redacted>".fmt(f)
        }
    }
}

impl fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            self.0.fmt(f)
        } else {
            "<redacted>".fmt(f)
        }
    }
}

impl Deref for SensitiveString {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// NFC responder settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default, rename_all = "kebab-case")]
pub struct NfcConfig {
    /// AID the SELECT DF command must present to be accepted.
    pub aid: String,
    /// Identity advertised in the `Announce` record.
    pub contract_address: String,
    pub locker_id: String,
    pub name: String,
    pub image_urls: Vec<String>,
    pub open_close_type: String,
}

impl Default for NfcConfig {
    fn default() -> Self {
        Self {
            aid: "eu.sofie-iot.smaug.locker.1".to_string(),
            contract_address: String::new(),
            locker_id: String::new(),
            name: String::new(),
            image_urls: Vec::new(),
            open_close_type: "open-tap-close".to_string(),
        }
    }
}

/// Access controller settings.
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default, rename_all = "kebab-case")]
pub struct AccessConfig {
    /// Use the built-in mock backend instead of the real HTTP backend.
    pub mock: bool,
    /// Real backend: base URL the bearer token is verified against.
    pub verify_url: String,
    /// Optional shared-secret header forwarded to the real backend alongside
    /// the caller's bearer token, for service-to-service trust.
    pub api_key: SensitiveString,
}

/// Lock controller settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default, rename_all = "kebab-case")]
pub struct LockConfig {
    pub mock: bool,
    /// sysfs-style file the real driver writes `"0"`/`"1"` to.
    pub gpio_path: String,
    /// Flips the bit written to `gpio_path` (some wiring is active-low).
    pub active_low: bool,
    /// Line state `initialize` drives the actuator to at startup.
    pub default_locked: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            mock: true,
            gpio_path: String::new(),
            active_low: false,
            default_locked: true,
        }
    }
}

/// Beacon settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default, rename_all = "kebab-case")]
pub struct BeaconConfig {
    /// 10-byte Eddystone namespace, hex-encoded (left-padded with zeros if
    /// shorter).
    pub namespace: String,
    /// 6-byte Eddystone instance, hex-encoded (left-padded with zeros if
    /// shorter).
    pub instance: String,
}

impl Default for BeaconConfig {
    fn default() -> Self {
        Self { namespace: "b8c7153ef9389a7cd65d".to_string(), instance: "000102030405".to_string() }
    }
}

/// WoT façade settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default, rename_all = "kebab-case")]
pub struct WotConfig {
    pub bind_addr: String,
}

impl Default for WotConfig {
    fn default() -> Self {
        Self { bind_addr: "0.0.0.0:8080".to_string() }
    }
}

/// System configuration, read from a config file and overlaid with
/// `LOCKER_*` environment variables.
///
/// If there is no config file or no valid JSON, a default configuration is
/// provided (which isn't very useful, but at least doesn't prevent the
/// process from starting in mock mode).
#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default, rename_all = "kebab-case")]
pub struct Config {
    pub nfc: NfcConfig,
    pub access: AccessConfig,
    pub lock: LockConfig,
    pub beacon: BeaconConfig,
    pub wot: WotConfig,
}

impl Config {
    /// Read configuration from `path`, falling back to defaults if the file
    /// is absent or unparseable.
    pub fn read(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            debug!("Config: No config file given, using defaults");
            return Self::default();
        };

        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("Config: Unable to read {}: {err}", path.display());
                return Self::default();
            }
        };

        let config = match serde_json::from_slice::<Self>(&bytes) {
            Ok(config) => config,
            Err(err) => {
                warn!("Config: Unable to parse {}: {err}", path.display());
                return Self::default();
            }
        };

        debug!("Config: System configuration: {config:?}");
        info!("Config: Configuration loaded from {}", path.display());
        config
    }
}
