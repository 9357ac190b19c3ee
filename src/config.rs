//! Run configuration
//!
//! Default stress shape: 9999 rounds, one send in ten, sends of 4..=2048
//! samples, receives of 8..=8192 bytes.
//!
//! Environment overrides (applied by [`ValidatorConfig::from_env`]):
//! - `FT245_VALIDATOR_ROUNDS`
//! - `FT245_VALIDATOR_SEED`
//! - `FT245_VALIDATOR_SEND_ONE_IN`
//!
//! Unparseable values are logged and ignored.

use serde::{Deserialize, Serialize};

use crate::policy::PolicyConfig;

/// Default number of validator rounds
pub const DEFAULT_ROUNDS: u64 = 9999;

/// FTDI vendor ID
pub const FT60X_VID: u16 = 0x0403;
/// FT600/FT601 product ID
pub const FT60X_PID: u16 = 0x601F;
/// Bulk OUT pipe of FIFO channel 1
pub const FT60X_EP_OUT: u8 = 0x02;
/// Bulk IN pipe of FIFO channel 1
pub const FT60X_EP_IN: u8 = 0x82;

const ENV_ROUNDS: &str = "FT245_VALIDATOR_ROUNDS";
const ENV_SEED: &str = "FT245_VALIDATOR_SEED";
const ENV_SEND_ONE_IN: &str = "FT245_VALIDATOR_SEND_ONE_IN";

/// Parameters of one validation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Number of rounds before the run completes
    pub rounds: u64,
    /// Operation mix and chunk sizing
    pub policy: PolicyConfig,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_ROUNDS,
            policy: PolicyConfig::default(),
        }
    }
}

impl ValidatorConfig {
    /// Defaults overlaid with any `FT245_VALIDATOR_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`
    ///
    /// Split out from [`from_env`](Self::from_env) so tests need not mutate
    /// the process environment.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(rounds) = parse_var(&lookup, ENV_ROUNDS) {
            config.rounds = rounds;
        }
        if let Some(seed) = parse_var(&lookup, ENV_SEED) {
            config.policy.seed = seed;
        }
        if let Some(one_in) = parse_var::<u32, _>(&lookup, ENV_SEND_ONE_IN) {
            if one_in == 0 {
                log::warn!("{} must be at least 1, ignoring", ENV_SEND_ONE_IN);
            } else {
                config.policy.send_one_in = one_in;
            }
        }

        config
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match parse_number(raw.trim()) {
        Some(value) => Some(value),
        None => {
            log::warn!("Invalid value '{}' for {}, using default", raw, key);
            None
        }
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal number
pub fn parse_number<T: std::str::FromStr>(s: &str) -> Option<T> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        // Route hex through u64 then back through FromStr of the decimal form
        let value = u64::from_str_radix(hex, 16).ok()?;
        return value.to_string().parse().ok();
    }
    s.parse().ok()
}

/// Where and how to open the USB bridge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB vendor ID
    pub vendor_id: u16,
    /// USB product ID
    pub product_id: u16,
    /// Interface carrying the FIFO pipes
    pub interface: u8,
    /// Bulk OUT endpoint address
    pub endpoint_out: u8,
    /// Bulk IN endpoint address
    pub endpoint_in: u8,
    /// Per-transfer timeout in milliseconds
    pub timeout_ms: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            vendor_id: FT60X_VID,
            product_id: FT60X_PID,
            interface: 0,
            endpoint_out: FT60X_EP_OUT,
            endpoint_in: FT60X_EP_IN,
            timeout_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ValidatorConfig::default();
        assert_eq!(config.rounds, 9999);
        assert_eq!(config.policy, PolicyConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = ValidatorConfig::from_lookup(lookup_from(&[
            ("FT245_VALIDATOR_ROUNDS", "250"),
            ("FT245_VALIDATOR_SEED", "0x2A"),
            ("FT245_VALIDATOR_SEND_ONE_IN", " 3 "),
        ]));
        assert_eq!(config.rounds, 250);
        assert_eq!(config.policy.seed, 42);
        assert_eq!(config.policy.send_one_in, 3);
    }

    #[test]
    fn test_invalid_env_falls_back() {
        let config = ValidatorConfig::from_lookup(lookup_from(&[
            ("FT245_VALIDATOR_ROUNDS", "lots"),
            ("FT245_VALIDATOR_SEND_ONE_IN", "0"),
        ]));
        assert_eq!(config.rounds, DEFAULT_ROUNDS);
        assert_eq!(config.policy.send_one_in, 10);
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number::<u16>("0x601F"), Some(0x601F));
        assert_eq!(parse_number::<u16>("1027"), Some(1027));
        assert_eq!(parse_number::<u8>("0x1FF"), None);
        assert_eq!(parse_number::<u64>("nope"), None);
    }

    #[test]
    fn test_device_defaults_are_ft600_channel_one() {
        let device = DeviceConfig::default();
        assert_eq!(device.vendor_id, 0x0403);
        assert_eq!(device.product_id, 0x601F);
        assert_eq!(device.endpoint_out, 0x02);
        assert_eq!(device.endpoint_in, 0x82);
    }
}
