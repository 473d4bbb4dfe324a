//! Negotiator settings, loaded from TOML
//!
//! ```toml
//! acceptThreshold = 1
//! rejectThreshold = 0.75
//! enableSecondaryFlow = false
//!
//! [delayActions]
//! enabled = true
//! shortRange = [400, 800]
//! longRange = [1200, 2600]
//!
//! [sysmsg]
//! 2421 = "SMT_MEDIATE_TRADE_CANCEL_OPPONENT"
//! ```

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{BrokerError, Result};

/// Ratios are compared as scaled integers; this bounds the scale.
pub const MAX_RATIO_SCALE: u32 = 6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    /// Accept offers of at least this fraction of the asking price (0 disables)
    pub accept_threshold: Decimal,
    /// Decline offers below this fraction of the asking price (0 disables)
    pub reject_threshold: Decimal,
    /// Finish negotiations the player started manually
    pub enable_secondary_flow: bool,
    pub delay_actions: DelaySettings,
    /// Chat channel for status notices
    pub chat_channel: u32,
    /// System message code to symbolic name
    pub sysmsg: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            accept_threshold: dec!(1),
            reject_threshold: dec!(0.75),
            enable_secondary_flow: false,
            delay_actions: DelaySettings::default(),
            chat_channel: 24,
            sysmsg: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DelaySettings {
    pub enabled: bool,
    /// Milliseconds, inclusive
    pub short_range: [u64; 2],
    pub long_range: [u64; 2],
}

impl Default for DelaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            short_range: [400, 800],
            long_range: [1200, 2600],
        }
    }
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            BrokerError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(raw)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, ratio) in [
            ("acceptThreshold", self.accept_threshold),
            ("rejectThreshold", self.reject_threshold),
        ] {
            if ratio.is_sign_negative() && !ratio.is_zero() {
                return Err(BrokerError::InvalidConfig(format!(
                    "{} must not be negative, got {}",
                    name, ratio
                )));
            }
            if ratio.normalize().scale() > MAX_RATIO_SCALE {
                return Err(BrokerError::InvalidConfig(format!(
                    "{} allows at most {} decimal places, got {}",
                    name, MAX_RATIO_SCALE, ratio
                )));
            }
        }

        if !self.accept_threshold.is_zero()
            && !self.reject_threshold.is_zero()
            && self.reject_threshold > self.accept_threshold
        {
            return Err(BrokerError::InvalidConfig(format!(
                "rejectThreshold {} overlaps acceptThreshold {}",
                self.reject_threshold, self.accept_threshold
            )));
        }

        for (name, [min, max]) in [
            ("delayActions.shortRange", self.delay_actions.short_range),
            ("delayActions.longRange", self.delay_actions.long_range),
        ] {
            if min > max {
                return Err(BrokerError::InvalidConfig(format!(
                    "{} minimum {} exceeds maximum {}",
                    name, min, max
                )));
            }
        }

        for code in self.sysmsg.keys() {
            if code.parse::<u32>().is_err() {
                return Err(BrokerError::InvalidConfig(format!(
                    "sysmsg code {:?} is not a number",
                    code
                )));
            }
        }

        Ok(())
    }
}
