//! Price-ratio policy for incoming offers

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::config::Settings;

/// Outcome of checking an offer against the asking price
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    Accept,
    Decline,
    /// Needs the player's judgement
    Neutral,
}

/// Compare `offered` with `ratio * seller` exactly.
///
/// The ratio is turned into a scaled integer so nothing is rounded. `None`
/// means the product does not fit in 128 bits.
pub fn compare_to_ratio(offered: i64, seller: i64, ratio: Decimal) -> Option<Ordering> {
    let ratio = ratio.normalize();
    let scale = 10i128.checked_pow(ratio.scale())?;
    let lhs = i128::from(offered).checked_mul(scale)?;
    let rhs = ratio.mantissa().checked_mul(i128::from(seller))?;
    Some(lhs.cmp(&rhs))
}

/// `offered >= ratio * seller`. An unrepresentable threshold is never met.
pub fn meets_ratio(offered: i64, seller: i64, ratio: Decimal) -> bool {
    matches!(
        compare_to_ratio(offered, seller, ratio),
        Some(Ordering::Greater | Ordering::Equal)
    )
}

/// Classify an offer. A ratio of zero disables its rule.
pub fn decide(seller: i64, offered: i64, accept_ratio: Decimal, reject_ratio: Decimal) -> Decision {
    if accept_ratio > Decimal::ZERO && meets_ratio(offered, seller, accept_ratio) {
        return Decision::Accept;
    }
    if reject_ratio > Decimal::ZERO && !meets_ratio(offered, seller, reject_ratio) {
        return Decision::Decline;
    }
    Decision::Neutral
}

/// Configured accept/decline ratios
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PricePolicy {
    accept_ratio: Decimal,
    reject_ratio: Decimal,
}

impl PricePolicy {
    pub fn new(accept_ratio: Decimal, reject_ratio: Decimal) -> Self {
        Self {
            accept_ratio,
            reject_ratio,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.accept_threshold, settings.reject_threshold)
    }

    pub fn decide(&self, seller: i64, offered: i64) -> Decision {
        decide(seller, offered, self.accept_ratio, self.reject_ratio)
    }

    /// Whether the offer still clears the accept ratio
    pub fn meets_accept(&self, seller: i64, offered: i64) -> bool {
        meets_ratio(offered, seller, self.accept_ratio)
    }

    /// Smallest offer that clears the accept ratio, saturating
    pub fn accept_floor(&self, seller: i64) -> i64 {
        let ratio = self.accept_ratio.normalize();
        let floor = 10i128.checked_pow(ratio.scale()).and_then(|scale| {
            let product = ratio.mantissa().checked_mul(i128::from(seller))?;
            // Ceiling division for a positive divisor
            Some(product.div_euclid(scale) + i128::from(product.rem_euclid(scale) != 0))
        });
        floor.map_or(i64::MAX, |value| {
            i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
        })
    }
}
