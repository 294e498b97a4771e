//! Fixed-point reward conversion.
//!
//! On-chain rewards are integers scaled by `10^18`. Stored rewards are decimal
//! text, and a row whose text does not parse renders as a zero reward instead
//! of failing the listing it belongs to.

use std::fmt::{Display, Formatter};

use primitive_types::U256;
use serde::{Serialize, Serializer};

/// Implied decimal places of every reward amount.
pub const TOKEN_DECIMALS: usize = 18;

/// `10^TOKEN_DECIMALS`, the divisor between an integer amount and whole tokens.
pub const WEI_PER_TOKEN: U256 = U256([1_000_000_000_000_000_000, 0, 0, 0]);

const WEI_PER_TOKEN_U64: u64 = 1_000_000_000_000_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RewardAmount {
    raw: U256,
}

impl RewardAmount {
    #[must_use]
    pub fn new(raw: U256) -> Self {
        Self { raw }
    }

    /// Parses stored reward text. Absent, empty, signed, non-numeric and
    /// out-of-range text all yield zero.
    #[must_use]
    pub fn from_text(value: Option<&str>) -> Self {
        Self {
            raw: parse_u256_or_zero(value),
        }
    }

    #[must_use]
    pub fn exact(&self) -> U256 {
        self.raw
    }

    #[must_use]
    pub fn in_det(&self) -> TokenDecimal {
        let (whole, fraction) = self.raw.div_mod(WEI_PER_TOKEN);
        TokenDecimal {
            whole,
            fraction: fraction.low_u64(),
        }
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.raw.is_zero()
    }
}

impl From<U256> for RewardAmount {
    fn from(raw: U256) -> Self {
        Self::new(raw)
    }
}

/// Exact decimal value of a reward in whole tokens.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenDecimal {
    whole: U256,
    fraction: u64,
}

impl TokenDecimal {
    #[must_use]
    pub fn whole(&self) -> U256 {
        self.whole
    }

    /// Fractional part in units of `10^-18`; always below [`WEI_PER_TOKEN`].
    #[must_use]
    pub fn fraction(&self) -> u64 {
        self.fraction
    }

    /// Multiplies back by `10^18`.
    #[must_use]
    pub fn scaled(&self) -> U256 {
        self.whole * WEI_PER_TOKEN + U256::from(self.fraction)
    }

    /// Nearest `f64`; only for display paths that tolerate rounding.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(&self) -> f64 {
        let mut whole = 0.0_f64;
        for limb in self.whole.0.iter().rev() {
            whole = whole * 18_446_744_073_709_551_616.0 + *limb as f64;
        }
        whole + self.fraction as f64 / WEI_PER_TOKEN_U64 as f64
    }
}

impl Display for TokenDecimal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let padded = format!("{:0width$}", self.fraction, width = TOKEN_DECIMALS);
        let trimmed = padded.trim_end_matches('0');
        if trimmed.is_empty() {
            write!(f, "{}.0", self.whole)
        } else {
            write!(f, "{}.{}", self.whole, trimmed)
        }
    }
}

impl Serialize for TokenDecimal {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

/// Parses a stored block height, falling back to zero ("start from genesis").
#[must_use]
pub fn parse_height(value: Option<&str>) -> U256 {
    parse_u256_or_zero(value)
}

fn parse_u256_or_zero(value: Option<&str>) -> U256 {
    match value {
        Some(text) if !text.is_empty() && text.bytes().all(|byte| byte.is_ascii_digit()) => {
            U256::from_dec_str(text).unwrap_or_default()
        }
        _ => U256::zero(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn amount(text: &str) -> RewardAmount {
        RewardAmount::from_text(Some(text))
    }

    #[test]
    fn five_tokens_render_as_five() {
        let reward = amount("5000000000000000000");
        assert_eq!(reward.exact(), U256::from(5_000_000_000_000_000_000_u64));
        assert_eq!(reward.in_det().to_string(), "5.0");
        assert_eq!(reward.in_det().whole(), U256::from(5_u64));
        assert_eq!(reward.in_det().fraction(), 0);
        assert!((reward.in_det().to_f64() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn sub_token_amounts_keep_every_digit() {
        assert_eq!(amount("1").in_det().to_string(), "0.000000000000000001");
        assert_eq!(amount("1500000000000000000").in_det().to_string(), "1.5");
        assert_eq!(
            amount("123456789012345678901234567890").in_det().to_string(),
            "123456789012.34567890123456789"
        );
    }

    #[test]
    fn malformed_or_absent_text_degrades_to_zero() {
        for text in ["", "abc", "-5", "+5", "1.5", " 7", "1e18"] {
            let reward = amount(text);
            assert!(reward.is_zero(), "expected zero for {text:?}");
            assert_eq!(reward.in_det(), TokenDecimal::default());
            assert_eq!(reward.in_det().to_string(), "0.0");
        }
        assert!(RewardAmount::from_text(None).is_zero());
    }

    #[test]
    fn values_beyond_256_bits_degrade_to_zero() {
        let too_big = format!("{}0", U256::MAX);
        assert!(amount(&too_big).is_zero());
        assert_eq!(amount(&U256::MAX.to_string()).exact(), U256::MAX);
    }

    #[test]
    fn height_parsing_follows_the_same_policy() {
        assert_eq!(parse_height(Some("1024")), U256::from(1024_u64));
        assert_eq!(parse_height(Some("latest")), U256::zero());
        assert_eq!(parse_height(None), U256::zero());
    }

    #[test]
    fn token_decimal_serializes_as_string() {
        let value = match serde_json::to_value(amount("2500000000000000000").in_det()) {
            Ok(value) => value,
            Err(err) => panic!("serialize failed: {err}"),
        };
        assert_eq!(value, serde_json::json!("2.5"));
    }

    proptest! {
        #[test]
        fn prop_decimal_scales_back_to_exact_integer(limbs in any::<[u64; 4]>()) {
            let raw = U256(limbs);
            let reward = amount(&raw.to_string());
            prop_assert_eq!(reward.exact(), raw);
            prop_assert_eq!(reward.in_det().scaled(), raw);
            prop_assert!(reward.in_det().fraction() < WEI_PER_TOKEN_U64);
        }

        #[test]
        fn prop_non_digit_text_is_zero(text in "[a-z.+-][0-9a-z.]{0,24}") {
            prop_assert!(amount(&text).is_zero());
        }
    }
}
