use core::fmt;

use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

pub mod leaderboard;
pub mod tip;

/// Money in currency minor units (cents).
///
/// Viewers receive amounts as decimal major units, so serialization divides by 100; anything
/// that needs exact arithmetic should stay on [`Amount::minor`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, sqlx::Type)]
#[sqlx(transparent)]
pub struct Amount(pub i64);

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Parses a decimal amount in major units ("15", "12.5", "0.99") into minor units.
    ///
    /// Returns `None` for anything that isn't a plain decimal with at most two fractional
    /// digits, or that overflows `i64` cents.
    pub fn parse_major(value: &str) -> Option<Amount> {
        let value = value.trim();
        let (negative, digits) = match value.as_bytes().first()? {
            b'-' => (true, &value[1..]),
            b'+' => (false, &value[1..]),
            _ => (false, value),
        };

        let (whole, frac) = match digits.split_once('.') {
            Some((_, "")) => return None,
            Some((whole, frac)) => (whole, frac),
            None => (digits, ""),
        };

        let is_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || frac.len() > 2 || !is_digits(whole) || !is_digits(frac) {
            return None;
        }

        let frac_minor = match frac.len() {
            0 => 0,
            1 => frac.parse::<i64>().ok()? * 10,
            _ => frac.parse::<i64>().ok()?,
        };

        let minor = whole
            .parse::<i64>()
            .ok()?
            .checked_mul(100)?
            .checked_add(frac_minor)?;

        Some(Amount(if negative { -minor } else { minor }))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.0 as f64 / 100.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct TipId(pub Uuid);

impl TipId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TipId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `?limit=` query parameter shared by the list endpoints
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Limit {
    pub limit: Option<i64>,
}

/// Upper bound on any list read, regardless of what the caller asks for
pub const MAX_LIMIT: i64 = 100;

pub fn clamp_limit(requested: Option<i64>, default: i64) -> i64 {
    requested.unwrap_or(default).clamp(1, MAX_LIMIT)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_major_units() {
        assert_eq!(Amount::parse_major("15"), Some(Amount(1500)));
        assert_eq!(Amount::parse_major("12.5"), Some(Amount(1250)));
        assert_eq!(Amount::parse_major("0.99"), Some(Amount(99)));
        assert_eq!(Amount::parse_major(" 100.00 "), Some(Amount(10000)));
        assert_eq!(Amount::parse_major("-5"), Some(Amount(-500)));
        assert_eq!(Amount::parse_major("+7.10"), Some(Amount(710)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "-", "abc", "1.234", ".5", "1e3", "1,00", "12.", "9223372036854775807"] {
            assert_eq!(Amount::parse_major(bad), None, "'{bad}' should not parse");
        }
    }

    #[test]
    fn test_display_and_serialize() {
        assert_eq!(Amount(11750).to_string(), "117.50");
        assert_eq!(Amount(5).to_string(), "0.05");
        assert_eq!(Amount(-500).to_string(), "-5.00");
        assert_eq!(serde_json::to_string(&Amount(1500)).unwrap(), "15.0");
        assert_eq!(serde_json::to_string(&Amount(1250)).unwrap(), "12.5");
    }
}
