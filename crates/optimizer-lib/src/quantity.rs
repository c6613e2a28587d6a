//! CPU quantities in Kubernetes notation
//!
//! Values are held as whole milli-units, the precision the API server
//! stores CPU requests at. `"500m"`, `"0.5"` and `"1.25"` all parse;
//! display always uses the canonical form (`"1125m"`, whole cores as `"1"`).

use crate::error::QuantityError;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// Milli-units per core
pub const MILLIS_PER_CORE: i64 = 1000;

/// A CPU amount with milli-unit precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct CpuQuantity(i64);

impl CpuQuantity {
    /// Smallest quantity the engine will ever write
    pub const MIN: CpuQuantity = CpuQuantity(1);

    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub const fn millis(&self) -> i64 {
        self.0
    }

    pub fn as_cores(&self) -> f64 {
        self.0 as f64 / MILLIS_PER_CORE as f64
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for CpuQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 % MILLIS_PER_CORE == 0 {
            write!(f, "{}", self.0 / MILLIS_PER_CORE)
        } else {
            write!(f, "{}m", self.0)
        }
    }
}

impl FromStr for CpuQuantity {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        if raw.is_empty() {
            return Err(QuantityError::Empty);
        }
        if raw.starts_with('-') {
            return Err(QuantityError::Negative(raw.to_string()));
        }
        let unsigned = raw.strip_prefix('+').unwrap_or(raw);

        if let Some(milli) = unsigned.strip_suffix('m') {
            if milli.is_empty() || !milli.bytes().all(|b| b.is_ascii_digit()) {
                return Err(QuantityError::Malformed(raw.to_string()));
            }
            return milli
                .parse::<i64>()
                .map(CpuQuantity)
                .map_err(|_| QuantityError::Overflow(raw.to_string()));
        }

        parse_decimal_cores(unsigned, raw)
    }
}

/// Parse `"2"`, `"0.5"`, `"1.2505"` into milli-units.
///
/// Digits past the third decimal round up, matching how the API server
/// canonicalises sub-milli CPU values.
fn parse_decimal_cores(s: &str, raw: &str) -> Result<CpuQuantity, QuantityError> {
    let malformed = || QuantityError::Malformed(raw.to_string());
    let overflow = || QuantityError::Overflow(raw.to_string());

    let (whole, fraction) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return Err(malformed());
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }

    let whole_millis = if whole.is_empty() {
        0
    } else {
        whole
            .parse::<i64>()
            .ok()
            .and_then(|cores| cores.checked_mul(MILLIS_PER_CORE))
            .ok_or_else(overflow)?
    };

    let mut frac_millis = 0i64;
    for (i, digit) in fraction.bytes().take(3).enumerate() {
        frac_millis += i64::from(digit - b'0') * 10i64.pow(2 - i as u32);
    }
    if fraction.bytes().skip(3).any(|b| b != b'0') {
        frac_millis += 1;
    }

    whole_millis
        .checked_add(frac_millis)
        .map(CpuQuantity)
        .ok_or_else(overflow)
}

impl Serialize for CpuQuantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CpuQuantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct QuantityVisitor;

        impl<'de> de::Visitor<'de> for QuantityVisitor {
            type Value = CpuQuantity;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a cpu quantity such as \"500m\" or \"2\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                v.parse().map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                i64::try_from(v)
                    .ok()
                    .and_then(|cores| cores.checked_mul(MILLIS_PER_CORE))
                    .map(CpuQuantity)
                    .ok_or_else(|| E::custom(QuantityError::Overflow(v.to_string())))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                if v < 0 {
                    return Err(E::custom(QuantityError::Negative(v.to_string())));
                }
                self.visit_u64(v as u64)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                v.to_string().parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(QuantityVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_milli_and_core_notation() {
        assert_eq!("500m".parse::<CpuQuantity>().unwrap().millis(), 500);
        assert_eq!("2".parse::<CpuQuantity>().unwrap().millis(), 2000);
        assert_eq!("0.5".parse::<CpuQuantity>().unwrap().millis(), 500);
        assert_eq!("1.125".parse::<CpuQuantity>().unwrap().millis(), 1125);
        assert_eq!(".25".parse::<CpuQuantity>().unwrap().millis(), 250);
    }

    #[test]
    fn test_sub_milli_digits_round_up() {
        assert_eq!("0.0001".parse::<CpuQuantity>().unwrap().millis(), 1);
        assert_eq!("1.2000".parse::<CpuQuantity>().unwrap().millis(), 1200);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!("".parse::<CpuQuantity>(), Err(QuantityError::Empty));
        assert!(matches!("-1".parse::<CpuQuantity>(), Err(QuantityError::Negative(_))));
        assert!(matches!("abc".parse::<CpuQuantity>(), Err(QuantityError::Malformed(_))));
        assert!(matches!("1.5m".parse::<CpuQuantity>(), Err(QuantityError::Malformed(_))));
        assert!(matches!("2Gi".parse::<CpuQuantity>(), Err(QuantityError::Malformed(_))));
    }

    #[test]
    fn test_display_is_canonical() {
        assert_eq!(CpuQuantity::from_millis(1125).to_string(), "1125m");
        assert_eq!(CpuQuantity::from_millis(1000).to_string(), "1");
        assert_eq!(CpuQuantity::from_millis(3000).to_string(), "3");
        assert_eq!(CpuQuantity::from_millis(1).to_string(), "1m");
    }

    #[test]
    fn test_serde_accepts_strings_and_numbers() {
        let q: CpuQuantity = serde_json::from_str("\"250m\"").unwrap();
        assert_eq!(q.millis(), 250);
        let q: CpuQuantity = serde_json::from_str("2").unwrap();
        assert_eq!(q.millis(), 2000);
        let q: CpuQuantity = serde_json::from_str("0.5").unwrap();
        assert_eq!(q.millis(), 500);

        assert_eq!(serde_json::to_string(&CpuQuantity::from_millis(1500)).unwrap(), "\"1500m\"");
    }
}
