//! Filter-gated rule lists and duration handling
//!
//! Weights, blockers and per-call options are all expressed as ordered lists
//! of `(FilterIDs, value)` pairs. The first entry whose filters pass wins.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::AppError;
use crate::AppResult;

/// One entry of a dynamic weight list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicWeight {
    #[serde(rename = "FilterIDs", default)]
    pub filter_ids: Vec<String>,
    #[serde(rename = "Weight")]
    pub weight: f64,
}

impl DynamicWeight {
    pub fn new(weight: f64) -> Self {
        Self {
            filter_ids: Vec::new(),
            weight,
        }
    }
}

/// One entry of a dynamic blocker list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicBlocker {
    #[serde(rename = "FilterIDs", default)]
    pub filter_ids: Vec<String>,
    #[serde(rename = "Blocker")]
    pub blocker: bool,
}

/// Filter-gated option value, scoped optionally to a tenant
///
/// An empty tenant or `*any` applies to every tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicOpt<T> {
    #[serde(rename = "Tenant", default)]
    pub tenant: String,
    #[serde(rename = "FilterIDs", default)]
    pub filter_ids: Vec<String>,
    #[serde(rename = "Value")]
    pub value: T,
}

impl<T> DynamicOpt<T> {
    /// Whether this option may be considered for the given tenant
    pub fn applies_to(&self, tenant: &str) -> bool {
        self.tenant.is_empty() || self.tenant == "*any" || self.tenant == tenant
    }
}

/// Effective lease duration for usages recorded on a ledger
///
/// Serialized as signed nanoseconds: negative means no expiry,
/// zero means recording is disabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "DurationRepr", into = "i64")]
pub enum LeaseTtl {
    #[default]
    Unlimited,
    Disabled,
    Expiring(Duration),
}

impl LeaseTtl {
    /// Map a signed nanosecond value onto the three regimes
    pub fn from_nanos(nanos: i64) -> Self {
        match nanos {
            n if n < 0 => LeaseTtl::Unlimited,
            0 => LeaseTtl::Disabled,
            n => LeaseTtl::Expiring(Duration::from_nanos(n as u64)),
        }
    }

    /// Resolve the TTL a matched ledger works with.
    ///
    /// A non-zero call-level override wins. A zero override leaves the
    /// ledger without expiry; with no override the profile default applies.
    pub fn effective(override_nanos: Option<i64>, profile: LeaseTtl) -> Self {
        match override_nanos {
            Some(0) => LeaseTtl::Unlimited,
            Some(nanos) => LeaseTtl::from_nanos(nanos),
            None => profile,
        }
    }
}

impl From<LeaseTtl> for i64 {
    fn from(ttl: LeaseTtl) -> Self {
        match ttl {
            LeaseTtl::Unlimited => -1,
            LeaseTtl::Disabled => 0,
            LeaseTtl::Expiring(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        }
    }
}

/// Wire form of a duration: integer nanoseconds or a `1s`/`500ms` string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum DurationRepr {
    Nanos(i64),
    Text(String),
}

impl TryFrom<DurationRepr> for LeaseTtl {
    type Error = AppError;

    fn try_from(repr: DurationRepr) -> Result<Self, Self::Error> {
        let nanos = match repr {
            DurationRepr::Nanos(n) => n,
            DurationRepr::Text(s) => parse_duration_nanos(&s)?,
        };
        Ok(LeaseTtl::from_nanos(nanos))
    }
}

/// Parse a signed duration into nanoseconds.
///
/// Accepts plain integers (nanoseconds) and unit-suffixed values such as
/// `-1`, `1s`, `500ms`, `2m`, `1h`, `10us` and `1.5s`.
pub fn parse_duration_nanos(input: &str) -> AppResult<i64> {
    let s = input.trim();
    if s.is_empty() {
        return Ok(0);
    }
    if let Ok(n) = s.parse::<i64>() {
        return Ok(n);
    }

    let (negative, body) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let split = body
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .ok_or_else(|| AppError::InvalidInput(format!("invalid duration: {}", input)))?;
    let (number, unit) = body.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("invalid duration: {}", input)))?;
    let factor = match unit {
        "ns" => 1.0,
        "us" | "µs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        _ => {
            return Err(AppError::InvalidInput(format!(
                "invalid duration unit in: {}",
                input
            )))
        }
    };
    let nanos = (value * factor).round() as i64;
    Ok(if negative { -nanos } else { nanos })
}
