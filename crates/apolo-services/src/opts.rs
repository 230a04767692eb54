//! Per-call option resolution
//!
//! Usage ID, TTL override and units are taken from the request's APIOpts
//! when present, otherwise from the first configured dynamic option whose
//! tenant and filters match, otherwise from the static default.

use apolo_core::{
    config::IpsOpts,
    models::{parse_duration_nanos, value_as_string, CgrEvent, DynamicOpt, EventView},
    traits::FilterService,
    AppError, AppResult,
};
use serde_json::Value;
use tracing::debug;

use crate::constants::{OPTS_IPS_TTL, OPTS_IPS_UNITS, OPTS_IPS_USAGE_ID};

/// Options in effect for one call
#[derive(Debug, Clone, PartialEq)]
pub struct CallOpts {
    pub usage_id: String,
    /// Lease length override in signed nanoseconds
    pub ttl: Option<i64>,
    pub units: f64,
}

async fn first_passing<'a, T>(
    fs: &dyn FilterService,
    tenant: &str,
    opts: &'a [DynamicOpt<T>],
    ev: &EventView<'_>,
) -> AppResult<Option<&'a T>> {
    for opt in opts.iter().filter(|o| o.applies_to(tenant)) {
        if fs.pass(tenant, &opt.filter_ids, ev).await? {
            return Ok(Some(&opt.value));
        }
    }
    Ok(None)
}

fn ttl_from_value(value: &Value) -> AppResult<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| AppError::InvalidInput(format!("invalid {}: {}", OPTS_IPS_TTL, n))),
        Value::String(s) => parse_duration_nanos(s),
        other => Err(AppError::InvalidInput(format!(
            "invalid {}: {}",
            OPTS_IPS_TTL, other
        ))),
    }
}

fn units_from_value(value: &Value) -> AppResult<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| AppError::InvalidInput(format!("invalid {}: {}", OPTS_IPS_UNITS, value)))
}

/// Resolve the usage ID, TTL override and units for a call
///
/// # Errors
///
/// Returns `AppError::MandatoryIeMissing(["UsageID"])` when no usage ID can
/// be determined, and `AppError::InvalidInput` for malformed option values
pub async fn resolve_call_opts(
    fs: &dyn FilterService,
    cfg: &IpsOpts,
    tenant: &str,
    ev: &CgrEvent,
) -> AppResult<CallOpts> {
    let view = ev.view();

    let usage_id = match ev.api_opts.get(OPTS_IPS_USAGE_ID) {
        Some(v) => value_as_string(v),
        None => match first_passing(fs, tenant, &cfg.usage_id, &view).await? {
            Some(id) => id.clone(),
            None => cfg.default_usage_id.clone(),
        },
    };
    if usage_id.is_empty() {
        return Err(AppError::MandatoryIeMissing(vec!["UsageID".to_string()]));
    }

    let ttl = match ev.api_opts.get(OPTS_IPS_TTL) {
        Some(v) => Some(ttl_from_value(v)?),
        None => match first_passing(fs, tenant, &cfg.ttl, &view).await? {
            Some(s) => Some(parse_duration_nanos(s)?),
            None => cfg
                .default_ttl
                .as_deref()
                .map(parse_duration_nanos)
                .transpose()?,
        },
    };

    let units = match ev.api_opts.get(OPTS_IPS_UNITS) {
        Some(v) => units_from_value(v)?,
        None => match first_passing(fs, tenant, &cfg.units, &view).await? {
            Some(u) => *u,
            None => cfg.default_units,
        },
    };

    debug!(
        "Resolved IPs options: usage_id={} ttl={:?} units={}",
        usage_id, ttl, units
    );
    Ok(CallOpts {
        usage_id,
        ttl,
        units,
    })
}
