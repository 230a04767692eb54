//! Filter evaluation
//!
//! `FilterS` decides whether a list of filter IDs passes for an event.
//! Filter IDs are either inline (`*string:~*req.Account:1001|1002`) or the
//! ID of a stored filter. Every filter must pass; within a filter every
//! rule must pass; a rule passes when any of its values matches.

use apolo_core::{
    models::{
        parse_duration_nanos, value_as_string, DynamicBlocker, DynamicWeight, EventView, Filter,
        FilterRule, META_EMPTY, META_EXISTS, META_GT, META_GTE, META_LT, META_LTE,
        META_NOT_EXISTS, META_PREFIX, META_STRING, META_SUFFIX,
    },
    traits::FilterService,
    AppError, AppResult,
};
use apolo_db::DataManager;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

/// Filter engine backed by the data manager for stored filters
pub struct FilterS {
    dm: DataManager,
}

impl FilterS {
    pub fn new(dm: DataManager) -> Self {
        Self { dm }
    }

    async fn resolve(&self, tenant: &str, filter_id: &str) -> AppResult<Arc<Filter>> {
        if Filter::is_inline(filter_id) {
            return Filter::from_inline(tenant, filter_id).map(Arc::new);
        }
        self.dm.get_filter(tenant, filter_id).await.map_err(|e| {
            if e.is_not_found() {
                AppError::BrokenReference(filter_id.to_string())
            } else {
                e
            }
        })
    }
}

#[async_trait]
impl FilterService for FilterS {
    async fn pass(
        &self,
        tenant: &str,
        filter_ids: &[String],
        ev: &EventView<'_>,
    ) -> Result<bool, AppError> {
        for filter_id in filter_ids {
            let filter = self.resolve(tenant, filter_id).await?;
            for rule in &filter.rules {
                if !rule_passes(rule, ev)? {
                    trace!("Filter {} failed on rule {}", filter_id, rule.rule_type);
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

/// Evaluate a single rule against the event
pub fn rule_passes(rule: &FilterRule, ev: &EventView<'_>) -> AppResult<bool> {
    let (kind, negated) = rule.kind();
    let field = ev.field(&rule.element);

    let values: Vec<String> = rule
        .values
        .iter()
        .filter_map(|v| {
            if v.starts_with('~') {
                ev.field_as_string(v)
            } else {
                Some(v.clone())
            }
        })
        .collect();

    let matched = match kind.as_str() {
        META_EXISTS => field.is_some_and(|v| !v.is_null()),
        META_NOT_EXISTS => field.map_or(true, Value::is_null),
        META_EMPTY => field.is_some_and(is_empty_value),
        META_STRING => field
            .map(value_as_string)
            .is_some_and(|s| values.iter().any(|v| *v == s)),
        META_PREFIX => field
            .map(value_as_string)
            .is_some_and(|s| values.iter().any(|v| s.starts_with(v.as_str()))),
        META_SUFFIX => field
            .map(value_as_string)
            .is_some_and(|s| values.iter().any(|v| s.ends_with(v.as_str()))),
        META_GT | META_GTE | META_LT | META_LTE => match field.and_then(as_number) {
            Some(lhs) => values
                .iter()
                .filter_map(|v| number_from_str(v))
                .any(|rhs| compare(&kind, lhs, rhs)),
            None => false,
        },
        other => {
            return Err(AppError::FilterParse(format!(
                "unsupported filter type: <{}>",
                other
            )))
        }
    };
    Ok(matched != negated)
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => number_from_str(s),
        _ => None,
    }
}

/// Numbers compare as-is; duration strings compare as nanoseconds
fn number_from_str(s: &str) -> Option<f64> {
    s.trim()
        .parse::<f64>()
        .ok()
        .or_else(|| parse_duration_nanos(s).ok().map(|n| n as f64))
}

fn compare(kind: &str, lhs: f64, rhs: f64) -> bool {
    match kind {
        META_GT => lhs > rhs,
        META_GTE => lhs >= rhs,
        META_LT => lhs < rhs,
        _ => lhs <= rhs,
    }
}

/// Weight of the first entry whose filters pass, 0 when none does
pub async fn weight_from_dynamics(
    fs: &dyn FilterService,
    tenant: &str,
    weights: &[DynamicWeight],
    ev: &EventView<'_>,
) -> AppResult<f64> {
    for dw in weights {
        if fs.pass(tenant, &dw.filter_ids, ev).await? {
            return Ok(dw.weight);
        }
    }
    debug!("No dynamic weight passed, defaulting to 0");
    Ok(0.0)
}

/// Blocker of the first entry whose filters pass, false when none does
pub async fn blocker_from_dynamics(
    fs: &dyn FilterService,
    tenant: &str,
    blockers: &[DynamicBlocker],
    ev: &EventView<'_>,
) -> AppResult<bool> {
    for db in blockers {
        if fs.pass(tenant, &db.filter_ids, ev).await? {
            return Ok(db.blocker);
        }
    }
    Ok(false)
}
