//! Event and identifier payloads carried by the RPC surface

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use validator::Validate;

use crate::error::AppError;
use crate::AppResult;

/// Prefix under which event fields are addressed by filters
pub const META_REQ: &str = "*req";
/// Prefix under which API options are addressed by filters
pub const META_OPTS: &str = "*opts";

/// Generic event routed through the IP service
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct CgrEvent {
    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "ID", default)]
    #[validate(length(min = 1))]
    pub id: String,

    #[serde(rename = "Time", default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,

    #[serde(rename = "Event", default)]
    #[validate(length(min = 1))]
    pub event: HashMap<String, Value>,

    #[serde(rename = "APIOpts", default)]
    pub api_opts: HashMap<String, Value>,
}

impl CgrEvent {
    pub fn new(tenant: &str, id: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            id: id.to_string(),
            ..Default::default()
        }
    }

    /// Builder-style helper to add an event field
    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.event.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style helper to add an API option
    pub fn with_opt(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.api_opts.insert(key.to_string(), value.into());
        self
    }

    /// Fails with the list of mandatory fields that are missing
    pub fn check_mandatory(&self) -> AppResult<()> {
        self.validate().map_err(|errs| {
            let fields = errs.field_errors();
            let missing: Vec<String> = [("id", "ID"), ("event", "Event")]
                .iter()
                .filter(|(field, wire)| fields.contains_key(*field) || fields.contains_key(*wire))
                .map(|(_, wire)| wire.to_string())
                .collect();
            if missing.is_empty() {
                AppError::from(errs)
            } else {
                AppError::MandatoryIeMissing(missing)
            }
        })
    }

    /// Read-only view used by filters and option resolution
    pub fn view(&self) -> EventView<'_> {
        EventView {
            req: &self.event,
            opts: &self.api_opts,
        }
    }
}

/// `Tenant:ID` reference to a single entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct TenantId {
    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "ID", default)]
    #[validate(length(min = 1))]
    pub id: String,

    #[serde(rename = "APIOpts", default)]
    pub api_opts: HashMap<String, Value>,
}

impl TenantId {
    pub fn new(tenant: &str, id: &str) -> Self {
        Self {
            tenant: tenant.to_string(),
            id: id.to_string(),
            api_opts: HashMap::new(),
        }
    }

    pub fn check_mandatory(&self) -> AppResult<()> {
        self.validate()
            .map_err(|_| AppError::MandatoryIeMissing(vec!["ID".to_string()]))
    }
}

/// Arguments for clearing usages out of a single ledger.
///
/// An empty `allocation_ids` list clears every usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct ClearIpAllocationsArgs {
    #[serde(rename = "Tenant", default)]
    pub tenant: String,

    #[serde(rename = "ID", default)]
    #[validate(length(min = 1))]
    pub id: String,

    #[serde(rename = "AllocationIDs", default)]
    pub allocation_ids: Vec<String>,

    #[serde(rename = "APIOpts", default)]
    pub api_opts: HashMap<String, Value>,
}

impl ClearIpAllocationsArgs {
    pub fn check_mandatory(&self) -> AppResult<()> {
        self.validate()
            .map_err(|_| AppError::MandatoryIeMissing(vec!["ID".to_string()]))
    }
}

/// Borrowed `*req`/`*opts` data provider over an event
#[derive(Debug, Clone, Copy)]
pub struct EventView<'a> {
    pub req: &'a HashMap<String, Value>,
    pub opts: &'a HashMap<String, Value>,
}

impl<'a> EventView<'a> {
    /// Resolve a path such as `*req.Account` or `~*opts.*ipsUsageID`.
    ///
    /// Keys containing dots are tried verbatim first, then as a nested
    /// path through JSON objects.
    pub fn field(&self, path: &str) -> Option<&'a Value> {
        let path = path.strip_prefix('~').unwrap_or(path);
        let (root, rest) = path.split_once('.')?;
        let map = match root {
            META_REQ => self.req,
            META_OPTS => self.opts,
            _ => return None,
        };
        if let Some(v) = map.get(rest) {
            return Some(v);
        }
        let mut segments = rest.split('.');
        let mut current = map.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Resolve a path to its string form
    pub fn field_as_string(&self, path: &str) -> Option<String> {
        self.field(path).map(value_as_string)
    }

    /// Every `*req.<field>` path present in the event, nested objects
    /// expanded when `nested` is set
    pub fn req_paths(&self, nested: bool) -> Vec<String> {
        let mut paths = Vec::with_capacity(self.req.len());
        for (key, value) in self.req.iter() {
            collect_paths(&format!("{}.{}", META_REQ, key), value, nested, &mut paths);
        }
        paths.sort();
        paths
    }
}

fn collect_paths(prefix: &str, value: &Value, nested: bool, out: &mut Vec<String>) {
    match value {
        Value::Object(obj) if nested => {
            for (k, v) in obj {
                collect_paths(&format!("{}.{}", prefix, k), v, nested, out);
            }
        }
        _ => out.push(prefix.to_string()),
    }
}

/// String form of a JSON value as used for matching and indexing
pub fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
