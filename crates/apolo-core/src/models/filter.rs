//! Filter definitions consumed by profile matching and indexing

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::AppResult;

pub const META_STRING: &str = "*string";
pub const META_PREFIX: &str = "*prefix";
pub const META_SUFFIX: &str = "*suffix";
pub const META_EXISTS: &str = "*exists";
pub const META_NOT_EXISTS: &str = "*notexists";
pub const META_EMPTY: &str = "*empty";
pub const META_GT: &str = "*gt";
pub const META_GTE: &str = "*gte";
pub const META_LT: &str = "*lt";
pub const META_LTE: &str = "*lte";
pub const META_NONE: &str = "*none";
pub const META_ANY: &str = "*any";

/// Negated form prefix, e.g. `*notstring`
pub const NOT_PREFIX: &str = "*not";

/// Rule types that produce index entries
pub const INDEXABLE_TYPES: [&str; 5] = [
    META_STRING,
    META_PREFIX,
    META_SUFFIX,
    META_EXISTS,
    META_NOT_EXISTS,
];

/// Stored filter: a conjunction of rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(rename = "Tenant")]
    pub tenant: String,

    #[serde(rename = "ID")]
    pub id: String,

    #[serde(rename = "Rules", default)]
    pub rules: Vec<FilterRule>,
}

/// Single predicate of a filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterRule {
    #[serde(rename = "Type")]
    pub rule_type: String,

    /// Path the rule reads, e.g. `~*req.Account`
    #[serde(rename = "Element")]
    pub element: String,

    #[serde(rename = "Values", default)]
    pub values: Vec<String>,
}

impl Filter {
    /// Whether a filter ID is written inline rather than referencing a stored filter
    pub fn is_inline(filter_id: &str) -> bool {
        filter_id.starts_with('*')
    }

    /// Parse an inline filter such as `*string:~*req.Account:1001|1002`
    pub fn from_inline(tenant: &str, inline: &str) -> AppResult<Self> {
        let parts: Vec<&str> = inline.splitn(3, ':').collect();
        if parts.len() != 3 {
            return Err(AppError::FilterParse(format!(
                "inline parse error for string: <{}>",
                inline
            )));
        }
        let values = if parts[2].is_empty() {
            Vec::new()
        } else {
            parts[2].split('|').map(str::to_string).collect()
        };
        let rule = FilterRule {
            rule_type: parts[0].to_string(),
            element: parts[1].to_string(),
            values,
        };
        rule.check()?;
        Ok(Self {
            tenant: tenant.to_string(),
            id: inline.to_string(),
            rules: vec![rule],
        })
    }
}

impl FilterRule {
    /// Positive form of the rule type and whether it is negated
    pub fn kind(&self) -> (String, bool) {
        if self.rule_type == META_NOT_EXISTS {
            return (META_NOT_EXISTS.to_string(), false);
        }
        match self.rule_type.strip_prefix(NOT_PREFIX) {
            Some(rest) if !rest.is_empty() => (format!("*{}", rest), true),
            _ => (self.rule_type.clone(), false),
        }
    }

    /// Reject unknown rule types and value-less comparisons
    pub fn check(&self) -> AppResult<()> {
        let (kind, _) = self.kind();
        let needs_values = match kind.as_str() {
            META_STRING | META_PREFIX | META_SUFFIX | META_GT | META_GTE | META_LT | META_LTE => {
                true
            }
            META_EXISTS | META_NOT_EXISTS | META_EMPTY => false,
            other => {
                return Err(AppError::FilterParse(format!(
                    "unsupported filter type: <{}>",
                    other
                )))
            }
        };
        if self.element.is_empty() {
            return Err(AppError::FilterParse(format!(
                "empty element for filter type: <{}>",
                self.rule_type
            )));
        }
        if needs_values && self.values.is_empty() {
            return Err(AppError::FilterParse(format!(
                "values missing for filter type: <{}>",
                self.rule_type
            )));
        }
        Ok(())
    }
}
