//! Filter indexes over IP profiles
//!
//! A profile is indexed under one `type:path:value` key per indexable rule
//! of its filters, or under `*none:*any:*any` when it has none. Matching an
//! event looks up every key the event can produce and unions the profile
//! IDs found. Candidates are only a superset; the caller still runs the
//! full filter pass.

use apolo_cache::keys::{filter_index_key, tenant_index_key};
use apolo_core::{
    config::{IpsConfig, CACHE_IP_FILTER_INDEXES},
    models::{
        EventView, Filter, IpProfile, META_ANY, META_EXISTS, META_NONE, META_NOT_EXISTS,
        META_PREFIX, META_REQ, META_STRING, META_SUFFIX,
    },
    AppError, AppResult,
};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, instrument};

use crate::manager::DataManager;

/// Which event fields feed the filter indexes
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// When false every profile of the tenant is a candidate
    pub indexed_selects: bool,
    pub string_fields: Option<Vec<String>>,
    pub prefix_fields: Option<Vec<String>>,
    pub suffix_fields: Option<Vec<String>>,
    pub exists_fields: Option<Vec<String>>,
    pub notexists_fields: Option<Vec<String>>,
    pub nested_fields: bool,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            indexed_selects: true,
            string_fields: None,
            prefix_fields: None,
            suffix_fields: None,
            exists_fields: None,
            notexists_fields: None,
            nested_fields: false,
        }
    }
}

impl From<&IpsConfig> for IndexSettings {
    fn from(cfg: &IpsConfig) -> Self {
        let normalize = |fields: &Option<Vec<String>>| {
            fields
                .as_ref()
                .map(|list| list.iter().map(|f| normalize_path(f)).collect())
        };
        Self {
            indexed_selects: cfg.indexed_selects,
            string_fields: normalize(&cfg.string_indexed_fields),
            prefix_fields: normalize(&cfg.prefix_indexed_fields),
            suffix_fields: normalize(&cfg.suffix_indexed_fields),
            exists_fields: normalize(&cfg.exists_indexed_fields),
            notexists_fields: normalize(&cfg.notexists_indexed_fields),
            nested_fields: cfg.nested_fields,
        }
    }
}

/// `Account`, `*req.Account` and `~*req.Account` all name the same field
fn normalize_path(field: &str) -> String {
    let field = field.strip_prefix('~').unwrap_or(field);
    if field.starts_with(&format!("{}.", META_REQ)) {
        field.to_string()
    } else {
        format!("{}.{}", META_REQ, field)
    }
}

impl IndexSettings {
    fn fields_for(&self, filter_type: &str) -> Option<&Vec<String>> {
        match filter_type {
            META_STRING => self.string_fields.as_ref(),
            META_PREFIX => self.prefix_fields.as_ref(),
            META_SUFFIX => self.suffix_fields.as_ref(),
            META_EXISTS => self.exists_fields.as_ref(),
            _ => self.notexists_fields.as_ref(),
        }
    }

    /// Whether a lookup for `filter_type` would ever consult `path`
    fn covers(&self, filter_type: &str, path: &str) -> bool {
        match self.fields_for(filter_type) {
            Some(list) => list.iter().any(|f| f == path),
            None if filter_type == META_NOT_EXISTS => false,
            None => {
                self.nested_fields
                    || path
                        .strip_prefix(META_REQ)
                        .and_then(|rest| rest.strip_prefix('.'))
                        .is_some_and(|field| !field.contains('.'))
            }
        }
    }
}

/// Every prefix of `value`, longest first
fn prefixes(value: &str) -> Vec<&str> {
    let mut out: Vec<&str> = value
        .char_indices()
        .skip(1)
        .map(|(i, _)| &value[..i])
        .collect();
    out.push(value);
    out.reverse();
    out
}

/// Every suffix of `value`, longest first
fn suffixes(value: &str) -> Vec<&str> {
    value.char_indices().map(|(i, _)| &value[i..]).collect()
}

impl DataManager {
    /// Index keys a profile is stored under
    ///
    /// # Errors
    ///
    /// Returns `AppError::BrokenReference` if a stored filter is missing
    pub async fn profile_index_keys(&self, profile: &IpProfile) -> AppResult<BTreeSet<String>> {
        let mut keys = BTreeSet::new();
        for filter_id in &profile.filter_ids {
            let filter = if Filter::is_inline(filter_id) {
                Filter::from_inline(&profile.tenant, filter_id)?
            } else {
                match self.get_filter(&profile.tenant, filter_id).await {
                    Ok(f) => (*f).clone(),
                    Err(e) if e.is_not_found() => {
                        return Err(AppError::BrokenReference(filter_id.clone()))
                    }
                    Err(e) => return Err(e),
                }
            };

            for rule in &filter.rules {
                let (kind, negated) = rule.kind();
                if negated {
                    continue;
                }
                let Some(path) = rule.element.strip_prefix('~') else {
                    continue;
                };
                if !path.starts_with(META_REQ) || !self.index.covers(&kind, path) {
                    continue;
                }
                match kind.as_str() {
                    META_STRING | META_PREFIX | META_SUFFIX => {
                        for value in rule.values.iter().filter(|v| !v.starts_with('~')) {
                            keys.insert(filter_index_key(&kind, path, value));
                        }
                    }
                    META_EXISTS => {
                        keys.insert(filter_index_key(META_EXISTS, path, META_ANY));
                    }
                    META_NOT_EXISTS => {
                        keys.insert(filter_index_key(META_NOT_EXISTS, path, META_NONE));
                    }
                    _ => {}
                }
            }
        }
        if keys.is_empty() {
            keys.insert(filter_index_key(META_NONE, META_ANY, META_ANY));
        }
        Ok(keys)
    }

    pub(crate) async fn add_profile_indexes(&self, profile: &IpProfile) -> AppResult<()> {
        let db = self.data_db()?;
        let ids = [profile.id.clone()];
        for key in self.profile_index_keys(profile).await? {
            db.add_index_items(&profile.tenant, &key, &ids).await?;
            self.cache()
                .remove(CACHE_IP_FILTER_INDEXES, &tenant_index_key(&profile.tenant, &key));
        }
        Ok(())
    }

    pub(crate) async fn remove_profile_indexes(&self, profile: &IpProfile) -> AppResult<()> {
        let db = self.data_db()?;
        let ids = [profile.id.clone()];
        for key in self.profile_index_keys(profile).await? {
            db.remove_index_items(&profile.tenant, &key, &ids).await?;
            self.cache()
                .remove(CACHE_IP_FILTER_INDEXES, &tenant_index_key(&profile.tenant, &key));
        }
        Ok(())
    }

    /// Index keys an event can hit
    pub fn event_index_keys(&self, ev: &EventView<'_>) -> Vec<String> {
        let settings = &self.index;
        let all_paths = ev.req_paths(settings.nested_fields);
        let paths_for = |filter_type: &str| -> Vec<String> {
            settings
                .fields_for(filter_type)
                .cloned()
                .unwrap_or_else(|| all_paths.clone())
        };

        let mut keys = Vec::new();
        for path in paths_for(META_STRING) {
            if let Some(value) = ev.field_as_string(&path) {
                keys.push(filter_index_key(META_STRING, &path, &value));
            }
        }
        for path in paths_for(META_PREFIX) {
            if let Some(value) = ev.field_as_string(&path) {
                for prefix in prefixes(&value) {
                    keys.push(filter_index_key(META_PREFIX, &path, prefix));
                }
            }
        }
        for path in paths_for(META_SUFFIX) {
            if let Some(value) = ev.field_as_string(&path) {
                for suffix in suffixes(&value) {
                    keys.push(filter_index_key(META_SUFFIX, &path, suffix));
                }
            }
        }
        for path in paths_for(META_EXISTS) {
            if ev.field(&path).is_some() {
                keys.push(filter_index_key(META_EXISTS, &path, META_ANY));
            }
        }
        if let Some(fields) = &settings.notexists_fields {
            for path in fields {
                if ev.field(path).is_none() {
                    keys.push(filter_index_key(META_NOT_EXISTS, path, META_NONE));
                }
            }
        }
        keys.push(filter_index_key(META_NONE, META_ANY, META_ANY));
        keys
    }

    /// Candidate profile IDs for an event
    ///
    /// Callers serialize this against index updates with the tenant's
    /// index lock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` when no profile can match
    #[instrument(skip(self, ev))]
    pub async fn matching_ip_profile_ids(
        &self,
        tenant: &str,
        ev: &EventView<'_>,
    ) -> AppResult<HashSet<String>> {
        let db = self.data_db()?;
        let mut ids = HashSet::new();

        if !self.index.indexed_selects {
            ids.extend(db.ip_profile_ids(tenant).await?);
        } else {
            for key in self.event_index_keys(ev) {
                let cache_key = tenant_index_key(tenant, &key);
                let items = match self
                    .cache()
                    .get::<Option<HashSet<String>>>(CACHE_IP_FILTER_INDEXES, &cache_key)
                {
                    Some(items) => items,
                    None => {
                        let items = db.get_index(tenant, &key).await?;
                        self.cache()
                            .set(CACHE_IP_FILTER_INDEXES, &cache_key, items.clone())?;
                        items
                    }
                };
                if let Some(items) = items {
                    ids.extend(items);
                }
            }
        }

        if ids.is_empty() {
            return Err(AppError::NotFound(format!(
                "no IP profile candidates for tenant {}",
                tenant
            )));
        }
        debug!("Found {} IP profile candidates", ids.len());
        Ok(ids)
    }
}
