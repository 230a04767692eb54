//! Pool selection for a matched profile

use apolo_core::{
    models::{EventView, IpPool},
    traits::FilterService,
    AppError, AppResult,
};
use tracing::debug;

use crate::filters::{blocker_from_dynamics, weight_from_dynamics};

/// IDs of the pools applying to the event, heaviest first
///
/// Pools whose filters fail are skipped. Selection stops after the first
/// pool (in weight order) whose blocker is set.
///
/// # Errors
///
/// Returns `AppError::NotFound` when no pool applies; filter, weight and
/// blocker evaluation errors abort the selection
pub async fn sorted_pool_ids(
    fs: &dyn FilterService,
    tenant: &str,
    pools: &[IpPool],
    ev: &EventView<'_>,
) -> AppResult<Vec<String>> {
    let mut selected: Vec<(String, f64, bool)> = Vec::with_capacity(pools.len());
    for pool in pools {
        if !fs.pass(tenant, &pool.filter_ids, ev).await? {
            continue;
        }
        let weight = weight_from_dynamics(fs, tenant, &pool.weights, ev).await?;
        let blocker = blocker_from_dynamics(fs, tenant, &pool.blockers, ev).await?;
        selected.push((pool.id.clone(), weight, blocker));
    }
    if selected.is_empty() {
        return Err(AppError::NotFound("no IP pool matched".to_string()));
    }

    selected.sort_by(|a, b| b.1.total_cmp(&a.1));
    if let Some(pos) = selected.iter().position(|(_, _, blocker)| *blocker) {
        selected.truncate(pos + 1);
    }
    debug!("Selected pools: {:?}", selected);
    Ok(selected.into_iter().map(|(id, _, _)| id).collect())
}
