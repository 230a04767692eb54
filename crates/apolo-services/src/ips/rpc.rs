//! RPC entry points of the IP service

use apolo_cache::keys::{ip_allocations_lock_key, rpc_cache_key};
use apolo_core::{
    config::CACHE_RPC_RESPONSES,
    models::{
        CgrEvent, ClearIpAllocationsArgs, EventView, IpAllocations, IpPool, IpUsage, TenantId,
    },
    AppError, AppResult, OK,
};
use std::future::Future;
use std::net::IpAddr;
use tracing::{debug, instrument, warn};

use super::ledger::{unlock_all, LockedAllocations, LockedProfile};
use super::pools::sorted_pool_ids;
use super::strategy::{pool_range, strategy_for};
use super::IpService;
use crate::constants::{
    IPS_V1_ALLOCATE_IPS, IPS_V1_AUTHORIZE_IPS, IPS_V1_GET_IPS_FOR_EVENT, IPS_V1_RELEASE_IPS,
};
use crate::opts::{resolve_call_opts, CallOpts};

/// Address picked for a usage on one ledger
struct Lease {
    pool_id: String,
    address: IpAddr,
    message: Option<String>,
}

impl Lease {
    fn new(pool: &IpPool, address: IpAddr) -> Self {
        Self {
            pool_id: pool.id.clone(),
            address,
            message: (!pool.message.is_empty()).then(|| pool.message.clone()),
        }
    }
}

impl IpService {
    /// Replay or populate the response cache around `call`
    ///
    /// The guard lock on the cache key makes concurrent identical requests
    /// execute once.
    async fn cached_call<T, F>(
        &self,
        method: &str,
        tenant: &str,
        event_id: &str,
        call: F,
    ) -> AppResult<T>
    where
        T: Clone + Send + Sync + 'static,
        F: Future<Output = AppResult<T>>,
    {
        let cache = self.dm.cache();
        if !cache.is_enabled(CACHE_RPC_RESPONSES) {
            return call.await;
        }

        let key = rpc_cache_key(method, tenant, event_id);
        let lock = self.guardian.lock(&[key.clone()]).await?;
        if let Some(cached) = cache.get::<AppResult<T>>(CACHE_RPC_RESPONSES, &key) {
            self.guardian.unlock(&lock);
            debug!("Replaying cached response for {}", key);
            return cached;
        }

        let result = call.await;
        if let Err(e) = cache.set(CACHE_RPC_RESPONSES, &key, result.clone()) {
            warn!("<IPs> failed caching response for {}: {}", key, e);
        }
        self.guardian.unlock(&lock);
        result
    }

    async fn call_opts(&self, tenant: &str, ev: &CgrEvent) -> AppResult<CallOpts> {
        resolve_call_opts(self.fs.as_ref(), &self.cfg.opts, tenant, ev).await
    }

    /// Address a usage would get on a ledger
    ///
    /// A ledger whose profile declares no pools leases units only and gets
    /// `None`. An address already held by the same usage is handed out again.
    ///
    /// # Errors
    ///
    /// Returns `AppError::PoolExhausted` when every selected pool is full
    async fn select_address(
        &self,
        tenant: &str,
        allocs: &LockedAllocations,
        usage_id: &str,
        view: &EventView<'_>,
    ) -> AppResult<Option<Lease>> {
        let profile = allocs.profile.profile.clone();
        if profile.pools.is_empty() {
            return Ok(None);
        }

        let previous = allocs.usage(usage_id);
        if let Some(IpUsage {
            pool_id: Some(pool_id),
            address: Some(address),
            ..
        }) = &previous
        {
            if let Some(pool) = profile.pool(pool_id) {
                if pool_range(pool)?.contains(address) {
                    return Ok(Some(Lease::new(pool, *address)));
                }
            }
        }

        for pool_id in sorted_pool_ids(self.fs.as_ref(), tenant, &profile.pools, view).await? {
            let Some(pool) = profile.pool(&pool_id) else {
                continue;
            };
            let range = pool_range(pool)?;
            let in_use = allocs.allocs.lock().addresses_in_pool(&pool_id);
            if let Some(address) = strategy_for(pool.strategy).next_free(&range, &in_use) {
                debug!(
                    "Pool {} offers {} for {} ({})",
                    pool_id, address, usage_id, pool.message
                );
                return Ok(Some(Lease::new(pool, address)));
            }
        }
        Err(AppError::PoolExhausted(profile.tenant_id()))
    }

    /// Ledgers of every profile matching the event, as currently recorded
    #[instrument(skip(self, ev), fields(event = %ev.id))]
    pub async fn v1_get_ips_for_event(&self, ev: &CgrEvent) -> AppResult<Vec<IpAllocations>> {
        ev.check_mandatory()?;
        let tenant = self.tenant_or_default(&ev.tenant).to_string();
        self.cached_call(IPS_V1_GET_IPS_FOR_EVENT, &tenant, &ev.id, async {
            let opts = self.call_opts(&tenant, ev).await?;
            let mut matched = self
                .matching_allocations_for_event(&tenant, ev, &opts.usage_id, opts.ttl)
                .await?;
            let reply: Vec<IpAllocations> = matched.iter().map(|a| a.snapshot()).collect();
            unlock_all(&mut matched, &self.guardian);
            Ok(reply)
        })
        .await
    }

    /// Check that every matched ledger could lease an address for the usage
    ///
    /// # Errors
    ///
    /// Returns `AppError::IpUnauthorized` when some ledger has no free address
    #[instrument(skip(self, ev), fields(event = %ev.id))]
    pub async fn v1_authorize_ips(&self, ev: &CgrEvent) -> AppResult<String> {
        ev.check_mandatory()?;
        let tenant = self.tenant_or_default(&ev.tenant).to_string();
        self.cached_call(IPS_V1_AUTHORIZE_IPS, &tenant, &ev.id, async {
            let opts = self.call_opts(&tenant, ev).await?;
            let mut matched = self
                .matching_allocations_for_event(&tenant, ev, &opts.usage_id, opts.ttl)
                .await?;
            let view = ev.view();

            let mut result = Ok(OK.to_string());
            for allocs in matched.iter_mut() {
                allocs.remove_expired_units();
                match self.select_address(&tenant, allocs, &opts.usage_id, &view).await {
                    Ok(_) => {}
                    Err(AppError::PoolExhausted(id)) => {
                        debug!("No free address on {} for {}", id, opts.usage_id);
                        result = Err(AppError::IpUnauthorized);
                        break;
                    }
                    Err(e) => {
                        result = Err(e);
                        break;
                    }
                }
            }
            unlock_all(&mut matched, &self.guardian);
            result
        })
        .await
    }

    /// Lease an address for the usage on every matched ledger
    ///
    /// An existing usage with the same ID is replaced. When a ledger fails,
    /// usages recorded on earlier ledgers in this call are rolled back.
    #[instrument(skip(self, ev), fields(event = %ev.id))]
    pub async fn v1_allocate_ips(&self, ev: &CgrEvent) -> AppResult<String> {
        ev.check_mandatory()?;
        let tenant = self.tenant_or_default(&ev.tenant).to_string();
        self.cached_call(IPS_V1_ALLOCATE_IPS, &tenant, &ev.id, async {
            let opts = self.call_opts(&tenant, ev).await?;
            let mut matched = self
                .matching_allocations_for_event(&tenant, ev, &opts.usage_id, opts.ttl)
                .await?;
            let view = ev.view();

            let mut recorded: Vec<(usize, Option<IpUsage>)> = Vec::with_capacity(matched.len());
            let mut failure = None;
            for (i, allocs) in matched.iter_mut().enumerate() {
                allocs.remove_expired_units();
                let lease = match self
                    .select_address(&tenant, allocs, &opts.usage_id, &view)
                    .await
                {
                    Ok(lease) => lease,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                };

                let previous = allocs.usage(&opts.usage_id);
                if previous.is_some() {
                    if let Err(e) = allocs.clear_usage(&opts.usage_id) {
                        failure = Some(e);
                        break;
                    }
                }
                let mut usage = IpUsage::new(&tenant, &opts.usage_id, opts.units);
                if let Some(lease) = lease {
                    usage.pool_id = Some(lease.pool_id);
                    usage.address = Some(lease.address);
                    usage.message = lease.message;
                }
                if let Err(e) = allocs.record_usage(&usage) {
                    if let Some(previous) = previous {
                        allocs.restore_usage(previous);
                    }
                    failure = Some(e);
                    break;
                }
                debug!(
                    "Recorded usage {} on {}, total {}",
                    opts.usage_id,
                    allocs.tenant_id(),
                    allocs.total_usage()
                );
                recorded.push((i, previous));
            }

            if let Some(e) = failure {
                for (i, previous) in recorded.into_iter().rev() {
                    let allocs = &mut matched[i];
                    if let Err(err) = allocs.clear_usage(&opts.usage_id) {
                        warn!(
                            "<IPs> rollback of {} on {} failed: {}",
                            opts.usage_id,
                            allocs.tenant_id(),
                            err
                        );
                    }
                    if let Some(previous) = previous {
                        allocs.restore_usage(previous);
                    }
                }
                unlock_all(&mut matched, &self.guardian);
                return Err(e);
            }

            let stored = self.backup.store_matched(&mut matched).await;
            unlock_all(&mut matched, &self.guardian);
            stored.map(|_| OK.to_string())
        })
        .await
    }

    /// Clear the usage from every matched ledger
    #[instrument(skip(self, ev), fields(event = %ev.id))]
    pub async fn v1_release_ips(&self, ev: &CgrEvent) -> AppResult<String> {
        ev.check_mandatory()?;
        let tenant = self.tenant_or_default(&ev.tenant).to_string();
        self.cached_call(IPS_V1_RELEASE_IPS, &tenant, &ev.id, async {
            let opts = self.call_opts(&tenant, ev).await?;
            let mut matched = self
                .matching_allocations_for_event(&tenant, ev, &opts.usage_id, opts.ttl)
                .await?;

            for allocs in matched.iter_mut() {
                if let Err(e) = allocs.clear_usage(&opts.usage_id) {
                    warn!(
                        "<IPs> cannot release usage {} on {}: {}",
                        opts.usage_id,
                        allocs.tenant_id(),
                        e
                    );
                }
            }

            let stored = self.backup.store_matched(&mut matched).await;
            unlock_all(&mut matched, &self.guardian);
            stored.map(|_| OK.to_string())
        })
        .await
    }

    /// Ledger of one profile
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the profile does not exist
    #[instrument(skip(self, arg), fields(id = %arg.id))]
    pub async fn v1_get_ip(&self, arg: &TenantId) -> AppResult<IpAllocations> {
        arg.check_mandatory()?;
        let tenant = self.tenant_or_default(&arg.tenant);
        let lock = self
            .guardian
            .lock(&[ip_allocations_lock_key(tenant, &arg.id)])
            .await?;

        let result = self.load_ledger(tenant, &arg.id).await;
        self.guardian.unlock(&lock);
        result
    }

    async fn load_ledger(&self, tenant: &str, id: &str) -> AppResult<IpAllocations> {
        self.dm.get_ip_profile(tenant, id).await?;
        let shared = self.dm.get_ip_allocations(tenant, id).await?;
        let snapshot = shared.lock().clone();
        Ok(snapshot)
    }

    /// Remove usages from one ledger and store it synchronously
    ///
    /// Either every listed usage is removed or none is. An empty list
    /// removes all of them.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UsagesNotFound` listing the IDs the ledger lacks
    #[instrument(skip(self, args), fields(id = %args.id))]
    pub async fn v1_clear_ip_allocations(
        &self,
        args: &ClearIpAllocationsArgs,
    ) -> AppResult<String> {
        args.check_mandatory()?;
        let tenant = self.tenant_or_default(&args.tenant);
        let lock = self
            .guardian
            .lock(&[ip_allocations_lock_key(tenant, &args.id)])
            .await?;

        let result = self.clear_ledger(tenant, args).await;
        self.guardian.unlock(&lock);
        result
    }

    async fn clear_ledger(
        &self,
        tenant: &str,
        args: &ClearIpAllocationsArgs,
    ) -> AppResult<String> {
        let profile = self.dm.get_ip_profile(tenant, &args.id).await?;
        let shared = self.dm.get_ip_allocations(tenant, &args.id).await?;
        let mut allocs = LockedAllocations::new(
            shared,
            None,
            LockedProfile::new(profile.clone(), None),
            profile.ttl,
        );

        let ids: Vec<String> = if args.allocation_ids.is_empty() {
            let mut all: Vec<String> = allocs.allocs.lock().usages.keys().cloned().collect();
            all.sort();
            all
        } else {
            let mut requested = args.allocation_ids.clone();
            requested.sort();
            requested.dedup();
            let recorded = allocs.allocs.lock();
            let missing: Vec<String> = requested
                .iter()
                .filter(|id| !recorded.usages.contains_key(*id))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(AppError::UsagesNotFound(missing));
            }
            requested
        };

        for id in &ids {
            allocs.clear_usage(id)?;
        }
        allocs.dirty = Some(true);
        self.backup.store_ledger(&mut allocs).await?;
        debug!("Cleared {} usages from {}", ids.len(), allocs.tenant_id());
        Ok(OK.to_string())
    }
}
