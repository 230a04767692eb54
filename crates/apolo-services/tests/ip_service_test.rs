//! Integration tests for the IP service
//!
//! These tests run the full matching and leasing pipeline against the
//! in-memory store.

#[cfg(test)]
mod tests {
    use apolo_cache::keys::{ip_allocations_lock_key, ip_profile_lock_key};
    use apolo_cache::MemoryCache;
    use apolo_core::{
        config::{AppConfig, PartitionConfig, CACHE_EVENT_IPS, CACHE_RPC_RESPONSES},
        models::{
            CgrEvent, ClearIpAllocationsArgs, DynamicWeight, Filter, FilterRule, IpPool,
            IpProfile, LeaseTtl, TenantId,
        },
        traits::DataDb,
        AppError,
    };
    use apolo_db::{DataManager, IndexSettings, InternalDb};
    use apolo_services::constants::{OPTS_IPS_TTL, OPTS_IPS_UNITS, OPTS_IPS_USAGE_ID};
    use apolo_services::{FilterS, Guardian, IpService};
    use std::sync::Arc;
    use std::time::Duration;

    const TENANT: &str = "cgrates.org";

    fn service_with(cfg: AppConfig) -> (IpService, Arc<InternalDb>) {
        let db = Arc::new(InternalDb::new());
        let cache = Arc::new(MemoryCache::new(&cfg.caches));
        let dm = DataManager::new(Some(db.clone()), cache, IndexSettings::from(&cfg.ips));
        let fs = Arc::new(FilterS::new(dm.clone()));
        let guardian = Arc::new(Guardian::new(cfg.general.locking_timeout()));
        (IpService::new(cfg.general, cfg.ips, dm, fs, guardian), db)
    }

    fn service(store_interval_ms: i64) -> (IpService, Arc<InternalDb>) {
        let mut cfg = AppConfig::default();
        cfg.ips.store_interval_ms = store_interval_ms;
        service_with(cfg)
    }

    fn profile(id: &str, account: &str, range: Option<&str>) -> IpProfile {
        let mut prfl = IpProfile::new(TENANT, id);
        prfl.filter_ids = vec![format!("*string:~*req.Account:{}", account)];
        prfl.weights = vec![DynamicWeight::new(10.0)];
        prfl.stored = true;
        if let Some(range) = range {
            prfl.pools = vec![IpPool::new("POOL1", range)];
        }
        prfl
    }

    fn event(id: &str, account: &str, usage_id: &str) -> CgrEvent {
        CgrEvent::new(TENANT, id)
            .with_field("Account", account)
            .with_opt(OPTS_IPS_USAGE_ID, usage_id)
    }

    async fn ledger(svc: &IpService, id: &str) -> apolo_core::models::IpAllocations {
        svc.v1_get_ip(&TenantId::new(TENANT, id)).await.unwrap()
    }

    #[tokio::test]
    async fn test_single_profile_matched_and_unlocked() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", Some("192.168.122.0/30")))
            .await
            .unwrap();
        svc.set_ip_profile(profile("IPs2", "1002", Some("192.168.123.0/30")))
            .await
            .unwrap();

        let reply = svc
            .v1_get_ips_for_event(&event("ev1", "1001", "u1"))
            .await
            .unwrap();
        assert_eq!(reply.len(), 1);
        assert_eq!(reply[0].tenant_id(), "cgrates.org:IPs1");
        assert_eq!(svc.guardian().held_count(), 0);
        assert_eq!(svc.guardian().key_count(), 0);
    }

    #[tokio::test]
    async fn test_stored_filter_reference_matches() {
        let (svc, _) = service(0);
        svc.set_filter(Filter {
            tenant: TENANT.to_string(),
            id: "FLTR_ACC_1001".to_string(),
            rules: vec![FilterRule {
                rule_type: "*string".to_string(),
                element: "~*req.Account".to_string(),
                values: vec!["1001".to_string()],
            }],
        })
        .await
        .unwrap();
        let mut prfl = profile("IPs1", "1001", None);
        prfl.filter_ids = vec!["FLTR_ACC_1001".to_string()];
        svc.set_ip_profile(prfl).await.unwrap();

        let reply = svc
            .v1_get_ips_for_event(&event("ev1", "1001", "u1"))
            .await
            .unwrap();
        assert_eq!(reply.len(), 1);
        assert!(svc
            .v1_get_ips_for_event(&event("ev2", "1002", "u2"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_results_sorted_by_weight() {
        let (svc, _) = service(0);
        let mut light = profile("IPsLight", "1001", None);
        light.weights = vec![DynamicWeight::new(10.0)];
        let mut heavy = profile("IPsHeavy", "1001", None);
        heavy.weights = vec![DynamicWeight::new(20.0)];
        svc.set_ip_profile(light).await.unwrap();
        svc.set_ip_profile(heavy).await.unwrap();

        let reply = svc
            .v1_get_ips_for_event(&event("ev1", "1001", "u1"))
            .await
            .unwrap();
        let ids: Vec<&str> = reply.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["IPsHeavy", "IPsLight"]);
    }

    #[tokio::test]
    async fn test_allocate_units_with_unlimited_ttl() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", Some("192.168.122.0/30")))
            .await
            .unwrap();

        let ev = event("ev1", "1001", "u1")
            .with_opt(OPTS_IPS_UNITS, 5)
            .with_opt(OPTS_IPS_TTL, -1);
        assert_eq!(svc.v1_allocate_ips(&ev).await.unwrap(), "OK");

        let allocs = ledger(&svc, "IPs1").await;
        let usage = &allocs.usages["u1"];
        assert_eq!(usage.units, 5.0);
        assert!(usage.expiry_time.is_none());
        assert!(allocs.ttl_idx.is_empty());
        assert_eq!(usage.pool_id.as_deref(), Some("POOL1"));
        assert_eq!(usage.address, Some("192.168.122.1".parse().unwrap()));
        assert_eq!(svc.guardian().held_count(), 0);
    }

    #[tokio::test]
    async fn test_allocate_refreshes_existing_usage() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", Some("192.168.122.0/30")))
            .await
            .unwrap();

        svc.v1_allocate_ips(&event("ev1", "1001", "u1")).await.unwrap();
        svc.v1_allocate_ips(&event("ev2", "1001", "u1").with_opt(OPTS_IPS_UNITS, 2))
            .await
            .unwrap();

        let allocs = ledger(&svc, "IPs1").await;
        assert_eq!(allocs.usages.len(), 1);
        assert_eq!(allocs.usages["u1"].units, 2.0);
        assert_eq!(
            allocs.usages["u1"].address,
            Some("192.168.122.1".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_pool_exhaustion_and_release() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", Some("192.168.122.0/30")))
            .await
            .unwrap();

        svc.v1_allocate_ips(&event("ev1", "1001", "u1")).await.unwrap();
        svc.v1_allocate_ips(&event("ev2", "1001", "u2")).await.unwrap();

        assert_eq!(
            svc.v1_authorize_ips(&event("ev3", "1001", "u3")).await,
            Err(AppError::IpUnauthorized)
        );
        assert_eq!(
            svc.v1_allocate_ips(&event("ev4", "1001", "u3")).await,
            Err(AppError::PoolExhausted("cgrates.org:IPs1".to_string()))
        );
        assert_eq!(
            svc.v1_authorize_ips(&event("ev5", "1001", "u1")).await,
            Ok("OK".to_string())
        );

        svc.v1_release_ips(&event("ev6", "1001", "u1")).await.unwrap();
        assert_eq!(
            svc.v1_authorize_ips(&event("ev7", "1001", "u3")).await,
            Ok("OK".to_string())
        );
        svc.v1_allocate_ips(&event("ev8", "1001", "u3")).await.unwrap();

        let allocs = ledger(&svc, "IPs1").await;
        assert!(!allocs.usages.contains_key("u1"));
        assert_eq!(
            allocs.usages["u3"].address,
            Some("192.168.122.1".parse().unwrap())
        );
        assert_eq!(svc.guardian().held_count(), 0);
    }

    #[tokio::test]
    async fn test_release_unknown_usage_still_ok() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", None)).await.unwrap();
        assert_eq!(
            svc.v1_release_ips(&event("ev1", "1001", "missing")).await,
            Ok("OK".to_string())
        );
    }

    #[tokio::test]
    async fn test_expired_usage_evicted_on_next_allocation() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", Some("192.168.122.0/30")))
            .await
            .unwrap();

        svc.v1_allocate_ips(&event("ev1", "1001", "u1").with_opt(OPTS_IPS_TTL, "50ms"))
            .await
            .unwrap();
        svc.v1_allocate_ips(&event("ev2", "1001", "u2").with_opt(OPTS_IPS_TTL, "1h"))
            .await
            .unwrap();
        assert_eq!(ledger(&svc, "IPs1").await.ttl_idx, vec!["u1", "u2"]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        svc.v1_allocate_ips(&event("ev3", "1001", "u3").with_opt(OPTS_IPS_TTL, "1h"))
            .await
            .unwrap();

        let allocs = ledger(&svc, "IPs1").await;
        assert!(!allocs.usages.contains_key("u1"));
        assert_eq!(allocs.ttl_idx, vec!["u2", "u3"]);
        assert_eq!(
            allocs.usages["u3"].address,
            Some("192.168.122.1".parse().unwrap())
        );
    }

    #[tokio::test]
    async fn test_ttl_zero_on_profile_records_nothing() {
        let (svc, _) = service(0);
        let mut prfl = profile("IPs1", "1001", None);
        prfl.ttl = LeaseTtl::Disabled;
        svc.set_ip_profile(prfl).await.unwrap();

        svc.v1_allocate_ips(&event("ev1", "1001", "u1")).await.unwrap();
        assert!(ledger(&svc, "IPs1").await.usages.is_empty());
    }

    #[tokio::test]
    async fn test_empty_pools_lease_units_only() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", None)).await.unwrap();

        assert_eq!(
            svc.v1_authorize_ips(&event("ev1", "1001", "u1")).await,
            Ok("OK".to_string())
        );
        svc.v1_allocate_ips(&event("ev2", "1001", "u1").with_opt(OPTS_IPS_UNITS, 3))
            .await
            .unwrap();

        let usage = &ledger(&svc, "IPs1").await.usages["u1"];
        assert_eq!(usage.units, 3.0);
        assert!(usage.address.is_none());
        assert!(usage.pool_id.is_none());
    }

    #[tokio::test]
    async fn test_unmatched_event_not_found_until_profile_added() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", None)).await.unwrap();

        let ev = event("ev1", "9999", "u1");
        assert!(svc.v1_get_ips_for_event(&ev).await.unwrap_err().is_not_found());
        assert!(svc.v1_get_ips_for_event(&ev).await.unwrap_err().is_not_found());

        svc.set_ip_profile(profile("IPs9", "9999", None)).await.unwrap();
        assert_eq!(svc.v1_get_ips_for_event(&ev).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mandatory_fields() {
        let (svc, _) = service(0);
        let no_id = CgrEvent::new(TENANT, "").with_field("Account", "1001");
        assert!(matches!(
            svc.v1_allocate_ips(&no_id).await,
            Err(AppError::MandatoryIeMissing(_))
        ));

        let no_usage = CgrEvent::new(TENANT, "ev1").with_field("Account", "1001");
        assert_eq!(
            svc.v1_allocate_ips(&no_usage).await,
            Err(AppError::MandatoryIeMissing(vec!["UsageID".to_string()]))
        );

        assert!(matches!(
            svc.v1_get_ip(&TenantId::new(TENANT, "")).await,
            Err(AppError::MandatoryIeMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_default_tenant_applied() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", None)).await.unwrap();

        let ev = CgrEvent::new("", "ev1")
            .with_field("Account", "1001")
            .with_opt(OPTS_IPS_USAGE_ID, "u1");
        assert_eq!(svc.v1_get_ips_for_event(&ev).await.unwrap().len(), 1);
        assert!(svc.v1_get_ip(&TenantId::new("", "IPs1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_get_ip_unknown_profile() {
        let (svc, _) = service(0);
        assert!(svc
            .v1_get_ip(&TenantId::new(TENANT, "IPs404"))
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_clear_ip_allocations() {
        let (svc, db) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", Some("192.168.122.0/29")))
            .await
            .unwrap();
        for (ev, usage) in [("ev1", "u1"), ("ev2", "u2"), ("ev3", "u3")] {
            svc.v1_allocate_ips(&event(ev, "1001", usage)).await.unwrap();
        }

        let mut args = ClearIpAllocationsArgs {
            tenant: TENANT.to_string(),
            id: "IPs1".to_string(),
            allocation_ids: vec!["u1".to_string(), "u9".to_string()],
            ..Default::default()
        };
        assert_eq!(
            svc.v1_clear_ip_allocations(&args).await,
            Err(AppError::UsagesNotFound(vec!["u9".to_string()]))
        );
        assert_eq!(ledger(&svc, "IPs1").await.usages.len(), 3);

        args.allocation_ids = vec!["u1".to_string()];
        svc.v1_clear_ip_allocations(&args).await.unwrap();
        let stored = db.get_ip_allocations(TENANT, "IPs1").await.unwrap().unwrap();
        assert_eq!(stored.usages.len(), 2);

        args.allocation_ids.clear();
        svc.v1_clear_ip_allocations(&args).await.unwrap();
        assert!(ledger(&svc, "IPs1").await.usages.is_empty());
        let stored = db.get_ip_allocations(TENANT, "IPs1").await.unwrap().unwrap();
        assert!(stored.usages.is_empty());
    }

    #[tokio::test]
    async fn test_synchronous_store_persists_on_allocate() {
        let (svc, db) = service(-1);
        svc.set_ip_profile(profile("IPs1", "1001", Some("192.168.122.0/30")))
            .await
            .unwrap();

        svc.v1_allocate_ips(&event("ev1", "1001", "u1")).await.unwrap();
        let stored = db.get_ip_allocations(TENANT, "IPs1").await.unwrap().unwrap();
        assert!(stored.usages.contains_key("u1"));
    }

    #[tokio::test]
    async fn test_disabled_store_keeps_ledger_in_memory() {
        let (svc, db) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", None)).await.unwrap();

        svc.v1_allocate_ips(&event("ev1", "1001", "u1")).await.unwrap();
        let stored = db.get_ip_allocations(TENANT, "IPs1").await.unwrap().unwrap();
        assert!(stored.usages.is_empty());
        assert!(ledger(&svc, "IPs1").await.usages.contains_key("u1"));
    }

    #[tokio::test]
    async fn test_batched_store_flushes_on_shutdown() {
        let (svc, db) = service(60_000);
        svc.start();
        svc.set_ip_profile(profile("IPs1", "1001", None)).await.unwrap();

        svc.v1_allocate_ips(&event("ev1", "1001", "u1")).await.unwrap();
        assert_eq!(svc.backup().pending_keys(), vec!["cgrates.org:IPs1"]);
        let stored = db.get_ip_allocations(TENANT, "IPs1").await.unwrap().unwrap();
        assert!(stored.usages.is_empty());

        svc.shutdown().await;
        assert!(svc.backup().pending_keys().is_empty());
        let stored = db.get_ip_allocations(TENANT, "IPs1").await.unwrap().unwrap();
        assert!(stored.usages.contains_key("u1"));
    }

    #[tokio::test]
    async fn test_concurrent_allocations_keep_locks_balanced() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", Some("10.0.0.0/28")))
            .await
            .unwrap();
        let svc = Arc::new(svc);

        let calls = (0..10).map(|i| {
            let svc = svc.clone();
            async move {
                svc.v1_allocate_ips(&event(&format!("ev{}", i), "1001", &format!("u{}", i)))
                    .await
            }
        });
        for result in futures::future::join_all(calls).await {
            assert_eq!(result, Ok("OK".to_string()));
        }

        let allocs = ledger(&svc, "IPs1").await;
        assert_eq!(allocs.usages.len(), 10);
        assert_eq!(allocs.addresses_in_pool("POOL1").len(), 10);
        assert_eq!(svc.guardian().held_count(), 0);
        assert_eq!(svc.guardian().key_count(), 0);
    }

    #[tokio::test]
    async fn test_rpc_responses_replayed() {
        let mut cfg = AppConfig::default();
        cfg.caches
            .partitions
            .insert(CACHE_RPC_RESPONSES.to_string(), PartitionConfig::new(-1, 60, false));
        let (svc, _) = service_with(cfg);
        svc.set_ip_profile(profile("IPs1", "1001", Some("192.168.122.0/30")))
            .await
            .unwrap();

        let ev = event("ev1", "1001", "u1");
        svc.v1_allocate_ips(&ev).await.unwrap();
        svc.v1_release_ips(&event("ev2", "1001", "u1")).await.unwrap();

        assert_eq!(svc.v1_allocate_ips(&ev).await, Ok("OK".to_string()));
        assert!(ledger(&svc, "IPs1").await.usages.is_empty());

        let unmatched = event("ev3", "9999", "u9");
        let first = svc.v1_get_ips_for_event(&unmatched).await.unwrap_err();
        svc.set_ip_profile(profile("IPs9", "9999", None)).await.unwrap();
        assert_eq!(svc.v1_get_ips_for_event(&unmatched).await.unwrap_err(), first);
        assert_eq!(svc.guardian().held_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_clear_ids_removed_once() {
        let (svc, db) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", Some("192.168.122.0/30")))
            .await
            .unwrap();
        svc.v1_allocate_ips(&event("ev1", "1001", "u1")).await.unwrap();
        svc.v1_allocate_ips(&event("ev2", "1001", "u2")).await.unwrap();

        let args = ClearIpAllocationsArgs {
            tenant: TENANT.to_string(),
            id: "IPs1".to_string(),
            allocation_ids: vec!["u1".to_string(), "u1".to_string()],
            ..Default::default()
        };
        assert_eq!(svc.v1_clear_ip_allocations(&args).await, Ok("OK".to_string()));

        let allocs = ledger(&svc, "IPs1").await;
        let ids: Vec<&String> = allocs.usages.keys().collect();
        assert_eq!(ids, vec!["u2"]);
        let stored = db.get_ip_allocations(TENANT, "IPs1").await.unwrap().unwrap();
        assert!(!stored.usages.contains_key("u1"));
        assert_eq!(svc.guardian().held_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_call_releases_its_locks() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPs1", "1001", Some("192.168.122.0/30")))
            .await
            .unwrap();

        // the call takes the profile lock, then waits on the ledger lock
        let ledger_lock = svc
            .guardian()
            .lock(&[ip_allocations_lock_key(TENANT, "IPs1")])
            .await
            .unwrap();
        let cancelled = tokio::time::timeout(
            Duration::from_millis(50),
            svc.v1_get_ips_for_event(&event("ev1", "1001", "u1")),
        )
        .await;
        assert!(cancelled.is_err());
        assert!(!svc.guardian().is_locked(&ip_profile_lock_key(TENANT, "IPs1")));

        svc.guardian().unlock(&ledger_lock);
        assert_eq!(svc.guardian().held_count(), 0);

        let reply = tokio::time::timeout(
            Duration::from_secs(1),
            svc.v1_get_ips_for_event(&event("ev2", "1001", "u1")),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(reply.len(), 1);
        assert_eq!(svc.guardian().key_count(), 0);
    }

    #[tokio::test]
    async fn test_weight_error_releases_earlier_candidates() {
        let (svc, _) = service(0);
        svc.set_ip_profile(profile("IPsA", "1001", None)).await.unwrap();
        let mut broken = profile("IPsB", "1001", None);
        broken.weights = vec![DynamicWeight {
            filter_ids: vec!["FLTR_MISSING".to_string()],
            weight: 20.0,
        }];
        svc.set_ip_profile(broken).await.unwrap();

        assert_eq!(
            svc.v1_allocate_ips(&event("ev1", "1001", "u1")).await,
            Err(AppError::BrokenReference("FLTR_MISSING".to_string()))
        );
        assert_eq!(svc.guardian().held_count(), 0);
        assert_eq!(svc.guardian().key_count(), 0);
        assert!(ledger(&svc, "IPsA").await.usages.is_empty());
    }

    #[tokio::test]
    async fn test_filter_error_releases_earlier_candidates() {
        let mut cfg = AppConfig::default();
        cfg.ips.indexed_selects = false;
        let (svc, db) = service_with(cfg);
        svc.set_ip_profile(profile("IPsA", "1001", None)).await.unwrap();

        // stored without indexing, so the dangling reference surfaces on match
        let mut broken = profile("IPsB", "1001", None);
        broken.filter_ids = vec!["FLTR_GONE".to_string()];
        db.set_ip_profile(&broken).await.unwrap();

        assert_eq!(
            svc.v1_get_ips_for_event(&event("ev1", "1001", "u1")).await,
            Err(AppError::BrokenReference("FLTR_GONE".to_string()))
        );
        assert_eq!(svc.guardian().held_count(), 0);
        assert_eq!(svc.guardian().key_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_memoized_match_drops_memo() {
        let mut cfg = AppConfig::default();
        cfg.general.locking_timeout_ms = 50;
        let (svc, _) = service_with(cfg);
        svc.set_ip_profile(profile("IPs1", "1001", None)).await.unwrap();

        svc.v1_get_ips_for_event(&event("ev1", "1001", "u1"))
            .await
            .unwrap();
        let cache = svc.data_manager().cache();
        assert!(cache.has(CACHE_EVENT_IPS, "u1"));

        let profile_lock = svc
            .guardian()
            .lock(&[ip_profile_lock_key(TENANT, "IPs1")])
            .await
            .unwrap();
        assert!(matches!(
            svc.v1_get_ips_for_event(&event("ev2", "1001", "u1")).await,
            Err(AppError::LockTimeout { .. })
        ));
        assert!(!cache.has(CACHE_EVENT_IPS, "u1"));
        svc.guardian().unlock(&profile_lock);
        assert_eq!(svc.guardian().held_count(), 0);

        assert_eq!(
            svc.v1_get_ips_for_event(&event("ev3", "1001", "u1"))
                .await
                .unwrap()
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn test_allocation_rolled_back_when_later_ledger_exhausted() {
        let (svc, _) = service(0);
        let mut roomy = profile("IPsA", "1001", Some("10.0.0.0/29"));
        roomy.weights = vec![DynamicWeight::new(20.0)];
        svc.set_ip_profile(roomy).await.unwrap();
        svc.set_ip_profile(profile("IPsB", "1001", Some("10.0.1.0/30")))
            .await
            .unwrap();

        svc.v1_allocate_ips(&event("ev1", "1001", "u1")).await.unwrap();
        svc.v1_allocate_ips(&event("ev2", "1001", "u2")).await.unwrap();

        assert_eq!(
            svc.v1_allocate_ips(&event("ev3", "1001", "u3")).await,
            Err(AppError::PoolExhausted("cgrates.org:IPsB".to_string()))
        );
        let heavy = ledger(&svc, "IPsA").await;
        assert!(!heavy.usages.contains_key("u3"));
        assert_eq!(heavy.usages.len(), 2);
        assert_eq!(ledger(&svc, "IPsB").await.usages.len(), 2);
        assert_eq!(svc.guardian().held_count(), 0);
    }

    #[tokio::test]
    async fn test_pool_message_recorded_on_usage() {
        let (svc, _) = service(0);
        let mut prfl = profile("IPs1", "1001", Some("192.168.122.0/30"));
        prfl.pools[0].message = "Allocated by POOL1".to_string();
        svc.set_ip_profile(prfl).await.unwrap();
        svc.set_ip_profile(profile("IPs2", "1002", Some("192.168.123.0/30")))
            .await
            .unwrap();

        svc.v1_allocate_ips(&event("ev1", "1001", "u1")).await.unwrap();
        svc.v1_allocate_ips(&event("ev2", "1002", "u2")).await.unwrap();

        assert_eq!(
            ledger(&svc, "IPs1").await.usages["u1"].message.as_deref(),
            Some("Allocated by POOL1")
        );
        assert!(ledger(&svc, "IPs2").await.usages["u2"].message.is_none());
    }
}
