//! Integration tests for Stratus

mod support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use stratus::audit::{AuditSink, NullSink};
    use stratus::cachemgr::{CacheManager, TASK_KIND_CACHE_PAYLOAD, TASK_KIND_UNCACHE_PAYLOAD};
    use stratus::lifecycle::{LifecycleManager, StatusWriter};
    use stratus::lockman::LockRegistry;
    use stratus::model::{CacheAssociation, MirroredResource};
    use stratus::reconcile::{SyncEngine, TASK_KIND_RESOURCE_REMOVE};
    use stratus::store::MemoryRepository;
    use stratus::taskman::{TaskContext, TaskKind, TaskKindRegistry, TaskOrchestrator};

    pub type Lifecycle = LifecycleManager<MemoryRepository<MirroredResource>>;

    pub fn init_tracing() {
        use std::sync::Once;
        static INIT: Once = Once::new();
        INIT.call_once(|| {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::from_default_env(),
                )
                .with_test_writer()
                .try_init();
        });
    }

    /// Removal task that performs the actual delete, the way a host's
    /// teardown task would
    struct RemoveResource {
        lifecycle: Arc<Lifecycle>,
        associations: MemoryRepository<CacheAssociation>,
    }

    #[async_trait]
    impl TaskKind for RemoveResource {
        async fn on_init(&self, ctx: TaskContext) {
            let target = match ctx.targets().into_iter().next() {
                Some(id) => id,
                None => {
                    ctx.set_stage_failed("removal task without target").await;
                    return;
                }
            };
            match self
                .lifecycle
                .delete(&target, &self.associations, "taskman")
                .await
            {
                Ok(()) => ctx.set_stage_complete(serde_json::Value::Null).await,
                Err(err) => ctx.set_stage_failed(err.to_string()).await,
            }
        }
    }

    struct NoopTask;

    #[async_trait]
    impl TaskKind for NoopTask {
        async fn on_init(&self, ctx: TaskContext) {
            ctx.set_stage_complete(serde_json::Value::Null).await;
        }
    }

    pub struct Stack {
        pub lifecycle: Arc<Lifecycle>,
        pub engine: SyncEngine<MemoryRepository<MirroredResource>>,
        pub caches: CacheManager<MemoryRepository<CacheAssociation>>,
        pub associations: MemoryRepository<CacheAssociation>,
        pub tasks: TaskOrchestrator,
    }

    /// Wire up the full stack over in-memory repositories
    pub fn stack(audit: Arc<dyn AuditSink>) -> Stack {
        let locks = Arc::new(LockRegistry::new());
        let lifecycle = Arc::new(Lifecycle::new(
            MemoryRepository::new(),
            Arc::clone(&locks),
            Arc::clone(&audit),
        ));
        let associations: MemoryRepository<CacheAssociation> = MemoryRepository::new();

        let mut registry = TaskKindRegistry::new();
        registry.register(
            TASK_KIND_RESOURCE_REMOVE,
            Arc::new(RemoveResource {
                lifecycle: Arc::clone(&lifecycle),
                associations: associations.clone(),
            }),
        );
        registry.register(TASK_KIND_CACHE_PAYLOAD, Arc::new(NoopTask));
        registry.register(TASK_KIND_UNCACHE_PAYLOAD, Arc::new(NoopTask));

        let tasks = TaskOrchestrator::start(
            registry,
            Arc::clone(&lifecycle) as Arc<dyn StatusWriter>,
            Arc::clone(&audit),
            4,
        );

        Stack {
            engine: SyncEngine::new(
                Arc::clone(&lifecycle),
                Arc::clone(&locks),
                tasks.clone(),
            ),
            caches: CacheManager::new(
                associations.clone(),
                locks,
                tasks.clone(),
                audit,
            ),
            lifecycle,
            associations,
            tasks,
        }
    }

    pub fn quiet_stack() -> Stack {
        stack(Arc::new(NullSink))
    }

    /// Poll until `check` passes or a short deadline expires
    pub async fn eventually<F, Fut>(mut check: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if check().await {
                return true;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        false
    }
}

mod sync_flow {
    use super::support;
    use std::sync::Arc;

    use async_trait::async_trait;
    use stratus::provider::{CloudProvider, RemoteEntity};
    use stratus::store::{Criteria, Repository};
    use stratus::{StratusError, StratusResult};

    struct Inventory {
        entities: Vec<RemoteEntity>,
        public: bool,
    }

    impl Inventory {
        fn private(entities: Vec<RemoteEntity>) -> Self {
            Self {
                entities,
                public: false,
            }
        }
    }

    #[async_trait]
    impl CloudProvider for Inventory {
        fn provider_name(&self) -> &'static str {
            "inventory"
        }

        fn is_public_cloud(&self) -> bool {
            self.public
        }

        async fn list_entities(&self, _scope: &str) -> StratusResult<Vec<RemoteEntity>> {
            Ok(self.entities.clone())
        }
    }

    fn entity(global_id: &str, name: &str) -> RemoteEntity {
        let mut e = RemoteEntity::new(global_id, name);
        e.status = "ready".to_string();
        e
    }

    #[tokio::test]
    async fn discovered_entity_becomes_local_record() {
        support::init_tracing();
        let stack = support::quiet_stack();

        let provider = Inventory::private(vec![entity("ext-42", "web")]);
        let result = stack
            .engine
            .sync_manager_scope("mgr-1", &provider, false, "system")
            .await;

        assert_eq!(result.added, 1);
        assert!(!result.has_errors());

        let records = stack.lifecycle.repo().find(&Criteria::All).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].external_id(), "ext-42");
        assert_eq!(records[0].manager_id(), "mgr-1");
    }

    #[tokio::test]
    async fn vanished_entity_is_removed_through_a_task() {
        support::init_tracing();
        let stack = support::quiet_stack();

        let provider = Inventory::private(vec![entity("ext-42", "web")]);
        stack
            .engine
            .sync_manager_scope("mgr-1", &provider, false, "system")
            .await;

        let gone = Inventory::private(vec![]);
        let result = stack
            .engine
            .sync_manager_scope("mgr-1", &gone, false, "system")
            .await;
        assert_eq!(result.removed, 1);

        // The removal task (not the pass itself) deletes the record.
        let lifecycle = Arc::clone(&stack.lifecycle);
        let deleted = support::eventually(|| {
            let lifecycle = Arc::clone(&lifecycle);
            async move {
                lifecycle
                    .repo()
                    .find(&Criteria::All)
                    .await
                    .unwrap()
                    .is_empty()
            }
        })
        .await;
        assert!(deleted, "removal task never deleted the record");
    }

    #[tokio::test]
    async fn converged_scope_stays_fixed() {
        support::init_tracing();
        let stack = support::quiet_stack();
        let provider = Inventory::private(vec![
            entity("ext-1", "a"),
            entity("ext-2", "b"),
            entity("ext-3", "c"),
        ]);

        let first = stack
            .engine
            .sync_manager_scope("mgr-1", &provider, false, "system")
            .await;
        assert_eq!(first.added, 3);

        for _ in 0..3 {
            let pass = stack
                .engine
                .sync_manager_scope("mgr-1", &provider, false, "system")
                .await;
            assert_eq!(pass.added, 0);
            assert_eq!(pass.updated, 0);
            assert_eq!(pass.removed, 0);
            assert!(!pass.has_errors());
        }
    }

    #[tokio::test]
    async fn scopes_are_isolated() {
        support::init_tracing();
        let stack = support::quiet_stack();

        let provider_a = Inventory::private(vec![entity("ext-42", "web")]);
        let provider_b = Inventory::private(vec![entity("ext-42", "web")]);

        stack
            .engine
            .sync_manager_scope("mgr-1", &provider_a, false, "system")
            .await;
        stack
            .engine
            .sync_manager_scope("mgr-2", &provider_b, false, "system")
            .await;

        // Same external id in two scopes stays two records; name
        // uniqueness is per scope, so both may keep the remote name.
        let records = stack.lifecycle.repo().find(&Criteria::All).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.name() == "web"));

        // Emptying one scope leaves the other alone.
        let gone = Inventory::private(vec![]);
        let result = stack
            .engine
            .sync_manager_scope("mgr-1", &gone, false, "system")
            .await;
        assert_eq!(result.removed, 1);
    }

    #[tokio::test]
    async fn partial_failure_reports_per_entry() {
        support::init_tracing();
        let stack = support::quiet_stack();

        let provider = Inventory::private(vec![
            entity("", "broken"),
            entity("ext-1", "good-a"),
            entity("ext-2", "good-b"),
        ]);
        let result = stack
            .engine
            .sync_manager_scope("mgr-1", &provider, false, "system")
            .await;

        assert_eq!(result.added, 2);
        assert_eq!(result.add_errors.len(), 1);
        assert!(matches!(
            result.to_error(),
            Some(StratusError::PartialSync { failed: 1, total: 3 })
        ));
    }

    #[tokio::test]
    async fn concurrent_discovery_creates_once() {
        support::init_tracing();
        let stack = support::quiet_stack();
        let lifecycle = Arc::clone(&stack.lifecycle);

        let mut handles = vec![];
        for _ in 0..8 {
            let lifecycle = Arc::clone(&lifecycle);
            handles.push(tokio::spawn(async move {
                let remote = RemoteEntity::new("ext-42", "web");
                lifecycle
                    .fetch_or_create(&remote, "mgr-1", false, "system")
                    .await
                    .unwrap()
            }));
        }

        let mut created = 0;
        for h in handles {
            let (_, was_created) = h.await.unwrap();
            if was_created {
                created += 1;
            }
        }
        assert_eq!(created, 1);
        assert_eq!(
            lifecycle.repo().find(&Criteria::All).await.unwrap().len(),
            1
        );
    }
}

mod cache_flow {
    use super::support;

    use stratus::model::{AssociationStatus, CacheAssociation};
    use stratus::provider::FixedCapacity;
    use stratus::store::Repository;

    async fn seed_active(stack: &support::Stack, payload_id: &str, ref_count: u32) {
        let mut assoc = CacheAssociation::new("cache-1", payload_id);
        assoc.advance(AssociationStatus::Active);
        assoc.ref_count = ref_count;
        stack.associations.insert(assoc).await.unwrap();
    }

    #[tokio::test]
    async fn request_runs_cache_task_to_completion() {
        support::init_tracing();
        let stack = support::quiet_stack();

        let handles = stack
            .caches
            .request_cache("cache-1", "img-a", &FixedCapacity::new(0), "system")
            .await
            .unwrap();
        assert_eq!(handles.len(), 1);

        let task = stack.tasks.await_terminal(handles[0]).await.unwrap();
        assert!(task.state.is_terminal());
    }

    #[tokio::test]
    async fn full_cache_evicts_least_used_before_admitting() {
        support::init_tracing();
        let stack = support::quiet_stack();

        seed_active(&stack, "img-a", 3).await;
        seed_active(&stack, "img-b", 1).await;
        seed_active(&stack, "img-c", 1).await;
        seed_active(&stack, "img-d", 5).await;

        let handles = stack
            .caches
            .request_cache("cache-1", "img-new", &FixedCapacity::new(4), "system")
            .await
            .unwrap();
        assert_eq!(handles.len(), 2);

        let victim = stack
            .associations
            .get(&CacheAssociation::id_for("cache-1", "img-b"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(victim.status, AssociationStatus::Deleting);

        let admitted = stack
            .associations
            .get(&CacheAssociation::id_for("cache-1", "img-new"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(admitted.status, AssociationStatus::Init);
    }

    #[tokio::test]
    async fn resource_with_associations_cannot_be_deleted() {
        support::init_tracing();
        let stack = support::quiet_stack();

        let remote = stratus::provider::RemoteEntity::new("ext-42", "web");
        let (record, _) = stack
            .lifecycle
            .fetch_or_create(&remote, "mgr-1", false, "system")
            .await
            .unwrap();

        stack
            .associations
            .insert(CacheAssociation::new(record.id(), "img-a"))
            .await
            .unwrap();

        let err = stack
            .lifecycle
            .delete(record.id(), &stack.associations, "system")
            .await
            .unwrap_err();
        assert!(matches!(err, stratus::StratusError::NotEmpty { .. }));
    }
}

mod audit_trail {
    use super::support;
    use std::sync::Arc;

    use stratus::audit::AuditLog;
    use stratus::provider::RemoteEntity;

    #[tokio::test]
    async fn lifecycle_actions_are_journaled() {
        support::init_tracing();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.log");
        let stack = support::stack(Arc::new(AuditLog::with_path(path.clone())));

        let remote = RemoteEntity::new("ext-42", "web");
        stack
            .lifecycle
            .fetch_or_create(&remote, "mgr-1", false, "system")
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let line = contents.lines().next().expect("audit entry written");
        let entry: serde_json::Value = serde_json::from_str(line).unwrap();

        assert_eq!(entry["action"], "create");
        assert_eq!(entry["actor"], "system");
        assert!(entry["entity"]
            .as_str()
            .unwrap()
            .starts_with("mirrored-resource/"));
    }
}
