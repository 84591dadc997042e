//! Store selection and service wiring.

use std::sync::Arc;

use aegis_audit::{AuditPipeline, AuditWriteSender};
use aegis_auth::{LoginLockout, SessionStore, TokenService};
use aegis_cache_redis::RedisCacheStore;
use aegis_db_memory::InMemoryStores;
use aegis_db_postgres::{PostgresStores, create_pool, migrations};
use aegis_jobs::{EmailSender, JobQueue, JobSender, WebhookSender};
use aegis_ratelimit::{RateLimiter, RoutePolicy};
use aegis_storage::{
    AuditStorage, CacheStore, DocumentStore, JobStorage, SessionStorage, StoreFactory, TenantStorage,
};
use aegis_tenancy::{TenantAdmin, TenantRepository, TenantRouter, TenantScoped};
use anyhow::Context;
use tracing::{info, warn};

use crate::config::{AppConfig, StorageBackend};

/// The two backing stores, behind their interfaces.
#[derive(Clone)]
pub struct Backends {
    pub cache: Arc<dyn CacheStore>,
    pub sessions: Arc<dyn SessionStorage>,
    pub tenants: Arc<dyn TenantStorage>,
    pub documents: Arc<dyn DocumentStore>,
    pub store_factory: Arc<dyn StoreFactory>,
    pub audit: Arc<dyn AuditStorage>,
    pub jobs: Arc<dyn JobStorage>,
}

impl Backends {
    pub fn in_memory(stores: &InMemoryStores) -> Self {
        Self {
            cache: stores.cache.clone(),
            sessions: stores.sessions.clone(),
            tenants: stores.tenants.clone(),
            documents: stores.documents.clone(),
            store_factory: stores.store_factory.clone(),
            audit: stores.audit.clone(),
            jobs: stores.jobs.clone(),
        }
    }

    /// Connects the stores selected by configuration.
    pub async fn connect(config: &AppConfig) -> anyhow::Result<Self> {
        let memory = InMemoryStores::new();

        let cache: Arc<dyn CacheStore> = if config.redis.enabled {
            let redis = RedisCacheStore::connect(&config.redis)
                .await
                .context("failed to connect to Redis")?;
            info!("Redis cache ready");
            Arc::new(redis)
        } else {
            warn!("Redis disabled; rate limits and session cache are per instance");
            memory.cache.clone()
        };

        match config.storage.backend {
            StorageBackend::Memory => {
                warn!("Using in-memory durable stores; data is lost on restart");
                Ok(Self {
                    cache,
                    ..Self::in_memory(&memory)
                })
            }
            StorageBackend::Postgres => {
                let pool = create_pool(&config.storage.postgres)
                    .await
                    .context("failed to connect to PostgreSQL")?;
                if config.storage.postgres.run_migrations {
                    migrations::run(&pool)
                        .await
                        .context("failed to run migrations")?;
                }
                let pg = PostgresStores::new(Arc::new(pool));
                info!("PostgreSQL stores ready");
                Ok(Self {
                    cache,
                    sessions: pg.sessions,
                    tenants: pg.tenants,
                    documents: pg.documents,
                    store_factory: pg.store_factory,
                    audit: pg.audit,
                    jobs: pg.jobs,
                })
            }
        }
    }
}

/// Services shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    pub tokens: TokenService,
    pub lockout: LoginLockout,
    pub limiter: RateLimiter,
    pub policy: Arc<RoutePolicy>,
    pub audit: AuditPipeline,
    pub jobs: JobQueue,
    pub tenants: TenantRouter,
    pub tenant_admin: TenantAdmin,
    pub backends: Backends,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(config: AppConfig, backends: Backends) -> anyhow::Result<Self> {
        let jobs = JobQueue::new(backends.jobs.clone(), &config.jobs);
        let audit = AuditPipeline::new(
            backends.audit.clone(),
            Some(jobs.clone()),
            config.audit.clone(),
        );

        let jwt = config
            .auth
            .jwt_service()
            .context("failed to initialize token signing")?;
        let sessions = SessionStore::new(
            backends.sessions.clone(),
            backends.cache.clone(),
            &config.sessions,
        );
        let lockout = LoginLockout::new(backends.cache.clone(), config.auth.lockout.clone())
            .with_audit(audit.clone());
        let tokens = TokenService::new(Arc::new(jwt), sessions, audit.clone(), &config.auth)
            .with_lockout(lockout.clone());

        let policy = RoutePolicy::new(config.rate_limit.clone()).context("invalid rate_limit config")?;
        let tenants = TenantRouter::new(
            backends.tenants.clone(),
            backends.documents.clone(),
            backends.store_factory.clone(),
            &config.tenancy,
        );
        let tenant_admin = TenantAdmin::new(tenants.clone(), audit.clone());

        Ok(Self {
            tokens,
            lockout,
            limiter: RateLimiter::new(backends.cache.clone()),
            policy: Arc::new(policy),
            audit,
            jobs,
            tenants,
            tenant_admin,
            backends,
            config: Arc::new(config),
        })
    }

    /// Tenant-isolated access to `T`. Handlers reach tenant-owned data
    /// through this, never through the stores in [`Backends`].
    pub fn repository<T: TenantScoped>(&self) -> TenantRepository<T> {
        TenantRepository::new(self.tenants.clone()).with_audit(self.audit.clone())
    }

    /// Senders registered on every job worker.
    pub fn job_senders(&self) -> anyhow::Result<Vec<Arc<dyn JobSender>>> {
        let mut senders: Vec<Arc<dyn JobSender>> = vec![
            Arc::new(WebhookSender::new(&self.config.jobs.webhook)?),
            Arc::new(AuditWriteSender::new(self.backends.audit.clone())),
        ];
        match &self.config.jobs.smtp {
            Some(smtp) => senders.push(Arc::new(EmailSender::new(smtp)?)),
            None => info!("No SMTP relay configured; email jobs will be dead-lettered"),
        }
        Ok(senders)
    }
}
