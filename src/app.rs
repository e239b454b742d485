use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Duration as ChronoDuration;
use sqlx::postgres::PgPoolOptions;
use std::process::ExitCode;
use tracing::info;

use crate::cli::JobName;
use crate::config::Config;
use crate::db::DbContext;
use crate::discovery::http::HttpDiscoveryProvider;
use crate::discovery::DiscoveryProvider;
use crate::jobs::commitment::{ExpiryEngine, ExpiryService, NotifyEngine, NotifyService};
use crate::jobs::discovery::{DiscoverySync, DiscoverySyncService};
use crate::jobs::overrides::{OverrideEngine, OverrideService};
use crate::jobs::quota_sync::{QuotaSyncEngine, QuotaSyncService};
use crate::jobs::scrape::{ScrapeEngine, ScrapeService};
use crate::liquid::http::HttpLiquidConnection;
use crate::liquid::LiquidRegistry;
use crate::mail::PlainMailRenderer;
use crate::overrides::json_file::JsonFileOverrideSource;
use crate::services::manager::ServiceManager;

/// Main application struct wiring config, DB, external collaborators, and
/// the job-runtime's `ServiceManager` together.
pub struct App {
    config: Config,
    ctx: DbContext,
    discovery_provider: Arc<dyn DiscoveryProvider>,
    liquid: LiquidRegistry,
    service_manager: ServiceManager,
}

impl App {
    /// Create a new App instance with all necessary components initialized,
    /// from configuration already loaded by [`Config::load`] (the caller
    /// loads it first so the log level it carries is known before the
    /// subscriber is installed).
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        crate::metrics_registry::describe();

        let is_private = config.database_url.contains(".internal");
        let slow_threshold = Duration::from_millis(if is_private { 200 } else { 500 });

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(4)
            .acquire_slow_threshold(slow_threshold)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect(&config.database_url)
            .await
            .context("Failed to create database pool")?;

        info!(
            is_private,
            slow_threshold = format!("{:.2?}", slow_threshold),
            "database pool established"
        );

        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed successfully");

        let ctx = DbContext::new(db_pool);

        let discovery_provider: Arc<dyn DiscoveryProvider> =
            Arc::new(HttpDiscoveryProvider::new(config.discovery_base_url.clone()));

        let mut liquid = LiquidRegistry::new();
        for service_type in &config.service_types {
            let base_url = config
                .liquid_base_url_template
                .replace("{service_type}", service_type);
            let conn = HttpLiquidConnection::new(base_url).context("failed to build LIQUID connection")?;
            liquid.register(service_type.clone(), Arc::new(conn));
        }

        Ok(App {
            config,
            ctx,
            discovery_provider,
            liquid,
            service_manager: ServiceManager::new(),
        })
    }

    /// Register the jobs named in `jobs` (defaulting to all of them) with
    /// the service manager. Must be called before [`App::start_services`].
    pub fn setup_services(&mut self, jobs: &[JobName]) -> Result<(), anyhow::Error> {
        let jobs: Vec<JobName> = if jobs.is_empty() { JobName::all() } else { jobs.to_vec() };

        if jobs.contains(&JobName::Discovery) {
            let sync = DiscoverySync::new(
                self.ctx.clone(),
                self.discovery_provider.clone(),
                self.config.service_types.clone(),
            );
            let shutdown_rx = self.service_manager.subscribe_shutdown();
            let service = Box::new(DiscoverySyncService::new(sync, self.config.cron_interval, shutdown_rx));
            self.service_manager.register_service("discovery", service);
        }

        if jobs.contains(&JobName::Scrape) {
            let history_retention = ChronoDuration::from_std(self.config.history_retention)
                .unwrap_or_else(|_| ChronoDuration::days(90));
            let engine = Arc::new(ScrapeEngine::new(
                self.ctx.clone(),
                self.liquid.clone(),
                self.config.availability_zones.clone(),
                self.config.scrape_interval,
                self.config.recheck_interval,
                history_retention,
            ));
            for service_type in &self.config.service_types {
                let shutdown_rx = self.service_manager.subscribe_shutdown();
                let service = Box::new(ScrapeService::new(engine.clone(), service_type.clone(), shutdown_rx));
                self.service_manager
                    .register_service(&format!("scrape-{service_type}"), service);
            }
        }

        if jobs.contains(&JobName::QuotaSync) {
            let engine = Arc::new(QuotaSyncEngine::new(self.ctx.clone(), self.liquid.clone()));
            for service_type in &self.config.service_types {
                let shutdown_rx = self.service_manager.subscribe_shutdown();
                let service = Box::new(QuotaSyncService::new(engine.clone(), service_type.clone(), shutdown_rx));
                self.service_manager
                    .register_service(&format!("quota-sync-{service_type}"), service);
            }
        }

        if jobs.contains(&JobName::CommitmentExpiry) {
            let engine = ExpiryEngine::new(self.ctx.clone());
            let shutdown_rx = self.service_manager.subscribe_shutdown();
            let service = Box::new(ExpiryService::new(engine, self.config.cron_interval, shutdown_rx));
            self.service_manager.register_service("commitment-expiry", service);
        }

        if jobs.contains(&JobName::CommitmentNotify) {
            let engine = Arc::new(NotifyEngine::new(self.ctx.clone(), Arc::new(PlainMailRenderer)));
            let shutdown_rx = self.service_manager.subscribe_shutdown();
            let service = Box::new(NotifyService::new(engine, shutdown_rx));
            self.service_manager.register_service("commitment-notify", service);
        }

        if jobs.contains(&JobName::Overrides) {
            let source = Arc::new(JsonFileOverrideSource::new(self.config.override_file_path.clone()));
            let engine = OverrideEngine::new(self.ctx.clone(), source);
            let shutdown_rx = self.service_manager.subscribe_shutdown();
            let service = Box::new(OverrideService::new(engine, self.config.cron_interval, shutdown_rx));
            self.service_manager.register_service("overrides", service);
        }

        Ok(())
    }

    /// Start all registered services
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run the application and handle shutdown signals
    pub async fn run(self) -> ExitCode {
        use crate::signals::handle_shutdown_signals;
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }

    /// Get a reference to the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }
}
