use crate::config::Config;
use crate::github::GitHubApi;
use crate::lookup::{
    CacheCoordinator, DetailFetchDispatcher, LookupService, RateLimitTracker, SearchBudget,
};
use crate::services::ServiceManager;
use crate::services::web::WebService;
use crate::state::AppState;
use crate::store::{CacheStore, MemoryStore, RedisStore};
use crate::utils::fmt_duration;
use anyhow::Context;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Create a new App instance with all necessary components initialized
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let store = Self::connect_store(&config).await?;

        let github = Arc::new(
            GitHubApi::new(&config.github_api_url, config.github_token.as_deref())
                .context("Failed to create GitHub client")?,
        );
        if config.github_token.is_none() {
            warn!("GITHUB_TOKEN is not set, upstream calls use the unauthenticated quota");
        }

        let cache = CacheCoordinator::new(store, config.cache_settings());
        let tracker = Arc::new(RateLimitTracker::new());
        let lookup = LookupService::new(
            github.clone(),
            DetailFetchDispatcher::new(github, tracker.clone(), config.detail_workers),
            cache,
            tracker,
            SearchBudget::per_minute(config.search_budget()),
            config.max_items,
        );

        info!(
            detail_workers = config.detail_workers,
            max_items = config.max_items,
            default_items = config.default_items,
            search_budget_per_minute = config.search_budget_per_minute,
            cache_ttl = fmt_duration(config.cache_ttl),
            empty_cache_ttl = fmt_duration(config.empty_cache_ttl),
            lock_ttl = fmt_duration(config.lock_ttl),
            lock_wait = fmt_duration(config.lock_wait),
            "lookup pipeline configured"
        );

        let app_state = AppState::new(Arc::new(lookup), config.default_items);

        Ok(App {
            config,
            app_state,
            service_manager: ServiceManager::new(),
        })
    }

    async fn connect_store(config: &Config) -> anyhow::Result<Arc<dyn CacheStore>> {
        match config.redis_url.as_deref().filter(|url| !url.is_empty()) {
            Some(url) => {
                let store = RedisStore::connect(url).await?;
                info!(backend = "redis", "cache store connected");
                Ok(Arc::new(store))
            }
            None => {
                info!(
                    backend = "memory",
                    "REDIS_URL not set, using in-process cache store"
                );
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    /// Register the services this process runs
    pub fn setup_services(&mut self) {
        let web_service = Box::new(WebService::new(self.config.port, self.app_state.clone()));
        self.service_manager.register_service(web_service);
    }

    /// Start all registered services
    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run the application and handle shutdown signals
    pub async fn run(self) -> ExitCode {
        use crate::services::signals::handle_shutdown_signals;
        handle_shutdown_signals(self.service_manager, self.config.shutdown_timeout).await
    }
}
