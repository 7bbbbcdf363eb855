use std::sync::Arc;

use once_cell::sync::Lazy;

use crate::{
    client::registry::ClientRegistry,
    config::Config,
    database::{DatabaseHolder, DatabaseResolver},
    lock::DbLock,
};

static SERVER: Lazy<ServerState> = Lazy::new(ServerState::from_env);

/// Process-wide services every client works against.
#[derive(Clone)]
pub struct ServerState {
    config: Arc<Config>,
    registry: Arc<ClientRegistry>,
    resolver: Arc<dyn DatabaseResolver>,
    lock: Arc<DbLock>,
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        let resolver = Arc::new(DatabaseHolder::new(config.storage_mode()));
        Self::with_resolver(config, resolver)
    }

    pub fn with_resolver(config: Config, resolver: Arc<dyn DatabaseResolver>) -> Self {
        Self {
            config: Arc::new(config),
            registry: Arc::new(ClientRegistry::new()),
            resolver,
            lock: Arc::new(DbLock::new()),
        }
    }

    pub fn from_env() -> Self {
        let _ = env_logger::try_init();
        let config = Config::from_env();
        log::info!(
            "server state: dbpath={} storage={:?}",
            config.data_root().display(),
            config.storage_mode()
        );
        Self::new(config)
    }

    /// The process-wide instance, configured from the environment.
    pub fn global() -> &'static ServerState {
        &SERVER
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn resolver(&self) -> &dyn DatabaseResolver {
        self.resolver.as_ref()
    }

    pub fn lock(&self) -> &DbLock {
        &self.lock
    }
}
