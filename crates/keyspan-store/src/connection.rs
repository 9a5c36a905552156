use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, instrument, trace, warn};

use keyspan_core::{
    ConnectOptions, Connector, CqlSession, Credentials, PoolOptions, StoreConfig,
};

use crate::error::StoreError;

/// Resolves connection address and credentials before connecting.
///
/// Discovery services and credential stores plug in here.
#[async_trait]
pub trait ConnectionResolver: Send + Sync {
    async fn resolve(&self, trace_id: Option<&str>, config: &StoreConfig) -> Result<StoreConfig, StoreError>;
}

/// Uses the configured values as they are.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfigResolver;

#[async_trait]
impl ConnectionResolver for ConfigResolver {
    async fn resolve(&self, _trace_id: Option<&str>, config: &StoreConfig) -> Result<StoreConfig, StoreError> {
        Ok(config.clone())
    }
}

struct LiveConnection {
    session: Arc<dyn CqlSession>,
    datacenter: Option<String>,
    keyspace: Option<String>,
}

/// Owns one pooled client session to the store.
///
/// Several persistence components can share one manager; only the creator
/// of the manager is expected to close it.
pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    resolver: Arc<dyn ConnectionResolver>,
    config: StoreConfig,
    pool: PoolOptions,
    live: RwLock<Option<LiveConnection>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            resolver: Arc::new(ConfigResolver),
            config: StoreConfig::default(),
            pool: PoolOptions::default(),
            live: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn with_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Store the config. Pool options are merged over the defaults now;
    /// address and credentials are resolved on open.
    pub fn configure(&mut self, config: &StoreConfig) {
        self.pool = PoolOptions::default().merged(&config.options);
        self.config = config.clone();
    }

    pub fn is_open(&self) -> bool {
        self.live.read().is_some()
    }

    #[instrument(skip(self))]
    pub async fn open(&self, trace_id: Option<&str>) -> Result<(), StoreError> {
        if self.is_open() {
            trace!(trace_id, "connection already open");
            return Ok(());
        }
        let resolved = self.resolver.resolve(trace_id, &self.config).await?;

        debug!(trace_id, "connecting to store");

        let options = self.compose_options(&resolved);
        if options.contact_points.is_empty() {
            return Err(StoreError::ConnectionFailed {
                trace_id: trace_id.map(str::to_string),
                message: "no contact points configured".into(),
                cause: None,
            });
        }

        let datacenter = options.local_datacenter.clone();
        let keyspace = options.keyspace.clone();
        let session = self
            .connector
            .connect(options)
            .await
            .map_err(|e| StoreError::ConnectionFailed {
                trace_id: trace_id.map(str::to_string),
                message: "connection to store failed".into(),
                cause: Some(e),
            })?;

        // A concurrent open may have won while we were connecting.
        let surplus = {
            let mut live = self.live.write();
            if live.is_some() {
                Some(session)
            } else {
                *live = Some(LiveConnection {
                    session,
                    datacenter,
                    keyspace,
                });
                None
            }
        };
        if let Some(session) = surplus {
            if let Err(e) = session.shutdown().await {
                warn!(trace_id, error = %e, "failed to release surplus session");
            }
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn close(&self, trace_id: Option<&str>) -> Result<(), StoreError> {
        let live = self.live.write().take();
        let Some(live) = live else {
            return Ok(());
        };

        live.session.shutdown().await.map_err(|e| {
            warn!(trace_id, error = %e, "disconnect from store failed");
            StoreError::DisconnectFailed {
                trace_id: trace_id.map(str::to_string),
                cause: e,
            }
        })?;
        debug!(trace_id, "disconnected from store");
        Ok(())
    }

    pub fn session(&self) -> Option<Arc<dyn CqlSession>> {
        self.live.read().as_ref().map(|l| l.session.clone())
    }

    pub fn datacenter(&self) -> Option<String> {
        self.live.read().as_ref().and_then(|l| l.datacenter.clone())
    }

    pub fn keyspace(&self) -> Option<String> {
        self.live.read().as_ref().and_then(|l| l.keyspace.clone())
    }

    pub fn pool_options(&self) -> &PoolOptions {
        &self.pool
    }

    fn compose_options(&self, config: &StoreConfig) -> ConnectOptions {
        let credentials = config.username.as_ref().map(|username| Credentials {
            username: username.clone(),
            password: config.password.clone(),
        });
        ConnectOptions {
            contact_points: config.contact_points(),
            port: config.port,
            local_datacenter: config.datacenter.clone(),
            keyspace: config.keyspace.clone(),
            credentials,
            pool: self.pool.clone(),
        }
    }
}
