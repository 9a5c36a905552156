use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use secrecy::SecretString;

use crate::config::PoolOptions;
use crate::row::Row;
use crate::value::Value;

/// Error reported by the underlying store driver.
///
/// The message is kept verbatim: schema bootstrap classifies existence-check failures
/// by inspecting it.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct DriverError {
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Username/password pair passed to the driver on connect.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: Option<SecretString>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Driver connect options composed from the resolved configuration.
#[derive(Clone, Debug)]
pub struct ConnectOptions {
    pub contact_points: Vec<String>,
    pub port: u16,
    pub local_datacenter: Option<String>,
    pub keyspace: Option<String>,
    pub credentials: Option<Credentials>,
    pub pool: PoolOptions,
}

/// Fully materialized statement result.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResultSet {
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn into_first(self) -> Option<Row> {
        self.rows.into_iter().next()
    }
}

pub type RowStream = Pin<Box<dyn Stream<Item = Result<Row, DriverError>> + Send>>;

/// A live, pooled client session to the store.
#[async_trait]
pub trait CqlSession: Send + Sync {
    /// Execute a statement with positional `?` parameters.
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<ResultSet, DriverError>;

    /// Execute a statement and yield its rows one at a time, fetching further
    /// pages from the store as the stream is consumed.
    async fn stream(&self, statement: &str, params: &[Value]) -> Result<RowStream, DriverError>;

    /// Gracefully release the pool.
    async fn shutdown(&self) -> Result<(), DriverError>;
}

/// Factory for sessions; the only place the driver's connect call happens.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, options: ConnectOptions) -> Result<Arc<dyn CqlSession>, DriverError>;
}
