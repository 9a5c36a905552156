//! Connector backed by the `scylla` driver. Works against ScyllaDB and
//! Apache Cassandra over the native protocol.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use futures::StreamExt;
use scylla::client::execution_profile::ExecutionProfile;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::client::PoolSize;
use scylla::policies::load_balancing::DefaultPolicy;
use scylla::value::{CqlTimestamp, CqlValue, Row as CqlRow};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use keyspan_core::{ConnectOptions, Connector, CqlSession, DriverError, ResultSet, Row, RowStream, Value};

/// Session settings derived from [`ConnectOptions`].
///
/// The driver has no idle timeout; `idle_timeout_ms` is not carried over.
#[derive(Debug)]
pub struct SessionPlan {
    pub known_nodes: Vec<String>,
    pub user: Option<(String, SecretString)>,
    pub keyspace: Option<String>,
    pub connection_timeout: Option<Duration>,
    pub pool_per_host: Option<NonZeroUsize>,
    pub datacenter: Option<String>,
}

impl SessionPlan {
    pub fn from_options(options: &ConnectOptions) -> Self {
        let known_nodes = options
            .contact_points
            .iter()
            .map(|point| {
                if point.contains(':') {
                    point.clone()
                } else {
                    format!("{point}:{}", options.port)
                }
            })
            .collect();
        let user = options.credentials.as_ref().map(|creds| {
            let password = creds
                .password
                .clone()
                .unwrap_or_else(|| SecretString::from(String::new()));
            (creds.username.clone(), password)
        });
        Self {
            known_nodes,
            user,
            keyspace: options.keyspace.clone(),
            connection_timeout: (options.pool.connect_timeout_ms > 0)
                .then(|| Duration::from_millis(options.pool.connect_timeout_ms)),
            pool_per_host: usize::try_from(options.pool.max_pool_size)
                .ok()
                .and_then(NonZeroUsize::new),
            datacenter: options.local_datacenter.clone(),
        }
    }

    fn builder(&self) -> SessionBuilder {
        let mut builder = SessionBuilder::new().known_nodes(&self.known_nodes);
        if let Some((username, password)) = &self.user {
            builder = builder.user(username.as_str(), password.expose_secret());
        }
        if let Some(keyspace) = &self.keyspace {
            builder = builder.use_keyspace(keyspace.as_str(), true);
        }
        if let Some(timeout) = self.connection_timeout {
            builder = builder.connection_timeout(timeout);
        }
        if let Some(size) = self.pool_per_host {
            builder = builder.pool_size(PoolSize::PerHost(size));
        }
        if let Some(dc) = &self.datacenter {
            let policy = DefaultPolicy::builder().prefer_datacenter(dc.clone()).build();
            let profile = ExecutionProfile::builder().load_balancing_policy(policy).build();
            builder = builder.default_execution_profile_handle(profile.into_handle());
        }
        builder
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ScyllaConnector;

impl ScyllaConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for ScyllaConnector {
    #[instrument(skip_all, fields(nodes = ?options.contact_points))]
    async fn connect(&self, options: ConnectOptions) -> Result<Arc<dyn CqlSession>, DriverError> {
        let plan = SessionPlan::from_options(&options);
        let session = plan.builder().build().await.map_err(driver_error)?;
        debug!(known_nodes = ?plan.known_nodes, "scylla session established");
        Ok(Arc::new(ScyllaSession { session }))
    }
}

pub struct ScyllaSession {
    session: Session,
}

impl ScyllaSession {
    pub fn new(session: Session) -> Self {
        Self { session }
    }
}

#[async_trait]
impl CqlSession for ScyllaSession {
    async fn execute(&self, statement: &str, params: &[Value]) -> Result<ResultSet, DriverError> {
        let result = self
            .session
            .query_unpaged(statement, bind(params)?)
            .await
            .map_err(driver_error)?;
        if !result.is_rows() {
            return Ok(ResultSet::default());
        }
        let rows = result.into_rows_result().map_err(driver_error)?;
        let names: Vec<String> = rows.column_specs().iter().map(|spec| spec.name().to_string()).collect();
        let mut out = Vec::new();
        for row in rows.rows::<CqlRow>().map_err(driver_error)? {
            out.push(to_row(&names, row.map_err(driver_error)?)?);
        }
        Ok(ResultSet::new(out))
    }

    async fn stream(&self, statement: &str, params: &[Value]) -> Result<RowStream, DriverError> {
        let pager = self
            .session
            .query_iter(statement, bind(params)?)
            .await
            .map_err(driver_error)?;
        let names: Vec<String> = pager.column_specs().iter().map(|spec| spec.name().to_string()).collect();
        let rows = pager.rows_stream::<CqlRow>().map_err(driver_error)?;
        Ok(Box::pin(rows.map(move |row| to_row(&names, row.map_err(driver_error)?))))
    }

    /// The driver closes its connections when the session is dropped.
    async fn shutdown(&self) -> Result<(), DriverError> {
        Ok(())
    }
}

fn driver_error(err: impl std::fmt::Display) -> DriverError {
    DriverError::new(err.to_string())
}

fn bind(params: &[Value]) -> Result<Vec<Option<CqlValue>>, DriverError> {
    params.iter().map(to_cql).collect()
}

fn to_row(names: &[String], row: CqlRow) -> Result<Row, DriverError> {
    let mut out = Row::new();
    for (name, value) in names.iter().zip(row.columns) {
        out = out.with(name.as_str(), value.map(from_cql).transpose()?.unwrap_or(Value::Null));
    }
    Ok(out)
}

/// `None` binds a CQL null.
pub fn to_cql(value: &Value) -> Result<Option<CqlValue>, DriverError> {
    Ok(Some(match value {
        Value::Null => return Ok(None),
        Value::Boolean(b) => CqlValue::Boolean(*b),
        Value::Int(n) => CqlValue::Int(*n),
        Value::BigInt(n) => CqlValue::BigInt(*n),
        Value::Double(n) => CqlValue::Double(*n),
        Value::Text(s) => CqlValue::Text(s.clone()),
        Value::Blob(bytes) => CqlValue::Blob(bytes.clone()),
        Value::Uuid(id) => CqlValue::Uuid(*id),
        Value::Timestamp(at) => CqlValue::Timestamp(CqlTimestamp(at.timestamp_millis())),
        Value::List(items) => {
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                list.push(to_cql(item)?.ok_or_else(|| DriverError::new("null is not allowed inside a list"))?);
            }
            CqlValue::List(list)
        }
    }))
}

pub fn from_cql(value: CqlValue) -> Result<Value, DriverError> {
    Ok(match value {
        CqlValue::Boolean(b) => Value::Boolean(b),
        CqlValue::TinyInt(n) => Value::Int(n.into()),
        CqlValue::SmallInt(n) => Value::Int(n.into()),
        CqlValue::Int(n) => Value::Int(n),
        CqlValue::BigInt(n) => Value::BigInt(n),
        CqlValue::Float(n) => Value::Double(n.into()),
        CqlValue::Double(n) => Value::Double(n),
        CqlValue::Text(s) | CqlValue::Ascii(s) => Value::Text(s),
        CqlValue::Blob(bytes) => Value::Blob(bytes),
        CqlValue::Uuid(id) => Value::Uuid(id),
        CqlValue::Timeuuid(id) => Value::Uuid(id.into()),
        CqlValue::Timestamp(CqlTimestamp(ms)) => DateTime::from_timestamp_millis(ms)
            .map(Value::Timestamp)
            .ok_or_else(|| DriverError::new(format!("timestamp out of range: {ms}")))?,
        CqlValue::List(items) | CqlValue::Set(items) => {
            Value::List(items.into_iter().map(from_cql).collect::<Result<_, _>>()?)
        }
        CqlValue::Empty => Value::Null,
        other => return Err(DriverError::new(format!("unsupported CQL type: {other:?}"))),
    })
}
