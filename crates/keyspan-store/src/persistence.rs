//! Generic filtered, paged persistence over one table.
//!
//! Entity components wrap a [`Persistence<T>`] and pass pre-built CQL
//! fragments for filters and sorting. Fragments are inserted verbatim.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::RwLock;
use rand::Rng;
use tracing::{debug, instrument, trace, warn};

use keyspan_core::{Connector, CqlSession, DataPage, PagingParams, Row, StoreConfig, Value, DEFAULT_MAX_PAGE_SIZE};

use crate::connection::ConnectionManager;
use crate::error::StoreError;
use crate::schema::SchemaManager;
use crate::statement::{push_filter, push_sort, RowBinding};

/// CQL `LIMIT` takes a 32-bit int.
const MAX_CQL_LIMIT: u64 = i32::MAX as u64;

/// Conversion between an entity and its stored row.
pub trait Record: Sized + Send + Sync {
    /// Entity to row. Column order is the order statements bind in.
    fn to_row(&self) -> Row;

    /// Row to entity. Projected reads may pass rows with missing columns.
    fn from_row(row: Row) -> Result<Self, StoreError>;

    /// Maps caller-supplied partial fields before a partial update.
    fn convert_partial(row: Row) -> Row {
        row
    }
}

/// Who owns the connection a component uses.
pub enum ConnectionHandle {
    /// Opened and closed together with the component.
    Owned(ConnectionManager),
    /// Opened by someone else; never closed by the component.
    Shared(Arc<ConnectionManager>),
}

impl ConnectionHandle {
    pub fn owned(connector: Arc<dyn Connector>) -> Self {
        Self::Owned(ConnectionManager::new(connector))
    }

    pub fn manager(&self) -> &ConnectionManager {
        match self {
            Self::Owned(conn) => conn,
            Self::Shared(conn) => conn,
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, Self::Owned(_))
    }
}

impl From<ConnectionManager> for ConnectionHandle {
    fn from(conn: ConnectionManager) -> Self {
        Self::Owned(conn)
    }
}

impl From<Arc<ConnectionManager>> for ConnectionHandle {
    fn from(conn: Arc<ConnectionManager>) -> Self {
        Self::Shared(conn)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ComponentState {
    Closed,
    Opening,
    SchemaCheck,
    Open,
    Closing,
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::SchemaCheck => "checking schema",
            Self::Open => "open",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}

type SchemaDefinition = Box<dyn Fn(&mut SchemaManager) + Send + Sync>;

struct Opened {
    session: Arc<dyn CqlSession>,
    table: Option<String>,
}

pub struct Persistence<T> {
    connection: ConnectionHandle,
    table: Option<String>,
    keyspace: Option<String>,
    max_page_size: u64,
    schema: Option<SchemaDefinition>,
    state: RwLock<ComponentState>,
    opened: RwLock<Option<Opened>>,
    _record: PhantomData<fn() -> T>,
}

impl<T: Record> Persistence<T> {
    pub fn new(connection: impl Into<ConnectionHandle>) -> Self {
        Self {
            connection: connection.into(),
            table: None,
            keyspace: None,
            max_page_size: DEFAULT_MAX_PAGE_SIZE,
            schema: None,
            state: RwLock::new(ComponentState::Closed),
            opened: RwLock::new(None),
            _record: PhantomData,
        }
    }

    #[must_use]
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    #[must_use]
    pub fn with_keyspace(mut self, keyspace: impl Into<String>) -> Self {
        self.keyspace = Some(keyspace.into());
        self
    }

    /// Apply configuration. Unset table and keyspace keep their previous
    /// values. An owned connection is configured from the same config.
    pub fn configure(&mut self, config: &StoreConfig) {
        if let Some(table) = config.table_name() {
            self.table = Some(table.to_string());
        }
        if let Some(keyspace) = config.keyspace.as_deref() {
            self.keyspace = Some(keyspace.to_string());
        }
        self.max_page_size = config.max_page_size();
        if let ConnectionHandle::Owned(conn) = &mut self.connection {
            conn.configure(config);
        }
    }

    /// Register the schema definition. It runs on every open against a
    /// fresh [`SchemaManager`] targeting the resolved table and keyspace.
    pub fn define_schema<F>(&mut self, define: F)
    where
        F: Fn(&mut SchemaManager) + Send + Sync + 'static,
    {
        self.schema = Some(Box::new(define));
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    pub fn max_page_size(&self) -> u64 {
        self.max_page_size
    }

    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    pub fn state(&self) -> ComponentState {
        *self.state.read()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ComponentState::Open
    }

    /// Session for entity-specific statements. `None` unless open.
    pub fn session(&self) -> Option<Arc<dyn CqlSession>> {
        self.opened.read().as_ref().map(|o| o.session.clone())
    }

    /// Qualified table name in effect while open.
    pub fn quoted_table_name(&self) -> Option<String> {
        self.opened.read().as_ref().and_then(|o| o.table.clone())
    }

    #[instrument(skip(self), fields(table = ?self.table))]
    pub async fn open(&self, trace_id: Option<&str>) -> Result<(), StoreError> {
        {
            let mut state = self.state.write();
            match *state {
                ComponentState::Open => return Ok(()),
                ComponentState::Closed => *state = ComponentState::Opening,
                other => {
                    return Err(StoreError::invalid_state(
                        trace_id,
                        format!("cannot open while {other}"),
                    ))
                }
            }
        }

        match self.establish(trace_id).await {
            Ok(opened) => {
                *self.opened.write() = Some(opened);
                self.set_state(ComponentState::Open);
                Ok(())
            }
            Err(e) => {
                if let ConnectionHandle::Owned(conn) = &self.connection {
                    if let Err(close_err) = conn.close(trace_id).await {
                        warn!(trace_id, error = %close_err, "failed to release connection after open failure");
                    }
                }
                self.set_state(ComponentState::Closed);
                Err(e)
            }
        }
    }

    async fn establish(&self, trace_id: Option<&str>) -> Result<Opened, StoreError> {
        let conn = self.connection.manager();
        if self.connection.is_owned() {
            conn.open(trace_id).await?;
        }
        let Some(session) = conn.session() else {
            return Err(StoreError::ConnectionFailed {
                trace_id: trace_id.map(str::to_string),
                message: "connection is not opened".into(),
                cause: None,
            });
        };

        self.set_state(ComponentState::SchemaCheck);
        let keyspace = self.keyspace.clone().or_else(|| conn.keyspace());
        let mut schema = SchemaManager::new(self.table.clone(), keyspace);
        if let Some(define) = &self.schema {
            define(&mut schema);
        }
        schema.create_schema(trace_id, session.as_ref()).await?;

        let table = schema.quoted_table_name();
        debug!(
            trace_id,
            datacenter = ?conn.datacenter(),
            table = ?table,
            "connected to store"
        );
        Ok(Opened { session, table })
    }

    #[instrument(skip(self), fields(table = ?self.table))]
    pub async fn close(&self, trace_id: Option<&str>) -> Result<(), StoreError> {
        {
            let mut state = self.state.write();
            if *state != ComponentState::Open {
                return Ok(());
            }
            *state = ComponentState::Closing;
        }
        self.opened.write().take();

        let result = match &self.connection {
            ConnectionHandle::Owned(conn) => conn.close(trace_id).await,
            ConnectionHandle::Shared(_) => Ok(()),
        };
        self.set_state(ComponentState::Closed);
        result
    }

    fn set_state(&self, state: ComponentState) {
        *self.state.write() = state;
    }

    /// Session and qualified table of an open component.
    pub(crate) fn target(&self, trace_id: Option<&str>) -> Result<(Arc<dyn CqlSession>, String), StoreError> {
        let opened = self.opened.read();
        let Some(opened) = opened.as_ref() else {
            return Err(StoreError::invalid_state(trace_id, "component is not opened"));
        };
        let Some(table) = opened.table.clone() else {
            return Err(StoreError::PreconditionFailed(
                "table name is not defined".into(),
            ));
        };
        Ok((opened.session.clone(), table))
    }

    /// One page of matching rows. Rows before `skip` are read and dropped,
    /// since the store has no offset clause.
    #[instrument(skip(self, paging), fields(table = ?self.table))]
    pub async fn get_page_by_filter(
        &self,
        trace_id: Option<&str>,
        filter: Option<&str>,
        paging: &PagingParams,
        sort: Option<&str>,
        projection: Option<&[&str]>,
    ) -> Result<DataPage<T>, StoreError> {
        let (session, table) = self.target(trace_id)?;
        let skip = paging.skip();
        let take = paging.take(self.max_page_size);

        let mut items = Vec::new();
        if take > 0 {
            let mut query = format!("SELECT {} FROM {table}", select_list(projection));
            push_filter(&mut query, filter);
            push_sort(&mut query, sort);
            query.push_str(&format!(" LIMIT {}", skip.saturating_add(take).min(MAX_CQL_LIMIT)));

            let mut rows = session.stream(&query, &[]).await?;
            let mut index = 0u64;
            while let Some(row) = rows.next().await {
                let row = row?;
                if index >= skip {
                    items.push(T::from_row(row)?);
                    if items.len() as u64 >= take {
                        break;
                    }
                }
                index += 1;
            }
        }
        trace!(trace_id, count = items.len(), table = %table, "retrieved page");

        let total = if paging.total {
            Some(self.get_count_by_filter(trace_id, filter).await?)
        } else {
            None
        };
        Ok(DataPage::new(items, total))
    }

    #[instrument(skip(self), fields(table = ?self.table))]
    pub async fn get_count_by_filter(&self, trace_id: Option<&str>, filter: Option<&str>) -> Result<u64, StoreError> {
        let (session, table) = self.target(trace_id)?;
        let mut query = format!("SELECT COUNT(*) FROM {table}");
        push_filter(&mut query, filter);

        let result = session.execute(&query, &[]).await?;
        let count = result
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_i64)
            .map_or(0, |n| u64::try_from(n).unwrap_or(0));
        trace!(trace_id, count, table = %table, "counted items");
        Ok(count)
    }

    #[instrument(skip(self), fields(table = ?self.table))]
    pub async fn get_list_by_filter(
        &self,
        trace_id: Option<&str>,
        filter: Option<&str>,
        sort: Option<&str>,
        projection: Option<&[&str]>,
    ) -> Result<Vec<T>, StoreError> {
        let (session, table) = self.target(trace_id)?;
        let mut query = format!("SELECT {} FROM {table}", select_list(projection));
        push_filter(&mut query, filter);
        push_sort(&mut query, sort);

        let mut rows = session.stream(&query, &[]).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await {
            items.push(T::from_row(row?)?);
        }
        trace!(trace_id, count = items.len(), table = %table, "retrieved items");
        Ok(items)
    }

    /// A random matching row. The offset is capped at the max page size, so
    /// only the first page of matches is ever sampled.
    #[instrument(skip(self), fields(table = ?self.table))]
    pub async fn get_one_random(&self, trace_id: Option<&str>, filter: Option<&str>) -> Result<Option<T>, StoreError> {
        let count = self.get_count_by_filter(trace_id, filter).await?;
        if count == 0 {
            trace!(trace_id, "no items matched for random pick");
            return Ok(None);
        }
        let (session, table) = self.target(trace_id)?;
        let offset = rand::thread_rng().gen_range(0..count.min(self.max_page_size));

        let mut query = format!("SELECT * FROM {table}");
        push_filter(&mut query, filter);
        query.push_str(&format!(" LIMIT {}", offset + 1));

        let mut rows = session.stream(&query, &[]).await?;
        let mut last = None;
        while let Some(row) = rows.next().await {
            last = Some(row?);
        }
        trace!(trace_id, offset, table = %table, "retrieved random item");
        last.map(T::from_row).transpose()
    }

    /// Insert the item. The store overwrites any row with the same key.
    #[instrument(skip(self, item), fields(table = ?self.table))]
    pub async fn create(&self, trace_id: Option<&str>, item: T) -> Result<T, StoreError> {
        let (session, table) = self.target(trace_id)?;
        let binding = RowBinding::from_row(item.to_row());
        let query = format!(
            "INSERT INTO {table} ({}) VALUES ({})",
            binding.columns, binding.placeholders
        );
        session.execute(&query, &binding.values).await?;
        trace!(trace_id, table = %table, "created item");
        Ok(item)
    }

    /// The store does not report how many rows were deleted.
    #[instrument(skip(self), fields(table = ?self.table))]
    pub async fn delete_by_filter(&self, trace_id: Option<&str>, filter: Option<&str>) -> Result<(), StoreError> {
        let (session, table) = self.target(trace_id)?;
        let mut query = format!("DELETE FROM {table}");
        push_filter(&mut query, filter);
        session.execute(&query, &[]).await?;
        trace!(trace_id, table = %table, "deleted items");
        Ok(())
    }

    #[instrument(skip(self), fields(table = ?self.table))]
    pub async fn clear(&self, trace_id: Option<&str>) -> Result<(), StoreError> {
        if self.table.is_none() {
            return Err(StoreError::PreconditionFailed(
                "table name is not defined".into(),
            ));
        }
        let (session, table) = self.target(trace_id)?;
        session.execute(&format!("TRUNCATE {table}"), &[]).await?;
        trace!(trace_id, table = %table, "cleared table");
        Ok(())
    }
}

fn select_list(projection: Option<&[&str]>) -> String {
    match projection {
        Some(columns) if !columns.is_empty() => columns.join(","),
        _ => "*".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use keyspan_core::StoreOptions;

    use super::*;
    use crate::memory::MemoryCluster;
    use crate::row_helpers::{get, get_opt};

    #[derive(Clone, Debug, PartialEq)]
    struct Note {
        id: String,
        body: Option<String>,
    }

    impl Record for Note {
        fn to_row(&self) -> Row {
            Row::new().with("id", &self.id).with("body", self.body.clone())
        }

        fn from_row(row: Row) -> Result<Self, StoreError> {
            Ok(Self {
                id: get(&row, "notes", "id")?,
                body: get_opt(&row, "notes", "body")?,
            })
        }
    }

    fn note(id: &str) -> Note {
        Note {
            id: id.into(),
            body: Some(format!("body {id}")),
        }
    }

    fn config() -> StoreConfig {
        StoreConfig {
            host: "localhost".into(),
            keyspace: Some("test".into()),
            table: Some("notes".into()),
            options: StoreOptions {
                max_page_size: Some(3),
                ..StoreOptions::default()
            },
            ..StoreConfig::default()
        }
    }

    fn persistence(cluster: &MemoryCluster) -> Persistence<Note> {
        let mut p: Persistence<Note> = Persistence::new(ConnectionHandle::owned(Arc::new(cluster.clone())));
        p.configure(&config());
        p.define_schema(|schema| {
            let table = schema.quoted_table_name().unwrap_or_default();
            schema.ensure_schema(format!("CREATE TABLE {table} (id TEXT PRIMARY KEY, body TEXT)"));
        });
        p
    }

    async fn seeded(cluster: &MemoryCluster, n: usize) -> Persistence<Note> {
        let p = persistence(cluster);
        p.open(None).await.unwrap();
        for i in 1..=n {
            p.create(None, note(&i.to_string())).await.unwrap();
        }
        cluster.clear_executed();
        p
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let cluster = MemoryCluster::new();
        let p = persistence(&cluster);
        assert_eq!(p.state(), ComponentState::Closed);

        p.open(Some("1")).await.unwrap();
        assert!(p.is_open());
        assert_eq!(p.quoted_table_name().as_deref(), Some("\"test\".\"notes\""));
        assert!(cluster.has_table("test", "notes"));

        p.open(Some("1")).await.unwrap();
        assert_eq!(cluster.connect_count(), 1);

        p.close(Some("1")).await.unwrap();
        assert_eq!(p.state(), ComponentState::Closed);
        assert!(!p.connection().manager().is_open());
        p.close(Some("1")).await.unwrap();
    }

    #[tokio::test]
    async fn operations_require_open() {
        let p = persistence(&MemoryCluster::new());
        assert_matches!(
            p.get_count_by_filter(Some("x"), None).await,
            Err(StoreError::InvalidState { ref trace_id, .. }) if trace_id.as_deref() == Some("x")
        );
        assert_matches!(p.create(None, note("1")).await, Err(StoreError::InvalidState { .. }));
    }

    #[tokio::test]
    async fn schema_failure_closes_owned_connection() {
        let cluster = MemoryCluster::new();
        cluster.fail_statements("CREATE TABLE", "bad ddl");
        let p = persistence(&cluster);

        assert_matches!(
            p.open(None).await,
            Err(StoreError::SchemaCreationFailed { .. })
        );
        assert_eq!(p.state(), ComponentState::Closed);
        assert!(!p.connection().manager().is_open());

        cluster.clear_failures();
        p.open(None).await.unwrap();
        assert!(p.is_open());
    }

    #[tokio::test]
    async fn shared_connection_must_be_open_and_is_not_closed() {
        let cluster = MemoryCluster::new();
        let mut conn = ConnectionManager::new(Arc::new(cluster.clone()));
        conn.configure(&config());
        let conn = Arc::new(conn);

        let mut p: Persistence<Note> = Persistence::new(conn.clone()).with_table("notes");
        p.define_schema(|schema| {
            let table = schema.quoted_table_name().unwrap_or_default();
            schema.ensure_schema(format!("CREATE TABLE {table} (id TEXT PRIMARY KEY, body TEXT)"));
        });
        assert_matches!(
            p.open(None).await,
            Err(StoreError::ConnectionFailed { cause: None, .. })
        );

        conn.open(None).await.unwrap();
        p.open(None).await.unwrap();
        // keyspace falls back to the connection's
        assert_eq!(p.quoted_table_name().as_deref(), Some("\"test\".\"notes\""));

        p.close(None).await.unwrap();
        assert!(conn.is_open());
    }

    #[tokio::test]
    async fn page_skips_and_takes_in_scan_order() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 3).await;

        let page = p
            .get_page_by_filter(None, None, &PagingParams::new(Some(1), Some(1), true), None, None)
            .await
            .unwrap();
        assert_eq!(page.data, vec![note("2")]);
        assert_eq!(page.total, Some(3));
        assert_eq!(
            cluster.executed(),
            [
                "SELECT * FROM \"test\".\"notes\" LIMIT 2",
                "SELECT COUNT(*) FROM \"test\".\"notes\"",
            ]
        );
    }

    #[tokio::test]
    async fn take_defaults_to_and_is_capped_by_max_page_size() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 5).await;

        let page = p
            .get_page_by_filter(None, None, &PagingParams::default(), None, None)
            .await
            .unwrap();
        assert_eq!(page.data.len(), 3);
        assert_eq!(page.total, None);

        let page = p
            .get_page_by_filter(None, None, &PagingParams::new(None, Some(50), false), None, None)
            .await
            .unwrap();
        assert_eq!(page.data.len(), 3);
    }

    #[tokio::test]
    async fn huge_skip_yields_empty_page() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 1).await;

        let page = p
            .get_page_by_filter(None, None, &PagingParams::new(Some(u64::MAX), Some(10), true), None, None)
            .await
            .unwrap();
        assert!(page.data.is_empty());
        assert_eq!(page.total, Some(1));
        assert_eq!(
            cluster.executed()[0],
            format!("SELECT * FROM \"test\".\"notes\" LIMIT {}", i32::MAX)
        );
    }

    #[tokio::test]
    async fn zero_take_issues_no_select() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 2).await;
        let page = p
            .get_page_by_filter(None, None, &PagingParams::new(Some(0), Some(0), false), None, None)
            .await
            .unwrap();
        assert!(page.data.is_empty());
        assert!(cluster.executed().is_empty());
    }

    #[tokio::test]
    async fn filter_sort_and_projection() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 3).await;

        let items = p
            .get_list_by_filter(None, Some("id IN ('1','3')"), Some("id DESC"), None)
            .await
            .unwrap();
        assert_eq!(items, vec![note("3"), note("1")]);

        let items = p
            .get_list_by_filter(None, Some("id = '2'"), None, Some(&["id"][..]))
            .await
            .unwrap();
        assert_eq!(items, vec![Note { id: "2".into(), body: None }]);
        assert_eq!(
            cluster.executed().last().map(String::as_str),
            Some("SELECT id FROM \"test\".\"notes\" WHERE id = '2'")
        );
    }

    #[tokio::test]
    async fn count_and_delete_by_filter() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 4).await;
        assert_eq!(p.get_count_by_filter(None, Some("id > '2'")).await.unwrap(), 2);

        p.delete_by_filter(None, Some("id > '2'")).await.unwrap();
        assert_eq!(p.get_count_by_filter(None, None).await.unwrap(), 2);
        assert_eq!(p.get_count_by_filter(None, Some("")).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn random_pick_within_first_page() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 5).await;
        for _ in 0..10 {
            let item = p.get_one_random(None, None).await.unwrap().unwrap();
            assert!(["1", "2", "3"].contains(&item.id.as_str()));
        }
        let last = cluster.executed().pop().unwrap();
        assert!(last.starts_with("SELECT * FROM \"test\".\"notes\" LIMIT "));
    }

    #[tokio::test]
    async fn random_pick_on_empty_table() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 0).await;
        assert_eq!(p.get_one_random(None, None).await.unwrap(), None);
        assert_eq!(cluster.executed().len(), 1);
    }

    #[tokio::test]
    async fn create_binds_in_row_order() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 0).await;
        let created = p.create(None, note("7")).await.unwrap();
        assert_eq!(created, note("7"));
        assert_eq!(
            cluster.executed(),
            ["INSERT INTO \"test\".\"notes\" (\"id\",\"body\") VALUES (?,?)"]
        );
    }

    #[tokio::test]
    async fn clear_truncates() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 3).await;
        p.clear(None).await.unwrap();
        assert_eq!(cluster.row_count("test", "notes"), 0);
    }

    #[tokio::test]
    async fn clear_without_table_fails() {
        let cluster = MemoryCluster::new();
        let mut p: Persistence<Note> = Persistence::new(ConnectionHandle::owned(Arc::new(cluster)));
        p.configure(&StoreConfig {
            host: "localhost".into(),
            ..StoreConfig::default()
        });
        p.open(None).await.unwrap();
        assert_matches!(p.clear(None).await, Err(StoreError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn query_errors_pass_through() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 1).await;
        cluster.fail_statements("COUNT", "read timeout");
        assert_matches!(
            p.get_count_by_filter(None, None).await,
            Err(StoreError::Driver(ref e)) if e.message == "read timeout"
        );
    }

    #[tokio::test]
    async fn corrupt_rows_surface() {
        let cluster = MemoryCluster::new();
        let p = seeded(&cluster, 0).await;
        p.session()
            .unwrap()
            .execute("INSERT INTO \"test\".\"notes\" (\"body\",\"id\") VALUES ('x', '9')", &[])
            .await
            .unwrap();
        p.session()
            .unwrap()
            .execute("UPDATE \"test\".\"notes\" SET body = null WHERE id = '9'", &[])
            .await
            .unwrap();
        assert_eq!(p.get_list_by_filter(None, None, None, None).await.unwrap().len(), 1);

        p.session()
            .unwrap()
            .execute("INSERT INTO \"test\".\"notes\" (\"body\",\"id\") VALUES (?, ?)", &[Value::BigInt(1), "10".into()])
            .await
            .unwrap();
        assert_matches!(
            p.get_list_by_filter(None, None, None, None).await,
            Err(StoreError::CorruptRow { ref column, .. }) if column == "body"
        );
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(48))]

            #[test]
            fn page_is_the_skip_take_window(n in 0usize..10, skip in 0u64..14, take in 0u64..6) {
                let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
                let page = rt.block_on(async {
                    let cluster = MemoryCluster::new();
                    let p = seeded(&cluster, n).await;
                    p.get_page_by_filter(None, None, &PagingParams::new(Some(skip), Some(take), true), None, None)
                        .await
                        .unwrap()
                });

                let n = n as u64;
                let start = skip.min(n);
                // max_page_size is 3 in these tests
                let end = (skip + take.min(3)).min(n);
                let expected: Vec<Note> = (start..end).map(|i| note(&(i + 1).to_string())).collect();
                prop_assert_eq!(page.data, expected);
                prop_assert_eq!(page.total, Some(n));
            }
        }
    }
}
