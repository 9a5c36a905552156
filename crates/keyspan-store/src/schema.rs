//! Schema auto-creation on first open.
//!
//! DDL statements are collected before open. On open an existence check decides
//! whether the table already exists; if it does nothing is executed, so
//! statements added later are never applied to an existing table.

use keyspan_core::{CqlSession, DriverError};
use tracing::{debug, error, instrument};

use crate::error::StoreError;
use crate::statement::{qualified_table_name, quote_identifier};

const KEYSPACE_REPLICATION: &str = "{'class': 'SimpleStrategy', 'replication_factor': 3}";

/// Options for [`SchemaManager::ensure_index`].
#[derive(Clone, Debug, Default)]
pub struct IndexOptions {
    /// Custom index class, e.g. `USING 'StorageAttachedIndex'`.
    pub index_type: Option<String>,
    /// Not supported by the store; accepted and ignored.
    pub unique: bool,
}

/// What a failed existence check says about the schema.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct CheckOutcome {
    pub keyspace_missing: bool,
    pub table_missing: bool,
}

impl CheckOutcome {
    pub(crate) fn classify(err: &DriverError) -> Self {
        let msg = err.message.to_lowercase();
        let keyspace_missing = msg.contains("keyspace") && msg.contains("does not exist");
        let table_missing = (msg.contains("table") && msg.contains("does not exist"))
            || msg.contains("unconfigured table");
        Self {
            keyspace_missing,
            table_missing,
        }
    }

    fn is_provisioning_signal(self) -> bool {
        self.keyspace_missing || self.table_missing
    }
}

#[derive(Clone, Debug)]
pub struct SchemaManager {
    table: Option<String>,
    keyspace: Option<String>,
    statements: Vec<String>,
}

impl SchemaManager {
    pub fn new(table: Option<String>, keyspace: Option<String>) -> Self {
        Self {
            table,
            keyspace,
            statements: Vec::new(),
        }
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    /// `"keyspace"."table"`, or `None` without a table.
    pub fn quoted_table_name(&self) -> Option<String> {
        self.table
            .as_deref()
            .map(|table| qualified_table_name(self.keyspace.as_deref(), table))
    }

    pub fn statements(&self) -> &[String] {
        &self.statements
    }

    pub fn ensure_schema(&mut self, statement: impl Into<String>) {
        self.statements.push(statement.into());
    }

    /// Queue `CREATE INDEX IF NOT EXISTS` over `keys`, in the given order.
    /// The index name is prefixed with the keyspace when one is set.
    pub fn ensure_index(&mut self, name: &str, keys: &[&str], options: &IndexOptions) {
        let index_name = match self.keyspace.as_deref() {
            Some(ks) => quote_identifier(&format!("{ks}_{}", name.trim_matches('"'))),
            None => quote_identifier(name),
        };
        let table = self.quoted_table_name().unwrap_or_default();

        let mut builder = format!("CREATE INDEX IF NOT EXISTS {index_name} ON {table}");
        if let Some(index_type) = options.index_type.as_deref() {
            builder.push(' ');
            builder.push_str(index_type);
        }
        builder.push_str(&format!(" ({})", keys.join(", ")));
        self.ensure_schema(builder);
    }

    pub fn clear_schema(&mut self) {
        self.statements.clear();
    }

    /// Check for the table and create missing objects.
    #[instrument(skip(self, session), fields(table = ?self.table))]
    pub async fn create_schema(&self, trace_id: Option<&str>, session: &dyn CqlSession) -> Result<(), StoreError> {
        if self.statements.is_empty() {
            return Ok(());
        }
        let Some(table) = self.quoted_table_name() else {
            return Err(StoreError::PreconditionFailed(
                "table name is not defined".into(),
            ));
        };

        let check = format!("SELECT * FROM {table} LIMIT 1");
        let outcome = match session.execute(&check, &[]).await {
            Ok(_) => return Ok(()),
            Err(e) => {
                let outcome = CheckOutcome::classify(&e);
                if !outcome.is_provisioning_signal() {
                    return Err(e.into());
                }
                outcome
            }
        };

        if outcome.keyspace_missing {
            if let Some(ks) = self.keyspace.as_deref() {
                let statement = format!(
                    "CREATE KEYSPACE IF NOT EXISTS {} WITH replication={KEYSPACE_REPLICATION}",
                    quote_identifier(ks)
                );
                self.execute_ddl(trace_id, session, &statement).await?;
            }
        }

        debug!(trace_id, table = %table, "table does not exist, creating database objects");

        for statement in &self.statements {
            self.execute_ddl(trace_id, session, statement).await?;
        }
        Ok(())
    }

    async fn execute_ddl(&self, trace_id: Option<&str>, session: &dyn CqlSession, statement: &str) -> Result<(), StoreError> {
        session.execute(statement, &[]).await.map_err(|e| {
            error!(trace_id, statement, error = %e, "failed to autocreate database object");
            StoreError::SchemaCreationFailed {
                trace_id: trace_id.map(str::to_string),
                statement: statement.to_string(),
                cause: e,
            }
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use keyspan_core::{ConnectOptions, Connector, PoolOptions};
    use std::sync::Arc;

    use super::*;
    use crate::memory::MemoryCluster;

    async fn session(cluster: &MemoryCluster) -> Arc<dyn CqlSession> {
        cluster
            .connect(ConnectOptions {
                contact_points: vec!["localhost".into()],
                port: 9042,
                local_datacenter: None,
                keyspace: None,
                credentials: None,
                pool: PoolOptions::default(),
            })
            .await
            .unwrap()
    }

    fn dummy_schema() -> SchemaManager {
        let mut schema = SchemaManager::new(Some("dummies".into()), Some("test".into()));
        let table = schema.quoted_table_name().unwrap();
        schema.ensure_schema(format!(
            "CREATE TABLE {table} (id TEXT PRIMARY KEY, key TEXT, content TEXT)"
        ));
        schema.ensure_index("key", &["key"], &IndexOptions::default());
        schema
    }

    #[test]
    fn classifies_check_errors() {
        let ks = CheckOutcome::classify(&DriverError::new("Keyspace 'test' does not exist"));
        assert!(ks.keyspace_missing);

        let table = CheckOutcome::classify(&DriverError::new("unconfigured table dummies"));
        assert!(table.table_missing && !table.keyspace_missing);

        let table = CheckOutcome::classify(&DriverError::new("Table test.dummies DOES NOT EXIST"));
        assert!(table.table_missing);

        let other = CheckOutcome::classify(&DriverError::new("Not enough replicas available"));
        assert!(!other.is_provisioning_signal());
    }

    #[test]
    fn builds_index_statement() {
        let mut schema = SchemaManager::new(Some("dummies".into()), Some("test".into()));
        schema.ensure_index(
            "key",
            &["key", "content"],
            &IndexOptions {
                index_type: Some("USING 'sai'".into()),
                unique: true,
            },
        );
        assert_eq!(
            schema.statements(),
            ["CREATE INDEX IF NOT EXISTS \"test_key\" ON \"test\".\"dummies\" USING 'sai' (key, content)"]
        );

        let mut schema = SchemaManager::new(Some("dummies".into()), None);
        schema.ensure_index("\"by_key\"", &["key"], &IndexOptions::default());
        assert_eq!(
            schema.statements(),
            ["CREATE INDEX IF NOT EXISTS \"by_key\" ON \"dummies\" (key)"]
        );
    }

    #[test]
    fn clear_schema_empties_statements() {
        let mut schema = dummy_schema();
        assert_eq!(schema.statements().len(), 2);
        schema.clear_schema();
        assert!(schema.statements().is_empty());
    }

    #[tokio::test]
    async fn empty_schema_is_noop() {
        let cluster = MemoryCluster::new();
        let session = session(&cluster).await;
        SchemaManager::new(Some("dummies".into()), Some("test".into()))
            .create_schema(None, session.as_ref())
            .await
            .unwrap();
        assert!(cluster.executed().is_empty());
    }

    #[tokio::test]
    async fn first_open_creates_keyspace_then_statements_in_order() {
        let cluster = MemoryCluster::new();
        let session = session(&cluster).await;
        let schema = dummy_schema();

        schema.create_schema(Some("1"), session.as_ref()).await.unwrap();

        let executed = cluster.executed();
        assert_eq!(executed.len(), 4);
        assert_eq!(executed[0], "SELECT * FROM \"test\".\"dummies\" LIMIT 1");
        assert!(executed[1].starts_with("CREATE KEYSPACE IF NOT EXISTS \"test\""));
        assert_eq!(executed[2], schema.statements()[0]);
        assert_eq!(executed[3], schema.statements()[1]);
        assert!(cluster.has_table("test", "dummies"));
    }

    #[tokio::test]
    async fn existing_table_runs_no_ddl() {
        let cluster = MemoryCluster::new();
        let session = session(&cluster).await;
        let schema = dummy_schema();
        schema.create_schema(None, session.as_ref()).await.unwrap();
        cluster.clear_executed();

        schema.create_schema(None, session.as_ref()).await.unwrap();
        assert_eq!(cluster.executed(), ["SELECT * FROM \"test\".\"dummies\" LIMIT 1"]);
    }

    #[tokio::test]
    async fn existing_keyspace_skips_keyspace_creation() {
        let cluster = MemoryCluster::new();
        let session = session(&cluster).await;
        session
            .execute("CREATE KEYSPACE test WITH replication = {'class': 'SimpleStrategy', 'replication_factor': 1}", &[])
            .await
            .unwrap();
        cluster.clear_executed();

        dummy_schema().create_schema(None, session.as_ref()).await.unwrap();
        assert!(cluster
            .executed()
            .iter()
            .all(|s| !s.starts_with("CREATE KEYSPACE")));
        assert_eq!(cluster.executed().len(), 3);
    }

    #[tokio::test]
    async fn unrelated_check_error_passes_through() {
        let cluster = MemoryCluster::new();
        let session = session(&cluster).await;
        cluster.fail_statements("LIMIT 1", "Cannot achieve consistency level ONE");

        let err = dummy_schema().create_schema(None, session.as_ref()).await.unwrap_err();
        assert_matches!(err, StoreError::Driver(ref e) if e.message == "Cannot achieve consistency level ONE");
        assert_eq!(cluster.executed().len(), 1);
    }

    #[tokio::test]
    async fn ddl_failure_is_fatal_and_not_rolled_back() {
        let cluster = MemoryCluster::new();
        let session = session(&cluster).await;
        cluster.fail_statements("CREATE INDEX", "Index already exists with different options");

        let err = dummy_schema().create_schema(Some("9"), session.as_ref()).await.unwrap_err();
        assert_matches!(
            err,
            StoreError::SchemaCreationFailed { ref statement, ref trace_id, .. }
                if statement.starts_with("CREATE INDEX") && trace_id.as_deref() == Some("9")
        );
        assert!(cluster.has_table("test", "dummies"));
    }
}
