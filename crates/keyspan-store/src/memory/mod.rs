//! In-process CQL cluster.
//!
//! Interprets the statements the persistence layer generates against
//! in-memory tables. Used by tests and local development in place of a real
//! cluster. Failures can be injected per statement, on connect and on
//! shutdown. Statements are parsed with `sqlparser`. Only built for tests and
//! behind the `testing` feature.

mod parse;

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;
use tracing::trace;

use keyspan_core::{ConnectOptions, Connector, CqlSession, DriverError, ResultSet, Row, RowStream, Value};

use parse::{CmpOp, Condition, Operand, Projection, Statement, TableRef};

#[derive(Debug, Default)]
struct Table {
    columns: Vec<String>,
    primary_key: String,
    rows: Vec<Row>,
}

#[derive(Debug, Default)]
struct Keyspace {
    tables: BTreeMap<String, Table>,
}

#[derive(Debug, Default)]
struct ClusterState {
    keyspaces: BTreeMap<String, Keyspace>,
    executed: Vec<String>,
    statement_failures: Vec<(String, String)>,
    connect_failure: Option<String>,
    shutdown_failure: Option<String>,
    last_connect: Option<ConnectOptions>,
    connects: usize,
}

/// Shared handle to an in-memory cluster. Clones see the same data.
#[derive(Clone, Debug, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every subsequent connect with `message`.
    pub fn fail_connect(&self, message: &str) {
        self.state.lock().connect_failure = Some(message.to_string());
    }

    /// Fail every subsequent session shutdown with `message`.
    pub fn fail_shutdown(&self, message: &str) {
        self.state.lock().shutdown_failure = Some(message.to_string());
    }

    /// Fail statements whose text contains `pattern`.
    pub fn fail_statements(&self, pattern: &str, message: &str) {
        self.state
            .lock()
            .statement_failures
            .push((pattern.to_string(), message.to_string()));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.statement_failures.clear();
        state.connect_failure = None;
        state.shutdown_failure = None;
    }

    /// Every statement received so far, failed ones included.
    pub fn executed(&self) -> Vec<String> {
        self.state.lock().executed.clone()
    }

    pub fn clear_executed(&self) {
        self.state.lock().executed.clear();
    }

    pub fn has_keyspace(&self, keyspace: &str) -> bool {
        self.state.lock().keyspaces.contains_key(keyspace)
    }

    pub fn has_table(&self, keyspace: &str, table: &str) -> bool {
        self.state
            .lock()
            .keyspaces
            .get(keyspace)
            .is_some_and(|ks| ks.tables.contains_key(table))
    }

    pub fn row_count(&self, keyspace: &str, table: &str) -> usize {
        self.state
            .lock()
            .keyspaces
            .get(keyspace)
            .and_then(|ks| ks.tables.get(table))
            .map_or(0, |t| t.rows.len())
    }

    pub fn last_connect_options(&self) -> Option<ConnectOptions> {
        self.state.lock().last_connect.clone()
    }

    pub fn connect_count(&self) -> usize {
        self.state.lock().connects
    }

    fn run(&self, default_keyspace: Option<&str>, query: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let mut state = self.state.lock();
        state.executed.push(query.to_string());
        if let Some((_, message)) = state
            .statement_failures
            .iter()
            .find(|(pattern, _)| query.contains(pattern.as_str()))
        {
            return Err(DriverError::new(message.clone()));
        }

        let (statement, markers) = parse::parse(query)?;
        if markers != params.len() {
            return Err(DriverError::new(format!(
                "Invalid amount of bind variables: expected {markers}, got {}",
                params.len()
            )));
        }
        state.apply(default_keyspace, statement, params)
    }
}

#[async_trait]
impl Connector for MemoryCluster {
    async fn connect(&self, options: ConnectOptions) -> Result<Arc<dyn CqlSession>, DriverError> {
        let mut state = self.state.lock();
        state.last_connect = Some(options.clone());
        if let Some(message) = state.connect_failure.clone() {
            return Err(DriverError::new(message));
        }
        state.connects += 1;
        Ok(Arc::new(MemorySession {
            cluster: self.clone(),
            keyspace: options.keyspace,
            closed: AtomicBool::new(false),
        }))
    }
}

/// A session on a [`MemoryCluster`]. Unqualified tables resolve against the
/// keyspace given at connect time.
pub struct MemorySession {
    cluster: MemoryCluster,
    keyspace: Option<String>,
    closed: AtomicBool,
}

impl MemorySession {
    fn check_open(&self) -> Result<(), DriverError> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(DriverError::new("session has been shut down"));
        }
        Ok(())
    }
}

#[async_trait]
impl CqlSession for MemorySession {
    async fn execute(&self, query: &str, params: &[Value]) -> Result<ResultSet, DriverError> {
        self.check_open()?;
        trace!(query, params = params.len(), "memory execute");
        let rows = self.cluster.run(self.keyspace.as_deref(), query, params)?;
        Ok(ResultSet::new(rows))
    }

    async fn stream(&self, query: &str, params: &[Value]) -> Result<RowStream, DriverError> {
        self.check_open()?;
        trace!(query, params = params.len(), "memory stream");
        let rows = self.cluster.run(self.keyspace.as_deref(), query, params)?;
        Ok(Box::pin(stream::iter(rows.into_iter().map(Ok))))
    }

    async fn shutdown(&self) -> Result<(), DriverError> {
        self.closed.store(true, AtomicOrdering::Release);
        match self.cluster.state.lock().shutdown_failure.clone() {
            Some(message) => Err(DriverError::new(message)),
            None => Ok(()),
        }
    }
}

fn bind(operand: &Operand, params: &[Value]) -> Result<Value, DriverError> {
    match operand {
        Operand::Literal(value) => Ok(value.clone()),
        Operand::Placeholder(i) => params
            .get(*i)
            .cloned()
            .ok_or_else(|| DriverError::new(format!("no value bound for marker {i}"))),
    }
}

/// Compares across the numeric variants and between text and uuid.
fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Uuid(u), Value::Text(s)) => Some(u.to_string().as_str().cmp(s.as_str())),
        (Value::Text(s), Value::Uuid(u)) => Some(s.as_str().cmp(u.to_string().as_str())),
        (Value::Int(_) | Value::BigInt(_), Value::Int(_) | Value::BigInt(_)) => {
            Some(a.as_i64()?.cmp(&b.as_i64()?))
        }
        (Value::Double(x), other) | (other, Value::Double(x)) if other.as_i64().is_some() => {
            let y = other.as_i64()? as f64;
            if matches!(a, Value::Double(_)) {
                x.partial_cmp(&y)
            } else {
                y.partial_cmp(x)
            }
        }
        _ => a.partial_cmp(b),
    }
}

fn matches_condition(row: &Row, condition: &Condition, params: &[Value]) -> Result<bool, DriverError> {
    let value = row.get(&condition.column).unwrap_or(&Value::Null);
    let mut bound = Vec::with_capacity(condition.operands.len());
    for operand in &condition.operands {
        bound.push(bind(operand, params)?);
    }
    if value.is_null() {
        return Ok(false);
    }
    let ord = |rhs: &Value| compare(value, rhs);
    Ok(match condition.op {
        CmpOp::Eq => bound.first().is_some_and(|v| ord(v) == Some(Ordering::Equal)),
        CmpOp::In => bound.iter().any(|v| ord(v) == Some(Ordering::Equal)),
        CmpOp::Lt => bound.first().is_some_and(|v| ord(v) == Some(Ordering::Less)),
        CmpOp::Le => bound
            .first()
            .is_some_and(|v| matches!(ord(v), Some(Ordering::Less | Ordering::Equal))),
        CmpOp::Gt => bound.first().is_some_and(|v| ord(v) == Some(Ordering::Greater)),
        CmpOp::Ge => bound
            .first()
            .is_some_and(|v| matches!(ord(v), Some(Ordering::Greater | Ordering::Equal))),
    })
}

impl Table {
    fn check_columns<'a>(&self, names: impl IntoIterator<Item = &'a String>) -> Result<(), DriverError> {
        for name in names {
            if !self.columns.contains(name) {
                return Err(DriverError::new(format!("Undefined column name {name}")));
            }
        }
        Ok(())
    }

    fn blank_row(&self) -> Row {
        self.columns
            .iter()
            .map(|c| (c.clone(), Value::Null))
            .collect()
    }

    fn matching(&self, filter: &[Condition], params: &[Value]) -> Result<Vec<usize>, DriverError> {
        self.check_columns(filter.iter().map(|c| &c.column))?;
        let mut hits = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            let mut all = true;
            for condition in filter {
                if !matches_condition(row, condition, params)? {
                    all = false;
                    break;
                }
            }
            if all {
                hits.push(i);
            }
        }
        Ok(hits)
    }

    fn position_of(&self, key: &Value) -> Option<usize> {
        self.rows.iter().position(|row| {
            row.get(&self.primary_key)
                .is_some_and(|v| compare(v, key) == Some(Ordering::Equal))
        })
    }

    /// Upsert by primary key, touching only the given columns.
    fn upsert(&mut self, assignments: Vec<(String, Value)>) -> Result<(), DriverError> {
        let key = assignments
            .iter()
            .find(|(c, _)| *c == self.primary_key)
            .map(|(_, v)| v.clone())
            .filter(|v| !v.is_null())
            .ok_or_else(|| {
                DriverError::new(format!("Some partition key parts are missing: {}", self.primary_key))
            })?;
        let index = match self.position_of(&key) {
            Some(i) => i,
            None => {
                self.rows.push(self.blank_row());
                self.rows.len() - 1
            }
        };
        let row = &mut self.rows[index];
        for (column, value) in assignments {
            row.set(column, value);
        }
        Ok(())
    }
}

impl ClusterState {
    fn resolve_keyspace(&self, table: &TableRef, default_keyspace: Option<&str>) -> Result<String, DriverError> {
        let name = table
            .keyspace
            .as_deref()
            .or(default_keyspace)
            .ok_or_else(|| {
                DriverError::new(
                    "No keyspace has been specified. USE a keyspace, or explicitly specify keyspace.tablename",
                )
            })?;
        if !self.keyspaces.contains_key(name) {
            return Err(DriverError::new(format!("Keyspace {name} does not exist")));
        }
        Ok(name.to_string())
    }

    fn table_mut(&mut self, table: &TableRef, default_keyspace: Option<&str>) -> Result<&mut Table, DriverError> {
        let ks = self.resolve_keyspace(table, default_keyspace)?;
        self.keyspaces
            .get_mut(&ks)
            .and_then(|k| k.tables.get_mut(&table.name))
            .ok_or_else(|| DriverError::new(format!("unconfigured table {}", table.name)))
    }

    fn apply(&mut self, default_keyspace: Option<&str>, statement: Statement, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        match statement {
            Statement::CreateKeyspace { name, if_not_exists } => {
                if self.keyspaces.contains_key(&name) {
                    if !if_not_exists {
                        return Err(DriverError::new(format!(
                            "Keyspace {name} already exists"
                        )));
                    }
                } else {
                    self.keyspaces.insert(name, Keyspace::default());
                }
                Ok(Vec::new())
            }
            Statement::CreateTable {
                table,
                if_not_exists,
                columns,
                primary_key,
            } => {
                let ks = self.resolve_keyspace(&table, default_keyspace)?;
                if !columns.contains(&primary_key) {
                    return Err(DriverError::new(format!(
                        "Unknown definition {primary_key} referenced in PRIMARY KEY"
                    )));
                }
                let tables = &mut self
                    .keyspaces
                    .entry(ks.clone())
                    .or_default()
                    .tables;
                if tables.contains_key(&table.name) {
                    if !if_not_exists {
                        return Err(DriverError::new(format!(
                            "Table {ks}.{} already exists",
                            table.name
                        )));
                    }
                } else {
                    tables.insert(
                        table.name,
                        Table {
                            columns,
                            primary_key,
                            rows: Vec::new(),
                        },
                    );
                }
                Ok(Vec::new())
            }
            Statement::CreateIndex { table, columns } => {
                let target = self.table_mut(&table, default_keyspace)?;
                target.check_columns(&columns)?;
                Ok(Vec::new())
            }
            Statement::Select {
                table,
                projection,
                filter,
                order,
                limit,
            } => {
                let target = self.table_mut(&table, default_keyspace)?;
                let hits = target.matching(&filter, params)?;
                if projection == Projection::Count {
                    let count = Row::new().with("count", hits.len() as i64);
                    return Ok(vec![count]);
                }

                let mut rows: Vec<Row> = hits.into_iter().map(|i| target.rows[i].clone()).collect();
                if let Some((column, descending)) = order {
                    target.check_columns([&column])?;
                    rows.sort_by(|a, b| {
                        let ord = match (a.get(&column), b.get(&column)) {
                            (Some(x), Some(y)) => compare(x, y).unwrap_or(Ordering::Equal),
                            _ => Ordering::Equal,
                        };
                        if descending {
                            ord.reverse()
                        } else {
                            ord
                        }
                    });
                }
                if let Some(limit) = limit {
                    let limit = bind(&limit, params)?
                        .as_i64()
                        .filter(|n| *n > 0)
                        .ok_or_else(|| DriverError::new("LIMIT must be strictly positive"))?;
                    rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
                }
                if let Projection::Columns(columns) = projection {
                    target.check_columns(&columns)?;
                    rows = rows
                        .into_iter()
                        .map(|row| {
                            columns
                                .iter()
                                .map(|c| (c.clone(), row.get(c).cloned().unwrap_or(Value::Null)))
                                .collect()
                        })
                        .collect();
                }
                Ok(rows)
            }
            Statement::Insert {
                table,
                columns,
                values,
            } => {
                let target = self.table_mut(&table, default_keyspace)?;
                target.check_columns(&columns)?;
                let mut assignments = Vec::with_capacity(columns.len());
                for (column, operand) in columns.into_iter().zip(&values) {
                    assignments.push((column, bind(operand, params)?));
                }
                target.upsert(assignments)?;
                Ok(Vec::new())
            }
            Statement::Update {
                table,
                assignments,
                filter,
            } => {
                let target = self.table_mut(&table, default_keyspace)?;
                target.check_columns(assignments.iter().map(|(c, _)| c))?;
                if assignments.iter().any(|(c, _)| *c == target.primary_key) {
                    return Err(DriverError::new(format!(
                        "PRIMARY KEY part {} found in SET part",
                        target.primary_key
                    )));
                }
                let mut bound = Vec::with_capacity(assignments.len());
                for (column, operand) in &assignments {
                    bound.push((column.clone(), bind(operand, params)?));
                }

                let keys = primary_key_values(target, &filter, params)?;
                for key in keys {
                    let mut values = vec![(target.primary_key.clone(), key)];
                    values.extend(bound.iter().cloned());
                    target.upsert(values)?;
                }
                Ok(Vec::new())
            }
            Statement::Delete { table, filter } => {
                let target = self.table_mut(&table, default_keyspace)?;
                let hits = target.matching(&filter, params)?;
                let mut index = 0;
                target.rows.retain(|_| {
                    let keep = !hits.contains(&index);
                    index += 1;
                    keep
                });
                Ok(Vec::new())
            }
            Statement::Truncate { table } => {
                self.table_mut(&table, default_keyspace)?.rows.clear();
                Ok(Vec::new())
            }
        }
    }
}

/// Keys named by an UPDATE's `WHERE pk = ?` or `WHERE pk IN (...)`.
fn primary_key_values(table: &Table, filter: &[Condition], params: &[Value]) -> Result<Vec<Value>, DriverError> {
    let condition = filter
        .iter()
        .find(|c| c.column == table.primary_key && matches!(c.op, CmpOp::Eq | CmpOp::In))
        .ok_or_else(|| {
            DriverError::new(format!("Some partition key parts are missing: {}", table.primary_key))
        })?;
    if filter.len() > 1 {
        return Err(DriverError::new(
            "Non PRIMARY KEY columns found in where clause",
        ));
    }
    condition
        .operands
        .iter()
        .map(|operand| bind(operand, params))
        .collect()
}
