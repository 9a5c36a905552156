//! Lowers CQL text into the operations the in-memory cluster runs.
//!
//! Statements go through `sqlparser` under a small CQL dialect. `CREATE
//! KEYSPACE` has no SQL counterpart and is read off the token stream, and a
//! custom index class (`USING 'sai'`) is dropped before parsing.

use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, LimitClause, ObjectName, ObjectNamePart,
    OrderByKind, Query, SelectItem, SetExpr, TableFactor, TableObject, TableWithJoins, UnaryOperator,
};
use sqlparser::dialect::Dialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer};

use keyspan_core::{DriverError, Value};

type SqlStatement = ast::Statement;
type SqlValue = ast::Value;

/// Double-quoted identifiers and `?` markers. Unlike the generic dialect it
/// does not read a `key` column as a MySQL `KEY` constraint.
#[derive(Debug)]
struct CqlDialect;

impl Dialect for CqlDialect {
    fn is_identifier_start(&self, ch: char) -> bool {
        ch.is_ascii_alphabetic() || ch == '_'
    }

    fn is_identifier_part(&self, ch: char) -> bool {
        ch.is_ascii_alphanumeric() || ch == '_'
    }

    fn is_delimited_identifier_start(&self, ch: char) -> bool {
        ch == '"'
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TableRef {
    pub keyspace: Option<String>,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Operand {
    Literal(Value),
    Placeholder(usize),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CmpOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Condition {
    pub column: String,
    pub op: CmpOp,
    pub operands: Vec<Operand>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Projection {
    All,
    Count,
    Columns(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Statement {
    CreateKeyspace {
        name: String,
        if_not_exists: bool,
    },
    CreateTable {
        table: TableRef,
        if_not_exists: bool,
        columns: Vec<String>,
        primary_key: String,
    },
    CreateIndex {
        table: TableRef,
        columns: Vec<String>,
    },
    Select {
        table: TableRef,
        projection: Projection,
        filter: Vec<Condition>,
        order: Option<(String, bool)>,
        limit: Option<Operand>,
    },
    Insert {
        table: TableRef,
        columns: Vec<String>,
        values: Vec<Operand>,
    },
    Update {
        table: TableRef,
        assignments: Vec<(String, Operand)>,
        filter: Vec<Condition>,
    },
    Delete {
        table: TableRef,
        filter: Vec<Condition>,
    },
    Truncate {
        table: TableRef,
    },
}

/// Parse one statement. Returns the statement and its number of `?` markers.
pub(crate) fn parse(text: &str) -> Result<(Statement, usize), DriverError> {
    let tokens: Vec<Token> = Tokenizer::new(&CqlDialect, text)
        .tokenize()
        .map_err(syntax)?
        .into_iter()
        .filter(|t| !matches!(t, Token::Whitespace(_) | Token::EOF))
        .collect();

    if is_word(tokens.first(), "CREATE") && is_word(tokens.get(1), "KEYSPACE") {
        return Ok((create_keyspace(&tokens[2..])?, 0));
    }

    let mut parsed = match without_index_class(&tokens) {
        Some(rewritten) => Parser::parse_sql(&CqlDialect, &rewritten),
        None => Parser::parse_sql(&CqlDialect, text),
    }
    .map_err(syntax)?;
    if parsed.len() != 1 {
        return Err(syntax(format!("expected one statement, found {}", parsed.len())));
    }

    let mut lowering = Lowering::default();
    let statement = lowering.statement(parsed.remove(0))?;
    Ok((statement, lowering.markers))
}

fn syntax(detail: impl std::fmt::Display) -> DriverError {
    DriverError::new(format!("line 1: syntax error: {detail}"))
}

fn is_word(token: Option<&Token>, keyword: &str) -> bool {
    matches!(token, Some(Token::Word(w)) if w.quote_style.is_none() && w.value.eq_ignore_ascii_case(keyword))
}

fn create_keyspace(rest: &[Token]) -> Result<Statement, DriverError> {
    let if_not_exists = is_word(rest.first(), "IF");
    let rest = if if_not_exists {
        if !(is_word(rest.get(1), "NOT") && is_word(rest.get(2), "EXISTS")) {
            return Err(syntax("expected IF NOT EXISTS"));
        }
        &rest[3..]
    } else {
        rest
    };
    match rest.first() {
        Some(Token::Word(word)) => Ok(Statement::CreateKeyspace {
            name: fold(&word.value, word.quote_style),
            if_not_exists,
        }),
        other => Err(syntax(format!("expected keyspace name, found {other:?}"))),
    }
}

/// `CREATE [CUSTOM] INDEX ... USING '<class>' (...)` rewritten without the
/// CQL-only parts, or `None` when there is nothing to drop.
fn without_index_class(tokens: &[Token]) -> Option<String> {
    if !is_word(tokens.first(), "CREATE") {
        return None;
    }
    let custom = is_word(tokens.get(1), "CUSTOM");
    let index_at = if custom { 2 } else { 1 };
    if !is_word(tokens.get(index_at), "INDEX") {
        return None;
    }
    let using = tokens
        .iter()
        .position(|t| is_word(Some(t), "USING"))
        .filter(|&i| matches!(tokens.get(i + 1), Some(Token::SingleQuotedString(_))));
    if !custom && using.is_none() {
        return None;
    }

    let kept: Vec<String> = tokens
        .iter()
        .enumerate()
        .filter(|(i, _)| !(custom && *i == 1) && using.map_or(true, |u| *i != u && *i != u + 1))
        .map(|(_, t)| t.to_string())
        .collect();
    Some(kept.join(" "))
}

fn fold(value: &str, quote_style: Option<char>) -> String {
    match quote_style {
        Some(_) => value.to_string(),
        None => value.to_lowercase(),
    }
}

fn ident_name(ident: &ast::Ident) -> String {
    fold(&ident.value, ident.quote_style)
}

/// Column name from a rendered AST node: `"Name"` keeps its case.
fn rendered_name(text: &str) -> String {
    let text = text.trim();
    match text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
        Some(quoted) => quoted.to_string(),
        None => text.to_lowercase(),
    }
}

fn column_name(expr: &Expr) -> Result<String, DriverError> {
    match expr {
        Expr::Identifier(ident) => Ok(ident_name(ident)),
        Expr::CompoundIdentifier(idents) => idents
            .last()
            .map(ident_name)
            .ok_or_else(|| syntax("empty column name")),
        Expr::Nested(inner) => column_name(inner),
        other => Err(syntax(format!("expected column name, found {other}"))),
    }
}

fn name_part(part: &ObjectNamePart) -> Option<String> {
    match part {
        ObjectNamePart::Identifier(ident) => Some(ident_name(ident)),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn table_ref(name: &ObjectName) -> Result<TableRef, DriverError> {
    let parts: Option<Vec<String>> = name.0.iter().map(name_part).collect();
    match parts.as_deref() {
        Some([table]) => Ok(TableRef {
            keyspace: None,
            name: table.clone(),
        }),
        Some([keyspace, table]) => Ok(TableRef {
            keyspace: Some(keyspace.clone()),
            name: table.clone(),
        }),
        _ => Err(syntax(format!("invalid table name {name}"))),
    }
}

fn relation(table: &TableWithJoins) -> Result<TableRef, DriverError> {
    if !table.joins.is_empty() {
        return Err(syntax("joins are not supported"));
    }
    match &table.relation {
        TableFactor::Table { name, .. } => table_ref(name),
        other => Err(syntax(format!("unsupported relation {other}"))),
    }
}

fn number(raw: &str) -> Result<Value, DriverError> {
    let value = if raw.contains(['.', 'e', 'E']) {
        raw.parse::<f64>().map(Value::Double).ok()
    } else {
        raw.parse::<i64>().map(Value::BigInt).ok()
    };
    value.ok_or_else(|| syntax(format!("invalid number {raw}")))
}

fn projection(items: &[SelectItem]) -> Result<Projection, DriverError> {
    match items {
        [SelectItem::Wildcard(_)] => Ok(Projection::All),
        [SelectItem::UnnamedExpr(Expr::Function(func)) | SelectItem::ExprWithAlias {
            expr: Expr::Function(func),
            ..
        }] if func.name.to_string().eq_ignore_ascii_case("count") => Ok(Projection::Count),
        _ => items
            .iter()
            .map(|item| match item {
                SelectItem::UnnamedExpr(expr) => column_name(expr),
                other => Err(syntax(format!("unsupported selector {other}"))),
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Projection::Columns),
    }
}

fn create_table(create: &ast::CreateTable) -> Result<Statement, DriverError> {
    let table = table_ref(&create.name)?;
    let columns: Vec<String> = create.columns.iter().map(|c| ident_name(&c.name)).collect();

    let inline = create
        .columns
        .iter()
        .find(|c| {
            c.options
                .iter()
                .any(|o| o.option.to_string().starts_with("PRIMARY KEY"))
        })
        .map(|c| ident_name(&c.name));
    // `PRIMARY KEY (a, b)`: the first component is the partition key.
    let constraint = || {
        create.constraints.iter().find_map(|c| {
            let text = c.to_string();
            let start = text.find("PRIMARY KEY (")? + "PRIMARY KEY (".len();
            text[start..].split([',', ')']).next().map(rendered_name)
        })
    };
    let primary_key = inline
        .or_else(constraint)
        .ok_or_else(|| DriverError::new("No PRIMARY KEY specified (exactly one required)"))?;

    Ok(Statement::CreateTable {
        table,
        if_not_exists: create.if_not_exists,
        columns,
        primary_key,
    })
}

/// Walks a parsed statement in source order, numbering `?` markers as it
/// meets them.
#[derive(Default)]
struct Lowering {
    markers: usize,
}

impl Lowering {
    fn statement(&mut self, statement: SqlStatement) -> Result<Statement, DriverError> {
        match statement {
            SqlStatement::Query(query) => self.select(*query),
            SqlStatement::Insert(insert) => self.insert(&insert),
            SqlStatement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                let table = relation(&table)?;
                let mut lowered = Vec::with_capacity(assignments.len());
                for assignment in &assignments {
                    let AssignmentTarget::ColumnName(column) = &assignment.target else {
                        return Err(syntax("tuple assignments are not supported"));
                    };
                    let name = column
                        .0
                        .last()
                        .and_then(name_part)
                        .ok_or_else(|| syntax(format!("invalid column {column}")))?;
                    lowered.push((name, self.operand(&assignment.value)?));
                }
                let filter = self.conditions(selection.as_ref())?;
                if filter.is_empty() {
                    return Err(syntax("UPDATE requires a WHERE clause"));
                }
                Ok(Statement::Update {
                    table,
                    assignments: lowered,
                    filter,
                })
            }
            SqlStatement::Delete(delete) => {
                let tables = match &delete.from {
                    FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => tables,
                };
                let [table] = tables.as_slice() else {
                    return Err(syntax("DELETE takes exactly one table"));
                };
                Ok(Statement::Delete {
                    table: relation(table)?,
                    filter: self.conditions(delete.selection.as_ref())?,
                })
            }
            SqlStatement::Truncate { table_names, .. } => {
                let [target] = table_names.as_slice() else {
                    return Err(syntax("TRUNCATE takes exactly one table"));
                };
                Ok(Statement::Truncate {
                    table: table_ref(&target.name)?,
                })
            }
            SqlStatement::CreateTable(create) => create_table(&create),
            SqlStatement::CreateIndex(create) => Ok(Statement::CreateIndex {
                table: table_ref(&create.table_name)?,
                columns: create
                    .columns
                    .iter()
                    .map(|c| rendered_name(&c.to_string()))
                    .collect(),
            }),
            other => Err(syntax(format!("unsupported statement {other}"))),
        }
    }

    fn select(&mut self, query: Query) -> Result<Statement, DriverError> {
        let SetExpr::Select(select) = *query.body else {
            return Err(syntax("only plain SELECT is supported"));
        };
        let [from] = select.from.as_slice() else {
            return Err(syntax("SELECT takes exactly one table"));
        };
        let table = relation(from)?;
        let projection = projection(&select.projection)?;
        let filter = self.conditions(select.selection.as_ref())?;

        let order = match &query.order_by {
            None => None,
            Some(order_by) => {
                let OrderByKind::Expressions(exprs) = &order_by.kind else {
                    return Err(syntax("ORDER BY ALL is not supported"));
                };
                let [first] = exprs.as_slice() else {
                    return Err(syntax("ORDER BY takes exactly one column"));
                };
                Some((column_name(&first.expr)?, first.options.asc == Some(false)))
            }
        };

        let limit = match &query.limit_clause {
            None => None,
            Some(LimitClause::LimitOffset { limit, offset, .. }) => {
                if offset.is_some() {
                    return Err(syntax("OFFSET is not supported"));
                }
                match limit {
                    Some(expr) => Some(self.operand(expr)?),
                    None => None,
                }
            }
            Some(_) => return Err(syntax("unsupported LIMIT form")),
        };

        Ok(Statement::Select {
            table,
            projection,
            filter,
            order,
            limit,
        })
    }

    fn insert(&mut self, insert: &ast::Insert) -> Result<Statement, DriverError> {
        let TableObject::TableName(name) = &insert.table else {
            return Err(syntax("table functions are not supported"));
        };
        let table = table_ref(name)?;
        let columns: Vec<String> = insert.columns.iter().map(ident_name).collect();

        let Some(source) = insert.source.as_deref() else {
            return Err(syntax("INSERT requires VALUES"));
        };
        let SetExpr::Values(values) = source.body.as_ref() else {
            return Err(syntax("INSERT requires VALUES"));
        };
        let [row] = values.rows.as_slice() else {
            return Err(syntax("INSERT takes exactly one row"));
        };
        if row.len() != columns.len() {
            return Err(DriverError::new(format!(
                "Unmatched column names/values: {} columns, {} values",
                columns.len(),
                row.len()
            )));
        }
        let mut operands = Vec::with_capacity(row.len());
        for expr in row {
            operands.push(self.operand(expr)?);
        }
        Ok(Statement::Insert {
            table,
            columns,
            values: operands,
        })
    }

    fn conditions(&mut self, selection: Option<&Expr>) -> Result<Vec<Condition>, DriverError> {
        let mut conditions = Vec::new();
        if let Some(expr) = selection {
            self.conjuncts(expr, &mut conditions)?;
        }
        Ok(conditions)
    }

    fn conjuncts(&mut self, expr: &Expr, out: &mut Vec<Condition>) -> Result<(), DriverError> {
        match expr {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => {
                self.conjuncts(left, out)?;
                self.conjuncts(right, out)
            }
            Expr::Nested(inner) => self.conjuncts(inner, out),
            Expr::BinaryOp { left, op, right } => {
                let op = match op {
                    BinaryOperator::Eq => CmpOp::Eq,
                    BinaryOperator::Lt => CmpOp::Lt,
                    BinaryOperator::LtEq => CmpOp::Le,
                    BinaryOperator::Gt => CmpOp::Gt,
                    BinaryOperator::GtEq => CmpOp::Ge,
                    other => return Err(syntax(format!("unsupported operator {other}"))),
                };
                out.push(Condition {
                    column: column_name(left)?,
                    op,
                    operands: vec![self.operand(right)?],
                });
                Ok(())
            }
            Expr::InList {
                expr,
                list,
                negated: false,
            } => {
                let column = column_name(expr)?;
                let mut operands = Vec::with_capacity(list.len());
                for item in list {
                    operands.push(self.operand(item)?);
                }
                out.push(Condition {
                    column,
                    op: CmpOp::In,
                    operands,
                });
                Ok(())
            }
            other => Err(syntax(format!("unsupported condition {other}"))),
        }
    }

    fn operand(&mut self, expr: &Expr) -> Result<Operand, DriverError> {
        match expr {
            Expr::Value(value) => match &value.value {
                SqlValue::Placeholder(_) => {
                    let index = self.markers;
                    self.markers += 1;
                    Ok(Operand::Placeholder(index))
                }
                SqlValue::SingleQuotedString(s) => Ok(Operand::Literal(Value::Text(s.clone()))),
                SqlValue::Number(raw, _) => number(raw).map(Operand::Literal),
                SqlValue::Boolean(b) => Ok(Operand::Literal(Value::Boolean(*b))),
                SqlValue::Null => Ok(Operand::Literal(Value::Null)),
                other => Err(syntax(format!("unsupported literal {other}"))),
            },
            Expr::UnaryOp {
                op: UnaryOperator::Minus,
                expr,
            } => match self.operand(expr)? {
                Operand::Literal(Value::BigInt(n)) => n
                    .checked_neg()
                    .map(|n| Operand::Literal(Value::BigInt(n)))
                    .ok_or_else(|| syntax("integer out of range")),
                Operand::Literal(Value::Double(n)) => Ok(Operand::Literal(Value::Double(-n))),
                _ => Err(syntax("unary minus needs a number")),
            },
            Expr::Nested(inner) => self.operand(inner),
            other => Err(syntax(format!("expected value, found {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(ks: Option<&str>, name: &str) -> TableRef {
        TableRef {
            keyspace: ks.map(str::to_string),
            name: name.to_string(),
        }
    }

    #[test]
    fn parses_select_with_everything() {
        let (stmt, n) = parse(
            "SELECT * FROM \"test\".\"dummies\" WHERE key='k3' AND \"id\" IN(?,?) ORDER BY key DESC LIMIT 10",
        )
        .unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            stmt,
            Statement::Select {
                table: table(Some("test"), "dummies"),
                projection: Projection::All,
                filter: vec![
                    Condition {
                        column: "key".into(),
                        op: CmpOp::Eq,
                        operands: vec![Operand::Literal(Value::Text("k3".into()))],
                    },
                    Condition {
                        column: "id".into(),
                        op: CmpOp::In,
                        operands: vec![Operand::Placeholder(0), Operand::Placeholder(1)],
                    },
                ],
                order: Some(("key".into(), true)),
                limit: Some(Operand::Literal(Value::BigInt(10))),
            }
        );
    }

    #[test]
    fn parses_count_and_projection() {
        let (stmt, _) = parse("SELECT COUNT(*) FROM \"dummies\"").unwrap();
        assert!(matches!(stmt, Statement::Select { projection: Projection::Count, .. }));

        let (stmt, _) = parse("SELECT id,\"Content\" FROM \"dummies\"").unwrap();
        let Statement::Select { projection, .. } = stmt else {
            panic!("expected select");
        };
        assert_eq!(projection, Projection::Columns(vec!["id".into(), "Content".into()]));
    }

    #[test]
    fn placeholders_numbered_across_clauses() {
        let (stmt, n) = parse("UPDATE \"dummies\" SET \"key\"=?,\"content\"=? WHERE \"id\"=?").unwrap();
        assert_eq!(n, 3);
        let Statement::Update { assignments, filter, .. } = stmt else {
            panic!("expected update");
        };
        assert_eq!(assignments[1], ("content".into(), Operand::Placeholder(1)));
        assert_eq!(filter[0].operands, vec![Operand::Placeholder(2)]);
    }

    #[test]
    fn parses_create_table_variants() {
        let (stmt, _) = parse("CREATE TABLE \"test\".\"dummies\" (id TEXT PRIMARY KEY, key TEXT, content TEXT)").unwrap();
        assert_eq!(
            stmt,
            Statement::CreateTable {
                table: table(Some("test"), "dummies"),
                if_not_exists: false,
                columns: vec!["id".into(), "key".into(), "content".into()],
                primary_key: "id".into(),
            }
        );

        let (stmt, _) = parse("CREATE TABLE IF NOT EXISTS t (a BIGINT, b TEXT, PRIMARY KEY (a, b))").unwrap();
        let Statement::CreateTable { columns, primary_key, if_not_exists, .. } = stmt else {
            panic!("expected create table");
        };
        assert!(if_not_exists);
        assert_eq!(columns, ["a", "b"]);
        assert_eq!(primary_key, "a");

        assert!(parse("CREATE TABLE t (a TEXT, b TEXT)").is_err());
    }

    #[test]
    fn parses_keyspace_and_index() {
        let (stmt, n) = parse("CREATE KEYSPACE IF NOT EXISTS \"test\" WITH replication={'class': 'SimpleStrategy', 'replication_factor': 3}").unwrap();
        assert_eq!(n, 0);
        assert_eq!(
            stmt,
            Statement::CreateKeyspace {
                name: "test".into(),
                if_not_exists: true
            }
        );

        let index = Statement::CreateIndex {
            table: table(Some("test"), "dummies"),
            columns: vec!["key".into()],
        };
        let (stmt, _) = parse("CREATE INDEX IF NOT EXISTS \"test_key\" ON \"test\".\"dummies\" (key)").unwrap();
        assert_eq!(stmt, index);
        let (stmt, _) = parse("CREATE INDEX IF NOT EXISTS \"test_key\" ON \"test\".\"dummies\" USING 'sai' (key)").unwrap();
        assert_eq!(stmt, index);
    }

    #[test]
    fn literals() {
        let (stmt, _) = parse("INSERT INTO t (a, b, c, d, e) VALUES ('it''s', -4, 2.5, true, null)").unwrap();
        let Statement::Insert { values, .. } = stmt else {
            panic!("expected insert");
        };
        assert_eq!(
            values,
            vec![
                Operand::Literal(Value::Text("it's".into())),
                Operand::Literal(Value::BigInt(-4)),
                Operand::Literal(Value::Double(2.5)),
                Operand::Literal(Value::Boolean(true)),
                Operand::Literal(Value::Null),
            ]
        );
    }

    #[test]
    fn unquoted_identifiers_fold_case() {
        let (stmt, _) = parse("TRUNCATE Test.Dummies").unwrap();
        assert_eq!(stmt, Statement::Truncate { table: table(Some("test"), "dummies") });
    }

    #[test]
    fn syntax_errors() {
        assert!(parse("SELEC * FROM t").is_err());
        assert!(parse("SELECT * FROM t WHERE").is_err());
        assert!(parse("INSERT INTO t (a, b) VALUES (?)").is_err());
        assert!(parse("SELECT * FROM t WHERE a = 1 OR b = 2").is_err());
        assert!(parse("UPDATE t SET a=1").is_err());
        assert!(parse("SELECT * FROM t; SELECT * FROM u").is_err());
    }
}
