//! CQL text generation from ordered rows.
//!
//! Placeholders are positional `?` markers, so every list produced for one
//! row must follow the row's column order exactly.

use keyspan_core::{Row, Value};

/// Wrap an identifier in double quotes unless it already is.
pub fn quote_identifier(name: &str) -> String {
    if name.is_empty() || name.starts_with('"') {
        return name.to_string();
    }
    format!("\"{name}\"")
}

/// `"keyspace"."table"`, or `"table"` without a keyspace.
pub fn qualified_table_name(keyspace: Option<&str>, table: &str) -> String {
    match keyspace.filter(|ks| !ks.is_empty()) {
        Some(ks) => format!("{}.{}", quote_identifier(ks), quote_identifier(table)),
        None => quote_identifier(table),
    }
}

/// `"a","b","c"`
pub fn columns(row: &Row) -> String {
    row.column_names()
        .map(quote_identifier)
        .collect::<Vec<_>>()
        .join(",")
}

/// One `?` per column of `row`.
pub fn placeholders(row: &Row) -> String {
    placeholders_for(row.len())
}

/// `?,?,?` with `count` markers.
pub fn placeholders_for(count: usize) -> String {
    vec!["?"; count].join(",")
}

/// `"a"=?,"b"=?` for UPDATE statements.
pub fn set_clause(row: &Row) -> String {
    row.column_names()
        .map(|name| format!("{}=?", quote_identifier(name)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Bound values in column order.
pub fn values(row: &Row) -> Vec<Value> {
    row.iter().map(|(_, value)| value.clone()).collect()
}

/// Every statement fragment for one row, produced in a single pass so that
/// columns, placeholders, set clause and values cannot disagree on order.
#[derive(Clone, Debug, PartialEq)]
pub struct RowBinding {
    pub columns: String,
    pub placeholders: String,
    pub set_clause: String,
    pub values: Vec<Value>,
}

impl RowBinding {
    pub fn from_row(row: Row) -> Self {
        let mut columns = Vec::with_capacity(row.len());
        let mut sets = Vec::with_capacity(row.len());
        let mut values = Vec::with_capacity(row.len());
        for (name, value) in row {
            let quoted = quote_identifier(&name);
            sets.push(format!("{quoted}=?"));
            columns.push(quoted);
            values.push(value);
        }
        Self {
            columns: columns.join(","),
            placeholders: placeholders_for(values.len()),
            set_clause: sets.join(","),
            values,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Append ` WHERE <filter>` when a non-empty filter is given.
pub(crate) fn push_filter(query: &mut String, filter: Option<&str>) {
    if let Some(filter) = filter.filter(|f| !f.trim().is_empty()) {
        query.push_str(" WHERE ");
        query.push_str(filter);
    }
}

/// Append ` ORDER BY <sort>` when a non-empty sort is given.
pub(crate) fn push_sort(query: &mut String, sort: Option<&str>) {
    if let Some(sort) = sort.filter(|s| !s.trim().is_empty()) {
        query.push_str(" ORDER BY ");
        query.push_str(sort);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        Row::new()
            .with("id", "1")
            .with("key", "k1")
            .with("content", "hello")
    }

    #[test]
    fn quoting() {
        assert_eq!(quote_identifier("dummies"), "\"dummies\"");
        assert_eq!(quote_identifier("\"dummies\""), "\"dummies\"");
        assert_eq!(quote_identifier(""), "");
    }

    #[test]
    fn table_qualification() {
        assert_eq!(qualified_table_name(Some("test"), "dummies"), "\"test\".\"dummies\"");
        assert_eq!(qualified_table_name(None, "dummies"), "\"dummies\"");
        assert_eq!(qualified_table_name(Some(""), "dummies"), "\"dummies\"");
    }

    #[test]
    fn fragments_follow_row_order() {
        let row = row();
        assert_eq!(columns(&row), "\"id\",\"key\",\"content\"");
        assert_eq!(placeholders(&row), "?,?,?");
        assert_eq!(set_clause(&row), "\"id\"=?,\"key\"=?,\"content\"=?");
        assert_eq!(
            values(&row),
            vec![Value::from("1"), Value::from("k1"), Value::from("hello")]
        );
    }

    #[test]
    fn binding_matches_individual_fragments() {
        let row = Row::new().with("z", 1).with("a", "x").with("m", Value::Null);
        let binding = RowBinding::from_row(row.clone());
        assert_eq!(binding.columns, columns(&row));
        assert_eq!(binding.placeholders, placeholders(&row));
        assert_eq!(binding.set_clause, set_clause(&row));
        assert_eq!(binding.values, values(&row));
    }

    #[test]
    fn empty_row() {
        let binding = RowBinding::from_row(Row::new());
        assert!(binding.is_empty());
        assert_eq!(binding.columns, "");
        assert_eq!(binding.placeholders, "");
    }

    #[test]
    fn filter_and_sort() {
        let mut query = String::from("SELECT * FROM \"t\"");
        push_filter(&mut query, Some("key='k3'"));
        push_sort(&mut query, Some("key DESC"));
        assert_eq!(query, "SELECT * FROM \"t\" WHERE key='k3' ORDER BY key DESC");

        let mut query = String::from("DELETE FROM \"t\"");
        push_filter(&mut query, Some("  "));
        push_sort(&mut query, None);
        assert_eq!(query, "DELETE FROM \"t\"");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_value() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(Value::Null),
                any::<bool>().prop_map(Value::Boolean),
                any::<i64>().prop_map(Value::BigInt),
                "[a-z ]{0,8}".prop_map(Value::Text),
            ]
        }

        proptest! {
            #[test]
            fn binding_aligns_index_by_index(
                entries in proptest::collection::vec(("[a-z][a-z0-9]{0,6}", arb_value()), 0..10),
            ) {
                let entries: Vec<(String, Value)> = entries
                    .into_iter()
                    .enumerate()
                    .map(|(i, (name, value))| (format!("{name}_{i}"), value))
                    .collect();
                let binding = RowBinding::from_row(entries.iter().cloned().collect());

                let columns: Vec<&str> = binding.columns.split(',').filter(|c| !c.is_empty()).collect();
                let sets: Vec<&str> = binding.set_clause.split(',').filter(|c| !c.is_empty()).collect();
                let markers = binding.placeholders.split(',').filter(|c| !c.is_empty()).count();

                prop_assert_eq!(columns.len(), entries.len());
                prop_assert_eq!(sets.len(), entries.len());
                prop_assert_eq!(markers, entries.len());
                prop_assert_eq!(binding.values.len(), entries.len());
                for (i, (name, value)) in entries.iter().enumerate() {
                    let quoted = format!("\"{name}\"");
                    prop_assert_eq!(columns[i], quoted.as_str());
                    prop_assert_eq!(sets[i], format!("{quoted}=?"));
                    prop_assert_eq!(&binding.values[i], value);
                }
            }
        }
    }
}
