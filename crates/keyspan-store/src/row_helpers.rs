use keyspan_core::{FromValue, Row, Value};

use crate::error::StoreError;

/// Get a required column value from a row, returning CorruptRow on failure.
pub fn get<T: FromValue>(row: &Row, table: &str, column: &str) -> Result<T, StoreError> {
    match row.get(column) {
        None | Some(Value::Null) => Err(corrupt(table, column, "missing value".into())),
        Some(value) => T::from_value(value).ok_or_else(|| {
            corrupt(
                table,
                column,
                format!("unexpected {} value", value.type_name()),
            )
        }),
    }
}

/// Get an optional column value. Absent and null columns map to `None`.
pub fn get_opt<T: FromValue>(row: &Row, table: &str, column: &str) -> Result<Option<T>, StoreError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => T::from_value(value).map(Some).ok_or_else(|| {
            corrupt(
                table,
                column,
                format!("unexpected {} value", value.type_name()),
            )
        }),
    }
}

/// Parse a text column into an enum, returning CorruptRow on failure.
pub fn parse_enum<T: std::str::FromStr>(row: &Row, table: &str, column: &str) -> Result<T, StoreError> {
    let raw: String = get(row, table, column)?;
    raw.parse()
        .map_err(|_| corrupt(table, column, format!("unknown variant: {raw}")))
}

fn corrupt(table: &str, column: &str, detail: String) -> StoreError {
    StoreError::CorruptRow {
        table: table.to_string(),
        column: column.to_string(),
        detail,
    }
}
