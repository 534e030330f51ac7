//! Field value normalization by declared destination type.
//!
//! Date and float columns never receive an empty-string sentinel, and text
//! columns never receive a NULL.

use crate::config::{FieldType, TableDescriptor};
use crate::core::{Row, SqlValue};

/// Normalize one value for a field of the given type.
pub fn normalize_value(field_type: FieldType, value: SqlValue) -> SqlValue {
    match field_type {
        FieldType::Date | FieldType::Float if value.is_null() || value.is_blank_text() => {
            SqlValue::Null
        }
        FieldType::Text if value.is_null() => SqlValue::Text(String::new()),
        _ => value,
    }
}

/// Normalize every value of a row. `columns` names the row's fields in order.
pub fn normalize_row(table: &TableDescriptor, columns: &[String], row: Row) -> Row {
    row.into_iter()
        .zip(columns)
        .map(|(value, column)| normalize_value(table.field_type(column), value))
        .collect()
}
