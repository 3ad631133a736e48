//! Database layer for Mule

mod connection;
mod migrations;
mod store;

pub use connection::Database;
pub use store::LocalStore;

/// Bind optional text as a SQL value
pub(crate) fn text_or_null(value: Option<&str>) -> libsql::Value {
    value.map_or(libsql::Value::Null, |text| {
        libsql::Value::Text(text.to_string())
    })
}

/// Bind an optional integer as a SQL value
pub(crate) fn i64_or_null(value: Option<i64>) -> libsql::Value {
    value.map_or(libsql::Value::Null, libsql::Value::Integer)
}

/// Bind an optional float as a SQL value
pub(crate) fn f64_or_null(value: Option<f64>) -> libsql::Value {
    value.map_or(libsql::Value::Null, libsql::Value::Real)
}

/// Read a nullable text column
pub(crate) fn as_text(value: libsql::Value) -> Option<String> {
    match value {
        libsql::Value::Text(text) => Some(text),
        _ => None,
    }
}

/// Read a nullable integer column
pub(crate) fn as_i64(value: libsql::Value) -> Option<i64> {
    match value {
        libsql::Value::Integer(number) => Some(number),
        _ => None,
    }
}

/// Read a nullable float column
pub(crate) fn as_f64(value: libsql::Value) -> Option<f64> {
    match value {
        libsql::Value::Real(number) => Some(number),
        libsql::Value::Integer(number) => Some(number as f64),
        _ => None,
    }
}
