//! Input checks shared by the request services.

use serde_json::{Map, Value};

use crate::errors::AppError;

/// PostgreSQL text and jsonb columns cannot store U+0000.
pub fn reject_nul(field: &str, value: &str) -> Result<(), AppError> {
    if value.contains('\0') {
        return Err(AppError::Validation(format!(
            "{field} must not contain NUL characters"
        )));
    }
    Ok(())
}

/// Walks every key and string inside a JSON value.
pub fn reject_nul_json(field: &str, value: &Value) -> Result<(), AppError> {
    match value {
        Value::String(s) => reject_nul(field, s),
        Value::Array(items) => items.iter().try_for_each(|v| reject_nul_json(field, v)),
        Value::Object(map) => reject_nul_map(field, map),
        _ => Ok(()),
    }
}

pub fn reject_nul_map(field: &str, map: &Map<String, Value>) -> Result<(), AppError> {
    map.iter().try_for_each(|(k, v)| {
        reject_nul(field, k)?;
        reject_nul_json(field, v)
    })
}
