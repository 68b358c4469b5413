//! SQLSTATE classification
//!
//! Maps driver errors onto the engine taxonomy so the controller can decide
//! whether a failure is record-, chunk- or run-scoped.

use crate::domain::WarehouseError;
use std::error::Error as _;

/// Classify a `tokio_postgres` error raised while doing `context`
pub(crate) fn map_pg_error(err: &tokio_postgres::Error, context: &str) -> WarehouseError {
    let message = match err.as_db_error() {
        Some(db) => format!("{context}: {db}"),
        None => format!("{context}: {err}"),
    };
    let connection_lost = err.is_closed()
        || err
            .source()
            .is_some_and(|source| source.downcast_ref::<std::io::Error>().is_some());

    classify_sqlstate(err.code().map(|c| c.code()), connection_lost, message)
}

/// Classify a pool checkout failure; the backend is unusable
pub(crate) fn map_pool_error(err: &deadpool_postgres::PoolError) -> WarehouseError {
    WarehouseError::Systemic(format!("Failed to get connection from pool: {err}"))
}

/// Classify by SQLSTATE code
///
/// * `23505` unique, `23503` foreign key, `23502` not null: Integrity
/// * `23514` check, `22003` numeric out of range, `22001` string too long: ValueRange
/// * class `08` connection, `57P0x` shutdown, class `53` resources, lost connections: Systemic
/// * anything else: Database, scoped to the current unit of work
pub(crate) fn classify_sqlstate(
    code: Option<&str>,
    connection_lost: bool,
    message: String,
) -> WarehouseError {
    if connection_lost {
        return WarehouseError::Systemic(message);
    }
    match code {
        Some("23505") | Some("23503") | Some("23502") => WarehouseError::Integrity(message),
        Some("23514") | Some("22003") | Some("22001") => WarehouseError::ValueRange(message),
        Some(c) if c.starts_with("08") || c.starts_with("57P0") || c.starts_with("53") => {
            WarehouseError::Systemic(message)
        }
        _ => WarehouseError::Database(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorClass;
    use test_case::test_case;

    #[test_case(Some("23505"), ErrorClass::Integrity ; "unique violation")]
    #[test_case(Some("23503"), ErrorClass::Integrity ; "foreign key violation")]
    #[test_case(Some("23502"), ErrorClass::Integrity ; "not null violation")]
    #[test_case(Some("23514"), ErrorClass::ValueRange ; "check violation")]
    #[test_case(Some("22003"), ErrorClass::ValueRange ; "numeric out of range")]
    #[test_case(Some("22001"), ErrorClass::ValueRange ; "string data right truncation")]
    #[test_case(Some("08006"), ErrorClass::Systemic ; "connection failure")]
    #[test_case(Some("57P01"), ErrorClass::Systemic ; "admin shutdown")]
    #[test_case(Some("53300"), ErrorClass::Systemic ; "too many connections")]
    #[test_case(Some("40P01"), ErrorClass::Other ; "deadlock is chunk scoped")]
    #[test_case(Some("42P01"), ErrorClass::Other ; "undefined table")]
    #[test_case(None, ErrorClass::Other ; "no code")]
    fn test_classify_sqlstate(code: Option<&str>, expected: ErrorClass) {
        let err = classify_sqlstate(code, false, "boom".to_string());
        assert_eq!(err.class(), expected);
    }

    #[test]
    fn test_lost_connection_is_systemic() {
        let err = classify_sqlstate(Some("23505"), true, "closed".to_string());
        assert!(err.is_systemic());
    }

    #[test]
    fn test_chunk_scoped_database_error() {
        let err = classify_sqlstate(Some("40001"), false, "serialization failure".to_string());
        assert!(matches!(err, WarehouseError::Database(_)));
        assert!(!err.is_systemic());
    }
}
