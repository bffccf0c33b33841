//! Mapping of `sqlx` failures onto the booking error taxonomy.

use chairbook_core::ProviderId;
use chairbook_core::error::{BookingError, TransientError};

/// `lock_not_available`, raised when `lock_timeout` expires.
pub(crate) const LOCK_NOT_AVAILABLE: &str = "55P03";
/// `serialization_failure`
pub(crate) const SERIALIZATION_FAILURE: &str = "40001";
/// `deadlock_detected`
pub(crate) const DEADLOCK_DETECTED: &str = "40P01";
/// `exclusion_violation`, raised by the `bookings_no_overlap` constraint.
pub(crate) const EXCLUSION_VIOLATION: &str = "23P01";

/// Unique constraint guarding booking numbers.
pub(crate) const BOOKING_NUMBER_CONSTRAINT: &str = "bookings_booking_number_unique";

/// The provider lock a transaction was waiting on, if any.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LockScope {
    pub(crate) provider_id: ProviderId,
    pub(crate) wait_ms: u64,
}

/// SQLSTATE of a database error.
pub(crate) fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().map(|code| code.into_owned()),
        _ => None,
    }
}

/// Whether `err` is a unique violation of `constraint`.
pub(crate) fn is_unique_violation_of(err: &sqlx::Error, constraint: &str) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err)
            if db_err.is_unique_violation() && db_err.constraint() == Some(constraint)
    )
}

/// Classify a `sqlx` error raised while doing `context`.
///
/// | Failure                               | Result                           |
/// |---------------------------------------|----------------------------------|
/// | `55P03` with a lock scope             | `Transient(LockTimeout)`         |
/// | `40001`, `40P01`, `55P03` otherwise   | `Transient(SerializationFailure)`|
/// | pool exhausted/closed, I/O, TLS       | `Transient(StoreUnavailable)`    |
/// | connection class `08`, shutdown `57P` | `Transient(StoreUnavailable)`    |
/// | anything else                         | `Internal`                       |
pub(crate) fn classify(err: sqlx::Error, context: &str, lock: Option<LockScope>) -> BookingError {
    let transient = match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
            Some(TransientError::StoreUnavailable(format!("{context}: {err}")))
        }
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
            Some(TransientError::StoreUnavailable(format!("{context}: {err}")))
        }
        sqlx::Error::Database(_) => match sqlstate(&err).as_deref() {
            Some(LOCK_NOT_AVAILABLE) => Some(match lock {
                Some(scope) => TransientError::LockTimeout {
                    provider_id: scope.provider_id,
                    waited_ms: scope.wait_ms,
                },
                None => TransientError::SerializationFailure(format!("{context}: {err}")),
            }),
            Some(SERIALIZATION_FAILURE | DEADLOCK_DETECTED) => {
                Some(TransientError::SerializationFailure(format!("{context}: {err}")))
            }
            Some(code) if code.starts_with("08") || code.starts_with("57P") => {
                Some(TransientError::StoreUnavailable(format!("{context}: {err}")))
            }
            _ => None,
        },
        _ => None,
    };

    match transient {
        Some(transient) => {
            tracing::warn!(context, error = %err, "transient store failure");
            BookingError::Transient(transient)
        }
        None => {
            tracing::error!(context, error = %err, "store failure");
            BookingError::Internal(format!("{context}: {err}"))
        }
    }
}

/// A stored row that no longer satisfies the domain rules.
pub(crate) fn corrupt_row(table: &str, id: i64, detail: impl std::fmt::Display) -> BookingError {
    BookingError::Internal(format!("{table} row {id} is invalid: {detail}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_exhaustion_is_retryable() {
        let err = classify(sqlx::Error::PoolTimedOut, "begin transaction", None);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("begin transaction"));
    }

    #[test]
    fn unknown_failures_are_internal() {
        let err = classify(sqlx::Error::RowNotFound, "load booking", None);
        assert!(matches!(err, BookingError::Internal(ref msg) if msg.starts_with("load booking")));
        assert!(!err.is_retryable());
    }
}
