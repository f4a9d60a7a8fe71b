//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes. Internal faults never
//! leak details to the caller; they are logged here instead.

use jsonrpsee::types::ErrorObjectOwned;
use kairos_core::domain::DomainError;
use kairos_core::error::AppError;
use tracing::error;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    pub const NOT_FOUND: i32 = 4001;
    pub const CONFLICT: i32 = 4002;
    pub const INTERNAL_ERROR: i32 = 5000;
}

pub const INTERNAL_ERROR_MESSAGE: &str = "internal error";

fn owned(code: i32, message: String) -> ErrorObjectOwned {
    ErrorObjectOwned::owned(code, message, None::<()>)
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => owned(code::VALIDATION_ERROR, msg),
        AppError::NotFound(msg) => owned(code::NOT_FOUND, msg),
        AppError::Conflict(msg) => owned(code::CONFLICT, msg),
        e @ AppError::VersionConflict { .. } => owned(code::CONFLICT, e.to_string()),
        AppError::Domain(e) => domain_error(e),
        e @ (AppError::Database(_)
        | AppError::Serialization(_)
        | AppError::Config(_)
        | AppError::Internal(_)) => {
            error!(error = %e, "Internal error while serving RPC");
            owned(code::INTERNAL_ERROR, INTERNAL_ERROR_MESSAGE.to_string())
        }
    }
}

fn domain_error(err: DomainError) -> ErrorObjectOwned {
    let message = err.to_string();
    match err {
        DomainError::JobNotFound(_) => owned(code::NOT_FOUND, message),
        DomainError::InvalidStateTransition { .. }
        | DomainError::JobNotExecutable { .. }
        | DomainError::AttemptsExhausted { .. }
        | DomainError::CircuitBreakerOpen(_) => owned(code::CONFLICT, message),
        DomainError::UnsupportedJobType(_)
        | DomainError::InvalidParameters { .. }
        | DomainError::InvalidSchedule(_)
        | DomainError::InvalidPriority(_)
        | DomainError::ValidationError(_) => owned(code::VALIDATION_ERROR, message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_errors_keep_their_message() {
        let err = to_rpc_error(AppError::NotFound("job 42".into()));
        assert_eq!(err.code(), code::NOT_FOUND);
        assert_eq!(err.message(), "job 42");

        let err = to_rpc_error(DomainError::InvalidPriority(500).into());
        assert_eq!(err.code(), code::VALIDATION_ERROR);

        let err = to_rpc_error(
            DomainError::JobNotExecutable {
                id: "j".into(),
                status: "COMPLETED".into(),
            }
            .into(),
        );
        assert_eq!(err.code(), code::CONFLICT);

        let err = to_rpc_error(AppError::VersionConflict {
            id: "j".into(),
            expected: 3,
        });
        assert_eq!(err.code(), code::CONFLICT);
    }

    #[test]
    fn test_internal_errors_are_opaque() {
        let err = to_rpc_error(AppError::Database(
            "Database locked (SQLITE_BUSY): /var/lib/kairos/kairos.db".into(),
        ));
        assert_eq!(err.code(), code::INTERNAL_ERROR);
        assert_eq!(err.message(), INTERNAL_ERROR_MESSAGE);
        assert!(err.data().is_none());
    }
}
