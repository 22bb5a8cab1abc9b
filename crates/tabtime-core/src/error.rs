//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A day key that is not a `YYYY-MM-DD` calendar date
    #[error("Invalid day key: {value} (expected YYYY-MM-DD)")]
    InvalidDay { value: String },
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_day_display() {
        let err = DomainError::InvalidDay {
            value: "2024-13-01".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Invalid day key: 2024-13-01 (expected YYYY-MM-DD)"
        );
    }
}
