//! # Error Handling
//!
//! Library-level error types. Operational failures coming back from a data
//! source are `anyhow::Error` values that the executor converts into
//! notifications; only programmer errors surface as [`CrudError`].

use thiserror::Error;

/// Operations a data source may or may not provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    List,
    GetItem,
    Create,
    Update,
    Delete,
}

impl OperationKind {
    /// Stable name used in logs and error messages
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::List => "list",
            OperationKind::GetItem => "get_item",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration errors raised by a context manager.
///
/// These are never caught by the executor: they indicate a context was wired
/// up without a function it is later asked to run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CrudError {
    #[error("data source has no '{operation}' function configured")]
    MissingOperation { operation: OperationKind },
}

impl CrudError {
    pub fn missing(operation: OperationKind) -> Self {
        CrudError::MissingOperation { operation }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_operation_names_the_function() {
        let err = CrudError::missing(OperationKind::Delete);
        assert_eq!(
            err.to_string(),
            "data source has no 'delete' function configured"
        );
    }
}
