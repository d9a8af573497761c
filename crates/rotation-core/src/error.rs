use std::fmt;

use thiserror::Error;

/// One sector (or benchmark) whose historical data could not be fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchFailure {
    pub symbol: String,
    pub error: String,
}

impl fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.symbol, self.error)
    }
}

#[derive(Error, Debug)]
pub enum RotationError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Failed to fetch market data for every symbol: {}", join_failures(.0))]
    TotalFetchFailure(Vec<FetchFailure>),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),
}

fn join_failures(failures: &[FetchFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl RotationError {
    /// Symbols named by a total fetch failure, in the order they were attempted.
    pub fn failed_symbols(&self) -> Vec<&str> {
        match self {
            RotationError::TotalFetchFailure(failures) => {
                failures.iter().map(|f| f.symbol.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_fetch_failure_names_every_symbol() {
        let err = RotationError::TotalFetchFailure(vec![
            FetchFailure {
                symbol: "XLK".to_string(),
                error: "timeout".to_string(),
            },
            FetchFailure {
                symbol: "XLE".to_string(),
                error: "HTTP 500".to_string(),
            },
        ]);

        let message = err.to_string();
        assert!(message.contains("XLK: timeout"));
        assert!(message.contains("XLE: HTTP 500"));
        assert_eq!(err.failed_symbols(), vec!["XLK", "XLE"]);
    }
}
