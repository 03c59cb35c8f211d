//! Database Abstraction Layer
//!
//! Provides a backend-agnostic trait for the SQL the synchronization core
//! issues against the catalog store.
//!
//! ## Design Philosophy
//!
//! Every component that reads or writes catalog rows goes through
//! [`DatabaseAdapter`]. Statements are plain parameterized SQL with positional
//! `?` placeholders, and rows come back as column-name maps. This keeps the
//! pipeline free of driver types and lets tests wrap the adapter, for example
//! to count how many existence queries a phase issued.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_traits::database::{DatabaseAdapter, QueryValue};
//!
//! let rows = adapter
//!     .query("SELECT id FROM publishers WHERE name = ?", &[QueryValue::from("Marvel")])
//!     .await?;
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};

// =============================================================================
// Query Result Types
// =============================================================================

/// Represents a single row from a database query as a map of column names to values
pub type QueryRow = std::collections::HashMap<String, QueryValue>;

/// Represents a database value that can be null, integer, real, text, or blob
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl QueryValue {
    /// Convert to i64 if possible
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            QueryValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Convert to f64 if possible
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            QueryValue::Real(r) => Some(*r),
            QueryValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Convert to &str if possible
    pub fn as_str(&self) -> Option<&str> {
        match self {
            QueryValue::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Convert to String (owned) if possible
    pub fn as_string(&self) -> Option<String> {
        match self {
            QueryValue::Text(s) => Some(s.clone()),
            _ => None,
        }
    }

    /// Check if value is null
    pub fn is_null(&self) -> bool {
        matches!(self, QueryValue::Null)
    }
}

impl From<i64> for QueryValue {
    fn from(value: i64) -> Self {
        QueryValue::Integer(value)
    }
}

impl From<i32> for QueryValue {
    fn from(value: i32) -> Self {
        QueryValue::Integer(i64::from(value))
    }
}

impl From<u64> for QueryValue {
    fn from(value: u64) -> Self {
        QueryValue::Integer(value as i64)
    }
}

impl From<f64> for QueryValue {
    fn from(value: f64) -> Self {
        QueryValue::Real(value)
    }
}

impl From<bool> for QueryValue {
    fn from(value: bool) -> Self {
        QueryValue::Integer(i64::from(value))
    }
}

impl From<&str> for QueryValue {
    fn from(value: &str) -> Self {
        QueryValue::Text(value.to_string())
    }
}

impl From<String> for QueryValue {
    fn from(value: String) -> Self {
        QueryValue::Text(value)
    }
}

impl From<&String> for QueryValue {
    fn from(value: &String) -> Self {
        QueryValue::Text(value.clone())
    }
}

impl<T> From<Option<T>> for QueryValue
where
    T: Into<QueryValue>,
{
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(QueryValue::Null)
    }
}

// =============================================================================
// Database Adapter Trait
// =============================================================================

/// Database adapter trait for catalog store access
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; one adapter is shared by every
/// phase of a run and by concurrent runs for different libraries.
///
/// ## Batching
///
/// Callers are responsible for keeping parameter counts within backend
/// limits. [`execute_batch`](DatabaseAdapter::execute_batch) is the only
/// multi-statement entry point and must be atomic.
#[async_trait::async_trait]
pub trait DatabaseAdapter: Send + Sync {
    /// Check if the database connection is healthy
    async fn health_check(&self) -> Result<()>;

    /// Execute a raw SQL query and return rows
    ///
    /// # Arguments
    ///
    /// * `query` - SQL query string
    /// * `params` - Query parameters (positional)
    ///
    /// # Returns
    ///
    /// Vector of rows, where each row is a HashMap of column names to values
    async fn query(&self, query: &str, params: &[QueryValue]) -> Result<Vec<QueryRow>>;

    /// Execute a SQL statement that doesn't return rows (INSERT, UPDATE, DELETE)
    ///
    /// # Returns
    ///
    /// Number of rows affected
    async fn execute(&self, statement: &str, params: &[QueryValue]) -> Result<u64>;

    /// Execute a query and return a single optional row
    async fn query_one_optional(
        &self,
        query: &str,
        params: &[QueryValue],
    ) -> Result<Option<QueryRow>> {
        let mut rows = self.query(query, params).await?;
        if rows.len() > 1 {
            return Err(BridgeError::DatabaseError(format!(
                "Expected at most one row, got {}",
                rows.len()
            )));
        }
        Ok(rows.pop())
    }

    /// Execute a query and return exactly one row
    ///
    /// Returns an error if no rows or more than one row is returned.
    async fn query_one(&self, query: &str, params: &[QueryValue]) -> Result<QueryRow> {
        self.query_one_optional(query, params)
            .await?
            .ok_or_else(|| BridgeError::DatabaseError("Expected one row, got none".to_string()))
    }

    /// Execute multiple statements atomically
    ///
    /// # Arguments
    ///
    /// * `statements` - Slice of (SQL statement, parameters) tuples
    ///
    /// # Returns
    ///
    /// Vector of row counts (one per statement). If any statement fails, all
    /// are rolled back.
    async fn execute_batch(&self, statements: &[(&str, &[QueryValue])]) -> Result<Vec<u64>>;
}

// =============================================================================
// Row Helpers
// =============================================================================

/// Read a required integer column from a row.
pub fn column_i64(row: &QueryRow, column: &str) -> Result<i64> {
    row.get(column).and_then(QueryValue::as_i64).ok_or_else(|| {
        BridgeError::DatabaseError(format!("Missing or invalid i64 column: {}", column))
    })
}

/// Read a required text column from a row.
pub fn column_string(row: &QueryRow, column: &str) -> Result<String> {
    row.get(column).and_then(QueryValue::as_string).ok_or_else(|| {
        BridgeError::DatabaseError(format!("Missing or invalid String column: {}", column))
    })
}

/// Read a nullable text column from a row.
pub fn column_opt_string(row: &QueryRow, column: &str) -> Option<String> {
    row.get(column).and_then(QueryValue::as_string)
}

/// Read a nullable integer column from a row.
pub fn column_opt_i64(row: &QueryRow, column: &str) -> Option<i64> {
    row.get(column).and_then(QueryValue::as_i64)
}
