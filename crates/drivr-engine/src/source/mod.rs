//! External data source port.
//!
//! The upstream datastore is a set of append-only tables of loosely typed
//! rows. Every call is fallible and slow. The engine only talks to it through
//! [`DataSource`], normally wrapped in a [`ResilientSource`].

mod memory;
mod resilient;

pub use memory::MemoryDataSource;
pub use resilient::ResilientSource;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One row of an upstream table.
pub type Row = Map<String, Value>;

/// Upstream tables the engine reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    /// Append-only log of drives.
    MileageLog,
    /// External personnel roster.
    Roster,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MileageLog => "mileage_log",
            Self::Roster => "roster",
        }
    }
}

/// A read against one table, optionally narrowed to one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub table: Table,
    pub identity: Option<String>,
}

impl Query {
    /// All drives logged by `identity`.
    pub fn events_for(identity: impl Into<String>) -> Self {
        Self {
            table: Table::MileageLog,
            identity: Some(identity.into()),
        }
    }

    /// The whole roster.
    pub fn roster() -> Self {
        Self {
            table: Table::Roster,
            identity: None,
        }
    }
}

/// An append to one table.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub table: Table,
    pub row: Row,
}

impl Mutation {
    pub fn append(table: Table, row: Row) -> Self {
        Self { table, row }
    }
}

/// Confirmation that a mutation was applied upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WriteAck {
    pub table: Table,
    pub rows_written: usize,
}

/// Errors reported by a data source.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SourceError {
    /// The source could not be reached. Nothing was applied.
    #[error("source unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },

    /// The source refused the request.
    #[error("request rejected: {message}")]
    Rejected {
        /// Description of the rejection.
        message: String,
    },

    /// The call did not finish in time. It may or may not have been applied.
    #[error("source call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl SourceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }
}

/// The external datastore.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Returns all rows matching `query`, in insertion order.
    async fn read(&self, query: &Query) -> Result<Vec<Row>, SourceError>;

    /// Applies `mutation`.
    async fn write(&self, mutation: &Mutation) -> Result<WriteAck, SourceError>;
}

/// Blob storage used by the surrounding application for uploads.
///
/// The engine holds one for the application to reach through
/// [`crate::Engine::object_store`], and never calls it itself.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `bytes` under `name` and returns its public URL.
    async fn put(&self, name: &str, content_type: &str, bytes: Vec<u8>) -> Result<String, SourceError>;
}
