//! Port Interfaces
//!
//! Contracts for the persistence collaborator that stores instrument
//! state, following the Hexagonal Architecture pattern.
//!
//! ## Driven Ports (Outbound)
//!
//! - `PriceStore`: loads the catalog and records committed aggregates

use async_trait::async_trait;

use crate::domain::aggregation::Aggregate;
use crate::domain::instrument::Catalog;

/// Persistence collaborator for catalog and aggregate state.
///
/// Where the state lives is up to the adapter.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Load the instrument catalog.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the catalog cannot be read or decoded.
    async fn load_catalog(&self) -> Result<Catalog, StoreError>;

    /// Record a new aggregate for an instrument.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the commit is rejected.
    async fn commit(&self, account: &str, aggregate: &Aggregate) -> Result<(), StoreError>;
}

/// Persistence errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Catalog source could not be read.
    #[error("failed to read catalog {path}: {message}")]
    CatalogRead {
        /// Source path.
        path: String,
        /// Underlying error.
        message: String,
    },

    /// Catalog contents are malformed.
    #[error("invalid catalog: {0}")]
    CatalogParse(String),

    /// Commit was rejected.
    #[error("commit failed for {account}: {message}")]
    CommitFailed {
        /// Target instrument.
        account: String,
        /// Underlying error.
        message: String,
    },
}
