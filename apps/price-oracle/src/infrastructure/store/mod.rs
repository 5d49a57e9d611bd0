//! In-Memory Price Store
//!
//! `PriceStore` adapter that serves a catalog loaded from a JSON file and
//! keeps the last committed aggregate of each instrument in memory.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::application::ports::{PriceStore, StoreError};
use crate::domain::aggregation::Aggregate;
use crate::domain::instrument::{AccountKey, Catalog};

/// Price store holding state in process memory.
#[derive(Debug, Default)]
pub struct InMemoryPriceStore {
    catalog: Catalog,
    committed: RwLock<HashMap<AccountKey, Aggregate>>,
}

impl InMemoryPriceStore {
    /// Create a store serving the given catalog.
    #[must_use]
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            committed: RwLock::new(HashMap::new()),
        }
    }

    /// Create a store serving a catalog read from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if the file cannot be read or decoded.
    pub async fn from_catalog_file(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| StoreError::CatalogRead {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        let catalog: Catalog = serde_json::from_str(&contents)
            .map_err(|e| StoreError::CatalogParse(e.to_string()))?;

        tracing::info!(
            path = %path.display(),
            products = catalog.products.len(),
            "Catalog loaded"
        );
        Ok(Self::new(catalog))
    }

    /// Last aggregate committed for an instrument.
    #[must_use]
    pub fn committed(&self, account: &str) -> Option<Aggregate> {
        self.committed.read().get(account).copied()
    }
}

#[async_trait]
impl PriceStore for InMemoryPriceStore {
    async fn load_catalog(&self) -> Result<Catalog, StoreError> {
        Ok(self.catalog.clone())
    }

    async fn commit(&self, account: &str, aggregate: &Aggregate) -> Result<(), StoreError> {
        self.committed
            .write()
            .insert(account.to_string(), *aggregate);
        Ok(())
    }
}
