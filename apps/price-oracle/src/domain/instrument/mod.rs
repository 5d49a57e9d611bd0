//! Instrument Registry
//!
//! Read-mostly catalog of products and the price instruments they carry.
//! Every other component resolves instrument references through here.
//!
//! # Catalog Layout
//!
//! ```json
//! {
//!   "products": [{
//!     "account": "prod-ltc",
//!     "attr_dict": { "symbol": "LTC/USD", "asset_type": "Crypto" },
//!     "price": [{
//!       "account": "px-ltc",
//!       "price_exponent": -5,
//!       "price_type": "price",
//!       "publishers": ["pub-a", "pub-b"],
//!       "min_publishers": 1
//!     }]
//!   }]
//! }
//! ```
//!
//! An instrument's symbol is its product's `attr_dict.symbol`. Lookups
//! accept either the instrument account or the symbol.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

// =============================================================================
// Types
// =============================================================================

/// Opaque account handle identifying a product or instrument.
pub type AccountKey = String;

/// Identity of a publisher allowed to submit quotes.
pub type PublisherKey = String;

/// Attribute key holding the human-readable symbol.
const SYMBOL_ATTR: &str = "symbol";

/// Declared price type of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceType {
    /// Regular aggregate price.
    #[default]
    Price,
    /// Any type this server does not interpret.
    #[serde(other)]
    Unknown,
}

impl PriceType {
    /// Wire name of the price type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Unknown => "unknown",
        }
    }
}

// =============================================================================
// Catalog (wire form)
// =============================================================================

/// Catalog as provisioned by the persistence layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    /// Products in provisioning order.
    #[serde(default)]
    pub products: Vec<ProductSpec>,
}

/// Product entry in a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSpec {
    /// Product account.
    pub account: AccountKey,
    /// Reference attributes (symbol, asset type, quote currency...).
    #[serde(default)]
    pub attr_dict: BTreeMap<String, String>,
    /// Price instruments of this product.
    #[serde(default)]
    pub price: Vec<InstrumentSpec>,
}

/// Price instrument entry in a catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Instrument account.
    pub account: AccountKey,
    /// Decimal exponent applied to integer prices.
    pub price_exponent: i32,
    /// Declared price type.
    #[serde(default)]
    pub price_type: PriceType,
    /// Authorized publisher identities.
    #[serde(default)]
    pub publishers: Vec<PublisherKey>,
    /// Minimum number of valid quotes required for a trading aggregate.
    #[serde(default = "default_min_publishers")]
    pub min_publishers: u8,
}

const fn default_min_publishers() -> u8 {
    1
}

// =============================================================================
// Instrument & Product
// =============================================================================

/// A registered price instrument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    /// Instrument account.
    pub account: AccountKey,
    /// Human-readable symbol.
    pub symbol: String,
    /// Owning product account.
    pub product: AccountKey,
    /// Decimal exponent applied to integer prices.
    pub price_exponent: i32,
    /// Declared price type.
    pub price_type: PriceType,
    /// Authorized publisher identities.
    pub publishers: BTreeSet<PublisherKey>,
    /// Minimum number of valid quotes required for a trading aggregate.
    pub min_publishers: u8,
}

impl Instrument {
    /// Check whether `publisher` may submit quotes for this instrument.
    #[must_use]
    pub fn is_publisher(&self, publisher: &str) -> bool {
        self.publishers.contains(publisher)
    }
}

/// A registered product and its instruments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    /// Product account.
    pub account: AccountKey,
    /// Reference attributes.
    pub attr_dict: BTreeMap<String, String>,
    /// Instrument accounts in catalog order.
    pub instruments: Vec<AccountKey>,
}

// =============================================================================
// Registry
// =============================================================================

/// Immutable instrument catalog indexed by account and by symbol.
#[derive(Debug, Default)]
pub struct InstrumentRegistry {
    instruments: Vec<Arc<Instrument>>,
    by_account: HashMap<AccountKey, usize>,
    by_symbol: HashMap<String, usize>,
    products: Vec<Product>,
}

impl InstrumentRegistry {
    /// Build a registry from a catalog.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::DuplicateAccount` if two instruments share an
    /// account.
    pub fn from_catalog(catalog: &Catalog) -> Result<Self, RegistryError> {
        let mut registry = Self::default();

        for spec in &catalog.products {
            let symbol = spec.attr_dict.get(SYMBOL_ATTR).cloned();
            let mut product = Product {
                account: spec.account.clone(),
                attr_dict: spec.attr_dict.clone(),
                instruments: Vec::with_capacity(spec.price.len()),
            };

            for px in &spec.price {
                if registry.by_account.contains_key(&px.account) {
                    return Err(RegistryError::DuplicateAccount(px.account.clone()));
                }

                let index = registry.instruments.len();
                let instrument = Instrument {
                    account: px.account.clone(),
                    symbol: symbol.clone().unwrap_or_else(|| px.account.clone()),
                    product: spec.account.clone(),
                    price_exponent: px.price_exponent,
                    price_type: px.price_type,
                    publishers: px.publishers.iter().cloned().collect(),
                    min_publishers: px.min_publishers,
                };

                registry.by_account.insert(px.account.clone(), index);
                // First instrument registered under a symbol wins
                registry
                    .by_symbol
                    .entry(instrument.symbol.clone())
                    .or_insert(index);
                product.instruments.push(px.account.clone());
                registry.instruments.push(Arc::new(instrument));
            }

            registry.products.push(product);
        }

        Ok(registry)
    }

    /// Resolve an instrument by account, falling back to symbol.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotFound` if neither matches.
    pub fn lookup(&self, symbol_or_account: &str) -> Result<&Arc<Instrument>, RegistryError> {
        self.by_account
            .get(symbol_or_account)
            .or_else(|| self.by_symbol.get(symbol_or_account))
            .and_then(|&index| self.instruments.get(index))
            .ok_or_else(|| RegistryError::NotFound(symbol_or_account.to_string()))
    }

    /// All instruments in insertion order.
    #[must_use]
    pub fn list(&self) -> &[Arc<Instrument>] {
        &self.instruments
    }

    /// All products in insertion order.
    #[must_use]
    pub fn products(&self) -> &[Product] {
        &self.products
    }

    /// Number of registered instruments.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the registry holds no instruments.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Instrument registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No instrument matches the reference.
    #[error("unknown instrument: {0}")]
    NotFound(String),

    /// Catalog lists the same instrument account twice.
    #[error("duplicate instrument account: {0}")]
    DuplicateAccount(String),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        serde_json::from_value(serde_json::json!({
            "products": [
                {
                    "account": "prod-ltc",
                    "attr_dict": { "symbol": "LTC/USD", "asset_type": "Crypto" },
                    "price": [{
                        "account": "px-ltc",
                        "price_exponent": -5,
                        "price_type": "price",
                        "publishers": ["pub-a", "pub-b"]
                    }]
                },
                {
                    "account": "prod-btc",
                    "attr_dict": { "symbol": "BTC/USD" },
                    "price": [{ "account": "px-btc", "price_exponent": -8 }]
                }
            ]
        }))
        .unwrap()
    }

    #[test]
    fn lookup_by_account() {
        let registry = InstrumentRegistry::from_catalog(&catalog()).unwrap();
        let instrument = registry.lookup("px-ltc").unwrap();
        assert_eq!(instrument.symbol, "LTC/USD");
        assert_eq!(instrument.product, "prod-ltc");
        assert_eq!(instrument.price_exponent, -5);
    }

    #[test]
    fn lookup_by_symbol() {
        let registry = InstrumentRegistry::from_catalog(&catalog()).unwrap();
        assert_eq!(registry.lookup("BTC/USD").unwrap().account, "px-btc");
    }

    #[test]
    fn lookup_unknown_is_not_found() {
        let registry = InstrumentRegistry::from_catalog(&catalog()).unwrap();
        assert_eq!(
            registry.lookup("DOGE/USD").unwrap_err(),
            RegistryError::NotFound("DOGE/USD".to_string())
        );
    }

    #[test]
    fn list_preserves_insertion_order() {
        let registry = InstrumentRegistry::from_catalog(&catalog()).unwrap();
        let accounts: Vec<_> = registry.list().iter().map(|i| i.account.as_str()).collect();
        assert_eq!(accounts, vec!["px-ltc", "px-btc"]);
        assert_eq!(registry.len(), 2);
        assert!(!registry.is_empty());
    }

    #[test]
    fn catalog_defaults_apply() {
        let registry = InstrumentRegistry::from_catalog(&catalog()).unwrap();
        let btc = registry.lookup("px-btc").unwrap();
        assert_eq!(btc.price_type, PriceType::Price);
        assert_eq!(btc.min_publishers, 1);
        assert!(btc.publishers.is_empty());
    }

    #[test]
    fn publisher_authorization() {
        let registry = InstrumentRegistry::from_catalog(&catalog()).unwrap();
        let ltc = registry.lookup("px-ltc").unwrap();
        assert!(ltc.is_publisher("pub-a"));
        assert!(!ltc.is_publisher("pub-z"));
    }

    #[test]
    fn symbol_falls_back_to_account() {
        let catalog = Catalog {
            products: vec![ProductSpec {
                account: "prod-x".to_string(),
                attr_dict: BTreeMap::new(),
                price: vec![InstrumentSpec {
                    account: "px-x".to_string(),
                    price_exponent: 0,
                    price_type: PriceType::Price,
                    publishers: vec![],
                    min_publishers: 1,
                }],
            }],
        };
        let registry = InstrumentRegistry::from_catalog(&catalog).unwrap();
        assert_eq!(registry.lookup("px-x").unwrap().symbol, "px-x");
    }

    #[test]
    fn duplicate_account_rejected() {
        let mut catalog = catalog();
        let dup = catalog.products[0].price[0].clone();
        catalog.products[1].price.push(dup);
        assert_eq!(
            InstrumentRegistry::from_catalog(&catalog).unwrap_err(),
            RegistryError::DuplicateAccount("px-ltc".to_string())
        );
    }

    #[test]
    fn unrecognized_price_type_is_unknown() {
        let spec: InstrumentSpec = serde_json::from_value(serde_json::json!({
            "account": "px", "price_exponent": 0, "price_type": "volatility"
        }))
        .unwrap();
        assert_eq!(spec.price_type, PriceType::Unknown);
    }

    #[test]
    fn products_group_instruments() {
        let registry = InstrumentRegistry::from_catalog(&catalog()).unwrap();
        let products = registry.products();
        assert_eq!(products.len(), 2);
        assert_eq!(products[0].instruments, vec!["px-ltc".to_string()]);
        assert_eq!(products[0].attr_dict["asset_type"], "Crypto");
    }
}
