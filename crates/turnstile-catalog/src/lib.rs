//! Catalog parsing and validation for turnstiled
//!
//! The catalog is the single source of truth for entitlement policy:
//! - Grant window per (tier, component), with per-component overrides
//! - Credit cost per component
//! - Minimum tier per component
//! - Per-tier unmetered flag (no charge, windows still apply)
//!
//! It is parsed from TOML once at startup and swapped wholesale on an
//! explicit admin reload; request handling never mutates it.

mod catalog;
mod schema;
mod validation;

pub use catalog::*;
pub use schema::*;
pub use validation::*;

use std::path::Path;
use thiserror::Error;

/// Catalog errors
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported catalog version: {0}")]
    UnsupportedVersion(u32),
}

pub type CatalogResult<T> = Result<T, CatalogError>;

/// Load and validate a catalog from a TOML file
pub fn load_catalog(path: impl AsRef<Path>) -> CatalogResult<Catalog> {
    let content = std::fs::read_to_string(path)?;
    parse_catalog(&content)
}

/// Parse and validate a catalog from a TOML string
pub fn parse_catalog(content: &str) -> CatalogResult<Catalog> {
    let raw: RawCatalog = toml::from_str(content)?;

    if raw.catalog_version != CURRENT_CATALOG_VERSION {
        return Err(CatalogError::UnsupportedVersion(raw.catalog_version));
    }

    let errors = validate_catalog(&raw);
    if !errors.is_empty() {
        return Err(CatalogError::ValidationFailed { errors });
    }

    Ok(Catalog::from_raw(raw))
}

/// Current supported catalog version
pub const CURRENT_CATALOG_VERSION: u32 = 1;
