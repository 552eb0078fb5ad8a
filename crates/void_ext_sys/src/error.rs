//! Error types for interface loading

use thiserror::Error;

use crate::types::VariantType;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoadError>;

/// Errors that can occur while binding the engine interface
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LoadError {
    /// The resolver returned null for a required symbol
    #[error("required engine interface function '{symbol}' is missing")]
    MissingSymbol { symbol: &'static str },

    /// The engine provides no builtin function for a variant type
    #[error("engine provides no {what} for variant type {ty}")]
    MissingBuiltin { ty: VariantType, what: &'static str },

    /// The engine passed a null resolver
    #[error("engine passed a null interface resolver")]
    NullResolver,

    /// The interface was used before it was loaded
    #[error("engine interface has not been loaded")]
    NotLoaded,
}
