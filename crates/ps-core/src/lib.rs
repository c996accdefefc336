//! # ps-core
//!
//! Shared error taxonomy and result types for the pscore workspace.
//!
//! The statistical pipeline lives in `ps-inference`; this crate only holds
//! the types every stage agrees on: the [`Error`] enum, the [`Result`]
//! alias, and the fitted-model / effect-estimate summaries.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::{EffectEstimate, GlmFit};

/// Workspace version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
