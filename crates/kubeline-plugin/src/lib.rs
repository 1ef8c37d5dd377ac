//! Plugin catalog, parameter resolution and result propagation.
//!
//! The three pure-ish pieces of a stage run that sit around the executor:
//! - [`Catalog`] seeds and serves plugin definitions
//! - [`resolve`] turns a plugin's parameter declarations into concrete values
//! - [`propagate`] maps a stage result onto environment variables for later stages

pub mod builtin;
pub mod catalog;
pub mod error;
pub mod propagate;
pub mod resolver;

pub use builtin::builtin_plugins;
pub use catalog::{Catalog, ReconcileReport};
pub use error::{CatalogError, ResolutionError};
pub use propagate::{propagate, render};
pub use resolver::resolve;
