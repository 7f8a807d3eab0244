//! Shared data model for the MADMIN module registry.
//!
//! These types describe a module manifest after it has passed validation.
//! Raw submissions never deserialize straight into them; the store crate's
//! validator is the only producer of a [`ModuleManifest`] built from
//! untrusted input.

pub mod manifest;
pub mod verification;

pub use manifest::{
    Author, Category, Changelog, ModuleManifest, ModuleStats, Requirements, TagSet,
};
pub use verification::VerificationStatus;
