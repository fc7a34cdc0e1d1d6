//! # fleet-configuration
//!
//! Configuration schemas and the configurations materialized from them.
//!
//! A [`ConfigurationDefinition`] is a tree of [`PropertyDefinition`]s
//! (simple, map and list properties, each optionally required, read-only or
//! carrying a default). A [`Configuration`] is a name-keyed set of property
//! values shaped by such a schema.
//!
//! ## Operations
//!
//! - [`resolve`]: builds the minimal default configuration a schema demands
//! - [`normalize`]: fills in missing properties and cleans up values in place
//! - [`validate`]: reports every way a configuration violates its schema
//! - [`adapt`]: carries an existing configuration onto a changed schema
//!
//! Schemas are checked once when they are built or deserialized; every
//! operation above assumes a well-formed schema and never fails.

mod adapt;
mod configuration;
mod definition;
mod error;
mod fingerprint;
mod normalize;
mod resolve;
mod validate;

pub use adapt::adapt;
pub use configuration::{Configuration, Property, PropertyMap, PropertyValue};
pub use definition::{ConfigurationDefinition, DefinitionKind, PropertyDefinition, SimpleType};
pub use error::SchemaError;
pub use fingerprint::SchemaFingerprint;
pub use normalize::normalize;
pub use resolve::resolve;
pub use validate::validate;
