//! Maps RDF statements onto managed entity records.
//!
//! Entity types are declared as [`schema::Schema`] fragments (or loaded from
//! JSON schema documents) and resolved by a [`metadata::MetadataIndex`]
//! into per-type metadata. An [`api::EntityManager`] reads records from a
//! [`datasource::DataSource`], tracks where their values came from, and
//! writes back only the statements that changed.

pub mod api;
pub mod config;
pub mod consts;
pub mod datasource;
pub mod dialect;
pub mod errors;
pub mod identity;
pub mod instance;
pub mod lazy;
pub mod materializer;
pub mod memory;
pub mod metadata;
pub mod namespaces;
pub mod options;
pub mod query;
pub mod schema;
pub mod transaction;
pub mod util;
pub mod value;

pub use api::{init_logging, EntityManager, EntityManagerFactory, EntityState};
pub use config::{FactoryRegistry, PersistenceUnit, UnitConfig};
pub use datasource::DataSource;
pub use errors::{ErrorKind, OrmError, Result};
pub use identity::RdfId;
pub use instance::{PropertyValue, Record};
pub use memory::MemoryDataSource;
pub use metadata::MetadataIndex;
pub use options::{Cascade, CollectionKind, FetchType, LifecycleEvent};
pub use schema::{Property, Schema, SchemaDocument};
pub use transaction::TransactionalDataSource;
pub use value::{Collection, Value};
