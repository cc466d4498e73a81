//! Infrastructure layer: document storage, configuration and the application
//! services that turn requests into atomic changesets of domain records.

pub mod config;
pub mod services;
pub mod store;

pub use config::{AppConfig, ConfigError};
pub use services::{ServiceError, ServiceResult, Services};
pub use store::{
    Changeset, DocumentStore, InMemoryDocumentStore, PostgresDocumentStore, Store, StoreError,
};
