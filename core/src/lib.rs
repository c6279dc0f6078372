//! Core engine for mirroring source control history.
//!
//! This crate owns the persistent model (projects, repositories,
//! changesets, changes), the incremental sync engine that pulls new
//! revisions through an SCM adapter, committer-to-user resolution,
//! work item reference scanning, and credential encryption at rest.
//! Process surfaces (CLI, service) live in sibling crates and drive
//! everything through [`RepositoryRegistry`] and [`SyncEngine`].

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod cipher;
pub mod config;
pub mod engine;
pub mod identity;
pub mod model;
pub mod refscan;
pub mod registry;
pub mod store;

pub use cipher::CipherError;
pub use cipher::CredentialCipher;
pub use config::Config;
pub use config::ConfigError;
pub use engine::BatchReport;
pub use engine::SyncEngine;
pub use engine::SyncError;
pub use engine::SyncOutcome;
pub use engine::SyncPhase;
pub use identity::CommitterResolver;
pub use identity::StaticUserDirectory;
pub use identity::UserDirectory;
pub use model::Change;
pub use model::Changeset;
pub use model::ChangesetId;
pub use model::NewRepository;
pub use model::Project;
pub use model::ProjectId;
pub use model::Repository;
pub use model::RepositoryId;
pub use model::UserId;
pub use refscan::ReferenceScanner;
pub use refscan::ScanError;
pub use registry::RegistryError;
pub use registry::RepositoryRegistry;
pub use registry::ValidationError;
pub use store::Store;
pub use store::StoreError;
