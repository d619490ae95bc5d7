//! EWS Retention Tag Sweeper
//!
//! A maintenance utility that connects to an Exchange mailbox over EWS,
//! enumerates every folder in the mailbox (or its online archive), and
//! removes personal retention tags (archive tag and/or policy tag) from
//! folders, optionally filtered by folder path substring and/or a set of
//! retention-tag identifiers.
//!
//! # Overview
//!
//! A run has two phases, consumed in sequence:
//! - **Enumeration**: a deep, paginated traversal of the folder tree under
//!   the chosen root, returning the complete list of descendant folders.
//! - **Sweep**: each folder is re-read by identifier, its archive and
//!   policy tag slots are inspected independently, and eligible tags are
//!   cleared and persisted in a single update per folder. A log-only mode
//!   reports tagged folders without changing anything.
//!
//! # Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use ews_retention_sweep::auth::{self, ConnectionSettings, CredentialMode, EndpointMode};
//! use ews_retention_sweep::client::{FolderService, RootScope};
//! use ews_retention_sweep::enumerator::FolderEnumerator;
//! use ews_retention_sweep::models::RetentionFilter;
//! use ews_retention_sweep::sweeper::TagSweeper;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let settings = ConnectionSettings {
//!         mailbox: "user@example.com".to_string(),
//!         endpoint: EndpointMode::Autodiscover { allow_redirection: false },
//!         credentials: CredentialMode::Environment,
//!         impersonate: false,
//!         ignore_certificate: false,
//!     };
//!
//!     let service: Arc<dyn FolderService> = Arc::new(auth::connect(&settings).await?);
//!
//!     let folders = FolderEnumerator::new(Arc::clone(&service))
//!         .traverse(RootScope::Mailbox)
//!         .await
//!         .map_err(|e| e.source)?;
//!
//!     let summary = TagSweeper::new(service)
//!         .process(&folders, &RetentionFilter::any(), false)
//!         .await
//!         .map_err(|e| e.source)?;
//!
//!     println!("{}", summary);
//!     Ok(())
//! }
//! ```
//!
//! # Module Organization
//!
//! - [`auth`] - Session establishment and endpoint autodiscovery
//! - [`cli`] - Command-line interface and sweep orchestration
//! - [`client`] - The folder-service abstraction and the EWS SOAP client
//! - [`config`] - Configuration management
//! - [`enumerator`] - Deep paginated folder enumeration
//! - [`error`] - Error types and result aliases
//! - [`models`] - Core data structures
//! - [`sweeper`] - Per-folder tag inspection and removal

pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod models;
pub mod sweeper;

// Re-export commonly used types for convenience
pub use error::{EwsError, Result};

// Core data models
pub use models::{
    FolderId, FolderPage, FolderRef, FolderTagState, RetentionFilter, RetentionTag, RunSummary,
    TagKind, TagUpdate,
};

// Service seam and production client
pub use client::{EwsClient, FolderService, RootScope};

// Session establishment
pub use auth::{ConnectionSettings, CredentialMode, EndpointMode};

// Traversal and sweep engines
pub use enumerator::{FolderEnumerator, TraversalError};
pub use sweeper::{SweepError, TagSweeper};

// Config types
pub use config::{Config, ConnectionConfig, SweepConfig};

// CLI types (for binary usage)
pub use cli::{Cli, ProgressReporter, Report};
