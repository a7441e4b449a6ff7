//! Core types shared across the mixpanel-data workspace.
//!
//! This crate carries the pieces every other crate depends on: the error
//! taxonomy, the credential model (with an opaque [`Secret`] type), the
//! persisted account store and resolver, the logical event/profile records,
//! and the [`Table`] shape used by query results and tabular views.

pub mod accounts;
pub mod credentials;
pub mod error;
pub mod records;
pub mod region;
pub mod secret;
pub mod table;

pub use accounts::{Account, AccountInfo, ConfigStore};
pub use credentials::{Credentials, resolve_credentials};
pub use error::{Error, Result};
pub use records::{EventRecord, ProfileRecord};
pub use region::Region;
pub use secret::Secret;
pub use table::Table;

/// Cancellation signal accepted by all long-running operations.
pub use tokio_util::sync::CancellationToken;
