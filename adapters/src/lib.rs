//! SCM adapter layer for scmsync.
//!
//! Every supported version-control backend is driven through the
//! [`ScmAdapter`] trait, which models the operations the mirroring engine and
//! the browse surface need: revision streaming, directory listing, file
//! content, diffs, branch and tag enumeration. Adapters are constructed
//! through an [`AdapterRegistry`] of per-backend factories so callers never
//! name a concrete backend type.

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod adapter;
pub mod error;
pub mod git;
pub mod testing;
pub mod types;

pub use adapter::AdapterFactory;
pub use adapter::AdapterRegistry;
pub use adapter::ScmAdapter;
pub use error::ScmError;
pub use error::ScmResult;
pub use git::GitAdapter;
pub use git::GitFactory;
pub use types::Capability;
pub use types::ChangeAction;
pub use types::Commit;
pub use types::ConnectionSettings;
pub use types::Entry;
pub use types::EntryKind;
pub use types::FileChange;
pub use types::RevisionStream;
