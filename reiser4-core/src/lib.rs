//! Plugin-structured, balanced-tree filesystem core.
//!
//! This crate is the hosted (non-kernel) core of a reiser4-family
//! filesystem: a composite key/node/item model, a balanced tree engine
//! over an abstract block [`device`], bitmap and object-id allocators, a
//! journal replay/commit protocol, object plugins built on top of the
//! tree, and an fsck-style consistency [`check`]er. Everything above the
//! block device is plugin-dispatched through closed-sum enums rather than
//! the dynamically-loaded function tables a hosted reiser4 implementation
//! would use — see each module's own doc comment for where it's grounded.

pub mod alloc;
pub mod check;
pub mod context;
pub mod device;
pub mod error;
pub mod format;
pub mod item;
pub mod journal;
pub mod key;
pub mod node;
pub mod object;
pub mod plugin;
pub mod tree;

pub use context::{Context, FormatConfig};
pub use error::CoreError;
pub use key::Key;
