//! The entity model: projects, patterns, types, graphs, nodes, versions.
//!
//! Every entity is a plain data holder with write-through setters: a setter
//! mutates the in-memory value and immediately persists it through the
//! injected [`crate::storage::StorageAdapter`]. Nothing here caches dirty
//! state or batches writes.

pub mod graph;
pub mod node;
pub mod node_type;
pub mod pattern;
pub mod project;
pub mod version;

pub use graph::{Graph, Group, Variable};
pub use node::{unique_name, LinkRef, Node, NodeId};
pub use node_type::{Action, NodeType, Param, ParamKind, TypeFile, TypeVersion, ACTIVE_TYPE_VERSION};
pub use pattern::{GraphTemplate, Pattern};
pub use project::{BatchScript, Context, Hud, Project};
pub use version::NodeVersion;

/// Seconds since the Unix epoch, the resolution of `updated` stamps.
pub(crate) fn now_stamp() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0.0, |d| d.as_secs_f64())
}
