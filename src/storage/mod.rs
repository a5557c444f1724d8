//! Storage adapter contract.
//!
//! The engine never talks to a concrete database. Every entity mutation goes
//! through a [`StorageAdapter`] instance injected by the caller; the adapter's
//! transport and schema are its own business. The call surface is a small set
//! of generic entity operations: create/read/update/delete rows addressed by
//! an [`EntityRef`], link rows for node edges, and sparse dictionary slots
//! for parameter/data maps.
//!
//! [`memory::MemoryStorage`] provides a complete in-process implementation
//! used by the test suite and by single-session development setups.

pub mod memory;

use async_trait::async_trait;
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::assembly::PersistedGraph;

pub use memory::MemoryStorage;

/// Flat attribute map handed to [`StorageAdapter::create_entity`] and
/// [`StorageAdapter::set_attrs`].
pub type AttrMap = FxHashMap<String, Value>;

/// Build an [`AttrMap`] from `key => value` pairs.
///
/// ```
/// use mangrove::attrs;
///
/// let fields = attrs! { "name" => "comp", "order" => 2 };
/// assert_eq!(fields["order"], serde_json::json!(2));
/// ```
#[macro_export]
macro_rules! attrs {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut map = $crate::storage::AttrMap::default();
        $( map.insert(($key).to_string(), ::serde_json::json!(&$value)); )*
        map
    }};
}

/// Entity kind codes, one per persisted record shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EntityCode {
    Project,
    Pattern,
    GraphTemplate,
    Graph,
    Group,
    Node,
    NodeVersion,
    Variable,
    Type,
    TypeVersion,
    TypeParameter,
    TypeFile,
    Action,
    BatchScript,
    Context,
    Hud,
}

impl EntityCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityCode::Project => "Project",
            EntityCode::Pattern => "Pattern",
            EntityCode::GraphTemplate => "GraphTemplate",
            EntityCode::Graph => "Graph",
            EntityCode::Group => "Group",
            EntityCode::Node => "Node",
            EntityCode::NodeVersion => "NodeVersion",
            EntityCode::Variable => "Variable",
            EntityCode::Type => "Type",
            EntityCode::TypeVersion => "TypeVersion",
            EntityCode::TypeParameter => "TypeParameter",
            EntityCode::TypeFile => "TypeFile",
            EntityCode::Action => "Action",
            EntityCode::BatchScript => "BatchScript",
            EntityCode::Context => "Context",
            EntityCode::Hud => "Hud",
        }
    }
}

impl fmt::Display for EntityCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one persisted entity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EntityRef {
    pub code: EntityCode,
    pub uuid: String,
}

impl EntityRef {
    pub fn new(code: EntityCode, uuid: impl Into<String>) -> Self {
        Self {
            code,
            uuid: uuid.into(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.code, self.uuid)
    }
}

/// Which sparse dictionary on an entity a slot write targets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DictKind {
    /// Parameter overrides on a node version.
    Parameter,
    /// Opaque user data on a node or node version.
    Data,
}

impl DictKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DictKind::Parameter => "Parameter",
            DictKind::Data => "Data",
        }
    }
}

/// Errors surfaced by storage adapters.
///
/// Adapter errors are fatal to the calling operation: the engine propagates
/// them with `?` and performs no local recovery.
#[derive(Debug, Error, Diagnostic)]
pub enum StorageError {
    #[error("entity not found: {entity}")]
    #[diagnostic(
        code(mangrove::storage::not_found),
        help("The entity may have been deleted by another session; refresh the graph.")
    )]
    NotFound { entity: EntityRef },

    #[error("backend error: {message}")]
    #[diagnostic(code(mangrove::storage::backend))]
    Backend { message: String },

    #[error("persisted payload could not be decoded: {source}")]
    #[diagnostic(
        code(mangrove::storage::decode),
        help("The stored record does not match the expected entity shape.")
    )]
    Decode {
        #[source]
        source: serde_json::Error,
    },
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// The external persistence contract.
///
/// One adapter instance is injected into every operation that writes; there
/// is no process-global adapter. `connect`/`close` lifecycle is owned by
/// whoever constructs the adapter.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    /// Open backend connections. Default: no-op.
    async fn connect(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Release backend connections. Default: no-op.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    /// Create an entity under `parent` (None for a root Project row) and
    /// return its new uuid.
    async fn create_entity(
        &self,
        parent: Option<&EntityRef>,
        code: EntityCode,
        fields: AttrMap,
    ) -> StorageResult<String>;

    /// Overwrite the given attribute fields on an entity.
    async fn set_attrs(&self, entity: &EntityRef, fields: AttrMap) -> StorageResult<()>;

    /// Read one attribute; `None` when the field was never written.
    async fn get_attr(&self, entity: &EntityRef, field: &str) -> StorageResult<Option<Value>>;

    /// Delete an entity and its whole child hierarchy.
    async fn delete_entity(&self, entity: &EntityRef) -> StorageResult<()>;

    /// Fetch the persisted tree of a graph, or `None` if the graph row
    /// does not exist.
    async fn get_objects(&self, graph: &EntityRef) -> StorageResult<Option<PersistedGraph>>;

    /// Record a directed link row between two nodes.
    async fn create_link(&self, from: &EntityRef, to: &EntityRef) -> StorageResult<()>;

    /// Remove the link row between two nodes, if present.
    async fn delete_link(&self, from: &EntityRef, to: &EntityRef) -> StorageResult<()>;

    /// Write one slot of a sparse dictionary on an entity.
    async fn set_dictionary(
        &self,
        entity: &EntityRef,
        dict: DictKind,
        key: &str,
        value: &str,
    ) -> StorageResult<()>;

    /// Remove one slot of a sparse dictionary on an entity.
    async fn del_dictionary(&self, entity: &EntityRef, dict: DictKind, key: &str)
        -> StorageResult<()>;
}
