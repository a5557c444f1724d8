//! Graph nodes.
//!
//! A [`Node`] is one step of a graph: a position, a type binding, an owner
//! token for the advisory lock protocol, link references to its inputs and
//! outputs, and a stack of [`NodeVersion`]s of which exactly one is active.

use rustc_hash::FxHashMap;
use std::fmt;

use crate::attrs;
use crate::entities::now_stamp;
use crate::entities::version::NodeVersion;
use crate::session::FREE_OWNER;
use crate::storage::{DictKind, EntityCode, EntityRef, StorageAdapter, StorageResult};

/// Storage uuid of a node, used as its graph-wide identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

/// A directed edge endpoint.
///
/// Links load from storage as bare uuid strings; [`crate::entities::Graph`]
/// resolves them against its own nodes after assembly. A reference that
/// never resolves is dropped, not kept as a dangling edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LinkRef {
    /// A persisted uuid not yet matched to a sibling node.
    Unresolved(String),
    /// A live edge to a node of the same graph.
    Resolved(NodeId),
}

impl LinkRef {
    /// The referenced uuid, resolved or not.
    pub fn uuid(&self) -> &str {
        match self {
            LinkRef::Unresolved(s) => s,
            LinkRef::Resolved(id) => id.as_str(),
        }
    }

    pub fn resolved(&self) -> Option<&NodeId> {
        match self {
            LinkRef::Unresolved(_) => None,
            LinkRef::Resolved(id) => Some(id),
        }
    }
}

/// One node of a graph.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub uuid: String,
    pub name: String,
    /// Name of the node's type, kept even when the type cannot be resolved
    /// against the project.
    pub type_name: String,
    /// Uuid of the resolved type, if resolution succeeded.
    pub type_uuid: Option<String>,
    pub posx: f64,
    pub posy: f64,
    /// Owner session token, or [`FREE_OWNER`].
    pub user: String,
    /// `address:port` of the owning session's unlock listener, or empty.
    pub port: String,
    /// Opaque per-node data, not variable-templated.
    pub data: FxHashMap<String, String>,
    pub input_links: Vec<LinkRef>,
    pub output_links: Vec<LinkRef>,
    pub versions: Vec<NodeVersion>,
    /// Id of the active version.
    pub version_active: i64,
    /// Seconds since the epoch of the last persisted mutation; drives the
    /// optimistic refresh of foreign nodes.
    pub updated: f64,
}

impl Node {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            type_name: type_name.into(),
            type_uuid: None,
            posx: 0.0,
            posy: 0.0,
            user: FREE_OWNER.to_string(),
            port: String::new(),
            data: FxHashMap::default(),
            input_links: Vec::new(),
            output_links: Vec::new(),
            versions: Vec::new(),
            version_active: 0,
            updated: 0.0,
        }
    }

    pub fn id(&self) -> NodeId {
        NodeId(self.uuid.clone())
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::Node, &self.uuid)
    }

    pub fn is_free(&self) -> bool {
        self.user == FREE_OWNER
    }

    pub fn version(&self, id: i64) -> Option<&NodeVersion> {
        self.versions.iter().find(|v| v.id == id)
    }

    pub fn version_mut(&mut self, id: i64) -> Option<&mut NodeVersion> {
        self.versions.iter_mut().find(|v| v.id == id)
    }

    pub fn active_version(&self) -> Option<&NodeVersion> {
        self.version(self.version_active)
    }

    pub fn active_version_mut(&mut self) -> Option<&mut NodeVersion> {
        self.version_mut(self.version_active)
    }

    /// Uuids of the resolved input links, the persisted wire shape.
    pub(crate) fn input_link_field(&self) -> String {
        self.input_links
            .iter()
            .filter_map(LinkRef::resolved)
            .map(|id| id.0.clone())
            .collect::<Vec<_>>()
            .join(";")
    }

    /// Advance the `updated` stamp and persist it.
    pub(crate) async fn bump(&mut self, store: &dyn StorageAdapter) -> StorageResult<()> {
        self.updated = now_stamp();
        store
            .set_attrs(&self.entity_ref(), attrs! { "updated" => self.updated })
            .await
    }

    /// Release ownership unconditionally.
    pub(crate) async fn free(&mut self, store: &dyn StorageAdapter) -> StorageResult<()> {
        self.user = FREE_OWNER.to_string();
        self.port.clear();
        store
            .set_attrs(
                &self.entity_ref(),
                attrs! { "user" => FREE_OWNER, "port" => "" },
            )
            .await
    }

    /// Take or release ownership. `user` is a session token or [`FREE_OWNER`];
    /// `port` is the owner's unlock endpoint, empty when freeing.
    pub async fn set_user(
        &mut self,
        store: &dyn StorageAdapter,
        user: impl Into<String>,
        port: impl Into<String>,
    ) -> StorageResult<()> {
        self.user = user.into();
        self.port = port.into();
        store
            .set_attrs(
                &self.entity_ref(),
                attrs! { "user" => self.user, "port" => self.port },
            )
            .await?;
        self.bump(store).await
    }

    pub async fn set_node_pos(
        &mut self,
        store: &dyn StorageAdapter,
        posx: f64,
        posy: f64,
    ) -> StorageResult<()> {
        self.posx = posx;
        self.posy = posy;
        store
            .set_attrs(&self.entity_ref(), attrs! { "posx" => posx, "posy" => posy })
            .await?;
        self.bump(store).await
    }

    /// Rename the node. The caller guarantees graph-wide uniqueness via
    /// [`unique_name`].
    pub async fn set_name(
        &mut self,
        store: &dyn StorageAdapter,
        name: impl Into<String>,
    ) -> StorageResult<()> {
        self.name = name.into();
        store
            .set_attrs(&self.entity_ref(), attrs! { "name" => self.name })
            .await?;
        self.bump(store).await
    }

    /// Rebind the node to another type by name, dropping the resolved uuid
    /// until the next assembly pass resolves it again.
    pub async fn set_type(
        &mut self,
        store: &dyn StorageAdapter,
        type_name: impl Into<String>,
        type_uuid: Option<String>,
    ) -> StorageResult<()> {
        self.type_name = type_name.into();
        self.type_uuid = type_uuid;
        store
            .set_attrs(
                &self.entity_ref(),
                attrs! {
                    "typeName" => self.type_name,
                    "typeUuid" => self.type_uuid.clone().unwrap_or_default(),
                },
            )
            .await?;
        self.bump(store).await
    }

    /// Write one opaque data slot on the node.
    pub async fn set_data(
        &mut self,
        store: &dyn StorageAdapter,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> StorageResult<()> {
        let key = key.into();
        let value = value.into();
        store
            .set_dictionary(&self.entity_ref(), DictKind::Data, &key, &value)
            .await?;
        self.data.insert(key, value);
        self.bump(store).await
    }

    /// Persist the node, its data slots, and its versions under `graph`.
    pub async fn create(
        &mut self,
        store: &dyn StorageAdapter,
        graph: &EntityRef,
    ) -> StorageResult<()> {
        self.updated = now_stamp();
        self.uuid = store
            .create_entity(
                Some(graph),
                EntityCode::Node,
                attrs! {
                    "name" => self.name,
                    "typeName" => self.type_name,
                    "typeUuid" => self.type_uuid.clone().unwrap_or_default(),
                    "posx" => self.posx,
                    "posy" => self.posy,
                    "user" => self.user,
                    "port" => self.port,
                    "versionActive" => self.version_active,
                    "inputLinks" => self.input_link_field(),
                    "updated" => self.updated,
                },
            )
            .await?;
        let node_ref = self.entity_ref();
        for (key, value) in &self.data {
            store
                .set_dictionary(&node_ref, DictKind::Data, key, value)
                .await?;
        }
        for version in &mut self.versions {
            version.create(store, &node_ref).await?;
        }
        Ok(())
    }

    /// Remove one opaque data slot on the node, if present.
    pub async fn del_data(
        &mut self,
        store: &dyn StorageAdapter,
        key: &str,
    ) -> StorageResult<()> {
        if self.data.remove(key).is_some() {
            store
                .del_dictionary(&self.entity_ref(), DictKind::Data, key)
                .await?;
            self.bump(store).await?;
        }
        Ok(())
    }
}

/// Pick a graph-unique name starting from `wanted`.
///
/// A trailing digit run in `wanted` seeds the counter, so `"comp7"` taken
/// tries `"comp8"` next; a bare `"comp"` taken tries `"comp2"`.
pub fn unique_name(wanted: &str, taken: &[&str]) -> String {
    if !taken.contains(&wanted) {
        return wanted.to_string();
    }
    let stem_len = wanted.trim_end_matches(|c: char| c.is_ascii_digit()).len();
    let (stem, digits) = wanted.split_at(stem_len);
    let mut counter: u64 = digits.parse().map_or(2, |n: u64| n + 1);
    loop {
        let candidate = format!("{stem}{counter}");
        if !taken.iter().any(|t| *t == candidate) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_name_appends_counter() {
        assert_eq!(unique_name("comp", &[]), "comp");
        assert_eq!(unique_name("comp", &["comp"]), "comp2");
        assert_eq!(unique_name("comp", &["comp", "comp2"]), "comp3");
    }

    #[test]
    fn unique_name_reuses_trailing_digits() {
        assert_eq!(unique_name("comp7", &["comp7"]), "comp8");
        assert_eq!(unique_name("comp7", &["comp7", "comp8"]), "comp9");
    }

    #[test]
    fn link_ref_uuid_is_stable_across_resolution() {
        let raw = LinkRef::Unresolved("u-1".into());
        let live = LinkRef::Resolved(NodeId::from("u-1"));
        assert_eq!(raw.uuid(), live.uuid());
        assert!(raw.resolved().is_none());
        assert_eq!(live.resolved().unwrap().as_str(), "u-1");
    }
}
