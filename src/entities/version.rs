//! Node versions.
//!
//! Every node keeps a stack of versions and a pointer to the active one.
//! A version stores only what differs from its type's declared defaults:
//! the `parameters` map is sparse, holding an entry exactly when the value
//! was set away from the default.

use rustc_hash::FxHashMap;

use crate::attrs;
use crate::entities::graph::Variable;
use crate::entities::node::Node;
use crate::entities::node_type::{NodeType, ACTIVE_TYPE_VERSION};
use crate::exec::output::OutputRecord;
use crate::storage::{DictKind, EntityCode, EntityRef, StorageAdapter, StorageResult};

/// One version of a node.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeVersion {
    pub uuid: String,
    pub id: i64,
    pub comment: String,
    /// `date` and `user` of the last execution, empty before the first run.
    pub last_exec: String,
    pub last_user: String,
    /// A locked version refuses parameter writes and deletion.
    pub locked: bool,
    /// Pinned type version id, [`ACTIVE_TYPE_VERSION`] to follow the type.
    pub type_force_version: i64,
    /// Sparse parameter overrides, keyed by parameter name.
    pub parameters: FxHashMap<String, String>,
    /// Opaque per-version data.
    pub data: FxHashMap<String, String>,
    /// Explicit variables, highest precedence in the node environment.
    pub variables: Vec<Variable>,
    /// Cached output record of the last successful execution.
    pub output: Option<OutputRecord>,
}

impl NodeVersion {
    pub fn new(id: i64) -> Self {
        Self {
            uuid: String::new(),
            id,
            comment: String::new(),
            last_exec: String::new(),
            last_user: String::new(),
            locked: false,
            type_force_version: ACTIVE_TYPE_VERSION,
            parameters: FxHashMap::default(),
            data: FxHashMap::default(),
            variables: Vec::new(),
            output: None,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::NodeVersion, &self.uuid)
    }

    /// Persist the version and its current state under `node`.
    pub async fn create(
        &mut self,
        store: &dyn StorageAdapter,
        node: &EntityRef,
    ) -> StorageResult<()> {
        self.uuid = store
            .create_entity(
                Some(node),
                EntityCode::NodeVersion,
                attrs! {
                    "id" => self.id,
                    "comment" => self.comment,
                    "lastExec" => self.last_exec,
                    "lastUser" => self.last_user,
                    "locked" => self.locked,
                    "typeForceVersion" => self.type_force_version,
                },
            )
            .await?;
        let version_ref = self.entity_ref();
        for (key, value) in &self.parameters {
            store
                .set_dictionary(&version_ref, DictKind::Parameter, key, value)
                .await?;
        }
        for (key, value) in &self.data {
            store
                .set_dictionary(&version_ref, DictKind::Data, key, value)
                .await?;
        }
        for variable in &mut self.variables {
            variable.create(store, &version_ref).await?;
        }
        Ok(())
    }

    pub async fn set_comment(
        &mut self,
        store: &dyn StorageAdapter,
        comment: impl Into<String>,
    ) -> StorageResult<()> {
        self.comment = comment.into();
        store
            .set_attrs(&self.entity_ref(), attrs! { "comment" => self.comment })
            .await
    }

    /// Stamp the execution date and user, done just before a run starts.
    pub async fn set_last_exec(
        &mut self,
        store: &dyn StorageAdapter,
        date: impl Into<String>,
        user: impl Into<String>,
    ) -> StorageResult<()> {
        self.last_exec = date.into();
        self.last_user = user.into();
        store
            .set_attrs(
                &self.entity_ref(),
                attrs! { "lastExec" => self.last_exec, "lastUser" => self.last_user },
            )
            .await
    }

    pub async fn set_locked(
        &mut self,
        store: &dyn StorageAdapter,
        locked: bool,
    ) -> StorageResult<()> {
        self.locked = locked;
        store
            .set_attrs(&self.entity_ref(), attrs! { "locked" => locked })
            .await
    }

    /// Pin (or unpin) the type schema version this node version compiles
    /// against.
    pub async fn set_type_force_version(
        &mut self,
        store: &dyn StorageAdapter,
        id: i64,
    ) -> StorageResult<()> {
        self.type_force_version = id;
        store
            .set_attrs(&self.entity_ref(), attrs! { "typeForceVersion" => id })
            .await
    }

    /// Add an explicit variable to this version.
    pub async fn add_variable(
        &mut self,
        store: &dyn StorageAdapter,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> StorageResult<()> {
        let mut variable = Variable::new(name, value);
        variable.create(store, &self.entity_ref()).await?;
        self.variables.push(variable);
        Ok(())
    }
}

impl Node {
    /// Read a parameter of the active version: the override when one exists
    /// and the parameter is visible, else the declared default. `None` when
    /// the type declares no such parameter.
    pub fn parameter(&self, ty: &NodeType, name: &str) -> Option<String> {
        let version = self.active_version()?;
        let param = ty.parameter(name, version.type_force_version)?;
        if param.visibility {
            if let Some(value) = version.parameters.get(name) {
                return Some(value.clone());
            }
        }
        Some(param.default.clone())
    }

    /// Write a parameter on the active version, keeping the override map
    /// sparse: setting the declared default removes the entry.
    ///
    /// No-op on a locked version or an undeclared parameter name.
    pub async fn set_parameter(
        &mut self,
        store: &dyn StorageAdapter,
        ty: &NodeType,
        name: &str,
        value: impl Into<String>,
    ) -> StorageResult<()> {
        let active = self.version_active;
        let Some(version) = self.version_mut(active) else {
            return Ok(());
        };
        if version.locked {
            return Ok(());
        }
        let Some(param) = ty.parameter(name, version.type_force_version) else {
            return Ok(());
        };
        let value = value.into();
        let version_ref = version.entity_ref();
        if value == param.default {
            if version.parameters.remove(name).is_some() {
                store
                    .del_dictionary(&version_ref, DictKind::Parameter, name)
                    .await?;
            }
        } else {
            version.parameters.insert(name.to_string(), value.clone());
            store
                .set_dictionary(&version_ref, DictKind::Parameter, name, &value)
                .await?;
        }
        self.bump(store).await
    }

    /// Duplicate the active version as a new one with the next free id and
    /// make it active. The duplicate starts with no cached output.
    pub async fn new_version(&mut self, store: &dyn StorageAdapter) -> StorageResult<i64> {
        let next_id = self.versions.iter().map(|v| v.id).max().unwrap_or(0) + 1;
        let mut fresh = match self.active_version() {
            Some(active) => {
                let mut copy = active.clone();
                copy.uuid = String::new();
                copy.id = next_id;
                copy.locked = false;
                copy.output = None;
                copy.last_exec = String::new();
                copy.last_user = String::new();
                copy
            }
            None => NodeVersion::new(next_id),
        };
        let node_ref = self.entity_ref();
        fresh.create(store, &node_ref).await?;
        self.versions.push(fresh);
        self.set_version_unchecked(store, next_id).await?;
        Ok(next_id)
    }

    /// Delete one version. Refused while the version is locked. Deleting
    /// the last remaining version immediately creates a fresh replacement
    /// with id `start_id`, so a node is never versionless.
    pub async fn del_version(
        &mut self,
        store: &dyn StorageAdapter,
        id: i64,
        start_id: i64,
    ) -> StorageResult<()> {
        let Some(index) = self.versions.iter().position(|v| v.id == id) else {
            return Ok(());
        };
        if self.versions[index].locked {
            return Ok(());
        }
        let removed = self.versions.remove(index);
        store.delete_entity(&removed.entity_ref()).await?;
        if self.versions.is_empty() {
            let mut replacement = NodeVersion::new(start_id);
            let node_ref = self.entity_ref();
            replacement.create(store, &node_ref).await?;
            self.versions.push(replacement);
            self.set_version_unchecked(store, start_id).await?;
        } else if self.version_active == id {
            let fallback = self.versions.last().map(|v| v.id).unwrap_or(start_id);
            self.set_version_unchecked(store, fallback).await?;
        } else {
            self.bump(store).await?;
        }
        Ok(())
    }

    /// Switch the active version without checking group propagation; the
    /// graph-level switch handles linked types.
    pub(crate) async fn set_version_unchecked(
        &mut self,
        store: &dyn StorageAdapter,
        id: i64,
    ) -> StorageResult<()> {
        if self.versions.iter().any(|v| v.id == id) {
            self.version_active = id;
            store
                .set_attrs(&self.entity_ref(), attrs! { "versionActive" => id })
                .await?;
            self.bump(store).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::node_type::{Param, ParamKind, TypeVersion};

    fn sample_type() -> NodeType {
        let mut ty = NodeType::new("comp");
        let mut version = TypeVersion::new(0);
        version
            .parameters
            .push(Param::new("quality", ParamKind::Int, "8"));
        let mut hidden = Param::new("seed", ParamKind::Int, "42");
        hidden.visibility = false;
        version.parameters.push(hidden);
        ty.versions = vec![version];
        ty
    }

    #[test]
    fn parameter_reads_default_without_override() {
        let ty = sample_type();
        let mut node = Node::new("n1", "comp");
        node.versions.push(NodeVersion::new(0));
        assert_eq!(node.parameter(&ty, "quality").as_deref(), Some("8"));
        assert_eq!(node.parameter(&ty, "missing"), None);
    }

    #[test]
    fn hidden_parameter_ignores_override() {
        let ty = sample_type();
        let mut node = Node::new("n1", "comp");
        let mut version = NodeVersion::new(0);
        version.parameters.insert("seed".into(), "7".into());
        node.versions.push(version);
        assert_eq!(node.parameter(&ty, "seed").as_deref(), Some("42"));
    }
}
