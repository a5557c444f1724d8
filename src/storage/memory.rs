//! In-process storage backend.
//!
//! Backs the test suite and single-session development setups. Rows live
//! in one mutex-guarded table keyed by uuid, with a parallel parent/child
//! index so deletes cascade and [`StorageAdapter::get_objects`] can
//! assemble a graph tree without a query language.

use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::assembly::PersistedGraph;
use crate::storage::{
    AttrMap, DictKind, EntityCode, EntityRef, StorageAdapter, StorageError, StorageResult,
};

#[derive(Debug, Default)]
struct Row {
    code: Option<EntityCode>,
    parent: Option<String>,
    attrs: AttrMap,
    params: FxHashMap<String, String>,
    data: FxHashMap<String, String>,
}

#[derive(Debug, Default)]
struct Inner {
    rows: FxHashMap<String, Row>,
    /// Child uuids per parent, in creation order.
    children: FxHashMap<String, Vec<String>>,
    links: Vec<(String, String)>,
}

impl Inner {
    fn row(&self, entity: &EntityRef) -> StorageResult<&Row> {
        self.rows
            .get(&entity.uuid)
            .ok_or_else(|| StorageError::NotFound {
                entity: entity.clone(),
            })
    }

    fn row_mut(&mut self, entity: &EntityRef) -> StorageResult<&mut Row> {
        self.rows
            .get_mut(&entity.uuid)
            .ok_or_else(|| StorageError::NotFound {
                entity: entity.clone(),
            })
    }

    fn subtree(&self, root: &str) -> Vec<String> {
        let mut out = vec![root.to_string()];
        let mut queue = vec![root.to_string()];
        while let Some(uuid) = queue.pop() {
            if let Some(children) = self.children.get(&uuid) {
                for child in children {
                    out.push(child.clone());
                    queue.push(child.clone());
                }
            }
        }
        out
    }

    fn children_of(&self, uuid: &str, code: EntityCode) -> Vec<&str> {
        self.children
            .get(uuid)
            .map(|children| {
                children
                    .iter()
                    .filter(|c| {
                        self.rows
                            .get(c.as_str())
                            .is_some_and(|r| r.code == Some(code))
                    })
                    .map(String::as_str)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn base_value(&self, uuid: &str, row: &Row) -> Map<String, Value> {
        let mut map = Map::new();
        for (k, v) in &row.attrs {
            map.insert(k.clone(), v.clone());
        }
        if let Some(code) = row.code {
            map.insert("code".to_string(), Value::String(code.as_str().to_string()));
        }
        map.insert("uuid".to_string(), Value::String(uuid.to_string()));
        map
    }

    fn string_map(source: &FxHashMap<String, String>) -> Value {
        Value::Object(
            source
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )
    }

    fn variable_values(&self, parent: &str) -> Value {
        Value::Array(
            self.children_of(parent, EntityCode::Variable)
                .into_iter()
                .filter_map(|uuid| {
                    self.rows
                        .get(uuid)
                        .map(|row| Value::Object(self.base_value(uuid, row)))
                })
                .collect(),
        )
    }

    fn graph_value(&self, uuid: &str, row: &Row) -> Value {
        let mut map = self.base_value(uuid, row);
        let nodes: Vec<Value> = self
            .children_of(uuid, EntityCode::Node)
            .into_iter()
            .filter_map(|node_uuid| {
                self.rows
                    .get(node_uuid)
                    .map(|node_row| self.node_value(node_uuid, node_row))
            })
            .collect();
        let groups: Vec<Value> = self
            .children_of(uuid, EntityCode::Group)
            .into_iter()
            .filter_map(|group_uuid| {
                self.rows
                    .get(group_uuid)
                    .map(|group_row| Value::Object(self.base_value(group_uuid, group_row)))
            })
            .collect();
        map.insert("nodes".to_string(), Value::Array(nodes));
        map.insert("groups".to_string(), Value::Array(groups));
        map.insert("variables".to_string(), self.variable_values(uuid));
        Value::Object(map)
    }

    fn node_value(&self, uuid: &str, row: &Row) -> Value {
        let mut map = self.base_value(uuid, row);
        map.insert("data".to_string(), Self::string_map(&row.data));
        let versions: Vec<Value> = self
            .children_of(uuid, EntityCode::NodeVersion)
            .into_iter()
            .filter_map(|version_uuid| {
                self.rows.get(version_uuid).map(|version_row| {
                    let mut version = self.base_value(version_uuid, version_row);
                    version.insert(
                        "parameters".to_string(),
                        Self::string_map(&version_row.params),
                    );
                    version.insert("data".to_string(), Self::string_map(&version_row.data));
                    version.insert("variables".to_string(), self.variable_values(version_uuid));
                    Value::Object(version)
                })
            })
            .collect();
        map.insert("versions".to_string(), Value::Array(versions));
        Value::Object(map)
    }
}

/// The in-memory adapter. Cheap to clone a reference to; share it with
/// `Arc` when several sessions talk to the same backend.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageAdapter for MemoryStorage {
    async fn create_entity(
        &self,
        parent: Option<&EntityRef>,
        code: EntityCode,
        fields: AttrMap,
    ) -> StorageResult<String> {
        let mut inner = self.inner.lock();
        if let Some(parent) = parent {
            inner.row(parent)?;
        }
        let uuid = Uuid::new_v4().to_string();
        let parent_uuid = parent.map(|p| p.uuid.clone());
        if let Some(parent_uuid) = &parent_uuid {
            inner
                .children
                .entry(parent_uuid.clone())
                .or_default()
                .push(uuid.clone());
        }
        inner.rows.insert(
            uuid.clone(),
            Row {
                code: Some(code),
                parent: parent_uuid,
                attrs: fields,
                params: FxHashMap::default(),
                data: FxHashMap::default(),
            },
        );
        Ok(uuid)
    }

    async fn set_attrs(&self, entity: &EntityRef, fields: AttrMap) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let row = inner.row_mut(entity)?;
        row.attrs.extend(fields);
        Ok(())
    }

    async fn get_attr(&self, entity: &EntityRef, field: &str) -> StorageResult<Option<Value>> {
        let inner = self.inner.lock();
        Ok(inner.row(entity)?.attrs.get(field).cloned())
    }

    async fn delete_entity(&self, entity: &EntityRef) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.row(entity)?;
        let doomed = inner.subtree(&entity.uuid);
        if let Some(parent) = inner
            .rows
            .get(&entity.uuid)
            .and_then(|r| r.parent.clone())
        {
            if let Some(siblings) = inner.children.get_mut(&parent) {
                siblings.retain(|u| u != &entity.uuid);
            }
        }
        for uuid in &doomed {
            inner.rows.remove(uuid);
            inner.children.remove(uuid);
        }
        inner
            .links
            .retain(|(from, to)| !doomed.contains(from) && !doomed.contains(to));
        Ok(())
    }

    async fn get_objects(&self, graph: &EntityRef) -> StorageResult<Option<PersistedGraph>> {
        let inner = self.inner.lock();
        let Some(row) = inner.rows.get(&graph.uuid) else {
            return Ok(None);
        };
        if row.code != Some(EntityCode::Graph) {
            return Ok(None);
        }
        let value = inner.graph_value(&graph.uuid, row);
        let persisted =
            serde_json::from_value(value).map_err(|source| StorageError::Decode { source })?;
        Ok(Some(persisted))
    }

    async fn create_link(&self, from: &EntityRef, to: &EntityRef) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.row(from)?;
        inner.row(to)?;
        let edge = (from.uuid.clone(), to.uuid.clone());
        if !inner.links.contains(&edge) {
            inner.links.push(edge);
        }
        Ok(())
    }

    async fn delete_link(&self, from: &EntityRef, to: &EntityRef) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner
            .links
            .retain(|(f, t)| !(f == &from.uuid && t == &to.uuid));
        Ok(())
    }

    async fn set_dictionary(
        &self,
        entity: &EntityRef,
        dict: DictKind,
        key: &str,
        value: &str,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let row = inner.row_mut(entity)?;
        let map = match dict {
            DictKind::Parameter => &mut row.params,
            DictKind::Data => &mut row.data,
        };
        map.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del_dictionary(
        &self,
        entity: &EntityRef,
        dict: DictKind,
        key: &str,
    ) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        let row = inner.row_mut(entity)?;
        let map = match dict {
            DictKind::Parameter => &mut row.params,
            DictKind::Data => &mut row.data,
        };
        map.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attrs;

    #[tokio::test]
    async fn delete_cascades_to_children() {
        let store = MemoryStorage::new();
        let graph = store
            .create_entity(None, EntityCode::Graph, attrs! { "name" => "g" })
            .await
            .unwrap();
        let graph_ref = EntityRef::new(EntityCode::Graph, &graph);
        let node = store
            .create_entity(Some(&graph_ref), EntityCode::Node, attrs! { "name" => "n" })
            .await
            .unwrap();
        let node_ref = EntityRef::new(EntityCode::Node, &node);
        store
            .create_entity(Some(&node_ref), EntityCode::NodeVersion, attrs! { "id" => 1 })
            .await
            .unwrap();

        store.delete_entity(&graph_ref).await.unwrap();
        assert!(store.get_attr(&node_ref, "name").await.is_err());
    }

    #[tokio::test]
    async fn get_objects_assembles_the_tree() {
        let store = MemoryStorage::new();
        let graph = store
            .create_entity(
                None,
                EntityCode::Graph,
                attrs! { "name" => "0100", "path" => ["0100"] },
            )
            .await
            .unwrap();
        let graph_ref = EntityRef::new(EntityCode::Graph, &graph);
        let node = store
            .create_entity(
                Some(&graph_ref),
                EntityCode::Node,
                attrs! { "name" => "comp1", "typeName" => "comp", "versionActive" => 1 },
            )
            .await
            .unwrap();
        let node_ref = EntityRef::new(EntityCode::Node, &node);
        let version = store
            .create_entity(
                Some(&node_ref),
                EntityCode::NodeVersion,
                attrs! { "id" => 1 },
            )
            .await
            .unwrap();
        let version_ref = EntityRef::new(EntityCode::NodeVersion, &version);
        store
            .set_dictionary(&version_ref, DictKind::Parameter, "quality", "12")
            .await
            .unwrap();

        let persisted = store.get_objects(&graph_ref).await.unwrap().unwrap();
        assert_eq!(persisted.name, "0100");
        assert_eq!(persisted.nodes.len(), 1);
        let node = &persisted.nodes[0];
        assert_eq!(node.name, "comp1");
        assert_eq!(node.versions[0].parameters["quality"], "12");
    }
}
