//! The graph: one working unit of nodes, groups, and variables.
//!
//! A graph is addressed by its pattern and an ordered key list; its node
//! tree is shared between sessions through the storage adapter, with the
//! advisory lock protocol deciding who may write which node.

use rustc_hash::FxHashSet;
use tracing::warn;

use crate::attrs;
use crate::entities::node::{unique_name, LinkRef, Node, NodeId};
use crate::entities::project::Project;
use crate::entities::version::NodeVersion;
use crate::session::{SessionIdentity, LOCKED_MASK};
use crate::storage::{EntityCode, EntityRef, StorageAdapter, StorageResult};

/// A named variable, on a graph or a node version.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub uuid: String,
    pub name: String,
    pub value: String,
    /// Inactive variables are kept but excluded from resolution.
    pub active: bool,
}

impl Variable {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            value: value.into(),
            active: true,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::Variable, &self.uuid)
    }

    pub async fn create(
        &mut self,
        store: &dyn StorageAdapter,
        parent: &EntityRef,
    ) -> StorageResult<()> {
        self.uuid = store
            .create_entity(
                Some(parent),
                EntityCode::Variable,
                attrs! { "name" => self.name, "value" => self.value, "active" => self.active },
            )
            .await?;
        Ok(())
    }
}

/// A purely organizational set of nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct Group {
    pub uuid: String,
    pub name: String,
    pub color: String,
    pub node_uuids: Vec<String>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            uuid: String::new(),
            name: name.into(),
            color: String::new(),
            node_uuids: Vec::new(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::Group, &self.uuid)
    }

    pub async fn create(
        &mut self,
        store: &dyn StorageAdapter,
        graph: &EntityRef,
    ) -> StorageResult<()> {
        self.uuid = store
            .create_entity(
                Some(graph),
                EntityCode::Group,
                attrs! {
                    "name" => self.name,
                    "color" => self.color,
                    "nodeuuids" => self.node_uuids.join(";"),
                },
            )
            .await?;
        Ok(())
    }
}

/// One graph, opened by one session.
#[derive(Clone, Debug)]
pub struct Graph {
    pub uuid: String,
    /// Name of the project pattern this graph belongs to.
    pub pattern_name: String,
    /// Ordered keys filling the pattern's path template.
    pub path: Vec<String>,
    pub name: String,
    /// Name of the graph template the graph was seeded from, empty for none.
    pub template_name: String,
    pub session: SessionIdentity,
    pub nodes: Vec<Node>,
    pub groups: Vec<Group>,
    pub variables: Vec<Variable>,
}

impl Graph {
    pub fn new(
        pattern_name: impl Into<String>,
        path: Vec<String>,
        name: impl Into<String>,
        session: SessionIdentity,
    ) -> Self {
        Self {
            uuid: String::new(),
            pattern_name: pattern_name.into(),
            path,
            name: name.into(),
            template_name: String::new(),
            session,
            nodes: Vec::new(),
            groups: Vec::new(),
            variables: Vec::new(),
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(EntityCode::Graph, &self.uuid)
    }

    /// Directory holding the graph's artifacts: the pattern's path template
    /// filled with this graph's keys.
    pub fn work_directory(&self, project: &Project) -> String {
        project
            .pattern(&self.pattern_name)
            .map(|p| p.convert_path(&self.path))
            .unwrap_or_default()
    }

    /// Path of the graph's own data file inside the work directory.
    pub fn file_path(&self, project: &Project) -> String {
        format!("{}/{}.mgv", self.work_directory(project), self.name)
    }

    /// Globally unique display name: `project:pattern:key:key:...`.
    pub fn full_name(&self, project: &Project) -> String {
        let mut parts = vec![project.name.clone(), self.pattern_name.clone()];
        parts.extend(self.path.iter().cloned());
        parts.join(":")
    }

    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.name == name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.name == name)
    }

    pub fn node_by_id(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.iter().find(|n| n.uuid == id.0)
    }

    pub fn node_by_id_mut(&mut self, id: &NodeId) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.uuid == id.0)
    }

    fn node_index(&self, id: &NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| n.uuid == id.0)
    }

    /// Add a node of the given type at a position, owned by this session.
    ///
    /// The name starts from the type name and is de-collided against the
    /// existing nodes; the node gets one version numbered from the project's
    /// versioning start.
    pub async fn add_node(
        &mut self,
        store: &dyn StorageAdapter,
        project: &Project,
        type_name: &str,
        posx: f64,
        posy: f64,
    ) -> StorageResult<NodeId> {
        let taken: Vec<&str> = self.nodes.iter().map(|n| n.name.as_str()).collect();
        let name = unique_name(type_name, &taken);
        let mut node = Node::new(name, type_name);
        node.type_uuid = project.node_type(type_name).map(|t| t.uuid.clone());
        node.posx = posx;
        node.posy = posy;
        node.user = self.session.token().to_string();
        node.port = self.session.endpoint().to_string();
        node.version_active = project.versions_start;
        node.versions.push(NodeVersion::new(project.versions_start));
        let graph_ref = self.entity_ref();
        node.create(store, &graph_ref).await?;
        let id = node.id();
        self.nodes.push(node);
        Ok(id)
    }

    /// Delete a node and every edge touching it.
    pub async fn del_node(
        &mut self,
        store: &dyn StorageAdapter,
        id: &NodeId,
    ) -> StorageResult<()> {
        let Some(index) = self.node_index(id) else {
            return Ok(());
        };
        let downstream: Vec<NodeId> = self.nodes[index]
            .output_links
            .iter()
            .filter_map(LinkRef::resolved)
            .cloned()
            .collect();
        for target in &downstream {
            self.unlink(store, id, target).await?;
        }
        let upstream: Vec<NodeId> = self.nodes[index]
            .input_links
            .iter()
            .filter_map(LinkRef::resolved)
            .cloned()
            .collect();
        for source in &upstream {
            self.unlink(store, source, id).await?;
        }
        let index = self.node_index(id).expect("node still present");
        let node = self.nodes.remove(index);
        store.delete_entity(&node.entity_ref()).await?;
        for group in &mut self.groups {
            group.node_uuids.retain(|u| u != &id.0);
        }
        Ok(())
    }

    /// Connect `from` to `to`. Duplicate edges and self loops are refused;
    /// cycles are allowed.
    pub async fn link(
        &mut self,
        store: &dyn StorageAdapter,
        from: &NodeId,
        to: &NodeId,
    ) -> StorageResult<()> {
        if from == to {
            return Ok(());
        }
        let (Some(from_ix), Some(to_ix)) = (self.node_index(from), self.node_index(to)) else {
            return Ok(());
        };
        if self.nodes[to_ix]
            .input_links
            .iter()
            .any(|l| l.uuid() == from.0)
        {
            return Ok(());
        }
        self.nodes[from_ix]
            .output_links
            .push(LinkRef::Resolved(to.clone()));
        self.nodes[to_ix]
            .input_links
            .push(LinkRef::Resolved(from.clone()));
        let from_ref = EntityRef::new(EntityCode::Node, &from.0);
        let to_ref = EntityRef::new(EntityCode::Node, &to.0);
        store.create_link(&from_ref, &to_ref).await?;
        self.persist_inputs(store, to_ix).await
    }

    /// Disconnect `from` from `to`, if the edge exists.
    pub async fn unlink(
        &mut self,
        store: &dyn StorageAdapter,
        from: &NodeId,
        to: &NodeId,
    ) -> StorageResult<()> {
        let (Some(from_ix), Some(to_ix)) = (self.node_index(from), self.node_index(to)) else {
            return Ok(());
        };
        self.nodes[from_ix]
            .output_links
            .retain(|l| l.uuid() != to.0);
        let before = self.nodes[to_ix].input_links.len();
        self.nodes[to_ix].input_links.retain(|l| l.uuid() != from.0);
        if self.nodes[to_ix].input_links.len() == before {
            return Ok(());
        }
        let from_ref = EntityRef::new(EntityCode::Node, &from.0);
        let to_ref = EntityRef::new(EntityCode::Node, &to.0);
        store.delete_link(&from_ref, &to_ref).await?;
        self.persist_inputs(store, to_ix).await
    }

    async fn persist_inputs(
        &mut self,
        store: &dyn StorageAdapter,
        node_ix: usize,
    ) -> StorageResult<()> {
        let field = self.nodes[node_ix].input_link_field();
        let node_ref = self.nodes[node_ix].entity_ref();
        store
            .set_attrs(&node_ref, attrs! { "inputLinks" => field })
            .await?;
        self.nodes[node_ix].bump(store).await
    }

    /// Match pending string references against the current node set and
    /// rebuild output links. References to unknown uuids are dropped.
    pub fn resolve_links(&mut self) {
        let known: FxHashSet<String> = self.nodes.iter().map(|n| n.uuid.clone()).collect();
        for node in &mut self.nodes {
            node.output_links.clear();
        }
        let mut edges: Vec<(String, String)> = Vec::new();
        for node in &mut self.nodes {
            node.input_links.retain_mut(|link| {
                let uuid = link.uuid().to_string();
                if known.contains(&uuid) {
                    *link = LinkRef::Resolved(NodeId(uuid.clone()));
                    edges.push((uuid, node.uuid.clone()));
                    true
                } else {
                    warn!(reference = %uuid, "dropping link to unknown node");
                    false
                }
            });
        }
        for (from, to) in edges {
            if let Some(source) = self.nodes.iter_mut().find(|n| n.uuid == from) {
                source.output_links.push(LinkRef::Resolved(NodeId(to)));
            }
        }
    }

    /// Direct upstream neighbors of a node.
    pub fn input_nodes(&self, id: &NodeId) -> Vec<NodeId> {
        self.node_by_id(id)
            .map(|n| {
                n.input_links
                    .iter()
                    .filter_map(LinkRef::resolved)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Direct downstream neighbors of a node.
    pub fn output_nodes(&self, id: &NodeId) -> Vec<NodeId> {
        self.node_by_id(id)
            .map(|n| {
                n.output_links
                    .iter()
                    .filter_map(LinkRef::resolved)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All transitive downstream nodes, cycle-safe, excluding the start.
    pub fn next_nodes(&self, id: &NodeId) -> Vec<NodeId> {
        self.walk(id, Self::output_nodes)
    }

    /// All transitive upstream nodes, cycle-safe, excluding the start.
    pub fn prev_nodes(&self, id: &NodeId) -> Vec<NodeId> {
        self.walk(id, Self::input_nodes)
    }

    fn walk(&self, start: &NodeId, step: fn(&Self, &NodeId) -> Vec<NodeId>) -> Vec<NodeId> {
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        visited.insert(start.clone());
        let mut queue = step(self, start);
        let mut out = Vec::new();
        while let Some(next) = queue.pop() {
            if visited.insert(next.clone()) {
                queue.extend(step(self, &next));
                out.push(next);
            }
        }
        out
    }

    /// The connected set of nodes whose types declare a version link with
    /// the start node's type, the start node included.
    pub fn linked_group(&self, project: &Project, id: &NodeId) -> Vec<NodeId> {
        let Some(start) = self.node_by_id(id) else {
            return Vec::new();
        };
        let Some(start_uuid) = start.type_uuid.as_deref() else {
            return vec![id.clone()];
        };
        let linked = |uuid: &str| {
            project
                .node_type_by_uuid(uuid)
                .is_some_and(|t| t.link_with.iter().any(|u| u == start_uuid))
                || project
                    .node_type_by_uuid(start_uuid)
                    .is_some_and(|t| t.link_with.iter().any(|u| u == uuid))
                || uuid == start_uuid
        };
        let mut visited: FxHashSet<NodeId> = FxHashSet::default();
        visited.insert(id.clone());
        let mut queue = vec![id.clone()];
        let mut out = vec![id.clone()];
        while let Some(current) = queue.pop() {
            let mut neighbors = self.input_nodes(&current);
            neighbors.extend(self.output_nodes(&current));
            for neighbor in neighbors {
                if visited.contains(&neighbor) {
                    continue;
                }
                let keep = self
                    .node_by_id(&neighbor)
                    .and_then(|n| n.type_uuid.as_deref())
                    .is_some_and(linked);
                if keep {
                    visited.insert(neighbor.clone());
                    queue.push(neighbor.clone());
                    out.push(neighbor);
                }
            }
        }
        out
    }

    /// Switch a node's active version, propagating the same id across its
    /// linked group where a matching version exists.
    pub async fn set_node_version(
        &mut self,
        store: &dyn StorageAdapter,
        project: &Project,
        id: &NodeId,
        version_id: i64,
    ) -> StorageResult<()> {
        for member in self.linked_group(project, id) {
            if let Some(node) = self.node_by_id_mut(&member) {
                node.set_version_unchecked(store, version_id).await?;
            }
        }
        Ok(())
    }

    /// Add a graph variable.
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

    /// Release every node this session owns. Nodes carrying the snapshot
    /// mask stay untouched.
    pub async fn close(&mut self, store: &dyn StorageAdapter) -> StorageResult<()> {
        let token = self.session.token().to_string();
        for node in &mut self.nodes {
            if node.user == token && node.user != LOCKED_MASK {
                node.free(store).await?;
            }
        }
        Ok(())
    }

    /// Copy a template graph's content into this (empty) graph, minting
    /// fresh uuids and remapping links.
    pub async fn fill_from_template(
        &mut self,
        store: &dyn StorageAdapter,
        template: &Graph,
    ) -> StorageResult<()> {
        let graph_ref = self.entity_ref();
        self.template_name = template.name.clone();
        store
            .set_attrs(&graph_ref, attrs! { "template_name" => self.template_name })
            .await?;
        let mut remap: Vec<(String, String)> = Vec::new();
        for source in &template.nodes {
            let mut node = source.clone();
            let old_uuid = std::mem::take(&mut node.uuid);
            node.user = self.session.token().to_string();
            node.port = self.session.endpoint().to_string();
            node.input_links.clear();
            node.output_links.clear();
            for version in &mut node.versions {
                version.uuid = String::new();
                for variable in &mut version.variables {
                    variable.uuid = String::new();
                }
            }
            node.create(store, &graph_ref).await?;
            remap.push((old_uuid, node.uuid.clone()));
            self.nodes.push(node);
        }
        let new_id = |old: &str| {
            remap
                .iter()
                .find(|(o, _)| o == old)
                .map(|(_, n)| NodeId(n.clone()))
        };
        for source in &template.nodes {
            let Some(from) = new_id(&source.uuid) else {
                continue;
            };
            for link in &source.output_links {
                if let Some(to) = new_id(link.uuid()) {
                    self.link(store, &from, &to).await?;
                }
            }
        }
        for source in &template.groups {
            let mut group = source.clone();
            group.uuid = String::new();
            group.node_uuids = group
                .node_uuids
                .iter()
                .filter_map(|u| new_id(u).map(|id| id.0))
                .collect();
            group.create(store, &graph_ref).await?;
            self.groups.push(group);
        }
        for source in &template.variables {
            let mut variable = source.clone();
            variable.uuid = String::new();
            variable.create(store, &graph_ref).await?;
            self.variables.push(variable);
        }
        Ok(())
    }

    /// Persist the graph row and its whole content under `pattern`.
    pub async fn create(
        &mut self,
        store: &dyn StorageAdapter,
        pattern: &EntityRef,
    ) -> StorageResult<()> {
        self.uuid = store
            .create_entity(
                Some(pattern),
                EntityCode::Graph,
                attrs! {
                    "name" => self.name,
                    "path" => self.path,
                    "template_name" => self.template_name,
                },
            )
            .await?;
        let graph_ref = self.entity_ref();
        for node in &mut self.nodes {
            node.create(store, &graph_ref).await?;
        }
        for group in &mut self.groups {
            group.create(store, &graph_ref).await?;
        }
        for variable in &mut self.variables {
            variable.create(store, &graph_ref).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_chain() -> Graph {
        let mut g = Graph::new(
            "Shots",
            vec!["0100".into()],
            "0100",
            SessionIdentity::from_token("ann$1"),
        );
        for (uuid, name) in [("a", "na"), ("b", "nb"), ("c", "nc")] {
            let mut n = Node::new(name, "comp");
            n.uuid = uuid.to_string();
            g.nodes.push(n);
        }
        // a -> b -> c, wired directly.
        g.nodes[1].input_links.push(LinkRef::Unresolved("a".into()));
        g.nodes[2].input_links.push(LinkRef::Unresolved("b".into()));
        g.resolve_links();
        g
    }

    #[test]
    fn resolve_links_builds_outputs_and_drops_unknowns() {
        let mut g = graph_with_chain();
        g.nodes[0]
            .input_links
            .push(LinkRef::Unresolved("ghost".into()));
        g.resolve_links();
        assert!(g.nodes[0].input_links.is_empty());
        assert_eq!(g.output_nodes(&NodeId::from("a")), vec![NodeId::from("b")]);
    }

    #[test]
    fn transitive_walks_are_cycle_safe() {
        let mut g = graph_with_chain();
        // Close the loop c -> a.
        g.nodes[0].input_links.push(LinkRef::Unresolved("c".into()));
        g.resolve_links();
        let mut down = g.next_nodes(&NodeId::from("a"));
        down.sort_by(|x, y| x.0.cmp(&y.0));
        assert_eq!(down, vec![NodeId::from("b"), NodeId::from("c")]);
    }
}
