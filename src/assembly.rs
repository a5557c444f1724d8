//! Persisted tree representation.
//!
//! Every entity has a `Persisted*` twin: a serde struct matching the wire
//! shape the storage layer and the graph snapshot files use, tagged by a
//! `code` field. The live types stay free of serde concerns; conversions
//! in both directions live here, together with [`Graph::load`] and the
//! optimistic [`Graph::refresh`].

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::entities::graph::{Graph, Group, Variable};
use crate::entities::node::{LinkRef, Node};
use crate::entities::node_type::{
    Action, NodeType, Param, ParamKind, TypeFile, TypeVersion, ACTIVE_TYPE_VERSION,
};
use crate::entities::pattern::{GraphTemplate, Pattern};
use crate::entities::project::{BatchScript, Context, Hud, Project};
use crate::entities::version::NodeVersion;
use crate::exec::output::OutputRecord;
use crate::session::SessionIdentity;
use crate::storage::{EntityCode, EntityRef, StorageAdapter, StorageResult};

fn default_true() -> bool {
    true
}

fn default_pin() -> i64 {
    ACTIVE_TYPE_VERSION
}

fn default_padding() -> usize {
    3
}

fn default_start() -> i64 {
    1
}

fn join(parts: &[String]) -> String {
    parts.join(";")
}

fn split(field: &str) -> Vec<String> {
    field
        .split(';')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedVariable {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl PersistedVariable {
    fn from_variable(v: &Variable) -> Self {
        Self {
            code: EntityCode::Variable.as_str().to_string(),
            uuid: v.uuid.clone(),
            name: v.name.clone(),
            value: v.value.clone(),
            active: v.active,
        }
    }

    fn into_variable(self) -> Variable {
        Variable {
            uuid: self.uuid,
            name: self.name,
            value: self.value,
            active: self.active,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedGroup {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default)]
    pub nodeuuids: String,
}

impl PersistedGroup {
    fn from_group(g: &Group) -> Self {
        Self {
            code: EntityCode::Group.as_str().to_string(),
            uuid: g.uuid.clone(),
            name: g.name.clone(),
            color: g.color.clone(),
            nodeuuids: join(&g.node_uuids),
        }
    }

    fn into_group(self) -> Group {
        Group {
            uuid: self.uuid,
            name: self.name,
            color: self.color,
            node_uuids: split(&self.nodeuuids),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedNodeVersion {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub comment: String,
    #[serde(rename = "lastExec", default)]
    pub last_exec: String,
    #[serde(rename = "lastUser", default)]
    pub last_user: String,
    #[serde(default)]
    pub locked: bool,
    #[serde(rename = "typeForceVersion", default = "default_pin")]
    pub type_force_version: i64,
    #[serde(default)]
    pub parameters: FxHashMap<String, String>,
    #[serde(default)]
    pub data: FxHashMap<String, String>,
    #[serde(default)]
    pub variables: Vec<PersistedVariable>,
    /// Armored output record, empty when the version never ran.
    #[serde(default)]
    pub output: String,
}

impl PersistedNodeVersion {
    fn from_version(v: &NodeVersion) -> Self {
        Self {
            code: EntityCode::NodeVersion.as_str().to_string(),
            uuid: v.uuid.clone(),
            id: v.id,
            comment: v.comment.clone(),
            last_exec: v.last_exec.clone(),
            last_user: v.last_user.clone(),
            locked: v.locked,
            type_force_version: v.type_force_version,
            parameters: v.parameters.clone(),
            data: v.data.clone(),
            variables: v.variables.iter().map(PersistedVariable::from_variable).collect(),
            output: v
                .output
                .as_ref()
                .and_then(|r| r.armor().ok())
                .unwrap_or_default(),
        }
    }

    fn into_version(self) -> NodeVersion {
        let output = if self.output.is_empty() {
            None
        } else {
            OutputRecord::unarmor(&self.output).ok()
        };
        NodeVersion {
            uuid: self.uuid,
            id: self.id,
            comment: self.comment,
            last_exec: self.last_exec,
            last_user: self.last_user,
            locked: self.locked,
            type_force_version: self.type_force_version,
            parameters: self.parameters,
            data: self.data,
            variables: self
                .variables
                .into_iter()
                .map(PersistedVariable::into_variable)
                .collect(),
            output,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedNode {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "typeName", default)]
    pub type_name: String,
    #[serde(rename = "typeUuid", default)]
    pub type_uuid: String,
    #[serde(default)]
    pub posx: f64,
    #[serde(default)]
    pub posy: f64,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub port: String,
    #[serde(rename = "versionActive", default)]
    pub version_active: i64,
    /// `;`-joined uuids of the input source nodes.
    #[serde(rename = "inputLinks", default)]
    pub input_links: String,
    #[serde(default)]
    pub updated: f64,
    #[serde(default)]
    pub data: FxHashMap<String, String>,
    #[serde(default)]
    pub versions: Vec<PersistedNodeVersion>,
}

impl PersistedNode {
    fn from_node(n: &Node) -> Self {
        Self {
            code: EntityCode::Node.as_str().to_string(),
            uuid: n.uuid.clone(),
            name: n.name.clone(),
            type_name: n.type_name.clone(),
            type_uuid: n.type_uuid.clone().unwrap_or_default(),
            posx: n.posx,
            posy: n.posy,
            user: n.user.clone(),
            port: n.port.clone(),
            version_active: n.version_active,
            input_links: n
                .input_links
                .iter()
                .map(|l| l.uuid().to_string())
                .collect::<Vec<_>>()
                .join(";"),
            updated: n.updated,
            data: n.data.clone(),
            versions: n.versions.iter().map(PersistedNodeVersion::from_version).collect(),
        }
    }

    fn into_node(self) -> Node {
        Node {
            uuid: self.uuid,
            name: self.name,
            type_name: self.type_name,
            type_uuid: if self.type_uuid.is_empty() {
                None
            } else {
                Some(self.type_uuid)
            },
            posx: self.posx,
            posy: self.posy,
            user: self.user,
            port: self.port,
            data: self.data,
            input_links: split(&self.input_links)
                .into_iter()
                .map(LinkRef::Unresolved)
                .collect(),
            output_links: Vec::new(),
            versions: self
                .versions
                .into_iter()
                .map(PersistedNodeVersion::into_version)
                .collect(),
            version_active: self.version_active,
            updated: self.updated,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedGraph {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub template_name: String,
    #[serde(default)]
    pub nodes: Vec<PersistedNode>,
    #[serde(default)]
    pub groups: Vec<PersistedGroup>,
    #[serde(default)]
    pub variables: Vec<PersistedVariable>,
}

impl PersistedGraph {
    pub fn from_graph(graph: &Graph) -> Self {
        Self {
            code: EntityCode::Graph.as_str().to_string(),
            uuid: graph.uuid.clone(),
            name: graph.name.clone(),
            path: graph.path.clone(),
            template_name: graph.template_name.clone(),
            nodes: graph.nodes.iter().map(PersistedNode::from_node).collect(),
            groups: graph.groups.iter().map(PersistedGroup::from_group).collect(),
            variables: graph
                .variables
                .iter()
                .map(PersistedVariable::from_variable)
                .collect(),
        }
    }

    /// Rebuild a live graph; link references are resolved, unknowns
    /// dropped.
    pub fn into_graph(self, pattern_name: impl Into<String>, session: SessionIdentity) -> Graph {
        let mut graph = Graph {
            uuid: self.uuid,
            pattern_name: pattern_name.into(),
            path: self.path,
            name: self.name,
            template_name: self.template_name,
            session,
            nodes: self.nodes.into_iter().map(PersistedNode::into_node).collect(),
            groups: self.groups.into_iter().map(PersistedGroup::into_group).collect(),
            variables: self
                .variables
                .into_iter()
                .map(PersistedVariable::into_variable)
                .collect(),
        };
        graph.resolve_links();
        graph
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedTypeFile {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_true")]
    pub copy: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedTypeParameter {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "enum", default)]
    pub enum_values: String,
    #[serde(default)]
    pub default: String,
    #[serde(default = "default_true")]
    pub visibility: bool,
    #[serde(default)]
    pub advanced: bool,
    #[serde(default)]
    pub order: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedAction {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub menu: String,
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub warning: String,
    #[serde(default)]
    pub users: String,
    #[serde(default = "default_true")]
    pub stack: bool,
    #[serde(default)]
    pub order: i64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedTypeVersion {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub parameters: Vec<PersistedTypeParameter>,
    #[serde(default)]
    pub actions: Vec<PersistedAction>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedType {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub context: String,
    #[serde(rename = "linkWith", default)]
    pub link_with: String,
    #[serde(rename = "typeFiles", default)]
    pub type_files: Vec<PersistedTypeFile>,
    #[serde(default)]
    pub versions: Vec<PersistedTypeVersion>,
    #[serde(rename = "versionActive", default)]
    pub version_active: i64,
}

impl PersistedType {
    fn from_type(t: &NodeType) -> Self {
        Self {
            code: EntityCode::Type.as_str().to_string(),
            uuid: t.uuid.clone(),
            name: t.name.clone(),
            context: t.context.clone(),
            link_with: join(&t.link_with),
            type_files: t
                .type_files
                .iter()
                .map(|f| PersistedTypeFile {
                    code: EntityCode::TypeFile.as_str().to_string(),
                    uuid: f.uuid.clone(),
                    name: f.name.clone(),
                    path: f.path.clone(),
                    copy: f.copy,
                })
                .collect(),
            versions: t
                .versions
                .iter()
                .map(|v| PersistedTypeVersion {
                    code: EntityCode::TypeVersion.as_str().to_string(),
                    uuid: v.uuid.clone(),
                    id: v.id,
                    script: v.script.clone(),
                    parameters: v
                        .parameters
                        .iter()
                        .map(|p| PersistedTypeParameter {
                            code: EntityCode::TypeParameter.as_str().to_string(),
                            uuid: p.uuid.clone(),
                            name: p.name.clone(),
                            kind: p.kind.as_str().to_string(),
                            enum_values: join(&p.enum_values),
                            default: p.default.clone(),
                            visibility: p.visibility,
                            advanced: p.advanced,
                            order: p.order,
                        })
                        .collect(),
                    actions: v
                        .actions
                        .iter()
                        .map(|a| PersistedAction {
                            code: EntityCode::Action.as_str().to_string(),
                            uuid: a.uuid.clone(),
                            name: a.name.clone(),
                            menu: a.menu.clone(),
                            command: a.command.clone(),
                            warning: a.warning.clone(),
                            users: a.users.clone(),
                            stack: a.stack,
                            order: a.order,
                        })
                        .collect(),
                })
                .collect(),
            version_active: t.version_active,
        }
    }

    fn into_type(self) -> NodeType {
        NodeType {
            uuid: self.uuid,
            name: self.name,
            context: self.context,
            link_with: split(&self.link_with),
            type_files: self
                .type_files
                .into_iter()
                .map(|f| TypeFile {
                    uuid: f.uuid,
                    name: f.name,
                    path: f.path,
                    copy: f.copy,
                })
                .collect(),
            versions: self
                .versions
                .into_iter()
                .map(|v| {
                    let mut version = TypeVersion {
                        uuid: v.uuid,
                        id: v.id,
                        script: v.script,
                        parameters: v
                            .parameters
                            .into_iter()
                            .map(|p| Param {
                                uuid: p.uuid,
                                name: p.name,
                                kind: ParamKind::decode(&p.kind),
                                enum_values: split(&p.enum_values),
                                default: p.default,
                                visibility: p.visibility,
                                advanced: p.advanced,
                                order: p.order,
                            })
                            .collect(),
                        actions: v
                            .actions
                            .into_iter()
                            .map(|a| Action {
                                uuid: a.uuid,
                                name: a.name,
                                menu: a.menu,
                                command: a.command,
                                warning: a.warning,
                                users: a.users,
                                stack: a.stack,
                                order: a.order,
                            })
                            .collect(),
                    };
                    version.sort_members();
                    version
                })
                .collect(),
            version_active: self.version_active,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedGraphTemplate {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub icon: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedPattern {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub graph_name: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub templates: Vec<PersistedGraphTemplate>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedContext {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedHud {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub event: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedBatchScript {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub menu: String,
    #[serde(default)]
    pub users: String,
    #[serde(default)]
    pub script: String,
    #[serde(default)]
    pub pattern: String,
    #[serde(default)]
    pub template: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PersistedProject {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub script: String,
    #[serde(default = "default_padding")]
    pub versions_padding: usize,
    #[serde(default = "default_start")]
    pub versions_start: i64,
    #[serde(default)]
    pub patterns: Vec<PersistedPattern>,
    #[serde(default)]
    pub types: Vec<PersistedType>,
    #[serde(default)]
    pub contexts: Vec<PersistedContext>,
    #[serde(default)]
    pub huds: Vec<PersistedHud>,
    #[serde(rename = "batchScripts", default)]
    pub batch_scripts: Vec<PersistedBatchScript>,
}

impl PersistedProject {
    pub fn from_project(project: &Project) -> Self {
        Self {
            code: EntityCode::Project.as_str().to_string(),
            uuid: project.uuid.clone(),
            name: project.name.clone(),
            script: project.script.clone(),
            versions_padding: project.versions_padding,
            versions_start: project.versions_start,
            patterns: project
                .patterns
                .iter()
                .map(|p| PersistedPattern {
                    code: EntityCode::Pattern.as_str().to_string(),
                    uuid: p.uuid.clone(),
                    name: p.name.clone(),
                    pattern: p.pattern.clone(),
                    graph_name: p.graph_name.clone(),
                    order: p.order,
                    templates: p
                        .templates
                        .iter()
                        .map(|t| PersistedGraphTemplate {
                            code: EntityCode::GraphTemplate.as_str().to_string(),
                            uuid: t.uuid.clone(),
                            name: t.name.clone(),
                            icon: t.icon.clone(),
                        })
                        .collect(),
                })
                .collect(),
            types: project.types.iter().map(PersistedType::from_type).collect(),
            contexts: project
                .contexts
                .iter()
                .map(|c| PersistedContext {
                    code: EntityCode::Context.as_str().to_string(),
                    uuid: c.uuid.clone(),
                    name: c.name.clone(),
                    value: c.value.clone(),
                })
                .collect(),
            huds: project
                .huds
                .iter()
                .map(|h| PersistedHud {
                    code: EntityCode::Hud.as_str().to_string(),
                    uuid: h.uuid.clone(),
                    name: h.name.clone(),
                    script: h.script.clone(),
                    event: h.event.clone(),
                })
                .collect(),
            batch_scripts: project
                .batch_scripts
                .iter()
                .map(|b| PersistedBatchScript {
                    code: EntityCode::BatchScript.as_str().to_string(),
                    uuid: b.uuid.clone(),
                    name: b.name.clone(),
                    menu: b.menu.clone(),
                    users: b.users.clone(),
                    script: b.script.clone(),
                    pattern: b.pattern.clone(),
                    template: b.template.clone(),
                })
                .collect(),
        }
    }

    pub fn into_project(self) -> Project {
        Project {
            uuid: self.uuid,
            name: self.name,
            patterns: self
                .patterns
                .into_iter()
                .map(|p| Pattern {
                    uuid: p.uuid,
                    name: p.name,
                    pattern: p.pattern,
                    graph_name: p.graph_name,
                    order: p.order,
                    templates: p
                        .templates
                        .into_iter()
                        .map(|t| GraphTemplate {
                            uuid: t.uuid,
                            name: t.name,
                            icon: t.icon,
                        })
                        .collect(),
                })
                .collect(),
            types: self.types.into_iter().map(PersistedType::into_type).collect(),
            contexts: self
                .contexts
                .into_iter()
                .map(|c| Context {
                    uuid: c.uuid,
                    name: c.name,
                    value: c.value,
                })
                .collect(),
            huds: self
                .huds
                .into_iter()
                .map(|h| Hud {
                    uuid: h.uuid,
                    name: h.name,
                    script: h.script,
                    event: h.event,
                })
                .collect(),
            batch_scripts: self
                .batch_scripts
                .into_iter()
                .map(|b| BatchScript {
                    uuid: b.uuid,
                    name: b.name,
                    menu: b.menu,
                    users: b.users,
                    script: b.script,
                    pattern: b.pattern,
                    template: b.template,
                })
                .collect(),
            script: self.script,
            versions_padding: self.versions_padding,
            versions_start: self.versions_start,
        }
    }
}

impl Graph {
    /// Load a graph from storage, or `None` when the row does not exist.
    pub async fn load(
        store: &dyn StorageAdapter,
        graph_ref: &EntityRef,
        pattern_name: impl Into<String>,
        session: SessionIdentity,
    ) -> StorageResult<Option<Graph>> {
        Ok(store
            .get_objects(graph_ref)
            .await?
            .map(|p| p.into_graph(pattern_name, session)))
    }

    /// Pull the latest shared state, replacing foreign nodes whose remote
    /// `updated` stamp is newer. Nodes this session owns are never
    /// touched; groups and variables are replaced wholesale.
    pub async fn refresh(&mut self, store: &dyn StorageAdapter) -> StorageResult<()> {
        let Some(persisted) = store.get_objects(&self.entity_ref()).await? else {
            return Ok(());
        };
        let token = self.session.token().to_string();
        let mut incoming: FxHashMap<String, PersistedNode> = persisted
            .nodes
            .into_iter()
            .map(|n| (n.uuid.clone(), n))
            .collect();
        let mut kept: Vec<Node> = Vec::with_capacity(self.nodes.len());
        for node in self.nodes.drain(..) {
            match incoming.remove(&node.uuid) {
                Some(remote) => {
                    if node.user == token {
                        kept.push(node);
                    } else if remote.updated > node.updated {
                        kept.push(remote.into_node());
                    } else {
                        kept.push(node);
                    }
                }
                None => {
                    // Deleted remotely; own nodes survive until closed.
                    if node.user == token {
                        kept.push(node);
                    }
                }
            }
        }
        for (_, remote) in incoming {
            kept.push(remote.into_node());
        }
        self.nodes = kept;
        self.groups = persisted
            .groups
            .into_iter()
            .map(PersistedGroup::into_group)
            .collect();
        self.variables = persisted
            .variables
            .into_iter()
            .map(PersistedVariable::into_variable)
            .collect();
        self.resolve_links();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn graph_round_trip_keeps_links() {
        let session = SessionIdentity::from_token("ann$1");
        let mut graph = Graph::new("Shots", vec!["0100".into()], "0100", session.clone());
        let mut a = Node::new("a", "comp");
        a.uuid = "ua".into();
        let mut b = Node::new("b", "comp");
        b.uuid = "ub".into();
        b.input_links.push(LinkRef::Unresolved("ua".into()));
        graph.nodes.push(a);
        graph.nodes.push(b);
        graph.resolve_links();

        let persisted = PersistedGraph::from_graph(&graph);
        let json = serde_json::to_string(&persisted).unwrap();
        let back: PersistedGraph = serde_json::from_str(&json).unwrap();
        let restored = back.into_graph("Shots", session);
        assert_eq!(restored.nodes.len(), 2);
        assert_eq!(
            restored.node("b").unwrap().input_links[0].uuid(),
            "ua"
        );
        assert_eq!(restored.node("a").unwrap().output_links.len(), 1);
    }

    #[test]
    fn sparse_persisted_node_decodes_with_defaults() {
        let json = r#"{"code":"Node","uuid":"u1","name":"n1"}"#;
        let node: PersistedNode = serde_json::from_str(json).unwrap();
        let live = node.into_node();
        assert!(live.versions.is_empty());
        assert!(live.type_uuid.is_none());
        assert_eq!(live.updated, 0.0);
    }
}
