//! Variable resolution.
//!
//! Values may reference other keys of the same mapping as `${KEY}` or bare
//! `$KEY` up to a delimiter. [`resolve`] substitutes until a fixed point,
//! with a hard pass cap so cyclic references terminate instead of erroring.
//! [`EnvBuilder`] assembles the full mapping a node version executes under,
//! layering graph, node, upstream, context, file, parameter, and variable
//! keys before resolving.

use miette::Diagnostic;
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

use crate::entities::graph::Graph;
use crate::entities::node::{Node, NodeId};
use crate::entities::node_type::{NodeType, ParamKind};
use crate::entities::project::Project;

/// Flat string mapping, the unit the resolver works on.
pub type VarMap = FxHashMap<String, String>;

/// Upper bound on substitution passes; cyclic mappings stop here.
const MAX_PASSES: usize = 100;

/// Characters that may terminate a bare `$KEY` reference.
const DELIMITERS: [char; 13] = [
    '_', '\\', '/', '-', '+', '*', '=', '$', '(', '"', '\'', '#', '&',
];

#[derive(Debug, Error, Diagnostic)]
pub enum VarError {
    #[error("node {uuid} is not part of the graph")]
    #[diagnostic(code(mangrove::vars::unknown_node))]
    UnknownNode { uuid: String },
}

/// Substitute `${key}` and delimiter-bounded `$key` in `value`.
fn substitute(value: &str, key: &str, replacement: &str) -> String {
    let mut out = value.replace(&format!("${{{key}}}"), replacement);
    let bare = format!("${key}");
    let mut rebuilt = String::with_capacity(out.len());
    let mut rest = out.as_str();
    while let Some(pos) = rest.find(&bare) {
        let after = &rest[pos + bare.len()..];
        let boundary = match after.chars().next() {
            None => true,
            Some(c) => DELIMITERS.contains(&c),
        };
        rebuilt.push_str(&rest[..pos]);
        if boundary {
            rebuilt.push_str(replacement);
        } else {
            rebuilt.push_str(&bare);
        }
        rest = after;
    }
    rebuilt.push_str(rest);
    out = rebuilt;
    out
}

/// Expand `$VAR` / `${VAR}` from the process environment, leaving unknown
/// variables untouched.
fn expand_env(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos + 1..];
        let (name, consumed) = if let Some(inner) = tail.strip_prefix('{') {
            match inner.find('}') {
                Some(end) => (&inner[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = tail
                .bytes()
                .position(|b| !b.is_ascii_alphanumeric() && b != b'_')
                .unwrap_or(tail.len());
            (&tail[..end], end)
        };
        match std::env::var(name) {
            Ok(v) if !name.is_empty() => {
                out.push_str(&v);
                rest = &tail[consumed..];
            }
            _ => {
                out.push('$');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Resolve a mapping to its fixed point.
///
/// Entries with empty keys are dropped; after the fixed point, remaining
/// `$VAR` references are expanded from the process environment. Idempotent:
/// resolving an already-resolved map changes nothing.
pub fn resolve(map: &VarMap) -> VarMap {
    let mut out: VarMap = map
        .iter()
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let keys: Vec<String> = out.keys().cloned().collect();
    for _ in 0..MAX_PASSES {
        let mut changed = false;
        for k1 in &keys {
            let mut value = out[k1].clone();
            if !value.contains('$') {
                continue;
            }
            for k2 in &keys {
                if k1 == k2 {
                    continue;
                }
                let replacement = out[k2].clone();
                value = substitute(&value, k2, &replacement);
            }
            if value != out[k1] {
                out.insert(k1.clone(), value);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    for value in out.values_mut() {
        if value.contains('$') {
            *value = expand_env(value);
        }
    }
    out
}

/// Python preamble that re-binds a node's files, parameters, and variables
/// as attributes of a `self` handle read back from the environment.
pub(crate) fn self_handle_preamble(ty: &NodeType, pin: i64, variables: &[String]) -> String {
    let mut lines = vec![
        "import os".to_string(),
        "class _MgvSelf(object):".to_string(),
        "    pass".to_string(),
        "self = _MgvSelf()".to_string(),
        "self.name = os.getenv('MGVNODENAME', '')".to_string(),
        "self.path = os.getenv('MGVNODEPATH', '')".to_string(),
        "self.version = os.getenv('MGVNODEVERSION', '')".to_string(),
    ];
    let mut bind = |name: &str| {
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            lines.push(format!("self.{name} = os.getenv('{name}', '')"));
        }
    };
    for file in &ty.type_files {
        bind(&file.name);
    }
    for param in ty.parameters(pin) {
        bind(&param.name);
    }
    for name in variables {
        bind(name);
    }
    lines.join("\n") + "\n"
}

/// Builds resolved node environments, memoizing per node for the lifetime
/// of the builder.
pub struct EnvBuilder<'a> {
    project: &'a Project,
    graph: &'a Graph,
    cache: FxHashMap<String, VarMap>,
}

impl<'a> EnvBuilder<'a> {
    pub fn new(project: &'a Project, graph: &'a Graph) -> Self {
        Self {
            project,
            graph,
            cache: FxHashMap::default(),
        }
    }

    /// Ambient keys every node of the graph shares.
    fn graph_layer(&self) -> VarMap {
        let mut map = VarMap::default();
        map.insert("MGVPROJECTNAME".into(), self.project.name.clone());
        map.insert("MGVPATTERNNAME".into(), self.graph.pattern_name.clone());
        map.insert(
            "MGVGRAPHPATH".into(),
            self.graph.work_directory(self.project),
        );
        map.insert("MGVGRAPHKEYS".into(), self.graph.path.join(":"));
        map.insert("MGVGRAPHNAME".into(), self.graph.name.clone());
        map.insert("MGVGRAPHFILEPATH".into(), self.graph.file_path(self.project));
        for (i, key) in self.graph.path.iter().enumerate() {
            map.insert(format!("KEY{i}"), key.clone());
        }
        for variable in &self.graph.variables {
            if variable.active {
                map.insert(variable.name.clone(), variable.value.clone());
            }
        }
        map
    }

    /// The resolved environment of a node's active version.
    pub fn node_env(&mut self, id: &NodeId) -> Result<VarMap, VarError> {
        let mut visiting = FxHashSet::default();
        self.node_env_guarded(id, &mut visiting)
    }

    fn node_env_guarded(
        &mut self,
        id: &NodeId,
        visiting: &mut FxHashSet<String>,
    ) -> Result<VarMap, VarError> {
        if let Some(cached) = self.cache.get(&id.0) {
            return Ok(cached.clone());
        }
        let Some(node) = self.graph.node_by_id(id) else {
            return Err(VarError::UnknownNode {
                uuid: id.0.clone(),
            });
        };
        visiting.insert(id.0.clone());
        let mut map = self.graph_layer();
        self.node_layer(node, &mut map);
        self.inputs_layer(node, &mut map, visiting);
        self.type_layers(node, &mut map);
        if let Some(version) = node.active_version() {
            for variable in &version.variables {
                if variable.active {
                    map.insert(variable.name.clone(), variable.value.clone());
                }
            }
        }
        visiting.remove(&id.0);
        let resolved = resolve(&map);
        self.cache.insert(id.0.clone(), resolved.clone());
        Ok(resolved)
    }

    fn node_layer(&self, node: &Node, map: &mut VarMap) {
        let workdir = self.graph.work_directory(self.project);
        map.insert("MGVNODEPATH".into(), format!("{workdir}/{}", node.name));
        map.insert("MGVNODENAME".into(), node.name.clone());
        map.insert("MGVNODETYPE".into(), node.type_name.clone());
        map.insert(
            "MGVNODEVERSION".into(),
            format!(
                "{:0width$}",
                node.version_active,
                width = self.project.versions_padding
            ),
        );
    }

    /// Per-file `MGVINPUTS_<name>` path lists from direct upstream nodes,
    /// plus `MGVINPUTS` naming the available file keys.
    fn inputs_layer(&mut self, node: &Node, map: &mut VarMap, visiting: &mut FxHashSet<String>) {
        let mut per_file: Vec<(String, Vec<String>)> = Vec::new();
        for input in self.graph.input_nodes(&node.id()) {
            if visiting.contains(&input.0) {
                continue;
            }
            let Ok(input_env) = self.node_env_guarded(&input, visiting) else {
                continue;
            };
            let Some(input_node) = self.graph.node_by_id(&input) else {
                continue;
            };
            let Some(ty) = self.node_type_of(input_node) else {
                continue;
            };
            for file in &ty.type_files {
                if let Some(path) = input_env.get(&file.name) {
                    match per_file.iter_mut().find(|(name, _)| name == &file.name) {
                        Some((_, paths)) => paths.push(path.clone()),
                        None => per_file.push((file.name.clone(), vec![path.clone()])),
                    }
                }
            }
        }
        let mut names = Vec::new();
        for (name, paths) in per_file {
            map.insert(format!("MGVINPUTS_{name}"), paths.join(";"));
            names.push(name);
        }
        map.insert("MGVINPUTS".into(), names.join(";"));
    }

    fn node_type_of(&self, node: &Node) -> Option<&'a NodeType> {
        match &node.type_uuid {
            Some(uuid) => self.project.node_type_by_uuid(uuid),
            None => self.project.node_type(&node.type_name),
        }
    }

    fn type_layers(&self, node: &Node, map: &mut VarMap) {
        let Some(ty) = self.node_type_of(node) else {
            return;
        };
        let Some(version) = node.active_version() else {
            return;
        };
        let pin = version.type_force_version;
        if let Some(context) = self.project.context(&ty.context) {
            for (k, v) in context.entries() {
                map.insert(k.to_string(), v.to_string());
            }
        }
        for file in &ty.type_files {
            map.insert(file.name.clone(), file.path.clone());
        }
        let variable_names: Vec<String> =
            version.variables.iter().map(|v| v.name.clone()).collect();
        for param in ty.parameters(pin) {
            let value = version
                .parameters
                .get(&param.name)
                .cloned()
                .unwrap_or_else(|| param.default.clone());
            let value = if param.kind == ParamKind::Code {
                format!("{}{value}", self_handle_preamble(ty, pin, &variable_names))
            } else {
                value
            };
            map.insert(param.name.clone(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> VarMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn braced_and_bare_references_resolve() {
        let resolved = resolve(&map(&[
            ("ROOT", "/data"),
            ("SHOW", "${ROOT}/show"),
            ("SHOT", "$SHOW/sh010"),
        ]));
        assert_eq!(resolved["SHOT"], "/data/show/sh010");
    }

    #[test]
    fn bare_reference_needs_a_delimiter() {
        let resolved = resolve(&map(&[("A", "x"), ("B", "$Abc"), ("C", "$A_tail")]));
        // `$Abc` is not a reference to A; `$A_` is.
        assert_eq!(resolved["B"], "$Abc");
        assert_eq!(resolved["C"], "x_tail");
    }

    #[test]
    fn resolution_is_idempotent() {
        let first = resolve(&map(&[("A", "1"), ("B", "${A}2"), ("C", "${B}3")]));
        let second = resolve(&first);
        assert_eq!(first, second);
    }

    #[test]
    fn cyclic_mapping_terminates() {
        let resolved = resolve(&map(&[("A", "${B}"), ("B", "${A}")]));
        assert_eq!(resolved.len(), 2);
    }

    #[test]
    fn empty_keys_are_dropped() {
        let resolved = resolve(&map(&[("", "junk"), ("A", "1")]));
        assert!(!resolved.contains_key(""));
        assert_eq!(resolved["A"], "1");
    }

    #[test]
    fn unknown_environment_variables_survive() {
        let resolved = resolve(&map(&[("A", "$NOT_A_REAL_MANGROVE_VAR/x")]));
        assert_eq!(resolved["A"], "$NOT_A_REAL_MANGROVE_VAR/x");
    }
}
