//! Script compilation.
//!
//! [`compile`] turns a node action into a standalone Python script: project
//! head, type head, and action command stacked as fault-isolated sections,
//! with the upstream output records embedded as an armored `mgvInputs`
//! literal and a guaranteed final section that hands the output record back
//! on a sentinel stdout line. Compilation is a pure function of the current
//! in-memory state.

use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;

use crate::entities::graph::Graph;
use crate::entities::node::NodeId;
use crate::entities::project::Project;
use crate::exec::output::{self, ArmorError, OutputRecord, OUTPUT_SENTINEL};
use crate::vars::{self, EnvBuilder, VarError, VarMap};

#[derive(Debug, Error, Diagnostic)]
pub enum CompileError {
    #[error("node {uuid} is not part of the graph")]
    #[diagnostic(code(mangrove::exec::unknown_node))]
    UnknownNode { uuid: String },

    #[error("type {name:?} is not declared by the project")]
    #[diagnostic(
        code(mangrove::exec::unknown_type),
        help("The node keeps its type by name; declare the type or rebind the node.")
    )]
    UnknownType { name: String },

    #[error("type {type_name:?} has no action {action:?}")]
    #[diagnostic(code(mangrove::exec::unknown_action))]
    UnknownAction { type_name: String, action: String },

    #[error("node {name:?} has no active version")]
    #[diagnostic(code(mangrove::exec::no_version))]
    NoVersion { name: String },

    #[error(transparent)]
    #[diagnostic(transparent)]
    Var(#[from] VarError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Armor(#[from] ArmorError),
}

/// A script ready to run, with everything the invoking layer needs.
#[derive(Clone, Debug)]
pub struct CompiledScript {
    pub source: String,
    /// Resolved environment the child runs under.
    pub env: VarMap,
    /// Upstream output records, link order, as embedded in `mgvInputs`.
    pub inputs: Vec<Value>,
    /// Resolved artifact paths of the node's type files.
    pub files: FxHashMap<String, String>,
    pub action: String,
    /// Whether the invoking layer must serialize actions on this node.
    pub stack: bool,
}

/// The cached output of a node's active version, or a synthesized record
/// when it never ran: empty value, no inputs, resolved file paths.
pub fn output_or_default(
    project: &Project,
    graph: &Graph,
    envs: &mut EnvBuilder<'_>,
    id: &NodeId,
) -> Result<OutputRecord, CompileError> {
    let node = graph
        .node_by_id(id)
        .ok_or_else(|| CompileError::UnknownNode { uuid: id.0.clone() })?;
    if let Some(record) = node.active_version().and_then(|v| v.output.clone()) {
        return Ok(record);
    }
    let env = envs.node_env(id)?;
    let mut files = FxHashMap::default();
    if let Some(ty) = type_of(project, node) {
        for file in &ty.type_files {
            if let Some(path) = env.get(&file.name) {
                files.insert(file.name.clone(), path.clone());
            }
        }
    }
    Ok(OutputRecord {
        value: Value::Null,
        inputs: Vec::new(),
        name: node.name.clone(),
        type_name: node.type_name.clone(),
        version: node.version_active,
        date: String::new(),
        user: String::new(),
        action: String::new(),
        files,
    })
}

fn type_of<'a>(
    project: &'a Project,
    node: &crate::entities::node::Node,
) -> Option<&'a crate::entities::node_type::NodeType> {
    match &node.type_uuid {
        Some(uuid) => project.node_type_by_uuid(uuid),
        None => project.node_type(&node.type_name),
    }
}

/// Indent a section body for embedding in a `try:` block.
fn indent(body: &str) -> String {
    if body.trim().is_empty() {
        return "    pass".to_string();
    }
    body.lines()
        .map(|line| format!("    {line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Python string literal via json escaping.
fn py_str(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Compile the named action of a node into a runnable script.
pub fn compile(
    project: &Project,
    graph: &Graph,
    id: &NodeId,
    action_name: &str,
) -> Result<CompiledScript, CompileError> {
    let node = graph
        .node_by_id(id)
        .ok_or_else(|| CompileError::UnknownNode { uuid: id.0.clone() })?;
    let ty = type_of(project, node).ok_or_else(|| CompileError::UnknownType {
        name: node.type_name.clone(),
    })?;
    let version = node
        .active_version()
        .ok_or_else(|| CompileError::NoVersion {
            name: node.name.clone(),
        })?;
    let pin = version.type_force_version;
    let action = ty
        .action(action_name, pin)
        .ok_or_else(|| CompileError::UnknownAction {
            type_name: ty.name.clone(),
            action: action_name.to_string(),
        })?
        .clone();

    let mut envs = EnvBuilder::new(project, graph);
    let env = envs.node_env(id)?;

    let mut inputs = Vec::new();
    for input in graph.input_nodes(id) {
        let record = output_or_default(project, graph, &mut envs, &input)?;
        inputs.push(
            serde_json::to_value(&record).map_err(|source| ArmorError::Json { source })?,
        );
    }
    let armored_inputs = output::armor(&inputs)?;

    let mut files = FxHashMap::default();
    for file in &ty.type_files {
        if let Some(path) = env.get(&file.name) {
            files.insert(file.name.clone(), path.clone());
        }
    }

    let variable_names: Vec<String> = version.variables.iter().map(|v| v.name.clone()).collect();
    let preamble = vars::self_handle_preamble(ty, pin, &variable_names);

    let date = chrono::Local::now().format("%d/%m/%y %H:%M").to_string();
    let files_literal = {
        let mut entries: Vec<(&String, &String)> = files.iter().collect();
        entries.sort();
        let body = entries
            .iter()
            .map(|(k, v)| format!("{}: {}", py_str(k), py_str(v)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{body}}}")
    };

    let mut source = String::new();
    source.push_str("import os\nimport sys\nimport json\nimport base64\nimport traceback\n\n");
    source.push_str("mgvOutput = {}\n");
    source.push_str(&format!("mgvInputs = {}\n", py_str(&armored_inputs)));
    source.push_str(
        "mgvInputs = json.loads(base64.b64decode(mgvInputs.split(':', 1)[1]).decode())\n\n",
    );
    source.push_str("try:\n");
    source.push_str(&indent(&project.script));
    source.push_str("\nexcept Exception:\n");
    source.push_str("    sys.stderr.write('ERROR IN PROJECT HEAD\\n')\n");
    source.push_str("    traceback.print_exc()\n\n");
    source.push_str("try:\n");
    source.push_str(&indent(ty.script(pin)));
    source.push_str("\nexcept Exception:\n");
    source.push_str("    sys.stderr.write('ERROR IN TYPE HEAD\\n')\n");
    source.push_str("    traceback.print_exc()\n\n");
    source.push_str("try:\n");
    source.push_str(&indent(&format!("{preamble}{}", action.command)));
    source.push_str("\nexcept Exception:\n");
    source.push_str(&format!(
        "    sys.stderr.write('ERROR IN ACTION ' + {}+ '\\n')\n",
        py_str(&action.name)
    ));
    source.push_str("    traceback.print_exc()\n\n");
    source.push_str("mgvRecord = {\n");
    source.push_str("    'value': mgvOutput,\n");
    source.push_str("    'inputs': mgvInputs,\n");
    source.push_str(&format!("    'name': {},\n", py_str(&node.name)));
    source.push_str(&format!("    'type': {},\n", py_str(&node.type_name)));
    source.push_str(&format!("    'version': {},\n", node.version_active));
    source.push_str(&format!("    'date': {},\n", py_str(&date)));
    source.push_str(&format!("    'user': {},\n", py_str(graph.session.user())));
    source.push_str(&format!("    'action': {},\n", py_str(&action.name)));
    source.push_str(&format!("    'files': {files_literal},\n"));
    source.push_str("}\n");
    source.push_str(&format!(
        "sys.stdout.write({} + base64.b64encode(json.dumps(mgvRecord).encode()).decode() + '\\n')\n",
        py_str(OUTPUT_SENTINEL)
    ));
    source.push_str("sys.stdout.flush()\n");

    Ok(CompiledScript {
        source,
        env,
        inputs,
        files,
        action: action.name.clone(),
        stack: action.stack,
    })
}
