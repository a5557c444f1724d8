//! Execution orchestration.
//!
//! One entry point, [`execute`]: compile the action, prepare the node's
//! directories and state snapshot, hand the script to the runner, then
//! persist the returned output record. Filesystem preparation is
//! best-effort; storage writes are not.

use std::path::Path;

use tracing::{error, info};

use crate::assembly::PersistedGraph;
use crate::attrs;
use crate::entities::graph::Graph;
use crate::entities::node::NodeId;
use crate::entities::project::Project;
use crate::exec::compiler::compile;
use crate::exec::output::OutputRecord;
use crate::exec::runner::{ExecLine, ScriptRunner};
use crate::exec::ExecError;
use crate::session::LOCKED_MASK;
use crate::storage::StorageAdapter;

/// Create the parent directory of an artifact path, logging failures.
fn ensure_parent_dir(path: &str) {
    let Some(dir) = Path::new(path).parent() else {
        return;
    };
    if dir.as_os_str().is_empty() || dir.exists() {
        return;
    }
    if let Err(err) = std::fs::create_dir_all(dir) {
        error!(dir = %dir.display(), error = %err, "could not create artifact directory");
    }
}

/// Snapshot the whole graph next to the node, owners masked so the file
/// can never be mistaken for live shared state.
fn write_state_snapshot(project: &Project, graph: &Graph, node_dir: &str, version_id: i64) {
    let mut persisted = PersistedGraph::from_graph(graph);
    persisted.name = format!("{}_View", persisted.name);
    for node in &mut persisted.nodes {
        node.user = LOCKED_MASK.to_string();
        node.port.clear();
    }
    let file = format!(
        "{node_dir}/.exec_state_v{:0width$}",
        version_id,
        width = project.versions_padding
    );
    let payload = match serde_json::to_string_pretty(&persisted) {
        Ok(payload) => payload,
        Err(err) => {
            error!(error = %err, "could not serialize state snapshot");
            return;
        }
    };
    if let Err(err) = std::fs::create_dir_all(node_dir) {
        error!(dir = %node_dir, error = %err, "could not create node directory");
        return;
    }
    if let Err(err) = std::fs::write(&file, payload) {
        error!(%file, error = %err, "could not write state snapshot");
    }
}

/// Run one action of a node and cache its output record.
///
/// Returns the record, or `None` when the script never reached its final
/// section. The record is persisted on the node's active version before
/// this returns.
pub async fn execute(
    project: &Project,
    graph: &mut Graph,
    id: &NodeId,
    action_name: &str,
    store: &dyn StorageAdapter,
    runner: &dyn ScriptRunner,
    sink: Option<flume::Sender<ExecLine>>,
) -> Result<Option<OutputRecord>, ExecError> {
    let script = compile(project, graph, id, action_name)?;
    for path in script.files.values() {
        ensure_parent_dir(path);
    }

    let date = chrono::Local::now().format("%d/%m/%y %H:%M").to_string();
    let user = graph.session.user().to_string();
    let node_dir = script
        .env
        .get("MGVNODEPATH")
        .cloned()
        .unwrap_or_default();
    let version_id = {
        let node = graph
            .node_by_id_mut(id)
            .ok_or_else(|| crate::exec::CompileError::UnknownNode { uuid: id.0.clone() })?;
        let version_id = node.version_active;
        if let Some(version) = node.active_version_mut() {
            version.set_last_exec(store, date, user).await?;
        }
        node.bump(store).await?;
        version_id
    };
    if !node_dir.is_empty() {
        write_state_snapshot(project, graph, &node_dir, version_id);
    }

    info!(node = %id, action = action_name, "running action");
    let outcome = runner.run(&script, sink).await?;

    let Some(record) = outcome.output else {
        return Ok(None);
    };
    let armored = record.armor()?;
    let node = graph
        .node_by_id_mut(id)
        .ok_or_else(|| crate::exec::CompileError::UnknownNode { uuid: id.0.clone() })?;
    if let Some(version) = node.active_version_mut() {
        store
            .set_attrs(&version.entity_ref(), attrs! { "output" => armored })
            .await?;
        version.output = Some(record.clone());
    }
    Ok(Some(record))
}
