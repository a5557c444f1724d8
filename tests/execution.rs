//! Compilation and execution end to end.

mod common;

use async_trait::async_trait;
use common::{open_graph, seeded_project};
use mangrove::exec::{
    compile, execute, CompiledScript, ExecError, ExecLine, ExecStream, OutputRecord,
    ProcessRunner, RunOutcome, ScriptRunner, OUTPUT_SENTINEL,
};
use mangrove::storage::{MemoryStorage, StorageAdapter};
use serde_json::json;

/// Runner that pretends the script ran its action and final section.
struct MockRunner;

#[async_trait]
impl ScriptRunner for MockRunner {
    async fn run(
        &self,
        script: &CompiledScript,
        _sink: Option<flume::Sender<ExecLine>>,
    ) -> Result<RunOutcome, ExecError> {
        let record = OutputRecord {
            value: json!({"v": 1}),
            inputs: script.inputs.clone(),
            name: script.env.get("MGVNODENAME").cloned().unwrap_or_default(),
            type_name: script.env.get("MGVNODETYPE").cloned().unwrap_or_default(),
            version: 1,
            date: "01/02/26 10:30".to_string(),
            user: "ann".to_string(),
            action: script.action.clone(),
            files: script.files.clone(),
        };
        Ok(RunOutcome {
            output: Some(record),
        })
    }
}

#[tokio::test]
async fn single_node_run_caches_its_record() {
    let store = MemoryStorage::new();
    let root = tempfile::tempdir().unwrap();
    let root_path = root.path().display().to_string();
    let project = seeded_project(&store, &root_path).await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let id = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();

    let record = execute(&project, &mut graph, &id, "render", &store, &MockRunner, None)
        .await
        .unwrap()
        .expect("record");

    assert_eq!(record.value, json!({"v": 1}));
    assert!(record.inputs.is_empty());
    assert_eq!(record.name, "comp");

    // Cached in memory and in the store.
    let node = graph.node_by_id(&id).unwrap();
    let cached = node.active_version().unwrap().output.as_ref().unwrap();
    assert_eq!(cached, &record);
    let persisted = store.get_objects(&graph.entity_ref()).await.unwrap().unwrap();
    assert!(!persisted.nodes[0].versions[0].output.is_empty());

    // Execution stamps were written before the run.
    assert_eq!(node.active_version().unwrap().last_user, "ann");
    assert!(!node.active_version().unwrap().last_exec.is_empty());

    // State snapshot lands in the node directory, owners masked.
    let snapshot = root.path().join("Shots/0100/comp/.exec_state_v001");
    let payload = std::fs::read_to_string(&snapshot).unwrap();
    assert!(payload.contains("*locked*"));
    assert!(payload.contains("0100_View"));
}

#[tokio::test]
async fn downstream_compile_embeds_the_upstream_record() {
    let store = MemoryStorage::new();
    let root = tempfile::tempdir().unwrap();
    let root_path = root.path().display().to_string();
    let project = seeded_project(&store, &root_path).await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let a = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();
    let b = graph
        .add_node(&store, &project, "comp", 100.0, 0.0)
        .await
        .unwrap();
    graph.link(&store, &a, &b).await.unwrap();

    let record = execute(&project, &mut graph, &a, "render", &store, &MockRunner, None)
        .await
        .unwrap()
        .expect("record");

    let script = compile(&project, &graph, &b, "render").unwrap();
    assert_eq!(script.inputs.len(), 1);
    assert_eq!(script.inputs[0], serde_json::to_value(&record).unwrap());
    // The armored literal is embedded in the script source.
    assert!(script.source.contains("mgvInputs = "));
    assert!(script.source.contains(OUTPUT_SENTINEL));
}

#[tokio::test]
async fn unexecuted_upstream_yields_a_default_record() {
    let store = MemoryStorage::new();
    let project = seeded_project(&store, "/tmp/mgv_exec").await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let a = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();
    let b = graph
        .add_node(&store, &project, "comp", 100.0, 0.0)
        .await
        .unwrap();
    graph.link(&store, &a, &b).await.unwrap();

    let script = compile(&project, &graph, &b, "render").unwrap();
    assert_eq!(script.inputs.len(), 1);
    let input = &script.inputs[0];
    assert_eq!(input["name"], "comp");
    assert_eq!(input["value"], serde_json::Value::Null);
    assert!(input["files"]["image"]
        .as_str()
        .unwrap()
        .ends_with("img_v001.exr"));
}

#[tokio::test]
async fn compile_surfaces_action_metadata() {
    let store = MemoryStorage::new();
    let project = seeded_project(&store, "/tmp/mgv_exec").await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let id = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();

    let script = compile(&project, &graph, &id, "render").unwrap();
    assert_eq!(script.action, "render");
    assert!(script.stack);
    // Fault isolation markers for every section.
    assert!(script.source.contains("ERROR IN PROJECT HEAD"));
    assert!(script.source.contains("ERROR IN TYPE HEAD"));
    assert!(script.source.contains("ERROR IN ACTION"));

    let missing = compile(&project, &graph, &id, "publish");
    assert!(missing.is_err());
}

fn shell_script(source: &str) -> CompiledScript {
    CompiledScript {
        source: source.to_string(),
        env: [("MGVNODENAME".to_string(), "comp1".to_string())]
            .into_iter()
            .collect(),
        inputs: Vec::new(),
        files: Default::default(),
        action: "render".to_string(),
        stack: true,
    }
}

#[tokio::test]
async fn process_runner_streams_tagged_lines() {
    let runner = ProcessRunner::new(vec!["/bin/sh".to_string()]);
    let (tx, rx) = flume::unbounded();
    let outcome = runner
        .run(
            &shell_script("echo out $MGVNODENAME\necho err line >&2\n"),
            Some(tx),
        )
        .await
        .unwrap();
    assert!(outcome.output.is_none());

    let lines: Vec<ExecLine> = rx.drain().collect();
    assert!(lines
        .iter()
        .any(|l| l.stream == ExecStream::Stdout && l.line == "out comp1"));
    assert!(lines
        .iter()
        .any(|l| l.stream == ExecStream::Stderr && l.line == "err line"));
}

#[tokio::test]
async fn process_runner_captures_the_sentinel_line() {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    let record = OutputRecord {
        value: json!({"v": 1}),
        inputs: vec![],
        name: "comp1".to_string(),
        type_name: "comp".to_string(),
        version: 1,
        date: String::new(),
        user: "ann".to_string(),
        action: "render".to_string(),
        files: Default::default(),
    };
    let payload = STANDARD.encode(serde_json::to_vec(&record).unwrap());

    let runner = ProcessRunner::new(vec!["/bin/sh".to_string()]);
    let (tx, rx) = flume::unbounded();
    let outcome = runner
        .run(
            &shell_script(&format!("echo {OUTPUT_SENTINEL}{payload}\n")),
            Some(tx),
        )
        .await
        .unwrap();

    assert_eq!(outcome.output, Some(record));
    // The sentinel line itself is not forwarded.
    assert!(rx.drain().next().is_none());
}
