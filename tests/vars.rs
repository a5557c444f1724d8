//! Resolver and environment-builder behavior.

mod common;

use common::{open_graph, seeded_project};
use mangrove::storage::MemoryStorage;
use mangrove::vars::{resolve, EnvBuilder, VarMap};
use proptest::prelude::*;

fn map(pairs: &[(&str, &str)]) -> VarMap {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn chained_references_reach_a_fixed_point() {
    let resolved = resolve(&map(&[
        ("ROOT", "/data"),
        ("SHOW", "${ROOT}/show"),
        ("SHOT", "${SHOW}/0100"),
        ("FILE", "$SHOT/comp.exr"),
    ]));
    assert_eq!(resolved["FILE"], "/data/show/0100/comp.exr");
}

#[test]
fn cyclic_references_terminate() {
    let resolved = resolve(&map(&[
        ("A", "${B}x"),
        ("B", "${C}y"),
        ("C", "${A}z"),
    ]));
    // No panic, no hang; every key survives.
    assert_eq!(resolved.len(), 3);
}

proptest! {
    /// Acyclic mappings always reach a fixed point, and resolving a
    /// resolved mapping changes nothing.
    #[test]
    fn resolution_is_idempotent_on_acyclic_maps(
        literals in proptest::collection::vec("[a-z]{0,6}", 4),
        refs in proptest::collection::vec(0usize..4, 4),
    ) {
        let mut input = VarMap::default();
        for (i, lit) in literals.iter().enumerate() {
            // Key Vi may only reference higher-numbered keys.
            let target = refs[i].max(i + 1);
            let value = if target < literals.len() {
                format!("{lit}${{V{target}}}")
            } else {
                lit.clone()
            };
            input.insert(format!("V{i}"), value);
        }
        let once = resolve(&input);
        let twice = resolve(&once);
        prop_assert_eq!(once, twice);
    }
}

#[tokio::test]
async fn node_environment_layers_compose() {
    let store = MemoryStorage::new();
    let root = tempfile::tempdir().unwrap();
    let root = root.path().display().to_string();
    let project = seeded_project(&store, &root).await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    graph.add_variable(&store, "SHOW", "myshow").await.unwrap();
    let id = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();

    let mut envs = EnvBuilder::new(&project, &graph);
    let env = envs.node_env(&id).unwrap();

    assert_eq!(env["MGVPROJECTNAME"], "show");
    assert_eq!(env["MGVPATTERNNAME"], "Shots");
    assert_eq!(env["MGVGRAPHPATH"], format!("{root}/Shots/0100"));
    assert_eq!(env["KEY0"], "0100");
    assert_eq!(env["MGVNODENAME"], "comp");
    assert_eq!(env["MGVNODETYPE"], "comp");
    // versions_start 1, padded to the project's width.
    assert_eq!(env["MGVNODEVERSION"], "001");
    // Context entries of the type's declared context.
    assert_eq!(env["RENDERER"], "internal");
    // Type file template resolved through the node keys.
    assert_eq!(
        env["image"],
        format!("{root}/Shots/0100/comp/img_v001.exr")
    );
    // Graph variable.
    assert_eq!(env["SHOW"], "myshow");
    // Parameter default.
    assert_eq!(env["quality"], "8");
    // No upstream nodes.
    assert_eq!(env["MGVINPUTS"], "");
}

#[tokio::test]
async fn upstream_inputs_surface_per_file_paths() {
    let store = MemoryStorage::new();
    let root = tempfile::tempdir().unwrap();
    let root = root.path().display().to_string();
    let project = seeded_project(&store, &root).await;
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

    let mut envs = EnvBuilder::new(&project, &graph);
    let env = envs.node_env(&b).unwrap();
    assert_eq!(env["MGVINPUTS"], "image");
    assert_eq!(
        env["MGVINPUTS_image"],
        format!("{root}/Shots/0100/comp/img_v001.exr")
    );
}
