//! Loading, refreshing, and the persisted wire shapes.

mod common;

use common::{open_graph, seeded_project};
use mangrove::attrs;
use mangrove::entities::Graph;
use mangrove::session::SessionIdentity;
use mangrove::storage::{MemoryStorage, StorageAdapter};

#[tokio::test]
async fn load_rebuilds_nodes_and_links() {
    let store = MemoryStorage::new();
    let project = seeded_project(&store, "/tmp/mgv_asm").await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let a = graph
        .add_node(&store, &project, "comp", 10.0, 20.0)
        .await
        .unwrap();
    let b = graph
        .add_node(&store, &project, "comp", 30.0, 40.0)
        .await
        .unwrap();
    graph.link(&store, &a, &b).await.unwrap();
    graph.add_variable(&store, "SHOW", "myshow").await.unwrap();

    let loaded = Graph::load(
        &store,
        &graph.entity_ref(),
        "Shots",
        SessionIdentity::new("bea"),
    )
    .await
    .unwrap()
    .expect("graph row");

    assert_eq!(loaded.name, graph.name);
    assert_eq!(loaded.path, graph.path);
    assert_eq!(loaded.nodes.len(), 2);
    assert_eq!(loaded.input_nodes(&b), vec![a.clone()]);
    assert_eq!(loaded.output_nodes(&a), vec![b.clone()]);
    assert_eq!(loaded.node_by_id(&a).unwrap().posx, 10.0);
    assert_eq!(loaded.variables[0].name, "SHOW");
    // The loader keeps the stored owner, not the loading session.
    assert_eq!(loaded.node_by_id(&a).unwrap().user, graph.session.token());
}

#[tokio::test]
async fn load_drops_unresolvable_links() {
    let store = MemoryStorage::new();
    let project = seeded_project(&store, "/tmp/mgv_asm").await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let a = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();
    let node_ref = graph.node_by_id(&a).unwrap().entity_ref();
    store
        .set_attrs(&node_ref, attrs! { "inputLinks" => "ghost" })
        .await
        .unwrap();

    let loaded = Graph::load(
        &store,
        &graph.entity_ref(),
        "Shots",
        SessionIdentity::new("ann"),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(loaded.node_by_id(&a).unwrap().input_links.is_empty());
}

#[tokio::test]
async fn load_returns_none_for_missing_rows() {
    let store = MemoryStorage::new();
    let missing = mangrove::storage::EntityRef::new(mangrove::storage::EntityCode::Graph, "nope");
    let loaded = Graph::load(&store, &missing, "Shots", SessionIdentity::new("ann"))
        .await
        .unwrap();
    assert!(loaded.is_none());
}

#[tokio::test]
async fn refresh_replaces_stale_foreign_nodes_only() {
    let store = MemoryStorage::new();
    let project = seeded_project(&store, "/tmp/mgv_asm").await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let own = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();
    let foreign = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();
    graph
        .node_by_id_mut(&foreign)
        .unwrap()
        .set_user(&store, "bob$7", "10.0.0.5:9000")
        .await
        .unwrap();

    // Another session moved the foreign node.
    let foreign_ref = graph.node_by_id(&foreign).unwrap().entity_ref();
    let newer = graph.node_by_id(&foreign).unwrap().updated + 10.0;
    store
        .set_attrs(&foreign_ref, attrs! { "posx" => 99.0, "updated" => newer })
        .await
        .unwrap();
    // And moved our own node too, which must not take effect locally.
    let own_ref = graph.node_by_id(&own).unwrap().entity_ref();
    let newer_own = graph.node_by_id(&own).unwrap().updated + 10.0;
    store
        .set_attrs(&own_ref, attrs! { "posx" => 77.0, "updated" => newer_own })
        .await
        .unwrap();

    graph.refresh(&store).await.unwrap();
    assert_eq!(graph.node_by_id(&foreign).unwrap().posx, 99.0);
    assert_eq!(graph.node_by_id(&own).unwrap().posx, 0.0);
}

#[tokio::test]
async fn refresh_drops_remotely_deleted_foreign_nodes() {
    let store = MemoryStorage::new();
    let project = seeded_project(&store, "/tmp/mgv_asm").await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let own = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();
    let foreign = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();
    graph
        .node_by_id_mut(&foreign)
        .unwrap()
        .set_user(&store, "bob$7", "")
        .await
        .unwrap();

    let foreign_ref = graph.node_by_id(&foreign).unwrap().entity_ref();
    store.delete_entity(&foreign_ref).await.unwrap();
    let own_ref = graph.node_by_id(&own).unwrap().entity_ref();
    store.delete_entity(&own_ref).await.unwrap();

    graph.refresh(&store).await.unwrap();
    // The foreign node is gone; the own node survives until the session
    // closes it.
    assert!(graph.node_by_id(&foreign).is_none());
    assert!(graph.node_by_id(&own).is_some());
}

#[tokio::test]
async fn refresh_picks_up_new_remote_nodes_and_variables() {
    let store = MemoryStorage::new();
    let project = seeded_project(&store, "/tmp/mgv_asm").await;
    let graph_a = open_graph(&store, &project, vec!["0100".into()], "ann").await;

    // A second session opens the same graph row and adds content.
    let mut graph_b = Graph::load(
        &store,
        &graph_a.entity_ref(),
        "Shots",
        SessionIdentity::new("bea"),
    )
    .await
    .unwrap()
    .unwrap();
    let added = graph_b
        .add_node(&store, &project, "comp", 5.0, 5.0)
        .await
        .unwrap();
    graph_b.add_variable(&store, "PASS", "beauty").await.unwrap();

    let mut graph_a = graph_a;
    graph_a.refresh(&store).await.unwrap();
    assert!(graph_a.node_by_id(&added).is_some());
    assert_eq!(graph_a.variables[0].name, "PASS");
    assert_eq!(graph_a.variables[0].value, "beauty");
}
