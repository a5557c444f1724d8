//! Ownership checks and the unlock wire protocol.

mod common;

use async_trait::async_trait;
use common::{open_graph, seeded_project};
use mangrove::entities::NodeId;
use mangrove::lock::{
    catch, force_nodes, free, TcpUnlockTransport, UnlockReply, UnlockTransport, SEPARATOR,
    UNLOCK_COMMAND,
};
use mangrove::storage::MemoryStorage;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct StubTransport {
    targets: Mutex<Vec<String>>,
    reply: UnlockReply,
}

impl StubTransport {
    fn replying(reply: UnlockReply) -> Self {
        Self {
            targets: Mutex::new(Vec::new()),
            reply,
        }
    }
}

#[async_trait]
impl UnlockTransport for StubTransport {
    async fn unlock_request(
        &self,
        target: &str,
        _graph_path: &str,
        _node_name: &str,
        _user: &str,
        _endpoint: &str,
    ) -> UnlockReply {
        self.targets.lock().push(target.to_string());
        self.reply.clone()
    }
}

#[tokio::test]
async fn free_only_releases_own_nodes() {
    let store = MemoryStorage::new();
    let project = seeded_project(&store, "/tmp/mgv_locks").await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let id = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();
    let session = graph.session.clone();

    let node = graph.node_by_id_mut(&id).unwrap();
    assert!(free(node, &session, &store).await.unwrap());
    assert!(node.is_free());
    assert!(catch(node, &session));

    // A foreign owner stays untouched.
    node.set_user(&store, "bob$7", "10.0.0.5:9000").await.unwrap();
    assert!(!free(node, &session, &store).await.unwrap());
    assert_eq!(node.user, "bob$7");
}

#[tokio::test]
async fn force_nodes_asks_each_endpoint_once() {
    let store = MemoryStorage::new();
    let project = seeded_project(&store, "/tmp/mgv_locks").await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(
            graph
                .add_node(&store, &project, "comp", 0.0, 0.0)
                .await
                .unwrap(),
        );
    }
    // Two nodes behind one endpoint, one behind another, one free.
    let endpoints = ["10.0.0.1:9000", "10.0.0.1:9000", "10.0.0.2:9000"];
    for (id, endpoint) in ids.iter().zip(endpoints) {
        graph
            .node_by_id_mut(id)
            .unwrap()
            .set_user(&store, "bob$7", endpoint)
            .await
            .unwrap();
    }
    let session = graph.session.clone();
    let node = graph.node_by_id_mut(&ids[3]).unwrap();
    free(node, &session, &store).await.unwrap();

    let transport = StubTransport::replying(UnlockReply::Reply("notmine".into()));
    let forced = force_nodes(&graph, "/tmp/mgv_locks/Shots/0100", &ids, &transport).await;

    let mut targets = transport.targets.lock().clone();
    targets.sort();
    assert_eq!(targets, vec!["10.0.0.1:9000", "10.0.0.2:9000"]);
    assert_eq!(forced.len(), 4);
}

#[tokio::test]
async fn refusing_endpoint_blocks_its_nodes_only() {
    let store = MemoryStorage::new();
    let project = seeded_project(&store, "/tmp/mgv_locks").await;
    let mut graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let a = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();
    let b = graph
        .add_node(&store, &project, "comp", 0.0, 0.0)
        .await
        .unwrap();
    graph
        .node_by_id_mut(&a)
        .unwrap()
        .set_user(&store, "bob$7", "10.0.0.1:9000")
        .await
        .unwrap();
    // Foreign owner with no listener endpoint: forcible without asking.
    graph
        .node_by_id_mut(&b)
        .unwrap()
        .set_user(&store, "bob$7", "")
        .await
        .unwrap();

    let transport = StubTransport::replying(UnlockReply::Reply("nochange".into()));
    let forced = force_nodes(
        &graph,
        "/tmp/mgv_locks/Shots/0100",
        &[a, b.clone()],
        &transport,
    )
    .await;
    assert_eq!(forced, vec![b]);
}

#[tokio::test]
async fn tcp_unlock_round_trip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = Vec::new();
        socket.read_to_end(&mut buf).await.unwrap();
        let message = String::from_utf8(buf).unwrap();
        socket.write_all(b"nochange").await.unwrap();
        message
    });

    let reply = TcpUnlockTransport
        .unlock_request(
            &addr.to_string(),
            "/tmp/mgv_locks/Shots/0100",
            "comp1",
            "ann",
            "127.0.0.1:4242",
        )
        .await;
    assert_eq!(reply, UnlockReply::Reply("nochange".into()));
    assert!(!reply.allows_force());

    let message = server.await.unwrap();
    let fields: Vec<&str> = message.split(SEPARATOR).collect();
    assert_eq!(
        fields,
        vec![
            UNLOCK_COMMAND,
            "/tmp/mgv_locks/Shots/0100",
            "comp1",
            "ann",
            "127.0.0.1:4242"
        ]
    );
}

#[tokio::test]
async fn unreachable_endpoint_degrades_to_noroute() {
    // Bind then drop, so the port is very likely closed.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let reply = TcpUnlockTransport
        .unlock_request(&addr.to_string(), "/tmp/g", "n", "ann", "")
        .await;
    assert_eq!(reply, UnlockReply::NoRoute);
    assert!(reply.allows_force());
}

#[tokio::test]
async fn unknown_node_ids_are_skipped() {
    let store = MemoryStorage::new();
    let project = seeded_project(&store, "/tmp/mgv_locks").await;
    let graph = open_graph(&store, &project, vec!["0100".into()], "ann").await;
    let transport = StubTransport::replying(UnlockReply::NoRoute);
    let forced = force_nodes(
        &graph,
        "/tmp/g",
        &[NodeId::from("ghost")],
        &transport,
    )
    .await;
    assert!(forced.is_empty());
    assert!(transport.targets.lock().is_empty());
}
