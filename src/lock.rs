//! Advisory node ownership.
//!
//! Ownership is cooperative: a node carries an owner token and the
//! `address:port` of the owner's unlock listener. Taking over a foreign
//! node goes through the `MGVUNLOCK` wire protocol, a single TCP round
//! trip asking the owning session to give the node up. Transport failures
//! are values here, never errors; an unreachable owner degrades to
//! [`UnlockReply::NoRoute`] and the takeover proceeds.

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::entities::graph::Graph;
use crate::entities::node::{Node, NodeId};
use crate::session::SessionIdentity;
use crate::storage::{StorageAdapter, StorageResult};

/// Field separator of the unlock wire format.
pub const SEPARATOR: &str = "*MGVSEPARATOR*";

/// Command word opening every unlock request.
pub const UNLOCK_COMMAND: &str = "MGVUNLOCK";

/// Reply meaning the asked session no longer owns the node.
pub const NOTMINE: &str = "notmine";

/// Reply meaning the asked session keeps the node.
pub const NOCHANGE: &str = "nochange";

const UNLOCK_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_CAP: usize = 1024;

/// Outcome of one unlock request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnlockReply {
    /// The owner endpoint refused, was unreachable, or timed out.
    NoRoute,
    /// The owner answered; the payload is opaque except for
    /// [`NOTMINE`] and [`NOCHANGE`].
    Reply(String),
    /// The connection was established but the exchange failed.
    TransportError(String),
}

impl UnlockReply {
    /// Whether the asked node may be taken over.
    ///
    /// An empty reply and [`NOTMINE`] are consent; [`NoRoute`] counts as
    /// consent because a dead session cannot keep its locks. A transport
    /// error proves nothing and blocks the takeover.
    pub fn allows_force(&self) -> bool {
        match self {
            UnlockReply::NoRoute => true,
            UnlockReply::Reply(s) => s.is_empty() || s == NOTMINE,
            UnlockReply::TransportError(_) => false,
        }
    }
}

/// True iff `session` may write the node: it owns it or nobody does.
pub fn catch(node: &Node, session: &SessionIdentity) -> bool {
    node.is_free() || node.user == session.token()
}

/// Release a node if `session` owns it. Returns whether a release
/// happened.
pub async fn free(
    node: &mut Node,
    session: &SessionIdentity,
    store: &dyn StorageAdapter,
) -> StorageResult<bool> {
    if node.user != session.token() {
        return Ok(false);
    }
    node.free(store).await?;
    Ok(true)
}

/// One unlock round trip. Abstracted so takeover logic is testable
/// without sockets.
#[async_trait]
pub trait UnlockTransport: Send + Sync {
    async fn unlock_request(
        &self,
        target: &str,
        graph_path: &str,
        node_name: &str,
        user: &str,
        endpoint: &str,
    ) -> UnlockReply;
}

/// The production transport: one TCP connection per request.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpUnlockTransport;

#[async_trait]
impl UnlockTransport for TcpUnlockTransport {
    async fn unlock_request(
        &self,
        target: &str,
        graph_path: &str,
        node_name: &str,
        user: &str,
        endpoint: &str,
    ) -> UnlockReply {
        let message = [UNLOCK_COMMAND, graph_path, node_name, user, endpoint].join(SEPARATOR);
        let mut stream = match timeout(UNLOCK_TIMEOUT, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => {
                debug!(%target, error = %err, "unlock target unreachable");
                return UnlockReply::NoRoute;
            }
            Err(_) => {
                debug!(%target, "unlock connect timed out");
                return UnlockReply::NoRoute;
            }
        };
        match timeout(UNLOCK_TIMEOUT, stream.write_all(message.as_bytes())).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return UnlockReply::TransportError(err.to_string()),
            Err(_) => return UnlockReply::NoRoute,
        }
        if let Err(err) = stream.shutdown().await {
            return UnlockReply::TransportError(err.to_string());
        }
        let mut buf = vec![0u8; REPLY_CAP];
        match timeout(UNLOCK_TIMEOUT, stream.read(&mut buf)).await {
            Ok(Ok(n)) => {
                let reply = String::from_utf8_lossy(&buf[..n]).trim().to_string();
                UnlockReply::Reply(reply)
            }
            Ok(Err(err)) => UnlockReply::TransportError(err.to_string()),
            Err(_) => UnlockReply::NoRoute,
        }
    }
}

/// Select the subset of `nodes` this session may take over.
///
/// Nodes already writable via [`catch`] and foreign nodes without a
/// listener endpoint pass immediately. For the rest, at most one unlock
/// request goes out per distinct owner endpoint; all nodes behind the
/// same endpoint share its reply.
pub async fn force_nodes(
    graph: &Graph,
    work_directory: &str,
    nodes: &[NodeId],
    transport: &dyn UnlockTransport,
) -> Vec<NodeId> {
    let session = &graph.session;
    let mut replies: FxHashMap<String, UnlockReply> = FxHashMap::default();
    let mut forced = Vec::new();
    for id in nodes {
        let Some(node) = graph.node_by_id(id) else {
            continue;
        };
        if catch(node, session) || node.port.is_empty() {
            forced.push(id.clone());
            continue;
        }
        if !replies.contains_key(&node.port) {
            let reply = transport
                .unlock_request(
                    &node.port,
                    work_directory,
                    &node.name,
                    session.user(),
                    session.endpoint(),
                )
                .await;
            replies.insert(node.port.clone(), reply);
        }
        if replies[&node.port].allows_force() {
            forced.push(id.clone());
        }
    }
    forced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::FREE_OWNER;

    #[test]
    fn allows_force_truth_table() {
        assert!(UnlockReply::NoRoute.allows_force());
        assert!(UnlockReply::Reply(String::new()).allows_force());
        assert!(UnlockReply::Reply(NOTMINE.into()).allows_force());
        assert!(!UnlockReply::Reply(NOCHANGE.into()).allows_force());
        assert!(!UnlockReply::Reply("busy".into()).allows_force());
        assert!(!UnlockReply::TransportError("broken pipe".into()).allows_force());
    }

    #[test]
    fn catch_checks_owner_token() {
        let session = SessionIdentity::from_token("ann$1");
        let mut node = Node::new("n", "comp");
        assert_eq!(node.user, FREE_OWNER);
        assert!(catch(&node, &session));
        node.user = "ann$1".into();
        assert!(catch(&node, &session));
        node.user = "ann$2".into();
        assert!(!catch(&node, &session));
        node.user = "bob$9".into();
        assert!(!catch(&node, &session));
    }
}
