//! # Mangrove: Versioned Node-Graph Pipeline Engine
//!
//! Mangrove manages production pipelines as graphs of versioned nodes. A
//! project declares node types (parameters, actions, output files) and
//! patterns (where graphs live on disk); graphs hold nodes that reference
//! each other through links; executing a node action compiles a standalone
//! script from the project, type, and node state and caches the run's
//! output record for downstream nodes.
//!
//! ## Core concepts
//!
//! - **Project**: root container of patterns, types, contexts, and the
//!   head script shared by every execution.
//! - **Graph / Node / NodeVersion**: the working unit; nodes carry sparse
//!   parameter overrides per version and exactly one active version.
//! - **Variables**: `${KEY}` references resolved to a fixed point over a
//!   layered environment ([`vars`]).
//! - **Locks**: advisory ownership with a TCP unlock protocol ([`lock`]).
//! - **Execution**: compile, run in an isolated child, cache the output
//!   record ([`exec`]).
//! - **Storage**: every mutation goes through an injected
//!   [`storage::StorageAdapter`]; [`storage::MemoryStorage`] backs tests
//!   and single-session setups.
//!
//! ## Quick start
//!
//! ```
//! use mangrove::entities::{Graph, Pattern, Project};
//! use mangrove::session::SessionIdentity;
//! use mangrove::storage::MemoryStorage;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), mangrove::storage::StorageError> {
//! let store = MemoryStorage::new();
//! let mut project = Project::new("show");
//! project
//!     .patterns
//!     .push(Pattern::new("Shots", "/tmp/show/${0}"));
//! project.create(&store).await?;
//!
//! let session = SessionIdentity::new("ann");
//! let mut graph = Graph::new("Shots", vec!["0100".into()], "0100", session);
//! let pattern_ref = project.pattern("Shots").unwrap().entity_ref();
//! graph.create(&store, &pattern_ref).await?;
//! assert_eq!(graph.work_directory(&project), "/tmp/show/0100");
//! # Ok(())
//! # }
//! ```

pub mod assembly;
pub mod entities;
pub mod exec;
pub mod lock;
pub mod session;
pub mod storage;
pub mod telemetry;
pub mod vars;
