//! # Fieldlink Testkit
//!
//! Testing utilities for fieldlink.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: Graph builders, record shorthands and a fault-injecting store
//! - **Generators**: Proptest strategies for property-based testing
//! - **Scripted peer**: A desktop stand-in on the in-memory network
//!
//! ## Test Fixtures
//!
//! Quickly set up an entity graph:
//!
//! ```rust
//! use fieldlink_testkit::fixtures::event_graph;
//!
//! let graph = event_graph("E1")
//!     .dates("2024-05-01", "2024-05-03")
//!     .team("T1")
//!     .equipment("EQ1", &[("C1", 1.0, 1.0), ("C2", 2.0, 2.0)])
//!     .action("A1", "T1", "EQ1")
//!     .build();
//! assert_eq!(graph.equipment[0].coordinates.len(), 2);
//! ```
//!
//! ## Property Testing
//!
//! Use the generators with proptest:
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use fieldlink_testkit::generators::event_graph;
//!
//! proptest! {
//!     #[test]
//!     fn graphs_survive_json(graph in event_graph()) {
//!         let text = serde_json::to_string(&graph).unwrap();
//!         prop_assert_eq!(serde_json::from_str::<EventGraph>(&text).unwrap(), graph);
//!     }
//! }
//! ```
//!
//! ## Scripted Peer
//!
//! ```rust,ignore
//! use fieldlink_testkit::peer::{ScriptedPeer, Step};
//! use fieldlink_sync::{decode, MemoryNetwork, Response};
//!
//! let network = MemoryNetwork::new();
//! let address = decode("desktop.local:8080")?;
//! let peer = ScriptedPeer::listen(&network, &address, vec![
//!     Step::Expect,
//!     Step::Respond(Response::imported("1 event(s) imported")),
//! ]).await;
//! // ... run a session against network.connector() ...
//! let log = peer.finish().await?;
//! ```

pub mod fixtures;
pub mod generators;
pub mod peer;

pub use fixtures::{event_graph, FlakyStore, GraphBuilder};
pub use peer::{PeerLog, ScriptedPeer, Step};

use tracing_subscriber::EnvFilter;

/// Install a test-friendly tracing subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to warnings only.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    // A second call in the same process finds a subscriber already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
