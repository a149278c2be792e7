//! Utilities for driving a [`HubServer`](hubframe::server::HubServer) from
//! tests.
//!
//! [`RawPeer`] speaks raw hub frames over an in-process pipe, so tests can
//! assert on exactly what the server writes without a typed client in the
//! way.
//!
//! ```rust,no_run
//! use hubframe::protocol::JsonHubProtocol;
//! use hubframe_testing::{RawPeer, TestResult};
//!
//! # async fn example(server: hubframe::server::HubServer) -> TestResult {
//! let mut peer = RawPeer::connect(&server, JsonHubProtocol).await?;
//! peer.invoke("1", "Add", vec![1.into(), 2.into()]).await?;
//! let reply = peer.next().await;
//! # Ok(())
//! # }
//! ```

mod integration_helpers;
mod macros;
pub mod peer;

pub use integration_helpers::{TestResult, hub_server, unused_listener, wait_until};
pub use peer::RawPeer;
