#![doc(html_root_url = "https://docs.rs/hubframe/latest")]
//! Public API for the `hubframe` library.
//!
//! This crate provides a real-time hub server and client: framed message
//! codecs, a JSON and a binary hub protocol, interchangeable transports
//! (WebSockets, Server-Sent Events, long polling and in-process pipes),
//! connection tracking, and a hub dispatcher that maps invocations to typed
//! async handlers.
//!
//! A server is assembled from a [`hub::Hub`] of named methods wrapped in a
//! [`HubConnectionHandler`] and hosted by a [`HubServer`]. Clients connect
//! with a [`HubClient`] over any [`client::Connector`].

pub mod client;
pub mod codec;
pub mod connection;
pub mod error;
pub mod hub;
pub mod manager;
pub mod metrics;
pub mod panic;
pub mod protocol;
pub mod push;
pub mod server;
pub mod transport;

pub use client::{ClientError, HubClient, HubConnectionState};
pub use connection::{Connection, ConnectionId};
pub use error::HubError;
pub use hub::{Hub, HubCallContext, HubConnectionHandler, HubOptions};
pub use manager::ConnectionManager;
pub use metrics::{CONNECTIONS_ACTIVE, Direction, ERRORS_TOTAL, FRAMES_PROCESSED};
pub use protocol::{HubMessage, HubProtocol};
pub use server::{HubServer, ServerConfig, ServerError};
pub use transport::{TransferFormat, TransportKind};
