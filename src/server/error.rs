//! Errors raised by [`HubServer`](super::HubServer).

use std::io;

use thiserror::Error;

use crate::{connection::ConnectionError, transport::TransportError};

#[derive(Debug, Error)]
pub enum ServerError {
    /// Binding or configuring the listener failed.
    #[error("bind error: {0}")]
    Bind(#[source] io::Error),
    /// No connection is registered under the given token.
    #[error("no connection with that id")]
    UnknownConnection,
    /// The connection is not served by an HTTP transport accepting this
    /// request.
    #[error("connection does not use a matching HTTP transport")]
    NoHttpTransport,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
