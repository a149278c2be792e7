//! Negotiate response body.

use serde::Serialize;

use crate::{
    connection::Connection,
    transport::{TransferFormat, TransportKind},
};

/// Highest negotiate version this server speaks.
pub const MAX_NEGOTIATE_VERSION: u32 = 1;

/// One transport offered to the client.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: TransportKind,
    pub transfer_formats: Vec<TransferFormat>,
}

impl From<TransportKind> for AvailableTransport {
    fn from(kind: TransportKind) -> Self {
        Self {
            transport: kind,
            transfer_formats: kind.transfer_formats().to_vec(),
        }
    }
}

/// Body of the reply to a negotiate request.
///
/// ```
/// use hubframe::{manager::NegotiateResponse, transport::TransportKind};
///
/// let json = serde_json::to_value(NegotiateResponse {
///     connection_id: "abc".into(),
///     connection_token: None,
///     negotiate_version: 0,
///     available_transports: vec![TransportKind::ServerSentEvents.into()],
/// })
/// .unwrap();
/// assert_eq!(
///     json,
///     serde_json::json!({
///         "connectionId": "abc",
///         "negotiateVersion": 0,
///         "availableTransports": [
///             {"transport": "ServerSentEvents", "transferFormats": ["Text"]}
///         ]
///     })
/// );
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    pub connection_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_token: Option<String>,
    pub negotiate_version: u32,
    pub available_transports: Vec<AvailableTransport>,
}

impl NegotiateResponse {
    /// Describe `connection`, offering `transports`.
    ///
    /// Version 0 clients route by connection id, so no token is sent.
    #[must_use]
    pub fn for_connection(connection: &Connection, transports: &[TransportKind]) -> Self {
        let version = connection.negotiate_version();
        Self {
            connection_id: connection.id().to_string(),
            connection_token: (version > 0).then(|| connection.token().to_owned()),
            negotiate_version: version,
            available_transports: transports.iter().copied().map(Into::into).collect(),
        }
    }

    /// Serialise to the JSON body.
    ///
    /// # Errors
    ///
    /// Propagates `serde_json` failures.
    pub fn to_json(&self) -> Result<String, serde_json::Error> { serde_json::to_string(self) }
}
