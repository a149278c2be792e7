//! Metric names and recording helpers.
//!
//! Helpers wrap the [`metrics`](https://docs.rs/metrics) facade and compile
//! to nothing without the `metrics` feature. Nothing is exported until the
//! application installs a recorder; the binary can install a Prometheus
//! exporter with [`install_prometheus`].

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// Gauge of connections currently registered.
pub const CONNECTIONS_ACTIVE: &str = "hubframe_connections_active";
/// Counter of hub frames read or written.
pub const FRAMES_PROCESSED: &str = "hubframe_frames_processed_total";
/// Counter of hub method invocations started.
pub const INVOCATIONS_TOTAL: &str = "hubframe_invocations_total";
/// Counter of errors, labelled by kind.
pub const ERRORS_TOTAL: &str = "hubframe_errors_total";

/// Direction of frame processing.
#[derive(Clone, Copy, Debug)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

/// Shape of an invocation.
#[derive(Clone, Copy, Debug)]
pub enum InvocationKind {
    Unary,
    Stream,
    FireAndForget,
}

impl InvocationKind {
    #[cfg_attr(not(feature = "metrics"), allow(dead_code))]
    fn as_str(self) -> &'static str {
        match self {
            InvocationKind::Unary => "unary",
            InvocationKind::Stream => "stream",
            InvocationKind::FireAndForget => "fire_and_forget",
        }
    }
}

pub fn inc_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).increment(1.0);
}

pub fn dec_connections() {
    #[cfg(feature = "metrics")]
    gauge!(CONNECTIONS_ACTIVE).decrement(1.0);
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn inc_frames(direction: Direction) {
    #[cfg(feature = "metrics")]
    counter!(FRAMES_PROCESSED, "direction" => direction.as_str()).increment(1);
}

#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn inc_invocations(kind: InvocationKind) {
    #[cfg(feature = "metrics")]
    counter!(INVOCATIONS_TOTAL, "kind" => kind.as_str()).increment(1);
}

/// Record an error of the given kind (see [`crate::HubError::kind`]).
#[cfg_attr(not(feature = "metrics"), allow(unused_variables))]
pub fn inc_errors(kind: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(ERRORS_TOTAL, "kind" => kind).increment(1);
}

/// Install a Prometheus exporter serving `/metrics` on `addr`.
///
/// # Errors
///
/// Returns the exporter's error if the listener cannot be installed.
#[cfg(feature = "metrics")]
pub fn install_prometheus(
    addr: std::net::SocketAddr,
) -> Result<(), metrics_exporter_prometheus::BuildError> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
}
