//! Command line interface for the `hubframe` demo server.
//!
//! Flags fall back to `HUBFRAME_*` environment variables. The build script
//! renders the same definition into a man page.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;

fn parse_secs(s: &str) -> Result<Duration, std::num::ParseIntError> {
    s.parse().map(Duration::from_secs)
}

/// Command line arguments for the `hubframe` binary.
#[derive(Debug, Parser)]
#[command(name = "hubframe", version, about = "Demo hub served over WebSockets")]
pub struct Cli {
    /// Address to accept WebSocket connections on.
    #[arg(short, long, env = "HUBFRAME_BIND", default_value = "127.0.0.1:5000")]
    pub bind: SocketAddr,

    /// Seconds between keep-alive pings.
    #[arg(long, env = "HUBFRAME_KEEP_ALIVE", value_parser = parse_secs, default_value = "15")]
    pub keep_alive: Duration,

    /// Seconds of client silence before a connection is dropped.
    #[arg(long, env = "HUBFRAME_CLIENT_TIMEOUT", value_parser = parse_secs, default_value = "30")]
    pub client_timeout: Duration,

    /// Seconds a client has to complete the handshake.
    #[arg(long, env = "HUBFRAME_HANDSHAKE_TIMEOUT", value_parser = parse_secs, default_value = "15")]
    pub handshake_timeout: Duration,

    /// Seconds connections get to drain on shutdown.
    #[arg(long, env = "HUBFRAME_DRAIN_TIMEOUT", value_parser = parse_secs, default_value = "5")]
    pub drain_timeout: Duration,

    /// Speak the binary protocol framing on WebSocket connections.
    #[arg(long, env = "HUBFRAME_BINARY")]
    pub binary: bool,

    /// Include exception details in error completions.
    #[arg(long, env = "HUBFRAME_DETAILED_ERRORS")]
    pub detailed_errors: bool,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "HUBFRAME_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clap::Parser;

    use super::Cli;

    #[test]
    fn parses_flags() {
        let cli = Cli::parse_from([
            "hubframe",
            "--bind",
            "0.0.0.0:7000",
            "--keep-alive",
            "5",
            "--binary",
        ]);
        assert_eq!(cli.bind.port(), 7000);
        assert_eq!(cli.keep_alive, Duration::from_secs(5));
        assert_eq!(cli.client_timeout, Duration::from_secs(30));
        assert!(cli.binary);
        assert!(cli.metrics_addr.is_none());
    }

    #[test]
    fn rejects_bad_durations() {
        assert!(Cli::try_parse_from(["hubframe", "--keep-alive", "soon"]).is_err());
    }
}
