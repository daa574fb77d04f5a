//! Configuration for the tracker
//!
//! CLI arguments and environment variable handling using clap.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::time::Duration;

/// Default punch pair lifetime in milliseconds
pub const DEFAULT_PUNCH_TIMEOUT_MS: u64 = 5_000;

/// Default maximum frame size (1 MiB)
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Rendezvous tracker for interconnect daemons
#[derive(Parser, Debug, Clone)]
#[command(name = "tracker")]
#[command(about = "Rendezvous tracker: daemon sessions, connection readiness and NAT traversal assist")]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// TCP address daemons connect to
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:42042")]
    pub listen: SocketAddr,

    /// UDP address receiving address-discovery probes
    #[arg(long, env = "UDP_LISTEN", default_value = "0.0.0.0:42042")]
    pub udp_listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "tracker")]
    pub mongodb_db: String,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// Enable development mode (in-memory repositories when MongoDB is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    pub log_json: bool,

    /// Lifetime of a punch pair waiting for both UDP probes
    #[arg(long, env = "PUNCH_TIMEOUT_MS", default_value_t = DEFAULT_PUNCH_TIMEOUT_MS)]
    pub punch_timeout_ms: u64,

    /// How often expired punch pairs are swept
    #[arg(long, env = "PAIR_SWEEP_INTERVAL_MS", default_value = "1000")]
    pub pair_sweep_interval_ms: u64,

    /// Largest accepted frame in bytes
    #[arg(long, env = "MAX_FRAME_BYTES", default_value_t = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: usize,

    /// Lifetime of cached token lookups
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "300")]
    pub cache_ttl_secs: u64,

    /// Maximum simultaneously connected sessions
    #[arg(long, env = "MAX_CLIENTS", default_value = "32768")]
    pub max_clients: usize,

    /// Requests handled concurrently per session before reading pauses
    #[arg(long, env = "MAX_IN_FLIGHT", default_value = "32")]
    pub max_in_flight: usize,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the TCP and UDP listeners (default)
    Run,
    /// Apply collection indexes to MongoDB
    CreateDb,
    /// Drop every cached lookup on all tracker instances
    ClearCache,
}

/// NATS connection configuration
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl Args {
    /// Subcommand to execute, `run` when none was given
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }

    pub fn punch_timeout(&self) -> Duration {
        Duration::from_millis(self.punch_timeout_ms)
    }

    pub fn pair_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.pair_sweep_interval_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.punch_timeout_ms == 0 {
            return Err("PUNCH_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.pair_sweep_interval_ms == 0 {
            return Err("PAIR_SWEEP_INTERVAL_MS must be greater than zero".to_string());
        }

        if self.max_frame_bytes < 64 {
            return Err("MAX_FRAME_BYTES must be at least 64".to_string());
        }

        if self.max_clients == 0 {
            return Err("MAX_CLIENTS must be greater than zero".to_string());
        }

        if self.max_in_flight == 0 {
            return Err("MAX_IN_FLIGHT must be greater than zero".to_string());
        }

        if self.nats.nats_user.is_some() != self.nats.nats_password.is_some() {
            return Err("NATS_USER and NATS_PASSWORD must be set together".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["tracker"];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_defaults_validate() {
        let args = parse(&[]);
        assert!(args.validate().is_ok());
        assert_eq!(args.command(), Command::Run);
        assert_eq!(args.punch_timeout(), Duration::from_millis(DEFAULT_PUNCH_TIMEOUT_MS));
    }

    #[test]
    fn test_subcommand_parsed() {
        let args = parse(&["create-db"]);
        assert_eq!(args.command(), Command::CreateDb);
    }

    #[test]
    fn test_zero_punch_timeout_rejected() {
        let args = parse(&["--punch-timeout-ms", "0"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_zero_in_flight_rejected() {
        let args = parse(&["--max-in-flight", "0"]);
        assert!(args.validate().is_err());
        assert_eq!(parse(&[]).max_in_flight, 32);
    }

    #[test]
    fn test_nats_credentials_must_pair() {
        let args = parse(&["--nats-user", "tracker"]);
        assert!(args.validate().is_err());
    }
}
