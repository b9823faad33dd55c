//! Command-line interface for the telemetry relay.
//!
//! Every option overrides the corresponding setting from the configuration file.

use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the telemetry relay.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "WebSocket hub relaying device telemetry to peers and a backend", long_about = None)]
pub struct CliArgs {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration will be created.
    #[arg(short, long = "config", default_value = "config.toml")]
    pub config_path: PathBuf,

    /// Bind address override (e.g., 0.0.0.0:8080)
    #[arg(short, long = "bind")]
    pub bind_address: Option<String>,

    /// Backend ingest URL override
    #[arg(long)]
    pub backend_url: Option<String>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let args = CliArgs::parse_from(["telemetry_relay"]);
        assert_eq!(args.config_path, PathBuf::from("config.toml"));
        assert!(args.bind_address.is_none());
        assert!(args.backend_url.is_none());
        assert!(args.log_level.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn test_cli_overrides() {
        let args = CliArgs::parse_from([
            "telemetry_relay",
            "-c",
            "relay.toml",
            "-b",
            "127.0.0.1:9000",
            "--backend-url",
            "http://10.0.0.5:5000/api/esp32/data",
            "-l",
            "debug",
            "--json-logs",
        ]);

        assert_eq!(args.config_path, PathBuf::from("relay.toml"));
        assert_eq!(args.bind_address.as_deref(), Some("127.0.0.1:9000"));
        assert_eq!(args.backend_url.as_deref(), Some("http://10.0.0.5:5000/api/esp32/data"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }
}
