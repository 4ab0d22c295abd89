//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Backend-for-Frontend gateway: keeps OAuth tokens server-side and proxies
/// browser API calls with a bearer token
#[derive(Parser, Debug)]
#[command(name = "bff-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "BFF_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on
    #[arg(short, long, env = "BFF_GATEWAY_PORT")]
    pub port: Option<u16>,

    /// Host to bind to
    #[arg(long, env = "BFF_GATEWAY_HOST")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "BFF_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format
    #[arg(
        long,
        value_enum,
        default_value_t = LogFormat::Text,
        env = "BFF_GATEWAY_LOG_FORMAT",
        global = true
    )]
    pub log_format: LogFormat,

    /// Subcommand (optional - defaults to server mode)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per event
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Start the gateway server (default)
    Serve,

    /// Load and validate the configuration, print a summary, then exit
    CheckConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serve_mode() {
        let cli = Cli::try_parse_from(["bff-gateway"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "info");
        assert_eq!(cli.log_format, LogFormat::Text);
    }

    #[test]
    fn parses_overrides() {
        let cli = Cli::try_parse_from([
            "bff-gateway",
            "-c",
            "gateway.yaml",
            "-p",
            "9000",
            "--host",
            "0.0.0.0",
            "--log-format",
            "json",
            "serve",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("gateway.yaml")));
        assert_eq!(cli.port, Some(9000));
        assert_eq!(cli.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.command, Some(Command::Serve));
    }

    #[test]
    fn check_config_accepts_global_config_flag() {
        let cli =
            Cli::try_parse_from(["bff-gateway", "check-config", "--config", "x.yaml"]).unwrap();
        assert_eq!(cli.command, Some(Command::CheckConfig));
        assert_eq!(cli.config, Some(PathBuf::from("x.yaml")));
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["bff-gateway", "--log-format", "xml"]).is_err());
    }
}
