//! BFF Gateway - keeps OAuth tokens server-side and proxies SPA API calls.

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use bff_gateway::{
    cli::{Cli, Command},
    config::Config,
    gateway::Gateway,
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Setup tracing
    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match cli.command {
        Some(Command::CheckConfig) => check_config(&cli),
        Some(Command::Serve) | None => run_server(&cli).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> Option<Config> {
    match Config::load(cli.config.as_deref()) {
        Ok(mut config) => {
            if let Some(port) = cli.port {
                config.server.port = port;
            }
            if let Some(ref host) = cli.host {
                config.server.host = host.clone();
            }
            Some(config)
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            None
        }
    }
}

/// Validate configuration and print a summary
fn check_config(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    match config.resolve() {
        Ok(resolved) => {
            println!("✅ Configuration is valid\n");
            println!("  Listen:        {}:{}", config.server.host, config.server.port);
            println!("  Provider:      {}", resolved.auth_server);
            println!("  Client ID:     {}", resolved.client_id);
            println!("  Scope:         {}", resolved.scope);
            println!("  Redirect URI:  {}", resolved.redirect_uri);
            println!("  Success URI:   {}", resolved.success_uri);
            println!(
                "  ID token:      {}",
                if resolved.verify_id_token {
                    format!("verified ({})", resolved.jwks_uri)
                } else {
                    "decoded without verification".to_string()
                }
            );
            println!("  Services:      {}", resolved.services.len());
            for route in resolved.services.routes() {
                println!("    {} -> {}", route.prefix, route.url);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

/// Run the gateway server
async fn run_server(cli: &Cli) -> ExitCode {
    let Some(config) = load_config(cli) else {
        return ExitCode::FAILURE;
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        services = config.services.len(),
        "Starting BFF Gateway"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create gateway: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Run with graceful shutdown
    if let Err(e) = gateway.run().await {
        error!("Gateway error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Gateway shutdown complete");
    ExitCode::SUCCESS
}
