//! dh - dynamic HTML template server
//!
//! CLI entry point for serving, rendering and inspecting template modules.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::info;

use dynhtml::cli::{Cli, Command, OutputFormat, get_log_path};
use dynhtml::config::Config;
use dynhtml::server;

fn setup_logging(cli_level: Option<&str>, config_level: Option<&str>, log_stderr: bool) -> Result<()> {
    // Command line beats config file beats INFO
    let level = match cli_level.or(config_level) {
        Some(level) => tracing::Level::from_str(level).map_err(|_| eyre::eyre!("Invalid log level: {}", level))?,
        None => tracing::Level::INFO,
    };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into());

    if log_stderr {
        tracing_subscriber::fmt()
            .with_writer(io::stderr)
            .with_env_filter(filter)
            .init();
    } else {
        let log_path = get_log_path();
        let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));
        fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

        // Write to log file, not stdout/stderr
        let log_file = fs::File::create(&log_path).context("Failed to create log file")?;
        tracing_subscriber::fmt()
            .with_writer(log_file)
            .with_ansi(false)
            .with_env_filter(filter)
            .init();
    }

    info!("Logging initialized (level: {})", level);
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    if !cli.root.is_empty() {
        config.roots = cli.root.iter().map(|root| root.display().to_string()).collect();
    }

    // Setup logging
    setup_logging(cli.log_level.as_deref(), config.log_level.as_deref(), cli.log_stderr)
        .context("Failed to setup logging")?;

    info!("dh loaded config: roots={:?}", config.roots);

    // Dispatch command
    match cli.command {
        Command::Serve { listen, no_watch } => {
            if let Some(listen) = listen {
                config.server.listen = listen;
            }
            if no_watch {
                config.watch.enabled = false;
            }
            server::run(&config)
        }
        Command::Render { uri, body } => cmd_render(&config, &uri, body),
        Command::Modules { format } => cmd_modules(&config, format),
    }
}

fn cmd_render(config: &Config, uri: &str, body_only: bool) -> Result<()> {
    let engine = config.engine_builder().build().context("Failed to start engine")?;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut in_headers = body_only;
    for chunk in engine.handle_uri(uri) {
        let chunk = if in_headers {
            match chunk.split_once("\r\n\r\n") {
                Some((_, rest)) => {
                    in_headers = false;
                    rest.to_string()
                }
                None => continue,
            }
        } else {
            chunk
        };
        out.write_all(chunk.as_bytes()).context("Failed to write output")?;
    }
    out.flush().context("Failed to flush output")?;
    Ok(())
}

fn cmd_modules(config: &Config, format: OutputFormat) -> Result<()> {
    let engine = config.engine_builder().build().context("Failed to start engine")?;
    let modules: Vec<_> = engine
        .module_names()
        .iter()
        .filter_map(|name| engine.get_module(name))
        .collect();

    match format {
        OutputFormat::Text => {
            for module in &modules {
                let path = module.path().map(|p| p.display().to_string()).unwrap_or_default();
                if module.is_degraded() {
                    println!("{} {} {}", module.name().bold(), path.dimmed(), "(failed to load)".red());
                } else {
                    println!("{} {}", module.name().bold(), path.dimmed());
                }
            }
            println!("{} module(s)", modules.len().to_string().green());
        }
        OutputFormat::Json => {
            let listing: Vec<_> = modules
                .iter()
                .map(|module| {
                    serde_json::json!({
                        "name": module.name(),
                        "path": module.path().map(|p| p.display().to_string()),
                        "degraded": module.is_degraded(),
                        "names": module.names(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&listing)?);
        }
    }
    Ok(())
}
