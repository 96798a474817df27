//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Log file location under the platform data directory
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dynhtml")
        .join("logs")
        .join("dynhtml.log")
}

/// dh - dynamic HTML template server
#[derive(Parser)]
#[command(
    name = "dh",
    about = "Serve and render live-reloading HTML template modules",
    version = env!("GIT_DESCRIBE"),
    after_help = "Logs are written to: ~/.local/share/dynhtml/logs/dynhtml.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Template root; repeat for several (overrides the config file)
    #[arg(short, long, global = true, value_name = "DIR")]
    pub root: Vec<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Log to stderr instead of the log file
    #[arg(long, global = true)]
    pub log_stderr: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Serve templates over HTTP until interrupted
    Serve {
        /// Address to listen on (overrides the config file)
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,

        /// Do not reload templates when files change
        #[arg(long)]
        no_watch: bool,
    },

    /// Render one request and print the full response
    Render {
        /// Request URI, e.g. /page?name=value
        #[arg(value_name = "URI")]
        uri: String,

        /// Print only the body, without status line and headers
        #[arg(short, long)]
        body: bool,
    },

    /// List loaded template modules
    Modules {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for the modules command
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_serve() {
        let cli = Cli::parse_from(["dh", "serve"]);
        assert!(matches!(
            cli.command,
            Command::Serve {
                listen: None,
                no_watch: false
            }
        ));
    }

    #[test]
    fn test_cli_parse_serve_listen() {
        let cli = Cli::parse_from(["dh", "serve", "--listen", "0.0.0.0:9000", "--no-watch"]);
        if let Command::Serve { listen, no_watch } = cli.command {
            assert_eq!(listen.as_deref(), Some("0.0.0.0:9000"));
            assert!(no_watch);
        } else {
            panic!("Expected Serve command");
        }
    }

    #[test]
    fn test_cli_parse_render() {
        let cli = Cli::parse_from(["dh", "render", "/page?a=1", "--body"]);
        if let Command::Render { uri, body } = cli.command {
            assert_eq!(uri, "/page?a=1");
            assert!(body);
        } else {
            panic!("Expected Render command");
        }
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::parse_from([
            "dh",
            "-c",
            "/path/to/dynhtml.yml",
            "modules",
            "--root",
            "a",
            "--root",
            "b",
            "--log-level",
            "debug",
            "--log-stderr",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/dynhtml.yml")));
        assert_eq!(cli.root, vec![PathBuf::from("a"), PathBuf::from("b")]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(cli.log_stderr);
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!(matches!("json".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_log_path_is_under_dynhtml() {
        assert!(get_log_path().ends_with("dynhtml/logs/dynhtml.log"));
    }
}
