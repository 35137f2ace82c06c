//! nbexec
//!
//! Command-line harness for running cells against one interpreter session.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use nbexec::{Config, ExecutionResult, Language, Notebook};
use serde::Serialize;

/// nbexec - run code cells against a persistent interpreter session.
#[derive(Parser, Debug)]
#[command(name = "nbexec")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Run files as cells, in order, on one session
    Run {
        /// Cell files
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,

        /// Language of every cell (default: from the file extension)
        #[arg(long, short)]
        language: Option<Language>,

        /// Per-cell timeout in seconds (default: from configuration)
        #[arg(long, short)]
        timeout: Option<f64>,

        /// Print results as JSON lines
        #[arg(long)]
        json: bool,
    },

    /// Start a session, report the backend, and stop it
    Check,

    /// Print the effective configuration
    Config {
        /// Print the built-in defaults instead
        #[arg(long)]
        default: bool,
    },
}

/// One cell's result as printed with `--json`.
#[derive(Serialize)]
struct CellReport<'a> {
    file: &'a Path,
    #[serde(flatten)]
    result: &'a ExecutionResult,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if let Some(config_path) = &cli.config {
        Config::load(config_path)?
    } else {
        Config::load_default()?
    };
    config.apply_env_overrides();

    // Initialize tracing
    let filter = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.log_level.clone())
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Some(config_path) = &cli.config {
        tracing::debug!("Using config file: {:?}", config_path);
    }

    match cli.command {
        Commands::Run {
            files,
            language,
            timeout,
            json,
        } => {
            config.validate()?;
            let timeout = timeout.map(parse_timeout).transpose()?;
            let all_ok = run_files(&config, &files, language, timeout, json).await?;
            if !all_ok {
                std::process::exit(1);
            }
        }
        Commands::Check => {
            config.validate()?;
            let notebook = Notebook::new(&config);
            notebook
                .ensure()
                .await
                .context("Failed to start interpreter session")?;
            let version = notebook
                .run(
                    "import sys; print(sys.version.split()[0])",
                    Language::Executable,
                    Some(config.kernel.startup_timeout()),
                )
                .await?;

            println!("Interpreter: {}", config.kernel.program);
            println!("  PID:     {}", notebook.pid().unwrap_or(0));
            println!("  Version: {}", version.output.trim());
            notebook.terminate().await;
        }
        Commands::Config { default } => {
            let shown = if default { Config::default() } else { config };
            print!("{}", shown.to_toml()?);
        }
    }

    Ok(())
}

fn parse_timeout(secs: f64) -> anyhow::Result<Duration> {
    if !secs.is_finite() || secs <= 0.0 {
        anyhow::bail!("--timeout must be a positive number of seconds, got {}", secs);
    }
    Ok(Duration::from_secs_f64(secs))
}

/// Run every file as a cell. Returns false if any cell failed.
async fn run_files(
    config: &Config,
    files: &[PathBuf],
    language: Option<Language>,
    timeout: Option<Duration>,
    json: bool,
) -> anyhow::Result<bool> {
    let notebook = Notebook::new(config);
    let mut all_ok = true;

    for file in files {
        let code = std::fs::read_to_string(file)
            .with_context(|| format!("Failed to read cell file: {}", file.display()))?;
        let language = language.unwrap_or_else(|| {
            Language::from_extension(
                file.extension()
                    .and_then(|ext| ext.to_str())
                    .unwrap_or_default(),
            )
        });

        let result = match notebook.run(&code, language, timeout).await {
            Ok(result) => result,
            Err(e) => {
                notebook.terminate().await;
                return Err(e).context("Failed to start interpreter session");
            }
        };
        all_ok &= result.success;

        if json {
            let report = CellReport {
                file,
                result: &result,
            };
            println!("{}", serde_json::to_string(&report)?);
        } else {
            print!("{}", result.output);
            if !result.output.is_empty() && !result.output.ends_with('\n') {
                println!();
            }
            if !result.success {
                eprintln!("[{}] failed", file.display());
            }
        }
    }

    notebook.terminate().await;
    Ok(all_ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::try_parse_from(["nbexec", "run", "a.py", "b.md"]).unwrap();
        match cli.command {
            Commands::Run {
                files,
                language,
                timeout,
                json,
            } => {
                assert_eq!(files, vec![PathBuf::from("a.py"), PathBuf::from("b.md")]);
                assert_eq!(language, None);
                assert_eq!(timeout, None);
                assert!(!json);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_with_options() {
        let cli = Cli::try_parse_from([
            "nbexec",
            "run",
            "--language",
            "markdown",
            "--timeout",
            "2.5",
            "--json",
            "notes.txt",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                language,
                timeout,
                json,
                ..
            } => {
                assert_eq!(language, Some(Language::Passthrough));
                assert_eq!(timeout, Some(2.5));
                assert!(json);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_run_rejects_unknown_language() {
        let result = Cli::try_parse_from(["nbexec", "run", "--language", "bash", "a.sh"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_run_requires_files() {
        assert!(Cli::try_parse_from(["nbexec", "run"]).is_err());
    }

    #[test]
    fn test_check_command() {
        let cli = Cli::try_parse_from(["nbexec", "check"]).unwrap();
        assert!(matches!(cli.command, Commands::Check));
    }

    #[test]
    fn test_config_command() {
        let cli = Cli::try_parse_from(["nbexec", "config", "--default"]).unwrap();
        assert!(matches!(cli.command, Commands::Config { default: true }));
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["nbexec", "--verbose", "-c", "/tmp/x.toml", "check"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/x.toml")));
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(1.5).unwrap(), Duration::from_millis(1500));
        assert!(parse_timeout(0.0).is_err());
        assert!(parse_timeout(-3.0).is_err());
        assert!(parse_timeout(f64::NAN).is_err());
    }
}
