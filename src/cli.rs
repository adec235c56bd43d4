use crate::config::types::SandboxConfig;
use crate::config::validator::inspect_config;
use crate::exec::executor::{ExecutionResult, RequestExecutor};
use crate::exec::request::ExecutionRequest;
use crate::safety::cleanup::TempDirBaseline;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about = "Run untrusted ruby code in a jail", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute code once and print its output
    Run {
        /// Ruby version (1.8.6, 1.8.7, 1.9.1, 1.9.2, 1.9.3)
        #[arg(long = "version", value_name = "VERSION")]
        runtime: Option<String>,
        /// Source code as string
        #[arg(long, conflicts_with = "file")]
        code: Option<String>,
        /// Read source code from a file
        #[arg(long)]
        file: Option<PathBuf>,
        /// Name shown instead of the script path in output
        #[arg(long)]
        name: Option<String>,
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print a JSON object instead of raw output
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration after validation
    Config {
        /// Configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

pub fn run() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            runtime,
            code,
            file,
            name,
            config,
            json,
        } => {
            let code = match (code, file) {
                (Some(code), _) => Some(code),
                (None, Some(path)) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?,
                ),
                (None, None) => None,
            };

            let request =
                ExecutionRequest::from_params(code.as_deref(), runtime.as_deref(), name.as_deref())?;
            let config = SandboxConfig::load_or_default(config.as_deref())?;

            let result = match request {
                Some(request) => execute_once(config, &request)?,
                None => ExecutionResult::empty(),
            };
            print_result(&result, json)?;

            if !result.is_success() {
                std::process::exit(1);
            }
        }
        Commands::Config { config } => {
            let config = SandboxConfig::load_or_default(config.as_deref())?;
            let validation = inspect_config(&config);

            let report = serde_json::json!({
                "config": config,
                "valid": validation.is_valid(),
                "errors": validation.errors,
                "warnings": validation.warnings,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);

            if !validation.is_valid() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn execute_once(config: SandboxConfig, request: &ExecutionRequest) -> Result<ExecutionResult> {
    let baseline = match TempDirBaseline::capture(&config.jail_temp) {
        Ok(baseline) => Some(baseline),
        Err(e) => {
            log::warn!("Temp baseline unavailable: {}", e);
            None
        }
    };

    let executor = RequestExecutor::new(config).context("Failed to initialize executor")?;
    let result = executor.execute(request);

    if let Some(baseline) = baseline {
        // verify() logs the residue itself.
        let _ = baseline.verify();
    }
    Ok(result)
}

fn print_result(result: &ExecutionResult, json: bool) -> Result<()> {
    if json {
        let report = serde_json::json!({
            "output": result.output_lossy(),
            "truncated": result.truncated,
            "error": result.error,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(&result.output)?;
        if !result.is_success() {
            writeln!(stdout)?;
        }
        stdout.flush()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_with_version_flag() {
        let cli = Cli::try_parse_from([
            "jailrun", "run", "--version", "1.9.3", "--code", "puts 1", "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                runtime, code, json, ..
            } => {
                assert_eq!(runtime.as_deref(), Some("1.9.3"));
                assert_eq!(code.as_deref(), Some("puts 1"));
                assert!(json);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn code_and_file_conflict() {
        let parsed = Cli::try_parse_from([
            "jailrun", "run", "--version", "1.9.3", "--code", "x", "--file", "a.rb",
        ]);
        assert!(parsed.is_err());
    }
}
