use std::env;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use wt_core::config::load_config;
use wtd::error::DaemonError;
use wtd::run_daemon;

const DEFAULT_CONFIG_PATH: &str = ".wt/config.yaml";

#[derive(Debug, Clone, PartialEq, Eq)]
enum CliCommand {
    Help(String),
    Run { config_path: PathBuf },
}

#[derive(Debug, thiserror::Error)]
enum MainError {
    #[error("{0}")]
    Usage(String),
    #[error(transparent)]
    Daemon(#[from] DaemonError),
}

fn main() {
    if let Err(err) = run() {
        eprintln!("wtd startup failed: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), MainError> {
    let mut argv = env::args();
    let program = argv.next().unwrap_or_else(|| "wtd".to_string());
    let command = parse_cli_args(argv.collect::<Vec<_>>(), &program)?;

    match command {
        CliCommand::Help(text) => {
            println!("{text}");
            Ok(())
        }
        CliCommand::Run { config_path } => {
            tracing_subscriber::fmt()
                .with_env_filter(
                    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
                )
                .init();

            let config = load_config(&config_path).map_err(DaemonError::from)?;
            let runtime = tokio::runtime::Runtime::new().map_err(|source| {
                MainError::Daemon(DaemonError::io("create tokio runtime", source))
            })?;
            runtime.block_on(run_daemon(config))?;
            Ok(())
        }
    }
}

fn parse_cli_args(args: Vec<String>, program: &str) -> Result<CliCommand, MainError> {
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    let mut iter = args.into_iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--help" | "-h" => return Ok(CliCommand::Help(usage(program))),
            "--config" => {
                let value = iter.next().ok_or_else(|| {
                    MainError::Usage(format!("--config requires a path\n\n{}", usage(program)))
                })?;
                config_path = PathBuf::from(value);
            }
            other => {
                return Err(MainError::Usage(format!(
                    "unrecognized argument {other:?}\n\n{}",
                    usage(program)
                )));
            }
        }
    }
    Ok(CliCommand::Run { config_path })
}

fn usage(program: &str) -> String {
    format!(
        "usage: {program} [--config <path>]\n\n\
         Runs the worktree daemon for one configured worktree root.\n\n\
         options:\n\
         \x20 --config <path>  config file to load (default: {DEFAULT_CONFIG_PATH})\n\
         \x20 --help           show this message"
    )
}
