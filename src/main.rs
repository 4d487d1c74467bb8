// ABOUTME: Entry point for the tether CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use clap::Parser;
use cli::{Cli, Commands, Target, TrustCommands};
use std::env;
use std::io::Write;
use std::path::Path;
use tether::config::Config;
use tether::error::{Error, Result};
use tether::output::{Output, OutputMode};
use tether::ssh::{ExecOptions, HostTrustStore, Session, SessionConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let mut output = Output::new(mode);
    output.start_timer();

    let code = match run(cli, &output).await {
        Ok(code) => code,
        Err(e) => {
            output.error(&e.to_string());
            1
        }
    };
    let _ = std::io::stdout().flush();
    std::process::exit(code);
}

/// Run the command; the returned code is the process exit status.
async fn run(cli: Cli, output: &Output) -> Result<i32> {
    match cli.command {
        Commands::Exec { target, command } => {
            let config = load_config(cli.config.as_deref())?;
            let mut session = Session::new(session_config(&config, &target)?);
            let command = command.join(" ");

            let options = match output.mode() {
                OutputMode::Normal => ExecOptions::echo(),
                OutputMode::Quiet | OutputMode::Json => ExecOptions::capture(),
            };
            let result = async {
                session.connect().await?;
                session.execute(&command, options).await
            }
            .await;
            session.close().await;
            let result = result?;

            if let Some(stdout) = &result.stdout {
                match output.mode() {
                    OutputMode::Json => output.success(stdout),
                    _ => print!("{stdout}"),
                }
            }
            if !result.text_complete {
                eprintln!("Warning: output was not valid text and was cut short");
            }
            Ok(result.exit_status.map_or(0, |code| code.min(255) as i32))
        }
        Commands::Push {
            target,
            local,
            remote,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let mut session = Session::new(session_config(&config, &target)?);
            output.progress(&format!("Pushing {} to {}...", local.display(), remote));

            let result = async {
                session.connect().await?;
                session.push(&local, &remote).await
            }
            .await;
            session.close().await;

            output.transfer("Pushed", &result?);
            Ok(0)
        }
        Commands::Pull {
            target,
            remote,
            local,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let mut session = Session::new(session_config(&config, &target)?);
            output.progress(&format!("Pulling {} to {}...", remote, local.display()));

            let result = async {
                session.connect().await?;
                session.pull(&remote, &local).await
            }
            .await;
            session.close().await;

            output.transfer("Pulled", &result?);
            Ok(0)
        }
        Commands::Trust {
            command:
                TrustCommands::Forget {
                    host,
                    port,
                    known_hosts,
                },
        } => {
            let path = match known_hosts.or_else(HostTrustStore::default_path) {
                Some(path) => path,
                None => {
                    return Err(Error::InvalidConfig(
                        "cannot locate trust file: HOME is not set".to_string(),
                    ));
                }
            };
            let store = HostTrustStore::new(path, false);
            let removed = store.forget(&HostTrustStore::host_id(&host, port)).await?;
            output.success(&format!("Removed {removed} record(s) for {host}"));
            Ok(0)
        }
    }
}

/// Explicit config file, else discovery in the current directory, else an empty inventory.
fn load_config(path: Option<&Path>) -> Result<Config> {
    if let Some(path) = path {
        return Config::load(path);
    }
    let cwd = env::current_dir()?;
    match Config::discover(&cwd) {
        Ok(config) => Ok(config),
        Err(Error::ConfigNotFound(_)) => Ok(Config::default()),
        Err(e) => Err(e),
    }
}

fn session_config(config: &Config, target: &Target) -> Result<SessionConfig> {
    let host = config.resolve(&target.target)?;
    let mut session = config.session_config(&host)?;
    if target.auto_trust {
        session = session.auto_trust(true);
    }
    if let Some(identity) = &target.identity {
        session.identities = vec![identity.clone()];
    }
    if let Some(var) = &target.password_env {
        let password = env::var(var).map_err(|_| Error::MissingEnvVar(var.clone()))?;
        session = session.password(password);
    }
    Ok(session)
}
