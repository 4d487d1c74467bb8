// ABOUTME: Command-line interface definition using clap derive macros.
// ABOUTME: Defines all subcommands and their arguments.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Run commands on and copy trees to or from remote hosts over SSH")]
#[command(version)]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only print final results
    #[arg(short, long, global = true, conflicts_with = "json")]
    pub quiet: bool,

    /// Print JSON lines instead of text
    #[arg(long, global = true)]
    pub json: bool,

    /// Host inventory file (default: tether.yml in the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// How to reach a host.
#[derive(Args)]
pub struct Target {
    /// Inventory host name, or [user@]host[:port]
    pub target: String,

    /// Accept an unknown host key without asking
    #[arg(long)]
    pub auto_trust: bool,

    /// Private key file to authenticate with
    #[arg(short, long)]
    pub identity: Option<PathBuf>,

    /// Read the password from this environment variable
    #[arg(long, value_name = "VAR")]
    pub password_env: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command on a remote host
    Exec {
        #[command(flatten)]
        target: Target,

        /// Command to run
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },

    /// Copy a local file or directory tree to a remote host
    Push {
        #[command(flatten)]
        target: Target,

        /// Local file or directory
        local: PathBuf,

        /// Remote destination (trailing / copies into that directory)
        remote: String,
    },

    /// Copy a remote file or directory tree to this machine
    Pull {
        #[command(flatten)]
        target: Target,

        /// Remote file or directory
        remote: String,

        /// Local destination
        local: PathBuf,
    },

    /// Manage recorded host identities
    Trust {
        #[command(subcommand)]
        command: TrustCommands,
    },
}

#[derive(Subcommand)]
pub enum TrustCommands {
    /// Remove every recorded key for a host
    Forget {
        /// Host name as connected to
        host: String,

        /// Port, when not 22
        #[arg(short, long, default_value_t = 22)]
        port: u16,

        /// Trust file (default: ~/.ssh/tether_known_hosts)
        #[arg(long)]
        known_hosts: Option<PathBuf>,
    },
}
