//! CLI argument parsing via clap.

use clap::{Parser, Subcommand};

/// Local, always-on background daemon for tamper-evident AI session logging.
#[derive(Debug, Parser)]
#[command(name = "useaid", version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Root directory for daemon state (default: ~/.useai).
    #[arg(long = "root", global = true)]
    pub root: Option<String>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the daemon in the foreground (default when no subcommand given).
    Serve {
        /// Override the bind port (overrides config.json and USEAID_PORT).
        #[arg(long)]
        port: Option<u16>,
    },
    /// Query the local daemon's health endpoint and print a summary.
    Status,
    /// Regenerate the signing keypair.
    Keygen {
        /// Overwrite an existing keypair instead of reusing it.
        #[arg(long)]
        reset: bool,
    },
    /// Run startup preflight checks and report the result.
    Doctor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_parses_as_none() {
        let args = Args::parse_from(["useaid"]);
        assert!(args.command.is_none());
    }

    #[test]
    fn serve_parses_optional_port() {
        let args = Args::parse_from(["useaid", "serve", "--port", "9000"]);
        match args.command {
            Some(Command::Serve { port }) => assert_eq!(port, Some(9000)),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn keygen_reset_flag_parses() {
        let args = Args::parse_from(["useaid", "keygen", "--reset"]);
        match args.command {
            Some(Command::Keygen { reset }) => assert!(reset),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn global_root_flag_applies_before_subcommand() {
        let args = Args::parse_from(["useaid", "--root", "/tmp/useai-test", "status"]);
        assert_eq!(args.root.as_deref(), Some("/tmp/useai-test"));
    }
}
