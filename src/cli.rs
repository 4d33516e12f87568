use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "leaselock", version, about, long_about = None)]
pub struct Cli {
    /// SQLite database holding the shared lock table
    #[arg(long, value_parser, env = "LEASELOCK_DB")]
    pub db: PathBuf,

    /// JSON file with lock settings (durations in milliseconds)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Verbose mode (-v, -vv, -vvv)
    #[arg(short, action = ArgAction::Count)]
    pub verbosity: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Runs a program while holding a lock
    /// Exits 75 when the lock could not be obtained
    Run {
        id: String,
        /// Give up waiting after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Lease length written into the lock row
        #[arg(long)]
        lease_ms: Option<u64>,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        program: Vec<String>,
    },
    /// Makes a single acquisition attempt; the lock lives until its lease ends
    Try {
        id: String,
        #[arg(long)]
        lease_ms: Option<u64>,
    },
    /// Deletes a lock row regardless of who holds it
    Release { id: String },
    /// Lists every row in the lock table
    #[command(alias = "ls")]
    Status,
    /// Purges expired rows
    Gc,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_collects_trailing_program() {
        let cli = Cli::try_parse_from([
            "leaselock", "--db", "/tmp/locks.db", "run", "nightly", "--timeout-ms", "500", "--",
            "echo", "-n", "hi",
        ])
        .unwrap();

        match cli.command {
            Commands::Run {
                id,
                timeout_ms,
                lease_ms,
                program,
            } => {
                assert_eq!(id, "nightly");
                assert_eq!(timeout_ms, Some(500));
                assert_eq!(lease_ms, None);
                assert_eq!(program, ["echo", "-n", "hi"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_verbosity_counts() {
        let cli = Cli::try_parse_from(["leaselock", "--db", "x.db", "-vv", "ls"]).unwrap();
        assert_eq!(cli.verbosity, 2);
        assert!(matches!(cli.command, Commands::Status));
    }
}
