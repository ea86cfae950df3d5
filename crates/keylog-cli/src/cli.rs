use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "keylog",
    about = "Inspect and edit keylog entry and index stores",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Data directory holding `entries/` and `indexes/`
    #[arg(short = 'd', long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// List every stored key
    Keys,
    /// Show one key's marker and chain
    Show(KeyArgs),
    /// Count stored keys and entries
    Count,
    /// Append a new entry to a key, creating the key if needed
    Append(AppendArgs),
    /// Set a key's marker, creating the key if needed
    Mark(MarkArgs),
    /// Drop the newest entry id from a key's chain
    Rollback(KeyArgs),
    /// Delete a key's index record
    Remove(KeyArgs),
    /// Print a stored entry by id
    Entry(EntryArgs),
    /// Check that a key's chain links and hashes are intact
    Verify(KeyArgs),
}

#[derive(Args)]
pub struct KeyArgs {
    pub key: String,
}

#[derive(Args)]
pub struct AppendArgs {
    pub key: String,
    #[arg(short, long)]
    pub payload: String,
    /// Milliseconds since the epoch; defaults to now
    #[arg(long)]
    pub timestamp: Option<u64>,
}

#[derive(Args)]
pub struct MarkArgs {
    pub key: String,
    pub marker: String,
}

#[derive(Args)]
pub struct EntryArgs {
    /// Entry id as 64 hex characters
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keys() {
        let cli = Cli::try_parse_from(["keylog", "keys"]).unwrap();
        assert!(matches!(cli.command, Command::Keys));
    }

    #[test]
    fn parse_append() {
        let cli = Cli::try_parse_from(["keylog", "append", "orders", "--payload", "hello"]).unwrap();
        if let Command::Append(args) = cli.command {
            assert_eq!(args.key, "orders");
            assert_eq!(args.payload, "hello");
            assert!(args.timestamp.is_none());
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_append_with_timestamp() {
        let cli = Cli::try_parse_from(["keylog", "append", "k", "-p", "x", "--timestamp", "42"]).unwrap();
        if let Command::Append(args) = cli.command {
            assert_eq!(args.timestamp, Some(42));
        } else { panic!("wrong command"); }
    }

    #[test]
    fn append_requires_payload() {
        assert!(Cli::try_parse_from(["keylog", "append", "k"]).is_err());
    }

    #[test]
    fn parse_mark() {
        let cli = Cli::try_parse_from(["keylog", "mark", "k", "offset-9"]).unwrap();
        if let Command::Mark(args) = cli.command {
            assert_eq!(args.key, "k");
            assert_eq!(args.marker, "offset-9");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_entry() {
        let cli = Cli::try_parse_from(["keylog", "entry", "ab12"]).unwrap();
        if let Command::Entry(args) = cli.command {
            assert_eq!(args.id, "ab12");
        } else { panic!("wrong command"); }
    }

    #[test]
    fn parse_global_flags() {
        let cli = Cli::try_parse_from([
            "keylog", "verify", "k", "--data-dir", "/tmp/kl", "--config", "kl.toml", "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/kl")));
        assert_eq!(cli.config, Some(PathBuf::from("kl.toml")));
        assert!(matches!(cli.command, Command::Verify(_)));
    }

    #[test]
    fn parse_json_format() {
        let cli = Cli::try_parse_from(["keylog", "--format", "json", "count"]).unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
    }
}
