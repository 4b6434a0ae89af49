use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Harvest academic content through a scraping proxy.
#[derive(Debug, Parser)]
#[command(name = "harvester", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// RON configuration file; built-in defaults when omitted
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    /// Log only to --log-file, not to stderr
    #[arg(short, long, global = true, requires = "log_file")]
    pub quiet: bool,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Resolve, fetch, classify and store one URL or DOI
    Harvest {
        /// Absolute http(s) URL or bare DOI
        target: String,

        /// Caller-side identifier stored with the record
        #[arg(long, requires = "namespace")]
        native_id: Option<String>,

        /// Namespace of --native-id
        #[arg(long, requires = "native_id")]
        namespace: Option<String>,
    },

    /// Resolve and fetch only; nothing is stored
    Fetch {
        /// Absolute http(s) URL or bare DOI
        target: String,
    },
}

#[cfg(test)]
mod tests {
    use super::{Cli, Command};
    use clap::{CommandFactory, Parser};

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn harvest_accepts_native_id_pair() {
        let cli = Cli::parse_from([
            "harvester",
            "-vv",
            "harvest",
            "10.1234/abc",
            "--native-id",
            "oai:1",
            "--namespace",
            "pmh",
        ]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Command::Harvest {
                target,
                native_id,
                namespace,
            } => {
                assert_eq!(target, "10.1234/abc");
                assert_eq!(native_id.as_deref(), Some("oai:1"));
                assert_eq!(namespace.as_deref(), Some("pmh"));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn native_id_without_namespace_is_rejected() {
        assert!(Cli::try_parse_from(["harvester", "harvest", "x", "--native-id", "1"]).is_err());
    }

    #[test]
    fn quiet_needs_a_log_file() {
        assert!(Cli::try_parse_from(["harvester", "-q", "fetch", "x"]).is_err());
        let cli =
            Cli::try_parse_from(["harvester", "fetch", "x", "-q", "--log-file", "h.log"]).unwrap();
        assert!(cli.quiet);
    }
}
