//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Consolidate and verify per-tenant folder trees
///
/// Works through every configured tenant under a shared API rate ceiling.
#[derive(Parser, Debug)]
#[command(name = "reshelf")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (overrides RESHELF_CONFIG and the default location)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Move every root folder of each tenant under the top folder
    Reorganize(RunArgs),

    /// Check that every tenant has the reorganized shape (read-only)
    Verify(RunArgs),

    /// Test tenant management (provision, delete, discover)
    Fixtures(FixturesCommand),

    /// Show or locate the configuration
    Config(ConfigCommand),

    /// Show version
    Version,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Print the run report as JSON instead of a summary
    #[arg(short, long)]
    pub json: bool,

    /// Only process these tenant ids (defaults to the configured list)
    #[arg(short, long = "tenant", value_name = "ID")]
    pub tenants: Vec<String>,

    /// Calls per second (overrides config)
    #[arg(long, value_name = "N")]
    pub rate_limit: Option<u32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixture Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct FixturesCommand {
    #[command(subcommand)]
    pub action: FixturesAction,
}

#[derive(Subcommand, Debug)]
pub enum FixturesAction {
    /// Create test tenants, a search tenant, and granted root folders
    Provision {
        /// Number of tenants to create (overrides config)
        #[arg(short, long)]
        tenants: Option<usize>,

        /// Root folders per tenant (overrides config)
        #[arg(short, long)]
        folders: Option<usize>,
    },

    /// Delete every tenant listed in the ids file
    Delete {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Find existing test tenants and rewrite the ids file
    Discover,
}

// ─────────────────────────────────────────────────────────────────────────────
// Config Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration (token redacted)
    Show,

    /// Print the config file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_verify_flags() {
        let cli = Cli::parse_from(["reshelf", "verify", "--json", "-t", "11", "-t", "12"]);
        match cli.command {
            Commands::Verify(args) => {
                assert!(args.json);
                assert_eq!(args.tenants, vec!["11", "12"]);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "reshelf",
            "reorganize",
            "--config",
            "/tmp/r.toml",
            "--json-logs",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/r.toml")));
        assert!(cli.json_logs);
    }

    #[test]
    fn test_fixture_delete_yes_flag() {
        let cli = Cli::parse_from(["reshelf", "fixtures", "delete", "--yes"]);
        assert!(matches!(
            cli.command,
            Commands::Fixtures(FixturesCommand {
                action: FixturesAction::Delete { yes: true }
            })
        ));
    }
}
