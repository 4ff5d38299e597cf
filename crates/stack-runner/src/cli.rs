//! Command-line arguments.

use clap::{Parser, Subcommand};
use env_harness::suites::Suite;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "stack-runner")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(
    about = "Bring up the compose stack, check one service, tear everything down",
    long_about = None
)]
pub struct Cli {
    /// Also write the session report as JSON to this path
    #[arg(long, global = true, value_name = "PATH")]
    pub report: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Check platform-registration-service
    Registration {
        /// Image tag or commit SHA (default: $REGISTRATION_VERSION, then `latest`)
        version: Option<String>,
    },

    /// Check connector-admin (gated after platform-registration-service)
    ConnectorAdmin {
        /// Image tag or commit SHA (default: $CONNECTOR_ADMIN_VERSION, then `latest`)
        version: Option<String>,
    },
}

impl Command {
    /// The suite to run and the positional version selector, if any.
    pub fn suite(&self) -> (Suite, Option<&str>) {
        match self {
            Command::Registration { version } => (Suite::Registration, version.as_deref()),
            Command::ConnectorAdmin { version } => (Suite::ConnectorAdmin, version.as_deref()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_without_version() {
        let cli = Cli::try_parse_from(["stack-runner", "registration"]).unwrap();
        assert_eq!(cli.command.suite(), (Suite::Registration, None));
        assert!(cli.report.is_none());
    }

    #[test]
    fn test_connector_admin_with_sha_and_report() {
        let cli = Cli::try_parse_from([
            "stack-runner",
            "connector-admin",
            "3f9c2ab",
            "--report",
            "out/report.json",
        ])
        .unwrap();
        assert_eq!(cli.command.suite(), (Suite::ConnectorAdmin, Some("3f9c2ab")));
        assert_eq!(cli.report, Some(PathBuf::from("out/report.json")));
    }

    #[test]
    fn test_unknown_subcommand_rejected() {
        assert!(Cli::try_parse_from(["stack-runner", "opensearch"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
