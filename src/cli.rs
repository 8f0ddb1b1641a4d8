//! CLI argument parsing for the salescrm-worker binary.

use clap::{Parser, Subcommand};

use crate::services::automations::AutomationTarget;

#[derive(Parser)]
#[command(name = "salescrm-worker", about = "Sales CRM messaging and automation worker")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server (default if no subcommand given)
    Serve,
    /// Run database migrations and exit
    Migrate,
    /// Run automation sweeps once and print the summary
    RunAutomation {
        #[arg(long, value_enum, default_value = "all")]
        target: AutomationTarget,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_migrate_command_parses() {
        let cli = Cli::parse_from(["salescrm-worker", "migrate"]);
        assert!(matches!(cli.command, Some(Command::Migrate)));
    }

    #[test]
    fn test_cli_no_command_defaults_to_none() {
        let cli = Cli::parse_from(["salescrm-worker"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_run_automation_target() {
        let cli = Cli::parse_from(["salescrm-worker", "run-automation", "--target", "sla-close"]);
        assert!(matches!(
            cli.command,
            Some(Command::RunAutomation {
                target: AutomationTarget::SlaClose
            })
        ));
    }

    #[test]
    fn test_cli_run_automation_defaults_to_all() {
        let cli = Cli::parse_from(["salescrm-worker", "run-automation"]);
        assert!(matches!(
            cli.command,
            Some(Command::RunAutomation {
                target: AutomationTarget::All
            })
        ));
    }

    #[test]
    fn test_cli_rejects_unknown_target() {
        let result = Cli::try_parse_from(["salescrm-worker", "run-automation", "--target", "weekly"]);
        assert!(result.is_err());
    }
}
