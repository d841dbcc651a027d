//! Command-line arguments and resolved configuration.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use schemaguard_core::RunnerConfig;

use crate::error::Error;
use crate::formatter::OutputFormat;

/// Command-line arguments.
#[derive(Parser, Debug)]
#[command(name = "schemaguard")]
#[command(version, about = "Validated, transactional schema migrations")]
pub struct Args {
    /// Database URL (postgresql://... or a SQLite path).
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    pub database_url: Option<String>,

    /// Output format.
    #[arg(short, long, value_enum, default_value = "table", global = true)]
    pub format: OutputFormat,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Validate, apply and verify a migration plan.
    Apply {
        /// Plan file (JSON).
        plan: PathBuf,

        /// Skip post-commit verification.
        #[arg(long)]
        no_verify: bool,

        /// Run risky steps that carry no precondition.
        #[arg(long)]
        allow_unvalidated: bool,
    },

    /// Dry run: validate and rehearse a plan, then roll back.
    Check {
        /// Plan file (JSON).
        plan: PathBuf,

        /// Run risky steps that carry no precondition.
        #[arg(long)]
        allow_unvalidated: bool,
    },

    /// Show columns, indexes and constraints of tables.
    Inspect {
        /// Tables to inspect.
        #[arg(required = true)]
        tables: Vec<String>,
    },
}

/// What to do once configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Run a plan file.
    Apply(PathBuf),
    /// Inspect tables.
    Inspect(Vec<String>),
}

/// Resolved configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Normalized database URL.
    pub database_url: String,
    /// Output format.
    pub format: OutputFormat,
    /// Runner settings.
    pub runner: RunnerConfig,
    /// Requested action.
    pub action: Action,
}

impl Args {
    /// Resolve into a configuration.
    pub fn into_config(self) -> Result<Config, Error> {
        let database_url = self
            .database_url
            .as_deref()
            .map(normalize_url)
            .filter(|url| !url.is_empty())
            .ok_or(Error::MissingDatabaseUrl)?;

        let (runner, action) = match self.command {
            Command::Apply {
                plan,
                no_verify,
                allow_unvalidated,
            } => {
                let mut runner = RunnerConfig::new().with_require_preconditions(!allow_unvalidated);
                if no_verify {
                    runner = runner.without_verification();
                }
                (runner, Action::Apply(plan))
            }
            Command::Check {
                plan,
                allow_unvalidated,
            } => (
                RunnerConfig::new()
                    .with_require_preconditions(!allow_unvalidated)
                    .with_dry_run(true),
                Action::Apply(plan),
            ),
            Command::Inspect { tables } => (RunnerConfig::new(), Action::Inspect(tables)),
        };

        Ok(Config {
            database_url,
            format: self.format,
            runner,
            action,
        })
    }

    /// Default log filter for this invocation.
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "schemaguard_cli=debug,schemaguard_core=debug"
        } else {
            "schemaguard_cli=info,schemaguard_core=info"
        }
    }
}

/// Clean up a URL pasted from a `.env` file.
///
/// Strips whitespace and surrounding quotes, and drops the
/// `channel_binding` query parameter hosted PostgreSQL providers add, which
/// the driver does not understand. Other parameters are kept in order.
pub fn normalize_url(raw: &str) -> String {
    let url = raw
        .trim()
        .trim_matches(|c| c == '\'' || c == '"')
        .trim();

    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };

    let params: Vec<&str> = query
        .split('&')
        .filter(|param| !param.is_empty())
        .filter(|param| param.split('=').next() != Some("channel_binding"))
        .collect();

    if params.is_empty() {
        base.to_string()
    } else {
        format!("{}?{}", base, params.join("&"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("schemaguard").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_apply_config() {
        let config = parse(&["--database-url", "app.db", "apply", "plan.json"])
            .into_config()
            .unwrap();
        assert_eq!(config.database_url, "app.db");
        assert_eq!(config.format, OutputFormat::Table);
        assert_eq!(config.action, Action::Apply(PathBuf::from("plan.json")));
        assert!(config.runner.require_preconditions);
        assert!(config.runner.verify);
        assert!(!config.runner.dry_run);
    }

    #[test]
    fn test_apply_flags() {
        let config = parse(&[
            "apply",
            "plan.json",
            "--no-verify",
            "--allow-unvalidated",
            "--database-url",
            "app.db",
            "--format",
            "json",
        ])
        .into_config()
        .unwrap();
        assert_eq!(config.format, OutputFormat::Json);
        assert!(!config.runner.require_preconditions);
        assert!(!config.runner.verify);
    }

    #[test]
    fn test_check_is_dry_run() {
        let config = parse(&["--database-url", "app.db", "check", "plan.json"])
            .into_config()
            .unwrap();
        assert!(config.runner.dry_run);
        assert_eq!(config.action, Action::Apply(PathBuf::from("plan.json")));
    }

    #[test]
    fn test_inspect_requires_tables() {
        assert!(Args::try_parse_from(["schemaguard", "inspect"]).is_err());

        let config = parse(&["--database-url", "app.db", "inspect", "users_sync", "resumes"])
            .into_config()
            .unwrap();
        assert_eq!(
            config.action,
            Action::Inspect(vec!["users_sync".into(), "resumes".into()])
        );
    }

    #[test]
    fn test_missing_url() {
        let mut args = parse(&["apply", "plan.json"]);
        args.database_url = None;
        assert!(matches!(args.into_config(), Err(Error::MissingDatabaseUrl)));

        let mut args = parse(&["apply", "plan.json"]);
        args.database_url = Some("  ''  ".into());
        assert!(matches!(args.into_config(), Err(Error::MissingDatabaseUrl)));
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("  'app.db' "), "app.db");
        assert_eq!(
            normalize_url("\"postgresql://u:p@host/db\""),
            "postgresql://u:p@host/db"
        );
        assert_eq!(
            normalize_url("'postgresql://u:p@host/db?sslmode=require&channel_binding=require'"),
            "postgresql://u:p@host/db?sslmode=require"
        );
        assert_eq!(
            normalize_url("postgresql://u:p@host/db?sslmode=require"),
            "postgresql://u:p@host/db?sslmode=require"
        );
    }

    #[test]
    fn test_normalize_url_keeps_other_parameters() {
        assert_eq!(
            normalize_url(
                "postgresql://u:p@host/db?sslmode=require&channel_binding=require&sslrootcert=/etc/ca.pem&options=-csearch_path%3Dapp"
            ),
            "postgresql://u:p@host/db?sslmode=require&sslrootcert=/etc/ca.pem&options=-csearch_path%3Dapp"
        );
        assert_eq!(
            normalize_url("postgresql://u:p@host/db?channel_binding=require"),
            "postgresql://u:p@host/db"
        );
        assert_eq!(
            normalize_url("postgresql://u:p@host/db?options=-csearch_path%3Dapp"),
            "postgresql://u:p@host/db?options=-csearch_path%3Dapp"
        );
    }

    #[test]
    fn test_log_filter() {
        let mut args = parse(&["inspect", "t"]);
        assert_eq!(args.log_filter(), "schemaguard_cli=info,schemaguard_core=info");
        args.verbose = true;
        assert!(args.log_filter().contains("debug"));
    }
}
