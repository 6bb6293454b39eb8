pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "goosebot",
    about = "Goosebot operator CLI",
    long_about = "Operate goosebot readiness, migrations, config inspection, the Slack app manifest, Procfile checks, and user grants.",
    after_help = "Examples:\n  goosebot doctor --json\n  goosebot manifest\n  goosebot user grant U123ABC jane.doe --role analyst"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run startup preflight checks and return structured status output")]
    Start,
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, request signing, Slack scopes, and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the Slack app manifest (scopes, events, Socket Mode settings)")]
    Manifest,
    #[command(about = "Validate a Procfile, or print the recommended one when no path is given")]
    Procfile {
        #[arg(help = "Path to the Procfile to validate")]
        path: Option<PathBuf>,
    },
    #[command(subcommand, about = "Manage Slack user mappings and role grants")]
    User(UserCommand),
}

#[derive(Debug, Subcommand)]
enum UserCommand {
    #[command(about = "Map a Slack member to an internal user with the given roles")]
    Grant {
        slack_user_id: String,
        internal_user_id: String,
        #[arg(long = "role", default_value = "analyst", help = "viewer|analyst|admin|super_admin")]
        roles: Vec<String>,
        #[arg(long)]
        email: Option<String>,
    },
    #[command(about = "List active user mappings")]
    List,
    #[command(about = "Deactivate a Slack member's mapping")]
    Revoke { slack_user_id: String },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Start => commands::start::run(),
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Manifest => commands::manifest::run(),
        Command::Procfile { path } => commands::procfile::run(path.as_deref()),
        Command::User(UserCommand::Grant { slack_user_id, internal_user_id, roles, email }) => {
            commands::user::grant(&slack_user_id, &internal_user_id, &roles, email)
        }
        Command::User(UserCommand::List) => commands::user::list(),
        Command::User(UserCommand::Revoke { slack_user_id }) => {
            commands::user::revoke(&slack_user_id)
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
