use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use forum_core::models::ThreadStatus;
use forum_core::tracing_setup::init_tracing;
use forum_core::CoreRuntime;
use forum_cli::cli::{execute, restore_session, CliCommand, CliConfig, ErrorInfo, SessionFile};

#[derive(Parser)]
#[command(name = "forum")]
#[command(about = "Command line client for the community forum")]
struct Cli {
    /// Pretty-print JSON output
    #[arg(long, short)]
    pretty: bool,

    /// Path to JSON config file (contains backendUrl, anonKey, sessionPath)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an account
    Signup {
        email: String,
        #[arg(long, env = "FORUM_PASSWORD")]
        password: String,
    },

    /// Sign in and remember the session
    Login {
        email: String,
        #[arg(long, env = "FORUM_PASSWORD")]
        password: String,
    },

    /// Sign out and forget the session
    Logout,

    /// Show the signed-in user
    Whoami,

    /// List threads, newest first
    List {
        /// Case-insensitive text to look for in title, description or tags
        #[arg(long, short)]
        search: Option<String>,
    },

    /// Show a thread with its replies
    Show { thread_id: String },

    /// Start a new thread
    Create {
        #[arg(long, short)]
        title: String,
        #[arg(long, short)]
        description: String,
        /// Comma separated tags
        #[arg(long, default_value = "")]
        tags: String,
    },

    /// Reply to a thread
    Reply { thread_id: String, content: String },

    /// Like a thread, or unlike it if already liked
    Like { thread_id: String },

    /// List ids of threads you liked
    Liked,

    /// Moderation commands
    #[command(subcommand)]
    Admin(AdminCommands),
}

#[derive(Subcommand)]
enum AdminCommands {
    /// Set a thread's status (open, closed, solved)
    Status {
        thread_id: String,
        #[arg(value_parser = parse_status)]
        status: ThreadStatus,
    },

    /// Delete a thread
    Delete { thread_id: String },
}

fn parse_status(value: &str) -> Result<ThreadStatus, String> {
    value.parse::<ThreadStatus>().map_err(|e| e.to_string())
}

impl From<Commands> for CliCommand {
    fn from(command: Commands) -> Self {
        match command {
            Commands::Signup { email, password } => CliCommand::SignUp { email, password },
            Commands::Login { email, password } => CliCommand::Login { email, password },
            Commands::Logout => CliCommand::Logout,
            Commands::Whoami => CliCommand::WhoAmI,
            Commands::List { search } => CliCommand::ListThreads { search },
            Commands::Show { thread_id } => CliCommand::ShowThread { thread_id },
            Commands::Create {
                title,
                description,
                tags,
            } => CliCommand::CreateThread {
                title,
                description,
                tags,
            },
            Commands::Reply { thread_id, content } => CliCommand::Reply { thread_id, content },
            Commands::Like { thread_id } => CliCommand::ToggleLike { thread_id },
            Commands::Liked => CliCommand::LikedThreads,
            Commands::Admin(AdminCommands::Status { thread_id, status }) => {
                CliCommand::SetStatus { thread_id, status }
            }
            Commands::Admin(AdminCommands::Delete { thread_id }) => {
                CliCommand::DeleteThread { thread_id }
            }
        }
    }
}

fn print_json(value: &serde_json::Value, pretty: bool) {
    let rendered = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match rendered {
        Ok(text) => println!("{}", text),
        Err(e) => eprintln!("Error: failed to render output: {}", e),
    }
}

#[tokio::main]
async fn run(config: CliConfig, command: CliCommand) -> Result<serde_json::Value> {
    let sessions = SessionFile::new(config.session_path());
    let mut runtime = CoreRuntime::new(config.core_config())?;
    restore_session(&runtime, &sessions)?;
    let result = execute(&runtime, &sessions, command).await;
    runtime.shutdown();
    result
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing("warn") {
        eprintln!("Warning: logging disabled: {}", e);
    }

    let config = match cli.config.as_deref() {
        Some(path) => match CliConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: {:#}", e);
                std::process::exit(1);
            }
        },
        None => CliConfig::default(),
    };

    match run(config, cli.command.into()) {
        Ok(value) => print_json(&value, cli.pretty),
        Err(e) => {
            print_json(&serde_json::json!({ "error": ErrorInfo::from_error(&e) }), cli.pretty);
            std::process::exit(1);
        }
    }
}
