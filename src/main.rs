use specter::cli;
use specter::config::Config;
use specter::router::TaskRequest;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "specter",
    version,
    about = "Turns mail and free-text commands into drafts, contact lookups and calendar events"
)]
struct Cli {
    /// Path to configuration file (default: $SPECTER_CONFIG, then ~/.specter/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Interactive session with a working draft (default)
    Shell,
    /// Summarize the latest mail and draft a reply
    Analyze,
    /// Process a free-text command, e.g. "Tomorrow 10am meeting with Ayşe"
    Command {
        /// The command text
        text: Vec<String>,
    },
    /// Send an email
    Send {
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long)]
        content: String,
    },
    /// Add a one-hour meeting to the calendar
    Schedule {
        #[arg(long)]
        summary: String,
        /// Local start time, YYYY-MM-DDTHH:MM:SS
        #[arg(long)]
        at: String,
    },
    /// Write a default config and create the data directory
    Init,
    /// Run the tool server on stdin/stdout
    Serve,
    /// Manage the contact table
    Contacts {
        #[command(subcommand)]
        action: ContactsAction,
    },
}

#[derive(Subcommand, Debug)]
enum ContactsAction {
    /// List all contacts
    List,
    /// Add a contact
    Add { name: String, email: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries tool-protocol frames under `serve`, so logs go to stderr.
    {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .init();
    }

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("SPECTER_CONFIG").map(PathBuf::from))
        .unwrap_or_else(|| specter::specter_home().join("config.yaml"));
    let cfg = Config::load_or_default(&config_path).await?;

    match cli.command.unwrap_or(Command::Shell) {
        Command::Shell => cli::shell::run(&cfg, &config_path).await,
        Command::Analyze => cli::run_once(&cfg, &config_path, TaskRequest::AnalyzeLastMail).await,
        Command::Command { text } => {
            let command = text.join(" ");
            if command.trim().is_empty() {
                anyhow::bail!("empty command");
            }
            cli::run_once(&cfg, &config_path, TaskRequest::ProcessCommand { command }).await
        }
        Command::Send { to, subject, content } => {
            cli::run_once(
                &cfg,
                &config_path,
                TaskRequest::SendReply {
                    to,
                    subject,
                    content,
                },
            )
            .await
        }
        Command::Schedule { summary, at } => {
            cli::run_once(
                &cfg,
                &config_path,
                TaskRequest::AddCalendar {
                    summary,
                    iso_datetime: at,
                },
            )
            .await
        }
        Command::Init => cli::init(&config_path).await,
        Command::Serve => cli::serve(&cfg).await,
        Command::Contacts { action } => match action {
            ContactsAction::List => cli::list_contacts(&cfg).await,
            ContactsAction::Add { name, email } => cli::add_contact(&cfg, &name, &email).await,
        },
    }
}
