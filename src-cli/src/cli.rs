//! Command-line arguments.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use scout_core::TransportPreference;

#[derive(Parser, Debug)]
#[command(name = "scout")]
#[command(author, version, about = "Crawl, shadow-index and chat with the Scout backend", long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Backend base URL (overrides settings)
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Data directory (defaults to the platform data dir)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Print events as JSON lines
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Crawl a page, or run a focused crawl for a search query
    Crawl {
        /// Page to start from
        #[arg(required_unless_present = "query", conflicts_with = "query")]
        url: Option<String>,

        /// Focused crawl for this query instead of a URL
        #[arg(short, long)]
        query: Option<String>,

        /// Print the job id and exit without following progress
        #[arg(long)]
        detach: bool,
    },

    /// Read visited URLs from stdin (`<url> [tab-id]` per line) and
    /// shadow-index each one
    Browse,

    /// Ask a question; without a message, read one question per stdin line
    Chat {
        message: Option<String>,

        /// Chat model to use
        #[arg(short, long)]
        model: Option<String>,

        /// Reply transport
        #[arg(long, value_enum, default_value = "auto")]
        transport: Transport,

        /// Continue a saved conversation
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Show or change persisted settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Browse saved conversations
    History {
        #[command(subcommand)]
        action: HistoryAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum SettingsAction {
    Show,
    Set(SettingsUpdate),
}

#[derive(Args, Debug, Default)]
pub struct SettingsUpdate {
    #[arg(long)]
    pub backend_url: Option<String>,

    #[arg(long)]
    pub shadow_mode: Option<bool>,

    #[arg(long)]
    pub model: Option<String>,

    #[arg(long)]
    pub push_transport: Option<bool>,

    /// Consecutive poll failures tolerated by the progress fallback
    #[arg(long)]
    pub poll_retry_attempts: Option<u32>,
}

#[derive(Subcommand, Debug)]
pub enum HistoryAction {
    List,
    Show { id: String },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Auto,
    Push,
    Request,
}

impl From<Transport> for TransportPreference {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Auto => TransportPreference::Auto,
            Transport::Push => TransportPreference::Push,
            Transport::Request => TransportPreference::Request,
        }
    }
}
