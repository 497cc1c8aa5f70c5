//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - list / show / categories: browse the tool catalog
//! - check: load the catalog and report skipped tools
//! - ask: run one conversation turn
//! - history: print a conversation's messages

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chartsmith - conversational chart-tool orchestrator
#[derive(Parser, Debug)]
#[command(name = "chartsmith")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List tools, ordered by path key
    List {
        /// Only tools in this category
        #[arg(short = 'C', long)]
        category: Option<String>,
    },

    /// Show one tool's definition
    Show {
        /// Tool path key, "{category}/{tool_name}"
        path: String,
    },

    /// List tool categories
    Categories,

    /// Load the catalog and print the load report and fingerprint
    Check,

    /// Send one message to a conversation
    Ask {
        /// Conversation ID
        conversation: String,

        /// Free-text message
        message: String,

        /// Explicit parameter, repeatable (key=value; value parsed as JSON when possible)
        #[arg(short, long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,

        /// Engine to render with (script, markup)
        #[arg(short, long)]
        engine: Option<String>,

        /// Tool path key, bypassing interpretation of the chart type
        #[arg(short = 't', long)]
        chart_type: Option<String>,

        /// User the message is attributed to
        #[arg(short, long, default_value = "cli")]
        user: String,
    },

    /// Print a conversation's messages
    History {
        /// Conversation ID
        conversation: String,
    },
}
