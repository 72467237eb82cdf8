use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Translate a slide deck document
    Translate {
        /// Input document (JSON shape tree)
        #[arg(short, long)]
        input: PathBuf,

        /// Output path for the translated document
        #[arg(short, long)]
        output: PathBuf,

        /// Target language (ja or en)
        #[arg(short, long, default_value = "en")]
        lang: String,
    },

    /// Report page and translatable-text counts for a document
    Analyze {
        /// Input document (JSON shape tree)
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Estimate token usage and cost before translating
    Estimate {
        /// Input document (JSON shape tree)
        #[arg(short, long)]
        input: PathBuf,

        /// Model to price the estimate against
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Manage configuration
    Config {
        /// Write a default config file to the given path
        #[arg(long, default_value = "config.toml")]
        init: PathBuf,
    },
}
