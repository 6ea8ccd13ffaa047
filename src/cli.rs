use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Debug CLI over the extraction pipeline
#[derive(Parser)]
#[command(name = "scour")]
#[command(about = "Run media extraction modules against live pages", long_about = None)]
pub struct Cli {
    /// Module metadata JSON file
    #[arg(short, long, global = true)]
    pub metadata: Option<PathBuf>,

    /// Selector rules TOML file for the built-in provider
    #[arg(short, long, global = true)]
    pub rules: Option<PathBuf>,

    /// Optional module config TOML (timeouts, allowed hosts)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the loaded module and its registered functions
    Modules,
    /// Search the module for a keyword
    Search {
        /// Query to search for
        query: String,
    },
    /// Extract details and episode list for a content URL
    Details {
        /// Content page URL
        url: String,
    },
    /// Resolve stream URLs for an episode page
    Streams {
        /// Episode page URL
        url: String,
    },
    /// Parse a subtitle file and print its cues
    Subtitles {
        /// Path to a .vtt or .srt file
        file: PathBuf,
        /// Timing offset in seconds
        #[arg(long, default_value_t = scour::subtitles::DEFAULT_TIME_OFFSET)]
        offset: f64,
    },
}
