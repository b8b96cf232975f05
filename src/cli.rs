use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "soundgrab")]
#[command(author, version, about = "Telegram bot that delivers validated SoundCloud audio", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the bot (long polling)
    Run {
        /// Keep the audio cache in memory only
        #[arg(long)]
        no_persist: bool,
    },

    /// Download and validate one track without Telegram
    Fetch {
        /// SoundCloud/Spotify link or search text
        query: String,

        /// Where to write the file (default: "Artist - Title.ext" in the current directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Inspect or maintain the audio cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheAction {
    /// Show entry counts
    Stats,
    /// Delete entries older than the cache TTL
    Prune,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
