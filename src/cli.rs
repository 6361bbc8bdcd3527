use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bagger")]
#[command(about = "Validate BagIt bags, tarred or not, against a rule set")]
#[command(author, version, long_about = None)]
pub struct Cli {
    /// Sets a custom settings file
    #[arg(short, long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// More logging, repeat for even more
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validates a bag
    Validate {
        /// JSON rule set the bag must satisfy
        #[arg(short, long, value_name = "FILE")]
        rules: PathBuf,

        /// Record size, owner, modify time and a uuid for every file
        #[arg(long)]
        attrs: bool,

        /// Leave the .valdb sidecar next to the bag afterwards
        #[arg(long)]
        keep_db: bool,

        /// Write everything learned about the bag to this JSON file
        #[arg(short, long, value_name = "FILE")]
        outfile: Option<PathBuf>,

        /// Tar file or directory
        bag: PathBuf,
    },

    /// Dumps a .valdb sidecar as JSON
    Dump {
        valdb: PathBuf,

        /// Only list file identifiers, starting at this one
        #[arg(long, requires = "limit")]
        offset: Option<usize>,

        /// Only list this many file identifiers
        #[arg(long)]
        limit: Option<usize>,
    },
}
