use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "stow",
    about = "Stow -- sharded, content-addressed file storage",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Host configuration file. A missing default file means built-in defaults.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Store a local file and print its code
    Upload(UploadArgs),
    /// Read an object, or a byte range of it
    Fetch(FetchArgs),
    /// Materialize an object as a local file
    Download(DownloadArgs),
    /// Delete an object
    Remove(CodeArgs),
    /// Print a path or URL for an object
    Browse(CodeArgs),
    /// Show the fields encoded in a code
    Decode(CodeArgs),
    /// Show the load of every backend
    Health,
    /// List configured backends and their weights
    Backends,
}

#[derive(Args)]
pub struct UploadArgs {
    pub path: PathBuf,
    /// Store on this backend instead of placing by content hash
    #[arg(short, long)]
    pub backend: Option<String>,
    #[arg(short, long)]
    pub key: Option<String>,
    #[arg(short, long)]
    pub prefix: Option<String>,
}

#[derive(Args)]
pub struct FetchArgs {
    pub code: String,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub start: i64,
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub end: i64,
    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct DownloadArgs {
    pub code: String,
    #[arg(short, long)]
    pub target: Option<PathBuf>,
}

#[derive(Args)]
pub struct CodeArgs {
    pub code: String,
}
