use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "audiofs")]
#[command(version)]
#[command(about = "Content-addressed audio catalog with exact and perceptual deduplication", long_about = None)]
pub struct Cli {
    /// Catalog database file
    #[arg(short = 'd', long, global = true, default_value = "audiofs.db")]
    pub catalog: PathBuf,

    /// Seconds a single file may take to decode
    #[arg(long, global = true, default_value_t = 120)]
    pub timeout_secs: u64,

    /// Worker threads (defaults to one per CPU)
    #[arg(short = 't', long, global = true)]
    pub threads: Option<usize>,

    /// Log filter, e.g. "debug" or "audiofs=trace" (overrides RUST_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone, Copy)]
pub struct KeepFlags {
    /// Keep the original file after importing (default)
    #[arg(short = 'k', long, overrides_with = "no_keep")]
    pub keep: bool,

    /// Delete the original file once it is committed to the catalog
    #[arg(long, overrides_with = "keep")]
    pub no_keep: bool,
}

impl KeepFlags {
    pub fn keep_original(&self) -> bool {
        !self.no_keep
    }
}

#[derive(Args, Debug, Clone, Copy)]
pub struct CarefulFlags {
    /// Also match perceptually identical audio (default)
    #[arg(short = 'c', long, overrides_with = "no_careful")]
    pub careful: bool,

    /// Only match bit-identical audio
    #[arg(long, overrides_with = "careful")]
    pub no_careful: bool,
}

impl CarefulFlags {
    pub fn careful(&self) -> bool {
        !self.no_careful
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Import audio files now (directories are scanned recursively)
    Import {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        keep: KeepFlags,

        #[command(flatten)]
        careful: CarefulFlags,
    },

    /// Record files for a later import-catalog without reading them
    Catalog {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Import every pending catalog entry
    ImportCatalog {
        #[command(flatten)]
        keep: KeepFlags,

        #[command(flatten)]
        careful: CarefulFlags,

        /// Write a per-entry CSV report
        #[arg(short = 'r', long)]
        report: Option<PathBuf>,
    },

    /// Check whether a file's audio is already catalogued (exit 0 if so, 1 if not)
    Exists {
        path: PathBuf,

        #[command(flatten)]
        careful: CarefulFlags,
    },

    /// Print decoded metadata and content digest of a file as JSON
    Analyze { path: PathBuf },
}
