use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// CLI для хранилища MapPager (один отображённый файл)
#[derive(Parser, Debug)]
#[command(name = "mappager", version, about = "MapPager storage CLI")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmd,
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}

#[derive(Subcommand, Debug)]
pub enum Cmd {
    /// Create a new storage file (no-op if it already exists)
    Init {
        #[arg(long)]
        path: PathBuf,
        /// Data capacity in bytes (default: MP_CAPACITY or 8 GiB)
        #[arg(long)]
        capacity: Option<u64>,
        /// Bytes per page (default: MP_PAGE_DATA_SIZE or 8)
        #[arg(long)]
        page_size: Option<u32>,
    },
    /// Print header, layout and allocator state
    Status {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Structural integrity check (exit code 1 on issues)
    Check {
        #[arg(long)]
        path: PathBuf,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Dump one page: header, set and valid bytes
    Page {
        #[arg(long)]
        path: PathBuf,
        #[arg(long)]
        page: u32,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}
