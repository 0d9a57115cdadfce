use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use memprof_core::views::GroupKey;

#[derive(Debug, Parser)]
#[clap(name = "memprof", version, about = "Inspect memory profiling sessions")]
pub struct Opt {
    /// Log debug events to stderr
    #[clap(short, long)]
    pub verbose: bool,

    /// Session settings (TOML)
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// Session log, usually `memory.mlog`
    pub log: PathBuf,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print device, pools, trend summary and snapshots
    Info,
    /// Print the call tree of a snapshot
    Tree {
        /// Snapshot index or file name
        snapshot: String,
        /// Function names the tree starts at
        #[clap(required = true)]
        roots: Vec<String>,
        /// Stop printing below this depth
        #[clap(long)]
        depth: Option<usize>,
    },
    /// Compare the call trees of two snapshots
    Diff {
        left: String,
        right: String,
        #[clap(required = true)]
        roots: Vec<String>,
        #[clap(long)]
        depth: Option<usize>,
    },
    /// Group the blocks of a snapshot, or of two linked snapshots
    Blocks {
        snapshot: String,
        /// Link against a second snapshot
        #[clap(long)]
        against: Option<String>,
        #[clap(long, value_enum, default_value_t = GroupArg::Backtrace)]
        group: GroupArg,
        /// Ignore blocks allocated before this order number
        #[clap(long, default_value_t = 0)]
        min_order: u32,
        /// Only blocks missing from one of the linked snapshots
        #[clap(long)]
        new_only: bool,
        /// Number of groups to print
        #[clap(long, default_value_t = 20)]
        limit: usize,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum GroupArg {
    Backtrace,
    Size,
}

impl From<GroupArg> for GroupKey {
    fn from(arg: GroupArg) -> Self {
        match arg {
            GroupArg::Backtrace => GroupKey::Backtrace,
            GroupArg::Size => GroupKey::Size,
        }
    }
}
