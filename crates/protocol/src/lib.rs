pub mod codec;
pub mod error;
pub mod log;
pub mod snapshot;

pub use error::FormatError;
pub use log::{
    GeneralStat, LogHeader, PoolStat, StatConfig, StatItem, TagStat, LOG_HEADER_SIZE,
    LOG_SIGNATURE,
};
pub use snapshot::{
    BacktraceRecord, BlockRecord, SnapshotFile, SnapshotHeader, SymbolRecord,
    SNAPSHOT_HEADER_SIZE, SNAPSHOT_SIGNATURE,
};
