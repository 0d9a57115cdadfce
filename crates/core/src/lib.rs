pub mod model;
pub mod session;
pub mod snapshot;
pub mod symbol_table;
pub mod views;

#[cfg(test)]
pub(crate) mod fixtures;

pub use model::{DeviceInfo, MemoryBlock, MemoryStatItem, Symbol};
pub use session::{ProfilingSession, SessionConfig, SessionError};
pub use snapshot::{Snapshot, SnapshotDescriptor, SnapshotError};
pub use symbol_table::{BacktraceStatus, INVALID_ADDRESS, SymbolTable};
pub use views::{BlockLink, CallTree, CallTreeDiff};
