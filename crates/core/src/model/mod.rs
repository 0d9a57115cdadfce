pub mod block;
pub mod device;
pub mod symbol;

pub use block::MemoryBlock;
pub use device::DeviceInfo;
pub use memprof_protocol::{GeneralStat, PoolStat, StatConfig, StatItem as MemoryStatItem, TagStat};
pub use symbol::Symbol;
