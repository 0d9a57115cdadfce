pub mod block_group;
pub mod block_link;
pub mod call_tree;
pub mod call_tree_diff;

pub use block_group::{
    BlockFilter, BlockGroup, GroupKey, TOTAL_GROUP_TITLE, group_blocks, group_blocks_by,
};
pub use block_link::{BlockLink, LinkItem, LinkOrder};
pub use call_tree::{Branch, BranchId, CallTree};
pub use call_tree_diff::{BranchDiff, CallTreeDiff, DiffId, DiffSide};
