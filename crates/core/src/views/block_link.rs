use std::cmp::Ordering;

use crate::model::MemoryBlock;
use crate::snapshot::Snapshot;

/// One row of a [`BlockLink`]: a block from one snapshot, or the same
/// allocation seen in both.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkItem<'a> {
    Left(&'a MemoryBlock),
    Right(&'a MemoryBlock),
    Both(&'a MemoryBlock, &'a MemoryBlock),
}

impl<'a> LinkItem<'a> {
    pub fn left(&self) -> Option<&'a MemoryBlock> {
        match *self {
            LinkItem::Left(b) | LinkItem::Both(b, _) => Some(b),
            LinkItem::Right(_) => None,
        }
    }

    pub fn right(&self) -> Option<&'a MemoryBlock> {
        match *self {
            LinkItem::Right(b) | LinkItem::Both(_, b) => Some(b),
            LinkItem::Left(_) => None,
        }
    }

    /// The left block if present, otherwise the right one.
    pub fn any_block(&self) -> &'a MemoryBlock {
        match *self {
            LinkItem::Left(b) | LinkItem::Right(b) | LinkItem::Both(b, _) => b,
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self, LinkItem::Both(..))
    }
}

/// Sort keys for [`BlockLink::sort_items`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkOrder {
    /// Allocation order, ascending.
    #[default]
    Order,
    /// `alloc_by_app`, largest first.
    Size,
    /// Pool mask, then size.
    Pool,
    /// Backtrace hash, then size.
    Backtrace,
}

/// Blocks of one snapshot, or of two snapshots matched by order number.
///
/// Items borrow the blocks of their source snapshots, which must outlive the
/// link.
#[derive(Debug, Clone, Default)]
pub struct BlockLink<'a> {
    pub items: Vec<LinkItem<'a>>,
    /// Number of linked snapshots, 1 or 2.
    pub link_count: usize,
    /// Number of items present on both sides.
    pub paired: usize,
    /// Sum of `alloc_by_app` per side.
    pub alloc_size: [u64; 2],
    pub block_count: [usize; 2],
    pub sources: [Option<&'a Snapshot>; 2],
}

impl<'a> BlockLink<'a> {
    /// Every block of a loaded snapshot, left side only.
    pub fn from_snapshot(snapshot: &'a Snapshot) -> Self {
        Self::from_iter_single(snapshot.memory_blocks().iter(), snapshot)
    }

    /// A selection of blocks of `snapshot`, sorted by order number.
    pub fn from_blocks(blocks: &[&'a MemoryBlock], snapshot: &'a Snapshot) -> Self {
        debug_assert!(blocks.is_sorted_by_key(|b| b.order_no));
        Self::from_iter_single(blocks.iter().copied(), snapshot)
    }

    /// Match every block of `left` with the block of `right` carrying the
    /// same order number.
    pub fn from_snapshots(left: &'a Snapshot, right: &'a Snapshot) -> Self {
        Self::merge(
            left.memory_blocks().iter(),
            left,
            right.memory_blocks().iter(),
            right,
        )
    }

    /// Like [`from_snapshots`](Self::from_snapshots) over two sorted selections.
    pub fn from_block_pairs(
        left_blocks: &[&'a MemoryBlock],
        left: &'a Snapshot,
        right_blocks: &[&'a MemoryBlock],
        right: &'a Snapshot,
    ) -> Self {
        debug_assert!(left_blocks.is_sorted_by_key(|b| b.order_no));
        debug_assert!(right_blocks.is_sorted_by_key(|b| b.order_no));
        Self::merge(
            left_blocks.iter().copied(),
            left,
            right_blocks.iter().copied(),
            right,
        )
    }

    /// Empty link over the same sources.
    pub fn empty_like(&self) -> Self {
        Self {
            link_count: self.link_count,
            sources: self.sources,
            ..Self::default()
        }
    }

    pub fn is_diff(&self) -> bool {
        self.link_count == 2
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Append an item and account for it in the totals.
    pub fn push(&mut self, item: LinkItem<'a>) {
        if let Some(b) = item.left() {
            self.alloc_size[0] += u64::from(b.alloc_by_app);
            self.block_count[0] += 1;
        }
        if let Some(b) = item.right() {
            self.alloc_size[1] += u64::from(b.alloc_by_app);
            self.block_count[1] += 1;
        }
        if item.is_paired() {
            self.paired += 1;
        }
        self.items.push(item);
    }

    /// Larger of the two side totals.
    pub fn max_alloc(&self) -> u64 {
        self.alloc_size[0].max(self.alloc_size[1])
    }

    /// Right total minus left total.
    pub fn alloc_delta(&self) -> i64 {
        self.alloc_size[1] as i64 - self.alloc_size[0] as i64
    }

    pub fn sort_items(&mut self, order: LinkOrder) {
        fn by_size(a: &MemoryBlock, b: &MemoryBlock) -> Ordering {
            b.alloc_by_app
                .cmp(&a.alloc_by_app)
                .then(a.order_no.cmp(&b.order_no))
        }

        let cmp: fn(&MemoryBlock, &MemoryBlock) -> Ordering = match order {
            LinkOrder::Order => |a, b| a.order_no.cmp(&b.order_no),
            LinkOrder::Size => by_size,
            LinkOrder::Pool => |a, b| a.pool.cmp(&b.pool).then_with(|| by_size(a, b)),
            LinkOrder::Backtrace => {
                |a, b| a.bktrace_hash.cmp(&b.bktrace_hash).then_with(|| by_size(a, b))
            }
        };
        self.items.sort_by(|a, b| cmp(a.any_block(), b.any_block()));
    }

    fn from_iter_single<I>(blocks: I, snapshot: &'a Snapshot) -> Self
    where
        I: IntoIterator<Item = &'a MemoryBlock>,
    {
        let mut link = Self {
            link_count: 1,
            sources: [Some(snapshot), None],
            ..Self::default()
        };
        for block in blocks {
            link.push(LinkItem::Left(block));
        }
        link
    }

    fn merge<L, R>(left: L, left_src: &'a Snapshot, right: R, right_src: &'a Snapshot) -> Self
    where
        L: IntoIterator<Item = &'a MemoryBlock>,
        R: IntoIterator<Item = &'a MemoryBlock>,
    {
        let mut link = Self {
            link_count: 2,
            sources: [Some(left_src), Some(right_src)],
            ..Self::default()
        };
        let mut left = left.into_iter().peekable();
        let mut right = right.into_iter().peekable();
        loop {
            let item = match (left.peek().copied(), right.peek().copied()) {
                (Some(l), Some(r)) => match l.order_no.cmp(&r.order_no) {
                    Ordering::Equal => {
                        left.next();
                        right.next();
                        LinkItem::Both(l, r)
                    }
                    Ordering::Less => {
                        left.next();
                        LinkItem::Left(l)
                    }
                    Ordering::Greater => {
                        right.next();
                        LinkItem::Right(r)
                    }
                },
                (Some(l), None) => {
                    left.next();
                    LinkItem::Left(l)
                }
                (None, Some(r)) => {
                    right.next();
                    LinkItem::Right(r)
                }
                (None, None) => break,
            };
            link.push(item);
        }
        link
    }
}
