use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::MemoryBlock;
use crate::views::block_link::{BlockLink, LinkItem};

/// Title of the group that collects every accepted item.
pub const TOTAL_GROUP_TITLE: &str = "Total";

/// Predicate over link items. Zero masks accept everything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockFilter {
    pub pool_mask: u32,
    pub tag_mask: u32,
    /// Items allocated before this order number are dropped.
    pub min_order: u32,
    /// Drop blocks present in both snapshots.
    pub hide_same: bool,
    /// Drop blocks present in one snapshot only.
    pub hide_different: bool,
}

impl BlockFilter {
    pub fn accepts(&self, item: &LinkItem<'_>) -> bool {
        if self.hide_same && item.is_paired() {
            return false;
        }
        if self.hide_different && !item.is_paired() {
            return false;
        }
        let block = item.any_block();
        block.order_no >= self.min_order
            && (self.pool_mask == 0 || block.in_pools(self.pool_mask))
            && (self.tag_mask == 0 || block.has_tags(self.tag_mask))
    }
}

/// Built-in grouping keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Backtrace,
    Size,
}

impl GroupKey {
    pub fn key(self, block: &MemoryBlock) -> u32 {
        match self {
            GroupKey::Backtrace => block.bktrace_hash,
            GroupKey::Size => block.alloc_by_app,
        }
    }

    pub fn title(self, key: u32) -> String {
        match self {
            GroupKey::Backtrace => format!("backtrace={key}"),
            GroupKey::Size => format!("block size={key}"),
        }
    }
}

/// Items of a link sharing one key.
#[derive(Debug, Clone)]
pub struct BlockGroup<'a> {
    pub title: String,
    pub key: u32,
    pub link: BlockLink<'a>,
    /// Set only on the leading group of every accepted item.
    pub total: bool,
}

impl BlockGroup<'_> {
    pub fn is_total(&self) -> bool {
        self.total
    }
}

/// Group with one of the built-in keys.
///
/// Backtrace groups come largest first by the bigger of their two side totals;
/// size groups come by block size, largest first. The "Total" group leads.
pub fn group_blocks<'a>(
    link: &BlockLink<'a>,
    key: GroupKey,
    filter: &BlockFilter,
) -> Vec<BlockGroup<'a>> {
    match key {
        GroupKey::Backtrace => group_blocks_by(
            link,
            filter,
            |b| key.key(b),
            |k| key.title(k),
            |a, b| b.link.max_alloc().cmp(&a.link.max_alloc()),
        ),
        GroupKey::Size => group_blocks_by(
            link,
            filter,
            |b| key.key(b),
            |k| key.title(k),
            |a, b| b.key.cmp(&a.key),
        ),
    }
}

/// Partition the accepted items of `link` by `key_of` of their
/// [`any_block`](LinkItem::any_block).
///
/// Groups are sorted with `cmp`; ties keep ascending key order. A group titled
/// [`TOTAL_GROUP_TITLE`] holding every accepted item is placed first.
pub fn group_blocks_by<'a, K, T, C>(
    link: &BlockLink<'a>,
    filter: &BlockFilter,
    key_of: K,
    title_of: T,
    cmp: C,
) -> Vec<BlockGroup<'a>>
where
    K: Fn(&MemoryBlock) -> u32,
    T: Fn(u32) -> String,
    C: FnMut(&BlockGroup<'a>, &BlockGroup<'a>) -> Ordering,
{
    let mut buckets: BTreeMap<u32, BlockLink<'a>> = BTreeMap::new();
    let mut total = link.empty_like();
    for item in link.items.iter().filter(|i| filter.accepts(i)) {
        let key = key_of(item.any_block());
        buckets
            .entry(key)
            .or_insert_with(|| link.empty_like())
            .push(*item);
        total.push(*item);
    }

    let mut groups: Vec<BlockGroup<'a>> = buckets
        .into_iter()
        .map(|(key, link)| BlockGroup {
            title: title_of(key),
            key,
            link,
            total: false,
        })
        .collect();
    groups.sort_by(cmp);
    groups.insert(
        0,
        BlockGroup {
            title: TOTAL_GROUP_TITLE.to_string(),
            key: 0,
            link: total,
            total: true,
        },
    );
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::load_snapshot;
    use crate::symbol_table::SymbolTable;

    fn titles<'a>(groups: &'a [BlockGroup<'_>]) -> Vec<&'a str> {
        groups.iter().map(|g| g.title.as_str()).collect()
    }

    #[test]
    fn backtrace_groups_largest_first() {
        let mut table = SymbolTable::new();
        let snapshot = load_snapshot(
            &mut table,
            &[(1, 10, 7), (2, 500, 9), (3, 20, 7), (4, 5, 3)],
            &[(7, &["main", "a"]), (9, &["main", "b"]), (3, &["main", "c"])],
        );
        let link = BlockLink::from_snapshot(&snapshot);
        let groups = group_blocks(&link, GroupKey::Backtrace, &BlockFilter::default());

        assert_eq!(
            titles(&groups),
            ["Total", "backtrace=9", "backtrace=7", "backtrace=3"]
        );
        assert!(groups[0].is_total());
        assert_eq!(groups[0].link.alloc_size[0], 535);
        assert_eq!(groups[2].link.len(), 2);
        assert_eq!(groups[2].link.alloc_size[0], 30);
    }

    #[test]
    fn size_groups_by_descending_key() {
        let mut table = SymbolTable::new();
        let snapshot = load_snapshot(
            &mut table,
            &[(1, 16, 1), (2, 64, 1), (3, 16, 1), (4, 32, 1)],
            &[(1, &["main"])],
        );
        let link = BlockLink::from_snapshot(&snapshot);
        let groups = group_blocks(&link, GroupKey::Size, &BlockFilter::default());
        assert_eq!(
            titles(&groups),
            ["Total", "block size=64", "block size=32", "block size=16"]
        );
        assert_eq!(groups[3].link.len(), 2);
    }

    #[test]
    fn partition_covers_every_accepted_item_once() {
        let mut table = SymbolTable::new();
        let bt: &[(u32, &[&str])] = &[(1, &["main", "a"]), (2, &["main", "b"])];
        let a = load_snapshot(&mut table, &[(1, 8, 1), (2, 16, 2), (3, 8, 1)], bt);
        let b = load_snapshot(&mut table, &[(2, 16, 2), (4, 32, 2)], bt);
        let link = BlockLink::from_snapshots(&a, &b);
        let groups = group_blocks(&link, GroupKey::Backtrace, &BlockFilter::default());

        let grouped: usize = groups.iter().skip(1).map(|g| g.link.len()).sum();
        assert_eq!(grouped, link.len());
        assert_eq!(groups[0].link.len(), link.len());
        assert_eq!(groups[0].link.alloc_size, link.alloc_size);
    }

    #[test]
    fn filter_hides_paired_blocks() {
        let mut table = SymbolTable::new();
        let bt: &[(u32, &[&str])] = &[(1, &["main"])];
        let a = load_snapshot(&mut table, &[(1, 8, 1), (2, 16, 1)], bt);
        let b = load_snapshot(&mut table, &[(2, 16, 1), (3, 32, 1)], bt);
        let link = BlockLink::from_snapshots(&a, &b);

        let new_only = BlockFilter {
            hide_same: true,
            ..BlockFilter::default()
        };
        let groups = group_blocks(&link, GroupKey::Size, &new_only);
        assert_eq!(groups[0].link.len(), 2);
        assert_eq!(groups[0].link.paired, 0);
        assert!(groups[0].link.is_diff());

        let same_only = BlockFilter {
            hide_different: true,
            ..BlockFilter::default()
        };
        let groups = group_blocks(&link, GroupKey::Size, &same_only);
        assert_eq!(titles(&groups), ["Total", "block size=16"]);
    }

    #[test]
    fn filter_masks_and_min_order() {
        let mut table = SymbolTable::new();
        let snapshot =
            load_snapshot(&mut table, &[(1, 8, 1), (5, 16, 1)], &[(1, &["main"])]);
        let link = BlockLink::from_snapshot(&snapshot);

        let late = BlockFilter {
            min_order: 3,
            ..BlockFilter::default()
        };
        assert_eq!(group_blocks(&link, GroupKey::Size, &late)[0].link.len(), 1);

        // Fixture blocks live in pool 1.
        let other_pool = BlockFilter {
            pool_mask: 0b100,
            ..BlockFilter::default()
        };
        let groups = group_blocks(&link, GroupKey::Size, &other_pool);
        assert_eq!(groups.len(), 1);
        assert!(groups[0].link.is_empty());
    }

    #[test]
    fn custom_key() {
        let mut table = SymbolTable::new();
        let snapshot = load_snapshot(
            &mut table,
            &[(1, 8, 1), (2, 9, 1), (3, 10, 1)],
            &[(1, &["main"])],
        );
        let link = BlockLink::from_snapshot(&snapshot);
        let groups = group_blocks_by(
            &link,
            &BlockFilter::default(),
            |b| b.alloc_by_app % 2,
            |k| if k == 0 { "even".into() } else { "odd".into() },
            |a, b| a.key.cmp(&b.key),
        );
        assert_eq!(titles(&groups), ["Total", "even", "odd"]);
    }

    #[test]
    fn custom_group_named_total_is_not_the_total() {
        let mut table = SymbolTable::new();
        let snapshot = load_snapshot(&mut table, &[(1, 8, 1)], &[(1, &["main"])]);
        let link = BlockLink::from_snapshot(&snapshot);
        let groups = group_blocks_by(
            &link,
            &BlockFilter::default(),
            |_| 1,
            |_| TOTAL_GROUP_TITLE.to_string(),
            |a, b| a.key.cmp(&b.key),
        );
        assert_eq!(titles(&groups), ["Total", "Total"]);
        assert!(groups[0].is_total());
        assert!(!groups[1].is_total());
    }
}
