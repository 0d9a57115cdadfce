use serde::Serialize;

use crate::model::{MemoryBlock, Symbol};
use crate::snapshot::Snapshot;
use crate::symbol_table::SymbolTable;

/// Handle of a node inside one [`CallTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct BranchId(usize);

impl BranchId {
    /// The synthetic, unnamed root.
    pub const ROOT: BranchId = BranchId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// One call-path segment of a call tree.
#[derive(Debug, Clone, Serialize)]
pub struct Branch {
    /// `None` only for the root.
    pub name: Option<Symbol>,
    pub parent: Option<BranchId>,
    pub children: Vec<BranchId>,
    /// Bytes allocated by the application here and below.
    pub alloc_by_app: u64,
    pub block_count: u32,
    /// OR of the pool masks of every block here and below.
    pub pools: u32,
    pub tags: u32,
    /// Indices into the snapshot's block array of the blocks whose call path
    /// ends exactly at this node.
    pub blocks: Vec<usize>,
}

impl Branch {
    fn new(name: Option<Symbol>, parent: Option<BranchId>) -> Self {
        Self {
            name,
            parent,
            children: Vec::new(),
            alloc_by_app: 0,
            block_count: 0,
            pools: 0,
            tags: 0,
            blocks: Vec::new(),
        }
    }

    /// Display name, empty for the root.
    pub fn name_str(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// Allocations of one snapshot aggregated by call path.
///
/// Nodes live in an arena and refer to each other by [`BranchId`]; parents own
/// their children through the `children` lists, `parent` is a plain back link.
#[derive(Debug, Clone, Serialize)]
pub struct CallTree {
    nodes: Vec<Branch>,
}

impl CallTree {
    /// A tree holding only the root.
    pub fn new() -> Self {
        Self {
            nodes: vec![Branch::new(None, None)],
        }
    }

    /// Group the blocks of a loaded snapshot by call path.
    ///
    /// For every backtrace the outermost frame named in `roots` becomes the
    /// first level below the root, and the path continues down to the
    /// innermost frame. Backtraces that do not pass through any of `roots`
    /// are left out. Children are sorted by name.
    pub fn build(snapshot: &Snapshot, table: &SymbolTable, roots: &[Symbol]) -> Self {
        debug_assert!(!roots.is_empty(), "call tree requested without root names");

        let mut tree = Self::new();
        let blocks = snapshot.memory_blocks();
        for (hash, indices) in snapshot.backtrace_blocks() {
            let Some(names) = table.backtrace_symbols(hash) else {
                continue;
            };
            if names.is_empty() || indices.is_empty() {
                continue;
            }
            let Some(start) = find_start_frame(names, roots) else {
                continue;
            };
            let leaf = tree.build_path(BranchId::ROOT, &names[..=start]);
            tree.add_blocks(leaf, indices, blocks);
        }
        tree.sort_children_by_name();
        tree
    }

    pub fn root(&self) -> &Branch {
        &self.nodes[0]
    }

    /// Node by id. Ids are only valid for the tree that issued them.
    pub fn node(&self, id: BranchId) -> &Branch {
        &self.nodes[id.0]
    }

    pub fn get(&self, id: BranchId) -> Option<&Branch> {
        self.nodes.get(id.0)
    }

    pub fn children(&self, id: BranchId) -> &[BranchId] {
        &self.node(id).children
    }

    pub fn parent(&self, id: BranchId) -> Option<BranchId> {
        self.node(id).parent
    }

    /// Number of nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True when nothing hangs below the root.
    pub fn is_empty(&self) -> bool {
        self.root().children.is_empty()
    }

    /// Child of `parent` carrying exactly the interned `name`.
    pub fn find_child(&self, parent: BranchId, name: &Symbol) -> Option<BranchId> {
        self.children(parent).iter().copied().find(|&c| {
            self.node(c)
                .name
                .as_ref()
                .is_some_and(|n| Symbol::ptr_eq(n, name))
        })
    }

    pub fn append_child(&mut self, parent: BranchId, name: Symbol) -> BranchId {
        let id = BranchId(self.nodes.len());
        self.nodes.push(Branch::new(Some(name), Some(parent)));
        self.nodes[parent.0].children.push(id);
        id
    }

    /// Attach blocks to `leaf` and add their stats to every ancestor.
    pub fn add_blocks(&mut self, leaf: BranchId, indices: &[usize], blocks: &[MemoryBlock]) {
        let mut alloc_by_app = 0u64;
        let mut pools = 0u32;
        let mut tags = 0u32;
        for &index in indices {
            let block = &blocks[index];
            alloc_by_app += u64::from(block.alloc_by_app);
            pools |= block.pool;
            tags |= block.tags;
        }
        self.nodes[leaf.0].blocks.extend_from_slice(indices);
        self.update_stat(leaf, alloc_by_app, indices.len() as u32, pools, tags);
    }

    /// Sort the children of every node by name.
    pub fn sort_children_by_name(&mut self) {
        for i in 0..self.nodes.len() {
            let mut children = std::mem::take(&mut self.nodes[i].children);
            children.sort_by(|a, b| self.nodes[a.0].name.cmp(&self.nodes[b.0].name));
            self.nodes[i].children = children;
        }
    }

    /// Indices of every block at or below `id`, in allocation order.
    pub fn memory_blocks(&self, id: BranchId) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.node(id).block_count as usize);
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            let node = self.node(cur);
            out.extend_from_slice(&node.blocks);
            stack.extend_from_slice(&node.children);
        }
        // Snapshot blocks are sorted by order number, so index order is allocation order.
        out.sort_unstable();
        out
    }

    /// Like [`memory_blocks`](Self::memory_blocks), resolved against the
    /// snapshot the tree was built from.
    pub fn memory_blocks_in<'a>(
        &self,
        id: BranchId,
        snapshot: &'a Snapshot,
    ) -> Vec<&'a MemoryBlock> {
        self.memory_blocks(id)
            .into_iter()
            .filter_map(|i| snapshot.block(i))
            .collect()
    }

    /// Names from the first level below the root down to `id`.
    pub fn path(&self, id: BranchId) -> Vec<Symbol> {
        let mut path = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let node = self.node(c);
            if let Some(name) = &node.name {
                path.push(name.clone());
            }
            cur = node.parent;
        }
        path.reverse();
        path
    }

    /// Depth-first pre-order walk yielding each node with its depth
    /// (root at depth 0), children in list order.
    pub fn walk(&self) -> Vec<(BranchId, usize)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(BranchId::ROOT, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            out.push((id, depth));
            for &child in self.children(id).iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }

    fn build_path(&mut self, mut parent: BranchId, frames: &[Symbol]) -> BranchId {
        // Frames are innermost first; the path grows from the outermost one.
        for name in frames.iter().rev() {
            parent = match self.find_child(parent, name) {
                Some(existing) => existing,
                None => self.append_child(parent, name.clone()),
            };
        }
        parent
    }

    fn update_stat(
        &mut self,
        from: BranchId,
        alloc_by_app: u64,
        count: u32,
        pools: u32,
        tags: u32,
    ) {
        let mut cur = Some(from);
        while let Some(id) = cur {
            let node = &mut self.nodes[id.0];
            node.alloc_by_app += alloc_by_app;
            node.block_count += count;
            node.pools |= pools;
            node.tags |= tags;
            cur = node.parent;
        }
    }
}

impl Default for CallTree {
    fn default() -> Self {
        Self::new()
    }
}

/// Index of the outermost frame whose name is one of `roots`.
fn find_start_frame(names: &[Symbol], roots: &[Symbol]) -> Option<usize> {
    names
        .iter()
        .rposition(|n| roots.iter().any(|r| Symbol::ptr_eq(r, n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::load_snapshot;

    fn names(tree: &CallTree, ids: &[BranchId]) -> Vec<String> {
        ids.iter().map(|&id| tree.node(id).name_str().to_string()).collect()
    }

    fn assert_aggregates(tree: &CallTree, snapshot: &Snapshot) {
        for (id, _) in tree.walk() {
            let node = tree.node(id);
            let own: u64 = node
                .blocks
                .iter()
                .map(|&i| u64::from(snapshot.memory_blocks()[i].alloc_by_app))
                .sum();
            let below: u64 = node
                .children
                .iter()
                .map(|&c| tree.node(c).alloc_by_app)
                .sum();
            assert_eq!(node.alloc_by_app, own + below, "at {:?}", tree.path(id));

            let own_count = node.blocks.len() as u32;
            let below_count: u32 = node.children.iter().map(|&c| tree.node(c).block_count).sum();
            assert_eq!(node.block_count, own_count + below_count);
        }
    }

    #[test]
    fn groups_blocks_by_call_path() {
        let mut table = SymbolTable::new();
        let snapshot = load_snapshot(
            &mut table,
            &[(1, 100, 0x11), (2, 50, 0x11), (3, 10, 0x22)],
            &[(0x11, &["main", "foo", "bar"]), (0x22, &["main", "baz"])],
        );
        let main = table.find("main").unwrap().clone();
        let tree = snapshot.create_branch(&table, &[main]);

        assert_eq!(names(&tree, tree.children(BranchId::ROOT)), ["main"]);
        let main_id = tree.children(BranchId::ROOT)[0];
        assert_eq!(tree.node(main_id).alloc_by_app, 160);
        assert_eq!(tree.node(main_id).block_count, 3);
        assert_eq!(names(&tree, tree.children(main_id)), ["baz", "foo"]);

        let baz = tree.children(main_id)[0];
        assert_eq!(tree.node(baz).alloc_by_app, 10);
        assert_eq!(tree.node(baz).blocks, [2]);

        let foo = tree.children(main_id)[1];
        let bar = tree.children(foo)[0];
        assert_eq!(tree.node(bar).name_str(), "bar");
        assert_eq!(tree.node(bar).alloc_by_app, 150);
        let orders: Vec<u32> = tree
            .memory_blocks_in(bar, &snapshot)
            .iter()
            .map(|b| b.order_no)
            .collect();
        assert_eq!(orders, [1, 2]);
        assert_eq!(tree.root().alloc_by_app, 160);
        assert_aggregates(&tree, &snapshot);
    }

    #[test]
    fn root_is_the_outermost_matching_frame() {
        let mut table = SymbolTable::new();
        let snapshot = load_snapshot(
            &mut table,
            &[(1, 8, 0x1)],
            &[(0x1, &["main", "update", "tick", "update", "alloc"])],
        );
        let update = table.find("update").unwrap().clone();
        let tree = snapshot.create_branch(&table, &[update]);

        let first = tree.children(BranchId::ROOT)[0];
        let path = tree.path(tree.deepest_single_child(first));
        let path: Vec<&str> = path.iter().map(Symbol::as_str).collect();
        assert_eq!(path, ["update", "tick", "update", "alloc"]);
    }

    #[test]
    fn backtraces_outside_roots_are_excluded() {
        let mut table = SymbolTable::new();
        let snapshot = load_snapshot(
            &mut table,
            &[(1, 8, 0x1), (2, 16, 0x2)],
            &[(0x1, &["main", "render"]), (0x2, &["worker", "decode"])],
        );
        let render = table.find("render").unwrap().clone();
        let tree = snapshot.create_branch(&table, &[render]);
        assert_eq!(tree.root().alloc_by_app, 8);
        assert_eq!(tree.root().block_count, 1);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn several_roots_start_separate_subtrees() {
        let mut table = SymbolTable::new();
        let snapshot = load_snapshot(
            &mut table,
            &[(1, 8, 0x1), (2, 16, 0x2)],
            &[(0x1, &["main", "render"]), (0x2, &["worker", "decode"])],
        );
        let roots = [
            table.find("worker").unwrap().clone(),
            table.find("main").unwrap().clone(),
        ];
        let tree = snapshot.create_branch(&table, &roots);
        assert_eq!(names(&tree, tree.children(BranchId::ROOT)), ["main", "worker"]);
        assert_eq!(tree.root().alloc_by_app, 24);
        assert_aggregates(&tree, &snapshot);
    }

    #[test]
    fn inner_node_can_own_blocks() {
        let mut table = SymbolTable::new();
        let snapshot = load_snapshot(
            &mut table,
            &[(1, 30, 0x1), (2, 70, 0x2)],
            &[(0x1, &["main", "load"]), (0x2, &["main", "load", "inflate"])],
        );
        let main = table.find("main").unwrap().clone();
        let tree = snapshot.create_branch(&table, &[main]);
        let main_id = tree.children(BranchId::ROOT)[0];
        let load = tree.children(main_id)[0];
        assert_eq!(tree.node(load).blocks, [0]);
        assert_eq!(tree.node(load).alloc_by_app, 100);
        assert_eq!(tree.memory_blocks(load), [0, 1]);
        assert_aggregates(&tree, &snapshot);
    }

    #[test]
    fn pool_and_tag_masks_propagate() {
        let mut table = SymbolTable::new();
        let snapshot = load_snapshot(
            &mut table,
            &[(1, 30, 0x1), (2, 70, 0x2)],
            &[(0x1, &["main", "a"]), (0x2, &["main", "b"])],
        );
        let main = table.find("main").unwrap().clone();
        let tree = snapshot.create_branch(&table, &[main]);
        let main_id = tree.children(BranchId::ROOT)[0];
        // Fixture blocks sit in pool index 1.
        assert_eq!(tree.node(main_id).pools, 0b10);
    }

    impl CallTree {
        /// Follow single children down to the deepest node.
        fn deepest_single_child(&self, mut id: BranchId) -> BranchId {
            while let [only] = self.children(id) {
                id = *only;
            }
            id
        }
    }
}
