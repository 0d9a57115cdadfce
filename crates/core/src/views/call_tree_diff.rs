use std::cmp::Ordering;

use serde::Serialize;

use crate::model::Symbol;
use crate::views::call_tree::{BranchId, CallTree};

/// Handle of a node inside one [`CallTreeDiff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DiffId(usize);

impl DiffId {
    pub const ROOT: DiffId = DiffId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

/// Which input trees a diff node was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiffSide {
    Root,
    Both,
    LeftOnly,
    RightOnly,
}

/// A call path present in the left tree, the right tree or both.
#[derive(Debug, Clone, Serialize)]
pub struct BranchDiff {
    pub name: Option<Symbol>,
    pub left: Option<BranchId>,
    pub right: Option<BranchId>,
    pub parent: Option<DiffId>,
    pub children: Vec<DiffId>,
}

impl BranchDiff {
    pub fn side(&self) -> DiffSide {
        match (self.left, self.right) {
            (Some(_), Some(_)) => DiffSide::Both,
            (Some(_), None) => DiffSide::LeftOnly,
            (None, Some(_)) => DiffSide::RightOnly,
            (None, None) => DiffSide::Root,
        }
    }

    pub fn name_str(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }
}

/// Structural merge of two call trees by child name.
#[derive(Debug, Clone, Serialize)]
pub struct CallTreeDiff {
    nodes: Vec<BranchDiff>,
}

impl CallTreeDiff {
    /// Match the two trees level by level.
    ///
    /// Children with the same name on both sides pair up and are merged
    /// further; a child present on one side only is copied as a whole subtree
    /// referencing that side. Neither input is modified.
    pub fn create(left: &CallTree, right: &CallTree) -> Self {
        let mut diff = Self {
            nodes: vec![BranchDiff {
                name: None,
                left: None,
                right: None,
                parent: None,
                children: Vec::new(),
            }],
        };
        diff.follow_both(DiffId::ROOT, left, BranchId::ROOT, right, BranchId::ROOT);
        diff
    }

    pub fn root(&self) -> &BranchDiff {
        &self.nodes[0]
    }

    pub fn node(&self, id: DiffId) -> &BranchDiff {
        &self.nodes[id.0]
    }

    pub fn side(&self, id: DiffId) -> DiffSide {
        self.node(id).side()
    }

    pub fn name(&self, id: DiffId) -> Option<&Symbol> {
        self.node(id).name.as_ref()
    }

    pub fn children(&self, id: DiffId) -> &[DiffId] {
        &self.node(id).children
    }

    pub fn parent(&self, id: DiffId) -> Option<DiffId> {
        self.node(id).parent
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.root().children.is_empty()
    }

    /// Block indices below `id` on each side, in allocation order.
    pub fn memory_blocks(
        &self,
        id: DiffId,
        left: &CallTree,
        right: &CallTree,
    ) -> (Vec<usize>, Vec<usize>) {
        let node = self.node(id);
        match node.side() {
            DiffSide::Root => (
                left.memory_blocks(BranchId::ROOT),
                right.memory_blocks(BranchId::ROOT),
            ),
            _ => (
                node.left.map(|b| left.memory_blocks(b)).unwrap_or_default(),
                node.right.map(|b| right.memory_blocks(b)).unwrap_or_default(),
            ),
        }
    }

    /// Depth-first pre-order walk with depths, root at depth 0.
    pub fn walk(&self) -> Vec<(DiffId, usize)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(DiffId::ROOT, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            out.push((id, depth));
            for &child in self.children(id).iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }

    fn push(&mut self, node: BranchDiff) -> DiffId {
        let id = DiffId(self.nodes.len());
        if let Some(parent) = node.parent {
            self.nodes[parent.0].children.push(id);
        }
        self.nodes.push(node);
        id
    }

    fn follow_both(
        &mut self,
        parent: DiffId,
        left: &CallTree,
        l: BranchId,
        right: &CallTree,
        r: BranchId,
    ) {
        let lc = sorted_children(left, l);
        let rc = sorted_children(right, r);
        let (mut i, mut j) = (0, 0);

        while i < lc.len() && j < rc.len() {
            let ln = left.node(lc[i]).name_str();
            let rn = right.node(rc[j]).name_str();
            match ln.cmp(rn) {
                Ordering::Less => {
                    self.follow_one(parent, left, lc[i], Side::Left);
                    i += 1;
                }
                Ordering::Greater => {
                    self.follow_one(parent, right, rc[j], Side::Right);
                    j += 1;
                }
                Ordering::Equal => {
                    let id = self.push(BranchDiff {
                        name: left.node(lc[i]).name.clone(),
                        left: Some(lc[i]),
                        right: Some(rc[j]),
                        parent: Some(parent),
                        children: Vec::new(),
                    });
                    self.follow_both(id, left, lc[i], right, rc[j]);
                    i += 1;
                    j += 1;
                }
            }
        }
        for &rest in &lc[i..] {
            self.follow_one(parent, left, rest, Side::Left);
        }
        for &rest in &rc[j..] {
            self.follow_one(parent, right, rest, Side::Right);
        }
    }

    fn follow_one(&mut self, parent: DiffId, tree: &CallTree, branch: BranchId, side: Side) {
        let (left, right) = match side {
            Side::Left => (Some(branch), None),
            Side::Right => (None, Some(branch)),
        };
        let id = self.push(BranchDiff {
            name: tree.node(branch).name.clone(),
            left,
            right,
            parent: Some(parent),
            children: Vec::new(),
        });
        for child in sorted_children(tree, branch) {
            self.follow_one(id, tree, child, side);
        }
    }
}

#[derive(Clone, Copy)]
enum Side {
    Left,
    Right,
}

fn sorted_children(tree: &CallTree, id: BranchId) -> Vec<BranchId> {
    let mut children = tree.children(id).to_vec();
    children.sort_by(|a, b| tree.node(*a).name_str().cmp(tree.node(*b).name_str()));
    children
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::load_snapshot;
    use crate::symbol_table::SymbolTable;

    fn child_names(diff: &CallTreeDiff, id: DiffId) -> Vec<(&str, DiffSide)> {
        diff.children(id)
            .iter()
            .map(|&c| (diff.node(c).name_str(), diff.side(c)))
            .collect()
    }

    fn tree(
        table: &mut SymbolTable,
        blocks: &[(u32, u32, u32)],
        bktraces: &[(u32, &[&str])],
    ) -> (crate::Snapshot, CallTree) {
        let snapshot = load_snapshot(table, blocks, bktraces);
        let main = table.find("main").unwrap().clone();
        let tree = snapshot.create_branch(table, &[main]);
        (snapshot, tree)
    }

    #[test]
    fn pairs_by_name_and_keeps_one_sided_subtrees() {
        let mut table = SymbolTable::new();
        let (_, left) = tree(
            &mut table,
            &[(1, 10, 1), (2, 20, 2)],
            &[(1, &["main", "a", "x"]), (2, &["main", "b"])],
        );
        let (_, right) = tree(
            &mut table,
            &[(1, 10, 1), (3, 30, 3)],
            &[(1, &["main", "a", "x"]), (3, &["main", "c", "y"])],
        );
        let diff = CallTreeDiff::create(&left, &right);

        assert_eq!(diff.side(DiffId::ROOT), DiffSide::Root);
        assert_eq!(child_names(&diff, DiffId::ROOT), [("main", DiffSide::Both)]);
        let main = diff.children(DiffId::ROOT)[0];
        assert_eq!(
            child_names(&diff, main),
            [
                ("a", DiffSide::Both),
                ("b", DiffSide::LeftOnly),
                ("c", DiffSide::RightOnly),
            ]
        );
        let c = diff.children(main)[2];
        assert_eq!(child_names(&diff, c), [("y", DiffSide::RightOnly)]);
    }

    #[test]
    fn every_input_path_appears_once() {
        let mut table = SymbolTable::new();
        let (_, left) = tree(
            &mut table,
            &[(1, 10, 1), (2, 20, 2), (3, 5, 3)],
            &[
                (1, &["main", "a", "x"]),
                (2, &["main", "b"]),
                (3, &["main", "a", "z"]),
            ],
        );
        let (_, right) = tree(
            &mut table,
            &[(4, 10, 4), (5, 30, 5)],
            &[(4, &["main", "a", "w"]), (5, &["main", "a", "z"])],
        );
        let diff = CallTreeDiff::create(&left, &right);

        let mut seen_left = vec![false; left.len()];
        let mut seen_right = vec![false; right.len()];
        for (id, _) in diff.walk() {
            let node = diff.node(id);
            if let Some(l) = node.left {
                assert!(!seen_left[l.index()]);
                seen_left[l.index()] = true;
            }
            if let Some(r) = node.right {
                assert!(!seen_right[r.index()]);
                seen_right[r.index()] = true;
            }
        }
        // Every node but the unnamed roots is referenced.
        assert!(seen_left[1..].iter().all(|&s| s));
        assert!(seen_right[1..].iter().all(|&s| s));
    }

    #[test]
    fn inputs_are_left_untouched() {
        let mut table = SymbolTable::new();
        let (_, left) = tree(&mut table, &[(1, 10, 1)], &[(1, &["main", "b"])]);
        let (_, right) = tree(&mut table, &[(1, 10, 2)], &[(2, &["main", "a"])]);
        let before: Vec<BranchId> = left.children(BranchId::ROOT).to_vec();
        CallTreeDiff::create(&left, &right);
        assert_eq!(left.children(BranchId::ROOT), before.as_slice());
    }

    #[test]
    fn blocks_per_side() {
        let mut table = SymbolTable::new();
        let (_, left) = tree(&mut table, &[(1, 10, 1), (2, 20, 1)], &[(1, &["main", "a"])]);
        let (_, right) = tree(&mut table, &[(7, 10, 2)], &[(2, &["main", "b"])]);
        let diff = CallTreeDiff::create(&left, &right);
        let main = diff.children(DiffId::ROOT)[0];
        let (l, r) = diff.memory_blocks(main, &left, &right);
        assert_eq!(l, [0, 1]);
        assert_eq!(r, [0]);

        let b = diff.children(main)[1];
        let (l, r) = diff.memory_blocks(b, &left, &right);
        assert!(l.is_empty());
        assert_eq!(r, [0]);
    }

    #[test]
    fn diff_of_empty_trees_is_just_the_root() {
        let diff = CallTreeDiff::create(&CallTree::new(), &CallTree::new());
        assert_eq!(diff.len(), 1);
        assert!(diff.is_empty());
    }
}
