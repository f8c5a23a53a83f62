use super::newick::{self, NewickError, NewickNode};
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap, new_key_type};
use std::collections::HashSet;
use std::fmt::Write;
use thiserror::Error;

new_key_type! {
    pub struct NodeId;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Regraft move references nodes outside the tree or would break its structure")]
    InvalidMove,
    #[error("The root marks no edge to attach to")]
    RootEdge,
    #[error("At least {required} taxa are required, found {actual}")]
    TooFewTaxa { required: usize, actual: usize },
}

#[derive(Debug, Clone)]
pub struct Node {
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    branch: f64, // length of the edge towards the parent; unused on the root
    tip: Option<usize>,
}

impl Node {
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn branch(&self) -> f64 {
        self.branch
    }

    pub fn tip(&self) -> Option<usize> {
        self.tip
    }

    pub fn is_tip(&self) -> bool {
        self.tip.is_some()
    }
}

/// A prune-and-regraft move: detach the subtree below `prune`, then reinsert
/// it on the edge marked by `regraft`. Node ids are only meaningful against
/// the tree instance (or a clone of it) the move was enumerated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SprMove {
    pub prune: NodeId,
    pub regraft: NodeId,
}

/// A strictly bifurcating tree over taxon indices, stored as an arena.
///
/// The tree is kept in rooted form with a binary root; under reversible
/// substitution models the likelihood is invariant to the root placement, so
/// the root is purely an evaluation convenience. Every non-root node marks the
/// edge to its parent, which gives edges stable handles for branch-length
/// optimization and regraft targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Topology {
    nodes: SlotMap<NodeId, Node>,
    root: NodeId,
    tip_count: usize,
}

impl Topology {
    pub fn two_taxon(first: usize, second: usize, branch: f64) -> Self {
        let mut nodes = SlotMap::with_key();
        let root = nodes.insert(Node {
            parent: None,
            children: Vec::new(),
            branch: 0.0,
            tip: None,
        });
        let a = nodes.insert(Node {
            parent: Some(root),
            children: Vec::new(),
            branch: branch * 0.5,
            tip: Some(first),
        });
        let b = nodes.insert(Node {
            parent: Some(root),
            children: Vec::new(),
            branch: branch * 0.5,
            tip: Some(second),
        });
        nodes[root].children = vec![a, b];
        Self {
            nodes,
            root,
            tip_count: 2,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn tip_count(&self) -> usize {
        self.tip_count
    }

    pub fn branch(&self, id: NodeId) -> f64 {
        self.nodes[id].branch
    }

    pub fn set_branch(&mut self, id: NodeId, length: f64) {
        self.nodes[id].branch = length;
    }

    /// Splits the edge above `below` and hangs a new tip off the junction.
    pub fn attach_tip(
        &mut self,
        taxon: usize,
        below: NodeId,
        branch: f64,
    ) -> Result<NodeId, TreeError> {
        let parent = self.nodes[below].parent.ok_or(TreeError::RootEdge)?;
        let split = self.nodes[below].branch * 0.5;
        let junction = self.nodes.insert(Node {
            parent: Some(parent),
            children: Vec::new(),
            branch: split,
            tip: None,
        });
        let tip = self.nodes.insert(Node {
            parent: Some(junction),
            children: Vec::new(),
            branch,
            tip: Some(taxon),
        });
        for child in self.nodes[parent].children.iter_mut() {
            if *child == below {
                *child = junction;
            }
        }
        self.nodes[junction].children = vec![below, tip];
        self.nodes[below].parent = Some(junction);
        self.nodes[below].branch = split;
        self.tip_count += 1;
        Ok(tip)
    }

    pub fn postorder(&self) -> Vec<NodeId> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(self.root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                out.push(id);
                continue;
            }
            stack.push((id, true));
            for &child in &self.nodes[id].children {
                stack.push((child, false));
            }
        }
        out
    }

    // Canonical per-node keys: (smallest taxon index in the subtree, subtree
    // size). Unique per node and independent of arena slot history, so node
    // orderings derived from them survive serialization round trips.
    fn canonical_keys(&self) -> SecondaryMap<NodeId, (usize, usize)> {
        let mut keys: SecondaryMap<NodeId, (usize, usize)> = SecondaryMap::new();
        for id in self.postorder() {
            let node = &self.nodes[id];
            let key = match node.tip {
                Some(taxon) => (taxon, 1),
                None => {
                    let mut min_taxon = usize::MAX;
                    let mut size = 1;
                    for &child in &node.children {
                        let (child_min, child_size) = keys[child];
                        min_taxon = min_taxon.min(child_min);
                        size += child_size;
                    }
                    (min_taxon, size)
                }
            };
            keys.insert(id, key);
        }
        keys
    }

    /// Every edge-marking node (all but the root) in canonical order.
    pub fn branch_nodes(&self) -> Vec<NodeId> {
        let keys = self.canonical_keys();
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|(_, node)| node.parent.is_some())
            .map(|(id, _)| id)
            .collect();
        ids.sort_by_key(|&id| keys[id]);
        ids
    }

    /// Enumerates prune-and-regraft moves within `radius` edge hops of the
    /// pruned edge, in canonical order.
    ///
    /// Excluded as trivial: regrafting onto the sibling edge (which recreates
    /// the current tree), onto any edge inside the pruned subtree, and onto the
    /// root. Prune candidates keep the root fixed, so both their parent and
    /// grandparent must exist.
    pub fn spr_candidates(&self, radius: usize) -> Vec<SprMove> {
        let keys = self.canonical_keys();
        let mut moves = Vec::new();
        for (prune, node) in self.nodes.iter() {
            let Some(parent) = node.parent else { continue };
            if self.nodes[parent].parent.is_none() {
                continue;
            }
            let Some(&sibling) = self.nodes[parent]
                .children
                .iter()
                .find(|&&child| child != prune)
            else {
                continue;
            };

            let mut seen: HashSet<NodeId> = HashSet::from([parent, prune]);
            let mut frontier = vec![parent];
            for _ in 0..radius {
                let mut next = Vec::new();
                for &at in &frontier {
                    for &child in &self.nodes[at].children {
                        if seen.insert(child) {
                            next.push(child);
                        }
                    }
                    if let Some(up) = self.nodes[at].parent {
                        if seen.insert(up) {
                            next.push(up);
                        }
                    }
                }
                for &regraft in &next {
                    if regraft == sibling || self.nodes[regraft].parent.is_none() {
                        continue;
                    }
                    moves.push(SprMove { prune, regraft });
                }
                frontier = next;
            }
        }
        moves.sort_by_key(|mv| (keys[mv.prune], keys[mv.regraft]));
        moves
    }

    /// Applies a prune-and-regraft move in place.
    ///
    /// The pruned subtree's parent is suppressed (its sibling edge absorbs the
    /// parent edge) and reused as the new junction on the regraft edge, which
    /// is split at its midpoint.
    pub fn apply_spr(&mut self, mv: &SprMove) -> Result<(), TreeError> {
        let prune = mv.prune;
        let regraft = mv.regraft;
        let parent = self
            .nodes
            .get(prune)
            .and_then(|n| n.parent)
            .ok_or(TreeError::InvalidMove)?;
        let grand = self.nodes[parent].parent.ok_or(TreeError::InvalidMove)?;
        let &sibling = self.nodes[parent]
            .children
            .iter()
            .find(|&&child| child != prune)
            .ok_or(TreeError::InvalidMove)?;
        if regraft == prune || regraft == parent || regraft == sibling {
            return Err(TreeError::InvalidMove);
        }
        if self.nodes.get(regraft).is_none() || self.descends_from(regraft, prune) {
            return Err(TreeError::InvalidMove);
        }
        let above = self.nodes[regraft].parent.ok_or(TreeError::InvalidMove)?;

        // Detach: suppress the parent, splicing the sibling onto the grandparent.
        let parent_branch = self.nodes[parent].branch;
        for child in self.nodes[grand].children.iter_mut() {
            if *child == parent {
                *child = sibling;
            }
        }
        self.nodes[sibling].parent = Some(grand);
        self.nodes[sibling].branch += parent_branch;

        // Reinsert: the suppressed parent becomes the junction on the regraft edge.
        let regraft_branch = self.nodes[regraft].branch;
        for child in self.nodes[above].children.iter_mut() {
            if *child == regraft {
                *child = parent;
            }
        }
        self.nodes[parent].parent = Some(above);
        self.nodes[parent].branch = regraft_branch * 0.5;
        self.nodes[parent].children = vec![regraft, prune];
        self.nodes[regraft].parent = Some(parent);
        self.nodes[regraft].branch = regraft_branch * 0.5;
        Ok(())
    }

    fn descends_from(&self, start: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = Some(start);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.nodes[id].parent;
        }
        false
    }

    pub fn to_index_newick(&self) -> String {
        let mut out = String::new();
        self.render(self.root, None, &mut out);
        out.push(';');
        out
    }

    pub fn to_newick(&self, labels: &[String]) -> String {
        let mut out = String::new();
        self.render(self.root, Some(labels), &mut out);
        out.push(';');
        out
    }

    fn render(&self, id: NodeId, labels: Option<&[String]>, out: &mut String) {
        let node = &self.nodes[id];
        if node.children.is_empty() {
            if let Some(taxon) = node.tip {
                match labels.and_then(|l| l.get(taxon)) {
                    Some(name) => out.push_str(name),
                    None => {
                        let _ = write!(out, "{taxon}");
                    }
                }
            }
        } else {
            out.push('(');
            for (i, &child) in node.children.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                self.render(child, labels, out);
            }
            out.push(')');
        }
        if node.parent.is_some() {
            let _ = write!(out, ":{}", node.branch);
        }
    }

    fn validate(&self) -> Result<(), NewickError> {
        let mut seen = HashSet::new();
        let mut tips = 0usize;
        for id in self.postorder() {
            let node = &self.nodes[id];
            match node.tip {
                Some(taxon) => {
                    if !node.children.is_empty() {
                        return Err(NewickError::NotBinary);
                    }
                    if !seen.insert(taxon) {
                        return Err(NewickError::DuplicateTip(taxon));
                    }
                    tips += 1;
                }
                None => {
                    if node.children.len() != 2 {
                        return Err(NewickError::NotBinary);
                    }
                }
            }
            if id != self.root && !(node.branch.is_finite() && node.branch >= 0.0) {
                return Err(NewickError::InvalidBranch(node.branch.to_string()));
            }
        }
        if tips != self.tip_count || tips < 2 {
            return Err(NewickError::NotBinary);
        }
        Ok(())
    }
}

impl PartialEq for Topology {
    fn eq(&self, other: &Self) -> bool {
        self.to_index_newick() == other.to_index_newick()
    }
}

impl From<Topology> for String {
    fn from(tree: Topology) -> Self {
        tree.to_index_newick()
    }
}

impl TryFrom<String> for Topology {
    type Error = NewickError;

    fn try_from(text: String) -> Result<Self, Self::Error> {
        let ast = newick::parse(&text)?;
        let mut nodes = SlotMap::with_key();
        let root = build_node(&mut nodes, &ast, None)?;
        let tip_count = nodes.values().filter(|n| n.tip.is_some()).count();
        let tree = Topology {
            nodes,
            root,
            tip_count,
        };
        tree.validate()?;
        Ok(tree)
    }
}

fn build_node(
    nodes: &mut SlotMap<NodeId, Node>,
    ast: &NewickNode,
    parent: Option<NodeId>,
) -> Result<NodeId, NewickError> {
    let branch = ast.branch.unwrap_or(0.0);
    if ast.children.is_empty() {
        let label = ast.label.as_ref().ok_or(NewickError::MissingLabel)?;
        let taxon = label
            .parse::<usize>()
            .map_err(|_| NewickError::InvalidLabel(label.clone()))?;
        Ok(nodes.insert(Node {
            parent,
            children: Vec::new(),
            branch,
            tip: Some(taxon),
        }))
    } else {
        let id = nodes.insert(Node {
            parent,
            children: Vec::new(),
            branch,
            tip: None,
        });
        let mut children = Vec::with_capacity(ast.children.len());
        for child in &ast.children {
            children.push(build_node(nodes, child, Some(id))?);
        }
        nodes[id].children = children;
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn find_tip(tree: &Topology, taxon: usize) -> NodeId {
        tree.postorder()
            .into_iter()
            .find(|&id| tree.node(id).tip() == Some(taxon))
            .unwrap()
    }

    fn five_taxon_tree() -> Topology {
        let mut tree = Topology::two_taxon(0, 1, 0.2);
        tree.attach_tip(2, find_tip(&tree, 1), 0.1).unwrap();
        tree.attach_tip(3, find_tip(&tree, 2), 0.1).unwrap();
        tree.attach_tip(4, find_tip(&tree, 0), 0.1).unwrap();
        tree
    }

    fn tip_set(tree: &Topology) -> Vec<usize> {
        let mut tips: Vec<usize> = tree
            .postorder()
            .into_iter()
            .filter_map(|id| tree.node(id).tip())
            .collect();
        tips.sort_unstable();
        tips
    }

    fn total_branch_length(tree: &Topology) -> f64 {
        tree.postorder()
            .into_iter()
            .filter(|&id| id != tree.root())
            .map(|id| tree.branch(id))
            .sum()
    }

    #[test]
    fn two_taxon_builds_a_minimal_valid_tree() {
        let tree = Topology::two_taxon(0, 1, 0.2);

        assert_eq!(tree.tip_count(), 2);
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.node(tree.root()).children().len(), 2);
        assert!(tree.validate().is_ok());
        assert!((total_branch_length(&tree) - 0.2).abs() < 1e-12);
    }

    #[test]
    fn attach_tip_splits_the_edge_and_conserves_existing_length() {
        let mut tree = Topology::two_taxon(0, 1, 0.2);
        tree.attach_tip(2, find_tip(&tree, 1), 0.3).unwrap();

        assert_eq!(tree.tip_count(), 3);
        assert_eq!(tree.len(), 5);
        assert!(tree.validate().is_ok());
        assert!((total_branch_length(&tree) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn attach_tip_rejects_the_root() {
        let mut tree = Topology::two_taxon(0, 1, 0.2);
        let root = tree.root();

        assert_eq!(tree.attach_tip(2, root, 0.1), Err(TreeError::RootEdge));
    }

    #[test]
    fn postorder_visits_children_before_parents() {
        let tree = five_taxon_tree();
        let order = tree.postorder();

        assert_eq!(order.len(), tree.len());
        for (position, &id) in order.iter().enumerate() {
            for &child in tree.node(id).children() {
                let child_position = order.iter().position(|&o| o == child).unwrap();
                assert!(child_position < position);
            }
        }
    }

    #[test]
    fn spr_candidates_exclude_trivial_regrafts() {
        let tree = five_taxon_tree();
        let moves = tree.spr_candidates(10);

        assert!(!moves.is_empty());
        for mv in &moves {
            let parent = tree.node(mv.prune).parent().unwrap();
            let sibling = *tree
                .node(parent)
                .children()
                .iter()
                .find(|&&c| c != mv.prune)
                .unwrap();
            assert_ne!(mv.regraft, mv.prune);
            assert_ne!(mv.regraft, parent);
            assert_ne!(mv.regraft, sibling);
            assert!(tree.node(mv.regraft).parent().is_some());
            assert!(!tree.descends_from(mv.regraft, mv.prune));
        }
    }

    #[test]
    fn spr_candidates_grow_with_radius() {
        let tree = five_taxon_tree();

        let near = tree.spr_candidates(1);
        let far = tree.spr_candidates(4);
        assert!(near.len() < far.len());
        for mv in &near {
            assert!(far.contains(mv));
        }
    }

    #[test]
    fn apply_spr_preserves_tips_and_structure() {
        let tree = five_taxon_tree();
        for mv in tree.spr_candidates(6) {
            let mut candidate = tree.clone();
            candidate.apply_spr(&mv).unwrap();

            assert!(candidate.validate().is_ok());
            assert_eq!(candidate.len(), tree.len());
            assert_eq!(tip_set(&candidate), vec![0, 1, 2, 3, 4]);
        }
    }

    #[test]
    fn apply_spr_rejects_root_adjacent_prunes() {
        let mut tree = five_taxon_tree();
        let root_child = tree.node(tree.root()).children()[0];
        let any_edge = find_tip(&tree, 3);

        let result = tree.apply_spr(&SprMove {
            prune: root_child,
            regraft: any_edge,
        });
        assert_eq!(result, Err(TreeError::InvalidMove));
    }

    #[test]
    fn candidate_order_survives_serialization_round_trips() {
        let tree = five_taxon_tree();
        let rebuilt = Topology::try_from(tree.to_index_newick()).unwrap();

        let canonical = |t: &Topology, moves: &[SprMove]| -> Vec<String> {
            moves
                .iter()
                .map(|mv| {
                    let mut pruned = t.clone();
                    pruned.apply_spr(mv).unwrap();
                    pruned.to_index_newick()
                })
                .collect()
        };
        let original_moves = tree.spr_candidates(3);
        let rebuilt_moves = rebuilt.spr_candidates(3);

        assert_eq!(original_moves.len(), rebuilt_moves.len());
        assert_eq!(
            canonical(&tree, &original_moves),
            canonical(&rebuilt, &rebuilt_moves)
        );
    }

    #[test]
    fn index_newick_round_trips_branches_exactly() {
        let mut tree = five_taxon_tree();
        let edge = find_tip(&tree, 2);
        tree.set_branch(edge, 0.123_456_789_012_345_67);

        let rebuilt = Topology::try_from(tree.to_index_newick()).unwrap();
        assert_eq!(rebuilt, tree);
        assert_eq!(rebuilt.branch(find_tip(&rebuilt, 2)), tree.branch(edge));
    }

    #[test]
    fn try_from_rejects_duplicate_and_unlabeled_tips() {
        assert_eq!(
            Topology::try_from("(0:0.1,0:0.2);".to_string()),
            Err(NewickError::DuplicateTip(0))
        );
        assert_eq!(
            Topology::try_from("(0:0.1,(1:0.1,2:0.1,3:0.1):0.1);".to_string()),
            Err(NewickError::NotBinary)
        );
        assert_eq!(
            Topology::try_from("(0:0.1,x7:0.2);".to_string()),
            Err(NewickError::InvalidLabel("x7".to_string()))
        );
    }
}
