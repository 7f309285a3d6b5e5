//! The ultrametric "height table" tree: an arena of [`Node`]s plus a single
//! ascending-sorted vector of height [`Parameter`]s that every coalescing
//! node indexes into. Sharing a height index *is* the model: independent
//! population-pair divergences that happen to share one entry in this table
//! are asserted to share one evolutionary event.

use std::collections::HashMap;

use popgen::{Parameter, Split};
use slotmap::SlotMap;

use crate::error::PhyloError;
use crate::node::{Node, NodeId};

const HEIGHT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionPolicy {
    /// Merge the two colliding height slots into a single shared height.
    Permute,
    /// Swap which node-set occupies which of the two height slots, keeping
    /// both slots distinct.
    Swap,
    /// Like `Swap`, but propagated through every height the move crossed.
    SwapAll,
}

#[derive(Debug, Clone)]
pub struct BaseTree {
    nodes: SlotMap<NodeId, Node>,
    root: NodeId,
    /// Ascending by value; `heights[i]` is the `i`-th youngest internal
    /// divergence time shared by one or more nodes.
    heights: Vec<Parameter>,
    /// `height_owners[i]` is every node currently pinned to `heights[i]`.
    height_owners: Vec<Vec<NodeId>>,
    leaf_labels: Vec<String>,
    n_leaves: usize,
}

impl BaseTree {
    /// Build a tree from a parsed newick node, assigning each leaf an index
    /// from its position in `leaf_labels`. Internal-node heights come from
    /// the newick comment when present, else from the distance-from-leaves
    /// implied by branch lengths.
    pub fn from_newick(root: &treeio::newick::Node, leaf_labels: &[String]) -> Result<Self, PhyloError> {
        let mut nodes = SlotMap::with_key();
        let mut raw_heights: Vec<(NodeId, f64, Option<usize>)> = Vec::new();
        let n_leaves = leaf_labels.len();

        fn build(
            parsed: &treeio::newick::Node,
            leaf_labels: &[String],
            nodes: &mut SlotMap<NodeId, Node>,
            raw_heights: &mut Vec<(NodeId, f64, Option<usize>)>,
        ) -> Result<NodeId, PhyloError> {
            if parsed.is_leaf() {
                let label = parsed
                    .label
                    .clone()
                    .ok_or_else(|| PhyloError::InvalidTopology("leaf with no label".into()))?;
                let leaf_index = leaf_labels
                    .iter()
                    .position(|l| l == &label)
                    .ok_or_else(|| PhyloError::UnknownLeafLabel(label.clone()))?;
                let mut split = Split::new(leaf_labels.len());
                split.set_leaf_bit(leaf_index);
                let id = nodes.insert(Node::new_leaf(leaf_index, label, split));
                Ok(id)
            } else {
                let mut child_ids = Vec::with_capacity(parsed.children.len());
                for child in &parsed.children {
                    child_ids.push(build(child, leaf_labels, nodes, raw_heights)?);
                }
                let mut split = Split::new(leaf_labels.len());
                for child in &child_ids {
                    split.add_split(&nodes[*child].split).map_err(|e| {
                        PhyloError::InvalidTopology(format!("could not union child splits: {e}"))
                    })?;
                }
                let height = parsed.height.ok_or_else(|| {
                    PhyloError::InvalidTopology("internal node missing [&height=...] comment".into())
                })?;
                let id = nodes.insert(Node::new_internal(0, split));
                for child in &child_ids {
                    nodes[*child].parent = Some(id);
                }
                nodes[id].children = child_ids;
                raw_heights.push((id, height, parsed.height_index));
                Ok(id)
            }
        }

        let root_id = build(root, leaf_labels, &mut nodes, &mut raw_heights)?;

        // Deduplicate height values (nodes sharing an explicit height_index,
        // or numerically-equal heights) into one table entry each.
        raw_heights.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        let mut heights = Vec::new();
        let mut height_owners: Vec<Vec<NodeId>> = Vec::new();
        for (id, value, _) in &raw_heights {
            match heights.last().map(|p: &Parameter| (p.value() - value).abs() < HEIGHT_EPSILON) {
                Some(true) => height_owners.last_mut().unwrap().push(*id),
                _ => {
                    heights.push(Parameter::new(*value));
                    height_owners.push(vec![*id]);
                }
            }
        }
        for (i, owners) in height_owners.iter().enumerate() {
            for id in owners {
                nodes[*id].height_index = Some(i);
            }
        }

        let mut tree = Self {
            nodes,
            root: root_id,
            heights,
            height_owners,
            leaf_labels: leaf_labels.to_vec(),
            n_leaves,
        };
        tree.vet_tree()?;
        Ok(tree)
    }

    pub fn to_newick(&self, precision: usize) -> treeio::newick::Node {
        self.to_newick_node(self.root, precision)
    }

    fn to_newick_node(&self, id: NodeId, precision: usize) -> treeio::newick::Node {
        let node = &self.nodes[id];
        let height = self.node_age(id);
        let branch_length = node.parent.map(|p| self.node_age(p) - height);
        let children = node.children.iter().map(|c| self.to_newick_node(*c, precision)).collect();
        treeio::newick::Node {
            label: node.label.clone(),
            branch_length,
            height: Some(height),
            height_index: node.height_index,
            children,
        }
    }

    pub fn n_leaves(&self) -> usize {
        self.n_leaves
    }

    pub fn n_heights(&self) -> usize {
        self.heights.len()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id]
    }

    pub fn leaf_labels(&self) -> &[String] {
        &self.leaf_labels
    }

    pub fn node_age(&self, id: NodeId) -> f64 {
        match self.nodes[id].height_index {
            Some(hi) => self.heights[hi].value(),
            None => 0.0,
        }
    }

    pub fn height_value(&self, height_index: usize) -> f64 {
        self.heights[height_index].value()
    }

    pub fn set_height_value(&mut self, height_index: usize, value: f64) {
        self.heights[height_index].set_value(value);
    }

    pub fn height_owners(&self, height_index: usize) -> &[NodeId] {
        &self.height_owners[height_index]
    }

    pub fn get_node_height_index(&self, id: NodeId) -> Option<usize> {
        self.nodes[id].height_index
    }

    /// Largest age any child attached to `height_index` must be younger
    /// than (zero for leaf children) — the floor a slide/merge/split move
    /// must respect.
    pub fn height_floor(&self, height_index: usize) -> f64 {
        self.height_owners[height_index]
            .iter()
            .flat_map(|&id| self.nodes[id].children.iter())
            .map(|&child| self.node_age(child))
            .fold(0.0, f64::max)
    }

    /// The age every node attached to `height_index` must stay younger than:
    /// its parent's height, or `f64::INFINITY` at the root.
    pub fn height_ceiling(&self, height_index: usize) -> f64 {
        self.height_owners[height_index]
            .iter()
            .filter_map(|&id| self.nodes[id].parent)
            .map(|parent| self.node_age(parent))
            .fold(f64::INFINITY, f64::min)
    }

    pub fn is_root_height(&self, height_index: usize) -> bool {
        self.height_owners[height_index].iter().any(|&id| self.nodes[id].is_root())
    }

    /// Height indices strictly younger than `height_index` and strictly
    /// older than `height_index`'s nearest younger neighbor that shares an
    /// ancestor-descendant relationship with it — in practice, every height
    /// index strictly between `lo` and `hi` in sorted order.
    pub fn get_intervening_height_indices(&self, lo: usize, hi: usize) -> Vec<usize> {
        if lo >= hi {
            return Vec::new();
        }
        ((lo + 1)..hi).collect()
    }

    /// The height index whose value is closest to `value`.
    pub fn get_nearest_height_index(&self, value: f64) -> usize {
        self.heights
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                (a.value() - value).abs().partial_cmp(&(b.value() - value).abs()).unwrap()
            })
            .map(|(i, _)| i)
            .unwrap_or(0)
    }

    /// Re-derive each node's height index after `heights` has been mutated
    /// in place (e.g. after a slide). Stable: ties keep their relative
    /// height-owner grouping.
    pub fn sort_node_heights(&mut self) {
        let mut order: Vec<usize> = (0..self.heights.len()).collect();
        order.sort_by(|&a, &b| self.heights[a].value().partial_cmp(&self.heights[b].value()).unwrap());

        let sorted_heights: Vec<Parameter> = order.iter().map(|&i| self.heights[i].clone()).collect();
        let sorted_owners: Vec<Vec<NodeId>> = order.iter().map(|&i| self.height_owners[i].clone()).collect();
        self.heights = sorted_heights;
        self.height_owners = sorted_owners;
        for (new_index, owners) in self.height_owners.iter().enumerate() {
            for &id in owners {
                self.nodes[id].height_index = Some(new_index);
            }
        }
    }

    /// Every node's split, grouped by the height index it is pinned to —
    /// used both by the likelihood engine's clade-cache lookups and by
    /// `vet_tree`'s compatibility checks.
    pub fn splits_by_height_index(&self) -> HashMap<usize, Vec<Split>> {
        let mut map: HashMap<usize, Vec<Split>> = HashMap::new();
        for (&id, node) in self.nodes.iter().map(|(id, n)| (&id, n)) {
            if let Some(hi) = node.height_index {
                map.entry(hi).or_default().push(node.split.clone());
            }
        }
        map
    }

    pub fn store(&mut self) {
        for h in &mut self.heights {
            h.store();
        }
    }

    pub fn restore(&mut self) {
        for h in &mut self.heights {
            h.restore();
        }
        self.sort_node_heights();
    }

    /// Sum of the log-prior density over every height in the table: the
    /// root's own prior, plus for every other height a Beta-distributed
    /// fraction of the `(floor, ceiling)` window it's confined to (with the
    /// log-Jacobian of that linear rescaling).
    pub fn log_prior_on_heights(&self, relative_height_prior: &popgen::Distribution) -> f64 {
        let root_index = self.heights.len() - 1;
        let mut total = self.heights[root_index].prior_ln_pdf();
        for i in 0..root_index {
            let floor = self.height_floor(i);
            let ceiling = self.height_ceiling(i);
            let span = ceiling - floor;
            if span <= 0.0 {
                return f64::NEG_INFINITY;
            }
            let fraction = (self.heights[i].value() - floor) / span;
            total += relative_height_prior.ln_pdf(fraction).unwrap_or(f64::NEG_INFINITY);
            total -= span.ln();
        }
        total
    }

    /// Attempt a random-walk slide of `height_index` by up to `window` in
    /// either direction, reflecting at the floor/ceiling boundary. Returns
    /// `true` if the move landed inside another height's slot and a
    /// collision was resolved, `false` for an ordinary within-bounds slide.
    pub fn slide_bump(
        &mut self,
        height_index: usize,
        window: f64,
        policy: CollisionPolicy,
        rng: &mut popgen::RandomSource,
    ) -> bool {
        let floor = self.height_floor(height_index);
        let ceiling = self.height_ceiling(height_index);
        let current = self.heights[height_index].value();
        let mut proposal = current + rng.uniform_real(-window, window);
        // Reflect at the hard boundary so every draw stays admissible.
        if proposal < floor {
            proposal = floor + (floor - proposal);
        }
        if proposal > ceiling && ceiling.is_finite() {
            proposal = ceiling - (proposal - ceiling);
        }
        self.heights[height_index].set_value(proposal);

        let collision = (0..self.heights.len())
            .filter(|&i| i != height_index)
            .find(|&i| (self.heights[i].value() - proposal).abs() < HEIGHT_EPSILON);

        if let Some(neighbor) = collision {
            self.resolve_collision(height_index, neighbor, policy);
            true
        } else {
            self.sort_node_heights();
            false
        }
    }

    fn resolve_collision(&mut self, a: usize, b: usize, policy: CollisionPolicy) {
        match policy {
            CollisionPolicy::Permute => {
                let merged_value = self.heights[a].value();
                let mut owners_b = std::mem::take(&mut self.height_owners[b]);
                self.height_owners[a].append(&mut owners_b);
                self.heights[a].set_value(merged_value);
                self.heights.remove(b);
                self.height_owners.remove(b);
                self.sort_node_heights();
            }
            CollisionPolicy::Swap => {
                self.height_owners.swap(a, b);
                self.sort_node_heights();
            }
            CollisionPolicy::SwapAll => {
                let (lo, hi) = (a.min(b), a.max(b));
                for i in lo..hi {
                    self.height_owners.swap(i, i + 1);
                }
                self.sort_node_heights();
            }
        }
    }

    /// Merge `height_index` with its immediate parent height, so every node
    /// attached to either now shares one divergence time. The reverse of
    /// `split_down`.
    pub fn merge_up(&mut self, height_index: usize) -> Result<(), PhyloError> {
        if self.is_root_height(height_index) {
            return Err(PhyloError::InvalidTopology("cannot merge the root height upward".into()));
        }
        let ceiling_index = (height_index + 1..self.heights.len())
            .find(|&i| (self.height_ceiling(height_index) - self.heights[i].value()).abs() < HEIGHT_EPSILON)
            .ok_or_else(|| PhyloError::InvalidTopology("no parent height to merge into".into()))?;
        let merged_value = self.heights[ceiling_index].value();
        let mut owners = std::mem::take(&mut self.height_owners[height_index]);
        self.height_owners[ceiling_index].append(&mut owners);
        self.heights[ceiling_index].set_value(merged_value);
        self.heights.remove(height_index);
        self.height_owners.remove(height_index);
        self.sort_node_heights();
        Ok(())
    }

    /// Split the node set sharing `height_index` into two groups at two
    /// distinct new ages, both inside `(floor, ceiling)`. A singleton
    /// polytomy (one node with more than two children) is split by first
    /// partitioning its children into two non-empty groups, only then
    /// drawing the two new heights.
    pub fn split_down(
        &mut self,
        height_index: usize,
        rng: &mut popgen::RandomSource,
    ) -> Result<(), PhyloError> {
        let owners = self.height_owners[height_index].clone();
        let floor = self.height_floor(height_index);
        let ceiling = self.height_ceiling(height_index);
        if !(ceiling - floor > 2.0 * HEIGHT_EPSILON) {
            return Err(PhyloError::InvalidTopology("height window too narrow to split".into()));
        }

        let (group_a, group_b): (Vec<NodeId>, Vec<NodeId>) = if owners.len() == 1 {
            let singleton = owners[0];
            let children = self.nodes[singleton].children.clone();
            if children.len() < 3 {
                return Err(PhyloError::InvalidTopology(
                    "singleton height needs a polytomy of 3+ children to split".into(),
                ));
            }
            let partition = rng.random_subsets(children.len(), 2);
            let a: Vec<NodeId> = partition[0].iter().map(|&i| children[i]).collect();
            let b: Vec<NodeId> = partition[1].iter().map(|&i| children[i]).collect();
            // Re-parent one group under a brand new internal node sharing
            // the old height index's identity; the other stays at `singleton`.
            let new_split = self.union_split(&b);
            let new_node = self.nodes.insert(Node::new_internal(height_index, new_split));
            for &child in &b {
                self.nodes[child].parent = Some(new_node);
            }
            self.nodes[new_node].parent = Some(singleton);
            self.nodes[singleton].children = a.clone();
            self.nodes[singleton].children.push(new_node);
            (vec![singleton], vec![new_node])
        } else {
            let mid = owners.len() / 2;
            (owners[..mid].to_vec(), owners[mid..].to_vec())
        };

        let (lo, hi) = {
            let mut v0 = floor + rng.uniform_real(0.0, ceiling - floor);
            let mut v1 = floor + rng.uniform_real(0.0, ceiling - floor);
            if (v0 - v1).abs() < HEIGHT_EPSILON {
                v1 = (v1 + (ceiling - floor) / 2.0).min(ceiling - HEIGHT_EPSILON);
            }
            if v0 > v1 {
                std::mem::swap(&mut v0, &mut v1);
            }
            (v0, v1)
        };

        self.heights[height_index].set_value(lo);
        self.height_owners[height_index] = group_a;
        let new_param = Parameter::new(hi);
        self.heights.push(new_param);
        self.height_owners.push(group_b);
        self.sort_node_heights();
        Ok(())
    }

    fn union_split(&self, ids: &[NodeId]) -> Split {
        let mut split = Split::new(self.n_leaves);
        for &id in ids {
            let _ = split.add_split(&self.nodes[id].split);
        }
        split
    }

    /// Structural invariants: every leaf is at age zero, every node is
    /// strictly younger than its parent, and splits compose correctly up
    /// the tree.
    pub fn vet_tree(&self) -> Result<(), PhyloError> {
        for (id, node) in self.nodes.iter() {
            if node.is_leaf() {
                continue;
            }
            let age = self.node_age(id);
            for &child in &node.children {
                let child_age = self.node_age(child);
                if child_age > age + HEIGHT_EPSILON {
                    return Err(PhyloError::InvalidTopology(format!(
                        "child of node at height {age} is older ({child_age})"
                    )));
                }
                if !node.split.is_compatible(&self.nodes[child].split) {
                    return Err(PhyloError::InvalidTopology("incompatible child split".into()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree() -> BaseTree {
        let parsed = treeio::newick::parse("((A[&height=0]:1,B[&height=0]:1)[&height=1,height_index=0]:1,(C[&height=0]:2,D[&height=0]:2)[&height=2,height_index=1]:0)[&height=3,height_index=1];").unwrap();
        // height_index=1 reused deliberately exercises the interior-node
        // height_index handling; BaseTree derives its own canonical indices
        // from the sorted values regardless of what the newick comment said.
        BaseTree::from_newick(&parsed, &["A".into(), "B".into(), "C".into(), "D".into()]).unwrap()
    }

    #[test]
    fn parses_the_four_taxon_scenario() {
        let tree = sample_tree();
        assert_eq!(tree.n_leaves(), 4);
        assert_eq!(tree.n_heights(), 3);
        assert!(tree.vet_tree().is_ok());
    }

    #[test]
    fn store_restore_round_trips_height_values() {
        let mut tree = sample_tree();
        tree.store();
        let original: Vec<f64> = (0..tree.n_heights()).map(|i| tree.height_value(i)).collect();
        tree.set_height_value(0, 42.0);
        tree.restore();
        let restored: Vec<f64> = (0..tree.n_heights()).map(|i| tree.height_value(i)).collect();
        assert_eq!(original, restored);
    }

    #[test]
    fn slide_within_bounds_does_not_collide() {
        let mut tree = sample_tree();
        let mut rng = popgen::RandomSource::seeded(0);
        let collided = tree.slide_bump(0, 0.01, CollisionPolicy::Permute, &mut rng);
        assert!(!collided);
        assert!(tree.height_value(0) > 0.0);
    }

    #[test]
    fn splits_by_height_index_groups_every_node() {
        let tree = sample_tree();
        let map = tree.splits_by_height_index();
        let total: usize = map.values().map(Vec::len).sum();
        assert_eq!(total, tree.n_leaves() - 1); // one internal node per non-root coalescence, flattened
    }
}
