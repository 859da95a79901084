use hashbrown::HashMap;
use tracing::debug;

use super::node::{CfgNode, NodeId, Terminator};
use crate::error::{ConvertError, Result};

/// Arena owning every node of one converted function (or of a hull shader's leaf functions).
///
/// Dominance data is cached on the nodes and filled lazily. Adding edges with [`Self::add_branch`]
/// marks the traversal order stale; the next query renumbers the graph from the entry and drops
/// every cached dominator. Retargeting keeps the numbering and recomputes only the affected nodes.
///
/// Edges that go against the depth-first order (`post_visit_order(from) <= post_visit_order(to)`)
/// are retreating edges. They stay in the adjacency lists but are ignored when computing
/// dominators and post-dominance.
#[derive(Debug, Default)]
pub struct CfgNodePool {
    nodes: Vec<CfgNode>,
    entry: Option<NodeId>,
    order_dirty: bool,
}

impl CfgNodePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_node(&mut self) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(CfgNode::default());
        if self.entry.is_none() {
            self.entry = Some(id);
        }
        id
    }

    pub fn create_named_node(&mut self, name: &str) -> NodeId {
        let id = self.create_node();
        self.nodes[id.index()].name = name.to_owned();
        id
    }

    pub fn node(&self, id: NodeId) -> &CfgNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut CfgNode {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len() as u32).map(NodeId)
    }

    /// Root used for traversal numbering. Defaults to the first node created.
    pub fn entry(&self) -> Option<NodeId> {
        self.entry
    }

    pub fn set_entry(&mut self, entry: NodeId) {
        self.entry = Some(entry);
        self.order_dirty = true;
    }

    /// Adds `from -> to` unless the edge already exists.
    pub fn add_branch(&mut self, from: NodeId, to: NodeId) {
        self.link(from, to);
        self.order_dirty = true;
    }

    fn link(&mut self, from: NodeId, to: NodeId) {
        self.nodes[from.index()].add_unique_succ(to);
        self.nodes[to.index()].add_unique_pred(from);
    }

    pub fn set_terminator(&mut self, node: NodeId, terminator: Terminator) {
        self.nodes[node.index()].ir.terminator = Some(terminator);
    }

    pub fn add_unique_header(&mut self, node: NodeId, header: NodeId) {
        let headers = &mut self.nodes[node.index()].headers;
        if !headers.contains(&header) {
            headers.push(header);
        }
    }

    /// Numbers a node created after the last traversal so it can take part in queries.
    pub fn set_post_visit_order(&mut self, node: NodeId, order: u32) {
        self.nodes[node.index()].post_visit_order = Some(order);
    }

    pub fn invalidate_dominator(&mut self, node: NodeId) {
        self.nodes[node.index()].immediate_dominator = None;
    }

    fn order(&self, node: NodeId) -> u32 {
        self.nodes[node.index()].post_visit_order.unwrap_or(0)
    }

    fn is_entry(&self, node: NodeId) -> bool {
        self.entry == Some(node) || self.nodes[node.index()].pred.is_empty()
    }

    fn is_switch(&self, node: NodeId) -> bool {
        self.nodes[node.index()]
            .ir
            .terminator
            .as_ref()
            .is_some_and(Terminator::is_switch)
    }

    /// Successors reached through non-retreating edges.
    pub fn forward_succ(&mut self, node: NodeId) -> Vec<NodeId> {
        self.ensure_ordered();
        self.forward_succ_of(node)
    }

    fn forward_succ_of(&self, node: NodeId) -> Vec<NodeId> {
        let order = self.order(node);
        self.nodes[node.index()]
            .succ
            .iter()
            .copied()
            .filter(|&s| self.order(s) < order)
            .collect()
    }

    /// Predecessors reaching `node` through non-retreating edges.
    pub fn forward_pred(&mut self, node: NodeId) -> Vec<NodeId> {
        self.ensure_ordered();
        self.forward_pred_of(node)
    }

    fn forward_pred_of(&self, node: NodeId) -> Vec<NodeId> {
        let order = self.order(node);
        self.nodes[node.index()]
            .pred
            .iter()
            .copied()
            .filter(|&p| self.order(p) > order)
            .collect()
    }

    fn ensure_ordered(&mut self) {
        if self.order_dirty {
            self.compute_dominance();
        }
    }

    /// Renumbers all nodes reachable from the entry in depth-first post-order, drops cached
    /// dominators, fills them again and marks loop back edges.
    ///
    /// A retreating edge `n -> h` becomes `n`'s back-edge successor and `h`'s back-edge
    /// predecessor when `h` dominates `n`. Only the first such edge per endpoint is recorded.
    pub fn compute_dominance(&mut self) {
        self.order_dirty = false;
        for node in &mut self.nodes {
            node.post_visit_order = None;
            node.immediate_dominator = None;
            node.succ_back_edge = None;
            node.pred_back_edge = None;
        }
        let Some(entry) = self.entry else {
            return;
        };

        let mut visited = vec![false; self.nodes.len()];
        let mut post_order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![(entry, 0usize)];
        visited[entry.index()] = true;
        while let Some((node, next)) = stack.last_mut() {
            let node = *node;
            if let Some(&succ) = self.nodes[node.index()].succ.get(*next) {
                *next += 1;
                if !visited[succ.index()] {
                    visited[succ.index()] = true;
                    stack.push((succ, 0));
                }
            } else {
                stack.pop();
                post_order.push(node);
            }
        }
        for (i, &node) in post_order.iter().enumerate() {
            self.nodes[node.index()].post_visit_order = Some(i as u32 + 1);
        }

        for &node in post_order.iter().rev() {
            self.ensure_immediate_dominator(node);
        }

        for &node in post_order.iter().rev() {
            let order = self.order(node);
            let retreating: Vec<NodeId> = self.nodes[node.index()]
                .succ
                .iter()
                .copied()
                .filter(|&s| self.order(s) >= order)
                .collect();
            for header in retreating {
                if !self.dominates_inner(header, node) {
                    continue;
                }
                if self.nodes[node.index()].succ_back_edge.is_none() {
                    self.nodes[node.index()].succ_back_edge = Some(header);
                }
                if self.nodes[header.index()].pred_back_edge.is_none() {
                    self.nodes[header.index()].pred_back_edge = Some(node);
                }
            }
        }

        debug!(
            reachable = post_order.len(),
            total = self.nodes.len(),
            "computed dominance"
        );
    }

    fn ensure_immediate_dominator(&mut self, node: NodeId) -> NodeId {
        if let Some(idom) = self.nodes[node.index()].immediate_dominator {
            return idom;
        }
        self.recompute_immediate_dominator_inner(node)
    }

    /// Immediate dominator of `node`, computing it if needed. The entry returns itself.
    pub fn immediate_dominator(&mut self, node: NodeId) -> NodeId {
        self.ensure_ordered();
        self.ensure_immediate_dominator(node)
    }

    /// Meet of the immediate dominators of `node`'s forward predecessors. Back-edge predecessors
    /// are skipped; on a reducible graph `node` dominates them, so they never move the meet.
    pub fn recompute_immediate_dominator(&mut self, node: NodeId) -> NodeId {
        self.ensure_ordered();
        self.recompute_immediate_dominator_inner(node)
    }

    fn recompute_immediate_dominator_inner(&mut self, node: NodeId) -> NodeId {
        let idom = if self.is_entry(node) {
            node
        } else {
            let preds = self.forward_pred_of(node);
            let mut dom: Option<NodeId> = None;
            for p in preds {
                dom = Some(match dom {
                    None => p,
                    Some(d) => self.find_common_dominator_inner(d, p),
                });
            }
            // No forward predecessor: unreachable or dummy node.
            dom.unwrap_or(node)
        };
        self.nodes[node.index()].immediate_dominator = Some(idom);
        idom
    }

    /// Nearest node dominating both `a` and `b`.
    pub fn find_common_dominator(&mut self, a: NodeId, b: NodeId) -> NodeId {
        self.ensure_ordered();
        self.find_common_dominator_inner(a, b)
    }

    fn find_common_dominator_inner(&mut self, mut a: NodeId, mut b: NodeId) -> NodeId {
        while a != b {
            let a_dom = self.ensure_immediate_dominator(a);
            let b_dom = self.ensure_immediate_dominator(b);

            if self.order(a) < self.order(b) {
                // Self-dominating nodes other than the entry are unreachable.
                if a_dom == a {
                    return b;
                }
                a = a_dom;
            } else {
                if b_dom == b {
                    return a;
                }
                b = b_dom;
            }
        }
        a
    }

    /// Whether every path from the entry to `b` passes through `a`.
    pub fn dominates(&mut self, a: NodeId, b: NodeId) -> bool {
        self.ensure_ordered();
        self.dominates_inner(a, b)
    }

    fn dominates_inner(&mut self, a: NodeId, mut b: NodeId) -> bool {
        while a != b {
            if self.is_entry(b) {
                break;
            }
            let dom = self.ensure_immediate_dominator(b);
            if dom == b {
                break;
            }
            b = dom;
        }
        a == b
    }

    /// Whether every forward path from `start` reaches `a` before leaving the graph.
    pub fn post_dominates(&mut self, a: NodeId, start: NodeId) -> bool {
        self.ensure_ordered();
        let mut memo = HashMap::new();
        self.post_dominates_inner(a, start, &mut memo)
    }

    fn post_dominates_inner(
        &self,
        a: NodeId,
        start: NodeId,
        memo: &mut HashMap<NodeId, bool>,
    ) -> bool {
        if start == a {
            return true;
        }
        let succ = self.forward_succ_of(start);
        if succ.is_empty() {
            return false;
        }
        // Post-visit order decreases along forward edges, so `a` can no longer be reached.
        if self.order(start) < self.order(a) {
            return false;
        }
        if let Some(&known) = memo.get(&start) {
            return known;
        }
        let result = succ
            .into_iter()
            .all(|s| self.post_dominates_inner(a, s, memo));
        memo.insert(start, result);
        result
    }

    /// Walks dominators from `node` until a loop header (a node with a back-edge predecessor).
    pub fn get_immediate_dominator_loop_header(&mut self, node: NodeId) -> Option<NodeId> {
        self.ensure_ordered();
        let mut node = node;
        while self.nodes[node.index()].pred_back_edge.is_none() {
            if self.is_entry(node) {
                return None;
            }
            let dom = self.ensure_immediate_dominator(node);
            if dom == node {
                return None;
            }
            node = dom;
        }
        Some(node)
    }

    /// First dominator of `node` that `node` does not post-dominate, or the nearest switch.
    ///
    /// Merge blocks registered through [`Self::add_unique_header`] are skipped over to their
    /// header.
    pub fn get_outer_selection_dominator(&mut self, node: NodeId) -> NodeId {
        self.ensure_ordered();
        let mut current = self.ensure_immediate_dominator(node);
        while !self.is_switch(current) && self.post_dominates(node, current) {
            if self.is_entry(current) {
                break;
            }

            loop {
                let dom = self.ensure_immediate_dominator(current);
                if dom != current && self.nodes[current.index()].headers.contains(&dom) {
                    current = dom;
                } else {
                    break;
                }
            }

            if self.post_dominates(node, current) {
                let dom = self.ensure_immediate_dominator(current);
                if dom == current {
                    break;
                }
                current = dom;
            }
        }
        current
    }

    /// First dominator of `node` that branches more than one way, switches or heads a loop.
    pub fn get_outer_header_dominator(&mut self, node: NodeId) -> NodeId {
        self.ensure_ordered();
        let mut current = self.ensure_immediate_dominator(node);
        while self.forward_succ_of(current).len() == 1
            && !self.is_switch(current)
            && self.nodes[current.index()].pred_back_edge.is_none()
        {
            if self.is_entry(current) {
                break;
            }
            let dom = self.ensure_immediate_dominator(current);
            if dom == current {
                break;
            }
            current = dom;
        }
        current
    }

    /// Whether the loop headed by `header` may use `other` as its merge block.
    pub fn can_loop_merge_to(&mut self, header: NodeId, other: NodeId) -> bool {
        self.ensure_ordered();
        if !self.dominates_inner(header, other) {
            return false;
        }

        if let Some(continue_block) = self.nodes[header.index()].pred_back_edge {
            let exits = self.forward_succ_of(continue_block);
            if !exits.is_empty() {
                let mut memo = HashMap::new();
                for &exit in &exits {
                    memo.clear();
                    if self.post_dominates_inner(exit, other, &mut memo) {
                        return true;
                    }
                }
                // An escape from the continue block that is not `other` cannot merge here.
                if !exits.contains(&other) {
                    return false;
                }
            }
        }
        true
    }

    /// Whether `parent` is reachable walking forward predecessors from `node`.
    pub fn can_backtrace_to(&mut self, node: NodeId, parent: NodeId) -> bool {
        self.ensure_ordered();
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            for p in self.forward_pred_of(n) {
                if p == parent {
                    return true;
                }
                if !visited[p.index()] {
                    visited[p.index()] = true;
                    stack.push(p);
                }
            }
        }
        false
    }

    /// Walks dominators from `other` until `header`, the entry, or the first loop header.
    pub fn get_innermost_loop_header_for(&mut self, header: NodeId, other: NodeId) -> NodeId {
        self.ensure_ordered();
        let mut other = other;
        while header != other {
            if self.is_entry(other) || self.nodes[other.index()].pred_back_edge.is_some() {
                break;
            }
            let dom = self.ensure_immediate_dominator(other);
            if dom == other {
                break;
            }
            other = dom;
        }
        other
    }

    pub fn is_innermost_loop_header_for(&mut self, header: NodeId, other: NodeId) -> bool {
        header == self.get_innermost_loop_header_for(header, other)
    }

    /// Whether `from` reaches `to` through a chain of single-successor nodes without back edges.
    pub fn branchless_path_to(&self, from: NodeId, to: NodeId) -> bool {
        let mut node = from;
        let mut steps = 0;
        while node != to {
            let n = &self.nodes[node.index()];
            if n.succ.len() != 1 || n.succ_back_edge.is_some() || steps > self.nodes.len() {
                return false;
            }
            node = n.succ[0];
            steps += 1;
        }
        true
    }

    /// Whether every node forward-reachable from `header` is dominated by it and free of back
    /// edges.
    pub fn dominates_all_reachable_exits(&mut self, header: NodeId) -> bool {
        self.ensure_ordered();
        self.dominates_all_reachable_exits_from(header, header)
    }

    fn dominates_all_reachable_exits_from(&mut self, node: NodeId, header: NodeId) -> bool {
        if self.nodes[node.index()].succ_back_edge.is_some() {
            return false;
        }
        for s in self.forward_succ_of(node) {
            if !self.dominates_inner(header, s) || !self.dominates_all_reachable_exits_from(s, header)
            {
                return false;
            }
        }
        true
    }

    /// Rewires `node -> prev` to `node -> next`, keeping the successor's slot, and recomputes the
    /// dominators of both targets.
    pub fn retarget_branch(&mut self, node: NodeId, prev: NodeId, next: NodeId) -> Result<()> {
        self.ensure_ordered();
        let Some(slot) = self.nodes[node.index()].succ.iter().position(|&s| s == prev) else {
            return Err(ConvertError::internal(format!(
                "node {} does not branch to {}",
                node.0, prev.0
            )));
        };
        if self.nodes[node.index()].succ.contains(&next)
            || self.nodes[next.index()].pred.contains(&node)
        {
            return Err(ConvertError::internal(format!(
                "node {} already branches to {}",
                node.0, next.0
            )));
        }

        self.nodes[prev.index()].pred.retain(|&p| p != node);
        self.nodes[node.index()].succ[slot] = next;
        self.link(node, next);

        // The later node in post-order cannot be an ancestor of the earlier one.
        if self.order(prev) > self.order(next) {
            self.recompute_immediate_dominator_inner(prev);
            self.recompute_immediate_dominator_inner(next);
        } else {
            self.recompute_immediate_dominator_inner(next);
            self.recompute_immediate_dominator_inner(prev);
        }

        if let Some(term) = self.nodes[node.index()].ir.terminator.as_mut() {
            term.retarget(prev, next);
        }
        Ok(())
    }

    /// Points every predecessor of `node` that still branches to `old_succ` at `node` instead.
    /// Back-edge markers are left alone.
    pub fn retarget_pred_from(&mut self, node: NodeId, old_succ: NodeId) {
        let preds = self.nodes[node.index()].pred.clone();
        for p in preds {
            let pn = &mut self.nodes[p.index()];
            if pn.succ.contains(&node) {
                pn.succ.retain(|&s| s != old_succ);
            } else {
                for s in &mut pn.succ {
                    if *s == old_succ {
                        *s = node;
                    }
                }
            }
            if let Some(term) = pn.ir.terminator.as_mut() {
                term.retarget(old_succ, node);
            }
            self.nodes[old_succ.index()].pred.retain(|&q| q != p);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diamond() -> (CfgNodePool, [NodeId; 4]) {
        let mut pool = CfgNodePool::new();
        let a = pool.create_named_node("a");
        let b = pool.create_named_node("b");
        let c = pool.create_named_node("c");
        let d = pool.create_named_node("d");
        pool.add_branch(a, b);
        pool.add_branch(a, c);
        pool.add_branch(b, d);
        pool.add_branch(c, d);
        (pool, [a, b, c, d])
    }

    #[test]
    fn diamond_dominators() {
        let (mut pool, [a, b, c, d]) = diamond();
        assert_eq!(pool.immediate_dominator(a), a);
        assert_eq!(pool.immediate_dominator(b), a);
        assert_eq!(pool.immediate_dominator(c), a);
        assert_eq!(pool.immediate_dominator(d), a);
        assert!(pool.dominates(a, d));
        assert!(!pool.dominates(b, d));
        assert!(pool.post_dominates(d, a));
        assert!(!pool.post_dominates(b, a));
    }

    #[test]
    fn add_branch_ignores_parallel_edges() {
        let mut pool = CfgNodePool::new();
        let a = pool.create_node();
        let b = pool.create_node();
        pool.add_branch(a, b);
        pool.add_branch(a, b);
        assert_eq!(pool.node(a).succ(), &[b]);
        assert_eq!(pool.node(b).pred(), &[a]);
    }

    #[test]
    fn loop_back_edge_is_marked() {
        let mut pool = CfgNodePool::new();
        let entry = pool.create_node();
        let header = pool.create_node();
        let body = pool.create_node();
        let exit = pool.create_node();
        pool.add_branch(entry, header);
        pool.add_branch(header, body);
        pool.add_branch(header, exit);
        pool.add_branch(body, header);
        pool.compute_dominance();

        assert_eq!(pool.node(body).succ_back_edge(), Some(header));
        assert_eq!(pool.node(header).pred_back_edge(), Some(body));
        assert_eq!(pool.immediate_dominator(header), entry);
        assert_eq!(pool.get_immediate_dominator_loop_header(body), Some(header));
        assert_eq!(pool.get_immediate_dominator_loop_header(entry), None);
        assert!(pool.can_loop_merge_to(header, exit));
    }

    /// entry -> header -> {left, right} -> latch -> {header, exit}
    fn loop_around_diamond() -> (CfgNodePool, [NodeId; 6]) {
        let mut pool = CfgNodePool::new();
        let entry = pool.create_named_node("entry");
        let header = pool.create_named_node("header");
        let left = pool.create_named_node("left");
        let right = pool.create_named_node("right");
        let latch = pool.create_named_node("latch");
        let exit = pool.create_named_node("exit");
        pool.add_branch(entry, header);
        pool.add_branch(header, left);
        pool.add_branch(header, right);
        pool.add_branch(left, latch);
        pool.add_branch(right, latch);
        pool.add_branch(latch, header);
        pool.add_branch(latch, exit);
        (pool, [entry, header, left, right, latch, exit])
    }

    #[test]
    fn immediate_dominators_dominate_every_forward_predecessor() {
        let (mut pool, nodes) = loop_around_diamond();
        pool.compute_dominance();
        let [entry, header, left, right, latch, exit] = nodes;

        assert_eq!(pool.immediate_dominator(entry), entry);
        assert_eq!(pool.immediate_dominator(header), entry);
        assert_eq!(pool.immediate_dominator(left), header);
        assert_eq!(pool.immediate_dominator(right), header);
        assert_eq!(pool.immediate_dominator(latch), header);
        assert_eq!(pool.immediate_dominator(exit), latch);

        for node in nodes {
            let idom = pool.immediate_dominator(node);
            assert!(pool.dominates(idom, node));
            for pred in pool.forward_pred(node) {
                assert!(
                    pool.dominates(idom, pred),
                    "idom {idom:?} of {node:?} does not dominate {pred:?}"
                );
            }
        }
        assert_eq!(pool.node(latch).succ_back_edge(), Some(header));
    }

    #[test]
    fn loop_exit_post_dominates_the_loop_body() {
        let (mut pool, [entry, header, left, right, latch, exit]) = loop_around_diamond();
        pool.compute_dominance();

        assert!(pool.post_dominates(exit, entry));
        assert!(pool.post_dominates(exit, header));
        assert!(pool.post_dominates(exit, left));
        assert!(pool.post_dominates(latch, header));
        assert!(!pool.post_dominates(left, header));
        assert!(!pool.post_dominates(right, header));
        // The back edge is not a forward path.
        assert!(!pool.post_dominates(header, latch));
    }

    #[test]
    fn unreachable_nodes_do_not_hang_common_dominator() {
        let (mut pool, [a, _, _, d]) = diamond();
        let orphan = pool.create_node();
        pool.compute_dominance();
        assert_eq!(pool.immediate_dominator(orphan), orphan);
        assert_eq!(pool.find_common_dominator(orphan, d), d);
        assert_eq!(pool.find_common_dominator(d, orphan), d);
        assert_eq!(pool.immediate_dominator(d), a);
    }

    #[test]
    fn retarget_round_trip_restores_edges() {
        let (mut pool, [a, b, c, d]) = diamond();
        pool.set_terminator(
            a,
            Terminator::Condition {
                condition: 7,
                true_block: b,
                false_block: c,
            },
        );
        let before_succ = pool.node(a).succ().to_vec();
        let before_term = pool.node(a).ir.terminator.clone();

        pool.retarget_branch(a, b, d).expect("retarget");
        assert_eq!(pool.node(a).succ(), &[d, c]);
        assert!(pool.node(b).pred().is_empty());
        pool.retarget_branch(a, d, b).expect("retarget back");

        assert_eq!(pool.node(a).succ(), before_succ.as_slice());
        assert_eq!(pool.node(a).ir.terminator, before_term);
        assert_eq!(pool.node(b).pred(), &[a]);
    }

    #[test]
    fn retarget_rejects_missing_edge() {
        let (mut pool, [a, _, _, d]) = diamond();
        assert!(matches!(
            pool.retarget_branch(a, d, d),
            Err(ConvertError::Internal(_))
        ));
    }
}
