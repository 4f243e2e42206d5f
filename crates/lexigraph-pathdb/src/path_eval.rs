//! Path expression evaluation over the edge index.
//!
//! Every sub-expression maps a set of start nodes to a set of end nodes. Sets
//! are kept in discovery order (a vector plus a membership bitmap), so the
//! result is deterministic: frontier by frontier, in edge order. Closures
//! expand a frontier until no new node appears, which bounds `+`, `*` and
//! `{n,}` on cyclic graphs. Bounded repetition stops once the levels it
//! walks start repeating, so `{n}` costs no more than the graph's period.

use ahash::AHashMap;
use lexigraph_dsl::PathExpr;
use roaring::RoaringBitmap;

use crate::edge_index::EdgeIndex;
use crate::StrId;

/// Insertion-ordered set of nodes.
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    order: Vec<StrId>,
    seen: RoaringBitmap,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_nodes<I: IntoIterator<Item = StrId>>(nodes: I) -> Self {
        let mut set = Self::new();
        set.extend(nodes);
        set
    }

    /// Returns `true` if `node` was not present.
    pub fn insert(&mut self, node: StrId) -> bool {
        if self.seen.insert(node.raw()) {
            self.order.push(node);
            true
        } else {
            false
        }
    }

    pub fn extend<I: IntoIterator<Item = StrId>>(&mut self, nodes: I) {
        for node in nodes {
            self.insert(node);
        }
    }

    pub fn contains(&self, node: StrId) -> bool {
        self.seen.contains(node.raw())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn as_slice(&self) -> &[StrId] {
        &self.order
    }

    pub fn into_vec(self) -> Vec<StrId> {
        self.order
    }
}

pub struct PathEvaluator<'a> {
    edges: &'a EdgeIndex,
}

impl<'a> PathEvaluator<'a> {
    pub fn new(edges: &'a EdgeIndex) -> Self {
        Self { edges }
    }

    /// Distinct nodes reachable from `start` by `expr`, in discovery order.
    pub fn evaluate(&self, start: StrId, expr: &PathExpr) -> Vec<StrId> {
        self.eval(&[start], expr).into_vec()
    }

    fn eval(&self, starts: &[StrId], expr: &PathExpr) -> NodeSet {
        match expr {
            PathExpr::Forward { predicate } => {
                let mut out = NodeSet::new();
                if let Some(pred) = self.edges.predicate_id(predicate) {
                    for &node in starts {
                        out.extend(self.edges.forward(node, pred).iter().copied());
                    }
                }
                out
            }
            PathExpr::Reverse { predicate } => {
                let mut out = NodeSet::new();
                if let Some(pred) = self.edges.predicate_id(predicate) {
                    for &node in starts {
                        if let Some(subjects) = self.edges.backward(node, pred) {
                            out.extend(subjects.iter().map(StrId::new));
                        }
                    }
                }
                out
            }
            PathExpr::Seq { parts } => {
                let mut current = NodeSet::from_nodes(starts.iter().copied());
                for part in parts {
                    current = self.eval(current.as_slice(), part);
                    if current.is_empty() {
                        break;
                    }
                }
                current
            }
            PathExpr::Alt { parts } => {
                let mut out = NodeSet::new();
                for part in parts {
                    out.extend(self.eval(starts, part).into_vec());
                }
                out
            }
            PathExpr::Plus { inner } => self.closure(starts, inner),
            PathExpr::Star { inner } => {
                let mut out = NodeSet::from_nodes(starts.iter().copied());
                out.extend(self.closure(starts, inner).into_vec());
                out
            }
            PathExpr::Repeat { inner, min, max } => self.repeat(starts, inner, *min, *max),
        }
    }

    /// One or more applications of `inner`, to a fixed point.
    fn closure(&self, starts: &[StrId], inner: &PathExpr) -> NodeSet {
        let mut result = self.eval(starts, inner);
        let mut frontier: Vec<StrId> = result.as_slice().to_vec();
        while !frontier.is_empty() {
            let next = self.eval(&frontier, inner);
            frontier = next
                .into_vec()
                .into_iter()
                .filter(|&node| result.insert(node))
                .collect();
        }
        result
    }

    /// Union of exactly-k applications of `inner` for k in `min..=max`.
    fn repeat(&self, starts: &[StrId], inner: &PathExpr, min: u32, max: Option<u32>) -> NodeSet {
        let min = u64::from(min);
        let mut levels = Levels::new(NodeSet::from_nodes(starts.iter().copied()));
        let mut out = levels.get(self, inner, min).clone();
        match max {
            None => {
                let closure = self.closure(out.as_slice(), inner);
                out.extend(closure.into_vec());
            }
            Some(max) => {
                for k in min + 1..=u64::from(max) {
                    out.extend(levels.get(self, inner, k).as_slice().iter().copied());
                    if levels.covered(min, k) {
                        break;
                    }
                }
            }
        }
        out
    }
}

/// The sequence of exactly-k levels `L(k+1) = inner(L(k))`. On a finite
/// graph it is eventually periodic; once a level repeats, later levels are
/// looked up instead of computed.
struct Levels {
    computed: Vec<NodeSet>,
    index: AHashMap<Vec<u32>, usize>,
    /// First level of the cycle and its period.
    cycle: Option<(u64, u64)>,
}

impl Levels {
    fn new(start: NodeSet) -> Self {
        let mut levels = Self {
            computed: Vec::new(),
            index: AHashMap::new(),
            cycle: None,
        };
        levels.push(start);
        levels
    }

    fn push(&mut self, level: NodeSet) {
        let key: Vec<u32> = level.as_slice().iter().map(|n| n.raw()).collect();
        let next = self.computed.len();
        match self.index.get(&key) {
            Some(&seen) => self.cycle = Some((seen as u64, (next - seen) as u64)),
            None => {
                self.index.insert(key, next);
                self.computed.push(level);
            }
        }
    }

    fn get(&mut self, evaluator: &PathEvaluator<'_>, inner: &PathExpr, k: u64) -> &NodeSet {
        while self.cycle.is_none() && self.computed.len() as u64 <= k {
            let last = &self.computed[self.computed.len() - 1];
            let next = evaluator.eval(last.as_slice(), inner);
            self.push(next);
        }
        let index = match self.cycle {
            Some((start, period)) if k >= self.computed.len() as u64 => {
                start + (k - start) % period
            }
            _ => k,
        };
        &self.computed[index as usize]
    }

    /// Every level from `min` onwards has been seen by level `k`.
    fn covered(&self, min: u64, k: u64) -> bool {
        matches!(self.cycle, Some((start, period)) if k + 1 >= min.max(start) + period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexigraph_dsl::parse_path_expr;

    fn n(raw: u32) -> StrId {
        StrId::new(raw)
    }

    /// 0 -> 1 -> 2 -> 0 via `next`, plus 2 -> 3 via `exit`.
    fn ring() -> EdgeIndex {
        let mut edges = EdgeIndex::new();
        edges.replace_subject(n(0), [("next", vec![n(1)])]);
        edges.replace_subject(n(1), [("next", vec![n(2)])]);
        edges.replace_subject(n(2), [("next", vec![n(0)]), ("exit", vec![n(3)])]);
        edges
    }

    fn eval(edges: &EdgeIndex, start: u32, expr: &str) -> Vec<u32> {
        let expr = parse_path_expr(expr).unwrap();
        PathEvaluator::new(edges)
            .evaluate(n(start), &expr)
            .into_iter()
            .map(StrId::raw)
            .collect()
    }

    #[test]
    fn closures_terminate_on_cycles() {
        let edges = ring();
        assert_eq!(eval(&edges, 0, "next+"), vec![1, 2, 0]);
        assert_eq!(eval(&edges, 0, "next*"), vec![0, 1, 2]);
        assert_eq!(eval(&edges, 0, "next*,exit"), vec![3]);
    }

    #[test]
    fn reverse_hops_follow_backlinks() {
        let edges = ring();
        assert_eq!(eval(&edges, 3, "<exit"), vec![2]);
        assert_eq!(eval(&edges, 3, "<exit,<next"), vec![1]);
        assert_eq!(eval(&edges, 0, "<next+"), vec![2, 1, 0]);
    }

    #[test]
    fn unknown_predicates_reach_nothing() {
        let edges = ring();
        assert!(eval(&edges, 0, "missing").is_empty());
        assert_eq!(eval(&edges, 0, "missing*"), vec![0]);
    }

    #[test]
    fn bounded_repetition_unions_levels() {
        let edges = ring();
        assert_eq!(eval(&edges, 0, "next{2}"), vec![2]);
        assert_eq!(eval(&edges, 0, "next{0,1}"), vec![0, 1]);
        assert_eq!(eval(&edges, 0, "next{1,2}"), vec![1, 2]);
        assert_eq!(eval(&edges, 0, "next{2,}"), vec![2, 0, 1]);
        assert_eq!(eval(&edges, 0, "next|exit"), vec![1]);
    }

    #[test]
    fn large_repetition_bounds_follow_the_cycle() {
        let mut self_loop = EdgeIndex::new();
        self_loop.replace_subject(n(0), [("p", vec![n(0)])]);
        assert_eq!(eval(&self_loop, 0, "p{4000000000}"), vec![0]);
        assert_eq!(eval(&self_loop, 0, "p{0,4000000000}"), vec![0]);

        let edges = ring();
        // 4000000000 = 3 * 1333333333 + 1
        assert_eq!(eval(&edges, 0, "next{4000000000}"), vec![1]);
        assert_eq!(eval(&edges, 0, "next{1,4000000000}"), vec![1, 2, 0]);
        assert_eq!(eval(&edges, 0, "next{3999999999,}"), vec![0, 1, 2]);
        assert_eq!(eval(&edges, 0, "next{4000000000},exit"), Vec::<u32>::new());
        assert_eq!(eval(&edges, 0, "next{3999999998},exit"), vec![3]);
        assert!(eval(&edges, 0, "exit{2,4000000000}").is_empty());
    }
}
