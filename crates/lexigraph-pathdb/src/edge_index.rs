//! Bidirectional edge index over reference fields.
//!
//! Edges are `(subject, predicate, object)` triples derived from every
//! reference value. The forward side keeps field order (List order, Set
//! insertion order, List duplicates); the backward side is a deduplicated
//! bitmap of subjects. Objects need not exist as instances: an id referenced
//! before it is inserted is simply a node with no fields yet.

use ahash::AHashMap;
use roaring::RoaringBitmap;

use crate::{StrId, StringInterner};

#[derive(Debug, Clone, Default)]
pub struct EdgeIndex {
    predicates: StringInterner,
    /// Forward index: (subject, predicate) -> objects, in field order
    forward: AHashMap<(StrId, StrId), Vec<StrId>>,
    /// Backward index: (object, predicate) -> subjects
    backward: AHashMap<(StrId, StrId), RoaringBitmap>,
    /// Predicates each subject currently has edges for
    by_subject: AHashMap<StrId, Vec<StrId>>,
    edge_count: usize,
}

impl EdgeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of edges (List duplicates counted).
    pub fn len(&self) -> usize {
        self.edge_count
    }

    pub fn is_empty(&self) -> bool {
        self.edge_count == 0
    }

    pub fn predicate_id(&self, predicate: &str) -> Option<StrId> {
        self.predicates.id_of(predicate)
    }

    /// Replace every outgoing edge of `subject` with `edges`.
    pub fn replace_subject<'a, I>(&mut self, subject: StrId, edges: I)
    where
        I: IntoIterator<Item = (&'a str, Vec<StrId>)>,
    {
        self.remove_subject(subject);

        let mut preds = Vec::new();
        for (predicate, objects) in edges {
            if objects.is_empty() {
                continue;
            }
            let pred = self.predicates.intern(predicate);
            for &object in &objects {
                self.backward
                    .entry((object, pred))
                    .or_default()
                    .insert(subject.raw());
            }
            self.edge_count += objects.len();
            self.forward.insert((subject, pred), objects);
            preds.push(pred);
        }
        if !preds.is_empty() {
            self.by_subject.insert(subject, preds);
        }
    }

    fn remove_subject(&mut self, subject: StrId) {
        let Some(preds) = self.by_subject.remove(&subject) else {
            return;
        };
        for pred in preds {
            let Some(objects) = self.forward.remove(&(subject, pred)) else {
                continue;
            };
            self.edge_count -= objects.len();
            for object in objects {
                if let Some(subjects) = self.backward.get_mut(&(object, pred)) {
                    subjects.remove(subject.raw());
                    if subjects.is_empty() {
                        self.backward.remove(&(object, pred));
                    }
                }
            }
        }
    }

    pub fn forward(&self, subject: StrId, predicate: StrId) -> &[StrId] {
        self.forward
            .get(&(subject, predicate))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn backward(&self, object: StrId, predicate: StrId) -> Option<&RoaringBitmap> {
        self.backward.get(&(object, predicate))
    }

    pub fn has_edge(&self, subject: StrId, predicate: StrId, object: StrId) -> bool {
        self.backward(object, predicate)
            .map(|subjects| subjects.contains(subject.raw()))
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(raw: u32) -> StrId {
        StrId::new(raw)
    }

    #[test]
    fn forward_keeps_order_and_duplicates() {
        let mut edges = EdgeIndex::new();
        edges.replace_subject(n(0), [("targets", vec![n(3), n(1), n(3)])]);
        let p = edges.predicate_id("targets").unwrap();
        assert_eq!(edges.forward(n(0), p), &[n(3), n(1), n(3)]);
        assert_eq!(edges.len(), 3);
        let subjects: Vec<u32> = edges.backward(n(3), p).unwrap().iter().collect();
        assert_eq!(subjects, vec![0]);
    }

    #[test]
    fn replacing_a_subject_drops_stale_backlinks() {
        let mut edges = EdgeIndex::new();
        edges.replace_subject(n(0), [("friend", vec![n(1)])]);
        edges.replace_subject(n(2), [("friend", vec![n(1)])]);
        let p = edges.predicate_id("friend").unwrap();

        edges.replace_subject(n(0), [("friend", vec![n(2)])]);
        let subjects: Vec<u32> = edges.backward(n(1), p).unwrap().iter().collect();
        assert_eq!(subjects, vec![2]);
        assert!(edges.has_edge(n(0), p, n(2)));
        assert!(!edges.has_edge(n(0), p, n(1)));
        assert_eq!(edges.len(), 2);

        edges.replace_subject(n(2), std::iter::empty());
        assert!(edges.backward(n(1), p).is_none());
        assert_eq!(edges.len(), 1);
    }
}
