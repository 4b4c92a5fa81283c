//! Ordered backend list with structural sharing
//!
//! The list is a sequence of immutable segments. Appending adds a segment and
//! leaves the existing ones shared with whichever overlays already hold them.

use std::sync::Arc;

use crate::backend::SharedBackend;

#[derive(Clone, Default)]
pub(crate) struct Layers {
    segments: Vec<Arc<[SharedBackend]>>,
    len: usize,
}

impl Layers {
    pub(crate) fn new(backends: Vec<SharedBackend>) -> Self {
        Self::default().appended(backends)
    }

    /// A new list holding these layers followed by `tail`
    pub(crate) fn appended(&self, tail: Vec<SharedBackend>) -> Self {
        let mut next = self.clone();
        if !tail.is_empty() {
            next.len += tail.len();
            next.segments.push(Arc::from(tail));
        }
        next
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn get(&self, mut i: usize) -> Option<&SharedBackend> {
        for segment in &self.segments {
            if i < segment.len() {
                return Some(&segment[i]);
            }
            i -= segment.len();
        }
        None
    }

    pub(crate) fn first(&self) -> Option<&SharedBackend> {
        self.get(0)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &SharedBackend> + '_ {
        self.segments.iter().flat_map(|s| s.iter())
    }
}
