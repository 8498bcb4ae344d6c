//! Linear undo/redo over immutable scene snapshots.
//!
//! The manager holds `past` (oldest to newest), a single `present`, and
//! `future` (farthest to nearest). Remote merges never touch these stacks;
//! only local commits do. The editor session broadcasts whichever snapshot
//! becomes `present` after a commit, undo, or redo.

use crate::shapes::Shape;

/// One coherent document state: the full ordered shape collection
pub type Snapshot = Vec<Shape>;

/// Manages past/present/future snapshots with linear-history semantics
pub struct History {
    /// Oldest to newest
    past: Vec<Snapshot>,
    present: Snapshot,
    /// Farthest to nearest (pop yields the next redo target)
    future: Vec<Snapshot>,
    /// Optional cap on past length; unbounded when None
    limit: Option<usize>,
}

impl History {
    /// Start history at an initial present snapshot, unbounded
    pub fn new(initial: Snapshot) -> Self {
        Self {
            past: Vec::new(),
            present: initial,
            future: Vec::new(),
            limit: None,
        }
    }

    /// Start history with a cap on how many past snapshots are retained
    pub fn with_limit(initial: Snapshot, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new(initial)
        }
    }

    pub fn present(&self) -> &Snapshot {
        &self.present
    }

    /// Commit a new present. The old present moves onto `past` and any
    /// pending redo states are invalidated - a fresh edit always clears
    /// `future`.
    pub fn commit(&mut self, snapshot: Snapshot) {
        let old = std::mem::replace(&mut self.present, snapshot);
        self.past.push(old);
        self.future.clear();

        if let Some(limit) = self.limit {
            while self.past.len() > limit {
                self.past.remove(0);
            }
        }
    }

    /// Step back one snapshot. Returns the restored present, or None when
    /// there is nothing to undo.
    pub fn undo(&mut self) -> Option<&Snapshot> {
        let previous = self.past.pop()?;
        let displaced = std::mem::replace(&mut self.present, previous);
        self.future.push(displaced);
        Some(&self.present)
    }

    /// Step forward one snapshot. Symmetric with `undo`.
    pub fn redo(&mut self) -> Option<&Snapshot> {
        let next = self.future.pop()?;
        let displaced = std::mem::replace(&mut self.present, next);
        self.past.push(displaced);
        Some(&self.present)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.past.len()
    }

    pub fn redo_count(&self) -> usize {
        self.future.len()
    }

    /// Drop all history, keeping the current present
    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new(Snapshot::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::LayerId;
    use crate::shapes::{DEFAULT_FILL, ShapeKind};

    fn snap(xs: &[f64]) -> Snapshot {
        let layer = LayerId::new();
        xs.iter()
            .map(|&x| {
                Shape::new(
                    ShapeKind::Rectangle {
                        x,
                        y: 0.0,
                        width: 50.0,
                        height: 50.0,
                    },
                    DEFAULT_FILL,
                    layer,
                )
            })
            .collect()
    }

    #[test]
    fn undo_on_empty_past_is_noop() {
        let mut history = History::new(snap(&[1.0]));
        assert!(history.undo().is_none());
        assert_eq!(history.present().len(), 1);
    }

    #[test]
    fn redo_on_empty_future_is_noop() {
        let mut history = History::new(snap(&[1.0]));
        assert!(history.redo().is_none());
    }

    #[test]
    fn commit_pushes_present_onto_past() {
        let first = snap(&[1.0]);
        let second = snap(&[1.0, 2.0]);
        let mut history = History::new(first.clone());
        history.commit(second.clone());

        assert_eq!(history.present(), &second);
        assert_eq!(history.undo_count(), 1);
        assert_eq!(history.undo(), Some(&first));
    }

    #[test]
    fn undo_then_redo_restores_exact_snapshot() {
        let mut history = History::new(snap(&[1.0]));
        let committed = snap(&[1.0, 2.0]);
        history.commit(committed.clone());

        history.undo().unwrap();
        let restored = history.redo().unwrap();
        assert_eq!(restored, &committed);
    }

    #[test]
    fn fresh_commit_clears_future() {
        let mut history = History::new(snap(&[1.0]));
        history.commit(snap(&[2.0]));
        history.commit(snap(&[3.0]));
        history.undo().unwrap();
        assert!(history.can_redo());

        history.commit(snap(&[4.0]));
        assert!(!history.can_redo());
        assert_eq!(history.redo_count(), 0);
    }

    #[test]
    fn limit_bounds_past_depth() {
        let mut history = History::with_limit(snap(&[0.0]), 2);
        for i in 1..=5 {
            history.commit(snap(&[i as f64]));
        }
        assert_eq!(history.undo_count(), 2);

        // The retained entries are the newest two.
        let restored = history.undo().unwrap();
        assert_eq!(restored[0].kind.position().x, 4.0);
    }

    #[test]
    fn interleaved_undo_redo_walk() {
        let states: Vec<Snapshot> = (0..4).map(|i| snap(&[i as f64])).collect();
        let mut history = History::new(states[0].clone());
        for s in &states[1..] {
            history.commit(s.clone());
        }

        history.undo().unwrap();
        history.undo().unwrap();
        assert_eq!(history.present(), &states[1]);

        history.redo().unwrap();
        assert_eq!(history.present(), &states[2]);

        history.undo().unwrap();
        assert_eq!(history.present(), &states[1]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// For any sequence of commits, undo immediately followed by
            /// redo restores the exact pre-undo snapshot.
            #[test]
            fn undo_redo_is_identity(commits in proptest::collection::vec(
                proptest::collection::vec(-1000.0f64..1000.0, 0..8),
                1..20,
            )) {
                let mut history = History::new(Snapshot::new());
                for xs in &commits {
                    history.commit(snap(xs));
                }

                let before = history.present().clone();
                if history.undo().is_some() {
                    let after = history.redo().unwrap().clone();
                    prop_assert_eq!(before, after);
                }
            }

            /// Walking all the way back and forward again always lands on
            /// the last committed snapshot.
            #[test]
            fn full_rewind_replay(commits in proptest::collection::vec(
                proptest::collection::vec(-100.0f64..100.0, 0..4),
                1..10,
            )) {
                let mut history = History::new(Snapshot::new());
                for xs in &commits {
                    history.commit(snap(xs));
                }
                let last = history.present().clone();

                while history.undo().is_some() {}
                prop_assert!(history.present().is_empty());
                while history.redo().is_some() {}
                prop_assert_eq!(history.present(), &last);
            }
        }
    }
}
