//! State of every part of a file that is being downloaded.
use speedy::{Readable, Writable};
use tracing::trace;

use crate::{range::Range, range_tree::RangeTree};

/// Where a part of a file is in the download.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Readable, Writable)]
pub enum PartState {
    /// Nobody has been asked for it yet.
    Needed,
    /// Requested from a source, waiting for the chunk.
    Pending,
    /// Written to the temporary file, or reused from the old version.
    Available,
}

/// Tracks the [`PartState`] of every byte of a single file.
///
/// A download starts with everything [`PartState::Needed`]. With delta-sync
/// the parts that match the previous version start as
/// [`PartState::Available`] instead.
#[derive(Debug, Clone)]
pub struct FilePartsState {
    tree: RangeTree<PartState>,
}

impl FilePartsState {
    pub fn new(file_length: u64) -> Self {
        Self::with_state(file_length, PartState::Needed)
    }

    pub fn with_state(file_length: u64, state: PartState) -> Self {
        Self { tree: RangeTree::new(file_length, state) }
    }

    pub fn file_length(&self) -> u64 {
        self.tree.range().length()
    }

    /// The range of the whole file.
    pub fn range(&self) -> Range {
        self.tree.range()
    }

    pub fn set_part_state(&mut self, range: Range, state: PartState) {
        trace!("{range} -> {state:?}");
        self.tree.insert(range, state);
    }

    /// The first contiguous part holding `state`, if any.
    pub fn find_first_part(&self, state: PartState) -> Option<Range> {
        self.tree.search(self.range(), &state)
    }

    /// Every maximal part holding `state`, in file order.
    pub fn parts(&self, state: PartState) -> Vec<Range> {
        self.tree.ranges_of(&state)
    }

    /// How many bytes of `range` hold `state`.
    pub fn count_part_states(&self, range: Range, state: PartState) -> u64 {
        self.tree.count(range, &state)
    }

    pub fn is_completed(&self) -> bool {
        self.count_part_states(self.range(), PartState::Available)
            == self.file_length()
    }

    /// Give back every pending part, e.g. after all sources went away.
    pub fn purge_pending(&mut self) {
        for part in self.parts(PartState::Pending) {
            self.set_part_state(part, PartState::Needed);
        }
    }

    /// Depth of the underlying tree, grows with fragmentation.
    pub fn depth(&self) -> usize {
        self.tree.depth()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_is_needed() {
        let state = FilePartsState::new(1000);
        assert_eq!(state.file_length(), 1000);
        assert_eq!(
            state.find_first_part(PartState::Needed),
            Some(Range::by_length(0, 1000))
        );
        assert_eq!(state.find_first_part(PartState::Pending), None);
        assert!(!state.is_completed());
    }

    #[test]
    fn download_flow() {
        let mut state = FilePartsState::new(100);

        let first = state.find_first_part(PartState::Needed).unwrap();
        let chunk = Range::by_length(first.start(), 40);
        state.set_part_state(chunk, PartState::Pending);

        assert_eq!(
            state.find_first_part(PartState::Needed),
            Some(Range::by_length(40, 60))
        );
        assert_eq!(state.count_part_states(state.range(), PartState::Pending), 40);

        state.set_part_state(chunk, PartState::Available);
        state.set_part_state(Range::by_length(40, 60), PartState::Pending);
        assert_eq!(state.find_first_part(PartState::Needed), None);
        assert!(!state.is_completed());

        state.set_part_state(Range::by_length(40, 60), PartState::Available);
        assert!(state.is_completed());
        assert_eq!(state.depth(), 0);
    }

    #[test]
    fn purge_pending() {
        let mut state = FilePartsState::new(100);
        state.set_part_state(Range::by_length(0, 10), PartState::Pending);
        state.set_part_state(Range::by_length(10, 10), PartState::Available);
        state.set_part_state(Range::by_length(50, 10), PartState::Pending);

        state.purge_pending();

        assert_eq!(state.count_part_states(state.range(), PartState::Pending), 0);
        assert_eq!(state.count_part_states(state.range(), PartState::Needed), 90);
        assert_eq!(
            state.parts(PartState::Needed),
            vec![Range::by_length(0, 10), Range::by_length(20, 80)]
        );
    }

    #[test]
    fn delta_baseline() {
        let mut state = FilePartsState::with_state(1000, PartState::Available);
        assert!(state.is_completed());

        // the parts that changed since the old version
        state.set_part_state(Range::by_length(100, 50), PartState::Needed);
        state.set_part_state(Range::by_length(800, 10), PartState::Needed);

        assert_eq!(
            state.count_part_states(state.range(), PartState::Available),
            940
        );
        assert_eq!(
            state.parts(PartState::Needed),
            vec![Range::by_length(100, 50), Range::by_length(800, 10)]
        );
    }

    #[test]
    fn empty_file_is_completed() {
        let state = FilePartsState::new(0);
        assert!(state.is_completed());
        assert_eq!(state.find_first_part(PartState::Needed), None);
        assert!(state.parts(PartState::Needed).is_empty());
    }
}
