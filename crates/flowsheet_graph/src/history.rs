use crate::types::GraphSnapshot;

/// Linear undo/redo over whole-graph snapshots.
///
/// `snapshots[cursor]` is always the state the live graph was last committed
/// or restored to. Committing after an undo drops everything past the cursor.
#[derive(Debug, Clone, Default)]
pub struct HistoryManager {
    snapshots: Vec<GraphSnapshot>,
    cursor: usize,
    max_history: Option<usize>,
}

impl HistoryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `max_history` snapshots, dropping the oldest first.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            snapshots: Vec::new(),
            cursor: 0,
            max_history: Some(max_history.max(1)),
        }
    }

    /// Start over with `baseline` as the only entry.
    pub fn reset(&mut self, baseline: GraphSnapshot) {
        self.snapshots.clear();
        self.snapshots.push(baseline);
        self.cursor = 0;
    }

    pub fn commit(&mut self, snapshot: GraphSnapshot) {
        if !self.snapshots.is_empty() {
            self.snapshots.truncate(self.cursor + 1);
        }
        self.snapshots.push(snapshot);

        if let Some(max) = self.max_history {
            if self.snapshots.len() > max {
                let overflow = self.snapshots.len() - max;
                self.snapshots.drain(..overflow);
            }
        }
        self.cursor = self.snapshots.len() - 1;
    }

    /// Step back one commit. `None` when already at the oldest snapshot.
    pub fn undo(&mut self) -> Option<&GraphSnapshot> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        self.snapshots.get(self.cursor)
    }

    /// Step forward one commit. `None` when nothing was undone.
    pub fn redo(&mut self) -> Option<&GraphSnapshot> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        self.snapshots.get(self.cursor)
    }

    pub fn can_undo(&self) -> bool {
        self.cursor > 0
    }

    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.snapshots.len()
    }

    pub fn current(&self) -> Option<&GraphSnapshot> {
        self.snapshots.get(self.cursor)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Position, UnitType};
    use crate::FlowsheetGraph;

    fn graph_with(n: usize) -> GraphSnapshot {
        let mut graph = FlowsheetGraph::new();
        for i in 0..n {
            graph.add_node(UnitType::Pump, Position::new(i as f64, 0.0));
        }
        graph.snapshot()
    }

    #[test]
    fn test_undo_redo_walks_the_cursor() {
        let mut history = HistoryManager::new();
        history.reset(graph_with(0));
        history.commit(graph_with(1));
        history.commit(graph_with(2));

        assert_eq!(history.undo().map(|s| s.node_count()), Some(1));
        assert_eq!(history.undo().map(|s| s.node_count()), Some(0));
        assert!(history.undo().is_none());
        assert_eq!(history.cursor(), 0);

        assert_eq!(history.redo().map(|s| s.node_count()), Some(1));
        assert_eq!(history.redo().map(|s| s.node_count()), Some(2));
        assert!(history.redo().is_none());
    }

    #[test]
    fn test_commit_after_undo_discards_redo_tail() {
        let mut history = HistoryManager::new();
        history.reset(graph_with(0));
        history.commit(graph_with(1));
        history.commit(graph_with(2));
        history.undo();

        history.commit(graph_with(3));
        assert!(!history.can_redo());
        assert_eq!(history.len(), 3);
        assert_eq!(history.current().map(|s| s.node_count()), Some(3));
        assert_eq!(history.undo().map(|s| s.node_count()), Some(1));
    }

    #[test]
    fn test_max_history_drops_oldest() {
        let mut history = HistoryManager::with_max_history(2);
        history.reset(graph_with(0));
        history.commit(graph_with(1));
        history.commit(graph_with(2));

        assert_eq!(history.len(), 2);
        assert_eq!(history.undo().map(|s| s.node_count()), Some(1));
        assert!(!history.can_undo());
    }
}
