use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tracked per-page stages. Planning and character prep are not
/// index-scoped and are handled by the orchestrator directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    SceneGen,
    Narration,
}

/// Completion ledger over the fixed page index set 1..=page_count.
/// Pure bookkeeping; the orchestrator uses `pending` to decide exactly
/// which indices still need work after a partial failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTracker {
    page_count: usize,
    scene: BTreeSet<usize>,
    narration: BTreeSet<usize>,
}

impl StageTracker {
    pub fn new(page_count: usize) -> Self {
        Self {
            page_count,
            scene: BTreeSet::new(),
            narration: BTreeSet::new(),
        }
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    fn set_mut(&mut self, stage: Stage) -> &mut BTreeSet<usize> {
        match stage {
            Stage::SceneGen => &mut self.scene,
            Stage::Narration => &mut self.narration,
        }
    }

    fn set(&self, stage: Stage) -> &BTreeSet<usize> {
        match stage {
            Stage::SceneGen => &self.scene,
            Stage::Narration => &self.narration,
        }
    }

    /// Idempotent. Indices outside 1..=page_count are ignored.
    pub fn mark_done(&mut self, stage: Stage, index: usize) {
        if index >= 1 && index <= self.page_count {
            self.set_mut(stage).insert(index);
        }
    }

    /// Complement of the completed set, in page order.
    pub fn pending(&self, stage: Stage) -> Vec<usize> {
        let done = self.set(stage);
        (1..=self.page_count).filter(|i| !done.contains(i)).collect()
    }

    pub fn is_done(&self, stage: Stage, index: usize) -> bool {
        self.set(stage).contains(&index)
    }

    pub fn is_complete(&self, stage: Stage) -> bool {
        self.set(stage).len() == self.page_count
    }
}
