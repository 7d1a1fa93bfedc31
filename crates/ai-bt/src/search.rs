use crate::index::BtNodeIndex;
use crate::node::BtNodeResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateTarget {
    Decorator,
    Service,
    /// Main task of a parallel composite.
    ParallelTask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    Add,
    Remove,
}

/// Deferred activation change for one aux node or parallel task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchUpdate {
    pub node: BtNodeIndex,
    pub target: UpdateTarget,
    pub mode: UpdateMode,
    /// Applied in a second pass, after every other update.
    pub post_update: bool,
}

impl SearchUpdate {
    pub fn new(node: BtNodeIndex, target: UpdateTarget, mode: UpdateMode) -> Self {
        Self {
            node,
            target,
            mode,
            post_update: false,
        }
    }

    pub fn is_aux(&self) -> bool {
        !matches!(self.target, UpdateTarget::ParallelTask)
    }
}

/// Answers whether an aux node is currently registered as relevant.
pub trait AuxNodeLookup {
    fn is_aux_node_active(&self, node: BtNodeIndex) -> bool;
}

/// State of one search pass plus the update queue it accumulates.
#[derive(Debug, Clone, Default)]
pub struct SearchData {
    pub pending_updates: Vec<SearchUpdate>,
    /// Subtree instances left during the search, with their final result.
    pub pending_notifies: Vec<(u16, BtNodeResult)>,
    pub search_start: BtNodeIndex,
    pub search_end: BtNodeIndex,
    pub search_id: u64,
    next_search_id: u64,
    /// A more important request arrived mid-search; drop this one and search again.
    pub postpone_search: bool,
    pub search_in_progress: bool,
    pub(crate) rollback_instance_idx: Option<u16>,
    pub(crate) preserve_active_node_memory_on_rollback: bool,
}

impl SearchData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `update` unless the queue already expresses it.
    ///
    /// A repeated update is ignored, an opposite update for the same node cancels both, and
    /// removing an aux node that is not active is dropped.
    pub fn add_unique_update<A>(&mut self, update: SearchUpdate, lookup: &A)
    where
        A: AuxNodeLookup + ?Sized,
    {
        let mut skip = false;
        if let Some(pos) = self
            .pending_updates
            .iter()
            .position(|u| u.node == update.node && u.target == update.target)
        {
            if self.pending_updates[pos].mode == update.mode {
                return;
            }
            self.pending_updates.remove(pos);
            skip = true;
        }

        if !skip && update.mode == UpdateMode::Remove && update.is_aux() {
            skip = !lookup.is_aux_node_active(update.node);
        }
        if skip {
            return;
        }

        let mut update = update;
        update.post_update =
            update.mode == UpdateMode::Add && update.target == UpdateTarget::Service;
        self.pending_updates.push(update);
    }

    /// Drops queued activations for `instance_index`.
    pub fn remove_pending_adds(&mut self, instance_index: u16) {
        self.pending_updates
            .retain(|u| !(u.node.instance_index == instance_index && u.mode == UpdateMode::Add));
    }

    /// Every call returns a larger id than the one before.
    pub fn assign_search_id(&mut self) -> u64 {
        self.search_id = self.next_search_id;
        self.next_search_id += 1;
        self.search_id
    }

    /// Clears everything except the id counter.
    pub fn reset(&mut self) {
        self.pending_updates.clear();
        self.pending_notifies.clear();
        self.search_start = BtNodeIndex::UNSET;
        self.search_end = BtNodeIndex::UNSET;
        self.postpone_search = false;
        self.search_in_progress = false;
        self.rollback_instance_idx = None;
        self.preserve_active_node_memory_on_rollback = false;
    }
}
