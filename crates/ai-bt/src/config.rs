#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tunables of a [`crate::BehaviorTreeComponent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct BtComponentConfig {
    /// Execution requests processed per tick before nodes are ticked. Clamped to at least 1.
    pub max_flow_updates_per_tick: u32,
    /// Pushing a subtree past this depth fails the subtree task.
    pub max_instance_stack_depth: usize,
}

impl Default for BtComponentConfig {
    fn default() -> Self {
        Self {
            max_flow_updates_per_tick: 1,
            max_instance_stack_depth: 32,
        }
    }
}

impl BtComponentConfig {
    pub fn with_flow_updates(mut self, per_tick: u32) -> Self {
        self.max_flow_updates_per_tick = per_tick.max(1);
        self
    }

    pub fn with_stack_depth(mut self, depth: usize) -> Self {
        self.max_instance_stack_depth = depth;
        self
    }
}
