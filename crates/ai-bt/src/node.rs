#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use ai_core::{Blackboard, BlackboardNotificationResult, TickContext, WorldMut};

use crate::memory::{MemoryClear, MemoryInit, NodeMemory};

/// Outcome of running a task or a whole branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BtNodeResult {
    Succeeded,
    Failed,
    Aborted,
    InProgress,
}

impl BtNodeResult {
    pub fn code(self) -> i64 {
        match self {
            Self::Succeeded => 0,
            Self::Failed => 1,
            Self::Aborted => 2,
            Self::InProgress => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum TaskStatus {
    Active,
    Aborting,
    Inactive,
}

/// What the `active_node` of an instance currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ActiveNodeType {
    Composite,
    ActiveTask,
    AbortingTask,
    InactiveTask,
}

/// Which running branches a decorator may interrupt when its condition changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FlowAbortMode {
    #[default]
    None,
    /// Abort branches to the right of this one when the condition starts passing.
    LowerPriority,
    /// Abort the decorated branch when the condition stops passing.
    SelfBranch,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ParallelFinishMode {
    /// Main task finishing aborts the background branch.
    #[default]
    AbortBackground,
    /// Main task finishing lets the background branch run to completion.
    WaitForBackground,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CompositeKind {
    Sequence,
    Selector,
    Parallel(ParallelFinishMode),
}

impl CompositeKind {
    pub fn can_abort_lower_priority(self) -> bool {
        matches!(self, Self::Selector)
    }
}

/// What a decorator wants after its branch was activated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessedFlow {
    Continue,
    /// Run the decorated branch again once it finishes.
    RepeatBranch,
}

/// Everything a node may touch while one of its hooks runs.
pub struct NodeContext<'a, W>
where
    W: WorldMut + 'static,
{
    pub tick: &'a TickContext,
    pub agent: W::Agent,
    pub world: &'a mut W,
    pub blackboard: &'a mut Blackboard,
}

impl<'a, W> NodeContext<'a, W>
where
    W: WorldMut + 'static,
{
    pub fn new(
        tick: &'a TickContext,
        agent: W::Agent,
        world: &'a mut W,
        blackboard: &'a mut Blackboard,
    ) -> Self {
        Self {
            tick,
            agent,
            world,
            blackboard,
        }
    }
}

/// Leaf behavior. Templates are shared between instances; mutable state lives in `memory`.
pub trait TaskNode<W>: 'static
where
    W: WorldMut + 'static,
{
    fn new_memory(&self) -> NodeMemory {
        NodeMemory::Empty
    }

    fn init_memory(&self, _memory: &mut NodeMemory, _init: MemoryInit) {}

    fn cleanup_memory(&self, _memory: &mut NodeMemory, _clear: MemoryClear) {}

    /// `InProgress` keeps the task running; it finishes later through [`TaskNode::tick`].
    fn execute(&self, ctx: &mut NodeContext<'_, W>, memory: &mut NodeMemory) -> BtNodeResult;

    /// Called every frame while the task runs or aborts. `Some` finishes it.
    ///
    /// While aborting, any `Some` finishes the abort and the result is recorded as `Aborted`.
    fn tick(&self, _ctx: &mut NodeContext<'_, W>, _memory: &mut NodeMemory) -> Option<BtNodeResult> {
        None
    }

    /// `InProgress` means the abort is latent and completes through [`TaskNode::tick`].
    fn abort(&self, _ctx: &mut NodeContext<'_, W>, _memory: &mut NodeMemory) -> BtNodeResult {
        BtNodeResult::Aborted
    }

    fn on_task_finished(
        &self,
        _ctx: &mut NodeContext<'_, W>,
        _memory: &mut NodeMemory,
        _result: BtNodeResult,
    ) {
    }

    /// A search that lands on this task while it already runs is discarded.
    fn ignore_restart_self(&self) -> bool {
        false
    }
}

/// Condition gate attached to a child slot.
pub trait DecoratorNode<W>: 'static
where
    W: WorldMut + 'static,
{
    fn new_memory(&self) -> NodeMemory {
        NodeMemory::Empty
    }

    fn init_memory(&self, _memory: &mut NodeMemory, _init: MemoryInit) {}

    fn cleanup_memory(&self, _memory: &mut NodeMemory, _clear: MemoryClear) {}

    /// Raw condition, before the slot's inverse flag is applied.
    fn condition(&self, _ctx: &NodeContext<'_, W>, _memory: &NodeMemory) -> bool {
        true
    }

    /// Blackboard keys whose changes re-evaluate the condition. Empty means every tick.
    fn observed_keys(&self) -> Vec<u64> {
        Vec::new()
    }

    fn on_become_relevant(&self, _ctx: &mut NodeContext<'_, W>, _memory: &mut NodeMemory) {}

    fn on_cease_relevant(&self, _ctx: &mut NodeContext<'_, W>, _memory: &mut NodeMemory) {}

    fn tick(&self, _ctx: &mut NodeContext<'_, W>, _memory: &mut NodeMemory) {}

    /// `repeated` is true when the parent re-enters this same slot.
    fn on_node_activation(
        &self,
        _ctx: &mut NodeContext<'_, W>,
        _memory: &mut NodeMemory,
        _repeated: bool,
    ) -> ProcessedFlow {
        ProcessedFlow::Continue
    }

    fn on_node_deactivation(
        &self,
        _ctx: &mut NodeContext<'_, W>,
        _memory: &mut NodeMemory,
        _result: BtNodeResult,
    ) {
    }

    /// May rewrite the branch result before the parent sees it.
    fn on_node_processed(
        &self,
        _ctx: &mut NodeContext<'_, W>,
        _memory: &mut NodeMemory,
        _result: &mut BtNodeResult,
    ) {
    }

    fn on_blackboard_key_change(
        &self,
        _ctx: &mut NodeContext<'_, W>,
        _memory: &mut NodeMemory,
        _key_id: u64,
    ) -> BlackboardNotificationResult {
        BlackboardNotificationResult::ContinueObserving
    }
}

/// Side-effecting helper that ticks while its owner is relevant.
pub trait ServiceNode<W>: 'static
where
    W: WorldMut + 'static,
{
    fn new_memory(&self) -> NodeMemory {
        NodeMemory::Empty
    }

    fn init_memory(&self, _memory: &mut NodeMemory, _init: MemoryInit) {}

    fn cleanup_memory(&self, _memory: &mut NodeMemory, _clear: MemoryClear) {}

    fn on_become_relevant(&self, _ctx: &mut NodeContext<'_, W>, _memory: &mut NodeMemory) {}

    fn on_cease_relevant(&self, _ctx: &mut NodeContext<'_, W>, _memory: &mut NodeMemory) {}

    fn tick(&self, ctx: &mut NodeContext<'_, W>, memory: &mut NodeMemory);
}
