use ai_core::{BbKey, Blackboard, TickContext, WorldMut};

use crate::memory::{MemoryInit, NodeMemory};
use crate::node::{BtNodeResult, DecoratorNode, NodeContext, ProcessedFlow};

/// Gate backed by a plain predicate, re-evaluated every tick while relevant.
pub struct Condition<F> {
    cond: F,
}

impl<F> Condition<F> {
    pub fn new(cond: F) -> Self {
        Self { cond }
    }
}

impl<F, W> DecoratorNode<W> for Condition<F>
where
    F: Fn(&TickContext, W::Agent, &W, &Blackboard) -> bool + 'static,
    W: WorldMut + 'static,
{
    fn condition(&self, ctx: &NodeContext<'_, W>, _memory: &NodeMemory) -> bool {
        (self.cond)(ctx.tick, ctx.agent, &*ctx.world, &*ctx.blackboard)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeyQuery<T> {
    IsSet,
    IsNotSet,
    Equals(T),
    NotEquals(T),
}

/// Gate on one blackboard key. Only re-evaluated when that key changes.
pub struct BlackboardCondition<T: 'static> {
    key: BbKey<T>,
    query: KeyQuery<T>,
}

impl<T: 'static> BlackboardCondition<T> {
    pub fn new(key: BbKey<T>, query: KeyQuery<T>) -> Self {
        Self { key, query }
    }

    pub fn is_set(key: BbKey<T>) -> Self {
        Self::new(key, KeyQuery::IsSet)
    }

    pub fn equals(key: BbKey<T>, value: T) -> Self {
        Self::new(key, KeyQuery::Equals(value))
    }
}

impl<T, W> DecoratorNode<W> for BlackboardCondition<T>
where
    T: PartialEq + 'static,
    W: WorldMut + 'static,
{
    fn condition(&self, ctx: &NodeContext<'_, W>, _memory: &NodeMemory) -> bool {
        let value = ctx.blackboard.get(self.key);
        match &self.query {
            KeyQuery::IsSet => value.is_some(),
            KeyQuery::IsNotSet => value.is_none(),
            KeyQuery::Equals(expected) => value == Some(expected),
            KeyQuery::NotEquals(expected) => value != Some(expected),
        }
    }

    fn observed_keys(&self) -> Vec<u64> {
        vec![self.key.id()]
    }
}

/// Reports success for the decorated branch whatever it returned.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForceSuccess;

impl<W> DecoratorNode<W> for ForceSuccess
where
    W: WorldMut + 'static,
{
    fn on_node_processed(
        &self,
        _ctx: &mut NodeContext<'_, W>,
        _memory: &mut NodeMemory,
        result: &mut BtNodeResult,
    ) {
        *result = BtNodeResult::Succeeded;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct LoopState {
    remaining: u32,
}

/// Runs the decorated branch `count` times in a row; `None` loops forever.
#[derive(Debug, Clone, Copy)]
pub struct Loop {
    count: Option<u32>,
}

impl Loop {
    pub fn times(count: u32) -> Self {
        Self { count: Some(count) }
    }

    pub fn forever() -> Self {
        Self { count: None }
    }
}

impl<W> DecoratorNode<W> for Loop
where
    W: WorldMut + 'static,
{
    fn new_memory(&self) -> NodeMemory {
        NodeMemory::state(LoopState::default())
    }

    fn init_memory(&self, memory: &mut NodeMemory, init: MemoryInit) {
        if init == MemoryInit::Initialize {
            if let Some(state) = memory.get_mut::<LoopState>() {
                state.remaining = 0;
            }
        }
    }

    fn on_node_activation(
        &self,
        _ctx: &mut NodeContext<'_, W>,
        memory: &mut NodeMemory,
        repeated: bool,
    ) -> ProcessedFlow {
        let Some(count) = self.count else {
            return ProcessedFlow::RepeatBranch;
        };
        let Some(state) = memory.get_mut::<LoopState>() else {
            return ProcessedFlow::Continue;
        };
        if !repeated {
            state.remaining = count;
        }
        state.remaining = state.remaining.saturating_sub(1);
        if state.remaining > 0 {
            ProcessedFlow::RepeatBranch
        } else {
            ProcessedFlow::Continue
        }
    }
}
