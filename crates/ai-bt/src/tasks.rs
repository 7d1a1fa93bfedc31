use ai_core::{Blackboard, TickContext, WorldMut};

use crate::memory::{MemoryInit, NodeMemory};
use crate::node::{BtNodeResult, NodeContext, TaskNode};

/// Task finishing in the same frame with whatever `run` returns.
///
/// Returning `InProgress` is treated as `Failed`: an instant task has no way to finish later.
pub struct FnTask<F> {
    run: F,
}

impl<F> FnTask<F> {
    pub fn new(run: F) -> Self {
        Self { run }
    }
}

impl<F, W> TaskNode<W> for FnTask<F>
where
    F: Fn(&TickContext, W::Agent, &mut W, &mut Blackboard) -> BtNodeResult + 'static,
    W: WorldMut + 'static,
{
    fn execute(&self, ctx: &mut NodeContext<'_, W>, _memory: &mut NodeMemory) -> BtNodeResult {
        match (self.run)(ctx.tick, ctx.agent, &mut *ctx.world, &mut *ctx.blackboard) {
            BtNodeResult::InProgress => BtNodeResult::Failed,
            result => result,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct WaitState {
    remaining_seconds: f32,
}

/// Succeeds after `seconds` of accumulated tick time.
#[derive(Debug, Clone, Copy)]
pub struct Wait {
    seconds: f32,
}

impl Wait {
    pub fn seconds(seconds: f32) -> Self {
        Self {
            seconds: seconds.max(0.0),
        }
    }
}

impl<W> TaskNode<W> for Wait
where
    W: WorldMut + 'static,
{
    fn new_memory(&self) -> NodeMemory {
        NodeMemory::state(WaitState::default())
    }

    fn init_memory(&self, memory: &mut NodeMemory, init: MemoryInit) {
        if init == MemoryInit::Initialize {
            if let Some(state) = memory.get_mut::<WaitState>() {
                state.remaining_seconds = 0.0;
            }
        }
    }

    fn execute(&self, _ctx: &mut NodeContext<'_, W>, memory: &mut NodeMemory) -> BtNodeResult {
        if self.seconds <= 0.0 {
            return BtNodeResult::Succeeded;
        }
        match memory.get_mut::<WaitState>() {
            Some(state) => {
                state.remaining_seconds = self.seconds;
                BtNodeResult::InProgress
            }
            None => BtNodeResult::Failed,
        }
    }

    fn tick(&self, ctx: &mut NodeContext<'_, W>, memory: &mut NodeMemory) -> Option<BtNodeResult> {
        let state = memory.get_mut::<WaitState>()?;
        state.remaining_seconds -= ctx.tick.dt_seconds;
        (state.remaining_seconds <= 0.0).then_some(BtNodeResult::Succeeded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct World;
    impl ai_core::WorldView for World {
        type Agent = u32;
    }
    impl WorldMut for World {}

    #[test]
    fn wait_finishes_after_accumulated_time() {
        let wait = Wait::seconds(0.25);
        let mut memory = <Wait as TaskNode<World>>::new_memory(&wait);
        let tick = TickContext::new(0, 0.1);
        let mut world = World;
        let mut bb = Blackboard::new();
        let mut ctx = NodeContext::new(&tick, 1, &mut world, &mut bb);

        assert_eq!(wait.execute(&mut ctx, &mut memory), BtNodeResult::InProgress);
        assert_eq!(wait.tick(&mut ctx, &mut memory), None);
        assert_eq!(wait.tick(&mut ctx, &mut memory), None);
        assert_eq!(wait.tick(&mut ctx, &mut memory), Some(BtNodeResult::Succeeded));
    }

    #[test]
    fn fn_task_cannot_stay_in_progress() {
        let task = FnTask::new(|_: &TickContext, _: u32, _: &mut World, _: &mut Blackboard| {
            BtNodeResult::InProgress
        });
        let tick = TickContext::new(0, 0.1);
        let mut world = World;
        let mut bb = Blackboard::new();
        let mut ctx = NodeContext::new(&tick, 1, &mut world, &mut bb);
        let mut memory = NodeMemory::Empty;
        assert_eq!(task.execute(&mut ctx, &mut memory), BtNodeResult::Failed);
    }
}
