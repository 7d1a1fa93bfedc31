use ai_core::{Blackboard, TickContext, WorldMut};

use crate::memory::{MemoryInit, NodeMemory};
use crate::node::{NodeContext, ServiceNode};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct IntervalState {
    until_next: f32,
}

/// Service running `run` every `interval` seconds while its owner is relevant.
///
/// An interval of zero runs every tick. The first run happens when the service becomes relevant.
pub struct FnService<F> {
    run: F,
    interval: f32,
}

impl<F> FnService<F> {
    pub fn new(run: F) -> Self {
        Self { run, interval: 0.0 }
    }

    pub fn every(mut self, seconds: f32) -> Self {
        self.interval = seconds.max(0.0);
        self
    }
}

impl<F, W> ServiceNode<W> for FnService<F>
where
    F: Fn(&TickContext, W::Agent, &mut W, &mut Blackboard) + 'static,
    W: WorldMut + 'static,
{
    fn new_memory(&self) -> NodeMemory {
        NodeMemory::state(IntervalState::default())
    }

    fn init_memory(&self, memory: &mut NodeMemory, init: MemoryInit) {
        if init == MemoryInit::Initialize {
            if let Some(state) = memory.get_mut::<IntervalState>() {
                state.until_next = 0.0;
            }
        }
    }

    fn on_become_relevant(&self, _ctx: &mut NodeContext<'_, W>, memory: &mut NodeMemory) {
        if let Some(state) = memory.get_mut::<IntervalState>() {
            state.until_next = 0.0;
        }
    }

    fn tick(&self, ctx: &mut NodeContext<'_, W>, memory: &mut NodeMemory) {
        let Some(state) = memory.get_mut::<IntervalState>() else {
            return;
        };
        state.until_next -= ctx.tick.dt_seconds;
        if state.until_next > 0.0 {
            return;
        }
        state.until_next = self.interval;
        (self.run)(ctx.tick, ctx.agent, &mut *ctx.world, &mut *ctx.blackboard);
    }
}
