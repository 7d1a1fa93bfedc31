#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use ai_core::WorldView;
use ai_eqs::{
    ActorId, EnvQueryGenerator, EnvQueryInstance, EnvQueryRequest, EnvQueryResult, EnvQueryTest,
    FnGenerator, FnTest, PointItem, QueryWorld, RunMode, TestSettings, TestValue, Vec3,
    UNLIMITED_STEP_TIME,
};
use ai_tools::{TraceEvent, TraceSink};

pub const QUERIER: u64 = 1;

#[derive(Debug, Default)]
pub struct TestWorld {
    pub agents: BTreeMap<u64, Vec3>,
    pub actors: BTreeMap<u64, Vec3>,
    pub dead: BTreeSet<u64>,
}

impl TestWorld {
    pub fn with_querier_at(location: Vec3) -> Self {
        let mut world = Self::default();
        world.agents.insert(QUERIER, location);
        world
    }
}

impl WorldView for TestWorld {
    type Agent = u64;
}

impl QueryWorld for TestWorld {
    fn is_querier_alive(&self, querier: u64) -> bool {
        !self.dead.contains(&querier)
    }

    fn querier_location(&self, querier: u64) -> Option<Vec3> {
        self.agents.get(&querier).copied()
    }

    fn actor_location(&self, actor: ActorId) -> Option<Vec3> {
        self.actors.get(&actor.0).copied()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Points `(i, 0, 0)` for `i` in `0..count`.
pub fn line(count: usize) -> impl EnvQueryGenerator<TestWorld> {
    FnGenerator::<PointItem, _>::new(move |_querier: u64, _world: &TestWorld| {
        (0..count).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect()
    })
}

/// Reports each point's x coordinate.
pub fn x_test(settings: TestSettings) -> impl EnvQueryTest<TestWorld> {
    FnTest::new(settings, |_world: &TestWorld, _querier: u64, at: Vec3| TestValue::Float(at.x))
}

/// Reports `values[x]` for the point at `(x, 0, 0)`.
pub fn lookup_test(settings: TestSettings, values: Vec<f32>) -> impl EnvQueryTest<TestWorld> {
    FnTest::new(settings, move |_world: &TestWorld, _querier: u64, at: Vec3| {
        match values.get(at.x as usize) {
            Some(v) => TestValue::Float(*v),
            None => TestValue::Skip,
        }
    })
}

pub fn run_to_end(
    request: EnvQueryRequest<TestWorld>,
    mode: RunMode,
    world: &TestWorld,
    time_limit: f32,
) -> (EnvQueryResult<u64>, u32) {
    let mut instance = EnvQueryInstance::new(1, request, mode);
    while !instance.is_finished() {
        instance.execute_one_step(world, time_limit);
    }
    (instance.result(), instance.step_count())
}

pub fn run_unlimited(
    request: EnvQueryRequest<TestWorld>,
    mode: RunMode,
    world: &TestWorld,
) -> EnvQueryResult<u64> {
    run_to_end(request, mode, world, UNLIMITED_STEP_TIME).0
}

pub fn xs(result: &EnvQueryResult<u64>) -> Vec<f32> {
    result.values::<PointItem>().iter().map(|p| p.x).collect()
}

/// Trace sink whose events stay readable after it is handed to a manager.
#[derive(Debug, Default, Clone)]
pub struct SharedSink(pub Rc<RefCell<Vec<TraceEvent>>>);

impl TraceSink for SharedSink {
    fn emit(&mut self, event: TraceEvent) {
        self.0.borrow_mut().push(event);
    }
}
