#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use ai_tools::{TraceEvent, TraceSink};
use tracing::{debug, info, warn};

use crate::error::{EqsError, Result};
use crate::instance::{EnvQueryInstance, EnvQueryResult, EnvQueryStatus, UNLIMITED_STEP_TIME};
use crate::query::{EnvQueryRequest, RunMode};
use crate::world::QueryWorld;

pub type QueryId = u32;

/// Called once with the result when a query finishes, aborts or loses its querier.
pub type FinishDelegate<A> = Box<dyn FnOnce(&EnvQueryResult<A>)>;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(default))]
pub struct EnvQueryManagerConfig {
    /// Wall clock seconds [`EnvQueryManager::tick`] may spend stepping queries.
    pub max_allowed_testing_time: f32,
    /// Round robin one step per query (`true`) or finish the oldest query first.
    pub test_queries_using_breadth: bool,
}

impl Default for EnvQueryManagerConfig {
    fn default() -> Self {
        Self {
            max_allowed_testing_time: 0.01,
            test_queries_using_breadth: true,
        }
    }
}

impl EnvQueryManagerConfig {
    pub fn with_testing_time(mut self, seconds: f32) -> Self {
        self.max_allowed_testing_time = seconds.max(0.0);
        self
    }

    pub fn depth_first(mut self) -> Self {
        self.test_queries_using_breadth = false;
        self
    }
}

struct RunningQuery<W>
where
    W: QueryWorld,
{
    instance: EnvQueryInstance<W>,
    on_finished: Option<FinishDelegate<W::Agent>>,
}

/// Owns every running query and shares a per-tick time budget between them.
pub struct EnvQueryManager<W>
where
    W: QueryWorld,
{
    config: EnvQueryManagerConfig,
    next_id: QueryId,
    ticks: u64,
    running: Vec<RunningQuery<W>>,
    /// Breadth first resume point.
    cursor: usize,
    finished: VecDeque<EnvQueryResult<W::Agent>>,
    trace: Option<Box<dyn TraceSink>>,
}

impl<W> Default for EnvQueryManager<W>
where
    W: QueryWorld,
{
    fn default() -> Self {
        Self::new(EnvQueryManagerConfig::default())
    }
}

impl<W> fmt::Debug for EnvQueryManager<W>
where
    W: QueryWorld,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvQueryManager")
            .field("config", &self.config)
            .field("running", &self.running.len())
            .field("finished", &self.finished.len())
            .finish()
    }
}

impl<W> EnvQueryManager<W>
where
    W: QueryWorld,
{
    pub fn new(config: EnvQueryManagerConfig) -> Self {
        Self {
            config,
            next_id: 1,
            ticks: 0,
            running: Vec::new(),
            cursor: 0,
            finished: VecDeque::new(),
            trace: None,
        }
    }

    pub fn with_trace_sink(mut self, sink: Box<dyn TraceSink>) -> Self {
        self.trace = Some(sink);
        self
    }

    pub fn config(&self) -> &EnvQueryManagerConfig {
        &self.config
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn is_running(&self, id: QueryId) -> bool {
        self.running.iter().any(|q| q.instance.id() == id)
    }

    /// Live view of a running query.
    pub fn instance(&self, id: QueryId) -> Option<&EnvQueryInstance<W>> {
        self.running.iter().map(|q| &q.instance).find(|i| i.id() == id)
    }

    /// Queues a time-sliced query; it advances in [`EnvQueryManager::tick`].
    pub fn run_query(&mut self, request: EnvQueryRequest<W>, mode: RunMode) -> Result<QueryId> {
        self.start(request, mode, None)
    }

    pub fn run_query_with(
        &mut self,
        request: EnvQueryRequest<W>,
        mode: RunMode,
        on_finished: impl FnOnce(&EnvQueryResult<W::Agent>) + 'static,
    ) -> Result<QueryId> {
        self.start(request, mode, Some(Box::new(on_finished)))
    }

    fn start(
        &mut self,
        request: EnvQueryRequest<W>,
        mode: RunMode,
        on_finished: Option<FinishDelegate<W::Agent>>,
    ) -> Result<QueryId> {
        let id = self.prepare(&request)?;
        debug!(query = id, name = request.query.name(), ?mode, "query queued");
        self.running.push(RunningQuery {
            instance: EnvQueryInstance::new(id, request, mode),
            on_finished,
        });
        Ok(id)
    }

    fn prepare(&mut self, request: &EnvQueryRequest<W>) -> Result<QueryId> {
        if request.query.option_count() == 0 {
            warn!(name = request.query.name(), "query has no options");
            return Err(EqsError::EmptyQuery(request.query.name().to_string()));
        }
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);
        Ok(id)
    }

    /// Runs a query to completion right away, without a time limit.
    pub fn run_instant_query(
        &mut self,
        request: EnvQueryRequest<W>,
        mode: RunMode,
        world: &W,
    ) -> Result<EnvQueryResult<W::Agent>> {
        let id = self.prepare(&request)?;
        let mut instance = EnvQueryInstance::new(id, request, mode);
        while !instance.is_finished() {
            instance.execute_one_step(world, UNLIMITED_STEP_TIME);
        }
        let result = instance.result();
        self.trace_finished(&result);
        Ok(result)
    }

    /// Steps running queries until every one finishes or the time budget is spent. At least
    /// one step runs per tick while queries are pending.
    pub fn tick(&mut self, world: &W) {
        self.ticks += 1;
        if self.running.is_empty() {
            return;
        }
        let budget = self.config.max_allowed_testing_time.max(0.0);
        let started = Instant::now();
        let budget_end = Duration::try_from_secs_f32(budget)
            .ok()
            .and_then(|limit| started.checked_add(limit));
        let mut steps = 0u32;

        while !self.running.is_empty() {
            let remaining = match budget_end {
                Some(end) => end.saturating_duration_since(Instant::now()).as_secs_f32(),
                None => UNLIMITED_STEP_TIME,
            };
            if steps > 0 && remaining == 0.0 {
                break;
            }

            let index = if self.config.test_queries_using_breadth {
                self.cursor % self.running.len()
            } else {
                0
            };
            let query = &mut self.running[index];
            query.instance.execute_one_step(world, remaining);
            steps += 1;

            if query.instance.is_finished() {
                let query = self.running.remove(index);
                self.complete(query, true);
                if index < self.cursor {
                    self.cursor -= 1;
                }
            } else {
                self.cursor = index + 1;
            }
            if self.cursor >= self.running.len() {
                self.cursor = 0;
            }
        }
        debug!(
            tick = self.ticks,
            steps,
            running = self.running.len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "queries stepped"
        );
    }

    /// Aborts a running query; its finish delegate sees `Aborted`.
    pub fn abort_query(&mut self, id: QueryId) -> Result<()> {
        let index = self
            .running
            .iter()
            .position(|q| q.instance.id() == id)
            .ok_or(EqsError::UnknownQuery(id))?;
        let mut query = self.running.remove(index);
        query.instance.abort();
        self.fix_cursor(index);
        self.complete(query, true);
        Ok(())
    }

    /// Aborts every query of `querier`, returning how many were removed.
    pub fn remove_all_queries_by_querier(&mut self, querier: W::Agent, execute_finish_delegate: bool) -> usize {
        let mut removed = 0;
        let mut index = 0;
        while index < self.running.len() {
            if self.running[index].instance.querier() != querier {
                index += 1;
                continue;
            }
            let mut query = self.running.remove(index);
            query.instance.abort();
            self.fix_cursor(index);
            self.complete(query, execute_finish_delegate);
            removed += 1;
        }
        if removed > 0 {
            info!(?querier, removed, "queries removed for querier");
        }
        removed
    }

    pub fn silently_remove_all_queries_by_querier(&mut self, querier: W::Agent) -> usize {
        self.remove_all_queries_by_querier(querier, false)
    }

    /// Results of finished queries queued without a finish delegate, in completion order.
    pub fn drain_finished(&mut self) -> impl Iterator<Item = EnvQueryResult<W::Agent>> + '_ {
        self.finished.drain(..)
    }

    fn fix_cursor(&mut self, removed: usize) {
        if removed < self.cursor {
            self.cursor -= 1;
        }
        if self.cursor >= self.running.len() {
            self.cursor = 0;
        }
    }

    /// Hands the result to the finish delegate, or queues it for [`Self::drain_finished`]
    /// when the query has none. Nothing surfaces when `execute_delegate` is false.
    fn complete(&mut self, query: RunningQuery<W>, execute_delegate: bool) {
        let result = query.instance.result();
        if result.status == EnvQueryStatus::OwnerLost {
            debug!(query = result.query_id, querier = ?result.querier, "querier gone");
        }
        self.trace_finished(&result);
        if !execute_delegate {
            return;
        }
        match query.on_finished {
            Some(on_finished) => on_finished(&result),
            None => self.finished.push_back(result),
        }
    }

    fn trace_finished(&mut self, result: &EnvQueryResult<W::Agent>) {
        if let Some(sink) = self.trace.as_mut() {
            sink.emit(TraceEvent::new(self.ticks, "eqs.query.finished").with_value(result.status.code()));
            sink.emit(TraceEvent::new(self.ticks, "eqs.query.items").with_value(result.items.len() as i64));
        }
    }
}
