#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::rc::Rc;
use std::time::{Duration, Instant};

use ai_core::{DeterministicRng, SplitMix64};
use tracing::{debug, warn};

use crate::generator::GenerationContext;
use crate::item::{EnvQueryItem, ItemDetails, ItemType, ItemTypeInfo};
use crate::iterator::ItemIterator;
use crate::manager::QueryId;
use crate::query::{EnvQueryOption, EnvQueryRequest, RunMode};
use crate::settings::TestPurpose;
use crate::store::ItemStore;
use crate::world::QueryWorld;

/// Step time limit that disables the deadline.
pub const UNLIMITED_STEP_TIME: f32 = -1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum EnvQueryStatus {
    Processing,
    Success,
    /// Every option ran out of valid items.
    Failed,
    Aborted,
    OwnerLost,
    MissingParam,
}

impl EnvQueryStatus {
    pub fn code(self) -> i64 {
        match self {
            Self::Processing => 0,
            Self::Success => 1,
            Self::Failed => 2,
            Self::Aborted => 3,
            Self::OwnerLost => 4,
            Self::MissingParam => 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Generating,
    Testing(usize),
    Finalizing,
    Done,
}

/// One running query: generation, then each test of the current option in turn, then
/// finalization, advanced a bounded slice at a time by [`EnvQueryInstance::execute_one_step`].
pub struct EnvQueryInstance<W>
where
    W: QueryWorld,
{
    id: QueryId,
    request: EnvQueryRequest<W>,
    mode: RunMode,
    status: EnvQueryStatus,
    phase: Phase,
    option_index: usize,
    item_type: Option<ItemTypeInfo<W>>,
    store: ItemStore,
    pass_on_single: bool,
    rng: SplitMix64,
    steps: u32,
    missing_param: Option<String>,
}

impl<W> EnvQueryInstance<W>
where
    W: QueryWorld,
{
    pub fn new(id: QueryId, request: EnvQueryRequest<W>, mode: RunMode) -> Self {
        let rng = SplitMix64::new(request.seed);
        Self {
            id,
            request,
            mode,
            status: EnvQueryStatus::Processing,
            phase: Phase::Generating,
            option_index: 0,
            item_type: None,
            store: ItemStore::default(),
            pass_on_single: false,
            rng,
            steps: 0,
            missing_param: None,
        }
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn querier(&self) -> W::Agent {
        self.request.querier
    }

    pub fn query_name(&self) -> &str {
        self.request.query.name()
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn status(&self) -> EnvQueryStatus {
        self.status
    }

    pub fn is_finished(&self) -> bool {
        self.status != EnvQueryStatus::Processing
    }

    pub fn option_index(&self) -> usize {
        self.option_index
    }

    /// `None` while generating (or finished), otherwise the test about to run or resume.
    pub fn current_test(&self) -> Option<usize> {
        match self.phase {
            Phase::Testing(test) => Some(test),
            _ => None,
        }
    }

    /// First item the current test has not processed yet.
    pub fn current_test_starting_item(&self) -> usize {
        self.store.cursor
    }

    /// All items of the current option, discarded ones included until finalization.
    pub fn items(&self) -> &[EnvQueryItem] {
        &self.store.items
    }

    pub fn item_details(&self) -> &[ItemDetails] {
        &self.store.details
    }

    pub fn num_valid_items(&self) -> usize {
        self.store.num_valid
    }

    pub fn step_count(&self) -> u32 {
        self.steps
    }

    pub fn missing_param(&self) -> Option<&str> {
        self.missing_param.as_deref()
    }

    /// Advances by one slice. A negative `time_limit` (see [`UNLIMITED_STEP_TIME`]) runs the
    /// current test to completion.
    pub fn execute_one_step(&mut self, world: &W, time_limit: f32) {
        if self.is_finished() {
            return;
        }
        self.steps += 1;

        if !world.is_querier_alive(self.request.querier) {
            debug!(query = self.id, "querier lost");
            self.finish(EnvQueryStatus::OwnerLost);
            return;
        }

        let query = Rc::clone(&self.request.query);
        let Some(option) = query.options.get(self.option_index) else {
            self.store.num_valid = 0;
            self.finalize();
            return;
        };

        let deadline = if time_limit < 0.0 {
            None
        } else {
            Duration::try_from_secs_f32(time_limit)
                .ok()
                .and_then(|limit| Instant::now().checked_add(limit))
        };

        match self.phase {
            Phase::Generating => self.generate(world, option),
            Phase::Testing(test) => self.run_test(world, option, test, deadline),
            Phase::Finalizing => {
                self.finalize();
                return;
            }
            Phase::Done => return,
        }
        if self.is_finished() {
            return;
        }

        if let Phase::Testing(test) = self.phase {
            if test >= option.tests.len() || self.store.num_valid == 0 {
                if self.store.num_valid > 0 || self.option_index + 1 >= query.options.len() {
                    self.phase = Phase::Finalizing;
                } else {
                    debug!(query = self.id, option = self.option_index, "option left no items, trying next");
                    self.option_index += 1;
                    self.phase = Phase::Generating;
                }
            }
        }
    }

    fn generate(&mut self, world: &W, option: &EnvQueryOption<W>) {
        self.store.reset();
        self.pass_on_single = false;
        let item_type = option.generator.item_type();
        self.item_type = Some(item_type);

        let missing = {
            let mut gen = GenerationContext::new(
                self.request.querier,
                world,
                &self.request.params,
                item_type,
                &mut self.store.items,
                &mut self.store.raw_data,
            );
            option.generator.generate(&mut gen);
            gen.missing_param()
        };
        if let Some(name) = missing {
            warn!(query = self.id, param = %name, "generator param missing");
            self.missing_param = Some(name);
            self.finish(EnvQueryStatus::MissingParam);
            return;
        }

        self.store.finish_generation(option.tests.len());
        debug!(
            query = self.id,
            option = self.option_index,
            items = self.store.items.len(),
            "items generated"
        );
        self.phase = Phase::Testing(0);
    }

    fn run_test(&mut self, world: &W, option: &EnvQueryOption<W>, test: usize, deadline: Option<Instant>) {
        let (Some(test_obj), Some(item_type)) = (option.tests.get(test), self.item_type) else {
            warn!(query = self.id, option = self.option_index, test, "no test to run, skipping");
            self.advance_test(test);
            return;
        };
        let settings = match test_obj.settings().resolve(&self.request.params) {
            Ok(settings) => settings,
            Err(err) => {
                warn!(query = self.id, test, error = %err, "test param missing");
                if let crate::error::EqsError::MissingParam(name) = err {
                    self.missing_param = Some(name);
                }
                self.finish(EnvQueryStatus::MissingParam);
                return;
            }
        };

        let last = test + 1 == option.tests.len();
        self.pass_on_single =
            last && self.mode == RunMode::SingleResult && settings.purpose == TestPurpose::Filter;
        if self.pass_on_single && test > 0 && self.store.cursor == 0 {
            self.store.sort_scores();
        }

        let before = self.store.cursor;
        let mut it = ItemIterator::new(
            self.request.querier,
            world,
            item_type,
            &mut self.store,
            settings,
            test,
            self.pass_on_single,
            deadline,
        );
        test_obj.run_test(&mut it);
        it.finish();

        let exhausted = self.store.cursor >= self.store.items.len();
        let stalled = self.store.cursor == before;
        if stalled && !exhausted && !self.store.found_single {
            warn!(query = self.id, test, "test made no progress, forcing completion");
        }
        if exhausted || stalled || self.store.found_single {
            if settings.purpose.scores() {
                self.store.normalize_item_scores(test, &settings);
            }
            self.advance_test(test);
        }
    }

    fn advance_test(&mut self, test: usize) {
        self.store.cursor = 0;
        self.phase = Phase::Testing(test + 1);
    }

    fn finalize(&mut self) {
        if self.store.num_valid == 0 {
            self.store.reset();
            self.finish(EnvQueryStatus::Failed);
            return;
        }

        match self.mode {
            RunMode::SingleResult => {
                if !self.store.found_single {
                    self.store.sort_scores();
                    self.store.pick_single(0);
                }
            }
            RunMode::RandomBest5Pct | RunMode::RandomBest25Pct => {
                self.store.sort_scores();
                let ratio = if self.mode == RunMode::RandomBest5Pct { 0.95 } else { 0.75 };
                let threshold = self.store.items[0].score * ratio;
                let valid = self.store.num_valid.min(self.store.items.len());
                let candidates = self.store.items[..valid]
                    .iter()
                    .take_while(|item| item.score >= threshold)
                    .count()
                    .max(1);
                let pick = self.rng.next_below(candidates as u64) as usize;
                self.store.pick_single(pick);
            }
            RunMode::AllMatching => {
                self.store.sort_scores();
                self.store.items.truncate(self.store.num_valid);
                self.store.details.truncate(self.store.num_valid);
                self.store.normalize_scores();
            }
        }
        self.finish(EnvQueryStatus::Success);
    }

    fn finish(&mut self, status: EnvQueryStatus) {
        self.status = status;
        self.phase = Phase::Done;
        debug!(
            query = self.id,
            name = self.request.query.name(),
            ?status,
            items = self.store.items.len(),
            steps = self.steps,
            "query finished"
        );
    }

    pub(crate) fn abort(&mut self) {
        if !self.is_finished() {
            self.finish(EnvQueryStatus::Aborted);
        }
    }

    /// Snapshot of the outcome. Items are empty unless the query succeeded.
    pub fn result(&self) -> EnvQueryResult<W::Agent> {
        let success = self.status == EnvQueryStatus::Success;
        EnvQueryResult {
            query_id: self.id,
            query_name: self.request.query.name().to_string(),
            querier: self.request.querier,
            status: self.status,
            option_index: self.option_index,
            item_type: self.item_type.map(|t| t.name),
            value_size: self.item_type.map_or(0, |t| t.value_size),
            items: if success { self.store.items.clone() } else { Vec::new() },
            raw_data: if success { self.store.raw_data.clone() } else { Vec::new() },
        }
    }
}

/// Outcome of a finished query.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvQueryResult<A> {
    pub query_id: QueryId,
    pub query_name: String,
    pub querier: A,
    pub status: EnvQueryStatus,
    /// Option that produced the items.
    pub option_index: usize,
    pub item_type: Option<&'static str>,
    pub value_size: usize,
    pub items: Vec<EnvQueryItem>,
    pub raw_data: Vec<u8>,
}

impl<A> EnvQueryResult<A> {
    pub fn is_success(&self) -> bool {
        self.status == EnvQueryStatus::Success
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn score(&self, index: usize) -> Option<f32> {
        self.items.get(index).map(|i| i.score)
    }

    /// Typed value of item `index`; `None` when out of range or not a `T` query.
    pub fn value<T: ItemType>(&self, index: usize) -> Option<T::Value> {
        if self.item_type != Some(T::NAME) {
            return None;
        }
        let offset = self.items.get(index)?.data_offset;
        T::read(self.raw_data.get(offset..offset + T::VALUE_SIZE)?)
    }

    pub fn values<T: ItemType>(&self) -> Vec<T::Value> {
        (0..self.items.len()).filter_map(|i| self.value::<T>(i)).collect()
    }

    pub fn best<T: ItemType>(&self) -> Option<T::Value> {
        self.value::<T>(0)
    }
}
