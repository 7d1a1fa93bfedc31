use std::time::Instant;

use tracing::{error, warn};

use crate::context::EnvQueryContext;
use crate::item::{ItemType, ItemTypeInfo, SKIPPED_ITEM_VALUE};
use crate::math::Vec3;
use crate::settings::{FilterOperator, FilterType, ResolvedSettings, ScoreOperator};
use crate::store::ItemStore;
use crate::world::QueryWorld;

#[derive(Debug, Clone, Copy, Default)]
struct ItemAccumulator {
    score: f32,
    partial_scores: u32,
    calls: u32,
    passes: u32,
    skipped: bool,
}

impl ItemAccumulator {
    fn fold(&mut self, value: f32, op: ScoreOperator) {
        match op {
            ScoreOperator::AverageScore => self.score += value,
            ScoreOperator::MinScore => {
                if self.partial_scores == 0 || value < self.score {
                    self.score = value;
                }
            }
            ScoreOperator::MaxScore => {
                if self.partial_scores == 0 || value > self.score {
                    self.score = value;
                }
            }
        }
        self.partial_scores += 1;
    }

    fn passed(&self, op: FilterOperator) -> bool {
        match op {
            FilterOperator::AllPass => self.passes == self.calls,
            FilterOperator::AnyPass => self.passes > 0,
        }
    }

    fn result(&self, op: ScoreOperator) -> f32 {
        match op {
            ScoreOperator::AverageScore if self.partial_scores > 0 => {
                self.score / self.partial_scores as f32
            }
            _ => self.score,
        }
    }
}

/// Walks the valid items of one test step, applying the test's filter and score fold to
/// every value the test reports.
///
/// Always hands out at least one item per step; after that it stops once the step deadline
/// passes and leaves the cursor on the first unprocessed item.
pub struct ItemIterator<'a, W>
where
    W: QueryWorld,
{
    querier: W::Agent,
    world: &'a W,
    item_type: ItemTypeInfo<W>,
    store: &'a mut ItemStore,
    settings: ResolvedSettings,
    test_index: usize,
    pass_on_single: bool,
    deadline: Option<Instant>,
    current: Option<usize>,
    processed: usize,
    acc: ItemAccumulator,
}

impl<'a, W> ItemIterator<'a, W>
where
    W: QueryWorld,
{
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        querier: W::Agent,
        world: &'a W,
        item_type: ItemTypeInfo<W>,
        store: &'a mut ItemStore,
        settings: ResolvedSettings,
        test_index: usize,
        pass_on_single: bool,
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            querier,
            world,
            item_type,
            store,
            settings,
            test_index,
            pass_on_single,
            deadline,
            current: None,
            processed: 0,
            acc: ItemAccumulator::default(),
        }
    }

    pub fn querier(&self) -> W::Agent {
        self.querier
    }

    pub fn world(&self) -> &W {
        self.world
    }

    pub fn settings(&self) -> &ResolvedSettings {
        &self.settings
    }

    pub fn context_locations(&self, context: &dyn EnvQueryContext<W>) -> Vec<Vec3> {
        context.locations(self.querier, self.world)
    }

    /// Commits the previous item and moves to the next valid one.
    pub fn next_item(&mut self) -> Option<usize> {
        self.commit_current();
        if self.store.found_single {
            return None;
        }
        if self.processed > 0 && self.deadline.is_some_and(|d| Instant::now() >= d) {
            return None;
        }
        while self
            .store
            .items
            .get(self.store.cursor)
            .is_some_and(|item| !item.is_valid())
        {
            self.store.cursor += 1;
        }
        if self.store.cursor >= self.store.items.len() {
            return None;
        }
        self.current = Some(self.store.cursor);
        self.processed += 1;
        self.acc = ItemAccumulator::default();
        self.current
    }

    pub fn location(&self) -> Option<Vec3> {
        let raw = self.store.raw(self.current?, self.item_type.value_size)?;
        (self.item_type.location)(raw, self.world)
    }

    /// Typed value of the current item; `None` if the query's items are not `T`.
    pub fn value<T: ItemType>(&self) -> Option<T::Value> {
        if !self.item_type.is::<T>() {
            return None;
        }
        T::read(self.store.raw(self.current?, T::VALUE_SIZE)?)
    }

    /// Reports one float value for the current item (one per context location).
    pub fn set_score(&mut self, value: f32) {
        if self.current.is_none() {
            return;
        }
        if value.is_nan() {
            warn!(test = self.test_index, "test reported NaN, item skipped");
            self.skip_item();
            return;
        }
        let s = &self.settings;
        let passed = !s.purpose.filters()
            || match s.filter_type {
                FilterType::Minimum => value >= s.float_min,
                FilterType::Maximum => value <= s.float_max,
                FilterType::Range => value >= s.float_min && value <= s.float_max,
                FilterType::Match => {
                    error!(test = self.test_index, "match filter is not valid on a float test");
                    false
                }
            };
        self.record(passed, value);
    }

    /// Reports one boolean value for the current item.
    pub fn set_bool(&mut self, value: bool) {
        if self.current.is_none() {
            return;
        }
        let s = &self.settings;
        let matches = value == s.bool_match;
        let passed = !s.purpose.filters()
            || match s.filter_type {
                FilterType::Match => matches,
                other => {
                    error!(test = self.test_index, filter = ?other, "only match filters are valid on a bool test");
                    false
                }
            };
        self.record(passed, if matches { 1.0 } else { 0.0 });
    }

    /// Leaves the current item untouched by this test; it keeps its place and score.
    pub fn skip_item(&mut self) {
        if self.current.is_some() {
            self.acc.skipped = true;
        }
    }

    /// Ends the step without evaluating the remaining items.
    pub fn abandon(&mut self) {
        self.current = None;
        self.store.cursor = self.store.items.len();
    }

    fn record(&mut self, passed: bool, value: f32) {
        self.acc.calls += 1;
        if passed {
            self.acc.passes += 1;
            self.acc.fold(value, self.settings.score_op);
        }
    }

    fn commit_current(&mut self) {
        let Some(index) = self.current.take() else {
            return;
        };
        self.store.cursor = index + 1;

        let test = self.test_index;
        let acc = self.acc;
        let skipped = acc.skipped || acc.calls == 0;
        let failed = !skipped && self.settings.purpose.filters() && !acc.passed(self.settings.filter_op);
        let value = if skipped {
            SKIPPED_ITEM_VALUE
        } else {
            acc.result(self.settings.score_op)
        };
        if let Some(slot) = self
            .store
            .details
            .get_mut(index)
            .and_then(|d| d.test_results.get_mut(test))
        {
            *slot = value;
        }

        if failed {
            self.store.discard(index, test);
        } else if self.pass_on_single {
            self.store.pick_single(index);
            self.store.found_single = true;
        }
    }

    pub(crate) fn finish(mut self) -> usize {
        self.commit_current();
        if self.processed == 0 && self.store.cursor < self.store.items.len() {
            warn!(test = self.test_index, "test step processed no items");
        }
        self.processed
    }
}
