mod common;

use ai_eqs::{
    EnvQuery, EnvQueryInstance, EnvQueryOption, EnvQueryRequest, FilterType, RunMode,
    TestSettings, Vec3, UNLIMITED_STEP_TIME,
};
use proptest::prelude::*;

use common::{line, lookup_test, run_to_end, TestWorld, QUERIER};

fn values() -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec((-50i32..50).prop_map(|v| v as f32), 1..40)
}

fn run_mode() -> impl Strategy<Value = RunMode> {
    prop_oneof![
        Just(RunMode::SingleResult),
        Just(RunMode::RandomBest5Pct),
        Just(RunMode::RandomBest25Pct),
        Just(RunMode::AllMatching),
    ]
}

fn filter_then_score(values: &[f32], min: f32, seed: u64) -> EnvQueryRequest<TestWorld> {
    let query = EnvQuery::new("filter_then_score").option(
        EnvQueryOption::new(line(values.len()))
            .test(lookup_test(
                TestSettings::filter_only(FilterType::Minimum).with_min(min),
                values.to_vec(),
            ))
            .test(lookup_test(TestSettings::score_only(), values.iter().map(|v| -v).collect())),
    );
    EnvQueryRequest::new(query.into_shared(), QUERIER).with_seed(seed)
}

proptest! {
    #[test]
    fn sliced_runs_match_unlimited_runs(
        values in values(),
        min in -60i32..60,
        mode in run_mode(),
        seed in any::<u64>(),
    ) {
        let world = TestWorld::with_querier_at(Vec3::ZERO);
        let (sliced, _) = run_to_end(filter_then_score(&values, min as f32, seed), mode, &world, 0.0);
        let (unlimited, _) =
            run_to_end(filter_then_score(&values, min as f32, seed), mode, &world, UNLIMITED_STEP_TIME);
        prop_assert_eq!(sliced, unlimited);
    }

    #[test]
    fn filtering_discards_exactly_the_failing_items(values in values(), min in -60i32..60) {
        let world = TestWorld::with_querier_at(Vec3::ZERO);
        let mut instance =
            EnvQueryInstance::new(1, filter_then_score(&values, min as f32, 0), RunMode::AllMatching);
        instance.execute_one_step(&world, UNLIMITED_STEP_TIME);
        instance.execute_one_step(&world, UNLIMITED_STEP_TIME);

        prop_assert_eq!(instance.items().len(), values.len());
        let discarded = instance.items().iter().filter(|i| i.discarded).count();
        prop_assert_eq!(instance.num_valid_items() + discarded, values.len());
        for (item, value) in instance.items().iter().zip(&values) {
            prop_assert_eq!(item.discarded, *value < min as f32);
        }
    }
}
