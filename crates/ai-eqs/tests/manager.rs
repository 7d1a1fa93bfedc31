mod common;

use std::cell::RefCell;
use std::rc::Rc;

use ai_eqs::{
    EnvQuery, EnvQueryManager, EnvQueryManagerConfig, EnvQueryOption, EnvQueryRequest,
    EnvQueryResult, EnvQueryStatus, EqsError, FilterType, RunMode, TestSettings, Vec3,
};

use common::{init_tracing, line, x_test, xs, SharedSink, TestWorld, QUERIER};

const OTHER: u64 = 2;

fn world() -> TestWorld {
    let mut world = TestWorld::with_querier_at(Vec3::ZERO);
    world.agents.insert(OTHER, Vec3::new(5.0, 0.0, 0.0));
    world
}

fn scored_line(count: usize) -> Rc<EnvQuery<TestWorld>> {
    EnvQuery::new("scored_line")
        .option(
            EnvQueryOption::new(line(count))
                .test(x_test(TestSettings::filter_only(FilterType::Minimum).with_min(2.0)))
                .test(x_test(TestSettings::score_only())),
        )
        .into_shared()
}

/// Every tick runs exactly one step.
fn one_step_per_tick() -> EnvQueryManagerConfig {
    EnvQueryManagerConfig::default().with_testing_time(0.0)
}

type Seen = Rc<RefCell<Vec<EnvQueryStatus>>>;

fn recorder(seen: &Seen) -> impl FnOnce(&EnvQueryResult<u64>) + 'static {
    let seen = Rc::clone(seen);
    move |result: &EnvQueryResult<u64>| seen.borrow_mut().push(result.status)
}

#[test]
fn queued_query_finishes_over_ticks_and_calls_its_delegate() {
    init_tracing();
    let world = world();
    let mut manager = EnvQueryManager::new(one_step_per_tick());
    let seen = Seen::default();
    let id = manager
        .run_query_with(
            EnvQueryRequest::new(scored_line(10), QUERIER),
            RunMode::AllMatching,
            recorder(&seen),
        )
        .expect("query has an option");

    manager.tick(&world);
    assert!(manager.is_running(id));
    assert!(seen.borrow().is_empty());

    for _ in 0..100 {
        if manager.running_count() == 0 {
            break;
        }
        manager.tick(&world);
    }
    assert_eq!(*seen.borrow(), vec![EnvQueryStatus::Success]);
    assert!(!manager.is_running(id));
    assert_eq!(manager.drain_finished().count(), 0);
}

#[test]
fn queries_without_a_delegate_are_drained_in_completion_order() {
    let world = world();
    let mut manager = EnvQueryManager::new(one_step_per_tick());
    let first = manager
        .run_query(EnvQueryRequest::new(scored_line(10), QUERIER), RunMode::AllMatching)
        .expect("query has an option");
    let second = manager
        .run_query(EnvQueryRequest::new(scored_line(4), OTHER), RunMode::AllMatching)
        .expect("query has an option");
    for _ in 0..100 {
        if manager.running_count() == 0 {
            break;
        }
        manager.tick(&world);
    }

    let finished: Vec<_> = manager.drain_finished().collect();
    assert_eq!(finished.iter().map(|r| r.query_id).collect::<Vec<_>>(), vec![second, first]);
    assert_eq!(xs(&finished[1]).first(), Some(&9.0));
    assert_eq!(finished[1].len(), 8);
    assert_eq!(manager.drain_finished().count(), 0);
}

#[test]
fn delegate_results_and_silent_removals_are_not_retained() {
    let world = world();
    let mut manager = EnvQueryManager::new(EnvQueryManagerConfig::default().with_testing_time(5.0));
    let seen = Seen::default();
    for _ in 0..200 {
        manager
            .run_query_with(
                EnvQueryRequest::new(scored_line(5), QUERIER),
                RunMode::SingleResult,
                recorder(&seen),
            )
            .expect("query has an option");
    }
    manager.tick(&world);
    assert_eq!(seen.borrow().len(), 200);
    assert_eq!(manager.drain_finished().count(), 0);

    manager
        .run_query(EnvQueryRequest::new(scored_line(5), OTHER), RunMode::SingleResult)
        .expect("query has an option");
    assert_eq!(manager.silently_remove_all_queries_by_querier(OTHER), 1);
    assert_eq!(manager.drain_finished().count(), 0);

    let id = manager
        .run_query(EnvQueryRequest::new(scored_line(5), OTHER), RunMode::SingleResult)
        .expect("query has an option");
    assert_eq!(manager.abort_query(id), Ok(()));
    let aborted: Vec<_> = manager.drain_finished().map(|r| r.status).collect();
    assert_eq!(aborted, vec![EnvQueryStatus::Aborted]);
}

#[test]
fn generous_budget_finishes_in_one_tick() {
    let world = world();
    let mut manager = EnvQueryManager::new(EnvQueryManagerConfig::default().with_testing_time(5.0));
    manager
        .run_query(EnvQueryRequest::new(scored_line(50), QUERIER), RunMode::SingleResult)
        .expect("query has an option");
    manager
        .run_query(EnvQueryRequest::new(scored_line(50), OTHER), RunMode::SingleResult)
        .expect("query has an option");
    manager.tick(&world);
    assert_eq!(manager.running_count(), 0);
    let results: Vec<_> = manager.drain_finished().collect();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| xs(r) == vec![49.0]));
}

#[test]
fn empty_query_is_rejected() {
    let mut manager = EnvQueryManager::<TestWorld>::default();
    let empty = EnvQuery::new("empty").into_shared();
    assert_eq!(
        manager.run_query(EnvQueryRequest::new(empty, QUERIER), RunMode::SingleResult),
        Err(EqsError::EmptyQuery("empty".to_string()))
    );
    assert_eq!(manager.running_count(), 0);
}

#[test]
fn instant_query_runs_to_completion_without_queueing() {
    let world = world();
    let mut manager = EnvQueryManager::new(one_step_per_tick());
    let result = manager
        .run_instant_query(EnvQueryRequest::new(scored_line(30), QUERIER), RunMode::AllMatching, &world)
        .expect("query has an option");
    assert_eq!(result.status, EnvQueryStatus::Success);
    assert_eq!(result.len(), 28);
    assert_eq!(manager.running_count(), 0);
}

#[test]
fn abort_calls_delegate_and_unknown_ids_error() {
    let world = world();
    let mut manager = EnvQueryManager::new(one_step_per_tick());
    let seen = Seen::default();
    let id = manager
        .run_query_with(
            EnvQueryRequest::new(scored_line(10), QUERIER),
            RunMode::SingleResult,
            recorder(&seen),
        )
        .expect("query has an option");
    manager.tick(&world);

    assert_eq!(manager.abort_query(id), Ok(()));
    assert_eq!(*seen.borrow(), vec![EnvQueryStatus::Aborted]);
    assert_eq!(manager.abort_query(id), Err(EqsError::UnknownQuery(id)));
    assert_eq!(manager.running_count(), 0);
}

#[test]
fn removing_by_querier_honors_the_delegate_flag() {
    let world = world();
    let mut manager = EnvQueryManager::new(one_step_per_tick());
    let seen = Seen::default();
    for querier in [QUERIER, OTHER, QUERIER] {
        manager
            .run_query_with(
                EnvQueryRequest::new(scored_line(10), querier),
                RunMode::SingleResult,
                recorder(&seen),
            )
            .expect("query has an option");
    }
    manager.tick(&world);

    assert_eq!(manager.silently_remove_all_queries_by_querier(QUERIER), 2);
    assert!(seen.borrow().is_empty());
    assert_eq!(manager.running_count(), 1);

    assert_eq!(manager.remove_all_queries_by_querier(OTHER, true), 1);
    assert_eq!(*seen.borrow(), vec![EnvQueryStatus::Aborted]);
    assert_eq!(manager.remove_all_queries_by_querier(OTHER, true), 0);
}

#[test]
fn breadth_first_round_robins_and_depth_first_drains_oldest() {
    let world = world();

    let mut breadth = EnvQueryManager::new(one_step_per_tick());
    let a = breadth
        .run_query(EnvQueryRequest::new(scored_line(10), QUERIER), RunMode::AllMatching)
        .expect("query has an option");
    let b = breadth
        .run_query(EnvQueryRequest::new(scored_line(10), OTHER), RunMode::AllMatching)
        .expect("query has an option");
    breadth.tick(&world);
    breadth.tick(&world);
    breadth.tick(&world);
    let steps = |m: &EnvQueryManager<TestWorld>, id| m.instance(id).map(|i| i.step_count());
    assert_eq!(steps(&breadth, a), Some(2));
    assert_eq!(steps(&breadth, b), Some(1));

    let mut depth = EnvQueryManager::new(one_step_per_tick().depth_first());
    let a = depth
        .run_query(EnvQueryRequest::new(scored_line(10), QUERIER), RunMode::AllMatching)
        .expect("query has an option");
    let b = depth
        .run_query(EnvQueryRequest::new(scored_line(10), OTHER), RunMode::AllMatching)
        .expect("query has an option");
    depth.tick(&world);
    depth.tick(&world);
    depth.tick(&world);
    assert_eq!(steps(&depth, a), Some(3));
    assert_eq!(steps(&depth, b), Some(0));
}

#[test]
fn lost_querier_reports_owner_lost_and_traces_it() {
    let mut world = world();
    let sink = SharedSink::default();
    let mut manager =
        EnvQueryManager::new(one_step_per_tick()).with_trace_sink(Box::new(sink.clone()));
    let seen = Seen::default();
    manager
        .run_query_with(
            EnvQueryRequest::new(scored_line(10), OTHER),
            RunMode::SingleResult,
            recorder(&seen),
        )
        .expect("query has an option");
    manager.tick(&world);

    world.dead.insert(OTHER);
    manager.tick(&world);
    assert_eq!(*seen.borrow(), vec![EnvQueryStatus::OwnerLost]);
    assert_eq!(manager.running_count(), 0);

    let events = sink.0.borrow();
    let finished: Vec<_> = events.iter().filter(|e| e.tag == "eqs.query.finished").collect();
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].value, EnvQueryStatus::OwnerLost.code());
    assert_eq!(finished[0].tick, 2);
}
