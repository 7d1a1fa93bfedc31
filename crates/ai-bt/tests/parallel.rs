mod common;

use ai_bt::{
    BehaviorTree, BtError, BtNodeResult, Child, Composite, ExecutionMode, ParallelFinishMode,
};
use ai_core::TickContext;
use common::{component_with_trace, init_tracing, run, Instant, Latent, RecordingWorld};

#[test]
fn main_task_finishing_aborts_background() {
    init_tracing();
    let tree = BehaviorTree::build(
        "parallel",
        Composite::parallel(ParallelFinishMode::AbortBackground)
            .child(Child::task("main", Latent::new("main", 3)))
            .child(Child::task("bg", Latent::new("bg", 100))),
    )
    .expect("valid tree");

    let mut world = RecordingWorld::default();
    let mut comp = component_with_trace();
    comp.start_tree(&TickContext::new(0, 0.1), &mut world, tree, ExecutionMode::SingleRun);

    let mut tick = 1;
    run(&mut comp, &mut world, &mut tick, 8);

    assert_eq!(world.ticks_of("main"), 3);
    assert_eq!(world.aborted, vec!["bg"]);
    assert!(world.ticks_of("bg") < 100);
    assert!(!comp.is_running());
}

#[test]
fn wait_for_background_lets_it_finish() {
    init_tracing();
    let tree = BehaviorTree::build(
        "parallel",
        Composite::parallel(ParallelFinishMode::WaitForBackground)
            .child(Child::task("main", Latent::new("main", 2)))
            .child(Child::task("bg", Latent::new("bg", 4))),
    )
    .expect("valid tree");

    let mut world = RecordingWorld::default();
    let mut comp = component_with_trace();
    comp.start_tree(&TickContext::new(0, 0.1), &mut world, tree, ExecutionMode::SingleRun);

    let mut tick = 1;
    run(&mut comp, &mut world, &mut tick, 10);

    assert!(world.aborted.is_empty());
    assert_eq!(world.ticks_of("main"), 2);
    assert_eq!(world.ticks_of("bg"), 4);
    assert!(!comp.is_running());
}

#[test]
fn parallel_needs_a_task_as_main_child() {
    let err = BehaviorTree::<RecordingWorld>::build(
        "bad",
        Composite::parallel(ParallelFinishMode::AbortBackground)
            .child(
                Composite::sequence()
                    .child(Child::task("a", Instant::new("a", BtNodeResult::Succeeded))),
            )
            .child(Child::task("bg", Latent::new("bg", 1))),
    )
    .unwrap_err();
    assert!(matches!(err, BtError::InvalidParallel { .. }));
}

#[test]
fn parallel_needs_exactly_two_children() {
    let err = BehaviorTree::<RecordingWorld>::build(
        "bad",
        Composite::parallel(ParallelFinishMode::WaitForBackground)
            .child(Child::task("main", Latent::new("main", 1))),
    )
    .unwrap_err();
    assert!(matches!(err, BtError::InvalidParallel { .. }));
}
