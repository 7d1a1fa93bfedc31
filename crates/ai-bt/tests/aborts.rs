mod common;

use std::rc::Rc;

use ai_bt::{
    BehaviorTree, BlackboardCondition, Child, Composite, Decorator, ExecutionMode, FlowAbortMode,
    StopMode,
};
use ai_core::TickContext;
use common::{component_with_trace, init_tracing, run, Latent, RecordingWorld, ALARM};

fn guarded_selector(mode: FlowAbortMode, low: Latent) -> Rc<BehaviorTree<RecordingWorld>> {
    BehaviorTree::build(
        "guarded",
        Composite::selector()
            .child(
                Child::task("high", Latent::new("high", 1000))
                    .decorator(Decorator::new("alarm", BlackboardCondition::is_set(ALARM)).abort(mode)),
            )
            .child(Child::task("low", low)),
    )
    .expect("valid tree")
}

#[test]
fn lower_priority_abort_preempts_running_branch() {
    init_tracing();
    let tree = guarded_selector(FlowAbortMode::LowerPriority, Latent::new("low", 1000));
    let mut world = RecordingWorld::default();
    let mut comp = component_with_trace();
    comp.start_tree(&TickContext::new(0, 0.1), &mut world, tree, ExecutionMode::Looped);

    let mut tick = 1;
    run(&mut comp, &mut world, &mut tick, 2);
    assert_eq!(comp.active_task_name(), Some("low"));

    comp.blackboard_mut().set(ALARM, true);
    run(&mut comp, &mut world, &mut tick, 4);

    assert_eq!(world.executed, vec!["low", "high"]);
    assert_eq!(world.aborted, vec!["low"]);
    assert_eq!(comp.active_task_name(), Some("high"));
}

#[test]
fn unrelated_key_changes_do_not_preempt() {
    const OTHER: ai_core::BbKey<i32> = ai_core::BbKey::new(99);
    let tree = guarded_selector(FlowAbortMode::LowerPriority, Latent::new("low", 1000));
    let mut world = RecordingWorld::default();
    let mut comp = component_with_trace();
    comp.start_tree(&TickContext::new(0, 0.1), &mut world, tree, ExecutionMode::Looped);

    let mut tick = 1;
    run(&mut comp, &mut world, &mut tick, 2);
    comp.blackboard_mut().set(OTHER, 5);
    run(&mut comp, &mut world, &mut tick, 4);

    assert_eq!(world.executed, vec!["low"]);
    assert!(world.aborted.is_empty());
}

#[test]
fn abort_mode_none_never_interrupts() {
    let tree = guarded_selector(FlowAbortMode::None, Latent::new("low", 1000));
    let mut world = RecordingWorld::default();
    let mut comp = component_with_trace();
    comp.start_tree(&TickContext::new(0, 0.1), &mut world, tree, ExecutionMode::Looped);

    let mut tick = 1;
    run(&mut comp, &mut world, &mut tick, 2);
    comp.blackboard_mut().set(ALARM, true);
    run(&mut comp, &mut world, &mut tick, 4);

    assert_eq!(world.executed, vec!["low"]);
    assert!(world.aborted.is_empty());
}

#[test]
fn self_abort_leaves_branch_when_condition_fails() {
    init_tracing();
    let tree = guarded_selector(FlowAbortMode::SelfBranch, Latent::new("low", 1000));
    let mut world = RecordingWorld::default();
    let mut comp = component_with_trace();
    comp.blackboard_mut().set(ALARM, true);
    comp.start_tree(&TickContext::new(0, 0.1), &mut world, tree, ExecutionMode::Looped);

    let mut tick = 1;
    run(&mut comp, &mut world, &mut tick, 2);
    assert_eq!(comp.active_task_name(), Some("high"));

    comp.blackboard_mut().remove(ALARM);
    run(&mut comp, &mut world, &mut tick, 3);

    assert_eq!(world.aborted, vec!["high"]);
    assert_eq!(world.executed, vec!["high", "low"]);
    assert_eq!(comp.active_task_name(), Some("low"));
}

#[test]
fn latent_abort_delays_the_new_branch() {
    init_tracing();
    let tree = guarded_selector(
        FlowAbortMode::LowerPriority,
        Latent::new("low", 1000).with_latent_abort(2),
    );
    let mut world = RecordingWorld::default();
    let mut comp = component_with_trace();
    comp.start_tree(&TickContext::new(0, 0.1), &mut world, tree, ExecutionMode::Looped);

    let mut tick = 1;
    run(&mut comp, &mut world, &mut tick, 2);
    comp.blackboard_mut().set(ALARM, true);
    run(&mut comp, &mut world, &mut tick, 2);

    assert_eq!(world.aborted, vec!["low"]);
    assert!(comp.is_waiting_for_aborting_tasks());
    assert_eq!(world.executed, vec!["low"]);

    run(&mut comp, &mut world, &mut tick, 4);
    assert!(!comp.is_waiting_for_aborting_tasks());
    assert_eq!(world.executed, vec!["low", "high"]);
}

#[test]
fn restart_aborts_and_runs_from_the_root() {
    init_tracing();
    let tree = BehaviorTree::build(
        "restart",
        Composite::sequence().child(Child::task("work", Latent::new("work", 1000))),
    )
    .expect("valid tree");
    let mut world = RecordingWorld::default();
    let mut comp = component_with_trace();
    let ctx = TickContext::new(0, 0.1);
    comp.start_tree(&ctx, &mut world, tree, ExecutionMode::Looped);

    let mut tick = 1;
    run(&mut comp, &mut world, &mut tick, 2);
    comp.restart_tree(&TickContext::new(tick, 0.1), &mut world);
    run(&mut comp, &mut world, &mut tick, 3);

    assert_eq!(world.executed, vec!["work", "work"]);
    assert_eq!(world.aborted, vec!["work"]);
    assert!(comp.is_running());
}

#[test]
fn safe_stop_waits_for_latent_abort() {
    init_tracing();
    let tree = BehaviorTree::build(
        "stop",
        Composite::sequence()
            .child(Child::task("work", Latent::new("work", 1000).with_latent_abort(1))),
    )
    .expect("valid tree");
    let mut world = RecordingWorld::default();
    let mut comp = component_with_trace();
    comp.start_tree(&TickContext::new(0, 0.1), &mut world, tree, ExecutionMode::Looped);

    let mut tick = 1;
    run(&mut comp, &mut world, &mut tick, 2);
    comp.stop_tree(&TickContext::new(tick, 0.1), &mut world, StopMode::Safe);

    assert_eq!(world.aborted, vec!["work"]);
    assert!(comp.is_running());
    assert!(comp.is_waiting_for_aborting_tasks());

    run(&mut comp, &mut world, &mut tick, 2);
    assert!(!comp.is_running());
    assert_eq!(comp.instance_count(), 0);
}

#[test]
fn forced_stop_does_not_wait() {
    let tree = BehaviorTree::build(
        "stop",
        Composite::sequence()
            .child(Child::task("work", Latent::new("work", 1000).with_latent_abort(5))),
    )
    .expect("valid tree");
    let mut world = RecordingWorld::default();
    let mut comp = component_with_trace();
    comp.start_tree(&TickContext::new(0, 0.1), &mut world, tree, ExecutionMode::Looped);

    let mut tick = 1;
    run(&mut comp, &mut world, &mut tick, 2);
    comp.stop_tree(&TickContext::new(tick, 0.1), &mut world, StopMode::Forced);

    assert!(!comp.is_running());
    assert_eq!(comp.instance_count(), 0);
    assert_eq!(world.aborted, vec!["work"]);
}
