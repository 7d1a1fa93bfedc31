use ai_core::Blackboard;
use ai_tools::{emit, TraceEvent, TraceLog, VecTraceSink, TRACE_LOG, TRACE_SINK};

#[test]
fn emit_is_a_no_op_without_a_log_or_sink() {
    let mut bb = Blackboard::new();
    emit(&mut bb, TraceEvent::new(0, "bt.search"));
    assert!(!bb.contains(TRACE_LOG));
}

#[test]
fn emit_fills_log_and_sink() {
    let mut bb = Blackboard::new();
    bb.set(TRACE_LOG, TraceLog::default());
    bb.set::<Box<dyn ai_tools::TraceSink>>(TRACE_SINK, Box::new(VecTraceSink::default()));

    emit(&mut bb, TraceEvent::new(1, "bt.task.execute").at_node(0, 2));
    emit(&mut bb, TraceEvent::new(1, "bt.task.finished").at_node(0, 2).with_value(1));
    emit(&mut bb, TraceEvent::new(2, "bt.task.execute").at_node(1, 4));

    let log = bb.get(TRACE_LOG).expect("log");
    assert_eq!(log.events.len(), 3);
    assert_eq!(log.nodes_tagged("bt.task.execute"), vec![2, 4]);
    assert_eq!(log.tagged("bt.task.finished").count(), 1);
}
