use gw_telemetry::{metrics, new_task_id, record_cycle, record_points, record_write_task};

#[test]
fn task_ids_are_unique() {
    let a = new_task_id();
    let b = new_task_id();
    assert!(!a.is_empty());
    assert_ne!(a, b);
}

#[test]
fn counters_accumulate() {
    let before = metrics().snapshot();
    record_cycle(false, 12);
    record_cycle(true, 3);
    record_points(4, 1);
    record_write_task(2, 0);
    let after = metrics().snapshot();

    assert!(after.cycles_completed >= before.cycles_completed + 1);
    assert!(after.cycles_failed >= before.cycles_failed + 1);
    assert!(after.cycle_latency_ms_total >= before.cycle_latency_ms_total + 15);
    assert!(after.points_ok >= before.points_ok + 4);
    assert!(after.points_failed >= before.points_failed + 1);
    assert!(after.write_tasks >= before.write_tasks + 1);
    assert!(after.writes_ok >= before.writes_ok + 2);
}
