mod common;

use common::{clock, note, ran, ran_at, run_for, tasks, Recorder};
use cooptask::rtos::Membership;
use cooptask::{Action, Clock, Event, NoInterrupts, TaskError, TaskManager};

const A: usize = 0xA;
const B: usize = 0xB;
const C: usize = 0xC;
const D: usize = 0xD;

#[test]
fn highest_priority_first_then_fifo() {
    let clock = Clock::<NoInterrupts>::new();
    let tasks = TaskManager::<NoInterrupts, 3>::new(&clock);
    tasks.queue_with_input(note, A, 5).unwrap();
    tasks.queue_with_input(note, B, 5).unwrap();
    tasks.queue_with_input(note, C, 10).unwrap();

    tasks.tick();
    assert_eq!(ran(), [C]);
    tasks.tick();
    assert_eq!(ran(), [C, A]);
    tasks.tick();
    assert_eq!(ran(), [C, A, B]);
    assert_eq!(tasks.free_slots(), 3);
}

#[test]
fn distinct_priorities_drain_in_descending_order() {
    let clock = Clock::<NoInterrupts>::new();
    let tasks = TaskManager::<NoInterrupts, 8>::new(&clock);
    for priority in [3, 7, 1, 6, 2, 5, 4, 0] {
        tasks
            .queue_with_input(note, priority as usize, priority)
            .unwrap();
    }
    for _ in 0..8 {
        tasks.tick();
    }
    assert_eq!(ran(), [7, 6, 5, 4, 3, 2, 1, 0]);
}

#[test]
fn full_pool_evicts_lower_ranked_tail() {
    let clock = Clock::<NoInterrupts>::new();
    let log = Recorder::default();
    let tasks = TaskManager::<NoInterrupts, 3>::new(&clock);
    tasks.set_logger(&log);

    for tag in 1..=3 {
        tasks.queue_with_input(note, tag, 1).unwrap();
    }
    tasks.tick();
    assert_eq!(ran(), [1]);
    tasks.queue_with_input(note, 4, 1).unwrap();
    assert_eq!(tasks.free_slots(), 0);

    // tail is task 3
    assert_eq!(tasks.queue_with_input(note, 5, 2), Ok(()));
    assert!(!tasks.is_scheduled_with_input(note, 3));

    assert_eq!(
        tasks.queue_with_input(note, 6, 1),
        Err(TaskError::PoolExhausted)
    );
    assert_eq!(tasks.free_slots(), 0);
    assert!(!tasks.is_scheduled_with_input(note, 6));

    for _ in 0..4 {
        tasks.tick();
    }
    assert_eq!(ran(), [1, 5, 2, 4]);

    let events = log.events();
    assert!(events
        .iter()
        .any(|event| matches!(event, Event::TailEvicted { priority: 1, .. })));
    assert!(events.contains(&Event::TaskDropped {
        priority: 1,
        reason: TaskError::PoolExhausted
    }));
}

#[test]
fn periodic_task_with_count_runs_that_many_times() {
    let tasks = tasks();
    tasks.schedule_count_with_input(note, D, 3, 100, 50, 3).unwrap();

    // poll every 10 ms
    for _ in 0..40 {
        clock().advance(10);
        tasks.tick();
    }

    assert_eq!(ran(), [D, D, D]);
    let at = ran_at();
    for (run, expected) in at.iter().zip([100, 150, 200]) {
        assert!((expected..=expected + 10).contains(run), "ran at {run}");
    }
    assert!(at.windows(2).all(|pair| pair[1] - pair[0] >= 50));
    assert!(!tasks.is_scheduled_with_input(note, D));
    assert_eq!(tasks.free_slots(), tasks.capacity());
}

#[test]
fn promotion_follows_due_time_not_priority() {
    let clock = Clock::<NoInterrupts>::new();
    let tasks = TaskManager::<NoInterrupts, 4>::new(&clock);
    tasks.schedule_with_input(note, 1, 1, 30, 0).unwrap();
    tasks.schedule_with_input(note, 9, 9, 20, 0).unwrap();
    tasks.schedule_with_input(note, 5, 5, 10, 0).unwrap();

    tasks.tick();
    assert_eq!(tasks.schedule_len(), 3);
    run_for(&tasks, 40);
    assert_eq!(ran(), [5, 9, 1]);
}

#[test]
fn periodic_task_stays_registered_between_runs() {
    let clock = Clock::<NoInterrupts>::new();
    let tasks = TaskManager::<NoInterrupts, 4>::new(&clock);
    tasks.schedule_with_input(note, 1, 2, 0, 25).unwrap();
    run_for(&tasks, 101);
    assert_eq!(ran().len(), 5);
    assert_eq!(
        tasks.state_of(Action::WithInput(note, 1)),
        Some(Membership::InSchedule)
    );
}

fn cancel_x() {
    tasks().cancel_with_input(note, 0x10);
}

#[test]
fn cancel_wins_over_promotion_in_same_tick() {
    let tasks = tasks();
    tasks.schedule_with_input(note, 0x10, 1, 5, 0).unwrap();
    tasks.tick();
    clock().advance(5);
    // runs ahead of the promotion step of the same tick
    tasks.queue(cancel_x, 9).unwrap();
    tasks.tick();
    run_for(tasks, 20);
    assert!(ran().is_empty());
    assert!(!tasks.is_scheduled_with_input(note, 0x10));
    assert_eq!(tasks.free_slots(), tasks.capacity());
}

#[test]
fn cancel_reaches_every_state() {
    let clock = Clock::<NoInterrupts>::new();
    let tasks = TaskManager::<NoInterrupts, 4>::new(&clock);

    // not yet linked
    tasks.queue_with_input(note, 1, 1).unwrap();
    tasks.cancel_with_input(note, 1);
    assert_eq!(tasks.free_slots(), 4);

    // scheduled
    tasks.schedule_with_input(note, 2, 1, 10, 0).unwrap();
    tasks.tick();
    assert_eq!(tasks.schedule_len(), 1);
    tasks.cancel_with_input(note, 2);
    tasks.tick();
    assert_eq!(tasks.schedule_len(), 0);

    // promoted into the queue
    tasks.schedule_with_input(note, 3, 1, 0, 0).unwrap();
    tasks.tick();
    clock.advance(1);
    tasks.tick();
    assert_eq!(
        tasks.state_of(Action::WithInput(note, 3)),
        Some(Membership::InQueue)
    );
    tasks.cancel_with_input(note, 3);
    run_for(&tasks, 5);

    assert!(ran().is_empty());
    assert_eq!(tasks.queue_len(), 0);
    assert_eq!(tasks.free_slots(), 4);
}

#[test]
fn cancel_queued_leaves_scheduled_copy() {
    let clock = Clock::<NoInterrupts>::new();
    let tasks = TaskManager::<NoInterrupts, 4>::new(&clock);
    tasks.queue_with_input(note, 1, 1).unwrap();
    tasks.schedule_with_input(note, 1, 1, 10, 0).unwrap();
    tasks.cancel_queued_with_input(note, 1);
    assert_eq!(
        tasks.state_of(Action::WithInput(note, 1)),
        Some(Membership::PendingLinkSchedule)
    );
    tasks.cancel_scheduled_with_input(note, 1);
    assert!(!tasks.is_scheduled_with_input(note, 1));
}

#[test]
fn reserved_priority_is_refused() {
    let clock = Clock::<NoInterrupts>::new();
    let tasks = TaskManager::<NoInterrupts, 2>::new(&clock);
    assert_eq!(
        tasks.queue_with_input(note, 1, cooptask::rtos::FREE_PRIORITY),
        Err(TaskError::ReservedPriority)
    );
    assert_eq!(tasks.free_slots(), 2);
}
