use std::sync::Arc;

use proptest::prelude::*;

use super::{LogicalClock, ManualTimeSource};
use crate::error::SyncError;

fn manual_clock(start: i64) -> (LogicalClock, ManualTimeSource) {
    let source = ManualTimeSource::new(start);
    (LogicalClock::new(Arc::new(source.clone())), source)
}

// ===== Construction & Lifecycle =====

#[test]
fn test_new_clock_reads_zero_and_is_stopped() {
    let (mut clock, _) = manual_clock(5_000);
    assert!(!clock.is_started());
    assert_eq!(clock.get_time(), 0);
    assert_eq!(clock.get_start_time(), 0);
}

#[test]
fn test_clock_follows_wall_time() {
    let (mut clock, source) = manual_clock(0);
    source.advance(250);
    assert_eq!(clock.get_time(), 250);
    source.advance(1);
    assert_eq!(clock.get_time(), 251);
}

#[test]
fn test_start_stop_do_not_touch_time() {
    let (mut clock, source) = manual_clock(0);
    source.advance(40);
    clock.start();
    assert!(clock.is_started());
    assert_eq!(clock.get_time(), 40);
    clock.stop();
    assert!(!clock.is_started());
    source.advance(10);
    assert_eq!(clock.get_time(), 50);
}

#[test]
fn test_reset_zeroes_and_reanchors() {
    let (mut clock, source) = manual_clock(0);
    source.advance(900);
    clock.adjust(30);
    clock.reset();
    assert_eq!(clock.pending_adjustment(), 0);
    assert_eq!(clock.get_time(), 0);
    source.advance(15);
    assert_eq!(clock.get_time(), 15);
}

#[test]
fn test_restart_starts_clock() {
    let (mut clock, source) = manual_clock(100);
    source.advance(100);
    clock.restart();
    assert!(clock.is_started());
    assert_eq!(clock.get_time(), 0);
}

#[test]
fn test_restart_at_rejects_negative_without_reset() {
    let (mut clock, source) = manual_clock(0);
    clock.restart_at(2_000).unwrap();
    source.advance(100);

    assert!(matches!(
        clock.restart_at(-5),
        Err(SyncError::InvalidTimeValue { value: -5 })
    ));
    assert!(clock.is_started());
    assert_eq!(clock.get_time(), 2_100);
}

// ===== set_time =====

#[test]
fn test_set_time_jumps_and_continues() {
    let (mut clock, source) = manual_clock(0);
    source.advance(10);
    clock.set_time(5_000).unwrap();
    assert_eq!(clock.get_start_time(), 5_000);
    source.advance(500);
    assert_eq!(clock.get_time(), 5_500);
}

#[test]
fn test_set_time_rejects_negative() {
    let (mut clock, _) = manual_clock(0);
    let err = clock.set_time(-1).unwrap_err();
    assert!(matches!(err, SyncError::InvalidTimeValue { value: -1 }));
    assert_eq!(clock.get_time(), 0);
}

// ===== Adjustments =====

#[test]
fn test_adjust_is_deferred_until_read() {
    let (mut clock, _) = manual_clock(0);
    clock.adjust(100);
    assert_eq!(clock.pending_adjustment(), 100);
    assert_eq!(clock.get_time(), 100);
    assert_eq!(clock.pending_adjustment(), 0);
}

#[test]
fn test_positive_adjust_applies_immediately() {
    let (mut clock, source) = manual_clock(0);
    source.advance(1_000);
    assert_eq!(clock.get_time(), 1_000);
    clock.adjust(250);
    assert_eq!(clock.get_time(), 1_250);
    source.advance(10);
    assert_eq!(clock.get_time(), 1_260);
}

#[test]
fn test_negative_adjust_applies_when_monotone() {
    let (mut clock, source) = manual_clock(0);
    source.advance(1_000);
    clock.adjust(-200);
    // Nothing reported yet, so the jump back does not violate monotonicity.
    assert_eq!(clock.get_time(), 800);
    assert_eq!(clock.pending_adjustment(), 0);
}

#[test]
fn test_negative_adjust_is_held_then_bled_in() {
    let (mut clock, source) = manual_clock(0);
    source.advance(1_000);
    assert_eq!(clock.get_time(), 1_000);

    clock.adjust(-100);
    source.advance(10);
    assert_eq!(clock.get_time(), 1_000);
    assert_eq!(clock.pending_adjustment(), -90);

    source.advance(50);
    assert_eq!(clock.get_time(), 1_000);
    assert_eq!(clock.pending_adjustment(), -40);

    source.advance(40);
    assert_eq!(clock.get_time(), 1_000);
    assert_eq!(clock.pending_adjustment(), 0);

    // Fully absorbed: the clock now runs 100ms behind its unadjusted course.
    source.advance(25);
    assert_eq!(clock.get_time(), 1_025);
}

#[test]
fn test_adjustments_accumulate() {
    let (mut clock, _) = manual_clock(0);
    clock.adjust(30);
    clock.adjust(-10);
    clock.adjust(5);
    assert_eq!(clock.pending_adjustment(), 25);
    assert_eq!(clock.get_time(), 25);
}

// ===== Properties =====

#[derive(Debug, Clone)]
enum Op {
    Advance(i64),
    Adjust(i64),
    Read,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..50).prop_map(Op::Advance),
        (-500i64..500).prop_map(Op::Adjust),
        Just(Op::Read),
    ]
}

proptest! {
    #[test]
    fn prop_reads_are_monotonic(ops in prop::collection::vec(op_strategy(), 1..200)) {
        let (mut clock, source) = manual_clock(0);
        let mut previous = clock.get_time();
        for op in ops {
            match op {
                Op::Advance(ms) => source.advance(ms),
                Op::Adjust(delta) => clock.adjust(delta),
                Op::Read => {
                    let now = clock.get_time();
                    prop_assert!(now >= previous, "time went backwards: {} -> {}", previous, now);
                    previous = now;
                }
            }
        }
    }

    #[test]
    fn prop_negative_adjust_converges(
        start in 0i64..100_000,
        drift in 1i64..2_000,
        step in 1i64..20,
    ) {
        let (mut clock, source) = manual_clock(0);
        source.advance(start);
        let before = clock.get_time();
        prop_assert_eq!(before, start);

        clock.adjust(-drift);
        let mut elapsed = 0;
        let mut previous = before;
        loop {
            source.advance(step);
            elapsed += step;
            let now = clock.get_time();
            prop_assert!(now >= previous);
            prop_assert!(now >= before);
            previous = now;
            if clock.pending_adjustment() == 0 {
                prop_assert_eq!(now, before + elapsed - drift);
                break;
            }
            prop_assert!(elapsed <= drift + step, "correction never finished");
        }
    }
}
