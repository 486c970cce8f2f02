//! Unit tests for cumulative revolution decoding.

use trainingtracker::devices::revolution::{
    RevolutionCounter, RevolutionUpdate, MAX_IDENTICAL, TICKS_PER_SECOND_1024,
    TICKS_PER_SECOND_2048,
};

fn rate(update: RevolutionUpdate) -> f64 {
    match update {
        RevolutionUpdate::Rate {
            revs_per_second, ..
        } => revs_per_second,
        other => panic!("expected a rate, got {:?}", other),
    }
}

#[test]
fn test_one_revolution_per_second() {
    let mut counter = RevolutionCounter::count16(TICKS_PER_SECOND_1024, MAX_IDENTICAL);

    assert_eq!(counter.update(10, 0), RevolutionUpdate::Initialized);
    assert!((rate(counter.update(11, 1024)) - 1.0).abs() < 1e-9);
    assert!((rate(counter.update(13, 2048)) - 2.0).abs() < 1e-9);
    assert_eq!(counter.total_revs(), 3);
}

#[test]
fn test_2048_tick_resolution() {
    let mut counter = RevolutionCounter::count32(TICKS_PER_SECOND_2048, MAX_IDENTICAL);

    counter.update(0, 0);
    // 4 revolutions in 2048 ticks of 1/2048 s
    assert!((rate(counter.update(4, 2048)) - 4.0).abs() < 1e-9);
}

#[test]
fn test_event_time_rollover() {
    let mut counter = RevolutionCounter::count16(TICKS_PER_SECOND_1024, MAX_IDENTICAL);

    counter.update(100, 65000);
    // 65000 -> 512 wraps to 1048 ticks
    let update = counter.update(101, 512);
    assert!((rate(update) - 1024.0 / 1048.0).abs() < 1e-9);
}

#[test]
fn test_16_bit_count_rollover() {
    let mut counter = RevolutionCounter::count16(TICKS_PER_SECOND_1024, MAX_IDENTICAL);

    counter.update(65534, 0);
    match counter.update(2, 1024) {
        RevolutionUpdate::Rate {
            rev_diff,
            total_revs,
            ..
        } => {
            assert_eq!(rev_diff, 4);
            assert_eq!(total_revs, 4);
        }
        other => panic!("expected a rate, got {:?}", other),
    }
}

#[test]
fn test_32_bit_count_rollover() {
    let mut counter = RevolutionCounter::count32(TICKS_PER_SECOND_1024, MAX_IDENTICAL);

    counter.update(u32::MAX, 0);
    match counter.update(1, 1024) {
        RevolutionUpdate::Rate { rev_diff, .. } => assert_eq!(rev_diff, 2),
        other => panic!("expected a rate, got {:?}", other),
    }
}

#[test]
fn test_stop_is_confirmed_after_max_identical_repeats() {
    let mut counter = RevolutionCounter::count32(TICKS_PER_SECOND_1024, MAX_IDENTICAL);
    counter.update(1000, 0);
    counter.update(1010, 1024);

    for identical in 1..MAX_IDENTICAL {
        assert_eq!(
            counter.update(1010, 1024),
            RevolutionUpdate::Stale { identical }
        );
    }
    assert_eq!(counter.update(1010, 1024), RevolutionUpdate::Stopped);

    // Reported once, further repeats stay quiet
    assert!(matches!(
        counter.update(1010, 1024),
        RevolutionUpdate::Stale { .. }
    ));
}

#[test]
fn test_new_event_clears_identical_count() {
    let mut counter = RevolutionCounter::count16(TICKS_PER_SECOND_1024, 2);
    counter.update(0, 0);
    counter.update(1, 1024);
    assert_eq!(counter.update(1, 1024), RevolutionUpdate::Stale { identical: 1 });

    rate(counter.update(2, 2048));
    assert_eq!(counter.update(2, 2048), RevolutionUpdate::Stale { identical: 1 });
    assert_eq!(counter.update(2, 2048), RevolutionUpdate::Stopped);
}

#[test]
fn test_reset_needs_new_reference() {
    let mut counter = RevolutionCounter::count16(TICKS_PER_SECOND_1024, MAX_IDENTICAL);
    counter.update(5, 0);
    counter.update(6, 1024);

    counter.reset();

    assert!(!counter.is_initialized());
    assert_eq!(counter.total_revs(), 0);
    assert_eq!(counter.update(500, 7), RevolutionUpdate::Initialized);
}
