// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use proptest::prelude::*;

#[test]
fn window_doubles_until_cap() {
    let backoff = Backoff::default();
    assert_eq!(backoff.window(0), Duration::from_millis(500));
    assert_eq!(backoff.window(1), Duration::from_secs(1));
    assert_eq!(backoff.window(2), Duration::from_secs(2));
    assert_eq!(backoff.window(6), Duration::from_secs(30));
    assert_eq!(backoff.window(20), Duration::from_secs(30));
}

#[test]
fn window_survives_large_attempts() {
    let backoff = Backoff::default();
    assert_eq!(backoff.window(u32::MAX), DEFAULT_MAX_BACKOFF);
}

#[test]
fn delay_with_picks_point_in_window() {
    let backoff = Backoff::default();
    assert_eq!(backoff.delay_with(1, 0.0), Duration::ZERO);
    assert_eq!(backoff.delay_with(1, 1.0), Duration::from_secs(1));
    assert_eq!(backoff.delay_with(1, 0.5), Duration::from_millis(500));
}

#[test]
fn lower_bound_raises_short_delays() {
    let raised = apply_lower_bound_with(
        Duration::from_millis(100),
        Some(Duration::from_secs(10)),
        0.0,
    );
    assert_eq!(raised, Duration::from_secs(10));

    let jittered = apply_lower_bound_with(
        Duration::from_millis(100),
        Some(Duration::from_secs(10)),
        1.0,
    );
    assert_eq!(jittered, Duration::from_secs(12));
}

#[test]
fn lower_bound_keeps_long_delays() {
    let kept = apply_lower_bound_with(
        Duration::from_secs(20),
        Some(Duration::from_secs(10)),
        0.7,
    );
    assert_eq!(kept, Duration::from_secs(20));
    assert_eq!(
        apply_lower_bound_with(Duration::from_secs(3), None, 0.7),
        Duration::from_secs(3)
    );
}

proptest! {
    // Delays never exceed the cap plus the retry-after bound with jitter.
    #[test]
    fn prop_delay_bounded(attempt in 0u32..64, fraction in 0.0f64..1.0) {
        let backoff = Backoff::default();
        prop_assert!(backoff.delay_with(attempt, fraction) <= DEFAULT_MAX_BACKOFF);
    }

    // The window is monotone in the attempt number.
    #[test]
    fn prop_window_monotone(attempt in 0u32..40) {
        let backoff = Backoff::default();
        prop_assert!(backoff.window(attempt) <= backoff.window(attempt + 1));
    }
}
