// Property-based tests for minute alignment and scheduler configuration

use chrono::{DateTime, TimeZone, Utc};
use common::config::SchedulerConfig;
use common::scheduler::alignment_delay;
use proptest::prelude::*;
use std::time::Duration;

const MINUTE: Duration = Duration::from_secs(60);

fn timestamp(micros: i64) -> DateTime<Utc> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).unwrap()
}

/// *For any* start time T, the first trigger is scheduled at the next minute
/// boundary strictly after T, never more than one minute away.
#[test]
fn property_first_trigger_lands_on_next_minute() {
    // 2001-09-09 .. 2096-ish, microsecond resolution
    proptest!(|(micros in 1_000_000_000_000_000i64..4_000_000_000_000_000i64)| {
        let now = timestamp(micros);
        let delay = alignment_delay(now, MINUTE);

        prop_assert!(delay > Duration::ZERO);
        prop_assert!(delay <= MINUTE);

        let target = micros + delay.as_micros() as i64;
        prop_assert_eq!(target.rem_euclid(60_000_000), 0);
    });
}

/// *For any* second-of-minute S, the delay is exactly 60 - S seconds.
#[test]
fn property_delay_matches_seconds_into_minute() {
    proptest!(|(
        hour in 0u32..24u32,
        minute in 0u32..60u32,
        second in 1u32..60u32
    )| {
        let now = Utc.with_ymd_and_hms(2024, 6, 15, hour, minute, second).unwrap();
        let delay = alignment_delay(now, MINUTE);
        prop_assert_eq!(delay, Duration::from_secs(u64::from(60 - second)));
    });
}

/// *For any* alignment period P, the delay stays in (0, P].
#[test]
fn property_delay_bounded_by_alignment() {
    proptest!(|(
        micros in 1_000_000_000_000_000i64..4_000_000_000_000_000i64,
        period_secs in 1u64..3600u64
    )| {
        let period = Duration::from_secs(period_secs);
        let delay = alignment_delay(timestamp(micros), period);
        prop_assert!(delay > Duration::ZERO);
        prop_assert!(delay <= period);
    });
}

/// *For any* requested num_threads, exactly one unit of execution is used.
#[test]
fn property_num_threads_always_one() {
    proptest!(|(requested in any::<i64>())| {
        let config = SchedulerConfig {
            worker: Some("/srv/worker".to_string()),
            num_threads: requested,
            ..SchedulerConfig::default()
        };
        prop_assert_eq!(config.bind().unwrap().num_threads, 1);
    });
}

/// *For any* tick interval, a dispatch timeout at or below it is rejected.
#[test]
fn property_dispatch_timeout_must_exceed_interval() {
    proptest!(|(
        interval in 1u64..3600u64,
        slack in 0u64..3600u64
    )| {
        let too_short = SchedulerConfig {
            tick_interval_seconds: interval,
            dispatch_timeout_seconds: interval.saturating_sub(slack),
            ..SchedulerConfig::default()
        };
        prop_assert!(too_short.dispatcher_config().is_err());

        let long_enough = SchedulerConfig {
            tick_interval_seconds: interval,
            dispatch_timeout_seconds: interval + slack + 1,
            ..SchedulerConfig::default()
        };
        let config = long_enough.dispatcher_config().unwrap();
        prop_assert!(config.dispatch_timeout > config.tick_interval);
    });
}

#[test]
fn test_scheduler_config_defaults() {
    let config = SchedulerConfig::default();
    assert_eq!(config.num_threads, 1);
    assert_eq!(config.tick_interval_seconds, 60);
    assert_eq!(config.dispatch_timeout_seconds, 65);
    assert!(config.worker.is_none());
}
