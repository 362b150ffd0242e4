//! Demonstration of identifier rotation and attendance accumulation.
//!
//! This example shows how to:
//! 1. Register a module and rotate its identifier
//! 2. Record device reports against the current identifier
//! 3. Query daily, range and live attendance
//!
//! Run with: cargo run --example rotation_demo

use std::sync::Arc;

use beacon_attendance::{
    activity::create_shared_log,
    core::StatsOrder,
    AttendanceAggregator, Directory, MemberId, MemoryStore, Module, RotationScheduler, Seed,
    SessionAccumulator, SharedStore,
};
use chrono::{Duration, TimeZone, Utc};

fn main() -> anyhow::Result<()> {
    println!("Beacon Attendance - Rotation Demo");
    println!("=================================");
    println!();

    let store: SharedStore = Arc::new(MemoryStore::new());
    let activity = create_shared_log();
    let (tx, rx) = crossbeam_channel::unbounded();

    let scheduler = RotationScheduler::new(Arc::clone(&store))
        .with_events(tx)
        .with_activity_log(Arc::clone(&activity));
    let accumulator =
        SessionAccumulator::new(Arc::clone(&store), chrono_tz::UTC, Duration::minutes(5))
            .with_activity_log(Arc::clone(&activity));
    let aggregator = AttendanceAggregator::new(store, Arc::new(Directory::new()), chrono_tz::UTC);

    scheduler.register(Module::new("lab", "amFOSS_", Seed::new(2024)?, 10)?)?;

    let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
    let members = [MemberId::new("ada"), MemberId::new("grace")];

    // Two hours of reports, one every two minutes, with a rotation every ten.
    for step in 0..60 {
        let now = start + Duration::minutes(step * 2);
        scheduler.tick("lab", now)?;
        let identifier = scheduler.module("lab")?.published_identifier().to_string();

        accumulator.record_report(&members[0], &identifier, now)?;
        // grace leaves for lunch between 09:40 and 10:20.
        if !(20..40).contains(&step) {
            accumulator.record_report(&members[1], &identifier, now)?;
        }
    }

    println!("Rotations:");
    for event in rx.try_iter() {
        println!("  {}", serde_json::to_string(&event)?);
    }
    println!();

    let daily = aggregator.daily_summary(start.date_naive())?;
    println!("Daily summary:");
    println!("{}", serde_json::to_string_pretty(&daily)?);
    println!();

    let range = aggregator.range_summary(
        Some(start.date_naive()),
        None,
        "-totalDuration".parse::<StatsOrder>()?,
        start.date_naive(),
    )?;
    println!("Member stats:");
    for stats in &range.member_stats {
        println!(
            "  {:<8} present {} day(s), {:.0} min total",
            stats.member.username,
            stats.present_count,
            stats.total_duration_secs / 60.0
        );
    }
    println!();

    let live = aggregator.live_presence(start + Duration::minutes(120), None)?;
    println!("Live now: {}", live.count);
    println!();
    println!("{}", activity.summary());

    Ok(())
}
