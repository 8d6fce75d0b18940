mod common;

use common::{MockInstant, Recorder, TestArbiter, arbiter, assert_mutual_exclusion};
use intersection_core::arbiter::{Decision, HoldReason, SweepOutcome};
use intersection_core::roads::{LightState, RoadId, Snapshot, VehicleCounts};
use intersection_core::telemetry::{TelemetryEventKind, TelemetryPayload};

const A: RoadId = RoadId::Road1;
const B: RoadId = RoadId::Road2;
const C: RoadId = RoadId::Road3;

/// A wins on congestion while B queues more cars; both seeded at `t = 0`,
/// then A opens at `t = 10`.
fn congested_a_starves_b() -> (TestArbiter, Recorder) {
    let mut arbiter = arbiter(&[A, B]);
    let mut telemetry = Recorder::new();

    arbiter.tick(
        &[Snapshot::new(B, VehicleCounts::traffic(30, 0))],
        MockInstant::secs(0),
        &mut telemetry,
    );
    arbiter.tick(
        &[Snapshot::new(A, VehicleCounts::traffic(10, 50))],
        MockInstant::secs(0),
        &mut telemetry,
    );
    let opened = arbiter.tick(&[], MockInstant::secs(10), &mut telemetry);
    assert_eq!(opened.opened(), Some(A));

    (arbiter, telemetry)
}

#[test]
fn sweep_is_idle_before_threshold() {
    let (mut arbiter, mut telemetry) = congested_a_starves_b();

    assert_eq!(
        arbiter.sweep(MockInstant(119_900), &mut telemetry),
        SweepOutcome::Idle
    );
    assert_eq!(arbiter.registry().open_road(), Some(A));
}

#[test]
fn starving_road_with_most_cars_is_served() {
    let (mut arbiter, mut telemetry) = congested_a_starves_b();

    let tick = arbiter.tick(&[], MockInstant::secs(120), &mut telemetry);
    assert_eq!(tick, Decision::Hold(HoldReason::AlreadyOpen(A)));

    let outcome = arbiter.sweep(MockInstant::secs(120), &mut telemetry);
    assert_eq!(
        outcome,
        SweepOutcome::Overdue {
            overdue: B,
            opened: Some(B),
        }
    );
    assert_eq!(arbiter.registry().light(A), LightState::Closed);
    assert_eq!(arbiter.registry().light(B), LightState::Open);
    assert_mutual_exclusion(&arbiter);
    assert_eq!(
        arbiter.registry().bookkeeping(B).recorded_at(),
        Some(MockInstant::secs(120))
    );

    let record = telemetry.latest().expect("override recorded");
    assert_eq!(record.event, TelemetryEventKind::OverdueOverride);
    match record.details {
        TelemetryPayload::Decision(details) => {
            assert_eq!(details.road, B);
            assert_eq!(details.weight, 30);
            assert_eq!(details.previous, Some(A));
        }
        other => panic!("unexpected payload: {other:?}"),
    }
}

#[test]
fn density_resumes_after_override_minimum_green() {
    let (mut arbiter, mut telemetry) = congested_a_starves_b();
    arbiter.sweep(MockInstant::secs(120), &mut telemetry);

    let held = arbiter.tick(&[], MockInstant::secs(125), &mut telemetry);
    assert_eq!(
        held,
        Decision::Hold(HoldReason::MinGreen {
            road: B,
            ready_at: MockInstant::secs(130),
        })
    );

    let back = arbiter.tick(&[], MockInstant::secs(130), &mut telemetry);
    assert_eq!(back.opened(), Some(A));
}

#[test]
fn overdue_without_waiting_cars_opens_nothing() {
    let mut arbiter = arbiter(&[A, B]);
    let mut telemetry = Recorder::new();
    arbiter.tick(
        &[Snapshot::new(A, VehicleCounts::traffic(0, 7))],
        MockInstant::secs(0),
        &mut telemetry,
    );

    let outcome = arbiter.sweep(MockInstant::secs(200), &mut telemetry);

    assert_eq!(
        outcome,
        SweepOutcome::Overdue {
            overdue: A,
            opened: None,
        }
    );
    assert!(arbiter.sink().shown.is_empty());
}

#[test]
fn recently_designated_roads_are_not_eligible() {
    let mut arbiter = arbiter(&[A, B, C]);
    let mut telemetry = Recorder::new();

    arbiter.tick(
        &[Snapshot::new(A, VehicleCounts::traffic(4, 0))],
        MockInstant::secs(0),
        &mut telemetry,
    );
    arbiter.tick(
        &[Snapshot::new(C, VehicleCounts::traffic(50, 0))],
        MockInstant::secs(115),
        &mut telemetry,
    );

    let outcome = arbiter.sweep(MockInstant::secs(120), &mut telemetry);

    assert_eq!(
        outcome,
        SweepOutcome::Overdue {
            overdue: A,
            opened: Some(A),
        }
    );
}

#[test]
fn one_road_served_per_sweep() {
    let mut arbiter = arbiter(&[A, B, C]);
    let mut telemetry = Recorder::new();
    for (road, cars) in [(A, 3), (B, 9), (C, 12)] {
        arbiter.tick(
            &[Snapshot::new(road, VehicleCounts::traffic(cars, 0))],
            MockInstant::secs(0),
            &mut telemetry,
        );
    }

    let first = arbiter.sweep(MockInstant::secs(150), &mut telemetry);
    assert_eq!(
        first,
        SweepOutcome::Overdue {
            overdue: A,
            opened: Some(C),
        }
    );
    assert_eq!(arbiter.sink().shown.len(), 1);

    let second = arbiter.sweep(MockInstant::secs(150), &mut telemetry);
    assert_eq!(
        second,
        SweepOutcome::Overdue {
            overdue: A,
            opened: Some(B),
        }
    );
    assert_eq!(arbiter.sink().shown.len(), 2);
    assert_mutual_exclusion(&arbiter);
}

#[test]
fn sweep_ignores_priority_vehicles() {
    let mut arbiter = arbiter(&[A, B]);
    let mut telemetry = Recorder::new();
    arbiter.tick(
        &[Snapshot::new(B, VehicleCounts::traffic(8, 0))],
        MockInstant::secs(0),
        &mut telemetry,
    );
    arbiter.tick(
        &[Snapshot::new(A, VehicleCounts::new(1, 0, 0, 2, 0))],
        MockInstant::secs(1),
        &mut telemetry,
    );

    let outcome = arbiter.sweep(MockInstant::secs(120), &mut telemetry);

    assert_eq!(
        outcome,
        SweepOutcome::Overdue {
            overdue: B,
            opened: Some(B),
        }
    );
    assert_eq!(arbiter.last_emergency_at(), Some(MockInstant::secs(1)));
}

#[test]
fn road_without_counts_is_never_overdue_eligible() {
    let mut arbiter = arbiter(&[A, B]);
    let mut telemetry = Recorder::new();

    let seeded = arbiter.tick(
        &[Snapshot::new(B, VehicleCounts::ZERO)],
        MockInstant::secs(0),
        &mut telemetry,
    );
    assert_eq!(seeded, Decision::Hold(HoldReason::BookkeepingSeeded(A)));
    assert_eq!(arbiter.registry().road(A).counts, None);

    let outcome = arbiter.sweep(MockInstant::secs(200), &mut telemetry);

    assert_eq!(
        outcome,
        SweepOutcome::Overdue {
            overdue: A,
            opened: None,
        }
    );
    assert!(arbiter.sink().shown.is_empty());
    assert_eq!(arbiter.registry().open_road(), None);
}

#[test]
fn overdue_green_holds_against_earlier_density_winner() {
    let (mut arbiter, mut telemetry) = congested_a_starves_b();

    let outcome = arbiter.sweep(MockInstant::secs(130), &mut telemetry);
    assert_eq!(
        outcome,
        SweepOutcome::Overdue {
            overdue: A,
            opened: Some(B),
        }
    );

    let held = arbiter.tick(&[], MockInstant::secs(132), &mut telemetry);
    assert_eq!(
        held,
        Decision::Hold(HoldReason::MinGreen {
            road: B,
            ready_at: MockInstant::secs(140),
        })
    );
    assert_eq!(arbiter.registry().open_road(), Some(B));

    let back = arbiter.tick(&[], MockInstant::secs(140), &mut telemetry);
    assert_eq!(back.opened(), Some(A));
}
