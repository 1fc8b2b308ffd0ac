//! End-to-end mount behaviour against the simulated motor controller

use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use eqmod_astro::{
    equatorial_to_axis, local_apparent_sidereal_time, AlignmentModel, AlignmentPoint, EquatorialCoordinate,
    ARCSEC_RAD, DEG_RAD, LUNAR_RATE_ARCSEC, SIDEREAL_RATE_ARCSEC,
};
use eqmod_motor::simulator::{SimCommand, SimulatedMotor, SimulatorConfig};
use eqmod_motor::MotorError;
use eqmod_mount::{
    Axis, AxisPosition, EqMount, FixedClock, GotoTick, MotionAfterFailure, MountConfig, MountError, PierSide,
    PollOutcome, SlewStage, TrackingMode,
};

const STEPS: u32 = 9_024_000;

fn session_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 20, 22, 0, 0).unwrap()
}

/// Longitude (deg) that puts local sidereal time at `lst` hours at session start
fn longitude_for_lst(lst: f64) -> f64 {
    let greenwich = local_apparent_sidereal_time(0.0, &session_start());
    let mut longitude = (lst - greenwich) * 15.0;
    while longitude > 180.0 {
        longitude -= 360.0;
    }
    while longitude <= -180.0 {
        longitude += 360.0;
    }
    longitude
}

struct Rig {
    mount: EqMount,
    motor: SimulatedMotor,
}

async fn rig_with(configure: impl FnOnce(&mut MountConfig)) -> Rig {
    let mut config = MountConfig::default();
    config.site.latitude = 52.67;
    config.site.longitude = longitude_for_lst(4.0);
    configure(&mut config);

    let motor = SimulatedMotor::new(SimulatorConfig {
        tick_secs: 0.0,
        ..Default::default()
    });
    let mount = EqMount::with_clock(config, Arc::new(FixedClock::new(session_start())));
    mount.connect_with(Box::new(motor.clone())).await.unwrap();
    motor.clear_commands();
    Rig { mount, motor }
}

async fn rig() -> Rig {
    rig_with(|_| {}).await
}

async fn run_until_done(mount: &EqMount) -> anyhow::Result<GotoTick> {
    for _ in 0..200 {
        if let PollOutcome::Tick(tick @ GotoTick::Completed { .. }) = mount.poll().await? {
            return Ok(tick);
        }
    }
    anyhow::bail!("goto did not finish in 200 polls")
}

fn ra_gotos(motor: &SimulatedMotor) -> Vec<(f64, f64)> {
    motor
        .commands()
        .iter()
        .filter_map(|c| match c {
            SimCommand::SlewTo {
                axis: Axis::Ra,
                target,
                slowdown,
            } => Some((*target, *slowdown)),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn test_goto_east_of_meridian() -> anyhow::Result<()> {
    let rig = rig().await;
    assert!((rig.mount.sidereal_time().await - 4.0).abs() < 1e-9);

    // HA = -2h: east pier, axis targets inside one turn
    let plan = rig.mount.slew_to(6.0, 45.0).await?;
    assert_eq!(plan.pier, PierSide::East);
    assert_eq!(plan.stage, SlewStage::Direct);
    assert!((0.0..2.0 * PI).contains(&plan.target.ra));
    assert!((0.0..2.0 * PI).contains(&plan.target.dec));
    assert!((plan.target.ra - PI / 3.0).abs() < 1e-6);
    assert!((plan.target.dec - PI / 4.0).abs() < 1e-6);
    assert!(rig.mount.is_slewing().await);

    assert_eq!(run_until_done(&rig.mount).await?, GotoTick::Completed { parked: false });
    assert!(!rig.mount.is_slewing().await);
    assert_eq!(rig.mount.pier_side().await?, PierSide::East);

    let position = rig.mount.position().await?;
    assert!((position.ra() - 6.0).abs() < 1e-6);
    assert!((position.dec() - 45.0).abs() < 1e-6);
    Ok(())
}

#[tokio::test]
async fn test_sync_rejected_while_not_tracking() -> anyhow::Result<()> {
    let rig = rig().await;
    assert_eq!(rig.mount.tracking_mode().await, TrackingMode::Off);

    let err = rig.mount.sync_to(6.0, 45.0).await.unwrap_err();
    assert!(matches!(err, MountError::InvalidOperation(_)));
    assert!(rig.mount.alignment_points().await.is_empty());
    assert!(rig.motor.commands().is_empty());

    rig.mount.set_tracking(TrackingMode::Sidereal).await?;
    rig.mount.sync_to(6.0, 45.0).await?;
    assert_eq!(rig.mount.alignment_points().await.len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_short_goto_brakes_half_way() -> anyhow::Result<()> {
    let delta = 50_000.0 * 2.0 * PI / STEPS as f64;
    let rig = rig_with(|config| {
        config.park_position = AxisPosition::new(delta, FRAC_PI_2);
    })
    .await;

    rig.mount.park().await?;
    let gotos = ra_gotos(&rig.motor);
    assert_eq!(gotos.len(), 1);
    let (target, slowdown) = gotos[0];
    assert!((target - delta).abs() < 1e-12);
    assert!((slowdown - delta * 0.5).abs() < 1e-12);
    assert!(!rig
        .motor
        .commands()
        .iter()
        .any(|c| matches!(c, SimCommand::SlewTo { axis: Axis::Dec, .. })));

    assert_eq!(run_until_done(&rig.mount).await?, GotoTick::Completed { parked: true });
    assert!(rig.mount.is_parked().await);
    Ok(())
}

#[tokio::test]
async fn test_parked_mount_rejects_motion() -> anyhow::Result<()> {
    let rig = rig().await;
    rig.mount.park().await?;
    run_until_done(&rig.mount).await?;
    assert!(rig.mount.is_parked().await);
    assert_eq!(rig.mount.tracking_mode().await, TrackingMode::Off);

    rig.motor.clear_commands();
    for result in [
        rig.mount.set_tracking(TrackingMode::Sidereal).await,
        rig.mount.move_axis(Axis::Ra, 1.0).await,
        rig.mount.slew_to(6.0, 45.0).await.map(|_| ()),
        rig.mount.sync_to(6.0, 45.0).await,
    ] {
        assert!(matches!(result, Err(MountError::InvalidOperation(_))));
    }
    assert!(rig.motor.commands().is_empty());

    // Parking again is a no-op
    rig.mount.park().await?;
    assert!(rig.motor.commands().is_empty());

    rig.mount.unpark().await?;
    assert!(!rig.mount.is_parked().await);
    rig.mount.set_tracking(TrackingMode::Sidereal).await?;
    assert!(rig.motor.is_moving(Axis::Ra));
    Ok(())
}

#[tokio::test]
async fn test_refinement_ends_after_max_slew_count() -> anyhow::Result<()> {
    let rig = rig().await;
    rig.mount.set_tracking(TrackingMode::Sidereal).await?;
    // Every goto lands about 206" off, well above the 10" resolution
    rig.motor.set_goto_error(Axis::Ra, 0.001);

    rig.mount.slew_to(6.0, 45.0).await?;
    run_until_done(&rig.mount).await?;

    assert_eq!(ra_gotos(&rig.motor).len(), 5);
    assert!(!rig.mount.is_slewing().await);
    assert!((rig.motor.rate(Axis::Ra) - SIDEREAL_RATE_ARCSEC * ARCSEC_RAD).abs() < 1e-15);
    Ok(())
}

#[tokio::test]
async fn test_abort_stops_goto_and_resumes_tracking() -> anyhow::Result<()> {
    let rig = rig().await;
    rig.mount.set_tracking(TrackingMode::Lunar).await?;
    rig.motor.set_never_settle(true);

    rig.mount.slew_to(6.0, 45.0).await?;
    assert_eq!(rig.mount.poll().await?, PollOutcome::Tick(GotoTick::Busy));

    rig.mount.abort_slew().await?;
    assert!(!rig.mount.is_slewing().await);
    assert!(!rig.motor.is_moving(Axis::Dec));
    assert!((rig.motor.rate(Axis::Ra) - LUNAR_RATE_ARCSEC * ARCSEC_RAD).abs() < 1e-15);
    assert_eq!(rig.mount.poll().await?, PollOutcome::Tick(GotoTick::Idle));
    Ok(())
}

#[tokio::test]
async fn test_device_failure_aborts_slew_stopped() -> anyhow::Result<()> {
    let rig = rig().await;
    rig.mount.slew_to(6.0, 45.0).await?;

    rig.motor.fail_after(0, MotorError::NotConnected("cable pulled".to_string()));
    let err = rig.mount.poll().await.unwrap_err();
    match &err {
        MountError::Aborted { operation, left, .. } => {
            assert_eq!(operation, "slew");
            assert_eq!(*left, MotionAfterFailure::Stopped);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(matches!(err.root(), MountError::NotConnected(_)));
    assert!(!rig.mount.is_slewing().await);
    assert!(!rig.motor.is_moving(Axis::Ra));
    assert!(!rig.motor.is_moving(Axis::Dec));
    Ok(())
}

#[tokio::test]
async fn test_sync_corrects_position_and_gotos() -> anyhow::Result<()> {
    let rig = rig().await;
    rig.mount.set_tracking(TrackingMode::Sidereal).await?;
    rig.mount.slew_to(6.0, 45.0).await?;
    run_until_done(&rig.mount).await?;
    let centred = rig.mount.axis_position().await?;

    // The star actually centred is slightly off the requested one
    rig.mount.sync_to(6.01, 45.1).await?;
    let position = rig.mount.position().await?;
    assert!((position.ra() - 6.01).abs() < 1e-6);
    assert!((position.dec() - 45.1).abs() < 1e-6);

    // Going back to the synced star needs no motion
    let plan = rig.mount.slew_to(6.01, 45.1).await?;
    assert!(plan.target.max_abs_diff(&centred) < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_sync_without_append_uses_offset() -> anyhow::Result<()> {
    let rig = rig_with(|config| config.alignment.append_on_sync = false).await;
    rig.mount.set_tracking(TrackingMode::Sidereal).await?;
    rig.mount.slew_to(6.0, 45.0).await?;
    run_until_done(&rig.mount).await?;

    rig.mount.sync_to(5.98, 44.9).await?;
    assert!(rig.mount.alignment_points().await.is_empty());
    let position = rig.mount.position().await?;
    assert!((position.ra() - 5.98).abs() < 1e-6);
    assert!((position.dec() - 44.9).abs() < 1e-6);

    rig.mount.clear_alignment().await;
    let position = rig.mount.position().await?;
    assert!((position.ra() - 6.0).abs() < 1e-6);
    Ok(())
}

#[tokio::test]
async fn test_sync_offset_applies_over_full_model() -> anyhow::Result<()> {
    let rig = rig_with(|config| config.alignment.append_on_sync = false).await;
    let config = rig.mount.config().await;
    let frame = config.frame();

    // Three error-free points around the target
    let mut model = AlignmentModel::new(config.alignment.max_points);
    for (ra, dec) in [(5.5, 40.0), (6.5, 40.0), (6.0, 55.0)] {
        let star = EquatorialCoordinate::new(ra, dec)?;
        let centred = equatorial_to_axis(&frame, &star, 4.0, PierSide::East);
        model.add(AlignmentPoint::new(&frame, &config.site, star, centred, 4.0, session_start()))?;
    }
    rig.mount.load_alignment(model).await;

    rig.mount.set_tracking(TrackingMode::Sidereal).await?;
    rig.mount.slew_to(6.0, 45.0).await?;
    run_until_done(&rig.mount).await?;
    let centred = rig.mount.axis_position().await?;

    rig.mount.sync_to(6.01, 45.1).await?;
    assert_eq!(rig.mount.alignment_points().await.len(), 3);
    let position = rig.mount.position().await?;
    assert!((position.ra() - 6.01).abs() < 1e-6);
    assert!((position.dec() - 45.1).abs() < 1e-6);

    let plan = rig.mount.slew_to(6.01, 45.1).await?;
    assert!(plan.target.max_abs_diff(&centred) < 1e-9);
    run_until_done(&rig.mount).await?;
    assert!(rig.mount.axis_position().await?.max_abs_diff(&centred) < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_read_failure_stops_manual_move() -> anyhow::Result<()> {
    let rig = rig().await;
    rig.mount.move_axis(Axis::Ra, 2.0).await?;
    assert!(rig.motor.is_moving(Axis::Ra));

    rig.motor.fail_after(
        0,
        MotorError::NoResponse {
            axis: Axis::Ra,
            attempts: 2,
        },
    );
    let err = rig.mount.poll().await.unwrap_err();
    match &err {
        MountError::Aborted { operation, left, .. } => {
            assert_eq!(operation, "move axis");
            assert_eq!(*left, MotionAfterFailure::Stopped);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(matches!(err.root(), MountError::NoResponse { axis: Axis::Ra }));
    assert!(!rig.motor.is_moving(Axis::Ra));
    assert!(!rig.mount.is_slewing().await);
    Ok(())
}

#[tokio::test]
async fn test_custom_tracking_uses_configured_rates() -> anyhow::Result<()> {
    let rig = rig_with(|config| {
        config.tracking.custom_ra_rate = 14.0;
        config.tracking.custom_dec_rate = -1.0;
    })
    .await;

    rig.mount.set_custom_tracking().await?;
    assert_eq!(
        rig.mount.tracking_mode().await,
        TrackingMode::Custom { ra: 14.0, dec: -1.0 }
    );
    assert!((rig.motor.rate(Axis::Ra) - 14.0 * ARCSEC_RAD).abs() < 1e-15);
    assert!((rig.motor.rate(Axis::Dec) + ARCSEC_RAD).abs() < 1e-15);
    Ok(())
}

#[tokio::test]
async fn test_move_axis_zero_restores_tracking() -> anyhow::Result<()> {
    let rig = rig().await;
    rig.mount.set_tracking(TrackingMode::Sidereal).await?;

    rig.mount.move_axis(Axis::Ra, 2.0).await?;
    assert!((rig.motor.rate(Axis::Ra) - 2.0 * DEG_RAD).abs() < 1e-12);
    assert!(rig.mount.is_slewing().await);

    rig.mount.move_axis(Axis::Ra, 0.0).await?;
    assert!((rig.motor.rate(Axis::Ra) - SIDEREAL_RATE_ARCSEC * ARCSEC_RAD).abs() < 1e-15);
    assert!(!rig.mount.is_slewing().await);

    rig.mount.move_axis(Axis::Dec, -0.5).await?;
    assert!(rig.motor.rate(Axis::Dec) < 0.0);
    rig.mount.move_axis(Axis::Dec, 0.0).await?;
    assert!(!rig.motor.is_moving(Axis::Dec));
    Ok(())
}

#[tokio::test]
async fn test_abort_stops_manual_move() -> anyhow::Result<()> {
    let rig = rig().await;
    rig.mount.move_axis(Axis::Dec, 1.0).await?;
    rig.mount.abort_slew().await?;
    assert!(!rig.motor.is_moving(Axis::Dec));
    assert!(!rig.mount.is_slewing().await);
    Ok(())
}

#[tokio::test]
async fn test_tracking_modes() -> anyhow::Result<()> {
    let rig = rig().await;

    rig.mount.set_tracking(TrackingMode::Lunar).await?;
    assert!((rig.motor.rate(Axis::Ra) - LUNAR_RATE_ARCSEC * ARCSEC_RAD).abs() < 1e-15);

    rig.mount
        .set_tracking(TrackingMode::Custom { ra: 15.0, dec: 0.5 })
        .await?;
    assert!((rig.motor.rate(Axis::Ra) - 15.0 * ARCSEC_RAD).abs() < 1e-15);
    assert!((rig.motor.rate(Axis::Dec) - 0.5 * ARCSEC_RAD).abs() < 1e-15);

    rig.mount.set_tracking(TrackingMode::Off).await?;
    assert!(!rig.motor.is_moving(Axis::Ra));
    assert!(!rig.motor.is_moving(Axis::Dec));
    Ok(())
}

#[tokio::test]
async fn test_southern_site_tracks_in_reverse() -> anyhow::Result<()> {
    let rig = rig_with(|config| config.site.latitude = -33.9).await;
    rig.mount.set_tracking(TrackingMode::Sidereal).await?;
    assert!((rig.motor.rate(Axis::Ra) + SIDEREAL_RATE_ARCSEC * ARCSEC_RAD).abs() < 1e-15);
    Ok(())
}

#[tokio::test]
async fn test_connect_applies_home_and_default_tracking() -> anyhow::Result<()> {
    let motor = SimulatedMotor::new(SimulatorConfig {
        tick_secs: 0.0,
        ..Default::default()
    });
    let mut config = MountConfig::default();
    config.tracking.default_mode = TrackingMode::Sidereal;
    let mount = EqMount::with_clock(config, Arc::new(FixedClock::new(session_start())));

    mount.connect_with(Box::new(motor.clone())).await?;
    assert!(mount.is_connected().await);
    assert!((motor.position(Axis::Dec) - FRAC_PI_2).abs() < 1e-12);
    assert!(motor.is_moving(Axis::Ra));
    assert_eq!(mount.tracking_mode().await, TrackingMode::Sidereal);

    let again = mount.connect_with(Box::new(motor.clone())).await;
    assert!(matches!(again, Err(MountError::InvalidOperation(_))));

    mount.disconnect().await?;
    assert!(!motor.is_moving(Axis::Ra));
    assert_eq!(mount.poll().await?, PollOutcome::Disconnected);
    Ok(())
}

#[tokio::test]
async fn test_failed_initialize_leaves_mount_disconnected() {
    let motor = SimulatedMotor::default();
    motor.fail_after(
        0,
        MotorError::NoResponse {
            axis: Axis::Ra,
            attempts: 2,
        },
    );
    let mount = EqMount::new(MountConfig::default());
    let err = mount.connect_with(Box::new(motor)).await.unwrap_err();
    assert!(matches!(err, MountError::NoResponse { axis: Axis::Ra }));
    assert!(!mount.is_connected().await);
}

#[tokio::test]
async fn test_status_snapshot() -> anyhow::Result<()> {
    let rig = rig().await;
    rig.mount.slew_to(6.0, 45.0).await?;
    let status = rig.mount.status().await;
    assert!(status.connected);
    assert!(status.slewing);
    assert!(!status.parked);

    run_until_done(&rig.mount).await?;
    let status = rig.mount.status().await;
    assert!(!status.slewing);
    assert_eq!(status.pier, Some(PierSide::East));
    let altaz = status.altaz.unwrap();
    assert!(altaz.alt > 0.0 && altaz.alt < 90.0);
    assert!((status.sidereal_time - 4.0).abs() < 1e-9);
    Ok(())
}

#[tokio::test]
async fn test_alignment_model_persists() -> anyhow::Result<()> {
    let rig = rig().await;
    rig.mount.set_tracking(TrackingMode::Sidereal).await?;
    rig.mount.sync_to(6.0, 45.0).await?;

    let json = serde_json::to_string(&rig.mount.alignment_model().await)?;
    let other = self::rig().await;
    other.mount.load_alignment(serde_json::from_str(&json)?).await;
    assert_eq!(other.mount.alignment_points().await, rig.mount.alignment_points().await);

    other.mount.remove_alignment_point(0).await?;
    assert!(other.mount.alignment_points().await.is_empty());
    assert!(matches!(
        other.mount.remove_alignment_point(0).await,
        Err(MountError::InvalidOperation(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_poll_loop_drives_goto() -> anyhow::Result<()> {
    let rig = rig_with(|config| config.poll_interval_ms = 5).await;
    rig.mount.slew_to(6.0, 45.0).await?;

    let poller = rig.mount.spawn_poll_loop();
    let mut done = false;
    for _ in 0..400 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        if !rig.mount.is_slewing().await {
            done = true;
            break;
        }
    }
    poller.stop().await;
    assert!(done, "poll loop never finished the goto");
    assert_eq!(rig.mount.pier_side().await?, PierSide::East);
    Ok(())
}
