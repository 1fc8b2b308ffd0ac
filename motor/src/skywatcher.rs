//! SkyWatcher motor controller

use async_trait::async_trait;
use std::f64::consts::PI;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{MotorError, MotorResult};
use crate::firmware::{SpeedClass, SpeedProfile};
use crate::motor::{Axis, AxisStatus, MotorController};
use crate::protocol::{self, mode, Command};
use crate::transport::Transport;

const AXIS_STOP_TIMEOUT: Duration = Duration::from_secs(5);
const AXIS_STOP_POLL: Duration = Duration::from_millis(100);

/// Shortest step period the boards accept
const MIN_STEP_PERIOD: u32 = 6;

/// Gotos shorter than this many seconds of sidereal motion use low speed
const LOW_SPEED_GOTO_MARGIN_SECS: f64 = 640.0;

const SIDEREAL_RAD_PER_SEC: f64 = 15.041067 / 3600.0 * PI / 180.0;

#[derive(Debug, Clone, Copy, Default)]
struct AxisParams {
    steps_per_rev: u32,
    timer_freq: u32,
    high_speed_ratio: u32,
}

impl AxisParams {
    fn steps_per_rad(&self) -> f64 {
        self.steps_per_rev as f64 / (2.0 * PI)
    }

    fn step_period(&self, rate: f64, class: SpeedClass) -> u32 {
        let steps_per_sec = rate.abs() * self.steps_per_rad();
        if steps_per_sec <= 0.0 {
            return u32::MAX & 0xFF_FFFF;
        }
        let mut period = self.timer_freq as f64 / steps_per_sec;
        if class == SpeedClass::High {
            period *= self.high_speed_ratio.max(1) as f64;
        }
        (period.round() as u32).clamp(MIN_STEP_PERIOD, 0xFF_FFFF)
    }
}

/// Motor controller speaking the SkyWatcher serial protocol
pub struct SkyWatcherController {
    transport: Transport,
    axes: [AxisParams; 2],
    profile: SpeedProfile,
    initialized: bool,
}

impl SkyWatcherController {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport,
            axes: [AxisParams::default(); 2],
            profile: SpeedProfile::default(),
            initialized: false,
        }
    }

    async fn command(&self, axis: Axis, command: Command, payload: &str) -> MotorResult<String> {
        self.transport
            .send_and_receive(axis, command.as_char(), payload)
            .await
    }

    async fn inquire(&self, axis: Axis, command: Command) -> MotorResult<u32> {
        let reply = self.command(axis, command, "").await?;
        protocol::decode_u24(axis, &reply)
    }

    fn params(&self, axis: Axis) -> MotorResult<&AxisParams> {
        if !self.initialized {
            return Err(MotorError::NotInitialized);
        }
        Ok(&self.axes[axis.index()])
    }

    async fn stop_and_wait(&self, axis: Axis) -> MotorResult<()> {
        self.command(axis, Command::StopMotion, "").await?;

        let start = Instant::now();
        loop {
            let status = self.get_status(axis).await?;
            if !status.is_busy() {
                return Ok(());
            }
            if start.elapsed() >= AXIS_STOP_TIMEOUT {
                warn!("{} axis still moving {:?} after stop", axis, AXIS_STOP_TIMEOUT);
                return Ok(());
            }
            tokio::time::sleep(AXIS_STOP_POLL).await;
        }
    }
}

#[async_trait]
impl MotorController for SkyWatcherController {
    async fn initialize(&mut self) -> MotorResult<()> {
        for axis in Axis::BOTH {
            let params = AxisParams {
                steps_per_rev: self.inquire(axis, Command::InquireCountsPerRevolution).await?,
                timer_freq: self.inquire(axis, Command::InquireTimerFrequency).await?,
                high_speed_ratio: self.inquire(axis, Command::InquireHighSpeedRatio).await?,
            };
            if params.steps_per_rev == 0 || params.timer_freq == 0 {
                return Err(MotorError::InvalidResponse {
                    axis,
                    response: format!("{:?}", params),
                });
            }
            debug!("{} axis: {:?}", axis, params);
            self.axes[axis.index()] = params;
        }

        let version = self.command(Axis::Ra, Command::InquireVersion, "").await?;
        let version = protocol::decode_version(Axis::Ra, &version)?;
        self.profile = SpeedProfile::for_firmware(version);

        for axis in Axis::BOTH {
            self.command(axis, Command::Initialize, "").await?;
        }

        self.initialized = true;
        info!(
            "SkyWatcher controller ready: firmware {:#06x}, {} / {} steps per revolution",
            version, self.axes[0].steps_per_rev, self.axes[1].steps_per_rev
        );
        Ok(())
    }

    async fn slew_at_rate(&mut self, axis: Axis, rate: f64, class: SpeedClass) -> MotorResult<()> {
        let params = *self.params(axis)?;
        if rate == 0.0 {
            return self.stop(axis).await;
        }

        self.stop_and_wait(axis).await?;

        let speed = match class {
            SpeedClass::High => mode::HIGH_SPEED_SLEW,
            SpeedClass::Low => mode::LOW_SPEED_SLEW,
        };
        let direction = if rate >= 0.0 { mode::FORWARD } else { mode::REVERSE };
        self.command(axis, Command::SetMotionMode, &format!("{}{}", speed, direction))
            .await?;

        let period = params.step_period(rate, class);
        self.command(axis, Command::SetStepPeriod, &protocol::encode_u24(period))
            .await?;
        self.command(axis, Command::StartMotion, "").await?;

        debug!("{} axis slewing at {:.3e} rad/s ({:?}, period {})", axis, rate, class, period);
        Ok(())
    }

    async fn change_rate(&mut self, axis: Axis, rate: f64, class: SpeedClass) -> MotorResult<()> {
        let params = *self.params(axis)?;
        let period = params.step_period(rate, class);
        self.command(axis, Command::SetStepPeriod, &protocol::encode_u24(period))
            .await?;
        Ok(())
    }

    async fn slew_to(&mut self, axis: Axis, target: f64, slowdown: f64) -> MotorResult<()> {
        let params = *self.params(axis)?;
        let current = self.get_position(axis).await?;
        let delta = target - current;
        let steps = (delta.abs() * params.steps_per_rad()).round() as u32;
        if steps == 0 {
            return Ok(());
        }

        self.stop_and_wait(axis).await?;

        let margin = LOW_SPEED_GOTO_MARGIN_SECS * SIDEREAL_RAD_PER_SEC * params.steps_per_rad();
        let speed = if steps as f64 > margin {
            mode::HIGH_SPEED_GOTO
        } else {
            mode::LOW_SPEED_GOTO
        };
        let direction = if delta >= 0.0 { mode::FORWARD } else { mode::REVERSE };
        let brake = (slowdown.abs() * params.steps_per_rad()).round() as u32;

        self.command(axis, Command::SetMotionMode, &format!("{}{}", speed, direction))
            .await?;
        self.command(axis, Command::SetGotoIncrement, &protocol::encode_u24(steps))
            .await?;
        self.command(axis, Command::SetBrakeIncrement, &protocol::encode_u24(brake))
            .await?;
        self.command(axis, Command::StartMotion, "").await?;

        debug!("{} axis goto {} steps, braking after {}", axis, steps, brake);
        Ok(())
    }

    async fn stop(&mut self, axis: Axis) -> MotorResult<()> {
        self.params(axis)?;
        self.stop_and_wait(axis).await
    }

    async fn set_position(&mut self, axis: Axis, position: f64) -> MotorResult<()> {
        let params = *self.params(axis)?;
        let steps = (position * params.steps_per_rad()).round() as i64;
        self.command(axis, Command::SetPosition, &protocol::encode_position(steps))
            .await?;
        Ok(())
    }

    async fn get_position(&self, axis: Axis) -> MotorResult<f64> {
        let params = *self.params(axis)?;
        let reply = self.command(axis, Command::InquirePosition, "").await?;
        let steps = protocol::decode_position(axis, &reply)?;
        Ok(steps as f64 / params.steps_per_rad())
    }

    async fn get_status(&self, axis: Axis) -> MotorResult<AxisStatus> {
        let reply = self.command(axis, Command::InquireStatus, "").await?;
        protocol::parse_status(axis, &reply)
    }

    fn steps_per_revolution(&self, axis: Axis) -> u32 {
        self.axes[axis.index()].steps_per_rev
    }

    fn speed_profile(&self) -> SpeedProfile {
        self.profile
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::{transport, ScriptedLink};

    const EQ6_STEPS: u32 = 9_024_000;

    fn fake_board() -> ScriptedLink {
        let link = ScriptedLink::new();
        link.set_fallback(|request| {
            let reply = match request.as_bytes()[1] {
                b'a' => protocol::encode_u24(EQ6_STEPS),
                b'b' => protocol::encode_u24(64_935),
                b'g' => "10".to_string(),
                b'e' => "030210".to_string(),
                b'f' => "101".to_string(),
                b'j' => protocol::encode_position(0),
                _ => String::new(),
            };
            Some(format!("={}", reply))
        });
        link
    }

    async fn ready(link: &ScriptedLink) -> SkyWatcherController {
        let mut controller = SkyWatcherController::new(transport(link));
        controller.initialize().await.unwrap();
        link.script.lock().unwrap().written.clear();
        controller
    }

    fn commands(link: &ScriptedLink) -> Vec<String> {
        link.written().iter().map(|w| w.trim_end().to_string()).collect()
    }

    #[tokio::test]
    async fn test_initialize_reads_axis_constants() {
        let link = fake_board();
        let mut controller = SkyWatcherController::new(transport(&link));
        controller.initialize().await.unwrap();

        assert_eq!(controller.steps_per_revolution(Axis::Ra), EQ6_STEPS);
        assert_eq!(controller.steps_per_revolution(Axis::Dec), EQ6_STEPS);
        assert_eq!(controller.speed_profile().version, 0x0302);
        assert_eq!(controller.speed_profile().high_speed_threshold, 3000.0);
        assert_eq!(
            commands(&link),
            vec![":a1", ":b1", ":g1", ":a2", ":b2", ":g2", ":e1", ":F1", ":F2"]
        );
    }

    #[tokio::test]
    async fn test_commands_need_initialize() {
        let link = fake_board();
        let mut controller = SkyWatcherController::new(transport(&link));
        assert_eq!(
            controller.slew_to(Axis::Ra, 1.0, 0.5).await,
            Err(MotorError::NotInitialized)
        );
        assert!(link.written().is_empty());
    }

    #[tokio::test]
    async fn test_sidereal_slew_sequence() {
        let link = fake_board();
        let mut controller = ready(&link).await;

        let sidereal = SIDEREAL_RAD_PER_SEC;
        controller
            .slew_at_rate(Axis::Ra, sidereal, SpeedClass::Low)
            .await
            .unwrap();

        let sent = commands(&link);
        assert_eq!(sent[0], ":K1");
        assert_eq!(sent[1], ":f1");
        assert_eq!(sent[2], ":G110");
        assert_eq!(sent[3], format!(":I1{}", protocol::encode_u24(620)));
        assert_eq!(sent[4], ":J1");
    }

    #[tokio::test]
    async fn test_reverse_high_speed_mode() {
        let link = fake_board();
        let mut controller = ready(&link).await;
        controller
            .slew_at_rate(Axis::Dec, -3.0_f64.to_radians(), SpeedClass::High)
            .await
            .unwrap();
        let sent = commands(&link);
        assert!(sent.contains(&":G231".to_string()));
        assert!(sent.contains(&format!(":I2{}", protocol::encode_u24(14))));
    }

    #[tokio::test]
    async fn test_change_rate_does_not_stop() {
        let link = fake_board();
        let mut controller = ready(&link).await;
        controller
            .change_rate(Axis::Ra, SIDEREAL_RAD_PER_SEC, SpeedClass::Low)
            .await
            .unwrap();
        assert_eq!(commands(&link), vec![format!(":I1{}", protocol::encode_u24(620))]);
    }

    #[tokio::test]
    async fn test_goto_sequence() {
        let link = fake_board();
        let mut controller = ready(&link).await;

        let steps_per_rad = EQ6_STEPS as f64 / (2.0 * PI);
        let target = 1_000_000.0 / steps_per_rad;
        let slowdown = 920_000.0 / steps_per_rad;
        controller.slew_to(Axis::Ra, target, slowdown).await.unwrap();

        let sent = commands(&link);
        assert_eq!(
            sent,
            vec![
                ":j1".to_string(),
                ":K1".to_string(),
                ":f1".to_string(),
                ":G100".to_string(),
                format!(":H1{}", protocol::encode_u24(1_000_000)),
                format!(":M1{}", protocol::encode_u24(920_000)),
                ":J1".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_short_goto_uses_low_speed_reverse() {
        let link = fake_board();
        let mut controller = ready(&link).await;
        let steps_per_rad = EQ6_STEPS as f64 / (2.0 * PI);
        controller
            .slew_to(Axis::Dec, -2000.0 / steps_per_rad, 0.0)
            .await
            .unwrap();
        assert!(commands(&link).contains(&":G221".to_string()));
    }

    #[tokio::test]
    async fn test_position_round_trip() {
        let link = fake_board();
        let mut controller = ready(&link).await;
        controller.set_position(Axis::Dec, 0.0).await.unwrap();
        assert_eq!(commands(&link), vec![":E2000080"]);
        assert_eq!(controller.get_position(Axis::Dec).await.unwrap(), 0.0);
    }
}
