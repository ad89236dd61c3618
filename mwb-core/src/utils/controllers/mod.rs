//! Command ingestion and actuation for the Mecanum-Wheel Bot.
//!
//! - `motion`: the wheel actuator controller over the PCA9685 PWM expander.
//! - `CommandRouter`: validates incoming requests, translates them into
//!   `DriveCommand`s, and applies them to the motion controller in arrival
//!   order.

pub mod motion;

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};
use embedded_hal::i2c::I2c;
use serde::{Deserialize, Serialize};

use crate::utils::{connection::session::Authenticator, math::kinematics::WheelDrive};
pub use motion::{DeviceError, MotionController};

/// Symbolic drive directions accepted on the `/move` route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Forward,
    Backward,
    Left,
    Right,
    Stop,
}

impl Direction {
    /// Parse the query-string spelling of a direction.
    ///
    /// Unrecognized values are rejected, never mapped to a default; `stop` is
    /// only ever the result of an explicit `stop`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "forward" => Some(Self::Forward),
            "backward" => Some(Self::Backward),
            "left" => Some(Self::Left),
            "right" => Some(Self::Right),
            "stop" => Some(Self::Stop),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::Backward => "backward",
            Self::Left => "left",
            Self::Right => "right",
            Self::Stop => "stop",
        }
    }

    /// Canonical `(strafe, forward, rotate)` vector for this direction.
    pub fn vector(self) -> (f32, f32, f32) {
        match self {
            Self::Forward => (0.0, 1.0, 0.0),
            Self::Backward => (0.0, -1.0, 0.0),
            Self::Left => (-1.0, 0.0, 0.0),
            Self::Right => (1.0, 0.0, 0.0),
            Self::Stop => (0.0, 0.0, 0.0),
        }
    }

    /// Confirmation body echoed once the wheel write has completed.
    pub fn moving_response(self) -> &'static str {
        match self {
            Self::Forward => "Moving: forward",
            Self::Backward => "Moving: backward",
            Self::Left => "Moving: left",
            Self::Right => "Moving: right",
            Self::Stop => "Moving: stop",
        }
    }
}

/// Drive command variants for motion control.
///
/// Serialized as JSON with tag `"dc"`.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(tag = "dc", rename_all = "snake_case")]
pub enum DriveCommand {
    /// Symbolic directional move.
    M { d: Direction },
    /// Explicit `(strafe, forward, rotate)` vector, each in `[-1, 1]`.
    V { x: f32, y: f32, w: f32 },
}

/// Why a command request was not applied to the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// The request carried no `direction` parameter.
    MissingDirection,
    /// The `direction` value is not one of the five symbolic directions.
    UnknownDirection,
    /// A vector component is non-finite or outside `[-1, 1]`.
    ComponentOutOfRange,
    /// The wheel write failed at the I2C layer.
    Actuator,
}

/// Validates command requests and applies them to the motion controller.
///
/// The controller sits behind an async mutex, so command application is
/// totally ordered by arrival and a successful return is an acknowledgment of
/// applied wheel state, not of acceptance into a queue.
pub struct CommandRouter<'a, I2C: 'static> {
    motion: &'a Mutex<CriticalSectionRawMutex, MotionController<'a, I2C>>,
    credentials: Option<&'a dyn Authenticator>,
}

impl<'a, I2C, E> CommandRouter<'a, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    pub fn new(
        motion: &'a Mutex<CriticalSectionRawMutex, MotionController<'a, I2C>>,
        credentials: Option<&'a dyn Authenticator>,
    ) -> Self {
        Self {
            motion,
            credentials,
        }
    }

    /// The optional credential gate guarding the HTTP command route.
    pub fn credential_gate(&self) -> Option<&dyn Authenticator> {
        self.credentials
    }

    /// Validate and apply a `/move` request.
    ///
    /// Returns the accepted direction only after the wheel write has
    /// completed. Rejected requests never touch the actuator.
    pub async fn handle_move(
        &self,
        direction: Option<&str>,
    ) -> Result<Direction, CommandError> {
        let raw = direction.ok_or(CommandError::MissingDirection)?;
        let direction = Direction::parse(raw).ok_or(CommandError::UnknownDirection)?;
        self.dispatch(DriveCommand::M { d: direction }).await?;
        Ok(direction)
    }

    /// Validate and apply a drive command.
    pub async fn dispatch(
        &self,
        command: DriveCommand,
    ) -> Result<WheelDrive, CommandError> {
        if let DriveCommand::V { x, y, w } = command {
            if !(in_unit_range(x) && in_unit_range(y) && in_unit_range(w)) {
                return Err(CommandError::ComponentOutOfRange);
            }
        }

        let mut motion = self.motion.lock().await;
        motion.apply(command).map_err(|error| {
            tracing::error!(?error, "wheel write failed");
            CommandError::Actuator
        })
    }
}

fn in_unit_range(value: f32) -> bool {
    value.is_finite() && (-1.0..=1.0).contains(&value)
}
