//! Wheel actuator control for the Mecanum-Wheel Bot.
//!
//! This module drives the four wheel motors through a PCA9685 PWM expander on
//! a shared I2C bus. Each wheel is described by a `WheelChannels` binding of
//! two direction channels and one duty channel, so the four-wheel layout is
//! plain configuration rather than repeated wiring.

use core::cell::RefCell;

use embedded_hal::i2c::I2c;
use embedded_hal_bus::i2c::RefCellDevice;
use pwm_pca9685::{Address as PwmAddress, Channel, Error as PwmError, Pca9685};

use super::DriveCommand;
use crate::utils::math::kinematics::{MecanumKinematics, WheelDrive};

/// Default I2C address of the PWM motor controller.
pub const PWM_ADDRESS: u8 = 0x55;

/// PCA9685 full-scale duty count.
const PCA_FULL_SCALE: u16 = 4095;

/// Errors that can occur when driving the wheel actuators.
#[derive(Debug)]
pub enum DeviceError<E: core::fmt::Debug> {
    PwmError(PwmError<E>),
}

/// PCA9685 channel bindings for one wheel: two direction lines and one duty
/// line, mirroring the DIR_A/DIR_B/PWM wiring of the motor driver board.
#[derive(Debug, Clone, Copy)]
pub struct WheelChannels {
    pub dir_a: Channel,
    pub dir_b: Channel,
    pub pwm: Channel,
}

/// Default channel layout in wheel order: front-left, front-right, rear-left,
/// rear-right.
pub const WHEEL_LAYOUT: [WheelChannels; 4] = [
    WheelChannels {
        dir_a: Channel::C0,
        dir_b: Channel::C1,
        pwm: Channel::C2,
    },
    WheelChannels {
        dir_a: Channel::C3,
        dir_b: Channel::C4,
        pwm: Channel::C5,
    },
    WheelChannels {
        dir_a: Channel::C6,
        dir_b: Channel::C7,
        pwm: Channel::C8,
    },
    WheelChannels {
        dir_a: Channel::C9,
        dir_b: Channel::C10,
        pwm: Channel::C11,
    },
];

/// Maps drive commands onto the four wheel motors.
///
/// Owns the current `WheelDrive` exclusively; the set is overwritten as a
/// whole on every accepted command, and all four wheels are written before
/// `apply` returns.
pub struct MotionController<'a, I2C: 'static> {
    pwm: Pca9685<RefCellDevice<'a, I2C>>,
    wheels: [WheelChannels; 4],
    kinematics: MecanumKinematics,
    current: WheelDrive,
}

impl<'a, I2C, E> MotionController<'a, I2C>
where
    I2C: I2c<Error = E> + 'static,
    E: core::fmt::Debug,
{
    /// Bring up the PWM expander on the shared bus (prescale to 60Hz) and
    /// start with all wheels stopped.
    pub fn new(
        i2c_bus: &'a RefCell<I2C>,
        wheels: [WheelChannels; 4],
    ) -> Result<Self, DeviceError<E>> {
        let mut pwm = Pca9685::new(RefCellDevice::new(i2c_bus), PwmAddress::from(PWM_ADDRESS))
            .map_err(DeviceError::PwmError)?;
        pwm.enable().map_err(DeviceError::PwmError)?;
        pwm.set_prescale(100).map_err(DeviceError::PwmError)?;
        tracing::info!("PWM motor controller enabled");

        Ok(Self {
            pwm,
            wheels,
            kinematics: MecanumKinematics::default(),
            current: WheelDrive::STOP,
        })
    }

    /// The wheel set currently applied to the actuators.
    pub fn wheel_drive(&self) -> WheelDrive {
        self.current
    }

    /// Solve the command's kinematics and write all four wheels.
    ///
    /// The cached wheel state is only replaced once every wheel has been
    /// written, so callers never observe a partially applied command.
    pub fn apply(
        &mut self,
        command: DriveCommand,
    ) -> Result<WheelDrive, DeviceError<E>> {
        let (x, y, w) = match command {
            DriveCommand::M { d } => d.vector(),
            DriveCommand::V { x, y, w } => (x, y, w),
        };
        let drive = self.kinematics.solve(x, y, w);
        self.write_all(&drive)?;
        self.current = drive;
        tracing::debug!(?drive, "wheel drive applied");
        Ok(drive)
    }

    fn write_all(
        &mut self,
        drive: &WheelDrive,
    ) -> Result<(), DeviceError<E>> {
        let wheels = self.wheels;
        for (channels, duty) in wheels.iter().zip(drive.duties()) {
            self.write_wheel(channels, duty)?;
        }
        Ok(())
    }

    /// Sign selects the direction lines, magnitude the duty line. The 8-bit
    /// duty domain is widened to the expander's 12-bit counts.
    fn write_wheel(
        &mut self,
        channels: &WheelChannels,
        duty: i16,
    ) -> Result<(), DeviceError<E>> {
        let forward = duty >= 0;
        let magnitude = duty.unsigned_abs().min(255);

        self.pwm
            .set_channel_on_off(channels.dir_a, 0, if forward { PCA_FULL_SCALE } else { 0 })
            .map_err(DeviceError::PwmError)?;
        self.pwm
            .set_channel_on_off(channels.dir_b, 0, if forward { 0 } else { PCA_FULL_SCALE })
            .map_err(DeviceError::PwmError)?;
        self.pwm
            .set_channel_on_off(channels.pwm, 0, magnitude * 16)
            .map_err(DeviceError::PwmError)?;
        Ok(())
    }
}
