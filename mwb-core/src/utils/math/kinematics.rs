//! Inverse kinematics for four-wheel mecanum-drive bases.
//!
//! `MecanumKinematics` maps a body-frame motion vector `(strafe, forward,
//! rotate)` onto four signed wheel duty values. The wheel equations are the
//! standard mecanum inverse kinematics with `vx` = strafe (positive right),
//! `vy` = forward, `w` = rotate:
//!
//! ```text
//! front-left  = vy - vx - w
//! front-right = vy + vx + w
//! rear-left   = vy + vx - w
//! rear-right  = vy - vx + w
//! ```
//!
//! A left strafe (`vx = -1`) drives front-left and rear-right forward with
//! front-right and rear-left reversed; a right strafe mirrors it.
//!
//! # Example
//! ```rust
//! use mwb_core::utils::math::kinematics::MecanumKinematics;
//! let kin = MecanumKinematics::default();
//! let drive = kin.solve(0.0, 1.0, 0.0);
//! assert_eq!(drive.front_left, 200);
//! ```

use libm::roundf;

/// Largest legal wheel duty magnitude the motor driver accepts.
pub const MAX_DUTY: i16 = 255;

/// Duty magnitude produced by a full-scale symbolic command.
pub const DEFAULT_DRIVE_DUTY: i16 = 200;

/// Signed duty values for all four wheel positions.
///
/// Sign encodes rotation direction, magnitude is the drive strength in
/// `[0, 255]`. The set is always replaced as a whole; callers never observe a
/// partially updated wheel set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WheelDrive {
    pub front_left: i16,
    pub front_right: i16,
    pub rear_left: i16,
    pub rear_right: i16,
}

impl WheelDrive {
    /// The all-stop wheel set.
    pub const STOP: Self = Self {
        front_left: 0,
        front_right: 0,
        rear_left: 0,
        rear_right: 0,
    };

    /// Duties in wheel order: front-left, front-right, rear-left, rear-right.
    pub fn duties(&self) -> [i16; 4] {
        [
            self.front_left,
            self.front_right,
            self.rear_left,
            self.rear_right,
        ]
    }
}

/// Represents the kinematics of a four-wheel mecanum robot.
pub struct MecanumKinematics {
    /// Duty produced by a unit-magnitude wheel term.
    scale: f32,
    /// Per-wheel duty magnitude limit.
    max_duty: i16,
}

impl Default for MecanumKinematics {
    fn default() -> Self {
        Self::new(DEFAULT_DRIVE_DUTY, MAX_DUTY)
    }
}

impl MecanumKinematics {
    /// Instantiate with a given drive scale and duty limit.
    pub fn new(
        scale: i16,
        max_duty: i16,
    ) -> Self {
        Self {
            scale: scale as f32,
            max_duty,
        }
    }

    /// Compute the wheel duty set for the given body motion vector.
    ///
    /// Components are clamped into `[-1, 1]`; each resulting wheel magnitude
    /// is clamped to the duty limit with its sign preserved.
    pub fn solve(
        &self,
        strafe: f32,
        forward: f32,
        rotate: f32,
    ) -> WheelDrive {
        let vx = clamp_unit(strafe);
        let vy = clamp_unit(forward);
        let w = clamp_unit(rotate);

        WheelDrive {
            front_left: self.duty(vy - vx - w),
            front_right: self.duty(vy + vx + w),
            rear_left: self.duty(vy + vx - w),
            rear_right: self.duty(vy - vx + w),
        }
    }

    fn duty(
        &self,
        value: f32,
    ) -> i16 {
        let scaled = roundf(value * self.scale) as i32;
        let limit = self.max_duty as i32;
        scaled.clamp(-limit, limit) as i16
    }
}

fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(-1.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_drives_all_wheels_equally() {
        let kin = MecanumKinematics::default();
        let drive = kin.solve(0.0, 1.0, 0.0);
        assert_eq!(
            drive,
            WheelDrive {
                front_left: 200,
                front_right: 200,
                rear_left: 200,
                rear_right: 200,
            }
        );
    }

    #[test]
    fn test_strafe_left_mirrors_diagonals() {
        let kin = MecanumKinematics::default();
        let drive = kin.solve(-1.0, 0.0, 0.0);
        assert_eq!(
            drive,
            WheelDrive {
                front_left: 200,
                front_right: -200,
                rear_left: -200,
                rear_right: 200,
            }
        );
    }

    #[test]
    fn test_strafe_right_is_the_mirror_of_left() {
        let kin = MecanumKinematics::default();
        let drive = kin.solve(1.0, 0.0, 0.0);
        assert_eq!(
            drive,
            WheelDrive {
                front_left: -200,
                front_right: 200,
                rear_left: 200,
                rear_right: -200,
            }
        );
    }

    #[test]
    fn test_rotation_splits_sides() {
        let kin = MecanumKinematics::default();
        let drive = kin.solve(0.0, 0.0, 1.0);
        assert_eq!(
            drive,
            WheelDrive {
                front_left: -200,
                front_right: 200,
                rear_left: -200,
                rear_right: 200,
            }
        );
    }

    #[test]
    fn test_combined_terms_clamp_to_max_duty() {
        let kin = MecanumKinematics::default();
        // fl = 1 - (-1) - (-1) = 3 before scaling, well past the duty limit
        let drive = kin.solve(-1.0, 1.0, -1.0);
        assert_eq!(drive.front_left, 255);
        let mirrored = kin.solve(1.0, -1.0, 1.0);
        assert_eq!(mirrored.front_left, -255);
    }

    #[test]
    fn test_components_clamped_to_unit_range() {
        let kin = MecanumKinematics::default();
        let drive = kin.solve(0.0, 40.0, 0.0);
        assert_eq!(drive, kin.solve(0.0, 1.0, 0.0));
    }

    #[test]
    fn test_nan_component_is_treated_as_zero() {
        let kin = MecanumKinematics::default();
        let drive = kin.solve(f32::NAN, 0.0, 0.0);
        assert_eq!(drive, WheelDrive::STOP);
    }

    #[test]
    fn test_stop_is_zero() {
        let kin = MecanumKinematics::default();
        assert_eq!(kin.solve(0.0, 0.0, 0.0), WheelDrive::STOP);
    }
}
