//! Math utilities for the Mecanum-Wheel Bot.
//!
//! This module provides inverse kinematics for four-wheel mecanum-drive bases.

pub mod kinematics;
