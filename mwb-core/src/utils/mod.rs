//! Utility re-exports and helper macros for the Mecanum-Wheel Bot.
//!
//! This module re-exports the core components, timing, kinematics, capture,
//! and connection pieces, and provides a helper macro plus the embedded
//! control page:
//!
//! - `camera`: capture abstraction and the single-slot latest-frame buffer
//! - `connection`: HTTP/WebSocket gateway, sessions, and authentication
//! - `controllers`: drive command routing and the wheel actuator controller
//! - `math`: inverse kinematics for the four-wheel mecanum base
//! - `frontend`: embedded HTML control page served at `/`
//!
//! The `mk_static!` macro simplifies static initialization in no-std contexts.

pub mod camera;
pub mod connection;
pub mod controllers;
pub(crate) mod frontend;
pub mod math;

pub use camera::{capture_task, CaptureDevice, FrameSlot, FrameSource};
pub use connection::server::{run as gateway, StreamGateway};
pub use controllers::{CommandRouter, MotionController};
pub use embassy_time::*;
pub use math::kinematics::MecanumKinematics;

#[macro_export]
/// Initialize a no-std static cell and write the given value into it.
///
/// This macro creates a `static_cell::StaticCell` for type `$t` and initializes
/// it with `$val`, returning a mutable reference to the stored value.
macro_rules! mk_static {
    ($t:ty, $val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        STATIC_CELL.uninit().write($val)
    }};
}
