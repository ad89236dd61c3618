//! Core motion control and camera streaming for the Mecanum-Wheel Bot on
//! no-std embedded platforms.
//!
//! For a runnable host-side wiring of the core, see `mwb-app/mock-mcu`.
#![no_std]
#![allow(async_fn_in_trait)]

pub mod utils;
