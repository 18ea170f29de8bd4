#![no_std]

// Control core for the battery-powered periodic load switch.
//
// This crate stays portable across the MCU firmware and host tooling by
// avoiding the Rust standard library. Hardware is reached through the
// `embedded-hal` traits plus the small seams each module defines next to the
// logic that drives them.

pub mod calibration;
pub mod config;
pub mod controller;
pub mod duty;
pub mod monitor;
pub mod scheduler;
pub mod telemetry;
