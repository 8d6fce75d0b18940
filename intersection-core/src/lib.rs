#![no_std]

#[cfg(feature = "alloc")]
extern crate alloc;

// Shared decision logic for the intersection controller.
//
// The crate stays portable across MCU firmware and host tooling by avoiding the
// Rust standard library and exposing abstractions the other crates can adopt.

pub mod arbiter;
pub mod config;
pub mod display;
pub mod repl;
pub mod roads;
pub mod scheduler;
pub mod telemetry;
