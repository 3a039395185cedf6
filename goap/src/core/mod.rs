//! Deterministic, pure logic shared by the planner and executor.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod action;
pub mod budget;
pub mod invariants;
pub mod planner;
pub mod regression;
pub mod types;
pub mod world;
