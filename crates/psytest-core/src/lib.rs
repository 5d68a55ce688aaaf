//! psytest-core — Test delivery, scoring, and norm calibration.
//!
//! This crate defines the content model, the delivery state machine with its
//! block countdown, answer collection, and the scoring and calibration logic
//! that the rest of psytest builds on.

pub mod collector;
pub mod content;
pub mod delivery;
pub mod error;
pub mod model;
pub mod norms;
pub mod parser;
pub mod randomizer;
pub mod scoring;
pub mod session;
pub mod timer;
pub mod traits;
pub mod validation;
