//! Session telemetry.
//!
//! # SAFETY INVARIANT
//! Telemetry is a READ-ONLY side-effect layer.
//! It must **NEVER** be read inside decision logic (controller, scheduler or assembler).
//!
//! # PRIVACY INVARIANT
//! Telemetry events must **NEVER** contain user content (transcript text, audio).
//! Only indices, counts, durations and enums are allowed.

pub mod event;
pub mod log;
pub mod metrics;
pub mod recorder;
