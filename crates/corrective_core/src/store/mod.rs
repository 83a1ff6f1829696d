//! Typed read/write operations against the record store.
//!
//! This is the engine-side realization of the "record store" collaborator:
//! one submodule per record type, every query deterministic in its ordering.
//! The two race-sensitive writes (attachment append, downtime close) are
//! implemented here so callers cannot reintroduce read-then-write hazards.

pub mod downtime;
pub mod occurrences;
pub mod qa;
pub mod solutions;
pub mod work_orders;
