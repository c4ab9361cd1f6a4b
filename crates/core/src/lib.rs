//! Domain model for the knowledge-base upload queue.
//!
//! Pure types and state transitions with no I/O beyond local file
//! metadata: the Job Record state machine, file eligibility rules, and
//! the per-file status back-fill used when only aggregate counters are
//! known.

pub mod backfill;
pub mod error;
pub mod files;
pub mod job;
pub mod types;
