//! Cache partition management

mod policy;

pub use policy::{EvictionPolicy, SweepReport, captured_at, stamp};
