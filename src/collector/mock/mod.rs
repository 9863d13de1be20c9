//! Mock implementations of the filesystem and capacity seams, plus
//! pre-built fixture scenarios for engine tests.

pub mod capacity;
pub mod filesystem;
pub mod scenarios;

pub use capacity::MockCapacity;
pub use filesystem::{MockFs, SharedFs};
