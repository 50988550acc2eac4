pub mod execution;
pub mod schedule;
pub mod serve;
pub mod workflow;
