pub mod cache;
pub mod remote;
pub mod task;
