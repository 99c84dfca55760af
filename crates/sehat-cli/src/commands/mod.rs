pub mod cache;
pub mod common;
pub mod flush;
pub mod log;
pub mod meals;
pub mod queue;
pub mod share;
pub mod status;
