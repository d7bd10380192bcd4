//! Ports - Traits at the seams between stages and external systems.

pub mod probe;
pub mod remux;
pub mod storage;
pub mod transcoder;
pub mod workflow;
