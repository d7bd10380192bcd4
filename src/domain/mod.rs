//! Domain layer - Pure business logic.

pub mod asset;
pub mod jobs;
pub mod metadata;
pub mod scaling;
pub mod stages;
pub mod thumbnails;
