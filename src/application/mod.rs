//! Application layer - Generic services that use ports.

pub mod completion;
pub mod encoder;
pub mod merger;
pub mod pipeline;
pub mod runner;
pub mod splitter;
pub mod trigger;

pub use completion::CompletionGate;
pub use encoder::EncodeService;
pub use merger::MergeService;
pub use pipeline::Pipeline;
pub use runner::{Stage, StageRunner};
pub use splitter::SegmenterService;
pub use trigger::TriggerService;
