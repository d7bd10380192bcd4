//! AWS adapters: S3 storage, MediaConvert jobs and Step Functions executions.

pub mod mediaconvert;
pub mod s3;
pub mod step_functions;

pub use mediaconvert::MediaConvertAdapter;
pub use s3::S3Adapter;
pub use step_functions::StepFunctionsWorkflow;
