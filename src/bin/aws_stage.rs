//! AWS stage runner.
//!
//! Runs one workflow stage per invocation: the state machine hands it a JSON
//! record on stdin and reads the stage result from stdout. Segments are cut
//! with the bundled ffmpeg, renditions come from MediaConvert.
//!
//! Environment Variables (see also `PipelineConfig`):
//! - MEDIACONVERT_ROLE: IAM role passed to every job
//! - MEDIACONVERT_ENDPOINT: account-specific MediaConvert endpoint
//! - STATE_MACHINE_ARN: state machine started by the trigger stage
//! - FFMPEG_PATH / FFPROBE_PATH: tool locations

use cadenza::adapters::aws::{MediaConvertAdapter, S3Adapter, StepFunctionsWorkflow};
use cadenza::adapters::local::FfmpegTools;
use cadenza::application::{Pipeline, Stage, StageRunner};
use cadenza::{AwsConfig, ConfigError, LocalConfig, PipelineConfig};
use clap::Parser;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aws_stage", version, about = "Run one transcoding stage against AWS")]
struct Cli {
    #[arg(value_enum)]
    stage: Stage,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.stage).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "aws_stage failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(stage: Stage) -> Result<(), Box<dyn std::error::Error>> {
    let config = Arc::new(PipelineConfig::from_env()?);
    let aws = AwsConfig::from_env()?;
    let local = LocalConfig::from_env()?;
    let state_machine_arn = match (stage, aws.state_machine_arn) {
        (_, Some(arn)) => arn,
        (Stage::Trigger, None) => return Err(ConfigError::Missing("STATE_MACHINE_ARN").into()),
        (_, None) => String::new(),
    };

    let sdk_config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    let storage = S3Adapter::new(aws_sdk_s3::Client::new(&sdk_config));
    let transcoder = MediaConvertAdapter::from_sdk_config(
        &sdk_config,
        &aws.mediaconvert_endpoint,
        aws.mediaconvert_role,
    );
    let workflow =
        StepFunctionsWorkflow::new(aws_sdk_sfn::Client::new(&sdk_config), state_machine_arn);
    let tools = FfmpegTools::new(&local.ffmpeg, &local.ffprobe);

    let pipeline = Pipeline::new(storage, tools.clone(), tools, transcoder, config);
    let runner = StageRunner::new(Arc::new(pipeline), workflow);

    let mut input = Vec::new();
    tokio::io::stdin().read_to_end(&mut input).await?;
    println!("{}", runner.dispatch(stage, &input).await?);
    Ok(())
}
