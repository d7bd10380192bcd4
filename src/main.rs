//! Cadenza local binary.
//!
//! Environment Variables (see also `PipelineConfig`):
//! - STORAGE_ROOT: directory holding one subdirectory per bucket
//! - ADDR / PORT: HTTP bind address for `serve`
//! - FFMPEG_PATH / FFPROBE_PATH: tool locations
//! - RUST_LOG: log filter, `info` by default

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path as UrlPath, State},
    http::StatusCode,
    routing::post,
    BoxError, Json, Router,
};
use cadenza::adapters::local::{FfmpegTools, FfmpegTranscoder, FsAdapter, InProcessWorkflow};
use cadenza::application::{Pipeline, Stage, StageRunner, TriggerService};
use cadenza::domain::stages::{SplitInput, TriggerOutput, UploadEvent};
use cadenza::ports::workflow::WorkflowPort;
use cadenza::{LocalConfig, PipelineConfig, StageResult};
use clap::{Parser, Subcommand};
use futures::{Stream, TryStreamExt};
use std::io;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::{fs::File, io::BufWriter};
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

type LocalPipeline = Pipeline<FsAdapter, FfmpegTools, FfmpegTools, FfmpegTranscoder<FsAdapter>>;
type LocalWorkflow = InProcessWorkflow<FsAdapter, FfmpegTools, FfmpegTools, FfmpegTranscoder<FsAdapter>>;

#[derive(Parser)]
#[command(name = "cadenza", version, about = "Segmented video transcoding")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run split, encode and merge on one stored source
    Run { bucket: String, key: String },
    /// Run one stage: JSON record on stdin, stage result on stdout
    Stage {
        #[arg(value_enum)]
        stage: Stage,
    },
    /// Accept uploads and upload events over HTTP
    Serve,
}

struct App {
    storage: FsAdapter,
    transcoder: FfmpegTranscoder<FsAdapter>,
    pipeline: Arc<LocalPipeline>,
    workflow: LocalWorkflow,
    input_prefix: String,
    local: LocalConfig,
}

impl App {
    fn from_env(cancel: CancellationToken) -> Result<Self, Box<dyn std::error::Error>> {
        let config = Arc::new(PipelineConfig::from_env()?);
        let local = LocalConfig::from_env()?;

        let storage = FsAdapter::new(&local.storage_root);
        let tools = FfmpegTools::new(&local.ffmpeg, &local.ffprobe);
        let transcoder =
            FfmpegTranscoder::new(storage.clone(), tools.clone(), config.work_dir.clone());
        let input_prefix = config.input_contents_path.clone();
        let pipeline = Arc::new(
            Pipeline::new(
                storage.clone(),
                tools.clone(),
                tools,
                transcoder.clone(),
                config,
            )
            .with_cancellation(cancel),
        );
        let workflow = InProcessWorkflow::new(pipeline.clone());

        Ok(Self {
            storage,
            transcoder,
            pipeline,
            workflow,
            input_prefix,
            local,
        })
    }

    /// Let background executions and engine jobs finish before exiting.
    async fn drain(&self) {
        self.workflow.drain().await;
        self.transcoder.drain().await;
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            signal.cancel();
        }
    });

    match run(cli, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "cadenza failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, cancel: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
    let app = App::from_env(cancel.clone())?;

    match cli.command {
        Command::Run { bucket, key } => {
            let result = StageResult::from(app.pipeline.run(&SplitInput { bucket, key }).await);
            println!("{}", serde_json::to_string(&result)?);
            app.drain().await;
        }
        Command::Stage { stage } => {
            let mut input = Vec::new();
            tokio::io::stdin().read_to_end(&mut input).await?;
            let runner = StageRunner::new(app.pipeline.clone(), app.workflow.clone());
            println!("{}", runner.dispatch(stage, &input).await?);
            app.drain().await;
        }
        Command::Serve => serve(app, cancel).await?,
    }
    Ok(())
}

#[derive(Clone)]
struct ServerState {
    storage: FsAdapter,
    workflow: LocalWorkflow,
    trigger: Arc<TriggerService<LocalWorkflow>>,
    input_prefix: Arc<str>,
}

async fn serve(app: App, cancel: CancellationToken) -> io::Result<()> {
    let state = ServerState {
        storage: app.storage.clone(),
        workflow: app.workflow.clone(),
        trigger: Arc::new(TriggerService::new(app.workflow.clone())),
        input_prefix: Arc::from(app.input_prefix.as_str()),
    };

    let router = Router::new()
        .route("/upload/:bucket", post(upload_media))
        .route("/events", post(upload_event))
        .layer(DefaultBodyLimit::disable())
        .with_state(state);

    let addr = app.local.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(addr = %addr, root = %app.storage.root().display(), "Listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    app.drain().await;
    Ok(())
}

// Accepts a multipart upload, stores each file under the input prefix and
// starts one execution per file.
async fn upload_media(
    State(state): State<ServerState>,
    UrlPath(bucket): UrlPath<String>,
    mut multipart: Multipart,
) -> Result<Json<TriggerOutput>, (StatusCode, String)> {
    let mut executions = Vec::new();

    while let Ok(Some(field)) = multipart.next_field().await {
        let file_name = if let Some(file_name) = field.file_name() {
            file_name.to_owned()
        } else {
            continue;
        };
        if !path_is_valid(Path::new(&file_name)) {
            return Err((StatusCode::BAD_REQUEST, "Invalid path".to_owned()));
        }

        let key = format!("{}/{}", state.input_prefix, file_name);
        let path = state
            .storage
            .object_path(&bucket, &key)
            .map_err(|e| (StatusCode::BAD_REQUEST, e.to_string()))?;
        info!(bucket = %bucket, key = %key, "Receiving upload");
        stream_to_file(&path, field).await?;

        let execution = state
            .workflow
            .start_execution(&SplitInput {
                bucket: bucket.clone(),
                key,
            })
            .await
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        executions.push(execution);
    }

    if executions.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "No file in upload".to_owned()));
    }
    Ok(Json(TriggerOutput { executions }))
}

async fn upload_event(
    State(state): State<ServerState>,
    Json(event): Json<UploadEvent>,
) -> (StatusCode, Json<StageResult<TriggerOutput>>) {
    let result = StageResult::from(state.trigger.handle(&event).await);
    let status = if result.is_success() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(result))
}

// Save a `Stream` to a file
async fn stream_to_file<S, E>(path: &Path, stream: S) -> Result<(), (StatusCode, String)>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: Into<BoxError>,
{
    async {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body_with_io_error = stream.map_err(|err| io::Error::new(io::ErrorKind::Other, err));
        let body_reader = StreamReader::new(body_with_io_error);
        futures::pin_mut!(body_reader);

        let mut file = BufWriter::new(File::create(path).await?);
        tokio::io::copy(&mut body_reader, &mut file).await?;
        tokio::io::AsyncWriteExt::flush(&mut file).await?;

        Ok::<_, io::Error>(())
    }
    .await
    .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))
}

/// An uploaded file name must be one plain path component.
fn path_is_valid(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(std::path::Component::Normal(_)), None)
    )
}
