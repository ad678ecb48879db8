use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;

use minutes::api::{ApiServer, ApiServerConfig, AppState};
use minutes::config::{PipelineConfig, PipelineMode, ReportLayout};
use minutes::gateway::ModelGateway;
use minutes::jobs::{JobQueueConfig, JobQueueManager, SelfLauncher};
use minutes::logging::{self, LogOutput};
use minutes::pipeline::StagePipeline;
use minutes::pipeline::artifacts::{RUNTIME_LOG_FILE, new_run_id};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log filter directive, overrides RUST_LOG
    #[arg(long, global = true)]
    log_filter: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the pipeline once and write the report
    Run(RunArgs),
    /// Serve the HTTP job API with its queue worker
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Transcript JSON (`{"segments": [...]}`)
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Meeting config JSON (`MEETING_INFO`, `AGENDA_TEXT`)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Capture OCR manifest JSON
    #[arg(long)]
    captures: Option<PathBuf>,

    /// Output HTML path
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Topic structuring: auto | agenda
    #[arg(long)]
    mode: Option<PipelineMode>,

    /// Report layout: current | official
    #[arg(long)]
    report_layout: Option<ReportLayout>,

    /// Save intermediate stage artifacts
    #[arg(long)]
    save_artifacts: Option<bool>,

    /// Reuse the clean & align output saved in this run directory
    #[arg(long)]
    resume_artifact_dir: Option<PathBuf>,

    /// Root directory for per-run artifacts
    #[arg(long)]
    artifacts_root: Option<PathBuf>,
}

impl RunArgs {
    fn apply(self, config: &mut PipelineConfig) {
        let paths = &mut config.paths;
        if let Some(p) = self.transcript {
            paths.transcript = p;
        }
        if let Some(p) = self.config {
            paths.config = p;
        }
        if let Some(p) = self.captures {
            paths.captures = Some(p);
        }
        if let Some(p) = self.output {
            paths.output_html = p;
        }
        if let Some(p) = self.artifacts_root {
            paths.artifacts_root = p;
        }
        if let Some(p) = self.resume_artifact_dir {
            paths.resume_artifact_dir = Some(p);
        }
        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(layout) = self.report_layout {
            config.layout = layout;
        }
        if let Some(save) = self.save_artifacts {
            config.save_intermediate = save;
        }
    }
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Bind address, overrides API_BIND_ADDRESS
    #[arg(long)]
    bind: Option<String>,

    /// Port, overrides API_PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Jobs root directory, overrides API_JOBS_ROOT
    #[arg(long)]
    jobs_root: Option<PathBuf>,

    /// Directory for the rolling service log
    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(args, cli.log_filter.as_deref()).await,
        Command::Serve(args) => serve(args, cli.log_filter.as_deref()).await,
    }
}

async fn run(args: RunArgs, log_filter: Option<&str>) -> anyhow::Result<()> {
    let mut config = PipelineConfig::from_env();
    args.apply(&mut config);

    let run_id = new_run_id();
    let log_file = config.paths.artifacts_root.join(&run_id).join(RUNTIME_LOG_FILE);
    let _guard = logging::init_logging(&LogOutput::File(log_file), log_filter, std::io::stderr().is_terminal())?;

    config.load_heuristics().await.context("loading heuristics")?;
    let config = Arc::new(config);
    let gateway = Arc::new(ModelGateway::from_config(&config)?);

    let outcome = StagePipeline::new(config, gateway).run(&run_id).await?;
    info!(
        run_id = %outcome.run_id,
        renderer = outcome.renderer,
        output = %outcome.output_html.display(),
        artifacts = %outcome.artifact_dir.display(),
        "Report ready"
    );
    Ok(())
}

async fn serve(args: ServeArgs, log_filter: Option<&str>) -> anyhow::Result<()> {
    let _guard = logging::init_logging(
        &LogOutput::Daily(args.log_dir.clone()),
        log_filter,
        std::io::stderr().is_terminal(),
    )?;

    let mut queue_config = JobQueueConfig::from_env();
    if let Some(root) = args.jobs_root {
        queue_config.jobs_root = root;
    }
    let launcher = Arc::new(SelfLauncher::current_exe()?);
    let jobs = Arc::new(JobQueueManager::new(queue_config, launcher));
    jobs.start().await?;

    let mut server_config = ApiServerConfig::from_env_or_default();
    if let Some(bind) = args.bind {
        server_config.bind_address = bind;
    }
    if let Some(port) = args.port {
        server_config.port = port;
    }
    let server = ApiServer::new(server_config, AppState::new(jobs.clone()));

    let cancel = server.cancel_token();
    logging::start_retention_cleanup(Arc::new(args.log_dir), cancel.clone());
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        cancel.cancel();
    });

    let served = server.run().await;
    jobs.stop().await;
    served?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
