use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use llmbot_analytics::{
    AnalyticsRecorder, AppendLogSink, ExportJob, RelationalSink, RemoteStorage, Scheduler,
    YandexDiskClient,
};
use llmbot_core::{shutdown, AppConfig, CompletionClient, OpenAiCompletion};
use llmbot_telegram::{run_polling, BotHandler, TelegramClient};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "llmbot",
    about = "Telegram LLM bot with usage analytics and scheduled spreadsheet export",
    version,
    author
)]
struct Cli {
    /// Path to config file (default: ~/.config/llmbot/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override the model name
    #[arg(short, long, global = true)]
    model: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot and the export scheduler (default)
    Run,

    /// Run only the analytics export
    Export {
        /// Export once and exit instead of running on the schedule
        #[arg(long)]
        once: bool,
    },

    /// Show or manage configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration with secrets masked
    Show,
    /// Write a default configuration file
    Init,
    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "llmbot=info,warn".into()))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_process_env()?;
            config
        }
        None => AppConfig::load()?,
    };
    if let Some(model) = &cli.model {
        config.provider.model = model.clone();
    }

    match cli.command {
        Some(Commands::Run) | None => run_bot(config).await,
        Some(Commands::Export { once }) => run_export(config, once).await,
        Some(Commands::Config { action }) => handle_config_command(action, &config),
    }
}

async fn run_bot(config: AppConfig) -> Result<()> {
    if let Err(e) = config.validate() {
        error!("{}", e);
        return Err(e.into());
    }
    if let Some(dir) = config.analytics.log_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating analytics directory {}", dir.display()))?;
    }

    let log_sink = Arc::new(AppendLogSink::new(&config.analytics.log_path));
    let relational_sink = Arc::new(RelationalSink::new(&config.database));
    if let Err(e) = relational_sink.ensure_schema().await {
        warn!(table = relational_sink.table(), error = %e, "Could not ensure analytics table");
    }

    let completion = Arc::new(OpenAiCompletion::new(&config.provider));
    let recorder = Arc::new(AnalyticsRecorder::new(
        log_sink.clone(),
        relational_sink,
        completion.model_name(),
    ));

    let (shutdown_tx, shutdown_rx) = shutdown::channel();

    let exporter = if config.export.enabled() {
        let job = export_job(&config, log_sink);
        let scheduler = Scheduler::new(config.export.interval());
        let rx = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            scheduler.run(&job, rx).await;
        }))
    } else {
        info!("YADISK_TOKEN not set, analytics export disabled");
        None
    };

    let token = config.telegram.token.clone().unwrap_or_default();
    let telegram = Arc::new(TelegramClient::new(&config.telegram.api_base, &token));
    let handler = Arc::new(BotHandler::new(telegram.clone(), completion, recorder));

    info!(model = %config.provider.model, "Bot started");
    tokio::spawn(stop_on_ctrl_c(shutdown_tx));
    run_polling(telegram, handler, config.telegram.poll_timeout_secs, shutdown_rx).await;

    if let Some(exporter) = exporter {
        if let Err(e) = exporter.await {
            warn!(error = %e, "Export scheduler task failed");
        }
    }
    Ok(())
}

async fn run_export(config: AppConfig, once: bool) -> Result<()> {
    if !config.export.enabled() {
        bail!("YADISK_TOKEN is not set; nothing to export to");
    }
    if config.export.interval_hours == 0 {
        bail!("EXPORT_INTERVAL_HOURS must be at least 1");
    }
    let log_sink = Arc::new(AppendLogSink::new(&config.analytics.log_path));
    let job = export_job(&config, log_sink);

    if once {
        let outcome = job.try_run().await?;
        info!(?outcome, "Export finished");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = shutdown::channel();
    tokio::spawn(stop_on_ctrl_c(shutdown_tx));
    Scheduler::new(config.export.interval())
        .run(&job, shutdown_rx)
        .await;
    Ok(())
}

fn export_job(config: &AppConfig, log_sink: Arc<AppendLogSink>) -> ExportJob {
    let storage = config.export.token.as_ref().map(|token| {
        Arc::new(YandexDiskClient::new(&config.export.api_base, token)) as Arc<dyn RemoteStorage>
    });
    ExportJob::new(log_sink, storage, &config.export)
}

async fn stop_on_ctrl_c(tx: watch::Sender<bool>) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
    }
    let _ = tx.send(true);
}

fn handle_config_command(action: Option<ConfigAction>, config: &AppConfig) -> Result<()> {
    match action {
        Some(ConfigAction::Show) | None => {
            let toml_str = toml::to_string_pretty(&config.redacted())?;
            println!("{}", toml_str);
        }
        Some(ConfigAction::Init) => {
            let path = AppConfig::default_path();
            if path.exists() {
                println!("Config already exists at: {}", path.display());
            } else {
                AppConfig::default().save()?;
                println!("Created default config at: {}", path.display());
            }
        }
        Some(ConfigAction::Path) => {
            println!("{}", AppConfig::default_path().display());
        }
    }
    Ok(())
}
