use std::{env, path::PathBuf, sync::Arc};

use anyhow::{Context, bail};
use channel_plugin::plugin::ChannelAdapter;
use chatflow::{
    apps::App,
    bot::{Adapters, BotConfig},
    channel::ConsoleAdapter,
    config::{ConfigManager, EnvConfigManager},
    flow::Flow,
    logger::init_tracing,
};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "chatflow",
    about = "Multi-turn chatbot flows with per-chat conversation routing",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a flow, talking to every bot through the terminal
    Run(RunArgs),

    /// Check a flow file without running it
    Validate { file: PathBuf },

    /// Print the JSON Schema of flow files
    Schema,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Flow file (.json, .yaml or .yml)
    file: PathBuf,

    /// Log level directive (e.g. error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Directory holding `.env` and `logs/`. Defaults to $CHATFLOW_ROOT or ./chatflow
    #[arg(long)]
    root: Option<PathBuf>,

    /// Bot id that reads stdin. Defaults to the first launched bot
    #[arg(long)]
    bot: Option<String>,
}

fn resolve_root_dir(arg: Option<PathBuf>) -> PathBuf {
    arg.or_else(|| env::var("CHATFLOW_ROOT").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("./chatflow"))
}

#[tokio::main(flavor = "multi_thread", worker_threads = 4)]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Validate { file } => {
            let flow = Flow::load(&file).with_context(|| format!("{} is not a valid flow", file.display()))?;
            println!(
                "✅ {} is valid: flow `{}` with {} bots and {} nodes",
                file.display(),
                flow.id,
                flow.bots.len(),
                flow.nodes.len()
            );
            Ok(())
        }
        Commands::Schema => {
            let schema = schemars::schema_for!(Flow);
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let root = resolve_root_dir(args.root);
    std::fs::create_dir_all(&root).with_context(|| format!("cannot create {}", root.display()))?;
    let _log_guard = init_tracing(&root, "logs/chatflow.log", &args.log_level)?;

    let flow = Flow::load(&args.file).with_context(|| format!("{} is not a valid flow", args.file.display()))?;
    let config = ConfigManager(EnvConfigManager::new(root.join(".env")));
    let environment = config.environment().await;

    let stdin_bot = match args.bot {
        Some(id) if flow.bots.iter().any(|b| b.id == id) => id,
        Some(id) => bail!("flow `{}` has no bot `{}`", flow.id, id),
        None => flow
            .bots
            .iter()
            .find(|b| flow.is_bot_used(&b.id, environment))
            .map(|b| b.id.clone())
            .unwrap_or_default(),
    };
    let adapters = Adapters::new().with_fallback(Arc::new(move |cfg: &BotConfig| {
        Arc::new(ConsoleAdapter::new(&cfg.platform, cfg.id == stdin_bot)) as Arc<dyn ChannelAdapter>
    }));

    let app = App::new(config, adapters);
    let runtime = app.deploy(&flow).await?;

    let mut records = runtime.debug();
    tokio::spawn(async move {
        while let Ok(record) = records.recv().await {
            let label = record.name.unwrap_or(record.node_id);
            println!("[debug {}] {}", label, record.message.payload);
        }
    });
    let mut failures = runtime.failures();
    tokio::spawn(async move {
        while let Ok(failure) = failures.recv().await {
            eprintln!("[error {}] {}", failure.node_id, failure.error);
        }
    });

    info!(flow = flow.id.as_str(), ?environment, "running; press Ctrl-C to exit");
    println!("Flow `{}` running; type `<chat_id> <text>`, Ctrl-C to exit", flow.id);

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("cannot listen for Ctrl-C: {}", e);
    }
    println!("\nShutting down…");
    app.shutdown().await;
    Ok(())
}
