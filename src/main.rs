use anyhow::{anyhow, Context, Result};
use brokerwatch::{
    arguments::{Cli, Command},
    config::{get_config_clone, load_config_from_path, with_config},
    logger::{self, LogTag},
    protocol::MessageProperties,
    runtime::Runtime,
};
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

const WATCH_SUBSCRIBER: &str = "cli-watch";

/// Entry point for brokerwatch
///
/// Loads configuration, starts the protocol link and the control-plane probe,
/// runs one command and shuts everything down again. Results are printed to
/// stdout as pretty JSON; logs go to the console/file sink.
#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        logger::error(LogTag::System, &format!("{:#}", e));
        logger::flush();
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    load_config_from_path(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    logger::init(with_config(|cfg| {
        cli.logger_config(&cfg.logging.level, &cfg.logging.file_path)
    }));

    let mut runtime =
        Runtime::build(get_config_clone()).context("Failed to set up broker transports")?;
    runtime
        .start()
        .await
        .map_err(|e| anyhow!(e))
        .context("Failed to start services")?;

    let outcome = execute(&runtime, cli.command).await;
    runtime.shutdown().await;
    outcome
}

async fn execute(runtime: &Runtime, command: Command) -> Result<()> {
    let aggregator = runtime.aggregator();

    match command {
        Command::Overview => print_json(&aggregator.get_overview().await?),
        Command::Queues => print_json(&aggregator.list_queues().await?),
        Command::Queue { namespace, name } => {
            print_json(&aggregator.get_queue(&namespace, &name).await?)
        }
        Command::Exchanges => print_json(&aggregator.list_exchanges().await?),
        Command::Bindings => print_json(&aggregator.list_bindings().await?),
        Command::Messages {
            namespace,
            name,
            count,
        } => print_json(&aggregator.get_messages(&namespace, &name, count).await?),
        Command::Purge { namespace, name } => {
            print_json(&aggregator.purge_queue(&namespace, &name).await?)
        }
        Command::Publish {
            namespace,
            exchange,
            routing_key,
            payload,
        } => {
            let payload = serde_json::from_str::<Value>(&payload).unwrap_or(Value::String(payload));
            let outcome = aggregator
                .publish_message(
                    &namespace,
                    &exchange,
                    &routing_key,
                    &payload,
                    &MessageProperties::default(),
                )
                .await?;
            print_json(&outcome)
        }
        Command::Health => print_json(&aggregator.health()),
        Command::Watch { interval_ms } => watch(runtime, interval_ms).await,
    }
}

async fn watch(runtime: &Runtime, interval_ms: Option<u64>) -> Result<()> {
    let scheduler = runtime.scheduler();
    let interval = interval_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| scheduler.default_interval());

    let mut changes = runtime.connectivity().subscribe();
    let change_printer = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) => {
                    if let Err(e) = print_json(&change) {
                        logger::warning(LogTag::System, &format!("{:#}", e));
                    }
                }
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    scheduler
        .subscribe_snapshots(
            WATCH_SUBSCRIBER,
            |snapshot| {
                if let Err(e) = print_json(&snapshot) {
                    logger::warning(LogTag::System, &format!("{:#}", e));
                }
            },
            |e| logger::warning(LogTag::System, &format!("Snapshot unavailable: {}", e)),
            interval,
        )
        .await;

    logger::info(LogTag::System, "Watching, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    scheduler.unsubscribe(WATCH_SUBSCRIBER);
    change_printer.abort();
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}
