//! CLI for pipebus
//!
//! Subcommands:
//! - `run`: seed the pipeline, log every delivered event, stop on Ctrl-C
//! - `demo`: same wiring, publish one upload and follow it through the pipeline

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use pipebus::config::{Settings, load_config};
use pipebus::pipeline::{self, Pipeline};
use pipebus::{Broker, HandlerError, Message, handler_fn};
use serde_json::json;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "pipebus")]
enum Command {
    /// Run the broker with logging consumers until Ctrl-C
    Run,
    /// Publish a sample upload and follow it through the pipeline
    Demo {
        /// Give up waiting for the queues to drain after this many seconds
        #[arg(long, default_value_t = 10)]
        timeout_secs: u64,
    },
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    let cmd = Command::parse();

    let settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            pipebus::utils::logging::init("info");
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    pipebus::utils::logging::init(&settings.logging.level);

    let result = match cmd {
        Command::Run => run(settings).await,
        Command::Demo { timeout_secs } => demo(settings, Duration::from_secs(timeout_secs)).await,
    };
    if let Err(e) = result {
        error!("pipebus failed: {}", e);
        std::process::exit(1);
    }
}

fn build_pipeline(settings: &Settings) -> Pipeline {
    let broker = Arc::new(Broker::new(settings.broker.clone()));
    let pipeline = Pipeline::new(broker, settings.topics.clone());
    pipeline.seed();
    pipeline
}

async fn log_event(subscription: &'static str, message: Message) -> Result<(), HandlerError> {
    info!(
        subscription,
        message_id = %message.id,
        event_type = %message.data.event_type,
        document_id = %message.data.document_id,
        "Event delivered"
    );
    Ok(())
}

async fn attach_logging_consumers(pipeline: &Pipeline, skip: &[&str]) -> pipebus::utils::error::Result<()> {
    for (subscription, topic) in pipeline.bindings() {
        if skip.contains(&subscription) {
            continue;
        }
        pipeline
            .broker()
            .try_subscribe(
                subscription,
                topic,
                handler_fn(move |message| log_event(subscription, message)),
            )
            .await?;
    }
    Ok(())
}

async fn run(settings: Settings) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = build_pipeline(&settings);
    attach_logging_consumers(&pipeline, &[]).await?;
    info!("Broker running. Press Ctrl-C to stop.");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received. Exiting gracefully.");
    pipeline.broker().shutdown().await;
    Ok(())
}

async fn demo(settings: Settings, timeout: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let pipeline = build_pipeline(&settings);

    // document-processor hands the upload on as a processed document
    let chained = pipeline.clone();
    pipeline
        .broker()
        .try_subscribe(
            pipeline::DOCUMENT_PROCESSOR,
            &pipeline.topics().upload,
            handler_fn(move |message: Message| {
                let chained = chained.clone();
                async move {
                    let event = &message.data;
                    chained.publish_document_processed(
                        &event.document_id,
                        &event.user_id,
                        json!({ "status": "parsed", "source_message": message.id }),
                    )?;
                    Ok::<(), HandlerError>(())
                }
            }),
        )
        .await?;
    attach_logging_consumers(&pipeline, &[pipeline::DOCUMENT_PROCESSOR]).await?;

    let message_id = pipeline.publish_document_upload(
        "demo-document",
        "demo-user",
        "/uploads/demo-document.pdf",
        1024,
        "application/pdf",
    )?;
    info!(message_id = %message_id, "Published demo upload");

    let drained = tokio::time::timeout(timeout, wait_until_drained(&pipeline)).await;
    if drained.is_err() {
        warn!("Queues still hold pending messages after {:?}", timeout);
    }

    pipeline.broker().shutdown().await;
    Ok(())
}

async fn wait_until_drained(pipeline: &Pipeline) {
    // the chained event is published from inside a handler, so one empty
    // sweep is not enough; require two in a row
    let mut empty_sweeps = 0;
    while empty_sweeps < 2 {
        tokio::time::sleep(pipeline.broker().settings().poll_interval()).await;
        let idle = pipeline
            .bindings()
            .iter()
            .all(|(subscription, _)| pipeline.broker().pending_count(subscription) == Some(0));
        empty_sweeps = if idle { empty_sweeps + 1 } else { 0 };
    }
}
