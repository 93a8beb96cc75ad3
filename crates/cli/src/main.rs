use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use floodgate_core::{
    load_config, validate_config, Handler, HandlerParams, HandlerResult, PathSpec, PublishType,
};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let input = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: floodgate <input-file>")?;

    // Determine config path
    let config_path = std::env::var("FLOODGATE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;

    info!("Pipeline: {}", config.global.pipeline_name);
    info!("Upload storage: {}", config.global.upload_url);

    // Files go to the catalog harvesters when any are configured,
    // otherwise straight to upload storage.
    let default_addition_publish_type = if config.harvesters.is_empty() {
        PublishType::UploadOnly
    } else {
        PublishType::HarvestUpload
    };
    let params = HandlerParams {
        dest_path: Some(PathSpec::Named("basename".to_string())),
        default_addition_publish_type,
        ..Default::default()
    };

    let mut handler = Handler::new(&input, config, params);
    let result = handler.run().await.context("Handler run failed")?;

    let (columns, rows) = handler.file_collection().table_data();
    let files: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            columns
                .iter()
                .zip(row)
                .map(|(column, value)| {
                    (column.to_string(), serde_json::Value::String(value.clone()))
                })
                .collect::<serde_json::Map<String, serde_json::Value>>()
                .into()
        })
        .collect();
    let summary = serde_json::json!({
        "input": input.display().to_string(),
        "result": result.to_string(),
        "state": handler.state().to_string(),
        "input_checksum": handler.input_checksum(),
        "error": handler.error_details(),
        "files": files,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if result == HandlerResult::Error {
        bail!(
            "run failed: {}",
            handler.error_details().unwrap_or("unknown error")
        );
    }
    Ok(())
}
