//! Jaeger storage plugin server.
//!
//! Writes spans as hourly-partitioned Parquet objects into an S3 bucket
//! and answers the query contract by dispatching SQL to Athena over the
//! external tables describing those objects.
//!
//! Env variables:
//!  - `GRPC_STORAGE_PLUGIN_LOG_LEVEL` : log verbosity, default `warn`
//!  - every configuration key, with `.` replaced by `_`
//!    (e.g. `S3_BUCKETNAME`, `ATHENA_WORKGROUP`)

mod config;
mod grpc;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;
use clap::Parser;
use config::Configuration;
use object_store::aws::AmazonS3Builder;
use object_store::ObjectStore;
use tonic::transport::Server;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use grpc::{SpanReaderService, SpanWriterService};
use jaeger_athena_model::storage::span_reader_plugin_server::SpanReaderPluginServer;
use jaeger_athena_model::storage::span_writer_plugin_server::SpanWriterPluginServer;
use jaeger_athena_query::client::AthenaApi;
use jaeger_athena_query::sdk::{AthenaTargets, SdkAthena};
use jaeger_athena_query::Reader;
use jaeger_athena_spanstore::bucket::empty_bucket;
use jaeger_athena_spanstore::SpanStoreWriter;

#[derive(Parser, Debug)]
#[clap(name = "jaeger-athena-srv")]
#[clap(about = "Jaeger storage plugin backed by S3 Parquet and Athena", version)]
struct Cli {
    /// A path to the plugin's configuration file
    #[clap(long)]
    config: Option<PathBuf>,

    #[clap(long, default_value = "0.0.0.0:17271")]
    listen_endpoint: SocketAddr,
}

fn init_logging() -> Result<()> {
    let level = std::env::var("GRPC_STORAGE_PLUGIN_LOG_LEVEL")
        .unwrap_or_else(|_| "warn".to_string())
        .to_lowercase();
    let filter = EnvFilter::try_new(&level).with_context(|| format!("parsing log level {level:?}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .init();
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;
    let args = Cli::parse();
    let configuration = Configuration::load(args.config.as_deref())?;
    debug!("plugin starting");

    let store: Arc<dyn ObjectStore> = Arc::new(
        AmazonS3Builder::from_env()
            .with_bucket_name(configuration.s3.bucket_name.clone())
            .build()
            .with_context(|| format!("connecting to bucket {}", configuration.s3.bucket_name))?,
    );
    if configuration.s3.empty_bucket {
        empty_bucket(store.clone())
            .await
            .with_context(|| "emptying bucket")?;
    }
    let writer = Arc::new(SpanStoreWriter::new(store, &configuration.s3));

    let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
    let athena: Arc<dyn AthenaApi> = Arc::new(SdkAthena::new(
        aws_sdk_athena::Client::new(&sdk_config),
        AthenaTargets {
            database: configuration.athena.database_name.clone(),
            workgroup: configuration.athena.workgroup.clone(),
            output_location: configuration.athena.output_location.clone(),
        },
    ));
    let reader = Arc::new(Reader::new(athena, configuration.athena.clone()).await);
    debug!("plugin configured");

    info!("listening on {}", args.listen_endpoint);
    Server::builder()
        .add_service(SpanWriterPluginServer::new(SpanWriterService::new(
            writer.clone(),
        )))
        .add_service(SpanReaderPluginServer::new(SpanReaderService::new(reader)))
        .serve_with_shutdown(args.listen_endpoint, shutdown_signal())
        .await?;

    writer.close().await.with_context(|| "closing span writer")?;
    info!("bye");
    Ok(())
}
