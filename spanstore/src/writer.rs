//! Partitioned, rotating Parquet writer.

use std::collections::HashMap;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use object_store::buffered::BufWriter;
use object_store::path::Path;
use object_store::ObjectStore;
use parquet::arrow::AsyncArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use jaeger_athena_model::model::Span;
use jaeger_athena_model::record::{CodecError, OperationRecord, SpanRecord};
use jaeger_athena_model::store::{SpanWriter, WriteError};

use crate::config::S3Config;
use crate::partition::{object_key, partition_key};
use crate::tables::{OperationTableBuilder, SpanTableBuilder, TableBuilder};

/// One in-progress partition object: a reserved object key plus the rows
/// accumulated since the writer was created.
struct PartitionWriter<B> {
    path: Path,
    builder: B,
    rows: usize,
}

impl<B: TableBuilder> PartitionWriter<B> {
    fn new(prefix: &str, partition: &str) -> Self {
        Self {
            path: object_key(prefix, partition),
            builder: B::default(),
            rows: 0,
        }
    }

    fn append(&mut self, row: &B::Row) -> Result<()> {
        self.builder.append(row)?;
        self.rows += 1;
        Ok(())
    }

    async fn finalize(self, store: Arc<dyn ObjectStore>) -> Result<()> {
        let rows = self.rows;
        let batch = self.builder.finish().with_context(|| "building batch")?;
        let props = WriterProperties::builder()
            .set_compression(Compression::SNAPPY)
            .build();
        let mut writer =
            AsyncArrowWriter::try_new(BufWriter::new(store, self.path.clone()), batch.schema(), Some(props))
                .with_context(|| "creating parquet writer")?;
        writer
            .write(&batch)
            .await
            .with_context(|| "writing record batch")?;
        writer
            .close()
            .await
            .with_context(|| format!("finalizing parquet object {}", self.path))?;
        info!("wrote partition object {} ({rows} rows)", self.path);
        Ok(())
    }
}

/// All active partition writers of one table, keyed by partition.
pub struct PartitionedWriter<B: TableBuilder> {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    active: Mutex<HashMap<String, PartitionWriter<B>>>,
}

impl<B: TableBuilder> PartitionedWriter<B> {
    pub fn new(store: Arc<dyn ObjectStore>, prefix: String) -> Self {
        Self {
            store,
            prefix,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Appends a row to the writer for `partition`, creating it on demand.
    /// The lock is held across the append; finalization never runs under it.
    pub async fn append(&self, partition: &str, row: &B::Row) -> Result<()> {
        let mut active = self.active.lock().await;
        let writer = active
            .entry(partition.to_string())
            .or_insert_with(|| PartitionWriter::new(&self.prefix, partition));
        writer.append(row)
    }

    /// Swaps out every active writer and finalizes them outside the lock.
    /// Returns the number of writers that failed to finalize; their rows
    /// are lost.
    pub async fn rotate(&self) -> usize {
        let drained = {
            let mut active = self.active.lock().await;
            mem::take(&mut *active)
        };
        let mut failures = 0;
        for (partition, writer) in drained {
            debug!("finalizing partition {partition} ({} rows)", writer.rows);
            if let Err(e) = writer.finalize(self.store.clone()).await {
                error!("dropping rows of partition {partition} after failed finalize: {e:#}");
                failures += 1;
            }
        }
        failures
    }
}

/// The span writer surface: converts spans into span and operation rows
/// and keeps both tables rotating on a shared ticker.
pub struct SpanStoreWriter {
    spans: Arc<PartitionedWriter<SpanTableBuilder>>,
    operations: Arc<PartitionedWriter<OperationTableBuilder>>,
    closed: AtomicBool,
    shutdown: watch::Sender<bool>,
    rotation: Mutex<Option<JoinHandle<()>>>,
}

impl SpanStoreWriter {
    pub fn new(store: Arc<dyn ObjectStore>, config: &S3Config) -> Self {
        let spans = Arc::new(PartitionedWriter::new(
            store.clone(),
            format!("{}spans/", config.prefix),
        ));
        let operations = Arc::new(PartitionedWriter::new(
            store,
            format!("{}operations/", config.prefix),
        ));
        let (shutdown, shutdown_rx) = watch::channel(false);
        let rotation = tokio::spawn(rotation_loop(
            spans.clone(),
            operations.clone(),
            config.buffer_duration,
            shutdown_rx,
        ));
        Self {
            spans,
            operations,
            closed: AtomicBool::new(false),
            shutdown,
            rotation: Mutex::new(Some(rotation)),
        }
    }

    /// Stops the rotation ticker and finalizes all active writers.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.rotation.lock().await.take() {
            handle.await.with_context(|| "joining rotation task")?;
        }
        let failures = self.spans.rotate().await + self.operations.rotate().await;
        if failures > 0 {
            bail!("{failures} partition objects failed to finalize");
        }
        Ok(())
    }
}

#[async_trait]
impl SpanWriter for SpanStoreWriter {
    async fn write_span(&self, span: &Span) -> Result<(), WriteError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WriteError::Closed);
        }
        let record = SpanRecord::from_span(span)?;
        let operation = OperationRecord::from_span(span);
        let start_time = DateTime::from_timestamp_millis(record.start_time)
            .ok_or_else(|| CodecError("start time out of range".into()))?;
        let partition = partition_key(start_time);
        self.spans
            .append(&partition, &record)
            .await
            .map_err(|e| CodecError(format!("{e:#}")))?;
        self.operations
            .append(&partition, &operation)
            .await
            .map_err(|e| CodecError(format!("{e:#}")))?;
        Ok(())
    }
}

async fn rotation_loop(
    spans: Arc<PartitionedWriter<SpanTableBuilder>>,
    operations: Arc<PartitionedWriter<OperationTableBuilder>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                spans.rotate().await;
                operations.rotate().await;
            }
            _ = shutdown.changed() => break,
        }
    }
}
