//! Columnar builders for the spans and operations tables.
//!
//! String columns are dictionary encoded throughout.

use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{
    ArrayRef, BinaryBuilder, Int32Builder, Int64Builder, ListBuilder, MapBuilder, StringBuilder,
    StringDictionaryBuilder, StructBuilder,
};
use arrow::datatypes::{DataType, Field, Int32Type, Schema};
use arrow::record_batch::RecordBatch;

use jaeger_athena_model::record::{OperationRecord, SpanRecord};

/// Accumulates rows of one table and renders them as a record batch.
pub trait TableBuilder: Default + Send + 'static {
    type Row: Send + Sync + 'static;

    fn append(&mut self, row: &Self::Row) -> Result<()>;

    fn finish(self) -> Result<RecordBatch>;
}

fn batch_from_columns(columns: Vec<(&str, ArrayRef)>) -> Result<RecordBatch> {
    let fields: Vec<Field> = columns
        .iter()
        .map(|(name, array)| {
            Field::new(
                name.to_string(),
                array.data_type().clone(),
                array.null_count() > 0,
            )
        })
        .collect();
    let arrays = columns.into_iter().map(|(_, array)| array).collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .with_context(|| "assembling record batch")
}

fn reference_fields() -> Vec<Field> {
    vec![
        Field::new("trace_id", DataType::Utf8, false),
        Field::new("span_id", DataType::Utf8, false),
        Field::new("ref_type", DataType::Int32, false),
    ]
}

pub struct SpanTableBuilder {
    trace_ids: StringDictionaryBuilder<Int32Type>,
    span_ids: StringDictionaryBuilder<Int32Type>,
    operation_names: StringDictionaryBuilder<Int32Type>,
    span_kinds: StringDictionaryBuilder<Int32Type>,
    service_names: StringDictionaryBuilder<Int32Type>,
    start_times: Int64Builder,
    durations: Int64Builder,
    tags: MapBuilder<StringBuilder, StringBuilder>,
    payloads: BinaryBuilder,
    references: ListBuilder<StructBuilder>,
}

impl Default for SpanTableBuilder {
    fn default() -> Self {
        Self {
            trace_ids: StringDictionaryBuilder::new(),
            span_ids: StringDictionaryBuilder::new(),
            operation_names: StringDictionaryBuilder::new(),
            span_kinds: StringDictionaryBuilder::new(),
            service_names: StringDictionaryBuilder::new(),
            start_times: Int64Builder::new(),
            durations: Int64Builder::new(),
            tags: MapBuilder::new(None, StringBuilder::new(), StringBuilder::new()),
            payloads: BinaryBuilder::new(),
            references: ListBuilder::new(StructBuilder::from_fields(reference_fields(), 0)),
        }
    }
}

impl TableBuilder for SpanTableBuilder {
    type Row = SpanRecord;

    fn append(&mut self, row: &SpanRecord) -> Result<()> {
        self.trace_ids.append_value(&row.trace_id);
        self.span_ids.append_value(&row.span_id);
        self.operation_names.append_value(&row.operation_name);
        self.span_kinds.append_value(&row.span_kind);
        self.service_names.append_value(&row.service_name);
        self.start_times.append_value(row.start_time);
        self.durations.append_value(row.duration);

        for (key, value) in &row.tags {
            self.tags.keys().append_value(key);
            self.tags.values().append_value(value);
        }
        self.tags
            .append(true)
            .with_context(|| "closing tags map entry")?;

        self.payloads.append_value(&row.span_payload);

        let refs = self.references.values();
        for reference in &row.references {
            refs.field_builder::<StringBuilder>(0)
                .context("reference trace_id builder")?
                .append_value(&reference.trace_id);
            refs.field_builder::<StringBuilder>(1)
                .context("reference span_id builder")?
                .append_value(&reference.span_id);
            refs.field_builder::<Int32Builder>(2)
                .context("reference ref_type builder")?
                .append_value(reference.ref_type);
            refs.append(true);
        }
        self.references.append(true);
        Ok(())
    }

    fn finish(mut self) -> Result<RecordBatch> {
        batch_from_columns(vec![
            ("trace_id", Arc::new(self.trace_ids.finish()) as ArrayRef),
            ("span_id", Arc::new(self.span_ids.finish())),
            ("operation_name", Arc::new(self.operation_names.finish())),
            ("span_kind", Arc::new(self.span_kinds.finish())),
            ("service_name", Arc::new(self.service_names.finish())),
            ("start_time", Arc::new(self.start_times.finish())),
            ("duration", Arc::new(self.durations.finish())),
            ("tags", Arc::new(self.tags.finish())),
            ("span_payload", Arc::new(self.payloads.finish())),
            ("references", Arc::new(self.references.finish())),
        ])
    }
}

pub struct OperationTableBuilder {
    operation_names: StringDictionaryBuilder<Int32Type>,
    span_kinds: StringDictionaryBuilder<Int32Type>,
    service_names: StringDictionaryBuilder<Int32Type>,
}

impl Default for OperationTableBuilder {
    fn default() -> Self {
        Self {
            operation_names: StringDictionaryBuilder::new(),
            span_kinds: StringDictionaryBuilder::new(),
            service_names: StringDictionaryBuilder::new(),
        }
    }
}

impl TableBuilder for OperationTableBuilder {
    type Row = OperationRecord;

    fn append(&mut self, row: &OperationRecord) -> Result<()> {
        self.operation_names.append_value(&row.operation_name);
        self.span_kinds.append_value(&row.span_kind);
        self.service_names.append_value(&row.service_name);
        Ok(())
    }

    fn finish(mut self) -> Result<RecordBatch> {
        batch_from_columns(vec![
            (
                "operation_name",
                Arc::new(self.operation_names.finish()) as ArrayRef,
            ),
            ("span_kind", Arc::new(self.span_kinds.finish())),
            ("service_name", Arc::new(self.service_names.finish())),
        ])
    }
}
