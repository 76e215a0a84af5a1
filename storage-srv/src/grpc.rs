//! gRPC adapters: proto messages in, contract traits out. No storage
//! logic lives here.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures::Stream;
use tonic::{Request, Response, Status, Streaming};

use jaeger_athena_model::storage as pb;
use jaeger_athena_model::storage::span_reader_plugin_server::SpanReaderPlugin;
use jaeger_athena_model::storage::span_writer_plugin_server::SpanWriterPlugin;
use jaeger_athena_model::store::{
    DependencyReader, OperationQuery, ReadError, SpanReader, SpanWriter, Trace, TraceQuery,
    WriteError,
};
use jaeger_athena_query::Reader;
use jaeger_athena_spanstore::SpanStoreWriter;

pub struct SpanWriterService {
    writer: Arc<SpanStoreWriter>,
}

impl SpanWriterService {
    pub fn new(writer: Arc<SpanStoreWriter>) -> Self {
        Self { writer }
    }
}

fn write_error_status(e: WriteError) -> Status {
    match e {
        WriteError::Closed => Status::unavailable("span writer is closed"),
        WriteError::Codec(e) => Status::invalid_argument(e.to_string()),
    }
}

fn read_error_status(e: ReadError) -> Status {
    match e {
        ReadError::TraceNotFound(id) => Status::not_found(format!("trace {id} not found")),
        ReadError::Cancelled => Status::cancelled("query cancelled"),
        ReadError::QueryFailed(reason) => Status::internal(reason),
        ReadError::Backend(detail) => Status::internal(detail),
    }
}

#[tonic::async_trait]
impl SpanWriterPlugin for SpanWriterService {
    type WriteSpanStreamStream =
        Pin<Box<dyn Stream<Item = Result<pb::WriteSpanResponse, Status>> + Send + 'static>>;

    async fn write_span_stream(
        &self,
        request: Request<Streaming<pb::WriteSpanRequest>>,
    ) -> Result<Response<Self::WriteSpanStreamStream>, Status> {
        let mut messages = request.into_inner();
        let writer = self.writer.clone();
        let acks = try_stream! {
            while let Some(message) = messages.message().await? {
                let span = message
                    .span
                    .ok_or_else(|| Status::invalid_argument("request has no span"))?;
                writer
                    .write_span(&span)
                    .await
                    .map_err(write_error_status)?;
                yield pb::WriteSpanResponse {};
            }
        };
        Ok(Response::new(Box::pin(acks)))
    }

    async fn close(
        &self,
        _request: Request<pb::CloseWriterRequest>,
    ) -> Result<Response<pb::CloseWriterResponse>, Status> {
        self.writer
            .close()
            .await
            .map_err(|e| Status::internal(format!("{e:#}")))?;
        Ok(Response::new(pb::CloseWriterResponse {}))
    }
}

pub struct SpanReaderService {
    reader: Arc<Reader>,
}

impl SpanReaderService {
    pub fn new(reader: Arc<Reader>) -> Self {
        Self { reader }
    }
}

fn timestamp_to_datetime(ts: prost_types::Timestamp) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.seconds, ts.nanos as u32)
}

fn duration_to_std(d: prost_types::Duration) -> Option<Duration> {
    if d.seconds < 0 || d.nanos < 0 {
        return None;
    }
    Some(Duration::new(d.seconds as u64, d.nanos as u32))
}

fn to_trace_query(params: pb::TraceQueryParameters) -> TraceQuery {
    TraceQuery {
        service_name: params.service_name,
        operation_name: params.operation_name,
        tags: params
            .tags
            .into_iter()
            .map(|tag| (tag.key, tag.value))
            .collect(),
        start_time_min: params.start_time_min.and_then(timestamp_to_datetime),
        start_time_max: params.start_time_max.and_then(timestamp_to_datetime),
        duration_min: params.duration_min.and_then(duration_to_std),
        duration_max: params.duration_max.and_then(duration_to_std),
        num_traces: params.num_traces.max(0) as usize,
    }
}

fn to_pb_trace(trace: Trace) -> pb::Trace {
    pb::Trace { spans: trace }
}

#[tonic::async_trait]
impl SpanReaderPlugin for SpanReaderService {
    async fn get_services(
        &self,
        _request: Request<pb::GetServicesRequest>,
    ) -> Result<Response<pb::GetServicesResponse>, Status> {
        let services = self
            .reader
            .get_services()
            .await
            .map_err(read_error_status)?;
        Ok(Response::new(pb::GetServicesResponse { services }))
    }

    async fn get_operations(
        &self,
        request: Request<pb::GetOperationsRequest>,
    ) -> Result<Response<pb::GetOperationsResponse>, Status> {
        let request = request.into_inner();
        let operations = self
            .reader
            .get_operations(OperationQuery {
                service_name: request.service,
                span_kind: request.span_kind,
            })
            .await
            .map_err(read_error_status)?;
        Ok(Response::new(pb::GetOperationsResponse {
            operations: operations
                .into_iter()
                .map(|op| pb::Operation {
                    name: op.name,
                    span_kind: op.span_kind,
                })
                .collect(),
        }))
    }

    async fn get_trace(
        &self,
        request: Request<pb::GetTraceRequest>,
    ) -> Result<Response<pb::GetTraceResponse>, Status> {
        let request = request.into_inner();
        let trace = self
            .reader
            .get_trace(&request.trace_id)
            .await
            .map_err(read_error_status)?;
        Ok(Response::new(pb::GetTraceResponse {
            trace: Some(to_pb_trace(trace)),
        }))
    }

    async fn find_traces(
        &self,
        request: Request<pb::FindTracesRequest>,
    ) -> Result<Response<pb::FindTracesResponse>, Status> {
        let query = request
            .into_inner()
            .query
            .ok_or_else(|| Status::invalid_argument("request has no query"))?;
        let traces = self
            .reader
            .find_traces(to_trace_query(query))
            .await
            .map_err(read_error_status)?;
        Ok(Response::new(pb::FindTracesResponse {
            traces: traces.into_iter().map(to_pb_trace).collect(),
        }))
    }

    async fn find_trace_ids(
        &self,
        request: Request<pb::FindTraceIdsRequest>,
    ) -> Result<Response<pb::FindTraceIdsResponse>, Status> {
        let query = request
            .into_inner()
            .query
            .ok_or_else(|| Status::invalid_argument("request has no query"))?;
        let trace_ids = self
            .reader
            .find_trace_ids(to_trace_query(query))
            .await
            .map_err(read_error_status)?;
        Ok(Response::new(pb::FindTraceIdsResponse { trace_ids }))
    }

    async fn get_dependencies(
        &self,
        request: Request<pb::GetDependenciesRequest>,
    ) -> Result<Response<pb::GetDependenciesResponse>, Status> {
        let request = request.into_inner();
        let end_ts = request
            .end_time
            .and_then(timestamp_to_datetime)
            .ok_or_else(|| Status::invalid_argument("request has no end time"))?;
        let lookback = request
            .lookback
            .and_then(duration_to_std)
            .ok_or_else(|| Status::invalid_argument("request has no lookback"))?;
        let dependencies = self
            .reader
            .get_dependencies(end_ts, lookback)
            .await
            .map_err(read_error_status)?;
        Ok(Response::new(pb::GetDependenciesResponse {
            dependencies: dependencies
                .into_iter()
                .map(|link| pb::DependencyLink {
                    parent: link.parent,
                    child: link.child,
                    call_count: link.call_count,
                })
                .collect(),
        }))
    }
}
