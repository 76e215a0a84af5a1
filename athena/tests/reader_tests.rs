use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;

use jaeger_athena_model::model::{Process, Span};
use jaeger_athena_model::store::{
    DependencyLink, DependencyReader, OperationQuery, ReadError, SpanReader, TraceQuery,
};
use jaeger_athena_query::client::{
    AthenaApi, QueryExecutionInfo, QueryState, QueryStatus, ResultPage,
};
use jaeger_athena_query::orchestrator::QueryOrchestrator;
use jaeger_athena_query::{sql, AthenaConfig, Reader};

fn test_config() -> AthenaConfig {
    AthenaConfig {
        database_name: "default".into(),
        spans_table_name: "jaeger_spans".into(),
        operations_table_name: "jaeger_operations".into(),
        workgroup: "jaeger".into(),
        output_location: "s3://jaeger-athena-results/".into(),
        max_span_age: Duration::from_secs(336 * 3600),
        max_trace_duration: Duration::from_secs(3600),
        services_query_ttl: Duration::from_secs(10),
        dependencies_query_ttl: Duration::from_secs(6 * 3600),
        dependencies_prefetch: false,
    }
}

fn succeeded_now() -> QueryStatus {
    QueryStatus {
        state: QueryState::Succeeded,
        state_change_reason: None,
        completion_time: Some(Utc::now()),
    }
}

fn status(state: QueryState) -> QueryStatus {
    QueryStatus {
        state,
        state_change_reason: None,
        completion_time: None,
    }
}

/// One page holding a header row followed by the given data rows, the
/// layout Athena returns for small result sets.
fn page_with_header(rows: &[&[&str]]) -> ResultPage {
    let mut all = vec![vec!["header".to_string()]];
    all.extend(
        rows.iter()
            .map(|row| row.iter().map(|cell| cell.to_string()).collect()),
    );
    ResultPage {
        rows: all,
        next_token: None,
    }
}

struct ScriptedExecution {
    id: String,
    statuses: Vec<QueryStatus>,
    pages: Vec<ResultPage>,
}

#[derive(Default)]
struct MockState {
    pending: VecDeque<ScriptedExecution>,
    statuses: HashMap<String, VecDeque<QueryStatus>>,
    pages: HashMap<String, VecDeque<ResultPage>>,
    submitted: Vec<String>,
}

#[derive(Default)]
struct MockAthena {
    state: Mutex<MockState>,
    recent: Vec<QueryExecutionInfo>,
    poll_delay: Duration,
    start_calls: AtomicUsize,
    status_calls: AtomicUsize,
    results_calls: AtomicUsize,
    list_calls: AtomicUsize,
    stop_calls: AtomicUsize,
}

impl MockAthena {
    fn new() -> Self {
        Self::default()
    }

    fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    fn with_recent(mut self, recent: Vec<QueryExecutionInfo>) -> Self {
        self.recent = recent;
        self
    }

    fn script(&self, id: &str, statuses: Vec<QueryStatus>, pages: Vec<ResultPage>) {
        self.state
            .lock()
            .unwrap()
            .pending
            .push_back(ScriptedExecution {
                id: id.to_string(),
                statuses,
                pages,
            });
    }

    fn script_success(&self, id: &str, rows: &[&[&str]]) {
        self.script(id, vec![succeeded_now()], vec![page_with_header(rows)]);
    }

    fn script_failure(&self, id: &str, reason: &str) {
        self.script(
            id,
            vec![QueryStatus {
                state: QueryState::Failed,
                state_change_reason: Some(reason.to_string()),
                completion_time: None,
            }],
            vec![],
        );
    }

    /// Registers result pages for an execution without a submission,
    /// as warmup reads results of executions started elsewhere.
    fn stash_pages(&self, id: &str, pages: Vec<ResultPage>) {
        self.state
            .lock()
            .unwrap()
            .pages
            .insert(id.to_string(), pages.into());
    }

    fn submitted(&self) -> Vec<String> {
        self.state.lock().unwrap().submitted.clone()
    }
}

#[async_trait]
impl AthenaApi for MockAthena {
    async fn start_query_execution(&self, sql: &str) -> Result<String> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        state.submitted.push(sql.to_string());
        let execution = state
            .pending
            .pop_front()
            .context("no scripted execution left")?;
        state
            .statuses
            .insert(execution.id.clone(), execution.statuses.into());
        state
            .pages
            .insert(execution.id.clone(), execution.pages.into());
        Ok(execution.id)
    }

    async fn get_query_execution(&self, id: &str) -> Result<QueryStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if !self.poll_delay.is_zero() {
            tokio::time::sleep(self.poll_delay).await;
        }
        let mut state = self.state.lock().unwrap();
        let statuses = state
            .statuses
            .get_mut(id)
            .with_context(|| format!("unknown execution {id}"))?;
        if statuses.len() > 1 {
            Ok(statuses.pop_front().unwrap())
        } else {
            statuses.front().cloned().context("no status scripted")
        }
    }

    async fn get_query_results(&self, id: &str, _next_token: Option<String>) -> Result<ResultPage> {
        self.results_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let pages = state
            .pages
            .get_mut(id)
            .with_context(|| format!("no results for execution {id}"))?;
        pages.pop_front().context("no result page left")
    }

    async fn list_recent_executions(&self) -> Result<Vec<QueryExecutionInfo>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.recent.clone())
    }

    async fn stop_query_execution(&self, _id: &str) -> Result<()> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn count(counter: &AtomicUsize) -> usize {
    counter.load(Ordering::SeqCst)
}

fn make_span(trace_id: u8, span_id: u8) -> Span {
    Span {
        trace_id: vec![trace_id],
        span_id: vec![span_id],
        operation_name: "op".into(),
        start_time: Some(prost_types::Timestamp {
            seconds: 1_485_449_191,
            nanos: 0,
        }),
        duration: Some(prost_types::Duration {
            seconds: 0,
            nanos: 1_000,
        }),
        process: Some(Process {
            service_name: "svc".into(),
            tags: vec![],
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn get_services_happy_path_fills_the_cache() {
    let mock = Arc::new(MockAthena::new());
    mock.script_success("q1", &[&["test"]]);

    let reader = Reader::new(mock.clone(), test_config()).await;
    assert_eq!(count(&mock.list_calls), 1);

    let services = reader.get_services().await.unwrap();
    assert_eq!(services, vec!["test".to_string()]);
    assert_eq!(count(&mock.start_calls), 1);
    assert_eq!(count(&mock.status_calls), 1);
    assert_eq!(count(&mock.results_calls), 1);

    // the second call replays the cached rows without touching the engine
    let again = reader.get_services().await.unwrap();
    assert_eq!(again, services);
    assert_eq!(count(&mock.start_calls), 1);
}

#[tokio::test]
async fn get_operations_preserves_row_order() {
    let mock = Arc::new(MockAthena::new());
    mock.script_success("q1", &[&["server-op", "server"], &["client-op", "client"]]);

    let reader = Reader::new(mock.clone(), test_config()).await;
    let operations = reader
        .get_operations(OperationQuery {
            service_name: "test".into(),
            span_kind: String::new(),
        })
        .await
        .unwrap();

    assert_eq!(operations.len(), 2);
    assert_eq!(operations[0].name, "server-op");
    assert_eq!(operations[0].span_kind, "server");
    assert_eq!(operations[1].name, "client-op");
    assert_eq!(operations[1].span_kind, "client");
    assert!(mock.submitted()[0].contains("service_name = 'test'"));
}

#[tokio::test]
async fn concurrent_identical_queries_submit_once() {
    let mock = Arc::new(MockAthena::new().with_poll_delay(Duration::from_millis(50)));
    mock.script_success("q1", &[&["test"]]);

    let reader = Reader::new(mock.clone(), test_config()).await;
    let (a, b) = tokio::join!(reader.get_services(), reader.get_services());
    assert_eq!(a.unwrap(), vec!["test".to_string()]);
    assert_eq!(b.unwrap(), vec!["test".to_string()]);

    assert_eq!(count(&mock.start_calls), 1);
    assert_eq!(count(&mock.status_calls), 1);
    assert_eq!(count(&mock.results_calls), 1);
}

#[tokio::test]
async fn failed_queries_surface_the_reason_and_are_not_cached() {
    let mock = Arc::new(MockAthena::new());
    mock.script_failure("q1", "SYNTAX_ERROR: mangled");

    let reader = Reader::new(mock.clone(), test_config()).await;
    let err = reader.get_services().await.unwrap_err();
    match err {
        ReadError::QueryFailed(reason) => assert!(reason.contains("SYNTAX_ERROR")),
        other => panic!("unexpected error {other:?}"),
    }

    mock.script_success("q2", &[&["test"]]);
    let services = reader.get_services().await.unwrap();
    assert_eq!(services, vec!["test".to_string()]);
    assert_eq!(count(&mock.start_calls), 2);
}

#[tokio::test]
async fn polling_continues_until_a_terminal_state() {
    let mock = Arc::new(MockAthena::new());
    mock.script(
        "q1",
        vec![
            status(QueryState::Queued),
            status(QueryState::Running),
            succeeded_now(),
        ],
        vec![page_with_header(&[&["test"]])],
    );

    let orchestrator = QueryOrchestrator::new(mock.clone());
    let rows = orchestrator
        .run_query("SELECT 1", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(*rows, vec![vec!["test".to_string()]]);
    assert_eq!(count(&mock.status_calls), 3);
}

#[tokio::test]
async fn pagination_skips_only_the_first_header_row() {
    let mock = Arc::new(MockAthena::new());
    mock.script(
        "q1",
        vec![succeeded_now()],
        vec![
            ResultPage {
                rows: vec![vec!["header".into()], vec!["r1".into()]],
                next_token: Some("t1".into()),
            },
            ResultPage {
                rows: vec![vec!["r2".into()]],
                next_token: None,
            },
        ],
    );

    let orchestrator = QueryOrchestrator::new(mock.clone());
    let rows = orchestrator
        .run_query("SELECT 1", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(
        *rows,
        vec![vec!["r1".to_string()], vec!["r2".to_string()]]
    );
    assert_eq!(count(&mock.results_calls), 2);
}

#[tokio::test]
async fn uncached_queries_submit_every_time() {
    let mock = Arc::new(MockAthena::new());
    mock.script_success("q1", &[&["a"]]);
    mock.script_success("q2", &[&["a"]]);

    let orchestrator = QueryOrchestrator::new(mock.clone());
    orchestrator
        .run_query("SELECT 1", Duration::ZERO)
        .await
        .unwrap();
    orchestrator
        .run_query("SELECT 1", Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(count(&mock.start_calls), 2);
}

#[tokio::test]
async fn abandoned_queries_are_stopped_remotely() {
    let mock = Arc::new(MockAthena::new().with_poll_delay(Duration::from_millis(100)));
    mock.script("q1", vec![status(QueryState::Running)], vec![]);

    let orchestrator = QueryOrchestrator::new(mock.clone());
    let task = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.run_query("SELECT 1", Duration::ZERO).await })
    };
    tokio::time::sleep(Duration::from_millis(150)).await;
    task.abort();

    for _ in 0..20 {
        if count(&mock.stop_calls) == 1 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("StopQueryExecution was never called");
}

#[tokio::test]
async fn get_trace_reports_missing_traces() {
    let mock = Arc::new(MockAthena::new());
    mock.script_success("q1", &[]);

    let reader = Reader::new(mock.clone(), test_config()).await;
    let err = reader.get_trace(&[0x11]).await.unwrap_err();
    assert!(matches!(err, ReadError::TraceNotFound(id) if id.ends_with("11")));
}

#[tokio::test]
async fn find_traces_assembles_spans_from_payloads() {
    let span_a = make_span(0x11, 0x01);
    let span_b = make_span(0x11, 0x02);
    let trace_id = "00000000000000000000000000000011";
    let payload_a = BASE64.encode(span_a.encode_payload());
    let payload_b = BASE64.encode(span_b.encode_payload());

    let mock = Arc::new(MockAthena::new());
    mock.script_success("ids", &[&[trace_id]]);
    mock.script_success(
        "payloads",
        &[&[trace_id, &payload_a], &[trace_id, &payload_b]],
    );

    let reader = Reader::new(mock.clone(), test_config()).await;
    let traces = reader
        .find_traces(TraceQuery {
            service_name: "svc".into(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0], vec![span_a, span_b]);
    let submitted = mock.submitted();
    assert!(submitted[1].contains(&format!("trace_id IN ('{trace_id}')")));
}

#[tokio::test]
async fn find_trace_ids_returns_raw_ids() {
    let mock = Arc::new(MockAthena::new());
    mock.script_success("q1", &[&["00000000000000000000000000000011"]]);

    let reader = Reader::new(mock.clone(), test_config()).await;
    let ids = reader
        .find_trace_ids(TraceQuery {
            service_name: "svc".into(),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(ids.len(), 1);
    assert_eq!(*ids[0].last().unwrap(), 0x11);
}

#[tokio::test]
async fn get_dependencies_decodes_call_counts() {
    let mock = Arc::new(MockAthena::new());
    mock.script_success("q1", &[&["frontend", "backend", "42"]]);

    let reader = Reader::new(mock.clone(), test_config()).await;
    let links = reader
        .get_dependencies(Utc::now(), Duration::from_secs(3600))
        .await
        .unwrap();
    assert_eq!(
        links,
        vec![DependencyLink {
            parent: "frontend".into(),
            child: "backend".into(),
            call_count: 42,
        }]
    );
}

#[tokio::test]
async fn warmup_hydrates_the_cache_from_recent_executions() {
    let config = test_config();
    let services_sql = sql::services_query(&config, Utc::now());

    let mock = Arc::new(MockAthena::new().with_recent(vec![QueryExecutionInfo {
        id: "warm".into(),
        query: services_sql,
        status: succeeded_now(),
    }]));
    mock.stash_pages("warm", vec![page_with_header(&[&["test"]])]);

    let reader = Reader::new(mock.clone(), config).await;
    assert_eq!(count(&mock.results_calls), 1);

    let services = reader.get_services().await.unwrap();
    assert_eq!(services, vec!["test".to_string()]);
    // served from the hydrated cache, no submission
    assert_eq!(count(&mock.start_calls), 0);
}

#[tokio::test]
async fn dependencies_prefetch_submits_at_startup() {
    let mock = Arc::new(MockAthena::new());
    mock.script_success("deps", &[&["frontend", "backend", "1"]]);

    let mut config = test_config();
    config.dependencies_prefetch = true;
    let _reader = Reader::new(mock.clone(), config).await;

    for _ in 0..20 {
        if count(&mock.start_calls) == 1 {
            let submitted = mock.submitted();
            assert!(submitted[0].contains("call_count"));
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("dependencies prefetch never submitted a query");
}
