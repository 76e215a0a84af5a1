//! AWS SDK-backed implementation of [`AthenaApi`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use aws_sdk_athena::types::{
    QueryExecutionContext, QueryExecutionState, QueryExecutionStatus, ResultConfiguration,
};
use chrono::DateTime;

use crate::client::{AthenaApi, QueryExecutionInfo, QueryState, QueryStatus, ResultPage};

// BatchGetQueryExecution accepts at most 50 ids per call.
const MAX_BATCH_GET_IDS: usize = 50;

/// Fixed submission targets of every query this process issues.
#[derive(Debug, Clone)]
pub struct AthenaTargets {
    pub database: String,
    pub workgroup: String,
    pub output_location: String,
}

pub struct SdkAthena {
    client: aws_sdk_athena::Client,
    targets: AthenaTargets,
}

impl SdkAthena {
    pub fn new(client: aws_sdk_athena::Client, targets: AthenaTargets) -> Self {
        Self { client, targets }
    }
}

fn convert_status(status: &QueryExecutionStatus) -> Result<QueryStatus> {
    let state = match status.state().context("query execution has no state")? {
        QueryExecutionState::Queued => QueryState::Queued,
        QueryExecutionState::Running => QueryState::Running,
        QueryExecutionState::Succeeded => QueryState::Succeeded,
        QueryExecutionState::Failed => QueryState::Failed,
        QueryExecutionState::Cancelled => QueryState::Cancelled,
        other => bail!("unhandled query execution state {other:?}"),
    };
    let completion_time = status
        .completion_date_time()
        .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos()));
    Ok(QueryStatus {
        state,
        state_change_reason: status.state_change_reason().map(str::to_string),
        completion_time,
    })
}

#[async_trait]
impl AthenaApi for SdkAthena {
    async fn start_query_execution(&self, sql: &str) -> Result<String> {
        let output = self
            .client
            .start_query_execution()
            .query_string(sql)
            .work_group(&self.targets.workgroup)
            .query_execution_context(
                QueryExecutionContext::builder()
                    .database(&self.targets.database)
                    .build(),
            )
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(&self.targets.output_location)
                    .build(),
            )
            .send()
            .await
            .with_context(|| "StartQueryExecution")?;
        output
            .query_execution_id()
            .map(str::to_string)
            .context("StartQueryExecution returned no execution id")
    }

    async fn get_query_execution(&self, id: &str) -> Result<QueryStatus> {
        let output = self
            .client
            .get_query_execution()
            .query_execution_id(id)
            .send()
            .await
            .with_context(|| "GetQueryExecution")?;
        let status = output
            .query_execution()
            .and_then(|e| e.status())
            .context("query execution has no status")?;
        convert_status(status)
    }

    async fn get_query_results(
        &self,
        id: &str,
        next_token: Option<String>,
    ) -> Result<ResultPage> {
        let mut request = self.client.get_query_results().query_execution_id(id);
        if let Some(token) = next_token {
            request = request.next_token(token);
        }
        let output = request.send().await.with_context(|| "GetQueryResults")?;
        let rows = output
            .result_set()
            .map(|set| {
                set.rows()
                    .iter()
                    .map(|row| {
                        row.data()
                            .iter()
                            .map(|datum| datum.var_char_value().unwrap_or_default().to_string())
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(ResultPage {
            rows,
            next_token: output.next_token().map(str::to_string),
        })
    }

    async fn list_recent_executions(&self) -> Result<Vec<QueryExecutionInfo>> {
        let listed = self
            .client
            .list_query_executions()
            .work_group(&self.targets.workgroup)
            .send()
            .await
            .with_context(|| "ListQueryExecutions")?;
        let ids: Vec<String> = listed
            .query_execution_ids()
            .iter()
            .take(MAX_BATCH_GET_IDS)
            .cloned()
            .collect();
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let batch = self
            .client
            .batch_get_query_execution()
            .set_query_execution_ids(Some(ids))
            .send()
            .await
            .with_context(|| "BatchGetQueryExecution")?;
        let mut executions = Vec::new();
        for execution in batch.query_executions() {
            let (Some(id), Some(query), Some(status)) = (
                execution.query_execution_id(),
                execution.query(),
                execution.status(),
            ) else {
                continue;
            };
            executions.push(QueryExecutionInfo {
                id: id.to_string(),
                query: query.to_string(),
                status: convert_status(status)?,
            });
        }
        Ok(executions)
    }

    async fn stop_query_execution(&self, id: &str) -> Result<()> {
        self.client
            .stop_query_execution()
            .query_execution_id(id)
            .send()
            .await
            .with_context(|| "StopQueryExecution")?;
        Ok(())
    }
}
