use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Status};
use uuid::Uuid;

use crate::dispatch::{Outcome, ScriptNode, TargetRule};
use crate::error::ScriptError;
use crate::grpc::convert::{encode_variables, rule_to_proto, status_from_proto};
use crate::proto::script_service_client::ScriptServiceClient;
use crate::proto::{GetRunStatusRequest, GetRunsStatusRequest, RunOutputRequest, RunScriptRequest};
use crate::registry::RunStatus;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Thin proxy for one remote endpoint.
///
/// Transport failures are translated here, once, into the outcome
/// taxonomy the dispatcher's reducer consumes:
/// - a NotFound reply is `NotFound`;
/// - for point lookups an unreachable endpoint is also `NotFound`, since
///   a node that cannot be reached cannot be the owner of the run;
/// - for submissions and listings an unreachable endpoint is `Failed`,
///   because work was actually requested of it;
/// - every other error is `Failed`.
#[derive(Clone)]
pub struct ScriptNodeClient {
    addr: String,
    connect_timeout: Duration,
}

impl ScriptNodeClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn connect(&self) -> Result<ScriptServiceClient<Channel>, ScriptError> {
        let endpoint = Endpoint::from_shared(format!("http://{}", self.addr))?;
        let channel = endpoint
            .connect_timeout(self.connect_timeout)
            .connect()
            .await?;
        Ok(ScriptServiceClient::new(channel))
    }
}

fn classify<T>(result: Result<T, Status>) -> Outcome<T> {
    match result {
        Ok(value) => Outcome::Success(value),
        Err(status) if status.code() == Code::NotFound => Outcome::NotFound,
        Err(status) => Outcome::Failed(ScriptError::Grpc(status)),
    }
}

#[tonic::async_trait]
impl ScriptNode for ScriptNodeClient {
    fn address(&self) -> &str {
        &self.addr
    }

    async fn submit(
        &self,
        name: String,
        variables: Arc<HashMap<String, Value>>,
        rule: TargetRule,
    ) -> Outcome<Vec<RunStatus>> {
        let mut client = match self.connect().await {
            Ok(client) => client,
            Err(e) => return Outcome::Failed(e),
        };
        let request = RunScriptRequest {
            name,
            variables: encode_variables(&variables),
            group: String::new(),
            rule: rule_to_proto(rule) as i32,
            local: true,
        };
        match classify(client.run_script(request).await) {
            Outcome::Success(response) => {
                let statuses: Result<Vec<_>, _> = response
                    .into_inner()
                    .statuses
                    .into_iter()
                    .map(status_from_proto)
                    .collect();
                match statuses {
                    Ok(statuses) => Outcome::Success(statuses),
                    Err(e) => Outcome::Failed(e),
                }
            }
            Outcome::NotFound => Outcome::NotFound,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    async fn status(&self, run_id: Uuid) -> Outcome<RunStatus> {
        let mut client = match self.connect().await {
            Ok(client) => client,
            Err(_) => return Outcome::NotFound,
        };
        let request = GetRunStatusRequest {
            run_id: run_id.to_string(),
            local: true,
        };
        match classify(client.get_run_status(request).await) {
            Outcome::Success(response) => match status_from_proto(response.into_inner()) {
                Ok(status) => Outcome::Success(status),
                Err(e) => Outcome::Failed(e),
            },
            Outcome::NotFound => Outcome::NotFound,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }

    async fn out(&self, run_id: Uuid) -> Outcome<String> {
        let mut client = match self.connect().await {
            Ok(client) => client,
            Err(_) => return Outcome::NotFound,
        };
        let request = RunOutputRequest {
            run_id: run_id.to_string(),
            local: true,
        };
        collect_stream(client.get_run_out(request).await).await
    }

    async fn err(&self, run_id: Uuid) -> Outcome<String> {
        let mut client = match self.connect().await {
            Ok(client) => client,
            Err(_) => return Outcome::NotFound,
        };
        let request = RunOutputRequest {
            run_id: run_id.to_string(),
            local: true,
        };
        collect_stream(client.get_run_err(request).await).await
    }

    async fn list(&self) -> Outcome<HashMap<Uuid, RunStatus>> {
        let mut client = match self.connect().await {
            Ok(client) => client,
            Err(e) => return Outcome::Failed(e),
        };
        match classify(client.get_runs_status(GetRunsStatusRequest { local: true }).await) {
            Outcome::Success(response) => {
                let mut statuses = HashMap::new();
                for (_, info) in response.into_inner().statuses {
                    match status_from_proto(info) {
                        Ok(status) => {
                            statuses.insert(status.uuid, status);
                        }
                        Err(e) => return Outcome::Failed(e),
                    }
                }
                Outcome::Success(statuses)
            }
            Outcome::NotFound => Outcome::NotFound,
            Outcome::Failed(e) => Outcome::Failed(e),
        }
    }
}

/// Drain a server-streaming output response into one string.
async fn collect_stream(
    response: Result<tonic::Response<tonic::Streaming<crate::proto::RunOutputChunk>>, Status>,
) -> Outcome<String> {
    let mut stream = match classify(response) {
        Outcome::Success(response) => response.into_inner(),
        Outcome::NotFound => return Outcome::NotFound,
        Outcome::Failed(e) => return Outcome::Failed(e),
    };

    let mut buffer = Vec::new();
    loop {
        match stream.message().await {
            Ok(Some(chunk)) => buffer.extend(chunk.content),
            Ok(None) => break,
            Err(status) if status.code() == Code::NotFound => return Outcome::NotFound,
            Err(status) => return Outcome::Failed(ScriptError::Grpc(status)),
        }
    }
    Outcome::Success(String::from_utf8_lossy(&buffer).into_owned())
}
