use std::pin::Pin;
use std::sync::Arc;

use tokio_stream::wrappers::ReceiverStream;
use tonic::{Request, Response, Status};
use uuid::Uuid;

use crate::config::ServiceConfig;
use crate::dispatch::ScriptMultiClient;
use crate::grpc::client::ScriptNodeClient;
use crate::grpc::convert::{decode_variables, rule_from_proto, status_to_proto};
use crate::proto::script_service_server::ScriptService;
use crate::proto::{
    GetRunStatusRequest, GetRunsStatusRequest, GetRunsStatusResponse, RunOutputChunk,
    RunOutputRequest, RunScriptRequest, RunScriptResponse, RunStatusInfo,
};
use crate::registry::{RunRegistry, RunStatus};

const OUTPUT_CHUNK_SIZE: usize = 32 * 1024;

type OutputStream = Pin<Box<dyn tokio_stream::Stream<Item = Result<RunOutputChunk, Status>> + Send>>;

/// gRPC surface of one node.
///
/// Requests with `local` set (or on a node without peers) are served from
/// the node's own registry; everything else is dispatched across the
/// configured candidate set with `local=true`, so a forwarded request
/// never fans out a second time.
pub struct NodeService {
    config: ServiceConfig,
    registry: Arc<RunRegistry>,
}

impl NodeService {
    pub fn new(config: ServiceConfig, registry: Arc<RunRegistry>) -> Self {
        Self { config, registry }
    }

    fn serve_locally(&self, local: bool) -> bool {
        local || self.config.peers.is_empty()
    }

    /// Candidate set for one cluster-wide request.
    fn multi_client(&self, group: Option<&str>) -> ScriptMultiClient<ScriptNodeClient> {
        let clients = self
            .config
            .candidates(group)
            .into_iter()
            .map(ScriptNodeClient::new)
            .collect();
        ScriptMultiClient::new(clients).with_fanout_timeout(self.config.fanout_timeout)
    }
}

fn parse_run_id(raw: &str) -> Result<Uuid, Status> {
    Uuid::parse_str(raw).map_err(|_| Status::invalid_argument("Invalid run ID"))
}

fn stream_text(text: String) -> Response<OutputStream> {
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    tokio::spawn(async move {
        let bytes = text.into_bytes();
        for chunk in bytes.chunks(OUTPUT_CHUNK_SIZE) {
            let message = RunOutputChunk {
                content: chunk.to_vec(),
            };
            if tx.send(Ok(message)).await.is_err() {
                // Client disconnected
                break;
            }
        }
    });
    Response::new(Box::pin(ReceiverStream::new(rx)) as OutputStream)
}

fn statuses_response(statuses: Vec<RunStatus>) -> Response<RunScriptResponse> {
    Response::new(RunScriptResponse {
        statuses: statuses.iter().map(status_to_proto).collect(),
    })
}

#[tonic::async_trait]
impl ScriptService for NodeService {
    type GetRunOutStream = OutputStream;
    type GetRunErrStream = OutputStream;

    async fn run_script(
        &self,
        request: Request<RunScriptRequest>,
    ) -> Result<Response<RunScriptResponse>, Status> {
        let req = request.into_inner();
        if req.name.trim().is_empty() {
            return Err(Status::invalid_argument("Script name cannot be empty"));
        }
        let variables = decode_variables(req.variables);

        if self.serve_locally(req.local) {
            let status = self.registry.submit_async(&req.name, variables).await?;
            return Ok(statuses_response(vec![status]));
        }

        let group = (!req.group.is_empty()).then_some(req.group.clone());
        let statuses = self
            .multi_client(group.as_deref())
            .submit(&req.name, variables, rule_from_proto(req.rule))
            .await?;
        Ok(statuses_response(statuses))
    }

    async fn get_run_status(
        &self,
        request: Request<GetRunStatusRequest>,
    ) -> Result<Response<RunStatusInfo>, Status> {
        let req = request.into_inner();
        let run_id = parse_run_id(&req.run_id)?;

        let status = if self.serve_locally(req.local) {
            self.registry.lookup(&run_id).await?.status().await
        } else {
            self.multi_client(None).run_status(run_id).await?
        };
        Ok(Response::new(status_to_proto(&status)))
    }

    async fn get_run_out(
        &self,
        request: Request<RunOutputRequest>,
    ) -> Result<Response<Self::GetRunOutStream>, Status> {
        let req = request.into_inner();
        let run_id = parse_run_id(&req.run_id)?;

        let text = if self.serve_locally(req.local) {
            self.registry.lookup(&run_id).await?.out().await
        } else {
            self.multi_client(None).run_out(run_id).await?
        };
        Ok(stream_text(text))
    }

    async fn get_run_err(
        &self,
        request: Request<RunOutputRequest>,
    ) -> Result<Response<Self::GetRunErrStream>, Status> {
        let req = request.into_inner();
        let run_id = parse_run_id(&req.run_id)?;

        let text = if self.serve_locally(req.local) {
            self.registry.lookup(&run_id).await?.err().await
        } else {
            self.multi_client(None).run_err(run_id).await?
        };
        Ok(stream_text(text))
    }

    async fn get_runs_status(
        &self,
        request: Request<GetRunsStatusRequest>,
    ) -> Result<Response<GetRunsStatusResponse>, Status> {
        let req = request.into_inner();

        let statuses = if self.serve_locally(req.local) {
            self.registry.list_statuses().await
        } else {
            self.multi_client(None).list_statuses().await?
        };
        Ok(Response::new(GetRunsStatusResponse {
            statuses: statuses
                .iter()
                .map(|(id, status)| (id.to_string(), status_to_proto(status)))
                .collect(),
        }))
    }
}
