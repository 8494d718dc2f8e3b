use std::net::SocketAddr;
use std::sync::Arc;

use tonic::transport::Server;

use crate::config::ServiceConfig;
use crate::grpc::service::NodeService;
use crate::proto::script_service_server::ScriptServiceServer;
use crate::registry::RunRegistry;

pub struct GrpcServer {
    addr: SocketAddr,
    service: NodeService,
}

impl GrpcServer {
    pub fn new(config: ServiceConfig, registry: Arc<RunRegistry>) -> Self {
        Self {
            addr: config.listen_addr,
            service: NodeService::new(config, registry),
        }
    }

    pub async fn run(self) -> Result<(), tonic::transport::Error> {
        tracing::info!(addr = %self.addr, "Starting gRPC server");

        Server::builder()
            .add_service(ScriptServiceServer::new(self.service))
            .serve(self.addr)
            .await
    }
}
