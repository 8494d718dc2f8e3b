//! End-to-end tests against real gRPC servers.
//!
//! Each test spawns one or more nodes on dedicated localhost ports and
//! drives them through the public client, covering local serving,
//! cluster dispatch with dead peers, and the streamed output surface.

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tonic::transport::Channel;
use tonic::Code;
use uuid::Uuid;

use scriptd::config::{PeerConfig, ServiceConfig};
use scriptd::dispatch::ScriptMultiClient;
use scriptd::error::ScriptError;
use scriptd::executor::ShellExecutor;
use scriptd::grpc::convert::status_from_proto;
use scriptd::grpc::{GrpcServer, ScriptNodeClient};
use scriptd::proto::script_service_client::ScriptServiceClient;
use scriptd::proto::{
    GetRunStatusRequest, GetRunsStatusRequest, RunOutputRequest, RunScriptRequest, TargetRule,
};
use scriptd::registry::{RunRegistry, RunState, RunStatus};

/// One running node plus the scripts directory backing it.
struct TestNode {
    addr: String,
    _scripts: TempDir,
    handle: JoinHandle<()>,
}

impl TestNode {
    /// Start a node on `port` with the given scripts on disk. `peers`
    /// lists the cluster candidate set (include the node's own address to
    /// have it participate in fan-outs).
    async fn start(port: u16, peers: &[u16], scripts: &[(&str, &str)]) -> Self {
        let scripts_dir = tempfile::tempdir().expect("create scripts dir");
        for (name, body) in scripts {
            std::fs::write(scripts_dir.path().join(name), body).expect("write script");
        }

        let addr = format!("127.0.0.1:{}", port);
        let mut config = ServiceConfig::new(addr.clone(), addr.parse().unwrap());
        config.scripts_root = scripts_dir.path().to_path_buf();
        config.peers = peers
            .iter()
            .map(|p| PeerConfig {
                addr: format!("127.0.0.1:{}", p),
                groups: Vec::new(),
            })
            .collect();
        config.fanout_timeout = Duration::from_secs(2);

        let executor = Arc::new(ShellExecutor::new(config.scripts_root.clone()));
        let registry = Arc::new(RunRegistry::new(&config, executor));
        let server = GrpcServer::new(config, registry);
        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });

        let node = Self {
            addr,
            _scripts: scripts_dir,
            handle,
        };
        // Block until the server accepts connections.
        node.connect().await;
        node
    }

    async fn connect(&self) -> ScriptServiceClient<Channel> {
        for _ in 0..50 {
            if let Ok(channel) = Channel::from_shared(format!("http://{}", self.addr))
                .unwrap()
                .connect()
                .await
            {
                return ScriptServiceClient::new(channel);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("server at {} never came up", self.addr);
    }
}

impl Drop for TestNode {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn run_request(name: &str, rule: TargetRule) -> RunScriptRequest {
    RunScriptRequest {
        name: name.to_string(),
        variables: Default::default(),
        group: String::new(),
        rule: rule as i32,
        local: false,
    }
}

async fn poll_until_terminal(
    client: &mut ScriptServiceClient<Channel>,
    run_id: &str,
) -> RunStatus {
    for _ in 0..100 {
        let info = client
            .get_run_status(GetRunStatusRequest {
                run_id: run_id.to_string(),
                local: false,
            })
            .await
            .expect("status lookup")
            .into_inner();
        let status = status_from_proto(info).expect("decode status");
        if status.state.is_terminal() {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("run {} never reached a terminal state", run_id);
}

async fn read_out(client: &mut ScriptServiceClient<Channel>, run_id: &str) -> String {
    let mut stream = client
        .get_run_out(RunOutputRequest {
            run_id: run_id.to_string(),
            local: false,
        })
        .await
        .expect("output lookup")
        .into_inner();
    let mut text = Vec::new();
    while let Some(chunk) = stream.message().await.expect("output stream") {
        text.extend(chunk.content);
    }
    String::from_utf8(text).expect("utf-8 output")
}

// ---------------------------------------------------------------------------
// Single node
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_single_node_run_round_trip() {
    let node = TestNode::start(53151, &[], &[("hello.sh", "echo \"hi $NAME\"\n")]).await;
    let mut client = node.connect().await;

    let mut request = run_request("hello.sh", TargetRule::One);
    request
        .variables
        .insert("NAME".to_string(), "\"world\"".to_string());

    let response = client.run_script(request).await.unwrap().into_inner();
    assert_eq!(response.statuses.len(), 1);
    let submitted = status_from_proto(response.statuses[0].clone()).unwrap();
    assert_eq!(submitted.node, node.addr);
    assert_eq!(
        submitted.status_path,
        format!("{}/scripts/status/{}", node.addr, submitted.uuid)
    );

    let run_id = submitted.uuid.to_string();
    let finished = poll_until_terminal(&mut client, &run_id).await;
    assert_eq!(finished.state, RunState::Terminated);
    assert!(finished.start_time.is_some());
    assert!(finished.end_time.is_some());
    assert_eq!(finished.bindings["NAME"], serde_json::json!("world"));

    assert_eq!(read_out(&mut client, &run_id).await, "hi world\n");
}

#[tokio::test]
async fn test_unknown_script_is_rejected_at_submission() {
    let node = TestNode::start(53161, &[], &[("real.sh", "true\n")]).await;
    let mut client = node.connect().await;

    let status = client
        .run_script(run_request("ghost.sh", TargetRule::One))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}

#[tokio::test]
async fn test_unknown_run_id_is_not_found() {
    let node = TestNode::start(53171, &[], &[("real.sh", "true\n")]).await;
    let mut client = node.connect().await;

    let status = client
        .get_run_status(GetRunStatusRequest {
            run_id: Uuid::now_v7().to_string(),
            local: false,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);

    let status = client
        .get_run_status(GetRunStatusRequest {
            run_id: "not-a-uuid".to_string(),
            local: false,
        })
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
}

// ---------------------------------------------------------------------------
// Cluster dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_one_rule_survives_a_dead_peer() {
    // Candidate set is this node plus a port nothing listens on.
    let node = TestNode::start(53181, &[53181, 53189], &[("job.sh", "echo ran\n")]).await;
    let mut client = node.connect().await;

    let response = client
        .run_script(run_request("job.sh", TargetRule::One))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.statuses.len(), 1);
    let submitted = status_from_proto(response.statuses[0].clone()).unwrap();
    assert_eq!(submitted.node, node.addr);

    // The point lookup fans out over the same candidate set; the dead
    // peer must not mask the owner.
    let run_id = submitted.uuid.to_string();
    let finished = poll_until_terminal(&mut client, &run_id).await;
    assert_eq!(finished.state, RunState::Terminated);
    assert_eq!(read_out(&mut client, &run_id).await, "ran\n");
}

#[tokio::test]
async fn test_all_rule_runs_on_every_node() {
    let peers = [53201, 53202];
    let node_a = TestNode::start(53201, &peers, &[("fan.sh", "echo from-a\n")]).await;
    let node_b = TestNode::start(53202, &peers, &[("fan.sh", "echo from-b\n")]).await;
    let mut client = node_a.connect().await;

    let response = client
        .run_script(run_request("fan.sh", TargetRule::All))
        .await
        .unwrap()
        .into_inner();

    let mut nodes: Vec<String> = response
        .statuses
        .iter()
        .map(|s| s.node.clone())
        .collect();
    nodes.sort();
    assert_eq!(nodes, vec![node_a.addr.clone(), node_b.addr.clone()]);

    for info in &response.statuses {
        poll_until_terminal(&mut client, &info.run_id).await;
    }

    // The cluster-wide listing merges both nodes' registries.
    let listed = client
        .get_runs_status(GetRunsStatusRequest { local: false })
        .await
        .unwrap()
        .into_inner();
    assert_eq!(listed.statuses.len(), 2);
}

#[tokio::test]
async fn test_point_lookup_with_only_unreachable_candidates() {
    let multi = ScriptMultiClient::new(vec![
        ScriptNodeClient::new("127.0.0.1:53198"),
        ScriptNodeClient::new("127.0.0.1:53199"),
    ]);

    // Unreachable candidates cannot own the run, so the aggregate is a
    // plain not-found rather than a service failure.
    let err = multi.run_status(Uuid::now_v7()).await.unwrap_err();
    assert!(matches!(err, ScriptError::RunNotFound(_)));
}
