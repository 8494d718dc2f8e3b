pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod grpc;
pub mod registry;

pub mod proto {
    tonic::include_proto!("scripts");
}
