pub mod client;
pub mod convert;
pub mod server;
pub mod service;

pub use client::ScriptNodeClient;
pub use server::GrpcServer;
pub use service::NodeService;
