pub mod api;
pub mod config;
pub mod context;
pub mod llm;
pub mod orchestrator;
pub mod schemas;
pub mod session;
pub mod shutdown;
pub mod state;
pub mod storage;
pub mod tools;

pub use api::build_router;
