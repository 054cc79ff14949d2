pub mod analysis;
pub mod budget;
pub mod cache;
pub mod config;
pub mod error;
pub mod github;
pub mod llm;
pub mod models;
pub mod storage;

pub use analysis::{Orchestrator, RunHandle, RunState, Stage};
pub use budget::RequestBudget;
pub use cache::ResultCache;
pub use config::{Config, PipelineConfig};
pub use error::{Error, ErrorClassifier, ErrorKind, Result};
pub use github::{parse_reference, GitHubClient, SourceGateway};
pub use llm::{AnalysisGateway, GatewayConfig, GeminiProvider, LLMProvider};
pub use storage::{RecordStore, SqliteRecordStore};
