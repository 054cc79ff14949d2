pub mod provider;
pub mod gemini;
pub mod prompts;
pub mod parser;
pub mod gateway;

pub use provider::{GenerationRequest, LLMProvider};
pub use gemini::GeminiProvider;
pub use prompts::RepoContext;
pub use gateway::{AnalysisGateway, GatewayConfig, Operation};
