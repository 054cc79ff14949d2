pub mod client;
pub mod gateway;
pub mod paginator;
pub mod reference;
pub mod tree;

pub use client::GitHubClient;
pub use gateway::SourceGateway;
pub use paginator::Paginator;
pub use reference::parse_reference;
pub use tree::{build_tree, render_tree};
