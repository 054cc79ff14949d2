pub mod repository;
pub mod commit;
pub mod report;
pub mod guide;
pub mod insights;
pub mod audit;
pub mod assistant;
pub mod media;

pub use repository::*;
pub use commit::*;
pub use report::*;
pub use guide::*;
pub use insights::*;
pub use audit::*;
pub use assistant::*;
pub use media::*;
