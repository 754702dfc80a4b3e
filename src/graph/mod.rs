pub mod builder;
pub mod detector;
pub mod types;

pub use builder::{GraphBuilder, GraphSnapshot};
pub use detector::{Opportunity, OpportunityDetector};
pub use types::EdgeData;
