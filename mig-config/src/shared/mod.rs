mod base;
mod grouping;
mod orchestrator;
mod resource;

pub use base::*;
pub use grouping::*;
pub use orchestrator::*;
pub use resource::*;
