//! The persistent job tree: records, statuses, submission specs, flow
//! classification, per-table planning, and the tree state machine.

pub mod record;
pub mod registry;
pub mod spec;
pub mod status;
pub mod table;
pub mod tree;

pub use record::{JobId, JobRecord, generate_job_id};
pub use registry::{FlowRegistry, FlowSpec};
pub use spec::{JobSpec, PartitionFilter};
pub use status::JobStatus;
pub use tree::JobTree;
