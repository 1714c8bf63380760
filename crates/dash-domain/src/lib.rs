mod errors;
mod normalize;
mod records;

pub use errors::DomainError;
pub use normalize::{escape_argv, normalize, undot, EventShape, FieldFailure, Normalized};
pub use records::{AttrValue, RawEvent, WorkflowHostMap, WorkflowRecord, WorkflowState, WorkflowStateRecord};
