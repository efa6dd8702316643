pub mod content;
pub mod processed;
pub mod record;

pub use content::*;
pub use processed::{ProcessedEntry, ProcessingStage, RouteFilteredPayload, StagePayload};
pub use record::*;

pub(crate) use processed::{remaining_until, to_chrono};
