//! Call completion: end-of-call reports and status backfill.

pub mod booking;
pub mod payload;
pub mod reconciler;
pub mod routes;
pub mod summary;
pub mod sync;

pub use payload::{CallReport, map_structured_outputs};
pub use reconciler::{FAILED_END_REASONS, IgnoreReason, ReconcileOutcome, Reconciler, is_failed_reason};
pub use routes::{CallRouteState, call_routes};
pub use summary::SummaryMailer;
pub use sync::CallSync;
