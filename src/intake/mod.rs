//! Lead intake: inbound enquiry email → parsed lead → outbound call.

pub mod inbound;
pub mod parser;
pub mod pipeline;
pub mod routes;
pub mod timing;

pub use inbound::{EmailSender, EmailSource, OutgoingEmail, ResendClient};
pub use parser::{Enquiry, parse_enquiry};
pub use pipeline::{IntakeRunner, Pipeline, PipelineOutcome, PlacedCall};
pub use routes::{InboundRouteState, inbound_routes};
pub use timing::{Step, StepTimings};
