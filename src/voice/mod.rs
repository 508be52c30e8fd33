//! Voice agent provisioning, call placement, and the per-contact call route.

pub mod agent;
pub mod client;
pub mod dispatch;
pub mod launch;
pub mod prompt;
pub mod routes;
pub mod schema;

pub use agent::{AgentConfigManager, build_assistant_config};
pub use client::{CallRecord, VapiClient, VoicePlatform};
pub use dispatch::{Dispatcher, resolve_caller_number};
pub use launch::{CallLauncher, LaunchReport};
pub use prompt::{build_prompt, enrich_business_context};
pub use routes::{LaunchRouteState, launch_routes};
pub use schema::build_schema;
