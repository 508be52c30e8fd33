//! Campaign domain: projects, dealers, contacts, call results, notifications.

pub mod model;

pub use model::{
    CallHistoryEntry, CallResult, CaptureField, CaptureType, CapturedValue, Contact, ContactInsert,
    ContactStatus, Dealer, Notification, NotificationKind, Organization, Project, PromptOverrides,
};
