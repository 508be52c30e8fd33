//! `Store` trait: single async interface for campaign persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::campaign::model::{
    CallResult, Contact, ContactInsert, ContactStatus, Dealer, Notification, Organization, Project,
};
use crate::error::DatabaseError;

/// Backend-agnostic store covering projects, contacts, and notifications.
#[async_trait]
pub trait Store: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Projects ────────────────────────────────────────────────────

    async fn insert_project(&self, project: &Project) -> Result<(), DatabaseError>;

    async fn get_project(&self, id: &str) -> Result<Option<Project>, DatabaseError>;

    /// Find the project owning a provisioned voice agent.
    async fn find_project_by_assistant_id(
        &self,
        assistant_id: &str,
    ) -> Result<Option<Project>, DatabaseError>;

    async fn set_project_assistant_id(
        &self,
        project_id: &str,
        assistant_id: &str,
    ) -> Result<(), DatabaseError>;

    async fn set_project_structured_output_id(
        &self,
        project_id: &str,
        structured_output_id: &str,
    ) -> Result<(), DatabaseError>;

    /// Replace the project's enrichment text and stamp the refresh time.
    async fn update_project_context(
        &self,
        project_id: &str,
        full_context_text: &str,
        refreshed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    // ── Dealers ─────────────────────────────────────────────────────

    async fn insert_dealer(&self, dealer: &Dealer) -> Result<(), DatabaseError>;

    async fn get_dealer(&self, id: &str) -> Result<Option<Dealer>, DatabaseError>;

    /// First dealer whose forwarding inbox matches one of `addresses`
    /// (case-insensitive).
    async fn find_dealer_by_inbox(
        &self,
        addresses: &[String],
    ) -> Result<Option<Dealer>, DatabaseError>;

    // ── Organizations ───────────────────────────────────────────────

    async fn upsert_organization(&self, org: &Organization) -> Result<(), DatabaseError>;

    async fn get_organization(&self, id: &str) -> Result<Option<Organization>, DatabaseError>;

    /// Atomically add to the organization's usage counters.
    async fn increment_org_usage(
        &self,
        org_id: &str,
        calls: i64,
        minutes: f64,
    ) -> Result<(), DatabaseError>;

    // ── Contacts ────────────────────────────────────────────────────

    /// Create a pending contact, or return the existing one with the same
    /// `phone_key` in the project.
    async fn create_contact(
        &self,
        project_id: &str,
        phone: &str,
        phone_key: &str,
        name: Option<&str>,
    ) -> Result<ContactInsert, DatabaseError>;

    async fn get_contact(&self, id: &str) -> Result<Option<Contact>, DatabaseError>;

    async fn find_contact_by_phone_key(
        &self,
        project_id: &str,
        phone_key: &str,
    ) -> Result<Option<Contact>, DatabaseError>;

    async fn list_contacts_by_status(
        &self,
        project_id: &str,
        status: ContactStatus,
    ) -> Result<Vec<Contact>, DatabaseError>;

    /// Mark a contact as calling with the in-flight call handle.
    async fn mark_contact_calling(
        &self,
        contact_id: &str,
        vapi_call_id: &str,
    ) -> Result<(), DatabaseError>;

    /// Apply an end-of-call result exactly once per call handle.
    ///
    /// Sets status, result, and `last_vapi_call_id`, and appends the result
    /// to the call history (seeding it from a pre-existing result when the
    /// history is empty). Returns `false` without writing when
    /// `last_vapi_call_id` already equals `vapi_call_id` or the history
    /// already holds an entry for it.
    async fn apply_call_result(
        &self,
        contact_id: &str,
        vapi_call_id: &str,
        status: ContactStatus,
        result: &CallResult,
    ) -> Result<bool, DatabaseError>;

    /// Mark a contact failed outside the end-of-call path (backfill of stuck
    /// calls) and clear its in-flight call handle.
    ///
    /// Writes only while the contact is still `calling` with `in_flight` as
    /// its call handle. Returns `false` when that no longer holds.
    async fn mark_contact_failed(
        &self,
        contact_id: &str,
        in_flight: Option<&str>,
        result: &CallResult,
    ) -> Result<bool, DatabaseError>;

    /// Record that a call could not be placed for a contact. A contact with a
    /// call in flight is left alone; returns whether the row was written.
    async fn record_dispatch_failure(
        &self,
        contact_id: &str,
        result: &CallResult,
    ) -> Result<bool, DatabaseError>;

    // ── Notifications ───────────────────────────────────────────────

    async fn insert_notification(&self, notification: &Notification) -> Result<(), DatabaseError>;

    /// Most recent notifications first.
    async fn list_notifications(
        &self,
        org_id: &str,
        limit: u32,
    ) -> Result<Vec<Notification>, DatabaseError>;

    // ── Inbound events ──────────────────────────────────────────────

    /// Record an inbound event id. Returns `false` if it was already seen.
    async fn record_inbound_event(&self, event_id: &str) -> Result<bool, DatabaseError>;
}
