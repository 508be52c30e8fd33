//! libSQL backend: async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. Structured fields (capture
//! fields, overrides, call results, history) are stored as JSON text.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::campaign::model::{
    CallHistoryEntry, CallResult, Contact, ContactInsert, ContactStatus, Dealer, Notification,
    NotificationKind, Organization, Project,
};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Store;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run a single-row query and map it, or return `None`.
    async fn query_one<T>(
        &self,
        op: &str,
        sql: &str,
        params: impl libsql::params::IntoParams,
        map: fn(&libsql::Row) -> Result<T, DatabaseError>,
    ) -> Result<Option<T>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(sql, params)
            .await
            .map_err(|e| DatabaseError::Query(format!("{op}: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(map(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("{op}: {e}"))),
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, DatabaseError> {
    serde_json::to_string(value).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

/// Decode a JSON column, falling back to the type's default on NULL or bad data.
fn from_json_or_default<T: serde::de::DeserializeOwned + Default>(raw: Option<String>) -> T {
    raw.and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

fn row_err(op: &str, e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("{op} row parse: {e}"))
}

/// Read a numeric column that may hold INTEGER or REAL.
fn get_f64(row: &libsql::Row, idx: i32) -> f64 {
    match row.get_value(idx) {
        Ok(libsql::Value::Real(f)) => f,
        Ok(libsql::Value::Integer(i)) => i as f64,
        _ => 0.0,
    }
}

/// Column order: see PROJECT_COLUMNS.
fn row_to_project(row: &libsql::Row) -> Result<Project, DatabaseError> {
    let op = "project";
    let created: String = row.get(18).map_err(|e| row_err(op, e))?;
    let updated: String = row.get(19).map_err(|e| row_err(op, e))?;
    let refreshed: Option<String> = row.get(15).ok();

    Ok(Project {
        id: row.get(0).map_err(|e| row_err(op, e))?,
        org_id: row.get(1).map_err(|e| row_err(op, e))?,
        name: row.get(2).map_err(|e| row_err(op, e))?,
        dealer_id: row.get(3).ok(),
        agent_name: row.get(4).ok(),
        agent_company: row.get(5).ok(),
        agent_number: row.get(6).ok(),
        business_context: row.get(7).ok(),
        agent_instructions: row.get(8).ok(),
        goal: row.get(9).ok(),
        tone: row.get(10).ok(),
        questions: from_json_or_default(row.get(11).ok()),
        capture_fields: from_json_or_default(row.get(12).ok()),
        prompt_overrides: from_json_or_default(row.get(13).ok()),
        full_context_text: row.get(14).ok(),
        context_refreshed_at: parse_optional_datetime(&refreshed),
        assistant_id: row.get(16).ok(),
        structured_output_id: row.get(17).ok(),
        email_update: row.get(20).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_dealer(row: &libsql::Row) -> Result<Dealer, DatabaseError> {
    let op = "dealer";
    Ok(Dealer {
        id: row.get(0).map_err(|e| row_err(op, e))?,
        org_id: row.get(1).map_err(|e| row_err(op, e))?,
        name: row.get(2).map_err(|e| row_err(op, e))?,
        forwarding_email: row.get(3).ok(),
        project_id: row.get(4).ok(),
        address: row.get(5).ok(),
        phone_number: row.get(6).ok(),
        email: row.get(7).ok(),
        operation_hours: row.get(8).ok(),
        address_pronunciation_notes: row.get(9).ok(),
        call_updates_email: row.get(10).ok(),
    })
}

fn row_to_organization(row: &libsql::Row) -> Result<Organization, DatabaseError> {
    let op = "organization";
    Ok(Organization {
        id: row.get(0).map_err(|e| row_err(op, e))?,
        name: row.get(1).map_err(|e| row_err(op, e))?,
        caller_number_id: row.get(2).ok(),
        calls_used: row.get(3).unwrap_or(0),
        minutes_used: get_f64(row, 4),
    })
}

/// Column order: see CONTACT_COLUMNS.
fn row_to_contact(row: &libsql::Row) -> Result<Contact, DatabaseError> {
    let op = "contact";
    let status_str: String = row.get(5).map_err(|e| row_err(op, e))?;
    let created: String = row.get(10).map_err(|e| row_err(op, e))?;
    let updated: String = row.get(11).map_err(|e| row_err(op, e))?;
    let call_result: Option<String> = row.get(6).ok();
    let call_history: Option<String> = row.get(7).ok();

    Ok(Contact {
        id: row.get(0).map_err(|e| row_err(op, e))?,
        project_id: row.get(1).map_err(|e| row_err(op, e))?,
        phone: row.get(2).map_err(|e| row_err(op, e))?,
        phone_key: row.get(3).map_err(|e| row_err(op, e))?,
        name: row.get(4).ok(),
        status: status_str.parse().unwrap_or_default(),
        call_result: call_result.and_then(|s| serde_json::from_str(&s).ok()),
        call_history: from_json_or_default::<Vec<CallHistoryEntry>>(call_history),
        last_vapi_call_id: row.get(8).ok(),
        vapi_call_id: row.get(9).ok(),
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
    })
}

fn row_to_notification(row: &libsql::Row) -> Result<Notification, DatabaseError> {
    let op = "notification";
    let kind_str: String = row.get(2).map_err(|e| row_err(op, e))?;
    let read: i64 = row.get(5).unwrap_or(0);
    let metadata: Option<String> = row.get(6).ok();
    let created: String = row.get(7).map_err(|e| row_err(op, e))?;

    Ok(Notification {
        id: row.get(0).map_err(|e| row_err(op, e))?,
        org_id: row.get(1).map_err(|e| row_err(op, e))?,
        kind: kind_str
            .parse::<NotificationKind>()
            .map_err(DatabaseError::Serialization)?,
        title: row.get(3).map_err(|e| row_err(op, e))?,
        message: row.get(4).map_err(|e| row_err(op, e))?,
        read: read != 0,
        metadata: metadata
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or(serde_json::Value::Null),
        created_at: parse_datetime(&created),
    })
}

// ── Trait implementation ────────────────────────────────────────────

const PROJECT_COLUMNS: &str = "id, org_id, name, dealer_id, agent_name, agent_company, agent_number, \
     business_context, agent_instructions, goal, tone, questions, capture_fields, prompt_overrides, \
     full_context_text, context_refreshed_at, assistant_id, structured_output_id, created_at, updated_at, \
     email_update";

const DEALER_COLUMNS: &str = "id, org_id, name, forwarding_email, project_id, address, phone_number, \
     email, operation_hours, address_pronunciation_notes, call_updates_email";

const ORGANIZATION_COLUMNS: &str = "id, name, caller_number_id, calls_used, minutes_used";

const CONTACT_COLUMNS: &str = "id, project_id, phone, phone_key, name, status, call_result, \
     call_history, last_vapi_call_id, vapi_call_id, created_at, updated_at";

const NOTIFICATION_COLUMNS: &str = "id, org_id, kind, title, message, read, metadata, created_at";

#[async_trait]
impl Store for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Projects ────────────────────────────────────────────────────

    async fn insert_project(&self, project: &Project) -> Result<(), DatabaseError> {
        let questions = to_json(&project.questions)?;
        let capture_fields = to_json(&project.capture_fields)?;
        let overrides = to_json(&project.prompt_overrides)?;
        let refreshed = project.context_refreshed_at.map(|t| t.to_rfc3339());

        self.conn()
            .execute(
                &format!(
                    "INSERT INTO projects ({PROJECT_COLUMNS}) VALUES \
                     (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)"
                ),
                params![
                    project.id.as_str(),
                    project.org_id.as_str(),
                    project.name.as_str(),
                    opt_text(project.dealer_id.as_deref()),
                    opt_text(project.agent_name.as_deref()),
                    opt_text(project.agent_company.as_deref()),
                    opt_text(project.agent_number.as_deref()),
                    opt_text(project.business_context.as_deref()),
                    opt_text(project.agent_instructions.as_deref()),
                    opt_text(project.goal.as_deref()),
                    opt_text(project.tone.as_deref()),
                    questions,
                    capture_fields,
                    overrides,
                    opt_text(project.full_context_text.as_deref()),
                    opt_text(refreshed.as_deref()),
                    opt_text(project.assistant_id.as_deref()),
                    opt_text(project.structured_output_id.as_deref()),
                    project.created_at.to_rfc3339(),
                    project.updated_at.to_rfc3339(),
                    opt_text(project.email_update.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_project: {e}")))?;

        debug!(project_id = %project.id, "Inserted project");
        Ok(())
    }

    async fn get_project(&self, id: &str) -> Result<Option<Project>, DatabaseError> {
        self.query_one(
            "get_project",
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?1"),
            params![id],
            row_to_project,
        )
        .await
    }

    async fn find_project_by_assistant_id(
        &self,
        assistant_id: &str,
    ) -> Result<Option<Project>, DatabaseError> {
        self.query_one(
            "find_project_by_assistant_id",
            &format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE assistant_id = ?1 LIMIT 1"),
            params![assistant_id],
            row_to_project,
        )
        .await
    }

    async fn set_project_assistant_id(
        &self,
        project_id: &str,
        assistant_id: &str,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE projects SET assistant_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![assistant_id, now, project_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_project_assistant_id: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "project".into(),
                id: project_id.to_string(),
            });
        }
        Ok(())
    }

    async fn set_project_structured_output_id(
        &self,
        project_id: &str,
        structured_output_id: &str,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE projects SET structured_output_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![structured_output_id, now, project_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_project_structured_output_id: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "project".into(),
                id: project_id.to_string(),
            });
        }
        Ok(())
    }

    async fn update_project_context(
        &self,
        project_id: &str,
        full_context_text: &str,
        refreshed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let refreshed = refreshed_at.to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE projects SET full_context_text = ?1, context_refreshed_at = ?2, updated_at = ?2 \
                 WHERE id = ?3",
                params![full_context_text, refreshed, project_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_project_context: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "project".into(),
                id: project_id.to_string(),
            });
        }
        Ok(())
    }

    // ── Dealers ─────────────────────────────────────────────────────

    async fn insert_dealer(&self, dealer: &Dealer) -> Result<(), DatabaseError> {
        let forwarding = dealer.forwarding_email.as_deref().map(str::to_lowercase);
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO dealers ({DEALER_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    dealer.id.as_str(),
                    dealer.org_id.as_str(),
                    dealer.name.as_str(),
                    opt_text(forwarding.as_deref()),
                    opt_text(dealer.project_id.as_deref()),
                    opt_text(dealer.address.as_deref()),
                    opt_text(dealer.phone_number.as_deref()),
                    opt_text(dealer.email.as_deref()),
                    opt_text(dealer.operation_hours.as_deref()),
                    opt_text(dealer.address_pronunciation_notes.as_deref()),
                    opt_text(dealer.call_updates_email.as_deref()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_dealer: {e}")))?;
        Ok(())
    }

    async fn get_dealer(&self, id: &str) -> Result<Option<Dealer>, DatabaseError> {
        self.query_one(
            "get_dealer",
            &format!("SELECT {DEALER_COLUMNS} FROM dealers WHERE id = ?1"),
            params![id],
            row_to_dealer,
        )
        .await
    }

    async fn find_dealer_by_inbox(
        &self,
        addresses: &[String],
    ) -> Result<Option<Dealer>, DatabaseError> {
        for address in addresses {
            let needle = address.trim().to_lowercase();
            if needle.is_empty() {
                continue;
            }
            let found = self
                .query_one(
                    "find_dealer_by_inbox",
                    &format!(
                        "SELECT {DEALER_COLUMNS} FROM dealers WHERE forwarding_email = ?1 LIMIT 1"
                    ),
                    params![needle],
                    row_to_dealer,
                )
                .await?;
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    // ── Organizations ───────────────────────────────────────────────

    async fn upsert_organization(&self, org: &Organization) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO organizations (id, name, caller_number_id, calls_used, minutes_used) \
                 VALUES (?1, ?2, ?3, ?4, ?5) \
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name, \
                 caller_number_id = excluded.caller_number_id",
                params![
                    org.id.as_str(),
                    org.name.as_str(),
                    opt_text(org.caller_number_id.as_deref()),
                    org.calls_used,
                    org.minutes_used,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_organization: {e}")))?;
        Ok(())
    }

    async fn get_organization(&self, id: &str) -> Result<Option<Organization>, DatabaseError> {
        self.query_one(
            "get_organization",
            &format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = ?1"),
            params![id],
            row_to_organization,
        )
        .await
    }

    async fn increment_org_usage(
        &self,
        org_id: &str,
        calls: i64,
        minutes: f64,
    ) -> Result<(), DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "UPDATE organizations SET calls_used = calls_used + ?1, \
                 minutes_used = minutes_used + ?2 WHERE id = ?3",
                params![calls, minutes, org_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("increment_org_usage: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "organization".into(),
                id: org_id.to_string(),
            });
        }
        Ok(())
    }

    // ── Contacts ────────────────────────────────────────────────────

    async fn create_contact(
        &self,
        project_id: &str,
        phone: &str,
        phone_key: &str,
        name: Option<&str>,
    ) -> Result<ContactInsert, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let id = Uuid::new_v4().to_string();

        // The unique (project_id, phone_key) index turns a concurrent duplicate
        // into a no-op insert.
        let affected = self
            .conn()
            .execute(
                "INSERT INTO contacts (id, project_id, phone, phone_key, name, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?6) \
                 ON CONFLICT(project_id, phone_key) DO NOTHING",
                params![id, project_id, phone, phone_key, opt_text(name), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_contact: {e}")))?;

        let contact = self
            .find_contact_by_phone_key(project_id, phone_key)
            .await?
            .ok_or_else(|| DatabaseError::NotFound {
                entity: "contact".into(),
                id: phone_key.to_string(),
            })?;

        Ok(ContactInsert {
            contact,
            created: affected > 0,
        })
    }

    async fn get_contact(&self, id: &str) -> Result<Option<Contact>, DatabaseError> {
        self.query_one(
            "get_contact",
            &format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = ?1"),
            params![id],
            row_to_contact,
        )
        .await
    }

    async fn find_contact_by_phone_key(
        &self,
        project_id: &str,
        phone_key: &str,
    ) -> Result<Option<Contact>, DatabaseError> {
        self.query_one(
            "find_contact_by_phone_key",
            &format!(
                "SELECT {CONTACT_COLUMNS} FROM contacts WHERE project_id = ?1 AND phone_key = ?2"
            ),
            params![project_id, phone_key],
            row_to_contact,
        )
        .await
    }

    async fn list_contacts_by_status(
        &self,
        project_id: &str,
        status: ContactStatus,
    ) -> Result<Vec<Contact>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CONTACT_COLUMNS} FROM contacts WHERE project_id = ?1 AND status = ?2 \
                     ORDER BY created_at ASC"
                ),
                params![project_id, status.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_contacts_by_status: {e}")))?;

        let mut contacts = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_contacts_by_status: {e}")))?
        {
            contacts.push(row_to_contact(&row)?);
        }
        Ok(contacts)
    }

    async fn mark_contact_calling(
        &self,
        contact_id: &str,
        vapi_call_id: &str,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let affected = self
            .conn()
            .execute(
                "UPDATE contacts SET status = 'calling', vapi_call_id = ?1, updated_at = ?2 WHERE id = ?3",
                params![vapi_call_id, now, contact_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_contact_calling: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "contact".into(),
                id: contact_id.to_string(),
            });
        }
        Ok(())
    }

    async fn apply_call_result(
        &self,
        contact_id: &str,
        vapi_call_id: &str,
        status: ContactStatus,
        result: &CallResult,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let result_json = to_json(result)?;
        let entry_json = to_json(&CallHistoryEntry {
            result: result.clone(),
            vapi_call_id: Some(vapi_call_id.to_string()),
        })?;

        // Single conditional UPDATE: the WHERE clause is the idempotency gate,
        // covering both the latest handle and every handle in the history.
        // Right-hand expressions see the pre-update row, so an older
        // `call_result` seeds an empty history before the append.
        let affected = self
            .conn()
            .execute(
                "UPDATE contacts SET \
                    status = ?1, \
                    call_result = ?2, \
                    last_vapi_call_id = ?3, \
                    call_history = json_insert( \
                        CASE \
                            WHEN call_history IS NULL OR json_array_length(call_history) = 0 THEN \
                                CASE WHEN call_result IS NULL THEN '[]' \
                                     ELSE json_array(json_set(json(call_result), '$.vapiCallId', last_vapi_call_id)) END \
                            ELSE call_history \
                        END, \
                        '$[#]', json(?4)), \
                    updated_at = ?5 \
                 WHERE id = ?6 AND COALESCE(last_vapi_call_id, '') != ?3 \
                   AND NOT EXISTS ( \
                       SELECT 1 FROM json_each(COALESCE(call_history, '[]')) \
                       WHERE json_extract(value, '$.vapiCallId') = ?3)",
                params![status.to_string(), result_json, vapi_call_id, entry_json, now, contact_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("apply_call_result: {e}")))?;

        debug!(contact_id, vapi_call_id, applied = affected > 0, "apply_call_result");
        Ok(affected > 0)
    }

    async fn mark_contact_failed(
        &self,
        contact_id: &str,
        in_flight: Option<&str>,
        result: &CallResult,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let result_json = to_json(result)?;
        // Only a contact still waiting on the same call may be given up on;
        // a result applied in the meantime wins.
        let affected = self
            .conn()
            .execute(
                "UPDATE contacts SET status = 'failed', call_result = ?1, vapi_call_id = NULL, updated_at = ?2 \
                 WHERE id = ?3 AND status = 'calling' AND vapi_call_id IS ?4",
                params![result_json, now, contact_id, opt_text(in_flight)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("mark_contact_failed: {e}")))?;

        debug!(contact_id, applied = affected > 0, "mark_contact_failed");
        Ok(affected > 0)
    }

    async fn record_dispatch_failure(
        &self,
        contact_id: &str,
        result: &CallResult,
    ) -> Result<bool, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let result_json = to_json(result)?;
        let affected = self
            .conn()
            .execute(
                "UPDATE contacts SET status = 'failed', call_result = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND status != 'calling'",
                params![result_json, now, contact_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_dispatch_failure: {e}")))?;
        Ok(affected > 0)
    }

    // ── Notifications ───────────────────────────────────────────────

    async fn insert_notification(&self, notification: &Notification) -> Result<(), DatabaseError> {
        let metadata = to_json(&notification.metadata)?;
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO notifications ({NOTIFICATION_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    notification.id.as_str(),
                    notification.org_id.as_str(),
                    notification.kind.to_string(),
                    notification.title.as_str(),
                    notification.message.as_str(),
                    notification.read as i64,
                    metadata,
                    notification.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_notification: {e}")))?;
        Ok(())
    }

    async fn list_notifications(
        &self,
        org_id: &str,
        limit: u32,
    ) -> Result<Vec<Notification>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {NOTIFICATION_COLUMNS} FROM notifications WHERE org_id = ?1 \
                     ORDER BY created_at DESC LIMIT ?2"
                ),
                params![org_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_notifications: {e}")))?;

        let mut out = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_notifications: {e}")))?
        {
            out.push(row_to_notification(&row)?);
        }
        Ok(out)
    }

    // ── Inbound events ──────────────────────────────────────────────

    async fn record_inbound_event(&self, event_id: &str) -> Result<bool, DatabaseError> {
        let affected = self
            .conn()
            .execute(
                "INSERT OR IGNORE INTO inbound_events (event_id) VALUES (?1)",
                params![event_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_inbound_event: {e}")))?;
        Ok(affected > 0)
    }
}
