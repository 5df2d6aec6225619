//! Incident store for the Beacon platform.
//!
//! Implements payload validation, durable incident persistence, filtered and
//! cursor-paginated history retrieval, status lifecycle updates, and the
//! aggregate counts behind the stats endpoint.
//!
//! The store is the single source of truth: an incident only exists once
//! `create_incident` has returned, and callers never observe a partially
//! written row. All functions operate on a pooled [`rusqlite::Connection`]
//! and are expected to run on a blocking thread from async callers.

use beacon_types::{FieldError, IncidentStatus, IncidentType};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// Maximum accepted length for an incident description, in bytes.
pub const MAX_DESCRIPTION_LEN: usize = 4096;

/// Default page size for history listings.
pub const DEFAULT_PAGE_SIZE: u32 = 50;

/// Hard cap on page size regardless of what the client requests.
pub const MAX_PAGE_SIZE: u32 = 100;

/// SQL expression producing the store's canonical UTC timestamp format.
const NOW_EXPR: &str = "strftime('%Y-%m-%dT%H:%M:%fZ', 'now')";

/// Errors that can occur during incident store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The draft failed validation; storage was never touched.
    #[error("validation failed: {}", .0.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; "))]
    Validation(Vec<FieldError>),

    /// The referenced incident does not exist.
    #[error("incident not found: {0}")]
    NotFound(String),

    /// The requested status update violates the lifecycle state machine.
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },

    /// An underlying SQLite error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Failed to check a connection out of the pool.
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),
}

impl StoreError {
    /// Whether retrying the operation may succeed without any intervention.
    ///
    /// Covers write contention (`SQLITE_BUSY`/`SQLITE_LOCKED`) and pool
    /// checkout timeouts. Validation, not-found, and transition errors are
    /// never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ffi::ErrorCode::DatabaseBusy | rusqlite::ffi::ErrorCode::DatabaseLocked
            ),
            Self::Pool(_) => true,
            _ => false,
        }
    }
}

/// A committed incident record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    /// Internal database rowid. Used for keyset pagination, never exposed.
    #[serde(skip)]
    pub id: i64,
    /// Unique public ID (UUID v4), assigned at commit time.
    #[serde(rename = "id")]
    pub incident_id: String,
    /// Incident category.
    #[serde(rename = "type")]
    pub incident_type: IncidentType,
    /// Latitude of the reported location.
    pub latitude: f64,
    /// Longitude of the reported location.
    pub longitude: f64,
    /// Free-text description of the emergency.
    pub description: String,
    /// Current lifecycle status.
    pub status: IncidentStatus,
    /// Commit timestamp (ISO 8601 UTC), assigned by the store, immutable.
    pub reported_at: String,
    /// Timestamp of the last mutation (ISO 8601 UTC).
    pub updated_at: String,
}

/// The raw shape of an incident report as submitted by clients.
///
/// Every field is optional so that validation can report all missing or
/// malformed fields at once instead of failing on the first.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncidentSubmission {
    #[serde(rename = "type")]
    pub incident_type: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub description: Option<String>,
}

/// A validated incident draft, ready for persistence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IncidentDraft {
    pub incident_type: IncidentType,
    pub latitude: f64,
    pub longitude: f64,
    pub description: String,
}

fn check_latitude(value: f64) -> Option<FieldError> {
    if !value.is_finite() || !(-90.0..=90.0).contains(&value) {
        return Some(FieldError::new(
            "latitude",
            "latitude must be a number between -90 and 90",
        ));
    }
    None
}

fn check_longitude(value: f64) -> Option<FieldError> {
    if !value.is_finite() || !(-180.0..=180.0).contains(&value) {
        return Some(FieldError::new(
            "longitude",
            "longitude must be a number between -180 and 180",
        ));
    }
    None
}

fn check_description(value: &str) -> Option<FieldError> {
    if value.trim().is_empty() {
        return Some(FieldError::new(
            "description",
            "description must not be empty",
        ));
    }
    if value.len() > MAX_DESCRIPTION_LEN {
        return Some(FieldError::new(
            "description",
            format!(
                "description exceeds maximum length of {} bytes",
                MAX_DESCRIPTION_LEN
            ),
        ));
    }
    None
}

impl IncidentDraft {
    /// Re-checks field constraints on an already-typed draft.
    ///
    /// `create_incident` calls this before touching storage so that the
    /// validation gate holds even for drafts constructed directly.
    pub fn validate(&self) -> Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();
        if let Some(e) = check_latitude(self.latitude) {
            errors.push(e);
        }
        if let Some(e) = check_longitude(self.longitude) {
            errors.push(e);
        }
        if let Some(e) = check_description(&self.description) {
            errors.push(e);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Validates a raw submission into an [`IncidentDraft`].
///
/// Pure, performs no I/O. Collects every field-level problem rather than
/// stopping at the first, so clients can fix a form in one round trip.
pub fn validate_submission(
    submission: &IncidentSubmission,
) -> Result<IncidentDraft, Vec<FieldError>> {
    let mut errors = Vec::new();

    let incident_type = match submission.incident_type.as_deref().map(str::trim) {
        None | Some("") => {
            errors.push(FieldError::new("type", "incident type is required"));
            None
        }
        Some(label) => match label.parse::<IncidentType>() {
            Ok(ty) => Some(ty),
            Err(e) => {
                errors.push(FieldError::new("type", e.to_string()));
                None
            }
        },
    };

    let latitude = match submission.latitude {
        None => {
            errors.push(FieldError::new("latitude", "latitude is required"));
            None
        }
        Some(value) => match check_latitude(value) {
            Some(e) => {
                errors.push(e);
                None
            }
            None => Some(value),
        },
    };

    let longitude = match submission.longitude {
        None => {
            errors.push(FieldError::new("longitude", "longitude is required"));
            None
        }
        Some(value) => match check_longitude(value) {
            Some(e) => {
                errors.push(e);
                None
            }
            None => Some(value),
        },
    };

    let description = match submission.description.as_deref().map(str::trim) {
        None => {
            errors.push(FieldError::new("description", "description is required"));
            None
        }
        Some(text) => match check_description(text) {
            Some(e) => {
                errors.push(e);
                None
            }
            None => Some(text.to_string()),
        },
    };

    match (incident_type, latitude, longitude, description) {
        (Some(incident_type), Some(latitude), Some(longitude), Some(description))
            if errors.is_empty() =>
        {
            Ok(IncidentDraft {
                incident_type,
                latitude,
                longitude,
                description,
            })
        }
        _ => Err(errors),
    }
}

/// Persists a validated draft, assigning `incident_id` and `reported_at`.
///
/// The insert is a single statement with `RETURNING`, so the caller receives
/// the committed row exactly as stored: there is no window in which a
/// partially written incident is observable.
pub fn create_incident(conn: &Connection, draft: &IncidentDraft) -> Result<Incident, StoreError> {
    draft.validate().map_err(StoreError::Validation)?;

    let incident_id = Uuid::new_v4().to_string();
    let incident = conn.query_row(
        "INSERT INTO incidents (incident_id, incident_type, latitude, longitude, description, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         RETURNING id, incident_id, incident_type, latitude, longitude, description, status,
                   reported_at, updated_at",
        params![
            incident_id,
            draft.incident_type.as_str(),
            draft.latitude,
            draft.longitude,
            draft.description,
            IncidentStatus::Pending.as_str(),
        ],
        map_row_to_incident,
    )?;

    Ok(incident)
}

/// Retrieves an incident by its public ID.
pub fn get_incident(conn: &Connection, incident_id: &str) -> Result<Incident, StoreError> {
    conn.query_row(
        "SELECT id, incident_id, incident_type, latitude, longitude, description, status,
                reported_at, updated_at
         FROM incidents WHERE incident_id = ?1",
        [incident_id],
        map_row_to_incident,
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound(incident_id.to_string()))
}

/// An opaque position in a newest-first incident listing.
///
/// Encodes the `(reported_at, rowid)` pair of the last row on a page; the
/// rowid breaks ties between incidents committed in the same millisecond.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub reported_at: String,
    pub id: i64,
}

impl Cursor {
    /// Serializes the cursor into its wire token.
    pub fn encode(&self) -> String {
        format!("{}|{}", self.reported_at, self.id)
    }

    /// Parses a wire token back into a cursor. Returns `None` for tokens
    /// this store never produced.
    pub fn parse(token: &str) -> Option<Self> {
        let (reported_at, id) = token.rsplit_once('|')?;
        if reported_at.is_empty() {
            return None;
        }
        let id = id.parse().ok()?;
        Some(Self {
            reported_at: reported_at.to_string(),
            id,
        })
    }
}

/// Filter criteria for incident listings.
#[derive(Debug, Clone, Default)]
pub struct IncidentFilter {
    pub status: Option<IncidentStatus>,
    pub incident_type: Option<IncidentType>,
    pub cursor: Option<Cursor>,
}

/// One page of a filtered incident listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentPage {
    pub incidents: Vec<Incident>,
    /// Token for the next page; `None` once the listing is exhausted.
    pub next_cursor: Option<String>,
}

/// Lists incidents newest-first with optional status/type filters and keyset
/// pagination.
///
/// `limit` defaults to [`DEFAULT_PAGE_SIZE`] and is capped at
/// [`MAX_PAGE_SIZE`]. The listing is restartable: an identical filter plus
/// the returned `next_cursor` continues exactly where the page ended even if
/// new incidents were committed in between.
pub fn list_incidents(
    conn: &Connection,
    filter: &IncidentFilter,
    limit: Option<u32>,
) -> Result<IncidentPage, StoreError> {
    let limit = filter_limit(limit);

    let mut conditions: Vec<String> = Vec::new();
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    let mut idx = 1usize;

    if let Some(status) = filter.status {
        conditions.push(format!("status = ?{}", idx));
        values.push(Box::new(status.as_str().to_string()));
        idx += 1;
    }
    if let Some(ty) = filter.incident_type {
        conditions.push(format!("incident_type = ?{}", idx));
        values.push(Box::new(ty.as_str().to_string()));
        idx += 1;
    }
    if let Some(cursor) = &filter.cursor {
        conditions.push(format!(
            "(reported_at < ?{i} OR (reported_at = ?{i} AND id < ?{j}))",
            i = idx,
            j = idx + 1
        ));
        values.push(Box::new(cursor.reported_at.clone()));
        values.push(Box::new(cursor.id));
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    // Fetch one extra row to decide whether a next page exists.
    let sql = format!(
        "SELECT id, incident_id, incident_type, latitude, longitude, description, status,
                reported_at, updated_at
         FROM incidents {}
         ORDER BY reported_at DESC, id DESC
         LIMIT {}",
        where_clause,
        limit + 1
    );

    let mut stmt = conn.prepare(&sql)?;
    let params: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let rows = stmt.query_map(params.as_slice(), map_row_to_incident)?;

    let mut incidents = Vec::new();
    for row in rows {
        incidents.push(row?);
    }

    let next_cursor = if incidents.len() as u32 > limit {
        incidents.truncate(limit as usize);
        incidents.last().map(|last| {
            Cursor {
                reported_at: last.reported_at.clone(),
                id: last.id,
            }
            .encode()
        })
    } else {
        None
    };

    Ok(IncidentPage {
        incidents,
        next_cursor,
    })
}

fn filter_limit(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

/// Applies a status update, enforcing the lifecycle state machine.
///
/// Runs in a transaction: the current status is read, the transition
/// checked, and the row updated with a bumped `updated_at`, so a concurrent
/// update cannot slip a forbidden transition through the gap.
pub fn update_status(
    conn: &Connection,
    incident_id: &str,
    new_status: IncidentStatus,
) -> Result<Incident, StoreError> {
    let tx = conn.unchecked_transaction()?;

    let current: Option<String> = tx
        .query_row(
            "SELECT status FROM incidents WHERE incident_id = ?1",
            [incident_id],
            |row| row.get(0),
        )
        .optional()?;
    let current = current.ok_or_else(|| StoreError::NotFound(incident_id.to_string()))?;

    let from: IncidentStatus = current.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    if !from.can_transition_to(new_status) {
        return Err(StoreError::InvalidTransition {
            from,
            to: new_status,
        });
    }

    let incident = tx.query_row(
        &format!(
            "UPDATE incidents SET status = ?2, updated_at = {NOW_EXPR}
             WHERE incident_id = ?1
             RETURNING id, incident_id, incident_type, latitude, longitude, description, status,
                       reported_at, updated_at"
        ),
        params![incident_id, new_status.as_str()],
        map_row_to_incident,
    )?;

    tx.commit()?;
    Ok(incident)
}

/// Aggregate incident counts for the stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentStats {
    pub total: i64,
    pub by_status: BTreeMap<String, i64>,
    pub by_type: BTreeMap<String, i64>,
}

/// Computes incident counts grouped by status and by category.
///
/// Buckets are zero-filled for every known status and category so dashboard
/// consumers always see the full set of keys.
pub fn incident_stats(conn: &Connection) -> Result<IncidentStats, StoreError> {
    let total: i64 = conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?;

    let mut by_status: BTreeMap<String, i64> = IncidentStatus::all()
        .iter()
        .map(|s| (s.as_str().to_string(), 0))
        .collect();
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM incidents GROUP BY status")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (status, count) = row?;
        by_status.insert(status, count);
    }

    let mut by_type: BTreeMap<String, i64> = IncidentType::all()
        .iter()
        .map(|t| (t.as_str().to_string(), 0))
        .collect();
    let mut stmt =
        conn.prepare("SELECT incident_type, COUNT(*) FROM incidents GROUP BY incident_type")?;
    let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
    for row in rows {
        let (ty, count) = row?;
        by_type.insert(ty, count);
    }

    Ok(IncidentStats {
        total,
        by_status,
        by_type,
    })
}

/// Seeds a handful of sample incidents for demo deployments.
///
/// No-op when the store already holds data, so a restarted demo server does
/// not accumulate duplicates. Returns the number of incidents created.
pub fn seed_sample_incidents(conn: &Connection) -> Result<usize, StoreError> {
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))?;
    if existing > 0 {
        tracing::debug!(existing, "store not empty, skipping demo seed");
        return Ok(0);
    }

    let samples = [
        (
            IncidentType::Flood,
            14.6507,
            121.1029,
            "Knee-deep floodwater along Marcos Highway, several stalled vehicles",
        ),
        (
            IncidentType::Fire,
            14.5995,
            120.9842,
            "Building fire downtown, smoke visible from two blocks away",
        ),
        (
            IncidentType::Earthquake,
            14.5547,
            121.0244,
            "Strong shaking felt, cracked facade on a mid-rise office building",
        ),
        (
            IncidentType::Medical,
            14.6760,
            121.0437,
            "Elderly resident needs evacuation assistance, no vehicle access",
        ),
    ];

    let mut created = 0;
    for (incident_type, latitude, longitude, description) in samples {
        let draft = IncidentDraft {
            incident_type,
            latitude,
            longitude,
            description: description.to_string(),
        };
        let incident = create_incident(conn, &draft)?;
        created += 1;

        // Vary lifecycle state so demo dashboards have something to show.
        if incident_type == IncidentType::Fire {
            update_status(conn, &incident.incident_id, IncidentStatus::InProgress)?;
        } else if incident_type == IncidentType::Medical {
            update_status(conn, &incident.incident_id, IncidentStatus::Resolved)?;
        }
    }

    tracing::info!(created, "seeded demo incidents");
    Ok(created)
}

fn map_row_to_incident(row: &Row) -> rusqlite::Result<Incident> {
    let type_label: String = row.get(2)?;
    let incident_type: IncidentType = type_label.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status_label: String = row.get(6)?;
    let status: IncidentStatus = status_label.parse().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(Incident {
        id: row.get(0)?,
        incident_id: row.get(1)?,
        incident_type,
        latitude: row.get(3)?,
        longitude: row.get(4)?,
        description: row.get(5)?,
        status,
        reported_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_db::run_migrations;
    use rusqlite::Connection;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().expect("failed to open in-memory db");
        run_migrations(&conn).expect("failed to run migrations");
        conn
    }

    fn valid_submission() -> IncidentSubmission {
        IncidentSubmission {
            incident_type: Some("fire".to_string()),
            latitude: Some(14.5995),
            longitude: Some(120.9842),
            description: Some("Building fire downtown".to_string()),
        }
    }

    #[test]
    fn validate_submission_accepts_valid_payload() {
        let draft = validate_submission(&valid_submission()).expect("should validate");
        assert_eq!(draft.incident_type, IncidentType::Fire);
        assert_eq!(draft.description, "Building fire downtown");
    }

    #[test]
    fn validate_submission_trims_description() {
        let mut submission = valid_submission();
        submission.description = Some("  trailing spaces  ".to_string());
        let draft = validate_submission(&submission).expect("should validate");
        assert_eq!(draft.description, "trailing spaces");
    }

    #[test]
    fn validate_submission_collects_all_field_errors() {
        let submission = IncidentSubmission {
            incident_type: Some("tsunami".to_string()),
            latitude: Some(999.0),
            longitude: None,
            description: Some("   ".to_string()),
        };

        let errors = validate_submission(&submission).expect_err("should fail");
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(fields, vec!["type", "latitude", "longitude", "description"]);
    }

    #[test]
    fn validate_submission_rejects_non_finite_coordinates() {
        let mut submission = valid_submission();
        submission.latitude = Some(f64::NAN);
        submission.longitude = Some(f64::INFINITY);

        let errors = validate_submission(&submission).expect_err("should fail");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn create_assigns_id_and_timestamps() {
        let conn = setup_db();
        let draft = validate_submission(&valid_submission()).unwrap();

        let incident = create_incident(&conn, &draft).expect("create should succeed");

        assert!(
            Uuid::parse_str(&incident.incident_id).is_ok(),
            "incident_id should be a UUID, got {}",
            incident.incident_id
        );
        assert_eq!(incident.status, IncidentStatus::Pending);
        assert_eq!(incident.reported_at, incident.updated_at);
        assert!(
            chrono::DateTime::parse_from_rfc3339(&incident.reported_at).is_ok(),
            "reported_at should be RFC 3339, got {}",
            incident.reported_at
        );

        let fetched = get_incident(&conn, &incident.incident_id).expect("get should succeed");
        assert_eq!(fetched, incident);
    }

    #[test]
    fn create_rejects_invalid_draft_without_persisting() {
        let conn = setup_db();
        let draft = IncidentDraft {
            incident_type: IncidentType::Flood,
            latitude: 999.0,
            longitude: 0.0,
            description: "x".to_string(),
        };

        let err = create_incident(&conn, &draft).expect_err("should fail validation");
        match err {
            StoreError::Validation(fields) => assert_eq!(fields[0].field, "latitude"),
            other => panic!("unexpected error: {other:?}"),
        }

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM incidents", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0, "validation failure must not touch storage");
    }

    #[test]
    fn created_ids_are_unique() {
        let conn = setup_db();
        let draft = validate_submission(&valid_submission()).unwrap();

        let mut seen = std::collections::HashSet::new();
        for _ in 0..20 {
            let incident = create_incident(&conn, &draft).unwrap();
            assert!(seen.insert(incident.incident_id), "duplicate incident_id");
        }
    }

    #[test]
    fn get_unknown_incident_is_not_found() {
        let conn = setup_db();
        let err = get_incident(&conn, "no-such-id").expect_err("should fail");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn list_orders_newest_first_and_paginates() {
        let conn = setup_db();
        let mut created = Vec::new();
        for i in 0..5 {
            let draft = IncidentDraft {
                incident_type: IncidentType::Flood,
                latitude: 14.0,
                longitude: 121.0,
                description: format!("incident {i}"),
            };
            created.push(create_incident(&conn, &draft).unwrap());
        }

        let mut filter = IncidentFilter::default();
        let mut collected = Vec::new();
        let mut pages = 0;
        loop {
            let page = list_incidents(&conn, &filter, Some(2)).expect("list should succeed");
            pages += 1;
            collected.extend(page.incidents);
            match page.next_cursor {
                Some(token) => {
                    filter.cursor = Some(Cursor::parse(&token).expect("cursor should parse"));
                }
                None => break,
            }
        }

        assert_eq!(pages, 3, "5 incidents at limit 2 should take 3 pages");
        assert_eq!(collected.len(), 5);

        // Newest first: rowids strictly descending across the whole listing,
        // which also proves the pages are disjoint.
        for pair in collected.windows(2) {
            assert!(pair[0].id > pair[1].id, "listing must be newest-first");
        }
    }

    #[test]
    fn list_filters_by_status_and_type() {
        let conn = setup_db();
        for ty in [IncidentType::Flood, IncidentType::Fire, IncidentType::Fire] {
            let draft = IncidentDraft {
                incident_type: ty,
                latitude: 14.0,
                longitude: 121.0,
                description: "filter test".to_string(),
            };
            create_incident(&conn, &draft).unwrap();
        }

        let fires = list_incidents(
            &conn,
            &IncidentFilter {
                incident_type: Some(IncidentType::Fire),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(fires.incidents.len(), 2);
        assert!(fires.next_cursor.is_none());

        let resolved = list_incidents(
            &conn,
            &IncidentFilter {
                status: Some(IncidentStatus::Resolved),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert!(resolved.incidents.is_empty());
    }

    #[test]
    fn cursor_round_trips_and_rejects_garbage() {
        let cursor = Cursor {
            reported_at: "2026-08-07T10:00:00.000Z".to_string(),
            id: 42,
        };
        let parsed = Cursor::parse(&cursor.encode()).expect("should parse");
        assert_eq!(parsed, cursor);

        assert!(Cursor::parse("").is_none());
        assert!(Cursor::parse("no-separator").is_none());
        assert!(Cursor::parse("|7").is_none());
        assert!(Cursor::parse("2026-08-07T10:00:00.000Z|not-a-number").is_none());
    }

    #[test]
    fn status_update_lifecycle() {
        let conn = setup_db();
        let draft = validate_submission(&valid_submission()).unwrap();
        let incident = create_incident(&conn, &draft).unwrap();

        let updated = update_status(&conn, &incident.incident_id, IncidentStatus::InProgress)
            .expect("pending -> in_progress should succeed");
        assert_eq!(updated.status, IncidentStatus::InProgress);
        assert_eq!(updated.reported_at, incident.reported_at);
        assert!(
            updated.updated_at >= updated.reported_at,
            "updated_at must never precede reported_at"
        );

        let resolved = update_status(&conn, &incident.incident_id, IncidentStatus::Resolved)
            .expect("in_progress -> resolved should succeed");
        assert_eq!(resolved.status, IncidentStatus::Resolved);

        let err = update_status(&conn, &incident.incident_id, IncidentStatus::Pending)
            .expect_err("resolved -> pending must fail");
        match err {
            StoreError::InvalidTransition { from, to } => {
                assert_eq!(from, IncidentStatus::Resolved);
                assert_eq!(to, IncidentStatus::Pending);
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // The failed transition must not have mutated the row.
        let fetched = get_incident(&conn, &incident.incident_id).unwrap();
        assert_eq!(fetched.status, IncidentStatus::Resolved);
    }

    #[test]
    fn status_update_skips_pending_to_resolved() {
        let conn = setup_db();
        let draft = validate_submission(&valid_submission()).unwrap();
        let incident = create_incident(&conn, &draft).unwrap();

        let resolved = update_status(&conn, &incident.incident_id, IncidentStatus::Resolved)
            .expect("pending -> resolved should succeed");
        assert_eq!(resolved.status, IncidentStatus::Resolved);
    }

    #[test]
    fn status_update_unknown_incident_is_not_found() {
        let conn = setup_db();
        let err = update_status(&conn, "no-such-id", IncidentStatus::Resolved)
            .expect_err("should fail");
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn stats_zero_fill_and_counts() {
        let conn = setup_db();

        let empty = incident_stats(&conn).unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.by_status.len(), IncidentStatus::all().len());
        assert_eq!(empty.by_type.len(), IncidentType::all().len());
        assert!(empty.by_status.values().all(|&c| c == 0));

        for ty in [IncidentType::Fire, IncidentType::Fire, IncidentType::Flood] {
            let draft = IncidentDraft {
                incident_type: ty,
                latitude: 14.0,
                longitude: 121.0,
                description: "stats test".to_string(),
            };
            create_incident(&conn, &draft).unwrap();
        }

        let stats = incident_stats(&conn).unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_type["fire"], 2);
        assert_eq!(stats.by_type["flood"], 1);
        assert_eq!(stats.by_type["earthquake"], 0);
        assert_eq!(stats.by_status["pending"], 3);
    }

    #[test]
    fn seed_is_idempotent() {
        let conn = setup_db();

        let first = seed_sample_incidents(&conn).unwrap();
        assert!(first > 0);

        let second = seed_sample_incidents(&conn).unwrap();
        assert_eq!(second, 0, "seeding a non-empty store must be a no-op");

        let stats = incident_stats(&conn).unwrap();
        assert_eq!(stats.total as usize, first);
        assert_eq!(stats.by_status["in_progress"], 1);
        assert_eq!(stats.by_status["resolved"], 1);
    }

    #[test]
    fn incident_serializes_with_public_field_names() {
        let conn = setup_db();
        let draft = validate_submission(&valid_submission()).unwrap();
        let incident = create_incident(&conn, &draft).unwrap();

        let json = serde_json::to_value(&incident).unwrap();
        assert_eq!(json["id"], serde_json::json!(incident.incident_id));
        assert_eq!(json["type"], "fire");
        assert_eq!(json["status"], "pending");
        assert!(
            json.get("incident_id").is_none(),
            "internal field name should not leak"
        );
    }
}
