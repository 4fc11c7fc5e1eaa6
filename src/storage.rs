//! SQLite storage layer for Tourguard.
//!
//! Three tables back the monitor's in-memory state:
//!
//! - `tourists`: the roster, upserted on every status or position change
//! - `alerts`: the alert registry. Rows are never deleted; only the mutable
//!   fields (severity, message, location, resolution, escalation) change
//! - `incidents`: immutable incident reports, insert-only
//!
//! Timestamps are stored as Unix milliseconds.

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, Transaction};
use uuid::Uuid;

use crate::model::{
    Alert, AlertType, GeoPoint, IncidentReport, Severity, Tourist, TouristStatus,
};

/// Everything a single monitor operation changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    pub tourists: Vec<Tourist>,
    pub alerts: Vec<Alert>,
    pub incidents: Vec<IncidentReport>,
}

impl Changeset {
    pub fn is_empty(&self) -> bool {
        self.tourists.is_empty() && self.alerts.is_empty() && self.incidents.is_empty()
    }

    /// Fold `other` into `self`. Later versions of the same entity replace
    /// earlier ones.
    pub fn merge(&mut self, other: Changeset) {
        for tourist in other.tourists {
            self.tourists.retain(|t| t.identity_id != tourist.identity_id);
            self.tourists.push(tourist);
        }
        for alert in other.alerts {
            self.alerts.retain(|a| a.id != alert.id);
            self.alerts.push(alert);
        }
        for incident in other.incidents {
            self.incidents.retain(|i| i.id != incident.id);
            self.incidents.push(incident);
        }
    }
}

/// Durable sink for monitor state.
#[async_trait]
pub trait Persistence: Send + Sync {
    /// Write all changes atomically.
    async fn persist(&self, changes: &Changeset) -> anyhow::Result<()>;
}

/// Full persisted state, loaded at startup.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub tourists: Vec<Tourist>,
    pub alerts: Vec<Alert>,
    pub incidents: Vec<IncidentReport>,
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance and initialize the schema.
    ///
    /// # Arguments
    ///
    /// * `database_url` - SQLite connection string (e.g., "sqlite:tourguard.db?mode=rwc" or "sqlite::memory:")
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let options = if database_url.contains(":memory:") {
            // Every connection to :memory: is a separate database.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<std::time::Duration>)
                .max_lifetime(None::<std::time::Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(database_url).await?;

        let storage = Self { pool };
        storage.initialize_schema().await?;

        Ok(storage)
    }

    /// Create the database schema if it doesn't exist.
    async fn initialize_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tourists (
                identity_id TEXT PRIMARY KEY,
                profile TEXT NOT NULL,
                credential TEXT NOT NULL,
                lat REAL,
                lng REAL,
                last_seen_at INTEGER NOT NULL,
                last_moved_at INTEGER NOT NULL,
                registered_at INTEGER NOT NULL,
                status TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                tourist_id TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                message TEXT NOT NULL,
                lat REAL,
                lng REAL,
                created_at INTEGER NOT NULL,
                last_updated_at INTEGER NOT NULL,
                resolved INTEGER NOT NULL,
                resolved_at INTEGER,
                incident_generated INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Index for per-tourist alert queries
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_alerts_tourist
            ON alerts(tourist_id, alert_type)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS incidents (
                id TEXT PRIMARY KEY,
                reference TEXT NOT NULL,
                source_alert_id TEXT NOT NULL UNIQUE,
                tourist_id TEXT NOT NULL,
                generated_at INTEGER NOT NULL,
                alert TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Load the roster, alert registry and incident ledger.
    pub async fn load(&self) -> anyhow::Result<Snapshot> {
        Ok(Snapshot {
            tourists: self.load_tourists().await?,
            alerts: self.load_alerts().await?,
            incidents: self.load_incidents().await?,
        })
    }

    pub async fn load_tourists(&self) -> anyhow::Result<Vec<Tourist>> {
        let rows = sqlx::query("SELECT * FROM tourists ORDER BY registered_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(tourist_from_row).collect()
    }

    pub async fn load_alerts(&self) -> anyhow::Result<Vec<Alert>> {
        let rows = sqlx::query("SELECT * FROM alerts ORDER BY created_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(alert_from_row).collect()
    }

    pub async fn load_incidents(&self) -> anyhow::Result<Vec<IncidentReport>> {
        let rows = sqlx::query("SELECT * FROM incidents ORDER BY generated_at")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(incident_from_row).collect()
    }

    async fn upsert_tourist(
        tx: &mut Transaction<'_, Sqlite>,
        tourist: &Tourist,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tourists (
                identity_id, profile, credential, lat, lng,
                last_seen_at, last_moved_at, registered_at, status
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(identity_id) DO UPDATE SET
                lat = excluded.lat,
                lng = excluded.lng,
                last_seen_at = excluded.last_seen_at,
                last_moved_at = excluded.last_moved_at,
                status = excluded.status
            "#,
        )
        .bind(&tourist.identity_id)
        .bind(serde_json::to_string(&tourist.profile)?)
        .bind(serde_json::to_string(&tourist.credential)?)
        .bind(tourist.position.map(|p| p.lat))
        .bind(tourist.position.map(|p| p.lng))
        .bind(tourist.last_seen_at.timestamp_millis())
        .bind(tourist.last_moved_at.timestamp_millis())
        .bind(tourist.registered_at.timestamp_millis())
        .bind(status_str(tourist.status))
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Insert or update an alert. `incident_generated` can only go from
    /// false to true.
    async fn upsert_alert(tx: &mut Transaction<'_, Sqlite>, alert: &Alert) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (
                id, tourist_id, alert_type, severity, message, lat, lng,
                created_at, last_updated_at, resolved, resolved_at, incident_generated
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                severity = excluded.severity,
                message = excluded.message,
                lat = excluded.lat,
                lng = excluded.lng,
                last_updated_at = excluded.last_updated_at,
                resolved = excluded.resolved,
                resolved_at = excluded.resolved_at,
                incident_generated = MAX(alerts.incident_generated, excluded.incident_generated)
            "#,
        )
        .bind(alert.id.to_string())
        .bind(&alert.tourist_id)
        .bind(alert.alert_type.as_str())
        .bind(alert.severity.as_str())
        .bind(&alert.message)
        .bind(alert.location.map(|p| p.lat))
        .bind(alert.location.map(|p| p.lng))
        .bind(alert.created_at.timestamp_millis())
        .bind(alert.last_updated_at.timestamp_millis())
        .bind(alert.resolved)
        .bind(alert.resolved_at.map(|t| t.timestamp_millis()))
        .bind(alert.incident_generated)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Insert an incident report. Re-inserting the same report is ignored.
    async fn insert_incident(
        tx: &mut Transaction<'_, Sqlite>,
        report: &IncidentReport,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO incidents (id, reference, source_alert_id, tourist_id, generated_at, alert)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(report.id.to_string())
        .bind(&report.reference)
        .bind(report.source_alert_id.to_string())
        .bind(&report.tourist_id)
        .bind(report.generated_at.timestamp_millis())
        .bind(serde_json::to_string(&report.alert)?)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl Persistence for Storage {
    async fn persist(&self, changes: &Changeset) -> anyhow::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        for tourist in &changes.tourists {
            Self::upsert_tourist(&mut tx, tourist).await?;
        }
        for alert in &changes.alerts {
            Self::upsert_alert(&mut tx, alert).await?;
        }
        for report in &changes.incidents {
            Self::insert_incident(&mut tx, report).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

fn status_str(status: TouristStatus) -> &'static str {
    match status {
        TouristStatus::Safe => "safe",
        TouristStatus::Warning => "warning",
        TouristStatus::Emergency => "emergency",
    }
}

fn parse_status(value: &str) -> anyhow::Result<TouristStatus> {
    match value {
        "safe" => Ok(TouristStatus::Safe),
        "warning" => Ok(TouristStatus::Warning),
        "emergency" => Ok(TouristStatus::Emergency),
        other => Err(anyhow!("unknown tourist status {other:?}")),
    }
}

fn from_millis(ms: i64) -> anyhow::Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| anyhow!("timestamp {ms} out of range"))
}

fn tourist_from_row(row: &SqliteRow) -> anyhow::Result<Tourist> {
    let lat: Option<f64> = row.get("lat");
    let lng: Option<f64> = row.get("lng");
    let profile: String = row.get("profile");
    let credential: String = row.get("credential");
    let status: String = row.get("status");

    Ok(Tourist {
        identity_id: row.get("identity_id"),
        profile: serde_json::from_str(&profile).context("corrupt tourist profile")?,
        credential: serde_json::from_str(&credential).context("corrupt tourist credential")?,
        position: lat.zip(lng).map(|(lat, lng)| GeoPoint::new(lat, lng)),
        last_seen_at: from_millis(row.get("last_seen_at"))?,
        last_moved_at: from_millis(row.get("last_moved_at"))?,
        registered_at: from_millis(row.get("registered_at"))?,
        status: parse_status(&status)?,
    })
}

fn alert_from_row(row: &SqliteRow) -> anyhow::Result<Alert> {
    let id: String = row.get("id");
    let alert_type: String = row.get("alert_type");
    let severity: String = row.get("severity");
    let resolved_at: Option<i64> = row.get("resolved_at");
    let lat: Option<f64> = row.get("lat");
    let lng: Option<f64> = row.get("lng");

    Ok(Alert {
        id: Uuid::parse_str(&id)?,
        tourist_id: row.get("tourist_id"),
        alert_type: AlertType::parse(&alert_type)
            .ok_or_else(|| anyhow!("unknown alert type {alert_type:?}"))?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| anyhow!("unknown severity {severity:?}"))?,
        message: row.get("message"),
        location: lat.zip(lng).map(|(lat, lng)| GeoPoint::new(lat, lng)),
        created_at: from_millis(row.get("created_at"))?,
        last_updated_at: from_millis(row.get("last_updated_at"))?,
        resolved: row.get("resolved"),
        resolved_at: resolved_at.map(from_millis).transpose()?,
        incident_generated: row.get("incident_generated"),
    })
}

fn incident_from_row(row: &SqliteRow) -> anyhow::Result<IncidentReport> {
    let id: String = row.get("id");
    let source_alert_id: String = row.get("source_alert_id");
    let alert: String = row.get("alert");

    Ok(IncidentReport {
        id: Uuid::parse_str(&id)?,
        reference: row.get("reference"),
        source_alert_id: Uuid::parse_str(&source_alert_id)?,
        tourist_id: row.get("tourist_id"),
        generated_at: from_millis(row.get("generated_at"))?,
        alert: serde_json::from_str(&alert).context("corrupt incident snapshot")?,
    })
}
