//! Narrow repository traits over the relational store (APTGroup,
//! CorrelationRule, Offence, ResponseAction, ResponsePipeline, Device), and
//! a `sqlx`/SQLite default implementation.
//!
//! The HTTP CRUD surface and migration tooling around these tables live
//! elsewhere; what this crate expresses is the read/write contract each
//! trait names, so the correlation engine and response orchestrator can be
//! built and tested without that surface existing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use siem_types::{
    AptGroup, CorrelationRule, Device, DeviceStatus, IocSource, IocSourceType, Offence,
    OffenceStatus, PipelineStep, ResponseAction, ResponseActionType, ResponsePipeline, RuleType,
    Severity,
};

use crate::error::Result;

#[async_trait]
pub trait RuleRepository: Send + Sync {
    /// Enabled rules, bounded at 1000 per cycle.
    async fn list_enabled(&self) -> Result<Vec<CorrelationRule>>;
    async fn get(&self, id: i64) -> Result<Option<CorrelationRule>>;
}

#[async_trait]
pub trait OffenceRepository: Send + Sync {
    async fn create(&self, offence: Offence) -> Result<Offence>;
    async fn list_recent(&self, limit: i64) -> Result<Vec<Offence>>;
    async fn list_detected_since(&self, since: DateTime<Utc>) -> Result<Vec<Offence>>;
    async fn summary_by_severity_since(&self, since: DateTime<Utc>) -> Result<Vec<(Severity, i64)>>;
    /// Operator triage: moves an offence through its status workflow,
    /// optionally re-grading severity and attaching notes. Returns the
    /// updated offence, or `None` if no such offence exists.
    async fn update_triage(
        &self,
        id: i64,
        status: OffenceStatus,
        severity: Option<Severity>,
        notes: Option<String>,
    ) -> Result<Option<Offence>>;
}

#[async_trait]
pub trait PipelineRepository: Send + Sync {
    async fn find_by_trigger_rule(&self, rule_id: i64) -> Result<Option<ResponsePipeline>>;
}

#[async_trait]
pub trait ActionRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<ResponseAction>>;
}

#[async_trait]
pub trait DeviceRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<Device>>;
    async fn update_status(&self, id: i64, status: DeviceStatus) -> Result<()>;
    /// Marks the device reachable, stamps `last_successful_connection`,
    /// and refreshes `os_version` when the device reported one.
    async fn record_connection_success(&self, id: i64, os_version: Option<&str>) -> Result<()>;
    async fn set_syslog_configured(&self, id: i64, configured: bool) -> Result<()>;
    async fn set_netflow_configured(&self, id: i64, configured: bool) -> Result<()>;
}

#[async_trait]
pub trait AptGroupRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<AptGroup>>;
    async fn list(&self) -> Result<Vec<AptGroup>>;
}

#[async_trait]
pub trait IocSourceRepository: Send + Sync {
    async fn get(&self, id: i64) -> Result<Option<IocSource>>;
    async fn list(&self) -> Result<Vec<IocSource>>;
    /// Stamps `last_fetched` after a fetch attempt, successful or not.
    async fn touch_last_fetched(&self, id: i64, at: DateTime<Utc>) -> Result<()>;
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS apt_groups (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    aliases TEXT NOT NULL DEFAULT '[]',
    description TEXT,
    sophistication TEXT,
    primary_motivation TEXT,
    target_sectors TEXT NOT NULL DEFAULT '[]',
    country TEXT,
    first_observed TEXT,
    last_observed TEXT,
    "references" TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS correlation_rules (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    rule_type TEXT NOT NULL,
    is_enabled INTEGER NOT NULL DEFAULT 1,
    event_source_type TEXT NOT NULL DEFAULT '[]',
    event_field_to_match TEXT,
    ioc_type_to_match TEXT,
    ioc_tags_match TEXT NOT NULL DEFAULT '[]',
    ioc_min_confidence INTEGER,
    threshold_count INTEGER,
    threshold_time_window_minutes INTEGER,
    aggregation_fields TEXT NOT NULL DEFAULT '[]',
    generated_offence_title_template TEXT NOT NULL,
    generated_offence_severity TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS offences (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    title TEXT NOT NULL,
    description TEXT,
    severity TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'new',
    correlation_rule_id INTEGER NOT NULL,
    triggering_event_summary TEXT NOT NULL,
    matched_ioc_details TEXT,
    attributed_apt_group_ids TEXT NOT NULL DEFAULT '[]',
    detected_at TEXT NOT NULL,
    notes TEXT,
    assigned_to_user_id INTEGER
);

CREATE TABLE IF NOT EXISTS response_actions (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    type TEXT NOT NULL,
    is_enabled INTEGER NOT NULL DEFAULT 1,
    default_params TEXT NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS response_pipelines (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    is_enabled INTEGER NOT NULL DEFAULT 1,
    trigger_correlation_rule_id INTEGER,
    actions_config TEXT NOT NULL DEFAULT '[]'
);

CREATE TABLE IF NOT EXISTS ioc_sources (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    source_type TEXT NOT NULL,
    url TEXT,
    description TEXT,
    is_enabled INTEGER NOT NULL DEFAULT 1,
    last_fetched TEXT
);

CREATE TABLE IF NOT EXISTS devices (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    username TEXT NOT NULL,
    encrypted_password TEXT NOT NULL,
    device_type TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'unknown',
    is_enabled INTEGER NOT NULL DEFAULT 1,
    os_version TEXT,
    syslog_configured_by_siem INTEGER NOT NULL DEFAULT 0,
    netflow_configured_by_siem INTEGER NOT NULL DEFAULT 0,
    last_successful_connection TEXT,
    last_status_update TEXT
);
"#;

/// The default relational repository implementation, backed by SQLite via
/// `sqlx`. Applies `SCHEMA` idempotently at construction rather than
/// depending on a migration framework.
#[derive(Clone)]
pub struct SqlxRelationalStore {
    pool: SqlitePool,
}

impl SqlxRelationalStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        // raw_sql: SCHEMA is several statements, which a prepared query
        // would truncate to the first.
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_rule_type(s: &str) -> RuleType {
    match s {
        "IOC_MATCH_IP" => RuleType::IocMatchIp,
        "THRESHOLD_LOGIN_FAILURES" => RuleType::ThresholdLoginFailures,
        _ => RuleType::ThresholdDataExfiltration,
    }
}

fn parse_severity(s: &str) -> Severity {
    match s {
        "low" => Severity::Low,
        "medium" => Severity::Medium,
        "critical" => Severity::Critical,
        _ => Severity::High,
    }
}

fn parse_json_vec<T: serde::de::DeserializeOwned + Default>(s: &str) -> T {
    serde_json::from_str(s).unwrap_or_default()
}

fn rule_from_row(row: &sqlx::sqlite::SqliteRow) -> CorrelationRule {
    CorrelationRule {
        id: row.get("id"),
        name: row.get("name"),
        rule_type: parse_rule_type(row.get::<String, _>("rule_type").as_str()),
        is_enabled: row.get::<i64, _>("is_enabled") != 0,
        event_source_type: parse_json_vec(row.get("event_source_type")),
        event_field_to_match: row.get("event_field_to_match"),
        ioc_type_to_match: row
            .get::<Option<String>, _>("ioc_type_to_match")
            .and_then(|s| serde_json::from_value(Value::String(s)).ok()),
        ioc_tags_match: parse_json_vec(row.get("ioc_tags_match")),
        ioc_min_confidence: row
            .get::<Option<i64>, _>("ioc_min_confidence")
            .map(|v| v as u8),
        threshold_count: row.get("threshold_count"),
        threshold_time_window_minutes: row.get("threshold_time_window_minutes"),
        aggregation_fields: parse_json_vec(row.get("aggregation_fields")),
        generated_offence_title_template: row.get("generated_offence_title_template"),
        generated_offence_severity: parse_severity(
            row.get::<String, _>("generated_offence_severity").as_str(),
        ),
    }
}

#[async_trait]
impl RuleRepository for SqlxRelationalStore {
    async fn list_enabled(&self) -> Result<Vec<CorrelationRule>> {
        let rows = sqlx::query("SELECT * FROM correlation_rules WHERE is_enabled = 1 LIMIT 1000")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(rule_from_row).collect())
    }

    async fn get(&self, id: i64) -> Result<Option<CorrelationRule>> {
        let row = sqlx::query("SELECT * FROM correlation_rules WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| rule_from_row(&r)))
    }
}

fn offence_status_str(s: OffenceStatus) -> &'static str {
    match s {
        OffenceStatus::New => "new",
        OffenceStatus::InProgress => "in_progress",
        OffenceStatus::ClosedFalsePositive => "closed_false_positive",
        OffenceStatus::ClosedTruePositive => "closed_true_positive",
        OffenceStatus::ClosedOther => "closed_other",
    }
}

fn parse_offence_status(s: &str) -> OffenceStatus {
    match s {
        "in_progress" => OffenceStatus::InProgress,
        "closed_false_positive" => OffenceStatus::ClosedFalsePositive,
        "closed_true_positive" => OffenceStatus::ClosedTruePositive,
        "closed_other" => OffenceStatus::ClosedOther,
        _ => OffenceStatus::New,
    }
}

fn offence_from_row(row: &sqlx::sqlite::SqliteRow) -> Offence {
    Offence {
        id: Some(row.get("id")),
        title: row.get("title"),
        description: row.get("description"),
        severity: parse_severity(row.get::<String, _>("severity").as_str()),
        status: parse_offence_status(row.get::<String, _>("status").as_str()),
        correlation_rule_id: row.get("correlation_rule_id"),
        triggering_event_summary: parse_json_vec(row.get("triggering_event_summary")),
        matched_ioc_details: row
            .get::<Option<String>, _>("matched_ioc_details")
            .map(|s| parse_json_vec(&s)),
        attributed_apt_group_ids: parse_json_vec(row.get("attributed_apt_group_ids")),
        detected_at: row
            .get::<String, _>("detected_at")
            .parse()
            .unwrap_or_else(|_| Utc::now()),
        notes: row.get("notes"),
        assigned_to_user_id: row.get("assigned_to_user_id"),
    }
}

#[async_trait]
impl OffenceRepository for SqlxRelationalStore {
    async fn create(&self, offence: Offence) -> Result<Offence> {
        let summary = serde_json::to_string(&offence.triggering_event_summary)?;
        let ioc_details = offence
            .matched_ioc_details
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let apt_ids = serde_json::to_string(&offence.attributed_apt_group_ids)?;

        let id: i64 = sqlx::query(
            "INSERT INTO offences
                (title, description, severity, status, correlation_rule_id,
                 triggering_event_summary, matched_ioc_details,
                 attributed_apt_group_ids, detected_at, notes, assigned_to_user_id)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id",
        )
        .bind(&offence.title)
        .bind(&offence.description)
        .bind(offence.severity.as_str())
        .bind(offence_status_str(offence.status))
        .bind(offence.correlation_rule_id)
        .bind(summary)
        .bind(ioc_details)
        .bind(apt_ids)
        .bind(offence.detected_at.to_rfc3339())
        .bind(&offence.notes)
        .bind(offence.assigned_to_user_id)
        .fetch_one(&self.pool)
        .await?
        .get(0);

        Ok(Offence {
            id: Some(id),
            ..offence
        })
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<Offence>> {
        let rows = sqlx::query("SELECT * FROM offences ORDER BY detected_at DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(offence_from_row).collect())
    }

    async fn list_detected_since(&self, since: DateTime<Utc>) -> Result<Vec<Offence>> {
        let rows = sqlx::query("SELECT * FROM offences WHERE detected_at >= ? ORDER BY detected_at DESC")
            .bind(since.to_rfc3339())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(offence_from_row).collect())
    }

    async fn summary_by_severity_since(&self, since: DateTime<Utc>) -> Result<Vec<(Severity, i64)>> {
        let rows = sqlx::query(
            "SELECT severity, COUNT(*) as cnt FROM offences WHERE detected_at >= ? GROUP BY severity",
        )
        .bind(since.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (parse_severity(r.get::<String, _>("severity").as_str()), r.get("cnt")))
            .collect())
    }

    async fn update_triage(
        &self,
        id: i64,
        status: OffenceStatus,
        severity: Option<Severity>,
        notes: Option<String>,
    ) -> Result<Option<Offence>> {
        let affected = sqlx::query(
            "UPDATE offences SET
                status = ?,
                severity = COALESCE(?, severity),
                notes = COALESCE(?, notes)
             WHERE id = ?",
        )
        .bind(offence_status_str(status))
        .bind(severity.map(|s| s.as_str()))
        .bind(notes)
        .bind(id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Ok(None);
        }
        let row = sqlx::query("SELECT * FROM offences WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| offence_from_row(&r)))
    }
}

#[async_trait]
impl PipelineRepository for SqlxRelationalStore {
    async fn find_by_trigger_rule(&self, rule_id: i64) -> Result<Option<ResponsePipeline>> {
        let row = sqlx::query(
            "SELECT * FROM response_pipelines WHERE trigger_correlation_rule_id = ? AND is_enabled = 1 LIMIT 1",
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| ResponsePipeline {
            id: r.get("id"),
            name: r.get("name"),
            is_enabled: r.get::<i64, _>("is_enabled") != 0,
            trigger_correlation_rule_id: r.get("trigger_correlation_rule_id"),
            actions_config: parse_json_vec::<Vec<PipelineStep>>(r.get("actions_config")),
        }))
    }
}

#[async_trait]
impl ActionRepository for SqlxRelationalStore {
    async fn get(&self, id: i64) -> Result<Option<ResponseAction>> {
        let row = sqlx::query("SELECT * FROM response_actions WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| ResponseAction {
            id: r.get("id"),
            name: r.get("name"),
            action_type: parse_action_type(r.get::<String, _>("type").as_str()),
            is_enabled: r.get::<i64, _>("is_enabled") != 0,
            default_params: parse_json_vec(r.get("default_params")),
        }))
    }
}

fn parse_action_type(s: &str) -> ResponseActionType {
    match s {
        "unblock_ip" => ResponseActionType::UnblockIp,
        "send_email" => ResponseActionType::SendEmail,
        "create_ticket" => ResponseActionType::CreateTicket,
        "isolate_host" => ResponseActionType::IsolateHost,
        _ => ResponseActionType::BlockIp,
    }
}

#[async_trait]
impl DeviceRepository for SqlxRelationalStore {
    async fn get(&self, id: i64) -> Result<Option<Device>> {
        let row = sqlx::query("SELECT * FROM devices WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| Device {
            id: r.get("id"),
            name: r.get("name"),
            host: r.get("host"),
            port: r.get::<i64, _>("port") as u16,
            username: r.get("username"),
            encrypted_password: r.get("encrypted_password"),
            device_type: r.get("device_type"),
            status: parse_device_status(r.get::<String, _>("status").as_str()),
            is_enabled: r.get::<i64, _>("is_enabled") != 0,
            os_version: r.get("os_version"),
            syslog_configured_by_siem: r.get::<i64, _>("syslog_configured_by_siem") != 0,
            netflow_configured_by_siem: r.get::<i64, _>("netflow_configured_by_siem") != 0,
            last_successful_connection: r
                .get::<Option<String>, _>("last_successful_connection")
                .and_then(|s| s.parse().ok()),
            last_status_update: r
                .get::<Option<String>, _>("last_status_update")
                .and_then(|s| s.parse().ok()),
        }))
    }

    async fn update_status(&self, id: i64, status: DeviceStatus) -> Result<()> {
        sqlx::query("UPDATE devices SET status = ?, last_status_update = ? WHERE id = ?")
            .bind(device_status_str(status))
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_connection_success(&self, id: i64, os_version: Option<&str>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "UPDATE devices SET
                status = 'reachable',
                os_version = COALESCE(?, os_version),
                last_successful_connection = ?,
                last_status_update = ?
             WHERE id = ?",
        )
        .bind(os_version)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_syslog_configured(&self, id: i64, configured: bool) -> Result<()> {
        sqlx::query("UPDATE devices SET syslog_configured_by_siem = ? WHERE id = ?")
            .bind(configured as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_netflow_configured(&self, id: i64, configured: bool) -> Result<()> {
        sqlx::query("UPDATE devices SET netflow_configured_by_siem = ? WHERE id = ?")
            .bind(configured as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn device_status_str(s: DeviceStatus) -> &'static str {
    match s {
        DeviceStatus::Reachable => "reachable",
        DeviceStatus::Unreachable => "unreachable",
        DeviceStatus::Error => "error",
        DeviceStatus::Configuring => "configuring",
        DeviceStatus::Unknown => "unknown",
    }
}

fn parse_device_status(s: &str) -> DeviceStatus {
    match s {
        "reachable" => DeviceStatus::Reachable,
        "unreachable" => DeviceStatus::Unreachable,
        "error" => DeviceStatus::Error,
        "configuring" => DeviceStatus::Configuring,
        _ => DeviceStatus::Unknown,
    }
}

#[async_trait]
impl AptGroupRepository for SqlxRelationalStore {
    async fn get(&self, id: i64) -> Result<Option<AptGroup>> {
        let row = sqlx::query("SELECT * FROM apt_groups WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| apt_from_row(&r)))
    }

    async fn list(&self) -> Result<Vec<AptGroup>> {
        let rows = sqlx::query("SELECT * FROM apt_groups")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(apt_from_row).collect())
    }
}

#[async_trait]
impl IocSourceRepository for SqlxRelationalStore {
    async fn get(&self, id: i64) -> Result<Option<IocSource>> {
        let row = sqlx::query("SELECT * FROM ioc_sources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| ioc_source_from_row(&r)))
    }

    async fn list(&self) -> Result<Vec<IocSource>> {
        let rows = sqlx::query("SELECT * FROM ioc_sources ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(ioc_source_from_row).collect())
    }

    async fn touch_last_fetched(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE ioc_sources SET last_fetched = ? WHERE id = ?")
            .bind(at.to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn parse_source_type(s: &str) -> IocSourceType {
    match s {
        "misp" => IocSourceType::Misp,
        "opencti" => IocSourceType::Opencti,
        "stix_feed" => IocSourceType::StixFeed,
        "csv_url" => IocSourceType::CsvUrl,
        "mock_apt_report" => IocSourceType::MockAptReport,
        _ => IocSourceType::Internal,
    }
}

fn ioc_source_from_row(row: &sqlx::sqlite::SqliteRow) -> IocSource {
    IocSource {
        id: row.get("id"),
        name: row.get("name"),
        source_type: parse_source_type(row.get::<String, _>("source_type").as_str()),
        url: row.get("url"),
        description: row.get("description"),
        is_enabled: row.get::<i64, _>("is_enabled") != 0,
        last_fetched: row
            .get::<Option<String>, _>("last_fetched")
            .and_then(|s| s.parse().ok()),
    }
}

fn apt_from_row(row: &sqlx::sqlite::SqliteRow) -> AptGroup {
    AptGroup {
        id: row.get("id"),
        name: row.get("name"),
        aliases: parse_json_vec(row.get("aliases")),
        description: row.get("description"),
        sophistication: row.get("sophistication"),
        primary_motivation: row.get("primary_motivation"),
        target_sectors: parse_json_vec(row.get("target_sectors")),
        country: row.get("country"),
        first_observed: row
            .get::<Option<String>, _>("first_observed")
            .and_then(|s| s.parse().ok()),
        last_observed: row
            .get::<Option<String>, _>("last_observed")
            .and_then(|s| s.parse().ok()),
        references: parse_json_vec(row.get("references")),
    }
}
