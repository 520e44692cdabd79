use std::future::Future;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{Anr, RiskRow};

const LAST_COLLECTED_SETTING: &str = "stats_last_collected_on";
const MARKER_DATE_FORMAT: &str = "%Y-%m-%d";

/// Read access to analysis records and the daily collection marker.
pub trait StatsRepository: Send + Sync {
    /// All records, ordered by id.
    fn find_all_anrs(&self) -> impl Future<Output = anyhow::Result<Vec<Anr>>> + Send;

    /// Records whose id is in `ids`, ordered by id. Unknown ids are skipped.
    fn find_anrs_by_ids(
        &self,
        ids: &[i32],
    ) -> impl Future<Output = anyhow::Result<Vec<Anr>>> + Send;

    fn fetch_risk_rows(
        &self,
        anr_id: i32,
    ) -> impl Future<Output = anyhow::Result<Vec<RiskRow>>> + Send;

    fn last_collected_on(&self) -> impl Future<Output = anyhow::Result<Option<NaiveDate>>> + Send;

    fn mark_collected(&self, date: NaiveDate) -> impl Future<Output = anyhow::Result<()>> + Send;
}

#[derive(Debug, Clone)]
pub struct PgStatsRepository {
    pool: PgPool,
}

impl PgStatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn anr_from_row(row: &sqlx::postgres::PgRow) -> Anr {
    Anr {
        id: row.get("id"),
        uuid: row.get("uuid"),
        label: row.get("label"),
        seuil1: row.get("seuil1"),
        seuil2: row.get("seuil2"),
    }
}

impl StatsRepository for PgStatsRepository {
    async fn find_all_anrs(&self) -> anyhow::Result<Vec<Anr>> {
        let rows = sqlx::query(
            "SELECT id, uuid, label, seuil1, seuil2 FROM anr_stats.anrs ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to load analysis records")?;

        Ok(rows.iter().map(anr_from_row).collect())
    }

    async fn find_anrs_by_ids(&self, ids: &[i32]) -> anyhow::Result<Vec<Anr>> {
        let rows = sqlx::query(
            "SELECT id, uuid, label, seuil1, seuil2 FROM anr_stats.anrs \
             WHERE id = ANY($1) ORDER BY id",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .context("failed to load analysis records by id")?;

        Ok(rows.iter().map(anr_from_row).collect())
    }

    async fn fetch_risk_rows(&self, anr_id: i32) -> anyhow::Result<Vec<RiskRow>> {
        let rows = sqlx::query(
            "SELECT threat_label, vulnerability_label, cache_max_risk \
             FROM anr_stats.instance_risks WHERE anr_id = $1 ORDER BY id",
        )
        .bind(anr_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load risks of analysis record {anr_id}"))?;

        Ok(rows
            .iter()
            .map(|row| RiskRow {
                threat_label: row.get("threat_label"),
                vulnerability_label: row.get("vulnerability_label"),
                max_risk: row.get("cache_max_risk"),
            })
            .collect())
    }

    async fn last_collected_on(&self) -> anyhow::Result<Option<NaiveDate>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM anr_stats.settings WHERE name = $1")
                .bind(LAST_COLLECTED_SETTING)
                .fetch_optional(&self.pool)
                .await
                .context("failed to read the stats collection marker")?;

        value
            .map(|raw| {
                NaiveDate::parse_from_str(&raw, MARKER_DATE_FORMAT)
                    .with_context(|| format!("invalid stats collection marker `{raw}`"))
            })
            .transpose()
    }

    async fn mark_collected(&self, date: NaiveDate) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO anr_stats.settings (name, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (name) DO UPDATE
            SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(LAST_COLLECTED_SETTING)
        .bind(date.format(MARKER_DATE_FORMAT).to_string())
        .execute(&self.pool)
        .await
        .context("failed to write the stats collection marker")?;

        Ok(())
    }
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let anrs = vec![
        (
            Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?,
            "Head office assessment",
            4,
            8,
        ),
        (
            Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?,
            "Data center assessment",
            6,
            12,
        ),
        (
            Uuid::parse_str("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2")?,
            "Remote work assessment",
            4,
            10,
        ),
    ];

    for (uuid, label, seuil1, seuil2) in anrs {
        sqlx::query(
            r#"
            INSERT INTO anr_stats.anrs (uuid, label, seuil1, seuil2)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (uuid) DO UPDATE
            SET label = EXCLUDED.label, seuil1 = EXCLUDED.seuil1, seuil2 = EXCLUDED.seuil2
            "#,
        )
        .bind(uuid)
        .bind(label)
        .bind(seuil1)
        .bind(seuil2)
        .execute(pool)
        .await?;
    }

    let risks = vec![
        ("seed-001", "Head office assessment", "Theft", "Unlocked server room", 12),
        ("seed-002", "Head office assessment", "Fire", "No extinguisher", 6),
        ("seed-003", "Head office assessment", "Theft", "No visitor badge", 3),
        ("seed-004", "Data center assessment", "Power outage", "Single supply line", 16),
        ("seed-005", "Data center assessment", "Flood", "Basement location", 9),
        ("seed-006", "Data center assessment", "Malware", "Unpatched hosts", -1),
        ("seed-007", "Remote work assessment", "Eavesdropping", "Public wifi", 8),
        ("seed-008", "Remote work assessment", "Theft", "Laptop left in car", 11),
    ];

    for (source_key, anr_label, threat, vulnerability, max_risk) in risks {
        let anr_id: i32 = sqlx::query("SELECT id FROM anr_stats.anrs WHERE label = $1")
            .bind(anr_label)
            .fetch_one(pool)
            .await?
            .get("id");

        sqlx::query(
            r#"
            INSERT INTO anr_stats.instance_risks
            (anr_id, threat_label, vulnerability_label, cache_max_risk, source_key)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (source_key) DO NOTHING
            "#,
        )
        .bind(anr_id)
        .bind(threat)
        .bind(vulnerability)
        .bind(max_risk)
        .bind(source_key)
        .execute(pool)
        .await?;
    }

    Ok(())
}
