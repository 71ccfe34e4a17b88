use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadsync_core::{
    CanonicalLead, Classification, Consultant, ConsultantId, Enrichment, LeadId, LeadStatus,
    NewLead, SourceLeadRow,
};
use sqlx::migrate::Migrator;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{LeadStore, SourceSpec, StoreError};

pub static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const LEAD_COLUMNS: &str = "id, name, phone, vehicle_interest, assigned_consultant_id, status, \
                            ai_classification, ai_reasoning, source, created_at";

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::ConstraintViolation {
                phone: db.message().to_string(),
            },
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => StoreError::Unavailable(err.to_string()),
            other => StoreError::Backend(anyhow!(other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PgLeadStore {
    pool: PgPool,
}

impl PgLeadStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .context("running lead store migrations")
    }
}

fn optional_text(column: Option<&str>) -> String {
    column
        .map(|c| format!("{c}::text"))
        .unwrap_or_else(|| "NULL::text".to_string())
}

fn select_unprocessed_sql(spec: &SourceSpec) -> Result<String, StoreError> {
    spec.validate()?;
    let c = &spec.columns;
    Ok(format!(
        "SELECT {id}::text AS id, {name}::text AS name, {phone}::text AS phone_raw, \
         {vehicle} AS vehicle_interest, {consultant}::text AS consultant_label, \
         {classification} AS prior_classification, {created_at}::timestamptz AS created_at \
         FROM {table} WHERE COALESCE({processed}, FALSE) = FALSE \
         ORDER BY {created_at} ASC NULLS LAST, {id}",
        id = c.id,
        name = c.name,
        phone = c.phone,
        vehicle = optional_text(c.vehicle_interest.as_deref()),
        consultant = c.consultant,
        classification = optional_text(c.classification.as_deref()),
        created_at = c.created_at,
        table = spec.table,
        processed = c.processed,
    ))
}

fn mark_processed_sql(spec: &SourceSpec) -> Result<String, StoreError> {
    spec.validate()?;
    let c = &spec.columns;
    Ok(format!(
        "UPDATE {table} SET {processed} = TRUE \
         WHERE {id}::text = $1 AND COALESCE({processed}, FALSE) = FALSE",
        table = spec.table,
        processed = c.processed,
        id = c.id,
    ))
}

fn source_row_from_pg(source_id: &str, row: &PgRow) -> Result<SourceLeadRow, sqlx::Error> {
    let prior: Option<String> = row.try_get("prior_classification")?;
    let prior_classification = match prior.as_deref().map(str::parse::<Classification>) {
        Some(Ok(Classification::Unclassified)) | None => None,
        Some(Ok(label)) => Some(label),
        Some(Err(err)) => {
            debug!(source_id, error = %err, "ignoring unknown upstream classification");
            None
        }
    };
    Ok(SourceLeadRow {
        source_id: source_id.to_string(),
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        phone_raw: row.try_get("phone_raw")?,
        vehicle_interest: row.try_get("vehicle_interest")?,
        consultant_label: row.try_get("consultant_label")?,
        prior_classification,
        created_at: row.try_get::<Option<DateTime<Utc>>, _>("created_at")?,
        processed: false,
        decode_error: None,
    })
}

/// Placeholder for a row that failed to decode, so it is reported instead of dropped.
fn undecodable_row(source_id: &str, id: Option<String>, error: &str) -> SourceLeadRow {
    SourceLeadRow {
        source_id: source_id.to_string(),
        id: id.unwrap_or_default(),
        name: None,
        phone_raw: None,
        vehicle_interest: None,
        consultant_label: None,
        prior_classification: None,
        created_at: None,
        processed: false,
        decode_error: Some(error.to_string()),
    }
}

fn lead_from_pg(row: &PgRow) -> Result<CanonicalLead, StoreError> {
    let status: String = row.try_get("status")?;
    let classification: String = row.try_get("ai_classification")?;
    Ok(CanonicalLead {
        id: LeadId(row.try_get::<Uuid, _>("id")?),
        name: row.try_get("name")?,
        phone: row.try_get("phone")?,
        vehicle_interest: row.try_get("vehicle_interest")?,
        assigned_consultant_id: ConsultantId(row.try_get("assigned_consultant_id")?),
        status: status.parse::<LeadStatus>().map_err(|e| anyhow!(e))?,
        ai_classification: classification.parse().unwrap_or_default(),
        ai_reasoning: row.try_get("ai_reasoning")?,
        source: row.try_get("source")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl LeadStore for PgLeadStore {
    async fn list_unprocessed(&self, source: &SourceSpec) -> Result<Vec<SourceLeadRow>, StoreError> {
        let sql = select_unprocessed_sql(source)?;
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            match source_row_from_pg(&source.source_id, row) {
                Ok(parsed) => out.push(parsed),
                Err(err) => {
                    let id = row.try_get::<Option<String>, _>("id").ok().flatten();
                    warn!(
                        source_id = %source.source_id,
                        row_id = id.as_deref().unwrap_or("?"),
                        error = %err,
                        "undecodable intake row"
                    );
                    out.push(undecodable_row(&source.source_id, id, &err.to_string()));
                }
            }
        }
        Ok(out)
    }

    async fn active_consultants(&self) -> Result<Vec<Consultant>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, is_active
              FROM consultants
             WHERE is_active
             ORDER BY id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(Consultant {
                id: ConsultantId(row.try_get("id")?),
                name: row.try_get("name")?,
                is_active: row.try_get("is_active")?,
            });
        }
        Ok(out)
    }

    async fn find_lead_by_phone(&self, phone: &str) -> Result<Option<CanonicalLead>, StoreError> {
        let sql = format!("SELECT {LEAD_COLUMNS} FROM leads WHERE phone = $1");
        let row = sqlx::query(&sql)
            .bind(phone)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(lead_from_pg).transpose()
    }

    async fn insert_lead(&self, lead: NewLead) -> Result<LeadId, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO leads
                (id, name, phone, vehicle_interest, assigned_consultant_id,
                 status, ai_classification, source, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (phone) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&lead.name)
        .bind(&lead.phone)
        .bind(&lead.vehicle_interest)
        .bind(lead.assigned_consultant_id.0)
        .bind(lead.status.as_str())
        .bind(lead.ai_classification.as_str())
        .bind(&lead.source)
        .bind(lead.created_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(LeadId(row.try_get("id")?)),
            None => Err(StoreError::ConstraintViolation { phone: lead.phone }),
        }
    }

    async fn mark_processed(&self, source: &SourceSpec, row_id: &str) -> Result<bool, StoreError> {
        let sql = mark_processed_sql(source)?;
        let result = sqlx::query(&sql).bind(row_id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_lead_enrichment(
        &self,
        lead_id: LeadId,
        enrichment: &Enrichment,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE leads
               SET ai_classification = $2,
                   ai_reasoning = $3,
                   classified_at = now()
             WHERE id = $1
            "#,
        )
        .bind(lead_id.0)
        .bind(enrichment.classification.as_str())
        .bind(&enrichment.reasoning)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("lead {lead_id}")));
        }
        Ok(())
    }

    async fn list_lead_phones(&self) -> Result<Vec<(String, LeadId)>, StoreError> {
        let rows = sqlx::query("SELECT phone, id FROM leads")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push((row.try_get("phone")?, LeadId(row.try_get("id")?)));
        }
        Ok(out)
    }

    async fn list_unclassified_leads(&self, limit: usize) -> Result<Vec<CanonicalLead>, StoreError> {
        let sql = format!(
            "SELECT {LEAD_COLUMNS} FROM leads \
             WHERE ai_classification = 'unclassified' \
             ORDER BY created_at LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(lead_from_pg).collect()
    }
}
