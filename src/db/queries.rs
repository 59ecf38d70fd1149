use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use uuid::Uuid;

use crate::db::{DeletedJob, FinalizeJob, RewardStore, StoreError};
use crate::models::account::UserAccount;
use crate::models::job::{JobState, ScanOutcome, ScanSource, VerificationJob};
use crate::models::voucher::Voucher;

const JOB_COLUMNS: &str = "id, actor_id, display_name, avatar_ref, image_key, is_public, source, \
     simulated, state, outcome, score, failure_reason, created_at, completed_at";

/// PostgreSQL-backed reward store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn job_from_row(row: &PgRow) -> Result<VerificationJob, StoreError> {
    let state: String = row.try_get("state")?;
    let state = JobState::from_str(&state)
        .map_err(|_| StoreError::Corrupt(format!("unknown job state '{}'", state)))?;

    let source: String = row.try_get("source")?;
    let source = ScanSource::from_str(&source)
        .map_err(|_| StoreError::Corrupt(format!("unknown scan source '{}'", source)))?;

    let outcome: Option<Json<ScanOutcome>> = row.try_get("outcome")?;

    Ok(VerificationJob {
        id: row.try_get("id")?,
        actor_id: row.try_get("actor_id")?,
        display_name: row.try_get("display_name")?,
        avatar_ref: row.try_get("avatar_ref")?,
        image_key: row.try_get("image_key")?,
        is_public: row.try_get("is_public")?,
        source,
        simulated: row.try_get("simulated")?,
        state,
        outcome: outcome.map(|Json(outcome)| outcome),
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get("created_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn account_from_row(row: &PgRow) -> Result<UserAccount, StoreError> {
    Ok(UserAccount {
        actor_id: row.try_get("actor_id")?,
        display_name: row.try_get("display_name")?,
        avatar_ref: row.try_get("avatar_ref")?,
        total_score: row.try_get("total_score")?,
        last_active_at: row.try_get("last_active_at")?,
    })
}

fn voucher_from_row(row: &PgRow) -> Result<Voucher, StoreError> {
    Ok(Voucher {
        id: row.try_get("id")?,
        actor_id: row.try_get("actor_id")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        code: row.try_get("code")?,
        used: row.try_get("used")?,
        created_at: row.try_get("created_at")?,
        expires_at: row.try_get("expires_at")?,
    })
}

#[async_trait]
impl RewardStore for PgStore {
    async fn insert_job(&self, job: &VerificationJob) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scan_jobs (id, actor_id, display_name, avatar_ref, image_key, is_public,
                                   source, simulated, state, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(job.id)
        .bind(&job.actor_id)
        .bind(&job.display_name)
        .bind(&job.avatar_ref)
        .bind(&job.image_key)
        .bind(job.is_public)
        .bind(job.source.to_string())
        .bind(job.simulated)
        .bind(job.state.to_string())
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, job_id: Uuid) -> Result<Option<VerificationJob>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM scan_jobs WHERE id = $1", JOB_COLUMNS))
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(job_from_row).transpose()
    }

    async fn finalize_job(&self, update: FinalizeJob<'_>) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        // The state guard makes the transition, and therefore the credit, happen once.
        let transitioned = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET state = 'completed',
                outcome = $2,
                score = $3,
                failure_reason = NULL,
                completed_at = $4
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(update.job_id)
        .bind(Json(update.outcome))
        .bind(update.score_delta)
        .bind(update.completed_at)
        .execute(&mut *tx)
        .await?;

        if transitioned.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        if update.score_delta > 0 {
            sqlx::query(
                r#"
                INSERT INTO user_accounts (actor_id, display_name, avatar_ref, total_score, last_active_at)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (actor_id) DO UPDATE
                SET total_score = user_accounts.total_score + EXCLUDED.total_score,
                    last_active_at = EXCLUDED.last_active_at,
                    display_name = COALESCE(user_accounts.display_name, EXCLUDED.display_name),
                    avatar_ref = COALESCE(user_accounts.avatar_ref, EXCLUDED.avatar_ref)
                "#,
            )
            .bind(update.actor_id)
            .bind(&update.profile.display_name)
            .bind(&update.profile.avatar_ref)
            .bind(update.score_delta)
            .bind(update.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(voucher) = update.voucher {
            sqlx::query(
                r#"
                INSERT INTO vouchers (id, actor_id, title, description, code, used, created_at, expires_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(voucher.id)
            .bind(&voucher.actor_id)
            .bind(&voucher.title)
            .bind(&voucher.description)
            .bind(&voucher.code)
            .bind(voucher.used)
            .bind(voucher.created_at)
            .bind(voucher.expires_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn fail_job(&self, job_id: Uuid, reason: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE scan_jobs
            SET state = 'failed',
                failure_reason = $2,
                completed_at = NOW()
            WHERE id = $1 AND state = 'pending'
            "#,
        )
        .bind(job_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn pending_jobs(&self, created_before: DateTime<Utc>) -> Result<Vec<Uuid>, StoreError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id FROM scan_jobs
            WHERE state = 'pending' AND created_at < $1
            ORDER BY created_at
            "#,
        )
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn delete_job(
        &self,
        job_id: Uuid,
        actor_id: &str,
    ) -> Result<Option<DeletedJob>, StoreError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "DELETE FROM scan_jobs WHERE id = $1 AND actor_id = $2 RETURNING {}",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .bind(actor_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(None);
        };

        let job = job_from_row(&row)?;
        let credited: i64 = row.try_get("score")?;

        let total_row = if credited > 0 {
            sqlx::query(
                r#"
                UPDATE user_accounts
                SET total_score = total_score - $2
                WHERE actor_id = $1
                RETURNING total_score
                "#,
            )
            .bind(actor_id)
            .bind(credited)
            .fetch_optional(&mut *tx)
            .await?
        } else {
            sqlx::query("SELECT total_score FROM user_accounts WHERE actor_id = $1")
                .bind(actor_id)
                .fetch_optional(&mut *tx)
                .await?
        };

        let total_score = match total_row {
            Some(r) => r.try_get("total_score")?,
            None => 0,
        };

        tx.commit().await?;
        Ok(Some(DeletedJob { job, total_score }))
    }

    async fn set_visibility(&self, job_id: Uuid, is_public: bool) -> Result<bool, StoreError> {
        let result = sqlx::query("UPDATE scan_jobs SET is_public = $2 WHERE id = $1")
            .bind(job_id)
            .bind(is_public)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn get_account(&self, actor_id: &str) -> Result<Option<UserAccount>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT actor_id, display_name, avatar_ref, total_score, last_active_at
            FROM user_accounts
            WHERE actor_id = $1
            "#,
        )
        .bind(actor_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(account_from_row).transpose()
    }

    async fn top_accounts(&self, limit: u32) -> Result<Vec<UserAccount>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT actor_id, display_name, avatar_ref, total_score, last_active_at
            FROM user_accounts
            ORDER BY total_score DESC, actor_id ASC
            LIMIT $1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(account_from_row).collect()
    }

    async fn count_vouchers_since(
        &self,
        actor_id: &str,
        since: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS issued FROM vouchers WHERE actor_id = $1 AND created_at >= $2",
        )
        .bind(actor_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        let issued: i64 = row.try_get("issued")?;
        Ok(issued.max(0) as u64)
    }

    async fn list_vouchers(&self, actor_id: &str) -> Result<Vec<Voucher>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, actor_id, title, description, code, used, created_at, expires_at
            FROM vouchers
            WHERE actor_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(actor_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(voucher_from_row).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
