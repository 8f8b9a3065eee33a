use anyhow::{Context as _, anyhow};
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, TransactionTrait,
    sea_query::{Expr, OnConflict},
};
use uuid::Uuid;

use questline_export_schema::{
    export_job_parts, export_jobs, outbox_records, processed_events, user_profiles,
};

use crate::domain::repository::{ExportJobRepository, LocalPartSource, OutboxRepository};
use crate::domain::types::{
    ExportJob, ExportJobStatus, JobPart, JobTransition, OutboxRecord, OutboxStatus,
};
use crate::error::ExportServiceError;

// ── Export job repository ────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbExportJobRepository {
    pub db: DatabaseConnection,
}

impl ExportJobRepository for DbExportJobRepository {
    async fn create_job(
        &self,
        job: &ExportJob,
        services: &[String],
        fanout: &OutboxRecord,
    ) -> Result<(), ExportServiceError> {
        self.db
            .transaction::<_, (), sea_orm::DbErr>(|txn| {
                let job = job.clone();
                let services = services.to_vec();
                let fanout = fanout.clone();
                Box::pin(async move {
                    export_jobs::ActiveModel {
                        id: Set(job.id),
                        user_id: Set(job.user_id),
                        status: Set(job.status.as_str().to_owned()),
                        created_at: Set(job.created_at),
                        expires_at: Set(job.expires_at),
                        zip_object_key: Set(None),
                        failure_reason: Set(None),
                    }
                    .insert(txn)
                    .await?;

                    for service in &services {
                        export_job_parts::ActiveModel {
                            job_id: Set(job.id),
                            service: Set(service.clone()),
                            received: Set(false),
                            received_at: Set(None),
                        }
                        .insert(txn)
                        .await?;
                    }

                    outbox_records::ActiveModel {
                        id: Set(fanout.id),
                        topic: Set(fanout.topic.clone()),
                        partition_key: Set(fanout.partition_key.clone()),
                        envelope: Set(fanout.envelope.clone()),
                        status: Set(fanout.status.as_str().to_owned()),
                        attempts: Set(fanout.attempts),
                        last_error: Set(fanout.last_error.clone()),
                        created_at: Set(fanout.created_at),
                        next_attempt_at: Set(fanout.next_attempt_at),
                        sent_at: Set(fanout.sent_at),
                    }
                    .insert(txn)
                    .await?;
                    Ok(())
                })
            })
            .await
            .context("create export job with outbox")?;
        Ok(())
    }

    async fn find_job(&self, job_id: Uuid) -> Result<Option<ExportJob>, ExportServiceError> {
        let model = export_jobs::Entity::find_by_id(job_id)
            .one(&self.db)
            .await
            .context("find export job")?;
        model.map(job_from_model).transpose()
    }

    async fn mark_running(&self, job_id: Uuid) -> Result<(), ExportServiceError> {
        export_jobs::Entity::update_many()
            .filter(export_jobs::Column::Id.eq(job_id))
            .filter(export_jobs::Column::Status.eq(ExportJobStatus::Pending.as_str()))
            .col_expr(
                export_jobs::Column::Status,
                Expr::value(ExportJobStatus::Running.as_str()),
            )
            .exec(&self.db)
            .await
            .context("mark export job running")?;
        Ok(())
    }

    async fn find_part(
        &self,
        job_id: Uuid,
        service: &str,
    ) -> Result<Option<JobPart>, ExportServiceError> {
        let model = export_job_parts::Entity::find_by_id((job_id, service.to_owned()))
            .one(&self.db)
            .await
            .context("find export job part")?;
        Ok(model.map(part_from_model))
    }

    async fn is_processed(
        &self,
        consumer_group: &str,
        event_id: Uuid,
    ) -> Result<bool, ExportServiceError> {
        let found = processed_events::Entity::find_by_id((consumer_group.to_owned(), event_id))
            .one(&self.db)
            .await
            .context("look up processed event")?;
        Ok(found.is_some())
    }

    async fn record_part_delivery(
        &self,
        consumer_group: &str,
        event_id: Option<Uuid>,
        job_id: Uuid,
        service: &str,
        at: DateTime<Utc>,
        transition: Option<&JobTransition>,
    ) -> Result<bool, ExportServiceError> {
        let applied = self
            .db
            .transaction::<_, bool, sea_orm::DbErr>(|txn| {
                let consumer_group = consumer_group.to_owned();
                let service = service.to_owned();
                let transition = transition.cloned();
                Box::pin(async move {
                    if let Some(event_id) = event_id {
                        // ON CONFLICT DO NOTHING keeps a duplicate from
                        // aborting the transaction; zero inserted rows is
                        // the duplicate signal.
                        let inserted =
                            processed_events::Entity::insert(processed_events::ActiveModel {
                                consumer_group: Set(consumer_group),
                                event_id: Set(event_id),
                                processed_at: Set(at),
                            })
                            .on_conflict(
                                OnConflict::columns([
                                    processed_events::Column::ConsumerGroup,
                                    processed_events::Column::EventId,
                                ])
                                .do_nothing()
                                .to_owned(),
                            )
                            .exec_without_returning(txn)
                            .await?;
                        if inserted == 0 {
                            return Ok(false);
                        }
                    }

                    export_job_parts::Entity::update_many()
                        .filter(export_job_parts::Column::JobId.eq(job_id))
                        .filter(export_job_parts::Column::Service.eq(service.as_str()))
                        .col_expr(export_job_parts::Column::Received, Expr::value(true))
                        .col_expr(export_job_parts::Column::ReceivedAt, Expr::value(at))
                        .exec(txn)
                        .await?;

                    match transition {
                        Some(JobTransition::Complete { zip_object_key }) => {
                            export_jobs::Entity::update_many()
                                .filter(export_jobs::Column::Id.eq(job_id))
                                .filter(
                                    export_jobs::Column::Status
                                        .eq(ExportJobStatus::Running.as_str()),
                                )
                                .col_expr(
                                    export_jobs::Column::Status,
                                    Expr::value(ExportJobStatus::Completed.as_str()),
                                )
                                .col_expr(
                                    export_jobs::Column::ZipObjectKey,
                                    Expr::value(zip_object_key),
                                )
                                .exec(txn)
                                .await?;
                        }
                        Some(JobTransition::Fail { reason }) => {
                            export_jobs::Entity::update_many()
                                .filter(export_jobs::Column::Id.eq(job_id))
                                .filter(
                                    export_jobs::Column::Status
                                        .eq(ExportJobStatus::Running.as_str()),
                                )
                                .col_expr(
                                    export_jobs::Column::Status,
                                    Expr::value(ExportJobStatus::Failed.as_str()),
                                )
                                .col_expr(
                                    export_jobs::Column::FailureReason,
                                    Expr::value(reason),
                                )
                                .exec(txn)
                                .await?;
                        }
                        None => {}
                    }
                    Ok(true)
                })
            })
            .await
            .context("record part delivery")?;
        Ok(applied)
    }

    async fn list_parts(&self, job_id: Uuid) -> Result<Vec<JobPart>, ExportServiceError> {
        let models = export_job_parts::Entity::find()
            .filter(export_job_parts::Column::JobId.eq(job_id))
            .order_by_asc(export_job_parts::Column::Service)
            .all(&self.db)
            .await
            .context("list export job parts")?;
        Ok(models.into_iter().map(part_from_model).collect())
    }

    async fn complete_if_running(
        &self,
        job_id: Uuid,
        zip_object_key: &str,
    ) -> Result<bool, ExportServiceError> {
        let result = export_jobs::Entity::update_many()
            .filter(export_jobs::Column::Id.eq(job_id))
            .filter(export_jobs::Column::Status.eq(ExportJobStatus::Running.as_str()))
            .col_expr(
                export_jobs::Column::Status,
                Expr::value(ExportJobStatus::Completed.as_str()),
            )
            .col_expr(
                export_jobs::Column::ZipObjectKey,
                Expr::value(zip_object_key),
            )
            .exec(&self.db)
            .await
            .context("complete export job")?;
        Ok(result.rows_affected > 0)
    }

    async fn fail_if_running(
        &self,
        job_id: Uuid,
        reason: &str,
    ) -> Result<bool, ExportServiceError> {
        let result = export_jobs::Entity::update_many()
            .filter(export_jobs::Column::Id.eq(job_id))
            .filter(export_jobs::Column::Status.eq(ExportJobStatus::Running.as_str()))
            .col_expr(
                export_jobs::Column::Status,
                Expr::value(ExportJobStatus::Failed.as_str()),
            )
            .col_expr(export_jobs::Column::FailureReason, Expr::value(reason))
            .exec(&self.db)
            .await
            .context("fail export job")?;
        Ok(result.rows_affected > 0)
    }

    async fn list_expired(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ExportJob>, ExportServiceError> {
        let models = export_jobs::Entity::find()
            .filter(export_jobs::Column::ExpiresAt.lt(now))
            .filter(export_jobs::Column::Status.ne(ExportJobStatus::Expired.as_str()))
            .all(&self.db)
            .await
            .context("list expired export jobs")?;
        models.into_iter().map(job_from_model).collect()
    }

    async fn mark_expired(&self, job_id: Uuid) -> Result<(), ExportServiceError> {
        export_jobs::Entity::update_many()
            .filter(export_jobs::Column::Id.eq(job_id))
            .col_expr(
                export_jobs::Column::Status,
                Expr::value(ExportJobStatus::Expired.as_str()),
            )
            .exec(&self.db)
            .await
            .context("mark export job expired")?;
        Ok(())
    }
}

fn job_from_model(model: export_jobs::Model) -> Result<ExportJob, ExportServiceError> {
    let status = ExportJobStatus::parse(&model.status)
        .ok_or_else(|| anyhow!("unknown export job status: {}", model.status))?;
    Ok(ExportJob {
        id: model.id,
        user_id: model.user_id,
        status,
        created_at: model.created_at,
        expires_at: model.expires_at,
        zip_object_key: model.zip_object_key,
        failure_reason: model.failure_reason,
    })
}

fn part_from_model(model: export_job_parts::Model) -> JobPart {
    JobPart {
        job_id: model.job_id,
        service: model.service,
        received: model.received,
        received_at: model.received_at,
    }
}

// ── Outbox repository ────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct DbOutboxRepository {
    pub db: DatabaseConnection,
}

impl OutboxRepository for DbOutboxRepository {
    async fn claim_batch(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<OutboxRecord>, ExportServiceError> {
        let models = outbox_records::Entity::find()
            .filter(outbox_records::Column::Status.eq(OutboxStatus::New.as_str()))
            .filter(outbox_records::Column::NextAttemptAt.lte(now))
            .order_by_asc(outbox_records::Column::CreatedAt)
            .limit(limit)
            .all(&self.db)
            .await
            .context("claim outbox batch")?;
        models.into_iter().map(record_from_model).collect()
    }

    async fn mark_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), ExportServiceError> {
        outbox_records::Entity::update_many()
            .filter(outbox_records::Column::Id.eq(id))
            .col_expr(
                outbox_records::Column::Status,
                Expr::value(OutboxStatus::Sent.as_str()),
            )
            .col_expr(outbox_records::Column::SentAt, Expr::value(at))
            .col_expr(
                outbox_records::Column::LastError,
                Expr::value(None::<String>),
            )
            .exec(&self.db)
            .await
            .context("mark outbox record sent")?;
        Ok(())
    }

    async fn mark_retry(
        &self,
        id: Uuid,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<(), ExportServiceError> {
        outbox_records::Entity::update_many()
            .filter(outbox_records::Column::Id.eq(id))
            .col_expr(outbox_records::Column::Attempts, Expr::value(attempts))
            .col_expr(
                outbox_records::Column::NextAttemptAt,
                Expr::value(next_attempt_at),
            )
            .col_expr(outbox_records::Column::LastError, Expr::value(error))
            .exec(&self.db)
            .await
            .context("schedule outbox retry")?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        attempts: i32,
        error: &str,
    ) -> Result<(), ExportServiceError> {
        outbox_records::Entity::update_many()
            .filter(outbox_records::Column::Id.eq(id))
            .col_expr(
                outbox_records::Column::Status,
                Expr::value(OutboxStatus::Failed.as_str()),
            )
            .col_expr(outbox_records::Column::Attempts, Expr::value(attempts))
            .col_expr(outbox_records::Column::LastError, Expr::value(error))
            .exec(&self.db)
            .await
            .context("mark outbox record failed")?;
        Ok(())
    }
}

fn record_from_model(model: outbox_records::Model) -> Result<OutboxRecord, ExportServiceError> {
    let status = OutboxStatus::parse(&model.status)
        .ok_or_else(|| anyhow!("unknown outbox status: {}", model.status))?;
    Ok(OutboxRecord {
        id: model.id,
        topic: model.topic,
        partition_key: model.partition_key,
        envelope: model.envelope,
        status,
        attempts: model.attempts,
        last_error: model.last_error,
        created_at: model.created_at,
        next_attempt_at: model.next_attempt_at,
        sent_at: model.sent_at,
    })
}

// ── Local part source ────────────────────────────────────────────────────────

/// Reads this service's own profile data for the locally-produced part.
#[derive(Clone)]
pub struct DbLocalPartSource {
    pub db: DatabaseConnection,
}

impl LocalPartSource for DbLocalPartSource {
    async fn collect(&self, user_id: Uuid) -> Result<serde_json::Value, ExportServiceError> {
        let profile = user_profiles::Entity::find_by_id(user_id)
            .one(&self.db)
            .await
            .context("load user profile")?;
        // A user without a stored profile still gets an export; the part is
        // just the identity the platform knows.
        Ok(match profile {
            Some(p) => serde_json::json!({
                "userId": p.user_id,
                "displayName": p.display_name,
                "email": p.email,
                "createdAt": p.created_at.to_rfc3339(),
            }),
            None => serde_json::json!({ "userId": user_id }),
        })
    }
}
