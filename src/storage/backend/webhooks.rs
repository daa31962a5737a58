//! Webhook pipeline persistence
//!
//! 执行记录就是投递任务本身：worker 通过条件更新抢占，
//! 每次尝试后写回进度，进程重启不会丢失重试。

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, EntityTrait, ExprTrait,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect,
};
use tracing::{debug, info};

use super::{SeaOrmStorage, retry};
use crate::errors::{AfftrackError, Result};
use crate::storage::models::{
    DlqItem, ExecutionStatus, Page, Paginated, SignatureMode, TriggerType, WebhookExecution,
};

use migration::entities::{
    webhook_dlq_item, webhook_execution, webhook_pipeline, webhook_step, webhook_step_result,
};

#[derive(Debug, Clone)]
pub struct NewPipeline {
    pub name: String,
    pub trigger: TriggerType,
    pub offer_id: Option<String>,
    pub advertiser_id: Option<String>,
    pub failover_url: Option<String>,
    pub priority: i32,
}

#[derive(Debug, Clone)]
pub struct NewStep {
    pub pipeline_id: String,
    pub step_order: i32,
    pub name: String,
    pub url: String,
    pub method: String,
    pub headers: Option<serde_json::Value>,
    pub body_template: Option<String>,
    pub timeout_ms: Option<i64>,
    pub signature_mode: SignatureMode,
    pub signing_key: Option<String>,
    pub stop_on_failure: bool,
}

impl NewStep {
    pub fn post(pipeline_id: &str, step_order: i32, url: &str) -> Self {
        Self {
            pipeline_id: pipeline_id.to_string(),
            step_order,
            name: format!("step-{}", step_order),
            url: url.to_string(),
            method: "POST".to_string(),
            headers: None,
            body_template: None,
            timeout_ms: None,
            signature_mode: SignatureMode::None,
            signing_key: None,
            stop_on_failure: false,
        }
    }
}

/// 单步结果写回
#[derive(Debug, Clone)]
pub struct StepResultUpdate {
    pub execution_id: String,
    pub step_id: String,
    pub step_index: i32,
    pub status: String,
    pub attempt_count: i32,
    pub last_status_code: Option<i32>,
    pub last_error: Option<String>,
    pub last_duration_ms: Option<i64>,
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// 执行记录进度写回
#[derive(Debug, Clone)]
pub struct ExecutionProgress {
    pub status: ExecutionStatus,
    pub current_step: i32,
    pub attempt: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct ExecutionFilter {
    pub pipeline_id: Option<String>,
    pub status: Option<String>,
}

impl SeaOrmStorage {
    // ---------------- pipelines / steps ----------------

    pub async fn create_pipeline(&self, new: &NewPipeline) -> Result<webhook_pipeline::Model> {
        let now = Utc::now();
        let model = webhook_pipeline::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            name: Set(new.name.clone()),
            trigger_type: Set(new.trigger.to_string()),
            offer_id: Set(new.offer_id.clone()),
            advertiser_id: Set(new.advertiser_id.clone()),
            failover_url: Set(new.failover_url.clone()),
            priority: Set(new.priority),
            status: Set("active".to_string()),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn create_step(&self, new: &NewStep) -> Result<webhook_step::Model> {
        let model = webhook_step::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            pipeline_id: Set(new.pipeline_id.clone()),
            step_order: Set(new.step_order),
            name: Set(new.name.clone()),
            url: Set(new.url.clone()),
            method: Set(new.method.to_uppercase()),
            headers: Set(new.headers.as_ref().map(|h| h.to_string())),
            body_template: Set(new.body_template.clone()),
            timeout_ms: Set(new.timeout_ms),
            signature_mode: Set(new.signature_mode.to_string()),
            signing_key: Set(new.signing_key.clone()),
            stop_on_failure: Set(new.stop_on_failure),
            status: Set("active".to_string()),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn active_pipelines_for_trigger(
        &self,
        trigger: TriggerType,
    ) -> Result<Vec<webhook_pipeline::Model>> {
        Ok(webhook_pipeline::Entity::find()
            .filter(webhook_pipeline::Column::TriggerType.eq(trigger.as_str()))
            .filter(webhook_pipeline::Column::Status.eq("active"))
            .order_by_asc(webhook_pipeline::Column::Priority)
            .order_by_asc(webhook_pipeline::Column::CreatedAt)
            .all(&self.db)
            .await?)
    }

    pub async fn find_pipeline(&self, id: &str) -> Result<Option<webhook_pipeline::Model>> {
        Ok(webhook_pipeline::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?)
    }

    pub async fn find_step(&self, id: &str) -> Result<Option<webhook_step::Model>> {
        Ok(webhook_step::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?)
    }

    /// 启用中的步骤，按声明顺序
    pub async fn active_steps(&self, pipeline_id: &str) -> Result<Vec<webhook_step::Model>> {
        Ok(webhook_step::Entity::find()
            .filter(webhook_step::Column::PipelineId.eq(pipeline_id))
            .filter(webhook_step::Column::Status.eq("active"))
            .order_by_asc(webhook_step::Column::StepOrder)
            .all(&self.db)
            .await?)
    }

    // ---------------- executions ----------------

    pub async fn insert_execution(
        &self,
        pipeline_id: &str,
        trigger: &str,
        correlation_id: Option<&str>,
        payload: &str,
        step_count: i32,
        only_step: Option<i32>,
    ) -> Result<webhook_execution::Model> {
        let now = Utc::now();
        let model = webhook_execution::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            pipeline_id: Set(pipeline_id.to_string()),
            trigger_type: Set(trigger.to_string()),
            correlation_id: Set(correlation_id.map(|s| s.to_string())),
            payload: Set(payload.to_string()),
            status: Set(ExecutionStatus::Pending.to_string()),
            current_step: Set(only_step.unwrap_or(0)),
            attempt: Set(0),
            step_count: Set(step_count),
            only_step: Set(only_step),
            next_attempt_at: Set(Some(now)),
            last_error: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
            completed_at: Set(None),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn find_execution(&self, id: &str) -> Result<Option<webhook_execution::Model>> {
        Ok(webhook_execution::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?)
    }

    /// 抢占到期的执行记录
    ///
    /// 先查候选，再逐条 `UPDATE .. WHERE status = <旧状态>`，
    /// 只有 rows_affected == 1 的才归当前 worker。
    pub async fn claim_due_executions(
        &self,
        now: DateTime<Utc>,
        limit: u64,
    ) -> Result<Vec<webhook_execution::Model>> {
        let candidates = webhook_execution::Entity::find()
            .filter(
                webhook_execution::Column::Status
                    .is_in([ExecutionStatus::Pending.as_str(), ExecutionStatus::Retrying.as_str()]),
            )
            .filter(
                Condition::any()
                    .add(webhook_execution::Column::NextAttemptAt.is_null())
                    .add(webhook_execution::Column::NextAttemptAt.lte(now)),
            )
            .order_by_asc(webhook_execution::Column::NextAttemptAt)
            .limit(limit)
            .all(&self.db)
            .await?;

        let mut claimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let res = webhook_execution::Entity::update_many()
                .col_expr(
                    webhook_execution::Column::Status,
                    Expr::value(ExecutionStatus::Delivering.as_str()),
                )
                .col_expr(webhook_execution::Column::UpdatedAt, Expr::value(now))
                .filter(webhook_execution::Column::Id.eq(candidate.id.as_str()))
                .filter(webhook_execution::Column::Status.eq(candidate.status.as_str()))
                .exec(&self.db)
                .await?;

            if res.rows_affected == 1 {
                let mut model = candidate;
                model.status = ExecutionStatus::Delivering.to_string();
                claimed.push(model);
            }
        }

        if !claimed.is_empty() {
            debug!("Claimed {} webhook executions", claimed.len());
        }
        Ok(claimed)
    }

    /// 启动时把上次崩溃遗留的 delivering 记录放回重试队列
    pub async fn recover_in_flight_executions(&self) -> Result<u64> {
        let now = Utc::now();
        let res = webhook_execution::Entity::update_many()
            .col_expr(
                webhook_execution::Column::Status,
                Expr::value(ExecutionStatus::Retrying.as_str()),
            )
            .col_expr(webhook_execution::Column::NextAttemptAt, Expr::value(Some(now)))
            .col_expr(webhook_execution::Column::UpdatedAt, Expr::value(now))
            .filter(webhook_execution::Column::Status.eq(ExecutionStatus::Delivering.as_str()))
            .exec(&self.db)
            .await?;

        if res.rows_affected > 0 {
            info!(
                "Recovered {} in-flight webhook executions",
                res.rows_affected
            );
        }
        Ok(res.rows_affected)
    }

    /// 处理中途出错的 execution 放回重试队列，只对仍在 delivering 的记录生效
    pub async fn release_execution(
        &self,
        id: &str,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool> {
        let db = &self.db;
        let res = retry::with_retry("release_execution", self.retry_config, || async move {
            webhook_execution::Entity::update_many()
                .col_expr(
                    webhook_execution::Column::Status,
                    Expr::value(ExecutionStatus::Retrying.as_str()),
                )
                .col_expr(
                    webhook_execution::Column::NextAttemptAt,
                    Expr::value(Some(next_attempt_at)),
                )
                .col_expr(
                    webhook_execution::Column::LastError,
                    Expr::value(Some(error.to_string())),
                )
                .col_expr(webhook_execution::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(webhook_execution::Column::Id.eq(id))
                .filter(webhook_execution::Column::Status.eq(ExecutionStatus::Delivering.as_str()))
                .exec(db)
                .await
        })
        .await?;
        Ok(res.rows_affected == 1)
    }

    pub async fn update_execution(&self, id: &str, progress: &ExecutionProgress) -> Result<()> {
        let db = &self.db;
        retry::with_retry("update_execution", self.retry_config, || async move {
            webhook_execution::Entity::update_many()
                .col_expr(
                    webhook_execution::Column::Status,
                    Expr::value(progress.status.as_str()),
                )
                .col_expr(
                    webhook_execution::Column::CurrentStep,
                    Expr::value(progress.current_step),
                )
                .col_expr(webhook_execution::Column::Attempt, Expr::value(progress.attempt))
                .col_expr(
                    webhook_execution::Column::NextAttemptAt,
                    Expr::value(progress.next_attempt_at),
                )
                .col_expr(
                    webhook_execution::Column::LastError,
                    Expr::value(progress.last_error.clone()),
                )
                .col_expr(
                    webhook_execution::Column::CompletedAt,
                    Expr::value(progress.completed_at),
                )
                .col_expr(webhook_execution::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(webhook_execution::Column::Id.eq(id))
                .exec(db)
                .await
        })
        .await?;
        Ok(())
    }

    pub async fn list_executions(
        &self,
        filter: &ExecutionFilter,
        page: Page,
    ) -> Result<Paginated<WebhookExecution>> {
        let mut query = webhook_execution::Entity::find();
        if let Some(pid) = &filter.pipeline_id {
            query = query.filter(webhook_execution::Column::PipelineId.eq(pid.as_str()));
        }
        if let Some(status) = &filter.status {
            query = query.filter(webhook_execution::Column::Status.eq(status.as_str()));
        }

        let paginator = query
            .order_by_desc(webhook_execution::Column::CreatedAt)
            .paginate(&self.db, page.page_size);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.page - 1).await?;

        Ok(Paginated {
            items: items.into_iter().map(Into::into).collect(),
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    // ---------------- step results ----------------

    pub async fn upsert_step_result(&self, update: &StepResultUpdate) -> Result<()> {
        let now = Utc::now();
        let existing = webhook_step_result::Entity::find()
            .filter(webhook_step_result::Column::ExecutionId.eq(update.execution_id.as_str()))
            .filter(webhook_step_result::Column::StepIndex.eq(update.step_index))
            .one(&self.db)
            .await?;

        match existing {
            Some(model) => {
                let mut active: webhook_step_result::ActiveModel = model.into();
                active.step_id = Set(update.step_id.clone());
                active.status = Set(update.status.clone());
                active.attempt_count = Set(update.attempt_count);
                active.last_status_code = Set(update.last_status_code);
                active.last_error = Set(update.last_error.clone());
                active.last_duration_ms = Set(update.last_duration_ms);
                active.next_retry_at = Set(update.next_retry_at);
                active.updated_at = Set(now);
                active.update(&self.db).await?;
            }
            None => {
                webhook_step_result::ActiveModel {
                    execution_id: Set(update.execution_id.clone()),
                    step_id: Set(update.step_id.clone()),
                    step_index: Set(update.step_index),
                    status: Set(update.status.clone()),
                    attempt_count: Set(update.attempt_count),
                    last_status_code: Set(update.last_status_code),
                    last_error: Set(update.last_error.clone()),
                    last_duration_ms: Set(update.last_duration_ms),
                    next_retry_at: Set(update.next_retry_at),
                    updated_at: Set(now),
                    ..Default::default()
                }
                .insert(&self.db)
                .await?;
            }
        }
        Ok(())
    }

    pub async fn step_results(
        &self,
        execution_id: &str,
    ) -> Result<Vec<webhook_step_result::Model>> {
        Ok(webhook_step_result::Entity::find()
            .filter(webhook_step_result::Column::ExecutionId.eq(execution_id))
            .order_by_asc(webhook_step_result::Column::StepIndex)
            .all(&self.db)
            .await?)
    }

    // ---------------- dead letters ----------------

    #[allow(clippy::too_many_arguments)]
    pub async fn insert_dlq_item(
        &self,
        execution: &webhook_execution::Model,
        step_id: &str,
        step_index: i32,
        request_url: &str,
        last_error: Option<String>,
        last_status_code: Option<i32>,
        attempts: i32,
    ) -> Result<webhook_dlq_item::Model> {
        let model = webhook_dlq_item::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            execution_id: Set(execution.id.clone()),
            pipeline_id: Set(execution.pipeline_id.clone()),
            step_id: Set(step_id.to_string()),
            step_index: Set(step_index),
            trigger_type: Set(execution.trigger_type.clone()),
            payload: Set(execution.payload.clone()),
            request_url: Set(request_url.to_string()),
            last_error: Set(last_error),
            last_status_code: Set(last_status_code),
            attempts: Set(attempts),
            failed_at: Set(Utc::now()),
            replay_count: Set(0),
            last_replayed_at: Set(None),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn list_dlq(
        &self,
        pipeline_id: Option<&str>,
        page: Page,
    ) -> Result<Paginated<DlqItem>> {
        let mut query = webhook_dlq_item::Entity::find();
        if let Some(pid) = pipeline_id {
            query = query.filter(webhook_dlq_item::Column::PipelineId.eq(pid));
        }

        let paginator = query
            .order_by_desc(webhook_dlq_item::Column::FailedAt)
            .paginate(&self.db, page.page_size);
        let total = paginator.num_items().await?;
        let items = paginator.fetch_page(page.page - 1).await?;

        Ok(Paginated {
            items: items.into_iter().map(Into::into).collect(),
            total,
            page: page.page,
            page_size: page.page_size,
        })
    }

    pub async fn find_dlq_item(&self, id: &str) -> Result<Option<webhook_dlq_item::Model>> {
        Ok(webhook_dlq_item::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?)
    }

    pub async fn mark_dlq_replayed(&self, id: &str) -> Result<()> {
        let res = webhook_dlq_item::Entity::update_many()
            .col_expr(
                webhook_dlq_item::Column::ReplayCount,
                Expr::col(webhook_dlq_item::Column::ReplayCount).add(1),
            )
            .col_expr(
                webhook_dlq_item::Column::LastReplayedAt,
                Expr::value(Some(Utc::now())),
            )
            .filter(webhook_dlq_item::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        if res.rows_affected == 0 {
            return Err(AfftrackError::not_found(format!("DLQ item 不存在: {}", id)));
        }
        Ok(())
    }

    /// 返回是否删除了记录
    pub async fn delete_dlq_item(&self, id: &str) -> Result<bool> {
        let res = webhook_dlq_item::Entity::delete_by_id(id.to_string())
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    pub async fn count_dlq_items(&self) -> Result<u64> {
        Ok(webhook_dlq_item::Entity::find().count(&self.db).await?)
    }
}
