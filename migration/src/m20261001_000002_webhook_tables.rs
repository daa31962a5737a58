//! Webhook 流水线表迁移
//!
//! pipelines -> steps（按 step_order 顺序执行）
//! executions 记录每次触发，step_results 记录每一步的投递状态，
//! dlq_items 保存重试耗尽的步骤以便回放。

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(WebhookPipelines::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookPipelines::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookPipelines::Name)
                            .string_len(255)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookPipelines::TriggerType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookPipelines::OfferId)
                            .string_len(36)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookPipelines::AdvertiserId)
                            .string_len(36)
                            .null(),
                    )
                    .col(ColumnDef::new(WebhookPipelines::FailoverUrl).text().null())
                    .col(
                        ColumnDef::new(WebhookPipelines::Priority)
                            .integer()
                            .not_null()
                            .default(100),
                    )
                    .col(
                        ColumnDef::new(WebhookPipelines::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookPipelines::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookPipelines::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_webhook_pipelines_trigger")
                    .table(WebhookPipelines::Table)
                    .col(WebhookPipelines::TriggerType)
                    .col(WebhookPipelines::Status)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WebhookSteps::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookSteps::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookSteps::PipelineId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookSteps::StepOrder).integer().not_null())
                    .col(ColumnDef::new(WebhookSteps::Name).string_len(255).not_null())
                    .col(ColumnDef::new(WebhookSteps::Url).text().not_null())
                    .col(
                        ColumnDef::new(WebhookSteps::Method)
                            .string_len(10)
                            .not_null()
                            .default("POST"),
                    )
                    .col(ColumnDef::new(WebhookSteps::Headers).text().null())
                    .col(ColumnDef::new(WebhookSteps::BodyTemplate).text().null())
                    .col(ColumnDef::new(WebhookSteps::TimeoutMs).big_integer().null())
                    .col(
                        ColumnDef::new(WebhookSteps::SignatureMode)
                            .string_len(16)
                            .not_null()
                            .default("none"),
                    )
                    .col(ColumnDef::new(WebhookSteps::SigningKey).text().null())
                    .col(
                        ColumnDef::new(WebhookSteps::StopOnFailure)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(WebhookSteps::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(WebhookSteps::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_webhook_steps_pipeline_order")
                    .table(WebhookSteps::Table)
                    .col(WebhookSteps::PipelineId)
                    .col(WebhookSteps::StepOrder)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WebhookExecutions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookExecutions::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookExecutions::PipelineId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookExecutions::TriggerType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookExecutions::CorrelationId)
                            .string_len(100)
                            .null(),
                    )
                    .col(ColumnDef::new(WebhookExecutions::Payload).text().not_null())
                    .col(
                        ColumnDef::new(WebhookExecutions::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookExecutions::CurrentStep)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WebhookExecutions::Attempt)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WebhookExecutions::StepCount)
                            .integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookExecutions::OnlyStep).integer().null())
                    .col(
                        ColumnDef::new(WebhookExecutions::NextAttemptAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(WebhookExecutions::LastError).text().null())
                    .col(
                        ColumnDef::new(WebhookExecutions::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookExecutions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookExecutions::CompletedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        // worker 轮询: status + next_attempt_at
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_webhook_executions_due")
                    .table(WebhookExecutions::Table)
                    .col(WebhookExecutions::Status)
                    .col(WebhookExecutions::NextAttemptAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WebhookStepResults::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookStepResults::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookStepResults::ExecutionId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookStepResults::StepId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookStepResults::StepIndex)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookStepResults::Status)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookStepResults::AttemptCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WebhookStepResults::LastStatusCode)
                            .integer()
                            .null(),
                    )
                    .col(ColumnDef::new(WebhookStepResults::LastError).text().null())
                    .col(
                        ColumnDef::new(WebhookStepResults::LastDurationMs)
                            .big_integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookStepResults::NextRetryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookStepResults::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_webhook_step_results_exec_step")
                    .table(WebhookStepResults::Table)
                    .col(WebhookStepResults::ExecutionId)
                    .col(WebhookStepResults::StepIndex)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(WebhookDlqItems::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(WebhookDlqItems::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(WebhookDlqItems::ExecutionId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDlqItems::PipelineId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDlqItems::StepId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDlqItems::StepIndex)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDlqItems::TriggerType)
                            .string_len(32)
                            .not_null(),
                    )
                    .col(ColumnDef::new(WebhookDlqItems::Payload).text().not_null())
                    .col(ColumnDef::new(WebhookDlqItems::RequestUrl).text().not_null())
                    .col(ColumnDef::new(WebhookDlqItems::LastError).text().null())
                    .col(
                        ColumnDef::new(WebhookDlqItems::LastStatusCode)
                            .integer()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDlqItems::Attempts)
                            .integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDlqItems::FailedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(WebhookDlqItems::ReplayCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(WebhookDlqItems::LastReplayedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_webhook_dlq_failed_at")
                    .table(WebhookDlqItems::Table)
                    .col(WebhookDlqItems::FailedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(WebhookDlqItems::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WebhookStepResults::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WebhookExecutions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WebhookSteps::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(WebhookPipelines::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum WebhookPipelines {
    Table,
    Id,
    Name,
    TriggerType,
    OfferId,
    AdvertiserId,
    FailoverUrl,
    Priority,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WebhookSteps {
    Table,
    Id,
    PipelineId,
    StepOrder,
    Name,
    Url,
    Method,
    Headers,
    BodyTemplate,
    TimeoutMs,
    SignatureMode,
    SigningKey,
    StopOnFailure,
    Status,
    CreatedAt,
}

#[derive(DeriveIden)]
enum WebhookExecutions {
    Table,
    Id,
    PipelineId,
    TriggerType,
    CorrelationId,
    Payload,
    Status,
    CurrentStep,
    Attempt,
    StepCount,
    OnlyStep,
    NextAttemptAt,
    LastError,
    CreatedAt,
    UpdatedAt,
    CompletedAt,
}

#[derive(DeriveIden)]
enum WebhookStepResults {
    Table,
    Id,
    ExecutionId,
    StepId,
    StepIndex,
    Status,
    AttemptCount,
    LastStatusCode,
    LastError,
    LastDurationMs,
    NextRetryAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum WebhookDlqItems {
    Table,
    Id,
    ExecutionId,
    PipelineId,
    StepId,
    StepIndex,
    TriggerType,
    Payload,
    RequestUrl,
    LastError,
    LastStatusCode,
    Attempts,
    FailedAt,
    ReplayCount,
    LastReplayedAt,
}
