//! One run of a pipeline for one event

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_executions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub pipeline_id: String,
    pub trigger_type: String,
    pub correlation_id: Option<String>,
    /// 触发时的事件负载 JSON，重试与回放都使用它
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    pub status: String,
    pub current_step: i32,
    pub attempt: i32,
    pub step_count: i32,
    /// DLQ 回放时只执行该步骤
    pub only_step: Option<i32>,
    pub next_attempt_at: Option<DateTimeUtc>,
    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
    pub completed_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
