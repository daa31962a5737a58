//! Webhook pipeline entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_pipelines")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub trigger_type: String,
    /// offer_id 优先于 advertiser_id，两者皆空为全局
    pub offer_id: Option<String>,
    pub advertiser_id: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub failover_url: Option<String>,
    pub priority: i32,
    pub status: String,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
