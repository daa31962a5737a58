//! Advertiser offer entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "offers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub advertiser_id: String,
    pub title: String,
    #[sea_orm(column_type = "Text")]
    pub destination_url: String,
    /// 每次转化给推广者的佣金
    pub payout: f64,
    pub currency: String,
    /// active / paused
    pub status: String,
    pub total_clicks: i64,
    pub total_conversions: i64,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
