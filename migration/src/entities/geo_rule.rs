//! Geo allow/block rule entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "geo_rules")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    /// offer / advertiser / global
    pub scope_type: String,
    pub scope_id: Option<String>,
    /// allow / block
    pub mode: String,
    /// JSON 数组，例如 ["US","CA"]
    #[sea_orm(column_type = "Text")]
    pub countries: String,
    pub priority: i32,
    pub status: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
