//! Conversion entity

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "conversions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    /// 未归因时为空
    pub click_id: Option<String>,
    pub user_offer_id: Option<String>,
    pub offer_id: String,
    #[sea_orm(unique)]
    pub external_conversion_id: String,
    pub amount: f64,
    pub commission: f64,
    pub currency: String,
    /// pending / approved / rejected / paid
    pub status: String,
    /// attributed / unattributed / expired / offer_mismatch
    pub attribution_status: String,
    /// 广告主在 postback 中上报的状态，仅作记录
    pub postback_status: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub postback_data: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub rejection_reason: Option<String>,
    pub converted_at: DateTimeUtc,
    pub approved_at: Option<DateTimeUtc>,
    pub rejected_at: Option<DateTimeUtc>,
    pub paid_at: Option<DateTimeUtc>,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
