use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "webhook_steps")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub pipeline_id: String,
    pub step_order: i32,
    pub name: String,
    #[sea_orm(column_type = "Text")]
    pub url: String,
    pub method: String,
    /// JSON object of extra headers
    #[sea_orm(column_type = "Text", nullable)]
    pub headers: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub body_template: Option<String>,
    pub timeout_ms: Option<i64>,
    /// none / hmac / jwt
    pub signature_mode: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub signing_key: Option<String>,
    pub stop_on_failure: bool,
    pub status: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
