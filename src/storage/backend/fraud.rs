use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter};

use super::{SeaOrmStorage, retry};
use crate::errors::Result;
use crate::storage::models::NewFraudEvent;

use migration::entities::fraud_event;

impl SeaOrmStorage {
    pub async fn insert_fraud_event(&self, event: &NewFraudEvent) -> Result<i64> {
        let db = &self.db;
        let details = event.details.as_ref().map(|d| d.to_string());
        let details_ref = &details;

        let model = retry::with_retry("insert_fraud_event", self.retry_config, || async move {
            fraud_event::ActiveModel {
                kind: Set(event.kind.clone()),
                ip: Set(event.ip.clone()),
                user_agent: Set(event.user_agent.clone()),
                tracking_code: Set(event.tracking_code.clone()),
                offer_id: Set(event.offer_id.clone()),
                details: Set(details_ref.clone()),
                created_at: Set(Utc::now()),
                ..Default::default()
            }
            .insert(db)
            .await
        })
        .await?;

        Ok(model.id)
    }

    pub async fn count_fraud_events(&self, kind: &str) -> Result<u64> {
        Ok(fraud_event::Entity::find()
            .filter(fraud_event::Column::Kind.eq(kind))
            .count(&self.db)
            .await?)
    }
}
