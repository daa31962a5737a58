//! users / offers / user_offers
//!
//! 管理后台负责这些表的维护，这里只提供追踪链路需要的读取，
//! 以及 CLI 和测试用到的最小写入。

use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};

use super::SeaOrmStorage;
use crate::errors::{AfftrackError, Result};
use crate::storage::models::TrackingTarget;

use migration::entities::{offer, user, user_offer};

impl SeaOrmStorage {
    pub async fn create_user(&self, username: &str) -> Result<user::Model> {
        let model = user::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            username: Set(username.to_string()),
            total_clicks: Set(0),
            total_conversions: Set(0),
            total_earnings: Set(0.0),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn create_offer(
        &self,
        advertiser_id: &str,
        title: &str,
        destination_url: &str,
        payout: f64,
        currency: &str,
    ) -> Result<offer::Model> {
        let model = offer::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            advertiser_id: Set(advertiser_id.to_string()),
            title: Set(title.to_string()),
            destination_url: Set(destination_url.to_string()),
            payout: Set(payout),
            currency: Set(currency.to_string()),
            status: Set("active".to_string()),
            total_clicks: Set(0),
            total_conversions: Set(0),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn create_user_offer(
        &self,
        user_id: &str,
        offer_id: &str,
        tracking_code: &str,
    ) -> Result<user_offer::Model> {
        let now = Utc::now();
        let model = user_offer::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            user_id: Set(user_id.to_string()),
            offer_id: Set(offer_id.to_string()),
            tracking_code: Set(tracking_code.to_string()),
            status: Set("active".to_string()),
            total_clicks: Set(0),
            total_conversions: Set(0),
            earnings: Set(0.0),
            created_at: Set(now),
            updated_at: Set(now),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn set_offer_status(&self, offer_id: &str, status: &str) -> Result<()> {
        let existing = offer::Entity::find_by_id(offer_id.to_string())
            .one(&self.db)
            .await?
            .ok_or_else(|| AfftrackError::not_found(format!("offer 不存在: {}", offer_id)))?;
        let mut active: offer::ActiveModel = existing.into();
        active.status = Set(status.to_string());
        active.update(&self.db).await?;
        Ok(())
    }

    pub async fn find_user(&self, id: &str) -> Result<Option<user::Model>> {
        Ok(user::Entity::find_by_id(id.to_string()).one(&self.db).await?)
    }

    pub async fn find_offer(&self, id: &str) -> Result<Option<offer::Model>> {
        Ok(offer::Entity::find_by_id(id.to_string()).one(&self.db).await?)
    }

    pub async fn find_user_offer(&self, id: &str) -> Result<Option<user_offer::Model>> {
        Ok(user_offer::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?)
    }

    pub async fn find_user_offer_by_code(&self, code: &str) -> Result<Option<user_offer::Model>> {
        Ok(user_offer::Entity::find()
            .filter(user_offer::Column::TrackingCode.eq(code))
            .one(&self.db)
            .await?)
    }

    /// tracking code → 推广关系 + offer
    pub async fn resolve_tracking_code(&self, code: &str) -> Result<Option<TrackingTarget>> {
        let Some(uo) = self.find_user_offer_by_code(code).await? else {
            return Ok(None);
        };
        let Some(offer) = self.find_offer(&uo.offer_id).await? else {
            return Ok(None);
        };

        Ok(Some(TrackingTarget {
            active: uo.status == "active" && offer.status == "active",
            user_offer_id: uo.id,
            user_id: uo.user_id,
            offer_id: offer.id,
            advertiser_id: offer.advertiser_id,
            tracking_code: uo.tracking_code,
            destination_url: offer.destination_url,
            payout: offer.payout,
            currency: offer.currency,
        }))
    }
}
