//! Click persistence
//!
//! 点击记录与 offer / user_offer / user 的 total_clicks 在同一事务中提交。

use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, ExprTrait, PaginatorTrait,
    QueryFilter, TransactionTrait,
};
use tracing::debug;

use super::SeaOrmStorage;
use crate::errors::Result;
use crate::storage::models::NewClick;

use migration::entities::{click, offer, user, user_offer};

impl SeaOrmStorage {
    pub async fn insert_click(&self, id: &str, new: &NewClick) -> Result<click::Model> {
        let db = &self.db;
        let model = self
            .bounded_write("insert_click", || async {
                let txn = db.begin().await?;

                let inserted = click::ActiveModel {
                    id: Set(id.to_string()),
                    offer_id: Set(new.offer_id.clone()),
                    user_offer_id: Set(new.user_offer_id.clone()),
                    ip: Set(new.ip.clone()),
                    user_agent: Set(new.user_agent.clone()),
                    device: Set(new.device.clone()),
                    browser: Set(new.browser.clone()),
                    os: Set(new.os.clone()),
                    country: Set(new.country.clone()),
                    city: Set(new.city.clone()),
                    referrer: Set(new.referrer.clone()),
                    sub1: Set(new.sub1.clone()),
                    sub2: Set(new.sub2.clone()),
                    sub3: Set(new.sub3.clone()),
                    fingerprint: Set(new.fingerprint.clone()),
                    link_status: Set(new.link_status.clone()),
                    clicked_at: Set(Utc::now()),
                }
                .insert(&txn)
                .await?;

                offer::Entity::update_many()
                    .col_expr(
                        offer::Column::TotalClicks,
                        Expr::col(offer::Column::TotalClicks).add(1),
                    )
                    .filter(offer::Column::Id.eq(new.offer_id.as_str()))
                    .exec(&txn)
                    .await?;

                user_offer::Entity::update_many()
                    .col_expr(
                        user_offer::Column::TotalClicks,
                        Expr::col(user_offer::Column::TotalClicks).add(1),
                    )
                    .filter(user_offer::Column::Id.eq(new.user_offer_id.as_str()))
                    .exec(&txn)
                    .await?;

                user::Entity::update_many()
                    .col_expr(
                        user::Column::TotalClicks,
                        Expr::col(user::Column::TotalClicks).add(1),
                    )
                    .filter(user::Column::Id.eq(new.user_id.as_str()))
                    .exec(&txn)
                    .await?;

                txn.commit().await?;
                Ok::<_, sea_orm::DbErr>(inserted)
            })
            .await?;

        debug!("Click {} stored for offer {}", model.id, model.offer_id);
        Ok(model)
    }

    pub async fn find_click(&self, id: &str) -> Result<Option<click::Model>> {
        Ok(click::Entity::find_by_id(id.to_string()).one(&self.db).await?)
    }

    pub async fn count_clicks_for_user_offer(&self, user_offer_id: &str) -> Result<u64> {
        Ok(click::Entity::find()
            .filter(click::Column::UserOfferId.eq(user_offer_id))
            .count(&self.db)
            .await?)
    }
}
