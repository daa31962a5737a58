//! Conversion persistence
//!
//! - 插入与三处 total_conversions 累加在同一事务中
//! - external_conversion_id 唯一索引兜底并发重复 postback
//! - 状态变更使用 `WHERE status = <expected>` 条件更新

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, ExprTrait, QueryFilter,
    TransactionTrait,
};
use tracing::{debug, info};

use super::{SeaOrmStorage, retry};
use crate::errors::Result;
use crate::storage::models::{ConversionStatus, NewConversion};

use migration::entities::{conversion, offer, user, user_offer};

/// 插入结果
#[derive(Debug, Clone)]
pub enum ConversionInsert {
    Created(conversion::Model),
    /// 同一 external id 已存在（包括并发插入失败后回读到的胜者）
    AlreadyExists(conversion::Model),
}

impl SeaOrmStorage {
    pub async fn find_conversion(&self, id: &str) -> Result<Option<conversion::Model>> {
        Ok(conversion::Entity::find_by_id(id.to_string())
            .one(&self.db)
            .await?)
    }

    pub async fn find_conversion_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<conversion::Model>> {
        Ok(conversion::Entity::find()
            .filter(conversion::Column::ExternalConversionId.eq(external_id))
            .one(&self.db)
            .await?)
    }

    pub async fn insert_conversion(&self, new: &NewConversion) -> Result<ConversionInsert> {
        let id = uuid::Uuid::new_v4().to_string();
        let db = &self.db;
        let id_ref = &id;

        let result = self
            .bounded_write("insert_conversion", || async move {
                let txn = db.begin().await?;
                let now = Utc::now();

                let inserted = conversion::ActiveModel {
                    id: Set(id_ref.clone()),
                    click_id: Set(new.click_id.clone()),
                    user_offer_id: Set(new.user_offer_id.clone()),
                    offer_id: Set(new.offer_id.clone()),
                    external_conversion_id: Set(new.external_conversion_id.clone()),
                    amount: Set(new.amount),
                    commission: Set(new.commission),
                    currency: Set(new.currency.clone()),
                    status: Set(ConversionStatus::Pending.to_string()),
                    attribution_status: Set(new.attribution_status.to_string()),
                    postback_status: Set(new.postback_status.clone()),
                    postback_data: Set(new.postback_data.clone()),
                    rejection_reason: Set(None),
                    converted_at: Set(new.converted_at),
                    approved_at: Set(None),
                    rejected_at: Set(None),
                    paid_at: Set(None),
                    updated_at: Set(now),
                }
                .insert(&txn)
                .await?;

                offer::Entity::update_many()
                    .col_expr(
                        offer::Column::TotalConversions,
                        Expr::col(offer::Column::TotalConversions).add(1),
                    )
                    .filter(offer::Column::Id.eq(new.offer_id.as_str()))
                    .exec(&txn)
                    .await?;

                if let Some(uo) = &new.user_offer_id {
                    user_offer::Entity::update_many()
                        .col_expr(
                            user_offer::Column::TotalConversions,
                            Expr::col(user_offer::Column::TotalConversions).add(1),
                        )
                        .col_expr(user_offer::Column::UpdatedAt, Expr::value(now))
                        .filter(user_offer::Column::Id.eq(uo.as_str()))
                        .exec(&txn)
                        .await?;
                }

                if let Some(uid) = &new.user_id {
                    user::Entity::update_many()
                        .col_expr(
                            user::Column::TotalConversions,
                            Expr::col(user::Column::TotalConversions).add(1),
                        )
                        .filter(user::Column::Id.eq(uid.as_str()))
                        .exec(&txn)
                        .await?;
                }

                txn.commit().await?;
                Ok::<_, sea_orm::DbErr>(inserted)
            })
            .await;

        match result {
            Ok(model) => {
                info!(
                    "Conversion {} created (external id {}, {})",
                    model.id, model.external_conversion_id, model.attribution_status
                );
                Ok(ConversionInsert::Created(model))
            }
            Err(e) if retry::is_unique_violation(&e) => {
                // 并发插入输掉唯一索引竞争，回读胜者
                debug!(
                    "Conversion insert for {} lost the unique race, re-reading",
                    new.external_conversion_id
                );
                match self
                    .find_conversion_by_external_id(&new.external_conversion_id)
                    .await?
                {
                    Some(existing) => Ok(ConversionInsert::AlreadyExists(existing)),
                    None => Err(e.into()),
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 条件状态变更
    ///
    /// 返回 `Ok(true)` 表示本次更新生效，`Ok(false)` 表示当前状态已不是 `from`。
    /// approve 时在同一事务内累加 user_offer.earnings 与 users.total_earnings。
    pub async fn transition_conversion(
        &self,
        id: &str,
        from: ConversionStatus,
        to: ConversionStatus,
        reason: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let db = &self.db;

        retry::with_retry("transition_conversion", self.retry_config, || async move {
            let txn = db.begin().await?;

            let mut update = conversion::Entity::update_many()
                .col_expr(conversion::Column::Status, Expr::value(to.to_string()))
                .col_expr(conversion::Column::UpdatedAt, Expr::value(at));
            update = match to {
                ConversionStatus::Approved => {
                    update.col_expr(conversion::Column::ApprovedAt, Expr::value(Some(at)))
                }
                ConversionStatus::Rejected => update
                    .col_expr(conversion::Column::RejectedAt, Expr::value(Some(at)))
                    .col_expr(
                        conversion::Column::RejectionReason,
                        Expr::value(reason.map(|r| r.to_string())),
                    ),
                ConversionStatus::Paid => {
                    update.col_expr(conversion::Column::PaidAt, Expr::value(Some(at)))
                }
                ConversionStatus::Pending => update,
            };

            let res = update
                .filter(conversion::Column::Id.eq(id))
                .filter(conversion::Column::Status.eq(from.to_string()))
                .exec(&txn)
                .await?;

            if res.rows_affected != 1 {
                txn.rollback().await?;
                return Ok(false);
            }

            if to == ConversionStatus::Approved
                && let Some(conv) = conversion::Entity::find_by_id(id.to_string()).one(&txn).await?
                && let Some(uo_id) = conv.user_offer_id
            {
                user_offer::Entity::update_many()
                    .col_expr(
                        user_offer::Column::Earnings,
                        Expr::col(user_offer::Column::Earnings).add(conv.commission),
                    )
                    .col_expr(user_offer::Column::UpdatedAt, Expr::value(at))
                    .filter(user_offer::Column::Id.eq(uo_id.as_str()))
                    .exec(&txn)
                    .await?;

                if let Some(uo) = user_offer::Entity::find_by_id(uo_id).one(&txn).await? {
                    user::Entity::update_many()
                        .col_expr(
                            user::Column::TotalEarnings,
                            Expr::col(user::Column::TotalEarnings).add(conv.commission),
                        )
                        .filter(user::Column::Id.eq(uo.user_id))
                        .exec(&txn)
                        .await?;
                }
            }

            txn.commit().await?;
            Ok::<_, sea_orm::DbErr>(true)
        })
        .await
        .map_err(Into::into)
    }
}
