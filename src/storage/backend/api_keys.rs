use chrono::Utc;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};

use super::SeaOrmStorage;
use crate::errors::{AfftrackError, Result};

use migration::entities::api_key;

impl SeaOrmStorage {
    pub async fn insert_api_key(
        &self,
        advertiser_id: Option<&str>,
        name: &str,
        key_prefix: &str,
        key_hash: &str,
    ) -> Result<api_key::Model> {
        let model = api_key::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            advertiser_id: Set(advertiser_id.map(|s| s.to_string())),
            name: Set(name.to_string()),
            key_prefix: Set(key_prefix.to_string()),
            key_hash: Set(key_hash.to_string()),
            status: Set("active".to_string()),
            last_used_at: Set(None),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&self.db).await?)
    }

    /// 按前缀查找启用中的 key
    pub async fn find_api_keys_by_prefix(&self, key_prefix: &str) -> Result<Vec<api_key::Model>> {
        Ok(api_key::Entity::find()
            .filter(api_key::Column::KeyPrefix.eq(key_prefix))
            .filter(api_key::Column::Status.eq("active"))
            .all(&self.db)
            .await?)
    }

    pub async fn touch_api_key(&self, id: &str) -> Result<()> {
        api_key::Entity::update_many()
            .col_expr(
                api_key::Column::LastUsedAt,
                sea_orm::sea_query::Expr::value(Some(Utc::now())),
            )
            .filter(api_key::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn revoke_api_key(&self, id: &str) -> Result<()> {
        let res = api_key::Entity::update_many()
            .col_expr(
                api_key::Column::Status,
                sea_orm::sea_query::Expr::value("revoked"),
            )
            .filter(api_key::Column::Id.eq(id))
            .exec(&self.db)
            .await?;
        if res.rows_affected == 0 {
            return Err(AfftrackError::not_found(format!("API key 不存在: {}", id)));
        }
        Ok(())
    }
}
