use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, EntityTrait, QueryFilter,
    QueryOrder,
};

use super::SeaOrmStorage;
use crate::errors::Result;
use crate::storage::models::{GeoMode, GeoScope};

use migration::entities::geo_rule;

impl SeaOrmStorage {
    pub async fn create_geo_rule(
        &self,
        name: &str,
        scope: GeoScope,
        scope_id: Option<&str>,
        mode: GeoMode,
        countries: &[&str],
        priority: i32,
    ) -> Result<geo_rule::Model> {
        let countries: Vec<String> = countries.iter().map(|c| c.to_uppercase()).collect();
        let model = geo_rule::ActiveModel {
            id: Set(uuid::Uuid::new_v4().to_string()),
            name: Set(name.to_string()),
            scope_type: Set(scope.to_string()),
            scope_id: Set(scope_id.map(|s| s.to_string())),
            mode: Set(mode.to_string()),
            countries: Set(serde_json::to_string(&countries)?),
            priority: Set(priority),
            status: Set("active".to_string()),
            created_at: Set(Utc::now()),
        };
        Ok(model.insert(&self.db).await?)
    }

    /// 与 offer 相关的所有启用规则（offer / advertiser / global），按 priority 升序
    pub async fn active_geo_rules_for(
        &self,
        offer_id: &str,
        advertiser_id: &str,
    ) -> Result<Vec<geo_rule::Model>> {
        let scope = Condition::any()
            .add(
                Condition::all()
                    .add(geo_rule::Column::ScopeType.eq(GeoScope::Offer.as_str()))
                    .add(geo_rule::Column::ScopeId.eq(offer_id)),
            )
            .add(
                Condition::all()
                    .add(geo_rule::Column::ScopeType.eq(GeoScope::Advertiser.as_str()))
                    .add(geo_rule::Column::ScopeId.eq(advertiser_id)),
            )
            .add(geo_rule::Column::ScopeType.eq(GeoScope::Global.as_str()));

        Ok(geo_rule::Entity::find()
            .filter(geo_rule::Column::Status.eq("active"))
            .filter(scope)
            .order_by_asc(geo_rule::Column::Priority)
            .all(&self.db)
            .await?)
    }
}
