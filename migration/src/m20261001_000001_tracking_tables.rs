//! 追踪核心表迁移
//!
//! 创建点击追踪与转化归因所需的表：
//! - users / offers / user_offers（推广关系与计数器）
//! - clicks（点击记录，fingerprint 非唯一索引）
//! - conversions（external_conversion_id 唯一索引）
//! - fraud_events / geo_rules / api_keys

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Users::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Users::Username).string_len(100).not_null())
                    .col(
                        ColumnDef::new(Users::TotalClicks)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Users::TotalConversions)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Users::TotalEarnings)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(Users::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Offers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Offers::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Offers::AdvertiserId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Offers::Title).string_len(255).not_null())
                    .col(ColumnDef::new(Offers::DestinationUrl).text().not_null())
                    .col(
                        ColumnDef::new(Offers::Payout)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(ColumnDef::new(Offers::Currency).string_len(8).not_null())
                    .col(ColumnDef::new(Offers::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Offers::TotalClicks)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Offers::TotalConversions)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Offers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_offers_advertiser")
                    .table(Offers::Table)
                    .col(Offers::AdvertiserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(UserOffers::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(UserOffers::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(UserOffers::UserId).string_len(36).not_null())
                    .col(
                        ColumnDef::new(UserOffers::OfferId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserOffers::TrackingCode)
                            .string_len(100)
                            .not_null(),
                    )
                    .col(ColumnDef::new(UserOffers::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(UserOffers::TotalClicks)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UserOffers::TotalConversions)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(UserOffers::Earnings)
                            .double()
                            .not_null()
                            .default(0.0),
                    )
                    .col(
                        ColumnDef::new(UserOffers::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(UserOffers::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_user_offers_tracking_code")
                    .table(UserOffers::Table)
                    .col(UserOffers::TrackingCode)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Clicks::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Clicks::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Clicks::OfferId).string_len(36).not_null())
                    .col(
                        ColumnDef::new(Clicks::UserOfferId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Clicks::Ip).string_len(45).null())
                    .col(ColumnDef::new(Clicks::UserAgent).text().null())
                    .col(ColumnDef::new(Clicks::Device).string_len(32).null())
                    .col(ColumnDef::new(Clicks::Browser).string_len(64).null())
                    .col(ColumnDef::new(Clicks::Os).string_len(64).null())
                    .col(ColumnDef::new(Clicks::Country).string_len(2).null())
                    .col(ColumnDef::new(Clicks::City).string_len(100).null())
                    .col(ColumnDef::new(Clicks::Referrer).text().null())
                    .col(ColumnDef::new(Clicks::Sub1).string_len(255).null())
                    .col(ColumnDef::new(Clicks::Sub2).string_len(255).null())
                    .col(ColumnDef::new(Clicks::Sub3).string_len(255).null())
                    .col(
                        ColumnDef::new(Clicks::Fingerprint)
                            .string_len(64)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Clicks::LinkStatus)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Clicks::ClickedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // fingerprint 只做普通索引，去重窗口由缓存保证
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_clicks_fingerprint")
                    .table(Clicks::Table)
                    .col(Clicks::Fingerprint)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_clicks_user_offer_time")
                    .table(Clicks::Table)
                    .col(Clicks::UserOfferId)
                    .col(Clicks::ClickedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Conversions::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Conversions::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Conversions::ClickId).string_len(36).null())
                    .col(
                        ColumnDef::new(Conversions::UserOfferId)
                            .string_len(36)
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Conversions::OfferId)
                            .string_len(36)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversions::ExternalConversionId)
                            .string_len(200)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Conversions::Amount).double().not_null())
                    .col(ColumnDef::new(Conversions::Commission).double().not_null())
                    .col(
                        ColumnDef::new(Conversions::Currency)
                            .string_len(8)
                            .not_null(),
                    )
                    .col(ColumnDef::new(Conversions::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(Conversions::AttributionStatus)
                            .string_len(16)
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversions::PostbackStatus)
                            .string_len(32)
                            .null(),
                    )
                    .col(ColumnDef::new(Conversions::PostbackData).text().null())
                    .col(ColumnDef::new(Conversions::RejectionReason).text().null())
                    .col(
                        ColumnDef::new(Conversions::ConvertedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Conversions::ApprovedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Conversions::RejectedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Conversions::PaidAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(Conversions::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        // 并发 postback 的最终防线
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_conversions_external_id")
                    .table(Conversions::Table)
                    .col(Conversions::ExternalConversionId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_conversions_click_id")
                    .table(Conversions::Table)
                    .col(Conversions::ClickId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FraudEvents::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(FraudEvents::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(FraudEvents::Kind).string_len(32).not_null())
                    .col(ColumnDef::new(FraudEvents::Ip).string_len(45).null())
                    .col(ColumnDef::new(FraudEvents::UserAgent).text().null())
                    .col(
                        ColumnDef::new(FraudEvents::TrackingCode)
                            .string_len(100)
                            .null(),
                    )
                    .col(ColumnDef::new(FraudEvents::OfferId).string_len(36).null())
                    .col(ColumnDef::new(FraudEvents::Details).text().null())
                    .col(
                        ColumnDef::new(FraudEvents::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_fraud_events_kind_time")
                    .table(FraudEvents::Table)
                    .col(FraudEvents::Kind)
                    .col(FraudEvents::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(GeoRules::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(GeoRules::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(GeoRules::Name).string_len(255).not_null())
                    .col(ColumnDef::new(GeoRules::ScopeType).string_len(16).not_null())
                    .col(ColumnDef::new(GeoRules::ScopeId).string_len(36).null())
                    .col(ColumnDef::new(GeoRules::Mode).string_len(8).not_null())
                    .col(ColumnDef::new(GeoRules::Countries).text().not_null())
                    .col(
                        ColumnDef::new(GeoRules::Priority)
                            .integer()
                            .not_null()
                            .default(100),
                    )
                    .col(ColumnDef::new(GeoRules::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(GeoRules::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_geo_rules_scope")
                    .table(GeoRules::Table)
                    .col(GeoRules::ScopeType)
                    .col(GeoRules::ScopeId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(ApiKeys::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ApiKeys::Id)
                            .string_len(36)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ApiKeys::AdvertiserId).string_len(36).null())
                    .col(ColumnDef::new(ApiKeys::Name).string_len(255).not_null())
                    .col(ColumnDef::new(ApiKeys::KeyPrefix).string_len(16).not_null())
                    .col(ColumnDef::new(ApiKeys::KeyHash).string_len(255).not_null())
                    .col(ColumnDef::new(ApiKeys::Status).string_len(16).not_null())
                    .col(
                        ColumnDef::new(ApiKeys::LastUsedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ApiKeys::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_api_keys_prefix")
                    .table(ApiKeys::Table)
                    .col(ApiKeys::KeyPrefix)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ApiKeys::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(GeoRules::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(FraudEvents::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Conversions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Clicks::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(UserOffers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Offers::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Users::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Username,
    TotalClicks,
    TotalConversions,
    TotalEarnings,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Offers {
    Table,
    Id,
    AdvertiserId,
    Title,
    DestinationUrl,
    Payout,
    Currency,
    Status,
    TotalClicks,
    TotalConversions,
    CreatedAt,
}

#[derive(DeriveIden)]
enum UserOffers {
    Table,
    Id,
    UserId,
    OfferId,
    TrackingCode,
    Status,
    TotalClicks,
    TotalConversions,
    Earnings,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Clicks {
    Table,
    Id,
    OfferId,
    UserOfferId,
    Ip,
    UserAgent,
    Device,
    Browser,
    Os,
    Country,
    City,
    Referrer,
    Sub1,
    Sub2,
    Sub3,
    Fingerprint,
    LinkStatus,
    ClickedAt,
}

#[derive(DeriveIden)]
enum Conversions {
    Table,
    Id,
    ClickId,
    UserOfferId,
    OfferId,
    ExternalConversionId,
    Amount,
    Commission,
    Currency,
    Status,
    AttributionStatus,
    PostbackStatus,
    PostbackData,
    RejectionReason,
    ConvertedAt,
    ApprovedAt,
    RejectedAt,
    PaidAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum FraudEvents {
    Table,
    Id,
    Kind,
    Ip,
    UserAgent,
    TrackingCode,
    OfferId,
    Details,
    CreatedAt,
}

#[derive(DeriveIden)]
enum GeoRules {
    Table,
    Id,
    Name,
    ScopeType,
    ScopeId,
    Mode,
    Countries,
    Priority,
    Status,
    CreatedAt,
}

#[derive(DeriveIden)]
enum ApiKeys {
    Table,
    Id,
    AdvertiserId,
    Name,
    KeyPrefix,
    KeyHash,
    Status,
    LastUsedAt,
    CreatedAt,
}
