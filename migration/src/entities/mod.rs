pub mod api_key;
pub mod click;
pub mod conversion;
pub mod fraud_event;
pub mod geo_rule;
pub mod offer;
pub mod user;
pub mod user_offer;
pub mod webhook_dlq_item;
pub mod webhook_execution;
pub mod webhook_pipeline;
pub mod webhook_step;
pub mod webhook_step_result;

pub use api_key::Entity as ApiKeyEntity;
pub use click::Entity as ClickEntity;
pub use conversion::Entity as ConversionEntity;
pub use fraud_event::Entity as FraudEventEntity;
pub use geo_rule::Entity as GeoRuleEntity;
pub use offer::Entity as OfferEntity;
pub use user::Entity as UserEntity;
pub use user_offer::Entity as UserOfferEntity;
pub use webhook_dlq_item::Entity as WebhookDlqItemEntity;
pub use webhook_execution::Entity as WebhookExecutionEntity;
pub use webhook_pipeline::Entity as WebhookPipelineEntity;
pub use webhook_step::Entity as WebhookStepEntity;
pub use webhook_step_result::Entity as WebhookStepResultEntity;
