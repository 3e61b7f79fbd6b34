use async_trait::async_trait;
use wordway_core::models::Config;
use wordway_core::Result;

/// Durable holder of the config record.
///
/// Implementations are scoped: each store instance reads and writes exactly
/// one record. Only the config manager talks to a store; anything else that
/// writes here would bypass listener notification.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Read the stored record, or `None` when nothing has been written yet.
    async fn get(&self) -> Result<Option<Config>>;

    /// Replace the stored record. Returns once the write is durable.
    async fn set(&self, config: &Config) -> Result<()>;
}
