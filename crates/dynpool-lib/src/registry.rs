//! Process-wide pool registry
//!
//! Maps pool ids to the live pool and the configuration it was last declared
//! with. The declared configuration is the baseline every refresh is diffed
//! against.

use dashmap::DashMap;
use tracing::debug;

use crate::executor::ManagedPool;
use crate::models::PoolConfig;

/// A registered pool together with its declared configuration
#[derive(Debug, Clone)]
pub struct PoolHolder {
    pub pool_id: String,
    pub pool: ManagedPool,
    pub config: PoolConfig,
}

/// Registry of pools hosted by this process
#[derive(Default)]
pub struct PoolRegistry {
    /// Map of pool_id -> holder
    pools: DashMap<String, PoolHolder>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool, replacing any previous holder under the same id.
    ///
    /// `config` becomes the refresh baseline and must already be valid.
    pub fn register(
        &self,
        pool_id: impl Into<String>,
        pool: ManagedPool,
        config: PoolConfig,
    ) -> Option<PoolHolder> {
        let pool_id = pool_id.into();
        debug_assert!(
            config.validate().is_ok(),
            "pool {} registered with invalid config: {:?}",
            pool_id,
            config.validate()
        );
        debug!(pool_id = %pool_id, "Registering pool");
        self.pools.insert(
            pool_id.clone(),
            PoolHolder {
                pool_id,
                pool,
                config,
            },
        )
    }

    pub fn get(&self, pool_id: &str) -> Option<PoolHolder> {
        self.pools.get(pool_id).map(|r| r.clone())
    }

    /// Snapshot of every registered holder
    pub fn list_all(&self) -> Vec<PoolHolder> {
        self.pools.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Replace the declared configuration of a registered pool.
    ///
    /// Returns false when the id is unknown.
    pub fn update_config(&self, pool_id: &str, config: PoolConfig) -> bool {
        match self.pools.get_mut(pool_id) {
            Some(mut holder) => {
                holder.config = config;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, pool_id: &str) -> Option<PoolHolder> {
        debug!(pool_id = %pool_id, "Removing pool");
        self.pools.remove(pool_id).map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn holder_parts(id: &str, core: usize, max: usize) -> (ManagedPool, PoolConfig) {
        let config = PoolConfig::new(id, core, max);
        (ManagedPool::from_config(&config).unwrap(), config)
    }

    #[test]
    fn test_register_and_get() {
        let registry = PoolRegistry::new();
        assert!(registry.is_empty());

        let (pool, config) = holder_parts("orders", 1, 2);
        assert!(registry.register("orders", pool, config).is_none());

        let holder = registry.get("orders").unwrap();
        assert_eq!(holder.pool_id, "orders");
        assert_eq!(holder.pool.sizes(), (1, 2));
        assert_eq!(registry.len(), 1);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_register_same_id_last_write_wins() {
        let registry = PoolRegistry::new();
        let (first, first_config) = holder_parts("p", 1, 1);
        let (second, second_config) = holder_parts("p", 2, 3);

        registry.register("p", first, first_config);
        let previous = registry.register("p", second, second_config).unwrap();

        assert_eq!(previous.config.maximum_pool_size, 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("p").unwrap().pool.sizes(), (2, 3));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "registered with invalid config")]
    fn test_register_rejects_core_above_max_baseline() {
        let registry = PoolRegistry::new();
        let (pool, _) = holder_parts("p", 1, 2);
        registry.register("p", pool, PoolConfig::new("p", 5, 2));
    }

    #[test]
    fn test_update_config_and_remove() {
        let registry = PoolRegistry::new();
        let (pool, config) = holder_parts("p", 1, 2);
        registry.register("p", pool, config.clone());

        let mut updated = config;
        updated.maximum_pool_size = 4;
        assert!(registry.update_config("p", updated));
        assert!(!registry.update_config("missing", PoolConfig::new("missing", 1, 1)));
        assert_eq!(registry.get("p").unwrap().config.maximum_pool_size, 4);

        assert!(registry.remove("p").is_some());
        assert!(registry.list_all().is_empty());
    }
}
