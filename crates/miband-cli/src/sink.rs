//! Heart-rate sink backed by the local database.

use async_trait::async_trait;
use miband_core::{BpmSample, DeviceHandle, HeartRateSink};
use miband_store::Store;

/// Persists every sample to a [`Store`].
pub struct StoreSink {
    store: Store,
}

impl StoreSink {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn into_inner(self) -> Store {
        self.store
    }
}

#[async_trait]
impl HeartRateSink for StoreSink {
    async fn insert(
        &mut self,
        device: &DeviceHandle,
        sample: &BpmSample,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.store.insert_sample(device, sample)?;
        Ok(())
    }
}
