//! Uniform random analyst selection for approved requests.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use crate::errors::AppError;
use crate::store::Store;

/// Picks one analyst uniformly at random from the whole pool.
///
/// No load balancing or affinity: every analyst is equally likely on every pick.
pub struct AnalystPicker {
    store: Arc<dyn Store>,
    rng: Mutex<StdRng>,
}

impl AnalystPicker {
    /// Picker seeded from OS entropy.
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic picker; the same seed over the same pool yields the same sequence.
    pub fn seeded(store: Arc<dyn Store>, seed: u64) -> Self {
        Self {
            store,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub async fn pick(&self) -> Result<Uuid, AppError> {
        let pool = self.store.analyst_ids().await?;
        let picked = self.choose(&pool)?;
        tracing::debug!("Picked analyst {} from a pool of {}", picked, pool.len());
        Ok(picked)
    }

    fn choose(&self, pool: &[Uuid]) -> Result<Uuid, AppError> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| AppError::InternalError("Analyst picker RNG poisoned".to_string()))?;
        pool.choose(&mut *rng)
            .copied()
            .ok_or(AppError::NoAnalystsAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;
    use std::collections::HashMap;

    fn picker(seed: u64) -> AnalystPicker {
        AnalystPicker::seeded(Arc::new(MemoryStore::new()), seed)
    }

    #[test]
    fn test_empty_pool_fails() {
        let err = picker(1).choose(&[]).unwrap_err();
        assert!(matches!(err, AppError::NoAnalystsAvailable));
    }

    #[test]
    fn test_same_seed_same_sequence() {
        let pool: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        let a = picker(42);
        let b = picker(42);

        let first: Vec<Uuid> = (0..10).map(|_| a.choose(&pool).unwrap()).collect();
        let second: Vec<Uuid> = (0..10).map(|_| b.choose(&pool).unwrap()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_every_analyst_gets_picked() {
        let pool: Vec<Uuid> = (0..4).map(|_| Uuid::new_v4()).collect();
        let picker = picker(7);
        let mut counts: HashMap<Uuid, u32> = HashMap::new();

        for _ in 0..4_000 {
            *counts.entry(picker.choose(&pool).unwrap()).or_default() += 1;
        }

        assert_eq!(counts.len(), pool.len());
        // Roughly uniform: each share within 1000 ± 200.
        for count in counts.values() {
            assert!((800..=1200).contains(count), "skewed count {}", count);
        }
    }
}
