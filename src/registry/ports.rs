use std::collections::{BTreeSet, HashMap};

use tokio::sync::Mutex;

use crate::errors::{Error, Result};
use crate::models::{Environment, SlotRegistry};

/// Assigns (base, base+1) port pairs per environment from fixed ranges.
///
/// The used-base set is seeded from the persisted registries on the first
/// allocation and kept in memory afterwards; bases are never deallocated, so
/// a port is never reused across projects.
pub struct PortAllocator {
    used: Mutex<Option<HashMap<Environment, BTreeSet<u16>>>>,
}

impl PortAllocator {
    pub fn new() -> Self {
        Self {
            used: Mutex::new(None),
        }
    }

    /// Pick the smallest free base in the environment's range. `registries`
    /// is the current persisted set; it seeds the in-memory state once.
    pub async fn allocate(
        &self,
        environment: Environment,
        registries: &[SlotRegistry],
    ) -> Result<u16> {
        let mut guard = self.used.lock().await;
        let used = guard.get_or_insert_with(|| seed(registries));
        let per_env = used.entry(environment).or_default();

        let (start, end) = environment.port_range();
        let mut base = start;
        while base <= end {
            if !per_env.contains(&base) {
                per_env.insert(base);
                return Ok(base);
            }
            base += 2;
        }

        Err(Error::Internal(format!(
            "port range for {} exhausted",
            environment
        )))
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

fn seed(registries: &[SlotRegistry]) -> HashMap<Environment, BTreeSet<u16>> {
    let mut used: HashMap<Environment, BTreeSet<u16>> = HashMap::new();
    for registry in registries {
        used.entry(registry.environment)
            .or_default()
            .insert(registry.blue.port);
    }
    used
}
