//! Pool table: running execution units per method.
//!
//! Units are appended in start order and never evicted while the router
//! runs. Selection always returns the earliest unit; there is no rotation
//! and no health-based removal.

use dashmap::DashMap;

use podcall_common::{ExecutionUnit, MethodIdentity};

/// Method identity -> execution units, in start order.
#[derive(Debug, Default)]
pub struct PoolTable {
    units: DashMap<MethodIdentity, Vec<ExecutionUnit>>,
}

impl PoolTable {
    /// Create an empty pool table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a unit to its method's pool.
    pub fn add(&self, unit: ExecutionUnit) {
        self.units
            .entry(unit.identity.clone())
            .or_default()
            .push(unit);
    }

    /// The earliest started unit for `identity`.
    pub fn first(&self, identity: &MethodIdentity) -> Option<ExecutionUnit> {
        self.units
            .get(identity)
            .and_then(|units| units.first().cloned())
    }

    /// All units for `identity`, in start order.
    pub fn units(&self, identity: &MethodIdentity) -> Vec<ExecutionUnit> {
        self.units
            .get(identity)
            .map(|units| units.clone())
            .unwrap_or_default()
    }

    /// Number of units pooled for `identity`.
    pub fn len(&self, identity: &MethodIdentity) -> usize {
        self.units.get(identity).map_or(0, |units| units.len())
    }

    /// Returns `true` if no unit is pooled for any method.
    pub fn is_empty(&self) -> bool {
        self.units.iter().all(|entry| entry.value().is_empty())
    }

    /// Total number of pooled units.
    pub fn total(&self) -> usize {
        self.units.iter().map(|entry| entry.value().len()).sum()
    }

    /// Copy of the whole table, ordered by identity.
    pub fn snapshot(&self) -> Vec<(MethodIdentity, Vec<ExecutionUnit>)> {
        let mut entries: Vec<_> = self
            .units
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    /// Remove and return every pooled unit.
    pub fn drain(&self) -> Vec<ExecutionUnit> {
        let identities: Vec<MethodIdentity> =
            self.units.iter().map(|entry| entry.key().clone()).collect();

        identities
            .into_iter()
            .filter_map(|identity| self.units.remove(&identity))
            .flat_map(|(_, units)| units)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, identity: &MethodIdentity) -> ExecutionUnit {
        ExecutionUnit::new(id, identity.clone(), "127.0.0.1", 6000)
    }

    #[test]
    fn test_first_is_earliest() {
        let pool = PoolTable::new();
        let greet = MethodIdentity::new("Greeter", "Greet");

        pool.add(unit("a", &greet));
        pool.add(unit("b", &greet));

        assert_eq!(pool.len(&greet), 2);
        for _ in 0..3 {
            assert_eq!(pool.first(&greet).unwrap().instance_id, "a");
        }
    }

    #[test]
    fn test_unknown_identity() {
        let pool = PoolTable::new();
        let ping = MethodIdentity::new("Health", "Ping");

        assert!(pool.first(&ping).is_none());
        assert!(pool.units(&ping).is_empty());
        assert_eq!(pool.len(&ping), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_snapshot_and_drain() {
        let pool = PoolTable::new();
        let greet = MethodIdentity::new("Greeter", "Greet");
        let ping = MethodIdentity::new("Health", "Ping");

        pool.add(unit("p1", &ping));
        pool.add(unit("g1", &greet));
        pool.add(unit("g2", &greet));

        let snapshot = pool.snapshot();
        assert_eq!(snapshot[0].0, greet);
        assert_eq!(snapshot[0].1.len(), 2);
        assert_eq!(pool.total(), 3);

        let mut drained: Vec<_> = pool.drain().into_iter().map(|u| u.instance_id).collect();
        drained.sort();
        assert_eq!(drained, vec!["g1", "g2", "p1"]);
        assert!(pool.is_empty());
        assert!(pool.drain().is_empty());
    }
}
