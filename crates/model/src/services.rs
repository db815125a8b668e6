use ahash::{AHashMap, AHashSet};

use crate::item::DexType;

/// Implementations registered for one service interface in one feature.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    /// `None` for the base split.
    pub feature: Option<String>,
    /// Implementation types in registration order.
    pub implementations: Vec<DexType>,
}

/// Service-interface to implementation mapping, read once at start-up from
/// `META-INF/services/` entries and split by feature.
#[derive(Debug, Default)]
pub struct ServiceMapping {
    map: AHashMap<DexType, Vec<ServiceEntry>>,
}

impl ServiceMapping {
    pub fn new() -> ServiceMapping {
        ServiceMapping::default()
    }

    pub fn add_entry(
        &mut self,
        interface: DexType,
        feature: Option<String>,
        implementations: Vec<DexType>,
    ) {
        self.map.entry(interface).or_default().push(ServiceEntry {
            feature,
            implementations,
        });
    }

    /// All implementations of a service interface, base split first, then
    /// features in name order; registration order preserved within an entry.
    pub fn implementations_for(&self, interface: &DexType) -> Vec<DexType> {
        let Some(entries) = self.map.get(interface) else {
            return Vec::new();
        };
        let mut sorted: Vec<&ServiceEntry> = entries.iter().collect();
        sorted.sort_by(|a, b| match (&a.feature, &b.feature) {
            (None, None) => std::cmp::Ordering::Equal,
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (Some(a), Some(b)) => a.cmp(b),
        });
        let mut result = Vec::new();
        for entry in sorted {
            for implementation in &entry.implementations {
                if !result.contains(implementation) {
                    result.push(implementation.clone());
                }
            }
        }
        result
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Copy restricted to live interfaces and implementations, applied after
    /// tree-pruning.
    pub fn pruned_copy(&self, live_types: &AHashSet<DexType>) -> ServiceMapping {
        let mut pruned = ServiceMapping::new();
        for (interface, entries) in &self.map {
            if !live_types.contains(interface) {
                continue;
            }
            for entry in entries {
                let implementations: Vec<DexType> = entry
                    .implementations
                    .iter()
                    .filter(|ty| live_types.contains(*ty))
                    .cloned()
                    .collect();
                if !implementations.is_empty() {
                    pruned.add_entry(interface.clone(), entry.feature.clone(), implementations);
                }
            }
        }
        pruned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::ItemFactory;

    #[test]
    fn base_split_lists_first() {
        let factory = ItemFactory::new();
        let service = factory.create_type("LS;").unwrap();
        let base_impl = factory.create_type("LBaseImpl;").unwrap();
        let feature_impl = factory.create_type("LFeatureImpl;").unwrap();

        let mut mapping = ServiceMapping::new();
        mapping.add_entry(
            service.clone(),
            Some("feature1".to_owned()),
            vec![feature_impl.clone()],
        );
        mapping.add_entry(service.clone(), None, vec![base_impl.clone()]);

        assert_eq!(
            mapping.implementations_for(&service),
            vec![base_impl, feature_impl]
        );
    }

    #[test]
    fn pruned_copy_drops_dead_implementations() {
        let factory = ItemFactory::new();
        let service = factory.create_type("LS;").unwrap();
        let alive = factory.create_type("LAlive;").unwrap();
        let dead = factory.create_type("LDead;").unwrap();

        let mut mapping = ServiceMapping::new();
        mapping.add_entry(service.clone(), None, vec![alive.clone(), dead]);

        let mut live = AHashSet::new();
        live.insert(service.clone());
        live.insert(alive.clone());

        let pruned = mapping.pruned_copy(&live);
        assert_eq!(pruned.implementations_for(&service), vec![alive]);
    }
}
