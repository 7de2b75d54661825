//! Zone storage and operation resolution.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::block::{BlockDef, BlockOperation, ResolvedBlock, Wrapper, DEFAULT_WEIGHT};

/// Invalid block registrations.
#[derive(Debug, PartialEq, Eq)]
pub enum ZoneError {
    /// The operation is missing its target field, or has conflicting ones.
    InvalidBlock { zone: String, reason: String },
}

impl std::fmt::Display for ZoneError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ZoneError::InvalidBlock { zone, reason } => {
                write!(f, "invalid block in zone '{zone}': {reason}")
            }
        }
    }
}

impl std::error::Error for ZoneError {}

struct Zone {
    default_component: Option<String>,
    /// Operations log, resolved on read.
    registrations: Vec<BlockDef>,
}

struct Inner {
    zones: RwLock<HashMap<String, Zone>>,
    version: AtomicU64,
    debug: bool,
}

/// Registry of named UI slots and their block registrations.
///
/// Registrations are kept as an operations log and resolved on read, so
/// the effective list is deterministic regardless of module load
/// interleaving: adds are weight-sorted, then replaces substitute in
/// place, extends splice next to their target, and wraps stack on it.
///
/// `ZoneRegistry` is `Clone` and can be shared across threads.
#[derive(Clone)]
pub struct ZoneRegistry {
    inner: Arc<Inner>,
}

impl Default for ZoneRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ZoneRegistry {
    pub fn new() -> Self {
        Self::with_debug(false)
    }

    /// In debug mode duplicate block ids are logged at `warn` level.
    pub fn with_debug(debug: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                zones: RwLock::new(HashMap::new()),
                version: AtomicU64::new(0),
                debug,
            }),
        }
    }

    /// Declare a zone and (optionally) its fallback component.
    pub fn define_zone(&self, name: &str, default_component: Option<&str>) {
        let mut zones = self.inner.zones.write().expect("zone registry poisoned");
        let zone = zones.entry(name.to_string()).or_insert_with(|| Zone {
            default_component: None,
            registrations: Vec::new(),
        });
        if let Some(component) = default_component {
            zone.default_component = Some(component.to_string());
        }
        drop(zones);
        self.bump();
    }

    /// Append a block registration to the zone's operations log.
    ///
    /// Blocks may register before the zone is defined; the zone record is
    /// created implicitly.
    pub fn register_block(&self, zone_name: &str, mut block: BlockDef) -> Result<(), ZoneError> {
        self.validate(zone_name, &block)?;
        if block.id.is_none() {
            block.id = Some(format!("block-{}", uuid::Uuid::new_v4()));
        }
        let mut zones = self.inner.zones.write().expect("zone registry poisoned");
        let zone = zones.entry(zone_name.to_string()).or_insert_with(|| Zone {
            default_component: None,
            registrations: Vec::new(),
        });
        if block.operation == BlockOperation::Add {
            let id = block.id.as_deref().expect("id assigned above");
            let duplicate = zone
                .registrations
                .iter()
                .any(|b| b.operation == BlockOperation::Add && b.id.as_deref() == Some(id));
            if duplicate {
                if self.inner.debug {
                    tracing::warn!(zone = zone_name, block = id, "duplicate block id; later registration wins");
                } else {
                    tracing::debug!(zone = zone_name, block = id, "duplicate block id; later registration wins");
                }
                zone.registrations
                    .retain(|b| !(b.operation == BlockOperation::Add && b.id.as_deref() == Some(id)));
            }
        }
        zone.registrations.push(block);
        drop(zones);
        self.bump();
        Ok(())
    }

    /// Remove every registration with the given id from the zone.
    pub fn remove_block(&self, zone_name: &str, block_id: &str) {
        let mut zones = self.inner.zones.write().expect("zone registry poisoned");
        if let Some(zone) = zones.get_mut(zone_name) {
            zone.registrations.retain(|b| b.id.as_deref() != Some(block_id));
        }
        drop(zones);
        self.bump();
    }

    /// Drop all registrations of a zone, keeping its default component.
    pub fn clear_zone(&self, zone_name: &str) {
        let mut zones = self.inner.zones.write().expect("zone registry poisoned");
        if let Some(zone) = zones.get_mut(zone_name) {
            zone.registrations.clear();
        }
        drop(zones);
        self.bump();
    }

    /// The fallback component declared for the zone, if any.
    pub fn get_default(&self, zone_name: &str) -> Option<String> {
        let zones = self.inner.zones.read().expect("zone registry poisoned");
        zones
            .get(zone_name)
            .and_then(|z| z.default_component.clone())
    }

    /// Defined zone names, sorted.
    pub fn zone_names(&self) -> Vec<String> {
        let zones = self.inner.zones.read().expect("zone registry poisoned");
        let mut names: Vec<String> = zones.keys().cloned().collect();
        names.sort();
        names
    }

    /// Monotonic counter incremented on every mutation.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    /// Resolve the zone's operations log into the ordered effective list.
    pub fn get_blocks(&self, zone_name: &str) -> Vec<ResolvedBlock> {
        let zones = self.inner.zones.read().expect("zone registry poisoned");
        let Some(zone) = zones.get(zone_name) else {
            return Vec::new();
        };

        // Base list: adds, in log order (duplicates were resolved on write).
        let mut blocks: Vec<ResolvedBlock> = Vec::new();
        for def in &zone.registrations {
            if def.operation != BlockOperation::Add {
                continue;
            }
            blocks.push(ResolvedBlock {
                id: def.id.clone().expect("add blocks always carry an id"),
                component: def.component.clone(),
                weight: def.weight.unwrap_or(DEFAULT_WEIGHT),
                props: def.props.clone(),
                wrappers: Vec::new(),
            });
        }

        // Replaces substitute in place, preserving weight unless overridden.
        for def in &zone.registrations {
            if def.operation != BlockOperation::Replace {
                continue;
            }
            let target = def.replaces.as_deref().expect("validated on write");
            if let Some(existing) = blocks.iter_mut().find(|b| b.id == target) {
                existing.component = def.component.clone();
                existing.props = def.props.clone();
                if let Some(weight) = def.weight {
                    existing.weight = weight;
                }
                if let Some(id) = &def.id {
                    existing.id = id.clone();
                }
            } else {
                tracing::debug!(zone = zone_name, target, "replace target not present");
            }
        }

        // Stable weight sort (log order breaks ties).
        blocks.sort_by_key(|b| b.weight);

        // Extends splice adjacent to their target; weight is ignored when
        // the target is present, otherwise the block falls back to an add.
        for def in &zone.registrations {
            if def.operation != BlockOperation::Extend {
                continue;
            }
            let (target, offset) = match (&def.before, &def.after) {
                (Some(t), None) => (t.as_str(), 0usize),
                (None, Some(t)) => (t.as_str(), 1usize),
                _ => unreachable!("validated on write"),
            };
            let resolved = ResolvedBlock {
                id: def.id.clone().expect("id assigned on write"),
                component: def.component.clone(),
                weight: def.weight.unwrap_or(DEFAULT_WEIGHT),
                props: def.props.clone(),
                wrappers: Vec::new(),
            };
            match blocks.iter().position(|b| b.id == target) {
                Some(pos) => blocks.insert(pos + offset, resolved),
                None => {
                    tracing::debug!(zone = zone_name, target, "extend target not present; appending by weight");
                    let pos = blocks
                        .iter()
                        .position(|b| b.weight > resolved.weight)
                        .unwrap_or(blocks.len());
                    blocks.insert(pos, resolved);
                }
            }
        }

        // Wraps stack on their target, innermost = highest weight.
        for def in &zone.registrations {
            if def.operation != BlockOperation::Wrap {
                continue;
            }
            let target = def.wraps.as_deref().expect("validated on write");
            if let Some(block) = blocks.iter_mut().find(|b| b.id == target) {
                block.wrappers.push(Wrapper {
                    id: def.id.clone().expect("id assigned on write"),
                    component: def.component.clone(),
                    props: def.props.clone(),
                    weight: def.weight.unwrap_or(DEFAULT_WEIGHT),
                });
            } else {
                tracing::debug!(zone = zone_name, target, "wrap target not present");
            }
        }
        for block in &mut blocks {
            block.wrappers.sort_by_key(|w| std::cmp::Reverse(w.weight));
        }

        blocks
    }

    fn validate(&self, zone: &str, block: &BlockDef) -> Result<(), ZoneError> {
        let invalid = |reason: &str| {
            Err(ZoneError::InvalidBlock {
                zone: zone.to_string(),
                reason: reason.to_string(),
            })
        };
        match block.operation {
            BlockOperation::Add => Ok(()),
            BlockOperation::Replace => {
                if block.replaces.is_none() {
                    return invalid("replace requires `replaces`");
                }
                Ok(())
            }
            BlockOperation::Extend => match (&block.before, &block.after) {
                (Some(_), Some(_)) => invalid("extend takes exactly one of `before`/`after`"),
                (None, None) => invalid("extend requires `before` or `after`"),
                _ => Ok(()),
            },
            BlockOperation::Wrap => {
                if block.wraps.is_none() {
                    return invalid("wrap requires `wraps`");
                }
                Ok(())
            }
        }
    }

    fn bump(&self) {
        self.inner.version.fetch_add(1, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn add_orders_by_weight_then_registration() {
        let zones = ZoneRegistry::new();
        zones
            .register_block("header", BlockDef::add("Last").with_id("last").with_weight(90))
            .unwrap();
        zones
            .register_block("header", BlockDef::add("First").with_id("first").with_weight(10))
            .unwrap();
        zones
            .register_block("header", BlockDef::add("MidA").with_id("mid-a"))
            .unwrap();
        zones
            .register_block("header", BlockDef::add("MidB").with_id("mid-b"))
            .unwrap();

        let ids: Vec<_> = zones
            .get_blocks("header")
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec!["first", "mid-a", "mid-b", "last"]);
    }

    #[test]
    fn duplicate_add_id_keeps_later_registration_only() {
        let zones = ZoneRegistry::with_debug(true);
        zones
            .register_block("z", BlockDef::add("Old").with_id("x"))
            .unwrap();
        zones
            .register_block("z", BlockDef::add("New").with_id("x"))
            .unwrap();

        let blocks = zones.get_blocks("z");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].component, "New");
    }

    #[test]
    fn replace_substitutes_in_place_preserving_weight() {
        let zones = ZoneRegistry::new();
        zones
            .register_block("z", BlockDef::add("Table").with_id("table").with_weight(30))
            .unwrap();
        zones
            .register_block("z", BlockDef::add("Footer").with_id("footer").with_weight(70))
            .unwrap();
        zones
            .register_block("z", BlockDef::replace("FancyTable", "table"))
            .unwrap();

        let blocks = zones.get_blocks("z");
        assert_eq!(blocks[0].component, "FancyTable");
        assert_eq!(blocks[0].weight, 30);
        assert_eq!(blocks[0].id, "table");
    }

    #[test]
    fn replace_requires_target_field() {
        let zones = ZoneRegistry::new();
        let mut bad = BlockDef::add("X");
        bad.operation = BlockOperation::Replace;
        assert!(zones.register_block("z", bad).is_err());
    }

    #[test]
    fn extend_inserts_adjacent_ignoring_weight() {
        let zones = ZoneRegistry::new();
        zones
            .register_block("z", BlockDef::add("A").with_id("a").with_weight(10))
            .unwrap();
        zones
            .register_block("z", BlockDef::add("B").with_id("b").with_weight(20))
            .unwrap();
        // Weight 99 would normally sort last; adjacency wins.
        zones
            .register_block(
                "z",
                BlockDef::extend_after("Badge", "a").with_id("badge").with_weight(99),
            )
            .unwrap();

        let ids: Vec<_> = zones.get_blocks("z").into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec!["a", "badge", "b"]);
    }

    #[test]
    fn extend_before_and_after_both_set_is_invalid() {
        let zones = ZoneRegistry::new();
        let mut bad = BlockDef::extend_after("X", "a");
        bad.before = Some("b".into());
        assert!(zones.register_block("z", bad).is_err());
    }

    #[test]
    fn wrappers_stack_highest_weight_innermost() {
        let zones = ZoneRegistry::new();
        zones
            .register_block("z", BlockDef::add("Table").with_id("table"))
            .unwrap();
        zones
            .register_block("z", BlockDef::wrap("Card", "table").with_id("card").with_weight(10))
            .unwrap();
        zones
            .register_block("z", BlockDef::wrap("Loading", "table").with_id("loading").with_weight(80))
            .unwrap();

        let blocks = zones.get_blocks("z");
        let wrappers: Vec<_> = blocks[0].wrappers.iter().map(|w| w.id.as_str()).collect();
        // Innermost first: Loading (80) hugs the table, Card (10) is outermost.
        assert_eq!(wrappers, vec!["loading", "card"]);
    }

    #[test]
    fn remove_and_clear() {
        let zones = ZoneRegistry::new();
        zones.define_zone("z", Some("EmptyState"));
        zones
            .register_block("z", BlockDef::add("A").with_id("a"))
            .unwrap();
        zones
            .register_block("z", BlockDef::add("B").with_id("b"))
            .unwrap();

        zones.remove_block("z", "a");
        assert_eq!(zones.get_blocks("z").len(), 1);

        zones.clear_zone("z");
        assert!(zones.get_blocks("z").is_empty());
        assert_eq!(zones.get_default("z").as_deref(), Some("EmptyState"));
    }

    #[test]
    fn version_increments_on_mutation() {
        let zones = ZoneRegistry::new();
        let v0 = zones.version();
        zones.define_zone("z", None);
        zones
            .register_block("z", BlockDef::add("A").with_id("a"))
            .unwrap();
        zones.remove_block("z", "a");
        assert!(zones.version() >= v0 + 3);
    }

    #[test]
    fn blocks_may_register_before_zone_is_defined() {
        let zones = ZoneRegistry::new();
        zones
            .register_block("late", BlockDef::add("A").with_id("a").with_props(json!({"n": 1})))
            .unwrap();
        zones.define_zone("late", Some("Fallback"));
        assert_eq!(zones.get_blocks("late").len(), 1);
        assert_eq!(zones.get_default("late").as_deref(), Some("Fallback"));
    }
}
