//! Sparse three-level map from CAN identifier to message definition.
//!
//! The identifier is cut into an 8-bit directory index (bits 31..24), a
//! 12-bit table index (bits 23..12) and a 12-bit leaf index (bits 11..0).
//! Tables and leaves are only allocated for prefixes that occur in the
//! catalog, so memory follows the number of distinct prefixes while a
//! lookup stays at three array reads.

use std::num::NonZeroU32;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::core::catalog::{Catalog, MessageDefinition};
use crate::error::{IcError, Result};

const DIRECTORY_BITS: u32 = 8;
const TABLE_BITS: u32 = 12;
const LEAF_BITS: u32 = 12;

const DIRECTORY_LEN: usize = 1 << DIRECTORY_BITS;
const TABLE_LEN: usize = 1 << TABLE_BITS;
const LEAF_LEN: usize = 1 << LEAF_BITS;

/// Message index + 1, so an empty slot costs no extra tag
type Slot = Option<NonZeroU32>;
type Leaf = Box<[Slot]>;
type Table = Box<[Option<Leaf>]>;

/// Split an identifier into (directory, table, leaf) indices
fn split(id: u32) -> (usize, usize, usize) {
    let directory = (id >> (TABLE_BITS + LEAF_BITS)) as usize;
    let table = ((id >> LEAF_BITS) as usize) & (TABLE_LEN - 1);
    let leaf = (id as usize) & (LEAF_LEN - 1);
    (directory, table, leaf)
}

/// Allocate `len` empty slots, reporting failure instead of aborting
fn allocate<T>(len: usize, what: &str) -> Result<Box<[Option<T>]>> {
    let mut slots = Vec::new();
    slots
        .try_reserve_exact(len)
        .map_err(|e| IcError::OutOfResources(format!("{} ({} slots): {}", what, len, e)))?;
    slots.resize_with(len, || None);
    Ok(slots.into_boxed_slice())
}

/// Read-only after [`IdResolver::build`]; share it freely between threads
#[derive(Debug)]
pub struct IdResolver {
    catalog: Arc<Catalog>,
    directory: Box<[Option<Table>]>,
    tables: usize,
    leaves: usize,
    duplicates: Vec<u32>,
}

impl IdResolver {
    /// Index every message of the catalog by its identifier
    ///
    /// A repeated identifier is a catalog defect: the later message wins and
    /// the identifier is reported through [`IdResolver::duplicate_ids`].
    pub fn build(catalog: Arc<Catalog>) -> Result<Self> {
        let mut resolver = Self {
            directory: allocate(DIRECTORY_LEN, "ID directory")?,
            catalog: Arc::clone(&catalog),
            tables: 0,
            leaves: 0,
            duplicates: Vec::new(),
        };

        for (index, message) in catalog.messages().iter().enumerate() {
            let slot = u32::try_from(index + 1)
                .ok()
                .and_then(NonZeroU32::new)
                .ok_or_else(|| IcError::OutOfResources(format!("message index {} out of range", index)))?;

            if let Some(previous) = resolver.insert(message.id, slot)? {
                let previous = &catalog.messages()[previous.get() as usize - 1];
                warn!(
                    "CAN ID 0x{:X} defined twice ('{}' replaces '{}')",
                    message.id, message.name, previous.name
                );
                resolver.duplicates.push(message.id);
            }
        }

        debug!(
            "ID resolver built: {} messages, {} tables, {} leaves",
            catalog.messages().len(),
            resolver.tables,
            resolver.leaves
        );

        Ok(resolver)
    }

    fn insert(&mut self, id: u32, slot: NonZeroU32) -> Result<Slot> {
        let (d, t, l) = split(id);

        let table = match &mut self.directory[d] {
            Some(table) => table,
            empty => {
                self.tables += 1;
                empty.insert(allocate(TABLE_LEN, "ID table")?)
            }
        };

        let leaf = match &mut table[t] {
            Some(leaf) => leaf,
            empty => {
                self.leaves += 1;
                empty.insert(allocate(LEAF_LEN, "ID leaf")?)
            }
        };

        Ok(leaf[l].replace(slot))
    }

    /// Index of the message registered for `id`
    pub fn lookup_index(&self, id: u32) -> Option<usize> {
        let (d, t, l) = split(id);
        let table = self.directory[d].as_ref()?;
        let leaf = table[t].as_ref()?;
        leaf[l].map(|slot| slot.get() as usize - 1)
    }

    /// The message registered for `id`; `None` is the normal answer for traffic we do not know
    pub fn lookup(&self, id: u32) -> Option<&MessageDefinition> {
        self.lookup_index(id)
            .and_then(|index| self.catalog.message(index))
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Identifiers that appeared more than once while building
    pub fn duplicate_ids(&self) -> &[u32] {
        &self.duplicates
    }

    /// (tables, leaves) allocated so far
    pub fn allocated(&self) -> (usize, usize) {
        (self.tables, self.leaves)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::SignalDefinition;

    fn catalog(ids: &[(u32, &str)]) -> Arc<Catalog> {
        let messages = ids
            .iter()
            .map(|(id, name)| {
                MessageDefinition::new(*id, name, 8)
                    .with_signal(SignalDefinition::new(&format!("{}_sig", name), 0, 8))
            })
            .collect();
        Arc::new(Catalog::new(messages).unwrap())
    }

    #[test]
    fn test_split() {
        assert_eq!(split(0x1234_5678), (0x12, 0x345, 0x678));
        assert_eq!(split(0x7FF), (0, 0, 0x7FF));
    }

    #[test]
    fn test_lookup_known_and_unknown() {
        let resolver = IdResolver::build(catalog(&[
            (0x123, "Dash"),
            (0x7FF, "Edge"),
            (0x18FF_50E5, "J1939"),
        ]))
        .unwrap();

        assert_eq!(resolver.lookup(0x123).unwrap().name, "Dash");
        assert_eq!(resolver.lookup(0x7FF).unwrap().name, "Edge");
        assert_eq!(resolver.lookup(0x18FF_50E5).unwrap().name, "J1939");

        // Neighbours in an allocated leaf, and prefixes never allocated
        assert!(resolver.lookup(0x124).is_none());
        assert!(resolver.lookup(0x18FF_50E6).is_none());
        assert!(resolver.lookup(0x1FFF_FFFF).is_none());
        assert!(resolver.lookup(0).is_none());
    }

    #[test]
    fn test_every_catalog_id_resolves_to_itself() {
        let ids: Vec<(u32, String)> = (0..200u32)
            .map(|i| (i.wrapping_mul(0x0013_579B) & 0x1FFF_FFFF, format!("M{}", i)))
            .collect();
        let borrowed: Vec<(u32, &str)> = ids.iter().map(|(id, n)| (*id, n.as_str())).collect();
        let resolver = IdResolver::build(catalog(&borrowed)).unwrap();

        for (id, name) in &ids {
            let message = resolver.lookup(*id).unwrap();
            assert_eq!(message.id, *id);
            assert_eq!(&message.name, name);
        }
        assert!(resolver.duplicate_ids().is_empty());
    }

    #[test]
    fn test_allocation_follows_prefixes() {
        let resolver = IdResolver::build(catalog(&[(0x100, "A"), (0x101, "B"), (0x200, "C")])).unwrap();
        // All standard IDs share one table and one leaf
        assert_eq!(resolver.allocated(), (1, 1));

        let resolver = IdResolver::build(catalog(&[(0x100, "A"), (0x0100_1000, "B")])).unwrap();
        assert_eq!(resolver.allocated(), (2, 2));
    }

    #[test]
    fn test_duplicate_id_last_write_wins() {
        let resolver = IdResolver::build(catalog(&[(0x100, "First"), (0x100, "Second")])).unwrap();
        assert_eq!(resolver.lookup(0x100).unwrap().name, "Second");
        assert_eq!(resolver.lookup_index(0x100), Some(1));
        assert_eq!(resolver.duplicate_ids(), &[0x100]);
    }
}
