//! Address → translated-function registries.
//!
//! The translation pipeline emits one entry per recovered function. A second, much smaller
//! registry holds hand-written functions that override or complete the generated ones. Both are
//! frozen once built and looked up by binary search.

use core::fmt;
use core::ops::Range;

use tracing::debug;

use crate::error::DispatchError;
use crate::machine::Machine;

/// Entry point of a translated function.
pub type TranslatedFn = fn(&mut Machine);

/// Sorted, immutable address → entry map.
#[derive(Clone, Default)]
pub struct DispatchTable {
    entries: Vec<(u32, TranslatedFn)>,
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("len", &self.entries.len())
            .field("first", &self.entries.first().map(|e| e.0))
            .field("last", &self.entries.last().map(|e| e.0))
            .finish()
    }
}

impl DispatchTable {
    pub fn builder() -> DispatchTableBuilder {
        DispatchTableBuilder::default()
    }

    /// Builds a table from `(address, entry)` pairs in any order.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (u32, TranslatedFn)>,
    ) -> Result<Self, DispatchError> {
        let mut b = Self::builder();
        for (addr, f) in entries {
            b.register(addr, f);
        }
        b.build()
    }

    #[inline]
    pub fn lookup(&self, addr: u32) -> Option<TranslatedFn> {
        self.entries
            .binary_search_by_key(&addr, |&(a, _)| a)
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn contains(&self, addr: u32) -> bool {
        self.lookup(addr).is_some()
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visits entries in ascending address order. Verification tooling only.
    pub fn for_each_in_order(&self, mut f: impl FnMut(u32, TranslatedFn)) {
        for &(addr, entry) in &self.entries {
            f(addr, entry);
        }
    }

    pub fn addresses(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|&(a, _)| a)
    }

    fn entries_in(&self, range: Range<u32>) -> Vec<(u32, TranslatedFn)> {
        let start = self.entries.partition_point(|&(a, _)| a < range.start);
        let end = self.entries.partition_point(|&(a, _)| a < range.end);
        self.entries[start..end].to_vec()
    }
}

/// Collects registrations until [`DispatchTableBuilder::build`] freezes them.
#[derive(Default)]
pub struct DispatchTableBuilder {
    entries: Vec<(u32, TranslatedFn)>,
}

impl DispatchTableBuilder {
    pub fn register(&mut self, addr: u32, entry: TranslatedFn) -> &mut Self {
        self.entries.push((addr, entry));
        self
    }

    pub fn build(&mut self) -> Result<DispatchTable, DispatchError> {
        let mut entries = core::mem::take(&mut self.entries);
        entries.sort_by_key(|&(a, _)| a);
        if let Some(w) = entries.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(DispatchError::Duplicate { addr: w[0].0 });
        }
        Ok(DispatchTable { entries })
    }
}

/// The generated registry plus the manual-override registry.
#[derive(Clone, Debug, Default)]
pub struct Registries {
    pub primary: DispatchTable,
    pub manual: DispatchTable,
}

impl Registries {
    pub fn new(primary: DispatchTable, manual: DispatchTable) -> Self {
        Self { primary, manual }
    }

    /// `primary` plus the runtime's own hand-written functions as the manual registry.
    pub fn with_builtin_manual(primary: DispatchTable) -> Self {
        Self {
            primary,
            manual: crate::thread_start::manual_registry(),
        }
    }

    /// Primary first, then manual.
    #[inline]
    pub fn lookup(&self, addr: u32) -> Option<TranslatedFn> {
        self.primary.lookup(addr).or_else(|| self.manual.lookup(addr))
    }

    pub fn count(&self) -> usize {
        self.primary.count() + self.manual.count()
    }

    /// Calls every primary entry whose address lies in `range`, lowest first, each as a fresh
    /// call with a placeholder return address and the stack pointer restored afterwards.
    ///
    /// Meant for smoke-running the game's static data initializers; returns how many ran.
    pub fn call_all_in_order(&self, m: &mut Machine, range: Range<u32>) -> usize {
        let entries = self.primary.entries_in(range);
        for &(addr, entry) in &entries {
            let saved = m.regs.esp;
            m.push32(0);
            debug!(addr = format_args!("{addr:#010x}"), "calling");
            entry(m);
            m.regs.esp = saved;
        }
        entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn a(m: &mut Machine) {
        m.regs.eax = 1;
    }

    fn b(m: &mut Machine) {
        m.regs.eax = 2;
    }

    #[test]
    fn lookup_is_sorted_and_exact() {
        let t = DispatchTable::from_entries([(0x3000, a as TranslatedFn), (0x1000, b), (0x2000, a)])
            .unwrap();
        assert_eq!(t.count(), 3);
        assert_eq!(t.addresses().collect::<Vec<_>>(), vec![0x1000, 0x2000, 0x3000]);
        assert!(t.lookup(0x2000).is_some());
        assert!(t.lookup(0x2001).is_none());
        assert!(t.lookup(0).is_none());
    }

    #[test]
    fn duplicates_are_rejected() {
        let err = DispatchTable::from_entries([(0x1000, a as TranslatedFn), (0x1000, b)])
            .unwrap_err();
        assert_eq!(err, DispatchError::Duplicate { addr: 0x1000 });
    }

    #[test]
    fn for_each_visits_in_address_order() {
        let t = DispatchTable::from_entries([(9, a as TranslatedFn), (3, b), (6, a)]).unwrap();
        let mut seen = Vec::new();
        t.for_each_in_order(|addr, _| seen.push(addr));
        assert_eq!(seen, vec![3, 6, 9]);
    }

    #[test]
    fn range_selection() {
        let t = DispatchTable::from_entries([(1, a as TranslatedFn), (5, b), (10, a)]).unwrap();
        assert_eq!(t.entries_in(2..10).len(), 1);
        assert_eq!(t.entries_in(0..11).len(), 3);
    }
}
