//! Process-wide symbol interning
//!
//! A symbol is the low 48 bits of a hash of its bytes, so it fits in a
//! [`Slot`] payload. The table only grows; once interned, a symbol stays
//! valid for the life of the table.

use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;

use cadenza_sdk::{Slot, PAYLOAD_MASK, SYMBOL_TAG};
use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHasher};
use serde::Serialize;

/// Interned string handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Symbol(u64);

impl Symbol {
    /// Hash `name` without interning it.
    pub fn hash_of(name: &str) -> Symbol {
        let mut hasher = FxHasher::default();
        hasher.write(name.as_bytes());
        Symbol(hasher.finish() & PAYLOAD_MASK)
    }

    /// Raw 48-bit hash.
    #[inline]
    pub fn hash(self) -> u64 {
        self.0
    }

    /// Rebuild a symbol from a symbol-tagged slot.
    pub fn from_slot(slot: Slot) -> Option<Symbol> {
        slot.get_symbol_hash().map(Symbol)
    }

    /// The symbol as a slot value.
    #[inline]
    pub fn slot(self) -> Slot {
        Slot::from_bits(SYMBOL_TAG | self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:012x}", self.0)
    }
}

/// Symbol table errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SymbolError {
    /// Two different strings share a 48-bit hash
    #[error("symbol hash collision between '{existing}' and '{name}'")]
    Collision {
        /// Already interned string
        existing: String,
        /// String being interned
        name: String,
    },
}

/// Append-only string interner, safe to share between threads.
#[derive(Default)]
pub struct SymbolTable {
    names: RwLock<FxHashMap<Symbol, Arc<str>>>,
}

impl SymbolTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern `name`, returning its symbol.
    pub fn intern(&self, name: &str) -> Result<Symbol, SymbolError> {
        let symbol = Symbol::hash_of(name);
        if let Some(existing) = self.names.read().get(&symbol) {
            return check_collision(existing, name, symbol);
        }

        let mut names = self.names.write();
        // Another writer may have won the race between the two locks.
        if let Some(existing) = names.get(&symbol) {
            return check_collision(existing, name, symbol);
        }
        names.insert(symbol, Arc::from(name));
        Ok(symbol)
    }

    /// String of an interned symbol.
    pub fn lookup(&self, symbol: Symbol) -> Option<Arc<str>> {
        self.names.read().get(&symbol).cloned()
    }

    /// Name of `symbol`, or its hash when it was never interned.
    pub fn name_or_hash(&self, symbol: Symbol) -> String {
        match self.lookup(symbol) {
            Some(name) => name.to_string(),
            None => symbol.to_string(),
        }
    }

    /// True if `symbol` was interned here.
    pub fn contains(&self, symbol: Symbol) -> bool {
        self.names.read().contains_key(&symbol)
    }

    /// Number of interned symbols.
    pub fn len(&self) -> usize {
        self.names.read().len()
    }

    /// True if nothing has been interned.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolTable").field("len", &self.len()).finish()
    }
}

fn check_collision(existing: &Arc<str>, name: &str, symbol: Symbol) -> Result<Symbol, SymbolError> {
    if &**existing == name {
        Ok(symbol)
    } else {
        Err(SymbolError::Collision {
            existing: existing.to_string(),
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let table = SymbolTable::new();
        let a = table.intern("value").unwrap();
        let b = table.intern("value").unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
        assert_eq!(&*table.lookup(a).unwrap(), "value");
    }

    #[test]
    fn test_distinct_names() {
        let table = SymbolTable::new();
        let a = table.intern("at").unwrap();
        let b = table.intern("put").unwrap();
        assert_ne!(a, b);
        assert!(table.contains(b));
    }

    #[test]
    fn test_symbol_slot_round_trip() {
        let symbol = Symbol::hash_of("selector");
        assert!(symbol.hash() <= PAYLOAD_MASK);
        let slot = symbol.slot();
        assert!(slot.is_symbol());
        assert_eq!(Symbol::from_slot(slot), Some(symbol));
    }

    #[test]
    fn test_shared_between_threads() {
        let table = Arc::new(SymbolTable::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let table = Arc::clone(&table);
                std::thread::spawn(move || table.intern(&format!("name{}", i % 2)).unwrap())
            })
            .collect();
        let symbols: Vec<Symbol> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(symbols[0], symbols[2]);
        assert_eq!(table.len(), 2);
    }
}
