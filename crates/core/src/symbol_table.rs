use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::model::Symbol;

/// Frame addresses at or below this value terminate a backtrace.
pub const INVALID_ADDRESS: u64 = 0x1000;

/// Result of registering a backtrace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BacktraceStatus {
    /// First time this hash was seen.
    Inserted,
    /// Hash already known with the same frames.
    Duplicate,
    /// Hash already known with different frames; the stored frames are kept.
    Collision,
    /// No valid frame; nothing stored.
    Empty,
}

/// Interned frame names and backtrace hash → frame name sequences.
///
/// Shared by every snapshot of a session so that the same function resolves
/// to the same [`Symbol`] in all of them.
#[derive(Debug, Default)]
pub struct SymbolTable {
    unique_names: HashSet<Symbol>,
    addr_to_name: HashMap<u64, Symbol>,
    bktraces: HashMap<u32, Vec<Symbol>>,
    collisions: usize,
    remaps: usize,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `addr` to `name` and return the interned name.
    ///
    /// An address keeps the first name it was registered with; a later
    /// different name is reported and ignored.
    pub fn add_symbol(&mut self, addr: u64, name: &str) -> Symbol {
        debug_assert!(!name.is_empty() && addr > INVALID_ADDRESS);

        if let Some(existing) = self.addr_to_name.get(&addr) {
            if existing.as_str() != name {
                warn!(
                    addr,
                    existing = existing.as_str(),
                    name,
                    "symbol address remapped to a different name, keeping the first"
                );
                self.remaps += 1;
            }
            return existing.clone();
        }

        let symbol = self.intern(name);
        self.addr_to_name.insert(addr, symbol.clone());
        symbol
    }

    /// Register the frames captured under `hash`, innermost first.
    pub fn add_backtrace(&mut self, hash: u32, frames: &[u64]) -> BacktraceStatus {
        let names = self.resolve_frame_names(frames);
        if names.is_empty() {
            return BacktraceStatus::Empty;
        }

        match self.bktraces.get(&hash) {
            None => {
                self.bktraces.insert(hash, names);
                BacktraceStatus::Inserted
            }
            Some(stored) => {
                let same = stored.len() == names.len()
                    && stored.iter().zip(&names).all(|(a, b)| Symbol::ptr_eq(a, b));
                if same {
                    BacktraceStatus::Duplicate
                } else {
                    warn!(hash, "backtrace hash collision");
                    self.collisions += 1;
                    BacktraceStatus::Collision
                }
            }
        }
    }

    /// Return the interned Symbol for `name`, adding it if needed.
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(existing) = self.unique_names.get(name) {
            return existing.clone();
        }
        let symbol = Symbol::new(name);
        self.unique_names.insert(symbol.clone());
        symbol
    }

    /// Look up an interned name without adding it.
    pub fn find(&self, name: &str) -> Option<&Symbol> {
        self.unique_names.get(name)
    }

    pub fn symbol(&self, addr: u64) -> Option<&Symbol> {
        self.addr_to_name.get(&addr)
    }

    /// Frame names for `hash`, innermost frame first.
    pub fn backtrace_symbols(&self, hash: u32) -> Option<&[Symbol]> {
        self.bktraces.get(&hash).map(Vec::as_slice)
    }

    /// All distinct names, sorted.
    pub fn symbols(&self) -> Vec<&Symbol> {
        let mut names: Vec<&Symbol> = self.unique_names.iter().collect();
        names.sort();
        names
    }

    pub fn symbol_count(&self) -> usize {
        self.unique_names.len()
    }

    pub fn backtrace_count(&self) -> usize {
        self.bktraces.len()
    }

    pub fn collision_count(&self) -> usize {
        self.collisions
    }

    pub fn remap_count(&self) -> usize {
        self.remaps
    }

    fn resolve_frame_names(&mut self, frames: &[u64]) -> Vec<Symbol> {
        let valid = frames
            .iter()
            .position(|&f| f <= INVALID_ADDRESS)
            .unwrap_or(frames.len());

        let mut names = Vec::with_capacity(valid);
        for &addr in &frames[..valid] {
            let name = match self.addr_to_name.get(&addr) {
                Some(name) => name.clone(),
                None => self.add_symbol(addr, &Symbol::placeholder_name(addr)),
            };
            names.push(name);
        }
        names
    }
}
