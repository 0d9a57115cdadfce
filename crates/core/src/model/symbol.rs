use std::sync::Arc;

use serde::{Serialize, Serializer};

/// An interned frame name.
///
/// Symbols are handed out by [`SymbolTable`](crate::symbol_table::SymbolTable),
/// which stores each distinct name once. Every Symbol for a given name is a
/// clone of the same `Arc`, so [`Symbol::ptr_eq`] is an identity test and
/// comparing call paths never touches string bytes.
#[derive(Debug, Clone, Eq)]
pub struct Symbol(Arc<str>);

impl Symbol {
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when both refer to the same interned allocation.
    #[inline]
    pub fn ptr_eq(a: &Symbol, b: &Symbol) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Placeholder for a frame address without a symbol record.
    pub fn placeholder_name(addr: u64) -> String {
        format!("#{addr:08X}")
    }

    pub(crate) fn new(name: &str) -> Self {
        Symbol(Arc::from(name))
    }
}

impl PartialEq for Symbol {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0) || *self.0 == *other.0
    }
}

impl PartialEq<str> for Symbol {
    #[inline]
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for Symbol {
    #[inline]
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (*self.0).hash(state);
    }
}

impl std::ops::Deref for Symbol {
    type Target = str;

    #[inline]
    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Symbol {
    #[inline]
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::borrow::Borrow<str> for Symbol {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for Symbol {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_are_identical() {
        let a = Symbol::new("main");
        let b = a.clone();
        assert!(Symbol::ptr_eq(&a, &b));
    }

    #[test]
    fn separate_allocations_compare_by_content() {
        let a = Symbol::new("main");
        let b = Symbol::new("main");
        assert!(!Symbol::ptr_eq(&a, &b));
        assert_eq!(a, b);
        assert_eq!(a, "main");
    }

    #[test]
    fn placeholder_is_upper_hex_with_eight_digits() {
        assert_eq!(Symbol::placeholder_name(0x1a2b), "#00001A2B");
        assert_eq!(Symbol::placeholder_name(0x1_2345_6789), "#123456789");
    }

    #[test]
    fn ordering_is_by_name() {
        assert!(Symbol::new("alpha") < Symbol::new("beta"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Symbol::new("operator new")).unwrap_or_default();
        assert_eq!(json, "\"operator new\"");
    }
}
