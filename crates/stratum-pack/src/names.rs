//! Interned name registry
//!
//! A registry hands out small copyable [`Symbol`]s for strings. A filesystem
//! instance owns its registries and injects them into every archive it opens,
//! so symbols never outlive the instance that produced them.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Handle to an interned string
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    /// Position of the symbol in its registry
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Interner {
    lookup: HashMap<Box<str>, Symbol>,
    names: Vec<Arc<str>>,
}

/// Thread-safe string interner
///
/// Registries created with [`NameRegistry::caseless`] fold ASCII case when
/// looking names up but remember the spelling they were first seen with.
#[derive(Debug, Default)]
pub struct NameRegistry {
    caseless: bool,
    inner: RwLock<Interner>,
}

impl NameRegistry {
    /// Create a case-sensitive registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry that treats names differing only in ASCII case as equal
    pub fn caseless() -> Self {
        Self {
            caseless: true,
            inner: RwLock::default(),
        }
    }

    fn key(&self, name: &str) -> Box<str> {
        if self.caseless {
            name.to_ascii_lowercase().into_boxed_str()
        } else {
            name.into()
        }
    }

    /// Intern `name`, returning the existing symbol when already present
    pub fn intern(&self, name: &str) -> Symbol {
        let key = self.key(name);
        if let Some(symbol) = self.inner.read().lookup.get(&key) {
            return *symbol;
        }

        let mut inner = self.inner.write();
        if let Some(symbol) = inner.lookup.get(&key) {
            return *symbol;
        }

        let symbol = Symbol(inner.names.len() as u32);
        inner.names.push(Arc::from(name));
        inner.lookup.insert(key, symbol);
        symbol
    }

    /// Look up a name without interning it
    pub fn find(&self, name: &str) -> Option<Symbol> {
        self.inner.read().lookup.get(&self.key(name)).copied()
    }

    /// Get the string behind a symbol
    pub fn resolve(&self, symbol: Symbol) -> Option<Arc<str>> {
        self.inner.read().names.get(symbol.0 as usize).cloned()
    }

    /// Number of interned names
    pub fn len(&self) -> usize {
        self.inner.read().names.len()
    }

    /// Check whether nothing has been interned yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let registry = NameRegistry::new();
        let a = registry.intern("materials/brick.vmt");
        let b = registry.intern("materials/brick.vmt");
        let c = registry.intern("Materials/brick.vmt");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(registry.len(), 2);
        assert_eq!(&*registry.resolve(a).unwrap(), "materials/brick.vmt");
    }

    #[test]
    fn test_caseless_registry_keeps_first_spelling() {
        let registry = NameRegistry::caseless();
        let game = registry.intern("GAME");
        assert_eq!(registry.intern("game"), game);
        assert_eq!(registry.find("Game"), Some(game));
        assert_eq!(&*registry.resolve(game).unwrap(), "GAME");
    }

    #[test]
    fn test_unknown_symbol() {
        let registry = NameRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.find("missing").is_none());
        assert!(registry.resolve(Symbol(7)).is_none());
    }
}
