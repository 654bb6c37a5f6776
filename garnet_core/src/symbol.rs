//! Process-wide symbol interning.
//!
//! Method names, constant names, and primitive names are interned once and
//! referred to by a compact [`Symbol`] id afterwards. Interning the same
//! string twice yields the same id, so symbol comparison is a word compare.

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;

/// A compact identifier for an interned string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Symbol(u32);

impl Symbol {
    /// Intern a string, returning its stable id.
    pub fn intern(name: &str) -> Symbol {
        table().intern(name)
    }

    /// The interned string for this symbol.
    pub fn as_str(self) -> Arc<str> {
        table().resolve(self)
    }

    #[inline(always)]
    pub const fn index(self) -> u32 {
        self.0
    }

    #[inline(always)]
    pub const fn from_index(index: u32) -> Symbol {
        Symbol(index)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

struct SymbolTable {
    inner: RwLock<TableInner>,
}

#[derive(Default)]
struct TableInner {
    names: Vec<Arc<str>>,
    ids: FxHashMap<Arc<str>, Symbol>,
}

impl SymbolTable {
    fn intern(&self, name: &str) -> Symbol {
        if let Some(sym) = self.inner.read().ids.get(name) {
            return *sym;
        }

        let mut inner = self.inner.write();
        // Re-check under the write lock; another thread may have won.
        if let Some(sym) = inner.ids.get(name) {
            return *sym;
        }
        let arc: Arc<str> = Arc::from(name);
        let sym = Symbol(inner.names.len() as u32);
        inner.names.push(arc.clone());
        inner.ids.insert(arc, sym);
        sym
    }

    fn resolve(&self, sym: Symbol) -> Arc<str> {
        let inner = self.inner.read();
        inner
            .names
            .get(sym.0 as usize)
            .cloned()
            .unwrap_or_else(|| Arc::from("<unknown-symbol>"))
    }
}

fn table() -> &'static SymbolTable {
    static TABLE: OnceLock<SymbolTable> = OnceLock::new();
    TABLE.get_or_init(|| SymbolTable {
        inner: RwLock::new(TableInner::default()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern_is_stable() {
        let a = Symbol::intern("each");
        let b = Symbol::intern("each");
        assert_eq!(a, b);
        assert_eq!(&*a.as_str(), "each");
    }

    #[test]
    fn test_distinct_names_distinct_ids() {
        let a = Symbol::intern("foo_sym_test");
        let b = Symbol::intern("bar_sym_test");
        assert_ne!(a, b);
    }

    #[test]
    fn test_concurrent_interning() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(|| Symbol::intern("shared_name")))
            .collect();
        let ids: Vec<Symbol> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
    }
}
