//! A minimal string interner for identifiers, represented densely as
//! [`Symbol`]s: `intern`, an `Interner`, and a dense symbol map keyed by
//! `&'static str`, cut down to what this crate actually needs — stable,
//! totally ordered ids and a global interner behind a lock.

use std::sync::{Mutex, OnceLock};
use hashbrown::HashMap;

/// An interned identifier. Totally ordered by interning order, which is all
/// the lattice needs — any total order, not specifically a lexicographic
/// one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Symbol(u32);

impl Symbol {
  /// The raw index of this symbol in the global interner.
  #[must_use] pub fn into_usize(self) -> usize { self.0 as usize }
}

impl std::fmt::Display for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    with_interner(|i| write!(f, "{}", i.strings[self.0 as usize]))
  }
}

#[derive(Default)]
struct Interner {
  map: HashMap<Box<str>, Symbol>,
  strings: Vec<Box<str>>,
}

impl Interner {
  fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let sym = Symbol(u32::try_from(self.strings.len()).expect("too many interned symbols"));
    let boxed: Box<str> = s.into();
    self.strings.push(boxed.clone());
    self.map.insert(boxed, sym);
    sym
  }
}

static INTERNER: OnceLock<Mutex<Interner>> = OnceLock::new();

fn with_interner<R>(f: impl FnOnce(&mut Interner) -> R) -> R {
  let lock = INTERNER.get_or_init(|| Mutex::new(Interner::default()));
  let mut guard = lock.lock().expect("symbol interner poisoned");
  f(&mut guard)
}

/// Interns `s`, returning a stable [`Symbol`] for it.
#[must_use] pub fn intern(s: &str) -> Symbol {
  with_interner(|i| i.intern(s))
}

/// Builds a dense lookup table from symbol index to `T`, for well-known-name
/// tables such as [`crate::names::PrimFn`]. Entries not present in `pairs`
/// are `None`.
#[must_use] pub fn init_dense_symbol_map<T: Copy>(pairs: &[(Symbol, T)]) -> Box<[Option<T>]> {
  let len = pairs.iter().map(|(s, _)| s.into_usize() + 1).max().unwrap_or(0);
  let mut map = vec![None; len].into_boxed_slice();
  for &(s, v) in pairs { map[s.into_usize()] = Some(v) }
  map
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_stable_and_deduplicates() {
    let a = intern("aget");
    let b = intern("aget");
    let c = intern("aset");
    assert_eq!(a, b);
    assert_ne!(a, c);
  }

  #[test]
  fn display_round_trips() {
    let s = intern("alength");
    assert_eq!(s.to_string(), "alength");
  }
}
