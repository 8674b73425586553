//! The name registry collaborator: the observed and array type constructors,
//! and the primitive function names the checker must recognize by identifier
//! equality.
//!
//! The macro used for [`PrimFn`] is a cut-down table-generator: one enum, one
//! literal spelling per variant, a dense symbol-indexed lookup table built
//! once.

use std::sync::LazyLock;
use crate::symbol::{self, Symbol, init_dense_symbol_map};

macro_rules! make_prims {
  ($(#[$attr0:meta])* enum $name:ident { $($(#[$attr:meta])* $x:ident : $e:expr,)* }) => {
    $(#[$attr0])*
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum $name { $($(#[$attr])* $x),* }

    impl $name {
      /// The canonical spelling of this primitive.
      #[must_use] pub fn as_str(self) -> &'static str {
        match self { $($name::$x => $e),* }
      }

      /// Recognize a symbol as this primitive, if it is one.
      #[must_use] pub fn from_symbol(s: Symbol) -> Option<Self> {
        static MAP: LazyLock<Box<[Option<$name>]>> = LazyLock::new(|| {
          init_dense_symbol_map(&[$((symbol::intern($e), $name::$x)),*])
        });
        MAP.get(s.into_usize()).copied().flatten()
      }
    }
  }
}

make_prims! {
  /// The primitive array operations and `assert`, recognized by identifier
  /// equality at `Eapply`. Everything else that appears as an `Eapply`
  /// callee is a user-defined public or private function.
  enum PrimFn {
    /// `assert(p)` — refines the outgoing environment by `refine_true(p)`.
    Assert: "assert",
    /// `amake(init, size)` — allocates an array, yielding `Array({pos}, size)`.
    Amake: "amake",
    /// `aget(a, i)` — bounds-checked read.
    Aget: "aget",
    /// `aset(a, i, v)` — bounds-checked write.
    Aset: "aset",
    /// `aswap(a, i, v)` — bounds-checked read-modify-write.
    Aswap: "aswap",
    /// `alength(a)` — the declared length of an array value.
    Alength: "alength",
  }
}

/// Supplies the well-known identifiers a front end designates. A trait
/// rather than a fixed struct so the checker is not hardwired to one
/// name-resolution scheme.
pub trait NameRegistry {
  /// Is `s` the phantom "observed" type constructor?
  fn is_observed(&self, s: Symbol) -> bool;
  /// Is `s` the array type constructor?
  fn is_array_ctor(&self, s: Symbol) -> bool;
}

/// A [`NameRegistry`] built from two interned symbols, sufficient for any
/// front end that spells the observed/array constructors as ordinary
/// identifiers.
#[derive(Debug, Clone, Copy)]
pub struct StandardNames {
  pub observed: Symbol,
  pub array: Symbol,
}

impl StandardNames {
  /// Builds a registry from the conventional spellings `"observed"` and
  /// `"array"`.
  #[must_use] pub fn conventional() -> Self {
    Self { observed: symbol::intern("observed"), array: symbol::intern("array") }
  }
}

impl NameRegistry for StandardNames {
  fn is_observed(&self, s: Symbol) -> bool { s == self.observed }
  fn is_array_ctor(&self, s: Symbol) -> bool { s == self.array }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn recognizes_all_primitives() {
    for name in ["assert", "amake", "aget", "aset", "aswap", "alength"] {
      assert!(PrimFn::from_symbol(symbol::intern(name)).is_some(), "{name}");
    }
  }

  #[test]
  fn rejects_unrelated_identifiers() {
    assert_eq!(PrimFn::from_symbol(symbol::intern("my_func")), None);
  }

  #[test]
  fn standard_names_recognize_conventional_spellings() {
    let names = StandardNames::conventional();
    assert!(names.is_observed(symbol::intern("observed")));
    assert!(names.is_array_ctor(symbol::intern("array")));
    assert!(!names.is_observed(symbol::intern("array")));
  }
}
