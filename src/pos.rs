//! Source positions and position sets.
//!
//! A [`Position`] is an opaque token identifying a source location, equipped
//! with a total order so it can be used as a set element. We represent it as
//! a dense index assigned by the AST producer as it builds the tree, which
//! lets [`PositionSet`] ride on `bit_set::BitSet` instead of a balanced tree:
//! joins in the lattice take intersections and unions of these sets
//! constantly, and a bitset makes that O(words) instead of O(n log n).

use std::fmt;
use bit_set::BitSet;

/// An opaque source position. Two positions are equal iff they name the same
/// AST node; ordering follows AST-construction order, which is a total order
/// but carries no meaning beyond identity and set membership.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position(u32);

impl Position {
  /// Constructs a position from a raw dense index. Callers (the AST
  /// producer) are responsible for handing out distinct indices per node.
  #[must_use] pub fn from_raw(idx: u32) -> Self { Position(idx) }

  #[must_use] pub fn as_usize(self) -> usize { self.0 as usize }
}

impl fmt::Debug for Position {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "@{}", self.0) }
}

/// A set of [`Position`]s, as used for `good`/`bad`/array-creation-site sets
/// in the abstract value lattice. Empty sets are the overwhelmingly common
/// case, so construction is lazy-cheap.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct PositionSet(BitSet);

impl PositionSet {
  #[must_use] pub fn new() -> Self { Self(BitSet::new()) }

  #[must_use] pub fn singleton(p: Position) -> Self {
    let mut s = BitSet::new();
    s.insert(p.as_usize());
    Self(s)
  }

  #[must_use] pub fn is_empty(&self) -> bool { self.0.is_empty() }

  #[must_use] pub fn contains(&self, p: Position) -> bool { self.0.contains(p.as_usize()) }

  pub fn insert(&mut self, p: Position) -> bool { self.0.insert(p.as_usize()) }

  pub fn union_with(&mut self, other: &Self) { self.0.union_with(&other.0) }

  pub fn intersect_with(&mut self, other: &Self) { self.0.intersect_with(&other.0) }

  /// `self := self \ other`, the disjointness-restoring step needed after
  /// joins involving both `good` and `bad`.
  pub fn difference_with(&mut self, other: &Self) { self.0.difference_with(&other.0) }

  #[must_use] pub fn union(&self, other: &Self) -> Self {
    let mut out = self.clone();
    out.union_with(other);
    out
  }

  #[must_use] pub fn intersection(&self, other: &Self) -> Self {
    let mut out = self.clone();
    out.intersect_with(other);
    out
  }

  #[must_use] pub fn difference(&self, other: &Self) -> Self {
    let mut out = self.clone();
    out.difference_with(other);
    out
  }

  /// An arbitrary element of the set, used to pick a witness position for
  /// `bound_up` — any position in the set will do.
  #[must_use] pub fn any(&self) -> Option<Position> {
    self.0.iter().next().map(|i| Position::from_raw(u32::try_from(i).expect("position index overflow")))
  }

  pub fn iter(&self) -> impl Iterator<Item = Position> + '_ {
    self.0.iter().map(|i| Position::from_raw(u32::try_from(i).expect("position index overflow")))
  }
}

impl fmt::Debug for PositionSet {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_set().entries(self.iter()).finish()
  }
}

impl FromIterator<Position> for PositionSet {
  fn from_iter<I: IntoIterator<Item = Position>>(iter: I) -> Self {
    let mut s = Self::new();
    for p in iter { s.insert(p); }
    s
  }
}
