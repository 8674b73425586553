//! The abstract value lattice and its join operation.

use smallvec::SmallVec;
use crate::pos::PositionSet;
use crate::symbol::Symbol;

/// Sentinel for "no known declared length". Overridable via
/// [`crate::CheckerOptions::max_int`].
pub const MAX_INT: i64 = i64::MAX;

/// A tag on a tagged-variant value (`Sum`), or a field name on a record
/// (`Rec`). Both reuse [`Symbol`] since neither needs more than a mapping
/// from tag/field id to the list of abstract values it carries.
pub type TagOrField = Symbol;

/// The short result list most expression kinds produce — a list because
/// tuples are first-class, so a single expression can yield several
/// abstract values at once.
pub type Results = SmallVec<[AbstractValue; 2]>;

/// A lattice element, over-approximating the runtime values a symbolic
/// expression may take.
#[derive(Clone, Debug, PartialEq)]
pub enum AbstractValue {
  /// Top: no information at all.
  Undef,
  /// A known 64-bit integer literal.
  Const(i64),
  /// A reference to one or more array-creation sites, with a known minimum
  /// declared length (`MAX_INT` if unknown).
  Array(PositionSet, i64),
  /// An integer partially known relative to array-creation positions.
  Int(IntInfo),
  /// A tagged variant: tag id to the abstract values it carries.
  Sum(im::HashMap<TagOrField, Results>),
  /// A record: field id to the abstract value stored there.
  Rec(im::HashMap<TagOrField, Results>),
}

/// The three pieces of an `Int` abstract value: non-negativity, the `good`
/// set (strictly below length), and the `bad` set (at most length, the
/// weaker relation).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntInfo {
  pub nonneg: bool,
  pub good: PositionSet,
  pub bad: PositionSet,
}

impl IntInfo {
  #[must_use] pub fn new(nonneg: bool, good: PositionSet, bad: PositionSet) -> Self {
    let mut info = Self { nonneg, good, bad };
    info.restore_disjointness();
    info
  }

  #[must_use] pub fn unknown() -> Self { Self::default() }

  /// `bad := bad \ good`, restoring an invariant that must hold after every
  /// refinement: unions arising from joins may temporarily violate
  /// `good ∩ bad = ∅`.
  pub fn restore_disjointness(&mut self) {
    self.bad.difference_with(&self.good);
  }
}

impl AbstractValue {
  #[must_use] pub fn int(nonneg: bool, good: PositionSet, bad: PositionSet) -> Self {
    AbstractValue::Int(IntInfo::new(nonneg, good, bad))
  }

  #[must_use] pub fn is_undef(&self) -> bool { matches!(self, AbstractValue::Undef) }

  /// `Const n` lifted to `Int(n≥0, ∅, ∅)`, the coercion `unify` applies
  /// before joining a constant with anything else.
  #[must_use] pub fn lift_const(&self) -> std::borrow::Cow<'_, AbstractValue> {
    match self {
      AbstractValue::Const(n) => std::borrow::Cow::Owned(
        AbstractValue::int(*n >= 0, PositionSet::new(), PositionSet::new())),
      v => std::borrow::Cow::Borrowed(v),
    }
  }
}

/// The lattice join. `Undef` is top and absorbs everything; `Const` values
/// are lifted to `Int` before joining with anything other than an identical
/// `Const`.
#[must_use] pub fn unify(a: &AbstractValue, b: &AbstractValue) -> AbstractValue {
  use AbstractValue::{Array, Const, Int, Rec, Sum, Undef};
  match (a, b) {
    (Undef, _) | (_, Undef) => Undef,
    (Const(x), Const(y)) if x == y => Const(*x),
    (Array(p1, n1), Array(p2, n2)) => Array(p1.union(p2), (*n1).min(*n2)),
    (Sum(m1), Sum(m2)) => Sum(unify_tagged_map(m1, m2)),
    (Rec(m1), Rec(m2)) => Rec(unify_tagged_map(m1, m2)),
    (Int(_), _) | (_, Int(_)) | (Const(_), Const(_)) => {
      let a = a.lift_const();
      let b = b.lift_const();
      match (&*a, &*b) {
        (Int(i1), Int(i2)) => AbstractValue::int(
          i1.nonneg && i2.nonneg,
          i1.good.intersection(&i2.good),
          i1.bad.intersection(&i2.bad),
        ),
        _ => Undef,
      }
    }
    _ => Undef,
  }
}

fn unify_tagged_map(
  m1: &im::HashMap<TagOrField, Results>,
  m2: &im::HashMap<TagOrField, Results>,
) -> im::HashMap<TagOrField, Results> {
  let mut out = im::HashMap::new();
  for (tag, vs1) in m1 {
    match m2.get(tag) {
      Some(vs2) => { out.insert(*tag, unify_list(vs1, vs2)); }
      None => { out.insert(*tag, vs1.clone()); }
    }
  }
  for (tag, vs2) in m2 {
    out.entry(*tag).or_insert_with(|| vs2.clone());
  }
  out
}

/// Pointwise join on result lists. Lists of differing length (an arity
/// mismatch) are an internal invariant breach — fatal, not a soft error.
#[must_use] pub fn unify_list(a: &Results, b: &Results) -> Results {
  assert_eq!(a.len(), b.len(), "tuple arity mismatch in unify_list");
  a.iter().zip(b).map(|(x, y)| unify(x, y)).collect()
}
