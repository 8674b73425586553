//! The error reporter collaborator: a closed set of error kinds, each tied
//! to an offending position and, for `BoundUp`, a witness position.
//! Formatting beyond `Display` is explicitly out of scope; `thiserror`
//! gives us that `Display` for free.

use thiserror::Error;
use crate::pos::Position;

/// One of the eight error conditions the checker can raise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorKind {
  /// A primitive type was used as a polymorphic type argument.
  #[error("a primitive type cannot be used as a polymorphic type argument")]
  PolyIsNotPrim,
  /// The observed type constructor appeared bare in value position.
  #[error("the observed type cannot appear in value position")]
  ObsNotValue,
  /// The observed type constructor was applied somewhere other than the
  /// single outermost application of a function argument's type.
  #[error("the observed type constructor is not allowed here")]
  ObsNotAllowed,
  /// An application's result type contained `Tany`, which the type
  /// inferencer only inserts when the callee cannot terminate.
  #[error("this call can never return (inferred result type is unconstrainable)")]
  InfiniteLoop,
  /// `aget`/`aset`/`aswap` was applied to an array of non-primitive element
  /// type.
  #[error("array element type must be primitive for this operation")]
  ExpectedPrimArray,
  /// An index was not known to be non-negative.
  #[error("array index may be negative")]
  BoundLow,
  /// An index was known to be negative via a concrete constant.
  #[error("array index is negative")]
  BoundNeg,
  /// An index was not known to be strictly less than the array's length.
  #[error("array index may be out of bounds")]
  BoundUp,
}

/// A reported error: its kind, the offending position, and — for
/// `BoundUp` — a witness position (`bound_up(p, witness)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Report {
  pub kind: ErrorKind,
  pub pos: Position,
  pub witness: Option<Position>,
}

/// The error reporter collaborator. Analysis continues after every
/// report — best-effort diagnostics, not fail-fast.
pub trait Reporter {
  fn report(&mut self, kind: ErrorKind, pos: Position, witness: Option<Position>) {
    log::warn!("{kind} at {pos:?}{}", witness.map_or_else(String::new, |w| format!(" (witness {w:?})")));
    self.record(Report { kind, pos, witness });
  }

  /// Called by the default `report` after logging; implementors that don't
  /// need logging-free recording can just override `report` directly.
  fn record(&mut self, report: Report);
}

/// The crate's only concrete [`Reporter`]: collects every report into a
/// `Vec`, in emission order. A host tool that wants incremental reporting
/// or a nonzero exit code supplies its own.
#[derive(Debug, Default)]
pub struct CollectingReporter {
  pub reports: Vec<Report>,
}

impl CollectingReporter {
  #[must_use] pub fn new() -> Self { Self::default() }

  #[must_use] pub fn is_empty(&self) -> bool { self.reports.is_empty() }
}

impl Reporter for CollectingReporter {
  fn record(&mut self, report: Report) { self.reports.push(report); }
}
