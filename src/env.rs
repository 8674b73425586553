//! Environments: the value environment, the bound-check environment, and
//! the normalizer environment. Built per module; nothing survives between
//! modules.

use std::cell::RefCell;
use hashbrown::HashMap;
use crate::ast::{Def, Ty};
use crate::pos::{Position, PositionSet};
use crate::symbol::Symbol;
use crate::symbolic::SymExpr;
use crate::value::Results;

/// A mapping from identifier to symbolic expression. `im::HashMap` gives
/// `Eif`/`Ematch` a cheap fork-and-discard for branch exploration: both
/// branches are interpreted under their own refined environment, and the
/// refinements are discarded once the branch is done.
pub type ValueEnv = im::HashMap<Symbol, SymExpr>;

/// A live array-creation record: the declared length and the set of
/// positions sharing it, as produced by `amake` and consulted by
/// `lift_const_arg` at call boundaries.
#[derive(Debug, Clone)]
pub struct ArrayRecord {
  pub length: i64,
  pub positions: PositionSet,
}

/// One monomorphic function signature, as collected by the normalizer
/// before per-definition rewriting.
#[derive(Debug, Clone)]
pub struct FnSig {
  pub pos: Position,
  pub domain: Vec<Ty>,
  pub codomain: Vec<Ty>,
}

/// Function id to signature, in scope for the whole module while each
/// `decl`/`def` is rewritten.
pub type NormEnv = HashMap<Symbol, FnSig>;

/// One memoization table entry's state: `Entered` is the one-shot
/// placeholder that breaks recursion, `Settled` is the final answer.
#[derive(Debug)]
pub enum MemoState {
  Entered,
  Settled(Results),
}

/// The shared per-module memoization table, keyed by `(callee id, abstract
/// argument list)`. Abstract values embed [`PositionSet`]s and persistent
/// maps that are not naturally hashable, so this is a linear-scan `Vec`
/// behind a `RefCell` — a flat map, not a hash map. Module-local call sites
/// keep this small in practice.
#[derive(Debug, Default)]
pub struct MemoTable {
  entries: RefCell<Vec<(Symbol, Results, MemoState)>>,
}

impl MemoTable {
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Looks up a settled or in-progress entry.
  pub fn get(&self, callee: Symbol, args: &Results) -> Option<MemoState> {
    self.entries.borrow().iter()
      .find(|(c, a, _)| *c == callee && a == args)
      .map(|(_, _, s)| s.clone())
  }

  /// Inserts the `Entered` placeholder for a fresh call — storing an
  /// `Undef`-valued placeholder before the call body is interpreted is what
  /// breaks recursion.
  pub fn enter(&self, callee: Symbol, args: Results) {
    self.entries.borrow_mut().push((callee, args, MemoState::Entered));
  }

  /// Overwrites the placeholder with the final result (→ `Settled`).
  pub fn settle(&self, callee: Symbol, args: &Results, result: Results) {
    let mut entries = self.entries.borrow_mut();
    let slot = entries.iter_mut().find(|(c, a, _)| *c == callee && a == args)
      .expect("settle called without a matching enter");
    slot.2 = MemoState::Settled(result);
  }
}

impl Clone for MemoState {
  // manual to avoid requiring `Results: Copy`
  fn clone(&self) -> Self {
    match self {
      MemoState::Entered => MemoState::Entered,
      MemoState::Settled(r) => MemoState::Settled(r.clone()),
    }
  }
}

/// The four pieces of the bound-check environment. `'m` borrows from the
/// module being checked: private definitions are looked up by reference,
/// never cloned.
pub struct BoundCheckEnv<'m> {
  pub values: ValueEnv,
  pub privates: &'m HashMap<Symbol, &'m Def>,
  pub arrays: Vec<ArrayRecord>,
  pub memo: &'m MemoTable,
}

impl<'m> BoundCheckEnv<'m> {
  #[must_use] pub fn new(privates: &'m HashMap<Symbol, &'m Def>, memo: &'m MemoTable) -> Self {
    Self { values: ValueEnv::default(), privates, arrays: Vec::new(), memo }
  }

  /// Forks the environment for independent branch exploration (`Eif`,
  /// `Ematch`), cheap thanks to `im::HashMap`'s structural sharing.
  #[must_use] pub fn fork(&self) -> Self {
    Self { values: self.values.clone(), privates: self.privates, arrays: self.arrays.clone(), memo: self.memo }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::value::AbstractValue;

  #[test]
  fn memo_table_round_trip() {
    let table = MemoTable::new();
    let f = crate::symbol::intern("f");
    let args: Results = [AbstractValue::Const(1)].into_iter().collect();
    assert!(matches!(table.get(f, &args), None));
    table.enter(f, args.clone());
    assert!(matches!(table.get(f, &args), Some(MemoState::Entered)));
    let result: Results = [AbstractValue::Const(2)].into_iter().collect();
    table.settle(f, &args, result.clone());
    match table.get(f, &args) {
      Some(MemoState::Settled(r)) => assert_eq!(r, result),
      other => panic!("expected Settled, got {other:?}"),
    }
  }

  #[test]
  fn fork_does_not_affect_parent() {
    let privates = HashMap::new();
    let memo = MemoTable::new();
    let mut env = BoundCheckEnv::new(&privates, &memo);
    env.values.insert(crate::symbol::intern("x"), SymExpr::konst(1));
    let mut child = env.fork();
    child.values.insert(crate::symbol::intern("y"), SymExpr::konst(2));
    assert!(env.values.get(&crate::symbol::intern("y")).is_none());
  }
}
