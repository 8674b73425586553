//! The symbolic expression tree: a deferred value used in place of an
//! [`AbstractValue`] when the value depends on program variables. Leaves are
//! either a variable reference or an already-known abstract value; interior
//! nodes mirror the arithmetic, comparison, and logical operators the bound
//! checker builds at `Ebinop` and `Euop`.

use smallvec::SmallVec;
use crate::symbol::Symbol;
use crate::value::AbstractValue;

/// The result of interpreting one expression: a short list of symbolic
/// expressions, one per tuple component (a list because tuples are
/// first-class). Distinct from [`crate::value::Results`], which holds
/// fully-evaluated `AbstractValue`s (used for call arguments, memoized
/// results, and pattern-abstract bindings).
pub type SymResults = SmallVec<[SymExpr; 2]>;

#[derive(Debug, Clone, PartialEq)]
pub enum SymExpr {
  /// A variable reference; looked up (and transitively re-evaluated)
  /// through the value environment.
  Id(Symbol),
  /// An already-known abstract value, wrapped as a leaf.
  Value(Box<AbstractValue>),
  Plus(Box<SymExpr>, Box<SymExpr>),
  Minus(Box<SymExpr>, Box<SymExpr>),
  Mult(Box<SymExpr>, Box<SymExpr>),
  Div(Box<SymExpr>, Box<SymExpr>),
  Lt(Box<SymExpr>, Box<SymExpr>),
  Lte(Box<SymExpr>, Box<SymExpr>),
  Gt(Box<SymExpr>, Box<SymExpr>),
  Gte(Box<SymExpr>, Box<SymExpr>),
  And(Box<SymExpr>, Box<SymExpr>),
  Or(Box<SymExpr>, Box<SymExpr>),
  Not(Box<SymExpr>),
}

impl SymExpr {
  #[must_use] pub fn value(v: AbstractValue) -> Self { SymExpr::Value(Box::new(v)) }

  #[must_use] pub fn id(s: Symbol) -> Self { SymExpr::Id(s) }

  #[must_use] pub fn konst(n: i64) -> Self { Self::value(AbstractValue::Const(n)) }
}

macro_rules! bin_ctor {
  ($name:ident => $variant:ident) => {
    impl SymExpr {
      #[must_use] pub fn $name(a: SymExpr, b: SymExpr) -> Self {
        SymExpr::$variant(Box::new(a), Box::new(b))
      }
    }
  };
}
bin_ctor!(plus => Plus);
bin_ctor!(minus => Minus);
bin_ctor!(mult => Mult);
bin_ctor!(div => Div);
bin_ctor!(lt => Lt);
bin_ctor!(lte => Lte);
bin_ctor!(gt => Gt);
bin_ctor!(gte => Gte);
bin_ctor!(and => And);
bin_ctor!(or => Or);
