//! The typed AST shape shared by the naming-stage input and the normalizer's
//! stripped output, a stripped-typed AST of the same shape. Both passes work
//! over this one representation; the normalizer consumes one [`Module`] and
//! produces another, isomorphic in shape but with every subterm checked and
//! every type expression rewritten.
//!
//! Kept as a single tree rather than a lowering to a different
//! representation, since the normalizer is a structural, one-to-one
//! rewrite.

use smallvec::SmallVec;
use crate::pos::Position;
use crate::symbol::Symbol;

/// Whether a top-level definition is interpreted once in isolation
/// (`Public`) or memoized and expanded at each call site (`Private`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility { Public, Private }

/// A type expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Ty {
  pub pos: Position,
  pub kind: TyKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TyKind {
  /// A base (primitive) type such as `int` or `bool` — the sense
  /// `poly_is_not_prim`/`expected_prim_array` check for.
  Prim(Symbol),
  /// A type variable.
  Var(Symbol),
  /// `c(args...)`, a type constructor applied to argument types. Zero
  /// arguments represents a bare type-constructor reference (e.g. the
  /// observed constructor used without an argument, which is ill-formed in
  /// value position).
  Apply(Symbol, Vec<Ty>),
  /// `(domain...) -> (codomain...)`.
  Fun(Vec<Ty>, Vec<Ty>),
  /// The inferencer's "unconstrainable" marker. Appearing as a result type
  /// of an application signals non-termination.
  Any,
}

impl Ty {
  #[must_use] pub fn is_primitive(&self) -> bool { matches!(self.kind, TyKind::Prim(_)) }
}

/// A pattern, used to bind the results of evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
  Var(Symbol, Ty),
  Tuple(Vec<Pattern>),
  Wild(Ty),
}

impl Pattern {
  /// The number of result slots this pattern binds, used to validate arity
  /// when binding interpreter results.
  #[must_use] pub fn arity(&self) -> usize {
    match self {
      Pattern::Var(..) | Pattern::Wild(_) => 1,
      Pattern::Tuple(ps) => ps.len(),
    }
  }
}

/// Synthesizes the overall type of a pattern, for signature collection and
/// for `type_to_abstract`'s conversion of a public definition's declared
/// parameter types into their initial abstract values. Tuple patterns
/// synthesize a `tuple` type-constructor application over their elements'
/// types; this synthetic constructor is never primitive and never the array
/// or observed constructor, so it is inert to every check that inspects
/// real types.
#[must_use] pub fn pattern_type(p: &Pattern) -> Ty {
  match p {
    Pattern::Var(_, ty) | Pattern::Wild(ty) => ty.clone(),
    Pattern::Tuple(ps) => {
      let parts: Vec<Ty> = ps.iter().map(pattern_type).collect();
      let pos = parts.first().map_or_else(|| Position::from_raw(0), |t| t.pos);
      Ty { pos, kind: TyKind::Apply(crate::symbol::intern("tuple"), parts) }
    }
  }
}

/// Binary operators that build [`crate::symbolic::SymExpr`] nodes directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binop { Add, Sub, Mul, Div, Lt, Lte, Gt, Gte, And, Or }

/// Unary operators. `Neg` desugars to `Minus(Const 0, v)` at interpretation
/// time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Uop { Neg, Not }

/// A match arm: a pattern and the body interpreted when it matches.
#[derive(Debug, Clone, PartialEq)]
pub struct Arm {
  pub pattern: Pattern,
  pub body: Expr,
}

/// An expression. `ty` is the *list* of result types the typed-AST producer
/// inferred for this expression (plural because tuples are first-class);
/// the termination check inspects it directly, and the observability check
/// walks each element.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
  pub pos: Position,
  pub ty: Vec<Ty>,
  pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
  /// A variable reference.
  Id(Symbol),
  /// An integer literal.
  Value(i64),
  /// `tag(payload...)`, a tagged-variant constructor.
  Variant(Symbol, Vec<Expr>),
  /// `{field: expr, ...}`, a record literal.
  Record(Vec<(Symbol, Expr)>),
  /// `{base with field: expr, ...}`, a functional record update.
  With(Box<Expr>, Vec<(Symbol, Expr)>),
  /// `expr.field`.
  Field(Box<Expr>, Symbol),
  Binop(Binop, Box<Expr>, Box<Expr>),
  Uop(Uop, Box<Expr>),
  /// `let pat = e1 in e2`.
  Let(Pattern, Box<Expr>, Box<Expr>),
  /// `if c then t else f`.
  If(Box<Expr>, Box<Expr>, Box<Expr>),
  /// `match e with arms...`.
  Match(Box<Expr>, Vec<Arm>),
  /// `e1; e2`.
  Seq(Box<Expr>, Box<Expr>),
  /// `Eobs x`: an observation of a linear variable, yielding `[Id x]`
  /// without consuming it.
  Obs(Symbol),
  /// `f(args...)`: a call, dispatched by name to a primitive, a private
  /// definition, or a public/external definition.
  Apply(Symbol, Vec<Expr>),
}

/// A top-level value declaration: a name, its visibility, its polymorphic
/// type-argument list (subject to the observability check), and its type.
#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
  pub pos: Position,
  pub name: Symbol,
  pub visibility: Visibility,
  pub type_args: Vec<Ty>,
  pub ty: Ty,
}

/// A top-level function definition.
#[derive(Debug, Clone, PartialEq)]
pub struct Def {
  pub pos: Position,
  pub name: Symbol,
  pub visibility: Visibility,
  pub params: SmallVec<[Pattern; 4]>,
  pub result_tys: Vec<Ty>,
  pub body: Expr,
}

/// A module: an ordered sequence of declarations and definitions sharing one
/// module id. The normalizer preserves the module id, the order of
/// declarations, and the order of definitions.
#[derive(Debug, Clone, PartialEq)]
pub struct Module {
  pub id: Symbol,
  pub decls: Vec<Decl>,
  pub defs: Vec<Def>,
}
