//! The bound checker: a whole-program, memoized, recursive abstract
//! interpreter over the stripped AST. Walks every public
//! definition, expanding private calls inline with one-shot memoized
//! fixpoints, and raises a bound error at every `aget`/`aset`/`aswap`
//! whose index is not provably within the array's declared length.

use hashbrown::HashMap;
use crate::ast::{Arm, Binop, Def, Expr, ExprKind, Module, Pattern, Ty, TyKind, Uop, Visibility, pattern_type};
use crate::env::{ArrayRecord, BoundCheckEnv, MemoState, MemoTable, ValueEnv};
use crate::error::{ErrorKind, Reporter};
use crate::names::{NameRegistry, PrimFn};
use crate::pos::{Position, PositionSet};
use crate::symbol::Symbol;
use crate::symbolic::{SymExpr, SymResults};
use crate::value::{self, AbstractValue, IntInfo, Results};
use crate::CheckerOptions;

/// Bundles the two pieces of read-only context every interpreter function
/// needs, so they don't have to be threaded as two separate generic
/// parameters everywhere.
struct Ctx<'a, N> {
  names: &'a N,
  opts: &'a CheckerOptions,
}

// Both fields are plain references, so this is `Copy` regardless of whether
// `N` itself is — written by hand because `#[derive(Copy)]` would add a
// spurious `N: Copy` bound that `N: NameRegistry` callers don't satisfy.
impl<'a, N> Clone for Ctx<'a, N> {
  fn clone(&self) -> Self { *self }
}
impl<'a, N> Copy for Ctx<'a, N> {}

/// The driver: partitions a module's definitions
/// into private (memoized, expanded at call sites) and public (interpreted
/// once, directly), then checks every public definition with a fresh
/// memoization table shared for the whole module.
pub fn check_module(
  m: &Module,
  names: &impl NameRegistry,
  reporter: &mut impl Reporter,
  opts: &CheckerOptions,
) {
  log::debug!("bound-checking module {:?}", m.id);
  let mut privates: HashMap<Symbol, &Def> = HashMap::new();
  let mut publics: HashMap<Symbol, &Def> = HashMap::new();
  for def in &m.defs {
    match def.visibility {
      Visibility::Private => { privates.insert(def.name, def); }
      Visibility::Public => { publics.insert(def.name, def); }
    }
  }
  let memo = MemoTable::new();
  let ctx = Ctx { names, opts };
  // Walk definitions in source order, not map iteration order: the memo
  // table is shared across public entry points, so the order they're
  // checked in can change which call sites land a cache hit and,
  // consequently, the order errors are emitted in.
  for def in &m.defs {
    if def.visibility == Visibility::Public {
      def_public(def, &privates, &publics, &memo, ctx, reporter);
    }
  }
}

/// Converts a declared parameter type to its initial abstract value: an
/// observed-wrapped type strips to its underlying type's abstraction; an
/// array type becomes
/// `Array({p}, MAX_INT)` with unknown length; everything else is `Undef`.
fn type_to_abstract(ty: &Ty, names: &impl NameRegistry) -> AbstractValue {
  if let TyKind::Apply(ctor, args) = &ty.kind {
    if names.is_observed(*ctor) && args.len() == 1 {
      return type_to_abstract(&args[0], names);
    }
    if names.is_array_ctor(*ctor) && args.len() == 1 {
      return AbstractValue::Array(PositionSet::singleton(ty.pos), value::MAX_INT);
    }
  }
  AbstractValue::Undef
}

/// Peels `observed<T>` wrappers down to `T`, recursively. Used both by
/// `type_to_abstract` (inline above, for the single-layer case) and by the
/// `aget`/`aset`/`aswap` element-type check, which must see through an
/// observed array reference to find the array constructor underneath.
fn peel_observed<'t>(ty: &'t Ty, names: &impl NameRegistry) -> &'t Ty {
  if let TyKind::Apply(ctor, args) = &ty.kind {
    if names.is_observed(*ctor) && args.len() == 1 {
      return peel_observed(&args[0], names);
    }
  }
  ty
}

fn array_elem_ty<'t>(ty: &'t Ty, names: &impl NameRegistry) -> Option<&'t Ty> {
  let ty = peel_observed(ty, names);
  if let TyKind::Apply(ctor, args) = &ty.kind {
    if names.is_array_ctor(*ctor) && args.len() == 1 {
      return Some(&args[0]);
    }
  }
  None
}

/// Binds a pattern to a single abstract value, for public-definition entry
/// and private-call parameter binding alike. Tuple
/// patterns at this level always bind their components to `Undef`: the
/// lattice has no tuple constructor, so a tuple-typed parameter carries no
/// information beyond what `type_to_abstract` can assign its own
/// (non-tuple) shapes.
fn bind_pattern_abstract(p: &Pattern, v: &AbstractValue, env: &mut BoundCheckEnv) {
  match p {
    Pattern::Var(s, _) => { env.values.insert(*s, SymExpr::value(v.clone())); }
    Pattern::Wild(_) => {}
    Pattern::Tuple(ps) => for p in ps { bind_pattern_abstract(p, &AbstractValue::Undef, env) },
  }
}

/// Binds a pattern to the symbolic results of interpreting its bound
/// expression (`Elet`, match arms). A tuple-arity mismatch is an internal
/// invariant breach, treated as fatal.
fn bind_pattern_sym(p: &Pattern, results: &SymResults, env: &mut BoundCheckEnv) {
  match p {
    Pattern::Var(s, _) => {
      assert_eq!(results.len(), 1, "tuple arity mismatch binding {s:?}");
      env.values.insert(*s, results[0].clone());
    }
    Pattern::Wild(_) => assert_eq!(results.len(), 1, "tuple arity mismatch binding wildcard"),
    Pattern::Tuple(ps) => {
      assert_eq!(ps.len(), results.len(), "tuple arity mismatch");
      for (p, r) in ps.iter().zip(results) {
        bind_pattern_sym(p, &smallvec::smallvec![r.clone()], env);
      }
    }
  }
}

/// Public definition entry: binds parameters from their declared types,
/// interprets the body purely for its bound-check side effects.
fn def_public<N: NameRegistry, R: Reporter>(
  def: &Def,
  privates: &HashMap<Symbol, &Def>,
  publics: &HashMap<Symbol, &Def>,
  memo: &MemoTable,
  ctx: Ctx<'_, N>,
  reporter: &mut R,
) {
  log::debug!("checking public def {:?}", def.name);
  let mut env = BoundCheckEnv::new(privates, memo);
  for p in &def.params {
    let ty = pattern_type(p);
    let v = type_to_abstract(&ty, ctx.names);
    bind_pattern_abstract(p, &v, &mut env);
  }
  interpret_expr(&def.body, &mut env, publics, ctx, reporter);
}

/// Private definition entry, invoked from `Eapply`: binds the
/// caller-supplied abstract arguments to the pattern, interprets the
/// body, and evaluates its symbolic results down to concrete abstract
/// values — "returned as `Value v` leaves" to the caller.
fn def_private<N: NameRegistry, R: Reporter>(
  def: &Def,
  args: &Results,
  privates: &HashMap<Symbol, &Def>,
  publics: &HashMap<Symbol, &Def>,
  memo: &MemoTable,
  ctx: Ctx<'_, N>,
  reporter: &mut R,
) -> Results {
  let mut env = BoundCheckEnv::new(privates, memo);
  assert_eq!(def.params.len(), args.len(), "private call arity mismatch for {:?}", def.name);
  for (p, v) in def.params.iter().zip(args) {
    bind_pattern_abstract(p, v, &mut env);
  }
  let results = interpret_expr(&def.body, &mut env, publics, ctx, reporter);
  results.iter().map(|s| eval(&env, s)).collect()
}

/// Runs a private definition exactly as a public one, forcing its own bound
/// checks even though it is never called via `Eapply` — the `Eid`
/// non-calling, value-position reference case.
fn force_private_checks<N: NameRegistry, R: Reporter>(
  def: &Def,
  privates: &HashMap<Symbol, &Def>,
  publics: &HashMap<Symbol, &Def>,
  memo: &MemoTable,
  ctx: Ctx<'_, N>,
  reporter: &mut R,
) {
  let mut env = BoundCheckEnv::new(privates, memo);
  for p in &def.params {
    let ty = pattern_type(p);
    let v = type_to_abstract(&ty, ctx.names);
    bind_pattern_abstract(p, &v, &mut env);
  }
  interpret_expr(&def.body, &mut env, publics, ctx, reporter);
}

/// Interprets an expression in the given environment, returning the short
/// list of symbolic results tuples require — one case per `ExprKind`.
fn interpret_expr<N: NameRegistry, R: Reporter>(
  e: &Expr,
  env: &mut BoundCheckEnv<'_>,
  publics: &HashMap<Symbol, &Def>,
  ctx: Ctx<'_, N>,
  reporter: &mut R,
) -> SymResults {
  match &e.kind {
    ExprKind::Id(x) => {
      if let Some(&def) = env.privates.get(x) {
        force_private_checks(def, env.privates, publics, env.memo, ctx, reporter);
      }
      smallvec::smallvec![SymExpr::id(*x)]
    }
    ExprKind::Value(n) => smallvec::smallvec![SymExpr::konst(*n)],
    ExprKind::Obs(x) => smallvec::smallvec![SymExpr::id(*x)],

    ExprKind::Variant(tag, args) => {
      let mut results = im::HashMap::new();
      let vs: Results = args.iter()
        .flat_map(|a| interpret_expr(a, env, publics, ctx, reporter))
        .map(|s| eval(env, &s))
        .collect();
      results.insert(*tag, vs);
      smallvec::smallvec![SymExpr::value(AbstractValue::Sum(results))]
    }
    ExprKind::Record(fields) => {
      let mut rec = im::HashMap::new();
      for (name, value) in fields {
        let vs: Results = interpret_expr(value, env, publics, ctx, reporter)
          .iter().map(|s| eval(env, s)).collect();
        rec.insert(*name, vs);
      }
      smallvec::smallvec![SymExpr::value(AbstractValue::Rec(rec))]
    }
    ExprKind::With(base, updates) => {
      let base_v = interpret_expr(base, env, publics, ctx, reporter);
      let base_v = base_v.iter().map(|s| eval(env, s)).next().unwrap_or(AbstractValue::Undef);
      let mut rec = match base_v {
        AbstractValue::Rec(m) => m,
        _ => im::HashMap::new(),
      };
      for (name, value) in updates {
        let vs: Results = interpret_expr(value, env, publics, ctx, reporter)
          .iter().map(|s| eval(env, s)).collect();
        rec.insert(*name, vs);
      }
      smallvec::smallvec![SymExpr::value(AbstractValue::Rec(rec))]
    }
    ExprKind::Field(base, field) => {
      let base_v = interpret_expr(base, env, publics, ctx, reporter);
      let base_v = base_v.iter().map(|s| eval(env, s)).next().unwrap_or(AbstractValue::Undef);
      match base_v {
        AbstractValue::Rec(m) | AbstractValue::Sum(m) => match m.get(field) {
          Some(vs) => vs.iter().cloned().map(SymExpr::value).collect(),
          None => smallvec::smallvec![SymExpr::value(AbstractValue::Undef)],
        },
        _ => smallvec::smallvec![SymExpr::value(AbstractValue::Undef)],
      }
    }

    ExprKind::Binop(op, a, b) => {
      let a = single(interpret_expr(a, env, publics, ctx, reporter));
      let b = single(interpret_expr(b, env, publics, ctx, reporter));
      smallvec::smallvec![match op {
        Binop::Add => SymExpr::plus(a, b),
        Binop::Sub => SymExpr::minus(a, b),
        Binop::Mul => SymExpr::mult(a, b),
        Binop::Div => SymExpr::div(a, b),
        Binop::Lt => SymExpr::lt(a, b),
        Binop::Lte => SymExpr::lte(a, b),
        Binop::Gt => SymExpr::gt(a, b),
        Binop::Gte => SymExpr::gte(a, b),
        Binop::And => SymExpr::and(a, b),
        Binop::Or => SymExpr::or(a, b),
      }]
    }
    ExprKind::Uop(op, a) => {
      let a = single(interpret_expr(a, env, publics, ctx, reporter));
      smallvec::smallvec![match op {
        Uop::Neg => SymExpr::minus(SymExpr::konst(0), a),
        Uop::Not => SymExpr::Not(Box::new(a)),
      }]
    }

    ExprKind::Let(pat, bound, body) => {
      let results = interpret_expr(bound, env, publics, ctx, reporter);
      bind_pattern_sym(pat, &results, env);
      interpret_expr(body, env, publics, ctx, reporter)
    }

    ExprKind::If(c, t, f) => {
      let cond = single(interpret_expr(c, env, publics, ctx, reporter));
      let mut true_env = env.fork();
      refine_true(&cond, &mut true_env.values);
      let true_results = interpret_expr(t, &mut true_env, publics, ctx, reporter);
      let mut false_env = env.fork();
      refine_false(&cond, &mut false_env.values);
      let false_results = interpret_expr(f, &mut false_env, publics, ctx, reporter);
      let tv: Results = true_results.iter().map(|s| eval(&true_env, s)).collect();
      let fv: Results = false_results.iter().map(|s| eval(&false_env, s)).collect();
      value::unify_list(&tv, &fv).into_iter().map(SymExpr::value).collect()
    }

    ExprKind::Match(scrutinee, arms) => {
      let scrut_results = interpret_expr(scrutinee, env, publics, ctx, reporter);
      let mut acc: Option<Results> = None;
      for Arm { pattern, body } in arms {
        let mut arm_env = env.fork();
        bind_pattern_sym(pattern, &scrut_results, &mut arm_env);
        let body_results = interpret_expr(body, &mut arm_env, publics, ctx, reporter);
        let bv: Results = body_results.iter().map(|s| eval(&arm_env, s)).collect();
        acc = Some(match acc {
          None => bv,
          Some(prev) => value::unify_list(&prev, &bv),
        });
      }
      acc.unwrap_or_default().into_iter().map(SymExpr::value).collect()
    }

    ExprKind::Seq(a, b) => {
      interpret_expr(a, env, publics, ctx, reporter);
      interpret_expr(b, env, publics, ctx, reporter)
    }

    ExprKind::Apply(f, args) => interpret_apply(e.pos, *f, args, env, publics, ctx, reporter),
  }
}

/// Takes the sole result of an interpretation known (by the typed-AST
/// producer's own contract) to be single-valued — binary operator operands,
/// primitive-call arguments. Defensive fallback to `Undef` on an empty list
/// rather than a panic, since malformed input here is a producer bug, not
/// an internal invariant breach.
fn single(mut r: SymResults) -> SymExpr {
  r.drain(..).next().unwrap_or_else(|| SymExpr::value(AbstractValue::Undef))
}

/// `Eapply` dispatch: primitive array operations and `assert` by name,
/// otherwise a memoized private call or an opaque public/external call.
fn interpret_apply<N: NameRegistry, R: Reporter>(
  pos: Position,
  f: Symbol,
  args: &[Expr],
  env: &mut BoundCheckEnv<'_>,
  publics: &HashMap<Symbol, &Def>,
  ctx: Ctx<'_, N>,
  reporter: &mut R,
) -> SymResults {
  if let Some(prim) = PrimFn::from_symbol(f) {
    return match prim {
      PrimFn::Assert => {
        let cond = single(interpret_expr(&args[0], env, publics, ctx, reporter));
        refine_true(&cond, &mut env.values);
        smallvec::smallvec![SymExpr::value(AbstractValue::Undef)]
      }
      PrimFn::Amake => interpret_amake(pos, args, env, publics, ctx, reporter),
      PrimFn::Alength => {
        let arr = eval_expr(&args[0], env, publics, ctx, reporter);
        let v = match arr {
          AbstractValue::Array(positions, _) => AbstractValue::int(true, PositionSet::new(), positions),
          _ => AbstractValue::Undef,
        };
        smallvec::smallvec![SymExpr::value(v)]
      }
      PrimFn::Aget => {
        check_elem_primitive(pos, &args[0], ctx, reporter);
        let arr = eval_expr(&args[0], env, publics, ctx, reporter);
        let idx = eval_expr(&args[1], env, publics, ctx, reporter);
        bound_check(&arr, &idx, pos, reporter);
        smallvec::smallvec![SymExpr::value(AbstractValue::Undef)]
      }
      PrimFn::Aset => {
        let arr = eval_expr(&args[0], env, publics, ctx, reporter);
        let idx = eval_expr(&args[1], env, publics, ctx, reporter);
        bound_check(&arr, &idx, pos, reporter);
        smallvec::smallvec![SymExpr::value(AbstractValue::Undef)]
      }
      PrimFn::Aswap => {
        let arr = eval_expr(&args[0], env, publics, ctx, reporter);
        let idx = eval_expr(&args[1], env, publics, ctx, reporter);
        bound_check(&arr, &idx, pos, reporter);
        smallvec::smallvec![
          SymExpr::value(arr),
          SymExpr::value(AbstractValue::Undef),
        ]
      }
    };
  }

  if let Some(&def) = env.privates.get(&f) {
    let arg_vals: Results = args.iter()
      .map(|a| lift_const_arg(eval_expr(a, env, publics, ctx, reporter), &env.arrays))
      .collect();
    return call_private(def, arg_vals, env.privates, publics, env.memo, ctx, reporter)
      .into_iter().map(SymExpr::value).collect();
  }

  // Public/external call: interpret args for their own effects, yield Undef
  // placeholders matching the callee's known result arity if recorded.
  for a in args { interpret_expr(a, env, publics, ctx, reporter); }
  let arity = publics.get(&f).map_or(1, |d| d.result_tys.len().max(1));
  (0..arity).map(|_| SymExpr::value(AbstractValue::Undef)).collect()
}

fn check_elem_primitive<N: NameRegistry, R: Reporter>(
  pos: Position,
  arr_expr: &Expr,
  ctx: Ctx<'_, N>,
  reporter: &mut R,
) {
  if let Some(ty) = arr_expr.ty.first() {
    if let Some(elem) = array_elem_ty(ty, ctx.names) {
      if !elem.is_primitive() {
        reporter.report(ErrorKind::ExpectedPrimArray, pos, None);
      }
    }
  }
}

fn eval_expr<N: NameRegistry, R: Reporter>(
  e: &Expr,
  env: &mut BoundCheckEnv<'_>,
  publics: &HashMap<Symbol, &Def>,
  ctx: Ctx<'_, N>,
  reporter: &mut R,
) -> AbstractValue {
  let sym = single(interpret_expr(e, env, publics, ctx, reporter));
  eval(env, &sym)
}

/// `amake(init, size)`: allocates a fresh array-creation position, records
/// its declared length, and — when the
/// size expression is a bare variable — widens that variable's own `Int`
/// binding so later uses of it as an index against *other* arrays still see
/// this array's position in their `bad` set.
fn interpret_amake<N: NameRegistry, R: Reporter>(
  pos: Position,
  args: &[Expr],
  env: &mut BoundCheckEnv<'_>,
  publics: &HashMap<Symbol, &Def>,
  ctx: Ctx<'_, N>,
  reporter: &mut R,
) -> SymResults {
  let size_sym = single(interpret_expr(&args[1], env, publics, ctx, reporter));
  let size_val = eval(env, &size_sym);
  let length = match size_val {
    AbstractValue::Const(n) => n,
    _ => ctx.opts.max_int,
  };
  interpret_expr(&args[0], env, publics, ctx, reporter);
  env.arrays.push(ArrayRecord { length, positions: PositionSet::singleton(pos) });
  if let SymExpr::Id(y) = size_sym {
    let prior = env.values.get(&y).map(|s| eval(env, s)).unwrap_or(AbstractValue::Undef);
    let widened = match prior {
      AbstractValue::Int(mut info) => {
        info.bad.insert(pos);
        info.restore_disjointness();
        AbstractValue::Int(info)
      }
      AbstractValue::Undef => AbstractValue::int(false, PositionSet::new(), PositionSet::singleton(pos)),
      other => other,
    };
    env.values.insert(y, SymExpr::value(widened));
  }
  smallvec::smallvec![SymExpr::value(AbstractValue::Array(PositionSet::singleton(pos), length))]
}

/// The memoized private-call protocol: a fresh `(callee, args)` pair
/// enters the table as `Entered`
/// (breaking recursive self-calls with `Undef`), runs the body once, then
/// settles the table with the real result.
fn call_private<N: NameRegistry, R: Reporter>(
  def: &Def,
  args: Results,
  privates: &HashMap<Symbol, &Def>,
  publics: &HashMap<Symbol, &Def>,
  memo: &MemoTable,
  ctx: Ctx<'_, N>,
  reporter: &mut R,
) -> Results {
  match memo.get(def.name, &args) {
    Some(MemoState::Settled(r)) => return r,
    Some(MemoState::Entered) => {
      return (0..def.result_tys.len().max(1)).map(|_| AbstractValue::Undef).collect();
    }
    None => {}
  }
  memo.enter(def.name, args.clone());
  let result = def_private(def, &args, privates, publics, memo, ctx, reporter);
  memo.settle(def.name, &args, result.clone());
  result
}

/// The bound check itself: a three-way match on the array and index
/// abstract values.
fn bound_check(arr: &AbstractValue, idx: &AbstractValue, pos: Position, reporter: &mut impl Reporter) {
  match (arr, idx) {
    (AbstractValue::Array(_, length), AbstractValue::Const(n)) => {
      if *n < 0 {
        reporter.report(ErrorKind::BoundNeg, pos, None);
      } else if *n >= *length {
        reporter.report(ErrorKind::BoundUp, pos, None);
      }
    }
    (AbstractValue::Array(positions, _), AbstractValue::Int(info)) => {
      if !info.nonneg {
        reporter.report(ErrorKind::BoundLow, pos, None);
      } else {
        let missing = positions.difference(&info.good);
        if !missing.is_empty() {
          reporter.report(ErrorKind::BoundUp, pos, missing.any());
        }
      }
    }
    _ => reporter.report(ErrorKind::BoundLow, pos, None),
  }
}

/// Reduces a symbolic expression to a concrete abstract value. Comparison
/// and logical nodes always reduce to `Undef` —
/// they act on the environment only through [`refine_true`]/[`refine_false`].
fn eval(env: &BoundCheckEnv<'_>, sym: &SymExpr) -> AbstractValue {
  eval_guarded(env, sym, 0)
}

const MAX_ID_CHASE: u32 = 64;

fn eval_guarded(env: &BoundCheckEnv<'_>, sym: &SymExpr, depth: u32) -> AbstractValue {
  match sym {
    SymExpr::Id(x) => {
      if depth >= MAX_ID_CHASE { return AbstractValue::Undef }
      match env.values.get(x) {
        Some(next) => eval_guarded(env, next, depth + 1),
        None => AbstractValue::Undef,
      }
    }
    SymExpr::Value(v) => (**v).clone(),

    // Div(Plus(x, y), Const n) with n >= 2: a special case for
    // averaging-style midpoint computations. Detected on syntactic shape
    // before generic evaluation, since the rule only applies to this exact
    // tree shape.
    SymExpr::Div(num, den) => {
      if let (SymExpr::Plus(x, y), SymExpr::Value(n)) = (num.as_ref(), den.as_ref()) {
        if let AbstractValue::Const(n) = **n {
          if n >= 2 {
            let xv = eval_guarded(env, x, depth + 1);
            let yv = eval_guarded(env, y, depth + 1);
            if let (AbstractValue::Int(xi), AbstractValue::Int(yi)) = (&xv.lift_const().into_owned(), &yv.lift_const().into_owned()) {
              if xi.nonneg && yi.nonneg {
                return AbstractValue::int(true, xi.good.intersection(&yi.good), PositionSet::new());
              }
            }
          }
        }
      }
      let a = eval_guarded(env, num, depth + 1);
      let b = eval_guarded(env, den, depth + 1);
      match (a, b) {
        (AbstractValue::Const(x), AbstractValue::Const(y)) if y != 0 => AbstractValue::Const(x / y),
        // `Int(b, g, b') / Const n` with `n > 0`.
        (AbstractValue::Int(info), AbstractValue::Const(n)) if n > 0 => {
          let mut merged = info.good;
          merged.union_with(&info.bad);
          AbstractValue::int(info.nonneg, merged, PositionSet::new())
        }
        _ => AbstractValue::Undef,
      }
    }

    SymExpr::Plus(a, b) => {
      let av = eval_guarded(env, a, depth + 1);
      let bv = eval_guarded(env, b, depth + 1);
      eval_plus(av, bv)
    }
    // Minus is only defined when the right operand is a known constant:
    // `a - Const n` reduces to `Plus(a, Const(-n))`, reusing `Plus`'s own
    // `Const`/`Int` cases.
    SymExpr::Minus(a, b) => {
      let bv = eval_guarded(env, b, depth + 1);
      match bv {
        AbstractValue::Const(n) => match n.checked_neg() {
          Some(neg_n) => eval_plus(eval_guarded(env, a, depth + 1), AbstractValue::Const(neg_n)),
          None => AbstractValue::int(false, PositionSet::new(), PositionSet::new()),
        },
        _ => AbstractValue::Undef,
      }
    }
    SymExpr::Mult(a, b) => {
      let av = eval_guarded(env, a, depth + 1);
      let bv = eval_guarded(env, b, depth + 1);
      eval_mult(av, bv)
    }

    SymExpr::Lt(..) | SymExpr::Lte(..) | SymExpr::Gt(..) | SymExpr::Gte(..)
    | SymExpr::And(..) | SymExpr::Or(..) | SymExpr::Not(..) => AbstractValue::Undef,
  }
}

/// Constants fold; adding a non-negative constant to `Int(b, g, b')` can
/// only push a value further from any array's length, so the result keeps
/// `b ∧ n≥0` but drops the positional refinement entirely (both sets clear
/// to empty — a value known to equal `p`'s length minus one is no longer
/// known to be anything in particular once shifted). A negative constant
/// collapses `g`/`b'` into the weaker `bad` side instead, since a value
/// that was strictly below a length may now only be at most that length.
/// `Int + Int` also loses positional refinement entirely, joining on
/// non-negativity alone.
fn eval_plus(a: AbstractValue, b: AbstractValue) -> AbstractValue {
  use AbstractValue::{Const, Int};
  match (a, b) {
    (Const(x), Const(y)) => match x.checked_add(y) {
      Some(r) => Const(r),
      None => AbstractValue::int(false, PositionSet::new(), PositionSet::new()),
    },
    (Const(n), Int(info)) | (Int(info), Const(n)) => {
      let nonneg = info.nonneg && n >= 0;
      if n >= 0 {
        AbstractValue::int(nonneg, PositionSet::new(), PositionSet::new())
      } else {
        let mut merged = info.good;
        merged.union_with(&info.bad);
        AbstractValue::int(nonneg, PositionSet::new(), merged)
      }
    }
    (Int(i1), Int(i2)) => AbstractValue::int(i1.nonneg && i2.nonneg, PositionSet::new(), PositionSet::new()),
    _ => AbstractValue::Undef,
  }
}

/// Constants fold; `Const n · Int(b, _, _)` yields `Int(b ∧ n≥0, ∅, ∅)`
/// (positional refinement never survives a multiply); any other shape is
/// `Undef`.
fn eval_mult(a: AbstractValue, b: AbstractValue) -> AbstractValue {
  use AbstractValue::{Const, Int};
  match (a, b) {
    (Const(x), Const(y)) => match x.checked_mul(y) {
      Some(r) => Const(r),
      None => AbstractValue::int(false, PositionSet::new(), PositionSet::new()),
    },
    (Const(n), Int(info)) | (Int(info), Const(n)) => {
      AbstractValue::int(info.nonneg && n >= 0, PositionSet::new(), PositionSet::new())
    }
    _ => AbstractValue::Undef,
  }
}

/// Narrows `env` along the "then" branch of a conditional on `cond`.
/// `Lte`/`Gte` each carry two actions — their
/// own primary rule plus a symmetric one on the other side of the relation
/// (`Lte(x, y)`'s primary merges `y` into `x`; its symmetric raises `y`'s
/// `nonneg` from `x`, i.e. `Gte(y, x)`'s primary — and vice versa for
/// `Gte`). `Lt` and `Gt` are each single-direction, with no symmetric part.
fn refine_true(cond: &SymExpr, env: &mut ValueEnv) {
  match cond {
    SymExpr::And(a, b) => { refine_true(a, env); refine_true(b, env); }
    SymExpr::Or(a, b) => {
      // Neither disjunct alone is guaranteed; nothing sound to narrow.
      let _ = (a, b);
    }
    SymExpr::Not(a) => refine_false(a, env),
    SymExpr::Lte(x, y) => { refine_lte_merge(x, y, env); refine_gte_raise(y, x, env); }
    SymExpr::Gte(x, y) => { refine_gte_raise(x, y, env); refine_lte_merge(y, x, env); }
    SymExpr::Lt(x, y) => refine_lt_merge(x, y, env),
    SymExpr::Gt(x, y) => refine_gt_raise(x, y, env),
    _ => {}
  }
}

/// Narrows `env` along the "else" branch: the logical negation of `cond`.
/// `And`/`Or` distribute via De Morgan; each comparison is rebuilt as its
/// negation (`Lte(x,y)` ⇒ `Gt(x,y)`, `Gte(x,y)` ⇒ `Lt(x,y)`, `Lt(x,y)` ⇒
/// `Gte(x,y)`, `Gt(x,y)` ⇒ `Lte(x,y)`) and handed to [`refine_true`] — each
/// comparison swaps to its negation before delegating, reusing
/// `refine_true`'s primary+symmetric logic for `Lte`/`Gte` exactly rather
/// than re-deriving it.
fn refine_false(cond: &SymExpr, env: &mut ValueEnv) {
  match cond {
    SymExpr::And(a, b) => {
      let _ = (a, b);
    }
    SymExpr::Or(a, b) => { refine_false(a, env); refine_false(b, env); }
    SymExpr::Not(a) => refine_true(a, env),
    SymExpr::Lte(x, y) => refine_true(&SymExpr::gt((**x).clone(), (**y).clone()), env),
    SymExpr::Gte(x, y) => refine_true(&SymExpr::lt((**x).clone(), (**y).clone()), env),
    SymExpr::Lt(x, y) => refine_true(&SymExpr::gte((**x).clone(), (**y).clone()), env),
    SymExpr::Gt(x, y) => refine_true(&SymExpr::lte((**x).clone(), (**y).clone()), env),
    _ => {}
  }
}

/// `Lte(x, y)`'s primary action: merge `y`'s `good` and `bad` sets into
/// `x`'s, then restore disjointness.
fn refine_lte_merge(x: &SymExpr, y: &SymExpr, env: &mut ValueEnv) {
  if let SymExpr::Id(xid) = x {
    if let AbstractValue::Int(yi) = BoundCheckEnvView(env).eval(y).lift_const().into_owned() {
      update_int(env, *xid, |info| {
        info.good.union_with(&yi.good);
        info.bad.union_with(&yi.bad);
      });
    }
  }
}

/// `Gte(x, y)`'s primary action: raise `x`'s `nonneg` if `y` evaluates to a
/// non-negative `Const` or `Int(true, _, _)`.
fn refine_gte_raise(x: &SymExpr, y: &SymExpr, env: &mut ValueEnv) {
  if let SymExpr::Id(xid) = x {
    if let AbstractValue::Int(yi) = BoundCheckEnvView(env).eval(y).lift_const().into_owned() {
      if yi.nonneg {
        update_int(env, *xid, |info| info.nonneg = true);
      }
    }
  }
}

/// `Lt(x, y)`: merge `y`'s `good ∪ bad` into `x`'s `good`, clear `x`'s
/// `bad`.
fn refine_lt_merge(x: &SymExpr, y: &SymExpr, env: &mut ValueEnv) {
  if let SymExpr::Id(xid) = x {
    if let AbstractValue::Int(yi) = BoundCheckEnvView(env).eval(y).lift_const().into_owned() {
      let mut merged = yi.good;
      merged.union_with(&yi.bad);
      update_int(env, *xid, |info| {
        info.good.union_with(&merged);
        info.bad = PositionSet::new();
      });
    }
  }
}

/// `Gt(x, y)`: raise `x`'s `nonneg` if `y ≥ -1`. `y` is known `≥ -1` when it
/// is a literal `Const n` with `n ≥ -1`,
/// or an `Int` already known `nonneg` (which trivially implies `≥ 0 ≥ -1`).
fn refine_gt_raise(x: &SymExpr, y: &SymExpr, env: &mut ValueEnv) {
  if let SymExpr::Id(xid) = x {
    let yv = BoundCheckEnvView(env).eval(y);
    let raise = match &yv {
      AbstractValue::Const(n) => *n >= -1,
      AbstractValue::Int(info) => info.nonneg,
      _ => false,
    };
    if raise {
      update_int(env, *xid, |info| info.nonneg = true);
    }
  }
}

/// A read-only view used only to `eval` without needing a full
/// `BoundCheckEnv` (refinement never consults `privates`/`arrays`/`memo`).
struct BoundCheckEnvView<'a>(&'a ValueEnv);

impl BoundCheckEnvView<'_> {
  fn eval(&self, sym: &SymExpr) -> AbstractValue {
    match sym {
      SymExpr::Id(x) => match self.0.get(x) {
        Some(next) => self.eval(next),
        None => AbstractValue::Undef,
      },
      SymExpr::Value(v) => (**v).clone(),
      _ => AbstractValue::Undef,
    }
  }
}

/// Applies `f` to the `IntInfo` currently bound to `x` (defaulting to
/// `IntInfo::unknown()` if `x` is unbound or bound to something other than
/// an `Int`/`Const`), then rebinds `x` to the updated value.
fn update_int(env: &mut ValueEnv, x: Symbol, f: impl FnOnce(&mut IntInfo)) {
  let current = BoundCheckEnvView(env).eval(&SymExpr::Id(x));
  let mut info = match current.lift_const().into_owned() {
    AbstractValue::Int(info) => info,
    _ => IntInfo::unknown(),
  };
  f(&mut info);
  info.restore_disjointness();
  env.insert(x, SymExpr::value(AbstractValue::Int(info)));
}

/// Lifts a `Const` argument to an `Int` relative to the caller's live array
/// records: `n < length` joins `good`, `n == length` joins the weaker
/// `bad`. Non-`Const` values pass through unchanged.
fn lift_const_arg(v: AbstractValue, arrays: &[ArrayRecord]) -> AbstractValue {
  let AbstractValue::Const(n) = v else { return v };
  let mut good = PositionSet::new();
  let mut bad = PositionSet::new();
  for rec in arrays {
    if n >= 0 && n < rec.length {
      good.union_with(&rec.positions);
    } else if n == rec.length {
      bad.union_with(&rec.positions);
    }
  }
  if good.is_empty() && bad.is_empty() {
    return AbstractValue::Const(n);
  }
  AbstractValue::int(n >= 0, good, bad)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ast::{Decl, Module, Visibility};
  use crate::error::CollectingReporter;
  use crate::names::StandardNames;
  use crate::symbol::intern;

  fn pos(i: u32) -> Position { Position::from_raw(i) }

  fn ty_int(p: u32) -> Ty { Ty { pos: pos(p), kind: TyKind::Prim(intern("int")) } }

  fn array_ty(p: u32, elem: Ty) -> Ty {
    Ty { pos: pos(p), kind: TyKind::Apply(intern("array"), vec![elem]) }
  }

  fn expr(p: u32, kind: ExprKind) -> Expr { Expr { pos: pos(p), ty: vec![ty_int(p)], kind } }

  fn make_module(defs: Vec<Def>) -> Module {
    Module { id: intern("m"), decls: Vec::<Decl>::new(), defs }
  }

  #[test]
  fn const_index_in_bounds_is_silent() {
    // public f(a: array(int)) = aget(a, 0)
    let a = intern("a");
    let body = expr(10, ExprKind::Apply(intern("aget"), vec![
      expr(1, ExprKind::Id(a)),
      expr(2, ExprKind::Value(0)),
    ]));
    let def = Def {
      pos: pos(0), name: intern("f"), visibility: Visibility::Public,
      params: smallvec::smallvec![Pattern::Var(a, array_ty(20, ty_int(21)))],
      result_tys: vec![], body,
    };
    let m = make_module(vec![def]);
    let mut reporter = CollectingReporter::new();
    check_module(&m, &StandardNames::conventional(), &mut reporter, &CheckerOptions::default());
    assert!(reporter.is_empty(), "{:?}", reporter.reports);
  }

  #[test]
  fn const_index_negative_is_bound_neg() {
    let a = intern("a");
    let body = expr(10, ExprKind::Apply(intern("aget"), vec![
      expr(1, ExprKind::Id(a)),
      expr(2, ExprKind::Value(-1)),
    ]));
    let def = Def {
      pos: pos(0), name: intern("f"), visibility: Visibility::Public,
      params: smallvec::smallvec![Pattern::Var(a, array_ty(20, ty_int(21)))],
      result_tys: vec![], body,
    };
    let m = make_module(vec![def]);
    let mut reporter = CollectingReporter::new();
    check_module(&m, &StandardNames::conventional(), &mut reporter, &CheckerOptions::default());
    assert_eq!(reporter.reports.len(), 1);
    assert_eq!(reporter.reports[0].kind, ErrorKind::BoundNeg);
  }

  #[test]
  fn amake_then_aget_same_size_is_in_bounds() {
    // public f() = let a = amake(0, 10) in aget(a, 5)
    let a = intern("a");
    let amake = expr(5, ExprKind::Apply(intern("amake"), vec![
      expr(6, ExprKind::Value(0)),
      expr(7, ExprKind::Value(10)),
    ]));
    let aget = expr(10, ExprKind::Apply(intern("aget"), vec![
      expr(1, ExprKind::Id(a)),
      expr(2, ExprKind::Value(5)),
    ]));
    let body = expr(4, ExprKind::Let(Pattern::Var(a, array_ty(20, ty_int(21))), Box::new(amake), Box::new(aget)));
    let def = Def {
      pos: pos(0), name: intern("f"), visibility: Visibility::Public,
      params: smallvec::smallvec![], result_tys: vec![], body,
    };
    let m = make_module(vec![def]);
    let mut reporter = CollectingReporter::new();
    check_module(&m, &StandardNames::conventional(), &mut reporter, &CheckerOptions::default());
    assert!(reporter.is_empty(), "{:?}", reporter.reports);
  }

  #[test]
  fn amake_then_aget_out_of_range_is_bound_up() {
    let a = intern("a");
    let amake = expr(5, ExprKind::Apply(intern("amake"), vec![
      expr(6, ExprKind::Value(0)),
      expr(7, ExprKind::Value(10)),
    ]));
    let aget = expr(10, ExprKind::Apply(intern("aget"), vec![
      expr(1, ExprKind::Id(a)),
      expr(2, ExprKind::Value(10)),
    ]));
    let body = expr(4, ExprKind::Let(Pattern::Var(a, array_ty(20, ty_int(21))), Box::new(amake), Box::new(aget)));
    let def = Def {
      pos: pos(0), name: intern("f"), visibility: Visibility::Public,
      params: smallvec::smallvec![], result_tys: vec![], body,
    };
    let m = make_module(vec![def]);
    let mut reporter = CollectingReporter::new();
    check_module(&m, &StandardNames::conventional(), &mut reporter, &CheckerOptions::default());
    assert_eq!(reporter.reports.len(), 1);
    assert_eq!(reporter.reports[0].kind, ErrorKind::BoundUp);
  }

  #[test]
  fn assert_lt_refines_index_into_bounds() {
    // public f(a: array(int), i: int) = assert(i < alength(a)); aget(a, i)
    let a = intern("a");
    let i = intern("i");
    let amake = expr(5, ExprKind::Apply(intern("amake"), vec![
      expr(6, ExprKind::Value(0)),
      expr(7, ExprKind::Value(10)),
    ]));
    let alength_a = expr(12, ExprKind::Apply(intern("alength"), vec![expr(14, ExprKind::Id(a))]));
    let guard = expr(15, ExprKind::Binop(
      Binop::And,
      Box::new(expr(16, ExprKind::Binop(Binop::Gte, Box::new(expr(17, ExprKind::Id(i))), Box::new(expr(18, ExprKind::Value(0)))))),
      Box::new(expr(9, ExprKind::Binop(Binop::Lt, Box::new(expr(11, ExprKind::Id(i))), Box::new(alength_a)))),
    ));
    let assert_call = expr(8, ExprKind::Apply(intern("assert"), vec![guard]));
    let aget = expr(10, ExprKind::Apply(intern("aget"), vec![
      expr(1, ExprKind::Id(a)),
      expr(2, ExprKind::Id(i)),
    ]));
    let seq = expr(13, ExprKind::Seq(Box::new(assert_call), Box::new(aget)));
    let body = expr(4, ExprKind::Let(Pattern::Var(a, array_ty(20, ty_int(21))), Box::new(amake), Box::new(seq)));
    let def = Def {
      pos: pos(0), name: intern("f"), visibility: Visibility::Public,
      params: smallvec::smallvec![Pattern::Var(i, ty_int(22))],
      result_tys: vec![], body,
    };
    let m = make_module(vec![def]);
    let mut reporter = CollectingReporter::new();
    check_module(&m, &StandardNames::conventional(), &mut reporter, &CheckerOptions::default());
    assert!(reporter.is_empty(), "{:?}", reporter.reports);
  }

  #[test]
  fn unknown_index_without_assertion_is_bound_low() {
    let a = intern("a");
    let i = intern("i");
    let amake = expr(5, ExprKind::Apply(intern("amake"), vec![
      expr(6, ExprKind::Value(0)),
      expr(7, ExprKind::Value(10)),
    ]));
    let aget = expr(10, ExprKind::Apply(intern("aget"), vec![
      expr(1, ExprKind::Id(a)),
      expr(2, ExprKind::Id(i)),
    ]));
    let body = expr(4, ExprKind::Let(Pattern::Var(a, array_ty(20, ty_int(21))), Box::new(amake), Box::new(aget)));
    let def = Def {
      pos: pos(0), name: intern("f"), visibility: Visibility::Public,
      params: smallvec::smallvec![Pattern::Var(i, ty_int(22))],
      result_tys: vec![], body,
    };
    let m = make_module(vec![def]);
    let mut reporter = CollectingReporter::new();
    check_module(&m, &StandardNames::conventional(), &mut reporter, &CheckerOptions::default());
    assert_eq!(reporter.reports.len(), 1);
    assert_eq!(reporter.reports[0].kind, ErrorKind::BoundLow);
  }

  #[test]
  fn private_call_is_memoized_per_argument_shape() {
    // private g(a: array(int), i: int) = aget(a, i)
    // public f() = let x = amake(0, 10) in g(x, 0)
    let a = intern("a");
    let i = intern("i");
    let x = intern("x");
    let g_body = expr(10, ExprKind::Apply(intern("aget"), vec![
      expr(1, ExprKind::Id(a)),
      expr(2, ExprKind::Id(i)),
    ]));
    let g = Def {
      pos: pos(30), name: intern("g"), visibility: Visibility::Private,
      params: smallvec::smallvec![
        Pattern::Var(a, array_ty(20, ty_int(21))),
        Pattern::Var(i, ty_int(22)),
      ],
      result_tys: vec![ty_int(23)], body: g_body,
    };
    let amake = expr(5, ExprKind::Apply(intern("amake"), vec![
      expr(6, ExprKind::Value(0)),
      expr(7, ExprKind::Value(10)),
    ]));
    let call = expr(40, ExprKind::Apply(intern("g"), vec![
      expr(41, ExprKind::Id(x)),
      expr(42, ExprKind::Value(0)),
    ]));
    let body = expr(4, ExprKind::Let(Pattern::Var(x, array_ty(20, ty_int(21))), Box::new(amake), Box::new(call)));
    let f = Def {
      pos: pos(0), name: intern("f"), visibility: Visibility::Public,
      params: smallvec::smallvec![], result_tys: vec![], body,
    };
    let m = make_module(vec![g, f]);
    let mut reporter = CollectingReporter::new();
    check_module(&m, &StandardNames::conventional(), &mut reporter, &CheckerOptions::default());
    assert!(reporter.is_empty(), "{:?}", reporter.reports);
  }

  #[test]
  fn eval_div_plus_const_midpoint_stays_nonneg() {
    let x = intern("x");
    let y = intern("y");
    let privates = HashMap::new();
    let memo = MemoTable::new();
    let mut env = BoundCheckEnv::new(&privates, &memo);
    env.values.insert(x, SymExpr::value(AbstractValue::int(true, PositionSet::new(), PositionSet::new())));
    env.values.insert(y, SymExpr::value(AbstractValue::int(true, PositionSet::new(), PositionSet::new())));
    let mid = SymExpr::div(SymExpr::plus(SymExpr::id(x), SymExpr::id(y)), SymExpr::konst(2));
    match eval(&env, &mid) {
      AbstractValue::Int(info) => assert!(info.nonneg),
      other => panic!("expected Int, got {other:?}"),
    }
  }

  fn position_set_from_mask(mask: u8) -> PositionSet {
    let mut s = PositionSet::new();
    for i in 0..4u32 {
      if mask & (1 << i) != 0 { s.insert(pos(i)); }
    }
    s
  }

  fn int_of(nonneg: bool, good_mask: u8, bad_mask: u8) -> IntInfo {
    IntInfo::new(nonneg, position_set_from_mask(good_mask), position_set_from_mask(bad_mask))
  }

  fn fresh_env_with(var: Symbol, info: IntInfo) -> ValueEnv {
    let mut env = ValueEnv::default();
    env.insert(var, SymExpr::value(AbstractValue::Int(info)));
    env
  }

  fn int_info_of(env: &ValueEnv, var: Symbol) -> IntInfo {
    match env.get(&var) {
      Some(SymExpr::Value(v)) => match &**v {
        AbstractValue::Int(info) => info.clone(),
        other => panic!("expected Int, got {other:?}"),
      },
      other => panic!("expected a bound Value(Int), got {other:?}"),
    }
  }

  /// Per-position knowledge strength: `good` (strictly below length) is
  /// stronger than `bad` (at most length) is stronger than unknown. Used to
  /// check that a refinement step never *weakens* what's known about a
  /// position it touches.
  fn strength(info: &IntInfo, p: Position) -> u8 {
    if info.good.contains(p) { 2 } else if info.bad.contains(p) { 1 } else { 0 }
  }

  proptest::proptest! {
    /// `Lte(x, y)`'s primary merge only raises `x`'s per-position knowledge:
    /// every position promotes to the same strength or stronger, never
    /// weaker (the union-then-restore-disjointness shape means anything
    /// demoted out of `bad` was promoted into `good` in the same step).
    #[test]
    fn refine_lte_merge_never_weakens_x(
      nonneg_x in proptest::prelude::any::<bool>(), good_x in 0u8..16, bad_x in 0u8..16,
      nonneg_y in proptest::prelude::any::<bool>(), good_y in 0u8..16, bad_y in 0u8..16,
    ) {
      let x = intern("px");
      let before = int_of(nonneg_x, good_x, bad_x);
      let mut env = fresh_env_with(x, before.clone());
      let y_val = SymExpr::value(AbstractValue::Int(int_of(nonneg_y, good_y, bad_y)));
      refine_lte_merge(&SymExpr::id(x), &y_val, &mut env);
      let after = int_info_of(&env, x);
      for i in 0..4u32 {
        proptest::prop_assert!(strength(&after, pos(i)) >= strength(&before, pos(i)));
      }
    }

    /// `Gte`/`Gt`'s `nonneg`-raising action is monotonic: it only ever
    /// flips `false` to `true`, never the reverse.
    #[test]
    fn refine_gte_raise_never_lowers_nonneg(
      nonneg_x in proptest::prelude::any::<bool>(),
      nonneg_y in proptest::prelude::any::<bool>(), good_y in 0u8..16, bad_y in 0u8..16,
    ) {
      let x = intern("px");
      let before = int_of(nonneg_x, 0, 0);
      let mut env = fresh_env_with(x, before.clone());
      let y_val = SymExpr::value(AbstractValue::Int(int_of(nonneg_y, good_y, bad_y)));
      refine_gte_raise(&SymExpr::id(x), &y_val, &mut env);
      let after = int_info_of(&env, x);
      proptest::prop_assert!(!before.nonneg || after.nonneg);
    }

    /// `Lt(x, y)`'s merge only ever grows `x`'s `good` set (its `bad` set is
    /// unconditionally cleared by the same rule, which is the one respect
    /// in which this particular rule is allowed to forget information).
    #[test]
    fn refine_lt_merge_good_only_grows(
      nonneg_x in proptest::prelude::any::<bool>(), good_x in 0u8..16, bad_x in 0u8..16,
      nonneg_y in proptest::prelude::any::<bool>(), good_y in 0u8..16, bad_y in 0u8..16,
    ) {
      let x = intern("px");
      let before = int_of(nonneg_x, good_x, bad_x);
      let mut env = fresh_env_with(x, before.clone());
      let y_val = SymExpr::value(AbstractValue::Int(int_of(nonneg_y, good_y, bad_y)));
      refine_lt_merge(&SymExpr::id(x), &y_val, &mut env);
      let after = int_info_of(&env, x);
      let mut grown = before.good.clone();
      grown.union_with(&after.good);
      proptest::prop_assert_eq!(grown, after.good);
    }
  }
}
