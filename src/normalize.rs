//! The normalizer: rewrites a naming-stage [`ast::Module`] into a stripped
//! one of the same shape, running the observability check
//! and the termination check as it goes. Purely structural — no values are
//! modeled, nothing is memoized.

use hashbrown::HashMap;
use crate::ast::{Arm, Decl, Def, Expr, ExprKind, Module, Pattern, Ty, TyKind, pattern_type};
use crate::error::{ErrorKind, Reporter};
use crate::names::NameRegistry;
use crate::env::{FnSig, NormEnv};

/// Rewrites `m` into a stripped module, reporting every violation found
/// along the way. Output preserves the module id and the order of
/// declarations and definitions.
pub fn normalize_module(
  m: &Module,
  names: &impl NameRegistry,
  reporter: &mut impl Reporter,
) -> Module {
  log::debug!("normalizing module {:?}", m.id);
  let sigs = collect_signatures(m);
  let decls = m.decls.iter().map(|d| normalize_decl(d, names, reporter)).collect();
  let defs = m.defs.iter().map(|d| normalize_def(d, &sigs, names, reporter)).collect();
  Module { id: m.id, decls, defs }
}

fn collect_signatures(m: &Module) -> NormEnv {
  let mut sigs: NormEnv = HashMap::new();
  for def in &m.defs {
    let domain = def.params.iter().map(pattern_type).collect();
    sigs.insert(def.name, FnSig { pos: def.pos, domain, codomain: def.result_tys.clone() });
  }
  sigs
}

/// Rewrites a type expression: recurse into every shape, and on
/// `Apply(c, args)` enforce that no rewritten
/// argument is a primitive type.
pub fn normalize_type(ty: &Ty, names: &impl NameRegistry, reporter: &mut impl Reporter) -> Ty {
  match &ty.kind {
    TyKind::Prim(_) | TyKind::Var(_) | TyKind::Any => ty.clone(),
    TyKind::Apply(ctor, args) => {
      let args: Vec<Ty> = args.iter().map(|a| normalize_type(a, names, reporter)).collect();
      for a in &args {
        if a.is_primitive() {
          reporter.report(ErrorKind::PolyIsNotPrim, a.pos, None);
        }
      }
      Ty { pos: ty.pos, kind: TyKind::Apply(*ctor, args) }
    }
    TyKind::Fun(dom, cod) => {
      let dom = dom.iter().map(|d| normalize_type(d, names, reporter)).collect();
      let cod = cod.iter().map(|c| normalize_type(c, names, reporter)).collect();
      Ty { pos: ty.pos, kind: TyKind::Fun(dom, cod) }
    }
  }
}

/// The observability check: a bare reference to the observed constructor
/// is forbidden in value position; an application of
/// it is forbidden except as the single outermost type of a function
/// argument.
fn check_observability(ty: &Ty, names: &impl NameRegistry, reporter: &mut impl Reporter, allow_obs_outer: bool) {
  match &ty.kind {
    TyKind::Apply(ctor, args) => {
      if names.is_observed(*ctor) {
        if args.is_empty() {
          reporter.report(ErrorKind::ObsNotValue, ty.pos, None);
        } else if !allow_obs_outer {
          reporter.report(ErrorKind::ObsNotAllowed, ty.pos, None);
        }
      }
      for a in args { check_observability(a, names, reporter, false); }
    }
    TyKind::Fun(dom, cod) => {
      for d in dom { check_observability(d, names, reporter, true); }
      for c in cod { check_observability(c, names, reporter, false); }
    }
    TyKind::Prim(_) | TyKind::Var(_) | TyKind::Any => {}
  }
}

fn check_observability_of_pattern(p: &Pattern, names: &impl NameRegistry, reporter: &mut impl Reporter) {
  match p {
    Pattern::Var(_, ty) | Pattern::Wild(ty) => check_observability(ty, names, reporter, false),
    Pattern::Tuple(ps) => for p in ps { check_observability_of_pattern(p, names, reporter) },
  }
}

/// Termination check on application: `Tany` anywhere in an `Eapply`'s
/// expected result types means the callee cannot terminate. Note the
/// asymmetry: unlike `let`/`if` branches, this does *not* also run the
/// observability check on the result types.
fn check_terminates(e: &Expr, reporter: &mut impl Reporter) {
  if matches!(e.kind, ExprKind::Apply(..)) && e.ty.iter().any(|t| matches!(t.kind, TyKind::Any)) {
    reporter.report(ErrorKind::InfiniteLoop, e.pos, None);
  }
}

fn normalize_decl(d: &Decl, names: &impl NameRegistry, reporter: &mut impl Reporter) -> Decl {
  let type_args: Vec<Ty> = d.type_args.iter().map(|t| normalize_type(t, names, reporter)).collect();
  for t in &type_args { check_observability(t, names, reporter, false); }
  let ty = normalize_type(&d.ty, names, reporter);
  Decl { pos: d.pos, name: d.name, visibility: d.visibility, type_args, ty }
}

fn normalize_def(d: &Def, sigs: &NormEnv, names: &impl NameRegistry, reporter: &mut impl Reporter) -> Def {
  let _ = sigs; // in scope for callers that need cross-references; this def's own rewrite doesn't consult it
  for p in &d.params { check_observability_of_pattern(p, names, reporter) }
  let params = d.params.iter().map(|p| normalize_pattern(p, names, reporter)).collect();
  let result_tys = d.result_tys.iter().map(|t| normalize_type(t, names, reporter)).collect();
  let body = normalize_expr(&d.body, names, reporter);
  Def { pos: d.pos, name: d.name, visibility: d.visibility, params, result_tys, body }
}

fn normalize_pattern(p: &Pattern, names: &impl NameRegistry, reporter: &mut impl Reporter) -> Pattern {
  match p {
    Pattern::Var(s, ty) => Pattern::Var(*s, normalize_type(ty, names, reporter)),
    Pattern::Wild(ty) => Pattern::Wild(normalize_type(ty, names, reporter)),
    Pattern::Tuple(ps) => Pattern::Tuple(ps.iter().map(|p| normalize_pattern(p, names, reporter)).collect()),
  }
}

/// Rewrites an expression, running the termination check on every `Eapply`
/// and the observability check on every expression's type list, recursing
/// into every child position: pattern-bound sub-expressions, variant
/// payloads, record fields, the `with`-base,
/// let-bindings and their bodies, if-branches, the sequence's right
/// operand, and match actions.
pub fn normalize_expr(e: &Expr, names: &impl NameRegistry, reporter: &mut impl Reporter) -> Expr {
  check_terminates(e, reporter);
  let ty: Vec<Ty> = e.ty.iter().map(|t| {
    let t = normalize_type(t, names, reporter);
    check_observability(&t, names, reporter, false);
    t
  }).collect();
  let kind = match &e.kind {
    ExprKind::Id(s) => ExprKind::Id(*s),
    ExprKind::Value(n) => ExprKind::Value(*n),
    ExprKind::Obs(s) => ExprKind::Obs(*s),
    ExprKind::Variant(tag, payload) =>
      ExprKind::Variant(*tag, payload.iter().map(|p| normalize_expr(p, names, reporter)).collect()),
    ExprKind::Record(fields) =>
      ExprKind::Record(fields.iter().map(|(f, v)| (*f, normalize_expr(v, names, reporter))).collect()),
    ExprKind::With(base, fields) => ExprKind::With(
      Box::new(normalize_expr(base, names, reporter)),
      fields.iter().map(|(f, v)| (*f, normalize_expr(v, names, reporter))).collect(),
    ),
    ExprKind::Field(base, f) => ExprKind::Field(Box::new(normalize_expr(base, names, reporter)), *f),
    ExprKind::Binop(op, a, b) => ExprKind::Binop(*op,
      Box::new(normalize_expr(a, names, reporter)), Box::new(normalize_expr(b, names, reporter))),
    ExprKind::Uop(op, a) => ExprKind::Uop(*op, Box::new(normalize_expr(a, names, reporter))),
    ExprKind::Let(pat, e1, e2) => {
      check_observability_of_pattern(pat, names, reporter);
      ExprKind::Let(
        normalize_pattern(pat, names, reporter),
        Box::new(normalize_expr(e1, names, reporter)),
        Box::new(normalize_expr(e2, names, reporter)),
      )
    }
    ExprKind::If(c, t, f) => ExprKind::If(
      Box::new(normalize_expr(c, names, reporter)),
      Box::new(normalize_expr(t, names, reporter)),
      Box::new(normalize_expr(f, names, reporter)),
    ),
    ExprKind::Match(scrut, arms) => ExprKind::Match(
      Box::new(normalize_expr(scrut, names, reporter)),
      arms.iter().map(|a| normalize_arm(a, names, reporter)).collect(),
    ),
    ExprKind::Seq(a, b) =>
      ExprKind::Seq(Box::new(normalize_expr(a, names, reporter)), Box::new(normalize_expr(b, names, reporter))),
    ExprKind::Apply(f, args) =>
      ExprKind::Apply(*f, args.iter().map(|a| normalize_expr(a, names, reporter)).collect()),
  };
  Expr { pos: e.pos, ty, kind }
}

fn normalize_arm(a: &Arm, names: &impl NameRegistry, reporter: &mut impl Reporter) -> Arm {
  check_observability_of_pattern(&a.pattern, names, reporter);
  Arm { pattern: normalize_pattern(&a.pattern, names, reporter), body: normalize_expr(&a.body, names, reporter) }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::error::CollectingReporter;
  use crate::names::StandardNames;
  use crate::pos::Position;
  use crate::symbol::intern;

  fn pos(i: u32) -> Position { Position::from_raw(i) }

  fn prim(name: &str, p: Position) -> Ty { Ty { pos: p, kind: TyKind::Prim(intern(name)) } }

  #[test]
  fn poly_is_not_prim_on_bare_application() {
    let names = StandardNames::conventional();
    let mut r = CollectingReporter::new();
    let ty = Ty { pos: pos(0), kind: TyKind::Apply(intern("list"), vec![prim("int", pos(1))]) };
    let out = normalize_type(&ty, &names, &mut r);
    assert_eq!(r.reports.len(), 1);
    assert_eq!(r.reports[0].kind, ErrorKind::PolyIsNotPrim);
    assert_eq!(r.reports[0].pos, pos(1));
    assert!(matches!(out.kind, TyKind::Apply(_, _)));
  }

  #[test]
  fn observed_bare_in_value_position_is_rejected() {
    let names = StandardNames::conventional();
    let mut r = CollectingReporter::new();
    let ty = Ty { pos: pos(5), kind: TyKind::Apply(names.observed, vec![]) };
    check_observability(&ty, &names, &mut r, false);
    assert_eq!(r.reports.len(), 1);
    assert_eq!(r.reports[0].kind, ErrorKind::ObsNotValue);
  }

  #[test]
  fn observed_applied_as_outer_fn_arg_is_allowed() {
    let names = StandardNames::conventional();
    let mut r = CollectingReporter::new();
    let inner = prim("int", pos(2));
    let fun = Ty {
      pos: pos(1),
      kind: TyKind::Fun(
        vec![Ty { pos: pos(3), kind: TyKind::Apply(names.observed, vec![inner]) }],
        vec![prim("bool", pos(4))],
      ),
    };
    check_observability(&fun, &names, &mut r, false);
    assert!(r.is_empty());
  }

  #[test]
  fn observed_applied_elsewhere_is_rejected() {
    let names = StandardNames::conventional();
    let mut r = CollectingReporter::new();
    let inner = prim("int", pos(2));
    // not inside a Fun's domain position: directly in value position
    let ty = Ty { pos: pos(3), kind: TyKind::Apply(names.observed, vec![inner]) };
    check_observability(&ty, &names, &mut r, false);
    assert_eq!(r.reports.len(), 1);
    assert_eq!(r.reports[0].kind, ErrorKind::ObsNotAllowed);
  }

  #[test]
  fn infinite_loop_flagged_on_apply_with_any_result() {
    let names = StandardNames::conventional();
    let mut r = CollectingReporter::new();
    let e = Expr {
      pos: pos(9),
      ty: vec![Ty { pos: pos(9), kind: TyKind::Any }],
      kind: ExprKind::Apply(intern("f"), vec![]),
    };
    check_terminates(&e, &mut r);
    assert_eq!(r.reports.len(), 1);
    assert_eq!(r.reports[0].kind, ErrorKind::InfiniteLoop);
  }

  #[test]
  fn infinite_loop_not_flagged_on_non_apply() {
    let mut r = CollectingReporter::new();
    let e = Expr { pos: pos(9), ty: vec![Ty { pos: pos(9), kind: TyKind::Any }], kind: ExprKind::Value(1) };
    check_terminates(&e, &mut r);
    assert!(r.is_empty());
  }
}
