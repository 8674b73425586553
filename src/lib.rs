//! Array bounds analysis core for a strict, purely functional,
//! linearly-typed language. Two sequential passes:
//!
//! 1. [`normalize`] — rewrites a naming-stage typed AST into a stripped one,
//!    checking observability and call-site termination as it goes.
//! 2. [`bound_check`] — a whole-program, memoized, recursive abstract
//!    interpreter over the stripped AST that proves every `aget`/`aset`/
//!    `aswap` access is within the declared bounds of its array.
//!
//! Dependency order, leaves first: [`pos`] · [`value`] · [`symbolic`] ·
//! [`env`] · [`normalize`] · [`bound_check`].

pub mod ast;
pub mod bound_check;
pub mod env;
pub mod error;
pub mod names;
pub mod normalize;
pub mod pos;
pub mod symbol;
pub mod symbolic;
pub mod value;

use names::NameRegistry;
use error::Reporter;

/// Cross-cutting policy knobs the two passes would otherwise bake in as
/// constants.
#[derive(Debug, Clone, Copy)]
pub struct CheckerOptions {
  /// The sentinel used for "unknown length" in place of a true unbounded
  /// maximum.
  pub max_int: i64,
  /// Whether to detect self-application recursion shapes that can loop
  /// forever without the memo table ever settling. Off by default, since
  /// nothing in this crate currently consults this flag; it exists so a
  /// future pass can opt in without breaking the API.
  pub detect_self_application_loops: bool,
}

impl Default for CheckerOptions {
  fn default() -> Self {
    Self {
      max_int: value::MAX_INT,
      detect_self_application_loops: false,
    }
  }
}

/// Runs both passes over one module: normalize, then bound-check the
/// result. Each module owns its own memoization table and private/public
/// catalogs; nothing survives between modules.
pub fn check_module(
  m: &ast::Module,
  names: &impl NameRegistry,
  reporter: &mut impl Reporter,
  opts: &CheckerOptions,
) -> ast::Module {
  let stripped = normalize::normalize_module(m, names, reporter);
  bound_check::check_module(&stripped, names, reporter, opts);
  stripped
}

/// Runs [`check_module`] over every module in `modules`, independently: each
/// module owns its private maps and memo table exclusively. This crate
/// does not spawn threads itself; a caller that wants module-level
/// parallelism can drive this function from its own thread pool, since each
/// call is fully self-contained.
pub fn check_program(
  modules: &[ast::Module],
  names: &impl NameRegistry,
  reporter: &mut impl Reporter,
  opts: &CheckerOptions,
) -> Vec<ast::Module> {
  modules.iter().map(|m| check_module(m, names, reporter, opts)).collect()
}
