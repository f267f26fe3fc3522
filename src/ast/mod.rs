/// SQL AST used by the relational provider.
///
/// ```text
/// QueryModel
///       ↓
/// Relational provider     (db/provider.rs)
///       ↓
/// SQL AST                 (types.rs)
///       ↓
/// Optimization            (optimizer.rs)
///       ↓
/// SQL Compiler            (compiler.rs)
///       ↓
/// Execution               (db/query.rs)
/// ```
pub mod compiler;
pub mod optimizer;
pub mod types;

pub use compiler::{compile, quote_ident};
pub use optimizer::{OptimizationPass, Optimizer};
pub use types::*;
