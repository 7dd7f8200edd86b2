//! # remold-algo: Algebraic Container Machinery
//!
//! The heavy lifting of the remold workspace: expression trees with
//! bytecode round-tripping, the container matrix (sparse equation/variable
//! incidence), coherent equation editing, filter ops, compression with
//! index translation, the staged presolve pipeline, and deferred
//! evaluation of eliminated variables.
//!
//! ## Data flow
//!
//! ```text
//! external bytecode ──► nltree::gams ──► NlTree + Lequ
//!                                          │
//!                           cmat registers incidence
//!                                          │
//!                container editing mutates all three together
//!                                          │
//!      compress + fops synthesize a filtered, renumbered container
//!                                          │
//!            problem batch ──► solver plugin ──► report-back
//! ```

pub mod cmat;
pub mod compress;
pub mod container;
pub mod equ;
pub mod eval;
pub mod fops;
pub mod instr;
pub mod nltree;
pub mod presolve;
pub mod quadmat;
pub mod workspace;

pub use cmat::{append_equs, CMat, CMatElt, CellKind};
pub use compress::{compress_equs, compress_vars, export_compressed, problem_batch};
pub use container::{Container, EquInfo, EquRosetta, EquVarPair, Inherited, RosettaTarget};
pub use equ::Equ;
pub use eval::eval_equvar;
pub use fops::{FilterActive, FilterSubset, Fops, MpMembership};
pub use instr::{GamsOp, OpcodeStream};
pub use nltree::node::{NlFunc, NlNode, NlOp, NodeId, OpArg};
pub use nltree::{NlAddr, NlTree};
pub use presolve::presolve;
pub use quadmat::QuadMat;
pub use workspace::Workspace;
