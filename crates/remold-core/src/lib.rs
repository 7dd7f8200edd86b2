//! # remold-core: Algebraic Container Fundamentals
//!
//! Fundamental types shared by the remold workspace: typed indices with
//! sentinel values, abstract variable/equation sets, the constant-interning
//! pool, sparse linear parts, cones, basis statuses, and the option bag.
//!
//! The heavy machinery (expression trees, the container matrix, filtering
//! and compression) lives in `remold-algo`; the solver-facing data contract
//! lives in `remold-solver-common`.

pub mod basis;
pub mod cone;
pub mod equ;
pub mod error;
pub mod idx;
pub mod lequ;
pub mod options;
pub mod pool;
pub mod sets;
pub mod var;

pub use basis::BasisStatus;
pub use cone::Cone;
pub use equ::EquObject;
pub use error::{CoreError, CoreResult};
pub use idx::Idx;
pub use lequ::Lequ;
pub use options::{OptValue, Options};
pub use pool::{Pool, PoolIdx, POOL_IDX_NONE};
pub use sets::{Aequ, Avar, IdxSet};
pub use var::{Var, VarBnd, VarType};
