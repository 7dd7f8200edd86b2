//! Equation object kinds and the cone gating of the scalar constant.
//!
//! The full equation record (with its linear part and expression tree) lives
//! in the algorithmic crate; this module holds the pieces that are pure
//! data: the object kind and the rules for when a scalar constant term is
//! admissible.

use serde::{Deserialize, Serialize};

use crate::cone::Cone;
use crate::error::{CoreError, CoreResult};

/// What an equation *is*, independently of the cone it may sit in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EquObject {
    /// `expression = constant`, the expression is a function image
    Mapping,
    /// A mapping defining a named variable (`z =E= f(x)`)
    DefinedMapping,
    /// `body ∈ K` for a cone K
    ConeInclusion,
    /// A boolean relation between expressions
    BooleanRelation,
    #[default]
    Unset,
}

/// True when an equation with this (object, cone) pair carries a scalar
/// constant term; structured cones own their data instead.
pub fn admits_scalar_cst(object: EquObject, cone: Cone) -> bool {
    if cone.admits_scalar_cst() {
        return true;
    }
    cone == Cone::None
        && matches!(
            object,
            EquObject::Mapping | EquObject::DefinedMapping | EquObject::BooleanRelation
        )
}

/// Error used by the constant accessors when the cone refuses a scalar.
pub fn err_cone(fn_name: &str, object: EquObject, cone: Cone) -> CoreError {
    CoreError::UnExpectedData(format!(
        "{fn_name}: equation of object {object:?} in cone {cone} has no scalar constant"
    ))
}

/// Gate for the constant accessors: `Ok(())` iff the scalar constant exists.
pub fn chk_scalar_cst(fn_name: &str, object: EquObject, cone: Cone) -> CoreResult<()> {
    if admits_scalar_cst(object, cone) {
        Ok(())
    } else {
        Err(err_cone(fn_name, object, cone))
    }
}
