//! GAMS-style nonlinear instruction alphabet.
//!
//! A bytecode stream is a pair of parallel arrays `(instrs, args)`. All
//! variable and pool arguments are 1-based; `Store(k)` names the owning
//! equation as `k - 1` and the stream is terminated by `Header(len)` once
//! reversed into execution order.

use remold_core::{CoreError, CoreResult};

use crate::nltree::node::{NlOp, OpArg};

/// One opcode of the nonlinear instruction alphabet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum GamsOp {
    NoOp = 0,
    PushV = 1,
    PushI = 2,
    PushZero = 3,
    Store = 4,
    Add = 5,
    AddV = 6,
    AddI = 7,
    Sub = 8,
    SubV = 9,
    SubI = 10,
    Mul = 11,
    MulV = 12,
    MulI = 13,
    Div = 14,
    DivV = 15,
    DivI = 16,
    UMin = 17,
    UMinV = 18,
    MulIAdd = 19,
    CallArg1 = 20,
    CallArg2 = 21,
    CallArgN = 22,
    FuncArgN = 23,
    Header = 24,
    /// First opcode outside the regular range; streams must not contain it.
    Chk = 25,
}

/// Number of opcodes in the regular alphabet (everything below [`GamsOp::Chk`]).
pub const GAMS_OPCODE_COUNT: i32 = GamsOp::Chk as i32;

impl GamsOp {
    pub fn from_raw(raw: i32) -> CoreResult<GamsOp> {
        use GamsOp::*;
        Ok(match raw {
            0 => NoOp,
            1 => PushV,
            2 => PushI,
            3 => PushZero,
            4 => Store,
            5 => Add,
            6 => AddV,
            7 => AddI,
            8 => Sub,
            9 => SubV,
            10 => SubI,
            11 => Mul,
            12 => MulV,
            13 => MulI,
            14 => Div,
            15 => DivV,
            16 => DivI,
            17 => UMin,
            18 => UMinV,
            19 => MulIAdd,
            20 => CallArg1,
            21 => CallArg2,
            22 => CallArgN,
            23 => FuncArgN,
            24 => Header,
            _ => {
                return Err(CoreError::InvalidOpCode(format!(
                    "unknown opcode value {raw}"
                )))
            }
        })
    }

    pub fn name(self) -> &'static str {
        use GamsOp::*;
        match self {
            NoOp => "NoOp",
            PushV => "PushV",
            PushI => "PushI",
            PushZero => "PushZero",
            Store => "Store",
            Add => "Add",
            AddV => "AddV",
            AddI => "AddI",
            Sub => "Sub",
            SubV => "SubV",
            SubI => "SubI",
            Mul => "Mul",
            MulV => "MulV",
            MulI => "MulI",
            Div => "Div",
            DivV => "DivV",
            DivI => "DivI",
            UMin => "UMin",
            UMinV => "UMinV",
            MulIAdd => "MulIAdd",
            CallArg1 => "CallArg1",
            CallArg2 => "CallArg2",
            CallArgN => "CallArgN",
            FuncArgN => "FuncArgN",
            Header => "Header",
            Chk => "Chk",
        }
    }

    /// The node class an opcode contributes to, or `None` for the framing
    /// opcodes that never become nodes on their own.
    pub fn op_class(self) -> Option<NlOp> {
        use GamsOp::*;
        match self {
            PushI | PushZero => Some(NlOp::Cst),
            PushV => Some(NlOp::Var),
            Add | AddV | AddI | MulIAdd => Some(NlOp::Add),
            Sub | SubV | SubI => Some(NlOp::Sub),
            Mul | MulV | MulI => Some(NlOp::Mul),
            Div | DivV | DivI => Some(NlOp::Div),
            UMin | UMinV => Some(NlOp::Umin),
            CallArg1 => Some(NlOp::Call1),
            CallArg2 => Some(NlOp::Call2),
            CallArgN => Some(NlOp::CallN),
            NoOp | Store | Header | FuncArgN | Chk => None,
        }
    }

    /// The kind of fused argument an opcode carries.
    pub fn oparg_kind(self) -> OpArgKind {
        use GamsOp::*;
        match self {
            PushI | PushZero | AddI | SubI | MulI | DivI => OpArgKind::Cst,
            PushV | AddV | SubV | MulV | DivV | UMinV => OpArgKind::Var,
            MulIAdd => OpArgKind::Fma,
            _ => OpArgKind::Unset,
        }
    }

    /// The fused variant of an arithmetic opcode for a leaf operand kind.
    pub fn fused(class: NlOp, leaf: Option<NlOp>) -> CoreResult<GamsOp> {
        use GamsOp::*;
        let (plain, v, i) = match class {
            NlOp::Add => (Add, AddV, AddI),
            NlOp::Sub => (Sub, SubV, SubI),
            NlOp::Mul => (Mul, MulV, MulI),
            NlOp::Div => (Div, DivV, DivI),
            other => {
                return Err(CoreError::InvalidOpCode(format!(
                    "no arithmetic opcode for node class {other:?}"
                )))
            }
        };
        Ok(match leaf {
            Some(NlOp::Var) => v,
            Some(NlOp::Cst) => i,
            _ => plain,
        })
    }

    /// Rewrite a variable-carrying opcode into its constant-carrying form.
    ///
    /// Used by the filter layer when a variable has been filtered out and
    /// its current value is injected from the pool. `UMinV` has no direct
    /// constant form: the caller must push a negated pool slot instead,
    /// signalled by `Ok(None)`.
    pub fn var_to_cst(self) -> CoreResult<Option<GamsOp>> {
        use GamsOp::*;
        match self {
            PushV => Ok(Some(PushI)),
            AddV => Ok(Some(AddI)),
            SubV => Ok(Some(SubI)),
            MulV => Ok(Some(MulI)),
            DivV => Ok(Some(DivI)),
            UMinV => Ok(None),
            other => Err(CoreError::InvalidOpCode(format!(
                "opcode {} does not take a variable argument",
                other.name()
            ))),
        }
    }
}

/// Payload kind of a fused argument (see [`OpArg`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArgKind {
    Unset,
    Cst,
    Var,
    Fma,
}

impl From<&OpArg> for OpArgKind {
    fn from(oparg: &OpArg) -> OpArgKind {
        match oparg {
            OpArg::Unset => OpArgKind::Unset,
            OpArg::Cst(_) => OpArgKind::Cst,
            OpArg::Var(_) => OpArgKind::Var,
            OpArg::Fma(_) => OpArgKind::Fma,
        }
    }
}

/// A raw opcode stream: parallel instruction and argument arrays.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OpcodeStream {
    pub instrs: Vec<GamsOp>,
    pub args: Vec<i32>,
}

impl OpcodeStream {
    pub fn with_capacity(cap: usize) -> OpcodeStream {
        OpcodeStream { instrs: Vec::with_capacity(cap), args: Vec::with_capacity(cap) }
    }

    pub fn len(&self) -> usize {
        self.instrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }

    pub fn push(&mut self, op: GamsOp, arg: i32) {
        self.instrs.push(op);
        self.args.push(arg);
    }

    pub fn reverse(&mut self) {
        self.instrs.reverse();
        self.args.reverse();
    }

    /// Raw integer image for export.
    pub fn raw(&self) -> (Vec<i32>, Vec<i32>) {
        (self.instrs.iter().map(|&op| op as i32).collect(), self.args.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_roundtrip() {
        for raw in 0..GAMS_OPCODE_COUNT {
            let op = GamsOp::from_raw(raw).unwrap();
            assert_eq!(op as i32, raw);
        }
        assert!(GamsOp::from_raw(99).is_err());
    }

    #[test]
    fn test_fused_selection() {
        assert_eq!(GamsOp::fused(NlOp::Add, Some(NlOp::Var)).unwrap(), GamsOp::AddV);
        assert_eq!(GamsOp::fused(NlOp::Div, Some(NlOp::Cst)).unwrap(), GamsOp::DivI);
        assert_eq!(GamsOp::fused(NlOp::Mul, None).unwrap(), GamsOp::Mul);
        assert!(GamsOp::fused(NlOp::Call1, None).is_err());
    }

    #[test]
    fn test_var_to_cst() {
        assert_eq!(GamsOp::PushV.var_to_cst().unwrap(), Some(GamsOp::PushI));
        assert_eq!(GamsOp::UMinV.var_to_cst().unwrap(), None);
        assert!(GamsOp::Add.var_to_cst().is_err());
    }
}
