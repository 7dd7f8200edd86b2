//! Expression tree nodes.
//!
//! Nodes live in a per-tree arena (`Vec<NlNode>`) and reference each other
//! through stable [`NodeId`]s, so structural edits never invalidate other
//! nodes. Children arrays may contain `None` holes for pre-allocated slots.

use remold_core::{CoreError, CoreResult, Idx, PoolIdx};

/// Stable index of a node in its tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Arithmetic/function operation of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NlOp {
    /// Numerical constant (payload: 1-based pool index, 0 = literal zero)
    Cst,
    /// Variable (payload: variable index)
    Var,
    Add,
    Sub,
    Mul,
    Div,
    /// Function call with one argument (payload: function code)
    Call1,
    /// Function call with two arguments
    Call2,
    /// Function call with three or more arguments
    CallN,
    /// Unary minus
    Umin,
}

/// A fused operand attached to an arithmetic node, in addition to its
/// explicit children.
///
/// `Fma(k)` on a `Mul` child of an `Add` encodes "multiply by pool constant
/// `k` and add to the surrounding sum" (the `MulIAdd` bytecode form).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OpArg {
    #[default]
    Unset,
    /// Fused pool constant
    Cst(PoolIdx),
    /// Fused variable
    Var(Idx),
    /// Fused multiply-add constant
    Fma(PoolIdx),
}

/// One node of an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub struct NlNode {
    pub op: NlOp,
    pub oparg: OpArg,
    /// Payload interpreted per `op`: variable index (`Var`), 1-based pool
    /// index (`Cst`, 0 = literal zero), or function code (`Call*`).
    pub value: u32,
    /// Emit this node inline, before visiting siblings, when serializing.
    pub print_now: bool,
    /// Child slots; `None` holes are pre-allocated space.
    pub children: Vec<Option<NodeId>>,
}

impl NlNode {
    pub fn new(op: NlOp, nchildren: usize) -> NlNode {
        NlNode {
            op,
            oparg: OpArg::Unset,
            value: 0,
            print_now: false,
            children: vec![None; nchildren],
        }
    }

    pub fn var(vi: Idx) -> NlNode {
        let mut n = NlNode::new(NlOp::Var, 0);
        n.value = vi.idx() as u32;
        n
    }

    pub fn cst(pool_idx: PoolIdx) -> NlNode {
        let mut n = NlNode::new(NlOp::Cst, 0);
        n.value = pool_idx;
        n
    }

    /// The variable index of a `Var` node.
    pub fn var_idx(&self) -> Idx {
        debug_assert_eq!(self.op, NlOp::Var);
        Idx::new(self.value as usize)
    }

    /// True for leaves (constants and variables).
    pub fn is_leaf(&self) -> bool {
        matches!(self.op, NlOp::Cst | NlOp::Var)
    }

    /// Effective operand count: explicit non-hole children plus the fused
    /// operand, if any.
    pub fn count_operands(&self) -> usize {
        let implicit = usize::from(!matches!(self.oparg, OpArg::Unset));
        implicit + self.children.iter().flatten().count()
    }

    /// Iterator over the explicit (non-hole) children.
    pub fn live_children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.children.iter().filter_map(|c| *c)
    }

    /// Structural sanity of the child count for this node kind.
    pub fn chk_children(&self) -> CoreResult<()> {
        let live = self.children.iter().flatten().count();
        let ok = match self.op {
            NlOp::Cst | NlOp::Var => live == 0,
            NlOp::Umin => match self.oparg {
                OpArg::Var(_) => live == 0,
                _ => live == 1,
            },
            NlOp::Call1 => live == 1,
            NlOp::Call2 => live == 2,
            NlOp::CallN => live >= 3,
            // arithmetic nodes are checked against their operand count
            NlOp::Add | NlOp::Sub | NlOp::Mul | NlOp::Div => self.count_operands() >= 1,
        };
        if ok {
            Ok(())
        } else {
            Err(CoreError::InvalidValue(format!(
                "node {:?} has {live} children",
                self.op
            )))
        }
    }
}

/// Function codes, numbered like the GAMS intrinsic table so bytecode
/// arguments pass through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum NlFunc {
    Ceil = 1,
    Floor = 2,
    Round = 3,
    Mod = 4,
    Trunc = 5,
    Sign = 6,
    Min = 7,
    Max = 8,
    Sqr = 9,
    Exp = 10,
    Log = 11,
    Log10 = 12,
    Sqrt = 13,
    Abs = 14,
    Cos = 15,
    Sin = 16,
    Arctan = 17,
    Power = 21,
    Pi = 45,
    Entropy = 48,
    Sigmoid = 49,
    Log2 = 50,
    Rpower = 64,
    Cvpower = 74,
    Vcpower = 75,
    Sinh = 86,
    Cosh = 87,
    Tanh = 88,
    Signpower = 92,
    Tan = 100,
    Arccos = 101,
    Arcsin = 102,
    Arctan2 = 103,
}

impl NlFunc {
    pub fn from_raw(raw: u32) -> CoreResult<NlFunc> {
        use NlFunc::*;
        Ok(match raw {
            1 => Ceil,
            2 => Floor,
            3 => Round,
            4 => Mod,
            5 => Trunc,
            6 => Sign,
            7 => Min,
            8 => Max,
            9 => Sqr,
            10 => Exp,
            11 => Log,
            12 => Log10,
            13 => Sqrt,
            14 => Abs,
            15 => Cos,
            16 => Sin,
            17 => Arctan,
            21 => Power,
            45 => Pi,
            48 => Entropy,
            49 => Sigmoid,
            50 => Log2,
            64 => Rpower,
            74 => Cvpower,
            75 => Vcpower,
            86 => Sinh,
            87 => Cosh,
            88 => Tanh,
            92 => Signpower,
            100 => Tan,
            101 => Arccos,
            102 => Arcsin,
            103 => Arctan2,
            _ => {
                return Err(CoreError::InvalidOpCode(format!(
                    "unknown function code {raw}"
                )))
            }
        })
    }

    pub fn name(self) -> &'static str {
        use NlFunc::*;
        match self {
            Ceil => "ceil",
            Floor => "floor",
            Round => "round",
            Mod => "mod",
            Trunc => "trunc",
            Sign => "sign",
            Min => "min",
            Max => "max",
            Sqr => "sqr",
            Exp => "exp",
            Log => "log",
            Log10 => "log10",
            Sqrt => "sqrt",
            Abs => "abs",
            Cos => "cos",
            Sin => "sin",
            Arctan => "arctan",
            Power => "power",
            Pi => "pi",
            Entropy => "entropy",
            Sigmoid => "sigmoid",
            Log2 => "log2",
            Rpower => "rpower",
            Cvpower => "cvpower",
            Vcpower => "vcpower",
            Sinh => "sinh",
            Cosh => "cosh",
            Tanh => "tanh",
            Signpower => "signpower",
            Tan => "tan",
            Arccos => "arccos",
            Arcsin => "arcsin",
            Arctan2 => "arctan2",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_shape() {
        let v = NlNode::var(Idx::new(3));
        assert!(v.is_leaf());
        assert_eq!(v.var_idx(), Idx::new(3));
        v.chk_children().unwrap();

        let mut bad = NlNode::var(Idx::new(0));
        bad.children.push(Some(NodeId(0)));
        assert!(bad.chk_children().is_err());
    }

    #[test]
    fn test_count_operands() {
        let mut add = NlNode::new(NlOp::Add, 3);
        add.children[0] = Some(NodeId(1));
        add.oparg = OpArg::Cst(2);
        assert_eq!(add.count_operands(), 2);
    }

    #[test]
    fn test_func_roundtrip() {
        assert_eq!(NlFunc::from_raw(9).unwrap(), NlFunc::Sqr);
        assert_eq!(NlFunc::Sqr as u32, 9);
        assert!(NlFunc::from_raw(999).is_err());
    }

    #[test]
    fn test_fused_umin_shape() {
        let mut um = NlNode::new(NlOp::Umin, 0);
        um.oparg = OpArg::Var(Idx::new(2));
        um.chk_children().unwrap();
    }
}
