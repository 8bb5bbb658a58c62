use crate::ir::ast::*;
use crate::parfor_compile_error;
use crate::utils::err::*;
use crate::utils::info::*;
use crate::utils::name::Name;

use std::collections::BTreeMap;

// A variable accumulated by every iteration of a parallel loop through a combining operator.
#[derive(Clone, Debug, PartialEq)]
pub struct Reduction {
    pub var: Name,
    pub op: BinOp,
    pub ty: Type,

    // Bound to a partial result before the reduce nodes are replayed.
    pub init_var: Name,

    // Instructions combining the value of init_var into var. The last of them assigns to var.
    pub nodes: Vec<Inst>,
}

impl Reduction {
    pub fn is_scalar(&self) -> bool {
        !self.ty.is_array()
    }

    pub fn elem_size(&self, i: &Info) -> CompileResult<ElemSize> {
        match self.ty.elem_size() {
            Some(sz) => Ok(sz),
            None => parfor_compile_error!(i, "Reduction variable {0} has unsupported type {1}",
                                          self.var, self.ty)
        }
    }

    // The type of the per-group partial buffers, which have an additional leading dimension.
    pub fn partial_type(&self, i: &Info) -> CompileResult<Type> {
        let sz = self.elem_size(i)?;
        Ok(Type::array(sz, 1 + self.ty.ndim()))
    }

    // The number of leading dimensions stripped from the shape signature of the partial buffer.
    pub fn signature_start_dim(&self) -> usize {
        if self.is_scalar() { 1 } else { 0 }
    }
}

pub fn is_supported_operator(op: BinOp) -> bool {
    matches!(op, BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Max | BinOp::Min)
}

fn is_commutative(op: BinOp) -> bool {
    matches!(op, BinOp::Add | BinOp::Mul | BinOp::Max | BinOp::Min)
}

// The operator used when combining partial results. A subtraction accumulates the negated sum of
// its operands, so partial results are added, and similarly for division and multiplication.
pub fn combine_operator(op: BinOp) -> BinOp {
    match op {
        BinOp::Sub => BinOp::Add,
        BinOp::Div | BinOp::FloorDiv => BinOp::Mul,
        op => op
    }
}

// The value every work-item starts accumulating from.
pub fn neutral_element(op: BinOp, sz: ElemSize, i: &Info) -> CompileResult<Const> {
    let is_float = sz.is_floating_point();
    if sz == ElemSize::Bool {
        return parfor_compile_error!(i, "Reductions over boolean values are not supported");
    }
    let (min, max) = match sz {
        ElemSize::I8 => (i8::MIN as i64, i8::MAX as i64),
        ElemSize::I16 => (i16::MIN as i64, i16::MAX as i64),
        ElemSize::I32 => (i32::MIN as i64, i32::MAX as i64),
        ElemSize::U8 | ElemSize::U16 | ElemSize::U32 | ElemSize::U64 => (0, -1),
        _ => (i64::MIN, i64::MAX),
    };
    match op {
        BinOp::Add | BinOp::Sub if is_float => Ok(Const::Float(0.0)),
        BinOp::Add | BinOp::Sub => Ok(Const::Int(0)),
        BinOp::Mul | BinOp::Div if is_float => Ok(Const::Float(1.0)),
        BinOp::Mul | BinOp::Div => Ok(Const::Int(1)),
        BinOp::Max if is_float => Ok(Const::Float(f64::NEG_INFINITY)),
        BinOp::Max => Ok(Const::Int(min)),
        BinOp::Min if is_float => Ok(Const::Float(f64::INFINITY)),
        BinOp::Min => Ok(Const::Int(max)),
        _ => parfor_compile_error!(i, "Unsupported reduction operator {op}")
    }
}

// Rewrites the in-place operations of the reduce nodes that combine the partial value bound to
// init_var. The operator is replaced by its combining operator and the signature is updated so
// that both operands have the type of the reduction variable.
pub fn substitute_operator(nodes: Vec<Inst>, init_var: &Name, ty: &Type) -> Vec<Inst> {
    nodes.into_iter()
        .map(|inst| match inst {
            Inst::Assign {target, value: Expr::InplaceBinOp {op, lhs, rhs, sig}, i}
                    if &rhs == init_var => {
                let sig = match sig {
                    Some(Signature {args, ret}) if args.len() == 2 => {
                        Signature {args: vec![args[0].clone(), ty.clone()], ret}
                    },
                    _ => Signature {args: vec![ty.clone(), ty.clone()], ret: ty.clone()}
                };
                let value = Expr::InplaceBinOp {
                    op: combine_operator(op), lhs, rhs, sig: Some(sig)
                };
                Inst::Assign {target, value, i}
            },
            inst => inst
        })
        .collect()
}

// The reduce nodes up to and including the first assignment to the reduction variable.
pub fn nodes_until_assignment(nodes: &[Inst], var: &Name) -> Vec<Inst> {
    let mut out = vec![];
    for inst in nodes {
        out.push(inst.clone());
        if inst.defined_var() == Some(var) {
            break;
        }
    }
    out
}

fn accumulation_operator(value: &Expr, var: &Name) -> Option<(BinOp, Name)> {
    match value {
        Expr::InplaceBinOp {op, lhs, rhs, ..} if lhs == var => Some((*op, rhs.clone())),
        Expr::BinOp {op, lhs, rhs} if lhs == var => Some((*op, rhs.clone())),
        Expr::BinOp {op, lhs, rhs} if rhs == var && is_commutative(*op) => {
            Some((*op, lhs.clone()))
        },
        _ => None
    }
}

// Determines the operator through which the given assignment accumulates into var. The value is
// either an operation with var as an operand or a variable defined by such an operation.
fn reduction_operator(
    value: &Expr,
    var: &Name,
    defs: &BTreeMap<Name, &Expr>
) -> Option<(BinOp, Name)> {
    match value {
        Expr::Var {id} => defs.get(id).and_then(|e| accumulation_operator(e, var)),
        _ => accumulation_operator(value, var)
    }
}

// Attempts to interpret all assignments to a parameter as a reduction. Returns None if any of the
// assignments is not an accumulation, and fails if the accumulations use an unsupported operator
// or different operators.
pub fn detect_reduction(
    var: &Name,
    assignments: &[&Inst],
    defs: &BTreeMap<Name, &Expr>,
    typemap: &TypeMap,
    i: &Info
) -> CompileResult<Option<Reduction>> {
    let ops = assignments.iter()
        .map(|inst| match inst {
            Inst::Assign {value, ..} => reduction_operator(value, var, defs),
            _ => None
        })
        .collect::<Option<Vec<(BinOp, Name)>>>();
    let ops = match ops {
        Some(ops) if !ops.is_empty() => ops,
        _ => return Ok(None)
    };
    let (op, operand) = ops[0].clone();
    if ops.iter().any(|(o, _)| *o != op) {
        parfor_compile_error!(i, "Reduction variable {var} is updated using different operators")?
    }
    if !is_supported_operator(op) {
        parfor_compile_error!(i, "Unsupported reduction operator {op} for variable {var}")?
    }
    let ty = match typemap.get(var) {
        Some(ty) => ty.clone(),
        None => parfor_compile_error!(i, "Missing type of reduction variable {var}")?
    };
    let operand_ty = typemap.get(&operand).cloned().unwrap_or(ty.clone());
    let init_var = var.derive("#init");
    let sig = Signature {args: vec![ty.clone(), operand_ty], ret: ty.clone()};
    let value = Expr::InplaceBinOp {op, lhs: var.clone(), rhs: init_var.clone(), sig: Some(sig)};
    let nodes = vec![Inst::assign(var.clone(), value, i)];
    Ok(Some(Reduction {var: var.clone(), op, ty, init_var, nodes}))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;
    use crate::test::*;

    fn detect(insts: Vec<Inst>, var: &str, tm: TypeMap) -> CompileResult<Option<Reduction>> {
        let defs = insts.iter()
            .filter_map(|inst| match inst {
                Inst::Assign {target, value, ..} => Some((target.clone(), value)),
                _ => None
            })
            .collect::<BTreeMap<Name, &Expr>>();
        let assigns = insts.iter()
            .filter(|inst| inst.defined_var() == Some(&id(var)))
            .collect::<Vec<&Inst>>();
        detect_reduction(&id(var), &assigns, &defs, &tm, &i())
    }

    #[test]
    fn detects_inplace_sum() {
        let insts = vec![assign("s", inplace_expr(BinOp::Add, "s", "x"))];
        let r = detect(insts, "s", typemap(vec![("s", float64()), ("x", float64())]))
            .unwrap()
            .unwrap();
        assert_eq!(r.op, BinOp::Add);
        assert!(r.is_scalar());
        assert_eq!(r.nodes.len(), 1);
        assert_eq!(r.signature_start_dim(), 1);
    }

    #[test]
    fn detects_product_through_temporary() {
        let insts = vec![
            assign("t", binop_expr(BinOp::Mul, "x", "p")),
            assign("p", var_expr("t"))
        ];
        let r = detect(insts, "p", typemap(vec![("p", int64())])).unwrap().unwrap();
        assert_eq!(r.op, BinOp::Mul);
    }

    #[test]
    fn non_commutative_operand_order_is_not_a_reduction() {
        let insts = vec![assign("s", binop_expr(BinOp::Sub, "x", "s"))];
        assert_eq!(detect(insts, "s", typemap(vec![("s", int64())])), Ok(None));
    }

    #[test]
    fn unsupported_operator_fails() {
        let insts = vec![assign("s", binop_expr(BinOp::Pow, "s", "x"))];
        let r = detect(insts, "s", typemap(vec![("s", int64())]));
        assert_error_matches(r, r"Unsupported reduction operator");
    }

    #[test]
    fn mixed_operators_fail() {
        let insts = vec![
            assign("s", binop_expr(BinOp::Add, "s", "x")),
            assign("s", binop_expr(BinOp::Mul, "s", "x"))
        ];
        let r = detect(insts, "s", typemap(vec![("s", int64())]));
        assert_error_matches(r, r"different operators");
    }

    #[test]
    fn substitution_of_subtraction_and_division() {
        assert_eq!(combine_operator(BinOp::Sub), BinOp::Add);
        assert_eq!(combine_operator(BinOp::Div), BinOp::Mul);
        assert_eq!(combine_operator(BinOp::Max), BinOp::Max);
        let init = id("s#init");
        let nodes = vec![Inst::assign(id("s"), Expr::InplaceBinOp {
            op: BinOp::Sub, lhs: id("s"), rhs: init.clone(), sig: None
        }, &i())];
        let nodes = substitute_operator(nodes, &init, &float64());
        match &nodes[0] {
            Inst::Assign {value: Expr::InplaceBinOp {op, sig: Some(sig), ..}, ..} => {
                assert_eq!(*op, BinOp::Add);
                assert_eq!(sig.args[1], float64());
            },
            inst => panic!("Unexpected reduce node {inst:?}")
        }
    }

    #[test]
    fn neutral_elements() {
        assert_eq!(neutral_element(BinOp::Add, ElemSize::F64, &i()), Ok(Const::Float(0.0)));
        assert_eq!(neutral_element(BinOp::Div, ElemSize::I32, &i()), Ok(Const::Int(1)));
        assert_eq!(neutral_element(BinOp::Max, ElemSize::I8, &i()), Ok(Const::Int(-128)));
        assert_eq!(neutral_element(BinOp::Min, ElemSize::F32, &i()), Ok(Const::Float(f64::INFINITY)));
        assert_error_matches(neutral_element(BinOp::Add, ElemSize::Bool, &i()), r"boolean");
    }

    #[test]
    fn replay_stops_at_assignment() {
        let nodes = vec![
            assign("t", var_expr("s#init")),
            assign("s", inplace_expr(BinOp::Add, "s", "t")),
            assign("u", const_int(0))
        ];
        assert_eq!(nodes_until_assignment(&nodes, &id("s")).len(), 2);
    }
}
