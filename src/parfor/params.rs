use super::reduction::{self, Reduction};
use crate::ir::ast::*;
use crate::parfor_compile_error;
use crate::utils::err::*;
use crate::utils::name::Name;

use std::collections::{BTreeMap, BTreeSet};

// The parameters of a parallel loop, partitioned by how the loop uses them.
#[derive(Clone, Debug, PartialEq)]
pub struct ParamClasses {
    pub inputs: Vec<Name>,
    pub outputs: Vec<Name>,
    pub reductions: Vec<Reduction>,
    pub races: BTreeSet<Name>,
}

impl ParamClasses {
    pub fn has_reductions(&self) -> bool {
        !self.reductions.is_empty()
    }

    pub fn reduction_vars(&self) -> Vec<Name> {
        self.reductions.iter().map(|r| r.var.clone()).collect()
    }
}

// Collects the instructions of a block graph, including those of parfors nested within it.
pub fn all_insts<'a>(blocks: &'a Blocks, arena: &'a ParforArena) -> Vec<&'a Inst> {
    let mut out = vec![];
    let mut visited = BTreeSet::new();
    for b in blocks.values() {
        collect_insts(&b.body, arena, &mut visited, &mut out);
    }
    out
}

fn collect_insts<'a>(
    insts: &'a [Inst],
    arena: &'a ParforArena,
    visited: &mut BTreeSet<ParforId>,
    out: &mut Vec<&'a Inst>
) {
    for inst in insts {
        out.push(inst);
        if let Inst::Parfor {id, ..} = inst {
            if let Some(p) = arena.get(*id) {
                if visited.insert(*id) {
                    collect_insts(&p.init_block.body, arena, visited, out);
                    for b in p.loop_body.values() {
                        collect_insts(&b.body, arena, visited, out);
                    }
                }
            }
        }
    }
}

// The parameters of the loop together with the variables used in its bounds.
pub fn loop_params(p: &Parfor) -> BTreeSet<Name> {
    let mut params = p.params.clone();
    for nest in &p.loop_nests {
        for op in [&nest.start, &nest.stop] {
            if let Operand::Var {id} = op {
                params.insert(id.clone());
            }
        }
    }
    params
}

// The arrays stored into by an indexed store anywhere in the loop.
pub fn stored_arrays(body: &Blocks, arena: &ParforArena) -> BTreeSet<Name> {
    all_insts(body, arena).into_iter()
        .filter_map(|inst| match inst {
            Inst::SetItem {target, ..} | Inst::SetRow {target, ..} => Some(target.clone()),
            _ => None
        })
        .collect()
}

// Partitions the parameters of a parfor into inputs, outputs and reduction variables. Parameters
// assigned in the loop body without a combining operator are races; they are included among the
// outputs as they are converted to arrays written by the loop.
pub fn classify(
    p: &Parfor,
    arena: &ParforArena,
    typemap: &TypeMap
) -> CompileResult<ParamClasses> {
    let params = loop_params(p);
    let insts = all_insts(&p.loop_body, arena);
    let defs = insts.iter()
        .filter_map(|inst| match inst {
            Inst::Assign {target, value, ..} => Some((target.clone(), value)),
            _ => None
        })
        .collect::<BTreeMap<Name, &Expr>>();

    let mut reductions = vec![];
    let mut races = p.races.clone();
    for param in &params {
        let assignments = insts.iter()
            .filter(|inst| inst.defined_var() == Some(param))
            .copied()
            .collect::<Vec<&Inst>>();
        if assignments.is_empty() || p.races.contains(param) {
            continue;
        }
        match reduction::detect_reduction(param, &assignments, &defs, typemap, &p.i)? {
            Some(r) => reductions.push(r),
            None => {
                races.insert(param.clone());
            }
        }
    }
    if !reductions.is_empty() && p.ndims() > 1 {
        parfor_compile_error!(p.i, "Reductions are only supported in one-dimensional \
                                    parallel loops")?
    }

    let redvars = reductions.iter().map(|r| r.var.clone()).collect::<BTreeSet<Name>>();
    let races = races.difference(&redvars).cloned().collect::<BTreeSet<Name>>();
    let stored = stored_arrays(&p.loop_body, arena);
    let outputs = params.iter()
        .filter(|id| !redvars.contains(id))
        .filter(|id| races.contains(id) || stored.contains(id))
        .cloned()
        .collect::<Vec<Name>>();
    let inputs = params.iter()
        .filter(|id| !redvars.contains(id) && !outputs.contains(id))
        .cloned()
        .collect::<Vec<Name>>();
    Ok(ParamClasses {inputs, outputs, reductions, races})
}

// All loop dimensions must share one index type.
pub fn index_type(p: &Parfor, typemap: &TypeMap) -> CompileResult<Type> {
    let default_ty = Type::Scalar {sz: ElemSize::I64};
    let types = p.loop_nests.iter()
        .map(|nest| typemap.get(&nest.index_variable).cloned().unwrap_or(default_ty.clone()))
        .collect::<Vec<Type>>();
    match types.split_first() {
        Some((fst, rest)) => {
            if let Some(ty) = rest.iter().find(|ty| *ty != fst) {
                parfor_compile_error!(p.i, "Loop indices of a parallel loop must have the same \
                                            type, found {fst} and {ty}")
            } else {
                Ok(fst.clone())
            }
        },
        None => parfor_compile_error!(p.i, "Parallel loop without any loop dimensions")
    }
}

pub fn check_unit_steps(p: &Parfor) -> CompileResult<()> {
    match p.loop_nests.iter().find(|nest| nest.step != 1) {
        Some(nest) => {
            parfor_compile_error!(p.i, "Parallel loop over {0} has step size {1}, but only a step \
                                        size of 1 is supported", nest.index_variable, nest.step)
        },
        None => Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;
    use crate::test::*;

    fn vec_body() -> Blocks {
        blocks(vec![(0, vec![
            assign("x", getitem_expr("a", "i")),
            assign("y", binop_expr(BinOp::Mul, "x", "c")),
            setitem("b", "i", "y"),
            assign("s", inplace_expr(BinOp::Add, "s", "y"))
        ])])
    }

    fn vec_types() -> TypeMap {
        typemap(vec![
            ("a", array(ElemSize::F64, 1)),
            ("b", array(ElemSize::F64, 1)),
            ("c", float64()),
            ("s", float64()),
            ("n", int64()),
            ("i", int64()),
        ])
    }

    #[test]
    fn classify_inputs_outputs_and_reductions() {
        let p = parfor(vec![loop_nest("i", const_op(0), var_op("n"))], vec_body(), &["a", "b", "c", "s"]);
        let classes = classify(&p, &ParforArena::new(), &vec_types()).unwrap();
        assert_eq!(classes.inputs, vec![id("a"), id("c"), id("n")]);
        assert_eq!(classes.outputs, vec![id("b")]);
        assert_eq!(classes.reduction_vars(), vec![id("s")]);
        assert!(classes.races.is_empty());
    }

    #[test]
    fn plain_assignment_of_parameter_is_a_race() {
        let body = blocks(vec![(0, vec![assign("last", var_expr("i"))])]);
        let p = parfor(vec![loop_nest("i", const_op(0), const_op(10))], body, &["last"]);
        let classes = classify(&p, &ParforArena::new(), &typemap(vec![("last", int64())])).unwrap();
        assert_eq!(classes.races, names(&["last"]));
        assert_eq!(classes.outputs, vec![id("last")]);
        assert!(classes.inputs.is_empty());
    }

    #[test]
    fn stores_in_nested_parfor_are_outputs() {
        let mut arena = ParforArena::new();
        let inner = parfor(
            vec![loop_nest("j", const_op(0), const_op(4))],
            blocks(vec![(0, vec![setitem("m", "j", "v")])]),
            &["m", "v"]
        );
        let inner_id = arena.push(inner);
        let outer = parfor(
            vec![loop_nest("i", const_op(0), const_op(4))],
            blocks(vec![(0, vec![parfor_inst(inner_id)])]),
            &["m", "v"]
        );
        let classes = classify(&outer, &arena, &TypeMap::new()).unwrap();
        assert_eq!(classes.outputs, vec![id("m")]);
        assert_eq!(classes.inputs, vec![id("v")]);
    }

    #[test]
    fn instructions_of_doubly_nested_parfors_are_collected() {
        let mut arena = ParforArena::new();
        let innermost = parfor(
            vec![loop_nest("k", const_op(0), const_op(2))],
            blocks(vec![(0, vec![setitem("m", "k", "v")])]),
            &["m", "v"]
        );
        let innermost_id = arena.push(innermost);
        let inner = parfor(
            vec![loop_nest("j", const_op(0), const_op(2))],
            blocks(vec![(0, vec![assign("x", var_expr("j")), parfor_inst(innermost_id)])]),
            &["m", "v"]
        );
        let inner_id = arena.push(inner);
        let body = blocks(vec![(0, vec![parfor_inst(inner_id)])]);
        assert_eq!(all_insts(&body, &arena).len(), 4);
        assert_eq!(stored_arrays(&body, &arena), names(&["m"]));
    }

    #[test]
    fn reduction_in_two_dimensional_loop_fails() {
        let body = blocks(vec![(0, vec![assign("s", inplace_expr(BinOp::Add, "s", "i"))])]);
        let p = parfor(
            vec![loop_nest("i", const_op(0), const_op(4)), loop_nest("j", const_op(0), const_op(4))],
            body,
            &["s"]
        );
        let r = classify(&p, &ParforArena::new(), &typemap(vec![("s", int64())]));
        assert_error_matches(r, r"one-dimensional");
    }

    #[test]
    fn index_type_mismatch_fails() {
        let p = parfor(
            vec![loop_nest("i", const_op(0), const_op(4)), loop_nest("j", const_op(0), const_op(4))],
            blocks(vec![(0, vec![])]),
            &[]
        );
        let tm = typemap(vec![("i", int64()), ("j", scalar(ElemSize::I32))]);
        assert_error_matches(index_type(&p, &tm), r"same type");
    }

    #[test]
    fn non_unit_step_fails() {
        let mut nest = loop_nest("i", const_op(0), const_op(4));
        nest.step = 2;
        let p = parfor(vec![nest], blocks(vec![(0, vec![])]), &[]);
        assert_error_matches(check_unit_steps(&p), r"step size of 1");
    }
}
