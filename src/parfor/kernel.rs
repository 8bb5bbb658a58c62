use super::driver::{self, DriverReduction};
use super::effects::CallEffects;
use super::graph;
use super::hoist::{self, HoistInfo};
use super::legalize;
use super::params::{self, ParamClasses};
use super::races;
use super::reduction::{self, Reduction};
use crate::ir::ast::*;
use crate::ir::blocks;
use crate::ir::dce;
use crate::ir::rename::{self, RenameMap};
use crate::parfor_compile_error;
use crate::parfor_internal_error;
use crate::utils::debug::*;
use crate::utils::err::*;
use crate::utils::info::*;
use crate::utils::name::Name;
use crate::utils::smap::SFold;

use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArgRole {
    Input,
    Output,

    // The initial value of a reduction accumulator in each work-item.
    Reduction,

    // Group-local memory used to combine the accumulators of a work-group.
    Scratch,

    // One slot per work-group holding the combined value of the group.
    Partial,
}

// A kernel parameter and the host variable passed for it.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelArg {
    // The variable of the parallel loop the argument originates from.
    pub orig: Name,
    pub host: Name,
    pub param: Name,
    pub ty: Type,
    pub role: ArgRole,
}

impl KernelArg {
    pub fn is_written(&self) -> bool {
        matches!(self.role, ArgRole::Output | ArgRole::Partial)
    }
}

#[derive(Clone, Debug)]
pub struct SynthesizedKernel {
    pub kernel: KernelFunction,
    pub args: Vec<KernelArg>,
    pub classes: ParamClasses,
    pub hoist_info: HoistInfo,
}

impl SynthesizedKernel {
    pub fn num_inouts(&self) -> usize {
        self.classes.inputs.len() + self.classes.outputs.len()
    }
}

fn unused_name(base: &str, taken: &BTreeSet<Name>) -> Name {
    let mut candidate = Name::new(base.to_string());
    let mut count = 1;
    while taken.contains(&candidate) {
        candidate = Name::new(format!("{base}{count}"));
        count += 1;
    }
    candidate
}

fn names_of(body: &Blocks, arena: &ParforArena) -> BTreeSet<Name> {
    params::all_insts(body, arena).into_iter()
        .fold(BTreeSet::new(), |mut acc, inst| {
            acc = inst.sfold(acc, |mut acc, id| { acc.insert(id.clone()); acc });
            if let Some(id) = inst.defined_var() {
                acc.insert(id.clone());
            }
            acc
        })
}

fn param_type(id: &Name, typemap: &TypeMap, i: &Info) -> CompileResult<Type> {
    match typemap.get(id) {
        Some(ty) => Ok(ty.clone()),
        None => parfor_compile_error!(i, "Missing type of parallel loop parameter {id}")
    }
}

fn with_addrspace(ty: Type, mem: AddrSpace) -> Type {
    if ty.is_array() { ty.with_addrspace(mem) } else { ty }
}

// Lists the kernel arguments in the order inputs, outputs, reduction variables, scratch buffers,
// and partial buffers.
fn kernel_args(
    classes: &ParamClasses,
    typemap: &TypeMap,
    i: &Info
) -> CompileResult<Vec<KernelArg>> {
    let mut args = vec![];
    for (ids, role) in [(&classes.inputs, ArgRole::Input), (&classes.outputs, ArgRole::Output)] {
        for id in ids {
            let host = if classes.races.contains(id) { id.derive("_box") } else { id.clone() };
            let ty = with_addrspace(param_type(id, typemap, i)?, AddrSpace::Global);
            args.push(KernelArg {orig: id.clone(), host, param: id.clone(), ty, role});
        }
    }
    for r in &classes.reductions {
        let ty = with_addrspace(r.ty.clone(), AddrSpace::Generic);
        let host = r.var.derive("_neutral");
        args.push(KernelArg {orig: r.var.clone(), host, param: r.var.clone(), ty, role: ArgRole::Reduction});
    }
    for r in &classes.reductions {
        let ty = r.partial_type(i)?.with_addrspace(AddrSpace::Local);
        let id = Name::new(format!("{0}_local_arr", r.var));
        args.push(KernelArg {orig: r.var.clone(), host: id.clone(), param: id, ty, role: ArgRole::Scratch});
    }
    for r in &classes.reductions {
        let ty = r.partial_type(i)?.with_addrspace(AddrSpace::Global);
        let id = Name::new(format!("{0}_arr", r.var));
        args.push(KernelArg {orig: r.var.clone(), host: r.var.derive("_arr"), param: id, ty, role: ArgRole::Partial});
    }
    Ok(args)
}

fn find_param<'a>(args: &'a [KernelArg], r: &Reduction, role: ArgRole) -> Option<&'a Name> {
    args.iter()
        .find(|a| a.orig == r.var && a.role == role)
        .map(|a| &a.param)
}

// Builds the code combining the scratch slot of the work-item with the slot offset positions
// ahead, by replaying the reduce nodes of each reduction variable.
fn combine_block(
    classes: &ParamClasses,
    args: &[KernelArg],
    tnum: &Name,
    offset: &Name,
    typemap: &mut TypeMap,
    i: &Info
) -> CompileResult<Block> {
    let mut body = vec![];
    let other = Name::sym_str("gufunc_other_slot");
    typemap.insert(other.clone(), Type::Scalar {sz: ElemSize::I64});
    body.push(Inst::assign(other.clone(), Expr::BinOp {
        op: BinOp::Add, lhs: tnum.clone(), rhs: offset.clone()
    }, i));
    for r in &classes.reductions {
        let (var, scratch) = match (find_param(args, r, ArgRole::Reduction), find_param(args, r, ArgRole::Scratch)) {
            (Some(var), Some(scratch)) => (var.clone(), scratch.clone()),
            _ => parfor_internal_error!(i, "Missing kernel parameters of reduction {0}", r.var)?
        };
        typemap.insert(r.init_var.clone(), r.ty.clone());
        body.push(Inst::assign(r.init_var.clone(), graph::load(&scratch, &other, r.is_scalar()), i));
        body.push(Inst::assign(var.clone(), graph::load(&scratch, tnum, r.is_scalar()), i));
        let map = RenameMap::from([(r.var.clone(), var.clone())]);
        let nodes = reduction::substitute_operator(r.nodes.clone(), &r.init_var, &r.ty);
        body.extend(reduction::nodes_until_assignment(&nodes, &r.var).into_iter()
            .map(|inst| rename::rename_inst(inst, &map)));
        body.push(graph::store(&scratch, tnum, &var, r.is_scalar(), i));
    }
    Ok(Block::new(body))
}

fn splice_at_marker(
    graph: &mut Blocks,
    marker: &Name,
    body: Blocks,
    i: &Info
) -> CompileResult<()> {
    let ofs = blocks::max_label(graph).map(|l| l + 1).unwrap_or(0);
    let body = blocks::offset_labels(body, ofs);
    let after = blocks::max_label(&body).map(|l| l + 1).unwrap_or(ofs);
    match blocks::find_assignment(graph, marker) {
        Some(at) => blocks::splice_at(graph, at, body, after, i),
        None => parfor_internal_error!(i, "Could not find the insertion marker {marker} in the \
                                           kernel driver")
    }
}

fn remove_dels(body: Blocks) -> Blocks {
    body.into_iter()
        .map(|(l, b)| {
            let body = b.body.into_iter()
                .filter(|inst| !matches!(inst, Inst::Del {..}))
                .collect();
            (l, Block::new(body))
        })
        .collect()
}

// Synthesizes the kernel executed by every work-item of a parallel loop. The kernel consists of
// the driver code computing the loop indices of the work-item and combining reductions, into which
// the loop body is inserted, preceded by the loop-invariant instructions hoisted out of the body.
pub fn synthesize(
    p: &Parfor,
    arena: &ParforArena,
    typemap: &TypeMap,
    effects: &CallEffects,
    id: Name,
    debug_env: &DebugEnv
) -> CompileResult<SynthesizedKernel> {
    params::check_unit_steps(p)?;
    let index_ty = params::index_type(p, typemap)?;
    let classes = params::classify(p, arena, typemap)?;

    let mut arena = arena.clone();
    let mut tm = typemap.clone();
    let body = remove_dels(p.loop_body.clone());
    let body = races::box_race_variables(body, &classes.races, &mut arena, &mut tm, &p.i)?;
    let args = kernel_args(&classes, &tm, &p.i)?;

    // Legalize the names of the parameters and the loop indices.
    let indices = p.loop_nests.iter()
        .map(|nest| nest.index_variable.clone())
        .collect::<Vec<Name>>();
    let mut to_legalize = args.iter().map(|a| a.param.clone()).collect::<Vec<Name>>();
    to_legalize.extend(indices.iter().cloned());
    let taken = names_of(&body, &arena);
    let legal = legalize::legalize_names(&to_legalize, &taken);
    legalize::legalize_types(&legal, &mut tm);
    for a in &args {
        if let Some(new) = legal.get(&a.param) {
            tm.insert(new.clone(), a.ty.clone());
        }
    }
    let lookup = |id: &Name| legal.get(id).cloned().unwrap_or(id.clone());
    let args = args.into_iter()
        .map(|a| KernelArg {param: lookup(&a.param), ..a})
        .collect::<Vec<KernelArg>>();
    let legal_indices = indices.iter().map(lookup).collect::<Vec<Name>>();
    let body = rename::rename_with_nested(body, &mut arena, &legal);

    // Hoist loop-invariant instructions out of the body.
    let param_names = args.iter()
        .map(|a| a.param.clone())
        .collect::<BTreeSet<Name>>();
    let (body, hoist_info) = hoist::hoist(&param_names, body, &mut arena, &tm, effects);

    // Build the driver and insert the loop body at its marker.
    let taken = names_of(&body, &arena);
    let sentinel = unused_name("__sentinel__", &taken);
    let reduction_sentinel = unused_name("__reduction_sentinel__", &taken);
    let driver_reductions = classes.reductions.iter()
        .map(|r| match (
            find_param(&args, r, ArgRole::Reduction),
            find_param(&args, r, ArgRole::Scratch),
            find_param(&args, r, ArgRole::Partial)
        ) {
            (Some(var), Some(scratch), Some(partial)) => Ok(DriverReduction {
                var: var.clone(),
                scratch: scratch.clone(),
                partial: partial.clone(),
                is_scalar: r.is_scalar()
            }),
            _ => parfor_internal_error!(p.i, "Missing kernel parameters of reduction {0}", r.var)
        })
        .collect::<CompileResult<Vec<DriverReduction>>>()?;
    let d = driver::build_driver(
        &legal_indices, &index_ty, &sentinel, &reduction_sentinel, &driver_reductions, &p.i
    );
    let mut reserved = param_names.clone();
    reserved.extend(legal_indices.iter().cloned());
    reserved.insert(sentinel.clone());
    reserved.insert(reduction_sentinel.clone());
    let d = driver::rename_internal(d, &reserved);
    tm.extend(d.typemap.clone());
    let mut graph = d.blocks;
    splice_at_marker(&mut graph, &sentinel, body, &p.i)?;
    if classes.has_reductions() {
        let combine = combine_block(&classes, &args, &d.tnum, &d.offset, &mut tm, &p.i)?;
        splice_at_marker(&mut graph, &reduction_sentinel, Blocks::from([(0, combine)]), &p.i)?;
    }

    // The hoisted instructions run before the index computations.
    let entry = match blocks::min_label(&graph) {
        Some(l) => l,
        None => parfor_internal_error!(p.i, "Empty kernel driver")?
    };
    if let Some(b) = graph.get_mut(&entry) {
        b.body.splice(0..0, hoist_info.hoisted.iter().cloned());
    }
    let graph = blocks::relabel_dense(graph, entry);
    blocks::ensure_terminated(&graph, &p.i)?;

    let params = args.iter().map(|a| a.param.clone()).collect::<Vec<Name>>();
    let param_types = args.iter().map(|a| a.ty.clone()).collect::<Vec<Type>>();
    let kernel = KernelFunction {
        id: id.clone(), params: params.clone(), param_types: param_types.clone(),
        blocks: graph, parfors: arena.clone(), typemap: tm.clone(), i: p.i.clone()
    };
    debug_env.print("Kernel after synthesis", &kernel);
    let roots = params.iter().cloned().collect::<BTreeSet<Name>>();
    let graph = dce::eliminate_dead_code(kernel.blocks, &roots, &arena);
    let kernel = KernelFunction {blocks: graph, ..kernel};
    debug_env.print("Kernel after dead code elimination", &kernel);
    Ok(SynthesizedKernel {kernel, args, classes, hoist_info})
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;
    use crate::option::CompileOptions;
    use crate::test::*;

    fn vec_scale() -> (Parfor, TypeMap) {
        let body = blocks(vec![(0, vec![
            assign("two", const_float(2.0)),
            assign("x", getitem_expr("a", "i")),
            assign("y", binop_expr(BinOp::Mul, "x", "two")),
            setitem("b", "i", "y")
        ])]);
        let p = parfor(vec![loop_nest("i", const_op(0), var_op("n"))], body, &["a", "b"]);
        let tm = typemap(vec![
            ("a", array(ElemSize::F64, 1)),
            ("b", array(ElemSize::F64, 1)),
            ("n", int64()),
            ("i", int64()),
            ("two", float64()),
            ("x", float64()),
            ("y", float64()),
        ]);
        (p, tm)
    }

    fn sum() -> (Parfor, TypeMap) {
        let body = blocks(vec![(0, vec![
            assign("x", getitem_expr("a", "i")),
            assign("s", inplace_expr(BinOp::Add, "s", "x"))
        ])]);
        let p = parfor(vec![loop_nest("i", const_op(0), var_op("n"))], body, &["a", "s"]);
        let tm = typemap(vec![
            ("a", array(ElemSize::F64, 1)),
            ("s", float64()),
            ("n", int64()),
            ("i", int64()),
            ("x", float64()),
        ]);
        (p, tm)
    }

    fn run_synthesize(p: &Parfor, tm: &TypeMap) -> CompileResult<SynthesizedKernel> {
        let opts = CompileOptions::default();
        synthesize(p, &ParforArena::new(), tm, &CallEffects::default(), id("k"), &DebugEnv::new(&opts))
    }

    #[test]
    fn parameters_are_ordered_by_role() {
        let (p, tm) = vec_scale();
        let k = run_synthesize(&p, &tm).unwrap();
        assert_eq!(k.kernel.params, vec![id("a"), id("n"), id("b")]);
        assert_eq!(k.kernel.addrspaces(), vec![Some(AddrSpace::Global), None, Some(AddrSpace::Global)]);
        assert_eq!(k.num_inouts(), 3);
    }

    #[test]
    fn hoisted_instruction_precedes_index_computation() {
        let (p, tm) = vec_scale();
        let k = run_synthesize(&p, &tm).unwrap();
        assert_eq!(k.hoist_info.hoisted, vec![assign("two", const_float(2.0))]);
        let entry = &k.kernel.blocks[&0].body;
        assert_eq!(entry[0], assign("two", const_float(2.0)));
        assert_eq!(entry[1], assign("i", Expr::WorkItem {func: WorkItemFn::GlobalId, dim: 0}));
    }

    #[test]
    fn sentinel_is_replaced_by_loop_body() {
        let (p, tm) = vec_scale();
        let k = run_synthesize(&p, &tm).unwrap();
        assert!(blocks::find_assignment(&k.kernel.blocks, &id("__sentinel__")).is_none());
        let has_store = k.kernel.blocks.values()
            .flat_map(|b| b.body.iter())
            .any(|inst| *inst == setitem("b", "i", "y"));
        assert!(has_store);
        assert!(k.kernel.blocks.values().all(|b| b.is_terminated()));
    }

    #[test]
    fn reduction_parameters_and_address_spaces() {
        let (p, tm) = sum();
        let k = run_synthesize(&p, &tm).unwrap();
        assert_eq!(k.kernel.params, vec![id("a"), id("n"), id("s"), id("s_local_arr"), id("s_arr")]);
        assert_eq!(k.kernel.addrspaces(), vec![
            Some(AddrSpace::Global), None, None, Some(AddrSpace::Local), Some(AddrSpace::Global)
        ]);
        let roles = k.args.iter().map(|a| a.role).collect::<Vec<ArgRole>>();
        assert_eq!(roles, vec![
            ArgRole::Input, ArgRole::Input, ArgRole::Reduction, ArgRole::Scratch, ArgRole::Partial
        ]);
    }

    #[test]
    fn reduction_kernel_has_paired_barriers() {
        let (p, tm) = sum();
        let k = run_synthesize(&p, &tm).unwrap();
        let barriers = k.kernel.blocks.values()
            .flat_map(|b| b.body.iter())
            .filter(|inst| matches!(inst, Inst::Barrier {..}))
            .count();
        assert_eq!(barriers, 2);
        let combines = k.kernel.blocks.values()
            .flat_map(|b| b.body.iter())
            .filter(|inst| matches!(inst, Inst::Assign {value: Expr::InplaceBinOp {op: BinOp::Add, ..}, ..}))
            .count();
        assert_eq!(combines, 2);
    }

    #[test]
    fn illegal_names_are_legalized() {
        let body = blocks(vec![(0, vec![
            assign("x", getitem_expr("a.1", "i.0")),
            setitem("b$2", "i.0", "x")
        ])]);
        let p = parfor(vec![loop_nest("i.0", const_op(0), const_op(8))], body, &["a.1", "b$2"]);
        let tm = typemap(vec![("a.1", array(ElemSize::I32, 1)), ("b$2", array(ElemSize::I32, 1))]);
        let k = run_synthesize(&p, &tm).unwrap();
        assert_eq!(k.kernel.params, vec![id("a_1"), id("b_2")]);
        assert_eq!(k.args[0].host, id("a.1"));
        assert_eq!(k.kernel.typemap.get(&id("a_1")), Some(&array(ElemSize::I32, 1).with_addrspace(AddrSpace::Global)));
        let entry = &k.kernel.blocks[&0].body;
        assert_eq!(entry[0], assign("i_0", Expr::WorkItem {func: WorkItemFn::GlobalId, dim: 0}));
    }

    #[test]
    fn race_variable_is_boxed() {
        let body = blocks(vec![(0, vec![assign("last", var_expr("i"))])]);
        let p = parfor(vec![loop_nest("i", const_op(0), const_op(8))], body, &["last"]);
        let tm = typemap(vec![("last", int64()), ("i", int64())]);
        let k = run_synthesize(&p, &tm).unwrap();
        assert_eq!(k.args.len(), 1);
        assert_eq!(k.args[0].role, ArgRole::Output);
        assert_eq!(k.args[0].ty, array(ElemSize::I64, 1).with_addrspace(AddrSpace::Global));
        assert_ne!(k.args[0].host, id("last"));
    }

    #[test]
    fn array_race_variable_gains_a_dimension() {
        let body = blocks(vec![(0, vec![assign("t", Expr::Copy {value: id("a")})])]);
        let p = parfor(vec![loop_nest("i", const_op(0), const_op(8))], body, &["a", "t"]);
        let tm = typemap(vec![
            ("a", array(ElemSize::F64, 1)),
            ("t", array(ElemSize::F64, 1)),
            ("i", int64()),
        ]);
        let k = run_synthesize(&p, &tm).unwrap();
        assert_eq!(k.args.len(), 2);
        assert_eq!(k.args[1].role, ArgRole::Output);
        assert_eq!(k.args[1].ty, array(ElemSize::F64, 2).with_addrspace(AddrSpace::Global));
    }

    #[test]
    fn missing_parameter_type_fails() {
        let (p, mut tm) = vec_scale();
        tm.remove(&id("a"));
        assert_error_matches(run_synthesize(&p, &tm), r"Missing type of parallel loop parameter a");
    }
}
