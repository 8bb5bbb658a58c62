use crate::device::{DeviceRuntime, KernelRegistry};
use crate::ir::ast::*;
use crate::ir::blocks;
use crate::ir::eval;
use crate::ir::value::RtValue;
use crate::launch::host::HostExec;
use crate::launch::marshal;
use crate::option::CompileOptions;
use crate::parfor::effects::CallEffects;
use crate::parfor::finalize;
use crate::parfor::graph::{self, int_type, GraphBuilder};
use crate::parfor::hoist::NotHoistedReason;
use crate::parfor::kernel::{self, ArgRole, KernelArg, SynthesizedKernel};
use crate::parfor::reduction::{self, Reduction};
use crate::parfor::signature::{self, ShapeSignature};
use crate::parfor_internal_error;
use crate::utils::debug::DebugEnv;
use crate::utils::err::*;
use crate::utils::info::*;
use crate::utils::name::Name;

// What the lowering did with one parallel loop.
#[derive(Clone, Debug)]
pub struct LoopDiagnostics {
    pub parfor: ParforId,
    pub kernel: KernelId,
    pub kernel_name: Name,
    pub signature: ShapeSignature,
    pub hoisted: Vec<Inst>,
    pub not_hoisted: Vec<(Inst, NotHoistedReason)>,

    // The number of slots in the flat argument array of the launch.
    pub nargs: usize,
}

/// Lowers the parallel loops of functions into kernels launched on a device, and runs the
/// resulting host code. The session owns every kernel it compiles.
pub struct Session<D: DeviceRuntime> {
    device: D,
    kernels: KernelRegistry<D::Kernel>,
    opts: CompileOptions,
    effects: CallEffects,
    debug_env: DebugEnv,
    diagnostics: Vec<LoopDiagnostics>,
}

fn find_top_level_parfor(blocks: &Blocks) -> Option<(Label, usize, ParforId)> {
    blocks.iter()
        .find_map(|(l, b)| {
            b.body.iter()
                .enumerate()
                .find_map(|(idx, inst)| match inst {
                    Inst::Parfor {id, ..} => Some((*l, idx, *id)),
                    _ => None
                })
        })
}

fn operand_name(b: &mut GraphBuilder, op: &Operand, s: &str) -> Name {
    match op {
        Operand::Var {id} => id.clone(),
        Operand::Const {v} => b.int(s, *v)
    }
}

fn find_arg<'a>(k: &'a SynthesizedKernel, orig: &Name, role: ArgRole, i: &Info) -> CompileResult<&'a KernelArg> {
    match k.args.iter().find(|a| &a.orig == orig && a.role == role) {
        Some(a) => Ok(a),
        None => parfor_internal_error!(i, "Kernel {0} has no {role:?} argument for {orig}",
                                       k.kernel.id)
    }
}

fn race_args<'a>(k: &'a SynthesizedKernel) -> Vec<&'a KernelArg> {
    k.args.iter()
        .filter(|a| a.role == ArgRole::Output && k.classes.races.contains(&a.orig))
        .collect()
}

// Wraps each race variable in a box with a leading dimension of extent one, holding its current
// value.
fn emit_race_boxes(
    b: &mut GraphBuilder,
    k: &SynthesizedKernel,
    typemap: &TypeMap,
    i: &Info
) -> CompileResult<()> {
    for a in race_args(k) {
        let sz = match a.ty.elem_size() {
            Some(sz) => sz,
            None => parfor_internal_error!(i, "Race variable {0} has type {1}", a.orig, a.ty)?
        };
        let box_ty = Type::array(sz, a.ty.ndim());
        let one = b.int("one", 1);
        if is_array_race(a, typemap) {
            let value = Expr::Alloc {sz, lead: Some(one), like: Some(a.orig.clone()), fill: None};
            b.assign(&a.host, value, box_ty);
            let zero = b.int("zero", 0);
            b.emit(graph::store(&a.host, &zero, &a.orig, false, i));
        } else {
            let value = Expr::Alloc {sz, lead: Some(one), like: None, fill: Some(a.orig.clone())};
            b.assign(&a.host, value, box_ty);
        }
    }
    Ok(())
}

fn is_array_race(a: &KernelArg, typemap: &TypeMap) -> bool {
    typemap.get(&a.orig).map(|ty| ty.is_array()).unwrap_or(false)
}

fn emit_race_unboxes(
    b: &mut GraphBuilder,
    k: &SynthesizedKernel,
    typemap: &TypeMap,
    i: &Info
) -> CompileResult<()> {
    for a in race_args(k) {
        let ty = match typemap.get(&a.orig) {
            Some(ty) => ty.clone(),
            None => parfor_internal_error!(i, "Missing type of race variable {0}", a.orig)?
        };
        let zero = b.int("zero", 0);
        b.assign(&a.orig, graph::load(&a.host, &zero, !ty.is_array()), ty);
        b.emit(Inst::Del {id: a.host.clone(), i: i.clone()});
    }
    Ok(())
}

// Every work-item starts accumulating from the neutral element of the reduction operator. For
// array reductions, this is an array shaped like the reduction variable.
fn emit_neutral_value(
    b: &mut GraphBuilder,
    r: &Reduction,
    host: &Name,
    i: &Info
) -> CompileResult<()> {
    let sz = r.elem_size(i)?;
    let v = reduction::neutral_element(r.op, sz, i)?;
    if r.is_scalar() {
        b.assign(host, Expr::Const {v}, r.ty.clone());
    } else {
        let fill = b.name("neutral");
        b.assign(&fill, Expr::Const {v}, Type::Scalar {sz});
        let value = Expr::Alloc {sz, lead: None, like: Some(r.var.clone()), fill: Some(fill)};
        b.assign(host, value, r.ty.clone());
    }
    Ok(())
}

impl<D: DeviceRuntime> Session<D> {
    pub fn new(device: D, opts: CompileOptions) -> Session<D> {
        let effects = CallEffects::new(&opts);
        let debug_env = DebugEnv::new(&opts);
        Session {
            device, kernels: KernelRegistry::new(), opts, effects, debug_env, diagnostics: vec![]
        }
    }

    pub fn device<'a>(&'a self) -> &'a D {
        &self.device
    }

    pub fn kernels<'a>(&'a self) -> &'a KernelRegistry<D::Kernel> {
        &self.kernels
    }

    pub fn diagnostics<'a>(&'a self) -> &'a [LoopDiagnostics] {
        &self.diagnostics
    }

    // The largest work-group size used by launches. The option can only lower the bound reported
    // by the device.
    pub fn max_group_size(&self) -> usize {
        let device_max = self.device.max_work_group_size().max(1);
        match self.opts.max_work_group_size {
            Some(n) => n.clamp(1, device_max),
            None => device_max
        }
    }

    // Produces the host code replacing a parallel loop. The kernel executing the loop body is
    // compiled and registered as a side-effect.
    fn lower_parfor(
        &mut self,
        pid: ParforId,
        p: &Parfor,
        arena: &ParforArena,
        typemap: &TypeMap
    ) -> CompileResult<(Blocks, TypeMap)> {
        let name = Name::new(format!("{0}_{1}", self.opts.kernel_prefix, self.kernels.len()));
        let k = kernel::synthesize(p, arena, typemap, &self.effects, name.clone(), &self.debug_env)?;
        self.debug_env.report_time("Kernel synthesis");
        let sig = signature::build_signature(&k, &p.shape_classes);
        self.debug_env.print("Shape signature", &sig);
        let compiled = self.device.compile(&k.kernel)?;
        let kernel_id = self.kernels.push(compiled);
        let max_group_size = self.max_group_size();

        let i = &p.i;
        let mut b = GraphBuilder::with_fresh_names(i);
        b.emit_all(p.init_block.body.iter().cloned());
        emit_race_boxes(&mut b, &k, typemap, i)?;

        let mut partials = vec![];
        let mut neutrals = vec![];
        let mut ngroups = None;
        if k.classes.has_reductions() {
            let nest = match p.loop_nests.first() {
                Some(nest) => nest,
                None => parfor_internal_error!(i, "Parallel loop without any loop dimensions")?
            };
            let start = operand_name(&mut b, &nest.start, "start");
            let stop = operand_name(&mut b, &nest.stop, "stop");
            let total = b.binop("total_work", BinOp::Sub, &stop, &start, int_type());
            let n = b.name("num_groups");
            b.assign(&n, Expr::GroupCount {total, max_group_size}, int_type());
            for r in &k.classes.reductions {
                let neutral = find_arg(&k, &r.var, ArgRole::Reduction, i)?;
                emit_neutral_value(&mut b, r, &neutral.host, i)?;
                neutrals.push(neutral.host.clone());

                let partial = find_arg(&k, &r.var, ArgRole::Partial, i)?;
                let like = if r.is_scalar() { None } else { Some(r.var.clone()) };
                let value = Expr::Alloc {
                    sz: r.elem_size(i)?, lead: Some(n.clone()), like, fill: None
                };
                b.assign(&partial.host, value, r.partial_type(i)?);
                partials.push((r.clone(), partial.host.clone()));
            }
            ngroups = Some(n);
        }
        let nargs = marshal::emit_launch(&mut b, kernel_id, &k, &sig, &p.loop_nests, max_group_size, i)?;
        emit_race_unboxes(&mut b, &k, typemap, i)?;
        if let Some(n) = &ngroups {
            finalize::emit_finalizer(&mut b, &partials, n);
        }
        self.record(pid, kernel_id, name, sig, &k, nargs);
        for id in neutrals {
            b.emit(Inst::Del {id, i: i.clone()});
        }
        let (host, tm) = b.fall_through();
        self.debug_env.print("Host code of parallel loop", &host);
        Ok((host, tm))
    }

    fn record(
        &mut self,
        parfor: ParforId,
        kernel: KernelId,
        kernel_name: Name,
        signature: ShapeSignature,
        k: &SynthesizedKernel,
        nargs: usize
    ) {
        for (inst, reason) in &k.hoist_info.not_hoisted {
            let target = inst.defined_var().map(|id| id.to_string()).unwrap_or_default();
            log::debug!("Kernel {kernel_name}: instruction defining {target} not hoisted ({reason})");
        }
        self.diagnostics.push(LoopDiagnostics {
            parfor,
            kernel,
            kernel_name,
            signature,
            hoisted: k.hoist_info.hoisted.clone(),
            not_hoisted: k.hoist_info.not_hoisted.clone(),
            nargs
        });
    }

    /// Replaces every top-level parallel loop of the function by host code launching a kernel on
    /// the device of the session.
    pub fn lower_function(&mut self, fir: &FunctionIr) -> CompileResult<FunctionIr> {
        let mut out = fir.clone();
        self.debug_env.print("Function before lowering", &out);
        while let Some((label, idx, pid)) = find_top_level_parfor(&out.blocks) {
            let p = match out.parfors.get(pid) {
                Some(p) => p.clone(),
                None => parfor_internal_error!(Info::default(), "Reference to unknown parfor {pid}")?
            };
            let (host, tm) = self.lower_parfor(pid, &p, &out.parfors, &out.typemap)?;
            let ofs = blocks::max_label(&out.blocks).map(|l| l + 1).unwrap_or(0);
            let host = blocks::offset_labels(host, ofs);
            let after = blocks::max_label(&host).map(|l| l + 1).unwrap_or(ofs);
            blocks::splice_at(&mut out.blocks, (label, idx), host, after, &p.i)?;
            out.typemap.extend(tm);
        }
        let entry = match blocks::min_label(&out.blocks) {
            Some(l) => l,
            None => parfor_internal_error!(Info::default(), "Function {0} has no blocks", fir.id)?
        };
        out.blocks = blocks::relabel_dense(out.blocks, entry);
        blocks::ensure_terminated(&out.blocks, &Info::default())?;
        self.debug_env.print("Function after lowering", &out);
        self.debug_env.report_time("Lowering");
        Ok(out)
    }

    /// Runs a lowered function, executing its device calls on the device of the session.
    pub fn run(&mut self, fir: &FunctionIr, args: Vec<RtValue>) -> CompileResult<Option<RtValue>> {
        let mut hooks = HostExec::new(&mut self.device, &self.kernels);
        eval::run_function(fir, args, &mut hooks)
    }
}
