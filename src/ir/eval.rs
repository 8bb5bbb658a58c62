// An interpreter for the block graph IR, used to execute host code and, through the simulated
// device, kernel code. Execution of a graph is resumable: a frame runs until it reaches a barrier
// or finishes, which allows the work-items of a work-group to be stepped in lock-step.
use super::ast::*;
use super::blocks::min_label;
use super::value::*;
use crate::launch::blocking;
use crate::parfor_compile_error;
use crate::parfor_internal_error;
use crate::utils::err::*;
use crate::utils::info::*;
use crate::utils::name::Name;

use itertools::Itertools;

use std::collections::BTreeMap;
use std::mem;

pub type Env = BTreeMap<Name, RtValue>;

#[derive(Debug, PartialEq)]
pub enum Status {
    Barrier,
    Finished(Option<RtValue>),
}

// Operations whose meaning depends on where the code runs.
pub trait ExecHooks {
    fn work_item(&self, func: WorkItemFn, _dim: usize, i: &Info) -> CompileResult<i64> {
        parfor_internal_error!(i, "Work-item function {func} used outside of a kernel")
    }

    fn device_call(&mut self, _call: &DeviceCall, _env: &mut Env, i: &Info) -> CompileResult<()> {
        parfor_internal_error!(i, "Device call used outside of host code")
    }
}

// Sequential execution without a device.
pub struct Sequential;

impl ExecHooks for Sequential {}

pub struct Frame<'a> {
    blocks: &'a Blocks,
    arena: &'a ParforArena,
    label: Label,
    pc: usize,
    pub env: Env,
}

impl<'a> Frame<'a> {
    pub fn new(
        blocks: &'a Blocks,
        arena: &'a ParforArena,
        env: Env,
        i: &Info
    ) -> CompileResult<Frame<'a>> {
        match min_label(blocks) {
            Some(label) => Ok(Frame {blocks, arena, label, pc: 0, env}),
            None => parfor_internal_error!(i, "Cannot execute an empty block graph")
        }
    }

    fn goto(&mut self, label: Label) {
        self.label = label;
        self.pc = 0;
    }

    // Runs until the next barrier or until the graph finishes, either by returning or by falling
    // through a block without a terminator.
    pub fn run<H: ExecHooks>(&mut self, hooks: &mut H) -> CompileResult<Status> {
        let blocks = self.blocks;
        let arena = self.arena;
        loop {
            let block = match blocks.get(&self.label) {
                Some(b) => b,
                None => parfor_internal_error!(Info::default(), "Jump to undefined label {0}", self.label)?
            };
            let inst = match block.body.get(self.pc) {
                Some(inst) => inst,
                None => return Ok(Status::Finished(None))
            };
            self.pc += 1;
            match inst {
                Inst::Jump {target, ..} => self.goto(*target),
                Inst::Branch {cond, truebr, falsebr, i} => {
                    let c = lookup(&self.env, cond, i)?;
                    match c.as_bool() {
                        Some(true) => self.goto(*truebr),
                        Some(false) => self.goto(*falsebr),
                        None => parfor_compile_error!(i, "Branch condition {cond} is not a boolean")?
                    }
                },
                Inst::Return {value, i} => {
                    let v = match value {
                        Some(id) => Some(lookup(&self.env, id, i)?),
                        None => None
                    };
                    return Ok(Status::Finished(v));
                },
                Inst::Barrier {..} => return Ok(Status::Barrier),
                Inst::Parfor {id, i} => {
                    let p = match arena.get(*id) {
                        Some(p) => p,
                        None => parfor_internal_error!(i, "Reference to unknown parfor {id}")?
                    };
                    run_parfor_sequential(p, arena, &mut self.env, hooks)?;
                },
                _ => exec_inst(inst, &mut self.env, hooks)?
            }
        }
    }

    // Runs the graph to completion. Barriers are not allowed outside of kernel code.
    pub fn run_to_end<H: ExecHooks>(&mut self, hooks: &mut H, i: &Info) -> CompileResult<Option<RtValue>> {
        match self.run(hooks)? {
            Status::Finished(v) => Ok(v),
            Status::Barrier => parfor_compile_error!(i, "Barrier reached outside of a work-group")
        }
    }
}

fn run_graph<H: ExecHooks>(
    blocks: &Blocks,
    arena: &ParforArena,
    env: &mut Env,
    hooks: &mut H,
    i: &Info
) -> CompileResult<()> {
    let mut frame = Frame::new(blocks, arena, mem::take(env), i)?;
    let r = frame.run_to_end(hooks, i);
    *env = frame.env;
    r.map(|_| ())
}

fn operand_value(env: &Env, op: &Operand, i: &Info) -> CompileResult<i64> {
    match op {
        Operand::Const {v} => Ok(*v),
        Operand::Var {id} => match lookup(env, id, i)?.as_i64() {
            Some(v) => Ok(v),
            None => parfor_compile_error!(i, "Loop bound {id} is not an integer")
        }
    }
}

// Executes a parfor as an ordinary loop nest, visiting the iteration space in row-major order.
pub fn run_parfor_sequential<H: ExecHooks>(
    p: &Parfor,
    arena: &ParforArena,
    env: &mut Env,
    hooks: &mut H
) -> CompileResult<()> {
    if !p.init_block.body.is_empty() {
        let init = Blocks::from([(0, p.init_block.clone())]);
        run_graph(&init, arena, env, hooks, &p.i)?;
    }
    let ranges = p.loop_nests.iter()
        .map(|nest| {
            if nest.step != 1 {
                parfor_compile_error!(p.i, "Parallel loops only support a step size of 1")
            } else {
                Ok((operand_value(env, &nest.start, &p.i)?, operand_value(env, &nest.stop, &p.i)?))
            }
        })
        .collect::<CompileResult<Vec<(i64, i64)>>>()?;
    if ranges.iter().any(|(start, stop)| stop <= start) {
        return Ok(());
    }
    for point in ranges.into_iter().map(|(start, stop)| start..stop).multi_cartesian_product() {
        for (nest, v) in p.loop_nests.iter().zip(point.into_iter()) {
            env.insert(nest.index_variable.clone(), RtValue::Int(v));
        }
        run_graph(&p.loop_body, arena, env, hooks, &p.i)?;
    }
    Ok(())
}

pub fn lookup(env: &Env, id: &Name, i: &Info) -> CompileResult<RtValue> {
    match env.get(id) {
        Some(v) => Ok(v.clone()),
        None => parfor_compile_error!(i, "Variable {0} is not defined", id.print_with_sym())
    }
}

fn lookup_array(env: &Env, id: &Name, i: &Info) -> CompileResult<ArrayRef> {
    match lookup(env, id, i)? {
        RtValue::Array(a) => Ok(a),
        v => parfor_compile_error!(i, "Expected {id} to be an array, found {v}")
    }
}

fn index_of(v: &RtValue, i: &Info) -> CompileResult<Vec<i64>> {
    match v {
        RtValue::Int(n) => Ok(vec![*n]),
        RtValue::Tuple(ns) => Ok(ns.clone()),
        _ => parfor_compile_error!(i, "Invalid index {v}")
    }
}

fn exec_inst<H: ExecHooks>(inst: &Inst, env: &mut Env, hooks: &mut H) -> CompileResult<()> {
    match inst {
        Inst::Assign {target, value, i} => {
            let v = eval_expr(value, env, hooks, i)?;
            env.insert(target.clone(), v);
            Ok(())
        },
        Inst::SetItem {target, index, value, i} => {
            let arr = lookup_array(env, target, i)?;
            let idx = index_of(&lookup(env, index, i)?, i)?;
            let v = lookup(env, value, i)?;
            let mut arr = arr.borrow_mut();
            if arr.ndim() > idx.len() {
                let res = match (idx.as_slice(), v) {
                    ([r], RtValue::Array(src)) => {
                        let src = src.borrow().clone();
                        arr.set_row(*r, &src)
                    },
                    _ => None
                };
                match res {
                    Some(()) => Ok(()),
                    None => parfor_compile_error!(i, "Invalid row store into {target}")
                }
            } else {
                match arr.set(&idx, &v) {
                    Some(()) => Ok(()),
                    None => parfor_compile_error!(i, "Index {0:?} out of bounds for {target}", idx)
                }
            }
        },
        Inst::SetRow {target, row, value, i} => {
            let arr = lookup_array(env, target, i)?;
            let r = index_of(&lookup(env, row, i)?, i)?;
            let v = lookup(env, value, i)?;
            let res = match v {
                RtValue::Array(src) => {
                    let src = src.borrow().clone();
                    arr.borrow_mut().set_row(r[0], &src)
                },
                v => arr.borrow_mut().set(&r, &v)
            };
            match res {
                Some(()) => Ok(()),
                None => parfor_compile_error!(i, "Invalid row store into {target}")
            }
        },
        Inst::Device {call, i} => hooks.device_call(call, env, i),
        Inst::Del {id, ..} => {
            env.remove(id);
            Ok(())
        },
        _ => parfor_internal_error!(inst.get_info(), "Unexpected control instruction")
    }
}

fn eval_expr<H: ExecHooks>(
    e: &Expr,
    env: &Env,
    hooks: &mut H,
    i: &Info
) -> CompileResult<RtValue> {
    match e {
        Expr::Const {v} => Ok(RtValue::from_const(v)),
        Expr::Global {name} => Ok(RtValue::Global(name.clone())),
        Expr::Var {id} => lookup(env, id, i),
        Expr::BinOp {op, lhs, rhs} => {
            let l = lookup(env, lhs, i)?;
            let r = lookup(env, rhs, i)?;
            apply_binop(*op, &l, &r, i)
        },
        Expr::InplaceBinOp {op, lhs, rhs, ..} => {
            let l = lookup(env, lhs, i)?;
            let r = lookup(env, rhs, i)?;
            match &l {
                RtValue::Array(dst) => {
                    let res = apply_binop(*op, &l, &r, i)?;
                    if let RtValue::Array(src) = res {
                        let data = src.borrow().data.clone();
                        dst.borrow_mut().data = data;
                    }
                    Ok(l)
                },
                _ => apply_binop(*op, &l, &r, i)
            }
        },
        Expr::UnOp {op, arg} => apply_unop(*op, &lookup(env, arg, i)?, i),
        Expr::Call {func, args} => {
            let f = lookup(env, func, i)?;
            let args = args.iter()
                .map(|a| lookup(env, a, i))
                .collect::<CompileResult<Vec<RtValue>>>()?;
            match f {
                RtValue::Global(qualname) => call_builtin(&qualname, args, i),
                v => parfor_compile_error!(i, "Value {v} is not callable")
            }
        },
        Expr::GetAttr {value, attr} => {
            match lookup(env, value, i)? {
                RtValue::Global(m) => Ok(RtValue::Global(format!("{m}.{attr}"))),
                RtValue::Array(a) => {
                    let a = a.borrow();
                    match attr.as_str() {
                        "shape" => Ok(RtValue::Tuple(a.shape.iter().map(|n| *n as i64).collect())),
                        "size" => Ok(RtValue::Int(a.nitems() as i64)),
                        "ndim" => Ok(RtValue::Int(a.ndim() as i64)),
                        _ => parfor_compile_error!(i, "Unsupported array attribute {attr}")
                    }
                },
                v => parfor_compile_error!(i, "Cannot access attribute {attr} of {v}")
            }
        },
        Expr::GetItem {value, index} => {
            let idx = index_of(&lookup(env, index, i)?, i)?;
            match lookup(env, value, i)? {
                RtValue::Array(a) => {
                    let a = a.borrow();
                    let v = if a.ndim() > idx.len() && idx.len() == 1 {
                        a.row(idx[0]).map(RtValue::array)
                    } else {
                        a.get(&idx)
                    };
                    match v {
                        Some(v) => Ok(v),
                        None => parfor_compile_error!(i, "Index {0:?} out of bounds for {value}", idx)
                    }
                },
                RtValue::Tuple(t) => {
                    match idx.first().and_then(|n| t.get(*n as usize)) {
                        Some(n) => Ok(RtValue::Int(*n)),
                        None => parfor_compile_error!(i, "Tuple index out of bounds")
                    }
                },
                v => parfor_compile_error!(i, "Cannot index into {v}")
            }
        },
        Expr::GetRow {value, row} => {
            let a = lookup_array(env, value, i)?;
            let r = index_of(&lookup(env, row, i)?, i)?;
            let a = a.borrow();
            let v = if a.ndim() == 1 { a.get(&r) } else { a.row(r[0]).map(RtValue::array) };
            match v {
                Some(v) => Ok(v),
                None => parfor_compile_error!(i, "Row {0:?} out of bounds for {value}", r)
            }
        },
        Expr::BuildTuple {items} => {
            let items = items.iter()
                .map(|id| match lookup(env, id, i)?.as_i64() {
                    Some(n) => Ok(n),
                    None => parfor_compile_error!(i, "Tuple element {id} is not an integer")
                })
                .collect::<CompileResult<Vec<i64>>>()?;
            Ok(RtValue::Tuple(items))
        },
        Expr::WorkItem {func, dim} => Ok(RtValue::Int(hooks.work_item(*func, *dim, i)?)),
        Expr::Alloc {sz, lead, like, fill} => {
            let mut shape = vec![];
            if let Some(id) = lead {
                match lookup(env, id, i)?.as_i64() {
                    Some(n) if n >= 0 => shape.push(n as usize),
                    _ => parfor_compile_error!(i, "Invalid leading dimension {id}")?
                }
            }
            if let Some(id) = like {
                match lookup(env, id, i)? {
                    RtValue::Array(a) => shape.extend(a.borrow().shape.iter().copied()),
                    _ => ()
                }
            }
            let mut a = ArrayData::zeros(*sz, shape);
            if let Some(id) = fill {
                let v = lookup(env, id, i)?;
                for idx in 0..a.nitems() {
                    if a.set_flat(idx, &v).is_none() {
                        parfor_compile_error!(i, "Cannot fill array with {v}")?
                    }
                }
            }
            Ok(RtValue::array(a))
        },
        Expr::Copy {value} => {
            match lookup(env, value, i)? {
                RtValue::Array(a) => Ok(RtValue::array(a.borrow().clone())),
                v => Ok(v)
            }
        },
        Expr::GroupCount {total, max_group_size} => {
            match lookup(env, total, i)?.as_i64() {
                Some(n) => {
                    let n = n.max(0) as usize;
                    Ok(RtValue::Int(blocking::group_count(n, *max_group_size) as i64))
                },
                None => parfor_compile_error!(i, "Work size {total} is not an integer")
            }
        },
    }
}

fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) { q - 1 } else { q }
}

fn floor_rem(a: i64, b: i64) -> i64 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) { r + b } else { r }
}

fn scalar_binop(op: BinOp, l: &RtValue, r: &RtValue, i: &Info) -> CompileResult<RtValue> {
    let is_float = matches!(l, RtValue::Float(_)) || matches!(r, RtValue::Float(_));
    let both_bool = matches!((l, r), (RtValue::Bool(_), RtValue::Bool(_)));
    let (fl, fr) = match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => (a, b),
        _ => parfor_compile_error!(i, "Invalid operands {l} and {r} of operator {op}")?
    };
    let (il, ir) = (l.as_i64().unwrap_or(0), r.as_i64().unwrap_or(0));
    let cmp = |b: bool| Ok(RtValue::Bool(b));
    match op {
        BinOp::Eq => if is_float { cmp(fl == fr) } else { cmp(il == ir) },
        BinOp::Neq => if is_float { cmp(fl != fr) } else { cmp(il != ir) },
        BinOp::Lt => if is_float { cmp(fl < fr) } else { cmp(il < ir) },
        BinOp::Leq => if is_float { cmp(fl <= fr) } else { cmp(il <= ir) },
        BinOp::Gt => if is_float { cmp(fl > fr) } else { cmp(il > ir) },
        BinOp::Geq => if is_float { cmp(fl >= fr) } else { cmp(il >= ir) },
        BinOp::Div => {
            if fr == 0.0 && !is_float {
                parfor_compile_error!(i, "Division by zero")
            } else {
                Ok(RtValue::Float(fl / fr))
            }
        },
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor | BinOp::Shl | BinOp::Shr => {
            if is_float {
                parfor_compile_error!(i, "Bitwise operator {op} applied to floating-point values")
            } else {
                let v = match op {
                    BinOp::BitAnd => il & ir,
                    BinOp::BitOr => il | ir,
                    BinOp::BitXor => il ^ ir,
                    BinOp::Shl => il.wrapping_shl(ir as u32),
                    _ => il.wrapping_shr(ir as u32),
                };
                if both_bool { Ok(RtValue::Bool(v != 0)) } else { Ok(RtValue::Int(v)) }
            }
        },
        _ if is_float => {
            let v = match op {
                BinOp::Add => fl + fr,
                BinOp::Sub => fl - fr,
                BinOp::Mul => fl * fr,
                BinOp::FloorDiv => (fl / fr).floor(),
                BinOp::Rem => fl - fr * (fl / fr).floor(),
                BinOp::Pow => fl.powf(fr),
                BinOp::Max => fl.max(fr),
                _ => fl.min(fr),
            };
            Ok(RtValue::Float(v))
        },
        _ => {
            if ir == 0 && matches!(op, BinOp::FloorDiv | BinOp::Rem) {
                parfor_compile_error!(i, "Division by zero")?
            }
            let v = match op {
                BinOp::Add => il.wrapping_add(ir),
                BinOp::Sub => il.wrapping_sub(ir),
                BinOp::Mul => il.wrapping_mul(ir),
                BinOp::FloorDiv => floor_div(il, ir),
                BinOp::Rem => floor_rem(il, ir),
                BinOp::Pow if ir >= 0 => il.wrapping_pow(ir as u32),
                BinOp::Pow => return Ok(RtValue::Float(fl.powf(fr))),
                BinOp::Max => il.max(ir),
                _ => il.min(ir),
            };
            Ok(RtValue::Int(v))
        }
    }
}

// Applies a binary operator, elementwise when either operand is an array. The result of an
// elementwise operation has the element type of the array operand.
pub fn apply_binop(op: BinOp, l: &RtValue, r: &RtValue, i: &Info) -> CompileResult<RtValue> {
    match (l, r) {
        (RtValue::Array(a), RtValue::Array(b)) => {
            let (a, b) = (a.borrow().clone(), b.borrow().clone());
            if a.nitems() != b.nitems() {
                parfor_compile_error!(i, "Elementwise operator {op} on arrays of different sizes")?
            }
            let vals = a.elements().iter()
                .zip(b.elements().iter())
                .map(|(x, y)| scalar_binop(op, x, y, i))
                .collect::<CompileResult<Vec<RtValue>>>()?;
            elementwise_result(a.sz, a.shape, vals, i)
        },
        (RtValue::Array(a), s) => {
            let a = a.borrow().clone();
            let vals = a.elements().iter()
                .map(|x| scalar_binop(op, x, s, i))
                .collect::<CompileResult<Vec<RtValue>>>()?;
            elementwise_result(a.sz, a.shape, vals, i)
        },
        (s, RtValue::Array(b)) => {
            let b = b.borrow().clone();
            let vals = b.elements().iter()
                .map(|y| scalar_binop(op, s, y, i))
                .collect::<CompileResult<Vec<RtValue>>>()?;
            elementwise_result(b.sz, b.shape, vals, i)
        },
        _ => scalar_binop(op, l, r, i)
    }
}

fn elementwise_result(
    sz: ElemSize,
    shape: Vec<usize>,
    vals: Vec<RtValue>,
    i: &Info
) -> CompileResult<RtValue> {
    let sz = if vals.iter().all(|v| matches!(v, RtValue::Bool(_))) { ElemSize::Bool } else { sz };
    match ArrayData::from_values(sz, shape, &vals) {
        Some(a) => Ok(RtValue::array(a)),
        None => parfor_internal_error!(i, "Invalid elementwise result")
    }
}

fn apply_unop(op: UnOp, v: &RtValue, i: &Info) -> CompileResult<RtValue> {
    match (op, v) {
        (UnOp::Neg, RtValue::Float(f)) => Ok(RtValue::Float(-f)),
        (UnOp::Neg, RtValue::Int(n)) => Ok(RtValue::Int(n.wrapping_neg())),
        (UnOp::Not, v) => match v.as_bool() {
            Some(b) => Ok(RtValue::Bool(!b)),
            None => parfor_compile_error!(i, "Invalid operand {v} of 'not'")
        },
        (UnOp::BitNeg, RtValue::Int(n)) => Ok(RtValue::Int(!n)),
        _ => parfor_compile_error!(i, "Invalid operand {v} of unary operator {op}")
    }
}

fn unary_float(args: &[RtValue], f: fn(f64) -> f64, name: &str, i: &Info) -> CompileResult<RtValue> {
    match args {
        [x] => match x.as_f64() {
            Some(x) => Ok(RtValue::Float(f(x))),
            None => parfor_compile_error!(i, "Invalid argument {x} to {name}")
        },
        _ => parfor_compile_error!(i, "Function {name} expects one argument")
    }
}

fn shape_argument(args: &[RtValue], i: &Info) -> CompileResult<Vec<usize>> {
    match args.first() {
        Some(RtValue::Int(n)) if *n >= 0 => Ok(vec![*n as usize]),
        Some(RtValue::Tuple(ns)) if ns.iter().all(|n| *n >= 0) => {
            Ok(ns.iter().map(|n| *n as usize).collect())
        },
        _ => parfor_compile_error!(i, "Invalid shape argument to array allocation")
    }
}

// The library functions known to the interpreter.
fn call_builtin(qualname: &str, args: Vec<RtValue>, i: &Info) -> CompileResult<RtValue> {
    match qualname {
        "math.sqrt" | "numpy.sqrt" => unary_float(&args, f64::sqrt, qualname, i),
        "math.exp" | "numpy.exp" => unary_float(&args, f64::exp, qualname, i),
        "math.log" | "numpy.log" => unary_float(&args, f64::ln, qualname, i),
        "math.sin" | "numpy.sin" => unary_float(&args, f64::sin, qualname, i),
        "math.cos" | "numpy.cos" => unary_float(&args, f64::cos, qualname, i),
        "math.fabs" => unary_float(&args, f64::abs, qualname, i),
        "builtins.abs" | "numpy.abs" => match args.as_slice() {
            [RtValue::Int(n)] => Ok(RtValue::Int(n.wrapping_abs())),
            _ => unary_float(&args, f64::abs, qualname, i)
        },
        "builtins.min" | "builtins.max" => match args.as_slice() {
            [l, r] => {
                let op = if qualname == "builtins.min" { BinOp::Min } else { BinOp::Max };
                scalar_binop(op, l, r, i)
            },
            _ => parfor_compile_error!(i, "Function {qualname} expects two arguments")
        },
        "builtins.len" => match args.as_slice() {
            [RtValue::Array(a)] => match a.borrow().shape.first() {
                Some(n) => Ok(RtValue::Int(*n as i64)),
                None => parfor_compile_error!(i, "len() of a zero-dimensional array")
            },
            [RtValue::Tuple(t)] => Ok(RtValue::Int(t.len() as i64)),
            _ => parfor_compile_error!(i, "Invalid argument to len")
        },
        "numpy.empty" | "numpy.zeros" => {
            let shape = shape_argument(&args, i)?;
            Ok(RtValue::array(ArrayData::zeros(ElemSize::F64, shape)))
        },
        _ => parfor_compile_error!(i, "Unsupported call to {qualname}")
    }
}

// Runs a function on the given arguments and returns its result.
pub fn run_function<H: ExecHooks>(
    fir: &FunctionIr,
    args: Vec<RtValue>,
    hooks: &mut H
) -> CompileResult<Option<RtValue>> {
    let i = Info::default();
    if args.len() != fir.args.len() {
        parfor_compile_error!(i, "Function {0} expects {1} arguments, got {2}",
                              fir.id, fir.args.len(), args.len())?
    }
    let env = fir.args.iter().cloned().zip(args.into_iter()).collect::<Env>();
    let mut frame = Frame::new(&fir.blocks, &fir.parfors, env, &i)?;
    frame.run_to_end(hooks, &i)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;
    use crate::test::*;

    fn run(g: Blocks, env: Env) -> CompileResult<Env> {
        let arena = ParforArena::new();
        let mut frame = Frame::new(&g, &arena, env, &i())?;
        frame.run_to_end(&mut Sequential, &i())?;
        Ok(frame.env)
    }

    #[test]
    fn floor_division_rounds_down() {
        assert_eq!(floor_div(-7, 2), -4);
        assert_eq!(floor_div(7, 2), 3);
        assert_eq!(floor_rem(-7, 2), 1);
    }

    #[test]
    fn floor_division_of_min_by_minus_one_wraps() {
        assert_eq!(floor_div(i64::MIN, -1), i64::MIN);
        assert_eq!(floor_rem(i64::MIN, -1), 0);
    }

    #[test]
    fn true_division_of_integers_is_float() {
        let r = scalar_binop(BinOp::Div, &RtValue::Int(3), &RtValue::Int(2), &i());
        assert_eq!(r, Ok(RtValue::Float(1.5)));
    }

    #[test]
    fn bitwise_and_of_integers() {
        let r = scalar_binop(BinOp::BitAnd, &RtValue::Int(6), &RtValue::Int(3), &i());
        assert_eq!(r, Ok(RtValue::Int(2)));
    }

    #[test]
    fn counting_loop() {
        let g = blocks(vec![
            (0, vec![
                assign("s", const_int(0)),
                assign("k", const_int(0)),
                assign("one", const_int(1)),
                assign("n", const_int(5)),
                jump(1)
            ]),
            (1, vec![assign("c", binop_expr(BinOp::Lt, "k", "n")), branch("c", 2, 3)]),
            (2, vec![
                assign("s", inplace_expr(BinOp::Add, "s", "k")),
                assign("k", binop_expr(BinOp::Add, "k", "one")),
                jump(1)
            ]),
            (3, vec![ret(Some("s"))]),
        ]);
        let env = run(g, Env::new()).unwrap();
        assert_eq!(env.get(&id("s")), Some(&RtValue::Int(10)));
    }

    #[test]
    fn inplace_update_of_array_aliases() {
        let a = RtValue::array(ArrayData::from_f64(&[1.0, 2.0]));
        let mut env = Env::new();
        env.insert(id("a"), a.clone());
        env.insert(id("two"), RtValue::Float(2.0));
        let g = blocks(vec![(0, vec![assign("b", inplace_expr(BinOp::Mul, "a", "two")), ret(None)])]);
        run(g, env).unwrap();
        assert_eq!(a.as_array().unwrap().borrow().to_f64_vec(), vec![2.0, 4.0]);
    }

    #[test]
    fn module_attribute_call() {
        let g = blocks(vec![(0, vec![
            assign("m", global_expr("math")),
            assign("f", getattr_expr("m", "sqrt")),
            assign("x", const_float(16.0)),
            assign("y", call_expr("f", &["x"])),
            ret(Some("y"))
        ])]);
        let env = run(g, Env::new()).unwrap();
        assert_eq!(env.get(&id("y")), Some(&RtValue::Float(4.0)));
    }

    #[test]
    fn unknown_call_fails() {
        let g = blocks(vec![(0, vec![
            assign("m", global_expr("os")),
            assign("f", getattr_expr("m", "system")),
            assign("y", call_expr("f", &[])),
            ret(None)
        ])]);
        assert_error_matches(run(g, Env::new()), r"Unsupported call to os.system");
    }

    #[test]
    fn undefined_variable_fails() {
        let g = blocks(vec![(0, vec![assign("y", var_expr("x")), ret(None)])]);
        assert_error_matches(run(g, Env::new()), r"Variable x is not defined");
    }

    #[test]
    fn barrier_outside_kernel_fails() {
        let g = blocks(vec![(0, vec![Inst::Barrier {i: i()}, ret(None)])]);
        assert_error_matches(run(g, Env::new()), r"Barrier reached outside");
    }

    #[test]
    fn sequential_parfor_visits_every_point() {
        let mut arena = ParforArena::new();
        let body = blocks(vec![(0, vec![
            assign("v", binop_expr(BinOp::Mul, "i", "j")),
            assign("s", inplace_expr(BinOp::Add, "s", "v"))
        ])]);
        let p = parfor(
            vec![loop_nest("i", const_op(0), const_op(3)), loop_nest("j", const_op(0), var_op("n"))],
            body,
            &["s", "n"]
        );
        let pid = arena.push(p);
        let g = blocks(vec![(0, vec![parfor_inst(pid), ret(Some("s"))])]);
        let mut env = Env::new();
        env.insert(id("s"), RtValue::Int(0));
        env.insert(id("n"), RtValue::Int(4));
        let mut frame = Frame::new(&g, &arena, env, &i()).unwrap();
        let r = frame.run_to_end(&mut Sequential, &i()).unwrap();
        // (0 + 1 + 2) * (0 + 1 + 2 + 3)
        assert_eq!(r, Some(RtValue::Int(18)));
    }
}
