use crate::utils::info::*;
use crate::utils::name::Name;
use crate::utils::smap::{SFold, SMapAccum};

use strum_macros::EnumIter;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type Label = usize;
pub type ParforId = usize;
pub type KernelId = usize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, EnumIter)]
pub enum ElemSize {
    Bool, I8, I16, I32, I64, U8, U16, U32, U64, F32, F64
}

impl ElemSize {
    pub fn size(&self) -> usize {
        match self {
            ElemSize::Bool | ElemSize::I8 | ElemSize::U8 => 1,
            ElemSize::I16 | ElemSize::U16 => 2,
            ElemSize::I32 | ElemSize::U32 | ElemSize::F32 => 4,
            ElemSize::I64 | ElemSize::U64 | ElemSize::F64 => 8,
        }
    }

    pub fn is_signed_integer(&self) -> bool {
        match self {
            ElemSize::I8 | ElemSize::I16 | ElemSize::I32 | ElemSize::I64 => true,
            _ => false
        }
    }

    pub fn is_unsigned_integer(&self) -> bool {
        match self {
            ElemSize::U8 | ElemSize::U16 | ElemSize::U32 | ElemSize::U64 => true,
            _ => false
        }
    }

    pub fn is_integer(&self) -> bool {
        self.is_signed_integer() || self.is_unsigned_integer()
    }

    pub fn is_floating_point(&self) -> bool {
        match self {
            ElemSize::F32 | ElemSize::F64 => true,
            _ => false
        }
    }
}

impl fmt::Display for ElemSize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ElemSize::Bool => write!(f, "bool"),
            ElemSize::I8 => write!(f, "int8"),
            ElemSize::I16 => write!(f, "int16"),
            ElemSize::I32 => write!(f, "int32"),
            ElemSize::I64 => write!(f, "int64"),
            ElemSize::U8 => write!(f, "uint8"),
            ElemSize::U16 => write!(f, "uint16"),
            ElemSize::U32 => write!(f, "uint32"),
            ElemSize::U64 => write!(f, "uint64"),
            ElemSize::F32 => write!(f, "float32"),
            ElemSize::F64 => write!(f, "float64"),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AddrSpace {
    // Device memory visible to all work-items of a launch.
    Global,

    // Memory shared among the work-items of one work-group.
    Local,

    Generic,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Type {
    None,
    Scalar {sz: ElemSize},
    Array {sz: ElemSize, ndim: usize, addrspace: Option<AddrSpace>},
    Tuple {n: usize},
    Module {name: String},
    Function {qualname: String},
}

impl Type {
    pub fn array(sz: ElemSize, ndim: usize) -> Type {
        Type::Array {sz, ndim, addrspace: None}
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array {..})
    }

    // Arrays are the only values a callee can modify through a reference.
    pub fn is_mutable(&self) -> bool {
        self.is_array()
    }

    pub fn ndim(&self) -> usize {
        match self {
            Type::Array {ndim, ..} => *ndim,
            _ => 0
        }
    }

    pub fn elem_size(&self) -> Option<ElemSize> {
        match self {
            Type::Scalar {sz} | Type::Array {sz, ..} => Some(*sz),
            _ => None
        }
    }

    pub fn get_addrspace(&self) -> Option<AddrSpace> {
        match self {
            Type::Array {addrspace, ..} => *addrspace,
            _ => None
        }
    }

    pub fn with_addrspace(self, mem: AddrSpace) -> Type {
        match self {
            Type::Array {sz, ndim, ..} => Type::Array {sz, ndim, addrspace: Some(mem)},
            ty => ty
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Signature {
    pub args: Vec<Type>,
    pub ret: Type
}

#[derive(Clone, Debug, PartialEq)]
pub enum Const {
    Int(i64),
    Float(f64),
    Bool(bool),
    None
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, EnumIter)]
pub enum BinOp {
    Add, Sub, Mul, Div, FloorDiv, Rem, Pow, BitAnd, BitOr, BitXor, Shl, Shr,
    Eq, Neq, Lt, Leq, Gt, Geq, Max, Min
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp {
    Neg, Not, BitNeg
}

// The work-item intrinsics available in kernel code.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkItemFn {
    GlobalId, LocalId, LocalSize, GroupId
}

#[derive(Clone, Debug, PartialEq)]
pub enum Operand {
    Var {id: Name},
    Const {v: i64},
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Const {v: Const},

    // A global value, either a module or a function, as determined by the type of the target.
    Global {name: String},
    Var {id: Name},
    BinOp {op: BinOp, lhs: Name, rhs: Name},
    InplaceBinOp {op: BinOp, lhs: Name, rhs: Name, sig: Option<Signature>},
    UnOp {op: UnOp, arg: Name},
    Call {func: Name, args: Vec<Name>},
    GetAttr {value: Name, attr: String},
    GetItem {value: Name, index: Name},

    // Reads the row at the given index along the leading dimension, i.e., value[row, :].
    GetRow {value: Name, row: Name},
    BuildTuple {items: Vec<Name>},
    WorkItem {func: WorkItemFn, dim: usize},

    // Allocates an array with the shape [lead] ++ shape(like), where both parts are optional. The
    // elements are initialized to fill when provided and to zero otherwise.
    Alloc {sz: ElemSize, lead: Option<Name>, like: Option<Name>, fill: Option<Name>},
    Copy {value: Name},

    // The number of work-groups the runtime uses for a one-dimensional launch over total items.
    GroupCount {total: Name, max_group_size: usize},
}

impl Expr {
    pub fn var(id: Name) -> Expr {
        Expr::Var {id}
    }

    pub fn int(v: i64) -> Expr {
        Expr::Const {v: Const::Int(v)}
    }
}

impl SFold<Name> for Expr {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &Name) -> Result<A, E>
    ) -> Result<A, E> {
        match self {
            Expr::Var {id} => f(acc?, id),
            Expr::BinOp {lhs, rhs, ..} | Expr::InplaceBinOp {lhs, rhs, ..} => f(f(acc?, lhs)?, rhs),
            Expr::UnOp {arg, ..} => f(acc?, arg),
            Expr::Call {func, args} => args.sfold_result(f(acc?, func), &f),
            Expr::GetAttr {value, ..} | Expr::Copy {value} => f(acc?, value),
            Expr::GetItem {value, index} => f(f(acc?, value)?, index),
            Expr::GetRow {value, row} => f(f(acc?, value)?, row),
            Expr::BuildTuple {items} => items.sfold_result(acc, &f),
            Expr::Alloc {lead, like, fill, ..} => {
                [lead, like, fill].into_iter()
                    .flatten()
                    .fold(acc, |acc, id| f(acc?, id))
            },
            Expr::GroupCount {total, ..} => f(acc?, total),
            Expr::Const {..} | Expr::Global {..} | Expr::WorkItem {..} => acc,
        }
    }
}

fn map_opt<A, E>(
    acc: A,
    id: Option<Name>,
    f: &impl Fn(A, Name) -> Result<(A, Name), E>
) -> Result<(A, Option<Name>), E> {
    match id {
        Some(id) => {
            let (acc, id) = f(acc, id)?;
            Ok((acc, Some(id)))
        },
        None => Ok((acc, None))
    }
}

impl SMapAccum<Name> for Expr {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, Name) -> Result<(A, Name), E>
    ) -> Result<(A, Expr), E> {
        match self {
            Expr::Var {id} => {
                let (acc, id) = f(acc?, id)?;
                Ok((acc, Expr::Var {id}))
            },
            Expr::BinOp {op, lhs, rhs} => {
                let (acc, lhs) = f(acc?, lhs)?;
                let (acc, rhs) = f(acc, rhs)?;
                Ok((acc, Expr::BinOp {op, lhs, rhs}))
            },
            Expr::InplaceBinOp {op, lhs, rhs, sig} => {
                let (acc, lhs) = f(acc?, lhs)?;
                let (acc, rhs) = f(acc, rhs)?;
                Ok((acc, Expr::InplaceBinOp {op, lhs, rhs, sig}))
            },
            Expr::UnOp {op, arg} => {
                let (acc, arg) = f(acc?, arg)?;
                Ok((acc, Expr::UnOp {op, arg}))
            },
            Expr::Call {func, args} => {
                let (acc, func) = f(acc?, func)?;
                let (acc, args) = args.smap_accum_l_result(Ok(acc), &f)?;
                Ok((acc, Expr::Call {func, args}))
            },
            Expr::GetAttr {value, attr} => {
                let (acc, value) = f(acc?, value)?;
                Ok((acc, Expr::GetAttr {value, attr}))
            },
            Expr::GetItem {value, index} => {
                let (acc, value) = f(acc?, value)?;
                let (acc, index) = f(acc, index)?;
                Ok((acc, Expr::GetItem {value, index}))
            },
            Expr::GetRow {value, row} => {
                let (acc, value) = f(acc?, value)?;
                let (acc, row) = f(acc, row)?;
                Ok((acc, Expr::GetRow {value, row}))
            },
            Expr::BuildTuple {items} => {
                let (acc, items) = items.smap_accum_l_result(acc, &f)?;
                Ok((acc, Expr::BuildTuple {items}))
            },
            Expr::Alloc {sz, lead, like, fill} => {
                let (acc, lead) = map_opt(acc?, lead, &f)?;
                let (acc, like) = map_opt(acc, like, &f)?;
                let (acc, fill) = map_opt(acc, fill, &f)?;
                Ok((acc, Expr::Alloc {sz, lead, like, fill}))
            },
            Expr::Copy {value} => {
                let (acc, value) = f(acc?, value)?;
                Ok((acc, Expr::Copy {value}))
            },
            Expr::GroupCount {total, max_group_size} => {
                let (acc, total) = f(acc?, total)?;
                Ok((acc, Expr::GroupCount {total, max_group_size}))
            },
            Expr::Const {..} | Expr::Global {..} | Expr::WorkItem {..} => Ok((acc?, self)),
        }
    }
}

impl SFold<Name> for Operand {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &Name) -> Result<A, E>
    ) -> Result<A, E> {
        match self {
            Operand::Var {id} => f(acc?, id),
            Operand::Const {..} => acc
        }
    }
}

impl SMapAccum<Name> for Operand {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, Name) -> Result<(A, Name), E>
    ) -> Result<(A, Operand), E> {
        match self {
            Operand::Var {id} => {
                let (acc, id) = f(acc?, id)?;
                Ok((acc, Operand::Var {id}))
            },
            Operand::Const {..} => Ok((acc?, self))
        }
    }
}

// Fields of the runtime descriptor of an array.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ArrayField {
    Nitems, Itemsize, Shape(usize), Stride(usize)
}

// The value of one slot in the flat kernel argument array.
#[derive(Clone, Debug, PartialEq)]
pub enum ArgSource {
    // A pointer-sized null placeholder.
    Null,
    Field {array: Name, field: ArrayField},
    Scalar {id: Name, sz: ElemSize},
    Int {v: i64},

    // Work-group local memory of max_group_size rows, each row shaped like the given array (or a
    // single element when absent). The host never provides its contents.
    Local {sz: ElemSize, max_group_size: usize, like: Option<Name>},
}

// Calls into the device runtime emitted into host code by the launch marshaller. Buffer names
// refer to device buffer handles, while array names refer to host variables.
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCall {
    ReserveArgs {count: usize},
    CreateArg {slot: usize, src: ArgSource},
    CreateBuffer {buf: Name, array: Name},
    WriteBuffer {buf: Name, array: Name},
    CreateArgFromBuffer {slot: usize, buf: Name},

    // Launches a kernel over the inclusive index ranges [starts, stops], using work-groups no
    // larger than max_group_size.
    Enqueue {
        kernel: KernelId,
        nargs: usize,
        starts: Vec<Operand>,
        stops: Vec<Operand>,
        max_group_size: usize
    },
    ReadBuffer {buf: Name, array: Name},
    ReleaseBuffer {buf: Name},
    ReleaseArgs,
}

impl SFold<Name> for DeviceCall {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &Name) -> Result<A, E>
    ) -> Result<A, E> {
        match self {
            DeviceCall::CreateArg {src, ..} => match src {
                ArgSource::Field {array, ..} => f(acc?, array),
                ArgSource::Scalar {id, ..} => f(acc?, id),
                ArgSource::Local {like: Some(id), ..} => f(acc?, id),
                ArgSource::Null | ArgSource::Int {..} | ArgSource::Local {..} => acc,
            },
            DeviceCall::CreateBuffer {array, ..} | DeviceCall::WriteBuffer {array, ..} |
            DeviceCall::ReadBuffer {array, ..} => f(acc?, array),
            DeviceCall::Enqueue {starts, stops, ..} => {
                let acc = starts.iter().fold(acc, |acc, op| op.sfold_result(acc, &f));
                stops.iter().fold(acc, |acc, op| op.sfold_result(acc, &f))
            },
            DeviceCall::ReserveArgs {..} | DeviceCall::CreateArgFromBuffer {..} |
            DeviceCall::ReleaseBuffer {..} | DeviceCall::ReleaseArgs => acc,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Inst {
    Assign {target: Name, value: Expr, i: Info},
    SetItem {target: Name, index: Name, value: Name, i: Info},
    SetRow {target: Name, row: Name, value: Name, i: Info},
    Barrier {i: Info},
    Parfor {id: ParforId, i: Info},
    Device {call: DeviceCall, i: Info},
    Del {id: Name, i: Info},
    Jump {target: Label, i: Info},
    Branch {cond: Name, truebr: Label, falsebr: Label, i: Info},
    Return {value: Option<Name>, i: Info},
}

impl Inst {
    pub fn assign(target: Name, value: Expr, i: &Info) -> Inst {
        Inst::Assign {target, value, i: i.clone()}
    }

    pub fn jump(target: Label, i: &Info) -> Inst {
        Inst::Jump {target, i: i.clone()}
    }

    pub fn is_terminator(&self) -> bool {
        matches!(self, Inst::Jump {..} | Inst::Branch {..} | Inst::Return {..})
    }

    pub fn successors(&self) -> Vec<Label> {
        match self {
            Inst::Jump {target, ..} => vec![*target],
            Inst::Branch {truebr, falsebr, ..} => vec![*truebr, *falsebr],
            _ => vec![]
        }
    }

    pub fn map_labels(self, f: &impl Fn(Label) -> Label) -> Inst {
        match self {
            Inst::Jump {target, i} => Inst::Jump {target: f(target), i},
            Inst::Branch {cond, truebr, falsebr, i} => {
                Inst::Branch {cond, truebr: f(truebr), falsebr: f(falsebr), i}
            },
            inst => inst
        }
    }

    pub fn defined_var<'a>(&'a self) -> Option<&'a Name> {
        match self {
            Inst::Assign {target, ..} => Some(target),
            _ => None
        }
    }

    // The variables read by this instruction. The target of an indexed store counts as a use.
    pub fn used_vars(&self) -> BTreeSet<Name> {
        self.sfold(BTreeSet::new(), |mut acc, id| {
            acc.insert(id.clone());
            acc
        })
    }
}

impl InfoNode for Inst {
    fn get_info(&self) -> Info {
        match self {
            Inst::Assign {i, ..} => i.clone(),
            Inst::SetItem {i, ..} => i.clone(),
            Inst::SetRow {i, ..} => i.clone(),
            Inst::Barrier {i} => i.clone(),
            Inst::Parfor {i, ..} => i.clone(),
            Inst::Device {i, ..} => i.clone(),
            Inst::Del {i, ..} => i.clone(),
            Inst::Jump {i, ..} => i.clone(),
            Inst::Branch {i, ..} => i.clone(),
            Inst::Return {i, ..} => i.clone(),
        }
    }
}

// Folds over the names used by an instruction, excluding the target of an assignment.
impl SFold<Name> for Inst {
    fn sfold_result<A, E>(
        &self,
        acc: Result<A, E>,
        f: impl Fn(A, &Name) -> Result<A, E>
    ) -> Result<A, E> {
        match self {
            Inst::Assign {value, ..} => value.sfold_result(acc, f),
            Inst::SetItem {target, index, value, ..} => f(f(f(acc?, target)?, index)?, value),
            Inst::SetRow {target, row, value, ..} => f(f(f(acc?, target)?, row)?, value),
            Inst::Device {call, ..} => call.sfold_result(acc, f),
            Inst::Del {id, ..} => f(acc?, id),
            Inst::Branch {cond, ..} => f(acc?, cond),
            Inst::Return {value: Some(id), ..} => f(acc?, id),
            Inst::Barrier {..} | Inst::Parfor {..} | Inst::Jump {..} | Inst::Return {..} => acc,
        }
    }
}

fn map_source<A, E>(
    acc: A,
    src: ArgSource,
    f: &impl Fn(A, Name) -> Result<(A, Name), E>
) -> Result<(A, ArgSource), E> {
    match src {
        ArgSource::Field {array, field} => {
            let (acc, array) = f(acc, array)?;
            Ok((acc, ArgSource::Field {array, field}))
        },
        ArgSource::Scalar {id, sz} => {
            let (acc, id) = f(acc, id)?;
            Ok((acc, ArgSource::Scalar {id, sz}))
        },
        ArgSource::Local {sz, max_group_size, like} => {
            let (acc, like) = map_opt(acc, like, f)?;
            Ok((acc, ArgSource::Local {sz, max_group_size, like}))
        },
        ArgSource::Null | ArgSource::Int {..} => Ok((acc, src))
    }
}

fn map_operands<A, E>(
    acc: A,
    ops: Vec<Operand>,
    f: &impl Fn(A, Name) -> Result<(A, Name), E>
) -> Result<(A, Vec<Operand>), E> {
    ops.smap_accum_l_result(Ok(acc), |acc, op| op.smap_accum_l_result(Ok(acc), f))
}

// Maps over every name of an instruction, including the targets of assignments.
impl SMapAccum<Name> for Inst {
    fn smap_accum_l_result<A, E>(
        self,
        acc: Result<A, E>,
        f: impl Fn(A, Name) -> Result<(A, Name), E>
    ) -> Result<(A, Inst), E> {
        match self {
            Inst::Assign {target, value, i} => {
                let (acc, target) = f(acc?, target)?;
                let (acc, value) = value.smap_accum_l_result(Ok(acc), &f)?;
                Ok((acc, Inst::Assign {target, value, i}))
            },
            Inst::SetItem {target, index, value, i} => {
                let (acc, target) = f(acc?, target)?;
                let (acc, index) = f(acc, index)?;
                let (acc, value) = f(acc, value)?;
                Ok((acc, Inst::SetItem {target, index, value, i}))
            },
            Inst::SetRow {target, row, value, i} => {
                let (acc, target) = f(acc?, target)?;
                let (acc, row) = f(acc, row)?;
                let (acc, value) = f(acc, value)?;
                Ok((acc, Inst::SetRow {target, row, value, i}))
            },
            Inst::Device {call, i} => {
                let (acc, call) = match call {
                    DeviceCall::CreateArg {slot, src} => {
                        let (acc, src) = map_source(acc?, src, &f)?;
                        (acc, DeviceCall::CreateArg {slot, src})
                    },
                    DeviceCall::CreateBuffer {buf, array} => {
                        let (acc, array) = f(acc?, array)?;
                        (acc, DeviceCall::CreateBuffer {buf, array})
                    },
                    DeviceCall::WriteBuffer {buf, array} => {
                        let (acc, array) = f(acc?, array)?;
                        (acc, DeviceCall::WriteBuffer {buf, array})
                    },
                    DeviceCall::ReadBuffer {buf, array} => {
                        let (acc, array) = f(acc?, array)?;
                        (acc, DeviceCall::ReadBuffer {buf, array})
                    },
                    DeviceCall::Enqueue {kernel, nargs, starts, stops, max_group_size} => {
                        let (acc, starts) = map_operands(acc?, starts, &f)?;
                        let (acc, stops) = map_operands(acc, stops, &f)?;
                        (acc, DeviceCall::Enqueue {kernel, nargs, starts, stops, max_group_size})
                    },
                    call => (acc?, call)
                };
                Ok((acc, Inst::Device {call, i}))
            },
            Inst::Del {id, i} => {
                let (acc, id) = f(acc?, id)?;
                Ok((acc, Inst::Del {id, i}))
            },
            Inst::Branch {cond, truebr, falsebr, i} => {
                let (acc, cond) = f(acc?, cond)?;
                Ok((acc, Inst::Branch {cond, truebr, falsebr, i}))
            },
            Inst::Return {value, i} => {
                let (acc, value) = map_opt(acc?, value, &f)?;
                Ok((acc, Inst::Return {value, i}))
            },
            Inst::Barrier {..} | Inst::Parfor {..} | Inst::Jump {..} => Ok((acc?, self)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Block {
    pub body: Vec<Inst>
}

impl Block {
    pub fn new(body: Vec<Inst>) -> Block {
        Block {body}
    }

    pub fn terminator<'a>(&'a self) -> Option<&'a Inst> {
        self.body.last().filter(|inst| inst.is_terminator())
    }

    pub fn is_terminated(&self) -> bool {
        self.terminator().is_some()
    }

    pub fn successors(&self) -> Vec<Label> {
        self.terminator()
            .map(|t| t.successors())
            .unwrap_or_default()
    }

    // Inserts instructions right before the terminator of the block, or at the end of the block
    // when it has no terminator.
    pub fn insert_before_terminator(&mut self, insts: Vec<Inst>) {
        let idx = if self.is_terminated() { self.body.len() - 1 } else { self.body.len() };
        self.body.splice(idx..idx, insts);
    }
}

// A basic block graph, mapping unique labels to blocks. Control transfers between blocks are the
// terminators at the end of each block.
pub type Blocks = BTreeMap<Label, Block>;

pub type TypeMap = BTreeMap<Name, Type>;

#[derive(Clone, Debug, PartialEq)]
pub struct LoopNest {
    pub index_variable: Name,
    pub start: Operand,
    pub stop: Operand,
    pub step: i64,
}

// A parallel loop nest. The loop body is a block graph whose last block (the one with the largest
// label) is not terminated; falling through it ends one iteration.
#[derive(Clone, Debug, PartialEq)]
pub struct Parfor {
    pub loop_nests: Vec<LoopNest>,
    pub init_block: Block,
    pub loop_body: Blocks,

    // The names used in the loop that are defined outside of it.
    pub params: BTreeSet<Name>,

    // Variables written by multiple iterations without a combining operator.
    pub races: BTreeSet<Name>,

    // Shape equivalence classes of array parameters, as computed by the array analysis. Two
    // dimensions with the same non-negative class are known to have equal extents.
    pub shape_classes: BTreeMap<Name, Vec<i64>>,
    pub i: Info,
}

impl Parfor {
    pub fn ndims(&self) -> usize {
        self.loop_nests.len()
    }
}

// The parfor records of a function. Nested parallel loops refer to each other through their
// identifiers.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ParforArena {
    parfors: Vec<Parfor>
}

impl ParforArena {
    pub fn new() -> ParforArena {
        ParforArena {parfors: vec![]}
    }

    pub fn push(&mut self, p: Parfor) -> ParforId {
        self.parfors.push(p);
        self.parfors.len() - 1
    }

    pub fn get<'a>(&'a self, id: ParforId) -> Option<&'a Parfor> {
        self.parfors.get(id)
    }

    pub fn get_mut<'a>(&'a mut self, id: ParforId) -> Option<&'a mut Parfor> {
        self.parfors.get_mut(id)
    }

    pub fn iter<'a>(&'a self) -> impl Iterator<Item=(ParforId, &'a Parfor)> {
        self.parfors.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.parfors.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionIr {
    pub id: Name,
    pub args: Vec<Name>,
    pub blocks: Blocks,
    pub parfors: ParforArena,
    pub typemap: TypeMap,
}

// A standalone function executed by every work-item of a kernel launch. The parameters are listed
// in the order of the device call arguments, and the address space of array parameters is part of
// their type.
#[derive(Clone, Debug, PartialEq)]
pub struct KernelFunction {
    pub id: Name,
    pub params: Vec<Name>,
    pub param_types: Vec<Type>,
    pub blocks: Blocks,
    pub parfors: ParforArena,
    pub typemap: TypeMap,
    pub i: Info,
}

impl KernelFunction {
    pub fn addrspaces(&self) -> Vec<Option<AddrSpace>> {
        self.param_types.iter()
            .map(|ty| ty.get_addrspace())
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;

    use strum::IntoEnumIterator;

    #[test]
    fn element_sizes_are_powers_of_two() {
        for sz in ElemSize::iter() {
            assert!(sz.size().is_power_of_two());
        }
    }

    #[test]
    fn used_vars_of_setitem_include_target() {
        let s = setitem("a", "i", "x");
        let expected = ["a", "i", "x"].into_iter().map(id).collect::<BTreeSet<Name>>();
        assert_eq!(s.used_vars(), expected);
    }

    #[test]
    fn used_vars_of_assign_exclude_target() {
        let s = assign("y", binop_expr(BinOp::Add, "y", "x"));
        let expected = ["x", "y"].into_iter().map(id).collect::<BTreeSet<Name>>();
        assert_eq!(s.used_vars(), expected);
        assert_eq!(s.defined_var(), Some(&id("y")));
    }

    #[test]
    fn smap_renames_targets_and_uses() {
        let s = assign("y", binop_expr(BinOp::Mul, "x", "x"));
        let s = s.smap(|n| if n == id("x") { id("z") } else { n });
        assert_eq!(s, assign("y", binop_expr(BinOp::Mul, "z", "z")));
    }

    #[test]
    fn insert_before_terminator() {
        let mut b = Block::new(vec![assign("x", const_int(1)), jump(3)]);
        b.insert_before_terminator(vec![assign("y", const_int(2))]);
        assert_eq!(b.body.len(), 3);
        assert_eq!(b.body[1], assign("y", const_int(2)));
        assert!(b.is_terminated());
    }

    #[test]
    fn alloc_uses_optional_names() {
        let e = Expr::Alloc {sz: ElemSize::F64, lead: Some(id("n")), like: None, fill: Some(id("z"))};
        let uses = e.sfold(vec![], |mut acc, n| { acc.push(n.clone()); acc });
        assert_eq!(uses, vec![id("n"), id("z")]);
    }
}
