use super::ast::*;
use crate::utils::info::Info;
use crate::utils::name::Name;

use std::collections::{BTreeMap, BTreeSet};

pub fn i() -> Info {
    Info::default()
}

pub fn id(s: &str) -> Name {
    Name::new(s.to_string())
}

pub fn scalar(sz: ElemSize) -> Type {
    Type::Scalar {sz}
}

pub fn int64() -> Type {
    scalar(ElemSize::I64)
}

pub fn float64() -> Type {
    scalar(ElemSize::F64)
}

pub fn array(sz: ElemSize, ndim: usize) -> Type {
    Type::array(sz, ndim)
}

pub fn const_int(v: i64) -> Expr {
    Expr::Const {v: Const::Int(v)}
}

pub fn const_float(v: f64) -> Expr {
    Expr::Const {v: Const::Float(v)}
}

pub fn var_expr(s: &str) -> Expr {
    Expr::Var {id: id(s)}
}

pub fn global_expr(name: &str) -> Expr {
    Expr::Global {name: name.to_string()}
}

pub fn binop_expr(op: BinOp, lhs: &str, rhs: &str) -> Expr {
    Expr::BinOp {op, lhs: id(lhs), rhs: id(rhs)}
}

pub fn inplace_expr(op: BinOp, lhs: &str, rhs: &str) -> Expr {
    Expr::InplaceBinOp {op, lhs: id(lhs), rhs: id(rhs), sig: None}
}

pub fn getitem_expr(value: &str, index: &str) -> Expr {
    Expr::GetItem {value: id(value), index: id(index)}
}

pub fn getattr_expr(value: &str, attr: &str) -> Expr {
    Expr::GetAttr {value: id(value), attr: attr.to_string()}
}

pub fn call_expr(func: &str, args: &[&str]) -> Expr {
    Expr::Call {func: id(func), args: args.iter().map(|s| id(s)).collect()}
}

pub fn assign(target: &str, value: Expr) -> Inst {
    Inst::Assign {target: id(target), value, i: i()}
}

pub fn setitem(target: &str, index: &str, value: &str) -> Inst {
    Inst::SetItem {target: id(target), index: id(index), value: id(value), i: i()}
}

pub fn jump(target: Label) -> Inst {
    Inst::Jump {target, i: i()}
}

pub fn branch(cond: &str, truebr: Label, falsebr: Label) -> Inst {
    Inst::Branch {cond: id(cond), truebr, falsebr, i: i()}
}

pub fn ret(value: Option<&str>) -> Inst {
    Inst::Return {value: value.map(id), i: i()}
}

pub fn parfor_inst(pid: ParforId) -> Inst {
    Inst::Parfor {id: pid, i: i()}
}

pub fn block(body: Vec<Inst>) -> Block {
    Block::new(body)
}

pub fn blocks(bs: Vec<(Label, Vec<Inst>)>) -> Blocks {
    bs.into_iter()
        .map(|(l, body)| (l, Block::new(body)))
        .collect::<Blocks>()
}

pub fn var_op(s: &str) -> Operand {
    Operand::Var {id: id(s)}
}

pub fn const_op(v: i64) -> Operand {
    Operand::Const {v}
}

pub fn loop_nest(idx: &str, start: Operand, stop: Operand) -> LoopNest {
    LoopNest {index_variable: id(idx), start, stop, step: 1}
}

pub fn names(ns: &[&str]) -> BTreeSet<Name> {
    ns.iter().map(|s| id(s)).collect()
}

pub fn parfor(loop_nests: Vec<LoopNest>, loop_body: Blocks, params: &[&str]) -> Parfor {
    Parfor {
        loop_nests,
        init_block: Block::default(),
        loop_body,
        params: names(params),
        races: BTreeSet::new(),
        shape_classes: BTreeMap::new(),
        i: i(),
    }
}

pub fn typemap(entries: Vec<(&str, Type)>) -> TypeMap {
    entries.into_iter()
        .map(|(s, ty)| (id(s), ty))
        .collect::<TypeMap>()
}
