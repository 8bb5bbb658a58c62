use super::ast::*;
use crate::utils::pprint::*;

use itertools::Itertools;

use std::fmt;

impl fmt::Display for AddrSpace {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AddrSpace::Global => write!(f, "global"),
            AddrSpace::Local => write!(f, "local"),
            AddrSpace::Generic => write!(f, "generic"),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Type::None => write!(f, "none"),
            Type::Scalar {sz} => write!(f, "{sz}"),
            Type::Array {sz, ndim, addrspace: Some(mem)} => write!(f, "{mem} array({sz}, {ndim}d)"),
            Type::Array {sz, ndim, addrspace: None} => write!(f, "array({sz}, {ndim}d)"),
            Type::Tuple {n} => write!(f, "UniTuple(int64 x {n})"),
            Type::Module {name} => write!(f, "Module({name})"),
            Type::Function {qualname} => write!(f, "Function({qualname})"),
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Rem => "%",
            BinOp::Pow => "**",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::Leq => "<=",
            BinOp::Gt => ">",
            BinOp::Geq => ">=",
            BinOp::Max => "max",
            BinOp::Min => "min",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UnOp::Neg => write!(f, "-"),
            UnOp::Not => write!(f, "not "),
            UnOp::BitNeg => write!(f, "~"),
        }
    }
}

impl fmt::Display for WorkItemFn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WorkItemFn::GlobalId => write!(f, "get_global_id"),
            WorkItemFn::LocalId => write!(f, "get_local_id"),
            WorkItemFn::LocalSize => write!(f, "get_local_size"),
            WorkItemFn::GroupId => write!(f, "get_group_id"),
        }
    }
}

impl fmt::Display for Const {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Const::Int(v) => write!(f, "{v}"),
            Const::Float(v) => write!(f, "{v:?}"),
            Const::Bool(v) => write!(f, "{v}"),
            Const::None => write!(f, "None"),
        }
    }
}

impl PrettyPrint for Operand {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        match self {
            Operand::Var {id} => id.pprint(env),
            Operand::Const {v} => (env, v.to_string()),
        }
    }
}

impl PrettyPrint for Expr {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        match self {
            Expr::Const {v} => (env, format!("const({v})")),
            Expr::Global {name} => (env, format!("global({name})")),
            Expr::Var {id} => id.pprint(env),
            Expr::BinOp {op, lhs, rhs} => {
                let (env, lhs) = lhs.pprint(env);
                let (env, rhs) = rhs.pprint(env);
                match op {
                    BinOp::Max | BinOp::Min => (env, format!("{op}({lhs}, {rhs})")),
                    _ => (env, format!("{lhs} {op} {rhs}"))
                }
            },
            Expr::InplaceBinOp {op, lhs, rhs, ..} => {
                let (env, lhs) = lhs.pprint(env);
                let (env, rhs) = rhs.pprint(env);
                (env, format!("inplace_binop({op}, {lhs}, {rhs})"))
            },
            Expr::UnOp {op, arg} => {
                let (env, arg) = arg.pprint(env);
                (env, format!("{op}{arg}"))
            },
            Expr::Call {func, args} => {
                let (env, func) = func.pprint(env);
                let (env, args) = pprint_iter(args.iter(), env, ", ");
                (env, format!("call {func}({args})"))
            },
            Expr::GetAttr {value, attr} => {
                let (env, value) = value.pprint(env);
                (env, format!("getattr({value}, {attr})"))
            },
            Expr::GetItem {value, index} => {
                let (env, value) = value.pprint(env);
                let (env, index) = index.pprint(env);
                (env, format!("{value}[{index}]"))
            },
            Expr::GetRow {value, row} => {
                let (env, value) = value.pprint(env);
                let (env, row) = row.pprint(env);
                (env, format!("{value}[{row}, :]"))
            },
            Expr::BuildTuple {items} => {
                let (env, items) = pprint_iter(items.iter(), env, ", ");
                (env, format!("({items})"))
            },
            Expr::WorkItem {func, dim} => (env, format!("{func}({dim})")),
            Expr::Alloc {sz, lead, like, fill} => {
                let (env, lead) = match lead {
                    Some(id) => id.pprint(env),
                    None => (env, "-".to_string())
                };
                let (env, like) = match like {
                    Some(id) => id.pprint(env),
                    None => (env, "-".to_string())
                };
                let (env, fill) = match fill {
                    Some(id) => id.pprint(env),
                    None => (env, "0".to_string())
                };
                (env, format!("alloc({sz}, lead={lead}, like={like}, fill={fill})"))
            },
            Expr::Copy {value} => {
                let (env, value) = value.pprint(env);
                (env, format!("copy({value})"))
            },
            Expr::GroupCount {total, max_group_size} => {
                let (env, total) = total.pprint(env);
                (env, format!("group_count({total}, {max_group_size})"))
            },
        }
    }
}

impl PrettyPrint for ArgSource {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        match self {
            ArgSource::Null => (env, "null".to_string()),
            ArgSource::Field {array, field} => {
                let (env, array) = array.pprint(env);
                let s = match field {
                    ArrayField::Nitems => format!("{array}.nitems"),
                    ArrayField::Itemsize => format!("{array}.itemsize"),
                    ArrayField::Shape(d) => format!("{array}.shape[{d}]"),
                    ArrayField::Stride(d) => format!("{array}.strides[{d}]"),
                };
                (env, s)
            },
            ArgSource::Scalar {id, sz} => {
                let (env, id) = id.pprint(env);
                (env, format!("{id}: {sz}"))
            },
            ArgSource::Int {v} => (env, format!("{v}")),
            ArgSource::Local {sz, max_group_size, ..} => {
                (env, format!("local({sz} x {max_group_size})"))
            },
        }
    }
}

impl PrettyPrint for DeviceCall {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        match self {
            DeviceCall::ReserveArgs {count} => (env, format!("reserve_kernel_args({count})")),
            DeviceCall::CreateArg {slot, src} => {
                let (env, src) = src.pprint(env);
                (env, format!("kernel_args[{slot}] = create_arg({src})"))
            },
            DeviceCall::CreateBuffer {buf, array} => {
                let (env, buf) = buf.pprint(env);
                let (env, array) = array.pprint(env);
                (env, format!("{buf} = create_rw_buffer(sizeof({array}))"))
            },
            DeviceCall::WriteBuffer {buf, array} => {
                let (env, buf) = buf.pprint(env);
                let (env, array) = array.pprint(env);
                (env, format!("write_buffer({buf}, {array})"))
            },
            DeviceCall::CreateArgFromBuffer {slot, buf} => {
                let (env, buf) = buf.pprint(env);
                (env, format!("kernel_args[{slot}] = create_arg_from_buffer({buf})"))
            },
            DeviceCall::Enqueue {kernel, nargs, starts, stops, max_group_size} => {
                let (env, starts) = pprint_iter(starts.iter(), env, ", ");
                let (env, stops) = pprint_iter(stops.iter(), env, ", ");
                let s = format!("enqueue(kernel#{kernel}, {nargs}, [{starts}], [{stops}], \
                                 max_group_size={max_group_size})");
                (env, s)
            },
            DeviceCall::ReadBuffer {buf, array} => {
                let (env, buf) = buf.pprint(env);
                let (env, array) = array.pprint(env);
                (env, format!("read_buffer({buf}, {array})"))
            },
            DeviceCall::ReleaseBuffer {buf} => {
                let (env, buf) = buf.pprint(env);
                (env, format!("release_buffer({buf})"))
            },
            DeviceCall::ReleaseArgs => (env, "release_kernel_args()".to_string()),
        }
    }
}

impl PrettyPrint for Inst {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        let indent = env.print_indent();
        let (env, s) = match self {
            Inst::Assign {target, value, ..} => {
                let (env, target) = target.pprint(env);
                let (env, value) = value.pprint(env);
                (env, format!("{target} = {value}"))
            },
            Inst::SetItem {target, index, value, ..} => {
                let (env, target) = target.pprint(env);
                let (env, index) = index.pprint(env);
                let (env, value) = value.pprint(env);
                (env, format!("{target}[{index}] = {value}"))
            },
            Inst::SetRow {target, row, value, ..} => {
                let (env, target) = target.pprint(env);
                let (env, row) = row.pprint(env);
                let (env, value) = value.pprint(env);
                (env, format!("{target}[{row}, :] = {value}"))
            },
            Inst::Barrier {..} => (env, "barrier(CLK_LOCAL_MEM_FENCE)".to_string()),
            Inst::Parfor {id, ..} => (env, format!("parfor#{id}")),
            Inst::Device {call, ..} => call.pprint(env),
            Inst::Del {id, ..} => {
                let (env, id) = id.pprint(env);
                (env, format!("del {id}"))
            },
            Inst::Jump {target, ..} => (env, format!("jump {target}")),
            Inst::Branch {cond, truebr, falsebr, ..} => {
                let (env, cond) = cond.pprint(env);
                (env, format!("branch {cond}, {truebr}, {falsebr}"))
            },
            Inst::Return {value: Some(id), ..} => {
                let (env, id) = id.pprint(env);
                (env, format!("return {id}"))
            },
            Inst::Return {value: None, ..} => (env, "return".to_string()),
        };
        (env, format!("{indent}{s}"))
    }
}

impl PrettyPrint for Blocks {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        self.iter().fold((env, String::new()), |(env, acc), (l, b)| {
            let env = env.incr_indent();
            let (env, body) = pprint_iter(b.body.iter(), env, "\n");
            let env = env.decr_indent();
            (env, format!("{acc}label {l}:\n{body}\n"))
        })
    }
}

impl PrettyPrint for KernelFunction {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        let (env, id) = self.id.pprint(env);
        let (env, params) = self.params.iter()
            .zip(self.param_types.iter())
            .fold((env, vec![]), |(env, mut acc), (p, ty)| {
                let (env, p) = p.pprint(env);
                acc.push(format!("{p}: {ty}"));
                (env, acc)
            });
        let (env, body) = self.blocks.pprint(env);
        (env, format!("def {id}({0}):\n{body}", params.into_iter().join(", ")))
    }
}

impl PrettyPrint for FunctionIr {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        let (env, id) = self.id.pprint(env);
        let (env, args) = pprint_iter(self.args.iter(), env, ", ");
        let (env, body) = self.blocks.pprint(env);
        (env, format!("def {id}({args}):\n{body}"))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;

    #[test]
    fn print_block_graph() {
        let g = blocks(vec![
            (0, vec![assign("x", binop_expr(BinOp::Add, "a", "b")), jump(1)]),
            (1, vec![setitem("c", "i", "x"), ret(None)]),
        ]);
        let expected = "label 0:\n  x = a + b\n  jump 1\nlabel 1:\n  c[i] = x\n  return\n";
        assert_eq!(g.pprint_default(), expected);
    }

    #[test]
    fn print_array_type_with_addrspace() {
        let ty = array(ElemSize::F32, 2).with_addrspace(AddrSpace::Local);
        assert_eq!(ty.to_string(), "local array(float32, 2d)");
    }

    #[test]
    fn print_max_binop_as_call() {
        let e = binop_expr(BinOp::Max, "acc", "x");
        assert_eq!(e.pprint_default(), "max(acc, x)");
    }
}
