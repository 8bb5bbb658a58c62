use super::graph::{self, bool_type, int_type, GraphBuilder};
use super::reduction::{self, Reduction};
use crate::ir::ast::*;
use crate::utils::name::Name;

// Emits the host code combining the per-group partial values of each reduction into its variable.
// For every group, the partial value is loaded into the init variable of the reduction and the
// reduce nodes are replayed up to the assignment of the reduction variable. The partial buffers
// are deleted afterwards.
pub fn emit_finalizer(
    b: &mut GraphBuilder,
    reductions: &[(Reduction, Name)],
    ngroups: &Name
) {
    for (r, partial) in reductions {
        let nodes = reduction::substitute_operator(r.nodes.clone(), &r.init_var, &r.ty);
        let nodes = reduction::nodes_until_assignment(&nodes, &r.var);

        let header = b.fresh_label();
        let body = b.fresh_label();
        let exit = b.fresh_label();
        let j = b.int("parfor_index", 0);
        b.jump(header, header);
        let cond = b.binop("parfor_cond", BinOp::Lt, &j, ngroups, bool_type());
        b.branch(&cond, body, exit, body);

        b.assign(&r.init_var, graph::load(partial, &j, r.is_scalar()), r.ty.clone());
        b.emit_all(nodes);
        let one = b.int("parfor_one", 1);
        b.assign(&j, Expr::BinOp {op: BinOp::Add, lhs: j.clone(), rhs: one}, int_type());
        b.jump(header, exit);
    }
    for (_, partial) in reductions {
        let i = b.info().clone();
        b.emit(Inst::Del {id: partial.clone(), i});
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;
    use crate::ir::eval::*;
    use crate::ir::value::*;

    fn reduction(var: &str, op: BinOp, ty: Type) -> Reduction {
        let var = id(var);
        let init_var = var.derive("#init");
        let nodes = vec![Inst::assign(var.clone(), Expr::InplaceBinOp {
            op, lhs: var.clone(), rhs: init_var.clone(), sig: None
        }, &i())];
        Reduction {var, op, ty, init_var, nodes}
    }

    fn run_finalizer(r: Reduction, partial: RtValue, init: RtValue, ngroups: i64) -> RtValue {
        let mut b = GraphBuilder::with_fresh_names(&i());
        let var = r.var.clone();
        emit_finalizer(&mut b, &[(r, id("partial"))], &id("n"));
        let (g, _) = b.ret();
        let env = Env::from([
            (id("partial"), partial),
            (var.clone(), init),
            (id("n"), RtValue::Int(ngroups)),
        ]);
        let arena = ParforArena::new();
        let mut frame = Frame::new(&g, &arena, env, &i()).unwrap();
        frame.run_to_end(&mut Sequential, &i()).unwrap();
        assert!(!frame.env.contains_key(&id("partial")));
        frame.env[&var].clone()
    }

    #[test]
    fn sum_of_partials() {
        let partial = RtValue::array(ArrayData::from_f64(&[1.0, 2.0, 3.5]));
        let r = reduction("s", BinOp::Add, float64());
        let v = run_finalizer(r, partial, RtValue::Float(10.0), 3);
        assert_eq!(v, RtValue::Float(16.5));
    }

    #[test]
    fn subtraction_adds_partials() {
        let partial = RtValue::array(ArrayData::from_i64(&[-3, -4]));
        let r = reduction("s", BinOp::Sub, int64());
        let v = run_finalizer(r, partial, RtValue::Int(20), 2);
        assert_eq!(v, RtValue::Int(13));
    }

    #[test]
    fn maximum_of_partials() {
        let partial = RtValue::array(ArrayData::from_i64(&[4, 9, 2]));
        let r = reduction("m", BinOp::Max, int64());
        let v = run_finalizer(r, partial, RtValue::Int(5), 3);
        assert_eq!(v, RtValue::Int(9));
    }

    #[test]
    fn no_groups_keeps_initial_value() {
        let partial = RtValue::array(ArrayData::from_f64(&[]));
        let r = reduction("s", BinOp::Mul, float64());
        let v = run_finalizer(r, partial, RtValue::Float(3.0), 0);
        assert_eq!(v, RtValue::Float(3.0));
    }
}
