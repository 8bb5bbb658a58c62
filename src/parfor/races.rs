use super::graph;
use crate::ir::ast::*;
use crate::ir::rename;
use crate::parfor_compile_error;
use crate::utils::err::*;
use crate::utils::info::*;
use crate::utils::name::Name;
use crate::utils::smap::SMapAccum;

use std::collections::{BTreeMap, BTreeSet};

fn zero_index(i: &Info, typemap: &mut TypeMap) -> (Name, Inst) {
    let zero = Name::sym_str("const_ind_0");
    typemap.insert(zero.clone(), Type::Scalar {sz: ElemSize::I64});
    let inst = Inst::assign(zero.clone(), Expr::int(0), i);
    (zero, inst)
}

fn store_target(inst: &Inst) -> Option<&Name> {
    match inst {
        Inst::SetItem {target, ..} | Inst::SetRow {target, ..} => Some(target),
        _ => None
    }
}

fn box_inst(
    inst: Inst,
    races: &BTreeMap<Name, Type>,
    typemap: &mut TypeMap
) -> Vec<Inst> {
    let i = inst.get_info();
    let mut out = vec![];

    // Reads of a race variable load the single element of its box. A store into an array race
    // variable goes to a loaded copy of its row, which is written back afterwards.
    let mut loads = BTreeMap::new();
    let mut write_back = None;
    for id in inst.used_vars() {
        if let Some(ty) = races.get(&id) {
            let is_target = store_target(&inst) == Some(&id);
            if is_target && !ty.is_array() {
                continue;
            }
            let (zero, zero_inst) = zero_index(&i, typemap);
            let value = id.derive("_val");
            typemap.insert(value.clone(), ty.clone());
            out.push(zero_inst);
            out.push(Inst::assign(value.clone(), graph::load(&id, &zero, !ty.is_array()), &i));
            if is_target {
                write_back = Some((id.clone(), value.clone(), zero));
            }
            loads.insert(id, value);
        }
    }
    let inst = match inst {
        Inst::Assign {target, value, i} => {
            let value = value.smap(|n| loads.get(&n).cloned().unwrap_or(n));
            Inst::Assign {target, value, i}
        },
        inst => rename::rename_inst(inst, &loads)
    };

    // Writes store into the single element.
    match inst {
        Inst::Assign {target, value, i} if races.contains_key(&target) => {
            let tmp = target.derive("_new");
            let is_scalar = match races.get(&target) {
                Some(ty) => {
                    typemap.insert(tmp.clone(), ty.clone());
                    !ty.is_array()
                },
                None => true
            };
            let (zero, zero_inst) = zero_index(&i, typemap);
            out.push(Inst::Assign {target: tmp.clone(), value, i: i.clone()});
            out.push(zero_inst);
            out.push(graph::store(&target, &zero, &tmp, is_scalar, &i));
        },
        inst => out.push(inst)
    }
    if let Some((target, value, zero)) = write_back {
        out.push(graph::store(&target, &zero, &value, false, &i));
    }
    out
}

fn box_block(b: Block, races: &BTreeMap<Name, Type>, typemap: &mut TypeMap) -> Block {
    let body = b.body.into_iter()
        .flat_map(|inst| box_inst(inst, races, typemap))
        .collect();
    Block::new(body)
}

// Converts every race variable of a loop body into a box, an array with a leading dimension of
// extent one. Assignments to a race variable become stores into its only row and uses of it become
// loads, including those within nested parfors. Scalars are boxed in one-dimensional arrays and
// arrays gain one dimension.
pub fn box_race_variables(
    body: Blocks,
    races: &BTreeSet<Name>,
    arena: &mut ParforArena,
    typemap: &mut TypeMap,
    i: &Info
) -> CompileResult<Blocks> {
    if races.is_empty() {
        return Ok(body);
    }
    let race_types = races.iter()
        .map(|id| match typemap.get(id) {
            Some(ty @ (Type::Scalar {..} | Type::Array {..})) => Ok((id.clone(), ty.clone())),
            Some(ty) => {
                parfor_compile_error!(i, "Variable {id} of type {ty} is assigned by multiple \
                                          iterations of a parallel loop")
            },
            None => parfor_compile_error!(i, "Missing type of variable {id}")
        })
        .collect::<CompileResult<BTreeMap<Name, Type>>>()?;
    for id in races {
        log::warn!("Variable {id} used in parallel loop may be written to simultaneously by \
                    multiple workers and may result in non-deterministic or unintended results.");
    }

    for pid in rename::nested_parfor_ids(&body, arena) {
        if let Some(p) = arena.get_mut(pid) {
            let init_block = box_block(p.init_block.clone(), &race_types, typemap);
            let loop_body = p.loop_body.clone().into_iter()
                .map(|(l, b)| (l, box_block(b, &race_types, typemap)))
                .collect::<Blocks>();
            p.init_block = init_block;
            p.loop_body = loop_body;
        }
    }
    let body = body.into_iter()
        .map(|(l, b)| (l, box_block(b, &race_types, typemap)))
        .collect::<Blocks>();
    for (id, ty) in race_types {
        if let Some(sz) = ty.elem_size() {
            typemap.insert(id, Type::array(sz, ty.ndim() + 1));
        }
    }
    Ok(body)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;
    use crate::test::*;

    #[test]
    fn assignment_becomes_store() {
        let body = blocks(vec![(0, vec![assign("last", var_expr("i"))])]);
        let mut tm = typemap(vec![("last", int64()), ("i", int64())]);
        let body = box_race_variables(body, &names(&["last"]), &mut ParforArena::new(), &mut tm, &i())
            .unwrap();
        let insts = &body[&0].body;
        assert_eq!(insts.len(), 3);
        match &insts[2] {
            Inst::SetItem {target, ..} => assert_eq!(target, &id("last")),
            inst => panic!("Expected a store, found {inst:?}")
        }
        assert_eq!(tm.get(&id("last")), Some(&array(ElemSize::I64, 1)));
    }

    #[test]
    fn reads_load_the_element() {
        let body = blocks(vec![(0, vec![
            assign("y", binop_expr(BinOp::Add, "flag", "i"))
        ])]);
        let mut tm = typemap(vec![("flag", int64())]);
        let body = box_race_variables(body, &names(&["flag"]), &mut ParforArena::new(), &mut tm, &i())
            .unwrap();
        let insts = &body[&0].body;
        assert_eq!(insts.len(), 3);
        match (&insts[1], &insts[2]) {
            (Inst::Assign {target: ld, value: Expr::GetItem {value, ..}, ..},
             Inst::Assign {value: Expr::BinOp {lhs, ..}, ..}) => {
                assert_eq!(value, &id("flag"));
                assert_eq!(lhs, ld);
            },
            _ => panic!("Unexpected boxed instructions {insts:?}")
        }
    }

    #[test]
    fn array_assignment_stores_row() {
        let body = blocks(vec![(0, vec![assign("t", Expr::Copy {value: id("a")})])]);
        let mut tm = typemap(vec![("t", array(ElemSize::F32, 1)), ("a", array(ElemSize::F32, 1))]);
        let body = box_race_variables(body, &names(&["t"]), &mut ParforArena::new(), &mut tm, &i())
            .unwrap();
        let insts = &body[&0].body;
        assert_eq!(insts.len(), 3);
        match &insts[2] {
            Inst::SetRow {target, ..} => assert_eq!(target, &id("t")),
            inst => panic!("Expected a row store, found {inst:?}")
        }
        assert_eq!(tm.get(&id("t")), Some(&array(ElemSize::F32, 2)));
    }

    #[test]
    fn store_into_array_race_is_written_back() {
        let body = blocks(vec![(0, vec![setitem("t", "i", "x")])]);
        let mut tm = typemap(vec![("t", array(ElemSize::I64, 1))]);
        let body = box_race_variables(body, &names(&["t"]), &mut ParforArena::new(), &mut tm, &i())
            .unwrap();
        let insts = &body[&0].body;
        assert_eq!(insts.len(), 4);
        match (&insts[1], &insts[2], &insts[3]) {
            (Inst::Assign {target: row, value: Expr::GetRow {value, ..}, ..},
             Inst::SetItem {target, ..},
             Inst::SetRow {target: boxed, value: stored, ..}) => {
                assert_eq!(value, &id("t"));
                assert_eq!(target, row);
                assert_eq!(boxed, &id("t"));
                assert_eq!(stored, row);
            },
            _ => panic!("Unexpected boxed instructions {insts:?}")
        }
    }

    #[test]
    fn tuple_race_fails() {
        let body = blocks(vec![(0, vec![assign("t", var_expr("u"))])]);
        let mut tm = typemap(vec![("t", Type::Tuple {n: 2})]);
        let r = box_race_variables(body, &names(&["t"]), &mut ParforArena::new(), &mut tm, &i());
        assert_error_matches(r, r"assigned by multiple iterations");
    }

    #[test]
    fn no_races_leaves_body() {
        let body = blocks(vec![(0, vec![assign("x", var_expr("i"))])]);
        let mut tm = TypeMap::new();
        let r = box_race_variables(body.clone(), &BTreeSet::new(), &mut ParforArena::new(), &mut tm, &i());
        assert_eq!(r, Ok(body));
    }
}
