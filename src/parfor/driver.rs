use super::graph::{bool_type, int_type, load, store, GraphBuilder};
use crate::ir::ast::*;
use crate::ir::rename::{self, RenameMap};
use crate::utils::info::*;
use crate::utils::name::Name;
use crate::utils::smap::SFold;

use std::collections::BTreeSet;

// The kernel parameters involved in the reduction of one variable.
#[derive(Clone, Debug, PartialEq)]
pub struct DriverReduction {
    pub var: Name,
    pub scratch: Name,
    pub partial: Name,
    pub is_scalar: bool,
}

// The driver code executed by every work-item, with the positions of the loop body and of the
// reduction combine marked by sentinel assignments.
#[derive(Clone, Debug, PartialEq)]
pub struct Driver {
    pub blocks: Blocks,
    pub typemap: TypeMap,

    // Local id of the work-item within its work-group.
    pub tnum: Name,

    // The distance between the scratch slots combined in the current round of the reduction tree.
    pub offset: Name,
}

// Builds the driver of a kernel. Every work-item computes its global index in each dimension and
// then runs the loop body, whose position is marked by the sentinel. With reductions, the
// work-items of each work-group afterwards combine their accumulated values in a tree through
// group-local scratch buffers. In the round with offset k, the work-items whose local id is a
// multiple of 2k combine their slot with the slot k positions ahead; the combining code goes at
// the reduction sentinel. Finally, the first work-item of each group writes the result of the group
// to its slot of the partial buffer.
pub fn build_driver(
    indices: &[Name],
    index_ty: &Type,
    sentinel: &Name,
    reduction_sentinel: &Name,
    reductions: &[DriverReduction],
    i: &Info
) -> Driver {
    let mut b = GraphBuilder::new(i);
    for (dim, idx) in indices.iter().enumerate() {
        b.assign(idx, Expr::WorkItem {func: WorkItemFn::GlobalId, dim}, index_ty.clone());
    }
    let tnum = Name::new("gufunc_tnum".to_string());
    let offset = Name::new("gufunc_red_offset".to_string());
    if reductions.is_empty() {
        b.assign(sentinel, Expr::int(0), int_type());
        let (blocks, typemap) = b.ret();
        return Driver {blocks, typemap, tnum, offset};
    }

    let num_items = Name::new("gufunc_numItems".to_string());
    let wg_num = Name::new("gufunc_wgNum".to_string());
    b.assign(&num_items, Expr::WorkItem {func: WorkItemFn::LocalSize, dim: 0}, int_type());
    b.assign(&tnum, Expr::WorkItem {func: WorkItemFn::LocalId, dim: 0}, int_type());
    b.assign(&wg_num, Expr::WorkItem {func: WorkItemFn::GroupId, dim: 0}, int_type());
    for r in reductions.iter().filter(|r| !r.is_scalar) {
        // Array accumulators are private to each work-item.
        b.emit(Inst::assign(r.var.clone(), Expr::Copy {value: r.var.clone()}, i));
    }
    b.assign(sentinel, Expr::int(0), int_type());
    for r in reductions {
        b.emit(store(&r.scratch, &tnum, &r.var, r.is_scalar, i));
    }
    b.assign(&offset, Expr::int(1), int_type());

    let header = b.fresh_label();
    let round = b.fresh_label();
    let in_bounds = b.fresh_label();
    let combine = b.fresh_label();
    let latch = b.fresh_label();
    let exit = b.fresh_label();
    let write_partial = b.fresh_label();
    let done = b.fresh_label();

    b.jump(header, header);
    let cond = b.binop("gufunc_red_cond", BinOp::Lt, &offset, &num_items, bool_type());
    b.branch(&cond, round, exit, round);

    let two = b.int("gufunc_two", 2);
    let one = b.int("gufunc_one", 1);
    let width = b.binop("gufunc_red_width", BinOp::Mul, &two, &offset, int_type());
    let mask = b.binop("mask", BinOp::Sub, &width, &one, int_type());
    b.barrier();
    let masked = b.binop("gufunc_masked", BinOp::BitAnd, &tnum, &mask, int_type());
    let zero = b.int("gufunc_zero", 0);
    let active = b.binop("gufunc_active", BinOp::Eq, &masked, &zero, bool_type());
    b.branch(&active, in_bounds, latch, in_bounds);

    let other = b.binop("gufunc_other", BinOp::Add, &tnum, &offset, int_type());
    let valid = b.binop("gufunc_valid", BinOp::Lt, &other, &num_items, bool_type());
    b.branch(&valid, combine, latch, combine);

    b.assign(reduction_sentinel, Expr::int(0), int_type());
    b.jump(latch, latch);

    let factor = b.int("gufunc_factor", 2);
    b.assign(&offset, Expr::BinOp {op: BinOp::Mul, lhs: offset.clone(), rhs: factor}, int_type());
    b.jump(header, exit);

    b.barrier();
    let first = b.int("gufunc_first", 0);
    let is_first = b.binop("gufunc_is_first", BinOp::Eq, &tnum, &first, bool_type());
    b.branch(&is_first, write_partial, done, write_partial);

    for r in reductions {
        let slot = b.int("gufunc_slot", 0);
        let value = Name::new(format!("{0}_group_result", r.var));
        b.emit(Inst::assign(value.clone(), load(&r.scratch, &slot, r.is_scalar), i));
        b.emit(store(&r.partial, &wg_num, &value, r.is_scalar, i));
    }
    b.jump(done, done);

    let (blocks, typemap) = b.ret();
    Driver {blocks, typemap, tnum, offset}
}

// Renames every variable of the driver that is not reserved to a fresh unique name.
pub fn rename_internal(driver: Driver, reserved: &BTreeSet<Name>) -> Driver {
    let names = driver.blocks.values()
        .flat_map(|b| b.body.iter())
        .fold(BTreeSet::new(), |mut acc, inst| {
            acc = inst.sfold(acc, |mut acc, id| { acc.insert(id.clone()); acc });
            if let Some(id) = inst.defined_var() {
                acc.insert(id.clone());
            }
            acc
        });
    let map = names.into_iter()
        .filter(|id| !reserved.contains(id))
        .map(|id| (id.clone(), id.with_new_sym()))
        .collect::<RenameMap>();
    let lookup = |id: Name| map.get(&id).cloned().unwrap_or(id);
    let typemap = driver.typemap.into_iter()
        .map(|(id, ty)| (lookup(id), ty))
        .collect::<TypeMap>();
    Driver {
        blocks: rename::rename_blocks(driver.blocks, &map),
        typemap,
        tnum: lookup(driver.tnum),
        offset: lookup(driver.offset),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;
    use crate::ir::blocks::find_assignment;

    fn scalar_reduction() -> DriverReduction {
        DriverReduction {
            var: id("s"),
            scratch: id("s_local_arr"),
            partial: id("s_arr"),
            is_scalar: true
        }
    }

    fn count_barriers(g: &Blocks) -> usize {
        g.values()
            .flat_map(|b| b.body.iter())
            .filter(|inst| matches!(inst, Inst::Barrier {..}))
            .count()
    }

    #[test]
    fn driver_without_reductions() {
        let d = build_driver(&[id("i"), id("j")], &int64(), &id("__sentinel__"), &id("__red__"), &[], &i());
        assert_eq!(d.blocks.len(), 1);
        let body = &d.blocks[&0].body;
        assert_eq!(body[0], assign("i", Expr::WorkItem {func: WorkItemFn::GlobalId, dim: 0}));
        assert_eq!(body[1], assign("j", Expr::WorkItem {func: WorkItemFn::GlobalId, dim: 1}));
        assert_eq!(body[2], assign("__sentinel__", const_int(0)));
        assert_eq!(body[3], ret(None));
    }

    #[test]
    fn driver_with_reduction_has_markers_and_barriers() {
        let d = build_driver(
            &[id("i")], &int64(), &id("__sentinel__"), &id("__red__"), &[scalar_reduction()], &i()
        );
        let (sl, _) = find_assignment(&d.blocks, &id("__sentinel__")).unwrap();
        let (rl, ridx) = find_assignment(&d.blocks, &id("__red__")).unwrap();
        assert_eq!(sl, 0);
        assert_eq!(ridx, 0);
        assert_ne!(rl, sl);
        assert_eq!(count_barriers(&d.blocks), 2);
        let stores_partial = d.blocks.values()
            .flat_map(|b| b.body.iter())
            .any(|inst| matches!(inst, Inst::SetItem {target, ..} if target == &id("s_arr")));
        assert!(stores_partial);
    }

    #[test]
    fn every_block_is_terminated() {
        let d = build_driver(
            &[id("i")], &int64(), &id("__sentinel__"), &id("__red__"), &[scalar_reduction()], &i()
        );
        assert!(d.blocks.values().all(|b| b.is_terminated()));
    }

    #[test]
    fn rename_preserves_reserved_names() {
        let d = build_driver(
            &[id("i")], &int64(), &id("__sentinel__"), &id("__red__"), &[scalar_reduction()], &i()
        );
        let reserved = names(&["i", "__sentinel__", "__red__", "s", "s_local_arr", "s_arr"]);
        let d = rename_internal(d, &reserved);
        assert!(d.tnum.has_sym());
        assert!(d.offset.has_sym());
        assert!(find_assignment(&d.blocks, &id("__sentinel__")).is_some());
        assert!(find_assignment(&d.blocks, &id("gufunc_tnum")).is_none());
        assert!(find_assignment(&d.blocks, &d.tnum).is_some());
    }
}
