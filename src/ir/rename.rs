use super::ast::*;
use crate::utils::name::Name;
use crate::utils::smap::SMapAccum;

use std::collections::{BTreeMap, BTreeSet};

pub type RenameMap = BTreeMap<Name, Name>;

fn rename(map: &RenameMap, n: Name) -> Name {
    match map.get(&n) {
        Some(m) => m.clone(),
        None => n
    }
}

pub fn rename_inst(inst: Inst, map: &RenameMap) -> Inst {
    inst.smap(|n| rename(map, n))
}

pub fn rename_block(b: Block, map: &RenameMap) -> Block {
    Block::new(b.body.into_iter().map(|inst| rename_inst(inst, map)).collect())
}

pub fn rename_blocks(blocks: Blocks, map: &RenameMap) -> Blocks {
    blocks.into_iter()
        .map(|(l, b)| (l, rename_block(b, map)))
        .collect()
}

fn rename_operand(op: Operand, map: &RenameMap) -> Operand {
    op.smap(|n| rename(map, n))
}

pub fn rename_parfor(p: Parfor, map: &RenameMap) -> Parfor {
    let loop_nests = p.loop_nests.into_iter()
        .map(|nest| LoopNest {
            index_variable: rename(map, nest.index_variable),
            start: rename_operand(nest.start, map),
            stop: rename_operand(nest.stop, map),
            step: nest.step
        })
        .collect();
    let rename_set = |s: BTreeSet<Name>| -> BTreeSet<Name> {
        s.into_iter().map(|n| rename(map, n)).collect()
    };
    Parfor {
        loop_nests,
        init_block: rename_block(p.init_block, map),
        loop_body: rename_blocks(p.loop_body, map),
        params: rename_set(p.params),
        races: rename_set(p.races),
        shape_classes: p.shape_classes.into_iter()
            .map(|(n, c)| (rename(map, n), c))
            .collect(),
        i: p.i
    }
}

// Collects the identifiers of all parfors reachable from the given blocks, including parfors
// nested inside other parfors.
pub fn nested_parfor_ids(blocks: &Blocks, arena: &ParforArena) -> Vec<ParforId> {
    let mut ids = vec![];
    let mut stack = blocks.values()
        .flat_map(|b| b.body.iter())
        .filter_map(|inst| match inst {
            Inst::Parfor {id, ..} => Some(*id),
            _ => None
        })
        .collect::<Vec<ParforId>>();
    while let Some(pid) = stack.pop() {
        if ids.contains(&pid) {
            continue;
        }
        ids.push(pid);
        if let Some(p) = arena.get(pid) {
            let nested = p.init_block.body.iter()
                .chain(p.loop_body.values().flat_map(|b| b.body.iter()))
                .filter_map(|inst| match inst {
                    Inst::Parfor {id, ..} => Some(*id),
                    _ => None
                });
            stack.extend(nested);
        }
    }
    ids.sort();
    ids
}

// Renames variables in the blocks and in every parfor nested within them.
pub fn rename_with_nested(
    blocks: Blocks,
    arena: &mut ParforArena,
    map: &RenameMap
) -> Blocks {
    for pid in nested_parfor_ids(&blocks, arena) {
        if let Some(p) = arena.get_mut(pid) {
            *p = rename_parfor(p.clone(), map);
        }
    }
    rename_blocks(blocks, map)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;

    fn map(pairs: &[(&str, &str)]) -> RenameMap {
        pairs.iter().map(|(a, b)| (id(a), id(b))).collect()
    }

    #[test]
    fn rename_blocks_leaves_unmapped_names() {
        let g = blocks(vec![(0, vec![assign("x", binop_expr(BinOp::Add, "y", "z")), ret(Some("x"))])]);
        let g = rename_blocks(g, &map(&[("x", "x_1"), ("y", "y_1")]));
        let expected = blocks(vec![(0, vec![
            assign("x_1", binop_expr(BinOp::Add, "y_1", "z")),
            ret(Some("x_1"))
        ])]);
        assert_eq!(g, expected);
    }

    #[test]
    fn rename_parfor_updates_loop_nests_and_params() {
        let body = blocks(vec![(0, vec![setitem("a.1", "i.0", "v")])]);
        let p = parfor(vec![loop_nest("i.0", const_op(0), var_op("n.2"))], body, &["a.1", "n.2", "v"]);
        let p = rename_parfor(p, &map(&[("i.0", "i_0"), ("a.1", "a_1"), ("n.2", "n_2")]));
        assert_eq!(p.loop_nests[0].index_variable, id("i_0"));
        assert_eq!(p.loop_nests[0].stop, var_op("n_2"));
        assert_eq!(p.params, names(&["a_1", "n_2", "v"]));
        assert_eq!(p.loop_body[&0].body[0], setitem("a_1", "i_0", "v"));
    }

    #[test]
    fn nested_parfor_ids_follow_nesting() {
        let mut arena = ParforArena::new();
        let inner = parfor(vec![], blocks(vec![(0, vec![])]), &[]);
        let inner_id = arena.push(inner);
        let outer = parfor(vec![], blocks(vec![(0, vec![parfor_inst(inner_id)])]), &[]);
        let outer_id = arena.push(outer);
        let g = blocks(vec![(0, vec![parfor_inst(outer_id), ret(None)])]);
        assert_eq!(nested_parfor_ids(&g, &arena), vec![inner_id, outer_id]);
    }
}
