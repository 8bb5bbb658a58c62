use super::ast::*;
use crate::utils::name::Name;

use std::collections::{BTreeMap, BTreeSet};

// Assignments whose right-hand side may have an effect beyond defining the target are never
// removed. An in-place operation may update an array in place.
fn has_side_effects(e: &Expr) -> bool {
    matches!(e, Expr::Call {..} | Expr::InplaceBinOp {..})
}

fn inst_uses(inst: &Inst, arena: &ParforArena) -> BTreeSet<Name> {
    match inst {
        Inst::Parfor {id, ..} => {
            let mut uses = BTreeSet::new();
            if let Some(p) = arena.get(*id) {
                uses.extend(p.params.iter().cloned());
                for nest in &p.loop_nests {
                    for op in [&nest.start, &nest.stop] {
                        if let Operand::Var {id} = op {
                            uses.insert(id.clone());
                        }
                    }
                }
            }
            uses
        },
        _ => inst.used_vars()
    }
}

fn transfer(b: &Block, mut live: BTreeSet<Name>, arena: &ParforArena) -> BTreeSet<Name> {
    for inst in b.body.iter().rev() {
        if let Some(target) = inst.defined_var() {
            live.remove(target);
        }
        live.extend(inst_uses(inst, arena));
    }
    live
}

// Computes the set of variables live at the start of each block.
fn live_in_sets(blocks: &Blocks, arena: &ParforArena) -> BTreeMap<Label, BTreeSet<Name>> {
    let mut live_in = blocks.keys()
        .map(|l| (*l, BTreeSet::new()))
        .collect::<BTreeMap<Label, BTreeSet<Name>>>();
    loop {
        let mut changed = false;
        for (l, b) in blocks.iter().rev() {
            let out = live_out(b, &live_in);
            let inp = transfer(b, out, arena);
            if live_in.get(l) != Some(&inp) {
                live_in.insert(*l, inp);
                changed = true;
            }
        }
        if !changed {
            return live_in;
        }
    }
}

fn live_out(b: &Block, live_in: &BTreeMap<Label, BTreeSet<Name>>) -> BTreeSet<Name> {
    b.successors()
        .into_iter()
        .filter_map(|s| live_in.get(&s))
        .flat_map(|s| s.iter().cloned())
        .collect()
}

// Removes assignments to variables that are never read afterwards and whose right-hand side has
// no side-effects. Assignments to any of the root names are always kept.
pub fn eliminate_dead_code(
    blocks: Blocks,
    roots: &BTreeSet<Name>,
    arena: &ParforArena
) -> Blocks {
    let live_in = live_in_sets(&blocks, arena);
    blocks.into_iter()
        .map(|(l, b)| {
            let mut live = live_out(&b, &live_in);
            let mut body = vec![];
            for inst in b.body.into_iter().rev() {
                let dead = match &inst {
                    Inst::Assign {target, value, ..} => {
                        !live.contains(target) && !roots.contains(target) &&
                            !has_side_effects(value)
                    },
                    _ => false
                };
                if !dead {
                    if let Some(target) = inst.defined_var() {
                        live.remove(target);
                    }
                    live.extend(inst_uses(&inst, arena));
                    body.push(inst);
                }
            }
            body.reverse();
            (l, Block::new(body))
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;

    fn dce(g: Blocks, roots: &[&str]) -> Blocks {
        eliminate_dead_code(g, &names(roots), &ParforArena::new())
    }

    #[test]
    fn removes_unused_pure_assignment() {
        let g = blocks(vec![(0, vec![
            assign("x", const_int(1)),
            assign("y", const_int(2)),
            ret(Some("y"))
        ])]);
        let expected = blocks(vec![(0, vec![assign("y", const_int(2)), ret(Some("y"))])]);
        assert_eq!(dce(g, &[]), expected);
    }

    #[test]
    fn removes_transitively_dead_chain() {
        let g = blocks(vec![(0, vec![
            assign("x", const_int(1)),
            assign("y", binop_expr(BinOp::Add, "x", "x")),
            ret(None)
        ])]);
        assert_eq!(dce(g, &[]), blocks(vec![(0, vec![ret(None)])]));
    }

    #[test]
    fn keeps_root_assignments() {
        let g = blocks(vec![(0, vec![assign("acc", const_int(0)), ret(None)])]);
        assert_eq!(dce(g.clone(), &["acc"]), g);
    }

    #[test]
    fn keeps_calls_and_stores() {
        let g = blocks(vec![(0, vec![
            assign("r", call_expr("f", &[])),
            assign("v", const_int(1)),
            setitem("a", "i", "v"),
            ret(None)
        ])]);
        assert_eq!(dce(g.clone(), &[]), g);
    }

    #[test]
    fn liveness_crosses_blocks_and_loops() {
        let g = blocks(vec![
            (0, vec![assign("x", const_int(1)), assign("dead", const_int(5)), jump(1)]),
            (1, vec![branch("c", 2, 3)]),
            (2, vec![assign("x", binop_expr(BinOp::Add, "x", "x")), jump(1)]),
            (3, vec![ret(Some("x"))]),
        ]);
        let out = dce(g, &[]);
        assert_eq!(out[&0].body, vec![assign("x", const_int(1)), jump(1)]);
        assert_eq!(out[&2].body.len(), 2);
    }
}
