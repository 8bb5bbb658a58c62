use super::ast::*;
use crate::parfor_internal_error;
use crate::utils::err::*;
use crate::utils::info::*;
use crate::utils::name::Name;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub fn min_label(blocks: &Blocks) -> Option<Label> {
    blocks.keys().next().copied()
}

pub fn max_label(blocks: &Blocks) -> Option<Label> {
    blocks.keys().next_back().copied()
}

fn map_block_labels(b: Block, f: &impl Fn(Label) -> Label) -> Block {
    Block::new(b.body.into_iter().map(|inst| inst.map_labels(f)).collect())
}

pub fn offset_labels(blocks: Blocks, ofs: Label) -> Blocks {
    blocks.into_iter()
        .map(|(l, b)| (l + ofs, map_block_labels(b, &|t| t + ofs)))
        .collect()
}

// Renames the labels of a graph to a dense numbering starting from zero at the entry block. Blocks
// are numbered in breadth-first order of the control-flow edges, followed by any unreachable
// blocks in their original order.
pub fn relabel_dense(blocks: Blocks, entry: Label) -> Blocks {
    let mut order = vec![];
    let mut visited = BTreeSet::new();
    let mut queue = VecDeque::from([entry]);
    while let Some(l) = queue.pop_front() {
        if let Some(b) = blocks.get(&l) {
            if visited.insert(l) {
                order.push(l);
                queue.extend(b.successors());
            }
        }
    }
    order.extend(blocks.keys().filter(|l| !visited.contains(l)));
    let map = order.into_iter()
        .enumerate()
        .map(|(idx, l)| (l, idx))
        .collect::<BTreeMap<Label, Label>>();
    let f = |l: Label| map.get(&l).copied().unwrap_or(l);
    blocks.into_iter()
        .map(|(l, b)| (f(l), map_block_labels(b, &f)))
        .collect()
}

// Finds the position of the (first) assignment to the given name.
pub fn find_assignment(blocks: &Blocks, target: &Name) -> Option<(Label, usize)> {
    blocks.iter()
        .find_map(|(l, b)| {
            b.body.iter()
                .position(|inst| inst.defined_var() == Some(target))
                .map(|idx| (*l, idx))
        })
}

// Replaces the marker instruction at the given position with the body graph. The block containing
// the marker is split in two: the instructions before the marker keep the label of the block and
// jump to the first block of the body, while the instructions after the marker are placed in a new
// block with label after_label. The last block of the body, which must not be terminated, jumps to
// this new block.
pub fn splice_at(
    blocks: &mut Blocks,
    at: (Label, usize),
    body: Blocks,
    after_label: Label,
    i: &Info
) -> CompileResult<()> {
    let (label, idx) = at;
    let (first, last) = match (min_label(&body), max_label(&body)) {
        (Some(first), Some(last)) => (first, last),
        _ => parfor_internal_error!(i, "Cannot splice an empty block graph")?
    };
    if blocks.contains_key(&after_label) || body.contains_key(&after_label) {
        parfor_internal_error!(i, "Label {after_label} of split block is already in use")?
    };
    if let Some(l) = body.keys().find(|l| blocks.contains_key(l)) {
        parfor_internal_error!(i, "Spliced block graph reuses existing label {l}")?
    };
    let mut before = match blocks.remove(&label) {
        Some(b) if idx < b.body.len() => b.body,
        _ => parfor_internal_error!(i, "Splice position ({label}, {idx}) is out of bounds")?
    };
    let after = before.split_off(idx + 1);
    before.pop();
    before.push(Inst::jump(first, i));
    blocks.insert(label, Block::new(before));
    blocks.insert(after_label, Block::new(after));
    for (l, mut b) in body {
        if l == last {
            if b.is_terminated() {
                parfor_internal_error!(i, "The last block of a spliced graph must fall through")?
            }
            b.body.push(Inst::jump(after_label, i));
        }
        blocks.insert(l, b);
    }
    Ok(())
}

// Every block of a complete function or kernel must end in a control transfer.
pub fn ensure_terminated(blocks: &Blocks, i: &Info) -> CompileResult<()> {
    match blocks.iter().find(|(_, b)| !b.is_terminated()) {
        Some((l, _)) => parfor_internal_error!(i, "Block {l} does not end in a control transfer"),
        None => Ok(())
    }
}
