// The layout of the flat argument array passed to a kernel launch. An array argument of rank r
// occupies 5 + 2r slots: two null owner slots, the element count, the element size, the data
// pointer, then the r extents followed by the r strides (in bytes). Any other argument occupies a
// single slot holding its value.

use crate::ir::ast::*;

pub const POINTER_SIZE: usize = 8;
pub const INT_SIZE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArraySlot {
    Meminfo,
    Parent,
    Nitems,
    Itemsize,
    Data,
    Shape(usize),
    Stride(usize),
}

pub fn array_slots(ndim: usize) -> Vec<ArraySlot> {
    let mut slots = vec![
        ArraySlot::Meminfo, ArraySlot::Parent, ArraySlot::Nitems, ArraySlot::Itemsize,
        ArraySlot::Data
    ];
    slots.extend((0..ndim).map(ArraySlot::Shape));
    slots.extend((0..ndim).map(ArraySlot::Stride));
    slots
}

pub fn slot_count(ty: &Type) -> usize {
    match ty {
        Type::Array {ndim, ..} => 5 + 2 * ndim,
        _ => 1
    }
}

pub fn total_slots<'a>(tys: impl IntoIterator<Item=&'a Type>) -> usize {
    tys.into_iter().map(slot_count).sum()
}

// The byte size of the single slot of a non-array argument.
pub fn scalar_slot_size(ty: &Type) -> usize {
    match ty {
        Type::Scalar {sz} => sz.size(),
        _ => POINTER_SIZE
    }
}
