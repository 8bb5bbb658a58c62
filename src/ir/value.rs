use super::ast::*;

use itertools::Itertools;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub type ArrayRef = Rc<RefCell<ArrayData>>;

// An array stored as raw bytes together with its runtime descriptor. Strides are given in bytes,
// matching the descriptor passed to kernels.
#[derive(Clone, Debug, PartialEq)]
pub struct ArrayData {
    pub sz: ElemSize,
    pub shape: Vec<usize>,
    pub strides: Vec<usize>,
    pub data: Vec<u8>,
}

pub fn contiguous_strides(sz: ElemSize, shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![0; shape.len()];
    let mut acc = sz.size();
    for (idx, n) in shape.iter().enumerate().rev() {
        strides[idx] = acc;
        acc *= n;
    }
    strides
}

impl ArrayData {
    pub fn zeros(sz: ElemSize, shape: Vec<usize>) -> ArrayData {
        let nitems = shape.iter().product::<usize>();
        let strides = contiguous_strides(sz, &shape);
        ArrayData {sz, shape, strides, data: vec![0; nitems * sz.size()]}
    }

    pub fn from_values(sz: ElemSize, shape: Vec<usize>, values: &[RtValue]) -> Option<ArrayData> {
        let mut a = ArrayData::zeros(sz, shape);
        if values.len() != a.nitems() {
            return None;
        }
        for (idx, v) in values.iter().enumerate() {
            a.set_flat(idx, v)?;
        }
        Some(a)
    }

    pub fn from_f64(values: &[f64]) -> ArrayData {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>();
        let shape = vec![values.len()];
        let strides = contiguous_strides(ElemSize::F64, &shape);
        ArrayData {sz: ElemSize::F64, shape, strides, data}
    }

    pub fn from_i64(values: &[i64]) -> ArrayData {
        let data = values.iter().flat_map(|v| v.to_le_bytes()).collect::<Vec<u8>>();
        let shape = vec![values.len()];
        let strides = contiguous_strides(ElemSize::I64, &shape);
        ArrayData {sz: ElemSize::I64, shape, strides, data}
    }

    pub fn into_ref(self) -> ArrayRef {
        Rc::new(RefCell::new(self))
    }

    pub fn nitems(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn itemsize(&self) -> usize {
        self.sz.size()
    }

    pub fn nbytes(&self) -> usize {
        self.nitems() * self.itemsize()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    fn read_elem(&self, ofs: usize) -> RtValue {
        decode_scalar(&self.data[ofs..ofs + self.sz.size()], self.sz)
    }

    fn write_elem(&mut self, ofs: usize, v: &RtValue) -> Option<()> {
        let bytes = encode_scalar(v, self.sz)?;
        self.data[ofs..ofs + bytes.len()].copy_from_slice(&bytes);
        Some(())
    }

    // Byte offset of the element at the given index, or None if it is out of bounds.
    pub fn offset(&self, idx: &[i64]) -> Option<usize> {
        if idx.len() != self.ndim() {
            return None;
        }
        let ofs = idx.iter()
            .zip(self.shape.iter().zip(self.strides.iter()))
            .map(|(i, (n, s))| {
                if *i >= 0 && (*i as usize) < *n { Some(*i as usize * s) } else { None }
            })
            .sum::<Option<usize>>()?;
        if ofs + self.sz.size() <= self.data.len() { Some(ofs) } else { None }
    }

    fn flat_offset(&self, flat: usize) -> Option<usize> {
        let mut rem = flat;
        let mut idx = vec![0; self.ndim()];
        for d in (0..self.ndim()).rev() {
            idx[d] = (rem % self.shape[d]) as i64;
            rem /= self.shape[d];
        }
        self.offset(&idx)
    }

    pub fn get(&self, idx: &[i64]) -> Option<RtValue> {
        self.offset(idx).map(|ofs| self.read_elem(ofs))
    }

    pub fn set(&mut self, idx: &[i64], v: &RtValue) -> Option<()> {
        let ofs = self.offset(idx)?;
        self.write_elem(ofs, v)
    }

    pub fn get_flat(&self, flat: usize) -> Option<RtValue> {
        self.flat_offset(flat).map(|ofs| self.read_elem(ofs))
    }

    pub fn set_flat(&mut self, flat: usize, v: &RtValue) -> Option<()> {
        let ofs = self.flat_offset(flat)?;
        self.write_elem(ofs, v)
    }

    // Elements in row-major order.
    pub fn elements(&self) -> Vec<RtValue> {
        (0..self.nitems())
            .filter_map(|idx| self.get_flat(idx))
            .collect()
    }

    pub fn row(&self, r: i64) -> Option<ArrayData> {
        let (n, inner) = self.shape.split_first()?;
        if r < 0 || r as usize >= *n {
            return None;
        }
        let rowlen = inner.iter().product::<usize>();
        let elems = (0..rowlen)
            .map(|idx| self.get_flat(r as usize * rowlen + idx))
            .collect::<Option<Vec<RtValue>>>()?;
        ArrayData::from_values(self.sz, inner.to_vec(), &elems)
    }

    pub fn set_row(&mut self, r: i64, src: &ArrayData) -> Option<()> {
        let (n, inner) = self.shape.split_first()?;
        let rowlen = inner.iter().product::<usize>();
        if r < 0 || r as usize >= *n || src.nitems() != rowlen {
            return None;
        }
        for (idx, v) in src.elements().iter().enumerate() {
            self.set_flat(r as usize * rowlen + idx, v)?;
        }
        Some(())
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.elements().iter().filter_map(|v| v.as_f64()).collect()
    }

    pub fn to_i64_vec(&self) -> Vec<i64> {
        self.elements().iter().filter_map(|v| v.as_i64()).collect()
    }
}

#[derive(Clone, Debug)]
pub enum RtValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Tuple(Vec<i64>),
    Array(ArrayRef),

    // A module or function, identified by its qualified name.
    Global(String),
}

impl RtValue {
    pub fn array(a: ArrayData) -> RtValue {
        RtValue::Array(a.into_ref())
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RtValue::Bool(b) => Some(*b as i64),
            RtValue::Int(v) => Some(*v),
            RtValue::Float(v) => Some(*v as i64),
            _ => None
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RtValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            RtValue::Int(v) => Some(*v as f64),
            RtValue::Float(v) => Some(*v),
            _ => None
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RtValue::Bool(b) => Some(*b),
            RtValue::Int(v) => Some(*v != 0),
            RtValue::Float(v) => Some(*v != 0.0),
            _ => None
        }
    }

    pub fn as_array(&self) -> Option<ArrayRef> {
        match self {
            RtValue::Array(a) => Some(a.clone()),
            _ => None
        }
    }

    pub fn from_const(c: &Const) -> RtValue {
        match c {
            Const::Int(v) => RtValue::Int(*v),
            Const::Float(v) => RtValue::Float(*v),
            Const::Bool(v) => RtValue::Bool(*v),
            Const::None => RtValue::None,
        }
    }
}

// Arrays compare by content, while floating-point scalars compare bit-for-bit.
impl PartialEq for RtValue {
    fn eq(&self, other: &RtValue) -> bool {
        match (self, other) {
            (RtValue::None, RtValue::None) => true,
            (RtValue::Bool(l), RtValue::Bool(r)) => l == r,
            (RtValue::Int(l), RtValue::Int(r)) => l == r,
            (RtValue::Float(l), RtValue::Float(r)) => l.to_bits() == r.to_bits(),
            (RtValue::Tuple(l), RtValue::Tuple(r)) => l == r,
            (RtValue::Array(l), RtValue::Array(r)) => *l.borrow() == *r.borrow(),
            (RtValue::Global(l), RtValue::Global(r)) => l == r,
            _ => false
        }
    }
}

impl fmt::Display for RtValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RtValue::None => write!(f, "None"),
            RtValue::Bool(b) => write!(f, "{b}"),
            RtValue::Int(v) => write!(f, "{v}"),
            RtValue::Float(v) => write!(f, "{v:?}"),
            RtValue::Tuple(v) => write!(f, "({0})", v.iter().join(", ")),
            RtValue::Array(a) => {
                let a = a.borrow();
                write!(f, "[{0}]", a.elements().iter().join(", "))
            },
            RtValue::Global(s) => write!(f, "<{s}>"),
        }
    }
}

// Encodes a scalar value using the byte representation of the given element type. Values are
// converted to the element type first, so a floating-point value stored in an integer array is
// truncated.
pub fn encode_scalar(v: &RtValue, sz: ElemSize) -> Option<Vec<u8>> {
    let bytes = match sz {
        ElemSize::Bool => vec![v.as_bool()? as u8],
        ElemSize::I8 => (v.as_i64()? as i8).to_le_bytes().to_vec(),
        ElemSize::I16 => (v.as_i64()? as i16).to_le_bytes().to_vec(),
        ElemSize::I32 => (v.as_i64()? as i32).to_le_bytes().to_vec(),
        ElemSize::I64 => v.as_i64()?.to_le_bytes().to_vec(),
        ElemSize::U8 => (v.as_i64()? as u8).to_le_bytes().to_vec(),
        ElemSize::U16 => (v.as_i64()? as u16).to_le_bytes().to_vec(),
        ElemSize::U32 => (v.as_i64()? as u32).to_le_bytes().to_vec(),
        ElemSize::U64 => (v.as_i64()? as u64).to_le_bytes().to_vec(),
        ElemSize::F32 => (v.as_f64()? as f32).to_le_bytes().to_vec(),
        ElemSize::F64 => v.as_f64()?.to_le_bytes().to_vec(),
    };
    Some(bytes)
}

pub fn decode_scalar(bytes: &[u8], sz: ElemSize) -> RtValue {
    let mut buf = [0u8; 8];
    let n = sz.size().min(bytes.len());
    buf[..n].copy_from_slice(&bytes[..n]);
    match sz {
        ElemSize::Bool => RtValue::Bool(buf[0] != 0),
        ElemSize::I8 => RtValue::Int(i8::from_le_bytes([buf[0]]) as i64),
        ElemSize::I16 => RtValue::Int(i16::from_le_bytes([buf[0], buf[1]]) as i64),
        ElemSize::I32 => {
            RtValue::Int(i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64)
        },
        ElemSize::I64 => RtValue::Int(i64::from_le_bytes(buf)),
        ElemSize::U8 => RtValue::Int(buf[0] as i64),
        ElemSize::U16 => RtValue::Int(u16::from_le_bytes([buf[0], buf[1]]) as i64),
        ElemSize::U32 => {
            RtValue::Int(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as i64)
        },
        ElemSize::U64 => RtValue::Int(u64::from_le_bytes(buf) as i64),
        ElemSize::F32 => {
            RtValue::Float(f32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as f64)
        },
        ElemSize::F64 => RtValue::Float(f64::from_le_bytes(buf)),
    }
}
