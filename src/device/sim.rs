// A deterministic simulated device, executing kernels with the IR interpreter. The work-items of
// a work-group run cooperatively: each runs until it reaches a barrier, and the group continues
// past the barrier only once all of its work-items have reached it.
use super::{DeviceRuntime, KernelCompiler};
use crate::ir::ast::*;
use crate::ir::blocks;
use crate::ir::eval::*;
use crate::ir::value::*;
use crate::launch::abi::{self, ArraySlot};
use crate::launch::blocking;
use crate::parfor_device_error;
use crate::parfor_internal_error;
use crate::utils::err::*;
use crate::utils::info::*;

#[derive(Clone, Debug)]
pub struct SimKernel {
    function: KernelFunction
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SimBuffer(usize);

#[derive(Clone, Debug, PartialEq)]
pub enum SimArg {
    Bytes(Vec<u8>),
    Buffer(usize),

    // Group-local memory of the given number of bytes.
    Local(usize),
}

enum ParamValue {
    Value(RtValue),
    Global {buf: usize, array: ArrayRef},
    Local {sz: ElemSize, shape: Vec<usize>},
}

#[derive(Debug)]
pub struct SimDevice {
    max_group_size: usize,
    buffers: Vec<Option<Vec<u8>>>,
    launches: usize,
}

struct WorkItem {
    global: Vec<i64>,
    group: Vec<i64>,
    local: i64,
    local_size: i64,
}

impl ExecHooks for WorkItem {
    fn work_item(&self, func: WorkItemFn, dim: usize, i: &Info) -> CompileResult<i64> {
        let v = match (func, dim) {
            (WorkItemFn::GlobalId, d) => self.global.get(d).copied(),
            (WorkItemFn::GroupId, d) => self.group.get(d).copied(),
            (WorkItemFn::LocalId, 0) => Some(self.local),
            (WorkItemFn::LocalSize, 0) => Some(self.local_size),
            (WorkItemFn::LocalId, d) => self.global.get(d).map(|_| 0),
            (WorkItemFn::LocalSize, d) => self.global.get(d).map(|_| 1),
        };
        match v {
            Some(v) => Ok(v),
            None => parfor_device_error!(i, "Work-item function {func} used with dimension {dim} \
                                             of a {0}-dimensional launch", self.global.len())
        }
    }
}

fn slot_int(args: &[SimArg], slot: usize, i: &Info) -> CompileResult<i64> {
    match args.get(slot) {
        Some(SimArg::Bytes(b)) if b.len() == abi::INT_SIZE => {
            let mut buf = [0u8; 8];
            buf.copy_from_slice(b);
            Ok(i64::from_le_bytes(buf))
        },
        Some(arg) => parfor_device_error!(i, "Expected an integer in argument slot {slot}, found {arg:?}"),
        None => parfor_device_error!(i, "Missing kernel argument slot {slot}")
    }
}

fn slot_usize(args: &[SimArg], slot: usize, i: &Info) -> CompileResult<usize> {
    match slot_int(args, slot, i)? {
        v if v >= 0 => Ok(v as usize),
        v => parfor_device_error!(i, "Invalid negative value {v} in argument slot {slot}")
    }
}

impl SimDevice {
    pub fn new(max_group_size: usize) -> SimDevice {
        SimDevice {max_group_size: max_group_size.max(1), buffers: vec![], launches: 0}
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.iter().filter(|b| b.is_some()).count()
    }

    pub fn launches(&self) -> usize {
        self.launches
    }

    fn buffer<'a>(&'a self, buf: usize, i: &Info) -> CompileResult<&'a Vec<u8>> {
        match self.buffers.get(buf) {
            Some(Some(data)) => Ok(data),
            _ => parfor_device_error!(i, "Use of invalid buffer {buf}")
        }
    }

    fn buffer_mut<'a>(&'a mut self, buf: usize, i: &Info) -> CompileResult<&'a mut Vec<u8>> {
        match self.buffers.get_mut(buf) {
            Some(Some(data)) => Ok(data),
            _ => parfor_device_error!(i, "Use of invalid buffer {buf}")
        }
    }

    fn decode_array(
        &self,
        args: &[SimArg],
        base: usize,
        sz: ElemSize,
        ndim: usize,
        i: &Info
    ) -> CompileResult<ParamValue> {
        let mut shape = vec![];
        let mut strides = vec![];
        let mut data = None;
        for (ofs, s) in abi::array_slots(ndim).into_iter().enumerate() {
            let slot = base + ofs;
            match s {
                ArraySlot::Meminfo | ArraySlot::Parent | ArraySlot::Nitems => (),
                ArraySlot::Itemsize => {
                    let itemsize = slot_usize(args, slot, i)?;
                    if itemsize != sz.size() {
                        parfor_device_error!(i, "Item size {itemsize} of argument slot {slot} \
                                                 does not match element type {sz}")?
                    }
                },
                ArraySlot::Data => data = args.get(slot).cloned(),
                ArraySlot::Shape(_) => shape.push(slot_usize(args, slot, i)?),
                ArraySlot::Stride(_) => strides.push(slot_usize(args, slot, i)?),
            }
        }
        match data {
            Some(SimArg::Buffer(buf)) => {
                let bytes = self.buffer(buf, i)?.clone();
                let array = ArrayData {sz, shape, strides, data: bytes}.into_ref();
                Ok(ParamValue::Global {buf, array})
            },
            Some(SimArg::Local(size)) => {
                let needed = shape.iter().product::<usize>() * sz.size();
                if needed > size {
                    parfor_device_error!(i, "Local memory of {size} bytes cannot hold an array \
                                             of shape {shape:?}")?
                }
                Ok(ParamValue::Local {sz, shape})
            },
            arg => parfor_device_error!(i, "Invalid data pointer {arg:?} in argument slot {0}", base + 4)
        }
    }

    fn decode_args(&self, k: &KernelFunction, args: &[SimArg]) -> CompileResult<Vec<ParamValue>> {
        let expected = abi::total_slots(&k.param_types);
        if args.len() != expected {
            parfor_device_error!(k.i, "Kernel {0} expects {expected} argument slots but was \
                                       launched with {1}", k.id, args.len())?
        }
        let mut slot = 0;
        let mut values = vec![];
        for ty in &k.param_types {
            let v = match ty {
                Type::Array {sz, ndim, ..} => self.decode_array(args, slot, *sz, *ndim, &k.i)?,
                Type::Scalar {sz} => match &args[slot] {
                    SimArg::Bytes(b) if b.len() == sz.size() => ParamValue::Value(decode_scalar(b, *sz)),
                    arg => parfor_device_error!(k.i, "Invalid scalar argument {arg:?} in slot {slot}")?
                },
                ty => parfor_internal_error!(k.i, "Unsupported kernel parameter type {ty}")?
            };
            values.push(v);
            slot += abi::slot_count(ty);
        }
        Ok(values)
    }

    fn run_group(
        &self,
        k: &KernelFunction,
        base: &Env,
        locals: &[(usize, ElemSize, Vec<usize>)],
        items: Vec<WorkItem>
    ) -> CompileResult<()> {
        let mut env = base.clone();
        for (idx, sz, shape) in locals {
            env.insert(k.params[*idx].clone(), RtValue::array(ArrayData::zeros(*sz, shape.clone())));
        }
        let mut frames = items.into_iter()
            .map(|item| Ok((Frame::new(&k.blocks, &k.parfors, env.clone(), &k.i)?, item, false)))
            .collect::<CompileResult<Vec<_>>>()?;
        loop {
            let mut at_barrier = 0;
            for (frame, item, done) in frames.iter_mut().filter(|(_, _, done)| !done) {
                match frame.run(item)? {
                    Status::Barrier => at_barrier += 1,
                    Status::Finished(_) => *done = true
                }
            }
            if at_barrier == 0 {
                return Ok(());
            }
            if at_barrier != frames.len() {
                let group = frames.first().map(|(_, item, _)| item.group.clone()).unwrap_or_default();
                parfor_device_error!(k.i, "Work-items of group {group:?} of kernel {0} diverged \
                                           at a barrier", k.id)?
            }
        }
    }
}

impl KernelCompiler for SimDevice {
    type Kernel = SimKernel;

    fn compile(&mut self, kernel: &KernelFunction) -> CompileResult<SimKernel> {
        if kernel.params.len() != kernel.param_types.len() {
            parfor_internal_error!(kernel.i, "Kernel {0} has {1} parameters but {2} parameter \
                                              types", kernel.id, kernel.params.len(),
                                              kernel.param_types.len())?
        }
        blocks::ensure_terminated(&kernel.blocks, &kernel.i)?;
        Ok(SimKernel {function: kernel.clone()})
    }
}

impl DeviceRuntime for SimDevice {
    type Buffer = SimBuffer;
    type Arg = SimArg;

    fn max_work_group_size(&self) -> usize {
        self.max_group_size
    }

    fn create_arg(&mut self, value: Option<&[u8]>, size: usize) -> CompileResult<SimArg> {
        match value {
            Some(bytes) if bytes.len() == size => Ok(SimArg::Bytes(bytes.to_vec())),
            Some(bytes) => {
                parfor_device_error!(Info::default(), "Argument of {0} bytes created with size \
                                                       {size}", bytes.len())
            },
            None => Ok(SimArg::Local(size))
        }
    }

    fn create_arg_from_buffer(&mut self, buf: &SimBuffer) -> CompileResult<SimArg> {
        self.buffer(buf.0, &Info::default())?;
        Ok(SimArg::Buffer(buf.0))
    }

    fn create_rw_buffer(&mut self, size: usize) -> CompileResult<SimBuffer> {
        self.buffers.push(Some(vec![0; size]));
        Ok(SimBuffer(self.buffers.len() - 1))
    }

    fn write_buffer(&mut self, buf: &SimBuffer, offset: usize, data: &[u8]) -> CompileResult<()> {
        let i = Info::default();
        let dst = self.buffer_mut(buf.0, &i)?;
        match dst.get_mut(offset..offset + data.len()) {
            Some(dst) => {
                dst.copy_from_slice(data);
                Ok(())
            },
            None => parfor_device_error!(i, "Write of {0} bytes at offset {offset} exceeds buffer \
                                             {1}", data.len(), buf.0)
        }
    }

    fn read_buffer(&mut self, buf: &SimBuffer, offset: usize, out: &mut [u8]) -> CompileResult<()> {
        let i = Info::default();
        let src = self.buffer(buf.0, &i)?;
        match src.get(offset..offset + out.len()) {
            Some(src) => {
                out.copy_from_slice(src);
                Ok(())
            },
            None => parfor_device_error!(i, "Read of {0} bytes at offset {offset} exceeds buffer \
                                             {1}", out.len(), buf.0)
        }
    }

    fn enqueue(
        &mut self,
        kernel: &SimKernel,
        args: Vec<SimArg>,
        starts: &[i64],
        stops: &[i64],
        max_group_size: usize
    ) -> CompileResult<()> {
        let k = &kernel.function;
        if starts.len() != stops.len() || starts.is_empty() {
            parfor_device_error!(k.i, "Invalid launch dimensions {starts:?} to {stops:?}")?
        }
        self.launches += 1;
        let extents = starts.iter().zip(stops.iter())
            .map(|(start, stop)| stop - start + 1)
            .collect::<Vec<i64>>();
        if extents.iter().any(|e| *e <= 0) {
            return Ok(());
        }

        let values = self.decode_args(k, &args)?;
        let mut base = Env::new();
        let mut globals = vec![];
        let mut locals = vec![];
        for (idx, v) in values.into_iter().enumerate() {
            let id = k.params[idx].clone();
            match v {
                ParamValue::Value(v) => {
                    base.insert(id, v);
                },
                ParamValue::Global {buf, array} => {
                    base.insert(id, RtValue::Array(array.clone()));
                    globals.push((buf, array));
                },
                ParamValue::Local {sz, shape} => locals.push((idx, sz, shape)),
            }
        }

        let bound = max_group_size.min(self.max_group_size);
        let local_size = blocking::local_size(extents[0] as usize, bound) as i64;
        let ngroups = extents[0] / local_size;
        let outer = extents[1..].iter()
            .fold(vec![vec![]], |points: Vec<Vec<i64>>, e| {
                points.into_iter()
                    .flat_map(|p| (0..*e).map(move |x| {
                        let mut p = p.clone();
                        p.push(x);
                        p
                    }))
                    .collect()
            });
        log::debug!("Launching kernel {0} with {ngroups} work-groups of size {local_size}", k.id);
        for g in 0..ngroups {
            for point in &outer {
                let items = (0..local_size)
                    .map(|t| {
                        let mut global = vec![starts[0] + g * local_size + t];
                        global.extend(point.iter().zip(starts[1..].iter()).map(|(x, s)| s + x));
                        let mut group = vec![g];
                        group.extend(point.iter().copied());
                        WorkItem {global, group, local: t, local_size}
                    })
                    .collect::<Vec<WorkItem>>();
                self.run_group(k, &base, &locals, items)?;
            }
        }

        for (buf, array) in globals {
            let data = array.borrow().data.clone();
            let dst = self.buffer_mut(buf, &k.i)?;
            if dst.len() != data.len() {
                parfor_internal_error!(k.i, "Kernel {0} changed the size of buffer {buf}", k.id)?
            }
            *dst = data;
        }
        Ok(())
    }

    fn release_buffer(&mut self, buf: SimBuffer) -> CompileResult<()> {
        match self.buffers.get_mut(buf.0) {
            Some(b @ Some(_)) => {
                *b = None;
                Ok(())
            },
            _ => parfor_device_error!(Info::default(), "Release of invalid buffer {0}", buf.0)
        }
    }
}
