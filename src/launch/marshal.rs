use super::abi::{self, ArraySlot};
use crate::ir::ast::*;
use crate::parfor::graph::{int_type, GraphBuilder};
use crate::parfor::kernel::{ArgRole, KernelArg, SynthesizedKernel};
use crate::parfor::signature::ShapeSignature;
use crate::parfor_compile_error;
use crate::parfor_internal_error;
use crate::utils::err::*;
use crate::utils::info::*;
use crate::utils::name::Name;

struct Marshaller<'a> {
    b: &'a mut GraphBuilder,
    slot: usize,
    buffers: Vec<(Name, &'a KernelArg)>,
}

impl<'a> Marshaller<'a> {
    fn call(&mut self, call: DeviceCall) {
        log::trace!("Emitting device call {call:?}");
        let i = self.b.info().clone();
        self.b.emit(Inst::Device {call, i});
    }

    fn create_arg(&mut self, src: ArgSource) {
        let slot = self.slot;
        self.slot += 1;
        self.call(DeviceCall::CreateArg {slot, src});
    }

    fn array_arg(&mut self, arg: &'a KernelArg, ndim: usize) {
        let buf = Name::sym_str(&format!("{0}_buf", arg.host));
        self.call(DeviceCall::CreateBuffer {buf: buf.clone(), array: arg.host.clone()});
        if arg.role != ArgRole::Partial {
            self.call(DeviceCall::WriteBuffer {buf: buf.clone(), array: arg.host.clone()});
        }
        for s in abi::array_slots(ndim) {
            let field = |field| ArgSource::Field {array: arg.host.clone(), field};
            match s {
                ArraySlot::Meminfo | ArraySlot::Parent => self.create_arg(ArgSource::Null),
                ArraySlot::Nitems => self.create_arg(field(ArrayField::Nitems)),
                ArraySlot::Itemsize => self.create_arg(field(ArrayField::Itemsize)),
                ArraySlot::Data => {
                    let slot = self.slot;
                    self.slot += 1;
                    self.call(DeviceCall::CreateArgFromBuffer {slot, buf: buf.clone()});
                },
                ArraySlot::Shape(d) => self.create_arg(field(ArrayField::Shape(d))),
                ArraySlot::Stride(d) => self.create_arg(field(ArrayField::Stride(d))),
            }
        }
        self.buffers.push((buf, arg));
    }

    // Group-local scratch memory is never initialized by the host. Its leading extent is the
    // maximum work-group size, and any remaining extents are those of the given array.
    fn local_arg(&mut self, sz: ElemSize, ndim: usize, max_group_size: usize, like: Option<Name>) {
        let wg = max_group_size as i64;
        for s in abi::array_slots(ndim) {
            match s {
                ArraySlot::Meminfo | ArraySlot::Parent => self.create_arg(ArgSource::Null),
                ArraySlot::Nitems => self.create_arg(ArgSource::Int {v: wg}),
                ArraySlot::Itemsize => self.create_arg(ArgSource::Int {v: sz.size() as i64}),
                ArraySlot::Data => {
                    self.create_arg(ArgSource::Local {sz, max_group_size, like: like.clone()})
                },
                ArraySlot::Shape(0) => self.create_arg(ArgSource::Int {v: wg}),
                ArraySlot::Shape(d) => match &like {
                    Some(id) => self.create_arg(ArgSource::Field {
                        array: id.clone(), field: ArrayField::Shape(d - 1)
                    }),
                    None => self.create_arg(ArgSource::Int {v: 1})
                },
                ArraySlot::Stride(_) => self.create_arg(ArgSource::Int {v: 1}),
            }
        }
    }
}

fn stop_operand(b: &mut GraphBuilder, stop: &Operand) -> Operand {
    match stop {
        Operand::Const {v} => Operand::Const {v: v - 1},
        Operand::Var {id} => {
            let one = b.int("one", 1);
            let last = b.binop("last_index", BinOp::Sub, id, &one, int_type());
            Operand::Var {id: last}
        }
    }
}

fn reduction_host<'a>(args: &'a [KernelArg], orig: &Name) -> Option<&'a KernelArg> {
    args.iter().find(|a| a.role == ArgRole::Reduction && &a.orig == orig)
}

// Emits the host code launching a synthesized kernel over the iteration space of the given loop
// nests. The flat argument array is filled in the order of the kernel parameters, after which the
// kernel is enqueued and the buffers written by the kernel are read back into their host arrays.
pub fn emit_launch(
    b: &mut GraphBuilder,
    kernel_id: KernelId,
    k: &SynthesizedKernel,
    sig: &ShapeSignature,
    nests: &[LoopNest],
    max_group_size: usize,
    i: &Info
) -> CompileResult<usize> {
    if sig.inputs.len() != k.args.len() + 1 {
        parfor_internal_error!(i, "Shape signature of {0} entries does not match the {1} \
                                   arguments of kernel {2}", sig.inputs.len(), k.args.len(),
                                   k.kernel.id)?
    }
    let count = abi::total_slots(k.args.iter().map(|a| &a.ty));
    let mut m = Marshaller {b, slot: 0, buffers: vec![]};
    m.call(DeviceCall::ReserveArgs {count});
    for arg in &k.args {
        match &arg.ty {
            Type::Array {sz, ndim, addrspace: Some(AddrSpace::Local)} => {
                let like = if *ndim > 1 {
                    reduction_host(&k.args, &arg.orig).map(|a| a.host.clone())
                } else {
                    None
                };
                m.local_arg(*sz, *ndim, max_group_size, like);
            },
            Type::Array {ndim, ..} => m.array_arg(arg, *ndim),
            Type::Scalar {sz} => m.create_arg(ArgSource::Scalar {id: arg.host.clone(), sz: *sz}),
            ty => {
                parfor_compile_error!(i, "Parameter {0} of type {ty} cannot be passed to a \
                                          kernel", arg.orig)?
            }
        }
    }
    if m.slot != count {
        parfor_internal_error!(i, "Kernel {0} reserved {count} argument slots but filled {1}",
                               k.kernel.id, m.slot)?
    }

    let starts = nests.iter().map(|n| n.start.clone()).collect::<Vec<Operand>>();
    let stops = nests.iter()
        .map(|n| stop_operand(m.b, &n.stop))
        .collect::<Vec<Operand>>();
    m.call(DeviceCall::Enqueue {kernel: kernel_id, nargs: count, starts, stops, max_group_size});
    let buffers = std::mem::take(&mut m.buffers);
    for (buf, arg) in &buffers {
        if arg.is_written() {
            m.call(DeviceCall::ReadBuffer {buf: buf.clone(), array: arg.host.clone()});
        }
    }
    for (buf, _) in buffers {
        m.call(DeviceCall::ReleaseBuffer {buf});
    }
    m.call(DeviceCall::ReleaseArgs);
    Ok(count)
}
