use super::abi;
use crate::device::{DeviceRuntime, KernelRegistry};
use crate::ir::ast::*;
use crate::ir::eval::*;
use crate::ir::value::*;
use crate::parfor_device_error;
use crate::parfor_internal_error;
use crate::utils::err::*;
use crate::utils::info::*;
use crate::utils::name::Name;

use std::collections::BTreeMap;

// Executes the device calls of host code against a device runtime.
pub struct HostExec<'a, D: DeviceRuntime> {
    device: &'a mut D,
    kernels: &'a KernelRegistry<D::Kernel>,
    args: Vec<Option<D::Arg>>,
    buffers: BTreeMap<Name, D::Buffer>,
}

fn int_bytes(v: i64) -> Vec<u8> {
    v.to_le_bytes().to_vec()
}

fn array_field(a: &ArrayData, field: &ArrayField, id: &Name, i: &Info) -> CompileResult<i64> {
    let v = match field {
        ArrayField::Nitems => Some(a.nitems()),
        ArrayField::Itemsize => Some(a.itemsize()),
        ArrayField::Shape(d) => a.shape.get(*d).copied(),
        ArrayField::Stride(d) => a.strides.get(*d).copied(),
    };
    match v {
        Some(v) => Ok(v as i64),
        None => parfor_internal_error!(i, "Array {id} has no descriptor field {field:?}")
    }
}

fn lookup_array(env: &Env, id: &Name, i: &Info) -> CompileResult<ArrayRef> {
    match lookup(env, id, i)?.as_array() {
        Some(a) => Ok(a),
        None => parfor_internal_error!(i, "Expected {id} to be an array")
    }
}

fn operand(env: &Env, op: &Operand, i: &Info) -> CompileResult<i64> {
    match op {
        Operand::Const {v} => Ok(*v),
        Operand::Var {id} => match lookup(env, id, i)?.as_i64() {
            Some(v) => Ok(v),
            None => parfor_internal_error!(i, "Launch bound {id} is not an integer")
        }
    }
}

fn find_buffer<'a, B>(buffers: &'a BTreeMap<Name, B>, buf: &Name, i: &Info) -> CompileResult<&'a B> {
    match buffers.get(buf) {
        Some(b) => Ok(b),
        None => parfor_internal_error!(i, "Use of undefined device buffer {buf}")
    }
}

impl<'a, D: DeviceRuntime> HostExec<'a, D> {
    pub fn new(device: &'a mut D, kernels: &'a KernelRegistry<D::Kernel>) -> HostExec<'a, D> {
        HostExec {device, kernels, args: vec![], buffers: BTreeMap::new()}
    }

    fn set_arg(&mut self, slot: usize, arg: D::Arg, i: &Info) -> CompileResult<()> {
        match self.args.get_mut(slot) {
            Some(s @ None) => {
                *s = Some(arg);
                Ok(())
            },
            Some(Some(_)) => parfor_internal_error!(i, "Kernel argument slot {slot} is filled twice"),
            None => parfor_internal_error!(i, "Kernel argument slot {slot} was not reserved")
        }
    }

    fn source_bytes(&self, src: &ArgSource, env: &Env, i: &Info) -> CompileResult<Vec<u8>> {
        match src {
            ArgSource::Null => Ok(vec![0; abi::POINTER_SIZE]),
            ArgSource::Int {v} => Ok(int_bytes(*v)),
            ArgSource::Field {array, field} => {
                let a = lookup_array(env, array, i)?;
                let v = array_field(&a.borrow(), field, array, i)?;
                Ok(int_bytes(v))
            },
            ArgSource::Scalar {id, sz} => {
                let v = lookup(env, id, i)?;
                match encode_scalar(&v, *sz) {
                    Some(bytes) => Ok(bytes),
                    None => parfor_device_error!(i, "Cannot pass value {v} of {id} as {sz}")
                }
            },
            ArgSource::Local {..} => {
                parfor_internal_error!(i, "Group-local memory has no host value")
            }
        }
    }
}

impl<'a, D: DeviceRuntime> ExecHooks for HostExec<'a, D> {
    fn device_call(&mut self, call: &DeviceCall, env: &mut Env, i: &Info) -> CompileResult<()> {
        log::trace!("Executing device call {call:?}");
        match call {
            DeviceCall::ReserveArgs {count} => {
                if !self.args.is_empty() {
                    parfor_internal_error!(i, "Kernel arguments reserved while in use")?
                }
                self.args = (0..*count).map(|_| None).collect();
                Ok(())
            },
            DeviceCall::CreateArg {slot, src: ArgSource::Local {sz, max_group_size, like}} => {
                let row_items = match like {
                    Some(id) => lookup_array(env, id, i)?.borrow().nitems(),
                    None => 1
                };
                let size = max_group_size * row_items * sz.size();
                let arg = self.device.create_arg(None, size)?;
                self.set_arg(*slot, arg, i)
            },
            DeviceCall::CreateArg {slot, src} => {
                let bytes = self.source_bytes(src, env, i)?;
                let arg = self.device.create_arg(Some(&bytes), bytes.len())?;
                self.set_arg(*slot, arg, i)
            },
            DeviceCall::CreateBuffer {buf, array} => {
                let nbytes = lookup_array(env, array, i)?.borrow().nbytes();
                let b = self.device.create_rw_buffer(nbytes)?;
                self.buffers.insert(buf.clone(), b);
                Ok(())
            },
            DeviceCall::WriteBuffer {buf, array} => {
                let a = lookup_array(env, array, i)?;
                let data = a.borrow().data.clone();
                let b = find_buffer(&self.buffers, buf, i)?;
                self.device.write_buffer(b, 0, &data)
            },
            DeviceCall::CreateArgFromBuffer {slot, buf} => {
                let b = find_buffer(&self.buffers, buf, i)?;
                let arg = self.device.create_arg_from_buffer(b)?;
                self.set_arg(*slot, arg, i)
            },
            DeviceCall::Enqueue {kernel, nargs, starts, stops, max_group_size} => {
                let k = match self.kernels.get(*kernel) {
                    Some(k) => k,
                    None => parfor_internal_error!(i, "Launch of unknown kernel {kernel}")?
                };
                if self.args.len() != *nargs {
                    parfor_internal_error!(i, "Launch with {nargs} arguments but {0} slots were \
                                               reserved", self.args.len())?
                }
                let args = match self.args.iter_mut().map(|a| a.take()).collect::<Option<Vec<D::Arg>>>() {
                    Some(args) => args,
                    None => parfor_internal_error!(i, "Launch with unfilled argument slots")?
                };
                let starts = starts.iter()
                    .map(|op| operand(env, op, i))
                    .collect::<CompileResult<Vec<i64>>>()?;
                let stops = stops.iter()
                    .map(|op| operand(env, op, i))
                    .collect::<CompileResult<Vec<i64>>>()?;
                self.device.enqueue(k, args, &starts, &stops, *max_group_size)
            },
            DeviceCall::ReadBuffer {buf, array} => {
                let a = lookup_array(env, array, i)?;
                let mut a = a.borrow_mut();
                let b = find_buffer(&self.buffers, buf, i)?;
                self.device.read_buffer(b, 0, &mut a.data)
            },
            DeviceCall::ReleaseBuffer {buf} => {
                match self.buffers.remove(buf) {
                    Some(b) => self.device.release_buffer(b),
                    None => parfor_internal_error!(i, "Release of undefined device buffer {buf}")
                }
            },
            DeviceCall::ReleaseArgs => {
                self.args.clear();
                Ok(())
            },
        }
    }
}
