pub mod sim;

use crate::ir::ast::*;
use crate::utils::err::*;

/// Compiles kernel functions into objects the device can launch.
pub trait KernelCompiler {
    /// A compiled kernel
    type Kernel;

    /// Compile a kernel function, with the parameters in the order of the launch arguments
    fn compile(&mut self, kernel: &KernelFunction) -> CompileResult<Self::Kernel>;
}

/// The device runtime calls used by the host code of a kernel launch.
pub trait DeviceRuntime: KernelCompiler {
    /// Device memory readable and writable by kernels
    type Buffer;
    /// One slot of the flat kernel argument array
    type Arg;

    /// The largest number of work-items in a work-group
    fn max_work_group_size(&self) -> usize;

    /// Create an argument holding a copy of the given bytes. Without a value, the argument refers
    /// to group-local memory of the given size, allocated separately for each work-group.
    fn create_arg(&mut self, value: Option<&[u8]>, size: usize) -> CompileResult<Self::Arg>;

    /// Create an argument referring to the data of a buffer
    fn create_arg_from_buffer(&mut self, buf: &Self::Buffer) -> CompileResult<Self::Arg>;

    fn create_rw_buffer(&mut self, size: usize) -> CompileResult<Self::Buffer>;

    fn write_buffer(&mut self, buf: &Self::Buffer, offset: usize, data: &[u8]) -> CompileResult<()>;

    fn read_buffer(&mut self, buf: &Self::Buffer, offset: usize, out: &mut [u8]) -> CompileResult<()>;

    /// Launch a kernel over the inclusive index ranges [starts, stops]. The runtime picks the
    /// work-group sizes by the auto-blocking rule, bounded by max_group_size. The call blocks until
    /// the kernel has finished.
    fn enqueue(
        &mut self,
        kernel: &Self::Kernel,
        args: Vec<Self::Arg>,
        starts: &[i64],
        stops: &[i64],
        max_group_size: usize
    ) -> CompileResult<()>;

    fn release_buffer(&mut self, buf: Self::Buffer) -> CompileResult<()>;
}

// Keeps every compiled kernel alive for as long as the registry lives, as the runtime cannot tell
// when the host code referring to a kernel will no longer run. Kernels are never removed.
#[derive(Debug)]
pub struct KernelRegistry<K> {
    kernels: Vec<K>
}

impl<K> KernelRegistry<K> {
    pub fn new() -> KernelRegistry<K> {
        KernelRegistry {kernels: vec![]}
    }

    pub fn push(&mut self, kernel: K) -> KernelId {
        self.kernels.push(kernel);
        self.kernels.len() - 1
    }

    pub fn get<'a>(&'a self, id: KernelId) -> Option<&'a K> {
        self.kernels.get(id)
    }

    pub fn len(&self) -> usize {
        self.kernels.len()
    }
}

impl<K> Default for KernelRegistry<K> {
    fn default() -> Self {
        KernelRegistry::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registry_is_append_only() {
        let mut r = KernelRegistry::new();
        assert_eq!(r.push("a"), 0);
        assert_eq!(r.push("b"), 1);
        assert_eq!(r.get(0), Some(&"a"));
        assert_eq!(r.get(2), None);
        assert_eq!(r.len(), 2);
    }
}
