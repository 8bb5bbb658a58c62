pub mod device;
pub mod ir;
pub mod launch;
pub mod lower;
pub mod option;
pub mod parfor;
pub mod utils;

pub use device::sim::SimDevice;
pub use device::{DeviceRuntime, KernelCompiler, KernelRegistry};
pub use lower::{LoopDiagnostics, Session};
pub use option::CompileOptions;
pub use utils::err::{CompileError, CompileResult, ErrorKind};

#[cfg(test)]
pub mod test {
    use crate::utils::err::*;

    use regex::Regex;

    use std::fmt;

    pub fn assert_error_matches<T: fmt::Debug>(r: CompileResult<T>, pat: &str) {
        let err_msg = format!("{}", r.unwrap_err());
        let re = Regex::new(pat).unwrap();
        assert!(
            re.is_match(&err_msg),
            "Error message \"{0}\" did not match expected pattern \"{1}\".",
            err_msg, pat
        );
    }
}
