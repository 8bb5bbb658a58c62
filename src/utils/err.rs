use std::error;
use std::fmt;

#[derive(Clone, Debug, PartialEq)]
pub enum ErrorKind {
    Compile,
    Internal,
    Device
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Compile => write!(f, "Parfor lowering error"),
            ErrorKind::Internal => write!(f, "Parfor internal error"),
            ErrorKind::Device => write!(f, "Parfor device error"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CompileError {
    msg: String,
    kind: ErrorKind
}

impl CompileError {
    pub fn compile_err(msg: String) -> Self {
        CompileError {msg, kind: ErrorKind::Compile}
    }

    pub fn internal_err(msg: String) -> Self {
        CompileError {msg, kind: ErrorKind::Internal}
    }

    pub fn device_err(msg: String) -> Self {
        CompileError {msg, kind: ErrorKind::Device}
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl error::Error for CompileError {}
impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{0}: {1}", self.kind, &self.msg)
    }
}

pub type CompileResult<T> = Result<T, CompileError>;

#[macro_export]
macro_rules! parfor_compile_error {
    ($i:expr,$($t:tt)*) => {{
        Err(CompileError::compile_err($i.error_msg(format!($($t)*))))
    }}
}

#[macro_export]
macro_rules! parfor_internal_error {
    ($i:expr,$($t:tt)*) => {{
        Err(CompileError::internal_err($i.error_msg(format!($($t)*))))
    }}
}

#[macro_export]
macro_rules! parfor_device_error {
    ($i:expr,$($t:tt)*) => {{
        Err(CompileError::device_err($i.error_msg(format!($($t)*))))
    }}
}
