use std::fmt;
use std::fs;

// Source location of an IR instruction. Instructions synthesized by the lowering carry the location
// of the parallel loop they were generated for.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Info {
    filename: String,
    line: usize,
    col: usize
}

impl Info {
    pub fn new(fname: &str, line: usize, col: usize) -> Info {
        Info {filename: fname.to_string(), line, col}
    }

    pub fn get_line(&self) -> usize {
        self.line
    }

    pub fn is_known(&self) -> bool {
        !self.filename.is_empty() && self.line > 0
    }

    pub fn error_msg(&self, msg: String) -> String {
        if !self.is_known() {
            return msg;
        }
        match fs::read_to_string(&self.filename) {
            Ok(code) => self.extract_line(&code, msg),
            Err(_) => format!("{msg} (at {self})")
        }
    }

    fn extract_line(&self, code: &str, msg: String) -> String {
        let line = code.lines().nth(self.line - 1).unwrap_or("");
        let marker = format!("{0}^", " ".repeat(self.col));
        format!("{msg}\n\nOn line {0} of file {1}:\n{line}\n{marker}\n", self.line, self.filename)
    }
}

impl fmt::Display for Info {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{0}:{1}:{2}", self.filename, self.line, self.col)
    }
}

pub trait InfoNode {
    fn get_info(&self) -> Info;
}
