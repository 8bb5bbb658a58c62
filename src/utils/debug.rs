use crate::option::CompileOptions;
use crate::utils::pprint::PrettyPrint;

use std::time;

pub struct DebugEnv {
    debug_print: bool,
    debug_perf: bool,
    start: time::Instant
}

impl DebugEnv {
    pub fn new(opts: &CompileOptions) -> DebugEnv {
        DebugEnv {
            debug_print: opts.debug_print,
            debug_perf: opts.debug_perf,
            start: time::Instant::now()
        }
    }

    fn elapsed_us(&self) -> u128 {
        time::Instant::now().duration_since(self.start).as_micros()
    }

    fn print_ast_message<T: PrettyPrint>(t: u128, bounds: &str, msg: &str, ast: &T) -> String {
        format!("{0} {msg} (time: {1} us) {0}\n{2}", bounds, t, ast.pprint_default())
    }

    pub fn print<T: PrettyPrint>(&self, msg: &str, ast: &T) {
        if self.debug_print {
            let bounds = "=".repeat(5);
            let s = DebugEnv::print_ast_message(self.elapsed_us(), &bounds, msg, ast);
            println!("{}", s);
        }
    }

    pub fn report_time(&self, msg: &str) {
        if self.debug_perf {
            println!("{msg}: {0} us", self.elapsed_us());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::utils::name::Name;

    use regex::Regex;

    #[test]
    fn print_message_banner() {
        let ast: Vec<Name> = vec![Name::new("x".to_string())];
        let s = DebugEnv::print_ast_message(12, "=", "msg", &ast);
        let re = Regex::new(r"^= msg \(time: 12 us\) =\nx$").unwrap();
        assert!(re.is_match(&s));
    }
}
