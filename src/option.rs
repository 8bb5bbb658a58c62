#[derive(Clone, Debug)]
pub struct CompileOptions {
    ////////////////////
    // ANALYSIS FLAGS //
    ////////////////////

    // Additional (module, attribute) pairs whose calls are known to be free of side-effects. These
    // extend the built-in call-effect table, allowing instructions calling them to be hoisted out of
    // parallel loops.
    pub pure_calls: Vec<(String, String)>,

    ///////////////////
    // CODEGEN FLAGS //
    ///////////////////

    // Prefix used for the names of synthesized kernel functions.
    pub kernel_prefix: String,

    // Overrides the maximum work-group size reported by the device runtime. This bounds the size of
    // the group-local scratch buffers used in reductions.
    pub max_work_group_size: Option<usize>,

    // Enable to make the lowering print intermediate block graphs to standard output.
    pub debug_print: bool,

    // Enable to have the lowering report the time spent in its stages.
    pub debug_perf: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            pure_calls: vec![],
            kernel_prefix: "__parfor_kernel".to_string(),
            max_work_group_size: None,
            debug_print: false,
            debug_perf: false,
        }
    }
}

impl CompileOptions {
    pub fn is_debug_enabled(&self) -> bool {
        self.debug_print || self.debug_perf
    }
}
