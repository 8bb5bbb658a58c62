use crate::option::CompileOptions;

use lazy_static::lazy_static;

use std::collections::BTreeSet;

// The effect a call may have on the values it can reach.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    Pure,
    MutatesReceiver,
    Unknown
}

impl Effect {
    // An unknown effect is treated as a mutation of the receiver and its arguments.
    pub fn may_mutate(&self) -> bool {
        *self != Effect::Pure
    }
}

lazy_static! {
    static ref DEFAULT_PURE_CALLS: BTreeSet<(&'static str, &'static str)> = {
        let math = [
            "sqrt", "exp", "log", "log2", "log10", "sin", "cos", "tan", "asin", "acos", "atan",
            "atan2", "sinh", "cosh", "tanh", "floor", "ceil", "fabs", "pow", "hypot", "isnan",
            "isinf", "pi", "e"
        ];
        let numpy = [
            "empty", "zeros", "ones", "sqrt", "exp", "log", "sin", "cos", "tan", "abs", "absolute",
            "minimum", "maximum", "float32", "float64", "int32", "int64", "pi"
        ];
        let builtins = ["len", "abs", "min", "max", "range", "int", "float", "bool"];
        math.into_iter().map(|a| ("math", a))
            .chain(numpy.into_iter().map(|a| ("numpy", a)))
            .chain(builtins.into_iter().map(|a| ("builtins", a)))
            .collect()
    };

    // Methods of array values that update the receiver in place.
    static ref MUTATING_METHODS: BTreeSet<&'static str> = {
        ["fill", "sort", "resize", "put", "itemset", "setfield", "partition"]
            .into_iter()
            .collect()
    };
}

// A table mapping (module, attribute) pairs to the effect of calling them. Combinations absent
// from the table have an unknown effect.
#[derive(Clone, Debug)]
pub struct CallEffects {
    pure: BTreeSet<(String, String)>
}

impl CallEffects {
    pub fn new(opts: &CompileOptions) -> CallEffects {
        let pure = DEFAULT_PURE_CALLS.iter()
            .map(|(m, a)| (m.to_string(), a.to_string()))
            .chain(opts.pure_calls.iter().cloned())
            .collect();
        CallEffects {pure}
    }

    pub fn module_call(&self, module: &str, attr: &str) -> Effect {
        if self.pure.contains(&(module.to_string(), attr.to_string())) {
            Effect::Pure
        } else {
            Effect::Unknown
        }
    }

    // A call to a fully qualified function name such as "numpy.sqrt".
    pub fn qualified_call(&self, qualname: &str) -> Effect {
        match qualname.rsplit_once('.') {
            Some((module, attr)) => self.module_call(module, attr),
            None => self.module_call("builtins", qualname)
        }
    }

    // A method call on a value that is not a module.
    pub fn method_call(&self, attr: &str) -> Effect {
        if MUTATING_METHODS.contains(attr) {
            Effect::MutatesReceiver
        } else {
            Effect::Unknown
        }
    }
}

impl Default for CallEffects {
    fn default() -> Self {
        CallEffects::new(&CompileOptions::default())
    }
}
