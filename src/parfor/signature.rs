use super::kernel::{ArgRole, SynthesizedKernel};
use crate::utils::name::Name;
use crate::utils::pprint::*;

use itertools::Itertools;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// The shape classes of one kernel argument, one per dimension. Negative classes are unknown and
// receive a symbol of their own.
#[derive(Clone, Debug, PartialEq)]
pub struct ArgClasses {
    pub classes: Vec<i64>,
    pub is_race: bool,

    // The number of leading dimension symbols dropped from the signature of the argument.
    pub start_dim: usize,
}

// The dimension symbols of the kernel arguments, preceded by the implicit scheduling argument.
#[derive(Clone, Debug, PartialEq)]
pub struct ShapeSignature {
    pub inputs: Vec<Vec<String>>,
    pub outputs: Vec<Vec<String>>,
}

fn symbol(n: usize) -> String {
    let letter = (b'a' + (n % 26) as u8) as char;
    if n < 26 {
        letter.to_string()
    } else {
        format!("{letter}{0}", n / 26)
    }
}

pub fn shape_signature(args: &[ArgClasses]) -> ShapeSignature {
    let max_class = args.iter()
        .filter(|a| !a.is_race)
        .flat_map(|a| a.classes.iter().copied())
        .max()
        .unwrap_or(-1);
    let sched = max_class + 1;
    let known = args.iter()
        .filter(|a| !a.is_race)
        .flat_map(|a| a.classes.iter().copied())
        .chain([sched])
        .filter(|c| *c >= 0)
        .collect::<BTreeSet<i64>>();
    let letters = known.into_iter()
        .enumerate()
        .map(|(idx, c)| (c, symbol(idx)))
        .collect::<BTreeMap<i64, String>>();
    let mut next = letters.len();
    let mut fresh = || {
        let s = symbol(next);
        next += 1;
        s
    };

    let mut inputs = vec![];
    inputs.push(letters.get(&sched).cloned().into_iter().collect::<Vec<String>>());
    for a in args {
        let syms = a.classes.iter()
            .map(|c| match letters.get(c) {
                Some(s) if !a.is_race => s.clone(),
                _ => fresh()
            })
            .skip(a.start_dim)
            .collect::<Vec<String>>();
        inputs.push(syms);
    }
    ShapeSignature {inputs, outputs: vec![]}
}

fn intrinsic_classes(id: &Name, ndim: usize, shape_classes: &BTreeMap<Name, Vec<i64>>) -> Vec<i64> {
    match shape_classes.get(id) {
        Some(cs) if cs.len() == ndim => cs.clone(),
        _ => vec![-1; ndim]
    }
}

// Determines the shape classes of every argument of a synthesized kernel. Buffers indexed by the
// work-group get an unknown leading class in front of the classes of their reduction variable.
pub fn kernel_arg_classes(
    k: &SynthesizedKernel,
    shape_classes: &BTreeMap<Name, Vec<i64>>
) -> Vec<ArgClasses> {
    let start_dims = k.classes.reductions.iter()
        .map(|r| (r.var.clone(), r.signature_start_dim()))
        .collect::<BTreeMap<Name, usize>>();
    k.args.iter()
        .map(|a| {
            let is_race = k.classes.races.contains(&a.orig);
            match a.role {
                ArgRole::Input | ArgRole::Output | ArgRole::Reduction => {
                    let classes = if is_race {
                        vec![-1; a.ty.ndim()]
                    } else {
                        intrinsic_classes(&a.orig, a.ty.ndim(), shape_classes)
                    };
                    ArgClasses {classes, is_race, start_dim: 0}
                },
                ArgRole::Scratch | ArgRole::Partial => {
                    let mut classes = vec![-1];
                    classes.extend(intrinsic_classes(&a.orig, a.ty.ndim() - 1, shape_classes));
                    let start_dim = if a.role == ArgRole::Partial {
                        start_dims.get(&a.orig).copied().unwrap_or(0)
                    } else {
                        0
                    };
                    ArgClasses {classes, is_race, start_dim}
                }
            }
        })
        .collect()
}

pub fn build_signature(
    k: &SynthesizedKernel,
    shape_classes: &BTreeMap<Name, Vec<i64>>
) -> ShapeSignature {
    shape_signature(&kernel_arg_classes(k, shape_classes))
}

// An empty list of tuples is printed as a single empty tuple, as in "(n)->()".
fn print_tuples(tuples: &[Vec<String>]) -> String {
    if tuples.is_empty() {
        "()".to_string()
    } else {
        tuples.iter()
            .map(|t| format!("({0})", t.iter().join(",")))
            .join(",")
    }
}

impl fmt::Display for ShapeSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{0}->{1}", print_tuples(&self.inputs), print_tuples(&self.outputs))
    }
}

impl PrettyPrint for ShapeSignature {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        (env, self.to_string())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn arg(classes: Vec<i64>) -> ArgClasses {
        ArgClasses {classes, is_race: false, start_dim: 0}
    }

    fn race(ndim: usize) -> ArgClasses {
        ArgClasses {classes: vec![-1; ndim], is_race: true, start_dim: 0}
    }

    fn syms(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn equal_classes_share_symbols() {
        let sig = shape_signature(&[arg(vec![0]), arg(vec![0]), arg(vec![])]);
        assert_eq!(sig.inputs, vec![syms(&["b"]), syms(&["a"]), syms(&["a"]), syms(&[])]);
        assert!(sig.outputs.is_empty());
    }

    #[test]
    fn scheduling_class_never_collides() {
        let sig = shape_signature(&[arg(vec![3, 5])]);
        assert_eq!(sig.inputs[0], syms(&["c"]));
        assert_eq!(sig.inputs[1], syms(&["a", "b"]));
    }

    #[test]
    fn unknown_classes_get_fresh_symbols() {
        let sig = shape_signature(&[arg(vec![-1]), arg(vec![-1, 0])]);
        assert_eq!(sig.inputs, vec![syms(&["b"]), syms(&["c"]), syms(&["d", "a"])]);
    }

    #[test]
    fn race_never_shares_symbols() {
        let sig = shape_signature(&[arg(vec![0]), race(1)]);
        let race_syms = &sig.inputs[2];
        for (idx, t) in sig.inputs.iter().enumerate() {
            if idx != 2 {
                assert!(t.iter().all(|s| !race_syms.contains(s)));
            }
        }
    }

    #[test]
    fn start_dim_strips_leading_symbols() {
        let partial = ArgClasses {classes: vec![-1], is_race: false, start_dim: 1};
        let sig = shape_signature(&[arg(vec![0]), partial]);
        assert_eq!(sig.inputs[2], syms(&[]));
    }

    #[test]
    fn many_symbols_are_numbered() {
        let args = (0..30).map(|c| arg(vec![c])).collect::<Vec<ArgClasses>>();
        let sig = shape_signature(&args);
        assert_eq!(sig.inputs[0], syms(&["e1"]));
        assert_eq!(sig.inputs[27], syms(&["a1"]));
    }

    #[test]
    fn display_signature() {
        let sig = shape_signature(&[arg(vec![0]), arg(vec![])]);
        assert_eq!(sig.to_string(), "(b),(a),()->()");
    }

    #[test]
    fn display_without_outputs_prints_empty_tuple() {
        let sig = ShapeSignature {inputs: vec![syms(&["a"])], outputs: vec![]};
        assert_eq!(sig.to_string(), "(a)->()");
    }
}
