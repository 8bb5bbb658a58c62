use crate::utils::name::Name;

use itertools::Itertools;
use rand::distributions::{Alphanumeric, DistString};

use std::collections::{BTreeMap, BTreeSet};

pub const DEFAULT_INDENT: usize = 2;

#[derive(Debug)]
pub struct PrettyPrintEnv {
    used: BTreeSet<String>,
    vars: BTreeMap<String, Name>,
    indent: usize,
}

impl PrettyPrintEnv {
    pub fn new() -> Self {
        PrettyPrintEnv {
            used: BTreeSet::new(),
            vars: BTreeMap::new(),
            indent: 0,
        }
    }

    pub fn incr_indent(self) -> Self {
        PrettyPrintEnv {indent: self.indent + DEFAULT_INDENT, ..self}
    }

    pub fn decr_indent(self) -> Self {
        PrettyPrintEnv {indent: self.indent.saturating_sub(DEFAULT_INDENT), ..self}
    }

    pub fn print_indent(&self) -> String {
        " ".repeat(self.indent)
    }
}

pub trait PrettyPrint {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String);

    fn pprint_default(&self) -> String {
        let (_, s) = self.pprint(PrettyPrintEnv::new());
        s
    }
}

fn rand_alphanum(n: usize) -> String {
    Alphanumeric.sample_string(&mut rand::thread_rng(), n)
}

// Picks a printed representation of a name that no other name printed in the same environment
// uses. Symbolized names first try their symbol suffix and fall back to a random suffix.
fn alloc_free_string(mut env: PrettyPrintEnv, id: &Name) -> (PrettyPrintEnv, String) {
    let mut s = id.get_str().clone();
    if env.used.contains(&s) {
        s = id.print_with_sym();
        while env.used.contains(&s) {
            s = format!("{0}_{1}", id.get_str(), rand_alphanum(5));
        }
    };
    env.used.insert(s.clone());
    env.vars.insert(s.clone(), id.clone());
    (env, s)
}

impl PrettyPrint for Name {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        let existing = env.vars.iter()
            .find(|(_, v)| *v == self)
            .map(|(s, _)| s.clone());
        match existing {
            Some(s) => (env, s),
            None => alloc_free_string(env, self)
        }
    }
}

impl<T: PrettyPrint> PrettyPrint for Vec<T> {
    fn pprint(&self, env: PrettyPrintEnv) -> (PrettyPrintEnv, String) {
        pprint_iter(self.iter(), env, "\n")
    }
}

pub fn pprint_iter<'a, T: PrettyPrint + 'a, I: Iterator<Item=&'a T>>(
    it: I,
    env: PrettyPrintEnv,
    separator: &str
) -> (PrettyPrintEnv, String) {
    let (env, strs) = it.fold((env, vec![]), |(env, mut strs), v| {
            let (env, v) = v.pprint(env);
            strs.push(v);
            (env, strs)
        });
    (env, strs.into_iter().join(separator))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn distinct_names_print_distinctly() {
        let n1 = Name::sym_str("x");
        let n2 = n1.clone().with_new_sym();
        assert!(n1 != n2);
        let env = PrettyPrintEnv::new();
        let (env, s1) = n1.pprint(env);
        let (env, s2) = n2.pprint(env);
        assert_eq!(env.used.len(), 2);
        assert!(s1 != s2);
    }

    #[test]
    fn same_name_prints_identically() {
        let n = Name::sym_str("acc");
        let (env, s1) = n.pprint(PrettyPrintEnv::new());
        let (_, s2) = n.pprint(env);
        assert_eq!(s1, s2);
    }
}
