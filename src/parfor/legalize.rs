use crate::ir::ast::*;
use crate::utils::name::Name;

use std::collections::{BTreeMap, BTreeSet};

fn legal_string(id: &Name) -> String {
    let s = id.print_with_sym()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect::<String>();
    match s.chars().next() {
        Some(c) if c.is_ascii_digit() => format!("_{s}"),
        Some(_) => s,
        None => "_".to_string()
    }
}

// Maps each name to a plain name consisting only of ASCII alphanumeric characters and underscores,
// as required for identifiers of generated functions. The legalized names are distinct from each
// other and from the given names already in use, except for a name legalized to itself.
pub fn legalize_names(names: &[Name], taken: &BTreeSet<Name>) -> BTreeMap<Name, Name> {
    let mut used = BTreeSet::new();
    let mut out = BTreeMap::new();
    for id in names {
        if out.contains_key(id) {
            continue;
        }
        let base = legal_string(id);
        let mut candidate = Name::new(base.clone());
        let mut count = 1;
        while used.contains(&candidate) || (taken.contains(&candidate) && &candidate != id) {
            candidate = Name::new(format!("{base}_{count}"));
            count += 1;
        }
        used.insert(candidate.clone());
        out.insert(id.clone(), candidate);
    }
    out
}

// Adds the types of the legalized names to the type map.
pub fn legalize_types(map: &BTreeMap<Name, Name>, typemap: &mut TypeMap) {
    for (old, new) in map {
        if old != new {
            if let Some(ty) = typemap.get(old).cloned() {
                typemap.insert(new.clone(), ty);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;

    #[test]
    fn illegal_characters_are_replaced() {
        let m = legalize_names(&[id("a.1"), id("$x"), id("b")], &BTreeSet::new());
        assert_eq!(m[&id("a.1")], id("a_1"));
        assert_eq!(m[&id("$x")], id("_x"));
        assert_eq!(m[&id("b")], id("b"));
    }

    #[test]
    fn collisions_get_a_suffix() {
        let m = legalize_names(&[id("a.1"), id("a$1")], &BTreeSet::new());
        assert_eq!(m[&id("a.1")], id("a_1"));
        assert_eq!(m[&id("a$1")], id("a_1_1"));
    }

    #[test]
    fn taken_names_are_avoided() {
        let m = legalize_names(&[id("x.0"), id("y")], &names(&["x_0", "y"]));
        assert_eq!(m[&id("x.0")], id("x_0_1"));
        assert_eq!(m[&id("y")], id("y"));
    }

    #[test]
    fn symbols_are_dropped() {
        let n = Name::sym_str("acc");
        let m = legalize_names(&[n.clone()], &BTreeSet::new());
        assert!(!m[&n].has_sym());
        assert!(m[&n].get_str().starts_with("acc_"));
    }

    #[test]
    fn leading_digit_is_prefixed() {
        let m = legalize_names(&[id("0tmp")], &BTreeSet::new());
        assert_eq!(m[&id("0tmp")], id("_0tmp"));
    }

    #[test]
    fn types_follow_names() {
        let m = legalize_names(&[id("a.1")], &BTreeSet::new());
        let mut tm = typemap(vec![("a.1", int64())]);
        legalize_types(&m, &mut tm);
        assert_eq!(tm.get(&id("a_1")), Some(&int64()));
    }
}
