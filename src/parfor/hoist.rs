use super::effects::{CallEffects, Effect};
use super::params;
use crate::ir::ast::*;
use crate::ir::rename;
use crate::utils::name::Name;
use crate::utils::smap::SFold;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NotHoistedReason {
    // Uses a variable that is not known to be loop-invariant.
    Dependency,

    // Has a side-effect, or calls a function with an unknown effect.
    NotPure,

    // Defines an object that is later stored into an array.
    Stored,
}

impl fmt::Display for NotHoistedReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NotHoistedReason::Dependency => write!(f, "dependency"),
            NotHoistedReason::NotPure => write!(f, "not pure"),
            NotHoistedReason::Stored => write!(f, "stored"),
        }
    }
}

// The outcome of hoisting for one parallel loop.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HoistInfo {
    pub hoisted: Vec<Inst>,
    pub not_hoisted: Vec<(Inst, NotHoistedReason)>,
}

#[derive(Debug, Default)]
struct DefSets {
    once: BTreeSet<Name>,
    more: BTreeSet<Name>,
    module_assigns: BTreeMap<Name, String>,
    getattr_taken: BTreeMap<Name, (Name, String)>,
}

impl DefSets {
    fn add(&mut self, id: &Name) {
        if self.more.contains(id) {
            return;
        }
        if self.once.remove(id) {
            self.more.insert(id.clone());
        } else {
            self.once.insert(id.clone());
        }
    }

    fn mark_more(&mut self, id: &Name) {
        self.once.remove(id);
        self.more.insert(id.clone());
    }

    fn visit(&mut self, inst: &Inst, typemap: &TypeMap, effects: &CallEffects) {
        let (target, value) = match inst {
            Inst::Assign {target, value, ..} => (target, value),
            _ => return
        };
        self.add(target);
        match value {
            Expr::Global {name} => {
                if let Some(Type::Module {..}) = typemap.get(target) {
                    self.module_assigns.insert(target.clone(), name.clone());
                }
            },
            Expr::GetAttr {value, attr} if self.once.contains(value) ||
                                           self.module_assigns.contains_key(value) => {
                self.getattr_taken.insert(target.clone(), (value.clone(), attr.clone()));
            },
            Expr::Call {func, args} => {
                // A call through an attribute may modify the object the attribute was taken from.
                if let Some((obj, attr)) = self.getattr_taken.get(func).cloned() {
                    let effect = match self.module_assigns.get(&obj) {
                        Some(m) => effects.module_call(m, &attr),
                        None => effects.method_call(&attr)
                    };
                    if effect.may_mutate() {
                        self.add(&obj);
                    }
                }
                // Any mutable argument may be modified by the call.
                for arg in args {
                    if typemap.get(arg).is_some_and(|ty| ty.is_mutable()) {
                        self.add(arg);
                    }
                }
            },
            _ => ()
        }
    }
}

// Computes the set of variables assigned exactly once in the loop body, including the bodies and
// init blocks of nested parfors. Parameters assigned in the body are never considered defined once,
// as their value on entry to the loop is observable.
pub fn compute_def_once(
    body: &Blocks,
    params: &BTreeSet<Name>,
    arena: &ParforArena,
    typemap: &TypeMap,
    effects: &CallEffects
) -> BTreeSet<Name> {
    let mut defs = DefSets::default();
    for inst in params::all_insts(body, arena) {
        defs.visit(inst, typemap, effects);
    }
    for p in params {
        if defs.once.contains(p) {
            defs.mark_more(p);
        }
    }
    defs.once
}

// Finds the arrays stored into and the mutable values stored into arrays.
pub fn find_setitems(
    body: &Blocks,
    arena: &ParforArena,
    typemap: &TypeMap
) -> (BTreeSet<Name>, BTreeSet<Name>) {
    let mut setitems = BTreeSet::new();
    let mut itemsset = BTreeSet::new();
    for inst in params::all_insts(body, arena) {
        match inst {
            Inst::SetItem {target, value, ..} | Inst::SetRow {target, value, ..} => {
                setitems.insert(target.clone());
                if typemap.get(value).is_some_and(|ty| ty.is_mutable()) {
                    itemsset.insert(value.clone());
                }
            },
            _ => ()
        }
    }
    (setitems, itemsset)
}

// Resolves the fully qualified name of the function referred to by a variable.
fn callee_name(
    func: &Name,
    typemap: &TypeMap,
    locals: &BTreeMap<Name, String>
) -> Option<String> {
    match typemap.get(func) {
        Some(Type::Function {qualname}) => Some(qualname.clone()),
        _ => locals.get(func).cloned()
    }
}

fn is_pure(
    e: &Expr,
    typemap: &TypeMap,
    effects: &CallEffects,
    locals: &BTreeMap<Name, String>
) -> bool {
    match e {
        Expr::Call {func, ..} => {
            callee_name(func, typemap, locals)
                .is_some_and(|qualname| effects.qualified_call(&qualname) == Effect::Pure)
        },
        Expr::InplaceBinOp {lhs, ..} => {
            !typemap.get(lhs).is_some_and(|ty| ty.is_mutable())
        },
        Expr::WorkItem {..} => false,
        _ => true
    }
}

// Records the qualified names of functions defined by global loads or attribute accesses.
fn local_callees(body: &Blocks, arena: &ParforArena) -> BTreeMap<Name, String> {
    let mut locals = BTreeMap::new();
    for inst in params::all_insts(body, arena) {
        if let Inst::Assign {target, value, ..} = inst {
            match value {
                Expr::Global {name} => {
                    locals.insert(target.clone(), name.clone());
                },
                Expr::GetAttr {value, attr} => {
                    if let Some(base) = locals.get(value).cloned() {
                        locals.insert(target.clone(), format!("{base}.{attr}"));
                    }
                },
                _ => ()
            }
        }
    }
    locals
}

struct HoistEnv<'a> {
    def_once: BTreeSet<Name>,
    itemsset: BTreeSet<Name>,
    dep_on_param: BTreeSet<Name>,
    typemap: &'a TypeMap,
    effects: &'a CallEffects,
    locals: BTreeMap<Name, String>,
    info: HoistInfo,
}

impl<'a> HoistEnv<'a> {
    // Attempts to hoist an instruction, returning it back if it has to stay in place.
    fn try_hoist(&mut self, inst: Inst) -> Option<Inst> {
        let target = match &inst {
            Inst::Assign {target, ..} if self.def_once.contains(target) => target.clone(),
            _ => return Some(inst)
        };
        if self.itemsset.contains(&target) {
            log::debug!("Instruction defining {target} was not hoisted because it is stored");
            self.info.not_hoisted.push((inst.clone(), NotHoistedReason::Stored));
            return Some(inst);
        }
        let uses = inst.sfold(BTreeSet::new(), |mut acc, id| { acc.insert(id.clone()); acc });
        let independent = uses.is_subset(&self.dep_on_param);
        let pure = match &inst {
            Inst::Assign {value, ..} => is_pure(value, self.typemap, self.effects, &self.locals),
            _ => false
        };
        if independent && pure {
            log::debug!("Hoisting instruction defining {target}");
            let is_array = self.typemap.get(&target).is_some_and(|ty| ty.is_array());
            if !is_array {
                self.dep_on_param.insert(target);
            }
            self.info.hoisted.push(inst);
            None
        } else {
            let reason = if independent {
                NotHoistedReason::NotPure
            } else {
                NotHoistedReason::Dependency
            };
            log::debug!("Instruction defining {target} was not hoisted: {reason}");
            self.info.not_hoisted.push((inst.clone(), reason));
            Some(inst)
        }
    }

    fn hoist_block(&mut self, b: Block) -> Block {
        Block::new(b.body.into_iter().filter_map(|inst| self.try_hoist(inst)).collect())
    }
}

// Removes the loop-invariant instructions from a loop body and returns them in their original
// order. An instruction is hoisted when its target is defined exactly once, its operation is pure,
// and every variable it uses is either a parameter that is never written by the loop or the result
// of a previously hoisted instruction. Instructions of the init blocks of nested parfors are also
// considered.
pub fn hoist(
    params: &BTreeSet<Name>,
    body: Blocks,
    arena: &mut ParforArena,
    typemap: &TypeMap,
    effects: &CallEffects
) -> (Blocks, HoistInfo) {
    let def_once = compute_def_once(&body, params, arena, typemap, effects);
    let (setitems, itemsset) = find_setitems(&body, arena, typemap);
    let assigned = params::all_insts(&body, arena).into_iter()
        .filter_map(|inst| inst.defined_var().cloned())
        .collect::<BTreeSet<Name>>();
    let dep_on_param = params.iter()
        .filter(|p| !setitems.contains(p) && !assigned.contains(p))
        .cloned()
        .collect::<BTreeSet<Name>>();
    let locals = local_callees(&body, arena);
    let nested = rename::nested_parfor_ids(&body, arena);
    let mut env = HoistEnv {
        def_once, itemsset, dep_on_param, typemap, effects, locals, info: HoistInfo::default()
    };
    let body = body.into_iter()
        .map(|(l, b)| {
            let b = Block::new(b.body.into_iter()
                .filter_map(|inst| {
                    if let Inst::Parfor {id, ..} = &inst {
                        if nested.contains(id) {
                            if let Some(p) = arena.get_mut(*id) {
                                p.init_block = env.hoist_block(p.init_block.clone());
                            }
                        }
                        Some(inst)
                    } else {
                        env.try_hoist(inst)
                    }
                })
                .collect());
            (l, b)
        })
        .collect::<Blocks>();
    (body, env.info)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ir::ast_builder::*;

    fn types() -> TypeMap {
        typemap(vec![
            ("a", array(ElemSize::F64, 1)),
            ("b", array(ElemSize::F64, 1)),
            ("c", float64()),
            ("m", Type::Module {name: "math".to_string()}),
            ("sqrt", Type::Function {qualname: "math.sqrt".to_string()}),
        ])
    }

    fn run_hoist(body: Blocks, params: &[&str]) -> (Blocks, HoistInfo) {
        hoist(&names(params), body, &mut ParforArena::new(), &types(), &CallEffects::default())
    }

    #[test]
    fn invariant_chain_is_hoisted_in_order() {
        let body = blocks(vec![(0, vec![
            assign("two", const_float(2.0)),
            assign("k", binop_expr(BinOp::Mul, "c", "two")),
            assign("x", getitem_expr("a", "i")),
            assign("y", binop_expr(BinOp::Mul, "x", "k")),
            setitem("b", "i", "y")
        ])]);
        let (body, info) = run_hoist(body, &["a", "b", "c"]);
        assert_eq!(info.hoisted, vec![
            assign("two", const_float(2.0)),
            assign("k", binop_expr(BinOp::Mul, "c", "two"))
        ]);
        assert_eq!(body[&0].body.len(), 3);
        let reasons = info.not_hoisted.iter().map(|(_, r)| *r).collect::<Vec<_>>();
        assert_eq!(reasons, vec![NotHoistedReason::Dependency, NotHoistedReason::Dependency]);
    }

    #[test]
    fn unknown_call_is_not_pure() {
        let body = blocks(vec![(0, vec![assign("v", call_expr("f", &[]))])]);
        let mut tm = types();
        tm.insert(id("f"), Type::Function {qualname: "random.random".to_string()});
        let (_, info) = hoist(&names(&["f"]), body, &mut ParforArena::new(), &tm, &CallEffects::default());
        assert_eq!(info.not_hoisted, vec![
            (assign("v", call_expr("f", &[])), NotHoistedReason::NotPure)
        ]);
    }

    #[test]
    fn call_through_module_marks_module_as_modified() {
        let body = blocks(vec![(0, vec![
            assign("r", global_expr("random")),
            assign("f", getattr_expr("r", "random")),
            assign("v", call_expr("f", &[])),
        ])]);
        let mut tm = types();
        tm.insert(id("r"), Type::Module {name: "random".to_string()});
        let once = compute_def_once(&body, &names(&[]), &ParforArena::new(), &tm, &CallEffects::default());
        assert!(!once.contains(&id("r")));
        assert!(once.contains(&id("f")));
    }

    #[test]
    fn known_pure_call_is_hoisted() {
        let body = blocks(vec![(0, vec![
            assign("m", global_expr("math")),
            assign("sqrt", getattr_expr("m", "sqrt")),
            assign("v", call_expr("sqrt", &["c"])),
        ])]);
        let (body, info) = run_hoist(body, &["c"]);
        assert_eq!(info.hoisted.len(), 3);
        assert!(body[&0].body.is_empty());
    }

    #[test]
    fn written_arrays_are_not_invariant() {
        let body = blocks(vec![(0, vec![
            assign("zero", const_int(0)),
            assign("x", getitem_expr("b", "zero")),
            setitem("b", "i", "x")
        ])]);
        let (_, info) = run_hoist(body, &["b"]);
        assert_eq!(info.hoisted, vec![assign("zero", const_int(0))]);
        assert_eq!(info.not_hoisted[0].1, NotHoistedReason::Dependency);
    }

    #[test]
    fn stored_arrays_are_not_hoisted() {
        let body = blocks(vec![(0, vec![
            assign("n", const_int(3)),
            assign("tmp", Expr::Alloc {sz: ElemSize::F64, lead: Some(id("n")), like: None, fill: None}),
            setitem("b", "i", "tmp")
        ])]);
        let mut tm = types();
        tm.insert(id("tmp"), array(ElemSize::F64, 1));
        let (_, info) = hoist(&names(&["b"]), body, &mut ParforArena::new(), &tm, &CallEffects::default());
        assert_eq!(info.not_hoisted, vec![(
            Inst::assign(id("tmp"), Expr::Alloc {sz: ElemSize::F64, lead: Some(id("n")), like: None, fill: None}, &i()),
            NotHoistedReason::Stored
        )]);
    }

    #[test]
    fn reassigned_variables_are_not_hoisted() {
        let body = blocks(vec![
            (0, vec![assign("x", const_int(1)), branch("cond", 1, 2)]),
            (1, vec![assign("x", const_int(2)), jump(2)]),
            (2, vec![]),
        ]);
        let (_, info) = run_hoist(body, &["cond"]);
        assert!(info.hoisted.is_empty());
    }

    #[test]
    fn accumulated_parameter_is_not_a_dependency_seed() {
        let body = blocks(vec![(0, vec![
            assign("s", inplace_expr(BinOp::Add, "s", "c")),
            assign("t", binop_expr(BinOp::Mul, "s", "c")),
        ])]);
        let (_, info) = run_hoist(body, &["s", "c"]);
        assert!(info.hoisted.is_empty());
    }

    #[test]
    fn mutable_call_argument_is_defined_more_than_once() {
        let body = blocks(vec![(0, vec![
            assign("m", global_expr("math")),
            assign("f", getattr_expr("m", "sqrt")),
            assign("tmp", Expr::Copy {value: id("a")}),
            assign("v", call_expr("f", &["tmp"])),
        ])]);
        let mut tm = types();
        tm.insert(id("tmp"), array(ElemSize::F64, 1));
        let once = compute_def_once(&body, &names(&["a"]), &ParforArena::new(), &tm, &CallEffects::default());
        assert!(!once.contains(&id("tmp")));
        assert!(once.contains(&id("v")));
    }

    #[test]
    fn nested_init_block_is_hoisted() {
        let mut arena = ParforArena::new();
        let mut inner = parfor(vec![loop_nest("j", const_op(0), const_op(2))], blocks(vec![(0, vec![])]), &[]);
        inner.init_block = block(vec![assign("k", const_int(4))]);
        let inner_id = arena.push(inner);
        let body = blocks(vec![(0, vec![parfor_inst(inner_id)])]);
        let (body, info) = hoist(&names(&[]), body, &mut arena, &types(), &CallEffects::default());
        assert_eq!(info.hoisted, vec![assign("k", const_int(4))]);
        assert!(arena.get(inner_id).unwrap().init_block.body.is_empty());
        assert_eq!(body[&0].body, vec![parfor_inst(inner_id)]);
    }
}
