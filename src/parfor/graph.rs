use crate::ir::ast::*;
use crate::utils::info::*;
use crate::utils::name::Name;

pub fn int_type() -> Type {
    Type::Scalar {sz: ElemSize::I64}
}

pub fn bool_type() -> Type {
    Type::Scalar {sz: ElemSize::Bool}
}

// Stores a value at the given index of an array, or into the row at that index when the stored
// value is an array itself.
pub fn store(target: &Name, idx: &Name, value: &Name, is_scalar: bool, i: &Info) -> Inst {
    let (target, value, i) = (target.clone(), value.clone(), i.clone());
    if is_scalar {
        Inst::SetItem {target, index: idx.clone(), value, i}
    } else {
        Inst::SetRow {target, row: idx.clone(), value, i}
    }
}

pub fn load(value: &Name, idx: &Name, is_scalar: bool) -> Expr {
    if is_scalar {
        Expr::GetItem {value: value.clone(), index: idx.clone()}
    } else {
        Expr::GetRow {value: value.clone(), row: idx.clone()}
    }
}

// Constructs a block graph one block at a time. Instructions are emitted into the current block
// until it is finished by a control transfer, after which emission continues in the block with the
// label given to the terminating call.
pub struct GraphBuilder {
    blocks: Blocks,
    label: Label,
    body: Vec<Inst>,
    next_label: Label,
    typemap: TypeMap,
    fresh_names: bool,
    i: Info,
}

impl GraphBuilder {
    pub fn new(i: &Info) -> GraphBuilder {
        GraphBuilder {
            blocks: Blocks::new(),
            label: 0,
            body: vec![],
            next_label: 1,
            typemap: TypeMap::new(),
            fresh_names: false,
            i: i.clone()
        }
    }

    // A builder whose named temporaries are fresh symbols, for code inserted among existing code.
    pub fn with_fresh_names(i: &Info) -> GraphBuilder {
        GraphBuilder {fresh_names: true, ..GraphBuilder::new(i)}
    }

    pub fn info<'a>(&'a self) -> &'a Info {
        &self.i
    }

    pub fn name(&self, s: &str) -> Name {
        if self.fresh_names {
            Name::sym_str(s)
        } else {
            Name::new(s.to_string())
        }
    }

    pub fn fresh_label(&mut self) -> Label {
        let l = self.next_label;
        self.next_label += 1;
        l
    }

    pub fn emit(&mut self, inst: Inst) {
        self.body.push(inst);
    }

    pub fn emit_all(&mut self, insts: impl IntoIterator<Item=Inst>) {
        self.body.extend(insts);
    }

    pub fn declare(&mut self, id: &Name, ty: Type) {
        self.typemap.insert(id.clone(), ty);
    }

    pub fn assign(&mut self, target: &Name, value: Expr, ty: Type) {
        self.declare(target, ty);
        self.emit(Inst::assign(target.clone(), value, &self.i));
    }

    pub fn int(&mut self, s: &str, v: i64) -> Name {
        let id = self.name(s);
        self.assign(&id, Expr::int(v), int_type());
        id
    }

    pub fn binop(&mut self, s: &str, op: BinOp, lhs: &Name, rhs: &Name, ty: Type) -> Name {
        let id = self.name(s);
        self.assign(&id, Expr::BinOp {op, lhs: lhs.clone(), rhs: rhs.clone()}, ty);
        id
    }

    pub fn barrier(&mut self) {
        self.emit(Inst::Barrier {i: self.i.clone()});
    }

    // Ends the current block with the given terminator and continues emitting into the block with
    // the given label.
    fn finish(&mut self, term: Inst, next: Label) {
        let mut body = std::mem::take(&mut self.body);
        body.push(term);
        self.blocks.insert(self.label, Block::new(body));
        self.label = next;
    }

    pub fn jump(&mut self, target: Label, next: Label) {
        let term = Inst::jump(target, &self.i);
        self.finish(term, next);
    }

    pub fn branch(&mut self, cond: &Name, truebr: Label, falsebr: Label, next: Label) {
        let term = Inst::Branch {cond: cond.clone(), truebr, falsebr, i: self.i.clone()};
        self.finish(term, next);
    }

    pub fn ret(self) -> (Blocks, TypeMap) {
        let GraphBuilder {mut blocks, label, mut body, typemap, i, ..} = self;
        body.push(Inst::Return {value: None, i});
        blocks.insert(label, Block::new(body));
        (blocks, typemap)
    }

    // Leaves the current block unterminated, so the graph can be spliced into another graph.
    pub fn fall_through(self) -> (Blocks, TypeMap) {
        let GraphBuilder {mut blocks, label, body, typemap, ..} = self;
        blocks.insert(label, Block::new(body));
        (blocks, typemap)
    }
}
