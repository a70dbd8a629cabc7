//! Syntax tree produced by the parser and walked by the evaluator.

use std::rc::Rc;

use crate::symbol::Sym;

/// Piece of an interpolated string.
#[derive(Debug, Clone)]
pub enum DStrPart {
    Lit(String),
    Code(Vec<Node>),
}

#[derive(Debug, Clone)]
pub enum Node {
    Nil,
    True,
    False,
    SelfRef,
    Int(i64),
    Float(f64),
    Str(String),
    DStr(Vec<DStrPart>),
    Symbol(Sym),
    Array(Vec<Node>),
    Hash(Vec<(Node, Node)>),

    LVar(Sym),
    LAsgn(Sym, Box<Node>),
    IVar(Sym),
    IAsgn(Sym, Box<Node>),
    Const(Sym),
    CDecl(Sym, Box<Node>),

    /// A bare identifier that is not a known local: a zero-argument call on
    /// `self` which reports `NameError` rather than `NoMethodError`.
    VCall { mid: Sym, line: u32 },
    /// Method call. `recv == None` calls on `self`.
    Call {
        recv: Option<Box<Node>>,
        mid: Sym,
        args: Vec<Node>,
        line: u32,
    },
    /// Setter or index assignment; evaluates to the assigned value.
    AttrAsgn {
        recv: Box<Node>,
        mid: Sym,
        args: Vec<Node>,
        line: u32,
    },

    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Not(Box<Node>),

    If {
        cond: Box<Node>,
        then_body: Vec<Node>,
        else_body: Vec<Node>,
    },
    While {
        cond: Box<Node>,
        body: Vec<Node>,
        /// `until` loops run while the condition is falsy.
        negate: bool,
    },
    Seq(Vec<Node>),

    Def(Rc<ScriptMethod>),
    ClassDef {
        name: Sym,
        superclass: Option<Box<Node>>,
        body: Vec<Node>,
        line: u32,
    },

    Return(Option<Box<Node>>),
    Break(Option<Box<Node>>),
    Next(Option<Box<Node>>),

    Begin {
        body: Vec<Node>,
        rescues: Vec<Rescue>,
        else_body: Vec<Node>,
        ensure: Vec<Node>,
    },
}

/// One `rescue` clause.
#[derive(Debug, Clone)]
pub struct Rescue {
    /// Exception class expressions; empty means `StandardError`.
    pub classes: Vec<Node>,
    pub var: Option<Sym>,
    pub body: Vec<Node>,
}

/// A method defined in script source.
#[derive(Debug)]
pub struct ScriptMethod {
    pub name: Sym,
    pub params: Vec<Sym>,
    pub body: Vec<Node>,
    pub line: u32,
}

impl ScriptMethod {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}
