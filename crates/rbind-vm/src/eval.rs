//! Tree-walking evaluator.
//!
//! Non-local control flow travels as [`Unwind`] through `Result`. A raise
//! carries no payload: the exception itself lives in the state's slot, so
//! native code and script code see the same error state.

use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::ast::{DStrPart, Node, Rescue};
use crate::class::{ClassRef, Method, RClass};
use crate::stack::ensure_sufficient_stack;
use crate::state::{CallInfo, ExcKind, State, wrong_arity};
use crate::symbol::Sym;
use crate::value::{RData, RHash, RObject, Value};

#[derive(Debug)]
pub(crate) enum Unwind {
    /// An exception is pending in the state.
    Raise,
    Return(Value),
    Break(Value),
    Next(Value),
}

pub(crate) type EvalResult = Result<Value, Unwind>;

/// Lexical environment of one method body, class body or top-level load.
pub(crate) struct Frame {
    pub self_val: Value,
    pub locals: FxHashMap<Sym, Value>,
    /// Class that receives `def` in this scope.
    pub target: ClassRef,
}

impl State {
    pub(crate) fn eval_body(&mut self, body: &[Node], frame: &mut Frame) -> EvalResult {
        let mut last = Value::Nil;
        for node in body {
            last = self.eval(node, frame)?;
        }
        Ok(last)
    }

    pub(crate) fn eval(&mut self, node: &Node, frame: &mut Frame) -> EvalResult {
        ensure_sufficient_stack(|| self.eval_node(node, frame))
    }

    fn eval_node(&mut self, node: &Node, frame: &mut Frame) -> EvalResult {
        match node {
            Node::Nil => Ok(Value::Nil),
            Node::True => Ok(Value::Bool(true)),
            Node::False => Ok(Value::Bool(false)),
            Node::SelfRef => Ok(frame.self_val.clone()),
            Node::Int(v) => Ok(Value::Int(*v)),
            Node::Float(v) => Ok(Value::Float(*v)),
            Node::Str(s) => Ok(Value::string(s)),
            Node::DStr(parts) => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        DStrPart::Lit(s) => out.push_str(s),
                        DStrPart::Code(body) => {
                            let value = self.eval_body(body, frame)?;
                            out.push_str(&self.stringify(&value)?);
                        }
                    }
                }
                Ok(Value::string(&out))
            }
            Node::Symbol(sym) => Ok(Value::Symbol(*sym)),
            Node::Array(items) => {
                let values = self.eval_args(items, frame)?;
                Ok(Value::array(values))
            }
            Node::Hash(pairs) => {
                let mut hash = RHash::new();
                for (key, value) in pairs {
                    let key = self.eval(key, frame)?;
                    let value = self.eval(value, frame)?;
                    hash.insert(key, value);
                }
                Ok(Value::hash(hash))
            }

            Node::LVar(sym) => Ok(frame.locals.get(sym).cloned().unwrap_or_default()),
            Node::LAsgn(sym, value) => {
                let value = self.eval(value, frame)?;
                frame.locals.insert(*sym, value.clone());
                Ok(value)
            }
            Node::IVar(sym) => Ok(self.ivar_get(&frame.self_val, *sym)),
            Node::IAsgn(sym, value) => {
                let value = self.eval(value, frame)?;
                let recv = frame.self_val.clone();
                if !self.ivar_set(&recv, *sym, value.clone()) {
                    return Err(Unwind::Raise);
                }
                Ok(value)
            }
            Node::Const(sym) => match self.consts.get(sym) {
                Some(value) => Ok(value.clone()),
                None => {
                    let name = self.sym_name(*sym);
                    self.raise(ExcKind::Name, format!("uninitialized constant {name}"));
                    Err(Unwind::Raise)
                }
            },
            Node::CDecl(sym, value) => {
                let value = self.eval(value, frame)?;
                self.consts.insert(*sym, value.clone());
                Ok(value)
            }

            Node::VCall { mid, line } => {
                self.line = *line;
                let recv = frame.self_val.clone();
                if self.class_of(&recv).find_method(*mid).is_none() {
                    let name = self.sym_name(*mid);
                    let target = self.describe_receiver(&recv);
                    self.raise(
                        ExcKind::Name,
                        format!("undefined local variable or method '{name}' for {target}"),
                    );
                    return Err(Unwind::Raise);
                }
                self.call_method(recv, *mid, Vec::new())
            }
            Node::Call {
                recv,
                mid,
                args,
                line,
            } => {
                let recv = match recv {
                    Some(recv) => self.eval(recv, frame)?,
                    None => frame.self_val.clone(),
                };
                let args = self.eval_args(args, frame)?;
                self.line = *line;
                self.call_method(recv, *mid, args)
            }
            Node::AttrAsgn {
                recv,
                mid,
                args,
                line,
            } => {
                let recv = self.eval(recv, frame)?;
                let args = self.eval_args(args, frame)?;
                let assigned = args.last().cloned().unwrap_or_default();
                self.line = *line;
                self.call_method(recv, *mid, args)?;
                Ok(assigned)
            }

            Node::And(lhs, rhs) => {
                let lhs = self.eval(lhs, frame)?;
                if lhs.truthy() {
                    self.eval(rhs, frame)
                } else {
                    Ok(lhs)
                }
            }
            Node::Or(lhs, rhs) => {
                let lhs = self.eval(lhs, frame)?;
                if lhs.truthy() {
                    Ok(lhs)
                } else {
                    self.eval(rhs, frame)
                }
            }
            Node::Not(operand) => Ok(Value::Bool(!self.eval(operand, frame)?.truthy())),

            Node::If {
                cond,
                then_body,
                else_body,
            } => {
                if self.eval(cond, frame)?.truthy() {
                    self.eval_body(then_body, frame)
                } else {
                    self.eval_body(else_body, frame)
                }
            }
            Node::While { cond, body, negate } => {
                loop {
                    if self.eval(cond, frame)?.truthy() == *negate {
                        break;
                    }
                    match self.eval_body(body, frame) {
                        Ok(_) | Err(Unwind::Next(_)) => {}
                        Err(Unwind::Break(value)) => return Ok(value),
                        Err(other) => return Err(other),
                    }
                }
                Ok(Value::Nil)
            }
            Node::Seq(body) => self.eval_body(body, frame),

            Node::Def(method) => {
                frame
                    .target
                    .define(method.name, Method::Script(Rc::clone(method)));
                Ok(Value::Symbol(method.name))
            }
            Node::ClassDef {
                name,
                superclass,
                body,
                line,
            } => {
                self.line = *line;
                let superclass = match superclass {
                    Some(node) => Some(self.eval(node, frame)?),
                    None => None,
                };
                let class = self.open_class(*name, superclass)?;
                let mut class_frame = Frame {
                    self_val: Value::Class(Rc::clone(&class)),
                    locals: FxHashMap::default(),
                    target: class,
                };
                self.eval_body(body, &mut class_frame)
            }

            Node::Return(value) => Err(Unwind::Return(self.eval_opt(value, frame)?)),
            Node::Break(value) => Err(Unwind::Break(self.eval_opt(value, frame)?)),
            Node::Next(value) => Err(Unwind::Next(self.eval_opt(value, frame)?)),

            Node::Begin {
                body,
                rescues,
                else_body,
                ensure,
            } => self.eval_begin(body, rescues, else_body, ensure, frame),
        }
    }

    fn eval_opt(&mut self, value: &Option<Box<Node>>, frame: &mut Frame) -> EvalResult {
        match value {
            Some(node) => self.eval(node, frame),
            None => Ok(Value::Nil),
        }
    }

    fn eval_args(&mut self, nodes: &[Node], frame: &mut Frame) -> Result<Vec<Value>, Unwind> {
        let mut values = Vec::with_capacity(nodes.len());
        for node in nodes {
            values.push(self.eval(node, frame)?);
        }
        Ok(values)
    }

    fn open_class(&mut self, name: Sym, superclass: Option<Value>) -> Result<ClassRef, Unwind> {
        let superclass = match superclass {
            Some(Value::Class(class)) => Some(class),
            Some(other) => {
                let shown = self.format_inspect(&other);
                self.raise(ExcKind::Type, format!("superclass must be a Class ({shown} given)"));
                return Err(Unwind::Raise);
            }
            None => None,
        };
        let class_name = self.sym_name(name);
        match self.consts.get(&name).cloned() {
            Some(Value::Class(existing)) => {
                if let Some(requested) = &superclass {
                    let matches = existing
                        .superclass()
                        .is_some_and(|current| Rc::ptr_eq(current, requested));
                    if !matches {
                        self.raise(
                            ExcKind::Type,
                            format!("superclass mismatch for class {class_name}"),
                        );
                        return Err(Unwind::Raise);
                    }
                }
                Ok(existing)
            }
            Some(_) => {
                self.raise(ExcKind::Type, format!("{class_name} is not a class"));
                Err(Unwind::Raise)
            }
            None => {
                let superclass = superclass.unwrap_or_else(|| self.object_class());
                let class = RClass::new_subclass(&class_name, &superclass);
                self.consts.insert(name, Value::Class(Rc::clone(&class)));
                tracing::debug!(class = %class_name, "script class defined");
                Ok(class)
            }
        }
    }

    fn eval_begin(
        &mut self,
        body: &[Node],
        rescues: &[Rescue],
        else_body: &[Node],
        ensure: &[Node],
        frame: &mut Frame,
    ) -> EvalResult {
        let mut result = self.eval_body(body, frame);
        match result {
            Err(Unwind::Raise) if !rescues.is_empty() => {
                if let Some(handled) = self.try_rescue(rescues, frame) {
                    result = handled;
                }
            }
            Ok(_) if !else_body.is_empty() => result = self.eval_body(else_body, frame),
            _ => {}
        }
        if !ensure.is_empty() {
            let pending = self.stash_exc();
            self.eval_body(ensure, frame)?;
            self.restore_exc(pending);
        }
        result
    }

    /// Run the first rescue clause matching the pending exception. `None`
    /// leaves the exception pending.
    fn try_rescue(&mut self, rescues: &[Rescue], frame: &mut Frame) -> Option<EvalResult> {
        let stashed = self.stash_exc();
        let exc = stashed.as_ref().map(|(exc, _)| exc.clone())?;
        let exc_class = self.class_of(&exc);
        for clause in rescues {
            let matched = if clause.classes.is_empty() {
                exc_class.is_subclass_of(&self.builtins.standard_error)
            } else {
                let mut matched = false;
                for node in &clause.classes {
                    match self.eval(node, frame) {
                        Ok(Value::Class(class)) => {
                            if exc_class.is_subclass_of(&class) {
                                matched = true;
                                break;
                            }
                        }
                        Ok(_) => {
                            self.raise(ExcKind::Type, "class or module required for rescue clause");
                            return Some(Err(Unwind::Raise));
                        }
                        Err(unwind) => return Some(Err(unwind)),
                    }
                }
                matched
            };
            if matched {
                if let Some(var) = clause.var {
                    frame.locals.insert(var, exc);
                }
                return Some(self.eval_body(&clause.body, frame));
            }
        }
        self.restore_exc(stashed);
        None
    }

    // ------------------------------------------------------------------
    // dispatch
    // ------------------------------------------------------------------

    /// Look up and invoke `mid` on `recv`.
    pub(crate) fn call_method(&mut self, recv: Value, mid: Sym, args: Vec<Value>) -> EvalResult {
        let class = self.class_of(&recv);
        match class.find_method(mid) {
            Some(method) => {
                ensure_sufficient_stack(|| self.invoke(recv, &class, mid, method, args))
            }
            None => {
                let name = self.sym_name(mid);
                let target = self.describe_receiver(&recv);
                self.raise(
                    ExcKind::NoMethod,
                    format!("undefined method '{name}' for {target}"),
                );
                Err(Unwind::Raise)
            }
        }
    }

    /// Like [`call_method`](Self::call_method) but reports a raise as `None`,
    /// for use inside native methods.
    pub(crate) fn send(&mut self, recv: &Value, mid: Sym, args: Vec<Value>) -> Option<Value> {
        match self.call_method(recv.clone(), mid, args) {
            Ok(value) => Some(value),
            Err(Unwind::Raise) => None,
            Err(Unwind::Return(v) | Unwind::Break(v) | Unwind::Next(v)) => Some(v),
        }
    }

    fn invoke(
        &mut self,
        recv: Value,
        class: &ClassRef,
        mid: Sym,
        method: Method,
        args: Vec<Value>,
    ) -> EvalResult {
        if self.ci.len() >= self.options().max_call_depth {
            self.raise(ExcKind::SystemStack, "stack level too deep");
            return Err(Unwind::Raise);
        }
        match method {
            Method::Native { func, aspec } => {
                if !aspec.accepts(args.len()) {
                    let expected = aspec.expected().unwrap_or_default();
                    self.raise(ExcKind::Argument, wrong_arity(args.len(), expected));
                    return Err(Unwind::Raise);
                }
                self.ci.push(CallInfo {
                    mid,
                    args: Rc::from(args),
                });
                let result = func(self, recv);
                self.ci.pop();
                if self.exc.is_some() {
                    Err(Unwind::Raise)
                } else {
                    Ok(result)
                }
            }
            Method::Script(method) => {
                if args.len() != method.arity() {
                    self.raise(ExcKind::Argument, wrong_arity(args.len(), method.arity()));
                    return Err(Unwind::Raise);
                }
                let mut frame = Frame {
                    self_val: recv,
                    locals: method.params.iter().copied().zip(args).collect(),
                    target: Rc::clone(class),
                };
                self.ci.push(CallInfo {
                    mid,
                    args: Rc::clone(&self.no_args),
                });
                let result = self.eval_body(&method.body, &mut frame);
                self.ci.pop();
                match result {
                    Ok(value) => Ok(value),
                    Err(Unwind::Return(v) | Unwind::Break(v) | Unwind::Next(v)) => Ok(v),
                    Err(Unwind::Raise) => Err(Unwind::Raise),
                }
            }
        }
    }

    /// `nil`, `main:Object`, `class Foo` or `an instance of Foo`.
    pub(crate) fn describe_receiver(&self, recv: &Value) -> String {
        match recv {
            Value::Nil => "nil".into(),
            Value::Bool(b) => b.to_string(),
            Value::Class(class) => format!("class {}", class.name()),
            other if other.identical(&self.top_self) => "main:Object".into(),
            other => format!("an instance of {}", self.class_of(other).name()),
        }
    }

    // ------------------------------------------------------------------
    // allocation and conversion helpers shared with the builtins
    // ------------------------------------------------------------------

    /// Allocate an uninitialized instance of `class`. Builtin value classes
    /// allocate their own representation.
    pub(crate) fn allocate(&mut self, class: &ClassRef) -> Option<Value> {
        let b = &self.builtins;
        if class.is_subclass_of(&b.string) {
            return Some(Value::string(""));
        }
        if class.is_subclass_of(&b.array) {
            return Some(Value::array(Vec::new()));
        }
        if class.is_subclass_of(&b.hash) {
            return Some(Value::hash(RHash::new()));
        }
        if self.is_special_alloc(class) {
            let name = class.name().to_string();
            self.raise(
                ExcKind::NoMethod,
                format!("undefined method 'new' for class {name}"),
            );
            return None;
        }
        Some(match class.instance_tt() {
            crate::class::InstanceTT::Data => {
                Value::Data(Rc::new(RData::new(Rc::clone(class), None, None)))
            }
            crate::class::InstanceTT::Object => Value::Object(Rc::new(RObject::new(Rc::clone(class)))),
        })
    }

    /// String form used by interpolation and `puts`: dispatches `to_s` on
    /// objects.
    pub(crate) fn stringify(&mut self, value: &Value) -> Result<String, Unwind> {
        match value {
            Value::Str(s) => Ok(s.borrow().clone()),
            Value::Object(_) | Value::Data(_) => {
                let result = self.call_method(value.clone(), self.syms.to_s, Vec::new())?;
                Ok(match &result {
                    Value::Str(s) => s.borrow().clone(),
                    other => self.format_inspect(other),
                })
            }
            other => Ok(self.format_to_s(other)),
        }
    }

    /// Inspected form used by `p`: dispatches `inspect` on objects.
    pub(crate) fn inspect_dispatch(&mut self, value: &Value) -> Result<String, Unwind> {
        match value {
            Value::Object(_) | Value::Data(_) => {
                let result = self.call_method(value.clone(), self.syms.inspect, Vec::new())?;
                Ok(match &result {
                    Value::Str(s) => s.borrow().clone(),
                    other => self.format_inspect(other),
                })
            }
            other => Ok(self.format_inspect(other)),
        }
    }

    /// `==` with dispatch for objects, structural for builtin values.
    pub(crate) fn values_equal(&mut self, a: &Value, b: &Value) -> Result<bool, Unwind> {
        match a {
            Value::Object(_) | Value::Data(_) => {
                let result = self.call_method(a.clone(), self.syms.eq, vec![b.clone()])?;
                Ok(result.truthy())
            }
            _ => Ok(a.eql(b)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{State, Value, VmOptions};

    fn run(src: &str) -> (State, Value) {
        let mut state = State::open(VmOptions {
            stdout: Box::new(std::io::sink()),
            stderr: Box::new(std::io::sink()),
            ..VmOptions::default()
        });
        let value = state.load_string(src);
        (state, value)
    }

    fn int(src: &str) -> i64 {
        let (state, value) = run(src);
        assert!(state.exc().is_none(), "unexpected error: {:?}", state.error_string());
        value.as_int().expect("integer result")
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(int("1 + 2 * 3"), 7);
        assert_eq!(int("(1 + 2) * 3"), 9);
        assert_eq!(int("-2 ** 2"), -4);
        assert_eq!(int("2 ** 3 ** 2"), 512);
        assert_eq!(int("7 % 3 + 10 / 4"), 3);
    }

    #[test]
    fn method_definition_and_call() {
        assert_eq!(int("def mul(a, b)\n  a * b\nend\nmul(6, 7)"), 42);
        assert_eq!(int("def twice x\n  return x * 2\n  99\nend\ntwice 4"), 8);
    }

    #[test]
    fn while_with_break_and_next() {
        assert_eq!(
            int("i = 0\nsum = 0\nwhile true\n  i += 1\n  next if i == 2\n  break if i > 4\n  sum += i\nend\nsum"),
            1 + 3 + 4
        );
    }

    #[test]
    fn classes_ivars_and_reopening() {
        let src = "class Counter\n  def initialize(start)\n    @n = start\n  end\n  def bump\n    @n += 1\n  end\nend\nclass Counter\n  def value\n    @n\n  end\nend\nc = Counter.new(5)\nc.bump\nc.bump\nc.value";
        assert_eq!(int(src), 7);
    }

    #[test]
    fn inheritance_dispatches_to_superclass() {
        let src = "class A\n  def v\n    1\n  end\nend\nclass B < A\n  def w\n    v + 1\n  end\nend\nB.new.w";
        assert_eq!(int(src), 2);
    }

    #[test]
    fn rescue_binds_exception() {
        let (state, value) = run("begin\n  raise ArgumentError, 'nope'\nrescue TypeError\n  1\nrescue => e\n  e.message\nend");
        assert!(state.exc().is_none());
        assert_eq!(value.as_str().map(|s| s.clone()), Some("nope".to_string()));
    }

    #[test]
    fn ensure_runs_and_keeps_exception() {
        let (state, value) = run("log = []\nbegin\n  begin\n    raise 'boom'\n  ensure\n    log << 1\n  end\nrescue => e\n  log << e.message\nend\nlog.size");
        assert!(state.exc().is_none(), "{:?}", state.error_string());
        assert_eq!(value.as_int(), Some(2));
    }

    #[test]
    fn unhandled_raise_reports_line() {
        let (state, value) = run("x = 1\nraise 'bad'\nx");
        assert!(value.is_nil());
        assert_eq!(state.exc_line(), Some(2));
        assert_eq!(state.error_string().as_deref(), Some("line 2: bad (RuntimeError)"));
    }

    #[test]
    fn undefined_names() {
        let (state, _) = run("nothing_here");
        let text = state.error_string().expect("error");
        assert!(text.contains("undefined local variable or method 'nothing_here' for main:Object"), "{text}");
        assert!(text.ends_with("(NameError)"));

        let (state, _) = run("nil.upcase");
        let text = state.error_string().expect("error");
        assert!(text.contains("undefined method 'upcase' for nil"), "{text}");
        assert!(text.ends_with("(NoMethodError)"));

        let (state, _) = run("Missing");
        assert!(state.error_string().expect("error").contains("uninitialized constant Missing"));
    }

    #[test]
    fn script_arity_mismatch() {
        let (state, _) = run("def f(a)\n  a\nend\nf(1, 2)");
        let text = state.error_string().expect("error");
        assert!(text.contains("wrong number of arguments (given 2, expected 1)"), "{text}");
    }

    #[test]
    fn deep_recursion_raises_system_stack_error() {
        let mut state = State::open(VmOptions {
            max_call_depth: 32,
            stdout: Box::new(std::io::sink()),
            stderr: Box::new(std::io::sink()),
            ..VmOptions::default()
        });
        state.load_string("def down(n)\n  down(n + 1)\nend\ndown(0)");
        let text = state.error_string().expect("error");
        assert!(text.contains("stack level too deep (SystemStackError)"), "{text}");
        assert_eq!(state.call_depth(), 0);
    }

    #[test]
    fn default_call_depth_is_reached_before_the_host_stack_runs_out() {
        let (state, _) = run("def g\n  g\nend\ng");
        let text = state.error_string().expect("error");
        assert!(text.contains("stack level too deep (SystemStackError)"), "{text}");
    }

    #[test]
    fn interpolation_calls_to_s() {
        let (_, value) = run("class P\n  def to_s\n    'pee'\n  end\nend\n\"<#{P.new}:#{1 + 1}:#{nil}>\"");
        assert_eq!(value.as_str().map(|s| s.clone()), Some("<pee:2:>".to_string()));
    }

    #[test]
    fn or_assign_and_ternary() {
        assert_eq!(int("h = {}\nh[:a] ||= 3\nh[:a] ||= 4\nh[:a] > 2 ? h[:a] : 0"), 3);
    }
}
