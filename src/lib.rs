//! # please-peg
//!
//! Parsing expression grammars, compiled to a flat word-addressed bytecode and run
//! by a small backtracking VM.
//!
//! Grammars are ordinary values: strings, integers, maps of named rules, and lists
//! like `(some (choice "ab" "cd"))`. The reader in this crate turns grammar text into
//! those values, [`Engine::peg_compile`] turns them into a [`Program`], and the
//! `peg_*` methods on [`Engine`] run a program against a byte buffer.
//!
//! ```ignore
//! let mut engine = Engine::new();
//! let grammar = engine.read_one(r#"(capture (between 1 3 (range "09")))"#, "<doc>".to_owned())?;
//! let caps = engine.peg_match(&grammar, b"12345", 0, &[])?;
//! ```
mod display;
mod hash;
mod parse;
pub mod peg;
mod type_predicates;

pub use display::BstrFmt;
pub use hash::GcMap;
pub use parse::{ExprParseError, ExprParseErrorInfo};
pub use peg::{InvalidBytecode, Limits, Match, Program, UnverifiedProgram};

use std::{
    hash::{Hash, Hasher},
    rc::Rc,
};

#[macro_use]
extern crate gc;
#[macro_use]
extern crate derivative;

use bimap::BiHashMap;
use gc::{Finalize, Gc, Trace};
use thiserror::Error;

#[derive(Derivative, Trace, Finalize, Clone)]
#[derivative(Debug)]
pub enum Expr {
    Integer(i64),
    Float(f64),
    String(Vec<u8>),
    Bool(bool),
    /// An interned name. Rule names and capture tags are symbols.
    Symbol(Symbol),
    /// A cons cell. Grammar forms like `(some "a")` are lists of these.
    Pair(Value, Value),
    Nil,

    Map(GcMap),

    /// Host function, called by `cmt`, `replace` and replacement substitutions.
    Native {
        #[derivative(Debug(format_with = "Expr::func_formatter"))]
        #[unsafe_ignore_trace]
        func: NativeFn,
        name: Symbol,
    },

    /// A compiled grammar.
    Peg(Gc<Program>),
}

impl Expr {
    fn func_formatter(_: &NativeFn, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("<native>")
    }

    pub fn integer(i: i64) -> Value {
        Gc::new(Expr::Integer(i))
    }

    pub fn float(f: f64) -> Value {
        Gc::new(Expr::Float(f))
    }

    pub fn string<S: Into<Vec<u8>>>(s: S) -> Value {
        Gc::new(Expr::String(s.into()))
    }

    pub fn bool(b: bool) -> Value {
        Gc::new(Expr::Bool(b))
    }

    pub fn symbol(s: Symbol) -> Value {
        Gc::new(Expr::Symbol(s))
    }

    pub fn pair(car: Value, cdr: Value) -> Value {
        Gc::new(Expr::Pair(car, cdr))
    }

    pub fn nil() -> Value {
        Gc::new(Expr::Nil)
    }

    pub fn map(m: GcMap) -> Value {
        Gc::new(Expr::Map(m))
    }

    pub fn peg(program: Program) -> Value {
        Gc::new(Expr::Peg(Gc::new(program)))
    }
}

/// Floats compare and hash by bits, except that every NaN is the same NaN. Map keys
/// and memoized grammar forms need `Eq` to hold.
fn float_key(f: f64) -> u64 {
    if f.is_nan() {
        f64::NAN.to_bits()
    } else {
        f.to_bits()
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        use Expr::*;
        match (self, other) {
            (Integer(a), Integer(b)) => a == b,
            // 0.0 == -0.0, but they have different bits
            (Float(a), Float(b)) => a == b || float_key(*a) == float_key(*b),
            (Bool(a), Bool(b)) => a == b,
            (String(a), String(b)) => a == b,
            (Symbol(a), Symbol(b)) => a == b,
            (Nil, Nil) => true,
            (Pair(a_car, a_cdr), Pair(b_car, b_cdr)) => a_car == b_car && a_cdr == b_cdr,
            (Map(a), Map(b)) => a == b,
            (Native { func: a, .. }, Native { func: b, .. }) => Rc::ptr_eq(a, b),
            (Peg(a), Peg(b)) => std::ptr::eq::<Program>(&**a, &**b),
            _ => false,
        }
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Expr::Integer(i) => i.hash(state),
            // all zeroes hash alike, since they're all equal
            Expr::Float(f) if *f == 0.0 => 0u64.hash(state),
            Expr::Float(f) => float_key(*f).hash(state),
            Expr::String(s) => s.hash(state),
            Expr::Symbol(sym) => sym.hash(state),
            Expr::Bool(b) => b.hash(state),
            Expr::Nil => {}
            Expr::Pair(car, cdr) => {
                car.hash(state);
                cdr.hash(state);
            }
            Expr::Map(map) => map.hash(state),
            Expr::Native { func, .. } => Rc::as_ptr(func).cast::<()>().hash(state),
            Expr::Peg(program) => (&**program as *const Program).hash(state),
        }
    }
}

/// Everything compiling and matching share: interned symbols, the default grammar
/// and the depth limits.
#[derive(Debug, Clone)]
pub struct Engine {
    /// Symbol names and ids, both ways. Ids are handed out in order.
    symbols: BiHashMap<Vec<u8>, Symbol>,
    /// Rules every grammar can fall back on, like `:d` and `:w+`.
    default_grammar: Value,
    limits: Limits,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        let mut engine = Engine {
            symbols: BiHashMap::new(),
            default_grammar: Expr::nil(),
            limits: Limits::default(),
        };
        engine.default_grammar = peg::default_grammar(&mut engine);
        engine
    }

    /// Read exactly one value. `source_name` is only used in error reports.
    pub fn read_one(&mut self, src: &str, source_name: String) -> Result<Value, ExprParseError> {
        parse::read_one(src, source_name, self)
    }

    /// Read every value in `src`.
    pub fn read_many(&mut self, src: &str, source_name: String) -> Result<Vec<Value>, ExprParseError> {
        parse::read_many(src, source_name, self)
    }

    pub fn intern_symbol<B: AsRef<[u8]>>(&mut self, name: B) -> Symbol {
        let name = name.as_ref();
        match self.symbols.get_by_left(name) {
            Some(&id) => id,
            None => {
                let id = self.symbols.len() as Symbol;
                self.symbols.insert(name.to_vec(), id);
                id
            }
        }
    }

    pub fn get_symbol_str(&self, id: Symbol) -> Option<&[u8]> {
        self.symbols.get_by_right(&id).map(Vec::as_slice)
    }

    /// The bytes of anything byte-like: strings and symbols.
    pub fn bytes_view<'a>(&'a self, expr: &'a Expr) -> Option<&'a [u8]> {
        match expr {
            Expr::String(s) => Some(s),
            Expr::Symbol(sym) => self.get_symbol_str(*sym),
            _ => None,
        }
    }

    /// The items of a proper list, or `None` if `expr` isn't one.
    pub fn sexp_to_list(&self, expr: Value) -> Option<Vec<Value>> {
        let mut items = Vec::new();
        let mut cursor = expr;
        while let Expr::Pair(car, cdr) = &*cursor {
            items.push(car.clone());
            let cdr = cdr.clone();
            cursor = cdr;
        }
        match &*cursor {
            Expr::Nil => Some(items),
            _ => None,
        }
    }

    pub fn list_to_sexp(items: &[Value]) -> Value {
        items
            .iter()
            .rev()
            .fold(Expr::nil(), |cdr, car| Expr::pair(car.clone(), cdr))
    }

    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self, expr: &Expr) -> bool {
        !matches!(expr, Expr::Nil | Expr::Bool(false))
    }

    /// Wrap a closure as a callable value.
    pub fn native<F>(&mut self, name: &str, func: F) -> Value
    where
        F: Fn(&mut Engine, &[Value]) -> EvalResult + 'static,
    {
        let name = self.intern_symbol(name);
        Gc::new(Expr::Native {
            func: Rc::new(func),
            name,
        })
    }

    /// Build an exception named `id`. Missing `data` becomes nil.
    pub fn make_err<I, M>(&mut self, id: I, info: M, data: Option<Value>) -> Exception
    where
        I: AsRef<str>,
        M: Into<String>,
    {
        Exception {
            id: self.intern_symbol(id.as_ref()),
            info: info.into(),
            data: data.unwrap_or_else(Expr::nil),
        }
    }

    pub fn exception_is(&self, exn: &Exception, id: &str) -> bool {
        self.get_symbol_str(exn.id) == Some(id.as_bytes())
    }

    /// The map of rules every grammar falls back on.
    pub fn default_grammar(&self) -> Value {
        self.default_grammar.clone()
    }

    /// Replace the default grammar. Grammars compiled afterwards see the new rules.
    pub fn set_default_grammar(&mut self, grammar: GcMap) {
        self.default_grammar = Expr::map(grammar);
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    pub fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }
}

/// A grammar failed to compile, a match raised, or a host callback failed.
#[derive(Debug, Clone, Error)]
#[error("{info}")]
pub struct Exception {
    /// Like `peg/compile/no-lookup`.
    pub id: Symbol,
    pub info: String,
    /// The offending form or value, or nil.
    pub data: Value,
}

pub type Symbol = u64;
pub type Value = Gc<Expr>;
pub type EvalResult = Result<Value, Exception>;

/// A host function. It gets the engine back so it can intern symbols, raise, or
/// match again.
pub type NativeFn = Rc<dyn Fn(&mut Engine, &[Value]) -> EvalResult>;
