//! Compiled grammars, and getting them in and out of bytes.

use std::convert::TryInto;

use gc::{Finalize, Trace};
use log::debug;

use super::{
    execute::{match_, Match},
    verify::{verify_program, InvalidBytecode},
};
use crate::{parse::symbol_reads_back, Engine, Exception, Expr, Value};

/// A compiled grammar.
///
/// The only ways to get one are compiling a grammar or loading bytes, and both of
/// them make sure the bytecode is safe to run.
///
/// Constants are `gc` values, which live on one thread, so a `Program` is neither
/// `Send` nor `Sync`. Sharing it means matching re-entrantly on the thread that
/// made it. To use a grammar on another thread, send its [`Program::to_bytes`]
/// there and [`Program::load`] it.
///
/// ```compile_fail
/// fn needs_send<T: Send>() {}
/// needs_send::<please_peg::Program>();
/// ```
#[derive(Debug, Clone, Trace, Finalize)]
pub struct Program {
    bytecode: Vec<u32>,
    constants: Vec<Value>,
    has_backref: bool,
}

impl Program {
    /// Only for the compiler, which doesn't write bad bytecode.
    pub(crate) fn from_parts(bytecode: Vec<u32>, constants: Vec<Value>, has_backref: bool) -> Program {
        Program {
            bytecode,
            constants,
            has_backref,
        }
    }

    pub fn bytecode(&self) -> &[u32] {
        &self.bytecode
    }

    pub fn constants(&self) -> &[Value] {
        &self.constants
    }

    /// Whether matching needs to remember tagged captures.
    pub fn has_backref(&self) -> bool {
        self.has_backref
    }

    /// Run this program. See [`match_`].
    pub fn match_at(
        &self,
        engine: &mut Engine,
        text: &[u8],
        start: usize,
        extra: &[Value],
    ) -> Result<Option<Match>, Exception> {
        match_(engine, self, text, start, extra)
    }

    /// Serialize this program.
    ///
    /// ```text
    /// u64 LE  number of words
    /// i32 LE  number of constants
    /// i32 LE  each word
    /// u32 LE  length, then the written form of the constant; for each constant
    /// ```
    pub fn to_bytes(&self, engine: &mut Engine) -> Result<Vec<u8>, Exception> {
        let mut out = Vec::with_capacity(12 + self.bytecode.len() * 4);
        out.extend_from_slice(&(self.bytecode.len() as u64).to_le_bytes());
        let constants_count: i32 = match self.constants.len().try_into() {
            Ok(it) => it,
            Err(_) => {
                return Err(engine.make_err(
                    "peg/save/too-many-constants",
                    format!("{} constants can't be saved", self.constants.len()),
                    None,
                ))
            }
        };
        out.extend_from_slice(&constants_count.to_le_bytes());
        for &word in &self.bytecode {
            out.extend_from_slice(&(word as i32).to_le_bytes());
        }

        for constant in &self.constants {
            if !serializable(engine, constant) {
                let msg = format!("can't save the constant {}", engine.write_expr(constant));
                return Err(engine.make_err("peg/save/unserializable", msg, Some(constant.clone())));
            }
            let written = engine.write_expr(constant);
            out.extend_from_slice(&(written.len() as u32).to_le_bytes());
            out.extend_from_slice(written.as_bytes());
        }
        Ok(out)
    }

    /// Deserialize and verify a program written by [`Program::to_bytes`].
    pub fn load(engine: &mut Engine, bytes: &[u8]) -> Result<Program, InvalidBytecode> {
        let mut cursor = Cursor { bytes };
        let words = cursor.u64()?;
        let constants_count = cursor.i32()?;
        if constants_count < 0 {
            return Err(framing("negative constant count"));
        }
        match words.checked_mul(4) {
            Some(len) if len <= cursor.bytes.len() as u64 => {}
            _ => return Err(framing("word count is bigger than the input")),
        }

        let mut bytecode = Vec::with_capacity(words as usize);
        for _ in 0..words {
            bytecode.push(cursor.i32()? as u32);
        }

        let mut constants = Vec::new();
        for _ in 0..constants_count {
            let len = cursor.u32()? as usize;
            let text = cursor.take(len)?;
            let text = std::str::from_utf8(text).map_err(|_| framing("constant isn't utf-8"))?;
            let constant = engine
                .read_one(text, "<constant>".to_owned())
                .map_err(|_| framing("constant doesn't read"))?;
            constants.push(constant);
        }
        if !cursor.bytes.is_empty() {
            return Err(framing("trailing bytes"));
        }

        let program = UnverifiedProgram::new(bytecode, constants).verify()?;
        debug!(
            "loaded peg: {} words, {} constants",
            program.bytecode.len(),
            program.constants.len()
        );
        Ok(program)
    }
}

/// Bytecode and constants from somewhere other than the compiler.
///
/// It can't be run until it's been [verified](UnverifiedProgram::verify).
#[derive(Debug, Clone)]
pub struct UnverifiedProgram {
    pub bytecode: Vec<u32>,
    pub constants: Vec<Value>,
}

impl UnverifiedProgram {
    pub fn new(bytecode: Vec<u32>, constants: Vec<Value>) -> UnverifiedProgram {
        UnverifiedProgram {
            bytecode,
            constants,
        }
    }

    pub fn verify(self) -> Result<Program, InvalidBytecode> {
        let verified = verify_program(&self.bytecode, self.constants.len())?;
        Ok(Program {
            bytecode: self.bytecode,
            constants: self.constants,
            has_backref: verified.has_backref,
        })
    }
}

/// Whether writing this and reading it back gets the same thing.
fn serializable(engine: &Engine, expr: &Expr) -> bool {
    match expr {
        Expr::Native { .. } | Expr::Peg(_) => false,
        Expr::Float(f) => f.is_finite(),
        Expr::Symbol(sym) => engine.get_symbol_str(*sym).map_or(false, symbol_reads_back),
        // the reader only makes proper lists
        Expr::Pair(car, cdr) => {
            serializable(engine, car)
                && match &**cdr {
                    Expr::Nil => true,
                    Expr::Pair(..) => serializable(engine, cdr),
                    _ => false,
                }
        }
        Expr::Map(m) => {
            m.proto().is_none()
                && m.iter()
                    .all(|(k, v)| serializable(engine, k) && serializable(engine, v))
        }
        _ => true,
    }
}

fn framing(why: &str) -> InvalidBytecode {
    debug!("rejected serialized peg: {}", why);
    InvalidBytecode
}

struct Cursor<'a> {
    bytes: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], InvalidBytecode> {
        if len > self.bytes.len() {
            return Err(framing("ran out of bytes"));
        }
        let (head, tail) = self.bytes.split_at(len);
        self.bytes = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], InvalidBytecode> {
        let mut out = [0; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u64(&mut self) -> Result<u64, InvalidBytecode> {
        self.array().map(u64::from_le_bytes)
    }

    fn u32(&mut self) -> Result<u32, InvalidBytecode> {
        self.array().map(u32::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32, InvalidBytecode> {
        self.array().map(i32::from_le_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peg::compile;

    fn compiled(engine: &mut Engine, src: &str) -> Program {
        let grammar = engine.read_one(src, "<test>".to_owned()).unwrap();
        compile(engine, grammar).unwrap()
    }

    #[test]
    fn round_trip() {
        let mut engine = Engine::new();
        let program = compiled(
            &mut engine,
            r#"(sequence (constant {:a 1 :b "two"}) (/ :d+ 2.5) (backmatch))"#,
        );
        let bytes = program.to_bytes(&mut engine).unwrap();
        let loaded = Program::load(&mut engine, &bytes).unwrap();
        assert_eq!(loaded.bytecode(), program.bytecode());
        assert_eq!(loaded.constants(), program.constants());
        assert_eq!(loaded.has_backref(), program.has_backref());
    }

    #[test]
    fn natives_dont_save() {
        let mut engine = Engine::new();
        let native = engine.native("yes", |_, _| Ok(Expr::bool(true)));
        let grammar = Engine::list_to_sexp(&[
            Expr::symbol(engine.intern_symbol("cmt")),
            Expr::string("a"),
            native,
        ]);
        let program = compile(&mut engine, grammar).unwrap();
        let err = program.to_bytes(&mut engine).unwrap_err();
        assert!(engine.exception_is(&err, "peg/save/unserializable"));
    }

    #[test]
    fn bad_framing() {
        let mut engine = Engine::new();
        let program = compiled(&mut engine, r#"(capture "abc")"#);
        let bytes = program.to_bytes(&mut engine).unwrap();

        assert!(Program::load(&mut engine, &bytes[..bytes.len() - 1]).is_err());
        assert!(Program::load(&mut engine, &[]).is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(Program::load(&mut engine, &trailing).is_err());

        let mut huge = bytes.clone();
        huge[..8].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(Program::load(&mut engine, &huge).is_err());

        let mut negative = bytes;
        negative[8..12].copy_from_slice(&(-1i32).to_le_bytes());
        assert!(Program::load(&mut engine, &negative).is_err());
    }

    #[test]
    fn load_verifies() {
        let mut engine = Engine::new();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u64.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        // Not -> 0, which points at itself. Fine.
        bytes.extend_from_slice(&11i32.to_le_bytes());
        bytes.extend_from_slice(&0i32.to_le_bytes());
        assert!(Program::load(&mut engine, &bytes).is_ok());

        // Not -> 1, which is in the middle of itself.
        bytes[16..20].copy_from_slice(&1i32.to_le_bytes());
        assert!(Program::load(&mut engine, &bytes).is_err());
    }

    #[test]
    fn symbols_come_back_the_same() {
        let mut engine = Engine::new();
        let program = compiled(&mut engine, "(sequence (constant :café) (constant '(x ∀ y)))");
        let bytes = program.to_bytes(&mut engine).unwrap();
        let loaded = Program::load(&mut engine, &bytes).unwrap();

        let before = program.match_at(&mut engine, b"", 0, &[]).unwrap().unwrap();
        let after = loaded.match_at(&mut engine, b"", 0, &[]).unwrap().unwrap();
        assert_eq!(before.captures, after.captures);
        assert_eq!(engine.write_expr(&after.captures[0]), ":café");
    }

    #[test]
    fn only_readable_constants_save() {
        let mut engine = Engine::new();
        let constant = Expr::symbol(engine.intern_symbol("constant"));
        let unreadable = vec![
            Expr::symbol(engine.intern_symbol("two words")),
            Expr::symbol(engine.intern_symbol("12")),
            Expr::symbol(engine.intern_symbol("nil")),
            Expr::symbol(engine.intern_symbol([0xffu8])),
            Expr::pair(Expr::integer(1), Expr::integer(2)),
            Expr::pair(Expr::integer(1), Expr::pair(Expr::integer(2), Expr::integer(3))),
        ];
        for value in unreadable {
            let grammar = Engine::list_to_sexp(&[constant.clone(), value.clone()]);
            let program = compile(&mut engine, grammar).unwrap();
            let err = program.to_bytes(&mut engine).unwrap_err();
            assert!(
                engine.exception_is(&err, "peg/save/unserializable"),
                "{} saved",
                engine.write_expr(&value)
            );
        }
    }
}
