use std::{collections::HashMap, convert::TryInto};

use log::debug;

use super::{Opcode, Program, READINT_BIG_ENDIAN, READINT_SIGNED, TAG_MAX};
use crate::{display::BstrFmt, Engine, Exception, Expr, GcMap, Symbol, Value};

/// Compile a grammar into a program.
///
/// The grammar can be anything [the builder](Builder::compile_rule) understands; maps
/// need a `:main` rule. Symbols that aren't defined by the grammar are looked up in
/// the engine's default grammar.
pub fn compile(engine: &mut Engine, peg: Value) -> Result<Program, Exception> {
    let limits = engine.limits();
    let root = match &*engine.default_grammar() {
        Expr::Map(m) => Scope::of_map(m, None, limits.compile_depth),
        _ => Scope::empty(),
    };

    let mut builder = Builder {
        bytecode: Vec::new(),
        constants: Vec::new(),
        scopes: vec![root],
        scope: 0,
        tags: HashMap::new(),
        depth: limits.compile_depth,
        max_hops: limits.compile_depth,
        form: peg.clone(),
        has_backref: false,
        engine,
    };
    let entry = builder.compile_rule(peg)?;
    debug_assert_eq!(entry, 0, "the first rule compiled should be at the start");

    let Builder {
        bytecode,
        constants,
        tags,
        has_backref,
        ..
    } = builder;
    debug!(
        "compiled peg: {} words, {} constants, {} tags, backrefs: {}",
        bytecode.len(),
        constants.len(),
        tags.len(),
        has_backref
    );
    Ok(Program::from_parts(bytecode, constants, has_backref))
}

/// One grammar map's worth of rule definitions.
struct Scope {
    rules: HashMap<Symbol, Value>,
    /// Values we've already compiled in this scope, and where we put them.
    ///
    /// Lists are remembered in the scope they were compiled in. Strings, numbers and
    /// bools mean the same thing everywhere, so they're remembered in the root scope.
    memo: HashMap<Value, u32>,
    parent: Option<usize>,
}

impl Scope {
    fn empty() -> Scope {
        Scope {
            rules: HashMap::new(),
            memo: HashMap::new(),
            parent: None,
        }
    }

    /// Own entries shadow whatever the map inherits from its prototypes.
    fn of_map(map: &GcMap, parent: Option<usize>, max_protos: usize) -> Scope {
        let mut chain = vec![map];
        let mut current = map;
        while let Some(Expr::Map(proto)) = current.proto().map(|p| &**p) {
            if chain.len() > max_protos {
                break;
            }
            chain.push(proto);
            current = proto;
        }

        let mut rules = HashMap::new();
        for map in chain.into_iter().rev() {
            for (k, v) in map.iter() {
                if let Expr::Symbol(sym) = &**k {
                    rules.insert(*sym, v.clone());
                }
            }
        }

        Scope {
            rules,
            memo: HashMap::new(),
            parent,
        }
    }
}

/// Where a rule is going to go.
///
/// Made by [`Builder::reserve`] and used up by [`Builder::emit`], which fills it in.
#[must_use]
struct Reserve {
    index: usize,
    size: usize,
}

struct Builder<'engine> {
    bytecode: Vec<u32>,
    constants: Vec<Value>,

    /// Every scope we've opened. Index 0 is the default grammar.
    scopes: Vec<Scope>,
    /// The scope we're looking symbols up in right now.
    scope: usize,

    tags: HashMap<Symbol, u32>,

    /// How much deeper we can nest before giving up.
    depth: usize,
    /// How many names we can chase in a row.
    max_hops: usize,
    /// The form being compiled, for error messages.
    form: Value,

    has_backref: bool,

    engine: &'engine mut Engine,
}

impl Builder<'_> {
    /// Compile a rule and return where it starts.
    fn compile_rule(&mut self, peg: Value) -> Result<u32, Exception> {
        let old_form = std::mem::replace(&mut self.form, peg.clone());
        let old_scope = self.scope;

        let rule = self.compile_rule_inner(peg);

        self.form = old_form;
        self.scope = old_scope;
        rule
    }

    fn compile_rule_inner(&mut self, peg: Value) -> Result<u32, Exception> {
        // Chase names down to a real rule, switching to the scope that defined it.
        let mut peg = peg;
        let mut hops = self.max_hops;
        loop {
            let sym = match &*peg {
                Expr::Symbol(sym) => *sym,
                _ => break,
            };
            if hops == 0 {
                return Err(self.err(
                    "peg/compile/reference-chain",
                    "rule references nest too deeply (is there a cycle?)",
                ));
            }
            hops -= 1;

            match self.resolve(sym) {
                Some((found, scope)) => {
                    self.scope = scope;
                    self.form = found.clone();
                    peg = found;
                }
                None => {
                    let name = self
                        .engine
                        .get_symbol_str(sym)
                        .map(|s| BstrFmt(s).to_string())
                        .unwrap_or_default();
                    return Err(self.err(
                        "peg/compile/no-lookup",
                        format!("could not find a rule named '{}'", name),
                    ));
                }
            }
        }

        let memo_scope = match &*peg {
            Expr::Pair(..) | Expr::Nil => Some(self.scope),
            Expr::Map(_) => None,
            _ => Some(0),
        };
        if let Some(scope) = memo_scope {
            if let Some(&rule) = self.scopes[scope].memo.get(&peg) {
                return Ok(rule);
            }
        }

        if self.depth == 0 {
            return Err(self.err("peg/compile/too-deep", "peg grammar recursed too deeply"));
        }
        self.depth -= 1;

        let rule: u32 = match self.bytecode.len().try_into() {
            Ok(rule) => rule,
            Err(_) => {
                return Err(self.err(
                    "peg/compile/too-long",
                    format!("the bytecode got longer than {} words", u32::MAX),
                ))
            }
        };
        if let Some(scope) = memo_scope {
            // Write this down *before* compiling, in case the rule refers to itself.
            self.scopes[scope].memo.insert(peg.clone(), rule);
        }

        let rule = match &*peg {
            Expr::Map(map) => {
                let scope = Scope::of_map(map, Some(self.scope), self.max_hops);
                let main_sym = self.engine.intern_symbol(":main");
                let main = match scope.rules.get(&main_sym) {
                    Some(main) => main.clone(),
                    None => {
                        return Err(self.err(
                            "peg/compile/map/no-main",
                            "a map grammar requires a :main rule as an entry point",
                        ))
                    }
                };
                self.scopes.push(scope);
                self.scope = self.scopes.len() - 1;
                self.compile_rule(main)?
            }
            _ => {
                self.write_rule(peg.clone())?;
                rule
            }
        };

        self.depth += 1;
        Ok(rule)
    }

    /// Find what a name means, and the scope it was defined in.
    fn resolve(&self, sym: Symbol) -> Option<(Value, usize)> {
        let mut scope = Some(self.scope);
        while let Some(idx) = scope {
            if let Some(rule) = self.scopes[idx].rules.get(&sym) {
                return Some((rule.clone(), idx));
            }
            scope = self.scopes[idx].parent;
        }
        // every chain ends at the default grammar
        self.scopes[0].rules.get(&sym).map(|rule| (rule.clone(), 0))
    }

    /// Write a rule for anything that isn't a name or a map.
    fn write_rule(&mut self, peg: Value) -> Result<(), Exception> {
        match &*peg {
            &Expr::Bool(b) => {
                let r = self.reserve(2);
                self.emit(r, if b { Opcode::NChar } else { Opcode::NotNChar }, &[0]);
            }
            &Expr::Integer(n) => {
                let count = self.count_word(n.unsigned_abs(), peg.clone())?;
                let r = self.reserve(2);
                let opc = if n < 0 {
                    Opcode::NotNChar
                } else {
                    Opcode::NChar
                };
                self.emit(r, opc, &[count]);
            }
            Expr::String(s) => self.write_literal(s)?,
            Expr::Pair(head, tail) => {
                let args = match self.engine.sexp_to_list(tail.clone()) {
                    Some(args) => args,
                    None => {
                        return Err(self.err(
                            "peg/compile/improper-list",
                            "requires a proper list as the tail of a pattern",
                        ))
                    }
                };
                match **head {
                    Expr::Symbol(s) => {
                        let op = self
                            .engine
                            .get_symbol_str(s)
                            .map(<[u8]>::to_vec)
                            .unwrap_or_default();
                        self.write_rule_from_op_and_args(&op, &args)?;
                    }
                    Expr::Integer(_) => {
                        // Alias for repeat
                        self.check_argc(b"repeat", &args, 1, 1)?;
                        let n = self.count_arg(head)?;
                        self.write_between(n, n, &args[0])?;
                    }
                    _ => {
                        return Err(self.err(
                            "peg/compile/op-type",
                            format!("cannot use a {} as an operator", head.type_name()),
                        ))
                    }
                }
            }
            Expr::Nil => {
                return Err(self.err(
                    "peg/compile/empty-form",
                    "an empty list can't be used as a matcher",
                ))
            }
            _ => {
                return Err(self.err(
                    "peg/compile/bad-matcher",
                    format!("cannot use a {} as a matcher", peg.type_name()),
                ))
            }
        }
        Ok(())
    }

    fn write_rule_from_op_and_args(&mut self, op: &[u8], args: &[Value]) -> Result<(), Exception> {
        match op {
            b"range" => self.write_range(args),
            b"set" => self.write_set(args),
            b"sequence" | b"*" => self.write_variadic(Opcode::Sequence, args),
            b"choice" | b"+" => self.write_variadic(Opcode::Choice, args),

            b"any" | b"some" | b"opt" | b"?" => {
                self.check_argc(op, args, 1, 1)?;
                let (lo, hi) = match op {
                    b"any" => (0, u32::MAX),
                    b"some" => (1, u32::MAX),
                    _ => (0, 1),
                };
                self.write_between(lo, hi, &args[0])
            }
            b"at-least" | b"at-most" | b"repeat" | b"count" => {
                self.check_argc(op, args, 2, 2)?;
                let n = self.count_arg(&args[0])?;
                let (lo, hi) = match op {
                    b"at-least" => (n, u32::MAX),
                    b"at-most" => (0, n),
                    _ => (n, n),
                };
                self.write_between(lo, hi, &args[1])
            }
            b"between" => {
                self.check_argc(op, args, 3, 3)?;
                let lo = self.count_arg(&args[0])?;
                let hi = self.count_arg(&args[1])?;
                if lo > hi {
                    return Err(self.err(
                        "peg/compile/between/bad-bounds",
                        format!("between needs lo <= hi, but got {} and {}", lo, hi),
                    ));
                }
                self.write_between(lo, hi, &args[2])
            }

            b"look" | b">" => self.write_look(args),
            b"not" | b"!" => self.write_onerule(op, Opcode::Not, args),
            b"if" => self.write_tworule(op, Opcode::If, args),
            b"if-not" => self.write_tworule(op, Opcode::IfNot, args),
            b"to" => self.write_onerule(op, Opcode::To, args),
            b"thru" => self.write_onerule(op, Opcode::Thru, args),
            b"drop" => self.write_onerule(op, Opcode::Drop, args),
            b"only-tags" => {
                self.has_backref = true;
                self.write_onerule(op, Opcode::OnlyTags, args)
            }
            b"lenprefix" => self.write_tworule(op, Opcode::LenPrefix, args),
            b"sub" => self.write_tworule(op, Opcode::Sub, args),
            b"split" => self.write_tworule(op, Opcode::Split, args),

            b"capture" | b"<-" | b"quote" => self.write_capture(op, Opcode::Capture, args),
            b"accumulate" | b"%" => self.write_capture(op, Opcode::Accumulate, args),
            b"group" => self.write_capture(op, Opcode::Group, args),
            b"unref" => {
                self.has_backref = true;
                self.write_capture(op, Opcode::Unref, args)
            }
            b"number" => self.write_number(args),
            b"nth" => self.write_nth(args),

            b"position" | b"$" => self.write_tag_only(op, Opcode::Position, args),
            b"line" => self.write_tag_only(op, Opcode::Line, args),
            b"column" => self.write_tag_only(op, Opcode::Column, args),
            b"argument" => {
                self.check_argc(op, args, 1, 2)?;
                let r = self.reserve(3);
                let index = self.count_arg(&args[0])?;
                let tag = self.tag_arg(args.get(1))?;
                self.emit(r, Opcode::Argument, &[index, tag]);
                Ok(())
            }
            b"constant" => {
                self.check_argc(op, args, 1, 2)?;
                let r = self.reserve(3);
                let tag = self.tag_arg(args.get(1))?;
                let constant = self.emit_constant(args[0].clone())?;
                self.emit(r, Opcode::Constant, &[constant, tag]);
                Ok(())
            }
            b"replace" | b"/" => self.write_transform(op, Opcode::Replace, args),
            b"cmt" => self.write_transform(op, Opcode::MatchTime, args),

            b"error" => {
                self.check_argc(op, args, 0, 1)?;
                let r = self.reserve(2);
                // No argument means "raise right here"
                let subpeg = args.get(0).cloned().unwrap_or_else(|| Expr::integer(0));
                let sub = self.compile_rule(subpeg)?;
                self.emit(r, Opcode::Error, &[sub]);
                Ok(())
            }
            b"backmatch" => {
                self.check_argc(op, args, 0, 1)?;
                self.has_backref = true;
                let r = self.reserve(2);
                let tag = self.tag_arg(args.get(0))?;
                self.emit(r, Opcode::Backmatch, &[tag]);
                Ok(())
            }
            b"backref" | b"->" => {
                self.check_argc(op, args, 1, 2)?;
                self.has_backref = true;
                let r = self.reserve(3);
                let search = self.emit_tag(&args[0])?;
                let tag = self.tag_arg(args.get(1))?;
                self.emit(r, Opcode::GetTag, &[search, tag]);
                Ok(())
            }

            b"int" => self.write_readint(op, args, true, false),
            b"int-be" => self.write_readint(op, args, true, true),
            b"uint" => self.write_readint(op, args, false, false),
            b"uint-be" => self.write_readint(op, args, false, true),

            _ => Err(self.err(
                "peg/compile/bad-op",
                format!("did not recognize the operator '{}'", BstrFmt(op)),
            )),
        }
    }

    fn write_literal(&mut self, s: &[u8]) -> Result<(), Exception> {
        let len: u32 = match s.len().try_into() {
            Ok(len) => len,
            Err(_) => {
                return Err(self.err(
                    "peg/compile/too-long/string",
                    format!("the string had a length of {}, which is too long", s.len()),
                ))
            }
        };

        let mut body = Vec::with_capacity(1 + (s.len() + 3) / 4);
        body.push(len);
        body.extend(s.chunks(4).map(|chunk| {
            let mut word = [0u8; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        }));

        let r = self.reserve(1 + body.len());
        self.emit(r, Opcode::Literal, &body);
        Ok(())
    }

    fn write_range(&mut self, args: &[Value]) -> Result<(), Exception> {
        self.check_argc(b"range", args, 1, usize::MAX)?;
        if let [arg] = args {
            let [lo, hi] = self.range_arg(arg)?;
            let r = self.reserve(2);
            self.emit(r, Opcode::Range, &[lo as u32 | (hi as u32) << 16]);
        } else {
            let mut bitmap = [0u32; 8];
            for arg in args {
                let [lo, hi] = self.range_arg(arg)?;
                for byte in lo..=hi {
                    set_bit(&mut bitmap, byte);
                }
            }
            let r = self.reserve(9);
            self.emit(r, Opcode::Set, &bitmap);
        }
        Ok(())
    }

    fn write_set(&mut self, args: &[Value]) -> Result<(), Exception> {
        self.check_argc(b"set", args, 1, 1)?;
        let mut set = match &*args[0] {
            Expr::String(s) => s.clone(),
            _ => {
                return Err(self.err(
                    "peg/compile/set/non-string",
                    "set takes one string argument",
                ))
            }
        };
        set.sort_unstable();
        set.dedup();

        // One contiguous run is cheaper as a range
        if let [[lo, hi]] = minimum_spanning_set(&set).as_slice() {
            let r = self.reserve(2);
            self.emit(r, Opcode::Range, &[*lo as u32 | (*hi as u32) << 16]);
        } else {
            let mut bitmap = [0u32; 8];
            for &byte in &set {
                set_bit(&mut bitmap, byte);
            }
            let r = self.reserve(9);
            self.emit(r, Opcode::Set, &bitmap);
        }
        Ok(())
    }

    fn write_variadic(&mut self, opc: Opcode, args: &[Value]) -> Result<(), Exception> {
        let count: u32 = match args.len().try_into() {
            Ok(count) => count,
            Err(_) => {
                return Err(self.err(
                    "peg/compile/too-many-subrules",
                    format!("can only have up to {} subrules", u32::MAX),
                ))
            }
        };

        let r = self.reserve(2 + args.len());
        let mut body = Vec::with_capacity(1 + args.len());
        body.push(count);
        for arg in args {
            body.push(self.compile_rule(arg.clone())?);
        }
        self.emit(r, opc, &body);
        Ok(())
    }

    fn write_between(&mut self, lo: u32, hi: u32, subpeg: &Value) -> Result<(), Exception> {
        let r = self.reserve(4);
        let sub = self.compile_rule(subpeg.clone())?;
        self.emit(r, Opcode::Between, &[lo, hi, sub]);
        Ok(())
    }

    fn write_look(&mut self, args: &[Value]) -> Result<(), Exception> {
        self.check_argc(b"look", args, 1, 2)?;
        let r = self.reserve(3);
        let (offset, subpeg) = match args {
            [offset, subpeg] => {
                let offset: i32 = match &**offset {
                    Expr::Integer(n) => match (*n).try_into() {
                        Ok(offset) => offset,
                        Err(_) => {
                            return Err(self.err(
                                "peg/compile/look/bad-offset",
                                format!("look offset {} is out of range", n),
                            ))
                        }
                    },
                    other => {
                        return Err(self.err(
                            "peg/compile/look/bad-offset",
                            format!("look offset must be an integer, not a {}", other.type_name()),
                        ))
                    }
                };
                (offset, subpeg)
            }
            [subpeg] => (0, subpeg),
            _ => unreachable!("checked the argc"),
        };
        let sub = self.compile_rule(subpeg.clone())?;
        self.emit(r, Opcode::Look, &[offset as u32, sub]);
        Ok(())
    }

    fn write_onerule(&mut self, op: &[u8], opc: Opcode, args: &[Value]) -> Result<(), Exception> {
        self.check_argc(op, args, 1, 1)?;
        let r = self.reserve(2);
        let sub = self.compile_rule(args[0].clone())?;
        self.emit(r, opc, &[sub]);
        Ok(())
    }

    fn write_tworule(&mut self, op: &[u8], opc: Opcode, args: &[Value]) -> Result<(), Exception> {
        self.check_argc(op, args, 2, 2)?;
        let r = self.reserve(3);
        let a = self.compile_rule(args[0].clone())?;
        let b = self.compile_rule(args[1].clone())?;
        self.emit(r, opc, &[a, b]);
        Ok(())
    }

    /// `(op patt ?tag)`
    fn write_capture(&mut self, op: &[u8], opc: Opcode, args: &[Value]) -> Result<(), Exception> {
        self.check_argc(op, args, 1, 2)?;
        let r = self.reserve(3);
        let tag = self.tag_arg(args.get(1))?;
        let sub = self.compile_rule(args[0].clone())?;
        self.emit(r, opc, &[sub, tag]);
        Ok(())
    }

    /// `(op ?tag)`
    fn write_tag_only(&mut self, op: &[u8], opc: Opcode, args: &[Value]) -> Result<(), Exception> {
        self.check_argc(op, args, 0, 1)?;
        let r = self.reserve(2);
        let tag = self.tag_arg(args.get(0))?;
        self.emit(r, opc, &[tag]);
        Ok(())
    }

    /// `(op patt subst ?tag)`
    fn write_transform(&mut self, op: &[u8], opc: Opcode, args: &[Value]) -> Result<(), Exception> {
        self.check_argc(op, args, 2, 3)?;
        let r = self.reserve(4);
        let tag = self.tag_arg(args.get(2))?;
        let sub = self.compile_rule(args[0].clone())?;
        let constant = self.emit_constant(args[1].clone())?;
        self.emit(r, opc, &[sub, constant, tag]);
        Ok(())
    }

    fn write_number(&mut self, args: &[Value]) -> Result<(), Exception> {
        self.check_argc(b"number", args, 1, 3)?;
        let r = self.reserve(4);
        let base = match args.get(1).map(|b| &**b) {
            None | Some(Expr::Nil) => 0,
            Some(&Expr::Integer(base)) if (2..=36).contains(&base) => base as u32,
            Some(_) => {
                return Err(self.err(
                    "peg/compile/number/bad-base",
                    "number base must be nil or an integer from 2 to 36",
                ))
            }
        };
        let tag = self.tag_arg(args.get(2))?;
        let sub = self.compile_rule(args[0].clone())?;
        self.emit(r, Opcode::CaptureNumber, &[sub, base, tag]);
        Ok(())
    }

    fn write_nth(&mut self, args: &[Value]) -> Result<(), Exception> {
        self.check_argc(b"nth", args, 2, 3)?;
        let r = self.reserve(4);
        let nth = self.count_arg(&args[0])?;
        let tag = self.tag_arg(args.get(2))?;
        let sub = self.compile_rule(args[1].clone())?;
        self.emit(r, Opcode::Nth, &[nth, sub, tag]);
        Ok(())
    }

    fn write_readint(
        &mut self,
        op: &[u8],
        args: &[Value],
        signed: bool,
        big_endian: bool,
    ) -> Result<(), Exception> {
        self.check_argc(op, args, 1, 2)?;
        let r = self.reserve(3);
        // unsigned 8-byte ints don't fit in an i64
        let max_width = if signed { 8 } else { 7 };
        let width = match &*args[0] {
            &Expr::Integer(w) if (1..=max_width).contains(&w) => w as u32,
            _ => {
                return Err(self.err(
                    "peg/compile/int/bad-width",
                    format!(
                        "{} needs a width from 1 to {} bytes",
                        BstrFmt(op),
                        max_width
                    ),
                ))
            }
        };
        let tag = self.tag_arg(args.get(1))?;

        let mut flags = width;
        if signed {
            flags |= READINT_SIGNED;
        }
        if big_endian {
            flags |= READINT_BIG_ENDIAN;
        }
        self.emit(r, Opcode::ReadInt, &[flags, tag]);
        Ok(())
    }

    /// Push this many 0 words onto the end of the bytecode.
    fn reserve(&mut self, size: usize) -> Reserve {
        let index = self.bytecode.len();
        self.bytecode.resize(index + size, 0);
        Reserve { index, size }
    }

    /// Fill in a reservation.
    fn emit(&mut self, reserve: Reserve, opc: Opcode, body: &[u32]) {
        debug_assert_eq!(
            reserve.size,
            body.len() + 1,
            "reserved the wrong size for {:?}",
            opc
        );
        let slot = &mut self.bytecode[reserve.index..reserve.index + reserve.size];
        debug_assert!(
            all_zero(slot),
            "tried to overwrite words at {}: {:x?} with {:?}",
            reserve.index,
            slot,
            opc,
        );
        slot[0] = opc.into();
        slot[1..].copy_from_slice(body);
    }

    /// Save the constant (or find it if we already have it) and return its index.
    fn emit_constant(&mut self, constant: Value) -> Result<u32, Exception> {
        let idx = if let Some(already) = self.constants.iter().position(|c| c == &constant) {
            // hey we know this already
            already
        } else {
            self.constants.push(constant);
            self.constants.len() - 1
        };
        idx.try_into().map_err(|_| {
            self.err(
                "peg/compile/too-many-constants",
                format!("cannot have more than {} constants", u32::MAX),
            )
        })
    }

    /// Give a tag symbol a number, or get its number if it already has one.
    fn emit_tag(&mut self, tag: &Value) -> Result<u32, Exception> {
        let sym = match &**tag {
            Expr::Symbol(sym) => *sym,
            other => {
                return Err(self.err(
                    "peg/compile/tag-type",
                    format!("expected a symbol for a tag, not a {}", other.type_name()),
                ))
            }
        };
        if let Some(&id) = self.tags.get(&sym) {
            return Ok(id);
        }

        let id = self.tags.len() as u32 + 1;
        if id > TAG_MAX {
            return Err(self.err(
                "peg/compile/too-many-tags",
                format!("too many tags - up to {} tags are supported per peg", TAG_MAX),
            ));
        }
        self.tags.insert(sym, id);
        Ok(id)
    }

    fn tag_arg(&mut self, tag: Option<&Value>) -> Result<u32, Exception> {
        match tag {
            Some(tag) => self.emit_tag(tag),
            None => Ok(0),
        }
    }

    /// A non-negative integer argument.
    fn count_arg(&mut self, n: &Value) -> Result<u32, Exception> {
        match **n {
            Expr::Integer(x) if x >= 0 => self.count_word(x as u64, n.clone()),
            _ => Err(self.err(
                "peg/compile/expected-count",
                format!("expected a non-negative integer, got {}", self.engine.write_expr(n)),
            )),
        }
    }

    fn count_word(&mut self, n: u64, form: Value) -> Result<u32, Exception> {
        n.try_into().map_err(|_| {
            self.engine.make_err(
                "peg/compile/count-too-big",
                format!("{} is too big to count to", n),
                Some(form),
            )
        })
    }

    /// A 2-byte string like `"az"`.
    fn range_arg(&mut self, arg: &Value) -> Result<[u8; 2], Exception> {
        match &**arg {
            Expr::String(s) if s.len() == 2 => {
                if s[0] <= s[1] {
                    Ok([s[0], s[1]])
                } else {
                    Err(self.err(
                        "peg/compile/range/empty",
                        format!("the range {:?} is backwards", BstrFmt(s)),
                    ))
                }
            }
            _ => Err(self.err(
                "peg/compile/range/bad-str-len",
                "range arguments must be 2-byte strings",
            )),
        }
    }

    fn check_argc(&mut self, op: &[u8], args: &[Value], min: usize, max: usize) -> Result<(), Exception> {
        if (min..=max).contains(&args.len()) {
            return Ok(());
        }
        let expected = if min == max {
            format!("exactly {}", min)
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("between {} and {}", min, max)
        };
        Err(self.err(
            &format!("peg/compile/{}/argc", BstrFmt(op)),
            format!(
                "{} takes {} arguments, but got {}",
                BstrFmt(op),
                expected,
                args.len()
            ),
        ))
    }

    /// Make an error about the form we're compiling right now.
    fn err<S: AsRef<str>>(&mut self, id: &str, msg: S) -> Exception {
        let form = self.form.clone();
        let info = format!(
            "grammar error in {}, {}",
            self.engine.write_expr(&form),
            msg.as_ref()
        );
        self.engine.make_err(id, info, Some(form))
    }
}

fn all_zero(slice: &[u32]) -> bool {
    slice.iter().all(|w| *w == 0)
}

fn set_bit(bitmap: &mut [u32; 8], byte: u8) {
    bitmap[(byte >> 5) as usize] |= 1 << (byte & 31);
}

/// Input must already be sorted and deduped.
fn minimum_spanning_set(set: &[u8]) -> Vec<[u8; 2]> {
    let (first, rest) = match set.split_first() {
        Some(it) => it,
        None => return Vec::new(),
    };

    let mut out = Vec::new();
    let mut run = [*first, *first];
    for &byte in rest {
        if run[1].checked_add(1) == Some(byte) {
            run[1] = byte;
        } else {
            // the run broke here; save it and start another
            out.push(run);
            run = [byte, byte];
        }
    }
    // And we do need to cap it off.
    out.push(run);
    out
}
