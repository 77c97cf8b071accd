//! Searching and replacing with compiled grammars.
//!
//! The free functions take a [`Program`]. The `peg_*` methods on [`Engine`] take any
//! value, and compile it first unless it's already a compiled peg.

use gc::Gc;

use super::{
    compile,
    execute::{check_start, match_, PegState},
    Program,
};
use crate::{Engine, Exception, Expr, Value};

/// Offset of the first place at or after `start` where the program matches.
pub fn find(
    engine: &mut Engine,
    program: &Program,
    text: &[u8],
    start: usize,
    extra: &[Value],
) -> Result<Option<usize>, Exception> {
    check_start(engine, text, start)?;
    let mut state = PegState::new(engine, program, text, extra);
    for at in start..text.len() {
        if state.run(at)?.is_some() {
            return Ok(Some(at));
        }
    }
    Ok(None)
}

/// Every offset at or after `start` where the program matches. Matches may overlap.
pub fn find_all(
    engine: &mut Engine,
    program: &Program,
    text: &[u8],
    start: usize,
    extra: &[Value],
) -> Result<Vec<usize>, Exception> {
    check_start(engine, text, start)?;
    let mut state = PegState::new(engine, program, text, extra);
    let mut found = Vec::new();
    for at in start..text.len() {
        if state.run(at)?.is_some() {
            found.push(at);
        }
    }
    Ok(found)
}

/// Replace the first match (or every match, if `all`) with `subst`.
///
/// `subst` can be a string, a map from matched text to replacements, or a native
/// called with the matched text and then the captures. Replacements that aren't
/// strings or symbols are printed, and nil is empty.
pub fn replace(
    engine: &mut Engine,
    program: &Program,
    subst: &Value,
    text: &[u8],
    start: usize,
    extra: &[Value],
    all: bool,
) -> Result<Vec<u8>, Exception> {
    check_start(engine, text, start)?;
    let mut state = PegState::new(engine, program, text, extra);
    let mut out = Vec::with_capacity(text.len());
    let mut trail = 0;
    let mut at = start;
    while at < text.len() {
        let end = match state.run(at)? {
            Some(end) => end,
            None => {
                at += 1;
                continue;
            }
        };
        out.extend_from_slice(&text[trail..at]);
        let captures = state.take_captures();
        let replacement = substitute(state.engine(), subst, &text[at..end], &captures)?;
        out.extend_from_slice(&replacement);
        trail = end;
        if !all {
            break;
        }
        // a zero-width match would match again right here
        at = if end == at { at + 1 } else { end };
    }
    out.extend_from_slice(&text[trail..]);
    Ok(out)
}

fn substitute(
    engine: &mut Engine,
    subst: &Value,
    matched: &[u8],
    captures: &[Value],
) -> Result<Vec<u8>, Exception> {
    let replacement = match &**subst {
        Expr::Native { func, .. } => {
            let func = func.clone();
            let mut args = Vec::with_capacity(captures.len() + 1);
            args.push(Expr::string(matched));
            args.extend(captures.iter().cloned());
            func(engine, &args)?
        }
        Expr::Map(map) => map
            .lookup(&Expr::String(matched.to_vec()))
            .unwrap_or_else(Expr::nil),
        _ => subst.clone(),
    };
    if let Some(bytes) = engine.bytes_view(&replacement) {
        return Ok(bytes.to_vec());
    }
    match &*replacement {
        Expr::Nil => Ok(Vec::new()),
        Expr::Native { .. } | Expr::Peg(_) => {
            let msg = format!("can't substitute {}", engine.write_expr(&replacement));
            Err(engine.make_err("peg/replace/bad-subst", msg, Some(replacement.clone())))
        }
        other => Ok(engine.print_expr(other).into_bytes()),
    }
}

impl Engine {
    /// Compile a grammar.
    pub fn peg_compile(&mut self, grammar: Value) -> Result<Program, Exception> {
        compile(self, grammar)
    }

    /// Match at `start`, returning the captures.
    pub fn peg_match(
        &mut self,
        peg: &Value,
        text: &[u8],
        start: usize,
        extra: &[Value],
    ) -> Result<Option<Vec<Value>>, Exception> {
        let program = self.resolve_peg(peg)?;
        Ok(match_(self, &program, text, start, extra)?.map(|m| m.captures))
    }

    pub fn peg_find(
        &mut self,
        peg: &Value,
        text: &[u8],
        start: usize,
        extra: &[Value],
    ) -> Result<Option<usize>, Exception> {
        let program = self.resolve_peg(peg)?;
        find(self, &program, text, start, extra)
    }

    pub fn peg_find_all(
        &mut self,
        peg: &Value,
        text: &[u8],
        start: usize,
        extra: &[Value],
    ) -> Result<Vec<usize>, Exception> {
        let program = self.resolve_peg(peg)?;
        find_all(self, &program, text, start, extra)
    }

    pub fn peg_replace(
        &mut self,
        peg: &Value,
        subst: &Value,
        text: &[u8],
        start: usize,
        extra: &[Value],
    ) -> Result<Vec<u8>, Exception> {
        let program = self.resolve_peg(peg)?;
        replace(self, &program, subst, text, start, extra, false)
    }

    pub fn peg_replace_all(
        &mut self,
        peg: &Value,
        subst: &Value,
        text: &[u8],
        start: usize,
        extra: &[Value],
    ) -> Result<Vec<u8>, Exception> {
        let program = self.resolve_peg(peg)?;
        replace(self, &program, subst, text, start, extra, true)
    }

    fn resolve_peg(&mut self, peg: &Value) -> Result<Gc<Program>, Exception> {
        match &**peg {
            Expr::Peg(program) => Ok(program.clone()),
            _ => Ok(Gc::new(compile(self, peg.clone())?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GcMap;

    fn read(engine: &mut Engine, src: &str) -> Value {
        engine.read_one(src, "<test>".to_owned()).unwrap()
    }

    #[test]
    fn finds() {
        let mut engine = Engine::new();
        let peg = read(&mut engine, r#""na""#);
        assert_eq!(engine.peg_find(&peg, b"banana", 0, &[]).unwrap(), Some(2));
        assert_eq!(engine.peg_find(&peg, b"banana", 3, &[]).unwrap(), Some(4));
        assert_eq!(engine.peg_find(&peg, b"banana", 5, &[]).unwrap(), None);
        assert_eq!(engine.peg_find_all(&peg, b"banana", 0, &[]).unwrap(), vec![2, 4]);

        let err = engine.peg_find(&peg, b"banana", 7, &[]).unwrap_err();
        assert!(engine.exception_is(&err, "peg/start-out-of-range"));
    }

    #[test]
    fn replaces() {
        let mut engine = Engine::new();
        let peg = read(&mut engine, r#""a""#);
        let b = Expr::string("b");
        assert_eq!(engine.peg_replace_all(&peg, &b, b"banana", 0, &[]).unwrap(), b"bbnbnb");
        assert_eq!(engine.peg_replace(&peg, &b, b"banana", 0, &[]).unwrap(), b"bbnana");
        assert_eq!(engine.peg_replace(&peg, &b, b"xyz", 0, &[]).unwrap(), b"xyz");

        let empty = read(&mut engine, r#""""#);
        let dash = Expr::string("-");
        assert_eq!(engine.peg_replace_all(&empty, &dash, b"ab", 0, &[]).unwrap(), b"-a-b");
    }

    #[test]
    fn substitutions() {
        let mut engine = Engine::new();
        let peg = read(&mut engine, r#"(capture :d+)"#);

        let mut map = GcMap::new();
        map.insert(Expr::string("1"), Expr::string("one"));
        map.insert(Expr::string("22"), Expr::symbol(engine.intern_symbol("two")));
        let map = Expr::map(map);
        assert_eq!(
            engine.peg_replace_all(&peg, &map, b"1+22", 0, &[]).unwrap(),
            b"one+two"
        );

        let twice = engine.native("twice", |engine, args| {
            // args are the matched text, then the captures
            let cap = engine.bytes_view(&args[1]).unwrap_or_default().to_vec();
            Ok(Expr::string([cap.clone(), cap].concat()))
        });
        assert_eq!(
            engine.peg_replace_all(&peg, &twice, b"a1b23", 0, &[]).unwrap(),
            b"a11b2323"
        );

        assert_eq!(
            engine.peg_replace_all(&peg, &Expr::integer(5), b"a1b22", 0, &[]).unwrap(),
            b"a5b5"
        );
        let list = read(&mut engine, r#"(1 "x" :y 2.5)"#);
        assert_eq!(engine.peg_replace(&peg, &list, b"-7-", 0, &[]).unwrap(), b"-(1 x :y 2.5)-");
        // no entry in the map
        assert_eq!(engine.peg_replace_all(&peg, &map, b"1,333", 0, &[]).unwrap(), b"one,");

        let mut natives = GcMap::new();
        natives.insert(Expr::string("1"), twice);
        let natives = Expr::map(natives);
        let err = engine.peg_replace_all(&peg, &natives, b"a1", 0, &[]).unwrap_err();
        assert!(engine.exception_is(&err, "peg/replace/bad-subst"));
    }

    #[test]
    fn compiled_pegs_are_reused() {
        let mut engine = Engine::new();
        let grammar = read(&mut engine, r#"(capture (some "ab"))"#);
        let program = engine.peg_compile(grammar).unwrap();
        let peg = Expr::peg(program);
        let caps = engine.peg_match(&peg, b"ababc", 0, &[]).unwrap().unwrap();
        assert_eq!(caps, vec![Expr::string("abab")]);
        assert_eq!(engine.peg_match(&peg, b"c", 0, &[]).unwrap(), None);
    }
}
