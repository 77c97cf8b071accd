//! Runs every `.peg` file under `tests/suite`.
//!
//! A file is a list of forms. `(peg GRAMMAR)` compiles a grammar, and the cases after
//! it run against it until the next `(peg ...)`:
//!
//! - `(ok INPUT (CAPTURES...))`: matches at 0 with exactly these captures
//! - `(ok-at INPUT START (CAPTURES...))`: same, starting at `START`
//! - `(no INPUT)`: doesn't match
//! - `(err INPUT ?ID)`: raises, with the exception `ID` if given
//!
//! `(bad-peg GRAMMAR ID)` checks that a grammar doesn't compile.
//!
//! Every grammar is also saved and loaded again, and the cases run against both.

use std::{ffi::OsString, fs, path::PathBuf};

use please_peg::{BstrFmt, Engine, Expr, Program, Value};

#[test]
fn suite() {
    let root = concat!(env!("CARGO_MANIFEST_DIR"), "/tests/suite");

    let mut paths = Vec::new();
    let mut todo = vec![PathBuf::from(root)];
    while let Some(path) = todo.pop() {
        if path.is_dir() {
            for entry in fs::read_dir(path).unwrap() {
                todo.push(entry.unwrap().path());
            }
        } else if path.extension() == Some(&OsString::from("peg")) {
            paths.push(path);
        }
    }
    paths.sort_unstable();
    assert!(!paths.is_empty(), "no suite files in {}", root);

    for path in paths {
        let name = path.to_string_lossy().into_owned();
        let source = fs::read_to_string(&path).unwrap();
        // fresh engine per file so tags and symbols can't leak between them
        let mut engine = Engine::new();
        let forms = match engine.read_many(&source, name.clone()) {
            Ok(forms) => forms,
            Err(e) => {
                e.report()
                    .eprint(ariadne::sources(std::iter::once((name.clone(), source))))
                    .unwrap();
                panic!("couldn't read {}", name);
            }
        };
        let mut file = SuiteFile {
            name: &name,
            engine: &mut engine,
            grammar: None,
        };
        for form in forms {
            file.run_form(form);
        }
    }
}

struct Grammar {
    written: String,
    compiled: Program,
    loaded: Program,
}

struct SuiteFile<'a> {
    name: &'a str,
    engine: &'a mut Engine,
    grammar: Option<Grammar>,
}

impl SuiteFile<'_> {
    fn run_form(&mut self, form: Value) {
        let written = self.engine.write_expr(&form);
        let items = self
            .engine
            .sexp_to_list(form)
            .unwrap_or_else(|| panic!("{}: {} isn't a list", self.name, written));
        let (head, args) = match items.split_first() {
            Some((head, args)) => match &**head {
                Expr::Symbol(sym) => (self.engine.get_symbol_str(*sym).unwrap().to_vec(), args),
                _ => panic!("{}: {} needs a symbol first", self.name, written),
            },
            None => panic!("{}: empty form", self.name),
        };

        match (head.as_slice(), args) {
            (b"peg", [grammar]) => self.load_grammar(grammar.clone()),
            (b"bad-peg", [grammar, id]) => {
                let id = self.engine.write_expr(id);
                match self.engine.peg_compile(grammar.clone()) {
                    Ok(_) => panic!("{}: {} compiled, but shouldn't have", self.name, written),
                    Err(exn) => assert!(
                        self.engine.exception_is(&exn, &id),
                        "{}: {} failed with {}, not {}",
                        self.name,
                        written,
                        BstrFmt(self.engine.get_symbol_str(exn.id).unwrap()),
                        id
                    ),
                }
            }
            (b"ok", [input, caps]) => self.expect_match(&written, input, 0, Some(caps)),
            (b"ok-at", [input, start, caps]) => {
                let start = match **start {
                    Expr::Integer(start) if start >= 0 => start as usize,
                    _ => panic!("{}: bad start in {}", self.name, written),
                };
                self.expect_match(&written, input, start, Some(caps))
            }
            (b"no", [input]) => self.expect_match(&written, input, 0, None),
            (b"err", [input]) => self.expect_err(&written, input, None),
            (b"err", [input, id]) => {
                let id = self.engine.write_expr(id);
                self.expect_err(&written, input, Some(id))
            }
            _ => panic!("{}: don't know what to do with {}", self.name, written),
        }
    }

    fn load_grammar(&mut self, grammar: Value) {
        let written = self.engine.write_expr(&grammar);
        let compiled = match self.engine.peg_compile(grammar) {
            Ok(it) => it,
            Err(exn) => panic!("{}: {} didn't compile: {}", self.name, written, exn.info),
        };
        let bytes = match compiled.to_bytes(self.engine) {
            Ok(it) => it,
            Err(exn) => panic!("{}: {} didn't save: {}", self.name, written, exn.info),
        };
        let loaded = Program::load(self.engine, &bytes)
            .unwrap_or_else(|_| panic!("{}: {} didn't load back", self.name, written));
        assert_eq!(compiled.bytecode(), loaded.bytecode());
        self.grammar = Some(Grammar {
            written,
            compiled,
            loaded,
        });
    }

    fn expect_match(&mut self, case: &str, input: &Value, start: usize, caps: Option<&Value>) {
        let text = input_bytes(self.name, input);
        let grammar = match &self.grammar {
            Some(g) => g,
            None => panic!("{}: {} comes before any (peg ...)", self.name, case),
        };
        for program in [&grammar.compiled, &grammar.loaded].iter() {
            let result = program
                .match_at(self.engine, &text, start, &[])
                .unwrap_or_else(|exn| {
                    panic!("{}: {} raised on {}: {}", self.name, grammar.written, case, exn.info)
                });
            match (result, caps) {
                (Some(m), Some(caps)) => {
                    let got = Engine::list_to_sexp(&m.captures);
                    assert!(
                        &got == caps,
                        "{}: {} on {}: captured {}",
                        self.name,
                        grammar.written,
                        case,
                        self.engine.write_expr(&got)
                    );
                }
                (None, None) => {}
                (Some(m), None) => panic!(
                    "{}: {} on {}: matched up to {}, but shouldn't have",
                    self.name, grammar.written, case, m.end
                ),
                (None, Some(_)) => panic!(
                    "{}: {} on {}: didn't match",
                    self.name, grammar.written, case
                ),
            }
        }
    }

    fn expect_err(&mut self, case: &str, input: &Value, id: Option<String>) {
        let text = input_bytes(self.name, input);
        let grammar = match &self.grammar {
            Some(g) => g,
            None => panic!("{}: {} comes before any (peg ...)", self.name, case),
        };
        for program in [&grammar.compiled, &grammar.loaded].iter() {
            let exn = match program.match_at(self.engine, &text, 0, &[]) {
                Ok(_) => panic!("{}: {} on {}: didn't raise", self.name, grammar.written, case),
                Err(exn) => exn,
            };
            if let Some(id) = &id {
                assert!(
                    self.engine.exception_is(&exn, id),
                    "{}: {} on {}: raised {}",
                    self.name,
                    grammar.written,
                    case,
                    BstrFmt(self.engine.get_symbol_str(exn.id).unwrap())
                );
            }
        }
    }
}

fn input_bytes(file: &str, input: &Value) -> Vec<u8> {
    match &**input {
        Expr::String(s) => s.clone(),
        _ => panic!("{}: inputs have to be strings", file),
    }
}
