use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use anyhow::{anyhow, bail, Context};
use log::LevelFilter;
use please_peg::{BstrFmt, Engine, Exception, Expr, Limits, Program, Value};

mod repl;

const HELP: &str = "\
peg: compile and run parsing expression grammars

USAGE:
  peg [-v]... [--max-depth N] <COMMAND>

COMMANDS:
  compile <grammar-file> <out-file>
  match <grammar> <input-file> [--start N] [--arg VALUE]...
  find <grammar> <input-file> [--start N] [--all]
  replace <grammar> <subst> <input-file> [--start N] [--all]
  repl <grammar>

<grammar> is grammar source, or a compiled grammar with --compiled.
-v logs what the engine is doing to stderr; -vv logs every rule it tries.
";

fn main() {
    if let Err(ono) = run() {
        eprintln!("error: {:#}", ono);
        std::process::exit(2);
    }
}

fn run() -> anyhow::Result<()> {
    let mut args = pico_args::Arguments::from_env();
    if args.contains(["-h", "--help"]) {
        print!("{}", HELP);
        return Ok(());
    }

    let mut verbosity = 0;
    while args.contains(["-v", "--verbose"]) {
        verbosity += 1;
    }
    install_logger(verbosity);

    let mut engine = Engine::new();
    if let Some(depth) = args.opt_value_from_str::<_, usize>("--max-depth")? {
        engine.set_limits(Limits {
            match_depth: depth,
            ..engine.limits()
        });
    }
    let compiled = args.contains("--compiled");
    let all = args.contains("--all");
    let start = args.opt_value_from_str("--start")?.unwrap_or(0usize);
    let extra_src: Vec<String> = args.values_from_str("--arg")?;

    let command = match args.subcommand()? {
        Some(it) => it,
        None => {
            print!("{}", HELP);
            return Ok(());
        }
    };

    match command.as_str() {
        "compile" => {
            let grammar_path: PathBuf = args.free_from_str()?;
            let out_path: PathBuf = args.free_from_str()?;
            finish(args)?;

            let grammar = read_grammar(&mut engine, &grammar_path)?;
            let program = engine
                .peg_compile(grammar)
                .map_err(|exn| explain(&engine, exn))?;
            let bytes = program
                .to_bytes(&mut engine)
                .map_err(|exn| explain(&engine, exn))?;
            fs::write(&out_path, bytes)
                .with_context(|| format!("couldn't write {}", out_path.display()))?;
        }
        "match" => {
            let peg = load_peg(&mut engine, args.free_from_str::<PathBuf>()?, compiled)?;
            let text = read_input(args.free_from_str()?)?;
            finish(args)?;

            let mut extra = Vec::new();
            for src in &extra_src {
                extra.push(read_value(&mut engine, src, "<--arg>")?);
            }
            match engine
                .peg_match(&peg, &text, start, &extra)
                .map_err(|exn| explain(&engine, exn))?
            {
                Some(caps) => println!("{}", engine.write_expr(&Engine::list_to_sexp(&caps))),
                None => {
                    println!("no match");
                    std::process::exit(1);
                }
            }
        }
        "find" => {
            let peg = load_peg(&mut engine, args.free_from_str::<PathBuf>()?, compiled)?;
            let text = read_input(args.free_from_str()?)?;
            finish(args)?;

            let found = if all {
                engine.peg_find_all(&peg, &text, start, &[])
            } else {
                engine
                    .peg_find(&peg, &text, start, &[])
                    .map(|found| found.into_iter().collect())
            }
            .map_err(|exn| explain(&engine, exn))?;
            if found.is_empty() {
                std::process::exit(1);
            }
            for at in found {
                println!("{}", at);
            }
        }
        "replace" => {
            let peg = load_peg(&mut engine, args.free_from_str::<PathBuf>()?, compiled)?;
            let subst: String = args.free_from_str()?;
            let text = read_input(args.free_from_str()?)?;
            finish(args)?;

            let subst = Expr::string(subst);
            let replaced = if all {
                engine.peg_replace_all(&peg, &subst, &text, start, &[])
            } else {
                engine.peg_replace(&peg, &subst, &text, start, &[])
            }
            .map_err(|exn| explain(&engine, exn))?;
            io::stdout().write_all(&replaced)?;
        }
        "repl" => {
            let peg = load_peg(&mut engine, args.free_from_str::<PathBuf>()?, compiled)?;
            finish(args)?;
            repl::repl(engine, peg)?;
        }
        other => bail!("unknown command {:?}, try --help", other),
    }

    Ok(())
}

fn finish(args: pico_args::Arguments) -> anyhow::Result<()> {
    let rest = args.finish();
    if !rest.is_empty() {
        bail!("didn't understand the arguments {:?}", rest);
    }
    Ok(())
}

/// Get a runnable peg, compiled from source or loaded from bytes.
fn load_peg(engine: &mut Engine, path: PathBuf, compiled: bool) -> anyhow::Result<Value> {
    let program = if compiled {
        let bytes =
            fs::read(&path).with_context(|| format!("couldn't read {}", path.display()))?;
        Program::load(engine, &bytes)
            .with_context(|| format!("couldn't load {}", path.display()))?
    } else {
        let grammar = read_grammar(engine, &path)?;
        engine
            .peg_compile(grammar)
            .map_err(|exn| explain(engine, exn))?
    };
    Ok(Expr::peg(program))
}

fn read_grammar(engine: &mut Engine, path: &Path) -> anyhow::Result<Value> {
    let source =
        fs::read_to_string(path).with_context(|| format!("couldn't read {}", path.display()))?;
    read_value(engine, &source, &path.to_string_lossy())
}

fn read_value(engine: &mut Engine, source: &str, name: &str) -> anyhow::Result<Value> {
    match engine.read_one(source, name.to_owned()) {
        Ok(it) => Ok(it),
        Err(ono) => {
            ono.report()
                .eprint(ariadne::sources(std::iter::once((name.to_owned(), source))))?;
            bail!("couldn't read {}", name)
        }
    }
}

fn read_input(path: PathBuf) -> anyhow::Result<Vec<u8>> {
    if path.as_os_str() == "-" {
        let mut text = Vec::new();
        io::Read::read_to_end(&mut io::stdin(), &mut text)?;
        Ok(text)
    } else {
        fs::read(&path).with_context(|| format!("couldn't read {}", path.display()))
    }
}

/// Exceptions hold GC pointers, so they can't go in an `anyhow::Error` as they are.
pub fn explain(engine: &Engine, exn: Exception) -> anyhow::Error {
    anyhow!("{}", describe(engine, &exn))
}

pub fn describe(engine: &Engine, exn: &Exception) -> String {
    let id = engine.get_symbol_str(exn.id).unwrap_or(b"?");
    let mut out = format!("{}: {}", BstrFmt(id), exn.info);
    if !exn.data.is_nil() {
        out.push_str(&format!(" ({})", engine.write_expr(&exn.data)));
    }
    out
}

fn install_logger(verbosity: usize) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    // RUST_LOG, when set, wins over -v
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .parse_default_env()
        .init();
}
