use please_peg::{Engine, Value};
use termwiz::lineedit::{line_editor_terminal, LineEditor, LineEditorHost, NopLineEditorHost};

use crate::describe;

/// Match every line typed in against the grammar, and print the captures.
pub fn repl(mut engine: Engine, peg: Value) -> termwiz::Result<()> {
    let mut terminal = line_editor_terminal()?;
    let mut editor = LineEditor::new(&mut terminal);
    let mut host = NopLineEditorHost::default();
    editor.set_prompt("peg> ");

    while let Some(line) = editor.read_line(&mut host)? {
        host.history().add(&line);

        match engine.peg_match(&peg, line.as_bytes(), 0, &[]) {
            Ok(Some(caps)) => println!("{}", engine.write_expr(&Engine::list_to_sexp(&caps))),
            Ok(None) => println!("no match"),
            Err(exn) => println!("{}", describe(&engine, &exn)),
        }
    }

    Ok(())
}
