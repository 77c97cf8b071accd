//! Turning values back into text.

use std::fmt::{self, Debug, Display, Write};

use itertools::Itertools;

use super::*;

impl Engine {
    /// Text that reads back as an equal value. Natives and pegs come out as
    /// `<...>` placeholders, which don't read back.
    pub fn write_expr(&self, expr: &Expr) -> String {
        let mut out = String::new();
        // a String sink never errors
        let _ = self.write_into(&mut out, expr, true);
        out
    }

    /// Like [`Engine::write_expr`], but strings aren't quoted or escaped.
    pub fn print_expr(&self, expr: &Expr) -> String {
        let mut out = String::new();
        let _ = self.write_into(&mut out, expr, false);
        out
    }

    fn write_into(&self, w: &mut impl Write, expr: &Expr, readable: bool) -> fmt::Result {
        match expr {
            Expr::Integer(i) => write!(w, "{}", i),
            // {:?} keeps the `.0` so it reads back as a float
            Expr::Float(f) => write!(w, "{:?}", f),
            Expr::String(s) if readable => write!(w, "{:?}", BstrFmt(s)),
            Expr::String(s) => write!(w, "{}", BstrFmt(s)),
            Expr::Bool(b) => write!(w, "{}", b),
            Expr::Nil => w.write_str("nil"),
            Expr::Symbol(sym) => match self.get_symbol_str(*sym) {
                Some(name) => match std::str::from_utf8(name) {
                    Ok(name) => w.write_str(name),
                    Err(_) => write!(w, "{}", BstrFmt(name)),
                },
                None => write!(w, "<symbol #{}>", sym),
            },
            Expr::Pair(car, cdr) => {
                w.write_char('(')?;
                self.write_into(w, car, readable)?;
                let mut rest = cdr.clone();
                while let Expr::Pair(item, next) = &*rest {
                    w.write_char(' ')?;
                    self.write_into(w, item, readable)?;
                    let next = next.clone();
                    rest = next;
                }
                if !rest.is_nil() {
                    w.write_str(" . ")?;
                    self.write_into(w, &rest, readable)?;
                }
                w.write_char(')')
            }
            Expr::Map(m) => {
                // entries are sorted so a map always writes the same way
                let entries = m
                    .iter()
                    .map(|(k, v)| {
                        let mut entry = String::new();
                        let _ = self.write_into(&mut entry, k, readable);
                        entry.push(' ');
                        let _ = self.write_into(&mut entry, v, readable);
                        entry
                    })
                    .sorted()
                    .join(" ");
                write!(w, "{{{}}}", entries)
            }
            Expr::Native { name, .. } => match self.get_symbol_str(*name) {
                Some(name) => write!(w, "<native {}>", BstrFmt(name)),
                None => w.write_str("<native>"),
            },
            Expr::Peg(program) => write!(w, "<peg {} words>", program.bytecode().len()),
        }
    }
}

/// Shows bytes that may not be UTF-8.
///
/// `{}` passes printable ASCII, newlines and tabs through and hex-escapes the rest.
/// `{:?}` writes a quoted string literal the reader turns back into the same bytes.
pub struct BstrFmt<B: AsRef<[u8]>>(pub B);

fn is_plain(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

impl<B: AsRef<[u8]>> Display for BstrFmt<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in self.0.as_ref() {
            if is_plain(b) || b == b'\n' || b == b'\t' {
                f.write_char(b as char)?;
            } else {
                write!(f, "\\x{:02X}", b)?;
            }
        }
        Ok(())
    }
}

impl<B: AsRef<[u8]>> Debug for BstrFmt<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('"')?;
        for &b in self.0.as_ref() {
            let escaped = match b {
                b'"' => "\\\"",
                b'\\' => "\\\\",
                b'\n' => "\\n",
                b'\t' => "\\t",
                b'\r' => "\\r",
                0 => "\\0",
                0x0b => "\\v",
                0x0c => "\\f",
                _ if is_plain(b) => {
                    f.write_char(b as char)?;
                    continue;
                }
                _ => {
                    write!(f, "\\x{:02X}", b)?;
                    continue;
                }
            };
            f.write_str(escaped)?;
        }
        f.write_char('"')
    }
}
