//! Reader for grammar text.
//!
//! Lists are written with `()` or `[]`, maps with `{}`. `'x` is shorthand for
//! `(quote x)`, which in a grammar is a capture. `;` comments run to the end of the
//! line and `;* ... *;` comments nest.

use std::{fmt, ops::Range};

use ariadne::{CharSet, Config, Label, Report, ReportKind};
use hashable::HashableHashMap;
use itertools::Itertools;
use thiserror::Error;

use crate::{Engine, Expr, GcMap, Value};

/// Grammar text that didn't read, with a report pointing at the problem.
#[derive(Error)]
#[error("{info}")]
pub struct ExprParseError {
    info: ExprParseErrorInfo,
    span: Range<usize>,
    report: Report<(String, Range<usize>)>,
}

impl ExprParseError {
    fn new(source: String, err: Spanned) -> ExprParseError {
        let Spanned { info, span } = err;
        let here = (source.clone(), span.clone());
        let label = |msg: String| Label::new(here.clone()).with_message(msg);

        let mut report = Report::build(ReportKind::Error, source.clone(), span.start)
            .with_config(Config::default().with_char_set(CharSet::Ascii))
            .with_message(info.to_string());
        report = match &info {
            ExprParseErrorInfo::BadNumber { radix, .. } => report
                .with_label(label(format!("not a base-{} number", radix)))
                .with_note("integers can start with 0x, 0o or 0b; anything else is base 10"),
            ExprParseErrorInfo::BadRadix(c) => report
                .with_label(label(format!("{:?} isn't a base", c)))
                .with_note("use 0x for hex, 0o for octal or 0b for binary"),
            ExprParseErrorInfo::StrayCloser(c) => {
                report.with_label(label(format!("this {:?} doesn't close anything", c)))
            }
            ExprParseErrorInfo::Unclosed { opener } => report
                .with_label(label(format!("this {:?} is never closed", opener)))
                .with_note(format!("add a {:?} at the end", closer_for(*opener))),
            ExprParseErrorInfo::Mismatched { opener, closer } => report
                .with_label(label(format!("expected {:?} here", closer_for(*opener))))
                .with_note(format!("the list was opened with {:?}, not {:?}", opener, closer)),
            ExprParseErrorInfo::OddMap(_) => report
                .with_label(label("one key here has no value".to_owned()))
                .with_note("maps are written {key value key value ...}"),
            ExprParseErrorInfo::UnclosedString => report
                .with_label(label("this string never ends".to_owned()))
                .with_note("a \\\" inside a string doesn't end it"),
            ExprParseErrorInfo::BadEscape(why) => report.with_label(label(why.to_string())),
            ExprParseErrorInfo::Leftover => report
                .with_label(label("expected only one value, so this is extra".to_owned()))
                .with_note("wrap everything in a list, like (sequence ...)"),
            ExprParseErrorInfo::UnclosedComment => report
                .with_label(label("this comment never ends".to_owned()))
                .with_note("block comments end with *;"),
            ExprParseErrorInfo::QuoteNothing => {
                report.with_label(label("there's nothing to quote".to_owned()))
            }
            ExprParseErrorInfo::Eof => report.with_label(label("expected a value".to_owned())),
        };

        ExprParseError {
            info,
            span,
            report: report.finish(),
        }
    }

    pub fn report(&self) -> &Report<(String, Range<usize>)> {
        &self.report
    }

    pub fn info(&self) -> &ExprParseErrorInfo {
        &self.info
    }

    /// Byte range of the problem in the source text.
    pub fn span(&self) -> Range<usize> {
        self.span.clone()
    }
}

impl fmt::Debug for ExprParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExprParseError")
            .field("info", &self.info)
            .field("span", &self.span)
            .finish()
    }
}

#[derive(Error, Debug)]
pub enum ExprParseErrorInfo {
    #[error("{text:?} isn't a number")]
    BadNumber { text: String, radix: u32 },
    #[error("unknown integer base {0:?}")]
    BadRadix(char),
    #[error("unexpected {0:?}")]
    StrayCloser(char),
    #[error("unclosed {opener:?}")]
    Unclosed { opener: char },
    #[error("{closer:?} can't close {opener:?}")]
    Mismatched { opener: char, closer: char },
    #[error("map literal has an odd number of items ({0})")]
    OddMap(usize),
    #[error("unclosed string")]
    UnclosedString,
    #[error("bad escape: {0}")]
    BadEscape(BadEscape),
    #[error("extra text after the value")]
    Leftover,
    #[error("unclosed block comment")]
    UnclosedComment,
    #[error("quote with nothing after it")]
    QuoteNothing,
    #[error("no value to read")]
    Eof,
}

#[derive(Debug, Error)]
pub enum BadEscape {
    #[error("{0:?} can't be escaped")]
    Char(char),
    #[error("\\x needs two hex digits")]
    Hex,
    #[error("the text ends in the middle of an escape")]
    Eof,
}

struct Spanned {
    info: ExprParseErrorInfo,
    span: Range<usize>,
}

type Read<T> = Result<T, Spanned>;

/// Read every value in `src`.
pub fn read_many(src: &str, source: String, engine: &mut Engine) -> Result<Vec<Value>, ExprParseError> {
    Reader::new(src, engine)
        .all()
        .map_err(|err| ExprParseError::new(source, err))
}

/// Read a single value. Anything but comments after it is an error.
pub fn read_one(src: &str, source: String, engine: &mut Engine) -> Result<Value, ExprParseError> {
    Reader::new(src, engine)
        .only()
        .map_err(|err| ExprParseError::new(source, err))
}

struct Reader<'s, 'e> {
    src: &'s str,
    pos: usize,
    engine: &'e mut Engine,
}

impl<'s, 'e> Reader<'s, 'e> {
    fn new(src: &'s str, engine: &'e mut Engine) -> Self {
        Reader { src, pos: 0, engine }
    }

    fn rest(&self) -> &'s str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn fail<T>(&self, info: ExprParseErrorInfo, span: Range<usize>) -> Read<T> {
        Err(Spanned { info, span })
    }

    fn all(&mut self) -> Read<Vec<Value>> {
        let mut out = Vec::new();
        loop {
            match self.datum()? {
                Some(datum) => out.push(datum),
                None => match self.peek() {
                    None => return Ok(out),
                    Some(c) => return self.stray(c),
                },
            }
        }
    }

    fn only(&mut self) -> Read<Value> {
        let datum = match self.datum()? {
            Some(datum) => datum,
            None => {
                return match self.peek() {
                    None => self.fail(ExprParseErrorInfo::Eof, 0..self.src.len()),
                    Some(c) => self.stray(c),
                }
            }
        };
        self.skip_trivia()?;
        if self.pos < self.src.len() {
            return self.fail(ExprParseErrorInfo::Leftover, self.pos..self.src.len());
        }
        Ok(datum)
    }

    fn stray<T>(&self, c: char) -> Read<T> {
        self.fail(
            ExprParseErrorInfo::StrayCloser(c),
            self.pos..self.pos + c.len_utf8(),
        )
    }

    /// Whitespace and comments.
    fn skip_trivia(&mut self) -> Read<()> {
        loop {
            let trimmed = self.rest().trim_start();
            self.pos = self.src.len() - trimmed.len();

            if trimmed.starts_with(";*") {
                let start = self.pos;
                let mut depth = 0usize;
                loop {
                    let rest = self.rest();
                    if rest.starts_with(";*") {
                        depth += 1;
                        self.pos += 2;
                    } else if rest.starts_with("*;") {
                        depth -= 1;
                        self.pos += 2;
                        if depth == 0 {
                            break;
                        }
                    } else if let Some(c) = rest.chars().next() {
                        self.pos += c.len_utf8();
                    } else {
                        return self.fail(ExprParseErrorInfo::UnclosedComment, start..start + 2);
                    }
                }
            } else if trimmed.starts_with(';') {
                self.pos += trimmed.find('\n').unwrap_or(trimmed.len());
            } else {
                return Ok(());
            }
        }
    }

    /// The next value, or `None` at the end of the text or before a closer.
    fn datum(&mut self) -> Read<Option<Value>> {
        self.skip_trivia()?;
        let c = match self.peek() {
            Some(c) if !is_closer(c) => c,
            _ => return Ok(None),
        };
        let value = match c {
            '\'' => self.quote()?,
            '"' => Expr::string(self.string()?),
            '(' | '[' | '{' => self.list(c)?,
            _ => self.atom()?,
        };
        Ok(Some(value))
    }

    fn quote(&mut self) -> Read<Value> {
        let start = self.pos;
        self.pos += 1;
        let quoted = match self.datum()? {
            Some(quoted) => quoted,
            None => return self.fail(ExprParseErrorInfo::QuoteNothing, start..start + 1),
        };
        let quote = self.engine.intern_symbol("quote");
        Ok(Engine::list_to_sexp(&[Expr::symbol(quote), quoted]))
    }

    fn list(&mut self, opener: char) -> Read<Value> {
        let start = self.pos;
        let closer = closer_for(opener);
        self.pos += 1;

        let mut items = Vec::new();
        loop {
            if let Some(item) = self.datum()? {
                items.push(item);
                continue;
            }
            match self.peek() {
                Some(c) if c == closer => {
                    self.pos += 1;
                    break;
                }
                Some(c) => {
                    return self.fail(
                        ExprParseErrorInfo::Mismatched { opener, closer: c },
                        self.pos..self.pos + 1,
                    )
                }
                None => return self.fail(ExprParseErrorInfo::Unclosed { opener }, start..start + 1),
            }
        }

        if opener != '{' {
            return Ok(Engine::list_to_sexp(&items));
        }
        if items.len() % 2 != 0 {
            return self.fail(ExprParseErrorInfo::OddMap(items.len()), start..self.pos);
        }
        let mut map = HashableHashMap::new();
        for (key, value) in items.into_iter().tuples() {
            map.insert(key, value);
        }
        Ok(Expr::map(GcMap::from(map)))
    }

    fn string(&mut self) -> Read<Vec<u8>> {
        let start = self.pos;
        self.pos += 1;

        let mut out = Vec::new();
        loop {
            let rest = self.rest();
            let stop = match rest.find(|c| c == '"' || c == '\\') {
                Some(stop) => stop,
                None => {
                    let line_end = self.src[start..]
                        .find(&['\n', '\r'][..])
                        .map_or(self.src.len(), |nl| start + nl);
                    return self.fail(ExprParseErrorInfo::UnclosedString, start..line_end);
                }
            };
            out.extend_from_slice(rest[..stop].as_bytes());
            self.pos += stop + 1;
            if rest[stop..].starts_with('"') {
                return Ok(out);
            }

            let backslash = self.pos - 1;
            match self.escape() {
                Ok(byte) => out.push(byte),
                Err(why) => {
                    let end = (self.pos + 1).min(self.src.len());
                    return self.fail(ExprParseErrorInfo::BadEscape(why), backslash..end);
                }
            }
        }
    }

    /// The byte an escape stands for. The backslash is already gone.
    fn escape(&mut self) -> Result<u8, BadEscape> {
        let c = self.peek().ok_or(BadEscape::Eof)?;
        self.pos += c.len_utf8();
        Ok(match c {
            '\\' | '"' | '\'' => c as u8,
            'n' => b'\n',
            't' => b'\t',
            'r' => b'\r',
            '0' => 0,
            'f' => 0x0c,
            'v' => 0x0b,
            'x' => {
                let hex = self.rest().get(..2).ok_or(BadEscape::Hex)?;
                if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    return Err(BadEscape::Hex);
                }
                self.pos += 2;
                u8::from_str_radix(hex, 16).map_err(|_| BadEscape::Hex)?
            }
            _ => return Err(BadEscape::Char(c)),
        })
    }

    /// Numbers, symbols, `true`, `false` and `nil`.
    fn atom(&mut self) -> Read<Value> {
        let start = self.pos;
        let rest = self.rest();
        let token = &rest[..rest.find(is_delim).unwrap_or(rest.len())];
        self.pos += token.len();

        Ok(match token {
            "true" => Expr::bool(true),
            "false" => Expr::bool(false),
            "nil" => Expr::nil(),
            _ if looks_numeric(token) => self.number(token, start)?,
            _ => Expr::symbol(self.engine.intern_symbol(token)),
        })
    }

    fn number(&self, token: &str, start: usize) -> Read<Value> {
        let unsigned = token.strip_prefix(&['+', '-'][..]).unwrap_or(token);
        let sign_len = token.len() - unsigned.len();

        if let [b'0', base, ..] = unsigned.as_bytes() {
            if base.is_ascii_alphabetic() {
                let radix = match base {
                    b'x' => 16,
                    b'o' => 8,
                    b'b' => 2,
                    _ => {
                        let at = start + sign_len + 1;
                        return self.fail(ExprParseErrorInfo::BadRadix(*base as char), at..at + 1);
                    }
                };
                let digits = format!("{}{}", &token[..sign_len], &unsigned[2..]);
                return match i64::from_str_radix(&digits, radix) {
                    Ok(i) => Ok(Expr::integer(i)),
                    Err(_) => self.bad_number(token, radix, start),
                };
            }
        }

        if let Ok(i) = token.parse::<i64>() {
            Ok(Expr::integer(i))
        } else if let Ok(f) = token.parse::<f64>() {
            Ok(Expr::float(f))
        } else {
            self.bad_number(token, 10, start)
        }
    }

    fn bad_number<T>(&self, token: &str, radix: u32, start: usize) -> Read<T> {
        self.fail(
            ExprParseErrorInfo::BadNumber {
                text: token.to_owned(),
                radix,
            },
            start..start + token.len(),
        )
    }
}

/// Whether a symbol with this name, written out as is, reads back as itself.
pub(crate) fn symbol_reads_back(name: &[u8]) -> bool {
    let name = match std::str::from_utf8(name) {
        Ok(name) => name,
        Err(_) => return false,
    };
    !name.is_empty()
        && !name.starts_with('\'')
        && !name.contains(is_delim)
        && !looks_numeric(name)
        && !matches!(name, "true" | "false" | "nil")
}

/// A digit, or a sign or `.` followed by one.
fn looks_numeric(token: &str) -> bool {
    let unsigned = token.strip_prefix(&['+', '-'][..]).unwrap_or(token);
    let unsigned = unsigned.strip_prefix('.').unwrap_or(unsigned);
    unsigned.starts_with(|c: char| c.is_ascii_digit())
}

fn is_delim(c: char) -> bool {
    matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '"' | ';') || c.is_whitespace()
}

fn is_closer(c: char) -> bool {
    matches!(c, ')' | ']' | '}')
}

fn closer_for(opener: char) -> char {
    match opener {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}
