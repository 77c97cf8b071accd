//! The matcher.
//!
//! Each rule either returns where it stopped matching, or `None` if it didn't match.
//! A rule that fails may leave junk captures behind; whoever tried it is responsible
//! for snapshotting with [`CapState`] beforehand and rolling back.

use std::convert::TryFrom;

use log::trace;

use super::{
    LineIndex, Opcode, Program, READINT_BIG_ENDIAN, READINT_SIGNED, READINT_WIDTH_MASK,
};
use crate::{Engine, EvalResult, Exception, Expr, Value};

/// A successful match.
#[derive(Debug, Clone)]
pub struct Match {
    /// Byte offset the match ended at.
    pub end: usize,
    pub captures: Vec<Value>,
}

/// Match `program` against `text`, starting at byte `start`.
///
/// `extra` are the values `(argument n)` refers to.
pub fn match_(
    engine: &mut Engine,
    program: &Program,
    text: &[u8],
    start: usize,
    extra: &[Value],
) -> Result<Option<Match>, Exception> {
    check_start(engine, text, start)?;
    let mut state = PegState::new(engine, program, text, extra);
    Ok(state.run(start)?.map(|end| Match {
        end,
        captures: state.take_captures(),
    }))
}

pub(crate) fn check_start(engine: &mut Engine, text: &[u8], start: usize) -> Result<(), Exception> {
    if start > text.len() {
        return Err(engine.make_err(
            "peg/start-out-of-range",
            format!("start {} is past the end of a text of length {}", start, text.len()),
            Some(Expr::integer(start as i64)),
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    /// Captures get glued onto `scratch` instead of pushed.
    Accumulate,
}

/// How many captures, tagged captures and scratch bytes there were at some point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CapState {
    cap: usize,
    tcap: usize,
    scratch: usize,
}

pub(crate) struct PegState<'a> {
    text: &'a [u8],
    /// Nothing at or after here can be matched. Moved in by `sub` and `split`.
    text_end: usize,
    bytecode: &'a [u32],
    constants: &'a [Value],
    has_backref: bool,
    extra: &'a [Value],

    captures: Vec<Value>,
    /// Every capture ever pushed, when the program needs them for backrefs.
    tagged_captures: Vec<Value>,
    /// Tag of each entry in `tagged_captures`.
    tags: Vec<u8>,
    scratch: Vec<u8>,
    line_index: Option<LineIndex>,

    depth: usize,
    max_depth: usize,
    mode: Mode,

    engine: &'a mut Engine,
}

impl<'a> PegState<'a> {
    pub(crate) fn new(
        engine: &'a mut Engine,
        program: &'a Program,
        text: &'a [u8],
        extra: &'a [Value],
    ) -> PegState<'a> {
        let max_depth = engine.limits().match_depth;
        PegState {
            text,
            text_end: text.len(),
            bytecode: program.bytecode(),
            constants: program.constants(),
            has_backref: program.has_backref(),
            extra,
            captures: Vec::new(),
            tagged_captures: Vec::new(),
            tags: Vec::new(),
            scratch: Vec::new(),
            line_index: None,
            depth: max_depth,
            max_depth,
            mode: Mode::Normal,
            engine,
        }
    }

    /// Try matching at `start`, forgetting whatever the last attempt captured.
    ///
    /// The line index survives, since the text is the same.
    pub(crate) fn run(&mut self, start: usize) -> Result<Option<usize>, Exception> {
        self.captures.clear();
        self.tagged_captures.clear();
        self.tags.clear();
        self.scratch.clear();
        self.text_end = self.text.len();
        self.depth = self.max_depth;
        self.mode = Mode::Normal;
        self.recur(0, start)
    }

    pub(crate) fn take_captures(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.captures)
    }

    pub(crate) fn engine(&mut self) -> &mut Engine {
        &mut *self.engine
    }

    fn recur(&mut self, rule: usize, pos: usize) -> Result<Option<usize>, Exception> {
        if self.depth == 0 {
            return Err(self.engine.make_err(
                "peg/match/recursion",
                "peg/match recursed too deeply",
                None,
            ));
        }
        self.depth -= 1;
        let result = self.execute_rule(rule, pos);
        self.depth += 1;
        result
    }

    fn execute_rule(&mut self, rule: usize, pos: usize) -> Result<Option<usize>, Exception> {
        let code = self.bytecode;
        let text = self.text;
        let opc = Opcode::try_from(code[rule]).map_err(|ono| {
            self.engine.make_err(
                "peg/match/bad-opcode",
                format!("{:#x} is not an opcode", ono.number),
                Some(Expr::integer(ono.number as i64)),
            )
        })?;
        let arg = |n: usize| code[rule + 1 + n];
        let rule_arg = |n: usize| code[rule + 1 + n] as usize;

        trace!("{:?} at word {}, text offset {}", opc, rule, pos);

        Ok(match opc {
            Opcode::Literal => {
                let len = arg(0) as usize;
                let end = pos + len;
                if end > self.text_end {
                    return Ok(None);
                }
                let packed = &code[rule + 2..];
                let same = text[pos..end]
                    .iter()
                    .enumerate()
                    .all(|(i, &b)| b == (packed[i / 4] >> (8 * (i % 4))) as u8);
                if same {
                    Some(end)
                } else {
                    None
                }
            }
            Opcode::NChar => {
                let n = arg(0) as usize;
                if self.text_end.saturating_sub(pos) >= n {
                    Some(pos + n)
                } else {
                    None
                }
            }
            Opcode::NotNChar => {
                let n = arg(0) as usize;
                if self.text_end.saturating_sub(pos) < n {
                    Some(pos)
                } else {
                    None
                }
            }
            Opcode::Range => {
                let (lo, hi) = ((arg(0) & 0xffff) as u8, (arg(0) >> 16) as u8);
                match self.byte_at(pos) {
                    Some(b) if (lo..=hi).contains(&b) => Some(pos + 1),
                    _ => None,
                }
            }
            Opcode::Set => match self.byte_at(pos) {
                Some(b) if arg((b >> 5) as usize) & (1 << (b & 31)) != 0 => Some(pos + 1),
                _ => None,
            },

            Opcode::Look => {
                let target = pos as i64 + i64::from(arg(0) as i32);
                if target < 0 || target as usize > self.text_end {
                    return Ok(None);
                }
                let old = self.set_mode(Mode::Normal);
                let matched = self.recur(rule_arg(1), target as usize)?;
                self.mode = old;
                matched.map(|_| pos)
            }
            Opcode::Choice => {
                let cs = self.save();
                for i in 0..arg(0) as usize {
                    if let Some(end) = self.recur(rule_arg(1 + i), pos)? {
                        return Ok(Some(end));
                    }
                    self.restore(cs);
                }
                None
            }
            Opcode::Sequence => {
                let mut cursor = pos;
                for i in 0..arg(0) as usize {
                    match self.recur(rule_arg(1 + i), cursor)? {
                        Some(end) => cursor = end,
                        None => return Ok(None),
                    }
                }
                Some(cursor)
            }
            Opcode::If | Opcode::IfNot => {
                let cs = self.save();
                let old = self.set_mode(Mode::Normal);
                let probe = self.recur(rule_arg(0), pos)?;
                self.mode = old;
                self.restore(cs);
                if probe.is_some() == (opc == Opcode::If) {
                    self.recur(rule_arg(1), pos)?
                } else {
                    None
                }
            }
            Opcode::Not => {
                let cs = self.save();
                let old = self.set_mode(Mode::Normal);
                let probe = self.recur(rule_arg(0), pos)?;
                self.mode = old;
                self.restore(cs);
                match probe {
                    Some(_) => None,
                    None => Some(pos),
                }
            }
            Opcode::Between => {
                let (lo, hi, sub) = (arg(0), arg(1), rule_arg(2));
                let cs = self.save();
                let mut count = 0;
                let mut cursor = pos;
                while count < hi {
                    let attempt = self.save();
                    match self.recur(sub, cursor)? {
                        // a zero-width match would go around forever
                        Some(end) if end != cursor => {
                            count += 1;
                            cursor = end;
                        }
                        _ => {
                            self.restore(attempt);
                            break;
                        }
                    }
                }
                if count < lo {
                    self.restore(cs);
                    None
                } else {
                    Some(cursor)
                }
            }

            Opcode::GetTag => {
                let (search, tag) = (arg(0) as u8, arg(1));
                match self.tags.iter().rposition(|&t| t == search) {
                    Some(idx) => {
                        let cap = self.tagged_captures[idx].clone();
                        self.push_capture(cap, tag);
                        Some(pos)
                    }
                    None => None,
                }
            }
            Opcode::Capture => {
                let end = match self.recur(rule_arg(0), pos)? {
                    Some(end) => end,
                    None => return Ok(None),
                };
                if !self.has_backref && self.mode == Mode::Accumulate {
                    self.scratch.extend_from_slice(&text[pos..end]);
                } else {
                    self.push_capture(Expr::string(&text[pos..end]), arg(1));
                }
                Some(end)
            }
            Opcode::CaptureNumber => {
                let end = match self.recur(rule_arg(0), pos)? {
                    Some(end) => end,
                    None => return Ok(None),
                };
                match parse_number(&text[pos..end], arg(1)) {
                    Some(num) => {
                        self.push_capture(num, arg(2));
                        Some(end)
                    }
                    None => None,
                }
            }
            Opcode::Position => {
                self.push_capture(Expr::integer(pos as i64), arg(0));
                Some(pos)
            }
            Opcode::Line | Opcode::Column => {
                let (line, col) = self.line_col(pos);
                let which = if opc == Opcode::Line { line } else { col };
                self.push_capture(Expr::integer(which as i64), arg(0));
                Some(pos)
            }
            Opcode::Argument => {
                let value = self.extra.get(arg(0) as usize).cloned().unwrap_or_else(Expr::nil);
                self.push_capture(value, arg(1));
                Some(pos)
            }
            Opcode::Constant => {
                let value = self.constants[arg(0) as usize].clone();
                self.push_capture(value, arg(1));
                Some(pos)
            }
            Opcode::Accumulate => {
                let tag = arg(1);
                if tag == 0 && self.mode == Mode::Accumulate {
                    return self.recur(rule_arg(0), pos);
                }
                let cs = self.save();
                let old = self.set_mode(Mode::Accumulate);
                let matched = self.recur(rule_arg(0), pos)?;
                self.mode = old;
                let end = match matched {
                    Some(end) => end,
                    None => return Ok(None),
                };
                let glued = Expr::string(&self.scratch[cs.scratch..]);
                self.restore_keep_tags(cs);
                self.push_capture(glued, tag);
                Some(end)
            }
            Opcode::Group => {
                let cs = self.save();
                let old = self.set_mode(Mode::Normal);
                let matched = self.recur(rule_arg(0), pos)?;
                self.mode = old;
                let end = match matched {
                    Some(end) => end,
                    None => return Ok(None),
                };
                let sub = self.captures.split_off(cs.cap);
                self.restore_keep_tags(cs);
                self.push_capture(Engine::list_to_sexp(&sub), arg(1));
                Some(end)
            }
            Opcode::Replace | Opcode::MatchTime => {
                let cs = self.save();
                let old = self.set_mode(Mode::Normal);
                let matched = self.recur(rule_arg(0), pos)?;
                self.mode = old;
                let end = match matched {
                    Some(end) => end,
                    None => return Ok(None),
                };
                let sub = self.captures.split_off(cs.cap);
                self.restore_keep_tags(cs);
                let constant = self.constants[arg(1) as usize].clone();
                let result = self.transform(&constant, &sub)?;
                if opc == Opcode::MatchTime && !self.engine.is_truthy(&result) {
                    return Ok(None);
                }
                self.push_capture(result, arg(2));
                Some(end)
            }
            Opcode::Error => {
                let before = self.captures.len();
                let old = self.set_mode(Mode::Normal);
                let matched = self.recur(rule_arg(0), pos)?;
                self.mode = old;
                if matched.is_none() {
                    return Ok(None);
                }
                return Err(if self.captures.len() > before {
                    let cap = self.captures[self.captures.len() - 1].clone();
                    let msg = self.engine.print_expr(&cap);
                    self.engine.make_err("peg/match/error", msg, Some(cap))
                } else {
                    let (line, col) = self.line_col(pos);
                    self.engine.make_err(
                        "peg/match/error",
                        format!("match error at line {}, column {}", line, col),
                        None,
                    )
                });
            }
            Opcode::Drop | Opcode::OnlyTags => {
                let cs = self.save();
                let end = match self.recur(rule_arg(0), pos)? {
                    Some(end) => end,
                    None => return Ok(None),
                };
                if opc == Opcode::Drop {
                    self.restore(cs);
                } else {
                    self.restore_keep_tags(cs);
                }
                Some(end)
            }
            Opcode::Backmatch => {
                let search = arg(0) as u8;
                let idx = match self.tags.iter().rposition(|&t| t == search) {
                    Some(idx) => idx,
                    None => return Ok(None),
                };
                let cap = self.tagged_captures[idx].clone();
                let want = match self.engine.bytes_view(&cap) {
                    Some(want) => want,
                    None => return Ok(None),
                };
                let end = pos + want.len();
                if end <= self.text_end && &text[pos..end] == want {
                    Some(end)
                } else {
                    None
                }
            }
            Opcode::To | Opcode::Thru => {
                let cs = self.save();
                let mut cursor = pos;
                while cursor <= self.text_end {
                    let attempt = self.save();
                    if let Some(end) = self.recur(rule_arg(0), cursor)? {
                        if opc == Opcode::To {
                            self.restore(attempt);
                            return Ok(Some(cursor));
                        }
                        return Ok(Some(end));
                    }
                    self.restore(attempt);
                    cursor += 1;
                }
                self.restore(cs);
                None
            }
            Opcode::LenPrefix => {
                let cs = self.save();
                let old = self.set_mode(Mode::Normal);
                let matched = self.recur(rule_arg(0), pos)?;
                self.mode = old;
                let mut cursor = match matched {
                    Some(end) => end,
                    None => {
                        self.restore(cs);
                        return Ok(None);
                    }
                };
                let count = match self.captures.get(cs.cap).map(|c| &**c) {
                    Some(&Expr::Integer(n)) if (0..=i32::MAX as i64).contains(&n) => n as usize,
                    _ => {
                        self.restore(cs);
                        return Ok(None);
                    }
                };
                // the length itself isn't a capture
                self.restore(cs);
                let mut left = count;
                while left > 0 {
                    let before = self.save();
                    let end = match self.recur(rule_arg(1), cursor)? {
                        Some(end) => end,
                        None => {
                            self.restore(cs);
                            return Ok(None);
                        }
                    };
                    left -= 1;
                    if end == cursor {
                        // nothing moved or captured, so every pass left would do the same
                        if self.save() == before {
                            break;
                        }
                        if left > self.text_end.saturating_sub(cursor) {
                            trace!("lenprefix wants {} more empty passes at {}", left, cursor);
                            self.restore(cs);
                            return Ok(None);
                        }
                    }
                    cursor = end;
                }
                Some(cursor)
            }
            Opcode::ReadInt => {
                let flags = arg(0);
                let width = (flags & READINT_WIDTH_MASK) as usize;
                let end = pos + width;
                if end > self.text_end {
                    return Ok(None);
                }
                let bytes = &text[pos..end];
                let accum = if flags & READINT_BIG_ENDIAN != 0 {
                    bytes.iter().fold(0u64, |acc, &b| acc << 8 | u64::from(b))
                } else {
                    bytes.iter().rev().fold(0u64, |acc, &b| acc << 8 | u64::from(b))
                };
                let value = if flags & READINT_SIGNED != 0 {
                    let shift = (8 - width) * 8;
                    ((accum << shift) as i64) >> shift
                } else {
                    accum as i64
                };
                self.push_capture(Expr::integer(value), arg(1));
                Some(end)
            }
            Opcode::Unref => {
                let tcap = self.tags.len();
                let end = match self.recur(rule_arg(0), pos)? {
                    Some(end) => end,
                    None => return Ok(None),
                };
                let tag = arg(1);
                if tag == 0 {
                    self.tags.truncate(tcap);
                    self.tagged_captures.truncate(tcap);
                } else {
                    let tags = self.tags.split_off(tcap);
                    let caps = self.tagged_captures.split_off(tcap);
                    for (t, cap) in tags.into_iter().zip(caps) {
                        if u32::from(t) != tag {
                            self.tags.push(t);
                            self.tagged_captures.push(cap);
                        }
                    }
                }
                Some(end)
            }
            Opcode::Nth => {
                let n = arg(0) as usize;
                let cs = self.save();
                let old = self.set_mode(Mode::Normal);
                let matched = self.recur(rule_arg(1), pos)?;
                self.mode = old;
                let end = match matched {
                    Some(end) => end,
                    None => return Ok(None),
                };
                let mut sub = self.captures.split_off(cs.cap);
                self.restore_keep_tags(cs);
                if n < sub.len() {
                    let cap = sub.swap_remove(n);
                    self.push_capture(cap, arg(2));
                }
                Some(end)
            }
            Opcode::Sub => {
                let window_end = match self.recur(rule_arg(0), pos)? {
                    Some(end) => end,
                    None => return Ok(None),
                };
                let saved_end = std::mem::replace(&mut self.text_end, window_end);
                let inner = self.recur(rule_arg(1), pos);
                self.text_end = saved_end;
                inner?.map(|_| window_end)
            }
            Opcode::Split => {
                let saved_end = self.text_end;
                let mut cursor = pos;
                let mut chunk_start = pos;
                while cursor <= saved_end {
                    // find the next separator, or the end
                    let mut chunk_end = cursor;
                    let cs = self.save();
                    while cursor <= saved_end {
                        chunk_end = cursor;
                        let sep = self.recur(rule_arg(0), cursor)?;
                        self.restore(cs);
                        match sep {
                            Some(end) => {
                                cursor = end;
                                break;
                            }
                            None => cursor += 1,
                        }
                    }

                    self.text_end = chunk_end;
                    let piece = self.recur(rule_arg(1), chunk_start);
                    self.text_end = saved_end;
                    if piece?.is_none() {
                        return Ok(None);
                    }

                    if cursor == chunk_start {
                        // the separator matched nothing, so this would never end
                        return Ok(None);
                    }
                    chunk_start = cursor;
                }
                Some(saved_end)
            }
        })
    }

    fn byte_at(&self, pos: usize) -> Option<u8> {
        if pos < self.text_end {
            Some(self.text[pos])
        } else {
            None
        }
    }

    fn set_mode(&mut self, mode: Mode) -> Mode {
        std::mem::replace(&mut self.mode, mode)
    }

    fn save(&self) -> CapState {
        CapState {
            cap: self.captures.len(),
            tcap: self.tagged_captures.len(),
            scratch: self.scratch.len(),
        }
    }

    fn restore(&mut self, cs: CapState) {
        self.restore_keep_tags(cs);
        self.tagged_captures.truncate(cs.tcap);
        self.tags.truncate(cs.tcap);
    }

    fn restore_keep_tags(&mut self, cs: CapState) {
        self.captures.truncate(cs.cap);
        self.scratch.truncate(cs.scratch);
    }

    fn push_capture(&mut self, cap: Value, tag: u32) {
        match self.mode {
            Mode::Accumulate => match &*cap {
                Expr::String(s) => self.scratch.extend_from_slice(s),
                other => {
                    let printed = self.engine.print_expr(other);
                    self.scratch.extend_from_slice(printed.as_bytes());
                }
            },
            Mode::Normal => self.captures.push(cap.clone()),
        }
        if self.has_backref {
            self.tagged_captures.push(cap);
            self.tags.push(tag as u8);
        }
    }

    fn line_col(&mut self, pos: usize) -> (usize, usize) {
        let text = self.text;
        self.line_index
            .get_or_insert_with(|| LineIndex::new(text))
            .line_col(pos)
    }

    /// What `replace` and `cmt` do with their constant.
    fn transform(&mut self, constant: &Value, captures: &[Value]) -> EvalResult {
        Ok(match &**constant {
            Expr::Native { func, .. } => {
                let func = func.clone();
                return func(self.engine, captures);
            }
            Expr::Map(map) => captures
                .last()
                .and_then(|last| map.lookup(last))
                .unwrap_or_else(Expr::nil),
            _ => constant.clone(),
        })
    }
}

/// Parse captured text as a number. Base 0 means base 10, allowing floats.
fn parse_number(text: &[u8], base: u32) -> Option<Value> {
    let s = std::str::from_utf8(text).ok()?;
    if base != 0 {
        return i64::from_str_radix(s, base).ok().map(Expr::integer);
    }
    if let Ok(i) = s.parse::<i64>() {
        return Some(Expr::integer(i));
    }
    // f64's parser would take "inf" and "nan" too
    let looks_numeric = s.bytes().any(|b| b.is_ascii_digit())
        && s.bytes().all(|b| b.is_ascii_digit() || b"+-.eE".contains(&b));
    if looks_numeric {
        s.parse::<f64>().ok().map(Expr::float)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{peg::compile, Limits};

    fn run(engine: &mut Engine, src: &str, text: &str) -> Result<Option<Match>, Exception> {
        let grammar = engine.read_one(src, "<test>".to_owned()).unwrap();
        let program = compile(engine, grammar).unwrap();
        match_(engine, &program, text.as_bytes(), 0, &[])
    }

    fn caps(src: &str, text: &str) -> Option<String> {
        let mut engine = Engine::new();
        let matched = run(&mut engine, src, text).unwrap();
        matched.map(|m| engine.write_expr(&Engine::list_to_sexp(&m.captures)))
    }

    #[test]
    fn literals() {
        assert_eq!(caps(r#""abcde""#, "abcdef"), Some("()".to_owned()));
        assert_eq!(caps(r#""abcde""#, "abcdf"), None);
        assert_eq!(caps(r#""abcde""#, "abcd"), None);
        assert_eq!(caps(r#"(capture 3)"#, "abcd"), Some(r#"("abc")"#.to_owned()));
        assert_eq!(caps("-3", "ab"), Some("()".to_owned()));
        assert_eq!(caps("-3", "abc"), None);
    }

    #[test]
    fn lenprefix_counts_are_bounded() {
        // empty passes that capture nothing stop after the first
        assert_eq!(caps("(lenprefix (number :d+) 0)", "999999999"), Some("()".to_owned()));
        assert_eq!(caps("(lenprefix (number :d+) 0)", "2147483648"), None);
        assert_eq!(caps("(lenprefix (number :d+) 0)", "99999999999999999"), None);

        // empty passes that capture can't ask for more than the input left
        assert_eq!(caps("(lenprefix (number :d+) (constant 1))", "99999999"), None);
        assert_eq!(
            caps("(lenprefix (number :d) (constant 1))", "2xy"),
            Some("(1 1)".to_owned())
        );
    }

    #[test]
    fn choice_rolls_back() {
        assert_eq!(
            caps(r#"(choice (sequence '"a" "x") '"a")"#, "ay"),
            Some(r#"("a")"#.to_owned())
        );
    }

    #[test]
    fn accumulate_glues() {
        assert_eq!(
            caps(r#"(% (some (choice (/ "&amp;" "&") '1)))"#, "a&amp;b"),
            Some(r#"("a&b")"#.to_owned())
        );
        assert_eq!(
            caps(r#"(% (sequence (number :d+) "-" (position)))"#, "12-"),
            Some(r#"("123")"#.to_owned())
        );
    }

    #[test]
    fn read_ints() {
        let mut engine = Engine::new();
        let text = b"\xff\xfe\x01\x02";
        let grammar = engine
            .read_one(r#"(sequence (int 1) (uint 1) (uint-be 2))"#, "<test>".to_owned())
            .unwrap();
        let program = compile(&mut engine, grammar).unwrap();
        let m = match_(&mut engine, &program, text, 0, &[]).unwrap().unwrap();
        assert_eq!(m.end, 4);
        assert_eq!(
            m.captures,
            vec![Expr::integer(-1), Expr::integer(0xfe), Expr::integer(0x0102)]
        );
    }

    #[test]
    fn windows() {
        assert_eq!(
            caps(r#"(sub (capture 3) (capture (some 1)))"#, "abcdef"),
            Some(r#"("abc" "abc")"#.to_owned())
        );
        assert_eq!(
            caps(r#"(split "," (capture :w*))"#, "a,bc,,d"),
            Some(r#"("a" "bc" "" "d")"#.to_owned())
        );
        assert_eq!(caps(r#"(split "" 1)"#, "ab"), None);
    }

    #[test]
    fn error_says_where() {
        let mut engine = Engine::new();
        let err = run(&mut engine, r#"(sequence "a\nb" (error))"#, "a\nbc").unwrap_err();
        assert!(engine.exception_is(&err, "peg/match/error"));
        assert_eq!(err.info, "match error at line 2, column 2");

        let err = run(&mut engine, r#"(error (constant "nope"))"#, "").unwrap_err();
        assert_eq!(err.info, "nope");
        assert_eq!(err.data, Expr::string("nope"));
    }

    #[test]
    fn recursion_is_bounded() {
        let mut engine = Engine::new();
        engine.set_limits(Limits {
            match_depth: 64,
            ..Limits::default()
        });
        let err = run(&mut engine, r#"{:main (sequence :main "a")}"#, "aaa").unwrap_err();
        assert!(engine.exception_is(&err, "peg/match/recursion"));
        assert_eq!(err.info, "peg/match recursed too deeply");
    }

    #[test]
    fn callbacks_see_captures() {
        let mut engine = Engine::new();
        let add = engine.native("add", |_, args| {
            let sum = args
                .iter()
                .map(|a| match &**a {
                    Expr::Integer(i) => *i,
                    _ => 0,
                })
                .sum();
            Ok(Expr::integer(sum))
        });
        let grammar = Engine::list_to_sexp(&[
            Expr::symbol(engine.intern_symbol("cmt")),
            engine
                .read_one(r#"(sequence (number :d) "+" (number :d))"#, "<test>".to_owned())
                .unwrap(),
            add,
        ]);
        let program = compile(&mut engine, grammar).unwrap();
        let m = match_(&mut engine, &program, b"3+4", 0, &[]).unwrap().unwrap();
        assert_eq!(m.captures, vec![Expr::integer(7)]);
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number(b"-12", 0), Some(Expr::integer(-12)));
        assert_eq!(parse_number(b"1.5e2", 0), Some(Expr::float(150.0)));
        assert_eq!(parse_number(b"ff", 16), Some(Expr::integer(255)));
        assert_eq!(parse_number(b"inf", 0), None);
        assert_eq!(parse_number(b"", 0), None);
        assert_eq!(parse_number(b"12", 2), None);
    }

    #[test]
    fn start_past_end() {
        let mut engine = Engine::new();
        let grammar = engine.read_one("1", "<test>".to_owned()).unwrap();
        let program = compile(&mut engine, grammar).unwrap();
        let err = match_(&mut engine, &program, b"ab", 3, &[]).unwrap_err();
        assert!(engine.exception_is(&err, "peg/start-out-of-range"));
        assert!(match_(&mut engine, &program, b"ab", 2, &[]).unwrap().is_none());
    }
}
