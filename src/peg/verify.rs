//! Check that bytecode from outside is safe to run.
//!
//! The matcher doesn't check anything, so everything it assumes gets checked here:
//! every opcode is real, every operand is in bounds, every rule offset lands on the
//! start of an instruction, every constant exists, and every tag fits in a byte.

use std::convert::TryFrom;

use log::debug;
use thiserror::Error;

use super::{Opcode, READINT_BIG_ENDIAN, READINT_SIGNED, READINT_WIDTH_MASK, TAG_MAX};

/// The bytecode was rejected. Why is logged at `debug` level, but not returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid bytecode")]
pub struct InvalidBytecode;

/// Check bytecode that goes with `constants_len` constants.
pub fn verify(bytecode: &[u32], constants_len: usize) -> Result<(), InvalidBytecode> {
    verify_program(bytecode, constants_len).map(|_| ())
}

/// What the verifier found out along the way.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Verified {
    pub has_backref: bool,
}

const REFERENCED: u8 = 0b01;
const INSTRUCTION: u8 = 0b10;

pub(crate) fn verify_program(
    bytecode: &[u32],
    constants_len: usize,
) -> Result<Verified, InvalidBytecode> {
    if bytecode.is_empty() {
        return Err(reject(0, "empty bytecode"));
    }

    let mut flags = vec![0u8; bytecode.len()];
    let mut has_backref = false;
    let mut cursor = 0;
    while cursor < bytecode.len() {
        flags[cursor] |= INSTRUCTION;
        let opc = Opcode::try_from(bytecode[cursor])
            .map_err(|ono| reject(cursor, &format!("{:#x} is not an opcode", ono.number)))?;

        let mut operands = Operands {
            bytecode,
            flags: &mut flags,
            at: cursor,
            cursor: cursor + 1,
            constants_len,
        };
        match opc {
            Opcode::Literal => {
                let len = operands.word()? as usize;
                operands.skip((len + 3) / 4)?;
            }
            Opcode::NChar | Opcode::NotNChar => {
                operands.word()?;
            }
            Opcode::Range => {
                let range = operands.word()?;
                let (lo, hi) = (range & 0xffff, range >> 16);
                if lo > hi || hi > 0xff {
                    return Err(reject(cursor, "bad range"));
                }
            }
            Opcode::Set => operands.skip(8)?,
            Opcode::Look => {
                operands.word()?;
                operands.rule()?;
            }
            Opcode::Choice | Opcode::Sequence => {
                let len = operands.word()?;
                for _ in 0..len {
                    operands.rule()?;
                }
            }
            Opcode::If | Opcode::IfNot | Opcode::LenPrefix | Opcode::Sub | Opcode::Split => {
                operands.rule()?;
                operands.rule()?;
            }
            Opcode::Not
            | Opcode::Error
            | Opcode::Drop
            | Opcode::To
            | Opcode::Thru => {
                operands.rule()?;
            }
            Opcode::OnlyTags => {
                has_backref = true;
                operands.rule()?;
            }
            Opcode::Between => {
                let lo = operands.word()?;
                let hi = operands.word()?;
                if lo > hi {
                    return Err(reject(cursor, "between with lo > hi"));
                }
                operands.rule()?;
            }
            Opcode::GetTag => {
                has_backref = true;
                operands.tag()?;
                operands.tag()?;
            }
            Opcode::Capture | Opcode::Accumulate | Opcode::Group => {
                operands.rule()?;
                operands.tag()?;
            }
            Opcode::Unref => {
                has_backref = true;
                operands.rule()?;
                operands.tag()?;
            }
            Opcode::CaptureNumber => {
                operands.rule()?;
                let base = operands.word()?;
                if base != 0 && !(2..=36).contains(&base) {
                    return Err(reject(cursor, "bad number base"));
                }
                operands.tag()?;
            }
            Opcode::Position | Opcode::Line | Opcode::Column => {
                operands.tag()?;
            }
            Opcode::Backmatch => {
                has_backref = true;
                operands.tag()?;
            }
            Opcode::Argument => {
                operands.word()?;
                operands.tag()?;
            }
            Opcode::Constant => {
                operands.constant()?;
                operands.tag()?;
            }
            Opcode::Replace | Opcode::MatchTime => {
                operands.rule()?;
                operands.constant()?;
                operands.tag()?;
            }
            Opcode::ReadInt => {
                let flags = operands.word()?;
                let width = flags & READINT_WIDTH_MASK;
                let known = READINT_WIDTH_MASK | READINT_SIGNED | READINT_BIG_ENDIAN;
                let max_width = if flags & READINT_SIGNED != 0 { 8 } else { 7 };
                if flags & !known != 0 || width == 0 || width > max_width {
                    return Err(reject(cursor, "bad int flags"));
                }
                operands.tag()?;
            }
            Opcode::Nth => {
                operands.word()?;
                operands.rule()?;
                operands.tag()?;
            }
        }
        cursor = operands.cursor;
    }

    // Every reference has to land on the start of an instruction.
    if let Some(bad) = flags.iter().position(|&f| f == REFERENCED) {
        return Err(reject(bad, "a rule points into the middle of an instruction"));
    }

    Ok(Verified { has_backref })
}

fn reject(at: usize, why: &str) -> InvalidBytecode {
    debug!("rejected bytecode at word {}: {}", at, why);
    InvalidBytecode
}

/// Bounds-checked reading of one instruction's operands.
struct Operands<'a> {
    bytecode: &'a [u32],
    flags: &'a mut [u8],
    /// Start of the instruction, for messages.
    at: usize,
    cursor: usize,
    constants_len: usize,
}

impl Operands<'_> {
    fn word(&mut self) -> Result<u32, InvalidBytecode> {
        let word = *self
            .bytecode
            .get(self.cursor)
            .ok_or_else(|| reject(self.at, "ran off the end"))?;
        self.cursor += 1;
        Ok(word)
    }

    fn skip(&mut self, words: usize) -> Result<(), InvalidBytecode> {
        match self.cursor.checked_add(words) {
            Some(end) if end <= self.bytecode.len() => {
                self.cursor = end;
                Ok(())
            }
            _ => Err(reject(self.at, "ran off the end")),
        }
    }

    fn rule(&mut self) -> Result<(), InvalidBytecode> {
        let rule = self.word()? as usize;
        if rule >= self.bytecode.len() {
            return Err(reject(self.at, "rule out of range"));
        }
        self.flags[rule] |= REFERENCED;
        Ok(())
    }

    fn tag(&mut self) -> Result<(), InvalidBytecode> {
        if self.word()? > TAG_MAX {
            return Err(reject(self.at, "tag out of range"));
        }
        Ok(())
    }

    fn constant(&mut self) -> Result<(), InvalidBytecode> {
        if self.word()? as usize >= self.constants_len {
            return Err(reject(self.at, "constant out of range"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{peg::compile, Engine};
    use quickcheck::quickcheck;

    const GRAMMARS: &[&str] = &[
        r#""hello""#,
        r#"(some (choice "ab" "cd"))"#,
        r#"(capture (between 1 3 (range "09")))"#,
        r#"{:main (sequence (capture :d+ :n) (backmatch :n))}"#,
        r#"{:pad (any "=") :main (sequence (capture :pad :p) (backmatch :p) (unref (capture "x" :p)))}"#,
        r#"(sequence (look -1 "a") (not "b") (if "c" 1) (if-not "d" 1) (to "e") (thru "f"))"#,
        r#"(group (sequence (number :d+) (number :h+ 16 :x) (nth 0 (line)) (column)))"#,
        r#"(sequence (argument 0) (constant 5) (/ :w+ "word") (cmt :a "v") (drop '"a") (only-tags '"b"))"#,
        r#"(sequence (lenprefix (number :d) 1) (int 2) (uint-be 4 :u) (-> :u) (sub 3 :d+) (split "," :w*))"#,
        r#"(sequence (% (some (choice '"a" 1))) (error (position)) (error) -1 true false (set "aeiou"))"#,
    ];

    fn op(opc: Opcode) -> u32 {
        opc.into()
    }

    fn compiled(src: &str) -> (Vec<u32>, usize, bool) {
        let mut engine = Engine::new();
        let grammar = engine.read_one(src, "<test>".to_owned()).unwrap();
        let program = compile(&mut engine, grammar).unwrap();
        (
            program.bytecode().to_vec(),
            program.constants().len(),
            program.has_backref(),
        )
    }

    #[test]
    fn compiled_grammars_verify() {
        for src in GRAMMARS {
            let (code, constants, has_backref) = compiled(src);
            let verified = verify_program(&code, constants)
                .unwrap_or_else(|_| panic!("{} didn't verify", src));
            assert_eq!(verified.has_backref, has_backref, "{}", src);
        }
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(verify(&[], 0), Err(InvalidBytecode));
        assert_eq!(verify(&[0], 0), Err(InvalidBytecode));
        assert_eq!(verify(&[9999], 0), Err(InvalidBytecode));
        // NChar with its operand missing
        assert_eq!(verify(&[op(Opcode::NChar)], 0), Err(InvalidBytecode));
        // trailing word that isn't an instruction
        assert_eq!(verify(&[op(Opcode::NChar), 1, 0], 0), Err(InvalidBytecode));
        // literal longer than the bytecode
        assert_eq!(verify(&[op(Opcode::Literal), 9, 0], 0), Err(InvalidBytecode));
    }

    #[test]
    fn rejects_bad_operands() {
        let nchar = op(Opcode::NChar);
        // rule pointing past the end
        assert!(verify(&[op(Opcode::Not), 7, nchar, 1], 0).is_err());
        // rule pointing at an operand
        assert!(verify(&[op(Opcode::Not), 3, nchar, 1], 0).is_err());
        assert!(verify(&[op(Opcode::Not), 2, nchar, 1], 0).is_ok());
        // constant that doesn't exist
        assert!(verify(&[op(Opcode::Constant), 0, 0], 0).is_err());
        assert!(verify(&[op(Opcode::Constant), 0, 0], 1).is_ok());
        // tag too big
        assert!(verify(&[op(Opcode::Position), 256], 0).is_err());
        assert!(verify(&[op(Opcode::Position), 255], 0).is_ok());
        // bad ranges and counts
        assert!(verify(&[op(Opcode::Range), 0x0061_0062], 0).is_err());
        assert!(verify(&[op(Opcode::Range), 0x0100_0000], 0).is_err());
        assert!(verify(&[op(Opcode::Between), 2, 1, 0], 0).is_err());
        // bad int widths
        assert!(verify(&[op(Opcode::ReadInt), 0, 0], 0).is_err());
        assert!(verify(&[op(Opcode::ReadInt), 8, 0], 0).is_err());
        assert!(verify(&[op(Opcode::ReadInt), 8 | READINT_SIGNED, 0], 0).is_ok());
        assert!(verify(&[op(Opcode::ReadInt), 0x42, 0], 0).is_err());
        // bad number base
        assert!(verify(&[op(Opcode::CaptureNumber), 0, 1, 0], 0).is_err());
    }

    #[test]
    fn reports_backrefs() {
        let code = [op(Opcode::Backmatch), 0];
        assert!(verify_program(&code, 0).unwrap().has_backref);
        let code = [op(Opcode::Position), 0];
        assert!(!verify_program(&code, 0).unwrap().has_backref);
    }

    /// Length of the instruction at `cursor`, and which of its words are rule offsets.
    fn shape(code: &[u32], cursor: usize) -> (usize, Vec<usize>) {
        let at = |n: usize| cursor + n;
        match Opcode::try_from(code[cursor]).unwrap() {
            Opcode::Literal => (2 + (code[cursor + 1] as usize + 3) / 4, vec![]),
            Opcode::Set => (9, vec![]),
            Opcode::NChar
            | Opcode::NotNChar
            | Opcode::Range
            | Opcode::Position
            | Opcode::Line
            | Opcode::Column
            | Opcode::Backmatch => (2, vec![]),
            Opcode::GetTag | Opcode::Argument | Opcode::Constant | Opcode::ReadInt => (3, vec![]),
            Opcode::Not
            | Opcode::Error
            | Opcode::Drop
            | Opcode::OnlyTags
            | Opcode::To
            | Opcode::Thru => (2, vec![at(1)]),
            Opcode::Capture | Opcode::Accumulate | Opcode::Group | Opcode::Unref => {
                (3, vec![at(1)])
            }
            Opcode::Look => (3, vec![at(2)]),
            Opcode::If | Opcode::IfNot | Opcode::LenPrefix | Opcode::Sub | Opcode::Split => {
                (3, vec![at(1), at(2)])
            }
            Opcode::Between => (4, vec![at(3)]),
            Opcode::CaptureNumber | Opcode::Replace | Opcode::MatchTime => (4, vec![at(1)]),
            Opcode::Nth => (4, vec![at(2)]),
            Opcode::Choice | Opcode::Sequence => {
                let len = code[cursor + 1] as usize;
                (2 + len, (at(2)..at(2 + len)).collect())
            }
        }
    }

    quickcheck! {
        fn prop_mutated_offsets_are_caught(grammar: usize, which: usize, target: u32) -> bool {
            let src = GRAMMARS[grammar % GRAMMARS.len()];
            let (mut code, constants, _) = compiled(src);

            let mut starts = Vec::new();
            let mut slots = Vec::new();
            let mut cursor = 0;
            while cursor < code.len() {
                starts.push(cursor as u32);
                let (len, rules) = shape(&code, cursor);
                slots.extend(rules);
                cursor += len;
            }
            if slots.is_empty() {
                return true;
            }

            let slot = slots[which % slots.len()];
            let target = target % (code.len() as u32 + 4);
            code[slot] = target;

            verify(&code, constants).is_ok() == starts.contains(&target)
        }
    }
}
