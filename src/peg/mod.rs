//! # Parsing Expression Grammars
//!
//! It's like [Janet's](https://janet-lang.org/docs/peg.html), and this time it
//! even works.
//!
//! ## Bytecode
//!
//! A compiled grammar is a [`Program`]: a flat array of `u32` *words* and a list of
//! *constants* (host values used by `constant`, `replace` and `cmt`).
//!
//! **Rules** are a single word *opcode*, followed by 0 or more *argument* words.
//! The rule at word 0 is the entry point.
//!
//! **Arguments** are all one word long, but they mean different things.
//!
//! - `n`: An unsigned integer.
//! - `rule`: The word offset of *another* rule in the same array.
//! - `tag`: A capture tag, `1..=255`, or 0 for no tag.
//! - `const`: An index into the constants.
//!
//! **Literals** are stored inline: a length word, then the bytes packed four to a
//! word, little-end first.
//!
//! ## Writing Bytecode
//!
//! Because we know exactly how long each rule is before we write it, the builder
//! *reserves* that many words at the end of the bytecode, compiles the subrules
//! (which land after the reservation), and then fills the reservation in with the
//! subrules' offsets.
//!
//! Compiled rules are remembered per grammar scope, so a rule that refers to itself
//! just points back at its own start. That's how recursion works.
//!
//! ## Loading Bytecode
//!
//! Bytecode that comes from anywhere but the compiler goes through the
//! [verifier](verify) first. The matcher trusts its input completely.
pub mod api;
mod compile;
mod execute;
mod grammar;
mod lines;
mod program;
mod verify;

pub use compile::compile;
pub use execute::{match_, Match};
pub use lines::LineIndex;
pub use program::{Program, UnverifiedProgram};
pub use verify::{verify, InvalidBytecode};

pub(crate) use grammar::default_grammar;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The biggest capture tag. Tags are stored in a byte when matching.
pub const TAG_MAX: u32 = 255;

/// `ReadInt` flag: sign-extend the result.
const READINT_SIGNED: u32 = 0x10;
/// `ReadInt` flag: most significant byte first.
const READINT_BIG_ENDIAN: u32 = 0x20;
/// `ReadInt`: the low nibble is the width in bytes.
const READINT_WIDTH_MASK: u32 = 0x0f;

/// How deep compiling and matching may go before giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Nesting depth of grammar forms, and also how many rule names may be chased
    /// in a row before a reference chain is considered circular.
    pub compile_depth: usize,
    /// Nesting depth of rule calls while matching.
    pub match_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            compile_depth: 1024,
            match_depth: 1024,
        }
    }
}

/// Opcode words.
///
/// Opcodes start at 1 so zeroed words can be detected as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u32)]
pub(crate) enum Opcode {
    // === Literals ===
    /// Match this literal string.
    ///
    /// `n bytes...`
    Literal = 1,
    /// Match exactly this many bytes.
    ///
    /// `n`
    NChar,
    /// Match 0 bytes, but only if fewer than this many bytes are left.
    ///
    /// `n`
    NotNChar,
    /// Match one byte in `lo..=hi`. The word is `lo | hi << 16`.
    ///
    /// `n`
    Range,
    /// Match one byte in this 256-bit bitmap.
    ///
    /// `n n n n n n n n`
    Set,

    // === Lookaround and conditionals ===
    /// Match the rule at a signed offset from here, then match 0 bytes.
    ///
    /// `n rule`
    Look,
    /// Try each rule in order and keep the first that matches.
    ///
    /// `n rule...`
    Choice,
    /// Match each rule one after the other.
    ///
    /// `n rule...`
    Sequence,
    /// If the first rule matches here, match the second here.
    ///
    /// `rule rule`
    If,
    /// If the first rule does *not* match here, match the second here.
    ///
    /// `rule rule`
    IfNot,
    /// Match 0 bytes if the rule does *not* match.
    ///
    /// `rule`
    Not,
    /// Match the rule between `lo` and `hi` times.
    ///
    /// `n n rule`
    Between,

    // === Captures ===
    /// Push the last capture tagged with the first tag again, with the second tag.
    ///
    /// `tag tag`
    GetTag,
    /// Push the matched text.
    ///
    /// `rule tag`
    Capture,
    /// Push the matched text as a number in the given base (0 for auto).
    ///
    /// `rule n tag`
    CaptureNumber,
    /// Push the byte offset.
    ///
    /// `tag`
    Position,
    /// Push the 1-indexed line.
    ///
    /// `tag`
    Line,
    /// Push the 1-indexed column.
    ///
    /// `tag`
    Column,
    /// Push the nth extra argument given to the match.
    ///
    /// `n tag`
    Argument,
    /// Push a constant.
    ///
    /// `const tag`
    Constant,
    /// Glue every capture of the rule into one string.
    ///
    /// `rule tag`
    Accumulate,
    /// Push every capture of the rule as one list.
    ///
    /// `rule tag`
    Group,
    /// Transform the captures of the rule with a constant.
    ///
    /// `rule const tag`
    Replace,
    /// Like `Replace`, but fail when the transform is falsy.
    ///
    /// `rule const tag`
    MatchTime,
    /// Raise a match error.
    ///
    /// `rule`
    Error,
    /// Match the rule, but forget its captures.
    ///
    /// `rule`
    Drop,
    /// Match the rule, forgetting its captures but keeping their tags.
    ///
    /// `rule`
    OnlyTags,
    /// Match the text of the last capture with this tag. Tag 0 means the last untagged capture.
    ///
    /// `tag`
    Backmatch,
    /// Skip ahead to where the rule matches, not including it.
    ///
    /// `rule`
    To,
    /// Skip ahead past where the rule matches.
    ///
    /// `rule`
    Thru,
    /// Match the first rule for a count, then the second rule that many times.
    ///
    /// `rule rule`
    LenPrefix,
    /// Read a binary integer. See the `READINT_*` flags.
    ///
    /// `n tag`
    ReadInt,
    /// Match the rule, then make tags set inside it invisible outside it.
    ///
    /// `rule tag`
    Unref,
    /// Keep only the nth capture of the rule.
    ///
    /// `n rule tag`
    Nth,
    /// Match the first rule, then match the second only inside what it matched.
    ///
    /// `rule rule`
    Sub,
    /// Split the text on the first rule and match each piece with the second.
    ///
    /// `rule rule`
    Split,
}
