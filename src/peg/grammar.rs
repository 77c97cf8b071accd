//! The default grammar, which every grammar falls back on.

use crate::{Engine, Value};

/// Base character classes. Each one also gets an uppercase complement, a `+`
/// version and a `*` version.
const BASE_RULES: &[(&str, &str)] = &[
    ("a", r#"(range "az" "AZ")"#),
    ("d", r#"(range "09")"#),
    ("h", r#"(range "09" "af" "AF")"#),
    ("s", r#"(set " \t\r\n\0\f\v")"#),
    ("w", r#"(range "az" "AZ" "09")"#),
];

pub(crate) fn default_grammar(engine: &mut Engine) -> Value {
    let mut source = String::from("{\n");
    for (name, rule) in BASE_RULES {
        source.push_str(&format!(
            "  :{name} {rule}\n  :{upper} (if-not :{name} 1)\n  :{name}+ (some :{name})\n  :{name}* (any :{name})\n",
            name = name,
            rule = rule,
            upper = name.to_ascii_uppercase(),
        ));
    }
    source.push('}');

    engine
        .read_one(&source, "<default-grammar>".to_owned())
        .expect("the default grammar is well-formed")
}
