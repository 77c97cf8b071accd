use super::*;

macro_rules! predicates {
    ($($name:ident => $pat:pat),* $(,)?) => {
        impl Expr {
            $(
                pub fn $name(&self) -> bool {
                    matches!(self, $pat)
                }
            )*
        }
    };
}

predicates! {
    is_nil => Expr::Nil,
    is_symbol => Expr::Symbol(_),
}

impl Expr {
    /// Name of this value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Expr::Integer(_) => "integer",
            Expr::Float(_) => "float",
            Expr::String(_) => "string",
            Expr::Bool(_) => "bool",
            Expr::Symbol(_) => "symbol",
            Expr::Pair(..) => "pair",
            Expr::Nil => "nil",
            Expr::Map(_) => "map",
            Expr::Native { .. } => "native",
            Expr::Peg(_) => "peg",
        }
    }
}
