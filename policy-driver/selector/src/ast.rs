use std::collections::BTreeMap;

/// Labels evaluated against a selector.
pub type Labels = BTreeMap<String, String>;

/// A parsed selector expression.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Expr {
    All,
    Has(String),
    Eq(String, String),
    Ne(String, String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

// === impl Expr ===

impl Expr {
    pub fn evaluate(&self, labels: &Labels) -> bool {
        match self {
            Expr::All => true,
            Expr::Has(name) => labels.contains_key(name),
            Expr::Eq(name, value) => labels.get(name) == Some(value),
            Expr::Ne(name, value) => labels.get(name) != Some(value),
            Expr::Not(operand) => !operand.evaluate(labels),
            Expr::And(operands) => operands.iter().all(|op| op.evaluate(labels)),
            Expr::Or(operands) => operands.iter().any(|op| op.evaluate(labels)),
        }
    }

    /// Renders the canonical string form.
    ///
    /// Parentheses are inserted exactly where re-parsing would otherwise
    /// re-associate the expression: `&&`/`||` operands that are themselves
    /// compound, and `!` operands that are `&&`/`||`. This keeps
    /// `parse(canonical(e))` structurally identical to `e`.
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        self.write_canonical(&mut out);
        out
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Expr::All => out.push_str("all()"),
            Expr::Has(name) => {
                out.push_str("has(");
                out.push_str(name);
                out.push(')');
            }
            Expr::Eq(name, value) => {
                out.push_str(name);
                out.push_str(" == ");
                push_quoted(out, value);
            }
            Expr::Ne(name, value) => {
                out.push_str(name);
                out.push_str(" != ");
                push_quoted(out, value);
            }
            Expr::Not(operand) => {
                out.push('!');
                if matches!(**operand, Expr::And(_) | Expr::Or(_)) {
                    out.push('(');
                    operand.write_canonical(out);
                    out.push(')');
                } else {
                    operand.write_canonical(out);
                }
            }
            Expr::And(operands) => {
                for (i, op) in operands.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" && ");
                    }
                    if matches!(op, Expr::And(_) | Expr::Or(_)) {
                        out.push('(');
                        op.write_canonical(out);
                        out.push(')');
                    } else {
                        op.write_canonical(out);
                    }
                }
            }
            Expr::Or(operands) => {
                for (i, op) in operands.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" || ");
                    }
                    if matches!(op, Expr::Or(_)) {
                        out.push('(');
                        op.write_canonical(out);
                        out.push(')');
                    } else {
                        op.write_canonical(out);
                    }
                }
            }
        }
    }
}

/// String literals are double-quoted unless the value itself contains a
/// double quote, in which case single quotes are used.
fn push_quoted(out: &mut String, value: &str) {
    if value.contains('"') {
        out.push('\'');
        out.push_str(value);
        out.push('\'');
    } else {
        out.push('"');
        out.push_str(value);
        out.push('"');
    }
}
