//! The label-selector expression language.
//!
//! Selectors are boolean expressions over label key/value pairs
//! (`role == "web" && !has(quarantined)`). Parsing canonicalises the
//! expression into a fully normalised string form, and the selector's
//! identity everywhere downstream is the UID derived from that canonical
//! string: two syntactically different expressions that canonicalise
//! identically are the same selector.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod ast;
mod parser;
mod token;

pub use self::ast::{Expr, Labels};
pub use self::token::{tokenize, Token, TokenKind};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sha2::{Digest, Sha224};
use std::fmt;

/// A selector expression parse failure, with the byte offset it occurred at.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("unterminated string literal at offset {0}")]
    UnterminatedString(usize),
    #[error("unexpected character {1:?} at offset {0}")]
    UnexpectedChar(usize, char),
    #[error("expected == or != after label at offset {0}")]
    ExpectedComparison(usize),
    #[error("expected a quoted string at offset {0}")]
    ExpectedString(usize),
    #[error("string literal on the left of a comparison at offset {0}")]
    LiteralOnLeft(usize),
    #[error("unbalanced parentheses at offset {0}")]
    UnbalancedParens(usize),
    #[error("unexpected token at offset {0}")]
    UnexpectedToken(usize),
    #[error("unexpected end of selector")]
    UnexpectedEnd,
    #[error("unexpected content at end of selector at offset {0}")]
    TrailingContent(usize),
}

/// A parsed, canonicalised selector.
///
/// Equality and hashing are by UID, so selectors that canonicalise
/// identically collapse to one identity regardless of how they were written.
#[derive(Clone, Debug)]
pub struct Selector {
    expr: Expr,
    canonical: String,
    uid: String,
}

// === impl Selector ===

impl Selector {
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let expr = parser::parse(input)?;
        tracing::debug!(input, canonical = %expr.canonical(), "parsed selector");
        Ok(Self::new(expr))
    }

    pub fn new(expr: Expr) -> Self {
        let canonical = expr.canonical();
        let uid = unique_id(&canonical);
        Self {
            expr,
            canonical,
            uid,
        }
    }

    pub fn evaluate(&self, labels: &Labels) -> bool {
        self.expr.evaluate(labels)
    }

    /// The fully normalised string form.
    pub fn canonical(&self) -> &str {
        &self.canonical
    }

    /// The selector's downstream identity: base64url (unpadded) SHA-224 of
    /// the canonical form.
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.uid == other.uid
    }
}

impl Eq for Selector {}

impl std::hash::Hash for Selector {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.uid.hash(state);
    }
}

fn unique_id(canonical: &str) -> String {
    let digest = Sha224::digest(canonical.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::btreemap;

    struct EvalCase {
        sel: &'static str,
        matches: &'static [&'static [(&'static str, &'static str)]],
        non_matches: &'static [&'static [(&'static str, &'static str)]],
    }

    fn labels(pairs: &[(&str, &str)]) -> Labels {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn evaluates_selectors() {
        let cases = [
            EvalCase {
                sel: r#"a == "b""#,
                matches: &[&[("a", "b")], &[("a", "b"), ("c", "d")]],
                non_matches: &[&[], &[("a", "c")], &[("c", "d")]],
            },
            EvalCase {
                sel: r#"a == "b" && c == "d""#,
                matches: &[&[("a", "b"), ("c", "d")]],
                non_matches: &[
                    &[],
                    &[("a", "b"), ("c", "e")],
                    &[("a", "c"), ("c", "d")],
                    &[("c", "d")],
                    &[("a", "b")],
                ],
            },
            EvalCase {
                sel: r#"a == "b" || c == "d""#,
                matches: &[&[("a", "b"), ("c", "d")], &[("a", "b")], &[("c", "d")]],
                non_matches: &[&[], &[("a", "e"), ("c", "e")], &[("c", "e")], &[("a", "e")]],
            },
            EvalCase {
                sel: r#"a == 'a'"#,
                matches: &[&[("a", "a")]],
                non_matches: &[&[("a", "b")], &[]],
            },
            EvalCase {
                sel: r#"a != "a""#,
                matches: &[&[], &[("a", "b")]],
                non_matches: &[&[("a", "a")]],
            },
            EvalCase {
                sel: "has(a)",
                matches: &[&[("a", "b")]],
                non_matches: &[&[], &[("b", "b")]],
            },
            EvalCase {
                sel: "!has(a)",
                matches: &[&[("b", "b")], &[]],
                non_matches: &[&[("a", "b")]],
            },
            EvalCase {
                sel: "",
                matches: &[&[], &[("a", "b")]],
                non_matches: &[],
            },
            EvalCase {
                sel: " all()",
                matches: &[&[], &[("a", "b")]],
                non_matches: &[],
            },
            EvalCase {
                sel: "!!! has(a)",
                matches: &[&[]],
                non_matches: &[&[("a", "b")]],
            },
            EvalCase {
                sel: "!! ! has(a)",
                matches: &[&[]],
                non_matches: &[&[("a", "b")]],
            },
            EvalCase {
                sel: "has(a) && !has(b)",
                matches: &[&[("a", "a")]],
                non_matches: &[&[("a", "a"), ("b", "b")], &[("b", "b")]],
            },
            EvalCase {
                sel: "!(!has(a) || has(b))",
                matches: &[&[("a", "a")]],
                non_matches: &[&[], &[("a", "a"), ("b", "b")]],
            },
            EvalCase {
                sel: "!(has(b) || !has(a))",
                matches: &[&[("a", "a")]],
                non_matches: &[&[], &[("b", "b")]],
            },
            EvalCase {
                sel: r#"a != 'a1' && !b == 'b1'"#,
                matches: &[&[]],
                non_matches: &[&[("a", "a1"), ("b", "b1")]],
            },
            EvalCase {
                sel: r#"! a == 'a1' || ! b == 'b1'"#,
                matches: &[&[]],
                non_matches: &[&[("a", "a1"), ("b", "b1")]],
            },
        ];

        for case in &cases {
            let sel = Selector::parse(case.sel)
                .unwrap_or_else(|e| panic!("{:?} failed to parse: {}", case.sel, e));
            for l in case.matches {
                assert!(
                    sel.evaluate(&labels(l)),
                    "{:?} should match {:?}",
                    case.sel,
                    l
                );
            }
            for l in case.non_matches {
                assert!(
                    !sel.evaluate(&labels(l)),
                    "{:?} should not match {:?}",
                    case.sel,
                    l
                );
            }
        }
    }

    #[test]
    fn canonical_forms_and_uids() {
        // (input, canonical, uid)
        let vectors = [
            ("", "all()", "yAKsl-CNoToGJvI4pNl6xXkWbnkbEnlK7IRXBA"),
            (" all() ", "all()", "yAKsl-CNoToGJvI4pNl6xXkWbnkbEnlK7IRXBA"),
            (" (all() )", "all()", "yAKsl-CNoToGJvI4pNl6xXkWbnkbEnlK7IRXBA"),
            (
                "! (has( b)||! has(a ))",
                "!(has(b) || !has(a))",
                "hSyHDjavfOProPgh2ui1yqeCS31caoii1SGzZw",
            ),
            (
                r#"! (a == "b"&&! c != "d")"#,
                r#"!(a == "b" && !c != "d")"#,
                "Vrj0UGjYYduG4mcP4DKl6qrmTxJhacqDcYiWqg",
            ),
        ];
        for (input, canonical, uid) in vectors {
            let sel = Selector::parse(input).unwrap();
            assert_eq!(sel.canonical(), canonical, "canonical of {:?}", input);
            assert_eq!(sel.uid(), uid, "uid of {:?}", input);

            // Canonical form is a fixed point.
            let reparsed = Selector::parse(sel.canonical()).unwrap();
            assert_eq!(reparsed.canonical(), sel.canonical());
            assert_eq!(reparsed.uid(), sel.uid());
        }
    }

    #[test]
    fn equivalent_selectors_share_a_uid() {
        let a = Selector::parse(r#"a == "b""#).unwrap();
        let b = Selector::parse(r#"( a=="b" )"#).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.uid(), b.uid());
    }

    #[test]
    fn single_quoted_values_with_embedded_double_quotes() {
        let sel = Selector::parse(r#"a == 'say "hi"'"#).unwrap();
        assert_eq!(sel.canonical(), r#"a == 'say "hi"'"#);
        let reparsed = Selector::parse(sel.canonical()).unwrap();
        assert_eq!(reparsed.uid(), sel.uid());
        assert!(sel.evaluate(&btreemap! {
            "a".to_string() => r#"say "hi""#.to_string()
        }));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_ident() -> impl Strategy<Value = String> {
        "[a-z_][a-z0-9_.-]{0,6}".prop_filter("reserved words tokenize specially", |s| {
            !matches!(s.as_str(), "has" | "all" | "not" | "in" | "notin")
        })
    }

    // No single quotes: a value containing both quote styles has no canonical
    // spelling in this grammar.
    fn arb_value() -> impl Strategy<Value = String> {
        proptest::string::string_regex(r#"[a-zA-Z0-9 _.\-"]{0,6}"#).unwrap()
    }

    fn arb_expr() -> impl Strategy<Value = Expr> {
        let leaf = prop_oneof![
            Just(Expr::All),
            arb_ident().prop_map(Expr::Has),
            (arb_ident(), arb_value()).prop_map(|(k, v)| Expr::Eq(k, v)),
            (arb_ident(), arb_value()).prop_map(|(k, v)| Expr::Ne(k, v)),
        ];
        leaf.prop_recursive(4, 24, 3, |inner| {
            prop_oneof![
                // The parser collapses `!!`, so directly nested negations are
                // not a reachable AST; negate only non-negated operands.
                inner.clone().prop_map(|e| match e {
                    Expr::Not(_) => e,
                    other => Expr::Not(Box::new(other)),
                }),
                prop::collection::vec(inner.clone(), 2..4).prop_map(Expr::And),
                prop::collection::vec(inner, 2..4).prop_map(Expr::Or),
            ]
        })
    }

    fn arb_labels() -> impl Strategy<Value = Labels> {
        prop::collection::btree_map(arb_ident(), arb_value(), 0..4)
    }

    proptest! {
        // Canonicalisation is a fixed point: re-parsing the canonical form
        // reproduces both the canonical string and the UID.
        #[test]
        fn canonical_round_trips(expr in arb_expr()) {
            let sel = Selector::new(expr);
            let reparsed = Selector::parse(sel.canonical()).unwrap();
            prop_assert_eq!(reparsed.canonical(), sel.canonical());
            prop_assert_eq!(reparsed.uid(), sel.uid());
        }

        // Re-parsing preserves semantics, not just spelling.
        #[test]
        fn round_trip_preserves_evaluation(expr in arb_expr(), labels in arb_labels()) {
            let sel = Selector::new(expr);
            let reparsed = Selector::parse(sel.canonical()).unwrap();
            prop_assert_eq!(sel.evaluate(&labels), reparsed.evaluate(&labels));
        }
    }
}
