//! Typed builder for Mixpanel filter expressions.
//!
//! Query endpoints take `where` selectors in Mixpanel's filter-expression
//! grammar: property access via `properties["k"]` or `user["k"]`,
//! comparison and logical operators, `in`, `not`, `defined`/`not defined`,
//! and the `datetime()` literal. The builder renders that grammar from
//! typed pieces; validation of the rendered expression stays server-side,
//! and raw strings can always be passed instead.
//!
//! ```
//! use mp_client::filter::{prop, user};
//!
//! let expr = prop("country").eq("US").and(prop("amount").gt(10)).render();
//! assert_eq!(expr, r#"(properties["country"] == "US") and (properties["amount"] > 10)"#);
//!
//! let who = user("plan").defined().render();
//! assert_eq!(who, r#"defined (user["plan"])"#);
//! ```

use serde_json::Value;
use std::fmt;

/// A property reference: event (`properties[...]`) or profile (`user[...]`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    scope: &'static str,
    name: String,
}

/// Reference an event property.
pub fn prop(name: impl Into<String>) -> Property {
    Property { scope: "properties", name: name.into() }
}

/// Reference a profile (user) property.
pub fn user(name: impl Into<String>) -> Property {
    Property { scope: "user", name: name.into() }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.scope, Value::from(self.name.as_str()))
    }
}

/// A literal operand: string, number, boolean, list, or datetime.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Literal(Value),
    /// Rendered as `datetime(<unix seconds>)`.
    Datetime(i64),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Literal(value) => write!(f, "{value}"),
            Operand::Datetime(seconds) => write!(f, "datetime({seconds})"),
        }
    }
}

impl From<&str> for Operand {
    fn from(value: &str) -> Self {
        Operand::Literal(Value::from(value))
    }
}

impl From<String> for Operand {
    fn from(value: String) -> Self {
        Operand::Literal(Value::from(value))
    }
}

impl From<i64> for Operand {
    fn from(value: i64) -> Self {
        Operand::Literal(Value::from(value))
    }
}

impl From<i32> for Operand {
    fn from(value: i32) -> Self {
        Operand::Literal(Value::from(value))
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Literal(Value::from(value))
    }
}

impl From<bool> for Operand {
    fn from(value: bool) -> Self {
        Operand::Literal(Value::from(value))
    }
}

impl From<Value> for Operand {
    fn from(value: Value) -> Self {
        Operand::Literal(value)
    }
}

/// A datetime literal for comparisons against time-valued properties.
pub fn datetime(unix_seconds: i64) -> Operand {
    Operand::Datetime(unix_seconds)
}

/// A composable filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Compare { property: Property, op: &'static str, operand: Operand },
    In { property: Property, values: Vec<Value>, negated: bool },
    Contains { property: Property, needle: String, negated: bool },
    Defined { property: Property, negated: bool },
    And(Box<Filter>, Box<Filter>),
    Or(Box<Filter>, Box<Filter>),
    Not(Box<Filter>),
    /// An already-rendered expression, passed through verbatim.
    Raw(String),
}

impl Property {
    pub fn eq(self, operand: impl Into<Operand>) -> Filter {
        Filter::Compare { property: self, op: "==", operand: operand.into() }
    }

    pub fn ne(self, operand: impl Into<Operand>) -> Filter {
        Filter::Compare { property: self, op: "!=", operand: operand.into() }
    }

    pub fn gt(self, operand: impl Into<Operand>) -> Filter {
        Filter::Compare { property: self, op: ">", operand: operand.into() }
    }

    pub fn ge(self, operand: impl Into<Operand>) -> Filter {
        Filter::Compare { property: self, op: ">=", operand: operand.into() }
    }

    pub fn lt(self, operand: impl Into<Operand>) -> Filter {
        Filter::Compare { property: self, op: "<", operand: operand.into() }
    }

    pub fn le(self, operand: impl Into<Operand>) -> Filter {
        Filter::Compare { property: self, op: "<=", operand: operand.into() }
    }

    /// Membership in a literal list.
    pub fn is_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Filter {
        Filter::In {
            property: self,
            values: values.into_iter().map(Into::into).collect(),
            negated: false,
        }
    }

    pub fn not_in<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Filter {
        Filter::In {
            property: self,
            values: values.into_iter().map(Into::into).collect(),
            negated: true,
        }
    }

    /// Substring match.
    pub fn contains(self, needle: impl Into<String>) -> Filter {
        Filter::Contains { property: self, needle: needle.into(), negated: false }
    }

    pub fn not_contains(self, needle: impl Into<String>) -> Filter {
        Filter::Contains { property: self, needle: needle.into(), negated: true }
    }

    pub fn defined(self) -> Filter {
        Filter::Defined { property: self, negated: false }
    }

    pub fn not_defined(self) -> Filter {
        Filter::Defined { property: self, negated: true }
    }
}

impl Filter {
    /// A raw expression used verbatim.
    pub fn raw(expr: impl Into<String>) -> Filter {
        Filter::Raw(expr.into())
    }

    pub fn and(self, other: Filter) -> Filter {
        Filter::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Filter) -> Filter {
        Filter::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Filter {
        Filter::Not(Box::new(self))
    }

    /// Render the expression in the wire grammar.
    pub fn render(&self) -> String {
        match self {
            Filter::Compare { property, op, operand } => {
                format!("{property} {op} {operand}")
            }
            Filter::In { property, values, negated } => {
                let list = Value::from(values.clone());
                if *negated {
                    format!("not {property} in {list}")
                } else {
                    format!("{property} in {list}")
                }
            }
            Filter::Contains { property, needle, negated } => {
                let needle = Value::from(needle.as_str());
                if *negated {
                    format!("not {needle} in {property}")
                } else {
                    format!("{needle} in {property}")
                }
            }
            Filter::Defined { property, negated } => {
                if *negated {
                    format!("not defined ({property})")
                } else {
                    format!("defined ({property})")
                }
            }
            Filter::And(a, b) => format!("({}) and ({})", a.render(), b.render()),
            Filter::Or(a, b) => format!("({}) or ({})", a.render(), b.render()),
            Filter::Not(inner) => format!("not ({})", inner.render()),
            Filter::Raw(expr) => expr.clone(),
        }
    }
}

impl From<Filter> for String {
    fn from(filter: Filter) -> String {
        filter.render()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_render_with_quoted_access() {
        assert_eq!(prop("country").eq("US").render(), r#"properties["country"] == "US""#);
        assert_eq!(prop("amount").ge(9.5).render(), r#"properties["amount"] >= 9.5"#);
        assert_eq!(user("active").eq(true).render(), r#"user["active"] == true"#);
    }

    #[test]
    fn property_names_with_quotes_are_escaped() {
        let rendered = prop("a\"b").eq(1).render();
        assert_eq!(rendered, r#"properties["a\"b"] == 1"#);
    }

    #[test]
    fn set_and_contains_forms() {
        assert_eq!(
            prop("tier").is_in(["gold", "silver"]).render(),
            r#"properties["tier"] in ["gold","silver"]"#
        );
        assert_eq!(
            prop("tier").not_in(["trial"]).render(),
            r#"not properties["tier"] in ["trial"]"#
        );
        assert_eq!(
            prop("email").contains("@example.com").render(),
            r#""@example.com" in properties["email"]"#
        );
    }

    #[test]
    fn defined_and_datetime() {
        assert_eq!(prop("plan").not_defined().render(), r#"not defined (properties["plan"])"#);
        assert_eq!(
            prop("signup").lt(datetime(1_704_067_200)).render(),
            r#"properties["signup"] < datetime(1704067200)"#
        );
    }

    #[test]
    fn logical_composition_parenthesizes() {
        let expr = prop("a").eq(1).and(prop("b").eq(2).or(prop("c").eq(3)));
        assert_eq!(
            expr.render(),
            r#"(properties["a"] == 1) and ((properties["b"] == 2) or (properties["c"] == 3))"#
        );
        let negated = prop("a").eq(1).not();
        assert_eq!(negated.render(), r#"not (properties["a"] == 1)"#);
    }

    #[test]
    fn raw_passes_through() {
        let raw = Filter::raw(r#"properties["x"] > 1"#);
        assert_eq!(raw.render(), r#"properties["x"] > 1"#);
        let as_string: String = raw.into();
        assert_eq!(as_string, r#"properties["x"] > 1"#);
    }
}
