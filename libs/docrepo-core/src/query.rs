//! Query model.
//!
//! Every list operation accepts a [`QuerySpec`]: either raw query text with
//! named parameters ([`QueryDefinition`]) or a native [`Query`] expression
//! built in code. Stores decide which forms they can execute.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;
use std::sync::OnceLock;

/// Query text plus `@name` parameters.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryDefinition {
    pub text: String,
    #[serde(default)]
    pub parameters: Vec<(String, Value)>,
}

impl QueryDefinition {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            parameters: Vec::new(),
        }
    }

    /// Bind a parameter. The name includes the leading `@`.
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.push((name.into(), value.into()));
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.parameters
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    /// Render the query with parameter values inlined, for logs only.
    ///
    /// Strings are quoted, `null` is written literally and tokens without a
    /// bound value are left untouched.
    pub fn to_log_text(&self) -> String {
        if self.parameters.is_empty() {
            return self.text.clone();
        }
        let Some(re) = param_token() else {
            return self.text.clone();
        };
        re.replace_all(&self.text, |caps: &regex::Captures<'_>| {
            let token = &caps[0];
            match self.parameter(token) {
                Some(value) => format_log_value(value),
                None => token.to_string(),
            }
        })
        .into_owned()
    }
}

fn param_token() -> Option<&'static regex::Regex> {
    static TOKEN: OnceLock<Option<regex::Regex>> = OnceLock::new();
    TOKEN
        .get_or_init(|| regex::Regex::new(r"@[A-Za-z0-9_]+").ok())
        .as_ref()
}

fn format_log_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::String(s) => format!("\"{s}\""),
        other => other.to_string(),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl CompareOperator {
    fn as_sql(self) -> &'static str {
        match self {
            CompareOperator::Eq => "=",
            CompareOperator::Ne => "!=",
            CompareOperator::Gt => ">",
            CompareOperator::Ge => ">=",
            CompareOperator::Lt => "<",
            CompareOperator::Le => "<=",
        }
    }
}

/// Filter expression over dotted JSON field paths (`"partitionKey"`, `"owner.name"`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    Compare(String, CompareOperator, Value),
    In(String, Vec<Value>),
    IsDefined(String),
}

impl Expr {
    pub fn compare(field: impl Into<String>, op: CompareOperator, value: impl Into<Value>) -> Self {
        Expr::Compare(field.into(), op, value.into())
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOperator::Eq, value)
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOperator::Ne, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOperator::Gt, value)
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOperator::Ge, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOperator::Lt, value)
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, CompareOperator::Le, value)
    }

    pub fn is_in<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        Expr::In(field.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn defined(field: impl Into<String>) -> Self {
        Expr::IsDefined(field.into())
    }

    pub fn and(self, other: Expr) -> Self {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Self {
        Expr::Or(Box::new(self), Box::new(other))
    }

    fn render(&self, out: &mut String, params: &mut Vec<(String, Value)>) {
        match self {
            Expr::And(a, b) => render_binary(out, params, a, "AND", b),
            Expr::Or(a, b) => render_binary(out, params, a, "OR", b),
            Expr::Not(inner) => {
                out.push_str("NOT (");
                inner.render(out, params);
                out.push(')');
            }
            Expr::Compare(field, op, value) => {
                let name = bind(params, value.clone());
                let _ = write!(out, "c.{field} {} {name}", op.as_sql());
            }
            Expr::In(field, values) => {
                if values.is_empty() {
                    out.push_str("false");
                    return;
                }
                let names: Vec<String> = values.iter().map(|v| bind(params, v.clone())).collect();
                let _ = write!(out, "c.{field} IN ({})", names.join(", "));
            }
            Expr::IsDefined(field) => {
                let _ = write!(out, "IS_DEFINED(c.{field})");
            }
        }
    }
}

impl std::ops::Not for Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }
}

fn render_binary(
    out: &mut String,
    params: &mut Vec<(String, Value)>,
    a: &Expr,
    op: &str,
    b: &Expr,
) {
    out.push('(');
    a.render(out, params);
    let _ = write!(out, " {op} ");
    b.render(out, params);
    out.push(')');
}

fn bind(params: &mut Vec<(String, Value)>, value: Value) -> String {
    let name = format!("@p{}", params.len());
    params.push((name.clone(), value));
    name
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderKey {
    pub field: String,
    pub dir: SortDir,
}

/// What each result row contains.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    /// The whole document.
    #[default]
    All,
    /// `{id, partitionKey}` objects.
    IdPartition,
    /// A bare value taken from one field.
    Value(String),
    /// An object holding only the listed fields.
    Fields(Vec<String>),
}

/// Native query expression.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub filter: Option<Expr>,
    pub order_by: Vec<OrderKey>,
    pub projection: Projection,
    pub distinct: bool,
    pub take: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter. Repeated calls are combined with AND.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, dir: SortDir) -> Self {
        self.order_by.push(OrderKey {
            field: field.into(),
            dir,
        });
        self
    }

    pub fn order_asc(self, field: impl Into<String>) -> Self {
        self.order_by(field, SortDir::Asc)
    }

    pub fn order_desc(self, field: impl Into<String>) -> Self {
        self.order_by(field, SortDir::Desc)
    }

    pub fn select(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn take(mut self, n: usize) -> Self {
        self.take = Some(n);
        self
    }

    /// Render as SQL text with positional `@pN` parameters.
    pub fn to_definition(&self) -> QueryDefinition {
        let mut text = String::from("SELECT ");
        if self.distinct {
            text.push_str("DISTINCT ");
        }
        if let Some(n) = self.take {
            let _ = write!(text, "TOP {n} ");
        }
        match &self.projection {
            Projection::All => text.push_str("*"),
            Projection::IdPartition => text.push_str("c.id, c.partitionKey"),
            Projection::Value(field) => {
                let _ = write!(text, "VALUE c.{field}");
            }
            Projection::Fields(fields) => {
                let cols: Vec<String> = fields.iter().map(|f| format!("c.{f}")).collect();
                text.push_str(&cols.join(", "));
            }
        }
        text.push_str(" FROM c");

        let mut parameters = Vec::new();
        if let Some(filter) = &self.filter {
            text.push_str(" WHERE ");
            filter.render(&mut text, &mut parameters);
        }
        if !self.order_by.is_empty() {
            let keys: Vec<String> = self
                .order_by
                .iter()
                .map(|k| match k.dir {
                    SortDir::Asc => format!("c.{} ASC", k.field),
                    SortDir::Desc => format!("c.{} DESC", k.field),
                })
                .collect();
            let _ = write!(text, " ORDER BY {}", keys.join(", "));
        }

        QueryDefinition { text, parameters }
    }
}

/// Input accepted by every list operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum QuerySpec {
    Text(QueryDefinition),
    Builder(Query),
}

impl QuerySpec {
    /// Query text with parameters inlined, for logs.
    pub fn log_text(&self) -> String {
        match self {
            QuerySpec::Text(def) => def.to_log_text(),
            QuerySpec::Builder(query) => query.to_definition().to_log_text(),
        }
    }
}

impl From<Query> for QuerySpec {
    fn from(query: Query) -> Self {
        QuerySpec::Builder(query)
    }
}

impl From<QueryDefinition> for QuerySpec {
    fn from(def: QueryDefinition) -> Self {
        QuerySpec::Text(def)
    }
}

impl From<&str> for QuerySpec {
    fn from(text: &str) -> Self {
        QuerySpec::Text(QueryDefinition::new(text))
    }
}

impl From<String> for QuerySpec {
    fn from(text: String) -> Self {
        QuerySpec::Text(QueryDefinition::new(text))
    }
}
