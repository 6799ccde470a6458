//! Evaluation of native query expressions against JSON documents.

use chrono::{DateTime, FixedOffset};
use serde_json::{Map, Value};
use std::cmp::Ordering;

use docrepo_core::{CompareOperator, Expr, OrderKey, Projection, SortDir};

/// Resolve a dotted field path. Missing fields are `None`, not `Null`.
pub(crate) fn lookup<'a>(doc: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(doc, |cur, segment| cur.get(segment))
}

pub(crate) fn matches(expr: &Expr, doc: &Value) -> bool {
    match expr {
        Expr::And(a, b) => matches(a, doc) && matches(b, doc),
        Expr::Or(a, b) => matches(a, doc) || matches(b, doc),
        Expr::Not(inner) => !matches(inner, doc),
        Expr::Compare(field, op, expected) => match lookup(doc, field) {
            Some(actual) => compare_holds(actual, *op, expected),
            None => false,
        },
        Expr::In(field, values) => match lookup(doc, field) {
            Some(actual) => values.iter().any(|v| values_equal(actual, v)),
            None => false,
        },
        Expr::IsDefined(field) => lookup(doc, field).is_some(),
    }
}

fn compare_holds(actual: &Value, op: CompareOperator, expected: &Value) -> bool {
    match op {
        CompareOperator::Eq => values_equal(actual, expected),
        CompareOperator::Ne => !values_equal(actual, expected),
        ordering_op => match compare_scalars(actual, expected) {
            Some(ord) => match ordering_op {
                CompareOperator::Gt => ord == Ordering::Greater,
                CompareOperator::Ge => ord != Ordering::Less,
                CompareOperator::Lt => ord == Ordering::Less,
                CompareOperator::Le => ord != Ordering::Greater,
                CompareOperator::Eq | CompareOperator::Ne => false,
            },
            None => false,
        },
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match compare_scalars(a, b) {
        Some(ord) => ord == Ordering::Equal,
        None => a == b,
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok()
}

/// Order two scalars of the same kind. RFC 3339 strings compare as instants.
fn compare_scalars(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => match (parse_datetime(x), parse_datetime(y)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(x.cmp(y)),
        },
        _ => None,
    }
}

fn type_rank(v: Option<&Value>) -> u8 {
    match v {
        None => 0,
        Some(Value::Null) => 1,
        Some(Value::Bool(_)) => 2,
        Some(Value::Number(_)) => 3,
        Some(Value::String(_)) => 4,
        Some(Value::Array(_)) => 5,
        Some(Value::Object(_)) => 6,
    }
}

fn order_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let by_rank = type_rank(a).cmp(&type_rank(b));
    if by_rank != Ordering::Equal {
        return by_rank;
    }
    match (a, b) {
        (Some(a), Some(b)) => compare_scalars(a, b).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

/// Sort key of a row under `keys`: one slot per order key, then the
/// partition key and id as a tiebreak. Each slot wraps the field value in an
/// array so a missing field stays distinct from `null` once serialized into
/// a continuation token.
pub(crate) fn sort_key(keys: &[OrderKey], doc: &Value) -> Vec<Value> {
    let mut out: Vec<Value> = keys
        .iter()
        .map(|k| Value::Array(lookup(doc, &k.field).cloned().into_iter().collect()))
        .collect();
    out.push(doc.get("partitionKey").cloned().unwrap_or(Value::Null));
    out.push(doc.get("id").cloned().unwrap_or(Value::Null));
    out
}

fn slot(key: &[Value], idx: usize) -> Option<&Value> {
    key.get(idx).and_then(Value::as_array).and_then(|v| v.first())
}

pub(crate) fn compare_sort_keys(keys: &[OrderKey], a: &[Value], b: &[Value]) -> Ordering {
    for (idx, key) in keys.iter().enumerate() {
        let ord = order_values(slot(a, idx), slot(b, idx));
        let ord = match key.dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    let tail = keys.len();
    order_values(a.get(tail), b.get(tail))
        .then_with(|| order_values(a.get(tail + 1), b.get(tail + 1)))
}

/// Shape a matching document into a result row. `None` drops the row.
pub(crate) fn project(projection: &Projection, doc: &Value) -> Option<Value> {
    match projection {
        Projection::All => Some(doc.clone()),
        Projection::IdPartition => Some(select_fields(doc, ["id", "partitionKey"])),
        Projection::Value(field) => lookup(doc, field).cloned(),
        Projection::Fields(fields) => Some(select_fields(doc, fields.iter().map(String::as_str))),
    }
}

fn select_fields<'a>(doc: &Value, fields: impl IntoIterator<Item = &'a str>) -> Value {
    let mut out = Map::new();
    for field in fields {
        if let Some(v) = lookup(doc, field) {
            let name = field.rsplit('.').next().unwrap_or(field);
            out.insert(name.to_string(), v.clone());
        }
    }
    Value::Object(out)
}
