// SPDX-License-Identifier: MPL-2.0

use serde_json::Value;
use std::cmp::Ordering;

/// Equality-style predicates; the store has no join primitive.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    IsNull(String),
}

impl Filter {
    fn column(&self) -> &str {
        match self {
            Filter::Eq(c, _) | Filter::In(c, _) | Filter::IsNull(c) => c,
        }
    }

    fn matches(&self, row: &Value) -> bool {
        let field = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(_, v) => field == v,
            Filter::In(_, vs) => vs.iter().any(|v| v == field),
            Filter::IsNull(_) => field.is_null(),
        }
    }

    /// PostgREST operator syntax, e.g. `eq.abc` or `in.("a","b")`
    fn to_param(&self) -> (String, String) {
        let value = match self {
            Filter::Eq(_, v) => format!("eq.{}", scalar(v)),
            Filter::In(_, vs) => {
                let items: Vec<String> = vs.iter().map(quoted).collect();
                format!("in.({})", items.join(","))
            }
            Filter::IsNull(_) => "is.null".to_string(),
        };
        (self.column().to_string(), value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// Filter, ordering and limit for a single-table request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<Filter>,
    order: Option<Order>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.to_string(), value.into()));
        self
    }

    pub fn in_list<I, V>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.filters.push(Filter::In(column.to_string(), values));
        self
    }

    pub fn is_null(mut self, column: &str) -> Self {
        self.filters.push(Filter::IsNull(column.to_string()));
        self
    }

    pub fn order_by(mut self, column: &str, ascending: bool) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending,
        });
        self
    }

    /// Reverse-chronological on `created_at`.
    pub fn newest_first(self) -> Self {
        self.order_by("created_at", false)
    }

    pub fn oldest_first(self) -> Self {
        self.order_by("created_at", true)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn order(&self) -> Option<&Order> {
        self.order.as_ref()
    }

    pub fn limit_value(&self) -> Option<usize> {
        self.limit
    }

    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    /// True if an `in` filter has nothing to match, so the request can be skipped.
    pub fn is_trivially_empty(&self) -> bool {
        self.filters
            .iter()
            .any(|f| matches!(f, Filter::In(_, vs) if vs.is_empty()))
    }

    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Evaluate the query against an in-memory table.
    pub fn apply(&self, rows: &[Value]) -> Vec<Value> {
        let mut out: Vec<Value> = rows.iter().filter(|r| self.matches(r)).cloned().collect();

        if let Some(order) = &self.order {
            out.sort_by(|a, b| {
                let ord = compare(
                    a.get(&order.column).unwrap_or(&Value::Null),
                    b.get(&order.column).unwrap_or(&Value::Null),
                );
                if order.ascending { ord } else { ord.reverse() }
            });
        }

        if let Some(limit) = self.limit {
            out.truncate(limit);
        }
        out
    }

    /// Query-string pairs for a PostgREST endpoint.
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> =
            self.filters.iter().map(Filter::to_param).collect();

        if let Some(order) = &self.order {
            let dir = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, dir)));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}

fn scalar(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

fn quoted(v: &Value) -> String {
    match v {
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        other => scalar(other),
    }
}

/// Postgres ordering: NULLs sort after every value ascending.
fn compare(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}
