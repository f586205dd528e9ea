/// Collection queries: equality / array-membership filters, ordering, limits
use super::Document;
use serde_json::Value;
use std::cmp::Ordering;

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Field equals value (arrays compare element-wise, in order)
    Eq(String, Value),
    /// Field is an array containing value
    ArrayContains(String, Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Keep the first N documents in query order
    First(usize),
    /// Keep the last N documents, still returned in query order
    Last(usize),
}

/// Query over the documents of one collection path
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub path: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<Limit>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter::Eq(field.into(), value));
        self
    }

    pub fn where_array_contains(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filters.push(Filter::ArrayContains(field.into(), value));
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(Limit::First(n));
        self
    }

    pub fn limit_to_last(mut self, n: usize) -> Self {
        self.limit = Some(Limit::Last(n));
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let filtered = self.filters.iter().all(|f| match f {
            Filter::Eq(name, expected) => field(&doc.data, name) == Some(expected),
            Filter::ArrayContains(name, needle) => matches!(
                field(&doc.data, name),
                Some(Value::Array(items)) if items.contains(needle)
            ),
        });
        // Documents without the ordering field never match an ordered query
        let ordered = match &self.order_by {
            Some((name, _)) => field(&doc.data, name).is_some(),
            None => true,
        };
        filtered && ordered
    }

    /// Filter, sort and cut a collection scan down to the query result
    pub fn apply(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();

        match &self.order_by {
            Some((name, direction)) => out.sort_by(|a, b| {
                let ord = compare_values(
                    field(&a.data, name).unwrap_or(&Value::Null),
                    field(&b.data, name).unwrap_or(&Value::Null),
                );
                let ord = match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                };
                ord.then(a.seq.cmp(&b.seq))
            }),
            None => out.sort_by_key(|d| d.seq),
        }

        match self.limit {
            Some(Limit::First(n)) => out.truncate(n),
            Some(Limit::Last(n)) if out.len() > n => {
                let excess = out.len() - n;
                out.drain(..excess);
            }
            _ => {}
        }
        out
    }
}

/// Look up a dotted field path ("lastMessage.createdAt")
pub fn field<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(data, |value, segment| value.get(segment))
}

/// Total order over JSON values: null < bool < number < string < array < object
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .unwrap_or(0.0)
                .partial_cmp(&y.as_f64().unwrap_or(0.0))
                .unwrap_or(Ordering::Equal),
        },
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
