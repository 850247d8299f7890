use serde_json::{json, Value};

use super::error::StoreError;
use super::store::Row;
use crate::filter::{is_valid_identifier, FilterData, SortDirection};

/// A single list predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Equals(Value),
    /// Case-insensitive substring match.
    Contains(String),
}

/// Backend-neutral list query: equality and substring filters, ordering,
/// offset pagination and soft-delete visibility.
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub conditions: Vec<(String, Condition)>,
    pub include_inactive: bool,
    pub order: Vec<(String, SortDirection)>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((column.into(), Condition::Equals(value.into())));
        self
    }

    pub fn contains(mut self, column: impl Into<String>, needle: impl Into<String>) -> Self {
        self.conditions.push((column.into(), Condition::Contains(needle.into())));
        self
    }

    pub fn include_inactive(mut self, include: bool) -> Self {
        self.include_inactive = include;
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: SortDirection) -> Self {
        self.order.push((column.into(), direction));
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let columns = self.conditions.iter().map(|(c, _)| c).chain(self.order.iter().map(|(c, _)| c));
        for column in columns {
            if !is_valid_identifier(column) {
                return Err(StoreError::InvalidQuery(format!("invalid column '{}'", column)));
            }
        }
        if matches!(self.limit, Some(l) if l < 0) || matches!(self.offset, Some(o) if o < 0) {
            return Err(StoreError::InvalidQuery("limit and offset must be non-negative".to_string()));
        }
        Ok(())
    }

    /// Compiles into the filter language used by the SQL backend.
    pub fn to_filter_data(&self) -> FilterData {
        let clauses: Vec<Value> = self
            .conditions
            .iter()
            .map(|(column, condition)| match condition {
                Condition::Equals(value) => json!({ column.clone(): value }),
                Condition::Contains(needle) => {
                    json!({ column.clone(): { "$ilike": format!("%{}%", escape_like(needle)) } })
                }
            })
            .collect();

        let where_clause = match clauses.len() {
            0 => None,
            1 => clauses.into_iter().next(),
            _ => Some(json!({ "$and": clauses })),
        };

        let order = if self.order.is_empty() {
            None
        } else {
            let parts: Vec<String> = self
                .order
                .iter()
                .map(|(column, dir)| format!("{} {}", column, dir.to_sql().to_lowercase()))
                .collect();
            Some(Value::String(parts.join(", ")))
        };

        FilterData {
            where_clause,
            order,
            limit: self.limit,
            offset: self.offset,
            include_inactive: self.include_inactive,
        }
    }

    /// In-process evaluation used by the memory backend.
    pub fn matches(&self, row: &Row) -> bool {
        if !self.include_inactive && row.get("active") != Some(&Value::Bool(true)) {
            return false;
        }
        self.conditions.iter().all(|(column, condition)| {
            let actual = row.get(column).unwrap_or(&Value::Null);
            match condition {
                Condition::Equals(expected) => values_equal(actual, expected),
                Condition::Contains(needle) => match actual {
                    Value::String(s) => s.to_lowercase().contains(&needle.to_lowercase()),
                    Value::Null => false,
                    other => other.to_string().to_lowercase().contains(&needle.to_lowercase()),
                },
            }
        })
    }
}

fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Loose equality: numbers compare by value, and a string compares equal to a
/// number with the same textual form (query strings arrive untyped).
pub fn values_equal(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => a == b,
        },
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            s.parse::<f64>().ok().zip(n.as_f64()).map(|(a, b)| a == b).unwrap_or(false)
        }
        (a, b) => a == b,
    }
}

/// Ordering used by the memory backend for ORDER BY emulation.
pub fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn default_query_hides_inactive_rows() {
        let q = ListQuery::new();
        assert!(q.matches(&row(json!({ "active": true }))));
        assert!(!q.matches(&row(json!({ "active": false }))));
        assert!(ListQuery::new().include_inactive(true).matches(&row(json!({ "active": false }))));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let q = ListQuery::new().contains("description", "LAPTOP");
        assert!(q.matches(&row(json!({ "active": true, "description": "Dell laptop 14\"" }))));
        assert!(!q.matches(&row(json!({ "active": true, "description": null }))));
    }

    #[test]
    fn equality_accepts_untyped_numbers() {
        let q = ListQuery::new().eq("id_brand", "4");
        assert!(q.matches(&row(json!({ "active": true, "id_brand": 4 }))));
    }

    #[test]
    fn compiles_to_filter_data() {
        let data = ListQuery::new()
            .eq("id_brand", 4)
            .contains("description", "50%")
            .order_by("folio", SortDirection::Desc)
            .page(10, 0)
            .to_filter_data();
        assert_eq!(
            data.where_clause,
            Some(json!({ "$and": [ { "id_brand": 4 }, { "description": { "$ilike": "%50\\%%" } } ] }))
        );
        assert_eq!(data.order, Some(json!("folio desc")));
        assert_eq!(data.limit, Some(10));
        assert!(!data.include_inactive);
    }

    #[test]
    fn rejects_bad_columns() {
        assert!(ListQuery::new().eq("x; drop", 1).validate().is_err());
        assert!(ListQuery::new().page(-1, 0).validate().is_err());
    }
}
