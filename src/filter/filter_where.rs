use serde_json::Value;

use super::error::FilterError;
use super::is_valid_identifier;
use super::types::{FilterOp, FilterWhereInfo, FilterWhereOptions};

pub struct FilterWhere {
    param_values: Vec<Value>,
    param_index: usize,
    conditions: Vec<FilterWhereInfo>,
}

impl FilterWhere {
    pub fn new(starting_param_index: usize) -> Self {
        Self {
            param_values: vec![],
            param_index: starting_param_index,
            conditions: vec![],
        }
    }

    pub fn generate(where_data: &Value, starting_param_index: usize, options: &FilterWhereOptions) -> Result<(String, Vec<Value>), FilterError> {
        let mut filter_where = Self::new(starting_param_index);
        filter_where.build(where_data, options)
    }

    pub fn generate_empty(options: &FilterWhereOptions) -> (String, Vec<Value>) {
        let where_clause = Self::visibility(options).unwrap_or_default();
        (where_clause, vec![])
    }

    pub fn validate(where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null | Value::Object(_) => Ok(()),
            _ => Err(FilterError::InvalidWhereClause("WHERE must be an object".to_string())),
        }
    }

    fn visibility(options: &FilterWhereOptions) -> Option<String> {
        if options.include_inactive {
            None
        } else {
            Some("\"active\" = true".to_string())
        }
    }

    fn build(&mut self, where_data: &Value, options: &FilterWhereOptions) -> Result<(String, Vec<Value>), FilterError> {
        self.param_values.clear();
        self.conditions.clear();

        self.parse_where_data(where_data)?;

        let mut sql_conditions = vec![];
        if let Some(visibility) = Self::visibility(options) { sql_conditions.push(visibility); }
        let conditions_snapshot = self.conditions.clone();
        for condition in &conditions_snapshot {
            sql_conditions.push(self.build_sql_condition(condition)?);
        }
        let where_clause = if sql_conditions.is_empty() { "1=1".to_string() } else { sql_conditions.join(" AND ") };
        Ok((where_clause, self.param_values.clone()))
    }

    fn parse_where_data(&mut self, where_data: &Value) -> Result<(), FilterError> {
        match where_data {
            Value::Null => Ok(()),
            Value::Object(obj) => {
                for (key, value) in obj {
                    if key.starts_with('$') {
                        self.parse_logical_operator(key, value)?;
                    } else {
                        self.parse_field_condition(key, value)?;
                    }
                }
                Ok(())
            }
            _ => Err(FilterError::InvalidWhereClause("Unsupported WHERE format".to_string())),
        }
    }

    fn parse_logical_operator(&mut self, op: &str, value: &Value) -> Result<(), FilterError> {
        if op != "$and" {
            return Err(FilterError::UnsupportedOperator(op.to_string()));
        }
        let arr = value.as_array().ok_or_else(|| FilterError::InvalidOperatorData("$and requires an array".to_string()))?;
        let mut sql_parts = Vec::new();
        for v in arr {
            let (sql, params) = Self::generate(v, self.param_index, &FilterWhereOptions::nested())?;
            self.param_index += params.len();
            self.param_values.extend(params);
            sql_parts.push(format!("({})", sql));
        }
        if !sql_parts.is_empty() {
            self.conditions.push(FilterWhereInfo { column: format!("({})", sql_parts.join(" AND ")), operator: FilterOp::Raw, data: Value::Null });
        }
        Ok(())
    }

    fn parse_field_condition(&mut self, field: &str, value: &Value) -> Result<(), FilterError> {
        if !is_valid_identifier(field) {
            return Err(FilterError::InvalidColumn(field.to_string()));
        }
        if let Value::Object(obj) = value {
            for (op_key, op_val) in obj {
                let operator = Self::map_operator(op_key)?;
                self.conditions.push(FilterWhereInfo { column: field.to_string(), operator, data: op_val.clone() });
            }
        } else {
            // Implicit equality: { field: value }
            self.conditions.push(FilterWhereInfo { column: field.to_string(), operator: FilterOp::Eq, data: value.clone() });
        }
        Ok(())
    }

    fn map_operator(op_key: &str) -> Result<FilterOp, FilterError> {
        match op_key {
            "$eq" => Ok(FilterOp::Eq),
            "$ilike" => Ok(FilterOp::ILike),
            other => Err(FilterError::UnsupportedOperator(other.to_string())),
        }
    }

    fn build_sql_condition(&mut self, condition: &FilterWhereInfo) -> Result<String, FilterError> {
        let quoted_column = format!("\"{}\"", condition.column);
        let data = condition.data.clone();
        match condition.operator {
            FilterOp::Raw => Ok(condition.column.clone()),
            FilterOp::Eq if data.is_null() => Ok(format!("{} IS NULL", quoted_column)),
            FilterOp::Eq => Ok(format!("{} = {}", quoted_column, self.param(data))),
            FilterOp::ILike => match data {
                Value::String(_) => Ok(format!("{}::text ILIKE {}", quoted_column, self.param(data))),
                _ => Err(FilterError::InvalidOperatorData("$ilike requires a string pattern".to_string())),
            },
        }
    }

    fn param(&mut self, value: Value) -> String {
        self.param_values.push(value);
        self.param_index += 1;
        format!("${}", self.param_index)
    }
}
