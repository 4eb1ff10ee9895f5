use regex::Regex;
use serde_json::Value;
use std::cmp::Ordering;

/// Metadata filter supporting comparisons, set membership, regex and
/// boolean composition. Parsed once per query, then evaluated per record.
#[derive(Debug, Clone)]
pub struct MetadataFilter {
    conditions: Vec<FilterCondition>,
    operator: BooleanOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOperator {
    And,
    Or,
}

#[derive(Debug, Clone)]
pub enum FilterCondition {
    Equals { field: String, value: Value },
    NotEquals { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    NotIn { field: String, values: Vec<Value> },
    Compare { field: String, op: CompareOp, bound: f64 },
    Contains { field: String, needle: Value },
    Regex { field: String, regex: Regex },
    Exists { field: String, present: bool },
    Nested(MetadataFilter),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    fn holds(self, ord: Ordering) -> bool {
        match self {
            CompareOp::Gt => ord == Ordering::Greater,
            CompareOp::Gte => ord != Ordering::Less,
            CompareOp::Lt => ord == Ordering::Less,
            CompareOp::Lte => ord != Ordering::Greater,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("filter must be a JSON object")]
    NotAnObject,
    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),
    #[error("{op} requires {expected}")]
    InvalidOperand { op: String, expected: &'static str },
    #[error("invalid regex for field {field}: {reason}")]
    InvalidRegex { field: String, reason: String },
    #[error("invalid filter condition for field: {0}")]
    InvalidCondition(String),
}

impl MetadataFilter {
    pub fn new() -> Self {
        Self {
            conditions: Vec::new(),
            operator: BooleanOperator::And,
        }
    }

    pub fn and() -> Self {
        Self::new()
    }

    pub fn or() -> Self {
        Self {
            conditions: Vec::new(),
            operator: BooleanOperator::Or,
        }
    }

    pub fn equals(mut self, field: impl Into<String>, value: Value) -> Self {
        self.conditions.push(FilterCondition::Equals {
            field: field.into(),
            value,
        });
        self
    }

    pub fn with(mut self, condition: FilterCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Parse the JSON filter language, e.g.
    /// `{"category": "tech", "score": {"$gte": 0.5}, "$or": [{..}, {..}]}`.
    pub fn parse(value: &Value) -> Result<Self, FilterError> {
        let map = value.as_object().ok_or(FilterError::NotAnObject)?;
        let mut filter = MetadataFilter::new();

        for (key, condition) in map {
            match key.as_str() {
                "$and" | "$or" => {
                    let items = condition.as_array().ok_or_else(|| FilterError::InvalidOperand {
                        op: key.clone(),
                        expected: "an array of filters",
                    })?;
                    if items.is_empty() {
                        return Err(FilterError::InvalidOperand {
                            op: key.clone(),
                            expected: "a non-empty array of filters",
                        });
                    }
                    let mut group = if key == "$and" {
                        MetadataFilter::and()
                    } else {
                        MetadataFilter::or()
                    };
                    for item in items {
                        group = group.with(FilterCondition::Nested(MetadataFilter::parse(item)?));
                    }
                    filter = filter.with(FilterCondition::Nested(group));
                }
                op if op.starts_with('$') => {
                    return Err(FilterError::UnknownOperator(op.to_string()));
                }
                field => {
                    for cond in parse_field(field, condition)? {
                        filter = filter.with(cond);
                    }
                }
            }
        }

        Ok(filter)
    }

    /// Apply filter to metadata and return whether it matches
    pub fn matches(&self, metadata: &Value) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        let mut results = self
            .conditions
            .iter()
            .map(|condition| evaluate(condition, metadata));
        match self.operator {
            BooleanOperator::And => results.all(|x| x),
            BooleanOperator::Or => results.any(|x| x),
        }
    }

    /// Same as [`MetadataFilter::matches`] for an already-split metadata map.
    pub fn matches_map(&self, metadata: &serde_json::Map<String, Value>) -> bool {
        if self.conditions.is_empty() {
            return true;
        }
        // Avoid cloning: evaluate against a borrowed object view.
        let mut results = self
            .conditions
            .iter()
            .map(|condition| evaluate_in_map(condition, metadata));
        match self.operator {
            BooleanOperator::And => results.all(|x| x),
            BooleanOperator::Or => results.any(|x| x),
        }
    }
}

impl Default for MetadataFilter {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_field(field: &str, condition: &Value) -> Result<Vec<FilterCondition>, FilterError> {
    let field_name = || field.to_string();
    match condition {
        Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => {
            Ok(vec![FilterCondition::Equals {
                field: field_name(),
                value: condition.clone(),
            }])
        }
        Value::Object(ops) if !ops.is_empty() && ops.keys().all(|k| k.starts_with('$')) => {
            let mut out = Vec::with_capacity(ops.len());
            for (op, val) in ops {
                let cond = match op.as_str() {
                    "$eq" => FilterCondition::Equals {
                        field: field_name(),
                        value: val.clone(),
                    },
                    "$ne" => FilterCondition::NotEquals {
                        field: field_name(),
                        value: val.clone(),
                    },
                    "$in" | "$nin" => {
                        let values = val
                            .as_array()
                            .ok_or_else(|| FilterError::InvalidOperand {
                                op: op.clone(),
                                expected: "an array value",
                            })?
                            .clone();
                        if op == "$in" {
                            FilterCondition::In {
                                field: field_name(),
                                values,
                            }
                        } else {
                            FilterCondition::NotIn {
                                field: field_name(),
                                values,
                            }
                        }
                    }
                    "$gt" | "$gte" | "$lt" | "$lte" => {
                        let bound = val.as_f64().ok_or_else(|| FilterError::InvalidOperand {
                            op: op.clone(),
                            expected: "a numeric value",
                        })?;
                        let cmp = match op.as_str() {
                            "$gt" => CompareOp::Gt,
                            "$gte" => CompareOp::Gte,
                            "$lt" => CompareOp::Lt,
                            _ => CompareOp::Lte,
                        };
                        FilterCondition::Compare {
                            field: field_name(),
                            op: cmp,
                            bound,
                        }
                    }
                    "$contains" => FilterCondition::Contains {
                        field: field_name(),
                        needle: val.clone(),
                    },
                    "$regex" => {
                        let pattern = val.as_str().ok_or_else(|| FilterError::InvalidOperand {
                            op: op.clone(),
                            expected: "a string value",
                        })?;
                        let regex = Regex::new(pattern).map_err(|e| FilterError::InvalidRegex {
                            field: field_name(),
                            reason: e.to_string(),
                        })?;
                        FilterCondition::Regex {
                            field: field_name(),
                            regex,
                        }
                    }
                    "$exists" => {
                        let present = val.as_bool().ok_or_else(|| FilterError::InvalidOperand {
                            op: op.clone(),
                            expected: "a boolean value",
                        })?;
                        FilterCondition::Exists {
                            field: field_name(),
                            present,
                        }
                    }
                    other => return Err(FilterError::UnknownOperator(other.to_string())),
                };
                out.push(cond);
            }
            Ok(out)
        }
        _ => Err(FilterError::InvalidCondition(field_name())),
    }
}

fn evaluate(condition: &FilterCondition, metadata: &Value) -> bool {
    match condition {
        FilterCondition::Nested(inner) => inner.matches(metadata),
        other => check(other, |field| lookup(metadata, field)),
    }
}

fn evaluate_in_map(condition: &FilterCondition, metadata: &serde_json::Map<String, Value>) -> bool {
    match condition {
        FilterCondition::Nested(inner) => inner.matches_map(metadata),
        other => check(other, |field| lookup_in_map(metadata, field)),
    }
}

fn check<'a>(condition: &FilterCondition, get: impl Fn(&str) -> Option<&'a Value>) -> bool {
    match condition {
        FilterCondition::Equals { field, value } => get(field).is_some_and(|v| v == value),
        FilterCondition::NotEquals { field, value } => get(field).map_or(true, |v| v != value),
        FilterCondition::In { field, values } => get(field).is_some_and(|v| values.contains(v)),
        FilterCondition::NotIn { field, values } => {
            get(field).map_or(true, |v| !values.contains(v))
        }
        FilterCondition::Compare { field, op, bound } => get(field)
            .and_then(Value::as_f64)
            .and_then(|num| num.partial_cmp(bound))
            .is_some_and(|ord| op.holds(ord)),
        FilterCondition::Contains { field, needle } => match (get(field), needle) {
            (Some(Value::String(s)), Value::String(sub)) => s.contains(sub.as_str()),
            (Some(Value::Array(items)), needle) => items.contains(needle),
            _ => false,
        },
        FilterCondition::Regex { field, regex } => get(field)
            .and_then(Value::as_str)
            .is_some_and(|s| regex.is_match(s)),
        FilterCondition::Exists { field, present } => get(field).is_some() == *present,
        // Nested groups are handled by the callers.
        FilterCondition::Nested(_) => false,
    }
}

fn lookup<'a>(metadata: &'a Value, field: &str) -> Option<&'a Value> {
    field.split('.').try_fold(metadata, |current, part| current.get(part))
}

fn lookup_in_map<'a>(metadata: &'a serde_json::Map<String, Value>, field: &str) -> Option<&'a Value> {
    let mut parts = field.split('.');
    let first = metadata.get(parts.next()?)?;
    parts.try_fold(first, |current, part| current.get(part))
}
