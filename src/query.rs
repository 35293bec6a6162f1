//! Translation of the list query-string options (`where`, `sort`, `select`,
//! `skip`, `limit`, `count`) into a typed [`ListQuery`].
//!
//! The JSON embedded in `where`/`sort`/`select` is parsed once. Only a fixed
//! set of comparison operators is accepted and values are cast using the
//! collection schema, so `{"assignedUser": "<hex>"}` matches the stored
//! ObjectId the way the document store expects. A `ListQuery` renders to
//! MongoDB documents and can also be evaluated directly against documents
//! for the in-memory store.

use std::cmp::Ordering;

use mongodb::bson::{oid::ObjectId, Bson, DateTime, Document, Regex as BsonRegex};
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{ApiError, ApiResult};
use crate::models::{parse_timestamp, Collection};

pub const INVALID_JSON: &str = "Invalid JSON in query parameters";

/// Raw query-string options as they arrive on GET requests.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(rename = "where")]
    pub filter: Option<String>,
    pub sort: Option<String>,
    pub select: Option<String>,
    pub skip: Option<String>,
    pub limit: Option<String>,
    pub count: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Nin,
    Exists,
    Regex,
}

impl Operator {
    fn parse(key: &str) -> Option<Self> {
        Some(match key {
            "$eq" => Operator::Eq,
            "$ne" => Operator::Ne,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$in" => Operator::In,
            "$nin" => Operator::Nin,
            "$exists" => Operator::Exists,
            "$regex" => Operator::Regex,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "$eq",
            Operator::Ne => "$ne",
            Operator::Gt => "$gt",
            Operator::Gte => "$gte",
            Operator::Lt => "$lt",
            Operator::Lte => "$lte",
            Operator::In => "$in",
            Operator::Nin => "$nin",
            Operator::Exists => "$exists",
            Operator::Regex => "$regex",
        }
    }
}

/// One `field <operator> value` test. All conditions of a filter must hold.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Bson,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Bson>) -> Self {
        Condition {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    pub fn matches(&self, doc: &Document) -> bool {
        let actual = doc.get(&self.field);
        match self.operator {
            Operator::Eq => value_matches(actual, &self.value),
            Operator::Ne => !value_matches(actual, &self.value),
            Operator::Gt => compares(actual, &self.value, |o| o == Ordering::Greater),
            Operator::Gte => compares(actual, &self.value, |o| o != Ordering::Less),
            Operator::Lt => compares(actual, &self.value, |o| o == Ordering::Less),
            Operator::Lte => compares(actual, &self.value, |o| o != Ordering::Greater),
            Operator::In => in_list(actual, &self.value),
            Operator::Nin => !in_list(actual, &self.value),
            Operator::Exists => {
                let wanted = matches!(self.value, Bson::Boolean(true));
                actual.is_some() == wanted
            }
            Operator::Regex => match (&self.value, actual) {
                (Bson::RegularExpression(pattern), Some(value)) => regex_matches(pattern, value),
                _ => false,
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|condition| condition.matches(doc))
    }

    /// Renders the filter as a MongoDB query document. Conditions on the
    /// same field are combined with `$and` so none of them is overwritten.
    pub fn to_document(&self) -> Document {
        let mut clauses: Vec<Document> = Vec::new();
        for condition in &self.conditions {
            let mut operand = Document::new();
            operand.insert(condition.operator.as_str(), condition.value.clone());
            let mut clause = Document::new();
            clause.insert(condition.field.clone(), operand);
            clauses.push(clause);
        }
        match clauses.len() {
            0 => Document::new(),
            1 => clauses.remove(0),
            _ => {
                let mut doc = Document::new();
                doc.insert("$and", clauses);
                doc
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SortKey {
    pub field: String,
    pub order: SortOrder,
}

/// A `select` projection. Either every listed field (other than `_id`) is
/// included or every one is excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<(String, bool)>,
}

impl Projection {
    fn is_inclusive(&self) -> bool {
        match self.fields.iter().find(|(field, _)| field != "_id") {
            Some((_, include)) => *include,
            None => self.fields.iter().all(|(_, include)| *include),
        }
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        for (field, include) in &self.fields {
            doc.insert(field.clone(), if *include { 1_i32 } else { 0_i32 });
        }
        doc
    }

    pub fn apply(&self, doc: Document) -> Document {
        // `{}` selects whole documents
        if self.fields.is_empty() {
            return doc;
        }
        if self.is_inclusive() {
            let hide_id = self.fields.iter().any(|(f, include)| f == "_id" && !include);
            doc.into_iter()
                .filter(|(key, _)| {
                    if key == "_id" {
                        return !hide_id;
                    }
                    self.fields.iter().any(|(f, include)| f == key && *include)
                })
                .collect()
        } else {
            doc.into_iter()
                .filter(|(key, _)| !self.fields.iter().any(|(f, _)| f == key))
                .collect()
        }
    }
}

/// A parsed list request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListQuery {
    pub filter: Filter,
    pub sort: Vec<SortKey>,
    pub projection: Option<Projection>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub count: bool,
    limit_is_default: bool,
}

impl ListQuery {
    /// Parses raw options for `collection`. `default_limit` applies only when
    /// the request carries no `limit` of its own.
    pub fn parse(
        params: &ListParams,
        collection: Collection,
        default_limit: Option<i64>,
    ) -> ApiResult<Self> {
        let filter = match params.filter.as_deref() {
            Some(raw) => parse_filter(raw, collection)?,
            None => Filter::default(),
        };
        let sort = match params.sort.as_deref() {
            Some(raw) => parse_sort(raw)?,
            None => Vec::new(),
        };
        let projection = match params.select.as_deref() {
            Some(raw) => Some(parse_projection(raw)?),
            None => None,
        };
        let skip = match params.skip.as_deref() {
            Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                ApiError::bad_request(format!("skip must be a non-negative integer, got {:?}", raw))
            })?),
            None => None,
        };
        let (limit, limit_is_default) = match params.limit.as_deref() {
            Some(raw) => (
                Some(raw.trim().parse::<i64>().map_err(|_| {
                    ApiError::bad_request(format!("limit must be an integer, got {:?}", raw))
                })?),
                false,
            ),
            None => (default_limit, default_limit.is_some()),
        };
        let count = params.count.as_deref().map(str::trim) == Some("true");

        Ok(ListQuery {
            filter,
            sort,
            projection,
            skip,
            limit,
            count,
            limit_is_default,
        })
    }

    /// Narrows the query to a single document id.
    pub fn with_id(mut self, id: ObjectId) -> Self {
        self.filter.push(Condition::new("_id", Operator::Eq, id));
        self
    }

    pub fn sort_document(&self) -> Option<Document> {
        if self.sort.is_empty() {
            return None;
        }
        let mut doc = Document::new();
        for key in &self.sort {
            let direction = match key.order {
                SortOrder::Ascending => 1_i32,
                SortOrder::Descending => -1_i32,
            };
            doc.insert(key.field.clone(), direction);
        }
        Some(doc)
    }

    pub fn projection_document(&self) -> Option<Document> {
        self.projection.as_ref().map(Projection::to_document)
    }

    /// The limit a count honours: only an explicit one, never the list default.
    pub fn count_limit(&self) -> Option<u64> {
        if self.limit_is_default {
            return None;
        }
        self.limit.filter(|limit| *limit != 0).map(i64::unsigned_abs)
    }

    /// Runs the query over documents held in memory, in their natural order.
    pub fn evaluate(&self, docs: Vec<Document>) -> Vec<Document> {
        let mut matched: Vec<Document> = docs.into_iter().filter(|d| self.filter.matches(d)).collect();
        if !self.sort.is_empty() {
            matched.sort_by(|a, b| self.compare(a, b));
        }
        let skip = self.skip.unwrap_or(0) as usize;
        let take = match self.limit {
            Some(limit) if limit != 0 => limit.unsigned_abs() as usize,
            _ => usize::MAX,
        };
        matched
            .into_iter()
            .skip(skip)
            .take(take)
            .map(|doc| match &self.projection {
                Some(projection) => projection.apply(doc),
                None => doc,
            })
            .collect()
    }

    pub fn count_matching(&self, docs: &[Document]) -> u64 {
        let matched = docs.iter().filter(|d| self.filter.matches(d)).count() as u64;
        let after_skip = matched.saturating_sub(self.skip.unwrap_or(0));
        match self.count_limit() {
            Some(limit) => after_skip.min(limit),
            None => after_skip,
        }
    }

    fn compare(&self, a: &Document, b: &Document) -> Ordering {
        for key in &self.sort {
            let ordering = sort_compare(a.get(&key.field), b.get(&key.field));
            let ordering = match key.order {
                SortOrder::Ascending => ordering,
                SortOrder::Descending => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

fn parse_json_object(raw: &str) -> ApiResult<Map<String, Value>> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        _ => Err(ApiError::bad_request(INVALID_JSON)),
    }
}

fn parse_filter(raw: &str, collection: Collection) -> ApiResult<Filter> {
    let mut filter = Filter::default();
    for (field, spec) in parse_json_object(raw)? {
        if field.starts_with('$') {
            return Err(ApiError::bad_request(format!("Unsupported query operator {}", field)));
        }
        match spec {
            Value::Object(operators) if operators.keys().any(|k| k.starts_with('$')) => {
                let options = match operators.get("$options") {
                    Some(Value::String(options)) => options.clone(),
                    Some(_) => return Err(ApiError::bad_request("$options must be a string")),
                    None => String::new(),
                };
                if operators.contains_key("$options") && !operators.contains_key("$regex") {
                    return Err(ApiError::bad_request("$options needs a $regex"));
                }
                for (key, operand) in &operators {
                    if key == "$options" {
                        continue;
                    }
                    let operator = Operator::parse(key).ok_or_else(|| {
                        ApiError::bad_request(format!("Unsupported query operator {}", key))
                    })?;
                    let value = operand_value(collection, &field, operator, operand, &options)?;
                    filter.push(Condition::new(field.clone(), operator, value));
                }
            }
            other => {
                let value = cast_value(collection, &field, &other)?;
                filter.push(Condition::new(field, Operator::Eq, value));
            }
        }
    }
    Ok(filter)
}

fn operand_value(
    collection: Collection,
    field: &str,
    operator: Operator,
    operand: &Value,
    options: &str,
) -> ApiResult<Bson> {
    match operator {
        Operator::In | Operator::Nin => match operand {
            Value::Array(_) => cast_value(collection, field, operand),
            _ => Err(ApiError::bad_request(format!(
                "{} needs an array",
                operator.as_str()
            ))),
        },
        Operator::Exists => match operand {
            Value::Bool(flag) => Ok(Bson::Boolean(*flag)),
            Value::Number(n) => Ok(Bson::Boolean(n.as_f64().unwrap_or(0.0) != 0.0)),
            _ => Err(ApiError::bad_request("$exists needs a boolean")),
        },
        Operator::Regex => match operand {
            Value::String(pattern) => {
                let regex = BsonRegex {
                    pattern: pattern.clone(),
                    options: options.to_string(),
                };
                compile_regex(&regex)
                    .map_err(|e| ApiError::bad_request(format!("Invalid $regex: {}", e)))?;
                Ok(Bson::RegularExpression(regex))
            }
            _ => Err(ApiError::bad_request("$regex needs a string pattern")),
        },
        _ => cast_value(collection, field, operand),
    }
}

/// Converts a JSON value to BSON, casting ObjectId and date fields.
fn cast_value(collection: Collection, field: &str, value: &Value) -> ApiResult<Bson> {
    if let Value::Array(items) = value {
        return items
            .iter()
            .map(|item| cast_value(collection, field, item))
            .collect::<ApiResult<Vec<Bson>>>()
            .map(Bson::Array);
    }
    if collection.is_object_id_field(field) {
        if let Value::String(raw) = value {
            return ObjectId::parse_str(raw).map(Bson::ObjectId).map_err(|_| {
                ApiError::bad_request(format!(
                    "Cast to ObjectId failed for value {:?} at path {:?}",
                    raw, field
                ))
            });
        }
    }
    if collection.is_date_field(field) {
        match value {
            Value::String(raw) => {
                return parse_timestamp(raw).map(Bson::DateTime).ok_or_else(|| {
                    ApiError::bad_request(format!(
                        "Cast to date failed for value {:?} at path {:?}",
                        raw, field
                    ))
                })
            }
            Value::Number(n) => {
                if let Some(millis) = n.as_i64() {
                    return Ok(Bson::DateTime(DateTime::from_millis(millis)));
                }
            }
            _ => {}
        }
    }
    Ok(json_to_bson(value))
}

fn json_to_bson(value: &Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(flag) => Bson::Boolean(*flag),
        Value::Number(n) => match n.as_i64() {
            Some(int) => Bson::Int64(int),
            None => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Bson::String(s.clone()),
        Value::Array(items) => Bson::Array(items.iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(
            map.iter()
                .map(|(key, value)| (key.clone(), json_to_bson(value)))
                .collect(),
        ),
    }
}

fn parse_sort(raw: &str) -> ApiResult<Vec<SortKey>> {
    parse_json_object(raw)?
        .into_iter()
        .map(|(field, direction)| {
            let order = match &direction {
                Value::Number(n) if n.as_f64() == Some(1.0) => SortOrder::Ascending,
                Value::Number(n) if n.as_f64() == Some(-1.0) => SortOrder::Descending,
                Value::String(s) => match s.to_ascii_lowercase().as_str() {
                    "asc" | "ascending" => SortOrder::Ascending,
                    "desc" | "descending" => SortOrder::Descending,
                    _ => return Err(invalid_sort(&field, &direction)),
                },
                _ => return Err(invalid_sort(&field, &direction)),
            };
            Ok(SortKey { field, order })
        })
        .collect()
}

fn invalid_sort(field: &str, direction: &Value) -> ApiError {
    ApiError::bad_request(format!("Invalid sort order {} for {}", direction, field))
}

fn parse_projection(raw: &str) -> ApiResult<Projection> {
    let fields = parse_json_object(raw)?
        .into_iter()
        .map(|(field, flag)| {
            let include = match flag {
                Value::Bool(include) => include,
                Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
                other => {
                    return Err(ApiError::bad_request(format!(
                        "Invalid projection value {} for {}",
                        other, field
                    )))
                }
            };
            Ok((field, include))
        })
        .collect::<ApiResult<Vec<(String, bool)>>>()?;

    let mut modes = fields.iter().filter(|(f, _)| f != "_id").map(|(_, include)| *include);
    if let Some(first) = modes.next() {
        if modes.any(|include| include != first) {
            return Err(ApiError::bad_request(
                "Projection cannot mix inclusion and exclusion",
            ));
        }
    }
    Ok(Projection { fields })
}

fn compile_regex(pattern: &BsonRegex) -> Result<regex::Regex, String> {
    let mut builder = RegexBuilder::new(&pattern.pattern);
    for flag in pattern.options.chars() {
        match flag {
            'i' => builder.case_insensitive(true),
            'm' => builder.multi_line(true),
            's' => builder.dot_matches_new_line(true),
            'x' => builder.ignore_whitespace(true),
            other => return Err(format!("unsupported regex option {:?}", other)),
        };
    }
    builder.build().map_err(|e| e.to_string())
}

fn regex_matches(pattern: &BsonRegex, value: &Bson) -> bool {
    let Ok(regex) = compile_regex(pattern) else {
        return false;
    };
    match value {
        Bson::String(s) => regex.is_match(s),
        Bson::Array(items) => items
            .iter()
            .any(|item| matches!(item, Bson::String(s) if regex.is_match(s))),
        _ => false,
    }
}

/// Equality with array membership: `{"pendingTasks": id}` matches a user
/// whose array contains `id`, and a missing field equals `null`.
fn value_matches(actual: Option<&Bson>, expected: &Bson) -> bool {
    match actual {
        None => matches!(expected, Bson::Null),
        Some(Bson::Array(items)) if !matches!(expected, Bson::Array(_)) => {
            items.iter().any(|item| bson_eq(item, expected))
        }
        Some(value) => bson_eq(value, expected),
    }
}

fn in_list(actual: Option<&Bson>, list: &Bson) -> bool {
    match list {
        Bson::Array(candidates) => candidates.iter().any(|c| value_matches(actual, c)),
        _ => false,
    }
}

fn compares(actual: Option<&Bson>, expected: &Bson, accept: impl Fn(Ordering) -> bool) -> bool {
    match actual {
        Some(Bson::Array(items)) => items
            .iter()
            .any(|item| bson_cmp(item, expected).map(&accept).unwrap_or(false)),
        Some(value) => bson_cmp(value, expected).map(accept).unwrap_or(false),
        None => false,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(*n as f64),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn bson_eq(a: &Bson, b: &Bson) -> bool {
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Compares two values of the same kind; values of different kinds are
/// not comparable for `$gt`-style operators.
fn bson_cmp(a: &Bson, b: &Bson) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    match (a, b) {
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::DateTime(x), Bson::DateTime(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Rank of each kind in the store's cross-type sort order.
fn type_rank(value: Option<&Bson>) -> u8 {
    match value {
        None | Some(Bson::Null) => 0,
        Some(Bson::Int32(_)) | Some(Bson::Int64(_)) | Some(Bson::Double(_)) => 1,
        Some(Bson::String(_)) => 2,
        Some(Bson::Document(_)) => 3,
        Some(Bson::Array(_)) => 4,
        Some(Bson::ObjectId(_)) => 5,
        Some(Bson::Boolean(_)) => 6,
        Some(Bson::DateTime(_)) => 7,
        Some(_) => 8,
    }
}

fn sort_compare(a: Option<&Bson>, b: Option<&Bson>) -> Ordering {
    let (rank_a, rank_b) = (type_rank(a), type_rank(b));
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Some(x), Some(y)) => bson_cmp(x, y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
