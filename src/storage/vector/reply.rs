//! Typed decoding of `RediSearch` replies.
//!
//! `FT.SEARCH` answers in one of two shapes depending on the protocol the
//! connection negotiated:
//!
//! | Protocol | Shape |
//! |----------|-------|
//! | RESP2 | `[total, key, [field, value, ...], key, [...], ...]` |
//! | RESP3 | `{total_results, results: [{id, extra_attributes: {field: value}}]}` |
//!
//! Both decode into one [`SearchReply`]. Anything else is a
//! [`ReplyShapeError`], which callers surface as a store failure rather than
//! treating it as "no candidates".

use crate::Error;
use redis::Value;

/// Field name the KNN score is returned under.
pub const SCORE_FIELD: &str = "score";

/// A decoding failure for a `RediSearch` reply.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ReplyShapeError {
    /// The reply does not have any recognized layout.
    #[error("unexpected reply shape: {0}")]
    UnexpectedShape(String),
    /// A hit carries no usable score.
    #[error("missing or malformed score for key '{0}'")]
    BadScore(String),
}

impl From<ReplyShapeError> for Error {
    fn from(err: ReplyShapeError) -> Self {
        Self::store("knn_query", err)
    }
}

/// One search hit: the full Redis key and its distance.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    /// Redis key, including the scheme prefix.
    pub key: String,
    /// Distance under the index metric.
    pub score: f32,
}

/// Decoded `FT.SEARCH` reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchReply {
    /// Total matches reported by the server.
    pub total: usize,
    /// Returned hits, in server order.
    pub hits: Vec<SearchHit>,
}

impl SearchReply {
    /// Decodes a RESP2 or RESP3 search reply.
    ///
    /// # Errors
    ///
    /// Returns [`ReplyShapeError`] for any other layout.
    pub fn decode(value: &Value) -> Result<Self, ReplyShapeError> {
        match value {
            Value::Array(items) => Self::decode_resp2(items),
            Value::Map(entries) => Self::decode_resp3(entries),
            other => Err(ReplyShapeError::UnexpectedShape(format!(
                "top level is {}",
                kind(other)
            ))),
        }
    }

    fn decode_resp2(items: &[Value]) -> Result<Self, ReplyShapeError> {
        let Some((total, rest)) = items.split_first() else {
            return Err(ReplyShapeError::UnexpectedShape("empty array".to_string()));
        };
        let total = as_count(total)
            .ok_or_else(|| ReplyShapeError::UnexpectedShape("total is not a count".to_string()))?;

        if rest.len() % 2 != 0 {
            return Err(ReplyShapeError::UnexpectedShape(
                "unpaired key/fields entries".to_string(),
            ));
        }

        let hits = rest
            .chunks_exact(2)
            .map(|pair| {
                let key = as_string(&pair[0]).ok_or_else(|| {
                    ReplyShapeError::UnexpectedShape("document key is not a string".to_string())
                })?;
                let Value::Array(fields) = &pair[1] else {
                    return Err(ReplyShapeError::UnexpectedShape(format!(
                        "fields of '{key}' are {}",
                        kind(&pair[1])
                    )));
                };
                let score = field_in_pairs(fields, SCORE_FIELD)
                    .and_then(as_score)
                    .ok_or_else(|| ReplyShapeError::BadScore(key.clone()))?;
                Ok(SearchHit { key, score })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { total, hits })
    }

    fn decode_resp3(entries: &[(Value, Value)]) -> Result<Self, ReplyShapeError> {
        let total = map_get(entries, "total_results")
            .and_then(as_count)
            .ok_or_else(|| ReplyShapeError::UnexpectedShape("missing total_results".to_string()))?;

        let results = match map_get(entries, "results") {
            Some(Value::Array(results)) => results.as_slice(),
            Some(other) => {
                return Err(ReplyShapeError::UnexpectedShape(format!(
                    "results is {}",
                    kind(other)
                )));
            },
            None => &[],
        };

        let hits = results
            .iter()
            .map(|result| {
                let Value::Map(doc) = result else {
                    return Err(ReplyShapeError::UnexpectedShape(format!(
                        "result is {}",
                        kind(result)
                    )));
                };
                let key = map_get(doc, "id").and_then(as_string).ok_or_else(|| {
                    ReplyShapeError::UnexpectedShape("result without id".to_string())
                })?;
                let score = match map_get(doc, "extra_attributes") {
                    Some(Value::Map(attrs)) => map_get(attrs, SCORE_FIELD).and_then(as_score),
                    Some(Value::Array(attrs)) => field_in_pairs(attrs, SCORE_FIELD).and_then(as_score),
                    _ => None,
                }
                .ok_or_else(|| ReplyShapeError::BadScore(key.clone()))?;
                Ok(SearchHit { key, score })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { total, hits })
    }
}

/// Extracts `num_docs` from an `FT.INFO` reply.
///
/// # Errors
///
/// Returns [`ReplyShapeError::UnexpectedShape`] if the field is absent.
pub fn info_num_docs(value: &Value) -> Result<usize, ReplyShapeError> {
    let found = match value {
        Value::Array(items) => field_in_pairs(items, "num_docs"),
        Value::Map(entries) => map_get(entries, "num_docs"),
        _ => None,
    };
    found
        .and_then(as_count)
        .ok_or_else(|| ReplyShapeError::UnexpectedShape("FT.INFO without num_docs".to_string()))
}

fn field_in_pairs<'a>(items: &'a [Value], name: &str) -> Option<&'a Value> {
    items
        .chunks_exact(2)
        .find(|pair| as_string(&pair[0]).is_some_and(|k| k == name))
        .map(|pair| &pair[1])
}

fn map_get<'a>(entries: &'a [(Value, Value)], name: &str) -> Option<&'a Value> {
    entries
        .iter()
        .find(|(k, _)| as_string(k).is_some_and(|k| k == name))
        .map(|(_, v)| v)
}

fn as_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::SimpleString(s) => Some(s.clone()),
        Value::VerbatimString { text, .. } => Some(text.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn as_count(value: &Value) -> Option<usize> {
    match value {
        Value::Int(i) => usize::try_from(*i).ok(),
        Value::Double(d) if *d >= 0.0 => Some(*d as usize),
        other => as_string(other).and_then(|s| s.trim().parse::<f64>().ok()).and_then(|d| {
            (d >= 0.0).then_some(d as usize)
        }),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn as_score(value: &Value) -> Option<f32> {
    let score = match value {
        Value::Double(d) => *d as f32,
        other => as_string(other)?.trim().parse::<f32>().ok()?,
    };
    score.is_finite().then_some(score)
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Int(_) => "integer",
        Value::BulkString(_) | Value::SimpleString(_) | Value::VerbatimString { .. } => "string",
        Value::Array(_) => "array",
        Value::Map(_) => "map",
        Value::Double(_) => "double",
        _ => "other",
    }
}
