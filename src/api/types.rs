//! Wire-format normalization for the inventory backend.
//!
//! The backend has shipped list responses in three envelope shapes over time.
//! All shape handling lives here, in one adapter that fails loudly on
//! anything unrecognized; no other module sniffs response bodies.

use serde_json::Value;

use super::model::{ListResource, PageInfo};
use crate::error::ClientError;

/// Accepted list envelopes:
/// 1. a bare top-level array
/// 2. `{ "data": [...], "meta": { pagination } }`
/// 3. `{ "data": { "data": [...], pagination-inline } }`
pub fn normalize_list_response(
  body: Value,
) -> Result<ListResource<Value>, ClientError> {
  let mut map = match body {
    // Shape 1: bare array
    Value::Array(items) => {
      let page = PageInfo::single_page(items.len());
      return Ok(ListResource { items, page });
    }
    Value::Object(map) => map,
    other => {
      return Err(ClientError::MalformedResponse(format!(
        "expected array or object, got {}",
        type_name(&other)
      )));
    }
  };

  let data = map
    .remove("data")
    .ok_or_else(|| ClientError::MalformedResponse("object without 'data' field".into()))?;

  match data {
    // Shape 2: data is the item array, pagination under "meta" (or absent)
    Value::Array(items) => {
      let page = map
        .get("meta")
        .and_then(parse_page_info)
        .unwrap_or_else(|| PageInfo::single_page(items.len()));
      Ok(ListResource { items, page })
    }
    // Shape 3: data is itself a paginator with a nested "data" array
    Value::Object(mut inner) => {
      let items = match inner.remove("data") {
        Some(Value::Array(items)) => items,
        _ => {
          return Err(ClientError::MalformedResponse(
            "'data' object without nested 'data' array".into(),
          ));
        }
      };
      let page = parse_page_info(&Value::Object(inner))
        .unwrap_or_else(|| PageInfo::single_page(items.len()));
      Ok(ListResource { items, page })
    }
    other => Err(ClientError::MalformedResponse(format!(
      "'data' field is {}, expected array or object",
      type_name(&other)
    ))),
  }
}

/// Unwrap a single-entity response: either the bare object or `{ "data": {...} }`.
pub fn normalize_entity_response(body: Value) -> Result<Value, ClientError> {
  match body {
    Value::Object(ref map) if map.contains_key("data") => {
      let data = map.get("data").cloned().unwrap_or(Value::Null);
      if data.is_object() {
        Ok(data)
      } else {
        Err(ClientError::MalformedResponse(
          "'data' field is not an object".into(),
        ))
      }
    }
    Value::Object(_) => Ok(body),
    other => Err(ClientError::MalformedResponse(format!(
      "expected object, got {}",
      type_name(&other)
    ))),
  }
}

fn parse_page_info(value: &Value) -> Option<PageInfo> {
  let current_page = value.get("current_page")?.as_u64()? as u32;
  let total_pages = value
    .get("last_page")
    .or_else(|| value.get("total_pages"))?
    .as_u64()? as u32;
  let per_page = value.get("per_page")?.as_u64()? as u32;
  let total = value.get("total")?.as_u64()?;

  Some(PageInfo {
    current_page,
    total_pages,
    per_page,
    total,
  })
}

fn type_name(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a bool",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}
