//! HTTP client for the inventory backend.
//!
//! The narrow data-source surface: one list fetch, one entity fetch, one
//! mutation. Everything above this module works with normalized domain types
//! and the `ClientError` taxonomy.

use reqwest::StatusCode;
use serde_json::Value;
use url::Url;

use super::keys::{FilterExpr, ResourceKind};
use super::model::{Equipment, ListResource};
use super::types::{normalize_entity_response, normalize_list_response};
use crate::config::Config;
use crate::error::ClientError;

/// Inventory API client wrapper
#[derive(Clone)]
pub struct InventoryClient {
  http: reqwest::Client,
  base: Url,
  token: String,
}

impl InventoryClient {
  pub fn new(config: &Config) -> Result<Self, ClientError> {
    let token =
      Config::get_api_token().map_err(|e| ClientError::Config(e.to_string()))?;

    // A trailing slash makes Url::join treat the last path segment as a
    // directory instead of replacing it.
    let mut url = config.api.url.clone();
    if !url.ends_with('/') {
      url.push('/');
    }
    let base =
      Url::parse(&url).map_err(|e| ClientError::Config(format!("invalid api url: {}", e)))?;

    let http = reqwest::Client::builder()
      .timeout(std::time::Duration::from_secs(config.api.request_timeout_secs))
      .build()
      .map_err(|e| ClientError::Config(format!("failed to build http client: {}", e)))?;

    Ok(Self { http, base, token })
  }

  /// Fetch one page of equipment, optionally filtered.
  pub async fn fetch_list(
    &self,
    kind: ResourceKind,
    page: u32,
    filter: Option<&FilterExpr>,
  ) -> Result<ListResource<Equipment>, ClientError> {
    let url = self.endpoint("equipment")?;

    let mut effective = kind.base_filter().unwrap_or_default();
    if let Some(f) = filter {
      effective = effective.and(f);
    }

    let mut request = self
      .http
      .get(url)
      .bearer_auth(&self.token)
      .query(&[("page", page.to_string())]);
    if !effective.is_empty() {
      request = request.query(&[("filter", effective.render())]);
    }

    let response = request.send().await.map_err(map_transport)?;
    let body = read_json(response).await?;

    let raw = normalize_list_response(body)?;
    let items = raw
      .items
      .into_iter()
      .map(serde_json::from_value::<Equipment>)
      .collect::<Result<Vec<_>, _>>()
      .map_err(|e| ClientError::MalformedResponse(format!("bad equipment record: {}", e)))?;

    Ok(ListResource {
      items,
      page: raw.page,
    })
  }

  /// Fetch a single equipment record.
  pub async fn fetch_one(&self, id: u64) -> Result<Equipment, ClientError> {
    let url = self.endpoint(&format!("equipment/{}", id))?;

    let response = self
      .http
      .get(url)
      .bearer_auth(&self.token)
      .send()
      .await
      .map_err(map_transport)?;
    let body = read_json(response).await?;

    parse_equipment(normalize_entity_response(body)?)
  }

  /// Apply a partial update and return the authoritative server record.
  pub async fn mutate(&self, id: u64, payload: &Value) -> Result<Equipment, ClientError> {
    let url = self.endpoint(&format!("equipment/{}", id))?;

    let response = self
      .http
      .patch(url)
      .bearer_auth(&self.token)
      .json(payload)
      .send()
      .await
      .map_err(map_transport)?;
    let body = read_json(response).await?;

    parse_equipment(normalize_entity_response(body)?)
  }

  fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
    self
      .base
      .join(path)
      .map_err(|e| ClientError::Config(format!("invalid endpoint '{}': {}", path, e)))
  }
}

fn parse_equipment(value: Value) -> Result<Equipment, ClientError> {
  serde_json::from_value(value)
    .map_err(|e| ClientError::MalformedResponse(format!("bad equipment record: {}", e)))
}

fn map_transport(e: reqwest::Error) -> ClientError {
  ClientError::Network(e.to_string())
}

/// Map the status code onto the error taxonomy and parse the body.
async fn read_json(response: reqwest::Response) -> Result<Value, ClientError> {
  let status = response.status();

  if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
    let message = response.text().await.unwrap_or_default();
    return Err(ClientError::Auth(first_line(&message, status)));
  }

  if !status.is_success() {
    let message = response.text().await.unwrap_or_default();
    return Err(ClientError::Api {
      status: status.as_u16(),
      message: first_line(&message, status),
    });
  }

  response
    .json::<Value>()
    .await
    .map_err(|e| ClientError::MalformedResponse(format!("body is not JSON: {}", e)))
}

fn first_line(body: &str, status: StatusCode) -> String {
  let line = body.lines().next().unwrap_or("").trim();
  if line.is_empty() {
    status.to_string()
  } else {
    // Keep error messages log-friendly
    line.chars().take(200).collect()
  }
}
