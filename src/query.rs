//! Observable query state for the search and pagination controllers.
//!
//! Controllers run their loads on spawned tasks and deliver outcomes over a
//! channel; `poll()` drains that channel into a `QueryState` the caller can
//! render from, so consumers never block on the network.

/// The state of a controller-driven query.
#[derive(Debug, Clone)]
pub enum QueryState<T> {
  /// Nothing requested yet
  Idle,
  /// A load is scheduled or in flight
  Loading,
  /// Last load completed with data
  Success(T),
  /// Last load failed; previous data, if any, was not cleared from the cache
  Error(String),
}

impl<T> QueryState<T> {
  pub fn is_loading(&self) -> bool {
    matches!(self, QueryState::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, QueryState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, QueryState::Error(_))
  }

  pub fn data(&self) -> Option<&T> {
    match self {
      QueryState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      QueryState::Error(e) => Some(e),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accessors_match_variants() {
    let idle: QueryState<i32> = QueryState::Idle;
    assert!(!idle.is_loading() && !idle.is_success() && !idle.is_error());

    assert!(QueryState::<i32>::Loading.is_loading());

    let ok = QueryState::Success(5);
    assert_eq!(ok.data(), Some(&5));
    assert_eq!(ok.error(), None);

    let err: QueryState<i32> = QueryState::Error("down".into());
    assert_eq!(err.error(), Some("down"));
    assert_eq!(err.data(), None);
  }
}
