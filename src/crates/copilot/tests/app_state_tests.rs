//! App-state freshness window on a paused clock.

mod common;

use async_trait::async_trait;
use common::{trello_state, FixedState};
use copilot::{AppStateCache, AppStateProvider, CopilotError, Headers, RetryConfig};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WINDOW: Duration = Duration::from_secs(600);

#[tokio::test(start_paused = true)]
async fn test_snapshot_served_until_window_ends() {
    let provider = FixedState::new(trello_state());
    let cache = AppStateCache::new(provider.clone(), WINDOW, RetryConfig::none());
    let headers = Headers::new();

    let first = cache.get("trello", &headers).await.unwrap();
    assert_eq!(provider.fetches(), 1);

    tokio::time::advance(Duration::from_secs(599)).await;
    let still = cache.get("trello", &headers).await.unwrap();
    assert_eq!(still, first);
    assert_eq!(provider.fetches(), 1);

    tokio::time::advance(Duration::from_secs(1)).await;
    let refreshed = cache.get("trello", &headers).await.unwrap();
    assert_eq!(provider.fetches(), 2);
    assert_eq!(refreshed["fetch"], 1);
}

#[tokio::test(start_paused = true)]
async fn test_invalidate_forces_refetch() {
    let provider = FixedState::new(trello_state());
    let cache = AppStateCache::new(provider.clone(), WINDOW, RetryConfig::none());

    cache.get("trello", &Headers::new()).await.unwrap();
    cache.invalidate("trello");
    cache.get("trello", &Headers::new()).await.unwrap();

    assert_eq!(provider.fetches(), 2);
}

/// Fails a fixed number of times, then answers.
struct FlakyState {
    failures: usize,
    calls: AtomicUsize,
}

#[async_trait]
impl AppStateProvider for FlakyState {
    async fn get_state(&self, _app_name: &str, _headers: &Headers) -> copilot::Result<Value> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(CopilotError::AppState("502 Bad Gateway".to_string()));
        }
        Ok(json!({"state": []}))
    }
}

#[tokio::test(start_paused = true)]
async fn test_refetch_retries_transient_failures() {
    let provider = Arc::new(FlakyState {
        failures: 2,
        calls: AtomicUsize::new(0),
    });
    let cache = AppStateCache::new(provider.clone(), WINDOW, RetryConfig::new(2));

    let snapshot = cache.get("trello", &Headers::new()).await;

    assert_eq!(snapshot, Some(json!({"state": []})));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

/// Answers once, then is unreachable.
struct OnceThenDown {
    calls: AtomicUsize,
}

#[async_trait]
impl AppStateProvider for OnceThenDown {
    async fn get_state(&self, _app_name: &str, _headers: &Headers) -> copilot::Result<Value> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(json!({"state": [{"listId": "l1"}]}))
        } else {
            Err(CopilotError::AppState("connection refused".to_string()))
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_snapshot_not_served_when_refetch_fails() {
    let provider = Arc::new(OnceThenDown {
        calls: AtomicUsize::new(0),
    });
    let cache = AppStateCache::new(provider, WINDOW, RetryConfig::none());
    assert!(cache.get("trello", &Headers::new()).await.is_some());

    tokio::time::advance(WINDOW).await;

    assert!(cache.get("trello", &Headers::new()).await.is_none());
}
