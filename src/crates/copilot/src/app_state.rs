//! Per-app state snapshots with a freshness window.
//!
//! A snapshot captured at `t` is served unchanged until `t + window`; the
//! first request at or after that refetches it. Each app has its own slot.
//! Concurrent refetches for one app are not coordinated: the last one to
//! finish wins, which is harmless because a refetch is a pure read.

use crate::error::{CopilotError, Result};
use crate::executor::Headers;
use crate::retry::{retry_with_backoff, RetryConfig};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Fetches the current state of an external app.
#[async_trait]
pub trait AppStateProvider: Send + Sync {
    async fn get_state(&self, app_name: &str, headers: &Headers) -> Result<Value>;
}

/// A snapshot and when it was taken.
#[derive(Debug, Clone)]
pub struct CachedAppState {
    pub app: String,
    pub snapshot: Value,
    pub captured_at: Instant,
}

impl CachedAppState {
    pub fn is_fresh(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.captured_at) < window
    }
}

/// Routes `get_state` to the provider registered for the app.
#[derive(Default, Clone)]
pub struct AppStateProviders {
    providers: HashMap<String, Arc<dyn AppStateProvider>>,
}

impl AppStateProviders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, app: impl Into<String>, provider: Arc<dyn AppStateProvider>) -> Self {
        self.providers.insert(app.into(), provider);
        self
    }

    pub fn supports(&self, app: &str) -> bool {
        self.providers.contains_key(app)
    }
}

#[async_trait]
impl AppStateProvider for AppStateProviders {
    async fn get_state(&self, app_name: &str, headers: &Headers) -> Result<Value> {
        match self.providers.get(app_name) {
            Some(provider) => provider.get_state(app_name, headers).await,
            None => Err(CopilotError::Validation(format!(
                "no state provider for app '{}'",
                app_name
            ))),
        }
    }
}

/// Snapshot cache shared across turns.
pub struct AppStateCache {
    provider: Arc<dyn AppStateProvider>,
    window: Duration,
    retry: RetryConfig,
    entries: RwLock<HashMap<String, CachedAppState>>,
}

impl AppStateCache {
    pub fn new(provider: Arc<dyn AppStateProvider>, window: Duration, retry: RetryConfig) -> Self {
        Self {
            provider,
            window,
            retry,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Fresh snapshot for `app`, refetching when stale or absent.
    ///
    /// Returns `None` when the refetch fails; a snapshot of another app is
    /// never substituted.
    pub async fn get(&self, app: &str, headers: &Headers) -> Option<Value> {
        if let Some(snapshot) = self.fresh(app) {
            debug!(app = %app, "Serving cached app state");
            return Some(snapshot);
        }

        let fetched = retry_with_backoff(&self.retry, "app_state_refetch", || {
            self.provider.get_state(app, headers)
        })
        .await;

        match fetched {
            Ok(snapshot) => {
                info!(app = %app, "App state refreshed");
                self.entries.write().insert(
                    app.to_string(),
                    CachedAppState {
                        app: app.to_string(),
                        snapshot: snapshot.clone(),
                        captured_at: Instant::now(),
                    },
                );
                Some(snapshot)
            }
            Err(e) => {
                warn!(app = %app, at = %Utc::now().to_rfc3339(), error = %e, "App state unavailable, continuing without it");
                None
            }
        }
    }

    fn fresh(&self, app: &str) -> Option<Value> {
        let entries = self.entries.read();
        let entry = entries.get(app)?;
        entry
            .is_fresh(Instant::now(), self.window)
            .then(|| entry.snapshot.clone())
    }

    pub fn invalidate(&self, app: &str) {
        self.entries.write().remove(app);
    }

    pub fn cached(&self, app: &str) -> Option<CachedAppState> {
        self.entries.read().get(app).cloned()
    }
}

/// Trello boards, lists and cards flattened into rows under `state`.
pub struct TrelloStateProvider {
    client: Client,
    base_url: String,
    board_id: Option<String>,
}

impl TrelloStateProvider {
    pub const DEFAULT_BASE_URL: &'static str = "https://api.trello.com/1";

    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CopilotError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: Self::DEFAULT_BASE_URL.to_string(),
            board_id: None,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Restrict the snapshot to one board.
    pub fn with_board(mut self, board_id: impl Into<String>) -> Self {
        self.board_id = Some(board_id.into());
        self
    }

    async fn get_json(&self, path: &str, headers: &Headers) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.get(&url);
        for (name, value) in headers {
            if name.eq_ignore_ascii_case("authorization") {
                request = request.header(name.as_str(), value.as_str());
            }
        }
        let response = request
            .send()
            .await
            .map_err(|e| CopilotError::AppState(format!("GET {}: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CopilotError::AppState(format!("GET {}: HTTP {}", url, status)));
        }
        response
            .json()
            .await
            .map_err(|e| CopilotError::AppState(format!("GET {}: {}", url, e)))
    }
}

#[async_trait]
impl AppStateProvider for TrelloStateProvider {
    async fn get_state(&self, _app_name: &str, headers: &Headers) -> Result<Value> {
        let me = self.get_json("/members/me?boards=open", headers).await?;
        let mut boards = Vec::new();

        for board in me.get("boards").and_then(Value::as_array).into_iter().flatten() {
            let Some(board_id) = board.get("id").and_then(Value::as_str) else {
                continue;
            };
            if self.board_id.as_deref().is_some_and(|wanted| wanted != board_id) {
                continue;
            }

            let lists = self.get_json(&format!("/boards/{}/lists", board_id), headers).await?;
            let mut with_cards = Vec::new();
            for list in lists.as_array().into_iter().flatten() {
                let Some(list_id) = list.get("id").and_then(Value::as_str) else {
                    continue;
                };
                let cards = self.get_json(&format!("/lists/{}/cards", list_id), headers).await?;
                with_cards.push((list.clone(), cards));
            }
            boards.push((board.clone(), with_cards));
        }

        Ok(flatten_trello(&boards))
    }
}

/// Flatten `(board, [(list, cards)])` into
/// `{"state": [{boardId, boardName, listId, listName, cardId, cardName}]}`.
pub fn flatten_trello(boards: &[(Value, Vec<(Value, Value)>)]) -> Value {
    let field = |v: &Value, key: &str| v.get(key).cloned().unwrap_or(Value::Null);
    let mut rows = Vec::new();

    for (board, lists) in boards {
        for (list, cards) in lists {
            for card in cards.as_array().into_iter().flatten() {
                rows.push(json!({
                    "boardId": field(board, "id"),
                    "boardName": field(board, "name"),
                    "listId": field(list, "id"),
                    "listName": field(list, "name"),
                    "cardId": field(card, "id"),
                    "cardName": field(card, "name"),
                }));
            }
        }
    }

    json!({ "state": rows })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AppStateProvider for CountingProvider {
        async fn get_state(&self, app_name: &str, _headers: &Headers) -> Result<Value> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"app": app_name, "fetch": n}))
        }
    }

    struct DownProvider;

    #[async_trait]
    impl AppStateProvider for DownProvider {
        async fn get_state(&self, _app_name: &str, _headers: &Headers) -> Result<Value> {
            Err(CopilotError::AppState("503".to_string()))
        }
    }

    #[test]
    fn test_flatten_trello() {
        let boards = vec![(
            json!({"id": "b1", "name": "Roadmap"}),
            vec![
                (
                    json!({"id": "l1", "name": "Todo"}),
                    json!([{"id": "c1", "name": "Demo"}, {"id": "c2", "name": "Ship"}]),
                ),
                (json!({"id": "l2", "name": "Empty"}), json!([])),
            ],
        )];
        let state = flatten_trello(&boards);
        let rows = state["state"].as_array().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[1],
            json!({
                "boardId": "b1", "boardName": "Roadmap",
                "listId": "l1", "listName": "Todo",
                "cardId": "c2", "cardName": "Ship"
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_apps_are_keyed_independently() {
        let provider = Arc::new(CountingProvider {
            calls: AtomicUsize::new(0),
        });
        let cache = AppStateCache::new(provider, Duration::from_secs(600), RetryConfig::none());

        let trello = cache.get("trello", &Headers::new()).await.unwrap();
        let slack = cache.get("slack", &Headers::new()).await.unwrap();
        assert_eq!(trello["app"], "trello");
        assert_eq!(slack["app"], "slack");
        assert_eq!(cache.get("trello", &Headers::new()).await.unwrap(), trello);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refetch_serves_nothing() {
        let cache = AppStateCache::new(Arc::new(DownProvider), Duration::from_secs(600), RetryConfig::new(1));
        assert!(cache.get("trello", &Headers::new()).await.is_none());
        assert!(cache.cached("trello").is_none());
    }

    #[tokio::test]
    async fn test_registry_routes_by_app() {
        let registry = AppStateProviders::new().register(
            "trello",
            Arc::new(CountingProvider {
                calls: AtomicUsize::new(0),
            }),
        );
        assert!(registry.supports("trello"));
        assert!(registry.get_state("trello", &Headers::new()).await.is_ok());
        assert!(matches!(
            registry.get_state("jira", &Headers::new()).await,
            Err(CopilotError::Validation(_))
        ));
    }
}
