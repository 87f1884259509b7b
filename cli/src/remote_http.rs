//! HTTP implementation of the remote store against a PostgREST-style backend
//! (one REST collection per entity table, upsert via `on_conflict`).

use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use nibble_core::remote::{AuthProvider, ItemError, RemoteError, RemoteStore, UpsertOutcome};

use crate::config::{RemoteConfig, Session};

pub struct HttpRemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    access_token: String,
}

impl HttpRemoteStore {
    pub fn new(remote: &RemoteConfig, session: Option<&Session>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(format!("nibble-cli/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            base_url: remote.url.trim_end_matches('/').to_string(),
            api_key: remote.api_key.clone(),
            access_token: session.map(|s| s.access_token.clone()).unwrap_or_default(),
        }
    }

    fn collection_url(&self, collection: &str) -> String {
        format!("{}/rest/v1/{collection}", self.base_url)
    }

    fn request(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("apikey", &self.api_key)
            .bearer_auth(&self.access_token)
    }
}

fn transport(err: &reqwest::Error) -> RemoteError {
    RemoteError::Transport(err.to_string())
}

fn row_label(row: &Value, collection: &str) -> String {
    row.get("name")
        .and_then(Value::as_str)
        .map_or_else(|| collection.to_string(), ToString::to_string)
}

impl RemoteStore for HttpRemoteStore {
    // Rows go up one request each so a rejected row cannot take the rest of
    // the batch down with it.
    fn upsert(
        &self,
        collection: &str,
        conflict_key: &str,
        _owner_id: &str,
        rows: Vec<Value>,
    ) -> impl Future<Output = Result<UpsertOutcome, RemoteError>> + Send {
        let url = format!(
            "{}?on_conflict={conflict_key}",
            self.collection_url(collection)
        );
        async move {
            let mut outcome = UpsertOutcome::default();
            for row in rows {
                let resp = self
                    .request(self.client.post(&url))
                    .header("Prefer", "resolution=merge-duplicates")
                    .json(&row)
                    .send()
                    .await
                    .map_err(|e| transport(&e))?;

                let status = resp.status();
                if status == reqwest::StatusCode::UNAUTHORIZED
                    || status == reqwest::StatusCode::FORBIDDEN
                {
                    return Err(RemoteError::NotAuthenticated(format!(
                        "server returned {status}"
                    )));
                }
                if status.is_success() {
                    outcome.succeeded += 1;
                } else {
                    let body = resp.text().await.unwrap_or_default();
                    outcome.failed.push(ItemError {
                        id: row
                            .get("id")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                        label: row_label(&row, collection),
                        message: format!("{status}: {}", body.trim()),
                    });
                }
            }
            Ok(outcome)
        }
    }

    fn fetch_all(
        &self,
        collection: &str,
        owner_id: &str,
    ) -> impl Future<Output = Result<Vec<Value>, RemoteError>> + Send {
        let url = format!(
            "{}?owner_id=eq.{owner_id}&select=*",
            self.collection_url(collection)
        );
        async move {
            let resp = self
                .request(self.client.get(&url))
                .send()
                .await
                .map_err(|e| transport(&e))?;

            let status = resp.status();
            if status == reqwest::StatusCode::UNAUTHORIZED
                || status == reqwest::StatusCode::FORBIDDEN
            {
                return Err(RemoteError::NotAuthenticated(format!(
                    "server returned {status}"
                )));
            }
            if !status.is_success() {
                return Err(RemoteError::Transport(format!("server returned {status}")));
            }
            resp.json::<Vec<Value>>().await.map_err(|e| transport(&e))
        }
    }
}

/// Reads the locally cached session; no network involved.
pub struct SessionAuth {
    session: Option<Session>,
}

impl SessionAuth {
    pub fn new(session: Option<Session>) -> Self {
        Self { session }
    }
}

impl AuthProvider for SessionAuth {
    fn current_owner(&self) -> Result<Option<String>, RemoteError> {
        Ok(self.session.as_ref().map(|s| s.owner_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> HttpRemoteStore {
        HttpRemoteStore::new(
            &RemoteConfig {
                url: "https://api.example.com/".to_string(),
                api_key: "key".to_string(),
            },
            Some(&Session {
                owner_id: "owner-1".to_string(),
                access_token: "token".to_string(),
            }),
        )
    }

    #[test]
    fn test_collection_url_strips_trailing_slash() {
        assert_eq!(
            store().collection_url("diary_entries"),
            "https://api.example.com/rest/v1/diary_entries"
        );
    }

    #[test]
    fn test_row_label_falls_back_to_collection() {
        let named = serde_json::json!({ "name": "Oatmeal" });
        assert_eq!(row_label(&named, "diary_entries"), "Oatmeal");
        let unnamed = serde_json::json!({ "weight_kg": 74.5 });
        assert_eq!(row_label(&unnamed, "weight_entries"), "weight_entries");
    }

    #[test]
    fn test_session_auth_owner() {
        let auth = SessionAuth::new(Some(Session {
            owner_id: "owner-1".to_string(),
            access_token: "token".to_string(),
        }));
        assert_eq!(auth.current_owner().unwrap().as_deref(), Some("owner-1"));

        let signed_out = SessionAuth::new(None);
        assert!(signed_out.current_owner().unwrap().is_none());
    }
}
