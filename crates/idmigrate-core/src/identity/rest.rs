//! HTTP user-management API provider.
//!
//! Lookup: `GET {base}/users?email=<email>` answering a JSON array of users
//! (an empty array, a 404, or only users with other emails means not found).
//! Creation: `POST {base}/users` with `{"email": ...}` answering the created
//! user.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{Identity, IdentityDraft, IdentityProvider, ProviderError};
use crate::error::{Error, Result};

/// Identity provider backed by a REST user-management API.
pub struct RestIdentityProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl RestIdentityProvider {
    /// Create a provider for the API rooted at `base_url`.
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build identity API client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn users_url(&self) -> String {
        format!("{}/users", self.base_url)
    }
}

async fn rejected(response: reqwest::Response) -> ProviderError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    ProviderError::Rejected { status, message }
}

fn request_error(err: reqwest::Error) -> ProviderError {
    ProviderError::Request(err.to_string())
}

/// Pick the user a lookup answered for `email`.
///
/// Some APIs match loosely, so a user whose email differs is never accepted.
/// An exact (case-insensitive) match wins; a user without an email is taken
/// as the API vouching for the query.
fn select_match(users: Vec<Identity>, email: &str) -> Option<Identity> {
    let mut unlabeled = None;
    for user in users {
        match user.email.as_deref() {
            Some(e) if e.eq_ignore_ascii_case(email) => return Some(user),
            Some(_) => {}
            None => {
                if unlabeled.is_none() {
                    unlabeled = Some(user);
                }
            }
        }
    }
    unlabeled
}

#[async_trait]
impl IdentityProvider for RestIdentityProvider {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn get_by_email(&self, email: &str) -> Result<Identity, ProviderError> {
        let response = self
            .client
            .get(self.users_url())
            .query(&[("email", email)])
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(request_error)?;

        match response.status() {
            StatusCode::NOT_FOUND => return Err(ProviderError::NotFound),
            status if !status.is_success() => return Err(rejected(response).await),
            _ => {}
        }

        let users: Vec<Identity> = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        select_match(users, email).ok_or(ProviderError::NotFound)
    }

    async fn create(&self, draft: &IdentityDraft) -> Result<Identity, ProviderError> {
        let response = self
            .client
            .post(self.users_url())
            .bearer_auth(&self.api_key)
            .json(draft)
            .send()
            .await
            .map_err(request_error)?;

        if !response.status().is_success() {
            return Err(rejected(response).await);
        }

        let identity: Identity = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        if identity.id.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "created identity has an empty id".to_string(),
            ));
        }
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use axum::extract::{Query, State};
    use axum::http::{HeaderMap, StatusCode as AxumStatus};
    use axum::routing::get;
    use axum::{Json, Router};
    use parking_lot::Mutex;

    type Users = Arc<Mutex<HashMap<String, String>>>;

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == "Bearer sk_test")
    }

    async fn list_users(
        State(users): State<Users>,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
    ) -> Result<Json<Vec<Identity>>, AxumStatus> {
        if !authorized(&headers) {
            return Err(AxumStatus::UNAUTHORIZED);
        }
        let email = params.get("email").cloned().unwrap_or_default();
        if email == "broken@x.com" {
            return Err(AxumStatus::INTERNAL_SERVER_ERROR);
        }
        // Loose matching: answers with a neighbouring account.
        if email == "a@y.com" {
            return Ok(Json(vec![Identity {
                id: "user_of_ab".to_string(),
                email: Some("ab@y.com".to_string()),
            }]));
        }
        if email == "bare@y.com" {
            return Ok(Json(vec![Identity {
                id: "user_bare".to_string(),
                email: None,
            }]));
        }
        let users = users.lock();
        Ok(Json(
            users
                .get(&email)
                .map(|id| Identity {
                    id: id.clone(),
                    email: Some(email.clone()),
                })
                .into_iter()
                .collect(),
        ))
    }

    async fn create_user(
        State(users): State<Users>,
        headers: HeaderMap,
        Json(draft): Json<IdentityDraft>,
    ) -> Result<Json<Identity>, AxumStatus> {
        if !authorized(&headers) {
            return Err(AxumStatus::UNAUTHORIZED);
        }
        let mut users = users.lock();
        let id = format!("user_{}", users.len() + 1);
        users.insert(draft.email.clone(), id.clone());
        Ok(Json(Identity {
            id,
            email: Some(draft.email),
        }))
    }

    async fn spawn_api() -> String {
        let users: Users = Arc::new(Mutex::new(HashMap::new()));
        let app = Router::new()
            .route("/v1/users", get(list_users).post(create_user))
            .with_state(users);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/v1/", addr)
    }

    fn provider(base: &str, key: &str) -> RestIdentityProvider {
        RestIdentityProvider::new(base, key, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_lookup_miss_then_create() {
        let base = spawn_api().await;
        let provider = provider(&base, "sk_test");

        assert!(matches!(
            provider.get_by_email("a@x.com").await,
            Err(ProviderError::NotFound)
        ));

        let created = provider
            .create(&IdentityDraft {
                email: "a@x.com".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(created.id, "user_1");

        let found = provider.get_by_email("a@x.com").await.unwrap();
        assert_eq!(found.id, "user_1");
    }

    #[tokio::test]
    async fn test_server_error_is_rejected_not_missing() {
        let base = spawn_api().await;
        let provider = provider(&base, "sk_test");

        let err = provider.get_by_email("broken@x.com").await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_bad_credentials_rejected() {
        let base = spawn_api().await;
        let provider = provider(&base, "sk_wrong");

        let err = provider.get_by_email("a@x.com").await.unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { status: 401, .. }));
    }

    #[tokio::test]
    async fn test_loose_match_for_other_email_is_not_found() {
        let base = spawn_api().await;
        let provider = provider(&base, "sk_test");

        assert!(matches!(
            provider.get_by_email("a@y.com").await,
            Err(ProviderError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_result_without_email_is_accepted() {
        let base = spawn_api().await;
        let provider = provider(&base, "sk_test");

        let found = provider.get_by_email("bare@y.com").await.unwrap();
        assert_eq!(found.id, "user_bare");
    }

    #[test]
    fn test_select_match_prefers_exact_email() {
        let user = |id: &str, email: Option<&str>| Identity {
            id: id.to_string(),
            email: email.map(str::to_string),
        };
        let users = vec![
            user("other", Some("ab@x.com")),
            user("bare", None),
            user("exact", Some("A@X.com")),
        ];
        assert_eq!(select_match(users, "a@x.com").unwrap().id, "exact");
        assert!(select_match(vec![user("other", Some("ab@x.com"))], "a@x.com").is_none());
        assert!(select_match(Vec::new(), "a@x.com").is_none());
    }

    #[test]
    fn test_trailing_slash_trimmed() {
        let provider = provider("https://id.example.com/v1/", "k");
        assert_eq!(provider.users_url(), "https://id.example.com/v1/users");
    }
}
