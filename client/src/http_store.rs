use std::time::Duration;

use globe_shared::{LocationRecord, LocationScope, ProfileNumber, ProfileSummary};
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::FetchError;
use crate::store::LocationStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// [`LocationStore`] backed by the reference server's REST API.
#[derive(Debug, Clone)]
pub struct HttpStore {
    client: reqwest::Client,
    base: Url,
}

impl HttpStore {
    pub fn new(base_url: &str) -> Result<Self, FetchError> {
        let base = Url::parse(base_url)
            .map_err(|e| FetchError::Transport(format!("invalid base url {base_url:?}: {e}")))?;
        if base.cannot_be_a_base() {
            return Err(FetchError::Transport(format!(
                "base url {base_url:?} cannot carry a path"
            )));
        }
        let client = reqwest::Client::builder()
            .user_agent("globe-client/0.1")
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, FetchError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| FetchError::Transport("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        debug!(%url, "store request");
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        resp.json::<T>()
            .await
            .map_err(|e| FetchError::Decode(e.to_string()))
    }

    /// Like [`Self::get_json`], but a 404 means "no such row".
    async fn get_optional<T: DeserializeOwned>(&self, url: Url) -> Result<Option<T>, FetchError> {
        match self.get_json(url).await {
            Ok(value) => Ok(Some(value)),
            Err(FetchError::Status(code)) if code == StatusCode::NOT_FOUND.as_u16() => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl LocationStore for HttpStore {
    async fn fetch_locations(
        &self,
        scope: &LocationScope,
    ) -> Result<Vec<LocationRecord>, FetchError> {
        let mut url = self.endpoint(&["api", "locations"])?;
        if let LocationScope::Profile(profile_id) = scope {
            url.query_pairs_mut().append_pair("profile_id", profile_id);
        }
        self.get_json(url).await
    }

    async fn fetch_profiles(&self) -> Result<Vec<ProfileSummary>, FetchError> {
        self.get_json(self.endpoint(&["api", "profiles"])?).await
    }

    async fn find_profile(&self, id: &str) -> Result<Option<ProfileSummary>, FetchError> {
        self.get_optional(self.endpoint(&["api", "profiles", id])?)
            .await
    }

    async fn find_profile_by_number(
        &self,
        number: &ProfileNumber,
    ) -> Result<Option<ProfileSummary>, FetchError> {
        self.get_optional(self.endpoint(&["api", "profiles", "by-number", number.as_str()])?)
            .await
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use globe_shared::{LocationRecord, LocationScope, ProfileSummary};
    use serde::Deserialize;

    use super::HttpStore;
    use crate::error::FetchError;
    use crate::store::LocationStore;

    #[derive(Deserialize)]
    struct ScopeQuery {
        profile_id: Option<String>,
    }

    fn record(id: &str, profile_id: &str) -> LocationRecord {
        LocationRecord {
            id: id.to_string(),
            profile_id: profile_id.to_string(),
            name: id.to_uppercase(),
            latitude: 10.0,
            longitude: 20.0,
            created_at: None,
        }
    }

    fn profile() -> ProfileSummary {
        ProfileSummary {
            id: "p1".to_string(),
            profile_number: "0420".parse().expect("valid profile number"),
            bio: Some("hello".to_string()),
            profile_picture_url: None,
            qr_code_url: None,
        }
    }

    fn fixture_app() -> Router {
        Router::new()
            .route(
                "/api/locations",
                get(|Query(q): Query<ScopeQuery>| async move {
                    let all = vec![record("a", "p1"), record("b", "p2")];
                    Json(
                        all.into_iter()
                            .filter(|r| q.profile_id.as_deref().is_none_or(|p| r.profile_id == p))
                            .collect::<Vec<_>>(),
                    )
                }),
            )
            .route("/api/profiles", get(|| async { Json(vec![profile()]) }))
            .route(
                "/api/profiles/{id}",
                get(|Path(id): Path<String>| async move {
                    if id == "p1" {
                        Ok(Json(profile()))
                    } else {
                        Err(StatusCode::NOT_FOUND)
                    }
                }),
            )
            .route(
                "/api/profiles/by-number/{number}",
                get(|Path(number): Path<String>| async move {
                    if number == "0420" {
                        Ok(Json(profile()))
                    } else {
                        Err(StatusCode::NOT_FOUND)
                    }
                }),
            )
    }

    async fn spawn_test_server(app: Router) -> (SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind test listener");
        let addr = listener.local_addr().expect("listener address");
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve test app");
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn reads_locations_and_profiles_over_http() {
        let (addr, server_handle) = spawn_test_server(fixture_app()).await;
        let store = HttpStore::new(&format!("http://{addr}/")).expect("http store");

        let all = store
            .fetch_locations(&LocationScope::All)
            .await
            .expect("fetch locations");
        assert_eq!(all.len(), 2);

        let scoped = store
            .fetch_locations(&LocationScope::Profile("p2".to_string()))
            .await
            .expect("fetch scoped locations");
        assert_eq!(scoped, vec![record("b", "p2")]);

        let profiles = store.fetch_profiles().await.expect("fetch profiles");
        assert_eq!(profiles, vec![profile()]);

        server_handle.abort();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn missing_profiles_map_to_none() {
        let (addr, server_handle) = spawn_test_server(fixture_app()).await;
        let store = HttpStore::new(&format!("http://{addr}")).expect("http store");

        assert!(store.find_profile("p1").await.expect("lookup").is_some());
        assert!(store.find_profile("p9").await.expect("lookup").is_none());

        let known = "0420".parse().expect("valid profile number");
        let unknown = "9999".parse().expect("valid profile number");
        assert!(
            store
                .find_profile_by_number(&known)
                .await
                .expect("lookup")
                .is_some()
        );
        assert!(
            store
                .find_profile_by_number(&unknown)
                .await
                .expect("lookup")
                .is_none()
        );

        server_handle.abort();
        let _ = server_handle.await;
    }

    #[tokio::test]
    async fn server_errors_surface_as_status() {
        let app = Router::new().route(
            "/api/locations",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let (addr, server_handle) = spawn_test_server(app).await;
        let store = HttpStore::new(&format!("http://{addr}")).expect("http store");

        assert_eq!(
            store.fetch_locations(&LocationScope::All).await,
            Err(FetchError::Status(503))
        );

        server_handle.abort();
        let _ = server_handle.await;
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(matches!(
            HttpStore::new("not a url"),
            Err(FetchError::Transport(_))
        ));
    }
}
