//! GARM implementation of the control-plane contract over HTTPS/JSON.

mod routes;

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::api::{
    ApiFuture, ControlPlane, CreatePoolParams, CreateScopeParams, Instance, Pool, PoolRef,
    RemoteError, Scope, ScopeKind, ScopeRef, UpdateEntityParams, UpdatePoolParams,
};
use crate::profile::ClientProfile;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Control-plane client authenticated with a bearer token.
#[derive(Clone, Debug)]
pub struct GarmClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl GarmClient {
    /// Builds a client for the given profile.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::Transport`] when the HTTP client cannot be
    /// initialised (for example when the TLS backend fails to load).
    pub fn new(profile: &ClientProfile) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|err| RemoteError::Transport {
                endpoint: profile.base_url.clone(),
                message: err.to_string(),
            })?;
        Ok(Self {
            http,
            api_base: profile.api_base(),
            token: profile.token.clone(),
        })
    }

    /// Base URL every endpoint path is joined to.
    #[must_use]
    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}/{path}", self.api_base))
            .bearer_auth(&self.token)
    }

    async fn fetch<T: DeserializeOwned>(&self, path: String) -> Result<T, RemoteError> {
        let response = self.send(self.request(Method::GET, &path), &path).await?;
        decode(&path, response).await
    }

    async fn send_json<B, T>(&self, method: Method, path: String, body: &B) -> Result<T, RemoteError>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self
            .send(self.request(method, &path).json(body), &path)
            .await?;
        decode(&path, response).await
    }

    async fn delete(&self, path: String) -> Result<(), RemoteError> {
        self.send(self.request(Method::DELETE, &path), &path)
            .await
            .map(drop)
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response, RemoteError> {
        debug!(endpoint = path, "calling control plane");
        let response = request.send().await.map_err(|err| RemoteError::Transport {
            endpoint: path.to_owned(),
            message: err.to_string(),
        })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Status {
            endpoint: path.to_owned(),
            status,
            message: error_message(&body),
        })
    }
}

async fn decode<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, RemoteError> {
    let body = response.text().await.map_err(|err| RemoteError::Transport {
        endpoint: path.to_owned(),
        message: err.to_string(),
    })?;
    serde_json::from_str(&body).map_err(|err| RemoteError::Decode {
        endpoint: path.to_owned(),
        message: err.to_string(),
    })
}

/// Error payload returned by the control plane on non-2xx responses.
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    details: String,
}

fn error_message(body: &str) -> String {
    let Ok(parsed) = serde_json::from_str::<ApiErrorBody>(body) else {
        return body.trim().to_owned();
    };
    match (parsed.error.is_empty(), parsed.details.is_empty()) {
        (false, false) => format!("{}: {}", parsed.error, parsed.details),
        (false, true) => parsed.error,
        (true, false) => parsed.details,
        (true, true) => body.trim().to_owned(),
    }
}

impl ControlPlane for GarmClient {
    fn list_scopes(&self, kind: ScopeKind) -> ApiFuture<'_, Vec<Scope>> {
        Box::pin(self.fetch(routes::scopes(kind)))
    }

    fn create_scope<'a>(&'a self, params: &'a CreateScopeParams) -> ApiFuture<'a, Scope> {
        Box::pin(self.send_json(Method::POST, routes::scopes(params.kind), params))
    }

    fn get_scope<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, Scope> {
        Box::pin(self.fetch(routes::scope(scope)))
    }

    fn update_scope<'a>(
        &'a self,
        scope: &'a ScopeRef,
        params: &'a UpdateEntityParams,
    ) -> ApiFuture<'a, Scope> {
        Box::pin(self.send_json(Method::PUT, routes::scope(scope), params))
    }

    fn delete_scope<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, ()> {
        Box::pin(self.delete(routes::scope(scope)))
    }

    fn list_scope_pools<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, Vec<Pool>> {
        Box::pin(self.fetch(routes::scope_pools(scope)))
    }

    fn create_scope_pool<'a>(
        &'a self,
        scope: &'a ScopeRef,
        params: &'a CreatePoolParams,
    ) -> ApiFuture<'a, Pool> {
        Box::pin(self.send_json(Method::POST, routes::scope_pools(scope), params))
    }

    fn list_scope_instances<'a>(&'a self, scope: &'a ScopeRef) -> ApiFuture<'a, Vec<Instance>> {
        Box::pin(self.fetch(routes::scope_instances(scope)))
    }

    fn list_pools(&self) -> ApiFuture<'_, Vec<Pool>> {
        Box::pin(self.fetch(routes::pools()))
    }

    fn get_pool<'a>(&'a self, pool: &'a PoolRef) -> ApiFuture<'a, Pool> {
        Box::pin(self.fetch(routes::pool(pool)))
    }

    fn update_pool<'a>(
        &'a self,
        pool: &'a PoolRef,
        params: &'a UpdatePoolParams,
    ) -> ApiFuture<'a, Pool> {
        Box::pin(self.send_json(Method::PUT, routes::pool(pool), params))
    }

    fn delete_pool<'a>(&'a self, pool: &'a PoolRef) -> ApiFuture<'a, ()> {
        Box::pin(self.delete(routes::pool(pool)))
    }

    fn list_instances(&self) -> ApiFuture<'_, Vec<Instance>> {
        Box::pin(self.fetch(routes::instances()))
    }

    fn get_instance<'a>(&'a self, name: &'a str) -> ApiFuture<'a, Instance> {
        Box::pin(self.fetch(routes::instance(name)))
    }

    fn delete_instance<'a>(&'a self, name: &'a str) -> ApiFuture<'a, ()> {
        Box::pin(self.delete(routes::instance(name)))
    }
}

#[cfg(test)]
mod tests;
