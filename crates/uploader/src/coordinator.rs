//! Coordinator seam.
//!
//! The orchestrator only talks to the coordinator through [`Coordinator`];
//! [`HttpCoordinator`] implements it over reqwest and tests use mocks.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde::de::DeserializeOwned;
use stowage_protocol::constants::{
    SESSION_HEADER, complete_file_path, finalize_path, init_path, start_file_path,
};
use stowage_protocol::{
    ApiErrorBody, CompleteFileRequest, CompleteFileResponse, FinalizeResponse, InitRequest,
    InitResponse, StartFileRequest, UploadDescriptor,
};
use stowage_transfer::truncate_error_body;
use tracing::trace;

use crate::error::UploadError;

/// Boxed future returned by [`Coordinator`] methods.
pub type CoordinatorFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, UploadError>> + Send + 'a>>;

/// The coordinator's four batch calls.
pub trait Coordinator: Send + Sync {
    fn init<'a>(&'a self, request: &'a InitRequest) -> CoordinatorFuture<'a, InitResponse>;

    fn start_file<'a>(
        &'a self,
        batch_id: &'a str,
        session_id: &'a str,
        request: &'a StartFileRequest,
    ) -> CoordinatorFuture<'a, UploadDescriptor>;

    fn complete_file<'a>(
        &'a self,
        batch_id: &'a str,
        session_id: &'a str,
        request: &'a CompleteFileRequest,
    ) -> CoordinatorFuture<'a, CompleteFileResponse>;

    fn finalize<'a>(
        &'a self,
        batch_id: &'a str,
        session_id: &'a str,
    ) -> CoordinatorFuture<'a, FinalizeResponse>;
}

/// [`Coordinator`] speaking JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpCoordinator {
    client: reqwest::Client,
    base_url: String,
    api_token: Option<String>,
}

impl HttpCoordinator {
    /// Creates a client for the coordinator at `base_url`.
    ///
    /// `api_token`, when set, is sent as a bearer token on every call.
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            api_token: api_token.filter(|t| !t.is_empty()),
        }
    }

    async fn post<Req, Resp>(
        &self,
        path: &str,
        session_id: Option<&str>,
        body: &Req,
    ) -> Result<Resp, UploadError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.client.post(&url).json(body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token);
        }
        if let Some(session) = session_id {
            request = request.header(SESSION_HEADER, session);
        }

        let response = request
            .send()
            .await
            .map_err(UploadError::from_reqwest)?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(UploadError::from_reqwest)?;
        trace!(%url, status = status.as_u16(), bytes = bytes.len(), "coordinator response");

        if !status.is_success() {
            return Err(UploadError::Coordinator {
                status: status.as_u16(),
                message: error_message(&bytes),
            });
        }
        Ok(serde_json::from_slice(&bytes)?)
    }
}

impl Coordinator for HttpCoordinator {
    fn init<'a>(&'a self, request: &'a InitRequest) -> CoordinatorFuture<'a, InitResponse> {
        Box::pin(async move { self.post(&init_path(), None, request).await })
    }

    fn start_file<'a>(
        &'a self,
        batch_id: &'a str,
        session_id: &'a str,
        request: &'a StartFileRequest,
    ) -> CoordinatorFuture<'a, UploadDescriptor> {
        Box::pin(async move {
            self.post(&start_file_path(batch_id), Some(session_id), request)
                .await
        })
    }

    fn complete_file<'a>(
        &'a self,
        batch_id: &'a str,
        session_id: &'a str,
        request: &'a CompleteFileRequest,
    ) -> CoordinatorFuture<'a, CompleteFileResponse> {
        Box::pin(async move {
            self.post(&complete_file_path(batch_id), Some(session_id), request)
                .await
        })
    }

    fn finalize<'a>(
        &'a self,
        batch_id: &'a str,
        session_id: &'a str,
    ) -> CoordinatorFuture<'a, FinalizeResponse> {
        Box::pin(async move {
            let empty = serde_json::Map::new();
            self.post(&finalize_path(batch_id), Some(session_id), &empty)
                .await
        })
    }
}

/// Prefers the structured `{error, message}` body; falls back to raw text.
fn error_message(body: &[u8]) -> String {
    if let Ok(api) = serde_json::from_slice::<ApiErrorBody>(body) {
        return api.to_string();
    }
    truncate_error_body(String::from_utf8_lossy(body).into_owned())
}
