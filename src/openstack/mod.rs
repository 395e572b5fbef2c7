//! OpenStack backend: Keystone authentication, Cinder volumes and Nova
//! volume attachments over their REST APIs.

mod auth;
mod block_storage;
mod compute;
mod error;
mod types;

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::backend::{BackendFuture, BlockStorage, Compute};
use crate::config::OpenStackConfig;
use crate::ids::{AttachmentId, InstanceId, VolumeId};
use crate::volume::{Attachment, Volume, VolumeRequest};

pub use auth::Session;
pub use error::OpenStackError;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const AUTH_TOKEN_HEADER: &str = "X-Auth-Token";

// Idle connections are not kept: actix workers each run their own runtime
// and a pooled connection is bound to the runtime that opened it.
static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .pool_max_idle_per_host(0)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

/// Service a request is addressed to.
#[derive(Clone, Copy, Debug)]
enum Service {
    BlockStorage,
    Compute,
}

/// Where a request goes: a path under a catalog endpoint, or an absolute
/// URL returned by the service (pagination links).
#[derive(Clone, Debug)]
enum Target<'a> {
    Path(Service, String),
    Absolute(&'a str),
}

impl Target<'_> {
    fn url(&self, session: &Session) -> String {
        match self {
            Self::Path(Service::BlockStorage, path) => {
                format!("{}{path}", session.block_storage_url)
            }
            Self::Path(Service::Compute, path) => format!("{}{path}", session.compute_url),
            Self::Absolute(url) => (*url).to_owned(),
        }
    }
}

/// Request parameters shared by every API call.
struct Call<'a, B> {
    method: Method,
    target: Target<'a>,
    query: &'a [(&'a str, &'a str)],
    body: Option<&'a B>,
}

/// Backend that talks to Cinder and Nova with a Keystone token.
///
/// The token is renewed once when a call is rejected with `401`.
#[derive(Debug)]
pub struct OpenStackBackend {
    config: OpenStackConfig,
    session: RwLock<Session>,
}

impl OpenStackBackend {
    /// Validates the credentials and authenticates with Keystone.
    ///
    /// # Errors
    ///
    /// Returns [`OpenStackError::Config`] for incomplete credentials and the
    /// authentication errors of the Keystone exchange.
    pub async fn connect(config: OpenStackConfig) -> Result<Self, OpenStackError> {
        config.validate()?;
        let session = auth::authenticate(&config).await?;
        Ok(Self {
            config,
            session: RwLock::new(session),
        })
    }

    /// Snapshot of the current session.
    pub async fn session(&self) -> Session {
        self.session.read().await.clone()
    }

    async fn execute<B: Serialize + Sync>(
        &self,
        call: &Call<'_, B>,
    ) -> Result<(String, Response), OpenStackError> {
        let session = self.session().await;
        let (url, response) = Self::send(&session, call).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok((url, response));
        }

        warn!(%url, "token rejected; re-authenticating");
        let renewed = auth::authenticate(&self.config).await?;
        *self.session.write().await = renewed.clone();
        Self::send(&renewed, call).await
    }

    async fn send<B: Serialize + Sync>(
        session: &Session,
        call: &Call<'_, B>,
    ) -> Result<(String, Response), OpenStackError> {
        let url = call.target.url(session);
        debug!(method = %call.method, %url, "openstack request");
        let mut request = HTTP_CLIENT
            .request(call.method.clone(), &url)
            .header(AUTH_TOKEN_HEADER, &session.token);
        if !call.query.is_empty() {
            request = request.query(call.query);
        }
        if let Some(body) = call.body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|err| OpenStackError::Transport {
                url: url.clone(),
                message: err.to_string(),
            })?;
        Ok((url, response))
    }

    async fn expect_success(
        method: &'static str,
        url: String,
        response: Response,
    ) -> Result<Response, OpenStackError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(OpenStackError::Api {
            method,
            url,
            status: status.as_u16(),
            body,
        })
    }

    async fn decode<T: DeserializeOwned>(url: &str, response: Response) -> Result<T, OpenStackError> {
        response.json().await.map_err(|err| OpenStackError::Decode {
            url: url.to_owned(),
            message: err.to_string(),
        })
    }
}

impl BlockStorage for OpenStackBackend {
    type Error = OpenStackError;

    fn list_volumes<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> BackendFuture<'a, Vec<Volume>, Self::Error> {
        Box::pin(async move { self.fetch_volumes(name).await })
    }

    fn get_volume<'a>(&'a self, id: &'a VolumeId) -> BackendFuture<'a, Volume, Self::Error> {
        Box::pin(async move { self.fetch_volume(id).await })
    }

    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeRequest,
    ) -> BackendFuture<'a, Volume, Self::Error> {
        Box::pin(async move { self.post_volume(request).await })
    }

    fn delete_volume<'a>(&'a self, id: &'a VolumeId) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.remove_volume(id).await })
    }
}

impl Compute for OpenStackBackend {
    fn list_attachments<'a>(
        &'a self,
        instance_id: &'a InstanceId,
    ) -> BackendFuture<'a, Vec<Attachment>, Self::Error> {
        Box::pin(async move { self.fetch_attachments(instance_id).await })
    }

    fn attach_volume<'a>(
        &'a self,
        instance_id: &'a InstanceId,
        volume_id: &'a VolumeId,
    ) -> BackendFuture<'a, Attachment, Self::Error> {
        Box::pin(async move { self.post_attachment(instance_id, volume_id).await })
    }

    fn detach_volume<'a>(
        &'a self,
        instance_id: &'a InstanceId,
        attachment_id: &'a AttachmentId,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move { self.remove_attachment(instance_id, attachment_id).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session {
            token: String::from("t"),
            block_storage_url: String::from("https://cinder/v3/p"),
            compute_url: String::from("https://nova/v2.1"),
        }
    }

    #[test]
    fn paths_resolve_against_service_endpoints() {
        let volumes = Target::Path(Service::BlockStorage, String::from("/volumes/v1"));
        let attachments = Target::Path(
            Service::Compute,
            String::from("/servers/s1/os-volume_attachments"),
        );
        assert_eq!(volumes.url(&session()), "https://cinder/v3/p/volumes/v1");
        assert_eq!(
            attachments.url(&session()),
            "https://nova/v2.1/servers/s1/os-volume_attachments"
        );
    }

    #[test]
    fn absolute_targets_are_used_verbatim() {
        let next = "https://cinder/v3/p/volumes/detail?marker=abc";
        assert_eq!(Target::Absolute(next).url(&session()), next);
    }
}
