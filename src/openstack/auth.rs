//! Keystone v3 password authentication and endpoint selection.

use tracing::debug;

use super::HTTP_CLIENT;
use super::error::OpenStackError;
use super::types::{
    AuthBody, AuthRequest, CatalogEntry, DomainRef, Identity, PasswordMethod, ProjectRef, Scope,
    TokenResponse, User,
};
use crate::config::OpenStackConfig;

const SUBJECT_TOKEN_HEADER: &str = "X-Subject-Token";
const PUBLIC_INTERFACE: &str = "public";
/// Block-storage service types, most preferred first.
const BLOCK_STORAGE_TYPES: [&str; 3] = ["volumev3", "block-storage", "volumev2"];
const COMPUTE_TYPES: [&str; 1] = ["compute"];

/// Token and service endpoints obtained from Keystone.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Session {
    pub(crate) token: String,
    pub(crate) block_storage_url: String,
    pub(crate) compute_url: String,
}

impl Session {
    /// Block-storage endpoint chosen from the catalog.
    #[must_use]
    pub fn block_storage_url(&self) -> &str {
        &self.block_storage_url
    }

    /// Compute endpoint chosen from the catalog.
    #[must_use]
    pub fn compute_url(&self) -> &str {
        &self.compute_url
    }
}

fn auth_request(config: &OpenStackConfig) -> AuthRequest<'_> {
    let project = match config.project_id.as_deref().filter(|id| !id.trim().is_empty()) {
        Some(id) => ProjectRef::Id { id },
        None => ProjectRef::Name {
            name: &config.project_name,
            domain: DomainRef {
                name: &config.project_domain_name,
            },
        },
    };
    AuthRequest {
        auth: AuthBody {
            identity: Identity {
                methods: ["password"],
                password: PasswordMethod {
                    user: User {
                        name: &config.username,
                        domain: DomainRef {
                            name: &config.user_domain_name,
                        },
                        password: &config.password,
                    },
                },
            },
            scope: Scope { project },
        },
    }
}

fn tokens_url(auth_url: &str) -> String {
    format!("{}/auth/tokens", auth_url.trim_end_matches('/'))
}

/// Picks the public endpoint of the first service type present in the
/// catalog, honouring the region when one is configured.
pub(crate) fn select_endpoint(
    catalog: &[CatalogEntry],
    service_types: &[&str],
    region: Option<&str>,
) -> Result<String, OpenStackError> {
    service_types
        .iter()
        .filter_map(|wanted| {
            catalog
                .iter()
                .find(|entry| entry.service_type == *wanted)
        })
        .flat_map(|entry| entry.endpoints.iter())
        .find(|endpoint| {
            endpoint.interface == PUBLIC_INTERFACE
                && region.is_none_or(|name| endpoint.in_region(name))
        })
        .map(|endpoint| endpoint.url.trim_end_matches('/').to_owned())
        .ok_or_else(|| OpenStackError::EndpointNotFound {
            service: service_types.join("/"),
            region: region.map(str::to_owned),
        })
}

/// Authenticates with Keystone and resolves the service endpoints.
///
/// # Errors
///
/// Returns [`OpenStackError::Auth`] when Keystone rejects the credentials,
/// [`OpenStackError::MissingToken`] when no token header is returned, and
/// [`OpenStackError::EndpointNotFound`] when the catalog lacks a service.
pub(crate) async fn authenticate(config: &OpenStackConfig) -> Result<Session, OpenStackError> {
    let url = tokens_url(&config.auth_url);
    debug!(%url, user = %config.username, "authenticating with keystone");
    let transport = |err: reqwest::Error| OpenStackError::Transport {
        url: url.clone(),
        message: err.to_string(),
    };

    let response = HTTP_CLIENT
        .post(&url)
        .json(&auth_request(config))
        .send()
        .await
        .map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(OpenStackError::Auth {
            status: status.as_u16(),
            body,
        });
    }

    let token = response
        .headers()
        .get(SUBJECT_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned)
        .ok_or(OpenStackError::MissingToken)?;
    let body: TokenResponse = response.json().await.map_err(|err| OpenStackError::Decode {
        url: url.clone(),
        message: err.to_string(),
    })?;

    let region = config.region_name.as_deref();
    let session = Session {
        token,
        block_storage_url: select_endpoint(&body.token.catalog, &BLOCK_STORAGE_TYPES, region)?,
        compute_url: select_endpoint(&body.token.catalog, &COMPUTE_TYPES, region)?,
    };
    debug!(
        block_storage = %session.block_storage_url,
        compute = %session.compute_url,
        "keystone session established"
    );
    Ok(session)
}
