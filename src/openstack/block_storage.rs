//! Cinder volume calls.

use reqwest::{Method, StatusCode};
use tracing::debug;

use super::types::{CreateVolumeRequest, VolumeEnvelope, VolumeList};
use super::{Call, OpenStackBackend, OpenStackError, Service, Target};
use crate::ids::VolumeId;
use crate::volume::{Volume, VolumeRequest};

fn volume_path(id: &VolumeId) -> Target<'static> {
    Target::Path(Service::BlockStorage, format!("/volumes/{id}"))
}

impl OpenStackBackend {
    /// Lists volumes, following `volumes_links` until the last page.
    pub(super) async fn fetch_volumes(
        &self,
        name: Option<&str>,
    ) -> Result<Vec<Volume>, OpenStackError> {
        let filter: Vec<(&str, &str)> = name.map(|value| ("name", value)).into_iter().collect();
        let mut volumes = Vec::new();
        let mut next: Option<String> = None;

        loop {
            let call = match next.as_deref() {
                None => Call::<()> {
                    method: Method::GET,
                    target: Target::Path(Service::BlockStorage, String::from("/volumes/detail")),
                    query: &filter,
                    body: None,
                },
                Some(url) => Call::<()> {
                    method: Method::GET,
                    target: Target::Absolute(url),
                    query: &[],
                    body: None,
                },
            };
            let (url, response) = self.execute(&call).await?;
            let response = Self::expect_success("GET", url.clone(), response).await?;
            let page: VolumeList = Self::decode(&url, response).await?;

            let following = page.next_page().map(str::to_owned);
            volumes.extend(page.volumes.into_iter().map(Volume::from));
            match following {
                Some(link) if next.as_deref() != Some(link.as_str()) => next = Some(link),
                _ => break,
            }
        }

        debug!(count = volumes.len(), filter = ?name, "listed volumes");
        Ok(volumes)
    }

    pub(super) async fn fetch_volume(&self, id: &VolumeId) -> Result<Volume, OpenStackError> {
        let call = Call::<()> {
            method: Method::GET,
            target: volume_path(id),
            query: &[],
            body: None,
        };
        let (url, response) = self.execute(&call).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(OpenStackError::VolumeNotFound {
                volume_id: id.to_string(),
            });
        }
        let response = Self::expect_success("GET", url.clone(), response).await?;
        let envelope: VolumeEnvelope = Self::decode(&url, response).await?;
        Ok(Volume::from(envelope.volume))
    }

    pub(super) async fn post_volume(
        &self,
        request: &VolumeRequest,
    ) -> Result<Volume, OpenStackError> {
        let body = CreateVolumeRequest::from(request);
        let call = Call {
            method: Method::POST,
            target: Target::Path(Service::BlockStorage, String::from("/volumes")),
            query: &[],
            body: Some(&body),
        };
        let (url, response) = self.execute(&call).await?;
        let response = Self::expect_success("POST", url.clone(), response).await?;
        let envelope: VolumeEnvelope = Self::decode(&url, response).await?;
        Ok(Volume::from(envelope.volume))
    }

    pub(super) async fn remove_volume(&self, id: &VolumeId) -> Result<(), OpenStackError> {
        let call = Call::<()> {
            method: Method::DELETE,
            target: volume_path(id),
            query: &[],
            body: None,
        };
        let (url, response) = self.execute(&call).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(OpenStackError::VolumeNotFound {
                volume_id: id.to_string(),
            });
        }
        Self::expect_success("DELETE", url, response).await?;
        Ok(())
    }
}
