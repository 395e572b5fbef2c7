//! Nova `os-volume_attachments` calls.

use reqwest::Method;

use super::types::{AttachBody, AttachRequest, AttachmentEnvelope, AttachmentList};
use super::{Call, OpenStackBackend, OpenStackError, Service, Target};
use crate::ids::{AttachmentId, InstanceId, VolumeId};
use crate::volume::Attachment;

fn attachments_path(instance_id: &InstanceId) -> String {
    format!("/servers/{instance_id}/os-volume_attachments")
}

impl OpenStackBackend {
    pub(super) async fn fetch_attachments(
        &self,
        instance_id: &InstanceId,
    ) -> Result<Vec<Attachment>, OpenStackError> {
        let call = Call::<()> {
            method: Method::GET,
            target: Target::Path(Service::Compute, attachments_path(instance_id)),
            query: &[],
            body: None,
        };
        let (url, response) = self.execute(&call).await?;
        let response = Self::expect_success("GET", url.clone(), response).await?;
        let list: AttachmentList = Self::decode(&url, response).await?;
        Ok(list
            .volume_attachments
            .into_iter()
            .map(Attachment::from)
            .collect())
    }

    pub(super) async fn post_attachment(
        &self,
        instance_id: &InstanceId,
        volume_id: &VolumeId,
    ) -> Result<Attachment, OpenStackError> {
        let body = AttachRequest {
            volume_attachment: AttachBody {
                volume_id: volume_id.as_str(),
            },
        };
        let call = Call {
            method: Method::POST,
            target: Target::Path(Service::Compute, attachments_path(instance_id)),
            query: &[],
            body: Some(&body),
        };
        let (url, response) = self.execute(&call).await?;
        let response = Self::expect_success("POST", url.clone(), response).await?;
        let envelope: AttachmentEnvelope = Self::decode(&url, response).await?;
        Ok(Attachment::from(envelope.volume_attachment))
    }

    pub(super) async fn remove_attachment(
        &self,
        instance_id: &InstanceId,
        attachment_id: &AttachmentId,
    ) -> Result<(), OpenStackError> {
        let call = Call::<()> {
            method: Method::DELETE,
            target: Target::Path(
                Service::Compute,
                format!("{}/{attachment_id}", attachments_path(instance_id)),
            ),
            query: &[],
            body: None,
        };
        let (url, response) = self.execute(&call).await?;
        Self::expect_success("DELETE", url, response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attachment_path_embeds_instance() {
        assert_eq!(
            attachments_path(&InstanceId::from("0a1b")),
            "/servers/0a1b/os-volume_attachments"
        );
    }
}
