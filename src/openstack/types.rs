//! Wire types for the Keystone, Cinder and Nova APIs.

use serde::{Deserialize, Serialize};

use crate::ids::{AttachmentId, InstanceId, VolumeId};
use crate::volume::{Attachment, Volume, VolumeAttachment, VolumeRequest, VolumeStatus};

// Keystone

#[derive(Debug, Serialize)]
pub(crate) struct AuthRequest<'a> {
    pub(crate) auth: AuthBody<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthBody<'a> {
    pub(crate) identity: Identity<'a>,
    pub(crate) scope: Scope<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Identity<'a> {
    pub(crate) methods: [&'static str; 1],
    pub(crate) password: PasswordMethod<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct PasswordMethod<'a> {
    pub(crate) user: User<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct User<'a> {
    pub(crate) name: &'a str,
    pub(crate) domain: DomainRef<'a>,
    pub(crate) password: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct DomainRef<'a> {
    pub(crate) name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct Scope<'a> {
    pub(crate) project: ProjectRef<'a>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum ProjectRef<'a> {
    Id { id: &'a str },
    Name { name: &'a str, domain: DomainRef<'a> },
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub(crate) token: Token,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Token {
    #[serde(default)]
    pub(crate) catalog: Vec<CatalogEntry>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CatalogEntry {
    #[serde(rename = "type")]
    pub(crate) service_type: String,
    #[serde(default)]
    pub(crate) endpoints: Vec<CatalogEndpoint>,
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct CatalogEndpoint {
    pub(crate) interface: String,
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) region_id: Option<String>,
    #[serde(default)]
    pub(crate) region: Option<String>,
}

impl CatalogEndpoint {
    pub(crate) fn in_region(&self, wanted: &str) -> bool {
        self.region_id.as_deref() == Some(wanted) || self.region.as_deref() == Some(wanted)
    }
}

// Cinder

#[derive(Debug, Deserialize)]
pub(crate) struct VolumeList {
    pub(crate) volumes: Vec<WireVolume>,
    #[serde(default)]
    pub(crate) volumes_links: Vec<Link>,
}

impl VolumeList {
    pub(crate) fn next_page(&self) -> Option<&str> {
        self.volumes_links
            .iter()
            .find(|link| link.rel == "next")
            .map(|link| link.href.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct Link {
    pub(crate) href: String,
    pub(crate) rel: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VolumeEnvelope {
    pub(crate) volume: WireVolume,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireVolume {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) name: Option<String>,
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) size: u64,
    #[serde(default)]
    pub(crate) volume_type: Option<String>,
    #[serde(default)]
    pub(crate) attachments: Vec<WireVolumeAttachment>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireVolumeAttachment {
    pub(crate) server_id: String,
}

impl From<WireVolume> for Volume {
    fn from(wire: WireVolume) -> Self {
        Self {
            id: VolumeId::new(wire.id),
            name: wire.name.unwrap_or_default(),
            status: VolumeStatus::from(wire.status.as_str()),
            size: wire.size,
            volume_type: wire.volume_type,
            attachments: wire
                .attachments
                .into_iter()
                .map(|attachment| VolumeAttachment {
                    server_id: InstanceId::new(attachment.server_id),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateVolumeRequest<'a> {
    pub(crate) volume: CreateVolumeBody<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct CreateVolumeBody<'a> {
    pub(crate) name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) volume_type: Option<&'a str>,
}

impl<'a> From<&'a VolumeRequest> for CreateVolumeRequest<'a> {
    fn from(request: &'a VolumeRequest) -> Self {
        Self {
            volume: CreateVolumeBody {
                name: &request.name,
                size: request.options.size_gb,
                volume_type: request.options.volume_type.as_deref(),
            },
        }
    }
}

// Nova

#[derive(Debug, Deserialize)]
pub(crate) struct AttachmentList {
    #[serde(rename = "volumeAttachments")]
    pub(crate) volume_attachments: Vec<WireAttachment>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AttachmentEnvelope {
    #[serde(rename = "volumeAttachment")]
    pub(crate) volume_attachment: WireAttachment,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireAttachment {
    pub(crate) id: String,
    pub(crate) server_id: String,
    pub(crate) volume_id: String,
    #[serde(default)]
    pub(crate) device: Option<String>,
}

impl From<WireAttachment> for Attachment {
    fn from(wire: WireAttachment) -> Self {
        Self {
            id: AttachmentId::new(wire.id),
            server_id: InstanceId::new(wire.server_id),
            volume_id: VolumeId::new(wire.volume_id),
            device: wire.device,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct AttachRequest<'a> {
    #[serde(rename = "volumeAttachment")]
    pub(crate) volume_attachment: AttachBody<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct AttachBody<'a> {
    #[serde(rename = "volumeId")]
    pub(crate) volume_id: &'a str,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::volume::CreateOptions;

    #[test]
    fn volume_detail_maps_status_and_attachments() {
        let body = json!({
            "volumes": [{
                "id": "0f2c4a1e-9b77-4c1d-8a9e-3f5b6c7d8e9f",
                "name": "db1",
                "status": "in-use",
                "size": 10,
                "volume_type": "ssd",
                "attachments": [{
                    "server_id": "host-a",
                    "attachment_id": "att-1",
                    "device": "/dev/vdb"
                }]
            }],
            "volumes_links": [{"href": "https://cinder/v3/p/volumes/detail?marker=x", "rel": "next"}]
        });
        let list: VolumeList = serde_json::from_value(body).expect("decode");
        assert_eq!(
            list.next_page(),
            Some("https://cinder/v3/p/volumes/detail?marker=x")
        );
        let volume = Volume::from(list.volumes.into_iter().next().expect("one volume"));
        assert_eq!(volume.status, VolumeStatus::InUse);
        assert_eq!(volume.size, 10);
        assert_eq!(volume.attachments.len(), 1);
        assert_eq!(
            volume.attachments,
            [VolumeAttachment {
                server_id: InstanceId::new("host-a")
            }]
        );
    }

    #[test]
    fn nameless_volume_and_unknown_status_are_kept() {
        let wire: VolumeEnvelope = serde_json::from_value(json!({
            "volume": {"id": "v", "name": null, "status": "maintenance", "size": 1}
        }))
        .expect("decode");
        let volume = Volume::from(wire.volume);
        assert_eq!(volume.name, "");
        assert_eq!(volume.status.as_str(), "maintenance");
    }

    #[test]
    fn create_request_omits_unset_options() {
        let request = VolumeRequest {
            name: String::from("db1"),
            options: CreateOptions::default(),
        };
        let body = serde_json::to_value(CreateVolumeRequest::from(&request)).expect("encode");
        assert_eq!(body, json!({"volume": {"name": "db1"}}));
    }

    #[test]
    fn create_request_includes_size_and_type() {
        let request = VolumeRequest {
            name: String::from("db1"),
            options: CreateOptions {
                size_gb: Some(10),
                volume_type: Some(String::from("ssd")),
            },
        };
        let body = serde_json::to_value(CreateVolumeRequest::from(&request)).expect("encode");
        assert_eq!(
            body,
            json!({"volume": {"name": "db1", "size": 10, "volume_type": "ssd"}})
        );
    }

    #[test]
    fn nova_attachments_use_camel_case() {
        let list: AttachmentList = serde_json::from_value(json!({
            "volumeAttachments": [{
                "id": "att-9",
                "serverId": "host-a",
                "volumeId": "vol-1",
                "device": "/dev/vdc"
            }]
        }))
        .expect("decode");
        let attachment = Attachment::from(list.volume_attachments.into_iter().next().expect("one"));
        assert_eq!(attachment.id.as_str(), "att-9");
        assert_eq!(attachment.volume_id.as_str(), "vol-1");
        assert_eq!(attachment.device.as_deref(), Some("/dev/vdc"));
    }

    #[test]
    fn attach_request_names_volume_only() {
        let body = serde_json::to_value(AttachRequest {
            volume_attachment: AttachBody { volume_id: "vol-1" },
        })
        .expect("encode");
        assert_eq!(body, json!({"volumeAttachment": {"volumeId": "vol-1"}}));
    }
}
