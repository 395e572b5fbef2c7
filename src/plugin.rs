//! Docker volume plugin protocol served over a Unix socket.
//!
//! Every endpoint is a `POST` with a JSON body. Failures are reported with
//! status 200 and a non-empty `Err` field, which is how the runtime expects
//! plugin errors to arrive.

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;

use actix_web::error::InternalError;
use actix_web::{App, HttpResponse, HttpServer, web};
use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::Compute;
use crate::driver::{Capabilities, VolumeDriver, VolumeInfo};
use crate::host::HostOps;
use crate::identity::IdentitySource;
use crate::volume::CreateOptions;

/// Content type sent by the runtime on plugin requests.
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1.2+json";

/// Future returned by [`VolumePlugin`] operations; errors are the messages
/// reported to the runtime.
pub type PluginFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

/// Operations exposed through the plugin protocol.
pub trait VolumePlugin: Send + Sync {
    /// Creates a volume.
    fn create<'a>(&'a self, name: &'a str, options: CreateOptions) -> PluginFuture<'a, ()>;
    /// Deletes a volume.
    fn remove<'a>(&'a self, name: &'a str) -> PluginFuture<'a, ()>;
    /// Mounts a volume and returns its mount point.
    fn mount<'a>(&'a self, name: &'a str) -> PluginFuture<'a, String>;
    /// Unmounts and detaches a volume.
    fn unmount<'a>(&'a self, name: &'a str) -> PluginFuture<'a, ()>;
    /// Mount point of a volume.
    ///
    /// # Errors
    ///
    /// Returns the message to report when the name is unusable.
    fn path(&self, name: &str) -> Result<String, String>;
    /// Looks up one volume.
    fn get<'a>(&'a self, name: &'a str) -> PluginFuture<'a, VolumeInfo>;
    /// Lists all volumes.
    fn list(&self) -> PluginFuture<'_, Vec<VolumeInfo>>;
    /// Capabilities advertised to the runtime.
    fn capabilities(&self) -> Capabilities;
}

impl<C, H, I> VolumePlugin for VolumeDriver<C, H, I>
where
    C: Compute,
    H: HostOps + 'static,
    I: IdentitySource,
{
    fn create<'a>(&'a self, name: &'a str, options: CreateOptions) -> PluginFuture<'a, ()> {
        Box::pin(async move {
            Self::create(self, name, options)
                .await
                .map(drop)
                .map_err(|err| err.to_string())
        })
    }

    fn remove<'a>(&'a self, name: &'a str) -> PluginFuture<'a, ()> {
        Box::pin(async move { Self::remove(self, name).await.map_err(|err| err.to_string()) })
    }

    fn mount<'a>(&'a self, name: &'a str) -> PluginFuture<'a, String> {
        Box::pin(async move {
            Self::mount(self, name)
                .await
                .map(camino::Utf8PathBuf::into_string)
                .map_err(|err| err.to_string())
        })
    }

    fn unmount<'a>(&'a self, name: &'a str) -> PluginFuture<'a, ()> {
        Box::pin(async move { Self::unmount(self, name).await.map_err(|err| err.to_string()) })
    }

    fn path(&self, name: &str) -> Result<String, String> {
        Self::path(self, name)
            .map(camino::Utf8PathBuf::into_string)
            .map_err(|err| err.to_string())
    }

    fn get<'a>(&'a self, name: &'a str) -> PluginFuture<'a, VolumeInfo> {
        Box::pin(async move { Self::get(self, name).await.map_err(|err| err.to_string()) })
    }

    fn list(&self) -> PluginFuture<'_, Vec<VolumeInfo>> {
        Box::pin(async move { Self::list(self).await.map_err(|err| err.to_string()) })
    }

    fn capabilities(&self) -> Capabilities {
        Self::capabilities(self)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NameRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRequest {
    name: String,
    #[serde(default)]
    opts: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MountRequest {
    name: String,
    #[serde(default, rename = "ID")]
    id: Option<String>,
}

#[derive(Debug, Serialize)]
struct Reply<T> {
    #[serde(flatten)]
    body: T,
    #[serde(rename = "Err")]
    err: String,
}

#[derive(Debug, Serialize)]
struct Empty {}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct MountpointBody {
    mountpoint: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeBody {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    mountpoint: Option<String>,
}

impl From<VolumeInfo> for VolumeBody {
    fn from(info: VolumeInfo) -> Self {
        Self {
            name: info.name,
            mountpoint: info.mountpoint.map(camino::Utf8PathBuf::into_string),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct GetBody {
    volume: VolumeBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ListBody {
    volumes: Vec<VolumeBody>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct CapabilitiesBody {
    capabilities: ScopeBody,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct ScopeBody {
    scope: &'static str,
}

fn failure(message: String) -> HttpResponse {
    HttpResponse::Ok().json(Reply {
        body: Empty {},
        err: message,
    })
}

fn respond<T: Serialize>(endpoint: &str, result: Result<T, String>) -> HttpResponse {
    match result {
        Ok(body) => HttpResponse::Ok().json(Reply {
            body,
            err: String::new(),
        }),
        Err(message) => {
            warn!(endpoint, error = %message, "plugin request failed");
            failure(message)
        }
    }
}

#[expect(clippy::unused_async, reason = "actix handlers are async")]
async fn activate() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "Implements": ["VolumeDriver"] }))
}

async fn create(plugin: web::Data<dyn VolumePlugin>, request: web::Json<CreateRequest>) -> HttpResponse {
    let CreateRequest { name, opts } = request.into_inner();
    let options = CreateOptions::from_options(&opts.unwrap_or_default());
    let result = plugin.create(&name, options).await.map(|()| Empty {});
    respond("Create", result)
}

async fn remove(plugin: web::Data<dyn VolumePlugin>, request: web::Json<NameRequest>) -> HttpResponse {
    let result = plugin.remove(&request.name).await.map(|()| Empty {});
    respond("Remove", result)
}

async fn mount(plugin: web::Data<dyn VolumePlugin>, request: web::Json<MountRequest>) -> HttpResponse {
    info!(volume = %request.name, container = ?request.id, "mount requested by runtime");
    let result = plugin
        .mount(&request.name)
        .await
        .map(|mountpoint| MountpointBody { mountpoint });
    respond("Mount", result)
}

async fn unmount(plugin: web::Data<dyn VolumePlugin>, request: web::Json<MountRequest>) -> HttpResponse {
    info!(volume = %request.name, container = ?request.id, "unmount requested by runtime");
    let result = plugin.unmount(&request.name).await.map(|()| Empty {});
    respond("Unmount", result)
}

#[expect(clippy::unused_async, reason = "actix handlers are async")]
async fn path(plugin: web::Data<dyn VolumePlugin>, request: web::Json<NameRequest>) -> HttpResponse {
    let result = plugin
        .path(&request.name)
        .map(|mountpoint| MountpointBody { mountpoint });
    respond("Path", result)
}

async fn get(plugin: web::Data<dyn VolumePlugin>, request: web::Json<NameRequest>) -> HttpResponse {
    let result = plugin.get(&request.name).await.map(|info| GetBody {
        volume: VolumeBody::from(info),
    });
    respond("Get", result)
}

async fn list(plugin: web::Data<dyn VolumePlugin>) -> HttpResponse {
    let result = plugin.list().await.map(|volumes| ListBody {
        volumes: volumes.into_iter().map(VolumeBody::from).collect(),
    });
    respond("List", result)
}

#[expect(clippy::unused_async, reason = "actix handlers are async")]
async fn capabilities(plugin: web::Data<dyn VolumePlugin>) -> HttpResponse {
    let scope = plugin.capabilities().scope.as_str();
    respond(
        "Capabilities",
        Ok(CapabilitiesBody {
            capabilities: ScopeBody { scope },
        }),
    )
}

/// JSON extractor settings: any content type is accepted, and malformed
/// bodies are answered with an `Err` reply.
fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .content_type_required(false)
        .error_handler(|err, _request| {
            let message = format!("malformed request: {err}");
            InternalError::from_response(err, failure(message)).into()
        })
}

/// Registers the plugin endpoints.
///
/// The caller supplies the [`VolumePlugin`] as `web::Data<dyn VolumePlugin>`.
pub fn configure(config: &mut web::ServiceConfig) {
    config
        .app_data(json_config())
        .route("/Plugin.Activate", web::post().to(activate))
        .route("/VolumeDriver.Create", web::post().to(create))
        .route("/VolumeDriver.Remove", web::post().to(remove))
        .route("/VolumeDriver.Mount", web::post().to(mount))
        .route("/VolumeDriver.Unmount", web::post().to(unmount))
        .route("/VolumeDriver.Path", web::post().to(path))
        .route("/VolumeDriver.Get", web::post().to(get))
        .route("/VolumeDriver.List", web::post().to(list))
        .route("/VolumeDriver.Capabilities", web::post().to(capabilities));
}

/// Removes a stale socket left by a previous run and creates its directory.
fn prepare_socket(socket: &Utf8Path) -> io::Result<()> {
    let parent = socket.parent().unwrap_or_else(|| Utf8Path::new("/"));
    let name = socket
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "socket path has no file name"))?;
    Dir::create_ambient_dir_all(parent, ambient_authority())?;
    let dir = Dir::open_ambient_dir(parent, ambient_authority())?;
    match dir.remove_file(name) {
        Ok(()) => {
            warn!(%socket, "removed stale plugin socket");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err),
    }
}

/// Serves the plugin protocol on `socket` until the server stops.
///
/// # Errors
///
/// Returns an I/O error when the socket cannot be prepared or bound.
pub async fn serve(socket: &Utf8Path, plugin: Arc<dyn VolumePlugin>) -> io::Result<()> {
    prepare_socket(socket)?;
    let data = web::Data::from(plugin);
    info!(%socket, "serving volume plugin");
    HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
        .bind_uds(socket.as_std_path())?
        .run()
        .await
}
