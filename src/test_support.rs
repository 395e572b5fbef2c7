//! Test support utilities shared across unit and integration tests.
//!
//! The doubles here stand in for the cloud, the host, and the identity
//! source. Each keeps its state behind a mutex so it can be shared by the
//! `Send + Sync` driver, and records what was asked of it for assertions.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use camino::Utf8Path;
use thiserror::Error;

use crate::backend::{BackendFuture, BlockStorage, Compute};
use crate::command::{CommandOutput, CommandRunner, SpawnError};
use crate::host::{HostError, HostOps};
use crate::identity::{IdentityError, IdentitySource};
use crate::ids::{AttachmentId, InstanceId, VolumeId};
use crate::volume::{Attachment, Volume, VolumeAttachment, VolumeRequest, VolumeStatus};

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        locked(&self.invocations).clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code with empty output.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        locked(&self.responses).push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, SpawnError> {
        locked(&self.invocations).push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
        });
        locked(&self.responses)
            .pop_front()
            .ok_or_else(|| SpawnError {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: tokio::sync::MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets and clears environment variables while holding a global mutex.
    ///
    /// `set` pairs are applied first; every key in `clear` is then removed.
    pub async fn apply(set: &[(&str, &str)], clear: &[&str]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                set.iter()
                    .map(|(key, _)| *key)
                    .chain(clear.iter().copied())
                    .all(|key| seen.insert(key))
            },
            "duplicate environment variable keys passed to EnvGuard::apply"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(set.len() + clear.len());
        for (key, value) in set {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
        }
        for key in clear {
            previous.push(((*key).to_owned(), env::var_os(key)));
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::remove_var(key) };
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in self.previous.iter().rev() {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Error type returned by [`FakeCloud`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeCloudError {
    /// The addressed resource does not exist.
    #[error("resource {0} not found")]
    NotFound(String),
    /// The call was refused with the given message.
    #[error("{0}")]
    Rejected(String),
}

/// Builds a detached volume snapshot of size 1 GiB.
#[must_use]
pub fn volume_fixture(id: &str, name: &str, status: VolumeStatus) -> Volume {
    Volume {
        id: VolumeId::from(id),
        name: name.to_owned(),
        status,
        size: 1,
        volume_type: None,
        attachments: Vec::new(),
    }
}

#[derive(Debug, Default)]
struct CloudState {
    volumes: Vec<Volume>,
    attachments: Vec<Attachment>,
    scripted: HashMap<String, VecDeque<VolumeStatus>>,
    hold_after_detach: HashMap<String, VolumeStatus>,
    delete_failure: Option<String>,
    trace: Vec<String>,
    next_id: u32,
    attach_calls: u32,
    detach_calls: u32,
    get_calls: u32,
}

impl CloudState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    fn volume_mut(&mut self, id: &str) -> Option<&mut Volume> {
        self.volumes.iter_mut().find(|volume| volume.id.as_str() == id)
    }
}

/// In-memory block-storage and compute service with a call trace.
///
/// Attach and detach update both the compute-side attachment records and
/// the volume snapshot, so the fake behaves like a cooperative provider.
#[derive(Debug, Default)]
pub struct FakeCloud {
    state: Mutex<CloudState>,
    attach_latency: Duration,
}

impl FakeCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every attach call by `latency`, yielding to other tasks.
    #[must_use]
    pub const fn with_attach_latency(mut self, latency: Duration) -> Self {
        self.attach_latency = latency;
        self
    }

    /// Adds `volume` to the inventory.
    pub fn insert_volume(&self, volume: Volume) {
        locked(&self.state).volumes.push(volume);
    }

    /// Adds an `in-use` volume attached to `server`, with the matching
    /// compute-side attachment record.
    pub fn insert_attached_volume(&self, id: &str, name: &str, server: &str) -> Volume {
        let mut state = locked(&self.state);
        let attachment_id = AttachmentId::new(state.next_id("att"));
        state.attachments.push(Attachment {
            id: attachment_id,
            server_id: InstanceId::from(server),
            volume_id: VolumeId::from(id),
            device: Some(String::from("/dev/vdb")),
        });
        let mut volume = volume_fixture(id, name, VolumeStatus::InUse);
        volume.attachments.push(VolumeAttachment {
            server_id: InstanceId::from(server),
        });
        state.volumes.push(volume.clone());
        volume
    }

    /// Records a second compute-side attachment of `volume` on `server`.
    pub fn duplicate_attachment(&self, volume: &str, server: &str) {
        let mut state = locked(&self.state);
        let id = AttachmentId::new(state.next_id("att"));
        state.attachments.push(Attachment {
            id,
            server_id: InstanceId::from(server),
            volume_id: VolumeId::from(volume),
            device: None,
        });
    }

    /// Overrides the status returned by the next reads of volume `id`.
    ///
    /// Each read consumes one status; the stored volume is unchanged.
    pub fn script_statuses(&self, id: &str, statuses: impl IntoIterator<Item = VolumeStatus>) {
        locked(&self.state)
            .scripted
            .entry(id.to_owned())
            .or_default()
            .extend(statuses);
    }

    /// Leaves volume `id` in `status` after it is detached.
    pub fn hold_status_after_detach(&self, id: &str, status: VolumeStatus) {
        locked(&self.state)
            .hold_after_detach
            .insert(id.to_owned(), status);
    }

    /// Makes every delete call fail with `message`.
    pub fn fail_delete(&self, message: &str) {
        locked(&self.state).delete_failure = Some(message.to_owned());
    }

    /// Number of volumes in the inventory.
    #[must_use]
    pub fn volume_count(&self) -> usize {
        locked(&self.state).volumes.len()
    }

    /// Snapshot of the stored volume `id`.
    #[must_use]
    pub fn volume(&self, id: &str) -> Option<Volume> {
        locked(&self.state)
            .volumes
            .iter()
            .find(|volume| volume.id.as_str() == id)
            .cloned()
    }

    /// Cloud calls in the order they were made.
    #[must_use]
    pub fn trace(&self) -> Vec<String> {
        locked(&self.state).trace.clone()
    }

    /// Number of attach calls.
    #[must_use]
    pub fn attach_calls(&self) -> u32 {
        locked(&self.state).attach_calls
    }

    /// Number of detach calls.
    #[must_use]
    pub fn detach_calls(&self) -> u32 {
        locked(&self.state).detach_calls
    }

    /// Number of single-volume reads.
    #[must_use]
    pub fn get_calls(&self) -> u32 {
        locked(&self.state).get_calls
    }

    fn record(&self, entry: String) {
        locked(&self.state).trace.push(entry);
    }
}

impl BlockStorage for FakeCloud {
    type Error = FakeCloudError;

    fn list_volumes<'a>(
        &'a self,
        name: Option<&'a str>,
    ) -> BackendFuture<'a, Vec<Volume>, Self::Error> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.trace.push(format!("list {}", name.unwrap_or("*")));
            Ok(state
                .volumes
                .iter()
                .filter(|volume| name.is_none_or(|wanted| volume.name == wanted))
                .cloned()
                .collect())
        })
    }

    fn get_volume<'a>(&'a self, id: &'a VolumeId) -> BackendFuture<'a, Volume, Self::Error> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.get_calls += 1;
            state.trace.push(format!("get {id}"));
            let scripted = state
                .scripted
                .get_mut(id.as_str())
                .and_then(VecDeque::pop_front);
            let mut volume = state
                .volume_mut(id)
                .cloned()
                .ok_or_else(|| FakeCloudError::NotFound(id.to_string()))?;
            if let Some(status) = scripted {
                volume.status = status;
            }
            Ok(volume)
        })
    }

    fn create_volume<'a>(
        &'a self,
        request: &'a VolumeRequest,
    ) -> BackendFuture<'a, Volume, Self::Error> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.trace.push(format!("create {}", request.name));
            let id = state.next_id("vol");
            let volume = Volume {
                id: VolumeId::new(id),
                name: request.name.clone(),
                status: VolumeStatus::Available,
                size: request.options.size_gb.unwrap_or(1),
                volume_type: request.options.volume_type.clone(),
                attachments: Vec::new(),
            };
            state.volumes.push(volume.clone());
            Ok(volume)
        })
    }

    fn delete_volume<'a>(&'a self, id: &'a VolumeId) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.trace.push(format!("delete {id}"));
            if let Some(message) = state.delete_failure.clone() {
                return Err(FakeCloudError::Rejected(message));
            }
            let before = state.volumes.len();
            state.volumes.retain(|volume| volume.id != *id);
            if state.volumes.len() == before {
                return Err(FakeCloudError::NotFound(id.to_string()));
            }
            Ok(())
        })
    }
}

impl Compute for FakeCloud {
    fn list_attachments<'a>(
        &'a self,
        instance_id: &'a InstanceId,
    ) -> BackendFuture<'a, Vec<Attachment>, Self::Error> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.trace.push(format!("list-attachments {instance_id}"));
            Ok(state
                .attachments
                .iter()
                .filter(|attachment| attachment.server_id == *instance_id)
                .cloned()
                .collect())
        })
    }

    fn attach_volume<'a>(
        &'a self,
        instance_id: &'a InstanceId,
        volume_id: &'a VolumeId,
    ) -> BackendFuture<'a, Attachment, Self::Error> {
        Box::pin(async move {
            self.record(format!("attach {volume_id} to {instance_id}"));
            if !self.attach_latency.is_zero() {
                tokio::time::sleep(self.attach_latency).await;
            }

            let mut state = locked(&self.state);
            state.attach_calls += 1;
            let attachment = Attachment {
                id: AttachmentId::new(state.next_id("att")),
                server_id: instance_id.clone(),
                volume_id: volume_id.clone(),
                device: Some(String::from("/dev/vdb")),
            };
            let volume = state
                .volume_mut(volume_id)
                .ok_or_else(|| FakeCloudError::NotFound(volume_id.to_string()))?;
            volume.status = VolumeStatus::InUse;
            volume.attachments.push(VolumeAttachment {
                server_id: instance_id.clone(),
            });
            state.attachments.push(attachment.clone());
            Ok(attachment)
        })
    }

    fn detach_volume<'a>(
        &'a self,
        instance_id: &'a InstanceId,
        attachment_id: &'a AttachmentId,
    ) -> BackendFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = locked(&self.state);
            state.detach_calls += 1;
            let position = state
                .attachments
                .iter()
                .position(|attachment| {
                    attachment.id == *attachment_id && attachment.server_id == *instance_id
                })
                .ok_or_else(|| FakeCloudError::NotFound(attachment_id.to_string()))?;
            let removed = state.attachments.remove(position);
            state
                .trace
                .push(format!("detach {} from {instance_id}", removed.volume_id));

            let held = state.hold_after_detach.get(removed.volume_id.as_str()).cloned();
            if let Some(volume) = state.volume_mut(&removed.volume_id) {
                volume
                    .attachments
                    .retain(|recorded| recorded.server_id != *instance_id);
                volume.status = held.unwrap_or_else(|| {
                    if volume.attachments.is_empty() {
                        VolumeStatus::Available
                    } else {
                        VolumeStatus::InUse
                    }
                });
            }
            Ok(())
        })
    }
}

#[derive(Debug, Default)]
struct HostState {
    checks: u32,
    filesystem: Option<String>,
    formats: Vec<(String, String)>,
    mounts: HashSet<String>,
    operations: Vec<String>,
}

/// In-memory host with a scripted device node and filesystem.
///
/// By default the device exists on the first check and carries no
/// filesystem.
#[derive(Debug)]
pub struct FakeHost {
    state: Mutex<HostState>,
    appears_after: Option<u32>,
    fail_format: bool,
    format_delay: Duration,
}

impl Default for FakeHost {
    fn default() -> Self {
        Self {
            state: Mutex::default(),
            appears_after: Some(1),
            fail_format: false,
            format_delay: Duration::ZERO,
        }
    }
}

impl FakeHost {
    /// Creates a host whose device appears immediately.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the device appear on existence check number `checks`.
    #[must_use]
    pub const fn device_appears_after(mut self, checks: u32) -> Self {
        self.appears_after = Some(checks);
        self
    }

    /// Makes the device never appear.
    #[must_use]
    pub const fn device_never_appears(mut self) -> Self {
        self.appears_after = None;
        self
    }

    /// Gives the device an existing filesystem.
    #[must_use]
    pub fn with_filesystem(self, fs_type: &str) -> Self {
        locked(&self.state).filesystem = Some(fs_type.to_owned());
        self
    }

    /// Makes every format call fail.
    #[must_use]
    pub const fn fail_format(mut self) -> Self {
        self.fail_format = true;
        self
    }

    /// Makes every format call block the calling thread for `delay`, as a
    /// slow `mkfs` would.
    #[must_use]
    pub const fn with_format_delay(mut self, delay: Duration) -> Self {
        self.format_delay = delay;
        self
    }

    /// Number of device existence checks.
    #[must_use]
    pub fn device_checks(&self) -> u32 {
        locked(&self.state).checks
    }

    /// `(device, fs_type)` pairs passed to format.
    #[must_use]
    pub fn formats(&self) -> Vec<(String, String)> {
        locked(&self.state).formats.clone()
    }

    /// Returns `true` when something is mounted at `path`.
    #[must_use]
    pub fn is_mounted(&self, path: &Utf8Path) -> bool {
        locked(&self.state).mounts.contains(path.as_str())
    }

    /// Host operations in the order they were made.
    #[must_use]
    pub fn operations(&self) -> Vec<String> {
        locked(&self.state).operations.clone()
    }
}

impl HostOps for FakeHost {
    fn device_exists(&self, _device: &Utf8Path) -> bool {
        let mut state = locked(&self.state);
        state.checks += 1;
        self.appears_after
            .is_some_and(|threshold| state.checks >= threshold)
    }

    fn filesystem_type(&self, _device: &Utf8Path) -> Result<Option<String>, HostError> {
        Ok(locked(&self.state).filesystem.clone())
    }

    fn format(&self, device: &Utf8Path, fs_type: &str) -> Result<(), HostError> {
        std::thread::sleep(self.format_delay);
        if self.fail_format {
            return Err(HostError::CommandFailure {
                program: String::from("mkfs"),
                status: Some(1),
                status_text: String::from("1"),
                stderr: String::from("simulated failure"),
            });
        }
        let mut state = locked(&self.state);
        state.operations.push(format!("format {device} {fs_type}"));
        state
            .formats
            .push((device.to_string(), fs_type.to_owned()));
        state.filesystem = Some(fs_type.to_owned());
        Ok(())
    }

    fn mount(&self, device: &Utf8Path, target: &Utf8Path) -> Result<(), HostError> {
        let mut state = locked(&self.state);
        state.operations.push(format!("mount {device} {target}"));
        state.mounts.insert(target.to_string());
        Ok(())
    }

    fn unmount(&self, target: &Utf8Path) -> Result<(), HostError> {
        let mut state = locked(&self.state);
        state.operations.push(format!("unmount {target}"));
        if state.mounts.remove(target.as_str()) {
            Ok(())
        } else {
            Err(HostError::NotMounted {
                path: target.to_string(),
            })
        }
    }
}

/// Identity source returning a fixed instance id, or failing.
#[derive(Clone, Debug)]
pub struct FixedIdentity {
    id: Option<InstanceId>,
}

impl FixedIdentity {
    /// Identity that always resolves to `id`.
    #[must_use]
    pub fn new(id: &str) -> Self {
        Self {
            id: Some(InstanceId::from(id)),
        }
    }

    /// Identity whose source can never be read.
    #[must_use]
    pub const fn unreadable() -> Self {
        Self { id: None }
    }
}

impl IdentitySource for FixedIdentity {
    fn instance_id(&self) -> Result<InstanceId, IdentityError> {
        self.id.clone().ok_or_else(|| IdentityError::Unreadable {
            path: "/fake/product_uuid".into(),
            message: String::from("permission denied"),
        })
    }
}
