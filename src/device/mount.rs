//! Scoped, read-only mounts of config drives

use async_trait::async_trait;
use std::future::Future;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, error};

use crate::SourceError;
use crate::race::RaceContext;

/// Prefix of the private directories config drives are mounted on
const MOUNT_POINT_PREFIX: &str = "ignition-rs-configdrive";

/// Mounts and unmounts block devices
///
/// `unmount` is synchronous: it runs from [`MountSession`]'s `Drop`.
#[async_trait]
pub trait Mounter: Send + Sync {
    /// Mount `device` read-only on `target`, detecting the filesystem type
    async fn mount(&self, device: &Path, target: &Path) -> Result<(), SourceError>;

    /// Unmount whatever is mounted on `target`
    fn unmount(&self, target: &Path) -> std::io::Result<()>;
}

/// Default bound on how long an unmount may block its thread
pub const DEFAULT_UNMOUNT_TIMEOUT: Duration = Duration::from_secs(10);

const UNMOUNT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Mounter backed by the system `mount` and `umount` commands
///
/// `unmount` blocks the calling thread while `umount` runs, for at most the
/// unmount timeout; a `umount` still running then is killed and reported as
/// [`std::io::ErrorKind::TimedOut`].
#[derive(Debug, Clone)]
pub struct SystemMounter {
    mount_cmd: PathBuf,
    umount_cmd: PathBuf,
    unmount_timeout: Duration,
}

impl SystemMounter {
    pub fn new(mount_cmd: impl Into<PathBuf>, umount_cmd: impl Into<PathBuf>) -> Self {
        Self {
            mount_cmd: mount_cmd.into(),
            umount_cmd: umount_cmd.into(),
            unmount_timeout: DEFAULT_UNMOUNT_TIMEOUT,
        }
    }

    pub fn with_unmount_timeout(mut self, timeout: Duration) -> Self {
        self.unmount_timeout = timeout;
        self
    }
}

impl Default for SystemMounter {
    fn default() -> Self {
        Self::new("mount", "umount")
    }
}

#[async_trait]
impl Mounter for SystemMounter {
    async fn mount(&self, device: &Path, target: &Path) -> Result<(), SourceError> {
        debug!(
            "Mounting config drive: {} -o ro -t auto {} {}",
            self.mount_cmd.display(),
            device.display(),
            target.display()
        );

        let output = Command::new(&self.mount_cmd)
            .args(["-o", "ro", "-t", "auto"])
            .arg(device)
            .arg(target)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                SourceError::transport(format!(
                    "failed to execute {}: {}",
                    self.mount_cmd.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                "Mount exited with status {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
            return Err(SourceError::transport(format!(
                "mounting {} at {} failed: {}",
                device.display(),
                target.display(),
                stderr.trim()
            )));
        }

        Ok(())
    }

    fn unmount(&self, target: &Path) -> std::io::Result<()> {
        debug!(
            "Unmounting config drive: {} {}",
            self.umount_cmd.display(),
            target.display()
        );

        let mut child = std::process::Command::new(&self.umount_cmd)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        let deadline = std::time::Instant::now() + self.unmount_timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if std::time::Instant::now() >= deadline {
                child.kill()?;
                child.wait()?;
                return Err(std::io::Error::new(
                    std::io::ErrorKind::TimedOut,
                    format!(
                        "{} did not finish within {:?}",
                        self.umount_cmd.display(),
                        self.unmount_timeout
                    ),
                ));
            }
            std::thread::sleep(UNMOUNT_POLL_INTERVAL);
        };

        if !status.success() {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                pipe.read_to_string(&mut stderr)?;
            }
            return Err(std::io::Error::other(format!(
                "{} exited with status {}: {}",
                self.umount_cmd.display(),
                status.code().unwrap_or(-1),
                stderr.trim()
            )));
        }

        Ok(())
    }
}

/// A private, empty directory that is removed when dropped
///
/// Removal is non-recursive: if an unmount failed, the device contents are
/// left alone and the directory stays behind.
#[derive(Debug)]
struct MountPoint {
    path: PathBuf,
}

impl MountPoint {
    fn create() -> Result<Self, SourceError> {
        debug!("Creating temporary mount point");
        let path = tempfile::Builder::new()
            .prefix(MOUNT_POINT_PREFIX)
            .tempdir()
            .map_err(|e| SourceError::transport(format!("failed to create temp directory: {e}")))?
            .keep();
        Ok(Self { path })
    }
}

impl Drop for MountPoint {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir(&self.path) {
            error!(
                "Failed to remove mount point {}: {}",
                self.path.display(),
                e
            );
        }
    }
}

/// A mounted config drive
///
/// Dropping the session unmounts the device and then removes the mount
/// point, exactly once, whether the owning task returned, failed, panicked
/// or was cancelled. The session exists before the mount is attempted, so a
/// mount interrupted half-way is still unmounted.
pub struct MountSession {
    mounter: Arc<dyn Mounter>,
    device: PathBuf,
    // Set while a mount may be in effect on `point`.
    mounted: bool,
    // Dropped after `Drop::drop` has unmounted.
    point: MountPoint,
}

impl MountSession {
    /// Root of the mounted filesystem
    pub fn path(&self) -> &Path {
        &self.point.path
    }
}

impl Drop for MountSession {
    fn drop(&mut self) {
        if !self.mounted {
            return;
        }
        debug!(
            "Unmounting {} at {}",
            self.device.display(),
            self.point.path.display()
        );
        if let Err(e) = self.mounter.unmount(&self.point.path) {
            error!(
                "Failed to unmount {} at {}: {}",
                self.device.display(),
                self.point.path.display(),
                e
            );
        }
    }
}

/// Mount `device` read-only, run `f` on the mount root, then tear it down
///
/// The mount itself always runs to completion; the context is checked once
/// it returns and bounds `f`. Teardown errors are logged and never replace
/// `f`'s own result.
pub async fn with_mount<F, Fut, T>(
    mounter: Arc<dyn Mounter>,
    device: &Path,
    ctx: &RaceContext,
    f: F,
) -> Result<T, SourceError>
where
    F: FnOnce(PathBuf) -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    if let Some(err) = ctx.err() {
        return Err(err);
    }

    let mut session = MountSession {
        mounter,
        device: device.to_path_buf(),
        mounted: true,
        point: MountPoint::create()?,
    };

    let mounted = session
        .mounter
        .mount(&session.device, &session.point.path)
        .await;
    if let Err(e) = mounted {
        session.mounted = false;
        return Err(e);
    }
    if let Some(err) = ctx.err() {
        return Err(err);
    }

    let result = ctx.run(f(session.path().to_path_buf())).await;
    drop(session);
    result
}
