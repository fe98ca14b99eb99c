use std::sync::Arc;

use thiserror::Error;
use tokio::select;
use tokio::signal::unix::{Signal, SignalKind, signal};

use dbfs::fs::DbFs;
use dbfs::refresh::{RefreshTrigger, RefreshWorker, log_snapshot};
use dbfs::source::{DataSource as _, PgSource, SourceError};

use crate::app_config::MountConfig;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("failed to prepare mount point: {0}")]
    MountPoint(#[source] std::io::Error),

    #[error("initial load failed: {0}")]
    InitialLoad(#[from] SourceError),

    #[error("failed to mount: {0}")]
    Mount(#[source] std::io::Error),

    #[error("failed to start refresh worker: {0}")]
    Worker(#[source] std::io::Error),

    #[error("failed to install signal handler: {0}")]
    Signal(#[source] std::io::Error),

    #[error("failed to create runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

mod managed_fuse {
    //! fuser only does a regular unmount when the `BackgroundSession` is dropped. [`ManagedFuse`]
    //! follows up with a forced, lazy unmount so a busy mount point does not outlive the process.
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    use nix::errno::Errno;

    use super::{debug, error};
    use dbfs::fs::DbFs;
    use dbfs::fs::fuser::FuserAdapter;
    use fuser::BackgroundSession;

    pub struct FuseCoreScope {
        _session: BackgroundSession,
    }

    pub struct ManagedFuse {
        mount_point: PathBuf,
    }

    impl ManagedFuse {
        pub fn new(mount_point: PathBuf) -> Self {
            Self { mount_point }
        }

        pub fn spawn(
            &self,
            fs: Arc<DbFs>,
            handle: tokio::runtime::Handle,
        ) -> Result<FuseCoreScope, std::io::Error> {
            let fuse_adapter = FuserAdapter::new(fs, handle);
            let mount_opts = [
                fuser::MountOption::FSName("dbfs".to_owned()),
                fuser::MountOption::RO,
                fuser::MountOption::NoDev,
                fuser::MountOption::NoExec,
                fuser::MountOption::AutoUnmount,
                fuser::MountOption::DefaultPermissions,
            ];

            Ok(FuseCoreScope {
                _session: fuser::spawn_mount2(fuse_adapter, &self.mount_point, &mount_opts)?,
            })
        }
    }

    impl Drop for ManagedFuse {
        fn drop(&mut self) {
            const UMOUNT_ATTEMPT_COUNT: usize = 10;
            const UMOUNT_ATTEMPT_DELAY: Duration = Duration::from_millis(10);

            debug!(mount_point = ?self.mount_point, "Confirming unmount of FUSE filesystem...");

            for i in 0..UMOUNT_ATTEMPT_COUNT {
                let result = {
                    #[cfg(target_os = "macos")]
                    {
                        nix::mount::unmount(&self.mount_point, nix::mount::MntFlags::MNT_FORCE)
                    }

                    #[cfg(target_os = "linux")]
                    {
                        nix::mount::umount2(&self.mount_point, nix::mount::MntFlags::MNT_DETACH)
                    }
                };

                match result {
                    Ok(()) => {
                        debug!(attempt = i + 1, "Unmounted FUSE filesystem.");
                        break;
                    }
                    Err(Errno::EBUSY) => {
                        debug!(attempt = i + 1, "FUSE filesystem still busy, retrying...");
                        std::thread::sleep(UMOUNT_ATTEMPT_DELAY);
                    }
                    Err(Errno::EINVAL | Errno::ENOENT) => {
                        debug!(attempt = i + 1, "FUSE filesystem already unmounted.");
                        break;
                    }
                    Err(e) => {
                        error!(attempt = i + 1, error = %e, "Failed to unmount FUSE filesystem.");
                        break;
                    }
                }
            }
        }
    }
}

/// Prepares the mount point directory.
///
/// - If the directory does not exist, creates it (including parents).
/// - If the directory exists and is non-empty, returns an error unless `allow_nonempty` is set.
async fn prepare_mount_point(
    mount_point: &std::path::Path,
    allow_nonempty: bool,
) -> Result<(), std::io::Error> {
    match tokio::fs::read_dir(mount_point).await {
        Ok(mut entries) => {
            if !allow_nonempty && entries.next_entry().await?.is_some() {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    format!(
                        "Mount point '{}' already exists and is not empty.",
                        mount_point.display()
                    ),
                ));
            }
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tokio::fs::create_dir_all(mount_point).await?;
            info!(path = %mount_point.display(), "Created mount point directory.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

async fn wait_for_exit() -> Result<(), std::io::Error> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sighup = signal(SignalKind::hangup())?;
    select! {
        _ = tokio::signal::ctrl_c() => {
            debug!("Received Ctrl+C signal, shutting down...");
        },
        _ = sigterm.recv() => {
            debug!("Received termination signal, shutting down...");
        },
        _ = sighup.recv() => {
            debug!("Received hangup signal, shutting down...");
        },
    }
    Ok(())
}

/// Forwards every `SIGUSR2` to the refresh worker.
/// Installs the SIGUSR2 handler. Until this runs the signal terminates the process.
///
/// A signal that arrives before [`listen_for_refresh`] starts is kept by the stream and turns into
/// one refresh once the listener is running.
fn install_refresh_signal() -> Result<Signal, std::io::Error> {
    signal(SignalKind::user_defined2())
}

fn listen_for_refresh(mut sigusr2: Signal, trigger: RefreshTrigger) {
    tokio::spawn(async move {
        while sigusr2.recv().await.is_some() {
            if trigger.request() {
                info!("Refresh requested.");
            }
        }
    });
}

/// Main entry point for the daemon.
pub async fn run(config: MountConfig, handle: tokio::runtime::Handle) -> Result<(), DaemonError> {
    let sigusr2 = install_refresh_signal().map_err(DaemonError::Signal)?;
    prepare_mount_point(&config.mount_point, config.allow_nonempty)
        .await
        .map_err(DaemonError::MountPoint)?;

    info!("Connecting to the database...");
    let source = Arc::new(PgSource::connect(config.database, (config.uid, config.gid)).await?);

    let initial = source.load(&config.policy).await?;
    log_snapshot(&initial);
    info!(tables = initial.len(), "Loaded tables.");
    if initial.is_empty() {
        warn!("No tables to serve; the mount will be empty until a refresh finds some.");
    }

    let fs = Arc::new(DbFs::new(initial, (config.uid, config.gid)));
    let worker = RefreshWorker::spawn(
        Arc::clone(&fs),
        Arc::clone(&source),
        config.policy,
        handle.clone(),
    )
    .map_err(DaemonError::Worker)?;
    listen_for_refresh(sigusr2, worker.trigger());

    info!("Mounting filesystem at {}.", config.mount_point.display());
    let fuse = managed_fuse::ManagedFuse::new(config.mount_point);
    {
        let _session = fuse
            .spawn(Arc::clone(&fs), handle.clone())
            .map_err(DaemonError::Mount)?;
        info!(
            pid = std::process::id(),
            "dbfs is running. Send SIGUSR2 to refresh, Ctrl+C to stop."
        );

        wait_for_exit().await.map_err(DaemonError::Signal)?;
    }
    drop(fuse);

    fs.coordinator().shutdown();
    if let Err(e) = tokio::task::spawn_blocking(move || worker.shutdown()).await {
        error!(error = %e, "Failed to stop the refresh worker.");
    }
    source.close().await;
    info!("Unmounted.");
    Ok(())
}

pub fn spawn(config: MountConfig) -> Result<(), DaemonError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(DaemonError::Runtime)?;
    runtime.block_on(run(config, runtime.handle().clone()))
}
