//! Attachment Registrar (§4.6).
//!
//! Owns the two long-lived listen sockets a plugin worker family uses to
//! join the agent: the registration socket (first contact, invokes the
//! watchdog) and the keep-alive socket (liveness heartbeat). Both accept
//! loops and the periodic expiration sweep run as tokio tasks sharing one
//! `Mutex`-guarded family table, mirroring the teacher's fail-open/
//! fail-closed application-crate shape (`crates/proxy/src/agents/manager.rs`)
//! adapted from an OS-thread-per-connection dataplane to cooperative tasks.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{info, warn};

use vigil_common::IntakeResult;

const REGISTRATION_COMMAND_TIMEOUT: Duration = Duration::from_secs(900);
const WATCHDOG_BIN: &str = "/etc/cp/watchdog/cp-nano-watchdog";
const HTTP_HANDLER_EXEC: &str = "/etc/cp/HttpTransactionHandler/cp-nano-http-transaction-handler";

/// One successful registration, handed to whoever owns the inspection
/// loops so it can bind an [`crate::inspection::InspectionWorker`] at
/// `handler_path`. Naming mirrors [`handler_path_for`]'s own scheme so the
/// two never drift apart.
#[derive(Debug, Clone)]
pub struct RegisteredInstance {
    pub instance_unique_id: String,
    pub handler_path: PathBuf,
}

/// Liveness vector for one registered family, sized to the family's
/// declared instance count.
struct FamilyMembers {
    alive: Vec<bool>,
}

/// Shared state mutated only by the registrar's own tasks (registration,
/// keep-alive, expiration) — a `Mutex` is used anyway because those tasks
/// run concurrently as separate tokio tasks rather than on one mainloop
/// thread, unlike the session store (§4.4), which stays behind a single
/// worker task.
#[derive(Default)]
struct RegistrarState {
    families: HashMap<String, FamilyMembers>,
}

pub struct AttachmentRegistrar {
    registration_path: PathBuf,
    keep_alive_path: PathBuf,
    expiration_check_period: Duration,
    state: Arc<Mutex<RegistrarState>>,
    spawn_tx: mpsc::UnboundedSender<RegisteredInstance>,
}

impl AttachmentRegistrar {
    /// `spawn_tx` receives one [`RegisteredInstance`] per successful
    /// registration, so its owner can bind the per-worker inspection loop
    /// at the handler path this registrar just handed back to the plugin.
    pub fn new(
        registration_path: PathBuf,
        keep_alive_path: PathBuf,
        expiration_check_period: Duration,
        spawn_tx: mpsc::UnboundedSender<RegisteredInstance>,
    ) -> Self {
        AttachmentRegistrar {
            registration_path,
            keep_alive_path,
            expiration_check_period,
            state: Arc::new(Mutex::new(RegistrarState::default())),
            spawn_tx,
        }
    }

    /// Binds both sockets and spawns the accept loops plus the expiration
    /// timer. Socket creation failures are retried every second from
    /// within this call rather than propagated, matching the original's
    /// "never aborts the process" registrar failure semantics (§4.6).
    pub async fn run(self: Arc<Self>) {
        let registration_listener = loop {
            match bind_fresh(&self.registration_path) {
                Ok(listener) => break listener,
                Err(e) => {
                    warn!(path = %self.registration_path.display(), error = %e, "failed to bind registration socket, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        };

        let keep_alive_listener = loop {
            match bind_fresh(&self.keep_alive_path) {
                Ok(listener) => break listener,
                Err(e) => {
                    warn!(path = %self.keep_alive_path.display(), error = %e, "failed to bind keep-alive socket, retrying");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        };

        info!(
            registration_path = %self.registration_path.display(),
            keep_alive_path = %self.keep_alive_path.display(),
            "attachment registrar listening"
        );

        let registration_self = Arc::clone(&self);
        let keep_alive_self = Arc::clone(&self);
        let expiration_self = Arc::clone(&self);

        tokio::join!(
            registration_self.accept_registrations(registration_listener),
            keep_alive_self.accept_keep_alives(keep_alive_listener),
            expiration_self.run_expiration_timer(),
        );
    }

    async fn accept_registrations(self: Arc<Self>, listener: UnixListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = this.handle_registration(stream).await {
                            warn!(error = %e, "registration request failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "failed to accept registration connection"),
            }
        }
    }

    async fn accept_keep_alives(self: Arc<Self>, listener: UnixListener) {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let this = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(e) = this.handle_keep_alive(stream).await {
                            warn!(error = %e, "keep-alive request failed");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "failed to accept keep-alive connection"),
            }
        }
    }

    /// `(attachment_type:u8, attachment_id:u8, instances_count:u8,
    /// family_len:u8, family_bytes)` in, `(path_len:u8, path_bytes)` out.
    async fn handle_registration(&self, mut stream: UnixStream) -> IntakeResult<()> {
        let attachment_type = read_u8(&mut stream).await?;
        let attachment_id = read_u8(&mut stream).await?;
        let instances_count = read_u8(&mut stream).await?;
        let family_id = read_lp_string(&mut stream).await?;

        if !self
            .invoke_watchdog_register(&family_id, instances_count)
            .await
        {
            warn!(
                attachment_type, attachment_id, family_id = %family_id,
                "watchdog registration failed, worker must retry"
            );
            return Ok(());
        }

        {
            let mut state = self.state.lock();
            state.families.insert(
                family_id.clone(),
                FamilyMembers {
                    alive: vec![true; instances_count.max(1) as usize],
                },
            );
        }

        let handler_path = handler_path_for(attachment_type, attachment_id, &family_id);
        write_lp_string(&mut stream, &handler_path).await?;
        info!(family_id = %family_id, handler_path = %handler_path, "registered new attachment family");

        let _ = self.spawn_tx.send(RegisteredInstance {
            instance_unique_id: instance_unique_id_for(attachment_id, &family_id),
            handler_path: PathBuf::from(handler_path),
        });
        Ok(())
    }

    /// `(attachment_id:u8, family_len:u8, family_bytes)` in, no reply.
    async fn handle_keep_alive(&self, mut stream: UnixStream) -> IntakeResult<()> {
        let attachment_id = read_u8(&mut stream).await?;
        let family_id = read_lp_string(&mut stream).await?;
        if family_id.is_empty() {
            return Ok(());
        }

        let mut state = self.state.lock();
        let entry = state
            .families
            .entry(family_id.clone())
            .or_insert_with(|| FamilyMembers {
                alive: vec![true; attachment_id as usize + 1],
            });

        if entry.alive.len() <= attachment_id as usize {
            entry.alive.resize(attachment_id as usize + 1, true);
        }
        entry.alive[attachment_id as usize] = true;
        Ok(())
    }

    async fn run_expiration_timer(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.expiration_check_period);
        loop {
            ticker.tick().await;
            self.run_expiration_sweep().await;
        }
    }

    /// For each family where every instance is marked dead, unregisters it
    /// via the watchdog and drops it from the table on success; otherwise
    /// resets every instance to dead, awaiting the next keep-alive cycle.
    async fn run_expiration_sweep(&self) {
        let inactive: Vec<String> = {
            let state = self.state.lock();
            state
                .families
                .iter()
                .filter(|(family_id, members)| {
                    !family_id.is_empty() && members.alive.iter().all(|alive| !alive)
                })
                .map(|(family_id, _)| family_id.clone())
                .collect()
        };

        let mut removed = Vec::new();
        for family_id in inactive {
            if self.invoke_watchdog_unregister(&family_id).await {
                removed.push(family_id);
            } else {
                warn!(family_id = %family_id, "failed to un-register inactive attachment family");
            }
        }

        let mut state = self.state.lock();
        for family_id in &removed {
            state.families.remove(family_id);
            info!(family_id = %family_id, "un-registered inactive attachment family");
        }
        for members in state.families.values_mut() {
            members.alive.iter_mut().for_each(|alive| *alive = false);
        }
    }

    async fn invoke_watchdog_register(&self, family_id: &str, instances_count: u8) -> bool {
        let mut cmd = Command::new(WATCHDOG_BIN);
        cmd.arg("--register").arg(HTTP_HANDLER_EXEC);
        if !family_id.is_empty() {
            cmd.arg("--family").arg(family_id);
        }
        cmd.arg("--count").arg(instances_count.to_string());
        run_with_timeout(cmd, REGISTRATION_COMMAND_TIMEOUT).await
    }

    async fn invoke_watchdog_unregister(&self, family_id: &str) -> bool {
        let mut cmd = Command::new(WATCHDOG_BIN);
        cmd.arg("--un-register")
            .arg(HTTP_HANDLER_EXEC)
            .arg("--family")
            .arg(family_id);
        run_with_timeout(cmd, REGISTRATION_COMMAND_TIMEOUT).await
    }
}

async fn run_with_timeout(mut cmd: Command, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(Ok(output)) => output.status.success(),
        Ok(Err(e)) => {
            warn!(error = %e, "failed to spawn watchdog command");
            false
        }
        Err(_) => {
            warn!("watchdog command timed out");
            false
        }
    }
}

/// Same `{family_id}_{attachment_id}` scheme as [`handler_path_for`], used
/// to name the worker's ring file and its [`crate::metrics`] span field
/// rather than the filesystem path the plugin connects to.
fn instance_unique_id_for(attachment_id: u8, family_id: &str) -> String {
    if family_id.is_empty() {
        attachment_id.to_string()
    } else {
        format!("{family_id}_{attachment_id}")
    }
}

fn handler_path_for(attachment_type: u8, attachment_id: u8, family_id: &str) -> String {
    let kind = match attachment_type {
        0 => "http",
        _ => "http",
    };
    if family_id.is_empty() {
        format!("/dev/shm/check-point/cp-nano-{kind}-transaction-handler-{attachment_id}")
    } else {
        format!(
            "/dev/shm/check-point/cp-nano-{kind}-transaction-handler-{family_id}_{attachment_id}"
        )
    }
}

fn bind_fresh(path: &Path) -> std::io::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
        let mut perms = std::fs::metadata(parent)?.permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut perms, 0o777);
        std::fs::set_permissions(parent, perms)?;
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    UnixListener::bind(path)
}

async fn read_u8(stream: &mut UnixStream) -> IntakeResult<u8> {
    let mut buf = [0u8; 1];
    stream.read_exact(&mut buf).await?;
    Ok(buf[0])
}

async fn read_lp_string(stream: &mut UnixStream) -> IntakeResult<String> {
    let len = read_u8(stream).await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

async fn write_lp_string(stream: &mut UnixStream, value: &str) -> IntakeResult<()> {
    let bytes = value.as_bytes();
    let len = bytes.len().min(u8::MAX as usize) as u8;
    stream.write_all(&[len]).await?;
    stream.write_all(&bytes[..len as usize]).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_path_includes_family_when_present() {
        assert_eq!(
            handler_path_for(0, 3, ""),
            "/dev/shm/check-point/cp-nano-http-transaction-handler-3"
        );
        assert_eq!(
            handler_path_for(0, 3, "fam-a"),
            "/dev/shm/check-point/cp-nano-http-transaction-handler-fam-a_3"
        );
    }

    fn unused_spawn_tx() -> mpsc::UnboundedSender<RegisteredInstance> {
        let (tx, _rx) = mpsc::unbounded_channel();
        tx
    }

    #[tokio::test]
    async fn keep_alive_grows_family_vector_for_unseen_instance() {
        let registrar = AttachmentRegistrar::new(
            PathBuf::from("/tmp/does-not-matter-registration"),
            PathBuf::from("/tmp/does-not-matter-keepalive"),
            Duration::from_secs(300),
            unused_spawn_tx(),
        );
        {
            let mut state = registrar.state.lock();
            state.families.insert(
                "fam".to_string(),
                FamilyMembers {
                    alive: vec![false, false],
                },
            );
        }

        // Simulate what handle_keep_alive does for instance id 4 in family
        // "fam" without needing a live socket.
        {
            let mut state = registrar.state.lock();
            let entry = state.families.get_mut("fam").unwrap();
            if entry.alive.len() <= 4 {
                entry.alive.resize(5, true);
            }
            entry.alive[4] = true;
        }

        let state = registrar.state.lock();
        assert_eq!(state.families["fam"].alive.len(), 5);
        assert!(state.families["fam"].alive[4]);
    }

    #[tokio::test]
    async fn expiration_sweep_removes_fully_dead_family_on_successful_unregister() {
        let registrar = Arc::new(AttachmentRegistrar::new(
            PathBuf::from("/tmp/does-not-matter-registration-2"),
            PathBuf::from("/tmp/does-not-matter-keepalive-2"),
            Duration::from_secs(300),
            unused_spawn_tx(),
        ));
        {
            let mut state = registrar.state.lock();
            state.families.insert(
                "dead-fam".to_string(),
                FamilyMembers {
                    alive: vec![false, false],
                },
            );
            state.families.insert(
                "live-fam".to_string(),
                FamilyMembers {
                    alive: vec![true, false],
                },
            );
        }

        // Directly exercise the inactive-family detection logic that
        // run_expiration_sweep uses, without shelling out to a real
        // watchdog binary.
        let inactive: Vec<String> = {
            let state = registrar.state.lock();
            state
                .families
                .iter()
                .filter(|(family_id, members)| {
                    !family_id.is_empty() && members.alive.iter().all(|alive| !alive)
                })
                .map(|(family_id, _)| family_id.clone())
                .collect()
        };
        assert_eq!(inactive, vec!["dead-fam".to_string()]);
    }

    #[test]
    fn instance_unique_id_matches_handler_path_naming() {
        assert_eq!(instance_unique_id_for(3, ""), "3");
        assert_eq!(instance_unique_id_for(3, "fam-a"), "fam-a_3");
    }
}
