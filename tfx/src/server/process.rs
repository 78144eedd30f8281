//! Process-per-connection server
//!
//! The parent accepts connections and hands each one to a fresh child
//! process, which receives the socket as its standard input and serves it
//! with [`serve_connection`](super::serve_connection). The parent keeps no
//! connection state, only the table of live children, which is owned by a
//! single supervisor task. Child terminations arrive over a channel.
//!
//! On SIGINT every live child is killed and the parent returns successfully.
// (c) 2025 Ross Younger

use std::collections::HashMap;
use std::ffi::OsString;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::Stdio;

use anyhow::Context as _;
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// How to start a per-connection child
#[derive(Debug, Clone)]
pub struct ChildCommand {
    /// The program to run (normally the current executable)
    pub program: PathBuf,
    /// Its arguments
    pub args: Vec<OsString>,
}

impl ChildCommand {
    /// Starts a child with `stream` as its standard input.
    fn spawn(&self, stream: TcpStream) -> anyhow::Result<Child> {
        let stream = stream.into_std()?;
        stream.set_nonblocking(false)?;
        let fd: OwnedFd = stream.into();
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::from(fd))
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to start {}", self.program.display()))
    }
}

/// Waits for a child to exit, or kills it when asked.
/// Either way, reports the child's id on `exits` when it is gone.
async fn watch_child(
    mut child: Child,
    pid: u32,
    kill: oneshot::Receiver<()>,
    exits: mpsc::UnboundedSender<u32>,
) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(s) => debug!("child {pid} exited ({s})"),
            Err(e) => warn!("waiting for child {pid}: {e}"),
        },
        _ = kill => {
            if let Err(e) = child.kill().await {
                warn!("killing child {pid}: {e}");
            } else {
                debug!("killed child {pid}");
            }
        }
    }
    let _ = exits.send(pid);
}

/// Runs the process-per-connection server until SIGINT.
///
/// At most `max_children` connections are served at once; further
/// connections wait in the listen backlog until a child exits.
pub fn run(
    listener: std::net::TcpListener,
    child: &ChildCommand,
    max_children: usize,
) -> anyhow::Result<()> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start runtime")?;
    rt.block_on(supervise(listener, child, max_children))
}

async fn supervise(
    listener: std::net::TcpListener,
    child: &ChildCommand,
    max_children: usize,
) -> anyhow::Result<()> {
    listener.set_nonblocking(true)?;
    let listener = tokio::net::TcpListener::from_std(listener)?;
    if let Ok(addr) = listener.local_addr() {
        info!("listening on {addr} (one process per connection)");
    }
    let (exit_tx, mut exit_rx) = mpsc::unbounded_channel::<u32>();
    let mut children: HashMap<u32, oneshot::Sender<()>> = HashMap::new();
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);

    loop {
        tokio::select! {
            r = &mut interrupt => {
                r.context("failed to listen for SIGINT")?;
                info!("interrupted; stopping {} children", children.len());
                break;
            }
            Some(pid) = exit_rx.recv() => {
                let _ = children.remove(&pid);
            }
            accepted = listener.accept(), if children.len() < max_children => {
                let (stream, peer) = match accepted {
                    Ok(a) => a,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                match child.spawn(stream) {
                    Ok(process) => {
                        let Some(pid) = process.id() else {
                            continue;
                        };
                        debug!("child {pid} serving {peer}");
                        let (kill_tx, kill_rx) = oneshot::channel();
                        let _ = children.insert(pid, kill_tx);
                        let _ = tokio::spawn(watch_child(process, pid, kill_rx, exit_tx.clone()));
                    }
                    Err(e) => warn!("refusing connection from {peer}: {e:#}"),
                }
            }
        }
    }

    for (_, kill) in children.drain() {
        let _ = kill.send(());
    }
    drop(exit_tx);
    while exit_rx.recv().await.is_some() {}
    Ok(())
}
