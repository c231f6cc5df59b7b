//! Prefork worker supervision.
//!
//! The supervisor acquires shared resources (listening socket, heartbeat
//! block), forks a child per slot, then loops: reap exited children, kill
//! heartbeat-stalled ones, refill free slots. A soft signal (`INT`/`TERM`/
//! `QUIT`) stops forking, forwards the signal to all live children and
//! waits them out; a second soft signal escalates to `SIGKILL`.

use std::net::TcpListener;
use std::process;
use std::thread;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::{debug, error, info, warn};

use crate::config::{QueueConfig, ServerConfig, SupervisorConfig};
use crate::error::{Error, Result};
use crate::pipeline::PipelineBuilder;

use super::heartbeat::{monotonic_secs, HeartbeatBlock};
use super::http_worker::HttpWorker;
use super::queue_worker::QueueWorker;
use super::signals;

/// Which transport the supervised workers speak.
#[derive(Debug, Clone)]
pub enum Transport {
    /// HTTP/1.1 over a listening socket opened pre-fork and inherited by
    /// every child.
    Http,
    /// Queue adapter. Each child connects its own socket pair (the
    /// streams cannot be shared across forks), and heartbeat monitoring
    /// is disabled because the blocking receive cannot be polled cheaply.
    Queue(QueueConfig),
}

/// One worker slot. A free slot has no pid; the slot index is reused
/// across respawns.
#[derive(Debug, Clone, Copy)]
struct WorkerSlot {
    pid: Option<Pid>,
    born: u32,
    last_beat: u32,
}

impl WorkerSlot {
    fn free() -> Self {
        Self {
            pid: None,
            born: 0,
            last_beat: 0,
        }
    }
}

/// The parent process maintaining the worker pool.
pub struct Supervisor {
    server: ServerConfig,
    config: SupervisorConfig,
    transport: Transport,
}

impl Supervisor {
    pub fn new(
        server: ServerConfig,
        config: SupervisorConfig,
        transport: Transport,
    ) -> Result<Self> {
        if config.workers == 0 {
            return Err(Error::InvalidArgument(
                "worker count must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            server,
            config,
            transport,
        })
    }

    /// Run the fork/supervise/drain lifecycle. Returns after a clean
    /// drain; bind and fork failures are fatal.
    pub fn run<F>(&self, app: F) -> Result<()>
    where
        F: Fn() -> PipelineBuilder,
    {
        signals::install().map_err(|errno| Error::Io(errno.into()))?;

        // pre-fork: resources every child inherits
        let listener = match &self.transport {
            Transport::Http => Some(
                TcpListener::bind(&self.server.bind_addr)
                    .map_err(|err| Error::socket_unavailable(&self.server.bind_addr, &err))?,
            ),
            Transport::Queue(_) => None,
        };
        let heartbeat = match &self.transport {
            Transport::Http => Some(HeartbeatBlock::new(self.config.workers)?),
            Transport::Queue(_) => None,
        };
        info!(
            workers = self.config.workers,
            transport = ?self.transport,
            "supervisor starting"
        );

        let interval = self.config.effective_interval();
        let mut slots = vec![WorkerSlot::free(); self.config.workers];
        self.refill(&mut slots, listener.as_ref(), heartbeat.as_ref(), &app)?;

        while signals::pending().is_none() {
            self.sleep_interval(interval);
            if signals::pending().is_some() {
                break;
            }
            self.reap(&mut slots);
            if let Some(heartbeat) = &heartbeat {
                self.kill_stalled(&mut slots, heartbeat, interval);
            }
            self.refill(&mut slots, listener.as_ref(), heartbeat.as_ref(), &app)?;
        }

        self.drain(&mut slots);
        info!("supervisor stopped");
        Ok(())
    }

    /// Sleep the supervision interval in short steps so a shutdown signal
    /// is noticed promptly.
    fn sleep_interval(&self, interval: u64) {
        let deadline = monotonic_secs().saturating_add(interval as u32);
        while monotonic_secs() < deadline {
            if signals::pending().is_some() {
                return;
            }
            thread::sleep(Duration::from_millis(100));
        }
    }

    /// Non-blocking reap of exited children; their slots become free.
    fn reap(&self, slots: &mut [WorkerSlot]) {
        for slot in slots.iter_mut() {
            let Some(pid) = slot.pid else { continue };
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => {}
                Ok(status @ (WaitStatus::Exited(..) | WaitStatus::Signaled(..))) => {
                    info!(pid = %pid, status = ?status, "worker exited");
                    slot.pid = None;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(pid = %pid, error = %err, "waitpid failed, freeing slot");
                    slot.pid = None;
                }
            }
        }
    }

    /// Kill children whose heartbeat cell did not advance since the last
    /// cycle and whose last beat is older than `interval / 2` seconds.
    /// They are reaped on the next cycle.
    fn kill_stalled(&self, slots: &mut [WorkerSlot], heartbeat: &HeartbeatBlock, interval: u64) {
        let now = monotonic_secs();
        for (index, slot) in slots.iter_mut().enumerate() {
            let Some(pid) = slot.pid else { continue };
            let beat = heartbeat.read(index);
            if beat != slot.last_beat {
                slot.last_beat = beat;
                continue;
            }
            let age = u64::from(now.saturating_sub(beat));
            if age > interval / 2 {
                warn!(
                    pid = %pid,
                    slot = index,
                    age,
                    uptime = now.saturating_sub(slot.born),
                    "worker heartbeat stalled, killing"
                );
                let _ = kill(pid, Signal::SIGKILL);
            }
        }
    }

    /// Fork a child into every free slot.
    fn refill<F>(
        &self,
        slots: &mut [WorkerSlot],
        listener: Option<&TcpListener>,
        heartbeat: Option<&HeartbeatBlock>,
        app: &F,
    ) -> Result<()>
    where
        F: Fn() -> PipelineBuilder,
    {
        for index in 0..slots.len() {
            if slots[index].pid.is_some() {
                continue;
            }
            if let Some(heartbeat) = heartbeat {
                heartbeat.seed(index);
            }
            match unsafe { fork() } {
                Ok(ForkResult::Child) => {
                    signals::reset();
                    let code = match self.child_main(index, listener, heartbeat, app) {
                        Ok(()) => 0,
                        Err(err) => {
                            error!(slot = index, error = %err, "worker failed");
                            1
                        }
                    };
                    process::exit(code);
                }
                Ok(ForkResult::Parent { child }) => {
                    let now = monotonic_secs();
                    debug!(pid = %child, slot = index, "forked worker");
                    slots[index] = WorkerSlot {
                        pid: Some(child),
                        born: now,
                        last_beat: heartbeat.map(|h| h.read(index)).unwrap_or(0),
                    };
                }
                Err(errno) => {
                    error!(error = %errno, "fork failed, draining");
                    self.drain(slots);
                    return Err(Error::Fork(errno.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Child-side entry: run the transport worker, then exit.
    fn child_main<F>(
        &self,
        index: usize,
        listener: Option<&TcpListener>,
        heartbeat: Option<&HeartbeatBlock>,
        app: &F,
    ) -> Result<()>
    where
        F: Fn() -> PipelineBuilder,
    {
        match &self.transport {
            Transport::Http => {
                let listener = listener
                    .ok_or_else(|| {
                        Error::InvalidArgument("http transport without a listener".to_string())
                    })?
                    .try_clone()?;
                let mut worker = HttpWorker::from_listener(self.server.clone(), listener);
                if let Some(heartbeat) = heartbeat {
                    worker.set_heartbeat(heartbeat.slot(index));
                }
                worker.run(|| app())
            }
            Transport::Queue(queue) => {
                let worker = QueueWorker::connect(self.server.clone(), queue.clone())?;
                worker.run(|| app())
            }
        }
    }

    /// Forward the shutdown signal to every live child and wait them out.
    /// A second soft signal hardens the shutdown with `SIGKILL`.
    fn drain(&self, slots: &mut [WorkerSlot]) {
        let signal = signals::pending().unwrap_or(Signal::SIGTERM);
        let deliveries = signals::deliveries();
        info!(signal = ?signal, "draining workers");
        for slot in slots.iter() {
            if let Some(pid) = slot.pid {
                let _ = kill(pid, signal);
            }
        }
        let mut hardened = false;
        while slots.iter().any(|slot| slot.pid.is_some()) {
            if !hardened && signals::deliveries() > deliveries {
                warn!("second shutdown signal, killing workers");
                for slot in slots.iter() {
                    if let Some(pid) = slot.pid {
                        let _ = kill(pid, Signal::SIGKILL);
                    }
                }
                hardened = true;
            }
            self.reap(slots);
            thread::sleep(Duration::from_millis(100));
        }
    }
}
