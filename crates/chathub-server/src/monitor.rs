//! Periodic resource logging.
//!
//! Samples process memory, live tokio tasks, and registered connections.
//! Read-only with respect to hub state.

use crate::hub::RegistrySize;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const MIB: f64 = 1024.0 * 1024.0;

/// One observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// Resident set size in MiB, if the process could be inspected.
    pub rss_mib: Option<f64>,
    pub virtual_mib: Option<f64>,
    pub alive_tasks: usize,
    pub connections: usize,
}

/// Process probe reused across samples.
pub struct Sampler {
    system: System,
    pid: Option<Pid>,
    size: RegistrySize,
}

impl Sampler {
    pub fn new(size: RegistrySize) -> Self {
        Self {
            system: System::new(),
            pid: sysinfo::get_current_pid().ok(),
            size,
        }
    }

    /// Take a sample. Must be called from inside a tokio runtime.
    pub fn sample(&mut self) -> ResourceSample {
        let mut rss_mib = None;
        let mut virtual_mib = None;
        if let Some(pid) = self.pid {
            let _ = self
                .system
                .refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
            if let Some(process) = self.system.process(pid) {
                rss_mib = Some(process.memory() as f64 / MIB);
                virtual_mib = Some(process.virtual_memory() as f64 / MIB);
            }
        }
        ResourceSample {
            rss_mib,
            virtual_mib,
            alive_tasks: tokio::runtime::Handle::current()
                .metrics()
                .num_alive_tasks(),
            connections: self.size.get(),
        }
    }
}

/// Log a sample every `every` until `shutdown` fires.
pub async fn run(every: Duration, size: RegistrySize, shutdown: CancellationToken) {
    let mut sampler = Sampler::new(size);
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    debug!(interval = ?every, "resource monitor started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let sample = sampler.sample();
                info!(
                    rss_mib = sample.rss_mib.map(|v| format!("{v:.1}")).unwrap_or_default(),
                    virtual_mib = sample.virtual_mib.map(|v| format!("{v:.1}")).unwrap_or_default(),
                    tasks = sample.alive_tasks,
                    connections = sample.connections,
                    "resources"
                );
            }
        }
    }
    debug!("resource monitor stopped");
}
