//! Process resource sampling.

use std::sync::Mutex;

use serde::Serialize;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Resource usage of the current worker process.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResources {
    pub pid: u32,
    /// Resident set size in bytes.
    pub memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    /// Percent of one core since the previous sample.
    pub cpu_percent: f32,
    pub run_time_secs: u64,
    pub system_total_memory_bytes: u64,
    pub system_used_memory_bytes: u64,
    pub cpu_count: usize,
}

/// Samples the current process through `sysinfo`.
pub struct ProcessSampler {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl std::fmt::Debug for ProcessSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSampler").field("pid", &self.pid).finish()
    }
}

impl Default for ProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    pub fn sample(&self) -> ProcessResources {
        let mut system = self
            .system
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        system.refresh_memory();

        let mut resources = ProcessResources {
            pid: std::process::id(),
            system_total_memory_bytes: system.total_memory(),
            system_used_memory_bytes: system.used_memory(),
            cpu_count: num_cpus::get(),
            ..Default::default()
        };

        if let Some(pid) = self.pid {
            system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
            if let Some(process) = system.process(pid) {
                resources.memory_bytes = process.memory();
                resources.virtual_memory_bytes = process.virtual_memory();
                resources.cpu_percent = process.cpu_usage();
                resources.run_time_secs = process.run_time();
            }
        }

        resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_reports_current_process() {
        let sampler = ProcessSampler::new();
        let sample = sampler.sample();
        assert_eq!(sample.pid, std::process::id());
        assert!(sample.cpu_count >= 1);
    }
}
