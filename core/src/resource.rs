//! Resource Monitor: samples CPU/RSS/disk and signals when a
//! session should transition to `ResourcePaused`.

use sysinfo::Disks;
use sysinfo::System;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub rss_bytes: u64,
    pub free_disk_bytes: u64,
}

pub struct ResourceMonitor {
    system: System,
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self { system: System::new_all() }
    }

    pub fn sample(&mut self) -> ResourceSample {
        self.system.refresh_all();
        let cpu_percent = self.system.global_cpu_usage();
        let rss_bytes = sysinfo::get_current_pid().ok().and_then(|pid| self.system.process(pid)).map(|p| p.memory()).unwrap_or(0);
        let free_disk_bytes = Disks::new_with_refreshed_list().list().iter().map(|d| d.available_space()).max().unwrap_or(0);
        ResourceSample { cpu_percent, rss_bytes, free_disk_bytes }
    }

    /// Compares a sample against configured thresholds, returning a
    /// human-readable pause reason when any threshold is crossed.
    pub fn check_thresholds(sample: ResourceSample, config: &Config) -> Option<String> {
        if sample.cpu_percent as f64 > config.resource_cpu_percent_threshold {
            return Some(format!("CPU usage at {:.0}% exceeds the {:.0}% threshold", sample.cpu_percent, config.resource_cpu_percent_threshold));
        }
        if sample.rss_bytes > config.resource_rss_bytes_threshold {
            return Some(format!("memory usage ({} bytes) exceeds the {} byte threshold", sample.rss_bytes, config.resource_rss_bytes_threshold));
        }
        if sample.free_disk_bytes < config.resource_free_disk_bytes_threshold {
            return Some(format!("free disk space ({} bytes) is below the {} byte threshold", sample.free_disk_bytes, config.resource_free_disk_bytes_threshold));
        }
        None
    }
}
