//! Host resource probe.
//!
//! Thin wrapper over `sysinfo` plus optional NVIDIA telemetry through NVML.
//! Snapshots never fail; anything the host cannot answer comes back as
//! zeroes or `None`.

use clipforge_protocol::{GpuSnapshot, ResourceSnapshot};
use nvml_wrapper::Nvml;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use sysinfo::{Disks, System};
use tracing::debug;

pub struct ResourceProbe {
    sys: Mutex<System>,
    disk_root: PathBuf,
    nvml: Option<Nvml>,
}

impl ResourceProbe {
    pub fn new(disk_root: impl Into<PathBuf>) -> Self {
        let nvml = match Nvml::init() {
            Ok(nvml) => Some(nvml),
            Err(err) => {
                debug!(%err, "NVML unavailable, GPU telemetry disabled");
                None
            }
        };
        Self {
            sys: Mutex::new(System::new()),
            disk_root: disk_root.into(),
            nvml,
        }
    }

    pub fn snapshot(&self) -> ResourceSnapshot {
        let (cpu_percent, memory_used, memory_total) = match self.sys.lock() {
            Ok(mut sys) => {
                sys.refresh_cpu();
                sys.refresh_memory();
                (
                    sys.global_cpu_info().cpu_usage() as f64,
                    sys.used_memory(),
                    sys.total_memory(),
                )
            }
            Err(_) => (0.0, 0, 0),
        };

        let (disk_used, disk_total) = disk_usage_for(&self.disk_root);

        ResourceSnapshot {
            cpu_percent,
            memory_used_bytes: memory_used,
            memory_total_bytes: memory_total,
            disk_used_bytes: disk_used,
            disk_total_bytes: disk_total,
            gpu: self.gpu_snapshot(),
        }
    }

    fn gpu_snapshot(&self) -> Option<GpuSnapshot> {
        let nvml = self.nvml.as_ref()?;
        let device = nvml.device_by_index(0).ok()?;
        let name = device.name().ok()?;
        let memory = device.memory_info().ok()?;
        let utilization = device
            .utilization_rates()
            .map(|rates| rates.gpu)
            .unwrap_or(0);
        Some(GpuSnapshot {
            name,
            memory_used_bytes: memory.used,
            memory_total_bytes: memory.total,
            utilization_percent: utilization,
        })
    }
}

/// Usage of the disk holding `root`: the mounted filesystem with the longest
/// mount-point prefix of the path.
fn disk_usage_for(root: &Path) -> (u64, u64) {
    let disks = Disks::new_with_refreshed_list();
    let mut best: Option<(usize, u64, u64)> = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if root.starts_with(mount) {
            let depth = mount.components().count();
            let total = disk.total_space();
            let used = total.saturating_sub(disk.available_space());
            if best.map(|(d, _, _)| depth > d).unwrap_or(true) {
                best = Some((depth, used, total));
            }
        }
    }
    best.map(|(_, used, total)| (used, total)).unwrap_or((0, 0))
}
