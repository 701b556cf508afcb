// Host fingerprint gathering for the startup metadata event
use crate::events::types::HostMetadata;
use chrono::{DateTime, Utc};
use sysinfo::{Disks, Networks, System};

const UNSPECIFIED_MAC: &str = "00:00:00:00:00:00";

// Resolve the host name the collector keys this device on
// Falls back to sysinfo's view, then to "unknown"
pub fn local_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .or_else(System::host_name)
        .unwrap_or_else(|| "unknown".to_string())
}

// Collect the host fingerprint
// Every probe is best-effort: missing values are left out rather than failing startup
pub fn gather_host_metadata() -> HostMetadata {
    let mut sys = System::new();
    sys.refresh_memory();
    sys.refresh_cpu();

    let cpu_count = match sys.cpus().len() {
        0 => std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1),
        n => n,
    };

    let disks = Disks::new_with_refreshed_list();
    let disk_total: u64 = disks.list().iter().map(|disk| disk.total_space()).sum();

    let boot_time = DateTime::<Utc>::from_timestamp(System::boot_time() as i64, 0)
        .filter(|_| System::boot_time() > 0);

    let networks = Networks::new_with_refreshed_list();
    let mut mac_addresses: Vec<String> = networks
        .list()
        .values()
        .map(|data| data.mac_address().to_string())
        .filter(|mac| mac != UNSPECIFIED_MAC)
        .collect();
    mac_addresses.sort();
    mac_addresses.dedup();

    let metadata = HostMetadata {
        platform: platform_string(),
        os_version: System::long_os_version(),
        kernel_version: System::kernel_version(),
        cpu_count,
        memory_total: sys.total_memory(),
        disk_total: (disk_total > 0).then_some(disk_total),
        boot_time,
        mac_addresses,
        pid: std::process::id(),
    };

    log::debug!(
        "Gathered host metadata: platform={}, cpus={}, macs={}",
        metadata.platform,
        metadata.cpu_count,
        metadata.mac_addresses.len()
    );
    metadata
}

fn platform_string() -> String {
    match System::name() {
        Some(name) => format!("{}-{}-{}", name, std::env::consts::OS, std::env::consts::ARCH),
        None => format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
    }
}
