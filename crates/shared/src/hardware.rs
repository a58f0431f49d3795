//! Hardware inspection
//!
//! One-shot probe of the CPU and of an NVIDIA accelerator, run once when the
//! service starts. Every sub-probe degrades to a default value on failure: a
//! host without `nvidia-smi` (or where it hangs) produces a snapshot with no
//! accelerator, never a startup error.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use sysinfo::System;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default timeout for the accelerator query tool
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Query used against `nvidia-smi`
const NVIDIA_SMI_QUERY: &str = "--query-gpu=name,driver_version,memory.total,compute_cap";

/// Minimum compute capability with native half-precision arithmetic
const FP16_MIN_COMPUTE_CAPABILITY: (u32, u32) = (5, 3);

/// Hardware capability flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityFlags {
    /// An NVIDIA accelerator answered the probe
    pub cuda: bool,
    /// The accelerator supports native FP16
    pub fp16: bool,
    /// CPU supports AVX
    pub avx: bool,
    /// CPU supports AVX2
    pub avx2: bool,
    /// CPU supports AVX-512F
    pub avx512: bool,
}

/// Accelerator details parsed from the query tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceleratorInfo {
    /// Marketing name, e.g. "NVIDIA GeForce RTX 3080"
    pub name: String,
    /// Driver version reported by the tool
    pub driver_version: Option<String>,
    /// Total device memory in MB
    pub memory_mb: u64,
    /// Compute capability, e.g. "8.6"
    pub compute_capability: Option<String>,
}

/// Hardware snapshot captured at startup, read-only afterwards
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareSnapshot {
    /// CPU model name
    pub cpu_name: String,
    /// Physical core count
    pub cpu_cores: usize,
    /// Logical processor count
    pub cpu_threads: usize,
    /// Total system memory in MB
    pub system_memory_mb: u64,
    /// Accelerator name, `None` when no accelerator was found
    pub accelerator_name: Option<String>,
    /// Accelerator memory in MB, 0 when no accelerator was found
    pub accelerator_memory_mb: u64,
    /// Accelerator driver version
    pub driver_version: Option<String>,
    /// Accelerator compute capability
    pub compute_capability: Option<String>,
    /// Capability flags
    pub capabilities: CapabilityFlags,
}

impl HardwareSnapshot {
    /// Whether an accelerator was detected
    pub fn accelerator_available(&self) -> bool {
        self.accelerator_name.is_some()
    }

    fn with_accelerator(mut self, accelerator: Option<AcceleratorInfo>) -> Self {
        if let Some(gpu) = accelerator {
            self.capabilities.cuda = true;
            self.capabilities.fp16 = gpu
                .compute_capability
                .as_deref()
                .is_some_and(supports_fp16);
            self.accelerator_name = Some(gpu.name);
            self.accelerator_memory_mb = gpu.memory_mb;
            self.driver_version = gpu.driver_version;
            self.compute_capability = gpu.compute_capability;
        }
        self
    }
}

impl Default for HardwareSnapshot {
    /// The "no accelerator" snapshot
    fn default() -> Self {
        Self {
            cpu_name: "Unknown CPU".to_string(),
            cpu_cores: 1,
            cpu_threads: 1,
            system_memory_mb: 0,
            accelerator_name: None,
            accelerator_memory_mb: 0,
            driver_version: None,
            compute_capability: None,
            capabilities: CapabilityFlags::default(),
        }
    }
}

/// Probes the host once and produces a [`HardwareSnapshot`]
#[derive(Debug, Clone)]
pub struct HardwareInspector {
    probe_timeout: Duration,
    query_tool: String,
}

impl Default for HardwareInspector {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl HardwareInspector {
    /// Create an inspector that waits at most `probe_timeout` for the
    /// accelerator query tool
    pub fn new(probe_timeout: Duration) -> Self {
        Self {
            probe_timeout,
            query_tool: "nvidia-smi".to_string(),
        }
    }

    /// Use a different executable for the accelerator query
    #[must_use]
    pub fn with_query_tool(mut self, tool: impl Into<String>) -> Self {
        self.query_tool = tool.into();
        self
    }

    /// Run the probe
    pub async fn probe(&self) -> HardwareSnapshot {
        let cpu = tokio::task::spawn_blocking(detect_cpu)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "CPU detection failed");
                HardwareSnapshot::default()
            });
        let snapshot = cpu.with_accelerator(self.probe_accelerator().await);

        info!(
            cpu = %snapshot.cpu_name,
            cores = snapshot.cpu_cores,
            accelerator = snapshot.accelerator_name.as_deref().unwrap_or("none"),
            accelerator_memory_mb = snapshot.accelerator_memory_mb,
            "Hardware probe complete"
        );

        snapshot
    }

    async fn probe_accelerator(&self) -> Option<AcceleratorInfo> {
        let query = Command::new(&self.query_tool)
            .args([NVIDIA_SMI_QUERY, "--format=csv,noheader,nounits"])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .output();

        match tokio::time::timeout(self.probe_timeout, query).await {
            Ok(Ok(output)) if output.status.success() => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let parsed = parse_nvidia_smi_output(&stdout);
                if parsed.is_none() {
                    warn!(tool = %self.query_tool, "Accelerator query returned no usable rows");
                }
                parsed
            }
            Ok(Ok(output)) => {
                warn!(
                    tool = %self.query_tool,
                    status = %output.status,
                    "Accelerator query failed, assuming no accelerator"
                );
                None
            }
            Ok(Err(e)) => {
                warn!(tool = %self.query_tool, error = %e, "Accelerator query tool unavailable, assuming no accelerator");
                None
            }
            Err(_) => {
                warn!(
                    tool = %self.query_tool,
                    timeout_ms = self.probe_timeout.as_millis() as u64,
                    "Accelerator query timed out, assuming no accelerator"
                );
                None
            }
        }
    }
}

/// Parse the first GPU row of `nvidia-smi --format=csv,noheader,nounits`
pub fn parse_nvidia_smi_output(output: &str) -> Option<AcceleratorInfo> {
    let line = output.lines().map(str::trim).find(|l| !l.is_empty())?;
    let parts: Vec<&str> = line.split(',').map(str::trim).collect();
    if parts.len() < 3 || parts[0].is_empty() {
        return None;
    }

    let non_empty = |s: &str| {
        if s.is_empty() || s.eq_ignore_ascii_case("[N/A]") {
            None
        } else {
            Some(s.to_string())
        }
    };

    Some(AcceleratorInfo {
        name: parts[0].to_string(),
        driver_version: non_empty(parts[1]),
        memory_mb: parts[2].parse().unwrap_or(0),
        compute_capability: parts.get(3).copied().and_then(non_empty),
    })
}

/// Whether a compute capability string ("7.5") supports native FP16
pub fn supports_fp16(compute_capability: &str) -> bool {
    let mut parts = compute_capability.trim().split('.');
    let major = parts.next().and_then(|s| s.parse::<u32>().ok());
    let minor = parts.next().and_then(|s| s.parse::<u32>().ok()).unwrap_or(0);
    match major {
        Some(major) => (major, minor) >= FP16_MIN_COMPUTE_CAPABILITY,
        None => false,
    }
}

/// Extract the "model name" field from `/proc/cpuinfo` text
pub fn parse_cpuinfo_model_name(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim() == "model name")
        .map(|(_, value)| value.trim().to_string())
        .filter(|name| !name.is_empty())
}

fn detect_cpu() -> HardwareSnapshot {
    let mut system = System::new();
    system.refresh_cpu();
    system.refresh_memory();

    let cpus = system.cpus();
    let processor_identifier = cpus
        .first()
        .map(|cpu| cpu.brand().trim().to_string())
        .filter(|brand| !brand.is_empty())
        .unwrap_or_else(|| std::env::consts::ARCH.to_string());

    let cpu_name = platform_cpu_name().unwrap_or(processor_identifier);
    let (avx, avx2, avx512) = detect_cpu_features();
    let threads = cpus.len().max(1);

    HardwareSnapshot {
        cpu_name,
        cpu_cores: system.physical_core_count().unwrap_or(threads),
        cpu_threads: threads,
        system_memory_mb: system.total_memory() / 1024 / 1024,
        capabilities: CapabilityFlags {
            avx,
            avx2,
            avx512,
            ..CapabilityFlags::default()
        },
        ..HardwareSnapshot::default()
    }
}

#[cfg(target_os = "linux")]
fn platform_cpu_name() -> Option<String> {
    match std::fs::read_to_string("/proc/cpuinfo") {
        Ok(text) => parse_cpuinfo_model_name(&text),
        Err(e) => {
            debug!(error = %e, "Could not read /proc/cpuinfo");
            None
        }
    }
}

#[cfg(target_os = "macos")]
fn platform_cpu_name() -> Option<String> {
    let output = std::process::Command::new("sysctl")
        .args(["-n", "machdep.cpu.brand_string"])
        .output()
        .ok()?;
    let name = String::from_utf8(output.stdout).ok()?;
    let name = name.trim();
    (!name.is_empty()).then(|| name.to_string())
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
fn platform_cpu_name() -> Option<String> {
    None
}

/// Detect CPU instruction set features
fn detect_cpu_features() -> (bool, bool, bool) {
    #[cfg(target_arch = "x86_64")]
    {
        (
            is_x86_feature_detected!("avx"),
            is_x86_feature_detected!("avx2"),
            is_x86_feature_detected!("avx512f"),
        )
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        (false, false, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nvidia_smi_output() {
        let output = "NVIDIA GeForce RTX 3080, 535.104.05, 10240, 8.6\n";
        let info = parse_nvidia_smi_output(output).unwrap();
        assert_eq!(info.name, "NVIDIA GeForce RTX 3080");
        assert_eq!(info.driver_version.as_deref(), Some("535.104.05"));
        assert_eq!(info.memory_mb, 10240);
        assert_eq!(info.compute_capability.as_deref(), Some("8.6"));
    }

    #[test]
    fn test_parse_nvidia_smi_uses_first_gpu() {
        let output = "\nTesla T4, 525.60.13, 15360, 7.5\nTesla T4, 525.60.13, 15360, 7.5\n";
        let info = parse_nvidia_smi_output(output).unwrap();
        assert_eq!(info.name, "Tesla T4");
    }

    #[test]
    fn test_parse_nvidia_smi_rejects_garbage() {
        assert!(parse_nvidia_smi_output("").is_none());
        assert!(parse_nvidia_smi_output("No devices were found").is_none());
    }

    #[test]
    fn test_supports_fp16() {
        assert!(supports_fp16("8.6"));
        assert!(supports_fp16("5.3"));
        assert!(!supports_fp16("5.2"));
        assert!(!supports_fp16("3.0"));
        assert!(!supports_fp16("n/a"));
    }

    #[test]
    fn test_parse_cpuinfo_model_name() {
        let text = "processor\t: 0\nvendor_id\t: GenuineIntel\nmodel name\t: Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz\n";
        assert_eq!(
            parse_cpuinfo_model_name(text).as_deref(),
            Some("Intel(R) Core(TM) i7-9700K CPU @ 3.60GHz")
        );
        assert!(parse_cpuinfo_model_name("processor : 0\n").is_none());
    }

    #[test]
    fn test_default_snapshot_has_no_accelerator() {
        let snapshot = HardwareSnapshot::default();
        assert!(!snapshot.accelerator_available());
        assert_eq!(snapshot.accelerator_memory_mb, 0);
        assert!(!snapshot.capabilities.cuda);
    }

    #[tokio::test]
    async fn test_missing_query_tool_degrades() {
        let inspector = HardwareInspector::new(Duration::from_secs(1))
            .with_query_tool("definitely-not-a-real-gpu-query-tool");
        let snapshot = inspector.probe().await;
        assert!(!snapshot.accelerator_available());
        assert!(!snapshot.capabilities.cuda);
        assert!(snapshot.cpu_threads >= 1);
        assert!(!snapshot.cpu_name.is_empty());
    }

    #[test]
    fn test_detect_cpu_reads_cpus_and_memory() {
        let snapshot = detect_cpu();
        assert!(snapshot.cpu_threads >= 1);
        assert!(snapshot.cpu_cores >= 1);
        assert!(snapshot.system_memory_mb > 0);
        assert!(!snapshot.accelerator_available());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_hung_query_tool_times_out() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let tool = dir.path().join("slow-gpu-query");
        std::fs::write(&tool, "#!/bin/sh\nsleep 10\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let inspector = HardwareInspector::new(Duration::from_secs(1))
            .with_query_tool(tool.to_string_lossy());
        let start = std::time::Instant::now();
        let snapshot = inspector.probe().await;
        let elapsed = start.elapsed();

        assert!(!snapshot.accelerator_available());
        assert_eq!(snapshot.accelerator_memory_mb, 0);
        assert!(!snapshot.capabilities.cuda);
        assert!(elapsed >= Duration::from_millis(900), "returned after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "returned after {elapsed:?}");
    }
}
