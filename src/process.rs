/// Snapshot of the process's memory footprint and identity, attached to log
/// events and to the tracer's memory gauge.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ProcessStats {
    /// Resident set size, in bytes.
    pub current_bytes: u64,

    /// Peak resident set size, in bytes.
    pub peak_bytes: u64,

    /// Process id.
    pub pid: u32,
}

impl ProcessStats {
    pub(crate) fn capture() -> Self {
        let (current_bytes, peak_bytes) = read_memory();
        ProcessStats { current_bytes, peak_bytes, pid: std::process::id() }
    }
}

#[cfg(target_os = "linux")]
fn read_memory() -> (u64, u64) {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return (0, 0);
    };

    let mut current = 0;
    let mut peak = 0;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            current = parse_kb_field(rest);
        } else if let Some(rest) = line.strip_prefix("VmHWM:") {
            peak = parse_kb_field(rest);
        }
    }

    (current, peak)
}

#[cfg(target_os = "linux")]
fn parse_kb_field(rest: &str) -> u64 {
    rest.split_whitespace()
        .next()
        .and_then(|kb| kb.parse::<u64>().ok())
        .map_or(0, |kb| kb * 1024)
}

// Memory detection is platform-specific; other platforms report zero.
#[cfg(not(target_os = "linux"))]
fn read_memory() -> (u64, u64) {
    (0, 0)
}
