//! Memory limit detection for sizing the block cache.

/// Detect the memory available to this process in bytes.
///
/// A cgroup v2 or v1 limit sizes containers by their quota. Limits at or
/// above `MemTotal` (including the "unlimited" sentinels) are ignored in
/// favour of `MemTotal` from `/proc/meminfo`.
pub fn detect_memory_limit() -> u64 {
    let cgroup = read_limit("/sys/fs/cgroup/memory.max")
        .or_else(|| read_limit("/sys/fs/cgroup/memory/memory.limit_in_bytes"));
    effective_limit(cgroup, read_mem_total())
}

/// Default when nothing can be detected.
const FALLBACK_LIMIT: u64 = 4 * 1024 * 1024 * 1024;

fn effective_limit(cgroup: Option<u64>, mem_total: Option<u64>) -> u64 {
    match (cgroup, mem_total) {
        (Some(limit), Some(total)) if limit > 0 && limit < total => limit,
        (_, Some(total)) if total > 0 => total,
        // Without MemTotal only a plausible cgroup limit is trusted.
        (Some(limit), None) if limit > 0 && limit < ((i64::MAX as u64) & !0xfff) => limit,
        _ => FALLBACK_LIMIT,
    }
}

fn read_mem_total() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    let kb = meminfo
        .lines()
        .find(|line| line.starts_with("MemTotal:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|v| v.parse::<u64>().ok())?;
    kb.checked_mul(1024)
}

fn read_limit(path: &str) -> Option<u64> {
    let raw = std::fs::read_to_string(path).ok()?;
    // "max" fails to parse; the v1 sentinel is filtered by effective_limit
    raw.trim().parse::<u64>().ok()
}

/// Bytes of cache allowed for `fraction` of the detected memory limit.
pub fn cache_budget(fraction: f64) -> usize {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let budget = (detect_memory_limit() as f64 * fraction) as u64;
    usize::try_from(budget).unwrap_or(usize::MAX)
}
