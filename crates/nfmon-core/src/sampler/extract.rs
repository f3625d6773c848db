//! Field-tolerant extraction from a raw stats document
//!
//! Runtimes disagree on the exact shape of the stats payload, so each
//! category is read independently from the JSON value. A category that cannot
//! be read leaves its fields at zero and adds a warning to the sample.

use serde_json::Value;
use thiserror::Error;

use crate::models::ContainerStats;

/// Spellings of the block I/O section seen across runtime versions
const BLOCK_IO_FIELDS: [&str; 3] = ["blkio_stats", "blockio_stats", "blokio_stats"];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("{0} missing from stats payload")]
    Missing(&'static str),

    #[error("{0} has an unexpected type")]
    WrongType(&'static str),
}

/// Cumulative CPU counters kept between sweeps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuSample {
    pub total_usage: u64,
    pub system_usage: u64,
}

fn section<'a>(raw: &'a Value, field: &'static str) -> Result<&'a serde_json::Map<String, Value>, ExtractError> {
    match raw.get(field) {
        None | Some(Value::Null) => Err(ExtractError::Missing(field)),
        Some(value) => value.as_object().ok_or(ExtractError::WrongType(field)),
    }
}

/// Integer field that may have been encoded as a float
fn number(value: Option<&Value>) -> Option<u64> {
    let value = value?;
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// CPU percentage relative to `previous`, plus the counters for the next sweep
///
/// Zero on the first sample and whenever either delta is not positive.
pub fn cpu(raw: &Value, previous: Option<CpuSample>) -> Result<(f64, CpuSample), ExtractError> {
    let cpu_stats = section(raw, "cpu_stats")?;
    let usage = cpu_stats.get("cpu_usage");

    let current = CpuSample {
        total_usage: number(usage.and_then(|u| u.get("total_usage"))).unwrap_or(0),
        system_usage: number(cpu_stats.get("system_cpu_usage")).unwrap_or(0),
    };

    let online = number(cpu_stats.get("online_cpus"))
        .filter(|n| *n > 0)
        .or_else(|| {
            usage
                .and_then(|u| u.get("percpu_usage"))
                .and_then(Value::as_array)
                .map(|per_cpu| per_cpu.len() as u64)
                .filter(|n| *n > 0)
        })
        .unwrap_or(1);

    let percent = match previous {
        Some(prev)
            if current.total_usage > prev.total_usage
                && current.system_usage > prev.system_usage =>
        {
            let cpu_delta = (current.total_usage - prev.total_usage) as f64;
            let system_delta = (current.system_usage - prev.system_usage) as f64;
            cpu_delta / system_delta * online as f64 * 100.0
        }
        _ => 0.0,
    };

    Ok((percent, current))
}

pub fn memory(raw: &Value, stats: &mut ContainerStats) -> Result<(), ExtractError> {
    let memory = section(raw, "memory_stats")?;

    stats.memory_usage = number(memory.get("usage")).unwrap_or(0);
    stats.memory_limit = number(memory.get("limit")).unwrap_or(0);
    stats.memory_percent = if stats.memory_limit > 0 {
        stats.memory_usage as f64 / stats.memory_limit as f64 * 100.0
    } else {
        0.0
    };

    Ok(())
}

/// Received and transmitted bytes summed over every interface
pub fn network(raw: &Value, stats: &mut ContainerStats) -> Result<(), ExtractError> {
    let networks = section(raw, "networks")?;

    let (rx, tx) = networks.values().fold((0u64, 0u64), |(rx, tx), iface| {
        (
            rx.saturating_add(number(iface.get("rx_bytes")).unwrap_or(0)),
            tx.saturating_add(number(iface.get("tx_bytes")).unwrap_or(0)),
        )
    });
    stats.network_rx_bytes = rx;
    stats.network_tx_bytes = tx;

    Ok(())
}

pub fn block_io(raw: &Value, stats: &mut ContainerStats) -> Result<(), ExtractError> {
    let block = BLOCK_IO_FIELDS
        .iter()
        .find_map(|field| raw.get(*field).and_then(Value::as_object))
        .ok_or(ExtractError::Missing("blkio_stats"))?;

    let mut read = 0u64;
    let mut write = 0u64;
    // null on cgroup v2 hosts without io accounting
    if let Some(entries) = block
        .get("io_service_bytes_recursive")
        .and_then(Value::as_array)
    {
        for entry in entries {
            let value = number(entry.get("value")).unwrap_or(0);
            match entry.get("op").and_then(Value::as_str) {
                Some(op) if op.eq_ignore_ascii_case("read") => read = read.saturating_add(value),
                Some(op) if op.eq_ignore_ascii_case("write") => {
                    write = write.saturating_add(value)
                }
                _ => {}
            }
        }
    }
    stats.block_read = read;
    stats.block_write = write;

    Ok(())
}

pub fn pids(raw: &Value, stats: &mut ContainerStats) -> Result<(), ExtractError> {
    let pids = section(raw, "pids_stats")?;
    stats.pids = number(pids.get("current")).unwrap_or(0);
    Ok(())
}

/// Build a sample from a raw stats document
///
/// `previous` is updated with this sample's CPU counters when they could be read.
pub fn sample(
    raw: &Value,
    container_id: &str,
    name: &str,
    previous: &mut Option<CpuSample>,
    timestamp: i64,
) -> ContainerStats {
    let mut stats = ContainerStats {
        container_id: container_id.to_string(),
        name: name.to_string(),
        timestamp,
        ..Default::default()
    };

    match cpu(raw, *previous) {
        Ok((percent, current)) => {
            stats.cpu_percent = percent;
            *previous = Some(current);
        }
        Err(e) => stats.warnings.push(format!("cpu: {}", e)),
    }

    let extractors: [(&str, fn(&Value, &mut ContainerStats) -> Result<(), ExtractError>); 4] = [
        ("memory", memory),
        ("network", network),
        ("block_io", block_io),
        ("pids", pids),
    ];
    for (category, extract) in extractors {
        if let Err(e) = extract(raw, &mut stats) {
            stats.warnings.push(format!("{}: {}", category, e));
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(total: u64, system: u64) -> Value {
        json!({
            "cpu_stats": {
                "cpu_usage": {"total_usage": total, "percpu_usage": [1, 2]},
                "system_cpu_usage": system,
                "online_cpus": 2
            },
            "memory_stats": {"usage": 256, "limit": 1024},
            "networks": {
                "eth0": {"rx_bytes": 100, "tx_bytes": 10},
                "eth1": {"rx_bytes": 50, "tx_bytes": 5}
            },
            "blkio_stats": {
                "io_service_bytes_recursive": [
                    {"major": 8, "minor": 0, "op": "Read", "value": 4096},
                    {"major": 8, "minor": 0, "op": "Write", "value": 1024},
                    {"major": 8, "minor": 16, "op": "read", "value": 4096},
                    {"major": 8, "minor": 0, "op": "Total", "value": 9216}
                ]
            },
            "pids_stats": {"current": 7}
        })
    }

    #[test]
    fn test_cpu_first_sample_is_zero() {
        let (percent, current) = cpu(&payload(1_000, 10_000), None).unwrap();
        assert_eq!(percent, 0.0);
        assert_eq!(
            current,
            CpuSample {
                total_usage: 1_000,
                system_usage: 10_000
            }
        );
    }

    #[test]
    fn test_cpu_delta_percent() {
        let prev = CpuSample {
            total_usage: 1_000,
            system_usage: 10_000,
        };
        // 500 / 10_000 * 2 cpus * 100
        let (percent, _) = cpu(&payload(1_500, 20_000), Some(prev)).unwrap();
        assert!((percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_cpu_non_positive_delta_is_zero() {
        let prev = CpuSample {
            total_usage: 2_000,
            system_usage: 10_000,
        };
        let (percent, _) = cpu(&payload(1_500, 20_000), Some(prev)).unwrap();
        assert_eq!(percent, 0.0);

        let (percent, _) = cpu(&payload(2_500, 10_000), Some(prev)).unwrap();
        assert_eq!(percent, 0.0);
    }

    #[test]
    fn test_cpu_online_fallbacks() {
        let prev = CpuSample {
            total_usage: 0,
            system_usage: 0,
        };
        let per_cpu = json!({
            "cpu_stats": {
                "cpu_usage": {"total_usage": 100, "percpu_usage": [1, 2, 3, 4]},
                "system_cpu_usage": 1000,
                "online_cpus": 0
            }
        });
        let (percent, _) = cpu(&per_cpu, Some(prev)).unwrap();
        assert!((percent - 40.0).abs() < 1e-9);

        let bare = json!({
            "cpu_stats": {"cpu_usage": {"total_usage": 100}, "system_cpu_usage": 1000}
        });
        let (percent, _) = cpu(&bare, Some(prev)).unwrap();
        assert!((percent - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_full_sample() {
        let mut previous = None;
        let stats = sample(&payload(1_000, 10_000), "abc123", "amf", &mut previous, 42);

        assert!(stats.warnings.is_empty(), "{:?}", stats.warnings);
        assert_eq!(stats.memory_usage, 256);
        assert_eq!(stats.memory_percent, 25.0);
        assert_eq!(stats.network_rx_bytes, 150);
        assert_eq!(stats.network_tx_bytes, 15);
        assert_eq!(stats.block_read, 8192);
        assert_eq!(stats.block_write, 1024);
        assert_eq!(stats.pids, 7);
        assert_eq!(stats.timestamp, 42);
        assert!(previous.is_some());
    }

    #[test]
    fn test_alternate_block_io_spelling_and_null_entries() {
        let mut stats = ContainerStats::default();
        let raw = json!({"blockio_stats": {"io_service_bytes_recursive": [{"op": "write", "value": 10}]}});
        block_io(&raw, &mut stats).unwrap();
        assert_eq!(stats.block_write, 10);

        let raw = json!({"blkio_stats": {"io_service_bytes_recursive": null}});
        block_io(&raw, &mut stats).unwrap();
        assert_eq!(stats.block_write, 0);
    }

    #[test]
    fn test_missing_sections_become_warnings() {
        let mut previous = None;
        let raw = json!({"memory_stats": {"usage": 10, "limit": 0}, "networks": "eth0"});
        let stats = sample(&raw, "id", "smf", &mut previous, 0);

        assert_eq!(stats.memory_usage, 10);
        assert_eq!(stats.memory_percent, 0.0);
        assert_eq!(stats.warnings.len(), 4);
        assert!(stats.warnings[0].starts_with("cpu:"));
        assert!(stats.warnings.iter().any(|w| w.contains("unexpected type")));
        assert!(previous.is_none());
    }
}
