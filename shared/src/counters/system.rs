//! Host counters backed by `sysinfo`.
//!
//! Supported counters:
//!
//! | Category | Instance | Metric |
//! |---|---|---|
//! | `Processor` | `_Total`, empty, or a core index | `% Processor Time`, `% Idle Time` |
//! | `Memory` | empty | `% Committed Bytes In Use`, `Available MBytes`, `Available Bytes`, `Committed Bytes` |
//!
//! Processor values are utilisation since the previous sample of the same
//! handle, so the validation sample taken on open reads as zero.

use sysinfo::System;

use super::source::{CounterError, CounterHandle, CounterSource, CounterUnavailableError};

const BYTES_PER_MEGABYTE: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessorScope {
    Total,
    Core(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SystemMetric {
    ProcessorTime(ProcessorScope),
    IdleTime(ProcessorScope),
    CommittedPercent,
    AvailableMegabytes,
    AvailableBytes,
    CommittedBytes,
}

impl SystemMetric {
    fn resolve(category: &str, instance: &str, metric: &str) -> Result<Self, String> {
        match category {
            "Processor" => {
                let scope = match instance {
                    "" | "_Total" => ProcessorScope::Total,
                    core => core
                        .parse()
                        .map(ProcessorScope::Core)
                        .map_err(|_| format!("unknown processor instance '{core}'"))?,
                };
                match metric {
                    "% Processor Time" => Ok(Self::ProcessorTime(scope)),
                    "% Idle Time" => Ok(Self::IdleTime(scope)),
                    other => Err(format!("unknown processor metric '{other}'")),
                }
            }
            "Memory" => {
                if !instance.is_empty() {
                    return Err("memory counters have no instances".to_string());
                }
                match metric {
                    "% Committed Bytes In Use" => Ok(Self::CommittedPercent),
                    "Available MBytes" => Ok(Self::AvailableMegabytes),
                    "Available Bytes" => Ok(Self::AvailableBytes),
                    "Committed Bytes" => Ok(Self::CommittedBytes),
                    other => Err(format!("unknown memory metric '{other}'")),
                }
            }
            other => Err(format!("unknown category '{other}'")),
        }
    }

    fn is_processor(self) -> bool {
        matches!(self, Self::ProcessorTime(_) | Self::IdleTime(_))
    }
}

/// Counter source reading processor and memory counters of the local host.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCounterSource;

impl SystemCounterSource {
    /// Creates the source.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CounterSource for SystemCounterSource {
    fn open(
        &self,
        category: &str,
        instance: &str,
        metric: &str,
    ) -> Result<Box<dyn CounterHandle>, CounterUnavailableError> {
        let resolved = SystemMetric::resolve(category, instance, metric)
            .map_err(|reason| CounterUnavailableError::new(category, instance, metric, reason))?;

        let mut system = System::new();
        if resolved.is_processor() {
            system.refresh_cpu_usage();
            if let SystemMetric::ProcessorTime(ProcessorScope::Core(core))
            | SystemMetric::IdleTime(ProcessorScope::Core(core)) = resolved
            {
                if core >= system.cpus().len() {
                    return Err(CounterUnavailableError::new(
                        category,
                        instance,
                        metric,
                        format!("host has {} cores", system.cpus().len()),
                    ));
                }
            }
        }

        Ok(Box::new(SystemCounterHandle {
            system,
            metric: resolved,
        }))
    }
}

struct SystemCounterHandle {
    system: System,
    metric: SystemMetric,
}

impl SystemCounterHandle {
    fn processor_time(&self, scope: ProcessorScope) -> Result<f64, CounterError> {
        let cpus = self.system.cpus();
        match scope {
            ProcessorScope::Core(core) => cpus
                .get(core)
                .map(|cpu| f64::from(cpu.cpu_usage()))
                .ok_or_else(|| CounterError::SampleFailed(format!("core {core} disappeared"))),
            ProcessorScope::Total => {
                if cpus.is_empty() {
                    return Err(CounterError::SampleFailed("no processors reported".to_string()));
                }
                let total: f64 = cpus.iter().map(|cpu| f64::from(cpu.cpu_usage())).sum();
                // Cast is acceptable here: core counts are far below f64 precision limits
                #[allow(clippy::cast_precision_loss)]
                let count = cpus.len() as f64;
                Ok(total / count)
            }
        }
    }
}

impl CounterHandle for SystemCounterHandle {
    #[allow(clippy::cast_precision_loss)]
    fn sample(&mut self) -> Result<f64, CounterError> {
        if self.metric.is_processor() {
            self.system.refresh_cpu_usage();
        } else {
            self.system.refresh_memory();
        }

        match self.metric {
            SystemMetric::ProcessorTime(scope) => self.processor_time(scope),
            SystemMetric::IdleTime(scope) => self.processor_time(scope).map(|busy| 100.0 - busy),
            SystemMetric::CommittedPercent => {
                let total = self.system.total_memory();
                if total == 0 {
                    return Err(CounterError::SampleFailed("total memory is zero".to_string()));
                }
                Ok(self.system.used_memory() as f64 / total as f64 * 100.0)
            }
            SystemMetric::AvailableMegabytes => {
                Ok(self.system.available_memory() as f64 / BYTES_PER_MEGABYTE)
            }
            SystemMetric::AvailableBytes => Ok(self.system.available_memory() as f64),
            SystemMetric::CommittedBytes => Ok(self.system.used_memory() as f64),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_known_counters() {
        assert_eq!(
            SystemMetric::resolve("Processor", "_Total", "% Processor Time"),
            Ok(SystemMetric::ProcessorTime(ProcessorScope::Total))
        );
        assert_eq!(
            SystemMetric::resolve("Processor", "3", "% Idle Time"),
            Ok(SystemMetric::IdleTime(ProcessorScope::Core(3)))
        );
        assert_eq!(
            SystemMetric::resolve("Memory", "", "Available MBytes"),
            Ok(SystemMetric::AvailableMegabytes)
        );
    }

    #[test]
    fn test_resolve_unknown_counters() {
        assert!(SystemMetric::resolve("PhysicalDisk", "_Total", "% Disk Time").is_err());
        assert!(SystemMetric::resolve("Processor", "cpu-a", "% Processor Time").is_err());
        assert!(SystemMetric::resolve("Memory", "x", "Available MBytes").is_err());
        assert!(SystemMetric::resolve("Memory", "", "Pages/sec").is_err());
    }

    #[test]
    fn test_open_unknown_counter_is_unavailable() {
        let err = SystemCounterSource::new()
            .open("PhysicalDisk", "_Total", "% Disk Time")
            .err()
            .unwrap();

        assert_eq!(err.category, "PhysicalDisk");
        assert!(err.reason.contains("unknown category"));
    }

    #[test]
    fn test_memory_counters_sample() {
        let source = SystemCounterSource::new();
        let mut handle = source.open("Memory", "", "% Committed Bytes In Use").unwrap();

        let value = handle.sample().unwrap();

        assert!((0.0..=100.0).contains(&value));
    }

    #[test]
    fn test_processor_total_samples_repeatedly() {
        let source = SystemCounterSource::new();
        let mut handle = source.open("Processor", "_Total", "% Processor Time").unwrap();

        for _ in 0..3 {
            let value = handle.sample().unwrap();
            assert!(value >= 0.0);
        }
    }
}
