//! Counter and timer registry.
//!
//! Dotted metric names (`updates.client.hello`, `client.flush`)
//! recorded in-process and rendered in Prometheus text form for the
//! telemetry endpoint.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
struct TimerStat {
    count: u64,
    total_micros: u64,
}

#[derive(Default)]
pub struct Metrics {
    counters: Mutex<HashMap<String, u64>>,
    timers: Mutex<HashMap<String, TimerStat>>,
}

impl Metrics {
    pub fn incr(&self, name: &str) {
        self.add(name, 1);
    }

    pub fn add(&self, name: &str, value: u64) {
        let mut counters = self.counters.lock();
        *counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn time(&self, name: &str, elapsed: Duration) {
        let mut timers = self.timers.lock();
        let stat = timers.entry(name.to_string()).or_default();
        stat.count += 1;
        stat.total_micros += elapsed.as_micros() as u64;
    }

    /// Current counter value; absent counters read as zero.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.lock().get(name).copied().unwrap_or(0)
    }

    /// Render every metric in Prometheus text form.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut counters: Vec<(String, u64)> = self
            .counters
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        counters.sort();
        for (name, value) in counters {
            out.push_str(&format!("pushgate_{} {}\n", sanitize(&name), value));
        }
        let mut timers: Vec<(String, TimerStat)> = self
            .timers
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        timers.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, stat) in timers {
            let name = sanitize(&name);
            out.push_str(&format!("pushgate_{}_count {}\n", name, stat.count));
            out.push_str(&format!(
                "pushgate_{}_micros_total {}\n",
                name, stat.total_micros
            ));
        }
        out
    }
}

fn sanitize(name: &str) -> String {
    name.replace('.', "_")
}
