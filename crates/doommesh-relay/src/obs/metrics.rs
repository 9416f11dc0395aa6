//! Metrics registry for the relay.
//!
//! Counter/gauge/histogram families with dynamic labels backed by `DashMap`.
//! Label sets are sorted so the same labels in any order hit the same series.
//! Histogram buckets are fixed in microseconds to avoid floating point math.

use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Duration;

type LabelKey = Vec<(String, String)>;

fn label_key(labels: &[(&str, &str)]) -> LabelKey {
    let mut key: LabelKey = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    key.sort();
    key
}

fn escape_label(v: &str) -> String {
    v.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn render_labels(key: &LabelKey) -> String {
    key.iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Default)]
pub struct CounterVec {
    map: DashMap<LabelKey, AtomicU64>,
}

impl CounterVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: u64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(v, Ordering::Relaxed);
    }

    /// Current value of one series (0 when never touched).
    pub fn get(&self, labels: &[(&str, &str)]) -> u64 {
        self.map
            .get(&label_key(labels))
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} counter", name);
        for r in self.map.iter() {
            let _ = writeln!(
                out,
                "{}{{{}}} {}",
                name,
                render_labels(r.key()),
                r.value().load(Ordering::Relaxed)
            );
        }
    }
}

#[derive(Default)]
pub struct GaugeVec {
    map: DashMap<LabelKey, AtomicI64>,
}

impl GaugeVec {
    pub fn inc(&self, labels: &[(&str, &str)]) {
        self.add(labels, 1);
    }
    pub fn dec(&self, labels: &[(&str, &str)]) {
        self.add(labels, -1);
    }

    pub fn add(&self, labels: &[(&str, &str)], v: i64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(v, Ordering::Relaxed);
    }

    /// Overwrite one series.
    pub fn set(&self, labels: &[(&str, &str)], v: i64) {
        self.map
            .entry(label_key(labels))
            .or_insert_with(|| AtomicI64::new(0))
            .store(v, Ordering::Relaxed);
    }

    pub fn get(&self, labels: &[(&str, &str)]) -> i64 {
        self.map
            .get(&label_key(labels))
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} gauge", name);
        for r in self.map.iter() {
            let _ = writeln!(
                out,
                "{}{{{}}} {}",
                name,
                render_labels(r.key()),
                r.value().load(Ordering::Relaxed)
            );
        }
    }
}

// 1ms .. 5s; ledger reads are the only thing timed.
const BUCKETS_MICROS: [u64; 8] = [
    1_000, 5_000, 10_000, 50_000, 100_000, 500_000, 1_000_000, 5_000_000,
];

#[derive(Default)]
struct AtomicHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    buckets: [AtomicU64; BUCKETS_MICROS.len()],
}

#[derive(Default)]
pub struct HistogramVec {
    map: DashMap<LabelKey, AtomicHistogram>,
}

impl HistogramVec {
    /// Observe a duration into cumulative buckets (microsecond scale).
    pub fn observe(&self, labels: &[(&str, &str)], duration: Duration) {
        let hist = self.map.entry(label_key(labels)).or_default();
        let micros = duration.as_micros() as u64;

        hist.count.fetch_add(1, Ordering::Relaxed);
        hist.sum.fetch_add(micros, Ordering::Relaxed);
        for (i, &b) in BUCKETS_MICROS.iter().enumerate() {
            if micros <= b {
                hist.buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn render(&self, name: &str, out: &mut String) {
        let _ = writeln!(out, "# TYPE {} histogram", name);
        for r in self.map.iter() {
            let hist = r.value();
            let labels = render_labels(r.key());
            let prefix = if labels.is_empty() {
                String::new()
            } else {
                format!("{},", labels)
            };

            for (i, &le) in BUCKETS_MICROS.iter().enumerate() {
                let n = hist.buckets[i].load(Ordering::Relaxed);
                let _ = writeln!(out, "{}_bucket{{{}le=\"{}\"}} {}", name, prefix, le, n);
            }
            let count = hist.count.load(Ordering::Relaxed);
            let _ = writeln!(out, "{}_bucket{{{}le=\"+Inf\"}} {}", name, prefix, count);
            let _ = writeln!(out, "{}_sum{{{}}} {}", name, labels, hist.sum.load(Ordering::Relaxed));
            let _ = writeln!(out, "{}_count{{{}}} {}", name, labels, count);
        }
    }
}

/// All relay metric families.
///
/// Label conventions:
/// - `frames`: `dir` = rx | tx | fwd | local | queued
/// - `drops`: `code` = `DropCode::as_str()`
/// - `gossip`: `kind` = gossip kind, `outcome` = applied | duplicate | rejected | sent
/// - `queue_events`: `queue` = pending | bootstrap, `event` = queued | replayed | expired | overflow
/// - `peer_links`: `swarm` = base | match
/// - `local_clients`: `kind` = doom | meta
/// - `ledger_ops`: `op`, `outcome` = ok | error
#[derive(Default)]
pub struct RelayMetrics {
    pub frames: CounterVec,
    pub drops: CounterVec,
    pub gossip: CounterVec,
    pub queue_events: CounterVec,
    pub ledger_ops: CounterVec,
    pub ledger_read_duration: HistogramVec,
    pub swarm_transitions: CounterVec,
    pub peer_links: GaugeVec,
    pub local_clients: GaugeVec,
}

impl RelayMetrics {
    pub fn render(&self, extra: &[(&str, u64)]) -> String {
        let mut out = String::new();
        self.frames.render("doommesh_frames_total", &mut out);
        self.drops.render("doommesh_drops_total", &mut out);
        self.gossip.render("doommesh_gossip_total", &mut out);
        self.queue_events.render("doommesh_queue_events_total", &mut out);
        self.ledger_ops.render("doommesh_ledger_ops_total", &mut out);
        self.ledger_read_duration
            .render("doommesh_ledger_read_duration_micros", &mut out);
        self.swarm_transitions
            .render("doommesh_swarm_transitions_total", &mut out);
        self.peer_links.render("doommesh_peer_links", &mut out);
        self.local_clients.render("doommesh_local_clients", &mut out);
        for (k, v) in extra {
            let _ = writeln!(out, "{} {}", k, v);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_order_does_not_split_series() {
        let c = CounterVec::default();
        c.inc(&[("a", "1"), ("b", "2")]);
        c.inc(&[("b", "2"), ("a", "1")]);
        assert_eq!(c.get(&[("a", "1"), ("b", "2")]), 2);
    }

    #[test]
    fn render_contains_families_and_escapes() {
        let m = RelayMetrics::default();
        m.drops.inc(&[("code", "RE\"PLAY")]);
        m.peer_links.set(&[("swarm", "base")], 3);
        m.ledger_read_duration
            .observe(&[("op", "roster")], Duration::from_millis(2));
        let text = m.render(&[("doommesh_up", 1)]);
        assert!(text.contains("doommesh_drops_total{code=\"RE\\\"PLAY\"} 1"));
        assert!(text.contains("doommesh_peer_links{swarm=\"base\"} 3"));
        assert!(text.contains("doommesh_ledger_read_duration_micros_bucket{op=\"roster\",le=\"5000\"} 1"));
        assert!(text.contains("doommesh_up 1"));
    }
}
