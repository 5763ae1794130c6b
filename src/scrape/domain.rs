//! Per-domain fetch history and adaptive timeouts.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::utils::config::ScraperSettings;

/// Accumulated fetch history for one host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainStat {
    pub domain: String,
    pub success_count: u64,
    pub failure_count: u64,
    pub timeout_count: u64,
    /// Mean latency over every attempt that produced a measurement
    pub avg_latency_ms: f64,
    pub last_timeout_used_ms: u64,
    /// Response status code histogram
    pub status_codes: BTreeMap<u16, u64>,
}

impl DomainStat {
    fn new(domain: &str) -> Self {
        Self {
            domain: domain.to_string(),
            ..Default::default()
        }
    }

    pub fn attempts(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn failure_rate(&self) -> f64 {
        match self.attempts() {
            0 => 0.0,
            n => self.failure_count as f64 / n as f64,
        }
    }
}

/// Outcome of one fetch attempt, as fed back into [`DomainReliability`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attempt {
    pub success: bool,
    pub latency: Duration,
    pub status: Option<u16>,
    pub timed_out: bool,
}

impl Attempt {
    pub fn success(latency: Duration, status: u16) -> Self {
        Self {
            success: true,
            latency,
            status: Some(status),
            timed_out: false,
        }
    }

    pub fn failure(latency: Duration, status: Option<u16>) -> Self {
        Self {
            success: false,
            latency,
            status,
            timed_out: false,
        }
    }

    pub fn timeout(latency: Duration) -> Self {
        Self {
            success: false,
            latency,
            status: None,
            timed_out: true,
        }
    }
}

/// Bounds for the adaptive timeout computation.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeoutPolicy {
    pub default: Duration,
    pub min: Duration,
    pub max: Duration,
    /// Latency multiplier applied once a domain has enough successes
    pub latency_factor: f64,
    pub min_successes: u64,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            default: Duration::from_secs(10),
            min: Duration::from_secs(5),
            max: Duration::from_secs(30),
            latency_factor: 1.5,
            min_successes: 3,
        }
    }
}

impl From<&ScraperSettings> for TimeoutPolicy {
    fn from(settings: &ScraperSettings) -> Self {
        Self {
            default: Duration::from_millis(settings.default_timeout_ms),
            min: Duration::from_millis(settings.min_timeout_ms),
            max: Duration::from_millis(settings.max_timeout_ms),
            ..Default::default()
        }
    }
}

impl TimeoutPolicy {
    /// Timeout for a domain with the given history.
    ///
    /// Domains without `min_successes` successes start from `default`; the
    /// rest start from `avg_latency * latency_factor`. The base is then
    /// stretched by `1 + failure_rate` and clamped to `[min, max]`, so for a
    /// fixed latency profile the timeout never shrinks as failures grow.
    pub fn timeout_for(&self, stat: Option<&DomainStat>) -> Duration {
        let Some(stat) = stat else {
            return self.default;
        };
        let base_ms = if stat.success_count >= self.min_successes {
            stat.avg_latency_ms * self.latency_factor
        } else {
            self.default.as_millis() as f64
        };
        let scaled_ms = base_ms * (1.0 + stat.failure_rate());
        let clamped = scaled_ms.clamp(self.min.as_millis() as f64, self.max.as_millis() as f64);
        Duration::from_millis(clamped.round() as u64)
    }
}

/// Shared per-domain statistics. Updates are whole read-modify-write
/// operations under one lock, so concurrent attempts never lose counts.
#[derive(Debug, Default)]
pub struct DomainReliability {
    stats: Mutex<HashMap<String, DomainStat>>,
    policy: TimeoutPolicy,
}

impl DomainReliability {
    pub fn new(policy: TimeoutPolicy) -> Self {
        Self {
            stats: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub fn policy(&self) -> &TimeoutPolicy {
        &self.policy
    }

    /// Timeout to use for the next attempt against `url`'s host.
    pub fn timeout_for(&self, url: &str) -> Duration {
        let domain = domain_key(url);
        let mut stats = self.stats.lock();
        let timeout = self.policy.timeout_for(stats.get(&domain));
        if let Some(stat) = stats.get_mut(&domain) {
            stat.last_timeout_used_ms = timeout.as_millis() as u64;
        }
        timeout
    }

    /// Fold one attempt into the domain's history.
    pub fn record(&self, url: &str, attempt: Attempt) {
        let domain = domain_key(url);
        let mut stats = self.stats.lock();
        let stat = stats
            .entry(domain.clone())
            .or_insert_with(|| DomainStat::new(&domain));

        if attempt.success {
            stat.success_count += 1;
        } else {
            stat.failure_count += 1;
        }
        if attempt.timed_out {
            stat.timeout_count += 1;
        }
        if let Some(code) = attempt.status {
            *stat.status_codes.entry(code).or_insert(0) += 1;
        }
        let n = stat.attempts() as f64;
        let latency_ms = attempt.latency.as_secs_f64() * 1000.0;
        stat.avg_latency_ms += (latency_ms - stat.avg_latency_ms) / n;

        debug!(
            domain = %domain,
            success = attempt.success,
            latency_ms = latency_ms as u64,
            failure_rate = stat.failure_rate(),
            "Recorded fetch attempt"
        );
    }

    pub fn stat(&self, url_or_domain: &str) -> Option<DomainStat> {
        self.stats.lock().get(&domain_key(url_or_domain)).cloned()
    }

    /// Snapshot of every domain's history, sorted by domain.
    pub fn snapshot(&self) -> Vec<DomainStat> {
        let mut all: Vec<DomainStat> = self.stats.lock().values().cloned().collect();
        all.sort_by(|a, b| a.domain.cmp(&b.domain));
        all
    }
}

/// Lowercased host of `url`; bare hostnames are accepted as-is.
pub fn domain_key(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => parsed
            .host_str()
            .map(|h| h.to_ascii_lowercase())
            .unwrap_or_else(|| "unknown".to_string()),
        Err(_) => url.trim().to_ascii_lowercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_unseen_domain_uses_default() {
        let domains = DomainReliability::new(TimeoutPolicy::default());
        assert_eq!(domains.timeout_for("https://new.example/page"), Duration::from_secs(10));
    }

    #[test]
    fn test_fast_history_shortens_timeout() {
        let domains = DomainReliability::new(TimeoutPolicy::default());
        for _ in 0..3 {
            domains.record("https://fast.example/a", Attempt::success(ms(200), 200));
        }
        // 200ms * 1.5 clamps up to the 5s floor.
        assert_eq!(domains.timeout_for("https://fast.example/b"), Duration::from_secs(5));
        assert_eq!(domains.stat("fast.example").unwrap().last_timeout_used_ms, 5_000);
    }

    #[test]
    fn test_slow_history_is_capped() {
        let domains = DomainReliability::new(TimeoutPolicy::default());
        for _ in 0..3 {
            domains.record("https://slow.example", Attempt::success(ms(25_000), 200));
        }
        assert_eq!(domains.timeout_for("https://slow.example"), Duration::from_secs(30));
    }

    #[test]
    fn test_timeout_is_monotone_in_failure_rate() {
        let policy = TimeoutPolicy::default();
        let mut previous = Duration::ZERO;
        for failures in 0..6u64 {
            let stat = DomainStat {
                domain: "d".into(),
                success_count: 4,
                failure_count: failures,
                avg_latency_ms: 6_000.0,
                ..Default::default()
            };
            let timeout = policy.timeout_for(Some(&stat));
            assert!(timeout >= previous, "{failures} failures gave {timeout:?} < {previous:?}");
            previous = timeout;
        }
        assert!(previous > Duration::from_secs(9));
    }

    #[test]
    fn test_record_counts_and_average() {
        let domains = DomainReliability::default();
        domains.record("https://x.example/1", Attempt::success(ms(100), 200));
        domains.record("https://x.example/2", Attempt::failure(ms(300), Some(503)));
        domains.record("https://X.example/3", Attempt::timeout(ms(500)));

        let stat = domains.stat("https://x.example").unwrap();
        assert_eq!(stat.success_count, 1);
        assert_eq!(stat.failure_count, 2);
        assert_eq!(stat.timeout_count, 1);
        assert_eq!(stat.status_codes.get(&200), Some(&1));
        assert_eq!(stat.status_codes.get(&503), Some(&1));
        assert!((stat.avg_latency_ms - 300.0).abs() < 1e-6);
        assert_eq!(domains.snapshot().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let domains = std::sync::Arc::new(DomainReliability::default());
        let mut tasks = Vec::new();
        for i in 0..16 {
            let domains = domains.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..25 {
                    let attempt = if i % 2 == 0 {
                        Attempt::success(ms(10), 200)
                    } else {
                        Attempt::failure(ms(10), Some(500))
                    };
                    domains.record("https://shared.example", attempt);
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        let stat = domains.stat("shared.example").unwrap();
        assert_eq!(stat.success_count, 200);
        assert_eq!(stat.failure_count, 200);
    }
}
