//! Per-session transfer statistics.
//!
//! The client collects one RTT sample per acknowledged segment (measured
//! from the segment's most recent transmission) plus a transmission counter
//! that includes retransmissions.  [`SessionReport`] carries the raw
//! numbers; [`RttSummary`] condenses the samples for display.

use std::fmt;
use std::time::Duration;

/// Five-number condensation of a set of RTT samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttSummary {
    pub count: usize,
    pub min: Duration,
    pub max: Duration,
    pub mean: Duration,
    /// Sample standard deviation (n - 1 denominator); zero for a single
    /// sample.
    pub stddev: Duration,
}

impl RttSummary {
    /// Summarize `samples`, or `None` when there are none to summarize.
    pub fn from_samples(samples: &[Duration]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let count = samples.len();
        let min = samples.iter().copied().min().unwrap_or_default();
        let max = samples.iter().copied().max().unwrap_or_default();

        let secs: Vec<f64> = samples.iter().map(Duration::as_secs_f64).collect();
        let mean_secs = secs.iter().sum::<f64>() / count as f64;
        let stddev_secs = if count < 2 {
            0.0
        } else {
            let var = secs
                .iter()
                .map(|s| (s - mean_secs).powi(2))
                .sum::<f64>()
                / (count - 1) as f64;
            var.sqrt()
        };

        Some(Self {
            count,
            min,
            max,
            mean: Duration::from_secs_f64(mean_secs),
            stddev: Duration::from_secs_f64(stddev_secs),
        })
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

impl fmt::Display for RttSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "samples={} min={:.3}ms mean={:.3}ms max={:.3}ms stddev={:.3}ms",
            self.count,
            millis(self.min),
            millis(self.mean),
            millis(self.max),
            millis(self.stddev),
        )
    }
}

/// Everything the client learned from one completed session.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Distinct data segments the transfer consisted of.
    pub total_segments: u64,
    /// Data-segment transmissions, retransmissions included.
    pub transmissions: u64,
    /// One sample per acknowledged segment.
    pub rtt_samples: Vec<Duration>,
}

impl SessionReport {
    pub fn new(total_segments: u64, transmissions: u64, rtt_samples: Vec<Duration>) -> Self {
        Self {
            total_segments,
            transmissions,
            rtt_samples,
        }
    }

    /// Distinct segments as a percentage of transmissions.
    ///
    /// 100 means every segment went out exactly once; loss-driven
    /// retransmission pushes the figure down.  Empty sessions count as 100.
    pub fn loss_rate(&self) -> f64 {
        if self.transmissions == 0 {
            return 100.0;
        }
        self.total_segments as f64 / self.transmissions as f64 * 100.0
    }

    /// Condensed RTT view, or `None` when no segment was ever acknowledged.
    pub fn rtt_summary(&self) -> Option<RttSummary> {
        RttSummary::from_samples(&self.rtt_samples)
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "==== session statistics ====")?;
        writeln!(f, "segments delivered:  {}", self.total_segments)?;
        writeln!(f, "total transmissions: {}", self.transmissions)?;
        writeln!(f, "delivery efficiency: {:.1}%", self.loss_rate())?;
        match self.rtt_summary() {
            Some(summary) => write!(f, "rtt: {summary}"),
            None => write!(f, "rtt: no samples"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn summary_of_known_samples() {
        let s = RttSummary::from_samples(&[ms(10), ms(20), ms(30)]).unwrap();
        assert_eq!(s.count, 3);
        assert_eq!(s.min, ms(10));
        assert_eq!(s.max, ms(30));
        assert!((s.mean.as_secs_f64() - 0.020).abs() < 1e-9);
        // Sample stddev of 10/20/30 ms is exactly 10 ms.
        assert!((s.stddev.as_secs_f64() - 0.010).abs() < 1e-9);
    }

    #[test]
    fn single_sample_has_zero_stddev() {
        let s = RttSummary::from_samples(&[ms(42)]).unwrap();
        assert_eq!(s.count, 1);
        assert_eq!(s.mean, ms(42));
        assert_eq!(s.stddev, Duration::ZERO);
    }

    #[test]
    fn no_samples_no_summary() {
        assert!(RttSummary::from_samples(&[]).is_none());
    }

    #[test]
    fn loss_rate_without_retransmissions_is_100() {
        let r = SessionReport::new(30, 30, vec![ms(1); 30]);
        assert!((r.loss_rate() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn loss_rate_halves_when_everything_sent_twice() {
        let r = SessionReport::new(30, 60, vec![ms(1); 30]);
        assert!((r.loss_rate() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn empty_session_is_fully_efficient() {
        let r = SessionReport::new(0, 0, Vec::new());
        assert!((r.loss_rate() - 100.0).abs() < 1e-9);
        assert!(r.rtt_summary().is_none());
    }

    #[test]
    fn report_renders_counts() {
        let r = SessionReport::new(30, 35, vec![ms(5), ms(7)]);
        let text = r.to_string();
        assert!(text.contains("segments delivered:  30"));
        assert!(text.contains("total transmissions: 35"));
        assert!(text.contains("samples=2"));
    }
}
