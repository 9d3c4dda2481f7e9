use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::utils::sleep_or_cancel;
use super::policy::CompletionPolicy;
use super::PageSignals;

const PROGRESS_LOG_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Stable, long enough, and past the elapsed floor.
    Complete(String),
    /// `max_wait` expired but the last text passed the length floor.
    Partial(String),
    /// Neither a busy indicator nor a new response unit within the start bound.
    NeverStarted,
    /// `max_wait` expired without usable text.
    TimedOut,
    Cancelled,
}

impl CompletionOutcome {
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Complete(text) | Self::Partial(text) => Some(text),
            _ => None,
        }
    }

    pub fn into_text(self) -> Option<String> {
        match self {
            Self::Complete(text) | Self::Partial(text) => Some(text),
            _ => None,
        }
    }
}

/// Per-session completion protocol state.
///
/// The session baseline is the unit count before the first prompt and never
/// moves afterwards; artifact discovery only looks at units past it. The
/// pre-prompt count is refreshed before every prompt and is what generation
/// start is measured against.
#[derive(Debug)]
pub struct CompletionDetector {
    policy: CompletionPolicy,
    baseline: Option<usize>,
    pre_prompt: usize,
}

impl CompletionDetector {
    pub fn new(policy: CompletionPolicy) -> Self {
        Self { policy, baseline: None, pre_prompt: 0 }
    }

    pub fn policy(&self) -> &CompletionPolicy {
        &self.policy
    }

    pub fn baseline(&self) -> Option<usize> {
        self.baseline
    }

    pub fn pre_prompt_count(&self) -> usize {
        self.pre_prompt
    }

    /// Snapshot the unit count right before a prompt is submitted. The first
    /// call of a session also fixes the baseline.
    pub async fn capture_pre_prompt(&mut self, signals: &dyn PageSignals) -> usize {
        match signals.count_response_units().await {
            Ok(count) => self.pre_prompt = count,
            Err(e) => debug!(error = %e, "Unit count unavailable before prompt, keeping previous value"),
        }
        match self.baseline {
            None => {
                self.baseline = Some(self.pre_prompt);
                info!(baseline = self.pre_prompt, "Baseline response units captured");
            }
            Some(baseline) => {
                debug!(current = self.pre_prompt, baseline, "Baseline kept");
            }
        }
        self.pre_prompt
    }

    /// Run the three-phase protocol for the prompt just submitted.
    pub async fn wait_for_completion(
        &mut self,
        signals: &dyn PageSignals,
        cancel: &CancellationToken,
    ) -> CompletionOutcome {
        if self.baseline.is_none() {
            self.baseline = Some(self.pre_prompt);
        }
        let wait_start = Instant::now();
        let deadline = wait_start + self.policy.max_wait;

        if !sleep_or_cancel(cancel, self.policy.initial_delay).await {
            return CompletionOutcome::Cancelled;
        }

        let Some((generation_start, start_units)) = self.await_generation_start(signals, cancel).await else {
            if cancel.is_cancelled() {
                return CompletionOutcome::Cancelled;
            }
            warn!(
                timeout_secs = self.policy.start_timeout.as_secs(),
                "Response generation did not start"
            );
            return CompletionOutcome::NeverStarted;
        };

        let required = self.policy.required_stable_samples;
        let mut stable = 0u32;
        let mut last_units = start_units;
        let mut last_text = String::new();
        let mut last_progress = Instant::now();

        while Instant::now() < deadline {
            if cancel.is_cancelled() {
                return CompletionOutcome::Cancelled;
            }

            let generating = match signals.is_generating().await {
                Ok(generating) => generating,
                Err(e) => {
                    debug!(error = %e, "Generation probe failed, treating sample as busy");
                    true
                }
            };
            let units = match signals.count_response_units().await {
                Ok(units) => Some(units),
                Err(e) => {
                    debug!(error = %e, "Unit count failed, treating sample as changed");
                    None
                }
            };
            let units_changed = units.map_or(true, |u| u != last_units);
            if let Some(u) = units {
                if u != last_units {
                    info!(from = last_units, to = u, "Response unit count changed");
                }
                last_units = u;
            }
            let text = match signals.extract_latest_response().await {
                Ok(text) => Some(text.unwrap_or_default()),
                Err(e) => {
                    debug!(error = %e, "Response extraction failed");
                    None
                }
            };

            match text {
                Some(current) if !generating && !units_changed => {
                    if current == last_text {
                        stable += 1;
                    } else {
                        stable = 0;
                        last_text = current;
                    }
                }
                Some(current) => {
                    stable = 0;
                    last_text = current;
                }
                None => stable = 0,
            }

            if stable >= required {
                let since_start = generation_start.elapsed();
                let long_enough = last_text.chars().count() > self.policy.min_response_chars;
                if long_enough && since_start >= self.policy.min_elapsed {
                    info!(
                        elapsed_secs = since_start.as_secs(),
                        chars = last_text.chars().count(),
                        "Response complete"
                    );
                    return CompletionOutcome::Complete(last_text);
                }
                if !long_enough {
                    debug!(chars = last_text.chars().count(), "Stable but below length floor");
                } else {
                    debug!(elapsed_secs = since_start.as_secs(), "Stable but before elapsed floor");
                }
            }

            if last_progress.elapsed().as_secs() >= PROGRESS_LOG_INTERVAL_SECS {
                info!(
                    elapsed_secs = wait_start.elapsed().as_secs(),
                    generating,
                    response_len = last_text.len(),
                    stable,
                    required,
                    "Waiting for response"
                );
                last_progress = Instant::now();
            }

            if !sleep_or_cancel(cancel, self.policy.check_interval).await {
                return CompletionOutcome::Cancelled;
            }
        }

        warn!(max_wait_secs = self.policy.max_wait.as_secs(), "Response wait timed out");
        let final_text = match signals.extract_latest_response().await {
            Ok(Some(text)) => text,
            _ => last_text,
        };
        if final_text.chars().count() > self.policy.min_response_chars {
            info!(chars = final_text.chars().count(), "Returning partial response after timeout");
            CompletionOutcome::Partial(final_text)
        } else {
            CompletionOutcome::TimedOut
        }
    }

    /// Poll until a busy indicator fires or a unit beyond the pre-prompt count
    /// appears. Returns the start instant and the unit count seen then.
    async fn await_generation_start(
        &self,
        signals: &dyn PageSignals,
        cancel: &CancellationToken,
    ) -> Option<(Instant, usize)> {
        let bound = Instant::now() + self.policy.start_timeout;
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            let generating = signals.is_generating().await.unwrap_or(false);
            let units = signals.count_response_units().await.ok();

            if generating {
                info!("Response generation started (busy indicator)");
                return Some((Instant::now(), units.unwrap_or(self.pre_prompt)));
            }
            if let Some(units) = units.filter(|u| *u > self.pre_prompt) {
                info!(units, pre_prompt = self.pre_prompt, "New response unit appeared");
                return Some((Instant::now(), units));
            }

            if Instant::now() >= bound {
                return None;
            }
            if !sleep_or_cancel(cancel, self.policy.start_poll_interval).await {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::testing::{Sample, ScriptedSignals};

    fn fast_policy() -> CompletionPolicy {
        CompletionPolicy {
            initial_delay: Duration::from_secs(1),
            start_timeout: Duration::from_secs(20),
            start_poll_interval: Duration::from_secs(2),
            check_interval: Duration::from_secs(3),
            required_stable_samples: 5,
            min_elapsed: Duration::from_secs(0),
            min_response_chars: 5,
            max_wait: Duration::from_secs(600),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_stable_text_after_generation() {
        let mut samples = vec![Sample::busy(1), Sample::busy(1)];
        samples.extend(std::iter::repeat(Sample::text(1, "Result ABC")).take(6));
        let signals = ScriptedSignals::new(0, samples);

        let mut detector = CompletionDetector::new(fast_policy());
        detector.capture_pre_prompt(&signals).await;
        let outcome = detector.wait_for_completion(&signals, &CancellationToken::new()).await;
        assert_eq!(outcome, CompletionOutcome::Complete("Result ABC".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_started_returns_none() {
        let signals = ScriptedSignals::new(2, vec![Sample::idle(2)]);
        let mut detector = CompletionDetector::new(fast_policy());
        detector.capture_pre_prompt(&signals).await;

        let started = Instant::now();
        let outcome = detector.wait_for_completion(&signals, &CancellationToken::new()).await;
        assert_eq!(outcome, CompletionOutcome::NeverStarted);
        assert!(outcome.into_text().is_none());
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_unit_counts_as_start() {
        let mut samples = vec![Sample::idle(3)];
        samples.extend(std::iter::repeat(Sample::text(3, "the final answer")).take(7));
        let signals = ScriptedSignals::new(2, samples);
        let mut detector = CompletionDetector::new(fast_policy());
        detector.capture_pre_prompt(&signals).await;
        let outcome = detector.wait_for_completion(&signals, &CancellationToken::new()).await;
        assert_eq!(outcome.text(), Some("the final answer"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_busy_signal_delays_completion() {
        let steady = || std::iter::repeat(Sample::text(1, "Result ABC"));

        let mut plain = vec![Sample::busy(1)];
        plain.extend(steady().take(8));
        let signals = ScriptedSignals::new(0, plain);
        let mut detector = CompletionDetector::new(fast_policy());
        detector.capture_pre_prompt(&signals).await;
        let t0 = Instant::now();
        detector.wait_for_completion(&signals, &CancellationToken::new()).await;
        let undisturbed = t0.elapsed();
        let undisturbed_polls = signals.polls();

        // Busy blip right before the fifth stable sample.
        let mut blipped = vec![Sample::busy(1)];
        blipped.extend(steady().take(4));
        blipped.push(Sample::busy(1));
        blipped.extend(steady().take(8));
        let signals = ScriptedSignals::new(0, blipped);
        let mut detector = CompletionDetector::new(fast_policy());
        detector.capture_pre_prompt(&signals).await;
        let t0 = Instant::now();
        let outcome = detector.wait_for_completion(&signals, &CancellationToken::new()).await;

        assert_eq!(outcome, CompletionOutcome::Complete("Result ABC".into()));
        assert!(t0.elapsed() > undisturbed);
        assert!(signals.polls() > undisturbed_polls);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_count_change_resets_counter() {
        let mut samples = vec![Sample::busy(1)];
        samples.extend(std::iter::repeat(Sample::text(1, "Result ABC")).take(4));
        samples.push(Sample::text(2, "Result ABC"));
        samples.extend(std::iter::repeat(Sample::text(2, "Result ABC")).take(3));
        let signals = ScriptedSignals::new(0, samples);
        let mut detector = CompletionDetector::new(fast_policy());
        detector.capture_pre_prompt(&signals).await;
        let outcome = detector.wait_for_completion(&signals, &CancellationToken::new()).await;
        assert!(matches!(outcome, CompletionOutcome::Complete(_)));
        // 1 start poll + 5 samples before the change + 5 stable samples after it
        assert!(signals.polls() >= 11);
    }

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_floor_holds_completion() {
        let mut samples = vec![Sample::busy(1)];
        samples.extend(std::iter::repeat(Sample::text(1, "Result ABC")).take(3));
        let signals = ScriptedSignals::new(0, samples);
        let policy = CompletionPolicy { min_elapsed: Duration::from_secs(60), ..fast_policy() };
        let mut detector = CompletionDetector::new(policy);
        detector.capture_pre_prompt(&signals).await;

        let t0 = Instant::now();
        let outcome = detector.wait_for_completion(&signals, &CancellationToken::new()).await;
        assert!(matches!(outcome, CompletionOutcome::Complete(_)));
        assert!(t0.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_text_times_out_without_result() {
        let signals = ScriptedSignals::new(0, vec![Sample::busy(1), Sample::text(1, "ok")]);
        let policy = CompletionPolicy { max_wait: Duration::from_secs(60), ..fast_policy() };
        let mut detector = CompletionDetector::new(policy);
        detector.capture_pre_prompt(&signals).await;
        let outcome = detector.wait_for_completion(&signals, &CancellationToken::new()).await;
        assert_eq!(outcome, CompletionOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_returns_partial_text() {
        // Never stops generating, but the text passes the length floor.
        let signals = ScriptedSignals::new(0, vec![Sample::busy_with_text(1, "long partial answer")]);
        let policy = CompletionPolicy { max_wait: Duration::from_secs(60), ..fast_policy() };
        let mut detector = CompletionDetector::new(policy);
        detector.capture_pre_prompt(&signals).await;
        let outcome = detector.wait_for_completion(&signals, &CancellationToken::new()).await;
        assert_eq!(outcome, CompletionOutcome::Partial("long partial answer".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_detector_errors_never_complete() {
        let signals = ScriptedSignals::new(0, vec![Sample::busy(1), Sample::failing()]);
        let policy = CompletionPolicy { max_wait: Duration::from_secs(60), ..fast_policy() };
        let mut detector = CompletionDetector::new(policy);
        detector.capture_pre_prompt(&signals).await;
        let outcome = detector.wait_for_completion(&signals, &CancellationToken::new()).await;
        assert_eq!(outcome, CompletionOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_observed() {
        let signals = ScriptedSignals::new(0, vec![Sample::busy(1)]);
        let mut detector = CompletionDetector::new(fast_policy());
        detector.capture_pre_prompt(&signals).await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            trigger.cancel();
        });
        let t0 = Instant::now();
        let outcome = detector.wait_for_completion(&signals, &cancel).await;
        assert_eq!(outcome, CompletionOutcome::Cancelled);
        assert!(t0.elapsed() < Duration::from_secs(35));
    }

    #[tokio::test(start_paused = true)]
    async fn test_baseline_fixed_after_first_call() {
        let mut samples = vec![Sample::busy(4)];
        samples.extend(std::iter::repeat(Sample::text(4, "Result ABC")).take(6));
        let signals = ScriptedSignals::new(3, samples);
        let mut detector = CompletionDetector::new(fast_policy());

        detector.capture_pre_prompt(&signals).await;
        detector.wait_for_completion(&signals, &CancellationToken::new()).await;
        assert_eq!(detector.baseline(), Some(3));

        signals.rewind(5, vec![Sample::busy(6), Sample::text(6, "Second result")]);
        detector.capture_pre_prompt(&signals).await;
        detector.wait_for_completion(&signals, &CancellationToken::new()).await;
        assert_eq!(detector.baseline(), Some(3));
        assert_eq!(detector.pre_prompt_count(), 5);
    }
}
