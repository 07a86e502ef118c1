//! Waiting for asynchronous actions
//!
//! Mutating API calls may return an [`Action`] that completes later. The
//! [`ActionWaiter`] polls such an action until it reaches a terminal
//! status, the deadline passes, or the caller cancels.
//!
//! A wait moves through these states:
//!
//! ```text
//!   Pending ──running──▶ Polling ──running──▶ Polling ...
//!      │                    │
//!      ├─success────────────┴──▶ Succeeded
//!      ├─error──────────────┴──▶ Failed
//!      │                    ├──▶ TimedOut   (deadline)
//!      └────────────────────┴──▶ Cancelled  (token)
//! ```
//!
//! Transport failures while fetching the status are retried with
//! exponential backoff inside a single poll.

use crate::error::{ProviderError, Result};
use hcloud_api::{Action, ActionApi, ActionStatus, HcloudError};
use serde::Deserialize;
use std::time::Duration;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_util::sync::CancellationToken;

/// Deadline used when the configured timeout does not fit an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// How the delay between status polls evolves
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollFunction {
    /// Same interval every time
    Constant,
    /// Interval doubles after every poll, up to `max_interval`
    #[default]
    Exponential,
}

impl std::str::FromStr for PollFunction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "constant" => Ok(PollFunction::Constant),
            "exponential" => Ok(PollFunction::Exponential),
            other => Err(format!(
                "unknown poll function '{}' (expected 'constant' or 'exponential')",
                other
            )),
        }
    }
}

/// Retry configuration for status fetches that fail in transit
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts per fetch
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Polling settings for [`ActionWaiter`]
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_interval: Duration,
    pub function: PollFunction,
    /// Overall deadline of a single wait
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(10),
            function: PollFunction::Exponential,
            timeout: Duration::from_secs(30 * 60),
            retry: RetryConfig::default(),
        }
    }
}

impl PollConfig {
    /// Delay before poll number `poll` (0-based)
    pub fn delay_for_poll(&self, poll: u32) -> Duration {
        match self.function {
            PollFunction::Constant => self.interval,
            PollFunction::Exponential => {
                let cap = self.max_interval.max(self.interval);
                let factor = 2u32.saturating_pow(poll.min(16));
                self.interval.saturating_mul(factor).min(cap)
            }
        }
    }
}

/// Where a wait currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    Pending,
    Polling,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl WaitState {
    fn observe(action: &Action) -> Self {
        match action.status {
            ActionStatus::Running => WaitState::Polling,
            ActionStatus::Success => WaitState::Succeeded,
            ActionStatus::Error => WaitState::Failed,
        }
    }
}

/// Polls actions until they finish
///
/// Holds no per-wait state, so one waiter can serve concurrent waits on
/// independent actions.
#[derive(Debug, Clone, Default)]
pub struct ActionWaiter {
    config: PollConfig,
}

impl ActionWaiter {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Wait for an optional action; `None` needs no follow-up and succeeds at once
    pub async fn wait_for<A: ActionApi + ?Sized>(
        &self,
        api: &A,
        action: Option<&Action>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match action {
            Some(action) => self.wait(api, action, cancel).await.map(|_| ()),
            None => Ok(()),
        }
    }

    /// Wait for several actions one after another, stopping at the first failure
    pub async fn wait_all<A: ActionApi + ?Sized>(
        &self,
        api: &A,
        actions: &[Action],
        cancel: &CancellationToken,
    ) -> Result<()> {
        for action in actions {
            self.wait(api, action, cancel).await?;
        }
        Ok(())
    }

    /// Wait for a single action and return its terminal view
    pub async fn wait<A: ActionApi + ?Sized>(
        &self,
        api: &A,
        action: &Action,
        cancel: &CancellationToken,
    ) -> Result<Action> {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.config.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut current = action.clone();
        let mut polls = 0u32;
        let mut state = WaitState::Pending;

        loop {
            state = match state {
                WaitState::Pending => WaitState::observe(&current),
                WaitState::Polling => {
                    let delay = self.config.delay_for_poll(polls);
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => WaitState::Cancelled,
                        _ = sleep_until(deadline) => WaitState::TimedOut,
                        fetched = self.poll_once(api, current.id, delay) => {
                            polls += 1;
                            current = fetched?;
                            tracing::debug!(
                                action = current.id,
                                command = %current.command,
                                status = %current.status,
                                progress = current.progress,
                                "Polled action"
                            );
                            WaitState::observe(&current)
                        }
                    }
                }
                WaitState::Succeeded => {
                    tracing::debug!(action = current.id, polls, "Action succeeded");
                    return Ok(current);
                }
                WaitState::Failed => {
                    let (code, message) = current
                        .error
                        .as_ref()
                        .map(|e| (e.code.clone(), e.message.clone()))
                        .unwrap_or_default();
                    return Err(ProviderError::ActionFailed {
                        id: current.id,
                        command: current.command.clone(),
                        code,
                        message,
                    });
                }
                WaitState::TimedOut => {
                    tracing::warn!(
                        action = current.id,
                        polls,
                        "Deadline passed while action was still running"
                    );
                    return Err(ProviderError::Timeout {
                        id: current.id,
                        elapsed: started.elapsed(),
                    });
                }
                WaitState::Cancelled => {
                    tracing::debug!(action = current.id, "Wait cancelled");
                    return Err(ProviderError::Cancelled(current.id));
                }
            };
        }
    }

    async fn poll_once<A: ActionApi + ?Sized>(&self, api: &A, id: i64, delay: Duration) -> Result<Action> {
        sleep(delay).await;
        self.fetch(api, id).await
    }

    /// Fetch the action, retrying failures in transit
    async fn fetch<A: ActionApi + ?Sized>(&self, api: &A, id: i64) -> Result<Action> {
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match api.get_action(id).await {
                Ok(Some(action)) => return Ok(action),
                Ok(None) => return Err(ProviderError::ActionNotFound(id)),
                Err(e) => {
                    if attempt >= retry.max_attempts {
                        tracing::error!(
                            action = id,
                            attempt,
                            error = %e,
                            "Fetching action status failed after max retries"
                        );
                        return Err(match e {
                            HcloudError::Api(api) => ProviderError::Api(api),
                            other => ProviderError::Transport(format!(
                                "polling action {}: {}",
                                id, other
                            )),
                        });
                    }

                    let delay = retry.delay_for_attempt(attempt - 1);
                    tracing::warn!(
                        action = id,
                        attempt,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Fetching action status failed, retrying"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use hcloud_api::{ActionError, ApiError, ErrorCode};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    type Step = std::result::Result<Option<Action>, HcloudError>;

    /// Replays scripted responses per action; unscripted fetches report `running`
    #[derive(Default)]
    struct ScriptedActions {
        scripts: Mutex<HashMap<i64, VecDeque<Step>>>,
        calls: AtomicU32,
    }

    impl ScriptedActions {
        fn script(&self, id: i64, steps: Vec<Step>) {
            self.scripts.lock().unwrap().insert(id, steps.into());
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ActionApi for ScriptedActions {
        async fn get_action(&self, id: i64) -> hcloud_api::Result<Option<Action>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.scripts
                .lock()
                .unwrap()
                .get_mut(&id)
                .and_then(|steps| steps.pop_front())
                .unwrap_or_else(|| Ok(Some(action(id, ActionStatus::Running))))
        }
    }

    fn action(id: i64, status: ActionStatus) -> Action {
        Action {
            id,
            command: "create_certificate".to_string(),
            status,
            progress: if status == ActionStatus::Running { 50 } else { 100 },
            started: Utc::now(),
            finished: None,
            resources: Vec::new(),
            error: None,
        }
    }

    fn failed(id: i64, code: &str, message: &str) -> Action {
        Action {
            error: Some(ActionError {
                code: code.to_string(),
                message: message.to_string(),
            }),
            ..action(id, ActionStatus::Error)
        }
    }

    fn waiter() -> ActionWaiter {
        ActionWaiter::new(PollConfig {
            timeout: Duration::from_secs(60),
            ..PollConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_action_succeeds_without_polling() {
        let api = ScriptedActions::default();
        waiter()
            .wait_for(&api, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_handle_is_not_polled() {
        let api = ScriptedActions::default();
        let done = action(1, ActionStatus::Success);
        let result = waiter().wait(&api, &done, &CancellationToken::new()).await.unwrap();
        assert_eq!(result.status, ActionStatus::Success);
        assert_eq!(api.calls(), 0);

        let err = waiter()
            .wait(&api, &failed(2, "action_failed", "boom"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ActionFailed { id: 2, .. }));
        assert_eq!(api.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_direct_success_stops_polling() {
        let api = ScriptedActions::default();
        api.script(1, vec![Ok(Some(action(1, ActionStatus::Success)))]);

        waiter()
            .wait(&api, &action(1, ActionStatus::Running), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_twice_then_success() {
        let api = ScriptedActions::default();
        api.script(
            7,
            vec![
                Ok(Some(action(7, ActionStatus::Running))),
                Ok(Some(action(7, ActionStatus::Running))),
                Ok(Some(action(7, ActionStatus::Success))),
            ],
        );

        waiter()
            .wait(&api, &action(7, ActionStatus::Running), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_carries_code_and_message_verbatim() {
        let api = ScriptedActions::default();
        api.script(
            3,
            vec![Ok(Some(failed(3, "invalid_server_type", "Server Type is deprecated")))],
        );

        let err = waiter()
            .wait(&api, &action(3, ActionStatus::Running), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            ProviderError::ActionFailed { code, message, .. } => {
                assert_eq!(code, "invalid_server_type");
                assert_eq!(message, "Server Type is deprecated");
            }
            other => panic!("expected ActionFailed, got {:?}", other),
        }
        assert_eq!(api.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_error_is_retried() {
        let api = ScriptedActions::default();
        api.script(
            4,
            vec![
                Err(HcloudError::transport("connection reset by peer")),
                Ok(Some(action(4, ActionStatus::Success))),
            ],
        );

        waiter()
            .wait(&api, &action(4, ActionStatus::Running), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(api.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_retries_exhausted() {
        let api = ScriptedActions::default();
        api.script(
            5,
            (0..3)
                .map(|_| Err(HcloudError::transport("connection refused")))
                .collect(),
        );

        let err = waiter()
            .wait(&api, &action(5, ActionStatus::Running), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Transport(_)), "{:?}", err);
        assert!(err.to_string().contains("connection refused"));
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_api_rejection_keeps_its_code() {
        let api = ScriptedActions::default();
        api.script(
            14,
            (0..3)
                .map(|_| {
                    Err(HcloudError::Api(ApiError::new(
                        ErrorCode::Unauthorized,
                        "unable to authenticate",
                    )))
                })
                .collect(),
        );

        let err = waiter()
            .wait(&api, &action(14, ActionStatus::Running), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Api(_)), "{:?}", err);
        assert_eq!(err.to_string(), "unable to authenticate (unauthorized)");
        assert_eq!(api.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_does_not_overflow() {
        let api = ScriptedActions::default();
        api.script(15, vec![Ok(Some(action(15, ActionStatus::Success)))]);
        let waiter = ActionWaiter::new(PollConfig {
            timeout: Duration::MAX,
            ..PollConfig::default()
        });

        let done = waiter
            .wait(&api, &action(15, ActionStatus::Running), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(done.status, ActionStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_while_running() {
        let api = ScriptedActions::default();
        let waiter = ActionWaiter::new(PollConfig {
            function: PollFunction::Constant,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            ..PollConfig::default()
        });

        let err = waiter
            .wait(&api, &action(6, ActionStatus::Running), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Timeout { id: 6, .. }));
        assert!(err.is_ambiguous());
        assert!(api.calls() >= 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let api = ScriptedActions::default();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            sleep(Duration::from_secs(3)).await;
            trigger.cancel();
        });

        let err = waiter()
            .wait(&api, &action(8, ActionStatus::Running), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::Cancelled(8)));

        let calls = api.calls();
        sleep(Duration::from_secs(30)).await;
        assert_eq!(api.calls(), calls, "no polling after cancellation");
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_action() {
        let api = ScriptedActions::default();
        api.script(9, vec![Ok(None)]);

        let err = waiter()
            .wait(&api, &action(9, ActionStatus::Running), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ActionNotFound(9)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_waits_are_independent() {
        let api = ScriptedActions::default();
        api.script(10, vec![Ok(Some(action(10, ActionStatus::Success)))]);
        api.script(11, vec![Ok(Some(failed(11, "action_failed", "nope")))]);

        let waiter = waiter();
        let cancel = CancellationToken::new();
        let first = action(10, ActionStatus::Running);
        let second = action(11, ActionStatus::Running);
        let (a, b) = tokio::join!(
            waiter.wait(&api, &first, &cancel),
            waiter.wait(&api, &second, &cancel),
        );
        assert!(a.is_ok());
        assert!(matches!(b, Err(ProviderError::ActionFailed { id: 11, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_all_stops_at_first_failure() {
        let api = ScriptedActions::default();
        api.script(12, vec![Ok(Some(failed(12, "action_failed", "nope")))]);

        let actions = vec![action(12, ActionStatus::Running), action(13, ActionStatus::Running)];
        let err = waiter()
            .wait_all(&api, &actions, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::ActionFailed { id: 12, .. }));
        assert_eq!(api.calls(), 1);
    }

    #[test]
    fn test_poll_delays() {
        let config = PollConfig {
            interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(3),
            function: PollFunction::Exponential,
            ..PollConfig::default()
        };
        assert_eq!(config.delay_for_poll(0), Duration::from_millis(500));
        assert_eq!(config.delay_for_poll(1), Duration::from_secs(1));
        assert_eq!(config.delay_for_poll(2), Duration::from_secs(2));
        assert_eq!(config.delay_for_poll(3), Duration::from_secs(3)); // capped
        assert_eq!(config.delay_for_poll(40), Duration::from_secs(3));

        let constant = PollConfig {
            function: PollFunction::Constant,
            ..config
        };
        assert_eq!(constant.delay_for_poll(5), Duration::from_millis(500));
    }

    #[test]
    fn test_retry_delays() {
        let retry = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(retry.delay_for_attempt(4), Duration::from_secs(10)); // capped at max
    }

    #[test]
    fn test_parse_poll_function() {
        assert_eq!("constant".parse(), Ok(PollFunction::Constant));
        assert_eq!("exponential".parse(), Ok(PollFunction::Exponential));
        assert!("linear".parse::<PollFunction>().is_err());
    }
}
