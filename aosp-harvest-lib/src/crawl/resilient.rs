//! Retry and timeout middleware around every outbound request.
//!
//! Requests run inside a [`seatbelt`] stack: a retry layer on the outside and
//! a per-attempt timeout inside it. "Too many requests" answers back off under
//! the configured [`RetryPolicy`]. Transport failures, timeouts and server
//! errors get a few extra attempts with exponential backoff and then surface
//! as errors.

use super::fetch_outcome::{FetchOutcome, parse_retry_after};
use super::location::DocumentLocation;
use super::request_tracker::{RequestTracker, TopicStatus, TrackedTopic};
use super::retry::{MAX_DELAY, RetryPolicy};
use super::source::SourceClient;
use super::throttler::Throttler;
use crate::Result;
use core::time::Duration;
use layered::{Execute, Service, Stack};
use ohno::{app_err, bail};
use reqwest::StatusCode;
use seatbelt::retry::{Backoff, CloneArgs, Retry};
use seatbelt::timeout::Timeout;
use seatbelt::{RecoveryInfo, ResilienceContext};
use std::sync::Arc;
use tick::Clock;

const LOG_TARGET: &str = " resilient";

/// Per-attempt timeout for page-sized requests.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Per-attempt timeout for archive downloads.
pub const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_mins(30);

/// Extra attempts granted to transport failures and server errors.
pub const TRANSPORT_RETRY_ATTEMPTS: u32 = 3;

/// First backoff step for transport failures when the cooldown is longer.
const TRANSPORT_BASE_DELAY: Duration = Duration::from_secs(1);

/// How one attempt ended, as far as retrying is concerned.
#[derive(Debug, Clone, Copy)]
enum Verdict {
    Settled,
    Transient,
    RateLimited(Option<Duration>),
}

fn recovery(policy: &RetryPolicy, attempt: u32, verdict: Verdict) -> RecoveryInfo {
    match verdict {
        Verdict::Settled => RecoveryInfo::never(),
        Verdict::Transient if attempt < TRANSPORT_RETRY_ATTEMPTS => RecoveryInfo::retry(),
        Verdict::Transient => RecoveryInfo::never(),
        Verdict::RateLimited(retry_after) => policy
            .delay_for(attempt, retry_after)
            .map_or_else(RecoveryInfo::never, |delay| RecoveryInfo::retry().delay(delay)),
    }
}

/// Outer bound for the retry layer; [`recovery`] enforces the per-kind limits.
const fn retry_budget(policy: &RetryPolicy) -> u32 {
    if !policy.is_bounded() {
        return u32::MAX;
    }
    if policy.max_attempts() > TRANSPORT_RETRY_ATTEMPTS {
        policy.max_attempts()
    } else {
        TRANSPORT_RETRY_ATTEMPTS
    }
}

fn transport_base_delay(policy: &RetryPolicy) -> Duration {
    policy.cooldown().min(TRANSPORT_BASE_DELAY)
}

fn response_verdict(result: &Result<reqwest::Response>) -> Verdict {
    match result {
        Err(_) => Verdict::Transient,
        Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
            Verdict::RateLimited(parse_retry_after(response.headers()))
        }
        Ok(response) if response.status().is_server_error() => Verdict::Transient,
        Ok(_) => Verdict::Settled,
    }
}

/// Send a GET request with retry and a per-attempt timeout.
///
/// The final response is returned whatever its status; callers decide what a
/// non-success answer means.
pub async fn resilient_get(client: &reqwest::Client, url: &str, policy: RetryPolicy, timeout: Duration) -> Result<reqwest::Response> {
    let clock = Clock::new_tokio();
    let context = ResilienceContext::new(&clock).name("http_get");

    let client = client.clone();
    let service = (
        Retry::layer("retry", &context)
            .clone_input()
            .recovery_with(move |result: &Result<reqwest::Response>, args| recovery(&policy, args.attempt().index(), response_verdict(result)))
            .max_retry_attempts(retry_budget(&policy))
            .base_delay(transport_base_delay(&policy))
            .backoff(Backoff::Exponential)
            .max_delay(MAX_DELAY)
            .on_retry(|_output, args| {
                log::debug!(
                    target: LOG_TARGET,
                    "Retrying GET (attempt {}, delay {}ms)",
                    args.attempt().index() + 1,
                    args.retry_delay().as_millis()
                );
            }),
        Timeout::layer("timeout", &context)
            .timeout_error(|_| app_err!("HTTP request timed out"))
            .timeout(timeout),
        Execute::new(move |url: String| {
            let client = client.clone();
            async move { client.get(&url).send().await.map_err(ohno::AppError::from) }
        }),
    )
        .into_service();

    service.execute(url.to_owned()).await
}

/// Run a whole download with retry and a per-attempt timeout.
///
/// A failure anywhere in the transfer, including mid-stream, restarts it from
/// scratch. `download_fn` receives a clone of `input` on every attempt and is
/// responsible for leaving nothing behind when it fails.
pub async fn resilient_download<In, Out, Fut, F>(
    name: &'static str,
    input: In,
    policy: RetryPolicy,
    timeout: Duration,
    download_fn: F,
) -> Result<Out>
where
    In: Clone + Send + Sync + 'static,
    Out: Send + 'static,
    Fut: Future<Output = Result<Out>> + Send,
    F: Fn(In) -> Fut + Send + Sync + Clone + 'static,
{
    let clock = Clock::new_tokio();
    let context = ResilienceContext::new(&clock).name(name);

    let service = (
        Retry::layer("retry", &context)
            .clone_input()
            .recovery_with(move |result: &Result<Out>, args| {
                let verdict = if result.is_err() { Verdict::Transient } else { Verdict::Settled };
                recovery(&policy, args.attempt().index(), verdict)
            })
            .max_retry_attempts(TRANSPORT_RETRY_ATTEMPTS)
            .base_delay(transport_base_delay(&policy))
            .backoff(Backoff::Exponential)
            .max_delay(MAX_DELAY)
            .on_retry(move |output, args| {
                if let Err(e) = output {
                    log::warn!(
                        target: LOG_TARGET,
                        "Retrying {name} in {}ms after: {e}",
                        args.retry_delay().as_millis()
                    );
                }
            }),
        Timeout::layer("timeout", &context)
            .timeout_error(|_| app_err!("download timed out"))
            .timeout(timeout),
        Execute::new(move |input: In| {
            let f = download_fn.clone();
            async move { f(input).await }
        }),
    )
        .into_service();

    service.execute(input).await
}

/// Gitiles requests behind the shared [`Throttler`], each attempt timed out on its own.
///
/// A concurrency permit is taken per attempt, so a task waiting out a backoff
/// does not hold a slot. A rate-limited answer pauses the throttler for the
/// backoff delay, which holds back every other task too.
#[derive(Debug, Clone)]
pub struct ResilientFetcher {
    source: SourceClient,
    throttler: Arc<Throttler>,
    policy: RetryPolicy,
    request_timeout: Duration,
}

impl ResilientFetcher {
    #[must_use]
    pub const fn new(source: SourceClient, throttler: Arc<Throttler>, policy: RetryPolicy) -> Self {
        Self {
            source,
            throttler,
            policy,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    #[must_use]
    pub const fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch one file. `None` when it does not exist at `reference`.
    pub async fn fetch(&self, location: &DocumentLocation, reference: &str, tracker: &RequestTracker) -> Result<Option<String>> {
        let source = self.source.clone();
        let target = location.clone();
        let at = reference.to_owned();
        let request = move || {
            let source = source.clone();
            let target = target.clone();
            let at = at.clone();
            async move { source.fetch_raw(&target, &at).await }
        };

        match self.execute(format!("{location} at {reference}"), TrackedTopic::Documents, tracker, request).await? {
            FetchOutcome::Found(text) => Ok(Some(text)),
            FetchOutcome::Absent => {
                log::debug!(target: LOG_TARGET, "{location} does not exist at {reference}");
                Ok(None)
            }
            FetchOutcome::Retryable { .. } => {
                bail!("still rate limited after {} attempts to fetch {location}", self.policy.max_attempts())
            }
            FetchOutcome::Fatal(status) => bail!("fetching {location} at {reference} failed with status {status}"),
        }
    }

    /// Whether `repository` has `reference`. Only a 404 counts as missing.
    pub async fn repository_exists(&self, repository: &str, reference: &str, tracker: &RequestTracker) -> Result<bool> {
        let source = self.source.clone();
        let name = repository.to_owned();
        let at = reference.to_owned();
        let request = move || {
            let source = source.clone();
            let name = name.clone();
            let at = at.clone();
            async move { source.exists(&name, &at).await }
        };

        match self.execute(format!("{repository} at {reference}"), TrackedTopic::Repos, tracker, request).await? {
            FetchOutcome::Absent => Ok(false),
            FetchOutcome::Retryable { .. } => {
                bail!("still rate limited after {} attempts to check {repository}", self.policy.max_attempts())
            }
            FetchOutcome::Found(()) | FetchOutcome::Fatal(_) => Ok(true),
        }
    }

    async fn execute<T, F, Fut>(&self, subject: String, topic: TrackedTopic, tracker: &RequestTracker, request: F) -> Result<FetchOutcome<T>>
    where
        T: Send + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<FetchOutcome<T>>> + Send + 'static,
    {
        let clock = Clock::new_tokio();
        let context = ResilienceContext::new(&clock).name("gitiles");
        let attempt_context = ResilienceContext::new(&clock).name("gitiles");
        let policy = self.policy;

        let attempt = Arc::new(
            (
                Timeout::layer("timeout", &attempt_context)
                    .timeout_error(|_| app_err!("request timed out"))
                    .timeout(self.request_timeout),
                Execute::new(move |(): ()| request()),
            )
                .into_service(),
        );

        let throttler = Arc::clone(&self.throttler);
        let paused = Arc::clone(&self.throttler);
        let resumed_tracker = tracker.clone();
        let blocked_tracker = tracker.clone();

        let service = (
            Retry::layer("retry", &context)
                .clone_input_with(|_: &mut bool, args: CloneArgs| Some(!args.attempt().is_first()))
                .recovery_with(move |result: &Result<FetchOutcome<T>>, args| {
                    let verdict = match result {
                        Err(_) => Verdict::Transient,
                        Ok(FetchOutcome::Retryable { retry_after }) => Verdict::RateLimited(*retry_after),
                        Ok(_) => Verdict::Settled,
                    };
                    recovery(&policy, args.attempt().index(), verdict)
                })
                .max_retry_attempts(retry_budget(&policy))
                .base_delay(transport_base_delay(&policy))
                .backoff(Backoff::Exponential)
                .max_delay(MAX_DELAY)
                .on_retry(move |result, args| {
                    let delay = args.retry_delay();
                    match result {
                        Ok(_) => {
                            log::warn!(target: LOG_TARGET, "Rate limited on {subject}; retrying in {:.1}s", delay.as_secs_f64());
                            blocked_tracker.set_topic_status(topic, TopicStatus::Blocked);
                            let _ = paused.pause_for(delay);
                        }
                        Err(e) => {
                            log::warn!(target: LOG_TARGET, "Request for {subject} failed, retrying in {:.1}s: {e}", delay.as_secs_f64());
                        }
                    }
                }),
            Execute::new(move |resumed: bool| {
                let throttler = Arc::clone(&throttler);
                let attempt = Arc::clone(&attempt);
                let tracker = resumed_tracker.clone();
                async move {
                    let _permit = throttler.acquire().await;
                    if resumed {
                        tracker.set_topic_status(topic, TopicStatus::Active);
                    }
                    attempt.execute(()).await
                }
            }),
        )
            .into_service();

        service.execute(false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::progress::{NoProgress, Progress};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PAGE: &str = r#"<table class="FileContents"><tr><td class="FileContents-lineContents" id="1">hello</td></tr></table>"#;

    fn tracker() -> RequestTracker {
        let progress: Arc<dyn Progress> = Arc::new(NoProgress);
        RequestTracker::new(&progress)
    }

    fn fetcher(server: &MockServer, max_attempts: u32) -> ResilientFetcher {
        ResilientFetcher::new(
            SourceClient::new(reqwest::Client::new(), server.uri()),
            Throttler::new(2),
            RetryPolicy::new(Duration::from_millis(5), max_attempts),
        )
    }

    #[test]
    fn transport_failures_get_a_fixed_budget() {
        let policy = RetryPolicy::new(Duration::from_secs(60), 0);
        assert_eq!(recovery(&policy, 0, Verdict::Transient).kind(), RecoveryInfo::retry().kind());
        assert_eq!(recovery(&policy, TRANSPORT_RETRY_ATTEMPTS, Verdict::Transient).kind(), RecoveryInfo::never().kind());
        assert_eq!(recovery(&policy, 1_000, Verdict::RateLimited(None)).get_delay(), Some(Duration::from_secs(60)));
        assert_eq!(retry_budget(&policy), u32::MAX);
        assert_eq!(transport_base_delay(&policy), TRANSPORT_BASE_DELAY);
    }

    #[test]
    fn rate_limit_budget_follows_the_policy() {
        let policy = RetryPolicy::new(Duration::from_millis(10), 5);
        assert_eq!(retry_budget(&policy), 5);
        assert_eq!(recovery(&policy, 2, Verdict::RateLimited(None)).get_delay(), Some(Duration::from_millis(40)));
        assert_eq!(recovery(&policy, 5, Verdict::RateLimited(None)).kind(), RecoveryInfo::never().kind());
        assert_eq!(recovery(&policy, 0, Verdict::Settled).kind(), RecoveryInfo::never().kind());
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_returned() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/index.xml"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/index.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let policy = RetryPolicy::new(Duration::from_millis(1), 2);
        let response = resilient_get(&reqwest::Client::new(), &format!("{}/index.xml", server.uri()), policy, DEFAULT_REQUEST_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn slow_attempts_time_out_and_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repo/+/main/slow.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE).set_delay(Duration::from_secs(5)))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repo/+/main/slow.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let text = fetcher(&server, 2)
            .with_request_timeout(Duration::from_millis(200))
            .fetch(&DocumentLocation::new("repo", "slow.txt"), "main", &tracker())
            .await
            .unwrap();
        assert_eq!(text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn unreachable_host_fails_after_the_transport_budget() {
        let fetcher = ResilientFetcher::new(
            SourceClient::new(reqwest::Client::new(), "http://127.0.0.1:9"),
            Throttler::new(1),
            RetryPolicy::new(Duration::from_millis(1), 0),
        );

        let _ = fetcher
            .fetch(&DocumentLocation::new("repo", "a.txt"), "main", &tracker())
            .await
            .unwrap_err();
    }

    #[tokio::test]
    async fn rate_limits_pause_the_throttler() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repo/+/main/busy.txt"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repo/+/main/busy.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE))
            .mount(&server)
            .await;

        let throttler = Throttler::new(1);
        let fetcher = ResilientFetcher::new(
            SourceClient::new(reqwest::Client::new(), server.uri()),
            Arc::clone(&throttler),
            RetryPolicy::new(Duration::from_millis(300), 2),
        );
        let tracker = tracker();

        let location = DocumentLocation::new("repo", "busy.txt");
        let fetch = fetcher.fetch(&location, "main", &tracker);
        let watch = async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            throttler.is_paused()
        };
        let (text, paused) = tokio::join!(fetch, watch);

        assert_eq!(text.unwrap().as_deref(), Some("hello"));
        assert!(paused);
    }

    #[tokio::test]
    async fn missing_repository_is_reported_without_retry() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/gone/+/main"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path("/private/+/main"))
            .respond_with(ResponseTemplate::new(403))
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = fetcher(&server, 2);
        assert!(!fetcher.repository_exists("gone", "main", &tracker()).await.unwrap());
        assert!(fetcher.repository_exists("private", "main", &tracker()).await.unwrap());
    }
}
