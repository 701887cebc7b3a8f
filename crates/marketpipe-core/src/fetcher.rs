//! Upstream price acquisition under the backoff policy.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::clock::{Clock, SystemClock};
use crate::config::PipelineConfig;
use crate::context::RequestContext;
use crate::http_client::{HttpClient, HttpRequest, ReqwestHttpClient, DEFAULT_TIMEOUT};
use crate::observer::{PipelineEvent, Stage};
use crate::retry::{AttemptOutcome, AttemptStatus, BackoffPolicy, FetchFailure, RetryAttempt};
use crate::throttling::UpstreamQuota;
use crate::{PipelineError, PricePoint, Symbol};

pub const DEFAULT_BASE_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_VS_CURRENCY: &str = "usd";

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<PricePoint, PipelineError>> + Send + 'a>>;

/// Produces one validated price point per call.
pub trait PriceFetcher: Send + Sync {
    fn fetch<'a>(&'a self, symbol: Symbol, ctx: &'a RequestContext) -> FetchFuture<'a>;
}

/// Fetcher for the CoinGecko `simple/price` endpoint.
pub struct CoinGeckoFetcher {
    http_client: Arc<dyn HttpClient>,
    clock: Arc<dyn Clock>,
    policy: BackoffPolicy,
    request_timeout: Duration,
    base_url: String,
    vs_currency: String,
    quota: Option<UpstreamQuota>,
}

impl std::fmt::Debug for CoinGeckoFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinGeckoFetcher")
            .field("base_url", &self.base_url)
            .field("vs_currency", &self.vs_currency)
            .field("policy", &self.policy)
            .field("request_timeout", &self.request_timeout)
            .field("quota", &self.quota)
            .finish_non_exhaustive()
    }
}

impl Default for CoinGeckoFetcher {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::default()), Arc::new(SystemClock))
    }
}

impl CoinGeckoFetcher {
    pub fn new(http_client: Arc<dyn HttpClient>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http_client,
            clock,
            policy: BackoffPolicy::default(),
            request_timeout: DEFAULT_TIMEOUT,
            base_url: String::from(DEFAULT_BASE_URL),
            vs_currency: String::from(DEFAULT_VS_CURRENCY),
            quota: None,
        }
    }

    /// Build a fetcher from validated pipeline configuration.
    pub fn from_config(
        config: &PipelineConfig,
        http_client: Arc<dyn HttpClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let fetcher = Self::new(http_client, clock)
            .with_policy(config.backoff.clone())
            .with_request_timeout(config.request_timeout)
            .with_base_url(config.provider_base_url.clone());

        match config.upstream_quota {
            Some(quota) => fetcher.with_quota(UpstreamQuota::new(quota.limit, quota.window)),
            None => fetcher,
        }
    }

    pub fn with_policy(mut self, policy: BackoffPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_vs_currency(mut self, vs_currency: impl Into<String>) -> Self {
        self.vs_currency = vs_currency.into();
        self
    }

    pub fn with_quota(mut self, quota: UpstreamQuota) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn policy(&self) -> &BackoffPolicy {
        &self.policy
    }

    async fn fetch_with_retry(
        &self,
        symbol: Symbol,
        ctx: &RequestContext,
    ) -> Result<PricePoint, PipelineError> {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 0_u32;

        loop {
            if ctx.is_cancelled() {
                return Err(cancelled(symbol, Stage::Fetch, ctx));
            }

            let started = tokio::time::Instant::now();
            let outcome = tokio::select! {
                biased;
                () = ctx.cancelled() => return Err(cancelled(symbol, Stage::Fetch, ctx)),
                result = self.attempt_once(symbol, ctx) => self.policy.classify(result),
            };
            let elapsed = started.elapsed();

            let report = |status: AttemptStatus, computed_delay: Option<Duration>| {
                ctx.emit(PipelineEvent::FetchAttempt(RetryAttempt {
                    symbol,
                    attempt_number: attempt,
                    computed_delay,
                    elapsed,
                    status,
                }));
            };

            match outcome {
                AttemptOutcome::Success(point) => {
                    report(AttemptStatus::Succeeded, None);
                    return Ok(point);
                }
                AttemptOutcome::Terminal(failure) => {
                    report(AttemptStatus::Terminal(failure.clone()), None);
                    return Err(terminal_error(failure, attempt + 1));
                }
                AttemptOutcome::Retryable(failure) if attempt + 1 >= max_attempts => {
                    report(AttemptStatus::Exhausted(failure.clone()), None);
                    return Err(PipelineError::UpstreamUnavailable {
                        attempts: attempt + 1,
                        last_failure: failure,
                    });
                }
                AttemptOutcome::Retryable(failure) => {
                    let delay = self.policy.next_delay(attempt);
                    report(AttemptStatus::WillRetry(failure), Some(delay));

                    tokio::select! {
                        biased;
                        () = ctx.cancelled() => return Err(cancelled(symbol, Stage::Backoff, ctx)),
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }

            attempt += 1;
        }
    }

    async fn attempt_once(
        &self,
        symbol: Symbol,
        ctx: &RequestContext,
    ) -> Result<PricePoint, FetchFailure> {
        if let Some(quota) = &self.quota {
            if !quota.try_acquire() {
                return Err(FetchFailure::QuotaExhausted);
            }
        }

        let identifier = symbol.provider_id();
        let request = HttpRequest::get(format!(
            "{}/simple/price",
            self.base_url.trim_end_matches('/')
        ))
        .with_query("ids", identifier)
        .with_query("vs_currencies", self.vs_currency.as_str())
        .with_header("accept", "application/json")
        .with_header("x-trace-id", ctx.trace_id().as_str())
        .with_timeout(self.request_timeout);

        let response = self.http_client.execute(request).await?;
        if !response.is_success() {
            return Err(FetchFailure::Status {
                status: response.status,
            });
        }

        let price = parse_simple_price(&response.body, identifier, &self.vs_currency)?;
        let acquired_at = self.clock.now();
        PricePoint::new(symbol, price, acquired_at, acquired_at)
            .map_err(|error| FetchFailure::Malformed(error.to_string()))
    }
}

impl PriceFetcher for CoinGeckoFetcher {
    fn fetch<'a>(&'a self, symbol: Symbol, ctx: &'a RequestContext) -> FetchFuture<'a> {
        Box::pin(self.fetch_with_retry(symbol, ctx))
    }
}

/// Extract `body[identifier][currency]` as a number.
pub fn parse_simple_price(
    body: &str,
    identifier: &str,
    currency: &str,
) -> Result<f64, FetchFailure> {
    let payload: Value = serde_json::from_str(body)
        .map_err(|error| FetchFailure::Malformed(format!("invalid JSON: {error}")))?;

    let entry = payload
        .get(identifier)
        .ok_or_else(|| FetchFailure::NotFound {
            identifier: identifier.to_owned(),
        })?;

    entry
        .get(currency)
        .and_then(Value::as_f64)
        .ok_or_else(|| {
            FetchFailure::Malformed(format!("'{identifier}.{currency}' is missing or not a number"))
        })
}

fn cancelled(symbol: Symbol, stage: Stage, ctx: &RequestContext) -> PipelineError {
    ctx.emit(PipelineEvent::Cancelled { symbol, stage });
    PipelineError::Cancelled
}

fn terminal_error(failure: FetchFailure, attempts: u32) -> PipelineError {
    match failure {
        FetchFailure::Status { status } => PipelineError::UpstreamRejected { status },
        FetchFailure::Malformed(_) | FetchFailure::NotFound { .. } => {
            PipelineError::MalformedResponse(failure.to_string())
        }
        FetchFailure::Timeout(_)
        | FetchFailure::Connect(_)
        | FetchFailure::Transport(_)
        | FetchFailure::QuotaExhausted => PipelineError::UpstreamUnavailable {
            attempts,
            last_failure: failure,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::http_client::{HttpError, HttpResponse, ScriptedHttpClient};
    use crate::observer::RecordingObserver;
    use crate::UtcDateTime;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            UtcDateTime::parse("2024-03-01T12:00:00Z").expect("timestamp"),
        ))
    }

    fn fetcher(client: Arc<ScriptedHttpClient>) -> CoinGeckoFetcher {
        CoinGeckoFetcher::new(client, clock()).with_base_url("https://prices.test/api/v3/")
    }

    fn recording_context() -> (RequestContext, Arc<RecordingObserver>) {
        let observer = Arc::new(RecordingObserver::default());
        (RequestContext::new().with_observer(observer.clone()), observer)
    }

    #[tokio::test(start_paused = true)]
    async fn returns_validated_point_on_success() {
        let client = Arc::new(ScriptedHttpClient::new([Ok(HttpResponse::ok_json(
            r#"{"bitcoin":{"usd":67012.5}}"#,
        ))]));
        let (ctx, observer) = recording_context();

        let point = fetcher(client.clone())
            .fetch(Symbol::Btc, &ctx)
            .await
            .expect("fetch succeeds");

        assert_eq!(point.symbol(), Symbol::Btc);
        assert_eq!(point.price(), 67012.5);
        assert_eq!(
            point.timestamp(),
            UtcDateTime::parse("2024-03-01T12:00:00Z").expect("timestamp")
        );

        let requests = client.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].full_url(),
            "https://prices.test/api/v3/simple/price?ids=bitcoin&vs_currencies=usd"
        );
        assert_eq!(requests[0].timeout, Duration::from_secs(5));
        assert_eq!(
            requests[0].headers.get("x-trace-id").map(String::as_str),
            Some(ctx.trace_id().as_str())
        );
        assert_eq!(observer.attempts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_retries_after_max_attempts() {
        let client = Arc::new(ScriptedHttpClient::repeating(
            HttpResponse::with_status(503, "busy"),
            10,
        ));
        let (ctx, observer) = recording_context();

        let error = fetcher(client.clone())
            .fetch(Symbol::Eth, &ctx)
            .await
            .expect_err("retries exhausted");

        assert_eq!(
            error,
            PipelineError::UpstreamUnavailable {
                attempts: 4,
                last_failure: FetchFailure::Status { status: 503 },
            }
        );
        assert_eq!(client.calls(), 4);

        let attempts = observer.attempts();
        assert_eq!(
            attempts.iter().map(|a| a.attempt_number).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert!(attempts[..3].iter().all(|a| a.computed_delay.is_some()));
        assert!(matches!(attempts[3].status, AttemptStatus::Exhausted(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let client = Arc::new(ScriptedHttpClient::new([
            Err(HttpError::timeout("deadline elapsed")),
            Ok(HttpResponse::with_status(429, "slow down")),
            Ok(HttpResponse::ok_json(r#"{"solana":{"usd":142}}"#)),
        ]));
        let (ctx, _) = recording_context();

        let point = fetcher(client.clone())
            .fetch(Symbol::Sol, &ctx)
            .await
            .expect("third attempt succeeds");

        assert_eq!(point.price(), 142.0);
        assert_eq!(client.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_status_makes_a_single_call() {
        let client = Arc::new(ScriptedHttpClient::repeating(
            HttpResponse::with_status(404, "not found"),
            5,
        ));
        let (ctx, _) = recording_context();

        let error = fetcher(client.clone())
            .fetch(Symbol::Ada, &ctx)
            .await
            .expect_err("404 is terminal");

        assert_eq!(error, PipelineError::UpstreamRejected { status: 404 });
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_payload_is_malformed() {
        let client = Arc::new(ScriptedHttpClient::repeating(HttpResponse::ok_json("{}"), 5));
        let (ctx, _) = recording_context();

        let error = fetcher(client.clone())
            .fetch(Symbol::Dot, &ctx)
            .await
            .expect_err("missing identifier");

        assert!(matches!(error, PipelineError::MalformedResponse(_)));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_positive_price_is_malformed() {
        let client = Arc::new(ScriptedHttpClient::new([Ok(HttpResponse::ok_json(
            r#"{"bitcoin":{"usd":0}}"#,
        ))]));
        let (ctx, _) = recording_context();

        let error = fetcher(client)
            .fetch(Symbol::Btc, &ctx)
            .await
            .expect_err("zero price");

        assert!(matches!(error, PipelineError::MalformedResponse(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_backoff_stops_retrying() {
        let client = Arc::new(ScriptedHttpClient::repeating(
            HttpResponse::with_status(502, "bad gateway"),
            10,
        ));
        let (ctx, observer) = recording_context();
        let token = ctx.cancellation_token().clone();
        let fetcher =
            fetcher(client.clone()).with_policy(BackoffPolicy::default().without_jitter());

        let canceller = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        });

        let error = fetcher
            .fetch(Symbol::Btc, &ctx)
            .await
            .expect_err("cancelled while sleeping");
        canceller.await.expect("canceller task");

        assert_eq!(error, PipelineError::Cancelled);
        assert_eq!(client.calls(), 1);
        assert!(observer.events().iter().any(|event| matches!(
            event,
            PipelineEvent::Cancelled {
                stage: Stage::Backoff,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_context_makes_no_call() {
        let client = Arc::new(ScriptedHttpClient::default());
        let (ctx, _) = recording_context();
        ctx.cancellation_token().cancel();

        let error = fetcher(client.clone())
            .fetch(Symbol::Btc, &ctx)
            .await
            .expect_err("cancelled");

        assert_eq!(error, PipelineError::Cancelled);
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_quota_is_retried_without_network_calls() {
        let client = Arc::new(ScriptedHttpClient::repeating(
            HttpResponse::ok_json(r#"{"ethereum":{"usd":3100.25}}"#),
            5,
        ));
        let (ctx, observer) = recording_context();
        let fetcher = fetcher(client.clone())
            .with_quota(UpstreamQuota::new(1, Duration::from_secs(3_600)))
            .with_policy(BackoffPolicy::default().with_max_retries(2));

        fetcher.fetch(Symbol::Eth, &ctx).await.expect("first call has budget");
        let error = fetcher
            .fetch(Symbol::Eth, &ctx)
            .await
            .expect_err("quota exhausted");

        assert_eq!(
            error,
            PipelineError::UpstreamUnavailable {
                attempts: 3,
                last_failure: FetchFailure::QuotaExhausted,
            }
        );
        assert_eq!(client.calls(), 1);
        assert_eq!(observer.attempts().len(), 4);
    }

    #[test]
    fn parse_simple_price_reports_precise_failures() {
        assert_eq!(
            parse_simple_price(r#"{"cardano":{"usd":0.45}}"#, "cardano", "usd"),
            Ok(0.45)
        );
        assert_eq!(
            parse_simple_price("{}", "cardano", "usd"),
            Err(FetchFailure::NotFound {
                identifier: String::from("cardano"),
            })
        );
        assert!(matches!(
            parse_simple_price(r#"{"cardano":{"usd":"0.45"}}"#, "cardano", "usd"),
            Err(FetchFailure::Malformed(_))
        ));
        assert!(matches!(
            parse_simple_price("<html>", "cardano", "usd"),
            Err(FetchFailure::Malformed(_))
        ));
    }
}
