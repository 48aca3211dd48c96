//! gRPC Currency Server Implementation
//!
//! Implements the `CurrencyService` gRPC service: unary rate lookups and
//! the bidirectional rate subscription stream.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request, Response, Status, Streaming};
use tonic_types::{ErrorDetails, StatusExt};

use super::proto::{Currency, RateRequest, RateResponse, currency_service_server::CurrencyService};
use crate::domain::currency::{CurrencyCode, RatePair};
use crate::domain::rates::{RateChangeSignal, RateSnapshot, RateTable};
use crate::domain::subscription::{ConnectionId, RegistryStats, SubscriptionRegistry};
use crate::infrastructure::broadcast::recv_latest;
use crate::infrastructure::metrics::{self, DropReason, LookupOutcome};

// =============================================================================
// Type Aliases
// =============================================================================

type RpcResult<T> = Result<Response<T>, Status>;
type BoxedStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send>>;

/// Sending half of one connection's outbound stream.
pub type Outbound = mpsc::Sender<Result<RateResponse, Status>>;

/// Registry keyed by connection, holding each connection's outbound stream.
pub type SharedRegistry = Arc<SubscriptionRegistry<Outbound>>;

/// `ErrorInfo` reason attached to same-currency lookups.
pub const SAME_CURRENCY_REASON: &str = "SAME_CURRENCY";

/// `ErrorInfo` domain for errors raised by this service.
pub const ERROR_DOMAIN: &str = "currency.v1";

// =============================================================================
// Server Configuration
// =============================================================================

/// Configuration for the gRPC currency server.
#[derive(Debug, Clone)]
pub struct CurrencyServerConfig {
    /// Service version string.
    pub version: String,
    /// Updates buffered per streaming connection.
    pub subscriber_buffer: usize,
}

impl Default for CurrencyServerConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            subscriber_buffer: 64,
        }
    }
}

// =============================================================================
// Broadcast Outcome
// =============================================================================

/// Tally of one fan-out pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Updates queued to a connection.
    pub sent: u64,
    /// Updates dropped because a connection's buffer was full.
    pub buffer_full: u64,
    /// Updates skipped because a connection's stream was closed.
    pub closed: u64,
    /// Pairs whose rate could not be computed.
    pub rate_unavailable: u64,
}

impl BroadcastOutcome {
    fn record(&self, elapsed: Duration) {
        metrics::record_pushes_sent(self.sent);
        for (reason, count) in [
            (DropReason::BufferFull, self.buffer_full),
            (DropReason::Closed, self.closed),
            (DropReason::RateUnavailable, self.rate_unavailable),
        ] {
            if count > 0 {
                metrics::record_pushes_dropped(reason, count);
            }
        }
        metrics::record_broadcast_duration(elapsed);
    }
}

// =============================================================================
// Server Implementation
// =============================================================================

/// gRPC server for exchange rates.
pub struct CurrencyServer {
    config: CurrencyServerConfig,
    table: Arc<RateTable>,
    registry: SharedRegistry,
    cancel: CancellationToken,
    started_at: Instant,
}

impl CurrencyServer {
    /// Create a new currency server.
    ///
    /// Cancelling `cancel` ends every open subscription read-loop and the
    /// update loop.
    #[must_use]
    pub fn new(
        config: CurrencyServerConfig,
        table: Arc<RateTable>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            table,
            registry: Arc::new(SubscriptionRegistry::new()),
            cancel,
            started_at: Instant::now(),
        }
    }

    /// Get the rate table served by this server.
    #[must_use]
    pub const fn table(&self) -> &Arc<RateTable> {
        &self.table
    }

    /// Get the server version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.config.version
    }

    /// Time since the server was created.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Check whether shutdown has begun.
    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Get subscription statistics.
    #[must_use]
    pub fn subscription_stats(&self) -> RegistryStats {
        self.registry.stats()
    }

    /// Push the rate of every registered pair, computed from `snapshot`.
    ///
    /// Sends never wait: a full buffer drops the update, and a closed
    /// stream is skipped until its read-loop removes the entry.
    pub fn broadcast(&self, snapshot: &RateSnapshot) -> BroadcastOutcome {
        let started = Instant::now();
        let mut outcome = BroadcastOutcome::default();

        self.registry.for_each(|connection, outbound, pairs| {
            for pair in pairs {
                let rate = match snapshot.rate(pair.base, pair.destination) {
                    Ok(rate) => rate,
                    Err(e) => {
                        tracing::warn!(
                            connection,
                            pair = %pair,
                            error = %e,
                            "Skipping pair without rate"
                        );
                        outcome.rate_unavailable += 1;
                        continue;
                    }
                };

                match outbound.try_send(Ok(rate_response(*pair, rate))) {
                    Ok(()) => outcome.sent += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(
                            connection,
                            pair = %pair,
                            "Subscriber buffer full, dropping update"
                        );
                        outcome.buffer_full += 1;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!(connection, "Subscriber stream closed, skipping");
                        outcome.closed += 1;
                        break;
                    }
                }
            }
        });

        outcome.record(started.elapsed());
        tracing::debug!(
            sequence = snapshot.sequence(),
            sent = outcome.sent,
            dropped = outcome.buffer_full + outcome.closed + outcome.rate_unavailable,
            "Rate change broadcast"
        );
        outcome
    }

    /// Fan out every rate change signal until cancelled or the hub closes.
    pub fn spawn_update_loop(
        self: &Arc<Self>,
        mut rx: broadcast::Receiver<RateChangeSignal>,
    ) -> JoinHandle<()> {
        let server = Arc::clone(self);

        tokio::spawn(async move {
            tracing::info!("Rate update loop started");
            loop {
                let signal = tokio::select! {
                    biased;

                    () = server.cancel.cancelled() => break,
                    signal = recv_latest(&mut rx) => signal,
                };

                let Some(signal) = signal else {
                    tracing::warn!("Rate change hub closed");
                    break;
                };
                server.broadcast(&signal.snapshot);
            }
            tracing::info!("Rate update loop stopped");
        })
    }

    fn publish_subscription_gauges(registry: &SubscriptionRegistry<Outbound>) {
        let stats = registry.stats();
        metrics::set_subscriptions(stats.connection_count, stats.pair_count);
    }
}

#[tonic::async_trait]
impl CurrencyService for CurrencyServer {
    type SubscribeRatesStream = BoxedStream<RateResponse>;

    async fn get_rate(&self, request: Request<RateRequest>) -> RpcResult<RateResponse> {
        let req = request.into_inner();

        if req.base == req.destination {
            metrics::record_lookup(LookupOutcome::SameCurrency);
            return Err(same_currency_status(&req));
        }

        let lookup = pair_from_request(&req).and_then(|pair| {
            self.table
                .rate(pair.base, pair.destination)
                .map(|rate| (pair, rate))
                .map_err(|e| Status::not_found(e.to_string()))
        });

        match lookup {
            Ok((pair, rate)) => {
                metrics::record_lookup(LookupOutcome::Ok);
                tracing::debug!(pair = %pair, rate, "Rate lookup");
                Ok(Response::new(rate_response(pair, rate)))
            }
            Err(status) => {
                metrics::record_lookup(LookupOutcome::NotFound);
                Err(status)
            }
        }
    }

    async fn subscribe_rates(
        &self,
        request: Request<Streaming<RateRequest>>,
    ) -> RpcResult<Self::SubscribeRatesStream> {
        let inbound = request.into_inner();
        let connection: ConnectionId = uuid::Uuid::new_v4().as_u64_pair().0;
        let (tx, rx) = mpsc::channel(self.config.subscriber_buffer);

        tokio::spawn(read_registrations(
            connection,
            inbound,
            tx,
            Arc::clone(&self.registry),
            self.cancel.clone(),
        ));

        let stream = ReceiverStream::new(rx);
        Ok(Response::new(Box::pin(stream) as Self::SubscribeRatesStream))
    }
}

/// Read-loop for one subscription stream.
///
/// Ends on client end-of-stream, a read error, or shutdown, and always
/// removes the connection from the registry on the way out.
async fn read_registrations(
    connection: ConnectionId,
    mut inbound: Streaming<RateRequest>,
    outbound: Outbound,
    registry: SharedRegistry,
    cancel: CancellationToken,
) {
    tracing::info!(connection, "Rate subscription opened");

    loop {
        let message = tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::debug!(connection, "Shutdown, closing subscription");
                break;
            }
            message = inbound.message() => message,
        };

        match message {
            Ok(Some(req)) => match pair_from_request(&req) {
                Ok(pair) => {
                    let registered = registry.register(connection, &outbound, pair);
                    CurrencyServer::publish_subscription_gauges(&registry);
                    tracing::debug!(
                        connection,
                        pair = %pair,
                        self_pair = pair.is_self_pair(),
                        registered,
                        "Pair registered"
                    );
                }
                Err(status) => {
                    tracing::warn!(
                        connection,
                        base = req.base,
                        destination = req.destination,
                        error = status.message(),
                        "Ignoring registration for unknown currency"
                    );
                }
            },
            Ok(None) => {
                tracing::debug!(connection, "Client closed subscription stream");
                break;
            }
            Err(status) => {
                tracing::warn!(connection, error = %status, "Subscription stream read failed");
                break;
            }
        }
    }

    let pairs = registry.remove(connection).unwrap_or(0);
    CurrencyServer::publish_subscription_gauges(&registry);
    tracing::info!(connection, pairs, "Rate subscription closed");
}

// =============================================================================
// Conversion Functions
// =============================================================================

impl From<CurrencyCode> for Currency {
    fn from(code: CurrencyCode) -> Self {
        match code {
            CurrencyCode::Eur => Self::Eur,
            CurrencyCode::Usd => Self::Usd,
            CurrencyCode::Jpy => Self::Jpy,
            CurrencyCode::Bgn => Self::Bgn,
            CurrencyCode::Czk => Self::Czk,
            CurrencyCode::Dkk => Self::Dkk,
            CurrencyCode::Gbp => Self::Gbp,
            CurrencyCode::Huf => Self::Huf,
            CurrencyCode::Pln => Self::Pln,
            CurrencyCode::Ron => Self::Ron,
            CurrencyCode::Sek => Self::Sek,
            CurrencyCode::Chf => Self::Chf,
            CurrencyCode::Isk => Self::Isk,
            CurrencyCode::Nok => Self::Nok,
            CurrencyCode::Hrk => Self::Hrk,
            CurrencyCode::Rub => Self::Rub,
            CurrencyCode::Try => Self::Try,
            CurrencyCode::Aud => Self::Aud,
            CurrencyCode::Brl => Self::Brl,
            CurrencyCode::Cad => Self::Cad,
            CurrencyCode::Cny => Self::Cny,
            CurrencyCode::Hkd => Self::Hkd,
            CurrencyCode::Idr => Self::Idr,
            CurrencyCode::Ils => Self::Ils,
            CurrencyCode::Inr => Self::Inr,
            CurrencyCode::Krw => Self::Krw,
            CurrencyCode::Mxn => Self::Mxn,
            CurrencyCode::Myr => Self::Myr,
            CurrencyCode::Nzd => Self::Nzd,
            CurrencyCode::Php => Self::Php,
            CurrencyCode::Sgd => Self::Sgd,
            CurrencyCode::Thb => Self::Thb,
            CurrencyCode::Zar => Self::Zar,
        }
    }
}

impl TryFrom<Currency> for CurrencyCode {
    type Error = Status;

    fn try_from(currency: Currency) -> Result<Self, Self::Error> {
        Ok(match currency {
            Currency::Unspecified => return Err(Status::not_found("currency not specified")),
            Currency::Eur => Self::Eur,
            Currency::Usd => Self::Usd,
            Currency::Jpy => Self::Jpy,
            Currency::Bgn => Self::Bgn,
            Currency::Czk => Self::Czk,
            Currency::Dkk => Self::Dkk,
            Currency::Gbp => Self::Gbp,
            Currency::Huf => Self::Huf,
            Currency::Pln => Self::Pln,
            Currency::Ron => Self::Ron,
            Currency::Sek => Self::Sek,
            Currency::Chf => Self::Chf,
            Currency::Isk => Self::Isk,
            Currency::Nok => Self::Nok,
            Currency::Hrk => Self::Hrk,
            Currency::Rub => Self::Rub,
            Currency::Try => Self::Try,
            Currency::Aud => Self::Aud,
            Currency::Brl => Self::Brl,
            Currency::Cad => Self::Cad,
            Currency::Cny => Self::Cny,
            Currency::Hkd => Self::Hkd,
            Currency::Idr => Self::Idr,
            Currency::Ils => Self::Ils,
            Currency::Inr => Self::Inr,
            Currency::Krw => Self::Krw,
            Currency::Mxn => Self::Mxn,
            Currency::Myr => Self::Myr,
            Currency::Nzd => Self::Nzd,
            Currency::Php => Self::Php,
            Currency::Sgd => Self::Sgd,
            Currency::Thb => Self::Thb,
            Currency::Zar => Self::Zar,
        })
    }
}

fn currency_from_wire(value: i32) -> Result<CurrencyCode, Status> {
    Currency::try_from(value)
        .map_err(|_| Status::not_found(format!("unknown currency value {value}")))
        .and_then(CurrencyCode::try_from)
}

fn pair_from_request(req: &RateRequest) -> Result<RatePair, Status> {
    Ok(RatePair::new(
        currency_from_wire(req.base)?,
        currency_from_wire(req.destination)?,
    ))
}

fn rate_response(pair: RatePair, rate: f64) -> RateResponse {
    RateResponse {
        base: Currency::from(pair.base).into(),
        destination: Currency::from(pair.destination).into(),
        rate,
    }
}

fn wire_name(value: i32) -> String {
    Currency::try_from(value).map_or_else(|_| value.to_string(), |c| c.as_str_name().to_string())
}

fn same_currency_status(req: &RateRequest) -> Status {
    let base = wire_name(req.base);
    let destination = wire_name(req.destination);

    let mut details = ErrorDetails::new();
    details.add_bad_request_violation(
        "destination",
        format!("destination {destination} must differ from base {base}"),
    );
    details.set_error_info(
        SAME_CURRENCY_REASON,
        ERROR_DOMAIN,
        HashMap::from([
            ("base".to_string(), base.clone()),
            ("destination".to_string(), destination),
        ]),
    );

    Status::with_error_details(
        Code::InvalidArgument,
        format!("base currency {base} cannot be the same as the destination currency"),
        details,
    )
}

// =============================================================================
// Tests
// =============================================================================
