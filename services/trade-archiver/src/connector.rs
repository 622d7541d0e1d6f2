//! Stream connector
//!
//! One connector task per symbol. Each session opens the feed, forwards every
//! valid message to the dispatcher in feed order, and ends on close, I/O
//! error, idle timeout or a message that fails validation. The connector
//! then reconnects, without limit, until cancelled.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::error::Elapsed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use types::asset::SamplingInterval;
use types::ids::SymbolId;

use crate::dispatcher::Dispatcher;
use crate::feed::{wall_clock_millis, AggTradeMessage, FeedEndpoints, FeedError};
use crate::logger::DiagnosticLogger;
use crate::transport::{FeedFrame, FeedStream, FeedTransport, TransportError};

/// Delay schedule between sessions.
///
/// A session that delivered at least one trade, or that the peer ended
/// cleanly (close frame, end of stream, idle timeout), is followed by an
/// immediate reconnect. Each consecutive failed session (connect failure,
/// transport error or schema violation) doubles the delay, starting at
/// `initial_delay` and capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Reconnect straight away, always.
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the next attempt after `failures` consecutive failed
    /// sessions (`0` once a session succeeds).
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Well above the roughly three-minute ping interval of the futures venues.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub endpoints: FeedEndpoints,
    pub sampling_interval: SamplingInterval,
    pub connect_timeout: Duration,
    /// End a session when no frame arrives for this long.
    pub idle_timeout: Option<Duration>,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            endpoints: FeedEndpoints::default(),
            sampling_interval: SamplingInterval::Ms100,
            connect_timeout: Duration::from_secs(10),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Why a session ended.
#[derive(Debug)]
pub enum SessionEnd {
    ConnectFailed(TransportError),
    Closed(Option<String>),
    StreamEnded,
    Transport(TransportError),
    IdleTimeout(Duration),
    SchemaViolation(FeedError),
    Cancelled,
}

impl SessionEnd {
    /// Whether this ending counts toward reconnect backoff.
    fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionEnd::ConnectFailed(_) | SessionEnd::Transport(_) | SessionEnd::SchemaViolation(_)
        )
    }

    fn describe(&self) -> String {
        match self {
            SessionEnd::ConnectFailed(err) => err.to_string(),
            SessionEnd::Closed(Some(reason)) => format!("closed by peer: {reason}"),
            SessionEnd::Closed(None) => "closed by peer".to_string(),
            SessionEnd::StreamEnded => "stream ended".to_string(),
            SessionEnd::Transport(err) => err.to_string(),
            SessionEnd::IdleTimeout(after) => format!("no frame for {after:?}"),
            SessionEnd::SchemaViolation(err) => err.to_string(),
            SessionEnd::Cancelled => "cancelled".to_string(),
        }
    }
}

pub struct StreamConnector {
    transport: Arc<dyn FeedTransport>,
    dispatcher: Arc<Dispatcher>,
    logger: Arc<DiagnosticLogger>,
    config: ConnectorConfig,
}

impl StreamConnector {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        dispatcher: Arc<Dispatcher>,
        logger: Arc<DiagnosticLogger>,
        config: ConnectorConfig,
    ) -> Self {
        Self {
            transport,
            dispatcher,
            logger,
            config,
        }
    }

    /// Stream `symbol` into the dispatcher until `cancel` fires.
    pub async fn run(&self, symbol: SymbolId, cancel: CancellationToken) {
        let url = self.config.endpoints.subscription_url(&symbol);
        info!(
            symbol = %symbol,
            asset_class = %symbol.asset_class(),
            url = %url,
            sampling_interval_ms = self.config.sampling_interval.as_millis(),
            "Connector started"
        );

        let mut failures: u32 = 0;
        let mut sessions: u64 = 0;
        while !cancel.is_cancelled() {
            sessions += 1;
            let (end, delivered) = self.session(&symbol, &url, &cancel).await;
            if matches!(end, SessionEnd::Cancelled) {
                break;
            }

            if delivered > 0 || !end.is_failure() {
                failures = 0;
            } else {
                failures = failures.saturating_add(1);
            }
            let delay = self.config.reconnect.delay_for(failures);

            debug!(symbol = %symbol, session = sessions, delivered, ?delay, "Session ended");
            self.logger
                .info(
                    format!("Reconnecting to {symbol} stream"),
                    end.describe(),
                )
                .await;

            if !delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!(symbol = %symbol, sessions, "Connector stopped");
    }

    /// One connection lifetime. Returns how it ended and how many trades it
    /// handed to the dispatcher.
    async fn session(
        &self,
        symbol: &SymbolId,
        url: &str,
        cancel: &CancellationToken,
    ) -> (SessionEnd, u64) {
        let connect = tokio::time::timeout(self.config.connect_timeout, self.transport.connect(url));
        let mut frames = tokio::select! {
            _ = cancel.cancelled() => return (SessionEnd::Cancelled, 0),
            result = connect => match result {
                Ok(Ok(frames)) => frames,
                Ok(Err(err)) => return (SessionEnd::ConnectFailed(err), 0),
                Err(_) => {
                    let err = TransportError::Timeout(self.config.connect_timeout);
                    return (SessionEnd::ConnectFailed(err), 0);
                }
            },
        };

        self.logger
            .info(format!("Connected to {symbol} stream"), url)
            .await;

        let mut delivered: u64 = 0;
        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => return (SessionEnd::Cancelled, delivered),
                next = next_frame(&mut frames, self.config.idle_timeout) => next,
            };

            let frame = match next {
                Err(_) => {
                    let idle = self.config.idle_timeout.unwrap_or_default();
                    return (SessionEnd::IdleTimeout(idle), delivered);
                }
                Ok(None) => return (SessionEnd::StreamEnded, delivered),
                Ok(Some(Err(err))) => {
                    warn!(symbol = %symbol, error = %err, "Feed transport error");
                    return (SessionEnd::Transport(err), delivered);
                }
                Ok(Some(Ok(frame))) => frame,
            };

            match frame {
                FeedFrame::Text(text) => {
                    let parsed = AggTradeMessage::parse(&text)
                        .and_then(|m| m.into_trade_event(symbol.clone(), wall_clock_millis()));
                    match parsed {
                        Ok(event) => {
                            trace!(
                                symbol = %symbol,
                                trade_id = %event.trade_id(),
                                exchange_ts = event.exchange_timestamp(),
                                "Trade received"
                            );
                            self.dispatcher.insert(event).await;
                            delivered += 1;
                        }
                        Err(err) => {
                            warn!(symbol = %symbol, error = %err, "Feed message failed validation");
                            self.logger
                                .warn(format!("Invalid {symbol} feed message: {err}"), text)
                                .await;
                            return (SessionEnd::SchemaViolation(err), delivered);
                        }
                    }
                }
                FeedFrame::Close(reason) => return (SessionEnd::Closed(reason), delivered),
                FeedFrame::Other => {}
            }
        }
    }
}

async fn next_frame(
    frames: &mut FeedStream,
    idle_timeout: Option<Duration>,
) -> Result<Option<Result<FeedFrame, TransportError>>, Elapsed> {
    match idle_timeout {
        Some(window) => tokio::time::timeout(window, frames.next()).await,
        None => Ok(frames.next().await),
    }
}
