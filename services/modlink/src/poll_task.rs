//! Poll tasks and their scheduler
//!
//! A [`PollTask`] binds one mapping of one slave to its compiled expression
//! and to the connection's shared transport. [`PollTask::spawn`] runs it on
//! its own tokio task at the connection's interval until the task's
//! cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use modlink_calc::ExpressionEngine;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::{MappingConfig, PollErrorPolicy};
use crate::emitter::{DeltaEmitter, SourceTag};
use crate::error::{ModlinkError, Result};
use crate::transport::{read_words, ModbusTransport};

/// A poll-stage error escalated to the plugin
#[derive(Debug, Clone)]
pub struct PollFailure {
    pub source: SourceTag,
    pub path: String,
    pub error: ModlinkError,
}

pub type FailureSink = mpsc::UnboundedSender<PollFailure>;

/// Everything a connection hands to each of its poll tasks
pub struct TaskContext<E: ExpressionEngine> {
    pub engine: Arc<E>,
    pub emitter: Arc<DeltaEmitter>,
    pub policy: PollErrorPolicy,
    pub failures: FailureSink,
}

impl<E: ExpressionEngine> Clone for TaskContext<E> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            emitter: Arc::clone(&self.emitter),
            policy: self.policy,
            failures: self.failures.clone(),
        }
    }
}

/// A mapping with its expression already compiled
pub struct CompiledMapping<C> {
    pub unit_id: u8,
    pub mapping: MappingConfig,
    pub compiled: C,
}

pub struct PollTask<T, E: ExpressionEngine> {
    source: SourceTag,
    mapping: MappingConfig,
    compiled: E::Compiled,
    transport: Arc<Mutex<T>>,
    read_timeout: Duration,
    ctx: TaskContext<E>,
}

impl<T, E> PollTask<T, E>
where
    T: ModbusTransport,
    E: ExpressionEngine,
{
    pub fn new(
        connection_id: &str,
        entry: CompiledMapping<E::Compiled>,
        transport: Arc<Mutex<T>>,
        read_timeout: Duration,
        ctx: TaskContext<E>,
    ) -> Self {
        let CompiledMapping {
            unit_id,
            mapping,
            compiled,
        } = entry;
        Self {
            source: SourceTag::new(connection_id, unit_id, mapping.function, mapping.address),
            mapping,
            compiled,
            transport,
            read_timeout,
            ctx,
        }
    }

    pub fn source(&self) -> &SourceTag {
        &self.source
    }

    /// Read under the connection lock, bounded by the read timeout.
    ///
    /// Returns `None` when the token was cancelled while waiting for the lock.
    async fn read(&self, token: &CancellationToken) -> Result<Option<Vec<u16>>> {
        let mut transport = self.transport.lock().await;
        if token.is_cancelled() {
            return Ok(None);
        }

        transport.set_unit_id(self.source.unit_id);
        let read = read_words(
            &mut *transport,
            self.mapping.function,
            self.mapping.address,
            self.mapping.word_count(),
        );
        match tokio::time::timeout(self.read_timeout, read).await {
            Ok(words) => words.map(Some),
            Err(_) => {
                // The request is on the wire without its reply
                transport.reset();
                Err(ModlinkError::read(format!(
                    "{} timed out after {} ms",
                    self.source,
                    self.read_timeout.as_millis()
                )))
            },
        }
    }

    /// One firing: read, decode, transform, emit.
    ///
    /// A result that arrives after cancellation is discarded (`Ok(None)`).
    pub async fn poll_once(&self, token: &CancellationToken) -> Result<Option<f64>> {
        let Some(words) = self.read(token).await? else {
            return Ok(None);
        };
        if token.is_cancelled() {
            debug!("Discarding read from {} after cancellation", self.source);
            return Ok(None);
        }

        let raw = self.mapping.data_type.decode(&words)?;
        let value = self.ctx.engine.evaluate(&self.compiled, raw)?;
        self.ctx
            .emitter
            .emit(&self.mapping.path, value, &self.source, Utc::now())?;

        debug!(
            source = %self.source,
            path = %self.mapping.path,
            raw,
            value,
            "Polled"
        );
        Ok(Some(value))
    }

    /// Start the recurring poll on its own tokio task.
    ///
    /// The first poll fires immediately. Firings that come due while the
    /// previous poll is still in flight are skipped; the next one follows a
    /// full interval after the slow poll finished.
    pub fn spawn(self, period: Duration, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(period, token))
    }

    async fn run(self, period: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let started = Instant::now();
            match self.poll_once(&token).await {
                Ok(Some(_)) => {},
                Ok(None) => break,
                Err(error) => {
                    if token.is_cancelled() {
                        break;
                    }
                    if !self.handle_failure(error) {
                        break;
                    }
                },
            }

            // Drop the firings that came due while this poll was in flight
            if started.elapsed() >= period {
                debug!("Poll of {} overran its interval", self.source);
                ticker.reset();
            }
        }

        debug!("Poll task stopped: {}", self.source);
    }

    /// Apply the poll error policy; `false` ends the task
    fn handle_failure(&self, error: ModlinkError) -> bool {
        match self.ctx.policy {
            PollErrorPolicy::StopPlugin => {
                error!("Poll failed for {} ({}): {}", self.source, self.mapping.path, error);
                let failure = PollFailure {
                    source: self.source.clone(),
                    path: self.mapping.path.clone(),
                    error,
                };
                if self.ctx.failures.send(failure).is_err() {
                    warn!("Failure channel closed; {} stops alone", self.source);
                }
                false
            },
            PollErrorPolicy::LogAndContinue => {
                warn!("Poll failed for {} ({}): {}", self.source, self.mapping.path, error);
                self.ctx
                    .emitter
                    .report_error(&format!("{} ({}): {}", self.source, self.mapping.path, error));
                true
            },
        }
    }
}
