//! The narrow contract between the load driver and the protocol adapters.
//!
//! Adapter failures are data, not exceptions: every dispatch resolves to
//! either success, a protocol failure (the backend answered with an error),
//! or a transport failure (no well-formed answer). The driver counts them and
//! moves on.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng as _;

use drover_http::{HttpClient, HttpRequest};
use drover_sql::SqlClient;

use crate::aggregator::Outcome;
use crate::scenario::StepAction;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The backend processed the request and reported failure.
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// The request never completed: timeout, refused connection, DNS.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The step type has no adapter in this build.
    #[error("step type not supported")]
    NotSupported,
}

impl DispatchError {
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Protocol(_) | Self::NotSupported => Outcome::FailRequest,
            Self::Transport(_) => Outcome::FailTransport,
        }
    }

    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[async_trait]
pub trait StepDispatch: Send + Sync {
    /// Issue one step. `timeout` is already clamped to the run deadline.
    async fn dispatch(
        &self,
        action: &StepAction,
        timeout: Option<Duration>,
    ) -> Result<(), DispatchError>;
}

/// Production adapters: HTTP via the hyper client, SQL via the sqlx client,
/// waits and connection checks handled inline.
#[derive(Debug, Default)]
pub struct LiveDispatch {
    http: HttpClient,
    sql: SqlClient,
}

impl LiveDispatch {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StepDispatch for LiveDispatch {
    async fn dispatch(
        &self,
        action: &StepAction,
        timeout: Option<Duration>,
    ) -> Result<(), DispatchError> {
        match action {
            StepAction::HttpApi(cfg) => {
                let mut req = HttpRequest::new(cfg.method.clone(), cfg.url.clone());
                for (name, value) in &cfg.headers {
                    req = req.with_header(name.clone(), value.clone());
                }
                if let Some(body) = &cfg.body {
                    req.body = Bytes::from(body.clone());
                }
                // The driver already folded the step's own timeout into the
                // deadline-clamped value it passes down.
                req.timeout = timeout.or(cfg.timeout);

                let res = self
                    .http
                    .send(req)
                    .await
                    .map_err(|e| DispatchError::Transport(e.to_string()))?;
                if res.is_success() {
                    Ok(())
                } else {
                    Err(DispatchError::Protocol(format!("http status {}", res.status)))
                }
            }

            StepAction::SqlProcedure(cfg) => {
                let timeout = timeout.or(cfg.timeout);
                self.sql
                    .call_procedure(&cfg.connection_string, &cfg.procedure, &cfg.args, timeout)
                    .await
                    .map(|_| ())
                    .map_err(sql_error)
            }

            StepAction::SqlQuery(cfg) => {
                let timeout = timeout.or(cfg.timeout);
                self.sql
                    .run_query(&cfg.connection_string, &cfg.query, timeout)
                    .await
                    .map(|_| ())
                    .map_err(sql_error)
            }

            StepAction::Wait(cfg) => {
                let mut sleep_for = jittered(cfg.duration, cfg.variation);
                if let Some(cap) = timeout {
                    // Never sleep past the run deadline.
                    sleep_for = sleep_for.min(cap);
                }
                tokio::time::sleep(sleep_for).await;
                Ok(())
            }

            StepAction::DatabaseConnection(cfg) => {
                let timeout = timeout.or(cfg.timeout);
                self.sql
                    .check_connection(&cfg.connection_string, timeout)
                    .await
                    .map_err(sql_error)
            }

            StepAction::CustomScript(_) | StepAction::FileOperation(_) => {
                Err(DispatchError::NotSupported)
            }
        }
    }
}

fn sql_error(err: drover_sql::Error) -> DispatchError {
    match err.transport_error_kind() {
        Some(_) => DispatchError::Transport(err.to_string()),
        None => DispatchError::Protocol(err.to_string()),
    }
}

fn jittered(duration: Duration, variation: Duration) -> Duration {
    if variation.is_zero() {
        return duration;
    }
    let spread = variation.as_secs_f64();
    let offset = rand::rng().random_range(-spread..=spread);
    let target = duration.as_secs_f64() + offset;
    Duration::from_secs_f64(target.max(0.0))
}
