//! validate action - check an HTTP endpoint on the host.
//!
//! ```yaml
//! validate:
//!   scheme: http
//!   port: 80
//!   url_path: /index.php
//!   retries: 3
//!   timeout: 2s
//!   status_code: 200
//!   body_content: Hello
//! ```
//!
//! The request is sent from the control node to the host's address. Each
//! attempt is bounded by `timeout` and by the action's context; attempts
//! follow each other without delay. `retries: 0` still makes one attempt.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::ActionError;
use crate::connection::{Connection, ConnectionError};
use crate::context::ExecContext;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidateAction {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub url_path: String,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    #[serde(default = "default_status_code")]
    pub status_code: u16,
    #[serde(default)]
    pub body_content: String,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_retries() -> u32 {
    1
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_status_code() -> u16 {
    200
}

impl Default for ValidateAction {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            port: None,
            url_path: String::new(),
            retries: default_retries(),
            timeout: default_timeout(),
            status_code: default_status_code(),
            body_content: String::new(),
        }
    }
}

/// Why a single attempt failed.
#[derive(Error, Debug)]
enum AttemptError {
    #[error("failed to execute request: {0}")]
    Request(#[source] reqwest::Error),

    #[error("expected status {expected} but got {actual} instead")]
    Status { expected: u16, actual: u16 },

    #[error("failed to read response body: {0}")]
    Body(#[source] reqwest::Error),

    #[error("response does not contain expected content {0:?}")]
    Content(String),
}

impl ValidateAction {
    /// URL checked on `host`.
    pub fn url(&self, host: &str) -> Result<Url, ActionError> {
        let authority = if host.contains(':') && !host.starts_with('[') {
            format!("[{}]", host)
        } else {
            host.to_string()
        };
        let authority = match self.port {
            Some(port) => format!("{}:{}", authority, port),
            None => authority,
        };

        let mut url = Url::parse(&format!("{}://{}", self.scheme, authority)).map_err(|e| {
            ActionError::InvalidParameter(format!("failed to build validation url: {}", e))
        })?;
        url.set_path(&self.url_path);
        Ok(url)
    }

    /// Number of requests made before giving up.
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }

    pub async fn run(&self, ctx: &ExecContext, conn: &dyn Connection) -> Result<(), ActionError> {
        let host = conn.host().host.clone();
        self.check(ctx, &host).await
    }

    /// Validate the endpoint on `host`.
    pub async fn check(&self, ctx: &ExecContext, host: &str) -> Result<(), ActionError> {
        let url = self.url(host)?;
        let client = Client::builder().build().map_err(|e| {
            ActionError::InvalidParameter(format!("failed to create http client: {}", e))
        })?;

        let attempts = self.attempts();
        let mut last_error = None;
        for attempt in 1..=attempts {
            match ctx.run(self.attempt(&client, &url)).await {
                Ok(Ok(())) => {
                    debug!(url = %url, attempt, "Validation succeeded");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    debug!(url = %url, attempt, error = %e, "Validation attempt failed");
                    last_error = Some(e);
                }
                Err(cause) => {
                    return Err(ActionError::ValidationInterrupted {
                        url: url.to_string(),
                        source: ConnectionError::Cancelled(cause),
                    });
                }
            }
        }

        Err(ActionError::Validation {
            url: url.to_string(),
            attempts,
            message: last_error.map(|e| e.to_string()).unwrap_or_default(),
        })
    }

    async fn attempt(&self, client: &Client, url: &Url) -> Result<(), AttemptError> {
        let response = client
            .get(url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(AttemptError::Request)?;

        let actual = response.status().as_u16();
        if actual != self.status_code {
            return Err(AttemptError::Status {
                expected: self.status_code,
                actual,
            });
        }

        let body = response.text().await.map_err(AttemptError::Body)?;
        if !body.contains(&self.body_content) {
            return Err(AttemptError::Content(self.body_content.clone()));
        }

        Ok(())
    }
}
