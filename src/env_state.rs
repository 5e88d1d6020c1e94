//! # Pipeline environment state
//!
//! This module defines [`PipelineEnv`], the **shared environment object** handed to the
//! catalog adapters. It owns a persistent HTTP agent ([`ureq::Agent`]) configured with a
//! global request timeout, so that every remote catalog query made during one pipeline
//! run reuses the same connection pool and fails within a bounded time.
//!
//! ## Structure
//!
//! ```text
//! PipelineEnv
//! ├── http_client    (ureq::Agent)
//! ├── timeout        (Duration)
//! └── max_body_size  (bytes)
//! ```
//!
//! ## Notes
//!
//! - The object is cheap to clone; clones share the agent's connection pool.
//! - Request failures are returned as [`PipelineError::HttpError`]; the catalog adapters are
//!   responsible for turning them into "no result".
use std::{fmt::Debug, time::Duration};

use ureq::Agent;

use crate::pipeline_errors::PipelineError;

/// Default global timeout of one catalog request.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Default limit on the size of one response body, 512 MiB.
///
/// A full-row region answer of a dense catalog easily exceeds the 10 MB default of
/// the HTTP client.
pub const DEFAULT_MAX_BODY_SIZE: u64 = 512 * 1024 * 1024;

/// HTTP environment shared by the catalog adapters.
///
/// # Fields
///
/// * `http_client` - The ureq agent used to issue every request
/// * `timeout` - The global timeout configured on the agent
/// * `max_body_size` - Largest response body read, in bytes
#[derive(Debug, Clone)]
pub struct PipelineEnv {
    pub http_client: Agent,
    pub timeout: Duration,
    pub max_body_size: u64,
}

impl Default for PipelineEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineEnv {
    /// Create an environment with the [`DEFAULT_HTTP_TIMEOUT`].
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT)
    }

    /// Create an environment whose requests fail after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        let agent: Agent = config.into();

        PipelineEnv {
            http_client: agent,
            timeout,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    pub fn with_max_body_size(mut self, bytes: u64) -> Self {
        self.max_body_size = bytes;
        self
    }

    /// Perform a GET request with url-encoded query parameters and return the body.
    ///
    /// Arguments
    /// ---------
    /// * `url`: the service endpoint
    /// * `params`: `(key, value)` pairs appended to the query string
    ///
    /// Return
    /// ------
    /// * The response body, or a [`PipelineError::HttpError`] on transport failure,
    ///   timeout, non-2xx status or a body larger than `max_body_size`.
    pub(crate) fn get_with_query(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<String, PipelineError> {
        let mut request = self.http_client.get(url);
        for (key, value) in params {
            request = request.query(*key, *value);
        }

        let body = request
            .call()?
            .body_mut()
            .with_config()
            .limit(self.max_body_size)
            .read_to_string()?;
        Ok(body)
    }
}
