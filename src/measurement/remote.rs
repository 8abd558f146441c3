//! Network oracle: an HTTP endpoint that compares a request value against a secret.

use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT_ENCODING, COOKIE, LOCATION};
use reqwest::redirect::Policy;
use reqwest::Method;

use crate::error::OracleError;
use crate::types::Probe;

use super::{Measurement, Oracle, OracleKind, Outcome};

/// Length of the cache-busting parameter name and value.
pub const CACHE_BUST_LEN: usize = 8;

const CACHE_BUST_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Where the probe value goes in the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Injection {
    /// `Cookie: <name>=<probe>`.
    Cookie(String),
    /// `?<name>=<probe>`.
    Query(String),
    /// `<name>: <probe>`.
    Header(String),
    /// The probe is not sent; used for timing plain URLs.
    None,
}

/// Builder for [`RemoteOracle`].
#[derive(Debug, Clone)]
pub struct RemoteOracleBuilder {
    url: String,
    method: Method,
    injection: Injection,
    headers: Vec<(String, String)>,
    cache_bust: bool,
    verify_tls: bool,
    timeout: Duration,
    accepted_statuses: Vec<u16>,
    seed: Option<u64>,
}

impl RemoteOracleBuilder {
    /// HTTP method (default: GET).
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Where to place the probe.
    pub fn injection(mut self, injection: Injection) -> Self {
        self.injection = injection;
        self
    }

    /// Send the probe as cookie `name`.
    pub fn cookie(self, name: impl Into<String>) -> Self {
        self.injection(Injection::Cookie(name.into()))
    }

    /// Send the probe as query parameter `name`.
    pub fn query(self, name: impl Into<String>) -> Self {
        self.injection(Injection::Query(name.into()))
    }

    /// Send the probe as header `name`.
    pub fn header_injection(self, name: impl Into<String>) -> Self {
        self.injection(Injection::Header(name.into()))
    }

    /// Add a fixed header to every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Append a unique, inert query parameter to every request (default: off).
    pub fn cache_bust(mut self, enabled: bool) -> Self {
        self.cache_bust = enabled;
        self
    }

    /// Verify TLS certificates (default: off, targets are usually test setups).
    pub fn verify_tls(mut self, enabled: bool) -> Self {
        self.verify_tls = enabled;
        self
    }

    /// Per-request timeout (default: 30s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Accept `status` as a successful response.
    ///
    /// Without any call, every 2xx and 3xx status is accepted. Once a status
    /// is listed, only listed statuses are.
    pub fn accept_status(mut self, status: u16) -> Self {
        self.accepted_statuses.push(status);
        self
    }

    /// Seed for cache-busting tokens.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Build the oracle.
    ///
    /// # Errors
    ///
    /// [`OracleError::Transport`] if a header is malformed or the HTTP client
    /// cannot be created.
    pub fn build(self) -> Result<RemoteOracle, OracleError> {
        let mut headers = HeaderMap::new();
        // Compressed bodies make response time depend on the compressor.
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        for (name, value) in &self.headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                OracleError::Transport(format!("invalid header name {:?}: {}", name, e))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                OracleError::Transport(format!("invalid header value {:?}: {}", value, e))
            })?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .redirect(Policy::none())
            .danger_accept_invalid_certs(!self.verify_tls)
            .timeout(self.timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| OracleError::Transport(format!("failed to create HTTP client: {}", e)))?;

        let rng = match self.seed {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_rng(&mut rand::rng()),
        };

        Ok(RemoteOracle {
            client,
            url: self.url,
            method: self.method,
            injection: self.injection,
            cache_bust: self.cache_bust,
            accepted_statuses: self.accepted_statuses,
            rng,
        })
    }
}

/// Times HTTP requests carrying the probe.
///
/// The timed window runs from sending the request to receiving the response
/// headers. Request construction happens before the window and the body is
/// read after it, so neither client-side setup nor body transfer is counted.
/// Redirects are never followed.
#[derive(Debug)]
pub struct RemoteOracle {
    client: Client,
    url: String,
    method: Method,
    injection: Injection,
    cache_bust: bool,
    accepted_statuses: Vec<u16>,
    rng: Xoshiro256PlusPlus,
}

impl RemoteOracle {
    /// Start building an oracle for `url`.
    pub fn builder(url: impl Into<String>) -> RemoteOracleBuilder {
        RemoteOracleBuilder {
            url: url.into(),
            method: Method::GET,
            injection: Injection::None,
            headers: Vec::new(),
            cache_bust: false,
            verify_tls: false,
            timeout: Duration::from_secs(30),
            accepted_statuses: Vec::new(),
            seed: None,
        }
    }

    /// Target URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether cache-busting is enabled.
    pub fn cache_busting(&self) -> bool {
        self.cache_bust
    }

    /// Time one request to `url` carrying `value` at the injection point.
    ///
    /// # Errors
    ///
    /// [`OracleError::UnexpectedStatus`] for a status the oracle does not
    /// accept, [`OracleError::Transport`] if no response arrived.
    pub fn time_request(
        &mut self,
        url: &str,
        value: Option<&str>,
    ) -> Result<Measurement, OracleError> {
        let measured = self.observe(url, value)?;
        match measured.outcome.status() {
            Some(status) if !self.accepts(status) => {
                tracing::debug!("{} {} -> {} rejected", self.method, url, status);
                Err(OracleError::UnexpectedStatus { status })
            }
            _ => Ok(measured),
        }
    }

    /// Time one request like [`RemoteOracle::time_request`], whatever its status.
    ///
    /// Error pages are timed and reported like any other response; only
    /// transport failures are errors.
    pub fn observe(&mut self, url: &str, value: Option<&str>) -> Result<Measurement, OracleError> {
        let mut query: Vec<(String, String)> = Vec::new();
        if self.cache_bust {
            let token = self.cache_bust_token();
            query.push((token.clone(), token));
        }

        let mut request = self.client.request(self.method.clone(), url);
        if let Some(value) = value {
            match &self.injection {
                Injection::Cookie(name) => {
                    request = request.header(COOKIE, format!("{}={}", name, value));
                }
                Injection::Query(name) => query.push((name.clone(), value.to_string())),
                Injection::Header(name) => request = request.header(name.as_str(), value),
                Injection::None => {}
            }
        }
        if !query.is_empty() {
            request = request.query(&query);
        }
        let request = request.build().map_err(transport)?;

        let start = Instant::now();
        let response = self.client.execute(request).map_err(transport)?;
        let duration = start.elapsed();

        let status = response.status().as_u16();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let size = response.bytes().map_err(transport)?.len();

        Ok(Measurement {
            duration,
            outcome: Outcome::Http {
                status,
                size,
                location,
            },
        })
    }

    fn accepts(&self, status: u16) -> bool {
        if self.accepted_statuses.is_empty() {
            (200..400).contains(&status)
        } else {
            self.accepted_statuses.contains(&status)
        }
    }

    fn cache_bust_token(&mut self) -> String {
        (0..CACHE_BUST_LEN)
            .map(|_| {
                let i = self.rng.random_range(0..CACHE_BUST_CHARSET.len());
                CACHE_BUST_CHARSET[i] as char
            })
            .collect()
    }
}

impl Oracle for RemoteOracle {
    fn measure(&mut self, probe: &Probe) -> Result<Measurement, OracleError> {
        let url = self.url.clone();
        self.time_request(&url, Some(probe.as_str()))
    }

    fn kind(&self) -> OracleKind {
        OracleKind::Remote
    }
}

fn transport(e: reqwest::Error) -> OracleError {
    OracleError::Transport(e.to_string())
}
