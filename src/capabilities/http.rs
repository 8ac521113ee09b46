use crux_core::capability::{Capability, CapabilityContext, Operation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const MAX_URL_LENGTH: usize = 2048;
pub const MAX_REQUEST_BODY_SIZE: usize = 1024 * 1024;
pub const MAX_HEADERS_COUNT: usize = 32;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const MAX_TIMEOUT_MS: u64 = 120_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    #[must_use]
    pub const fn has_request_body(self) -> bool {
        matches!(self, Self::Post | Self::Put)
    }
}

/// One HTTP call as handed to the shell. Every request carries an explicit
/// deadline; the shell enforces it and reports `HttpError::Timeout`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub timeout_ms: u64,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }

    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    #[must_use]
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, url)
    }

    #[must_use]
    pub fn put(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, url)
    }

    #[must_use]
    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, url)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_json_body(mut self, body: Vec<u8>) -> Self {
        self.headers
            .push(("Content-Type".into(), "application/json".into()));
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn validate(&self) -> Result<(), HttpError> {
        if self.url.trim().is_empty() {
            return Err(HttpError::InvalidRequest {
                reason: "URL cannot be empty".to_string(),
            });
        }

        if self.url.len() > MAX_URL_LENGTH {
            return Err(HttpError::InvalidRequest {
                reason: format!("URL exceeds maximum length of {MAX_URL_LENGTH} bytes"),
            });
        }

        let parsed = Url::parse(&self.url).map_err(|e| HttpError::InvalidRequest {
            reason: format!("malformed URL: {e}"),
        })?;

        let scheme = parsed.scheme();
        if scheme != "http" && scheme != "https" {
            return Err(HttpError::InvalidRequest {
                reason: format!("invalid scheme '{scheme}', only 'http' and 'https' are allowed"),
            });
        }

        if parsed.host_str().is_none() {
            return Err(HttpError::InvalidRequest {
                reason: "URL must have a host".to_string(),
            });
        }

        if self.timeout_ms == 0 {
            return Err(HttpError::InvalidRequest {
                reason: "timeout cannot be zero".to_string(),
            });
        }

        if self.timeout_ms > MAX_TIMEOUT_MS {
            return Err(HttpError::InvalidRequest {
                reason: format!("timeout exceeds maximum of {MAX_TIMEOUT_MS}ms"),
            });
        }

        if self.headers.len() > MAX_HEADERS_COUNT {
            return Err(HttpError::InvalidRequest {
                reason: format!("too many headers, maximum is {MAX_HEADERS_COUNT}"),
            });
        }

        for (name, value) in &self.headers {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                return Err(HttpError::InvalidRequest {
                    reason: format!("invalid header name '{name}'"),
                });
            }
            if value.contains(['\r', '\n', '\0']) {
                return Err(HttpError::InvalidRequest {
                    reason: format!("header '{name}' value contains forbidden characters"),
                });
            }
        }

        if let Some(body) = &self.body {
            if !self.method.has_request_body() {
                return Err(HttpError::InvalidRequest {
                    reason: format!("{} requests cannot have a body", self.method.as_str()),
                });
            }
            if body.len() > MAX_REQUEST_BODY_SIZE {
                return Err(HttpError::InvalidRequest {
                    reason: format!(
                        "request body of {} bytes exceeds maximum of {MAX_REQUEST_BODY_SIZE} bytes",
                        body.len()
                    ),
                });
            }
        }

        Ok(())
    }
}

impl Operation for HttpRequest {
    type Output = HttpResult;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpError {
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("network error: {message}")]
    Network { message: String },

    #[error("timeout after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("request cancelled")]
    Cancelled,
}

impl HttpError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout { .. })
    }
}

pub type HttpResult = Result<HttpResponse, HttpError>;

/// Capability for HTTP requests executed by the shell.
pub struct Http<Ev> {
    context: CapabilityContext<HttpRequest, Ev>,
}

impl<Ev> Clone for Http<Ev> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
        }
    }
}

impl<Ev> Capability<Ev> for Http<Ev> {
    type Operation = HttpRequest;
    type MappedSelf<MappedEv> = Http<MappedEv>;

    fn map_event<F, NewEv>(&self, f: F) -> Self::MappedSelf<NewEv>
    where
        F: Fn(NewEv) -> Ev + Send + Sync + 'static,
        Ev: 'static,
        NewEv: 'static + Send,
    {
        Http::new(self.context.map_event(f))
    }
}

impl<Ev> Http<Ev>
where
    Ev: Send + 'static,
{
    pub fn new(context: CapabilityContext<HttpRequest, Ev>) -> Self {
        Self { context }
    }

    /// Validates and dispatches a request. A request that fails validation
    /// never reaches the shell; the error comes back through the same event.
    pub fn send<F>(&self, request: HttpRequest, make_event: F)
    where
        F: FnOnce(HttpResult) -> Ev + Send + 'static,
    {
        if let Err(e) = request.validate() {
            self.context.update_app(make_event(Err(e)));
            return;
        }

        let ctx = self.context.clone();
        self.context.spawn(async move {
            let result = ctx.request_from_shell(request).await;
            ctx.update_app(make_event(result));
        });
    }
}
