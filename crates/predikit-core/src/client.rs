//! Blocking HTTP client for the prediction API.

use std::io::{BufRead, BufReader, Read};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::schemas::{Acceleration, Prediction, Predictor};
use crate::value::Value;

/// Errors surfaced by the API client.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The server could not be reached, or kept failing after retries.
    #[error("prediction API unavailable: {0}")]
    Unavailable(String),
    /// The server rejected the request.
    #[error("request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
    /// The request exceeded its deadline.
    #[error("request timed out")]
    Timeout,
    /// The response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("invalid API URL: {0}")]
    InvalidUrl(String),
}

/// Retry behavior for idempotent requests.
///
/// Transport failures and 5xx responses are retried with exponential
/// backoff; rejections and timeouts are not.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt)
    }
}

/// Platform identifier sent with prediction requests.
pub fn client_id() -> &'static str {
    if cfg!(target_os = "macos") {
        "macos"
    } else if cfg!(target_os = "windows") {
        "windows"
    } else {
        "linux"
    }
}

/// A named input value in a prediction request.
#[derive(Debug, Clone, Serialize)]
pub struct NamedValue {
    pub name: String,
    pub value: Value,
}

/// Body of `POST /predictions`.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionRequest {
    pub tag: String,
    pub inputs: Vec<NamedValue>,
    pub acceleration: Acceleration,
    #[serde(rename = "clientId")]
    pub client_id: &'static str,
}

impl PredictionRequest {
    pub fn new(tag: impl Into<String>, inputs: Vec<(String, Value)>) -> Self {
        Self {
            tag: tag.into(),
            inputs: inputs
                .into_iter()
                .map(|(name, value)| NamedValue { name, value })
                .collect(),
            acceleration: Acceleration::Auto,
            client_id: client_id(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

/// Extract the server's error message from a response body, falling back to
/// the raw text when it is not the usual envelope.
fn server_message(body: &str) -> String {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.errors.is_empty() => envelope.errors[0].message.clone(),
        _ => body.trim().to_string(),
    }
}

/// Blocking client for the prediction API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::blocking::Client,
    base_url: Url,
    access_key: Option<String>,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, ApiError> {
        let base_url = Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| ApiError::Unavailable(e.to_string()))?;
        Ok(Self {
            http,
            base_url,
            access_key: None,
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_access_key(mut self, access_key: impl Into<String>) -> Self {
        self.access_key = Some(access_key.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::InvalidUrl(e.to_string()))
    }

    fn authorize(&self, request: reqwest::blocking::RequestBuilder) -> reqwest::blocking::RequestBuilder {
        match &self.access_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    /// Send a request, retrying transport failures and 5xx responses.
    fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response, ApiError> {
        let mut last_failure = String::new();
        for attempt in 0..self.retry.max_attempts {
            if attempt > 0 {
                std::thread::sleep(self.retry.delay(attempt - 1));
            }
            match self.authorize(build()).send() {
                Ok(response) => {
                    let status = response.status();
                    if status.is_server_error() {
                        last_failure = format!("server error ({})", status.as_u16());
                        tracing::warn!(status = status.as_u16(), attempt, "retrying request");
                        continue;
                    }
                    if status.is_client_error() {
                        let code = status.as_u16();
                        let body = response.text().unwrap_or_default();
                        return Err(ApiError::Rejected {
                            status: code,
                            message: server_message(&body),
                        });
                    }
                    return Ok(response);
                }
                Err(e) if e.is_timeout() => return Err(ApiError::Timeout),
                Err(e) => {
                    last_failure = e.to_string();
                    tracing::warn!(error = %e, attempt, "retrying request");
                }
            }
        }
        Err(ApiError::Unavailable(last_failure))
    }

    /// Fetch a predictor by tag.
    pub fn get_predictor(&self, tag: &str) -> Result<Predictor, ApiError> {
        let url = self.endpoint(&format!("predictors/{tag}"))?;
        let response = self.send_with_retry(|| self.http.get(url.clone()))?;
        response
            .json::<Predictor>()
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Create a prediction and wait for its terminal state.
    pub fn create_prediction(&self, request: &PredictionRequest) -> Result<Prediction, ApiError> {
        let url = self.endpoint("predictions")?;
        let response = self.send_with_retry(|| self.http.post(url.clone()).json(request))?;
        response
            .json::<Prediction>()
            .map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Create a streamed prediction, yielding one [`Prediction`] per server
    /// event until the stream closes.
    pub fn stream_prediction(
        &self,
        request: &PredictionRequest,
    ) -> Result<PredictionEventStream<BufReader<reqwest::blocking::Response>>, ApiError> {
        let url = self.endpoint("predictions")?;
        let response = self.send_with_retry(|| {
            self.http
                .post(url.clone())
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .json(request)
        })?;
        Ok(PredictionEventStream::new(BufReader::new(response)))
    }
}

/// One server-sent event: an optional event name and its data payload.
#[derive(Debug, PartialEq)]
struct SseEvent {
    event: Option<String>,
    data: String,
}

/// Incremental `text/event-stream` parser over a blocking reader.
struct SseReader<R> {
    reader: R,
}

impl<R: BufRead> SseReader<R> {
    fn next_event(&mut self) -> Result<Option<SseEvent>, std::io::Error> {
        let mut event = None;
        let mut data = String::new();
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim_end_matches(['\r', '\n']);
            if trimmed.is_empty() {
                if !data.is_empty() {
                    return Ok(Some(SseEvent { event, data }));
                }
                continue;
            }
            if let Some(name) = trimmed.strip_prefix("event:") {
                event = Some(name.trim().to_string());
            } else if let Some(payload) = trimmed.strip_prefix("data:") {
                if !data.is_empty() {
                    data.push('\n');
                }
                data.push_str(payload.trim_start());
            }
            // Comment lines and unknown fields are skipped.
        }
    }
}

/// Iterator over streamed prediction events.
pub struct PredictionEventStream<R> {
    sse: SseReader<R>,
    done: bool,
}

impl<R: BufRead> PredictionEventStream<R> {
    pub(crate) fn new(reader: R) -> Self {
        Self {
            sse: SseReader { reader },
            done: false,
        }
    }
}

impl<R: Read + BufRead> Iterator for PredictionEventStream<R> {
    type Item = Result<Prediction, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let event = match self.sse.next_event() {
            Ok(Some(event)) => event,
            Ok(None) => {
                self.done = true;
                return None;
            }
            Err(e) => {
                self.done = true;
                return Some(Err(ApiError::Unavailable(e.to_string())));
            }
        };
        if event.event.as_deref() == Some("error") {
            self.done = true;
            return Some(Err(ApiError::Rejected {
                status: 200,
                message: server_message(&event.data),
            }));
        }
        match serde_json::from_str::<Prediction>(&event.data) {
            Ok(prediction) => Some(Ok(prediction)),
            Err(e) => {
                self.done = true;
                Some(Err(ApiError::Decode(e.to_string())))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn client_id_names_the_platform() {
        assert!(["linux", "macos", "windows"].contains(&client_id()));
    }

    #[test]
    fn retry_delay_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(250));
        assert_eq!(policy.delay(1), Duration::from_millis(500));
        assert_eq!(policy.delay(2), Duration::from_millis(1000));
    }

    #[test]
    fn server_message_reads_the_error_envelope() {
        let body = r#"{"errors": [{"message": "predictor not found"}]}"#;
        assert_eq!(server_message(body), "predictor not found");
        assert_eq!(server_message("plain text"), "plain text");
    }

    #[test]
    fn request_serializes_inputs_in_order() {
        let request = PredictionRequest::new(
            "@fxn/greeting",
            vec![("name".into(), Value::String("Peter".into()))],
        );
        let raw = serde_json::to_value(&request).unwrap();
        assert_eq!(raw["tag"], "@fxn/greeting");
        assert_eq!(raw["inputs"][0]["name"], "name");
        assert_eq!(raw["acceleration"], "auto");
        assert_eq!(raw["clientId"], client_id());
    }

    #[test]
    fn sse_events_parse_until_stream_end() {
        let body = "event: prediction\ndata: {\"id\":\"p1\",\"tag\":\"@a/b\"}\n\n\
                    data: {\"id\":\"p1\",\"tag\":\"@a/b\",\"results\":[]}\n\n";
        let mut stream = PredictionEventStream::new(Cursor::new(body));
        let first = stream.next().unwrap().unwrap();
        assert_eq!(first.id, "p1");
        assert!(first.results.is_none());
        let second = stream.next().unwrap().unwrap();
        assert_eq!(second.results, Some(vec![]));
        assert!(stream.next().is_none());
    }

    #[test]
    fn sse_error_event_ends_the_stream() {
        let body = "event: error\ndata: {\"errors\":[{\"message\":\"out of capacity\"}]}\n\n";
        let mut stream = PredictionEventStream::new(Cursor::new(body));
        match stream.next().unwrap() {
            Err(ApiError::Rejected { message, .. }) => assert_eq!(message, "out of capacity"),
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(stream.next().is_none());
    }

    #[test]
    fn sse_multiline_data_joins_with_newlines() {
        let body = ": keep-alive\ndata: {\"id\":\"p2\",\ndata: \"tag\":\"@a/b\"}\n\n";
        let mut stream = PredictionEventStream::new(Cursor::new(body));
        let prediction = stream.next().unwrap().unwrap();
        assert_eq!(prediction.id, "p2");
    }
}
