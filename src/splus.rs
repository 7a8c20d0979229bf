use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use arrow::array::{
    ArrayRef, Float32Array, Float64Array, Int8Array, Int16Array, Int32Array, Int64Array,
    StringArray,
};
use reqwest::blocking::Client;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::TransportSettings;
use crate::error::HarvestError;
use crate::query::QuerySpec;
use crate::table::{ColumnType, Table, checked_f32};

const MAX_TRANSPORT_DELAY: Duration = Duration::from_secs(120);

static NULL_CELL: Value = Value::Null;

/// Query capability of the remote catalog service.
///
/// Implementations must tolerate concurrent calls from the batch workers.
pub trait SurveyClient: Send + Sync {
    fn query(&self, spec: &QuerySpec, timeout: Duration) -> Result<Table, HarvestError>;
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Reads `SPLUS_USERNAME` / `SPLUS_PASSWORD`; `None` unless both are set.
    pub fn from_env() -> Option<Self> {
        let username = std::env::var("SPLUS_USERNAME").ok()?;
        let password = std::env::var("SPLUS_PASSWORD").ok()?;
        if username.is_empty() {
            return None;
        }
        Some(Self::new(username, password))
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Authenticated connection to S-PLUS for the lifetime of one run.
///
/// Released on drop; `close` may also be called explicitly and is idempotent.
pub struct SplusSession {
    client: Client,
    base_url: String,
    token: Option<String>,
    transport: TransportSettings,
    closed: AtomicBool,
}

#[derive(Deserialize)]
struct LoginResponse {
    token: String,
}

#[derive(Deserialize)]
struct TapResponse {
    metadata: Vec<TapColumn>,
    #[serde(default)]
    data: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct TapColumn {
    name: String,
    datatype: String,
}

impl SplusSession {
    pub fn open(
        base_url: &str,
        credentials: Option<&Credentials>,
        transport: TransportSettings,
        max_connections: usize,
    ) -> Result<Self, HarvestError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("splus-harvest/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HarvestError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .pool_max_idle_per_host(max_connections)
            .build()
            .map_err(|err| HarvestError::Http(err.to_string()))?;

        let mut session = Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: None,
            transport,
            closed: AtomicBool::new(false),
        };

        match credentials {
            Some(credentials) => {
                session.token = Some(session.login(credentials)?);
                info!(user = %credentials.username, "authenticated with S-PLUS");
            }
            None => warn!("no S-PLUS credentials supplied; using public TAP service"),
        }
        Ok(session)
    }

    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("S-PLUS session released");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn login(&self, credentials: &Credentials) -> Result<String, HarvestError> {
        let url = format!("{}/api/auth/login", self.base_url);
        let body = serde_json::json!({
            "username": credentials.username,
            "password": credentials.password,
        });
        let response = self
            .send_with_retries(|| self.client.post(&url).json(&body))
            .map_err(|err| HarvestError::Auth(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "login rejected".to_string());
            return Err(HarvestError::Auth(format!("status {status}: {message}")));
        }
        let login: LoginResponse = response
            .json()
            .map_err(|err| HarvestError::Auth(err.to_string()))?;
        Ok(login.token)
    }

    fn tap_sync_url(&self) -> String {
        match self.token {
            Some(_) => format!("{}/tap/tap/sync", self.base_url),
            None => format!("{}/public-TAP/tap/sync", self.base_url),
        }
    }

    fn handle_status(
        response: reqwest::blocking::Response,
    ) -> Result<reqwest::blocking::Response, HarvestError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "S-PLUS request failed".to_string());
        if status == 400 {
            return Err(HarvestError::RemoteQuery(message));
        }
        Err(HarvestError::Status { status, message })
    }

    fn send_with_retries<F>(
        &self,
        mut make_req: F,
    ) -> Result<reqwest::blocking::Response, HarvestError>
    where
        F: FnMut() -> reqwest::blocking::RequestBuilder,
    {
        let mut attempt = 0u32;
        loop {
            let response = make_req().send();
            match response {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if attempt < self.transport.retries && is_retryable_status(status) {
                        let delay = transport_delay(self.transport.backoff_factor, attempt);
                        debug!(status, attempt, ?delay, "retrying S-PLUS request");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if attempt < self.transport.retries && is_retryable_error(&err) {
                        let delay = transport_delay(self.transport.backoff_factor, attempt);
                        debug!(error = %err, attempt, ?delay, "retrying S-PLUS request");
                        thread::sleep(delay);
                        attempt += 1;
                        continue;
                    }
                    return Err(map_transport_error(err));
                }
            }
        }
    }
}

impl SurveyClient for SplusSession {
    fn query(&self, spec: &QuerySpec, timeout: Duration) -> Result<Table, HarvestError> {
        if self.is_closed() {
            return Err(HarvestError::SessionClosed);
        }
        let url = self.tap_sync_url();
        let adql = spec.to_adql();
        let form = [
            ("REQUEST", "doQuery"),
            ("VERSION", "1.0"),
            ("LANG", "ADQL"),
            ("FORMAT", "json"),
            ("QUERY", adql.as_str()),
        ];
        let response = self.send_with_retries(|| {
            let request = self.client.post(&url).form(&form).timeout(timeout);
            match &self.token {
                Some(token) => request.header(AUTHORIZATION, format!("Token {token}")),
                None => request,
            }
        })?;
        let response = Self::handle_status(response)?;
        let body = response.text().map_err(map_transport_error)?;
        parse_tap_json(&body)
    }
}

impl Drop for SplusSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Delay before transport retry `attempt` (0-based): `factor * 2^attempt`
/// seconds, capped at two minutes.
pub fn transport_delay(factor: f64, attempt: u32) -> Duration {
    let secs = factor * 2f64.powi(attempt.min(30) as i32);
    if !secs.is_finite() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(secs).min(MAX_TRANSPORT_DELAY)
}

fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn map_transport_error(err: reqwest::Error) -> HarvestError {
    if err.is_timeout() {
        HarvestError::Timeout(err.to_string())
    } else {
        HarvestError::Http(err.to_string())
    }
}

/// Decodes a TAP `FORMAT=json` body (`metadata` + row-major `data`).
pub fn parse_tap_json(body: &str) -> Result<Table, HarvestError> {
    let response: TapResponse =
        serde_json::from_str(body).map_err(|err| HarvestError::RemoteQuery(err.to_string()))?;

    let columns = response
        .metadata
        .iter()
        .enumerate()
        .map(|(index, meta)| {
            let ty = tap_column_type(&meta.datatype);
            let data = column_from_rows(ty, &response.data, index).map_err(|message| {
                HarvestError::RemoteQuery(format!("column {}: {message}", meta.name))
            })?;
            Ok((meta.name.clone(), data))
        })
        .collect::<Result<Vec<_>, HarvestError>>()?;

    Table::new(columns)
}

fn tap_column_type(datatype: &str) -> ColumnType {
    match datatype {
        "double" => ColumnType::Float64,
        "float" => ColumnType::Float32,
        "long" => ColumnType::Int64,
        "int" => ColumnType::Int32,
        "short" | "unsignedByte" => ColumnType::Int16,
        _ => ColumnType::Text,
    }
}

fn column_from_rows(ty: ColumnType, rows: &[Vec<Value>], index: usize) -> Result<ArrayRef, String> {
    let cells = rows.iter().map(|row| row.get(index).unwrap_or(&NULL_CELL));
    let array: ArrayRef = match ty {
        ColumnType::Float64 => Arc::new(cells.map(float_cell).collect::<Result<Float64Array, _>>()?),
        ColumnType::Float32 => Arc::new(
            cells
                .map(|cell| float_cell(cell)?.map(checked_f32).transpose())
                .collect::<Result<Float32Array, _>>()?,
        ),
        ColumnType::Int64 => Arc::new(cells.map(int_cell).collect::<Result<Int64Array, _>>()?),
        ColumnType::Int32 => Arc::new(
            cells
                .map(narrow_int_cell::<i32>)
                .collect::<Result<Int32Array, _>>()?,
        ),
        ColumnType::Int16 => Arc::new(
            cells
                .map(narrow_int_cell::<i16>)
                .collect::<Result<Int16Array, _>>()?,
        ),
        ColumnType::Int8 => Arc::new(
            cells
                .map(narrow_int_cell::<i8>)
                .collect::<Result<Int8Array, _>>()?,
        ),
        ColumnType::Text => Arc::new(
            cells
                .map(|cell| match cell {
                    Value::Null => None,
                    Value::String(text) => Some(text.clone()),
                    other => Some(other.to_string()),
                })
                .collect::<StringArray>(),
        ),
    };
    Ok(array)
}

fn float_cell(cell: &Value) -> Result<Option<f64>, String> {
    match cell {
        Value::Null => Ok(None),
        Value::Number(number) => number
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("{number} is not a float")),
        Value::String(text) => text
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| format!("{text:?} is not a float")),
        other => Err(format!("unexpected value {other}")),
    }
}

fn int_cell(cell: &Value) -> Result<Option<i64>, String> {
    match cell {
        Value::Null => Ok(None),
        Value::Number(number) => number
            .as_i64()
            .map(Some)
            .ok_or_else(|| format!("{number} is not an integer")),
        Value::Bool(flag) => Ok(Some(i64::from(*flag))),
        Value::String(text) => text
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| format!("{text:?} is not an integer")),
        other => Err(format!("unexpected value {other}")),
    }
}

fn narrow_int_cell<T: TryFrom<i64>>(cell: &Value) -> Result<Option<T>, String> {
    match int_cell(cell)? {
        Some(v) => T::try_from(v)
            .map(Some)
            .map_err(|_| format!("{v} out of declared range")),
        None => Ok(None),
    }
}
