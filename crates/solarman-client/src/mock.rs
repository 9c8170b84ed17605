//! In-memory transport for tests: canned responses in, recorded calls out.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{ApiError, Transport, TOKEN_PATH};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub url: String,
    pub bearer: Option<String>,
    pub body: Value,
}

impl RecordedCall {
    pub fn is_token_exchange(&self) -> bool {
        self.url.contains(TOKEN_PATH)
    }
}

/// Answers token exchanges and data requests from two separate FIFO queues.
#[derive(Debug, Default)]
pub struct MockTransport {
    token_responses: Mutex<VecDeque<Value>>,
    data_responses: Mutex<VecDeque<Value>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call sleeps for `delay` (on the tokio clock) before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn push_token(&self, response: Value) {
        lock(&self.token_responses).push_back(response);
    }

    pub fn push_data(&self, response: Value) {
        lock(&self.data_responses).push_back(response);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn token_calls(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| call.is_token_exchange())
            .count()
    }

    pub fn data_calls(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| !call.is_token_exchange())
            .count()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn post_json(&self, url: &str, bearer: Option<&str>, body: &Value) -> Result<Value, ApiError> {
        let call = RecordedCall {
            url: url.to_string(),
            bearer: bearer.map(str::to_string),
            body: body.clone(),
        };
        let queue = if call.is_token_exchange() {
            &self.token_responses
        } else {
            &self.data_responses
        };
        lock(&self.calls).push(call);
        let response = lock(queue).pop_front();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        response.ok_or_else(|| ApiError::Api(format!("no mock response queued for {url}")))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub fn token_ok(access_token: &str, expires_in: u64) -> Value {
    json!({
        "success": true,
        "code": null,
        "msg": null,
        "access_token": access_token,
        "token_type": "bearer",
        "expires_in": expires_in.to_string(),
    })
}

pub fn data_ok(measurements: &[(&str, Value)]) -> Value {
    let data_list: Vec<Value> = measurements
        .iter()
        .map(|(key, value)| json!({ "key": key, "value": value }))
        .collect();
    json!({
        "success": true,
        "code": null,
        "msg": null,
        "deviceSn": "2306123456",
        "dataList": data_list,
    })
}

pub fn failure(code: &str, msg: &str) -> Value {
    json!({
        "success": false,
        "code": code,
        "msg": msg,
    })
}
