//! In-process backend for unit tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use super::{Credentials, Transport};
use crate::endpoint::ApiRequest;
use crate::error::{ConsoleError, Result};

type Handler = Box<dyn Fn(&ApiRequest) -> Result<Value> + Send + Sync>;
type DelayFn = Box<dyn Fn(&ApiRequest) -> Duration + Send + Sync>;

/// Routes by endpoint name, counts calls, and can stall responses.
#[derive(Default)]
pub(crate) struct FakeTransport {
    handlers: Mutex<HashMap<&'static str, Handler>>,
    delay: Mutex<Option<DelayFn>>,
    calls: Mutex<Vec<(ApiRequest, Credentials)>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn on(
        &self,
        endpoint: &'static str,
        handler: impl Fn(&ApiRequest) -> Result<Value> + Send + Sync + 'static,
    ) {
        self.handlers
            .lock()
            .unwrap()
            .insert(endpoint, Box::new(handler));
    }

    pub(crate) fn respond(&self, endpoint: &'static str, value: Value) {
        self.on(endpoint, move |_| Ok(value.clone()));
    }

    pub(crate) fn fail(&self, endpoint: &'static str, error: ConsoleError) {
        self.on(endpoint, move |_| Err(error.clone()));
    }

    pub(crate) fn delay(&self, f: impl Fn(&ApiRequest) -> Duration + Send + Sync + 'static) {
        *self.delay.lock().unwrap() = Some(Box::new(f));
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub(crate) fn calls_to(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(req, _)| req.endpoint == endpoint)
            .count()
    }

    pub(crate) fn requests(&self) -> Vec<ApiRequest> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(req, _)| req.clone())
            .collect()
    }

    pub(crate) fn last_credentials(&self) -> Option<Credentials> {
        self.calls.lock().unwrap().last().map(|(_, c)| c.clone())
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &ApiRequest, credentials: &Credentials) -> Result<Value> {
        self.calls
            .lock()
            .unwrap()
            .push((request.clone(), credentials.clone()));

        let delay = self.delay.lock().unwrap().as_ref().map(|f| f(request));
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let handlers = self.handlers.lock().unwrap();
        match handlers.get(request.endpoint) {
            Some(handler) => handler(request),
            None => Err(ConsoleError::Transport {
                status: 404,
                message: format!("no fake handler for {}", request.endpoint),
            }),
        }
    }
}
