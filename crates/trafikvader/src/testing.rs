//! In-memory doubles for the bus and the reading source.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::bus::{BusConnection, BusError, DeviceInfo, SessionEnd, Transport};
use crate::fetcher::{FetchError, ReadingSource};
use crate::reading::StationReading;

/// Transport that records what it is asked to send.
#[derive(Default)]
pub struct RecordingTransport {
    announced: Mutex<Vec<DeviceInfo>>,
    published: Mutex<Vec<(String, String)>>,
    fail_announce: bool,
    fail_topic: Option<String>,
    stall: bool,
}

impl RecordingTransport {
    pub fn failing_announce() -> Self {
        Self {
            fail_announce: true,
            ..Self::default()
        }
    }

    /// Never completes an announce, like a client whose request buffer is full.
    pub fn stalled() -> Self {
        Self {
            stall: true,
            ..Self::default()
        }
    }

    pub fn failing_topic(topic: &str) -> Self {
        Self {
            fail_topic: Some(topic.to_string()),
            ..Self::default()
        }
    }

    pub fn announced(&self) -> Vec<DeviceInfo> {
        self.announced.lock().unwrap().clone()
    }

    /// Successful publishes as `(topic, payload)`, in order.
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn announce(&self, device: &DeviceInfo) -> Result<(), BusError> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        if self.fail_announce {
            return Err(BusError::Client("announce rejected".to_string()));
        }
        self.announced.lock().unwrap().push(device.clone());
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: String) -> Result<(), BusError> {
        if self.fail_topic.as_deref() == Some(topic) {
            return Err(BusError::Client("publish rejected".to_string()));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        Ok(())
    }
}

/// Reading source that replays scripted results, then repeats the fallback.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Result<Vec<StationReading>, FetchError>>>,
    fallback: Vec<StationReading>,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(
        script: Vec<Result<Vec<StationReading>, FetchError>>,
        fallback: Vec<StationReading>,
    ) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReadingSource for ScriptedSource {
    async fn fetch(&self) -> Result<Vec<StationReading>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(self.fallback.clone()))
    }
}

/// Connection that ends each session with the scripted outcome, then stays up.
pub struct ScriptedConnection {
    outcomes: VecDeque<SessionEnd>,
    sessions: std::sync::Arc<AtomicUsize>,
}

impl ScriptedConnection {
    pub fn new(outcomes: Vec<SessionEnd>) -> Self {
        Self {
            outcomes: outcomes.into(),
            sessions: std::sync::Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Counter of started sessions, readable after the connection moved into a task.
    pub fn session_counter(&self) -> std::sync::Arc<AtomicUsize> {
        self.sessions.clone()
    }
}

#[async_trait]
impl BusConnection for ScriptedConnection {
    async fn run_session(&mut self) -> SessionEnd {
        self.sessions.fetch_add(1, Ordering::SeqCst);
        match self.outcomes.pop_front() {
            Some(end) => end,
            None => std::future::pending().await,
        }
    }
}

/// Reading with every field reported.
pub fn reading(id: &str, temperature_c: f64) -> StationReading {
    StationReading {
        id: id.to_string(),
        name: format!("Station {}", id),
        temperature_c: Some(temperature_c),
        relative_humidity_pct: Some(60.0),
        precipitation: 0.0,
        road_number: None,
    }
}
