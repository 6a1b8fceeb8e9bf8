//! Daemon lifecycle.
//!
//! `Starting → Connecting → Running → Draining → Stopped`. The main task
//! owns the registry and the poll timer; a background task keeps the bus
//! connection alive. Both watch the same shutdown channel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bus::{BusConnection, BusError, Transport};
use crate::config::Config;
use crate::fetcher::{FetchError, ReadingSource};
use crate::registry::Registry;
use crate::updater;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Starting,
    Connecting,
    Running,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Starting => "starting",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Running => "running",
            LifecycleState::Draining => "draining",
            LifecycleState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Unrecoverable daemon failures.
#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("initial fetch failed: {0}")]
    InitialFetch(#[source] FetchError),
    #[error("MQTT: {0}")]
    Bus(#[from] BusError),
    #[error("MQTT connection task failed: {0}")]
    Task(String),
}

struct Tracker {
    state: LifecycleState,
}

impl Tracker {
    fn new() -> Self {
        Self {
            state: LifecycleState::Starting,
        }
    }

    fn enter(&mut self, next: LifecycleState) {
        log::debug!("Lifecycle: {} -> {}", self.state, next);
        self.state = next;
    }
}

enum Exit {
    Shutdown,
    ConnectionEnded(Result<Result<(), BusError>, tokio::task::JoinError>),
}

/// Keep the bus connection up until shutdown.
///
/// A session that connected and then dropped is followed by
/// `reconnect_delay` and a new attempt. A session that never connected, or
/// that the broker refused, ends the loop with an error.
pub async fn maintain_connection<C: BusConnection>(
    mut connection: C,
    reconnect_delay: Duration,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), BusError> {
    loop {
        let end = tokio::select! {
            end = connection.run_session() => end,
            _ = shutdown.changed() => return Ok(()),
        };

        if end.is_fatal() {
            log::error!("MQTT: could not (re)connect: {}", end.error);
            return Err(end.error);
        }
        log::warn!("MQTT: connection lost: {}", end.error);

        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shutdown.changed() => return Ok(()),
        }
        log::info!("MQTT: reconnecting");
    }
}

/// Run the daemon until shutdown or an unrecoverable error.
pub async fn run<C>(
    config: &Config,
    source: &dyn ReadingSource,
    transport: Arc<dyn Transport>,
    connection: C,
    mut shutdown: watch::Receiver<()>,
) -> Result<(), LifecycleError>
where
    C: BusConnection + 'static,
{
    let mut tracker = Tracker::new();

    let readings = source.fetch().await.map_err(LifecycleError::InitialFetch)?;
    log::info!("Initial fetch returned {} readings", readings.len());

    tracker.enter(LifecycleState::Connecting);
    let mut connection_task: JoinHandle<Result<(), BusError>> = tokio::spawn(maintain_connection(
        connection,
        config.reconnect_delay,
        shutdown.clone(),
    ));

    // Registration and the first publish pass can stall on a full request
    // buffer while the broker is unreachable, so they yield to shutdown.
    let startup = async {
        let registry =
            Registry::build(&readings, &config.selector, config.layout, transport).await;
        let missing = config.selector.unmatched(&readings);
        if !missing.is_empty() {
            let kind = match config.selector.field() {
                "Name" => "names",
                _ => "IDs",
            };
            log::warn!("Station {} {} could not be found", kind, missing.join(", "));
        }
        log::info!("Publishing {} stations", registry.len());
        updater::apply(&readings, &registry).await;
        registry
    };
    let registry = tokio::select! {
        registry = startup => Some(registry),
        _ = shutdown.changed() => None,
    };

    let exit = match registry {
        Some(registry) => {
            tracker.enter(LifecycleState::Running);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break Exit::Shutdown,
                    result = &mut connection_task => break Exit::ConnectionEnded(result),
                    _ = tokio::time::sleep(config.poll_interval) => {
                        poll_once(source, &registry).await;
                    }
                }
            }
        }
        None => Exit::Shutdown,
    };

    let result = match exit {
        Exit::Shutdown => {
            log::info!("Shutting down");
            tracker.enter(LifecycleState::Draining);
            match tokio::time::timeout(config.reconnect_delay, &mut connection_task).await {
                Ok(Ok(Err(e))) => log::warn!("MQTT: {}", e),
                Ok(Err(e)) => log::warn!("MQTT connection task failed: {}", e),
                Ok(Ok(Ok(()))) => {}
                Err(_) => connection_task.abort(),
            }
            Ok(())
        }
        // The connection task only ends cleanly once shutdown was signalled.
        Exit::ConnectionEnded(Ok(Ok(()))) => {
            tracker.enter(LifecycleState::Draining);
            Ok(())
        }
        Exit::ConnectionEnded(Ok(Err(e))) => Err(LifecycleError::Bus(e)),
        Exit::ConnectionEnded(Err(e)) => Err(LifecycleError::Task(e.to_string())),
    };

    tracker.enter(LifecycleState::Stopped);
    result
}

async fn poll_once(source: &dyn ReadingSource, registry: &Registry) {
    match source.fetch().await {
        Ok(readings) => {
            log::debug!("Fetched {} readings", readings.len());
            updater::apply(&readings, registry).await;
        }
        Err(e) => log::error!("Failed to fetch weather data: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MqttConfig, SessionEnd};
    use crate::fetcher::DEFAULT_ENDPOINT;
    use crate::registry::DeviceLayout;
    use crate::schema::SchemaVersion;
    use crate::selector::StationSelector;
    use crate::testing::{reading, RecordingTransport, ScriptedConnection, ScriptedSource};
    use std::sync::atomic::Ordering;

    const TEMPERATURE_TOPIC: &str = "sensor/temperature/1/currentTemperature/get";

    fn config(poll_interval: Duration, reconnect_delay: Duration) -> Config {
        Config {
            token: "token".to_string(),
            selector: StationSelector::Single("1".to_string()),
            schema: SchemaVersion::default(),
            layout: DeviceLayout::SensorPair,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            poll_interval,
            reconnect_delay,
            max_sample_age: Duration::from_secs(3600),
            request_timeout: Duration::from_secs(30),
            mqtt: MqttConfig::default(),
        }
    }

    fn spawn_run(
        config: Config,
        source: Arc<ScriptedSource>,
        transport: Arc<RecordingTransport>,
        connection: ScriptedConnection,
        shutdown: watch::Receiver<()>,
    ) -> JoinHandle<Result<(), LifecycleError>> {
        tokio::spawn(async move {
            run(&config, source.as_ref(), transport, connection, shutdown).await
        })
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_initial_fetch_failure_is_fatal() {
        let (_tx, rx) = watch::channel(());
        let source = ScriptedSource::new(vec![Err(FetchError::Unauthorized)], Vec::new());
        let transport = Arc::new(RecordingTransport::default());

        let result = run(
            &config(Duration::from_secs(3600), Duration::from_millis(10)),
            &source,
            transport.clone(),
            ScriptedConnection::new(Vec::new()),
            rx,
        )
        .await;

        assert!(matches!(
            result,
            Err(LifecycleError::InitialFetch(FetchError::Unauthorized))
        ));
        assert!(transport.announced().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_while_waiting_on_timer() {
        let (tx, rx) = watch::channel(());
        let source = Arc::new(ScriptedSource::new(Vec::new(), vec![reading("1", 4.0)]));
        let transport = Arc::new(RecordingTransport::default());
        let handle = spawn_run(
            config(Duration::from_secs(3600), Duration::from_millis(100)),
            source.clone(),
            transport.clone(),
            ScriptedConnection::new(Vec::new()),
            rx,
        );

        wait_until(|| !transport.published().is_empty()).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(source.calls(), 1);
        assert_eq!(
            transport.published()[0],
            (TEMPERATURE_TOPIC.to_string(), "4.0".to_string())
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_while_running_keeps_polling() {
        let (tx, rx) = watch::channel(());
        let source = Arc::new(ScriptedSource::new(
            vec![
                Ok(vec![reading("1", 1.0)]),
                Err(FetchError::Status {
                    status: 503,
                    reason: "Service Unavailable".to_string(),
                }),
            ],
            vec![reading("1", 5.0)],
        ));
        let transport = Arc::new(RecordingTransport::default());
        let handle = spawn_run(
            config(Duration::from_millis(20), Duration::from_millis(50)),
            source.clone(),
            transport.clone(),
            ScriptedConnection::new(Vec::new()),
            rx,
        );

        wait_until(|| source.calls() >= 3).await;
        wait_until(|| {
            transport
                .published()
                .contains(&(TEMPERATURE_TOPIC.to_string(), "5.0".to_string()))
        })
        .await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_refused_connection_is_fatal() {
        let (_tx, rx) = watch::channel(());
        let source = Arc::new(ScriptedSource::new(Vec::new(), vec![reading("1", 2.0)]));
        let transport = Arc::new(RecordingTransport::default());
        let connection = ScriptedConnection::new(vec![SessionEnd {
            connected: false,
            error: BusError::Refused("not authorized".to_string()),
        }]);
        let handle = spawn_run(
            config(Duration::from_secs(3600), Duration::from_millis(10)),
            source,
            transport,
            connection,
            rx,
        );

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(LifecycleError::Bus(BusError::Refused(_)))
        ));
    }

    #[tokio::test]
    async fn test_dropped_sessions_are_retried() {
        let (tx, rx) = watch::channel(());
        let connection = ScriptedConnection::new(vec![
            SessionEnd {
                connected: true,
                error: BusError::Connection("reset by peer".to_string()),
            },
            SessionEnd {
                connected: true,
                error: BusError::Connection("keep-alive timeout".to_string()),
            },
        ]);
        let sessions = connection.session_counter();
        let handle = tokio::spawn(maintain_connection(
            connection,
            Duration::from_millis(10),
            rx,
        ));

        wait_until(|| sessions.load(Ordering::SeqCst) >= 3).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_session_that_never_connected_is_fatal() {
        let (_tx, rx) = watch::channel(());
        let failed = || SessionEnd {
            connected: false,
            error: BusError::Connection("connection refused".to_string()),
        };
        let connection = ScriptedConnection::new(vec![failed(), failed(), failed()]);
        let sessions = connection.session_counter();
        let handle = tokio::spawn(maintain_connection(
            connection,
            Duration::from_millis(5),
            rx,
        ));

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(BusError::Connection(_))));
        assert_eq!(sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unreachable_broker_stops_daemon() {
        let (_tx, rx) = watch::channel(());
        let source = Arc::new(ScriptedSource::new(Vec::new(), vec![reading("1", 2.0)]));
        let connection = ScriptedConnection::new(vec![SessionEnd {
            connected: false,
            error: BusError::Connection("connection refused".to_string()),
        }]);
        let handle = spawn_run(
            config(Duration::from_secs(3600), Duration::from_millis(10)),
            source,
            Arc::new(RecordingTransport::default()),
            connection,
            rx,
        );

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(LifecycleError::Bus(BusError::Connection(_)))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_reconnect_delay() {
        let (tx, rx) = watch::channel(());
        let connection = ScriptedConnection::new(vec![SessionEnd {
            connected: true,
            error: BusError::Connection("reset by peer".to_string()),
        }]);
        let sessions = connection.session_counter();
        let handle = tokio::spawn(maintain_connection(
            connection,
            Duration::from_secs(3600),
            rx,
        ));

        wait_until(|| sessions.load(Ordering::SeqCst) >= 1).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(sessions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_during_stalled_registration() {
        let (tx, rx) = watch::channel(());
        let source = Arc::new(ScriptedSource::new(Vec::new(), vec![reading("1", 2.0)]));
        let transport = Arc::new(RecordingTransport::stalled());
        let handle = spawn_run(
            config(Duration::from_secs(3600), Duration::from_millis(50)),
            source.clone(),
            transport.clone(),
            ScriptedConnection::new(Vec::new()),
            rx,
        );

        wait_until(|| source.calls() >= 1).await;
        tx.send(()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
        assert!(transport.published().is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(LifecycleState::Starting.to_string(), "starting");
        assert_eq!(LifecycleState::Draining.to_string(), "draining");
    }
}
