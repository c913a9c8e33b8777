//! Host service wiring.
//!
//! Builds every component from [`HostConfig`] and runs the capture loop
//! next to the stream server until the shutdown token fires.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use deskcast_core::{
    CaptureService, CaptureSource, DeskError, FrameSink, InputReplayer, JpegFrameEncoder,
    OsInputReplayer, ReplayDispatcher, SessionManager, StreamServer, TestPatternSource,
    TracingReplayer,
};

use crate::config::{CaptureBackend, CaptureSettings, HostConfig, InputConfig};

// ── HostService ──────────────────────────────────────────────────

/// The top-level deskcast host.
pub struct HostService {
    config: HostConfig,
}

impl HostService {
    /// `config` is normalized before use.
    pub fn new(config: HostConfig) -> Self {
        Self {
            config: config.normalized(),
        }
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// 1. Starts the input replay thread.
    /// 2. Binds the WebSocket listener (failure is fatal).
    /// 3. Opens the capture source and spawns the capture loop.
    /// 4. Serves viewers; on shutdown, closes them with 1001 and waits
    ///    for the in-flight capture tick.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), DeskError> {
        let replay = ReplayDispatcher::spawn(build_replayer(&self.config.input))?;
        let manager = Arc::new(SessionManager::new(self.config.manager_config(), replay));

        let server = StreamServer::bind(self.config.bind_addr(), Arc::clone(&manager)).await?;
        let source = build_source(&self.config.capture)?;
        if self.config.capture.send_cursor {
            info!("cursor overlay requested; not rendered in this version");
        }

        let sink: Arc<dyn FrameSink> = manager;
        let capture = CaptureService::new(
            source,
            Box::new(JpegFrameEncoder::new()),
            sink,
            self.config.capture_config(),
        );
        let capture_task = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { capture.run(shutdown).await }
        });

        let served = server.serve(shutdown.clone()).await;
        // Stop the capture loop even if the server ended on its own.
        shutdown.cancel();
        if let Err(e) = capture_task.await {
            error!(error = %e, "capture loop panicked");
        }

        info!("deskcast host stopped");
        served
    }
}

// ── Component selection ──────────────────────────────────────────

fn build_replayer(input: &InputConfig) -> Box<dyn InputReplayer> {
    if !input.enabled {
        info!("input replay disabled; viewer input will only be logged");
        return Box::new(TracingReplayer::new());
    }
    match OsInputReplayer::new() {
        Ok(replayer) => Box::new(replayer),
        Err(e) => {
            warn!(error = %e, "OS input injection unavailable; viewer input will only be logged");
            Box::new(TracingReplayer::new())
        }
    }
}

fn build_source(capture: &CaptureSettings) -> Result<Box<dyn CaptureSource>, DeskError> {
    match capture.source {
        CaptureBackend::TestPattern => {
            info!(
                width = capture.pattern_width,
                height = capture.pattern_height,
                "using test-pattern capture source"
            );
            Ok(Box::new(TestPatternSource::new(
                capture.pattern_width,
                capture.pattern_height,
            )))
        }
        CaptureBackend::Native => native_source(capture),
    }
}

#[cfg(feature = "scrap-capture")]
fn native_source(capture: &CaptureSettings) -> Result<Box<dyn CaptureSource>, DeskError> {
    let timeout = std::time::Duration::from_millis(capture.frame_timeout_ms.max(1));
    let source = deskcast_core::stream::ScrapSource::primary(timeout)?;
    let (width, height) = source.dimensions();
    info!(width, height, "capturing primary display");
    Ok(Box::new(source))
}

#[cfg(not(feature = "scrap-capture"))]
fn native_source(_capture: &CaptureSettings) -> Result<Box<dyn CaptureSource>, DeskError> {
    Err(DeskError::Config(
        "native capture needs the `scrap-capture` feature; set capture.source = \"test-pattern\""
            .into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_input_uses_tracing_replayer() {
        let mut replayer = build_replayer(&InputConfig { enabled: false });
        let event = deskcast_core::InputEvent::KeyDown { key: "a".into() };
        assert!(replayer.replay(&event).is_ok());
    }

    #[test]
    fn test_pattern_source_has_configured_size() {
        let settings = CaptureSettings {
            source: CaptureBackend::TestPattern,
            pattern_width: 320,
            pattern_height: 200,
            ..CaptureSettings::default()
        };
        let source = build_source(&settings).unwrap();
        assert_eq!(source.dimensions(), (320, 200));
    }

    #[cfg(not(feature = "scrap-capture"))]
    #[test]
    fn native_without_feature_is_config_error() {
        let settings = CaptureSettings {
            source: CaptureBackend::Native,
            ..CaptureSettings::default()
        };
        assert!(matches!(build_source(&settings), Err(DeskError::Config(_))));
    }

    #[tokio::test]
    async fn bind_failure_is_fatal() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();

        let mut config = HostConfig::default();
        config.network.host = "127.0.0.1".into();
        config.network.port = port;
        config.capture.source = CaptureBackend::TestPattern;
        config.input.enabled = false;

        let result = HostService::new(config).run(CancellationToken::new()).await;
        assert!(matches!(result, Err(DeskError::Connection(_))));
    }

    #[tokio::test]
    async fn runs_until_cancelled() {
        let mut config = HostConfig::default();
        config.network.host = "127.0.0.1".into();
        config.network.port = 0;
        config.capture.source = CaptureBackend::TestPattern;
        config.capture.pattern_width = 64;
        config.capture.pattern_height = 48;
        config.input.enabled = false;

        let shutdown = CancellationToken::new();
        let service = HostService::new(config);
        let stopper = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_millis(200)).await;
                shutdown.cancel();
            })
        };

        tokio::time::timeout(std::time::Duration::from_secs(10), service.run(shutdown))
            .await
            .expect("host did not stop")
            .unwrap();
        stopper.await.unwrap();
    }
}
