//! Host-facing translation endpoint
//!
//! `SugoiEndpoint` ties the mode decision, the process supervisor and the
//! gateway together behind the `TranslateEndpoint` hooks a host adapter calls
//! for every request.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Configuration, Mode, Settings, SettingsDelta};
use crate::error::{BridgeError, Result};
use crate::gateway::{PreparedRequest, TranslationGateway, TranslationRequest, TranslationResult};
use crate::mode;
use crate::script::materialize_server_script;
use crate::supervisor::{BackendOutputSink, LaunchSpec, ProcessSupervisor, TracingOutputSink};

/// Where fatal configuration and launch errors are shown to the user
#[cfg_attr(test, mockall::automock)]
pub trait ErrorReporter: Send + Sync {
    fn report_fatal(&self, error: &BridgeError);
}

pub struct LogErrorReporter;

impl ErrorReporter for LogErrorReporter {
    fn report_fatal(&self, error: &BridgeError) {
        error!("Failed to start Sugoi offline translator: {}", error);
    }
}

/// Per-request hooks a host calls around each translation
#[async_trait]
pub trait TranslateEndpoint: Send + Sync {
    /// Largest batch the host may put in one request
    fn max_batch_size(&self) -> usize;

    async fn is_ready(&self) -> bool;

    /// Make sure the server is running and ready. Restarts a crashed server.
    async fn before_translate(&self, cancel: &CancellationToken) -> Result<()>;

    fn create_request(&self, request: &TranslationRequest) -> Result<PreparedRequest>;

    fn extract_translation(&self, request: &TranslationRequest, raw: &str) -> Result<TranslationResult>;

    async fn shutdown(&self) -> Result<()>;
}

pub struct EndpointOptions {
    pub error_reporter: Arc<dyn ErrorReporter>,
    /// Receives server output when `log_server_messages` is set
    pub output_sink: Arc<dyn BackendOutputSink>,
    /// Where the bundled server script is written
    pub script_dir: PathBuf,
    /// Launch the server during initialization instead of on the first request
    pub start_server: bool,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            error_reporter: Arc::new(LogErrorReporter),
            output_sink: Arc::new(TracingOutputSink),
            script_dir: std::env::temp_dir(),
            start_server: true,
        }
    }
}

pub struct SugoiEndpoint {
    configuration: Configuration,
    settings_delta: SettingsDelta,
    gateway: TranslationGateway,
    supervisor: Option<ProcessSupervisor>,
}

impl SugoiEndpoint {
    /// Choose the mode, resolve the installation and launch the server in managed mode.
    /// Fatal errors go to the error reporter before they are returned.
    pub async fn initialize(settings: &Settings, options: EndpointOptions) -> Result<Self> {
        match Self::setup(settings, &options).await {
            Ok(endpoint) => Ok(endpoint),
            Err(e) => {
                if e.is_fatal() {
                    options.error_reporter.report_fatal(&e);
                }
                Err(e)
            }
        }
    }

    async fn setup(settings: &Settings, options: &EndpointOptions) -> Result<Self> {
        let init = mode::initialize(settings)?;
        let configuration = init.configuration;
        let gateway = TranslationGateway::new(
            configuration.mode,
            configuration.endpoint_url(),
            configuration.request_timeout,
        )?;

        let supervisor = match &init.resolution {
            Some(resolution) => {
                let script = materialize_server_script(settings.custom_script().as_deref(), &options.script_dir).await?;
                let spec = LaunchSpec::for_server(&resolution.layout, &script, &configuration);
                let sink = configuration
                    .log_backend_output
                    .then(|| options.output_sink.clone());

                let supervisor = ProcessSupervisor::new(spec, configuration.ready_timeout, sink);
                if options.start_server {
                    supervisor.start().await?;
                }
                Some(supervisor)
            }
            None => None,
        };

        Ok(Self::with_components(configuration, init.delta, gateway, supervisor))
    }

    /// Assemble an endpoint from already built parts
    pub fn with_components(
        configuration: Configuration,
        settings_delta: SettingsDelta,
        gateway: TranslationGateway,
        supervisor: Option<ProcessSupervisor>,
    ) -> Self {
        Self {
            configuration,
            settings_delta,
            gateway,
            supervisor,
        }
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn mode(&self) -> Mode {
        self.configuration.mode
    }

    /// Settings changed by initialization, for the host to persist
    pub fn settings_delta(&self) -> &SettingsDelta {
        &self.settings_delta
    }

    pub fn supervisor(&self) -> Option<&ProcessSupervisor> {
        self.supervisor.as_ref()
    }

    /// Run one request through the server
    pub async fn translate(&self, request: &TranslationRequest, cancel: &CancellationToken) -> Result<TranslationResult> {
        let started = Instant::now();

        self.before_translate(cancel).await?;
        let result = self.gateway.translate(request, cancel).await;

        if let Err(e) = &result {
            warn!("Translation request failed: {}", e);
        }
        if self.configuration.log_backend_output {
            info!("Translate complete {:.2}s", started.elapsed().as_secs_f64());
        }

        result
    }

    /// Translate `texts` in order, split into batches no larger than `max_batch_size`
    pub async fn translate_texts(&self, texts: &[String], cancel: &CancellationToken) -> Result<Vec<String>> {
        let mut translated = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(self.max_batch_size().max(1)) {
            let request = TranslationRequest::batch(chunk[0].clone(), chunk.to_vec());
            translated.extend(self.translate(&request, cancel).await?.into_texts());
        }

        Ok(translated)
    }
}

#[async_trait]
impl TranslateEndpoint for SugoiEndpoint {
    fn max_batch_size(&self) -> usize {
        self.configuration.max_batch_size
    }

    async fn is_ready(&self) -> bool {
        match &self.supervisor {
            Some(supervisor) => supervisor.is_ready().await,
            None => true,
        }
    }

    async fn before_translate(&self, cancel: &CancellationToken) -> Result<()> {
        let Some(supervisor) = &self.supervisor else {
            return Ok(());
        };

        supervisor.ensure_running().await?;
        supervisor.wait_ready(cancel).await
    }

    fn create_request(&self, request: &TranslationRequest) -> Result<PreparedRequest> {
        self.gateway.prepare(request)
    }

    fn extract_translation(&self, request: &TranslationRequest, raw: &str) -> Result<TranslationResult> {
        self.gateway.extract(request, raw)
    }

    /// Ask the server to close, then kill it regardless of the answer
    async fn shutdown(&self) -> Result<()> {
        let Some(supervisor) = &self.supervisor else {
            return Ok(());
        };

        if supervisor.status().await.started {
            if let Err(e) = self.gateway.request_close(self.configuration.shutdown_timeout).await {
                debug!("Close request not acknowledged: {}", e);
            }
        }

        supervisor.close().await
    }
}
