//! Process wiring.
//!
//! [`Runtime`] owns one instance of every component, spawns the long-lived
//! loops (admission worker, session events, health monitor, keep-alive,
//! janitor, panic-restart listener) and tears them down on SIGINT/SIGTERM.

use crate::admission::{
    AdmissionPipeline, AdmissionPolicy, AdmissionQueue, GenerationSettings, Janitor,
    SenderStateStore, SpamDetector,
};
use crate::channels::gateway::{self, GatewayState};
use crate::channels::traits::{MessagingClient, SessionDriver, SessionEvent};
use crate::channels::whatsapp::WhatsAppClient;
use crate::config::BotConfig;
use crate::error::{BotError, Result};
use crate::generator::{GeminiGenerator, ResponseGenerator};
use crate::supervisor::health::DeploymentState;
use crate::supervisor::{
    ConnectionSupervisor, CredentialStore, ExitProcess, HealthMonitor, KeepAliveProber,
    ProcessControl, SessionDirStore, SharedHealth, SupervisorSettings,
};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long `stop` waits for spawned loops to finish.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

static PANIC_HOOK: Once = Once::new();

/// External collaborators the runtime is assembled from.
pub struct Collaborators {
    pub messenger: Arc<dyn MessagingClient>,
    pub driver: Arc<dyn SessionDriver>,
    pub credentials: Arc<dyn CredentialStore>,
    pub generator: Arc<dyn ResponseGenerator>,
    pub process: Arc<dyn ProcessControl>,
    /// Set when the WhatsApp webhook routes should be served.
    pub whatsapp: Option<Arc<WhatsAppClient>>,
    pub session_events: mpsc::Receiver<SessionEvent>,
}

pub struct Runtime {
    config: BotConfig,
    shutdown: CancellationToken,
    health: SharedHealth,
    queue: Arc<AdmissionQueue>,
    pipeline: Arc<AdmissionPipeline>,
    janitor: Arc<Janitor>,
    supervisor: Arc<ConnectionSupervisor>,
    whatsapp: Option<Arc<WhatsAppClient>>,
    session_events: Option<mpsc::Receiver<SessionEvent>>,
    restart_tx: mpsc::UnboundedSender<String>,
    restart_rx: Option<mpsc::UnboundedReceiver<String>>,
}

impl Runtime {
    /// Build the production runtime: WhatsApp Cloud API, Gemini, on-disk session.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] when the configuration fails validation.
    pub fn from_config(config: BotConfig) -> Result<Self> {
        config.validate()?;

        let (events_tx, events_rx) = mpsc::channel(32);
        let whatsapp = Arc::new(WhatsAppClient::new(&config.whatsapp, events_tx));
        let sessions = SessionDirStore::new(&config.supervisor.session_dir);
        if sessions.exists() {
            info!(dir = %sessions.dir().display(), "resuming saved session");
        }
        let generator = Arc::new(GeminiGenerator::new(&config.generator)?);

        Self::new(
            config,
            Collaborators {
                messenger: whatsapp.clone(),
                driver: whatsapp.clone(),
                credentials: Arc::new(sessions),
                generator,
                process: Arc::new(ExitProcess),
                whatsapp: Some(whatsapp),
                session_events: events_rx,
            },
        )
    }

    /// Assemble the runtime around the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] if the spam patterns fail to compile.
    pub fn new(config: BotConfig, collaborators: Collaborators) -> Result<Self> {
        let shutdown = CancellationToken::new();
        let health = SharedHealth::new(config.health.error_log_capacity);
        let state = Arc::new(Mutex::new(SenderStateStore::new()));
        let spam = SpamDetector::new()
            .map_err(|e| BotError::Config(format!("spam patterns: {e}")))?;

        let pipeline = Arc::new(AdmissionPipeline::new(
            AdmissionPolicy::new(config.admission.clone(), spam),
            Arc::clone(&state),
            collaborators.messenger,
            Arc::clone(&collaborators.generator),
            health.clone(),
            GenerationSettings {
                timeout: config.generator.timeout(),
                max_timeout_retries: config.generator.max_timeout_retries,
            },
            shutdown.clone(),
        ));
        let janitor = Arc::new(Janitor::new(
            state,
            collaborators.generator,
            &config.admission,
            &config.janitor,
        ));
        let supervisor = Arc::new(ConnectionSupervisor::new(
            collaborators.driver,
            collaborators.credentials,
            health.clone(),
            collaborators.process,
            SupervisorSettings::from(&config.supervisor),
            shutdown.clone(),
        ));
        let (restart_tx, restart_rx) = mpsc::unbounded_channel();

        Ok(Self {
            queue: Arc::new(AdmissionQueue::new(config.admission.queue_capacity)),
            config,
            shutdown,
            health,
            pipeline,
            janitor,
            supervisor,
            whatsapp: collaborators.whatsapp,
            session_events: Some(collaborators.session_events),
            restart_tx,
            restart_rx: Some(restart_rx),
        })
    }

    pub fn health(&self) -> &SharedHealth {
        &self.health
    }

    pub fn queue(&self) -> &Arc<AdmissionQueue> {
        &self.queue
    }

    pub fn pipeline(&self) -> &Arc<AdmissionPipeline> {
        &self.pipeline
    }

    pub fn supervisor(&self) -> &Arc<ConnectionSupervisor> {
        &self.supervisor
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn gateway_state(&self) -> GatewayState {
        let token = self.config.server.admin_token.trim();
        GatewayState {
            queue: Arc::clone(&self.queue),
            pipeline: Arc::clone(&self.pipeline),
            janitor: Arc::clone(&self.janitor),
            health: self.health.clone(),
            whatsapp: self.whatsapp.clone(),
            bearer_token: (!token.is_empty()).then(|| token.to_owned()),
        }
    }

    /// Sender used to ask for a supervised restart from outside the loops.
    pub fn restart_requests(&self) -> mpsc::UnboundedSender<String> {
        self.restart_tx.clone()
    }

    /// Spawn every background loop and the initial session start.
    ///
    /// Calling it twice spawns nothing the second time.
    pub fn start(&mut self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        let (Some(events), Some(mut restarts)) =
            (self.session_events.take(), self.restart_rx.take())
        else {
            warn!("runtime already started");
            return handles;
        };

        handles.push(tokio::spawn(Arc::clone(&self.queue).run_when_connected(
            Arc::clone(&self.pipeline) as Arc<dyn crate::admission::MessageProcessor>,
            self.health.watch_connection(),
            self.shutdown.clone(),
        )));
        handles.push(tokio::spawn(Arc::clone(&self.supervisor).run_events(events)));
        handles.push(
            HealthMonitor::new(
                self.health.clone(),
                Arc::clone(&self.supervisor),
                &self.config.health,
            )
            .run(self.shutdown.clone()),
        );
        if self.config.keepalive.url.trim().is_empty() {
            info!("keep-alive disabled, no probe URL configured");
        } else {
            handles.push(
                Arc::new(KeepAliveProber::new(
                    &self.config.keepalive,
                    self.health.clone(),
                    Arc::clone(&self.supervisor),
                    self.shutdown.clone(),
                ))
                .run(),
            );
        }
        handles.push(Arc::clone(&self.janitor).run(self.shutdown.clone()));

        let supervisor = Arc::clone(&self.supervisor);
        let health = self.health.clone();
        let shutdown = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            loop {
                let reason = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    reason = restarts.recv() => match reason {
                        Some(reason) => reason,
                        None => break,
                    },
                };
                health.record_error("runtime", reason.clone());
                if !should_escalate_panic(&supervisor, &health) {
                    info!(%reason, "restart request ignored, recovery or deployment in progress");
                    continue;
                }
                warn!(%reason, "restart requested");
                supervisor.restart_services().await;
            }
        }));

        let supervisor = Arc::clone(&self.supervisor);
        tokio::spawn(async move {
            supervisor.initialize().await;
        });

        handles
    }

    /// Graceful stop: cancel every loop, destroy the session, wait for tasks.
    pub async fn stop(&self, handles: Vec<JoinHandle<()>>) {
        self.supervisor.shutdown().await;
        let joined = tokio::time::timeout(SHUTDOWN_GRACE, async {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "background task ended abnormally");
                }
            }
        })
        .await;
        if joined.is_err() {
            warn!("background tasks did not stop in time");
        }
        info!("runtime stopped");
    }

    /// Serve the gateway and run until SIGINT/SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the gateway cannot bind its address.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let addr = format!("{}:{}", self.config.server.host, self.config.server.port);
        let listener = gateway::bind(&addr).await?;
        install_panic_hook(self.restart_requests());

        let mut handles = self.start();
        let state = self.gateway_state();
        let shutdown = self.shutdown.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = gateway::serve(listener, state, shutdown.clone()).await {
                error!(error = %e, "gateway failed");
                shutdown.cancel();
            }
        }));

        tokio::select! {
            _ = shutdown_signal() => info!("shutdown signal received"),
            _ = self.shutdown.cancelled() => {}
        }
        self.stop(handles).await;
        Ok(())
    }
}

/// Whether a restart request should be acted on: not while a reconnection
/// or restart is running, and not during a deployment.
pub fn should_escalate_panic(supervisor: &ConnectionSupervisor, health: &SharedHealth) -> bool {
    !supervisor.is_recovering() && health.deployment_state() != DeploymentState::InProgress
}

/// Log panics and ask for a supervised restart. Installed once per process.
///
/// The hook takes no locks; the restart listener decides whether to act.
pub fn install_panic_hook(requests: mpsc::UnboundedSender<String>) {
    PANIC_HOOK.call_once(|| {
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            error!(panic = %info, "unhandled panic");
            let _ = requests.send(format!("panic: {info}"));
            default_hook(info);
        }));
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
