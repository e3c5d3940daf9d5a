//! Shared fakes and runtime builders for integration tests.

use async_trait::async_trait;
use electra::channels::traits::{MessagingClient, SessionDriver, SessionEvent};
use electra::generator::{GenerateError, ResponseGenerator};
use electra::supervisor::{ConnectionState, CredentialStore, ProcessControl};
use electra::{BotConfig, Collaborators, Runtime};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Default)]
pub(crate) struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingMessenger {
    pub(crate) fn sent_to(&self, sender: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == sender)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub(crate) fn total(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl MessagingClient for RecordingMessenger {
    async fn send(&self, to: &str, text: &str) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((to.to_owned(), text.to_owned()));
        Ok(())
    }
}

/// Generator that answers from a script, then echoes the prompt.
#[derive(Default)]
pub(crate) struct ScriptedGenerator {
    script: Mutex<VecDeque<Result<String, GenerateError>>>,
    calls: AtomicU32,
}

impl ScriptedGenerator {
    pub(crate) fn push(&self, result: Result<String, GenerateError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResponseGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &str,
        _context_key: &str,
        _timeout: Duration,
    ) -> Result<String, GenerateError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Ok(format!("respuesta a {prompt}")))
    }
}

/// Session driver whose `initialize` fails a scripted number of times.
#[derive(Default)]
pub(crate) struct FlakyDriver {
    failures_left: AtomicU32,
    init_calls: AtomicU32,
    destroy_calls: AtomicU32,
}

impl FlakyDriver {
    pub(crate) fn failing(times: u32) -> Self {
        let driver = Self::default();
        driver.failures_left.store(times, Ordering::SeqCst);
        driver
    }

    pub(crate) fn init_calls(&self) -> u32 {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn destroy_calls(&self) -> u32 {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionDriver for FlakyDriver {
    fn id(&self) -> &'static str {
        "flaky"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            anyhow::bail!("browser failed to launch");
        }
        Ok(())
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct MemoryCredentials {
    clears: AtomicU32,
}

impl MemoryCredentials {
    pub(crate) fn clears(&self) -> u32 {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn clear(&self) -> electra::Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub(crate) struct RecordingProcess {
    codes: Mutex<Vec<i32>>,
}

impl RecordingProcess {
    pub(crate) fn codes(&self) -> Vec<i32> {
        self.codes.lock().unwrap().clone()
    }
}

impl ProcessControl for RecordingProcess {
    fn terminate(&self, code: i32) {
        self.codes.lock().unwrap().push(code);
    }
}

pub(crate) struct Fakes {
    pub(crate) messenger: Arc<RecordingMessenger>,
    pub(crate) generator: Arc<ScriptedGenerator>,
    pub(crate) driver: Arc<FlakyDriver>,
    pub(crate) credentials: Arc<MemoryCredentials>,
    pub(crate) process: Arc<RecordingProcess>,
    pub(crate) events: mpsc::Sender<SessionEvent>,
}

/// Config with zero supervisor delays and a valid API key.
pub(crate) fn fast_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.generator.api_key = "test-key".to_owned();
    config.supervisor.reconnect_base_delay_ms = 0;
    config.supervisor.reconnect_jitter_ms = 0;
    config.supervisor.reconnect_max_delay_ms = 0;
    config.supervisor.restart_pause_ms = 0;
    config
}

/// Build a runtime around fakes. `driver` decides how session starts behave.
pub(crate) fn build_runtime(config: BotConfig, driver: FlakyDriver) -> (Runtime, Fakes) {
    let (events, session_events) = mpsc::channel(16);
    let fakes = Fakes {
        messenger: Arc::new(RecordingMessenger::default()),
        generator: Arc::new(ScriptedGenerator::default()),
        driver: Arc::new(driver),
        credentials: Arc::new(MemoryCredentials::default()),
        process: Arc::new(RecordingProcess::default()),
        events,
    };
    let runtime = Runtime::new(
        config,
        Collaborators {
            messenger: fakes.messenger.clone(),
            driver: fakes.driver.clone(),
            credentials: fakes.credentials.clone(),
            generator: fakes.generator.clone(),
            process: fakes.process.clone(),
            whatsapp: None,
            session_events,
        },
    )
    .expect("runtime builds");
    (runtime, fakes)
}

/// Poll `check` until it holds or two seconds pass.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Start the runtime and report the session ready once it has been started.
///
/// The admission worker only drains the queue while connected.
pub(crate) async fn start_connected(runtime: &mut Runtime, fakes: &Fakes) -> Vec<JoinHandle<()>> {
    let handles = runtime.start();
    assert!(eventually(|| fakes.driver.init_calls() >= 1).await);
    fakes.events.send(SessionEvent::Ready).await.unwrap();
    assert!(eventually(|| runtime.health().connection_state() == ConnectionState::Connected).await);
    handles
}
