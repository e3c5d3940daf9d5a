//! Shared fakes for unit tests across the admission and supervisor modules.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::channels::traits::{MessagingClient, SessionDriver};
use crate::generator::{GenerateError, ResponseGenerator};
use crate::supervisor::backoff::Backoff;
use crate::supervisor::connection::{ProcessControl, SupervisorSettings};
use crate::supervisor::session_store::CredentialStore;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

/// Session driver whose `initialize` results are scripted; unscripted calls succeed.
#[derive(Default)]
pub struct FakeDriver {
    init_results: Mutex<VecDeque<Result<(), String>>>,
    pub init_calls: AtomicU32,
    pub destroy_calls: AtomicU32,
    pub fail_destroy: AtomicBool,
}

impl FakeDriver {
    pub fn failing(times: usize) -> Self {
        let driver = Self::default();
        driver.script((0..times).map(|i| Err(format!("boom {i}"))));
        driver
    }

    pub fn script(&self, results: impl IntoIterator<Item = Result<(), String>>) {
        self.init_results.lock().unwrap().extend(results);
    }

    pub fn init_calls(&self) -> u32 {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn destroy_calls(&self) -> u32 {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionDriver for FakeDriver {
    fn id(&self) -> &'static str {
        "fake"
    }

    async fn initialize(&self) -> anyhow::Result<()> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        match self.init_results.lock().unwrap().pop_front() {
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            _ => Ok(()),
        }
    }

    async fn destroy(&self) -> anyhow::Result<()> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_destroy.load(Ordering::SeqCst) {
            anyhow::bail!("browser already gone");
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCredentials {
    pub clears: AtomicU32,
}

impl FakeCredentials {
    pub fn clears(&self) -> u32 {
        self.clears.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialStore for FakeCredentials {
    async fn clear(&self) -> crate::Result<()> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Records termination requests instead of exiting.
#[derive(Default)]
pub struct RecordingProcess {
    codes: Mutex<Vec<i32>>,
}

impl RecordingProcess {
    pub fn codes(&self) -> Vec<i32> {
        self.codes.lock().unwrap().clone()
    }
}

impl ProcessControl for RecordingProcess {
    fn terminate(&self, code: i32) {
        self.codes.lock().unwrap().push(code);
    }
}

/// Messaging client that keeps every sent reply.
#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, String)>>,
    pub fail: AtomicBool,
}

impl RecordingMessenger {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, sender: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter(|(to, _)| to == sender)
            .map(|(_, text)| text)
            .collect()
    }
}

#[async_trait]
impl MessagingClient for RecordingMessenger {
    async fn send(&self, to: &str, text: &str) -> anyhow::Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("send failed");
        }
        self.sent.lock().unwrap().push((to.to_owned(), text.to_owned()));
        Ok(())
    }
}

/// Generator with scripted results; unscripted calls echo the prompt.
#[derive(Default)]
pub struct ScriptedGenerator {
    results: Mutex<VecDeque<Result<String, GenerateError>>>,
    prompts: Mutex<Vec<String>>,
    pub delay: Mutex<Option<Duration>>,
    panic_on: Mutex<Option<String>>,
}

impl ScriptedGenerator {
    pub fn script(&self, results: impl IntoIterator<Item = Result<String, GenerateError>>) {
        self.results.lock().unwrap().extend(results);
    }

    /// Panic whenever the prompt equals `prompt`.
    pub fn panic_on(&self, prompt: &str) {
        *self.panic_on.lock().unwrap() = Some(prompt.to_owned());
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
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
        self.prompts.lock().unwrap().push(prompt.to_owned());
        let trigger = self.panic_on.lock().unwrap().clone();
        if trigger.as_deref() == Some(prompt) {
            panic!("generator crashed on {prompt:?}");
        }
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.results.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| Ok(format!("respuesta: {prompt}")))
    }
}

/// Supervisor settings with no waiting.
pub fn instant_settings(max_attempts: u32) -> SupervisorSettings {
    SupervisorSettings {
        max_attempts,
        backoff: Backoff {
            base: Duration::ZERO,
            growth: 2.0,
            max_jitter: Duration::ZERO,
            max: Duration::ZERO,
        },
        clear_credentials_after: 3,
        restart_pause: Duration::ZERO,
    }
}
