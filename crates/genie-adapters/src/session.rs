//! Session lifecycle for one chat CLI process.
//!
//! A [`Session`] owns its channel. It logs in, launches the chat with the
//! instructions document in context, and then serves one logical request at
//! a time. State changes are published on a watch channel.
//!
//! Lock order is always `init_lock` before `inner`.

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use genie_core::{
    BridgeConfig, InstructionBuilder, NO_RESPONSE_NOTICE, ResponseProcessor, windows_to_wsl_path,
};
use genie_proto::{
    BridgeError, BridgeResult, CompletionReason, RawResponse, Request, SessionState,
};
use regex::Regex;
use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::channel::{ChannelSpawner, ChildProcessChannel};
use crate::completion::CompletionDetector;
use crate::keyboard::{Key, Keyboard};
use crate::pty_channel::PtySpawner;

static SHELL_PROMPTS: LazyLock<Vec<Regex>> = LazyLock::new(|| static_patterns(&[r"\$", ">", "#"]));
static LOGIN_PROMPTS: LazyLock<Vec<Regex>> =
    LazyLock::new(|| static_patterns(&["Enter Start URL", "Already logged in"]));
static REGION_PROMPT: LazyLock<Vec<Regex>> = LazyLock::new(|| static_patterns(&["Enter Region"]));
static LOGGING_IN: LazyLock<Vec<Regex>> = LazyLock::new(|| static_patterns(&[r"Logging in\.\."]));
static CHAT_PROMPT: LazyLock<Vec<Regex>> = LazyLock::new(|| static_patterns(&[">"]));
static AUTH_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Open this URL:\s*(https?://\S+)").expect("static regex"));

fn static_patterns(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("static regex"))
        .collect()
}

/// A logged-in chat CLI driven through a pseudo-terminal.
pub struct Session {
    config: BridgeConfig,
    spawner: Arc<dyn ChannelSpawner>,
    processor: ResponseProcessor,
    detector: CompletionDetector,
    model_pattern: Regex,
    instructions: InstructionBuilder,
    init_lock: Mutex<()>,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<SessionState>,
}

#[derive(Default)]
struct Inner {
    channel: Option<Box<dyn ChildProcessChannel>>,
    auth_url: Option<String>,
    model: Option<String>,
    launched: bool,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("cli_command", &self.config.cli_command)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Creates an unstarted session that spawns channels with `spawner`.
    pub fn new(config: BridgeConfig, spawner: Arc<dyn ChannelSpawner>) -> BridgeResult<Self> {
        let processor = ResponseProcessor::new(&config.marker)
            .map_err(|e| BridgeError::Config(format!("invalid marker regex: {e}")))?;
        let model_pattern = Regex::new(&config.model_pattern)
            .map_err(|e| BridgeError::Config(format!("invalid model_pattern regex: {e}")))?;
        let (state_tx, _) = watch::channel(SessionState::Unstarted);

        Ok(Self {
            detector: CompletionDetector::from_config(&config),
            instructions: InstructionBuilder::default(),
            processor,
            model_pattern,
            spawner,
            config,
            init_lock: Mutex::new(()),
            inner: Mutex::new(Inner::default()),
            state_tx,
        })
    }

    /// Creates a session that spawns the configured shell in a real PTY.
    pub fn with_pty(config: BridgeConfig) -> BridgeResult<Self> {
        Self::new(config, Arc::new(PtySpawner))
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// The sign-in URL printed by the last login, if any.
    pub async fn auth_url(&self) -> Option<String> {
        self.inner.lock().await.auth_url.clone()
    }

    /// The model the chat was launched with or last switched to.
    pub async fn current_model(&self) -> Option<String> {
        self.inner.lock().await.model.clone()
    }

    fn set_state(&self, state: SessionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Session state changed");
        }
    }

    /// Spawns the shell and runs the CLI login.
    ///
    /// Returns the sign-in URL when the CLI printed one; the session is then
    /// `AwaitingAuth`. Without a URL, or when already logged in, it is
    /// `Ready`. Calling it again returns the stored URL.
    pub async fn login(&self) -> BridgeResult<Option<String>> {
        let _init = self.init_lock.lock().await;
        self.login_locked().await
    }

    async fn login_locked(&self) -> BridgeResult<Option<String>> {
        match self.state() {
            SessionState::Closed => return Err(BridgeError::SessionClosed),
            SessionState::Unstarted => {}
            _ => return Ok(self.inner.lock().await.auth_url.clone()),
        }

        info!(command = %self.config.login_command(), "Logging in");
        self.set_state(SessionState::Authenticating);
        let mut inner = self.inner.lock().await;

        match self.run_login(&mut inner).await {
            Ok(url) => {
                match &url {
                    Some(url) => {
                        info!(url = %url, "Open the sign-in URL to finish logging in");
                        self.set_state(SessionState::AwaitingAuth);
                    }
                    None => self.set_state(SessionState::Ready),
                }
                inner.auth_url = url.clone();
                Ok(url)
            }
            Err(e) => {
                warn!(error = %e, "Login failed");
                if let Some(mut channel) = inner.channel.take() {
                    channel.close().await;
                }
                self.set_state(SessionState::Unstarted);
                Err(BridgeError::Initialization(format!("login failed: {e}")))
            }
        }
    }

    async fn run_login(&self, inner: &mut Inner) -> BridgeResult<Option<String>> {
        let channel = inner.channel.insert(self.spawner.spawn(&self.config)?);

        let prompt = channel
            .expect(&SHELL_PROMPTS, self.config.shell_timeout())
            .await?;
        debug!(prompt = %prompt.matched, "Shell prompt detected");

        channel.send(&self.config.login_command())?;
        let answer = channel
            .expect(&LOGIN_PROMPTS, self.config.login_timeout())
            .await?;
        if answer.index == 1 {
            info!("Already logged in");
            return Ok(None);
        }

        channel.send_raw(Key::Enter.bytes())?;
        channel
            .expect(&REGION_PROMPT, self.config.login_timeout())
            .await?;
        channel.send_raw(Key::Enter.bytes())?;
        let logging_in = channel
            .expect(&LOGGING_IN, self.config.login_timeout())
            .await?;

        let url = AUTH_URL
            .captures(&logging_in.before)
            .map(|caps| caps[1].to_string());
        if url.is_none() {
            warn!("Login did not print a sign-in URL");
        }
        Ok(url)
    }

    /// Launches the chat and loads the instructions document.
    ///
    /// Logs in first when unstarted. If that login needs the user to open a
    /// URL, returns [`BridgeError::NotReady`]; call `start` again once the
    /// sign-in is done.
    pub async fn start(&self) -> BridgeResult<()> {
        self.launch_if_needed(true).await
    }

    async fn launch_if_needed(&self, after_sign_in: bool) -> BridgeResult<()> {
        let _init = self.init_lock.lock().await;

        match self.state() {
            SessionState::Closed => return Err(BridgeError::SessionClosed),
            SessionState::Unstarted => {
                self.login_locked().await?;
                if self.state() == SessionState::AwaitingAuth {
                    return Err(BridgeError::NotReady(SessionState::AwaitingAuth));
                }
            }
            SessionState::AwaitingAuth if !after_sign_in => {
                return Err(BridgeError::NotReady(SessionState::AwaitingAuth));
            }
            _ => {}
        }

        let mut inner = self.inner.lock().await;
        if inner.launched {
            return Ok(());
        }

        self.launch(&mut inner)
            .await
            .map_err(|e| BridgeError::Initialization(format!("chat launch failed: {e}")))?;
        inner.launched = true;
        inner.model = Some(self.config.default_model.clone());
        self.set_state(SessionState::Ready);
        info!(model = %self.config.default_model, "Chat ready");
        Ok(())
    }

    async fn launch(&self, inner: &mut Inner) -> BridgeResult<()> {
        let context_path = self.context_path();
        self.instructions
            .write_if_missing(&context_path)
            .map_err(|e| {
                BridgeError::Initialization(format!(
                    "cannot write {}: {e}",
                    context_path.display()
                ))
            })?;

        let channel = inner.channel.as_mut().ok_or(BridgeError::SessionClosed)?;
        channel
            .clear_buffer(self.config.flush_timeout(), self.config.max_empty_reads)
            .await;
        info!(command = %self.config.chat_command(), "Launching chat");
        channel.send(&self.config.chat_command())?;
        channel
            .expect(&CHAT_PROMPT, self.config.launch_timeout())
            .await?;

        let request = Request::new(
            format!("/context add {}", self.config.context_file.display()),
            self.config.command_timeout(),
        );
        let raw = self.exchange(inner, &request).await?;
        info!(reply = %self.render(&request, &raw)?, "Instructions added to context");
        Ok(())
    }

    fn context_path(&self) -> PathBuf {
        match &self.config.workspace_root {
            Some(root) => root.join(&self.config.context_file),
            None => self.config.context_file.clone(),
        }
    }

    /// Sends one request and waits for its reply.
    ///
    /// `timeout` defaults to the configured ask timeout. Free text runs
    /// through the extraction pipeline; commands, mentions and confirmations
    /// only through the response filter. Timeout diagnostics come back as
    /// the reply text.
    pub async fn ask(&self, text: &str, timeout: Option<Duration>) -> BridgeResult<String> {
        self.launch_if_needed(false).await?;
        let request = Request::new(text, timeout.unwrap_or_else(|| self.config.ask_timeout()));
        info!(kind = ?request.kind(), timeout_secs = request.timeout().as_secs_f64(), "Asking");

        let mut inner = self.inner.lock().await;
        let raw = self.exchange(&mut inner, &request).await?;
        self.render(&request, &raw)
    }

    /// Switches the chat to `name` through the `/model` picker.
    pub async fn select_model(&self, name: &str) -> BridgeResult<String> {
        self.launch_if_needed(false).await?;
        let request = Request::new("/model", self.config.command_timeout());

        let mut inner = self.inner.lock().await;
        let raw = self.exchange(&mut inner, &request).await?;
        let listing = self
            .processor
            .filter_reply(&request, &raw.text)
            .unwrap_or_default();
        let models = self.list_models(&listing);
        debug!(?models, "Models offered");

        let channel = inner.channel.as_mut().ok_or(BridgeError::SessionClosed)?;
        let mut keyboard = Keyboard::new(channel.as_mut());
        let Some(position) = models.iter().position(|m| m == name) else {
            warn!(model = %name, ?models, "Model not offered");
            keyboard.press(Key::Escape)?;
            return Err(BridgeError::ModelNotFound {
                model: name.to_string(),
                available: models,
            });
        };

        keyboard.navigate_menu(position, 0, true).await?;
        inner.model = Some(name.to_string());
        info!(model = %name, "Model updated");
        Ok(format!("Model updated to {name}"))
    }

    /// Model names in picker order, without duplicates.
    fn list_models(&self, listing: &str) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        for found in self.model_pattern.find_iter(listing) {
            if !models.iter().any(|m| m == found.as_str()) {
                models.push(found.as_str().to_string());
            }
        }
        models
    }

    /// Saves the conversation with `/save -f`.
    pub async fn save_conversation(&self, path: &Path) -> BridgeResult<String> {
        let command = format!("/save -f \"{}\"", self.cli_path(path));
        self.command(&command).await
    }

    /// Restores a conversation with `/load`.
    pub async fn load_conversation(&self, path: &Path) -> BridgeResult<String> {
        let command = format!("/load \"{}\"", self.cli_path(path));
        self.command(&command).await
    }

    /// Clears the conversation, confirming the prompt if the CLI asks.
    ///
    /// Returns whether the clear was confirmed.
    pub async fn clear_conversation(&self) -> BridgeResult<bool> {
        self.launch_if_needed(false).await?;
        let request = Request::new("/clear", self.config.command_timeout());

        let mut inner = self.inner.lock().await;
        let raw = self.exchange(&mut inner, &request).await?;
        let reply = self.render(&request, &raw)?;
        if !reply.contains("y/n") {
            warn!(reply = %reply, "Clear was not confirmed");
            return Ok(false);
        }

        let confirm = Request::new("y", self.config.command_timeout());
        let raw = self.exchange(&mut inner, &confirm).await?;
        debug!(reply = %self.render(&confirm, &raw)?, "Clear confirmed");
        info!("Conversation cleared");
        Ok(true)
    }

    async fn command(&self, text: &str) -> BridgeResult<String> {
        self.launch_if_needed(false).await?;
        let request = Request::new(text, self.config.command_timeout());
        let mut inner = self.inner.lock().await;
        let raw = self.exchange(&mut inner, &request).await?;
        self.render(&request, &raw)
    }

    fn cli_path(&self, path: &Path) -> String {
        let path = path.to_string_lossy();
        if self.config.wsl_paths {
            windows_to_wsl_path(&path)
        } else {
            path.into_owned()
        }
    }

    /// Busy for the duration of one send-and-collect round trip.
    async fn exchange(&self, inner: &mut Inner, request: &Request) -> BridgeResult<RawResponse> {
        let alive = match inner.channel.as_mut() {
            Some(channel) => channel.is_alive(),
            None => return Err(BridgeError::SessionClosed),
        };
        if !alive {
            warn!("Chat process is gone");
            self.mark_closed(inner).await;
            return Err(BridgeError::SessionClosed);
        }

        let previous = self.state();
        self.set_state(SessionState::Busy);
        let channel = inner.channel.as_mut().ok_or(BridgeError::SessionClosed)?;
        let flushed = channel
            .clear_buffer(self.config.flush_timeout(), self.config.max_empty_reads)
            .await;
        if !flushed.is_empty() {
            debug!(bytes = flushed.len(), "Discarded stale output");
        }

        if let Err(e) = channel.send(&request.framed()) {
            self.set_state(previous);
            return Err(e.into());
        }
        let raw = self
            .detector
            .collect(channel.as_mut(), request.timeout())
            .await;
        info!(reason = %raw.reason, bytes = raw.text.len(), "Reply collected");

        if raw.reason == CompletionReason::ChannelClosed {
            self.mark_closed(inner).await;
            if raw.text.is_empty() {
                return Err(BridgeError::SessionClosed);
            }
        } else {
            self.set_state(previous);
        }
        Ok(raw)
    }

    fn render(&self, request: &Request, raw: &RawResponse) -> BridgeResult<String> {
        if raw.is_diagnostic() {
            return Ok(raw.text.clone());
        }
        if request.kind().expects_payload() {
            return Ok(self.processor.process(request, &raw.text)?);
        }
        Ok(self
            .processor
            .filter_reply(request, &raw.text)
            .map_or_else(|| NO_RESPONSE_NOTICE.to_string(), |reply| reply.trim().to_string()))
    }

    async fn mark_closed(&self, inner: &mut Inner) {
        if let Some(mut channel) = inner.channel.take() {
            channel.close().await;
        }
        inner.launched = false;
        self.set_state(SessionState::Closed);
    }

    /// Quits the chat and releases the channel.
    ///
    /// Safe to call repeatedly; an unstarted session stays unstarted.
    pub async fn close(&self) {
        let _init = self.init_lock.lock().await;
        let mut inner = self.inner.lock().await;

        let Some(mut channel) = inner.channel.take() else {
            if self.state() != SessionState::Unstarted {
                self.set_state(SessionState::Closed);
            }
            return;
        };

        if inner.launched && channel.is_alive() {
            match channel.send("/quit") {
                Ok(()) => tokio::time::sleep(self.config.quit_grace()).await,
                Err(e) => debug!(error = %e, "Could not send /quit"),
            }
        }
        if channel.is_alive() {
            info!("Chat still running, terminating");
            channel.terminate().await;
        }
        channel.close().await;

        inner.launched = false;
        self.set_state(SessionState::Closed);
        info!("Session closed");
    }
}
