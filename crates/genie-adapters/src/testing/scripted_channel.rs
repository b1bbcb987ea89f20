//! Scripted child process for deterministic testing.
//!
//! Output is scheduled on the tokio clock, so tests running with paused time
//! see the same chunk boundaries and silences on every run.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use genie_core::BridgeConfig;
use genie_proto::ChannelError;
use tokio::time::Instant;

use crate::channel::{ChannelSpawner, ChildProcessChannel};

/// Channel that replays scripted output and records every write.
///
/// Clones share state, so a test can keep one clone for inspection while the
/// session owns the other.
#[derive(Debug, Clone)]
pub struct ScriptedChannel {
    state: Arc<Mutex<ScriptState>>,
}

#[derive(Debug)]
struct ScriptState {
    created: Instant,
    pending: Vec<Scheduled>,
    replies: VecDeque<Reply>,
    pushed_back: String,
    sent: Vec<String>,
    alive: bool,
    closed: bool,
    terminations: usize,
}

#[derive(Debug)]
struct Scheduled {
    due: Instant,
    event: Event,
}

#[derive(Debug, Clone)]
enum Event {
    Output(String),
    Exit,
}

#[derive(Debug)]
struct Reply {
    trigger: String,
    events: Vec<(Duration, Event)>,
}

impl Default for ScriptedChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedChannel {
    /// Creates a live channel with nothing scheduled.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                created: Instant::now(),
                pending: Vec::new(),
                replies: VecDeque::new(),
                pushed_back: String::new(),
                sent: Vec::new(),
                alive: true,
                closed: false,
                terminations: 0,
            })),
        }
    }

    /// Schedules `text` to become readable `delay` after creation.
    pub fn with_output(self, delay: Duration, text: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            let due = state.created + delay;
            state.schedule(due, Event::Output(text.to_string()));
        }
        self
    }

    /// Queues a reply for the next write containing `trigger`.
    ///
    /// Replies are consumed in order. Chunk delays are relative to the write.
    pub fn respond_to(self, trigger: &str, chunks: Vec<(Duration, &str)>) -> Self {
        let events = chunks
            .into_iter()
            .map(|(delay, text)| (delay, Event::Output(text.to_string())))
            .collect();
        self.queue_reply(trigger, events)
    }

    /// Like [`respond_to`](Self::respond_to), then the child exits.
    pub fn respond_then_exit(self, trigger: &str, chunks: Vec<(Duration, &str)>) -> Self {
        let mut events: Vec<(Duration, Event)> = chunks
            .into_iter()
            .map(|(delay, text)| (delay, Event::Output(text.to_string())))
            .collect();
        let last = events.last().map(|(delay, _)| *delay).unwrap_or_default();
        events.push((last, Event::Exit));
        self.queue_reply(trigger, events)
    }

    fn queue_reply(self, trigger: &str, events: Vec<(Duration, Event)>) -> Self {
        self.state.lock().unwrap().replies.push_back(Reply {
            trigger: trigger.to_string(),
            events,
        });
        self
    }

    /// Kills the child immediately; buffered output stays readable.
    pub fn kill(&self) {
        self.state.lock().unwrap().alive = false;
    }

    /// Every write so far, in order.
    pub fn sent(&self) -> Vec<String> {
        self.state.lock().unwrap().sent.clone()
    }

    /// Whether any write contained `needle`.
    pub fn was_sent(&self, needle: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .sent
            .iter()
            .any(|s| s.contains(needle))
    }

    /// Number of scripted replies not yet triggered.
    pub fn remaining_replies(&self) -> usize {
        self.state.lock().unwrap().replies.len()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// How many times `terminate` found the child alive.
    pub fn terminations(&self) -> usize {
        self.state.lock().unwrap().terminations
    }
}

impl ScriptState {
    fn schedule(&mut self, due: Instant, event: Event) {
        let at = self.pending.partition_point(|s| s.due <= due);
        self.pending.insert(at, Scheduled { due, event });
    }

    /// Fires every due exit and pops at most one due output chunk.
    fn next_due(&mut self, now: Instant) -> Option<String> {
        while self.pending.first().is_some_and(|s| s.due <= now) {
            let scheduled = self.pending.remove(0);
            match scheduled.event {
                Event::Output(text) => return Some(text),
                Event::Exit => self.alive = false,
            }
        }
        None
    }
}

#[async_trait]
impl ChildProcessChannel for ScriptedChannel {
    fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ChannelError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if !state.alive {
            return Err(ChannelError::Write(io::Error::from(io::ErrorKind::BrokenPipe)));
        }

        let text = String::from_utf8_lossy(bytes).into_owned();
        let triggered = state
            .replies
            .front()
            .is_some_and(|reply| text.contains(&reply.trigger));
        if triggered && let Some(reply) = state.replies.pop_front() {
            let now = Instant::now();
            for (delay, event) in reply.events {
                state.schedule(now + delay, event);
            }
        }
        state.sent.push(text);
        Ok(())
    }

    fn read_nonblocking(&mut self, max_bytes: usize) -> Result<String, ChannelError> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(ChannelError::Closed);
        }
        if !state.pushed_back.is_empty() {
            return Ok(std::mem::take(&mut state.pushed_back));
        }

        match state.next_due(Instant::now()) {
            Some(mut text) => {
                if text.len() > max_bytes {
                    let mut split = max_bytes.max(1);
                    while !text.is_char_boundary(split) {
                        split += 1;
                    }
                    let rest = text.split_off(split);
                    let now = Instant::now();
                    state.pending.insert(
                        0,
                        Scheduled {
                            due: now,
                            event: Event::Output(rest),
                        },
                    );
                }
                Ok(text)
            }
            None if !state.alive && state.pending.is_empty() => Err(ChannelError::Closed),
            None => Ok(String::new()),
        }
    }

    fn push_back(&mut self, text: &str) {
        if !text.is_empty() {
            self.state.lock().unwrap().pushed_back.insert_str(0, text);
        }
    }

    fn is_alive(&mut self) -> bool {
        let mut state = self.state.lock().unwrap();
        // A due exit with no unread output ahead of it takes effect unread.
        let now = Instant::now();
        while state
            .pending
            .first()
            .is_some_and(|s| s.due <= now && matches!(s.event, Event::Exit))
        {
            state.pending.remove(0);
            state.alive = false;
        }
        state.alive && !state.closed
    }

    async fn terminate(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.alive {
            state.alive = false;
            state.terminations += 1;
        }
    }

    async fn close(&mut self) {
        let mut state = self.state.lock().unwrap();
        if state.alive {
            state.alive = false;
            state.terminations += 1;
        }
        state.closed = true;
    }
}

/// Hands out pre-built [`ScriptedChannel`]s, one per spawn.
#[derive(Debug, Default)]
pub struct ScriptedSpawner {
    channels: Mutex<VecDeque<ScriptedChannel>>,
    spawns: Mutex<usize>,
}

impl ScriptedSpawner {
    pub fn new(channel: ScriptedChannel) -> Self {
        Self {
            channels: Mutex::new(VecDeque::from([channel])),
            spawns: Mutex::new(0),
        }
    }

    /// A spawner whose every spawn fails.
    pub fn failing() -> Self {
        Self::default()
    }

    /// Number of spawn attempts so far.
    pub fn spawn_count(&self) -> usize {
        *self.spawns.lock().unwrap()
    }
}

impl ChannelSpawner for ScriptedSpawner {
    fn spawn(&self, config: &BridgeConfig) -> Result<Box<dyn ChildProcessChannel>, ChannelError> {
        *self.spawns.lock().unwrap() += 1;
        match self.channels.lock().unwrap().pop_front() {
            Some(channel) => Ok(Box::new(channel)),
            None => Err(ChannelError::Spawn {
                command: config.shell.clone(),
                reason: "no scripted channel left".to_string(),
            }),
        }
    }
}
