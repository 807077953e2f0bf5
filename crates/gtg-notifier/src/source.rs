// source.rs — EventSource: the upstream subscription interface.
//
// The notifier does not speak the upstream wire protocol itself. An
// EventSource only has to report its current transport session, accept
// subscribe requests, and push decoded SourceEvents into the channel it
// was given at construction.
//
// JsonLinesSource is the implementation used by the daemon: it talks to an
// external bridge process over newline-delimited JSON.
//
//   notifier → bridge stdin:   {"op":"subscribe","topic":"stream.online","session_id":"..",
//                               "entity_id":"..","user_id":null}
//   bridge stdout → notifier:  SourceEvent lines (see event.rs); a refused
//                              subscription comes back as `subscription_failed`
//
// A bridge that exits is restarted with exponential backoff. Each exit is
// reported as `session_lost`, and the restarted bridge announces its new
// session with `session_welcome`, which makes the supervisor resubscribe.

use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::SourceError;
use crate::event::{SourceEvent, Topic};

/// Upper bound for the delay between bridge restarts.
const MAX_RESTART_DELAY: Duration = Duration::from_secs(60);

/// One subscription to create on the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscribeRequest {
    pub topic: Topic,
    pub session_id: String,
    /// Entity whose events are wanted.
    pub entity_id: String,
    /// Reading user for chat subscriptions (the bot account).
    pub user_id: Option<String>,
}

/// Upstream event source.
#[async_trait]
pub trait EventSource: Send + Sync {
    /// Session subscriptions are currently scoped to, if connected.
    fn current_session_id(&self) -> Option<String>;

    /// Send one subscription request on the given session. `Ok` means the
    /// request went out; a later rejection arrives as
    /// [`SourceEvent::SubscriptionFailed`].
    async fn subscribe(&self, request: &SubscribeRequest) -> Result<(), SourceError>;
}

#[derive(Serialize)]
struct BridgeCommand<'a> {
    op: &'static str,
    #[serde(flatten)]
    request: &'a SubscribeRequest,
}

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;
type SharedWriter = Arc<tokio::sync::Mutex<Option<BoxedWriter>>>;
type SharedSession = Arc<Mutex<Option<String>>>;

/// Event source backed by a JSON-lines bridge.
pub struct JsonLinesSource {
    // None while no bridge is connected.
    writer: SharedWriter,
    session: SharedSession,
    task: JoinHandle<()>,
}

impl JsonLinesSource {
    /// Wrap an already-connected reader/writer pair. Parsed events are
    /// forwarded into `events`; once the reader ends the source is closed.
    pub fn new<R, W>(reader: R, writer: W, events: mpsc::Sender<SourceEvent>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let session: SharedSession = Arc::new(Mutex::new(None));
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(Some(Box::new(writer))));

        let task = {
            let session = Arc::clone(&session);
            let writer = Arc::clone(&writer);
            tokio::spawn(async move {
                read_events(reader, &session, &events).await;
                *writer.lock().await = None;
                report_closed(&events).await;
            })
        };

        Self {
            writer,
            session,
            task,
        }
    }

    /// Spawn the bridge command and talk to it over its stdin/stdout. If the
    /// bridge exits it is started again, waiting `restart_delay` at first and
    /// doubling up to a minute while it keeps failing.
    pub fn spawn(
        command: &str,
        args: &[String],
        restart_delay: Duration,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<Self, SourceError> {
        let bridge = BridgeProcess {
            command: command.to_string(),
            args: args.to_vec(),
        };
        // The first start is checked here so a misconfigured command fails fast.
        let first = bridge.start()?;
        tracing::info!(command, "started event bridge");

        let session: SharedSession = Arc::new(Mutex::new(None));
        let writer: SharedWriter = Arc::new(tokio::sync::Mutex::new(None));
        let task = tokio::spawn(supervise_bridge(
            bridge,
            first,
            restart_delay,
            Arc::clone(&writer),
            Arc::clone(&session),
            events,
        ));

        Ok(Self {
            writer,
            session,
            task,
        })
    }
}

impl Drop for JsonLinesSource {
    fn drop(&mut self) {
        // Dropping the task drops the child, which kills it.
        self.task.abort();
    }
}

#[async_trait]
impl EventSource for JsonLinesSource {
    fn current_session_id(&self) -> Option<String> {
        self.session
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn subscribe(&self, request: &SubscribeRequest) -> Result<(), SourceError> {
        let mut line = serde_json::to_string(&BridgeCommand {
            op: "subscribe",
            request,
        })?;
        line.push('\n');

        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(SourceError::Closed)?;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}

struct BridgeProcess {
    command: String,
    args: Vec<String>,
}

struct RunningBridge {
    child: Child,
    stdout: ChildStdout,
    stdin: BoxedWriter,
}

impl BridgeProcess {
    fn start(&self) -> Result<RunningBridge, SourceError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or(SourceError::Closed)?;
        let stdout = child.stdout.take().ok_or(SourceError::Closed)?;
        Ok(RunningBridge {
            child,
            stdout,
            stdin: Box::new(stdin),
        })
    }
}

/// Run the bridge, restarting it whenever it exits, until the event
/// receiver goes away.
async fn supervise_bridge(
    bridge: BridgeProcess,
    first: RunningBridge,
    restart_delay: Duration,
    writer: SharedWriter,
    session: SharedSession,
    events: mpsc::Sender<SourceEvent>,
) {
    let mut running = Some(first);
    let mut delay = restart_delay;

    loop {
        if let Some(RunningBridge {
            mut child,
            stdout,
            stdin,
        }) = running.take()
        {
            *writer.lock().await = Some(stdin);
            let outcome = read_events(stdout, &session, &events).await;
            *writer.lock().await = None;
            let _ = child.kill().await;

            if outcome == ReadOutcome::ReceiverGone || !report_closed(&events).await {
                return;
            }
            if outcome == ReadOutcome::HadSession {
                delay = restart_delay;
            }
        }

        tracing::warn!(command = %bridge.command, "event bridge exited, restarting in {:?}", delay);
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(MAX_RESTART_DELAY.max(restart_delay));

        match bridge.start() {
            Ok(next) => {
                tracing::info!(command = %bridge.command, "restarted event bridge");
                running = Some(next);
            }
            Err(e) => {
                tracing::warn!(command = %bridge.command, "failed to restart event bridge: {}", e);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadOutcome {
    /// The bridge closed its output without ever announcing a session.
    NoSession,
    /// The bridge closed its output after announcing a session.
    HadSession,
    /// Nobody is listening for events any more.
    ReceiverGone,
}

async fn read_events<R>(
    reader: R,
    session: &SharedSession,
    events: &mpsc::Sender<SourceEvent>,
) -> ReadOutcome
where
    R: AsyncRead + Send + Unpin,
{
    let set_session = |value: Option<String>| {
        *session.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
    };

    let mut outcome = ReadOutcome::NoSession;
    let mut lines = BufReader::new(reader).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!("event bridge read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<SourceEvent>(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("skipping unparsable bridge line: {}", e);
                continue;
            }
        };

        match &event {
            SourceEvent::SessionWelcome { session_id } => {
                set_session(Some(session_id.clone()));
                outcome = ReadOutcome::HadSession;
            }
            SourceEvent::SessionLost { .. } => set_session(None),
            SourceEvent::SubscriptionFailed { .. } | SourceEvent::Event { .. } => {}
        }
        if events.send(event).await.is_err() {
            return ReadOutcome::ReceiverGone;
        }
    }

    set_session(None);
    outcome
}

/// Tell the supervisor the bridge is gone. Returns false if nobody listens.
async fn report_closed(events: &mpsc::Sender<SourceEvent>) -> bool {
    events
        .send(SourceEvent::SessionLost {
            reason: Some("event bridge closed".to_string()),
        })
        .await
        .is_ok()
}
