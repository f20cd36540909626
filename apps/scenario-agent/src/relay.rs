//! Best-effort relay of scenario log output.
//!
//! A relay owns the tail process (`compose logs -f`) and forwards each line
//! to the orchestrator's log-ingestion endpoint and to local UI subscribers.
//! Delivery to the orchestrator is at-most-once: a failed send is logged
//! locally and the line is dropped, never retried. A relay instance is not
//! restartable; each scenario gets a fresh one.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::events::{AgentEvent, LocalEventBroadcaster};
use crate::process::ProcessHandle;

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1B(?:[@-Z\\-_]|\[[0-?]*[ -/]*[@-~])").expect("ansi pattern is valid")
});

fn strip_ansi_codes(line: &str) -> String {
    ANSI_ESCAPE.replace_all(line, "").into_owned()
}

/// Where relayed lines are pushed remotely.
#[derive(Debug, Clone)]
pub struct RelaySink {
    pub url: String,
    pub agent_name: String,
}

#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub scenario: String,
    /// `None` runs the relay local-only, with one warning about log loss.
    pub sink: Option<RelaySink>,
    /// Delay before tailing begins, tolerating a slow log stream handle.
    pub warmup: Duration,
    pub push_timeout: Duration,
    pub terminate_grace: Duration,
}

/// A running relay task. `stop` is the only way to end it early; EOF on the
/// tail ends it on its own.
pub struct LogRelay {
    stop_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl LogRelay {
    pub fn start(
        tail: ProcessHandle,
        settings: RelaySettings,
        http: reqwest::Client,
        events: LocalEventBroadcaster,
    ) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(relay_loop(tail, settings, http, events, stop_rx));
        Self {
            stop_tx: Some(stop_tx),
            task,
        }
    }

    /// Stop tailing, terminate the tail process, and join the relay task.
    /// Idempotent in effect: stopping a relay whose tail already hit EOF
    /// just joins the finished task.
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if tokio::time::timeout(Duration::from_secs(10), &mut self.task)
            .await
            .is_err()
        {
            warn!("log relay did not stop in time; aborting task");
            self.task.abort();
        }
    }
}

async fn relay_loop(
    mut tail: ProcessHandle,
    settings: RelaySettings,
    http: reqwest::Client,
    events: LocalEventBroadcaster,
    mut stop_rx: oneshot::Receiver<()>,
) {
    if settings.sink.is_none() {
        warn!(
            scenario = %settings.scenario,
            "no orchestrator registered; scenario logs stay local only"
        );
        events.publish(AgentEvent::Diagnostic {
            message: "no orchestrator registered; scenario logs are not relayed".into(),
        });
    }

    tokio::select! {
        _ = tokio::time::sleep(settings.warmup) => {}
        _ = &mut stop_rx => {
            tail.terminate(settings.terminate_grace).await;
            return;
        }
    }

    let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
    if let Some(stdout) = tail.take_stdout() {
        tokio::spawn(pump_lines(stdout, line_tx.clone()));
    }
    if let Some(stderr) = tail.take_stderr() {
        tokio::spawn(pump_lines(stderr, line_tx.clone()));
    }
    drop(line_tx);

    info!(scenario = %settings.scenario, tail = %tail.command_line(), "log relay started");

    loop {
        tokio::select! {
            _ = &mut stop_rx => {
                debug!(scenario = %settings.scenario, "log relay stop requested");
                break;
            }
            line = line_rx.recv() => match line {
                Some(raw) => deliver(&settings, &http, &events, &raw).await,
                None => {
                    info!(scenario = %settings.scenario, "log stream closed");
                    break;
                }
            }
        }
    }

    tail.terminate(settings.terminate_grace).await;
}

async fn pump_lines<R: AsyncRead + Unpin>(reader: R, tx: mpsc::Sender<String>) {
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line).await.is_err() {
            break;
        }
    }
}

async fn deliver(
    settings: &RelaySettings,
    http: &reqwest::Client,
    events: &LocalEventBroadcaster,
    raw: &str,
) {
    let line = strip_ansi_codes(raw.trim_end());

    if let Some(sink) = &settings.sink {
        let payload = json!({
            "agent_name": sink.agent_name,
            "log_line": line,
        });
        let result = http
            .post(&sink.url)
            .timeout(settings.push_timeout)
            .json(&payload)
            .send()
            .await;
        if let Err(err) = result {
            warn!(url = %sink.url, error = %err, "could not deliver log line to orchestrator");
        }
    }

    // Local broadcast is decoupled from the remote-send outcome.
    events.publish(AgentEvent::Log {
        scenario: settings.scenario.clone(),
        line,
    });
}
