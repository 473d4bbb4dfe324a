//! Negotiator hosts: a live stdin/stdout loop and a deterministic replay

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec};

use super::commands::Cli;
use crate::config::Settings;
use crate::dispatch::message::{ClientEvent, Event, Outbound, ServerRequest};
use crate::dispatch::{Flow, Negotiator};
use crate::error::{BrokerError, Result};
use crate::negotiation::NegotiationEngine;
use crate::timer::{ManualClock, TokioScheduler};

const MAX_LINE_LEN: usize = 64 * 1024;

/// Settings from the config file, if any, with command-line overrides applied
pub fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    if let Some(accept) = cli.accept {
        settings.accept_threshold = accept;
    }
    if let Some(reject) = cli.reject {
        settings.reject_threshold = reject;
    }
    if cli.no_delay {
        settings.delay_actions.enabled = false;
    }

    settings.validate()?;
    Ok(settings)
}

/// One line of host output
#[derive(Serialize)]
#[serde(tag = "to", content = "event", rename_all = "lowercase")]
enum Emitted<'a> {
    Server(&'a ServerRequest),
    Client(&'a ClientEvent),
    /// Not consumed by the negotiator, passes through unchanged
    Forward(&'a Event),
}

impl<'a> From<&'a Outbound> for Emitted<'a> {
    fn from(outbound: &'a Outbound) -> Self {
        match outbound {
            Outbound::Server(request) => Emitted::Server(request),
            Outbound::Client(event) => Emitted::Client(event),
        }
    }
}

/// A replay script record: either an event or a clock advance
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptStep {
    Advance {
        #[serde(rename = "advanceMs")]
        advance_ms: u64,
    },
    Event(Event),
}

/// Dispatch one event, returning the output line if it is forwarded
fn dispatch(negotiator: &mut Negotiator, event: &Event) -> Result<Option<String>> {
    match negotiator.handle(event) {
        Flow::Handled => Ok(None),
        Flow::Continue => Ok(Some(serde_json::to_string(&Emitted::Forward(event))?)),
    }
}

fn drain(outbound_rx: &mut mpsc::UnboundedReceiver<Outbound>, out: &mut Vec<String>) -> Result<()> {
    while let Ok(message) = outbound_rx.try_recv() {
        out.push(serde_json::to_string(&Emitted::from(&message))?);
    }
    Ok(())
}

/// Run against stdin until it closes, with real timers
pub async fn run_live(settings: &Settings) -> Result<()> {
    let (scheduler, mut fired_rx) = TokioScheduler::new();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let engine = NegotiationEngine::new(settings, Box::new(scheduler), outbound_tx);
    let mut negotiator = Negotiator::new(engine);

    let mut lines = FramedRead::new(
        tokio::io::stdin(),
        LinesCodec::new_with_max_length(MAX_LINE_LEN),
    );
    let mut stdout = tokio::io::stdout();

    tracing::info!("Negotiator running, reading events from stdin");

    loop {
        let mut out = Vec::new();

        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Event>(line) {
                        Ok(event) => out.extend(dispatch(&mut negotiator, &event)?),
                        Err(e) => tracing::warn!("Skipping malformed event: {}", e),
                    }
                }
                Some(Err(e)) => {
                    tracing::warn!("Skipping unreadable input: {}", e);
                    continue;
                }
                None => break,
            },
            Some(fired) = fired_rx.recv() => negotiator.on_timer(fired),
        }

        drain(&mut outbound_rx, &mut out)?;
        for line in out {
            stdout.write_all(line.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
        }
        stdout.flush().await?;
    }

    tracing::info!("Input closed, stopping");
    Ok(())
}

/// Replay a script on a manual clock, returning every output line.
///
/// Timers only fire on `{"advanceMs": N}` steps, so the output is
/// the same on every run.
pub fn replay(settings: &Settings, script: &str) -> Result<Vec<String>> {
    let clock = ManualClock::new();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    let engine =
        NegotiationEngine::new(settings, Box::new(clock.clone()), outbound_tx).with_seed(0);
    let mut negotiator = Negotiator::new(engine);
    let mut out = Vec::new();

    for (index, line) in script.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let step: ScriptStep = serde_json::from_str(line).map_err(|e| {
            BrokerError::Configuration(format!("script line {}: {}", index + 1, e))
        })?;
        match step {
            ScriptStep::Advance { advance_ms } => {
                clock.advance(Duration::from_millis(advance_ms), |fired| {
                    negotiator.on_timer(fired)
                });
            }
            ScriptStep::Event(event) => out.extend(dispatch(&mut negotiator, &event)?),
        }
        drain(&mut outbound_rx, &mut out)?;
    }

    tracing::info!(
        "Replay finished in {:?} with {} pending deals",
        negotiator.engine().phase(),
        negotiator.engine().queue().pending_len()
    );
    Ok(out)
}
