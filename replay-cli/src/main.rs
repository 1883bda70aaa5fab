mod config;
mod render;

use anyhow::{Context, Result};
use clap::Parser;
use replay_sdk::event::TimedEvent;
use replay_sdk::znc::timestamp::TimestampFormat;
use replay_sdk::{ReplaySessionFilter, Session, SessionConfig};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use crate::config::ReplayConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive("znc_replay=info".parse()?))
        .init();

    let config = ReplayConfig::parse();
    let settings = config.resolve()?;
    let format = TimestampFormat::new(&settings.timestamp_format)
        .with_context(|| format!("invalid timestamp format {:?}", settings.timestamp_format))?;

    let filter = ReplaySessionFilter::with_timestamp_format(&settings.timestamp_format)?;
    let status = filter.status();

    let (mut session, mut events) = Session::new(SessionConfig {
        nick: settings.nick.clone(),
        raw_lines: settings.raw,
    });
    session.install_filter(Box::new(filter));
    session.connected();

    if !settings.caps.is_empty() {
        let offer = format!(":znc.in CAP * LS :{}", settings.caps.join(" "));
        send(session.handle_line(&offer));
    }

    let lines = match &config.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening {}", path.display()))?;
            feed(&mut session, BufReader::new(file)).await?
        }
        None => feed(&mut session, BufReader::new(tokio::io::stdin())).await?,
    };
    tracing::info!("Fed {lines} lines");

    if status.is_active() {
        tracing::warn!(
            "Transcript ended during playback of {}",
            status.target().unwrap_or_default()
        );
    }
    session.disconnected("end of transcript");
    // Dropping the session closes every channel inbox, which ends the
    // per-channel tasks and with them the event stream.
    drop(session);

    let mut timeline: Vec<TimedEvent> = Vec::new();
    while let Some(event) = events.recv().await {
        timeline.push(event);
    }
    timeline.sort_by_key(|event| event.time);

    for event in &timeline {
        if let Some(line) = render::render(event, &format) {
            println!("{line}");
        }
    }
    Ok(())
}

async fn feed<R>(session: &mut Session, reader: R) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut count = 0;
    while let Some(line) = lines.next_line().await.context("reading transcript")? {
        if line.trim().is_empty() {
            continue;
        }
        send(session.handle_line(&line));
        count += 1;
    }
    Ok(count)
}

fn send(outgoing: Vec<String>) {
    for line in outgoing {
        tracing::info!("-> {line}");
    }
}
