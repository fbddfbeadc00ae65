//! Progress event sinks
//!
//! The poller and the updaters emit [`ProgressEvent`]s in order; a sink
//! decides what to do with them. Every sink is closed exactly once when the
//! poll session ends, whatever the outcome.

use async_trait::async_trait;
use crossterm::{cursor, queue, terminal};
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, Write};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Width of a rendered bar, excluding brackets.
const BAR_WIDTH: usize = 50;

/// One line of progress output, addressed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    /// Unit identifier, or a fixed tag such as `overall progress`. Empty for
    /// free-standing messages.
    pub id: String,
    #[serde(rename = "status")]
    pub action: String,
    #[serde(rename = "progressDetail", skip_serializing_if = "Option::is_none")]
    pub detail: Option<ProgressDetail>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressDetail {
    pub current: i64,
    pub total: i64,
    /// Draw the bar without the `current/total` counter.
    #[serde(rename = "hidecounts")]
    pub hide_counts: bool,
}

impl ProgressEvent {
    /// A labelled line without a bar.
    pub fn action(id: impl Into<String>, action: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            detail: None,
        }
    }

    /// A bar that only shows its label, not the numeric counter.
    pub fn bar(id: impl Into<String>, action: impl Into<String>, current: i64, total: i64) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            detail: Some(ProgressDetail {
                current,
                total,
                hide_counts: true,
            }),
        }
    }

    /// A free-standing message with no id.
    pub fn message(text: impl Into<String>) -> Self {
        Self::action("", text)
    }
}

/// Consumer of progress events.
#[async_trait]
pub trait ProgressSink: Send {
    /// Deliver one event. Events arrive in emission order.
    async fn emit(&mut self, event: ProgressEvent) -> io::Result<()>;

    /// Flush everything emitted so far and release the output.
    async fn close(&mut self) -> io::Result<()>;
}

/// Drops every event. Used for `--output quiet`.
#[derive(Debug, Default)]
pub struct DiscardSink;

#[async_trait]
impl ProgressSink for DiscardSink {
    async fn emit(&mut self, _event: ProgressEvent) -> io::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Vec<ProgressEvent>,
    closed: usize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ProgressEvent] {
        &self.events
    }

    /// Actions of every event with the given id, in order.
    pub fn actions_for(&self, id: &str) -> Vec<&str> {
        self.events
            .iter()
            .filter(|e| e.id == id)
            .map(|e| e.action.as_str())
            .collect()
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.closed
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn emit(&mut self, event: ProgressEvent) -> io::Result<()> {
        self.events.push(event);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.closed += 1;
        Ok(())
    }
}

/// Writes one JSON object per event, one per line.
pub struct JsonLinesSink<W> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[async_trait]
impl<W: Write + Send> ProgressSink for JsonLinesSink<W> {
    async fn emit(&mut self, event: ProgressEvent) -> io::Result<()> {
        serde_json::to_writer(&mut self.out, &event)?;
        self.out.write_all(b"\n")
    }

    async fn close(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Human-readable renderer.
///
/// On a terminal every id owns one line, and a new event for a known id
/// rewrites that line in place. Otherwise each event is printed as it comes.
pub struct TerminalSink<W> {
    out: W,
    is_tty: bool,
    /// Line index of each id, counted from the first line written.
    rows: HashMap<String, usize>,
    lines: usize,
    /// Terminal columns. Lines are cut to fit so each id keeps one row.
    width: Option<usize>,
}

impl<W: Write + Send> TerminalSink<W> {
    pub fn new(out: W, is_tty: bool) -> Self {
        let width = if is_tty {
            terminal::size().ok().map(|(cols, _)| usize::from(cols))
        } else {
            None
        };
        Self {
            out,
            is_tty,
            rows: HashMap::new(),
            lines: 0,
            width,
        }
    }

    /// Override the detected terminal width.
    pub fn with_width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn rewrite(&mut self, row: usize, line: &str) -> io::Result<()> {
        // The cursor always rests at the start of the line after the last
        // one written.
        let distance = u16::try_from(self.lines - row).unwrap_or(u16::MAX);
        queue!(
            self.out,
            cursor::MoveUp(distance),
            cursor::MoveToColumn(0),
            terminal::Clear(terminal::ClearType::CurrentLine)
        )?;
        self.out.write_all(line.as_bytes())?;
        queue!(self.out, cursor::MoveDown(distance), cursor::MoveToColumn(0))?;
        Ok(())
    }

    fn append(&mut self, line: &str) -> io::Result<()> {
        self.out.write_all(line.as_bytes())?;
        self.out.write_all(b"\n")?;
        self.lines += 1;
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send> ProgressSink for TerminalSink<W> {
    async fn emit(&mut self, event: ProgressEvent) -> io::Result<()> {
        let mut line = render_line(&event);
        if !self.is_tty {
            return self.append(&line);
        }
        if let Some(width) = self.width.filter(|w| *w > 0) {
            if let Some((cut, _)) = line.char_indices().nth(width) {
                line.truncate(cut);
            }
        }
        if event.id.is_empty() {
            return self.append(&line);
        }
        match self.rows.get(&event.id).copied() {
            Some(row) => self.rewrite(row, &line)?,
            None => {
                self.rows.insert(event.id.clone(), self.lines);
                self.append(&line)?;
            }
        }
        self.out.flush()
    }

    async fn close(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}

/// Forwards events to a rendering worker.
///
/// Events travel over an unbounded channel, so emission never waits on the
/// renderer. `close` hangs up the channel and waits until the worker has
/// drained it and closed the inner sink.
pub struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<ProgressEvent>>,
    worker: Option<JoinHandle<io::Result<()>>>,
}

impl ChannelSink {
    /// Spawn a worker that feeds `inner`. Must be called inside a runtime.
    pub fn spawn<S: ProgressSink + 'static>(mut inner: S) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let worker = tokio::spawn(async move {
            let mut result = Ok(());
            while let Some(event) = rx.recv().await {
                if result.is_ok() {
                    result = inner.emit(event).await;
                }
            }
            let closed = inner.close().await;
            result.and(closed)
        });
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }
}

#[async_trait]
impl ProgressSink for ChannelSink {
    async fn emit(&mut self, event: ProgressEvent) -> io::Result<()> {
        let tx = self
            .tx
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "progress sink closed"))?;
        tx.send(event)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "progress renderer stopped"))
    }

    async fn close(&mut self) -> io::Result<()> {
        self.tx.take();
        match self.worker.take() {
            Some(worker) => worker.await.map_err(io::Error::other)?,
            None => Ok(()),
        }
    }
}

/// Render an event as `id: action [bar] current/total`.
pub fn render_line(event: &ProgressEvent) -> String {
    let mut line = String::new();
    if !event.id.is_empty() {
        line.push_str(&event.id);
        line.push_str(": ");
    }
    line.push_str(&event.action);
    if let Some(detail) = event.detail {
        line.push(' ');
        line.push_str(&render_bar(detail.current, detail.total));
        if !detail.hide_counts {
            line.push_str(&format!(" {}/{}", detail.current, detail.total));
        }
    }
    line
}

fn render_bar(current: i64, total: i64) -> String {
    if total <= 0 {
        return format!("[{}]", " ".repeat(BAR_WIDTH));
    }
    let current = current.clamp(0, total);
    let filled = (current as usize * BAR_WIDTH) / total as usize;
    if filled >= BAR_WIDTH {
        return format!("[{}]", "=".repeat(BAR_WIDTH));
    }
    format!(
        "[{}>{}]",
        "=".repeat(filled),
        " ".repeat(BAR_WIDTH - filled - 1)
    )
}
