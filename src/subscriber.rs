//! Example component: subscribes to one topic and prints every event.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use crate::client::{Event, SessionDetails, WampResult};
use crate::runner::{Component, Session, Shutdown};

pub const TOPIC: &str = "com.myapp.topic1";

/// Writes to the process stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct Console;

impl Write for Console {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()
    }
}

pub struct SubscribeComponent<W = Console> {
    received: Arc<AtomicU64>,
    out: W,
}

impl SubscribeComponent {
    pub fn new() -> Self {
        Self::with_output(Console)
    }
}

impl Default for SubscribeComponent {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> SubscribeComponent<W> {
    pub fn with_output(out: W) -> Self {
        SubscribeComponent {
            received: Arc::new(AtomicU64::new(0)),
            out,
        }
    }

    /// Events received since the last join.
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

/// Renders one event as printed by the subscriber.
pub fn format_event(event: Event) -> String {
    format!(
        "args: {}\nkwargs: {}\n\n",
        Value::Array(event.args),
        Value::Object(event.kwargs)
    )
}

#[async_trait]
impl<W> Component for SubscribeComponent<W>
where
    W: Write + Clone + Send + 'static,
{
    async fn on_join(&mut self, session: &dyn Session, details: &SessionDetails) -> WampResult<()> {
        self.received = Arc::new(AtomicU64::new(0));

        let received = Arc::clone(&self.received);
        let mut out = self.out.clone();
        let on_event = move |event: Event| -> WampResult<()> {
            out.write_all(format_event(event).as_bytes())?;
            out.flush()?;
            received.fetch_add(1, Ordering::Relaxed);
            Ok(())
        };

        session.subscribe(TOPIC, Box::new(on_event)).await?;
        info!(session = details.session, topic = TOPIC, "waiting for events");
        Ok(())
    }

    fn on_disconnect(&mut self, shutdown: &Shutdown) {
        info!(received = self.received(), "disconnected");
        shutdown.stop();
    }
}
