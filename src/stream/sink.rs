//! Callback adapter between decoded events and the caller's token sink.

use std::any::Any;
use std::error::Error;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};

use tracing::warn;

use crate::stream::proto::InboundEvent;

pub type SinkError = Box<dyn Error + Send + Sync>;

/// Receives `(content, finished)` pairs for every delivered event.
///
/// Error events arrive as `("Error: <message>", true)`. Closures of shape
/// `FnMut(&str, bool)` implement this trait directly.
pub trait TokenSink {
    fn on_token(&mut self, content: &str, finished: bool) -> Result<(), SinkError>;
}

impl<F> TokenSink for F
where
    F: FnMut(&str, bool),
{
    fn on_token(&mut self, content: &str, finished: bool) -> Result<(), SinkError> {
        self(content, finished);
        Ok(())
    }
}

/// Echoes tokens to a writer, newline-terminated once the stream finishes.
#[derive(Debug)]
pub struct ConsoleSink<W = io::Stdout> {
    out: W,
}

impl ConsoleSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TokenSink for ConsoleSink<W> {
    fn on_token(&mut self, content: &str, finished: bool) -> Result<(), SinkError> {
        self.out.write_all(content.as_bytes())?;
        if finished {
            self.out.write_all(b"\n")?;
        }
        self.out.flush()?;
        Ok(())
    }
}

/// Result of handing one event to the sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    SinkFailed,
}

enum Target<'a> {
    Sink(&'a mut (dyn TokenSink + Send + 'a)),
    Console(ConsoleSink<io::Stdout>),
}

/// Forwards events to a sink while isolating its failures.
///
/// A sink that returns an error or panics is logged and counted; delivery
/// continues and the owning session still tears its connection down.
pub struct CallbackAdapter<'a> {
    target: Target<'a>,
    delivered: usize,
    failures: usize,
}

impl<'a> CallbackAdapter<'a> {
    pub fn with_sink<K>(sink: &'a mut K) -> Self
    where
        K: TokenSink + Send + 'a,
    {
        Self {
            target: Target::Sink(sink),
            delivered: 0,
            failures: 0,
        }
    }

    /// Fallback used when the caller supplies no sink.
    pub fn console() -> Self {
        Self {
            target: Target::Console(ConsoleSink::stdout()),
            delivered: 0,
            failures: 0,
        }
    }

    pub fn deliver(&mut self, event: &InboundEvent) -> Delivery {
        let outcome = match event {
            InboundEvent::Token(token) => self.invoke(&token.content, token.finished),
            InboundEvent::Error(error) => self.invoke(&error.formatted(), true),
        };
        self.delivered += 1;
        outcome
    }

    /// Events handed to the sink so far, failed or not.
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    fn invoke(&mut self, content: &str, finished: bool) -> Delivery {
        let sink: &mut dyn TokenSink = match &mut self.target {
            Target::Sink(sink) => &mut **sink,
            Target::Console(console) => console,
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| sink.on_token(content, finished)));
        match result {
            Ok(Ok(())) => Delivery::Delivered,
            Ok(Err(error)) => {
                self.failures += 1;
                warn!(event = "sink_failed", finished, error = %error);
                Delivery::SinkFailed
            }
            Err(payload) => {
                self.failures += 1;
                warn!(event = "sink_panicked", finished, panic = panic_message(&*payload));
                Delivery::SinkFailed
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
