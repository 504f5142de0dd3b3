//! Format layer construction

use tracing::Subscriber;
use tracing_subscriber::Layer;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::registry::LookupSpan;

use crate::config::{DisplayConfig, Format, WriterConfig};

/// Boxed so every format/timer combination has one type.
pub(super) type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

pub(super) fn make_writer(writer: WriterConfig) -> BoxMakeWriter {
    match writer {
        WriterConfig::Stderr => BoxMakeWriter::new(std::io::stderr),
        WriterConfig::Stdout => BoxMakeWriter::new(std::io::stdout),
    }
}

pub(super) fn fmt_layer<S>(format: Format, display: &DisplayConfig, writer: BoxMakeWriter) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(display.colors)
        .with_target(display.target)
        .with_file(display.source)
        .with_line_number(display.source)
        .with_thread_ids(display.thread_ids);

    match (format, display.time) {
        (Format::Pretty, true) => layer.pretty().boxed(),
        (Format::Pretty, false) => layer.pretty().without_time().boxed(),
        (Format::Compact, true) => layer.compact().boxed(),
        (Format::Compact, false) => layer.compact().without_time().boxed(),
        (Format::Json, true) => layer.json().flatten_event(true).boxed(),
        (Format::Json, false) => layer.json().flatten_event(true).without_time().boxed(),
    }
}
