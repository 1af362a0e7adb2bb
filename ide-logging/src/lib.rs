//! Process-wide `tracing` setup for the cloud-ide operator.
//!
//! Everything is driven by environment variables so the same binary can log
//! pretty output on a laptop and JSON inside the cluster:
//!
//! | variable        | values                      | default         |
//! |-----------------|-----------------------------|-----------------|
//! | `LOG_LEVEL`     | any `EnvFilter` directive   | `info`          |
//! | `LOG_FORMAT`    | `human`, `json`             | `human`         |
//! | `LOG_OUTPUT`    | `console`, `file`, `both`   | `console`       |
//! | `LOG_FILE_PATH` | path of the rolling log     | `/tmp/ide.log`  |
//! | `LOG_TAGS`      | `key:value,key:value`       | (none)          |
//!
//! `RUST_LOG` still wins over `LOG_LEVEL` when set.

use std::{collections::HashMap, env, path::Path};

use tracing::{field::Visit, span, subscriber::Interest, Metadata, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{
        self,
        writer::{BoxMakeWriter, MakeWriterExt},
    },
    layer::{Context, Layer},
    prelude::*,
    registry::LookupSpan,
    filter::Directive,
    EnvFilter,
};

/// Where formatted events are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Console,
    File,
    Both,
}

impl LogOutput {
    fn parse(raw: &str) -> Self {
        match raw {
            "file" => Self::File,
            "both" => Self::Both,
            _ => Self::Console,
        }
    }
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone)]
pub struct LogSettings {
    pub level: String,
    pub json: bool,
    pub output: LogOutput,
    pub file_path: String,
    pub tags: Vec<Tag>,
}

impl LogSettings {
    pub fn from_env() -> Self {
        let var = |name: &str, default: &str| env::var(name).unwrap_or_else(|_| default.to_string());

        Self {
            level: var("LOG_LEVEL", "info"),
            json: var("LOG_FORMAT", "human") == "json",
            output: LogOutput::parse(&var("LOG_OUTPUT", "console")),
            file_path: var("LOG_FILE_PATH", "/tmp/ide.log"),
            tags: parse_tags(&var("LOG_TAGS", "")),
        }
    }
}

/// A `key:value` span field filter. A value of `*` matches any value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// Parse `LOG_TAGS` syntax. Malformed entries are skipped.
pub fn parse_tags(raw: &str) -> Vec<Tag> {
    raw.split(',')
        .filter_map(|entry| {
            let (key, value) = entry.split_once(':')?;
            let key = key.trim();
            let value = value.trim();
            if key.is_empty() || value.is_empty() {
                return None;
            }
            Some(Tag {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

/// Drops events that are not inside a span carrying every configured tag.
///
/// Spans themselves are always enabled, otherwise the fields we filter on
/// would never be recorded.
struct TagFilterLayer {
    filters: Vec<Tag>,
}

impl<S> Layer<S> for TagFilterLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut fields = HashMap::new();
        attrs.record(&mut FieldVisitor(&mut fields));
        span.extensions_mut().insert(SpanTags(fields));
    }

    /// Whether an event passes depends on the span it fires in, so the
    /// answer can never be cached per callsite.
    fn register_callsite(&self, meta: &'static Metadata<'static>) -> Interest {
        if self.filters.is_empty() || meta.is_span() {
            Interest::always()
        } else {
            Interest::sometimes()
        }
    }

    fn enabled(&self, meta: &Metadata<'_>, ctx: Context<'_, S>) -> bool {
        if self.filters.is_empty() || meta.is_span() {
            return true;
        }

        let Some(scope) = ctx.lookup_current().map(|span| span.scope()) else {
            return false;
        };

        let mut seen: HashMap<String, String> = HashMap::new();
        for span in scope {
            if let Some(tags) = span.extensions().get::<SpanTags>() {
                for (k, v) in &tags.0 {
                    seen.entry(k.clone()).or_insert_with(|| v.clone());
                }
            }
        }

        self.filters.iter().all(|filter| {
            seen.get(&filter.key)
                .is_some_and(|value| filter.value == "*" || value.contains(&filter.value))
        })
    }
}

struct SpanTags(HashMap<String, String>);

struct FieldVisitor<'a>(&'a mut HashMap<String, String>);

impl Visit for FieldVisitor<'_> {
    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{value:?}"));
    }
}

fn env_filter(level: &str) -> EnvFilter {
    let base = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    ["tokio=warn", "hyper=warn", "tower=warn", "kube_client=info"]
        .into_iter()
        .filter_map(|d| d.parse::<Directive>().ok())
        .fold(base, |filter, directive| filter.add_directive(directive))
}

/// Initializes the global tracing subscriber based on environment variables.
///
/// The returned guard must be kept alive for as long as file logging is
/// wanted; dropping it flushes and stops the background writer. Calling this
/// twice is harmless: the second subscriber is simply not installed.
pub fn init_subscriber() -> Option<WorkerGuard> {
    init_with(LogSettings::from_env())
}

pub fn init_with(settings: LogSettings) -> Option<WorkerGuard> {
    let log_path = Path::new(&settings.file_path);
    let log_dir = log_path.parent().unwrap_or_else(|| Path::new("/tmp"));
    let log_file = log_path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "ide.log".into());

    let mut guard = None;
    let mut file_writer = || {
        let appender = tracing_appender::rolling::daily(log_dir, &log_file);
        let (non_blocking, g) = tracing_appender::non_blocking(appender);
        guard = Some(g);
        non_blocking
    };

    let writer = match settings.output {
        LogOutput::Console => BoxMakeWriter::new(std::io::stdout),
        LogOutput::File => BoxMakeWriter::new(file_writer()),
        LogOutput::Both => BoxMakeWriter::new(std::io::stdout.and(file_writer())),
    };

    let fmt_layer = if settings.json {
        fmt::layer().json().with_writer(writer).boxed()
    } else {
        fmt::layer().with_target(true).with_writer(writer).boxed()
    };

    let installed = tracing_subscriber::registry()
        .with(env_filter(&settings.level))
        .with(TagFilterLayer {
            filters: settings.tags,
        })
        .with(fmt_layer)
        .try_init();

    if installed.is_err() {
        return None;
    }
    guard
}
