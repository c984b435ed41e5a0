use std::{
    fmt::Debug,
    sync::{Arc, Mutex},
};

use serde_json::{json, Map, Value};
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_subscriber::{
    fmt::format::FmtSpan,
    layer::{Context, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

lazy_static! {
    static ref LOG_INITIALIZED: Mutex<bool> = Mutex::new(false);
}

/// Initialize logging.  If you set the environment variable `RUST_LOG` to a
/// non-empty value, we enable compact logging filtered by it; otherwise this
/// does nothing.
pub fn init_logging() {
    let mut initialized = LOG_INITIALIZED
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    if *initialized {
        return;
    }
    *initialized = true;

    // Our shell scripts frequently set RUST_LOG unconditionally but
    // potentially with an empty value, and we don't want that to be
    // interpreted as a desire to enable logging.
    let rustlog = std::env::var("RUST_LOG").unwrap_or_default();
    if rustlog.is_empty() {
        return;
    }
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(env_filter) => env_filter,
        Err(_) => return,
    };

    let layer = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
        .compact()
        // Output ends up in logs that get excerpted, so ANSI isn't helpful.
        .with_ansi(false)
        // In general we don't care about the wall time that much, and it
        // takes up a lot of columns.
        .without_time()
        .with_writer(std::io::stderr)
        .with_filter(env_filter);

    // Someone else (a test harness, an embedding host) may already own the
    // global subscriber; theirs wins.
    let _ = Registry::default().with(layer).try_init();
}

struct JsonVisitor<'a>(&'a mut Map<String, Value>);

impl<'a> Visit for JsonVisitor<'a> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.0.insert(field.name().to_string(), json!(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        self.0
            .insert(field.name().to_string(), json!(format!("{:?}", value)));
    }
}

/// Event collector rendering each event to a JSON object of its fields plus
/// `level`, for asserting on what got logged.
///
/// ```
/// use portal_nav::logging::LogCapture;
///
/// let capture = LogCapture::new();
/// tracing::subscriber::with_default(capture.subscriber(), || {
///     tracing::warn!(entity = "project", "fell back");
/// });
/// assert_eq!(capture.messages_at("WARN"), vec!["fell back".to_string()]);
/// ```
#[derive(Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<Value>>>,
}

impl LogCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// A subscriber feeding this capture; hand it to
    /// `tracing::instrument::WithSubscriber::with_subscriber` or
    /// `tracing::subscriber::with_default`.
    pub fn subscriber(&self) -> impl Subscriber + Send + Sync + 'static {
        Registry::default().with(self.clone())
    }

    pub fn events(&self) -> Vec<Value> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Messages of the events logged at `level` ("WARN", "ERROR", ...).
    pub fn messages_at(&self, level: &str) -> Vec<String> {
        self.events()
            .iter()
            .filter(|event| event["level"] == level)
            .filter_map(|event| event["message"].as_str().map(str::to_string))
            .collect()
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut obj = Map::new();
        obj.insert(
            "level".to_string(),
            json!(event.metadata().level().to_string()),
        );
        event.record(&mut JsonVisitor(&mut obj));
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(Value::Object(obj));
    }
}
