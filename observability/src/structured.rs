//! The structured logger: a level- and category-filtered event stream
//! that fans out to pluggable handlers, bridging each event to
//! `tracing` as well so a process that only wired up a `tracing`
//! subscriber still sees everything.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

/// Severity, ordered `Debug < Info < Warning < Error` by declaration.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
}

/// The subsystem an event concerns, used for category filtering
/// independent of severity.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum Category {
    Connection,
    Association,
    Pdu,
    Dimse,
    Query,
    Retrieve,
    Verification,
    StateMachine,
    Performance,
    Storage,
    Audit,
}

/// One structured log event.
#[derive(Debug, Clone)]
pub struct Message {
    pub level: Level,
    pub category: Category,
    pub text: String,
    pub context: BTreeMap<String, String>,
    pub timestamp: time::OffsetDateTime,
}

/// A sink that receives every [`Message`] that passes the logger's
/// level and category filters. Handlers must not block: a slow sink is
/// the handler's own responsibility to buffer or drop from.
pub trait LogHandler: Send + Sync {
    fn handle(&self, message: &Message);
}

/// A [`LogHandler`] that forwards to `tracing`, bridging this crate's
/// filtered event stream into whatever subscriber the process has
/// installed.
pub struct TracingHandler;

impl LogHandler for TracingHandler {
    fn handle(&self, message: &Message) {
        let category = format!("{:?}", message.category);
        match message.level {
            Level::Debug => tracing::debug!(category = %category, context = ?message.context, "{}", message.text),
            Level::Info => tracing::info!(category = %category, context = ?message.context, "{}", message.text),
            Level::Warning => tracing::warn!(category = %category, context = ?message.context, "{}", message.text),
            Level::Error => tracing::error!(category = %category, context = ?message.context, "{}", message.text),
        }
    }
}

struct Filters {
    min_level: Level,
    enabled_categories: Option<HashSet<Category>>,
}

/// The process-wide structured logger. Construct one with
/// [`StructuredLogger::new`] for tests or a locally scoped instance;
/// use [`StructuredLogger::global`] for the shared singleton described
/// in the concurrency model (handlers serialize their own state, so
/// the logger itself only needs a read-mostly handler list).
pub struct StructuredLogger {
    filters: RwLock<Filters>,
    handlers: RwLock<Vec<Arc<dyn LogHandler>>>,
}

static GLOBAL: OnceLock<StructuredLogger> = OnceLock::new();

impl Default for StructuredLogger {
    fn default() -> Self {
        StructuredLogger {
            filters: RwLock::new(Filters { min_level: Level::Debug, enabled_categories: None }),
            handlers: RwLock::new(vec![Arc::new(TracingHandler)]),
        }
    }
}

impl StructuredLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide instance, created with default filters (accept
    /// everything, forward to `tracing`) on first access.
    pub fn global() -> &'static StructuredLogger {
        GLOBAL.get_or_init(StructuredLogger::default)
    }

    pub fn set_min_level(&self, level: Level) {
        self.filters.write().min_level = level;
    }

    pub fn enable_categories(&self, categories: impl IntoIterator<Item = Category>) {
        self.filters.write().enabled_categories = Some(categories.into_iter().collect());
    }

    pub fn enable_all_categories(&self) {
        self.filters.write().enabled_categories = None;
    }

    pub fn add_handler(&self, handler: Arc<dyn LogHandler>) {
        self.handlers.write().push(handler);
    }

    /// Clear the default `tracing`-only handler set, e.g. before
    /// installing application-specific sinks in a test.
    pub fn clear_handlers(&self) {
        self.handlers.write().clear();
    }

    pub fn log(&self, level: Level, category: Category, text: impl Into<String>, context: BTreeMap<String, String>) {
        let filters = self.filters.read();
        if level < filters.min_level {
            return;
        }
        if let Some(enabled) = &filters.enabled_categories {
            if !enabled.contains(&category) {
                return;
            }
        }
        drop(filters);

        let message = Message {
            level,
            category,
            text: text.into(),
            context,
            timestamp: time::OffsetDateTime::now_utc(),
        };
        for handler in self.handlers.read().iter() {
            handler.handle(&message);
        }
    }

    pub fn debug(&self, category: Category, text: impl Into<String>) {
        self.log(Level::Debug, category, text, BTreeMap::new());
    }

    pub fn info(&self, category: Category, text: impl Into<String>) {
        self.log(Level::Info, category, text, BTreeMap::new());
    }

    pub fn warn(&self, category: Category, text: impl Into<String>) {
        self.log(Level::Warning, category, text, BTreeMap::new());
    }

    pub fn error(&self, category: Category, text: impl Into<String>) {
        self.log(Level::Error, category, text, BTreeMap::new());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CapturingHandler(Mutex<Vec<Message>>);

    impl LogHandler for CapturingHandler {
        fn handle(&self, message: &Message) {
            self.0.lock().unwrap().push(message.clone());
        }
    }

    #[test]
    fn messages_below_min_level_are_dropped() {
        let logger = StructuredLogger::new();
        logger.clear_handlers();
        let capture = Arc::new(CapturingHandler(Mutex::new(Vec::new())));
        logger.add_handler(capture.clone());
        logger.set_min_level(Level::Warning);

        logger.info(Category::Connection, "connected");
        logger.error(Category::Connection, "failed");

        let captured = capture.0.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].level, Level::Error);
    }

    #[test]
    fn disabled_categories_are_filtered_even_at_error_level() {
        let logger = StructuredLogger::new();
        logger.clear_handlers();
        let capture = Arc::new(CapturingHandler(Mutex::new(Vec::new())));
        logger.add_handler(capture.clone());
        logger.enable_categories([Category::Dimse]);

        logger.error(Category::Connection, "ignored");
        logger.error(Category::Dimse, "kept");

        let captured = capture.0.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0].text, "kept");
    }
}
