use std::sync::Mutex;

use serde_json::Value;

/// Help context of the most recently activated node, for the help/feedback
/// side panel.
#[derive(Debug, Default)]
pub struct HelpContextStore {
    current: Mutex<Option<Value>>,
}

impl HelpContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, help_context: Option<Value>) {
        *self
            .current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = help_context;
    }

    pub fn current(&self) -> Option<Value> {
        self.current
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}
