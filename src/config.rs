//! Engine configuration.

/// Knobs that change engine behavior across a whole case instance.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Whether custom variable listeners are invoked on dispatch.
    /// Built-in bindings always run.
    pub invoke_custom_listeners: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            invoke_custom_listeners: true,
        }
    }
}

impl EngineConfig {
    /// Read configuration from the environment (with `.env` fallback).
    ///
    /// Recognized variables:
    /// - `CASEWEAVE_INVOKE_CUSTOM_LISTENERS`: `true`/`false`, default `true`.
    #[must_use]
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        let invoke_custom_listeners = std::env::var("CASEWEAVE_INVOKE_CUSTOM_LISTENERS")
            .map(|v| v.trim().eq_ignore_ascii_case("true") || v.trim() == "1")
            .unwrap_or(true);
        Self {
            invoke_custom_listeners,
        }
    }

    #[must_use]
    pub fn with_invoke_custom_listeners(mut self, invoke: bool) -> Self {
        self.invoke_custom_listeners = invoke;
        self
    }
}
