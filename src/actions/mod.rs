pub mod api;
pub mod cooldown;
pub mod input;
pub mod keyboard;
pub mod media;
pub mod mouse;

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::config::{ActionBinding, ActionsConfig};

pub use api::ApiPlugin;
pub use cooldown::CooldownTracker;
pub use input::{InputBackend, Key, LogBackend, MouseButton, NamedKey};
pub use keyboard::KeyboardPlugin;
pub use media::MediaPlugin;
pub use mouse::MousePlugin;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressKind {
    Short,
    Long,
}

impl PressKind {
    pub fn label(self) -> &'static str {
        match self {
            PressKind::Short => "short_press",
            PressKind::Long => "long_press",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginKind {
    #[default]
    Keyboard,
    Mouse,
    Media,
    Api,
}

impl PluginKind {
    pub fn label(self) -> &'static str {
        match self {
            PluginKind::Keyboard => "keyboard",
            PluginKind::Mouse => "mouse",
            PluginKind::Media => "media",
            PluginKind::Api => "api",
        }
    }
}

/// What the state machine asks the dispatcher to run.
#[derive(Clone, Debug, PartialEq)]
pub struct ActionRequest {
    pub gesture: String,
    pub press: PressKind,
    pub confidence: f32,
    /// How long the gesture had been held when the request was made.
    pub held_for: Duration,
}

impl ActionRequest {
    pub fn new(gesture: impl Into<String>, press: PressKind, confidence: f32) -> Self {
        Self {
            gesture: gesture.into(),
            press,
            confidence,
            held_for: Duration::ZERO,
        }
    }

    pub fn with_held_for(mut self, held_for: Duration) -> Self {
        self.held_for = held_for;
        self
    }
}

/// Context handed to a plugin for one execution.
#[derive(Clone, Copy, Debug)]
pub struct ActionContext<'a> {
    pub action: &'a str,
    pub gesture: &'a str,
    pub press: PressKind,
    pub confidence: f32,
    pub held_for: Duration,
}

impl<'a> ActionContext<'a> {
    pub fn new(action: &'a str, request: &'a ActionRequest) -> Self {
        Self {
            action,
            gesture: &request.gesture,
            press: request.press,
            confidence: request.confidence,
            held_for: request.held_for,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub executed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds left before the same gesture/command pair may fire again.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cooldown_remaining: Option<f32>,
}

impl ActionOutcome {
    pub fn executed(action_type: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            executed: true,
            action_type: Some(action_type.into()),
            command: Some(command.into()),
            ..Self::default()
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..Self::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }

    pub fn cooling_down(remaining: Duration) -> Self {
        Self {
            cooldown_remaining: Some(remaining.as_secs_f32()),
            ..Self::skipped("cooldown")
        }
    }

    pub fn with_action_type(mut self, action_type: impl Into<String>) -> Self {
        self.action_type = Some(action_type.into());
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Receives the short and long presses produced by the state machine.
pub trait ActionDispatcher: Send {
    fn dispatch(&mut self, request: &ActionRequest) -> anyhow::Result<ActionOutcome>;

    /// Whether a long-press action exists for `gesture`.
    fn has_long_press(&self, gesture: &str) -> bool;

    fn reconfigure(&mut self, _config: &ActionsConfig) {}
}

pub type ActionCallback = Box<dyn FnMut(&ActionRequest) -> anyhow::Result<ActionOutcome> + Send>;

/// Dispatcher backed by closures registered per gesture.
#[derive(Default)]
pub struct CallbackTable {
    short: HashMap<String, ActionCallback>,
    long: HashMap<String, ActionCallback>,
}

impl CallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, gesture: impl Into<String>, callback: F)
    where
        F: FnMut(&ActionRequest) -> anyhow::Result<ActionOutcome> + Send + 'static,
    {
        let gesture = gesture.into();
        log::debug!("registered short-press callback for {gesture}");
        self.short.insert(gesture, Box::new(callback));
    }

    pub fn register_long_press<F>(&mut self, gesture: impl Into<String>, callback: F)
    where
        F: FnMut(&ActionRequest) -> anyhow::Result<ActionOutcome> + Send + 'static,
    {
        let gesture = gesture.into();
        log::debug!("registered long-press callback for {gesture}");
        self.long.insert(gesture, Box::new(callback));
    }
}

impl ActionDispatcher for CallbackTable {
    fn dispatch(&mut self, request: &ActionRequest) -> anyhow::Result<ActionOutcome> {
        let table = match request.press {
            PressKind::Short => &mut self.short,
            PressKind::Long => &mut self.long,
        };
        match table.get_mut(&request.gesture) {
            Some(callback) => callback(request),
            None => Ok(ActionOutcome::skipped("no_callback")),
        }
    }

    fn has_long_press(&self, gesture: &str) -> bool {
        self.long.contains_key(gesture)
    }
}

/// The closed set of action executors.
#[derive(Debug)]
pub enum ActionPlugin {
    Keyboard(KeyboardPlugin),
    Mouse(MousePlugin),
    Media(MediaPlugin),
    Api(ApiPlugin),
}

impl ActionPlugin {
    pub fn kind(&self) -> PluginKind {
        match self {
            ActionPlugin::Keyboard(_) => PluginKind::Keyboard,
            ActionPlugin::Mouse(_) => PluginKind::Mouse,
            ActionPlugin::Media(_) => PluginKind::Media,
            ActionPlugin::Api(_) => PluginKind::Api,
        }
    }

    pub fn execute(&mut self, ctx: &ActionContext<'_>) -> ActionOutcome {
        match self {
            ActionPlugin::Keyboard(plugin) => plugin.execute(ctx),
            ActionPlugin::Mouse(plugin) => plugin.execute(ctx),
            ActionPlugin::Media(plugin) => plugin.execute(ctx),
            ActionPlugin::Api(plugin) => plugin.execute(ctx),
        }
    }

    pub fn execute_long_press(&mut self, ctx: &ActionContext<'_>) -> ActionOutcome {
        match self {
            ActionPlugin::Keyboard(plugin) => plugin.execute_long_press(ctx),
            ActionPlugin::Mouse(plugin) => plugin.execute_long_press(ctx),
            ActionPlugin::Media(plugin) => plugin.execute_long_press(ctx),
            ActionPlugin::Api(plugin) => plugin.execute_long_press(ctx),
        }
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        match self {
            ActionPlugin::Keyboard(plugin) => plugin.set_cooldown(cooldown),
            ActionPlugin::Mouse(plugin) => plugin.set_cooldown(cooldown),
            ActionPlugin::Media(plugin) => plugin.set_cooldown(cooldown),
            ActionPlugin::Api(plugin) => plugin.set_cooldown(cooldown),
        }
    }

    pub fn available_actions(&self) -> Vec<String> {
        match self {
            ActionPlugin::Keyboard(plugin) => plugin.available_actions(),
            ActionPlugin::Mouse(plugin) => plugin.available_actions(),
            ActionPlugin::Media(plugin) => plugin.available_actions(),
            ActionPlugin::Api(plugin) => plugin.available_actions(),
        }
    }
}

/// Maps gestures to plugin commands using the configured binding table.
#[derive(Debug, Default)]
pub struct ActionRegistry {
    bindings: BTreeMap<String, ActionBinding>,
    plugins: HashMap<PluginKind, ActionPlugin>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds every plugin from `config`, routing keyboard and mouse
    /// injection through `backend`.
    pub fn from_config(config: &ActionsConfig, backend: Arc<dyn InputBackend>) -> Self {
        let mut registry = Self::new()
            .with_plugin(ActionPlugin::Keyboard(KeyboardPlugin::new(backend.clone())))
            .with_plugin(ActionPlugin::Mouse(MousePlugin::new(backend)))
            .with_plugin(ActionPlugin::Media(MediaPlugin::for_current_platform()));

        match ApiPlugin::new(&config.api_base_url, config.api_timeout_duration()) {
            Ok(plugin) => registry = registry.with_plugin(ActionPlugin::Api(plugin)),
            Err(err) => log::warn!("api action plugin unavailable: {err:?}"),
        }

        registry.apply_config(config);
        let kinds: Vec<_> = registry.plugins.keys().map(|kind| kind.label()).collect();
        log::info!("action plugins ready: {kinds:?}");
        registry
    }

    pub fn with_plugin(mut self, plugin: ActionPlugin) -> Self {
        self.plugins.insert(plugin.kind(), plugin);
        self
    }

    pub fn bind(&mut self, gesture: impl Into<String>, binding: ActionBinding) {
        self.bindings.insert(gesture.into(), binding);
    }

    /// Commands each loaded plugin understands.
    pub fn available_actions(&self) -> BTreeMap<&'static str, Vec<String>> {
        self.plugins
            .values()
            .map(|plugin| (plugin.kind().label(), plugin.available_actions()))
            .collect()
    }

    fn apply_config(&mut self, config: &ActionsConfig) {
        self.bindings = config.gesture_actions.clone();
        for plugin in self.plugins.values_mut() {
            plugin.set_cooldown(config.cooldown_duration());
        }
        if let Some(ActionPlugin::Api(api)) = self.plugins.get_mut(&PluginKind::Api) {
            if let Err(err) = api.configure(&config.api_base_url, config.api_timeout_duration()) {
                log::warn!("failed to reconfigure api plugin: {err:?}");
            }
        }
    }
}

impl ActionDispatcher for ActionRegistry {
    fn dispatch(&mut self, request: &ActionRequest) -> anyhow::Result<ActionOutcome> {
        let Some(binding) = self.bindings.get(&request.gesture) else {
            return Ok(ActionOutcome::skipped("no_mapping"));
        };
        let Some(plugin) = self.plugins.get_mut(&binding.kind) else {
            return Ok(ActionOutcome::skipped("plugin_not_found"));
        };

        let outcome = match request.press {
            PressKind::Short => plugin.execute(&ActionContext::new(&binding.action, request)),
            PressKind::Long => {
                let command = binding
                    .long_press_action
                    .as_deref()
                    .unwrap_or(&binding.action);
                plugin.execute_long_press(&ActionContext::new(command, request))
            }
        };

        if outcome.executed {
            log::info!(
                "{} {} for {} -> {}",
                binding.kind.label(),
                request.press.label(),
                request.gesture,
                outcome.command.as_deref().unwrap_or(&binding.action)
            );
        } else {
            log::debug!("action for {} not executed: {outcome:?}", request.gesture);
        }
        Ok(outcome)
    }

    fn has_long_press(&self, gesture: &str) -> bool {
        self.bindings.contains_key(gesture)
    }

    fn reconfigure(&mut self, config: &ActionsConfig) {
        self.apply_config(config);
        log::info!("action bindings reloaded ({} gestures)", self.bindings.len());
    }
}
