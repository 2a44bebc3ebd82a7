use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use super::{
    ActionContext, ActionOutcome,
    cooldown::CooldownTracker,
    input::{InputBackend, Key, NamedKey},
};

const DEFAULT_COOLDOWN: Duration = Duration::from_millis(500);
const DEFAULT_HOLD: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, PartialEq, Eq)]
enum KeyCommand {
    Combination(Vec<Key>),
    Single(Key),
    Text(String),
}

impl KeyCommand {
    fn parse(command: &str) -> Option<Self> {
        if command.len() > 1 && command.contains('+') {
            let keys = command
                .split('+')
                .map(Key::parse)
                .collect::<Option<Vec<_>>>()?;
            return Some(KeyCommand::Combination(keys));
        }
        if let Some(key) = Key::parse(command) {
            return Some(KeyCommand::Single(key));
        }
        (!command.is_empty()).then(|| KeyCommand::Text(command.to_string()))
    }
}

/// Key combinations (`ctrl+c`), named keys, single characters and free text.
#[derive(Debug)]
pub struct KeyboardPlugin {
    backend: Arc<dyn InputBackend>,
    cooldowns: CooldownTracker,
    hold_duration: Duration,
}

impl KeyboardPlugin {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self {
            backend,
            cooldowns: CooldownTracker::new(DEFAULT_COOLDOWN),
            hold_duration: DEFAULT_HOLD,
        }
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldowns.set_cooldown(cooldown);
        log::debug!("keyboard cooldown set to {:?}", self.cooldowns.cooldown());
    }

    pub fn set_hold_duration(&mut self, hold: Duration) {
        self.hold_duration = hold;
    }

    pub fn execute(&mut self, ctx: &ActionContext<'_>) -> ActionOutcome {
        let now = Instant::now();
        if let Some(remaining) = self.cooldowns.remaining(ctx.gesture, ctx.action, now) {
            return ActionOutcome::cooling_down(remaining);
        }

        let Some(command) = KeyCommand::parse(ctx.action) else {
            log::warn!("unknown key in keyboard command {:?}", ctx.action);
            return ActionOutcome::skipped("unknown_key")
                .with_action_type("keyboard")
                .with_command(ctx.action);
        };

        let result = match &command {
            KeyCommand::Combination(keys) => self.backend.press_keys(keys),
            KeyCommand::Single(key) => self.backend.press_keys(std::slice::from_ref(key)),
            KeyCommand::Text(text) => self.backend.type_text(text),
        };

        match result {
            Ok(()) => {
                self.cooldowns.record(ctx.gesture, ctx.action, now);
                ActionOutcome::executed("keyboard", ctx.action)
            }
            Err(err) => {
                log::warn!("keyboard action {:?} failed: {err:?}", ctx.action);
                ActionOutcome::failed(err.to_string())
                    .with_action_type("keyboard")
                    .with_command(ctx.action)
            }
        }
    }

    /// Holds a named key; anything else runs as a normal press.
    pub fn execute_long_press(&mut self, ctx: &ActionContext<'_>) -> ActionOutcome {
        let Some(key) = NamedKey::parse(ctx.action) else {
            return self.execute(ctx);
        };
        let now = Instant::now();
        if let Some(remaining) = self.cooldowns.remaining(ctx.gesture, ctx.action, now) {
            return ActionOutcome::cooling_down(remaining);
        }

        match self.backend.hold_key(Key::Named(key), self.hold_duration) {
            Ok(()) => {
                self.cooldowns.record(ctx.gesture, ctx.action, now);
                ActionOutcome::executed("keyboard_long_press", ctx.action)
            }
            Err(err) => {
                log::warn!("keyboard long press {:?} failed: {err:?}", ctx.action);
                ActionOutcome::failed(err.to_string())
                    .with_action_type("keyboard_long_press")
                    .with_command(ctx.action)
            }
        }
    }

    pub fn available_actions(&self) -> Vec<String> {
        let mut actions = vec![
            "<key>+<key> combinations".to_string(),
            "single characters".to_string(),
            "free text".to_string(),
        ];
        actions.extend(NamedKey::all_names());
        actions
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actions::{ActionRequest, PressKind, input::RecordingBackend};

    fn run(plugin: &mut KeyboardPlugin, gesture: &str, action: &str) -> ActionOutcome {
        let request = ActionRequest::new(gesture, PressKind::Short, 0.9);
        plugin.execute(&ActionContext::new(action, &request))
    }

    #[test]
    fn dispatches_each_command_shape() {
        let backend = Arc::new(RecordingBackend::default());
        let mut plugin = KeyboardPlugin::new(backend.clone());

        assert!(run(&mut plugin, "a", "ctrl+shift+t").executed);
        assert!(run(&mut plugin, "b", "space").executed);
        assert!(run(&mut plugin, "c", "x").executed);
        assert!(run(&mut plugin, "d", "hello").executed);
        assert!(run(&mut plugin, "e", "+").executed);

        assert_eq!(
            backend.events(),
            vec![
                "keys ctrl+shift+t",
                "keys space",
                "keys x",
                "type hello",
                "keys +"
            ]
        );
    }

    #[test]
    fn unknown_key_in_combination_is_not_executed() {
        let backend = Arc::new(RecordingBackend::default());
        let mut plugin = KeyboardPlugin::new(backend.clone());
        let outcome = run(&mut plugin, "palm", "ctrl+banana");
        assert!(!outcome.executed);
        assert_eq!(outcome.reason.as_deref(), Some("unknown_key"));
        assert!(backend.events().is_empty());
    }

    #[test]
    fn repeated_pair_hits_cooldown() {
        let backend = Arc::new(RecordingBackend::default());
        let mut plugin = KeyboardPlugin::new(backend.clone());
        assert!(run(&mut plugin, "palm", "space").executed);

        let outcome = run(&mut plugin, "palm", "space");
        assert!(!outcome.executed);
        assert_eq!(outcome.reason.as_deref(), Some("cooldown"));
        assert!(outcome.cooldown_remaining.unwrap() > 0.0);

        // A different command for the same gesture is independent.
        assert!(run(&mut plugin, "palm", "enter").executed);
    }

    #[test]
    fn backend_failure_is_reported_and_not_cooled_down() {
        let mut plugin = KeyboardPlugin::new(Arc::new(RecordingBackend::failing()));
        let outcome = run(&mut plugin, "palm", "space");
        assert!(!outcome.executed);
        assert!(outcome.error.is_some());
        let again = run(&mut plugin, "palm", "space");
        assert_ne!(again.reason.as_deref(), Some("cooldown"));
    }

    #[test]
    fn long_press_holds_named_keys_and_falls_back_otherwise() {
        let backend = Arc::new(RecordingBackend::default());
        let mut plugin = KeyboardPlugin::new(backend.clone());
        plugin.set_hold_duration(Duration::from_millis(250));
        let request = ActionRequest::new("palm", PressKind::Long, 0.9);

        let outcome = plugin.execute_long_press(&ActionContext::new("right", &request));
        assert_eq!(outcome.action_type.as_deref(), Some("keyboard_long_press"));
        let outcome = plugin.execute_long_press(&ActionContext::new("ctrl+right", &request));
        assert_eq!(outcome.action_type.as_deref(), Some("keyboard"));

        assert_eq!(backend.events(), vec!["hold right 250ms", "keys ctrl+right"]);
    }

    #[test]
    fn long_and_short_press_share_the_pair_cooldown() {
        let backend = Arc::new(RecordingBackend::default());
        let mut plugin = KeyboardPlugin::new(backend.clone());
        plugin.set_cooldown(Duration::from_secs(5));
        let long = ActionRequest::new("palm", PressKind::Long, 0.9);

        let first = plugin.execute_long_press(&ActionContext::new("space", &long));
        assert!(first.executed);
        let again = plugin.execute_long_press(&ActionContext::new("space", &long));
        assert_eq!(again.reason.as_deref(), Some("cooldown"));
        let short = run(&mut plugin, "palm", "space");
        assert_eq!(short.reason.as_deref(), Some("cooldown"));

        assert_eq!(backend.events(), vec!["hold space 1000ms"]);
    }
}
