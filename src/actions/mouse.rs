use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::Result;

use super::{
    ActionContext, ActionOutcome,
    cooldown::CooldownTracker,
    input::{InputBackend, MouseButton},
};

const DEFAULT_COOLDOWN: Duration = Duration::from_millis(300);
const DEFAULT_HOLD: Duration = Duration::from_secs(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MouseCommand {
    Click { button: MouseButton, count: u32 },
    MoveTo { x: i32, y: i32 },
    MoveBy { dx: i32, dy: i32 },
    Scroll { dx: i32, dy: i32 },
    DragTo { x: i32, y: i32 },
}

impl MouseCommand {
    fn parse(command: &str) -> Option<Self> {
        let parts: Vec<&str> = command.split('_').collect();
        let int = |index: usize| parts.get(index)?.parse::<i32>().ok();

        let parsed = match parts.as_slice() {
            ["left", "click"] => MouseCommand::Click {
                button: MouseButton::Left,
                count: 1,
            },
            ["right", "click"] => MouseCommand::Click {
                button: MouseButton::Right,
                count: 1,
            },
            ["middle", "click"] => MouseCommand::Click {
                button: MouseButton::Middle,
                count: 1,
            },
            ["double", "click"] => MouseCommand::Click {
                button: MouseButton::Left,
                count: 2,
            },
            ["scroll", "up"] => MouseCommand::Scroll { dx: 0, dy: 1 },
            ["scroll", "down"] => MouseCommand::Scroll { dx: 0, dy: -1 },
            ["scroll", "left"] => MouseCommand::Scroll { dx: -1, dy: 0 },
            ["scroll", "right"] => MouseCommand::Scroll { dx: 1, dy: 0 },
            ["scroll", _, _] => MouseCommand::Scroll {
                dx: int(1)?,
                dy: int(2)?,
            },
            ["move", "relative", _, _] => MouseCommand::MoveBy {
                dx: int(2)?,
                dy: int(3)?,
            },
            ["move", _, _] => MouseCommand::MoveTo {
                x: int(1)?,
                y: int(2)?,
            },
            ["drag", "to", _, _] => MouseCommand::DragTo {
                x: int(2)?,
                y: int(3)?,
            },
            _ => return None,
        };
        Some(parsed)
    }
}

/// Clicks, absolute and relative moves, scrolling and drags. Moves are
/// clamped to the screen.
#[derive(Debug)]
pub struct MousePlugin {
    backend: Arc<dyn InputBackend>,
    cooldowns: CooldownTracker,
    hold_duration: Duration,
}

impl MousePlugin {
    pub fn new(backend: Arc<dyn InputBackend>) -> Self {
        Self {
            backend,
            cooldowns: CooldownTracker::new(DEFAULT_COOLDOWN),
            hold_duration: DEFAULT_HOLD,
        }
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldowns.set_cooldown(cooldown);
        log::debug!("mouse cooldown set to {:?}", self.cooldowns.cooldown());
    }

    pub fn set_hold_duration(&mut self, hold: Duration) {
        self.hold_duration = hold;
    }

    pub fn execute(&mut self, ctx: &ActionContext<'_>) -> ActionOutcome {
        let now = Instant::now();
        if let Some(remaining) = self.cooldowns.remaining(ctx.gesture, ctx.action, now) {
            return ActionOutcome::cooling_down(remaining);
        }

        let Some(command) = MouseCommand::parse(ctx.action) else {
            log::warn!("unknown mouse action {:?}", ctx.action);
            return ActionOutcome::skipped("unknown_action")
                .with_action_type("mouse")
                .with_command(ctx.action);
        };

        match self.run(command) {
            Ok(()) => {
                self.cooldowns.record(ctx.gesture, ctx.action, now);
                ActionOutcome::executed("mouse", ctx.action)
            }
            Err(err) => {
                log::warn!("mouse action {:?} failed: {err:?}", ctx.action);
                ActionOutcome::failed(err.to_string())
                    .with_action_type("mouse")
                    .with_command(ctx.action)
            }
        }
    }

    /// Holds the button of a `*_click` command.
    pub fn execute_long_press(&mut self, ctx: &ActionContext<'_>) -> ActionOutcome {
        let Some(MouseCommand::Click { button, .. }) = MouseCommand::parse(ctx.action) else {
            return ActionOutcome::skipped("unsupported_long_press").with_command(ctx.action);
        };
        let now = Instant::now();
        if let Some(remaining) = self.cooldowns.remaining(ctx.gesture, ctx.action, now) {
            return ActionOutcome::cooling_down(remaining);
        }

        match self.backend.hold_button(button, self.hold_duration) {
            Ok(()) => {
                self.cooldowns.record(ctx.gesture, ctx.action, now);
                ActionOutcome::executed("mouse_long_press", ctx.action)
            }
            Err(err) => ActionOutcome::failed(err.to_string())
                .with_action_type("mouse_long_press")
                .with_command(ctx.action),
        }
    }

    pub fn available_actions(&self) -> Vec<String> {
        [
            "left_click",
            "right_click",
            "middle_click",
            "double_click",
            "move_<x>_<y>",
            "move_relative_<dx>_<dy>",
            "scroll_up",
            "scroll_down",
            "scroll_left",
            "scroll_right",
            "scroll_<dx>_<dy>",
            "drag_to_<x>_<y>",
        ]
        .iter()
        .map(|action| action.to_string())
        .collect()
    }

    fn run(&self, command: MouseCommand) -> Result<()> {
        match command {
            MouseCommand::Click { button, count } => self.backend.click(button, count),
            MouseCommand::MoveTo { x, y } => {
                let (x, y) = self.clamp_to_screen(x, y);
                self.backend.move_cursor(x, y)
            }
            MouseCommand::MoveBy { dx, dy } => {
                let (x, y) = self.backend.cursor_position()?;
                let (x, y) = self.clamp_to_screen(x.saturating_add(dx), y.saturating_add(dy));
                self.backend.move_cursor(x, y)
            }
            MouseCommand::Scroll { dx, dy } => self.backend.scroll(dx, dy),
            MouseCommand::DragTo { x, y } => {
                let (x, y) = self.clamp_to_screen(x, y);
                self.backend.drag_to(x, y)
            }
        }
    }

    fn clamp_to_screen(&self, x: i32, y: i32) -> (i32, i32) {
        let (width, height) = self.backend.screen_size();
        (
            x.clamp(0, (width - 1).max(0)),
            y.clamp(0, (height - 1).max(0)),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actions::{ActionRequest, PressKind, input::RecordingBackend};

    fn run(plugin: &mut MousePlugin, action: &str) -> ActionOutcome {
        let request = ActionRequest::new(action, PressKind::Short, 0.9);
        plugin.execute(&ActionContext::new(action, &request))
    }

    #[test]
    fn parses_commands() {
        assert_eq!(
            MouseCommand::parse("double_click"),
            Some(MouseCommand::Click {
                button: MouseButton::Left,
                count: 2
            })
        );
        assert_eq!(
            MouseCommand::parse("move_relative_-5_10"),
            Some(MouseCommand::MoveBy { dx: -5, dy: 10 })
        );
        assert_eq!(
            MouseCommand::parse("scroll_3_-2"),
            Some(MouseCommand::Scroll { dx: 3, dy: -2 })
        );
        assert_eq!(
            MouseCommand::parse("drag_to_40_50"),
            Some(MouseCommand::DragTo { x: 40, y: 50 })
        );
        assert_eq!(MouseCommand::parse("move_x_y"), None);
        assert_eq!(MouseCommand::parse("wiggle"), None);
    }

    #[test]
    fn moves_are_clamped_to_screen() {
        let backend = Arc::new(RecordingBackend::with_cursor(790, 10));
        let mut plugin = MousePlugin::new(backend.clone());

        assert!(run(&mut plugin, "move_relative_50_-30").executed);
        assert!(run(&mut plugin, "move_-10_5000").executed);
        assert_eq!(backend.events(), vec!["move 799,0", "move 0,599"]);
    }

    #[test]
    fn unknown_action_is_not_executed() {
        let backend = Arc::new(RecordingBackend::default());
        let mut plugin = MousePlugin::new(backend.clone());
        let outcome = run(&mut plugin, "wiggle");
        assert!(!outcome.executed);
        assert_eq!(outcome.reason.as_deref(), Some("unknown_action"));
        assert!(backend.events().is_empty());
    }

    #[test]
    fn long_press_holds_click_buttons_only() {
        let backend = Arc::new(RecordingBackend::default());
        let mut plugin = MousePlugin::new(backend.clone());
        plugin.set_hold_duration(Duration::from_millis(500));
        let request = ActionRequest::new("fist", PressKind::Long, 0.9);

        let outcome = plugin.execute_long_press(&ActionContext::new("right_click", &request));
        assert!(outcome.executed);
        let outcome = plugin.execute_long_press(&ActionContext::new("scroll_up", &request));
        assert_eq!(outcome.reason.as_deref(), Some("unsupported_long_press"));

        assert_eq!(backend.events(), vec!["hold-button right 500ms"]);
    }

    #[test]
    fn long_press_and_click_share_the_pair_cooldown() {
        let backend = Arc::new(RecordingBackend::default());
        let mut plugin = MousePlugin::new(backend.clone());
        plugin.set_hold_duration(Duration::from_millis(500));
        let long = ActionRequest::new("fist", PressKind::Long, 0.9);
        let short = ActionRequest::new("fist", PressKind::Short, 0.9);

        let outcome = plugin.execute_long_press(&ActionContext::new("left_click", &long));
        assert!(outcome.executed);
        let outcome = plugin.execute(&ActionContext::new("left_click", &short));
        assert_eq!(outcome.reason.as_deref(), Some("cooldown"));
        let outcome = plugin.execute_long_press(&ActionContext::new("left_click", &long));
        assert_eq!(outcome.reason.as_deref(), Some("cooldown"));

        assert_eq!(backend.events(), vec!["hold-button left 500ms"]);
    }
}
