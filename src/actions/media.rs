use std::{
    collections::BTreeMap,
    process::{Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use anyhow::{Context, Result, anyhow};

use super::{ActionContext, ActionOutcome, cooldown::CooldownTracker};

const DEFAULT_COOLDOWN: Duration = Duration::from_millis(500);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Volume steps issued per second of long-press hold.
const VOLUME_STEPS_PER_SEC: f32 = 4.0;

fn platform_commands() -> BTreeMap<String, String> {
    let table: &[(&str, &str)] = if cfg!(target_os = "windows") {
        &[
            ("play_pause", "nircmd sendkeypress 0xB3"),
            ("stop", "nircmd sendkeypress 0xB2"),
            ("next_track", "nircmd sendkeypress 0xB0"),
            ("prev_track", "nircmd sendkeypress 0xB1"),
            ("volume_up", "nircmd changesysvolume 2000"),
            ("volume_down", "nircmd changesysvolume -2000"),
            ("volume_mute", "nircmd mutesysvolume 2"),
        ]
    } else if cfg!(target_os = "macos") {
        &[
            (
                "play_pause",
                r#"osascript -e 'tell application "System Events" to key code 16'"#,
            ),
            (
                "stop",
                r#"osascript -e 'tell application "System Events" to key code 53'"#,
            ),
            (
                "next_track",
                r#"osascript -e 'tell application "System Events" to key code 19'"#,
            ),
            (
                "prev_track",
                r#"osascript -e 'tell application "System Events" to key code 20'"#,
            ),
            (
                "volume_up",
                "osascript -e 'set volume output volume \
                 (output volume of (get volume settings) + 10)'",
            ),
            (
                "volume_down",
                "osascript -e 'set volume output volume \
                 (output volume of (get volume settings) - 10)'",
            ),
            ("volume_mute", "osascript -e 'set volume with output muted'"),
        ]
    } else {
        &[
            ("play_pause", "playerctl play-pause"),
            ("stop", "playerctl stop"),
            ("next_track", "playerctl next"),
            ("prev_track", "playerctl previous"),
            ("volume_up", "pactl set-sink-volume @DEFAULT_SINK@ +5%"),
            ("volume_down", "pactl set-sink-volume @DEFAULT_SINK@ -5%"),
            ("volume_mute", "pactl set-sink-mute @DEFAULT_SINK@ toggle"),
        ]
    };

    table
        .iter()
        .map(|(name, command)| (name.to_string(), command.to_string()))
        .collect()
}

/// Media keys and volume control through platform helper commands.
#[derive(Debug)]
pub struct MediaPlugin {
    commands: BTreeMap<String, String>,
    cooldowns: CooldownTracker,
    timeout: Duration,
}

impl MediaPlugin {
    pub fn for_current_platform() -> Self {
        Self::with_commands(platform_commands())
    }

    pub fn with_commands(commands: BTreeMap<String, String>) -> Self {
        Self {
            commands,
            cooldowns: CooldownTracker::new(DEFAULT_COOLDOWN),
            timeout: COMMAND_TIMEOUT,
        }
    }

    pub fn set_cooldown(&mut self, cooldown: Duration) {
        self.cooldowns.set_cooldown(cooldown);
        log::debug!("media cooldown set to {:?}", self.cooldowns.cooldown());
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn execute(&mut self, ctx: &ActionContext<'_>) -> ActionOutcome {
        let now = Instant::now();
        if let Some(remaining) = self.cooldowns.remaining(ctx.gesture, ctx.action, now) {
            return ActionOutcome::cooling_down(remaining);
        }

        let Some(command) = self.commands.get(ctx.action) else {
            return ActionOutcome::skipped("unsupported_action")
                .with_action_type("media")
                .with_command(ctx.action);
        };

        match run_command(command, self.timeout) {
            Ok(true) => {
                self.cooldowns.record(ctx.gesture, ctx.action, now);
                ActionOutcome::executed("media", ctx.action)
            }
            Ok(false) => ActionOutcome::skipped("command_failed")
                .with_action_type("media")
                .with_command(ctx.action),
            Err(err) => {
                log::warn!("media action {:?} failed: {err:?}", ctx.action);
                ActionOutcome::failed(format!("{err:#}"))
                    .with_action_type("media")
                    .with_command(ctx.action)
            }
        }
    }

    /// Repeats volume steps for the time the gesture was held; other
    /// commands run once.
    pub fn execute_long_press(&mut self, ctx: &ActionContext<'_>) -> ActionOutcome {
        if !matches!(ctx.action, "volume_up" | "volume_down") {
            return self.execute(ctx);
        }
        let now = Instant::now();
        if let Some(remaining) = self.cooldowns.remaining(ctx.gesture, ctx.action, now) {
            return ActionOutcome::cooling_down(remaining);
        }
        let Some(command) = self.commands.get(ctx.action) else {
            return ActionOutcome::skipped("unsupported_action").with_command(ctx.action);
        };

        let steps = ((ctx.held_for.as_secs_f32() * VOLUME_STEPS_PER_SEC) as usize).max(1);
        let mut succeeded = 0;
        for _ in 0..steps {
            match run_command(command, self.timeout) {
                Ok(true) => succeeded += 1,
                Ok(false) => {}
                Err(err) => {
                    return ActionOutcome::failed(format!("{err:#}"))
                        .with_action_type("media_long_press")
                        .with_command(ctx.action);
                }
            }
        }
        log::debug!("{} repeated {succeeded}/{steps} times", ctx.action);

        if succeeded > 0 {
            self.cooldowns.record(ctx.gesture, ctx.action, now);
            ActionOutcome::executed("media_long_press", ctx.action)
        } else {
            ActionOutcome::skipped("command_failed").with_command(ctx.action)
        }
    }

    pub fn available_actions(&self) -> Vec<String> {
        self.commands.keys().cloned().collect()
    }
}

/// Runs `command` and reports whether it exited successfully. A command
/// still running after `timeout` is killed and counts as a failure.
fn run_command(command: &str, timeout: Duration) -> Result<bool> {
    let mut process = shell_command(command)?;
    let mut child = process
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("failed to spawn `{command}`"))?;

    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait().context("failed to poll media command")? {
            return Ok(status.success());
        }
        if started.elapsed() >= timeout {
            log::warn!("media command timed out: {command}");
            let _ = child.kill();
            let _ = child.wait();
            return Ok(false);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn shell_command(command: &str) -> Result<Command> {
    if cfg!(target_os = "windows") {
        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| anyhow!("empty media command"))?;
        let mut process = Command::new(program);
        process.args(parts);
        Ok(process)
    } else {
        let mut process = Command::new("sh");
        process.arg("-c").arg(command);
        Ok(process)
    }
}
