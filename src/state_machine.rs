use std::time::{Duration, Instant};

use serde::Serialize;

use crate::{
    actions::{ActionDispatcher, ActionOutcome, ActionRequest, PressKind},
    config::StateMachineConfig,
    types::{GestureEvent, is_gesture_label},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MachineState {
    Idle,
    Detecting,
    Confirmed,
    Cooldown,
    Disabled,
}

impl MachineState {
    pub fn label(self) -> &'static str {
        match self {
            MachineState::Idle => "idle",
            MachineState::Detecting => "detecting",
            MachineState::Confirmed => "confirmed",
            MachineState::Cooldown => "cooldown",
            MachineState::Disabled => "disabled",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    IdleToDetecting,
    DetectingToConfirmed,
    DetectingToIdle,
    /// Long press fired.
    ConfirmedToCooldown,
    /// Gesture released or lost confidence.
    ConfirmedReleased,
    CooldownToIdle,
    DisabledToIdle,
    Disabled,
    ForceEnabled,
}

/// What one event did to the machine.
#[derive(Clone, Debug, PartialEq)]
pub struct StepResult {
    pub state: MachineState,
    pub previous: MachineState,
    pub transition: Option<Transition>,
    pub gesture: String,
    pub confidence: f32,
    /// Time spent in `previous` when the event arrived.
    pub state_duration: Duration,
    pub press: Option<PressKind>,
    pub action: Option<ActionOutcome>,
    pub cooldown_remaining: Option<Duration>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Counters {
    pub total_detections: u64,
    pub confirmed_gestures: u64,
    pub false_positives: u64,
    pub long_press_actions: u64,
    pub failed_actions: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MachineStats {
    #[serde(flatten)]
    pub counters: Counters,
    pub current_state: MachineState,
    pub state_duration: f32,
    /// Seconds since the last executed action, if any.
    pub since_last_action: Option<f32>,
    pub false_positive_rate: f32,
    pub confirmation_rate: f32,
}

/// Decides when a stable gesture becomes an action.
///
/// IDLE → DETECTING → CONFIRMED (short press) → COOLDOWN → IDLE, with an
/// optional long press out of CONFIRMED and DISABLED as a manual override.
/// Event timestamps drive every timer.
#[derive(Debug)]
pub struct IntentStateMachine {
    config: StateMachineConfig,
    state: MachineState,
    state_entered: Instant,
    candidate: Option<String>,
    detecting_since: Instant,
    confirmed_since: Instant,
    long_press_attempted: bool,
    last_action: Option<Instant>,
    counters: Counters,
}

impl Default for IntentStateMachine {
    fn default() -> Self {
        Self::new(StateMachineConfig::default())
    }
}

impl IntentStateMachine {
    pub fn new(config: StateMachineConfig) -> Self {
        log::info!(
            "intent state machine: detection={} confirmation={}s cooldown={}s long_press={}s",
            config.detection_threshold,
            config.confirmation_time,
            config.cooldown_time,
            config.long_press_threshold
        );
        let now = Instant::now();
        Self {
            config,
            state: MachineState::Idle,
            state_entered: now,
            candidate: None,
            detecting_since: now,
            confirmed_since: now,
            long_press_attempted: false,
            last_action: None,
            counters: Counters::default(),
        }
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn config(&self) -> &StateMachineConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: StateMachineConfig) {
        self.config = config;
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn process(
        &mut self,
        event: &GestureEvent,
        actions: &mut dyn ActionDispatcher,
    ) -> StepResult {
        let now = event.timestamp;
        let previous = self.state;
        let mut step = StepResult {
            state: previous,
            previous,
            transition: None,
            gesture: event.gesture.clone(),
            confidence: event.confidence,
            state_duration: now.saturating_duration_since(self.state_entered),
            press: None,
            action: None,
            cooldown_remaining: None,
        };

        match previous {
            MachineState::Idle => self.on_idle(event, &mut step),
            MachineState::Detecting => self.on_detecting(event, actions, &mut step),
            MachineState::Confirmed => self.on_confirmed(event, actions, &mut step),
            MachineState::Cooldown => self.on_cooldown(event, &mut step),
            MachineState::Disabled => self.on_disabled(event, &mut step),
        }

        step.state = self.state;
        step
    }

    /// Manual kill switch; only the reset gesture or `force_enable` leaves it.
    pub fn emergency_disable(&mut self) {
        self.transition(MachineState::Disabled, Instant::now());
        log::warn!("gesture actions disabled by emergency stop");
    }

    pub fn force_enable(&mut self) {
        self.transition(MachineState::Idle, Instant::now());
        log::info!("gesture actions force enabled");
    }

    pub fn stats(&self) -> MachineStats {
        let now = Instant::now();
        let detections = self.counters.total_detections.max(1) as f32;
        MachineStats {
            counters: self.counters,
            current_state: self.state,
            state_duration: now.saturating_duration_since(self.state_entered).as_secs_f32(),
            since_last_action: self
                .last_action
                .map(|at| now.saturating_duration_since(at).as_secs_f32()),
            false_positive_rate: self.counters.false_positives as f32 / detections,
            confirmation_rate: self.counters.confirmed_gestures as f32 / detections,
        }
    }

    pub fn reset_stats(&mut self) {
        self.counters = Counters::default();
    }

    fn meets_threshold(&self, event: &GestureEvent) -> bool {
        event.confidence >= self.config.detection_threshold
    }

    fn on_idle(&mut self, event: &GestureEvent, step: &mut StepResult) {
        if !is_gesture_label(&event.gesture) || !self.meets_threshold(event) {
            return;
        }
        self.transition(MachineState::Detecting, event.timestamp);
        self.candidate = Some(event.gesture.clone());
        self.detecting_since = event.timestamp;
        self.counters.total_detections += 1;
        step.transition = Some(Transition::IdleToDetecting);
    }

    fn on_detecting(
        &mut self,
        event: &GestureEvent,
        actions: &mut dyn ActionDispatcher,
        step: &mut StepResult,
    ) {
        let holding = self.candidate.as_deref() == Some(event.gesture.as_str())
            && self.meets_threshold(event)
            && event.is_stable;
        if !holding {
            self.transition(MachineState::Idle, event.timestamp);
            self.candidate = None;
            self.counters.false_positives += 1;
            step.transition = Some(Transition::DetectingToIdle);
            return;
        }

        let held = event.timestamp.saturating_duration_since(self.detecting_since);
        if held < self.config.confirmation_duration() {
            return;
        }

        self.transition(MachineState::Confirmed, event.timestamp);
        self.confirmed_since = event.timestamp;
        self.long_press_attempted = false;
        self.counters.confirmed_gestures += 1;
        step.transition = Some(Transition::DetectingToConfirmed);
        step.press = Some(PressKind::Short);

        let request = ActionRequest::new(&event.gesture, PressKind::Short, event.confidence)
            .with_held_for(held);
        step.action = Some(self.run_action(&request, actions, event.timestamp));
    }

    fn on_confirmed(
        &mut self,
        event: &GestureEvent,
        actions: &mut dyn ActionDispatcher,
        step: &mut StepResult,
    ) {
        let same = self.candidate.as_deref() == Some(event.gesture.as_str());
        if !same || !self.meets_threshold(event) {
            self.transition(MachineState::Cooldown, event.timestamp);
            self.candidate = None;
            step.transition = Some(Transition::ConfirmedReleased);
            return;
        }

        let held = event.timestamp.saturating_duration_since(self.confirmed_since);
        if self.long_press_attempted
            || held < self.config.long_press_duration()
            || !actions.has_long_press(&event.gesture)
        {
            return;
        }

        self.long_press_attempted = true;
        step.press = Some(PressKind::Long);
        let request = ActionRequest::new(&event.gesture, PressKind::Long, event.confidence)
            .with_held_for(held);
        let outcome = self.run_action(&request, actions, event.timestamp);
        if outcome.executed {
            self.counters.long_press_actions += 1;
            self.transition(MachineState::Cooldown, event.timestamp);
            self.candidate = None;
            step.transition = Some(Transition::ConfirmedToCooldown);
        }
        step.action = Some(outcome);
    }

    fn on_cooldown(&mut self, event: &GestureEvent, step: &mut StepResult) {
        let cooldown = self.config.cooldown_duration();
        let elapsed = event.timestamp.saturating_duration_since(self.state_entered);
        if elapsed >= cooldown {
            self.transition(MachineState::Idle, event.timestamp);
            step.transition = Some(Transition::CooldownToIdle);
        } else {
            step.cooldown_remaining = Some(cooldown - elapsed);
        }
    }

    fn on_disabled(&mut self, event: &GestureEvent, step: &mut StepResult) {
        if event.gesture == self.config.reset_gesture
            && event.confidence > self.config.reset_confidence
        {
            self.transition(MachineState::Idle, event.timestamp);
            step.transition = Some(Transition::DisabledToIdle);
            log::info!("gesture actions re-enabled by {}", event.gesture);
        }
    }

    fn run_action(
        &mut self,
        request: &ActionRequest,
        actions: &mut dyn ActionDispatcher,
        now: Instant,
    ) -> ActionOutcome {
        let outcome = match actions.dispatch(request) {
            Ok(outcome) => outcome,
            Err(err) => {
                log::warn!(
                    "{} action for {} failed: {err:?}",
                    request.press.label(),
                    request.gesture
                );
                ActionOutcome::failed(format!("{err:#}"))
            }
        };
        if outcome.executed {
            self.last_action = Some(now);
        } else if outcome.error.is_some() {
            self.counters.failed_actions += 1;
        }
        outcome
    }

    fn transition(&mut self, next: MachineState, now: Instant) {
        if self.state != next {
            log::debug!("state transition: {} -> {}", self.state.label(), next.label());
        }
        self.state = next;
        self.state_entered = now;
        if matches!(next, MachineState::Idle | MachineState::Disabled) {
            self.candidate = None;
        }
    }
}
