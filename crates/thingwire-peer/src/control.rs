use std::time::Duration;

use crate::config::ClientConfig;

/// Duty-cycle state change requested by a maintenance pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DutyTransition {
    /// Disconnect for the off part of the period.
    Off,
    /// Reconnect for the on part of the period.
    On,
}

/// What one maintenance pass should do.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ControlActions {
    pub send_ping: bool,
    /// No pong arrived before the deadline; the connection is considered dead.
    pub pong_timeout: bool,
    pub cleanup: bool,
    pub duty_cycle: Option<DutyTransition>,
}

/// Keep-alive, cleanup, and duty-cycle deadlines, in milliseconds since the
/// Unix epoch.
///
/// All deadlines start at zero, so the first pass pings (when connected),
/// sweeps, and applies the duty cycle immediately.
#[derive(Debug, Clone)]
pub struct ControlSchedule {
    next_ping_ms: u64,
    expected_pong_ms: u64,
    next_cleanup_ms: u64,
    next_duty_event_ms: u64,
    pong_received: bool,
    handle_pongs: bool,
}

impl Default for ControlSchedule {
    fn default() -> Self {
        Self {
            next_ping_ms: 0,
            expected_pong_ms: 0,
            next_cleanup_ms: 0,
            next_duty_event_ms: 0,
            pong_received: false,
            handle_pongs: true,
        }
    }
}

impl ControlSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_pong(&mut self) {
        self.pong_received = true;
    }

    /// Whether missing pongs tear the connection down.
    pub fn handles_pongs(&self) -> bool {
        self.handle_pongs
    }

    pub fn set_handle_pongs(&mut self, handle: bool) {
        self.handle_pongs = handle;
    }

    /// Compute the actions due at `now_ms` and advance the deadlines.
    pub fn plan(&mut self, now_ms: u64, connected: bool, config: &ClientConfig) -> ControlActions {
        let mut actions = ControlActions::default();
        let mut connected = connected;

        if connected {
            if now_ms > self.next_ping_ms {
                actions.send_ping = true;
                self.pong_received = false;
                self.expected_pong_ms = now_ms.saturating_add(millis(config.message_timeout));
                self.next_ping_ms = now_ms.saturating_add(millis(config.ping_rate));
            }
            if self.handle_pongs && !self.pong_received && now_ms > self.expected_pong_ms {
                actions.pong_timeout = true;
                // Ping again as soon as the connection comes back.
                self.next_ping_ms = 0;
                connected = false;
            }
        }

        if now_ms > self.next_cleanup_ms {
            actions.cleanup = true;
            self.next_cleanup_ms = now_ms.saturating_add(millis(config.stale_cleanup_rate));
        }

        if !config.duty_cycle_period.is_zero() && now_ms > self.next_duty_event_ms {
            let (on, off) = duty_cycle_split(config.duty_cycle_period, config.duty_cycle);
            if connected {
                actions.duty_cycle = Some(DutyTransition::Off);
                self.next_duty_event_ms = now_ms.saturating_add(millis(off));
            } else {
                actions.duty_cycle = Some(DutyTransition::On);
                self.next_duty_event_ms = now_ms.saturating_add(millis(on));
            }
        }

        actions
    }
}

/// Split a duty-cycle period into its connected and disconnected parts.
/// `duty_cycle` is a percentage and is clamped to 100.
pub fn duty_cycle_split(period: Duration, duty_cycle: u8) -> (Duration, Duration) {
    let dc = u32::from(duty_cycle.min(100));
    let on = period * dc / 100;
    let off = period * (100 - dc) / 100;
    (on, off)
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
