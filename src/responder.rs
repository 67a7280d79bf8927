use std::thread::JoinHandle;

use crate::events::EventLog;
use crate::frame::parse_frame;
use crate::registry::{Decision, ResponseRegistry, TriggerTracker};
use crate::scheduler;
use crate::session::{FrameHandler, Link};
use crate::stats::Stats;

/// Decision layer of one session: parse, count, and schedule responses.
pub struct Responder {
    registry: ResponseRegistry,
    tracker: TriggerTracker,
    stats: Stats,
    events: EventLog,
}

impl Responder {
    pub fn new(registry: ResponseRegistry, tracker: TriggerTracker, events: EventLog) -> Self {
        log::debug!("responder ready with {} rule(s)", registry.len());
        Self {
            registry,
            tracker,
            stats: Stats::new(),
            events,
        }
    }

    /// Handle one received chunk; returns the response task if one was started.
    pub fn handle_chunk(&mut self, bytes: &[u8], link: &Link) -> Option<JoinHandle<()>> {
        self.stats.add_bytes(bytes.len());

        let frame = match parse_frame(bytes) {
            Ok(f) => f,
            Err(e) if e.is_checksum() => {
                self.stats.inc_checksum();
                self.events.warn(format!("checksum error: {e}"));
                return None;
            }
            Err(e) => {
                self.stats.inc_bad();
                self.events.warn(format!("invalid frame: {e}"));
                return None;
            }
        };
        self.stats.inc_ok();

        match self.tracker.record_and_decide(&self.registry, &frame.cmd_id) {
            Decision::UnknownCommand => {
                self.stats.inc_unknown();
                self.events.warn(format!(
                    "unknown command id: {} (payload: {})",
                    frame.cmd_id, frame.payload
                ));
                None
            }
            Decision::Suppressed {
                consecutive,
                required,
            } => {
                self.stats.inc_suppressed();
                let name = self
                    .registry
                    .lookup(&frame.cmd_id)
                    .map(|r| r.name.as_str())
                    .unwrap_or_default();
                self.events.info(format!(
                    "command {name} (ID:{}) received {consecutive} time(s) in a row, needs {required} to respond",
                    frame.cmd_id
                ));
                None
            }
            Decision::Respond { rule, occurrence } => {
                if rule.resp_hex.trim().is_empty() {
                    self.events.warn(format!(
                        "command {} has no response data configured",
                        rule.name
                    ));
                    return None;
                }
                self.stats.inc_responded();
                log::debug!(
                    "responding to {} occurrence #{} after {}ms",
                    rule.cmd_id,
                    occurrence,
                    rule.delay_ms
                );
                scheduler::schedule(rule, occurrence, link.clone(), self.events.clone())
            }
        }
    }

    #[cfg(test)]
    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    #[cfg(test)]
    pub fn tracker(&self) -> &TriggerTracker {
        &self.tracker
    }
}

impl FrameHandler for Responder {
    fn on_chunk(&mut self, bytes: &[u8], link: &Link) {
        // response tasks are detached
        let _ = self.handle_chunk(bytes, link);
    }

    fn on_close(&mut self) {
        let mut totals: Vec<_> = self.tracker.totals().collect();
        totals.sort();
        let totals = totals
            .iter()
            .map(|(id, n)| format!("{id}x{n}"))
            .collect::<Vec<_>>()
            .join(" ");
        self.events.info(format!("{} [{}]", self.stats.summary(), totals));
    }
}
