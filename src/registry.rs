use std::collections::HashMap;

use crate::config::CommandRule;

/// Configured rules keyed by normalized command id.
#[derive(Debug, Clone, Default)]
pub struct ResponseRegistry {
    rules: HashMap<String, CommandRule>,
}

impl ResponseRegistry {
    pub fn new(rules: impl IntoIterator<Item = CommandRule>) -> Self {
        Self {
            rules: rules.into_iter().map(|r| (r.cmd_id.clone(), r)).collect(),
        }
    }

    pub fn lookup(&self, cmd_id: &str) -> Option<&CommandRule> {
        self.rules
            .get(cmd_id)
            .or_else(|| self.rules.get(&cmd_id.to_ascii_uppercase()))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreakPolicy {
    /// One streak for all ids: any different id restarts it for everyone.
    #[default]
    Shared,
    /// Each id counts on its own and other ids never reset it, so a rule
    /// responds from its `trigger_after + 1`-th arrival onwards.
    PerCommand,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Respond { rule: CommandRule, occurrence: u64 },
    Suppressed { consecutive: u32, required: u32 },
    UnknownCommand,
}

/// Arrival counters for one session.
#[derive(Debug, Clone, Default)]
pub struct TriggerTracker {
    policy: StreakPolicy,
    total_count: HashMap<String, u64>,
    last_seen: Option<String>,
    consecutive: u32,
}

impl TriggerTracker {
    pub fn new(policy: StreakPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    /// Count one arrival of `cmd_id` and decide whether it earns a response.
    ///
    /// Unknown ids leave every counter untouched. Known ids always bump their
    /// total (the occurrence number) and then the streak; a response needs
    /// `trigger_after + 1` consecutive arrivals.
    pub fn record_and_decide(&mut self, registry: &ResponseRegistry, cmd_id: &str) -> Decision {
        let Some(rule) = registry.lookup(cmd_id) else {
            return Decision::UnknownCommand;
        };
        let id = rule.cmd_id.as_str();

        let total = self.total_count.entry(id.to_string()).or_insert(0);
        *total += 1;
        let occurrence = *total;

        let streak = match self.policy {
            StreakPolicy::Shared => self.bump_shared(id),
            StreakPolicy::PerCommand => {
                self.consecutive = u32::try_from(occurrence).unwrap_or(u32::MAX);
                self.consecutive
            }
        };

        if streak > rule.trigger_after {
            Decision::Respond {
                rule: rule.clone(),
                occurrence,
            }
        } else {
            Decision::Suppressed {
                consecutive: streak,
                required: rule.trigger_after.saturating_add(1),
            }
        }
    }

    fn bump_shared(&mut self, id: &str) -> u32 {
        if self.last_seen.as_deref() == Some(id) {
            self.consecutive = self.consecutive.saturating_add(1);
        } else {
            self.consecutive = 1;
            self.last_seen = Some(id.to_string());
        }
        self.consecutive
    }

    #[cfg(test)]
    pub fn total(&self, cmd_id: &str) -> u64 {
        self.total_count.get(cmd_id).copied().unwrap_or(0)
    }

    pub fn totals(&self) -> impl Iterator<Item = (&str, u64)> {
        self.total_count.iter().map(|(k, v)| (k.as_str(), *v))
    }

    #[cfg(test)]
    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, trigger_after: u32) -> CommandRule {
        CommandRule {
            name: format!("cmd {id}"),
            cmd_id: id.into(),
            resp_id: "80".into(),
            resp_data_len: None,
            resp_hex: "00".into(),
            delay_ms: 0,
            trigger_after,
        }
    }

    fn verdicts(tracker: &mut TriggerTracker, reg: &ResponseRegistry, ids: &[&str]) -> Vec<String> {
        ids.iter()
            .map(|id| match tracker.record_and_decide(reg, id) {
                Decision::Respond { occurrence, .. } => format!("R{occurrence}"),
                Decision::Suppressed { .. } => "S".to_string(),
                Decision::UnknownCommand => "?".to_string(),
            })
            .collect()
    }

    #[test]
    fn needs_trigger_after_plus_one_in_a_row() {
        let reg = ResponseRegistry::new([rule("01", 2), rule("02", 0)]);
        let mut t = TriggerTracker::default();
        assert_eq!(verdicts(&mut t, &reg, &["01", "01", "01", "01"]), ["S", "S", "R3", "R4"]);
    }

    #[test]
    fn other_id_resets_shared_streak() {
        let reg = ResponseRegistry::new([rule("01", 2), rule("02", 0)]);
        let mut t = TriggerTracker::default();
        assert_eq!(
            verdicts(&mut t, &reg, &["01", "02", "01", "01", "01"]),
            ["S", "R1", "S", "S", "R4"]
        );
        assert_eq!(t.total("01"), 4);
        assert_eq!(t.total("02"), 1);
        assert_eq!(t.consecutive(), 3);
    }

    #[test]
    fn unknown_ids_do_not_touch_counters() {
        let reg = ResponseRegistry::new([rule("01", 1)]);
        let mut t = TriggerTracker::default();
        assert_eq!(verdicts(&mut t, &reg, &["01", "7F", "01"]), ["S", "?", "R2"]);
        assert_eq!(t.total("7F"), 0);
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = ResponseRegistry::new([rule("0A", 0)]);
        assert!(reg.lookup("0a").is_some());
        let mut t = TriggerTracker::default();
        assert_eq!(verdicts(&mut t, &reg, &["0a", "0A"]), ["R1", "R2"]);
        assert_eq!(t.total("0A"), 2);
    }

    #[test]
    fn suppressed_reports_progress() {
        let reg = ResponseRegistry::new([rule("01", 2)]);
        let mut t = TriggerTracker::default();
        assert_eq!(
            t.record_and_decide(&reg, "01"),
            Decision::Suppressed {
                consecutive: 1,
                required: 3
            }
        );
    }

    #[test]
    fn per_command_policy_ignores_other_ids() {
        let reg = ResponseRegistry::new([rule("01", 2), rule("02", 0)]);
        let mut t = TriggerTracker::new(StreakPolicy::PerCommand);
        assert_eq!(
            verdicts(&mut t, &reg, &["01", "02", "01", "02", "01", "01"]),
            ["S", "R1", "S", "R2", "R3", "R4"]
        );
    }
}
