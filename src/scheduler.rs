//! Delayed, fire-and-forget transmission of configured responses.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::CommandRule;
use crate::events::EventLog;
use crate::frame::build_frame;
use crate::hex::hex_dump;
use crate::session::Link;

/// Send `rule`'s response on its own thread after `rule.delay_ms`.
///
/// The caller is never blocked. `rule` and `occurrence` are a snapshot taken at
/// decision time. A failed send is reported once and dropped; nothing retries,
/// and a session closing in the meantime does not cancel the task.
pub fn schedule(
    rule: CommandRule,
    occurrence: u64,
    link: Link,
    events: EventLog,
) -> Option<JoinHandle<()>> {
    let name = format!("resp-{}", rule.cmd_id);
    let spawned = thread::Builder::new().name(name).spawn({
        let events = events.clone();
        move || transmit(&rule, occurrence, &link, &events)
    });
    match spawned {
        Ok(h) => Some(h),
        Err(e) => {
            events.error(format!("could not start response task: {e}"));
            None
        }
    }
}

fn transmit(rule: &CommandRule, occurrence: u64, link: &Link, events: &EventLog) {
    if rule.delay_ms > 0 {
        events.info(format!("delaying {}ms...", rule.delay_ms));
        thread::sleep(Duration::from_millis(rule.delay_ms));
    }

    let frame = build_frame(&rule.resp_id, &rule.resp_hex);
    match link.send(&frame) {
        Ok(()) => {
            events.info(format!(
                "TX [ASCII]: {} (command: {}, occurrence #{})",
                String::from_utf8_lossy(&frame),
                rule.name,
                occurrence
            ));
            events.info(format!("TX [HEX]: {}", hex_dump(&frame)));
        }
        Err(e) => events.error(format!(
            "failed to send response for {} (occurrence #{}): {e}",
            rule.name, occurrence
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{self, drain};
    use crate::session::testing::captured_link;
    use std::time::Instant;

    fn rule(delay_ms: u64) -> CommandRule {
        CommandRule {
            name: "Status".into(),
            cmd_id: "01".into(),
            resp_id: "81".into(),
            resp_data_len: Some(2),
            resp_hex: "0A 0B".into(),
            delay_ms,
            trigger_after: 0,
        }
    }

    #[test]
    fn sends_after_delay_without_blocking_caller() {
        let (events, rx) = events::channel();
        let (link, cap) = captured_link();

        let t0 = Instant::now();
        let handle = schedule(rule(50), 3, link, events).unwrap();
        assert!(t0.elapsed() < Duration::from_millis(50));
        assert!(cap.0.lock().unwrap().is_empty());

        handle.join().unwrap();
        assert!(t0.elapsed() >= Duration::from_millis(50));
        assert_eq!(
            cap.0.lock().unwrap().as_slice(),
            build_frame("81", "0A 0B").as_slice()
        );

        let log = drain(&rx);
        assert_eq!(log[0], "delaying 50ms...");
        assert!(log[1].starts_with("TX [ASCII]: @810A0B*"));
        assert!(log[1].ends_with("(command: Status, occurrence #3)"));
        assert!(log[2].starts_with("TX [HEX]: 40 38 31"));
    }

    #[test]
    fn failed_send_is_reported_not_retried() {
        let (events, rx) = events::channel();
        schedule(rule(0), 1, Link::default(), events)
            .unwrap()
            .join()
            .unwrap();
        let log = drain(&rx);
        assert_eq!(log.len(), 1);
        assert!(log[0].contains("failed to send response for Status"));
    }
}
