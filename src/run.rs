use anyhow::{Context, Result};
use std::io::BufRead;
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use crate::cli::RuleOpts;
use crate::config::{CommandRule, apply_overrides, load_config, save_config};
use crate::events::{self, Event, EventLog};
use crate::session::TransportParams;
use crate::sim::Simulator;

const EVENT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Toggle,
    Reload,
    Save,
    Quit,
    Help,
}

impl Control {
    fn from_line(line: &str) -> Option<Self> {
        match line.trim().to_ascii_lowercase().as_str() {
            "" => None,
            "c" | "connect" | "disconnect" => Some(Control::Toggle),
            "r" | "reload" => Some(Control::Reload),
            "s" | "save" => Some(Control::Save),
            "q" | "quit" | "exit" => Some(Control::Quit),
            _ => Some(Control::Help),
        }
    }
}

const HELP: &str = "commands: c = connect/disconnect, r = reload config, s = save config, q = quit";

pub fn load_rules(opts: &RuleOpts) -> Result<Vec<CommandRule>> {
    let mut rules = load_config(&opts.config)?;
    apply_overrides(&mut rules, &opts.overrides())
        .with_context(|| format!("applying overrides to {}", opts.config.display()))?;
    Ok(rules)
}

/// Run the simulator until `q` or Ctrl-C, printing events as they arrive.
pub fn run(params: TransportParams, opts: RuleOpts) -> Result<()> {
    let rules = load_rules(&opts)?;
    log::info!(
        "loaded {} command(s) from {}",
        rules.len(),
        opts.config.display()
    );

    let (sink, events_rx) = events::channel();
    let mut sim = Simulator::new(rules, opts.policy(), sink.clone());

    let (ctl_tx, ctl_rx) = mpsc::channel();
    {
        let tx = ctl_tx.clone();
        ctrlc::set_handler(move || {
            let _ = tx.send(Control::Quit);
        })
        .context("installing Ctrl-C handler")?;
    }
    spawn_stdin_reader(ctl_tx)?;

    // a failed connect is reported as an event; the user can retry with `c`
    let _ = sim.connect(&params);
    sink.info(HELP);

    loop {
        pump_events(&events_rx);
        let Ok(ctl) = ctl_rx.try_recv() else {
            continue;
        };
        match ctl {
            Control::Toggle => {
                let _ = sim.toggle(&params);
            }
            Control::Reload => reload(&mut sim, &params, &opts, &sink),
            Control::Save => match save_config(&opts.config, sim.rules()) {
                Ok(()) => sink.info(format!("config saved to {}", opts.config.display())),
                Err(e) => sink.error(format!("save failed: {e}")),
            },
            Control::Help => sink.info(HELP),
            Control::Quit => break,
        }
    }

    sim.disconnect();
    pump_events(&events_rx);
    Ok(())
}

fn reload(sim: &mut Simulator, params: &TransportParams, opts: &RuleOpts, sink: &EventLog) {
    match load_rules(opts) {
        Ok(rules) => {
            sink.info(format!(
                "loaded {} command(s) from {}",
                rules.len(),
                opts.config.display()
            ));
            let was_connected = sim.is_connected();
            sim.disconnect();
            sim.set_rules(rules);
            if was_connected {
                let _ = sim.connect(params);
            }
        }
        Err(e) => sink.error(format!("reload failed, keeping previous rules: {e:#}")),
    }
}

fn spawn_stdin_reader(tx: Sender<Control>) -> Result<()> {
    thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if let Some(ctl) = Control::from_line(&line)
                    && tx.send(ctl).is_err()
                {
                    break;
                }
            }
            // stdin closed: keep running until Ctrl-C
        })
        .context("starting stdin reader")?;
    Ok(())
}

/// Wait up to one poll interval for events, then print everything queued.
fn pump_events(rx: &Receiver<Event>) {
    let Ok(ev) = rx.recv_timeout(EVENT_POLL) else {
        return;
    };
    print_event(&ev);
    while let Ok(ev) = rx.try_recv() {
        print_event(&ev);
    }
}

fn print_event(ev: &Event) {
    println!("{ev}");
}

pub fn check(opts: &RuleOpts, save: bool) -> Result<()> {
    let rules = load_rules(opts)?;
    println!(
        "{}: {} command(s)",
        opts.config.display(),
        rules.len()
    );
    for r in &rules {
        println!(
            "  {:<20} cmd={} resp={} len={:<4} delay={}ms after={} data=[{}]",
            r.name,
            r.cmd_id,
            r.resp_id,
            r.resp_data_len
                .map(|n| n.to_string())
                .unwrap_or_else(|| "-".into()),
            r.delay_ms,
            r.trigger_after,
            r.resp_hex
        );
    }
    if save {
        save_config(&opts.config, &rules)?;
        println!("saved {}", opts.config.display());
    }
    Ok(())
}

/// Serial ports to pick from, plus command files found in `dir`.
pub fn list(dir: &Path) -> Result<()> {
    let ports = crate::port::list_ports().context("listing serial ports")?;
    if ports.is_empty() {
        println!("no serial ports found");
    }
    for (name, desc) in ports {
        println!("{name:<24} {desc}");
    }
    let configs = crate::config::scan_config_files(dir).unwrap_or_default();
    if !configs.is_empty() {
        println!("command files in {}:", dir.display());
        for c in configs {
            println!("  {}", c.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_lines() {
        assert_eq!(Control::from_line(" C "), Some(Control::Toggle));
        assert_eq!(Control::from_line("reload"), Some(Control::Reload));
        assert_eq!(Control::from_line("q"), Some(Control::Quit));
        assert_eq!(Control::from_line("s"), Some(Control::Save));
        assert_eq!(Control::from_line("what"), Some(Control::Help));
        assert_eq!(Control::from_line("   "), None);
    }

    #[test]
    fn load_rules_applies_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("cmd.json");
        std::fs::write(
            &config,
            r#"{"commands": [{"cmd_id": "01", "resp_id": "81", "resp_hex": "00"}]}"#,
        )
        .unwrap();
        let opts = RuleOpts {
            config,
            delay: vec![("01".into(), 20)],
            trigger_after: vec![],
            resp: vec![],
            per_command_streak: false,
        };
        let rules = load_rules(&opts).unwrap();
        assert_eq!(rules[0].delay_ms, 20);

        let bad = RuleOpts {
            delay: vec![("02".into(), 20)],
            ..opts
        };
        assert!(load_rules(&bad).is_err());
    }
}
