use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use avd_launcher_lib::app::config::load_config;
use avd_launcher_lib::app::emulator::controller::{ControllerSettings, LifecycleController};
use avd_launcher_lib::app::logging::init_logging;
use avd_launcher_lib::app::models::AvdEvent;
use serde::Serialize;
use uuid::Uuid;

const DEFAULT_BOOT_TIMEOUT_SECS: u64 = 300;
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
struct Args {
    avd: Option<String>,
    cold: bool,
    boot_timeout: Duration,
    json: bool,
    keep_running: bool,
}

#[derive(Serialize)]
struct SmokeSummary {
    tool: &'static str,
    status: &'static str,
    trace_id: String,
    avd: Option<String>,
    sdk_env: std::collections::HashMap<String, String>,
    checks: Vec<SmokeCheck>,
}

#[derive(Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: &'static str, // pass|fail|skip
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut avd: Option<String> = None;
    let mut cold = false;
    let mut boot_timeout = Duration::from_secs(DEFAULT_BOOT_TIMEOUT_SECS);
    let mut json = false;
    let mut keep_running = false;

    let mut it = std::env::args().skip(1);
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--avd" => {
                avd = it
                    .next()
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty());
                if avd.is_none() {
                    return Err("--avd requires a value".to_string());
                }
            }
            "--cold" => {
                cold = true;
            }
            "--boot-timeout" => {
                let value = it
                    .next()
                    .ok_or_else(|| "--boot-timeout requires a value".to_string())?;
                let secs: u64 = value
                    .parse()
                    .map_err(|_| format!("Invalid --boot-timeout: {value}"))?;
                boot_timeout = Duration::from_secs(secs.max(1));
            }
            "--json" => {
                json = true;
            }
            "--keep-running" => {
                keep_running = true;
            }
            "-h" | "--help" => {
                return Err(
                    "Usage: cargo run --bin smoke -- [--avd NAME] [--cold] [--boot-timeout SECS] [--json] [--keep-running]\n"
                        .to_string(),
                );
            }
            other => return Err(format!("Unknown arg: {other}")),
        }
    }

    Ok(Args {
        avd,
        cold,
        boot_timeout,
        json,
        keep_running,
    })
}

fn run_check<F>(checks: &mut Vec<SmokeCheck>, name: &'static str, f: F) -> Result<(), ()>
where
    F: FnOnce() -> Result<Option<String>, (&'static str, String)>,
{
    let start = Instant::now();
    match f() {
        Ok(detail) => {
            checks.push(SmokeCheck {
                name,
                status: "pass",
                duration_ms: start.elapsed().as_millis(),
                detail,
                error_code: None,
                error: None,
            });
            Ok(())
        }
        Err((code, err)) => {
            checks.push(SmokeCheck {
                name,
                status: "fail",
                duration_ms: start.elapsed().as_millis(),
                detail: None,
                error_code: Some(code),
                error: Some(err),
            });
            Err(())
        }
    }
}

fn skip(checks: &mut Vec<SmokeCheck>, name: &'static str, reason: &str) {
    checks.push(SmokeCheck {
        name,
        status: "skip",
        duration_ms: 0,
        detail: Some(reason.to_string()),
        error_code: None,
        error: None,
    });
}

/// Blocks until `wanted` arrives, printing log lines when not in JSON mode.
fn wait_for_event(
    events: &Receiver<AvdEvent>,
    wanted: &AvdEvent,
    timeout: Duration,
    echo_logs: bool,
) -> Result<(), String> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(format!(
                "timed out after {}s waiting for {}",
                timeout.as_secs(),
                wanted.name()
            ));
        }
        match events.recv_timeout(remaining) {
            Ok(event) if &event == wanted => return Ok(()),
            Ok(AvdEvent::Log(line)) => {
                if echo_logs {
                    println!("{line}");
                }
            }
            Ok(AvdEvent::Shutdown(name)) => {
                return Err(format!("emulator '{name}' shut down unexpectedly"));
            }
            Ok(_) => {}
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err("event channel closed".to_string());
            }
        }
    }
}

fn finish(summary: SmokeSummary, json: bool) -> ! {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).unwrap_or_default()
        );
    } else {
        println!("{} [{}] trace_id={}", summary.tool, summary.status, summary.trace_id);
        for check in &summary.checks {
            let note = check
                .error
                .as_deref()
                .or(check.detail.as_deref())
                .unwrap_or("");
            println!(
                "  {:<14} {:<5} {:>7}ms {}",
                check.name, check.status, check.duration_ms, note
            );
        }
    }
    std::process::exit(if summary.status == "pass" { 0 } else { 1 });
}

fn main() {
    let args = match parse_args() {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let trace_id = Uuid::new_v4().to_string();
    let mut checks: Vec<SmokeCheck> = Vec::new();

    let config = match load_config(&trace_id) {
        Ok(cfg) => cfg,
        Err(err) => {
            checks.push(SmokeCheck {
                name: "load_config",
                status: "fail",
                duration_ms: 0,
                detail: None,
                error_code: Some("ERR_CONFIG"),
                error: Some(err.to_string()),
            });
            let summary = SmokeSummary {
                tool: "avd_launcher_smoke",
                status: "fail",
                trace_id,
                avd: args.avd,
                sdk_env: Default::default(),
                checks,
            };
            finish(summary, args.json);
        }
    };
    // JSON mode keeps stdout clean for the summary.
    if !args.json {
        init_logging(&config.logging.log_level);
    }

    let (tx, events) = mpsc::channel::<AvdEvent>();
    let tx = Mutex::new(tx);
    let controller = LifecycleController::with_system_executor(
        ControllerSettings::from_config(&config),
        Arc::new(move |event: AvdEvent| {
            if let Ok(tx) = tx.lock() {
                let _ = tx.send(event);
            }
        }),
    );
    let sdk_env = controller.sdk_env();

    let mut avd = args.avd.clone();
    let mut status = "pass";

    if run_check(&mut checks, "list_avds", || {
        let avds = controller
            .list_avds()
            .map_err(|err| (err.code(), err.to_string()))?;
        if let Some(name) = &avd {
            if !avds.contains(name) {
                return Err(("ERR_NOT_FOUND", format!("AVD '{name}' is not installed")));
            }
        }
        let detail = avds.join(", ");
        avd = avd.take().or_else(|| avds.into_iter().next());
        Ok(Some(detail))
    })
    .is_err()
    {
        status = "fail";
    }

    let started = match (&avd, status) {
        (Some(name), "pass") => run_check(&mut checks, "start_avd", || {
            let outcome = controller
                .start(name, args.cold)
                .map_err(|err| (err.code(), err.to_string()))?;
            Ok(Some(format!(
                "pid={:?} instance={} recovered_lock={}",
                outcome.pid, outcome.instance_id, outcome.recovered_lock
            )))
        })
        .is_ok(),
        _ => {
            skip(&mut checks, "start_avd", "no AVD available");
            false
        }
    };
    if !started {
        status = "fail";
    }

    let booted = match (&avd, started) {
        (Some(name), true) => run_check(&mut checks, "wait_boot", || {
            wait_for_event(
                &events,
                &AvdEvent::Booted(name.clone()),
                args.boot_timeout,
                !args.json,
            )
            .map_err(|err| ("ERR_BOOT_TIMEOUT", err))?;
            Ok(None)
        })
        .is_ok(),
        _ => {
            skip(&mut checks, "wait_boot", "emulator not started");
            false
        }
    };
    if started && !booted {
        status = "fail";
    }

    match (&avd, started) {
        (Some(_), true) if args.keep_running && booted => {
            skip(&mut checks, "stop_avd", "--keep-running");
        }
        (Some(name), true) => {
            let stopped = run_check(&mut checks, "stop_avd", || {
                controller
                    .stop(name)
                    .map_err(|err| (err.code(), err.to_string()))?;
                Ok(None)
            })
            .is_ok();
            if !stopped {
                status = "fail";
            } else if run_check(&mut checks, "wait_shutdown", || {
                wait_for_event(
                    &events,
                    &AvdEvent::Shutdown(name.clone()),
                    SHUTDOWN_TIMEOUT,
                    !args.json,
                )
                .map_err(|err| ("ERR_SHUTDOWN_TIMEOUT", err))?;
                Ok(None)
            })
            .is_err()
            {
                status = "fail";
            }
        }
        _ => skip(&mut checks, "stop_avd", "emulator not started"),
    }

    let summary = SmokeSummary {
        tool: "avd_launcher_smoke",
        status,
        trace_id,
        avd,
        sdk_env,
        checks,
    };
    finish(summary, args.json);
}
