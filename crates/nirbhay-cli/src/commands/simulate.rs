use std::time::Duration;

use clap::{Args, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tracing::warn;

use nirbhay_config::NirbhayConfig;
use nirbhay_core::{Event, EventBus, Guardians, Trip};
use nirbhay_runtime::{MonitorDeps, TripHandle, TripMonitor};
use nirbhay_sensing::{Scenario, SimulatedProvider, SimulationSettings};

#[derive(Args, Debug)]
pub(super) struct SimulateArgs {
    /// Journey to simulate: calm, panic, gps-loss, stopped
    #[arg(short, long, default_value = "panic")]
    pub scenario: String,

    /// Guardian phone numbers, primary first (up to three)
    #[arg(short, long = "guardian", default_value = "+919876543210")]
    pub guardians: Vec<String>,

    /// Answer every safety check automatically
    #[arg(short, long, value_enum)]
    pub answer: Option<Answer>,

    /// Safety code to enter after answering yes
    #[arg(long, requires = "answer")]
    pub code: Option<String>,

    /// Read answers from stdin (y, n, a 4-digit code, a scenario name, status, q)
    #[arg(short, long, conflicts_with = "answer")]
    pub interactive: bool,

    /// End the trip after this many seconds
    #[arg(short, long, default_value_t = 120)]
    pub duration: u64,

    /// Print events as JSON lines
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(super) enum Answer {
    Yes,
    No,
}

pub(super) async fn cmd_simulate(config: NirbhayConfig, args: SimulateArgs) -> nirbhay_core::Result<()> {
    let scenario: Scenario = args.scenario.parse()?;
    if args.guardians.len() > 3 {
        warn!(given = args.guardians.len(), "only the first three guardians are used");
    }
    let mut phones = args.guardians.iter().map(String::as_str);
    let guardians = Guardians::from_phones(phones.next(), phones.next(), phones.next(), None)?;
    let trip = Trip::new("simulator", guardians);

    let provider = SimulatedProvider::new(SimulationSettings::default(), scenario);
    let scenario_tx = provider.scenario_control();
    let (telemetry, dispatcher) = nirbhay_runtime::connect(&config);
    let events = EventBus::default();
    let mut rx = events.subscribe();

    println!("Nirbhay simulator v{}", env!("CARGO_PKG_VERSION"));
    println!("   Scenario: {}", args.scenario);
    println!("   Countdown: {}s", config.escalation.countdown_secs);
    println!("   Telemetry: {}", telemetry.port_name());
    if args.interactive {
        println!("   Type y / n / <code> to answer, a scenario name to switch, status, or q to end.");
    }
    println!();

    let handle = TripMonitor::start(
        trip,
        MonitorDeps {
            config,
            provider: Box::new(provider),
            dispatcher,
            telemetry,
            events,
        },
    )
    .await?;

    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = args.interactive;
    let mut ending = false;

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Ok(event) => {
                    print_event(&event, args.json)?;
                    match event {
                        Event::SafetyCheckStarted { .. } => {
                            if let Some(answer) = args.answer {
                                respond(&handle, answer, args.code.as_deref()).await;
                            }
                        }
                        Event::TripEnded { .. } => break,
                        _ => {}
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event output fell behind"),
                Err(RecvError::Closed) => break,
            },
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) => {
                    if !handle_line(&handle, &scenario_tx, line.trim()).await? && !ending {
                        ending = true;
                        handle.end().await?;
                    }
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
            _ = &mut deadline, if !ending => {
                println!("time limit reached, ending trip");
                ending = true;
                handle.end().await?;
            }
            _ = tokio::signal::ctrl_c(), if !ending => {
                ending = true;
                handle.end().await?;
            }
        }
    }

    let trip = handle.wait().await?;
    println!();
    println!("Trip {} finished: {}", trip.id, trip.status);
    Ok(())
}

/// Apply a scripted answer to an open safety check.
async fn respond(handle: &TripHandle, answer: Answer, code: Option<&str>) {
    let mut result = handle.answer(answer == Answer::Yes).await;
    if answer == Answer::Yes && result.is_ok() {
        if let Some(code) = code {
            result = handle.enter_code(code).await;
        }
    }
    match result {
        Ok(state) => println!("   -> {state}"),
        Err(e) => warn!(error = %e, "answer not accepted"),
    }
}

/// Handle one line of interactive input. Returns false when the user quits.
async fn handle_line(
    handle: &TripHandle,
    scenario_tx: &watch::Sender<Scenario>,
    line: &str,
) -> nirbhay_core::Result<bool> {
    let result = match line.to_ascii_lowercase().as_str() {
        "" => return Ok(true),
        "q" | "quit" | "end" => return Ok(false),
        "y" | "yes" => handle.answer(true).await,
        "n" | "no" => handle.answer(false).await,
        "status" => {
            let snapshot = handle.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
            return Ok(true);
        }
        code if code.len() == 4 && code.chars().all(|c| c.is_ascii_digit()) => handle.enter_code(code).await,
        other => {
            match other.parse::<Scenario>() {
                Ok(scenario) => {
                    scenario_tx.send_replace(scenario);
                    println!("   scenario -> {other}");
                }
                Err(_) => println!("   unrecognised input '{other}'"),
            }
            return Ok(true);
        }
    };
    match result {
        Ok(state) => println!("   -> {state}"),
        Err(e) => println!("   \x1b[33m{e}\x1b[0m"),
    }
    Ok(true)
}

fn print_event(event: &Event, json: bool) -> nirbhay_core::Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    // Color-code by severity
    let color = match event {
        Event::AlertDispatched { .. } | Event::RiskDetected { .. } | Event::PanicOnset { .. } => "\x1b[31m",
        Event::SafetyCheckStarted { .. } | Event::CountdownTick { .. } | Event::NoLocationAvailable { .. } => {
            "\x1b[33m"
        }
        Event::SafetyCheckResolved { safe: true, .. } | Event::TripEnded { .. } => "\x1b[32m",
        Event::LocationRecorded { .. } | Event::Heartbeat { .. } => "\x1b[90m",
        _ => "\x1b[37m",
    };
    let ts = chrono::Local::now().format("%H:%M:%S");
    println!("\x1b[90m{ts}\x1b[0m  {color}{}\x1b[0m", describe(event));
    Ok(())
}

/// One-line human description of an event.
fn describe(event: &Event) -> String {
    match event {
        Event::TripStarted { trip_id, guardians } => format!("trip {trip_id} started, {guardians} guardian(s)"),
        Event::TripEnded { status, .. } => format!("trip ended ({status})"),
        Event::PanicOnset {
            accel_variance,
            gyro_variance,
            ..
        } => format!("panic movement (accel var {accel_variance:.2}, gyro var {gyro_variance:.2})"),
        Event::LocationRecorded { source, accuracy, .. } => format!("location via {source}, ±{accuracy:.0} m"),
        Event::NoLocationAvailable { .. } => "no location available".to_string(),
        Event::RiskDetected { rule, confidence, .. } => {
            format!("risk {rule} (confidence {confidence:.2}): {}", rule.description())
        }
        Event::RiskDiscarded { rule, .. } => format!("risk {rule} ignored, safety check already open"),
        Event::SafetyCheckStarted { countdown_secs, .. } => {
            format!("ARE YOU SAFE? answer within {countdown_secs}s")
        }
        Event::CountdownTick { remaining_secs, .. } => format!("{remaining_secs}s left"),
        Event::SafetyCheckResolved { safe, reason, .. } => {
            let verdict = if *safe { "safe" } else { "not safe" };
            format!("safety check resolved: {verdict} ({reason})")
        }
        Event::AlertDispatched {
            push_sent, sms_sent, ..
        } => format!("guardians alerted (sms: {sms_sent}, push: {push_sent})"),
        Event::Heartbeat { timestamp } => format!("heartbeat {timestamp}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nirbhay_core::{LocationSource, RiskRuleId, TripStatus};
    use uuid::Uuid;

    #[test]
    fn test_describe_risk_and_alert() {
        let trip_id = Uuid::new_v4();
        let risk = describe(&Event::RiskDetected {
            trip_id,
            rule: RiskRuleId::PanicMovementNight,
            confidence: 0.85,
        });
        assert_eq!(
            risk,
            "risk PANIC_MOVEMENT_NIGHT (confidence 0.85): Panic movement during night hours"
        );

        let alert = describe(&Event::AlertDispatched {
            trip_id,
            push_sent: false,
            sms_sent: true,
        });
        assert!(alert.contains("sms: true"));
    }

    #[test]
    fn test_describe_location_and_end() {
        let trip_id = Uuid::new_v4();
        let loc = describe(&Event::LocationRecorded {
            trip_id,
            source: LocationSource::Fallback,
            accuracy: 92.4,
        });
        assert_eq!(loc, "location via fallback, ±92 m");

        let end = describe(&Event::TripEnded {
            trip_id,
            status: TripStatus::Alert,
        });
        assert_eq!(end, "trip ended (alert)");
    }
}
