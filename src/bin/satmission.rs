use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use satmission::events::Severity;
use satmission::mappers::MapperRegistry;
use satmission::{
    Fidelity, Plan, RunnerState, SimEvent, SimulationConfig, SimulationContext, SimulationResult,
};
use tracing::Level;

const DEFAULT_ALTITUDE_KM: &str = "500";
const DEFAULT_MASS_KG: &str = "150";
const DEFAULT_PROPELLANT_KG: &str = "20";

type CliResult = Result<(), Box<dyn std::error::Error>>;

fn main() {
    let matches = App::new("satmission")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Space Systems Engineering Team")
        .about("🛰️  Segment-based spacecraft mission simulator")
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Log simulation progress to stderr")
                .global(true),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Simulation configuration (JSON); defaults are used when omitted")
                .takes_value(true)
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("🚀 Simulate an activity plan")
                .arg(
                    Arg::with_name("plan")
                        .help("Activity plan (JSON)")
                        .required(true),
                )
                .arg(
                    Arg::with_name("initial")
                        .short("i")
                        .long("initial")
                        .value_name("FILE")
                        .help("Initial spacecraft state (JSON); overrides --altitude/--mass/--propellant")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("altitude")
                        .long("altitude")
                        .value_name("KM")
                        .help("Circular orbit altitude for the initial state")
                        .takes_value(true)
                        .default_value(DEFAULT_ALTITUDE_KM)
                        .validator(is_number),
                )
                .arg(
                    Arg::with_name("mass")
                        .long("mass")
                        .value_name("KG")
                        .help("Initial wet mass")
                        .takes_value(true)
                        .default_value(DEFAULT_MASS_KG)
                        .validator(is_number),
                )
                .arg(
                    Arg::with_name("propellant")
                        .long("propellant")
                        .value_name("KG")
                        .help("Initial propellant mass")
                        .takes_value(true)
                        .default_value(DEFAULT_PROPELLANT_KG)
                        .validator(is_number),
                )
                .arg(
                    Arg::with_name("fidelity")
                        .long("fidelity")
                        .value_name("LEVEL")
                        .help("Propagation fidelity")
                        .takes_value(true)
                        .possible_values(&["low", "medium", "high"])
                        .default_value("low"),
                )
                .arg(
                    Arg::with_name("strict")
                        .long("strict")
                        .help("Fail instead of falling back when the requested fidelity is unavailable"),
                )
                .arg(
                    Arg::with_name("output")
                        .short("o")
                        .long("output")
                        .value_name("FILE")
                        .help("Write the full result as JSON to FILE")
                        .takes_value(true),
                ),
        )
        .subcommand(
            SubCommand::with_name("validate")
                .about("🔍 Check a plan's activities without simulating")
                .arg(
                    Arg::with_name("plan")
                        .help("Activity plan (JSON)")
                        .required(true),
                ),
        )
        .get_matches();

    // Global args propagate down, so read them from the subcommand's matches.
    let (command, sub_matches) = matches.subcommand();
    let Some(sub_matches) = sub_matches else {
        return;
    };
    let format = sub_matches.value_of("format").unwrap_or("table");
    let level = if sub_matches.is_present("verbose") {
        Level::DEBUG
    } else {
        Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match command {
        "run" => handle_run(sub_matches, format),
        "validate" => handle_validate(sub_matches, format),
        _ => Ok(()),
    };

    if let Err(e) = outcome {
        eprintln!("{} {}", "❌ Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn is_number(value: String) -> Result<(), String> {
    value
        .parse::<f64>()
        .map(|_| ())
        .map_err(|_| format!("'{value}' is not a number"))
}

fn load_config(matches: &ArgMatches) -> Result<SimulationConfig, satmission::SimError> {
    match matches.value_of("config") {
        Some(path) => SimulationConfig::from_json_file(path),
        None => Ok(SimulationConfig::default()),
    }
}

fn number(matches: &ArgMatches, name: &str) -> Result<f64, Box<dyn std::error::Error>> {
    let raw = matches.value_of(name).ok_or_else(|| format!("missing --{name}"))?;
    Ok(raw.parse()?)
}

fn handle_run(matches: &ArgMatches, format: &str) -> CliResult {
    let mut config = load_config(matches)?;
    if matches.is_present("strict") {
        config.strict_fidelity = true;
    }

    let plan_path = matches.value_of("plan").ok_or("missing plan")?;
    let plan = Plan::from_json_file(plan_path)?;

    let initial = match matches.value_of("initial") {
        Some(path) => RunnerState::from_json_str(&std::fs::read_to_string(path)?)?,
        None => RunnerState::circular(
            plan.start,
            number(matches, "altitude")?,
            number(matches, "mass")?,
            number(matches, "propellant")?,
        ),
    };
    let fidelity = matches
        .value_of("fidelity")
        .and_then(Fidelity::parse)
        .unwrap_or(Fidelity::Low);

    let context = SimulationContext::new(config)?;
    let result = context.run(&plan, &initial, fidelity)?;

    if let Some(path) = matches.value_of("output") {
        std::fs::write(path, serde_json::to_string_pretty(&result)?)?;
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&result)?),
        "compact" => print_compact(&result),
        _ => print_result_table(&result),
    }

    if result.summary.violation_count > 0 {
        std::process::exit(2);
    }
    Ok(())
}

fn handle_validate(matches: &ArgMatches, format: &str) -> CliResult {
    let config = load_config(matches)?;
    let plan_path = matches.value_of("plan").ok_or("missing plan")?;
    let plan = Plan::from_json_file(plan_path)?;
    let registry = MapperRegistry::new();

    let mut findings: Vec<SimEvent> = Vec::new();
    for activity in plan.sorted_activities() {
        if !activity.kind.is_registered() {
            findings.push(
                SimEvent::warning(
                    activity.start,
                    satmission::EventCategory::Validation,
                    format!("unregistered activity kind '{}'", activity.kind),
                )
                .with_activity(activity.id.clone()),
            );
        }
        findings.extend(registry.validate(activity, &config));
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&findings)?),
        _ => {
            println!(
                "{} {} ({} activities)",
                "📋 Plan".bright_blue().bold(),
                plan.plan_id.bright_white(),
                plan.activities.len()
            );
            if findings.is_empty() {
                println!("{} {}", "✅".green(), "No findings".bright_green());
            }
            for event in &findings {
                print_event(event);
            }
        }
    }
    Ok(())
}

fn severity_label(severity: Severity) -> ColoredString {
    match severity {
        Severity::Info => "INFO".bright_cyan(),
        Severity::Warning => "WARNING".yellow(),
        Severity::Violation => "VIOLATION".bright_red().bold(),
    }
}

fn print_event(event: &SimEvent) {
    println!(
        "  {} {:<9} {:<11} {}{}",
        event.timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string().dimmed(),
        severity_label(event.severity),
        format!("{:?}", event.category),
        event.message,
        event
            .activity_id
            .as_deref()
            .map(|id| format!(" [{id}]"))
            .unwrap_or_default()
    );
}

fn print_compact(result: &SimulationResult) {
    let summary = &result.summary;
    let status = if summary.violation_count == 0 {
        "OK".bright_green()
    } else {
        "VIOLATIONS".bright_red()
    };
    println!(
        "{} segments={} warnings={} violations={} dv={:.2}m/s soc={:.3}",
        status,
        summary.segment_count,
        summary.warning_count,
        summary.violation_count,
        summary.deltas.delta_v_m_s,
        result.final_state.battery_soc
    );
}

fn print_result_table(result: &SimulationResult) {
    let summary = &result.summary;
    let state = &result.final_state;

    println!("\n{}", "🛰️  Mission Simulation".bright_blue().bold());
    println!("{}", "═════════════════════".bright_blue());
    println!("Plan:        {} ({})", summary.plan_id.bright_white(), summary.spacecraft_id);
    println!(
        "Propagator:  {} [{} requested, {} used]",
        summary.propagator.bright_cyan(),
        summary.requested_fidelity,
        summary.used_fidelity
    );
    if let Some(reason) = &summary.degradation_reason {
        println!("             {} {}", "degraded:".yellow(), reason);
    }
    println!("Seed:        {}", summary.seed);

    println!("\n{}", "📊 Segments".bright_white().bold());
    println!(
        "  {:<20} {:<22} {:<16} {:>9} {:>8}",
        "START", "TYPE", "ACTIVITY", "LOAD W", "ECLIPSE"
    );
    for segment in &result.segments {
        println!(
            "  {:<20} {:<22} {:<16} {:>9.1} {:>7.0}%",
            segment.start.format("%Y-%m-%dT%H:%M:%S").to_string(),
            format!("{:?}", segment.segment_type),
            segment.activity_id.as_deref().unwrap_or("-"),
            segment.load_w,
            segment.eclipse_fraction * 100.0
        );
    }

    println!("\n{}", "🔋 Final State".bright_white().bold());
    println!("  Altitude:    {:.3} km ({:+.3})", state.altitude_km(), summary.deltas.altitude_km);
    println!("  Battery SOC: {:.3} ({:+.3})", state.battery_soc, summary.deltas.battery_soc);
    println!("  Storage:     {:.2} GB ({:+.2})", state.storage_used_gb, summary.deltas.storage_gb);
    for (priority, volume_gb) in &summary.storage_by_priority {
        println!("    {:<13} {:.2} GB", priority.to_string(), volume_gb);
    }
    println!("  Propellant:  {:.4} kg ({:+.4})", state.propellant_kg, summary.deltas.propellant_kg);
    println!("  Delta-v:     {:.3} m/s", summary.deltas.delta_v_m_s);
    println!("  Mode:        {}", state.mode.to_string().bright_cyan());
    println!("  Eclipses:    {}", summary.eclipse_count);

    let notable: Vec<&SimEvent> = result
        .events
        .iter()
        .filter(|e| e.severity != Severity::Info)
        .collect();
    if !notable.is_empty() {
        println!("\n{}", "⚠️  Warnings and Violations".bright_white().bold());
        for event in notable {
            print_event(event);
        }
    }

    let verdict = if summary.violation_count == 0 {
        format!("✅ {} warnings, no violations", summary.warning_count).bright_green()
    } else {
        format!(
            "❌ {} violations, {} warnings",
            summary.violation_count, summary.warning_count
        )
        .bright_red()
    };
    println!("\n{}", verdict);
}
