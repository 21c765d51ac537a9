use std::fs;
use std::path::PathBuf;

use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use solar_optly_core::config::{AppConfig, ControllerConfig};
use solar_optly_core::eligibility::{
    AnalyticsEvent, EligibilityEvaluator, EvaluationContext, EventAction, RuleMismatch,
};
use solar_optly_core::error::AppError;
use solar_optly_core::iframe::AppDestination;
use solar_optly_core::sim::Scenario;
use solar_optly_core::state::PrefillCapture;
use solar_optly_core::telemetry;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "solar-optly",
    about = "Inspect and rehearse the solar funnel's host-page controller",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a scripted scenario through the simulated browser
    Simulate(SimulateArgs),
    /// Evaluate a single analytics event against the eligibility rules
    Evaluate(EvaluateArgs),
    /// Print the iframe destination URL for the given prefill values
    AppUrl(AppUrlArgs),
}

#[derive(Args, Debug)]
struct SimulateArgs {
    /// Scenario JSON file
    scenario: PathBuf,
    /// Controller settings JSON overriding the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Print only the final page snapshot
    #[arg(long)]
    summary: bool,
}

#[derive(Args, Debug)]
struct EvaluateArgs {
    /// Analytics event JSON file
    event: PathBuf,
    /// Controller settings JSON overriding the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,
    /// Evaluate as if the visitor had already qualified
    #[arg(long)]
    qualified: bool,
    /// Evaluate as if the phone-number step had been reached
    #[arg(long)]
    submit_stage_armed: bool,
}

#[derive(Args, Debug)]
struct AppUrlArgs {
    #[arg(long)]
    postcode: Option<String>,
    #[arg(long)]
    first_name: Option<String>,
    /// Timestamp in epoch milliseconds (defaults to now)
    #[arg(long)]
    ts: Option<i64>,
}

#[derive(Debug, Serialize)]
struct EvaluationReport {
    event: String,
    eligible: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    mismatch: Option<RuleMismatch>,
    actions: Vec<EventAction>,
}

fn main() {
    if let Err(err) = run_cli() {
        eprintln!("application error: {err}");
        std::process::exit(1);
    }
}

fn run_cli() -> Result<(), AppError> {
    let cli = Cli::parse();
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    match cli.command {
        Command::Simulate(args) => run_simulation(config, args),
        Command::Evaluate(args) => run_evaluation(config, args),
        Command::AppUrl(args) => {
            println!("{}", app_url(&config.controller, &args));
            Ok(())
        }
    }
}

fn with_overrides(config: AppConfig, path: Option<PathBuf>) -> Result<AppConfig, AppError> {
    match path {
        Some(path) => Ok(config.with_controller_file(path)?),
        None => Ok(config),
    }
}

fn run_simulation(config: AppConfig, args: SimulateArgs) -> Result<(), AppError> {
    let config = with_overrides(config, args.config)?;
    let scenario = Scenario::from_path(&args.scenario)?;
    info!(scenario = %scenario.name, steps = scenario.steps.len(), "running scenario");

    let report = scenario.run(&config.controller)?;
    let output = if args.summary {
        serde_json::to_string_pretty(&report.snapshot)?
    } else {
        serde_json::to_string_pretty(&report)?
    };
    println!("{output}");
    Ok(())
}

fn run_evaluation(config: AppConfig, args: EvaluateArgs) -> Result<(), AppError> {
    let config = with_overrides(config, args.config)?;
    let raw = fs::read_to_string(&args.event)?;
    let value: Value = serde_json::from_str(&raw)?;
    let context = EvaluationContext {
        qualified: args.qualified,
        submit_stage_armed: args.submit_stage_armed,
    };

    let report = evaluate(&config.controller, &value, context);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn evaluate(config: &ControllerConfig, value: &Value, context: EvaluationContext) -> EvaluationReport {
    let Some(event) = AnalyticsEvent::from_value(value) else {
        return EvaluationReport {
            event: "(not an object)".to_string(),
            eligible: false,
            mismatch: None,
            actions: Vec::new(),
        };
    };

    let mismatch = config.required_answers.check(&event.answers).err();
    EvaluationReport {
        event: event.kind.as_str().to_string(),
        eligible: mismatch.is_none(),
        mismatch,
        actions: EligibilityEvaluator::new(&config.required_answers).evaluate(&event, context),
    }
}

fn app_url(config: &ControllerConfig, args: &AppUrlArgs) -> String {
    let prefill = PrefillCapture {
        postcode: args.postcode.clone(),
        first_name: args.first_name.clone(),
        ..PrefillCapture::default()
    };
    let ts = args.ts.unwrap_or_else(|| Utc::now().timestamp_millis());
    AppDestination::new(&config.app_url).build(ts, &prefill)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "solar-optly",
            "evaluate",
            "event.json",
            "--qualified",
            "--submit-stage-armed",
        ])
        .expect("arguments parse");
        let Command::Evaluate(args) = cli.command else {
            panic!("expected evaluate");
        };
        assert!(args.qualified);
        assert!(args.submit_stage_armed);
        assert_eq!(args.event, PathBuf::from("event.json"));

        let cli = Cli::try_parse_from(["solar-optly", "app-url", "--first-name", "Ada", "--ts", "7"])
            .expect("arguments parse");
        assert!(matches!(cli.command, Command::AppUrl(AppUrlArgs { ts: Some(7), .. })));
    }

    #[test]
    fn evaluation_report_explains_a_mismatch() {
        let config = ControllerConfig::default();
        let report = evaluate(
            &config,
            &json!({
                "event": "webform_submission_completed",
                "answers": {"a2f8b4ab-f96c-11e4-824b-22000a699fb3": "no"}
            }),
            EvaluationContext::default(),
        );

        assert!(!report.eligible);
        let mismatch = report.mismatch.expect("first failing rule reported");
        assert_eq!(mismatch.question_id, "a2f8b4ab-f96c-11e4-824b-22000a699fb3");
        assert_eq!(mismatch.received, "no");
        assert_eq!(report.event, "webform_submission_completed");
    }

    #[test]
    fn non_object_events_are_reported_as_such() {
        let report = evaluate(&ControllerConfig::default(), &json!("gtm.dom"), EvaluationContext::default());
        assert_eq!(report.event, "(not an object)");
        assert!(report.actions.is_empty());
    }

    #[test]
    fn app_url_uses_the_given_timestamp() {
        let args = AppUrlArgs {
            postcode: Some("SW1A1AA".to_string()),
            first_name: None,
            ts: Some(1_000),
        };
        assert_eq!(
            app_url(&ControllerConfig::default(), &args),
            "https://solar-form-optly-def.vercel.app/loader?optly_iframe=1&ts=1000&prefill_postcode=SW1A1AA"
        );
    }
}
