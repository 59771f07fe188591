//! CLI de operación del runtime sobre los handlers de demostración.
//!
//! `intentflow submit|journey|status|replay|recover|cancel`. Los backends se
//! eligen por entorno (`DATABASE_URL`, `INTENTFLOW_WAL_PATH`) o con `--wal`.
//! Códigos de salida: 0 ok, 4 rechazo de dominio, 5 error de backend.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use intent_core::{ErrorCode, IntentError, JourneyStatus, Params};
use intentflow::bootstrap::build_stores;
use intentflow::demo::{demo_registry, document_matching_journey};
use intentflow::{AppConfig, ErrorBody, IntentService, SubmitIntentRequest, SubmitIntentResponse,
                 TriggerJourneyRequest};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "intentflow")]
#[command(about = "Intent execution and journey orchestration runtime", long_about = None)]
#[command(version)]
struct Cli {
    /// WAL en archivo (reemplaza INTENTFLOW_WAL_PATH)
    #[arg(long, global = true)]
    wal: Option<PathBuf>,

    #[arg(long, global = true, env = "INTENTFLOW_TENANT", default_value = "default")]
    tenant: String,

    #[arg(long, global = true, default_value = "cli")]
    session: String,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ejecuta un intent suelto y muestra su outcome
    Submit {
        intent_type: String,
        /// key=value; el valor se interpreta como JSON si parsea
        #[arg(short, long = "param")]
        params: Vec<String>,
    },
    /// Arranca una journey
    Journey {
        journey_id: String,
        #[arg(short, long = "param")]
        params: Vec<String>,
        /// No esperar ni mostrar eventos
        #[arg(long)]
        detach: bool,
    },
    /// Estado de una ejecución
    Status { execution_id: String },
    /// Estado reconstruido sólo desde el WAL
    Replay { execution_id: String },
    /// Retoma journeys abiertas y espera a que terminen
    Recover,
    /// Cancela una journey abierta
    Cancel { execution_id: String },
}

#[derive(Debug)]
enum CliError {
    Usage(String),
    Rejected(ErrorBody),
    Backend(String),
}

impl From<IntentError> for CliError {
    fn from(e: IntentError) -> Self {
        ErrorBody::from(e).into()
    }
}

impl From<ErrorBody> for CliError {
    fn from(body: ErrorBody) -> Self {
        match body.error_code {
            ErrorCode::StorageError => CliError::Backend(body.error),
            _ => CliError::Rejected(body),
        }
    }
}

type CliResult<T> = Result<T, CliError>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());
    tracing_subscriber::registry().with(env_filter)
                                  .with(tracing_subscriber::fmt::layer().without_time().with_writer(std::io::stderr))
                                  .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(CliError::Usage(msg)) => {
            eprintln!("[intentflow] {msg}");
            ExitCode::from(2)
        }
        Err(CliError::Rejected(body)) => {
            print_json(&body);
            ExitCode::from(4)
        }
        Err(CliError::Backend(msg)) => {
            eprintln!("[intentflow] backend error: {msg}");
            ExitCode::from(5)
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let mut cfg = AppConfig::from_env()?;
    if cli.wal.is_some() {
        cfg.wal_path = cli.wal.clone();
    }
    let (stores, backend) = build_stores(&cfg)?;
    tracing::debug!(%backend, "stores ready");
    let mut service = IntentService::new(demo_registry()?, stores, cfg.runtime.clone())?.with_intent_history(cfg.intent_history);
    service.compose_journey(document_matching_journey()?)?;

    match cli.command {
        Commands::Submit { intent_type, params } => {
            let req = SubmitIntentRequest { intent_type,
                                            params: parse_params(&params)?,
                                            tenant_id: cli.tenant,
                                            session_id: cli.session };
            match service.submit_intent(req).await {
                SubmitIntentResponse::Failed(body) => Err(body.into()),
                ok => {
                    print_json(&ok);
                    Ok(())
                }
            }
        }
        Commands::Journey { journey_id, params, detach } => {
            let req = TriggerJourneyRequest { journey_id,
                                              params: parse_params(&params)?,
                                              tenant_id: cli.tenant,
                                              session_id: cli.session };
            if detach {
                let started = service.trigger_journey(req).await?;
                println!("{}", started.execution_id);
                return Ok(());
            }
            let (started, mut events) = service.trigger_journey_subscribed(req).await?;
            while let Some(ev) = events.next().await {
                println!("{:<18} {:<10} {}", ev.event_type, ev.step_name.as_deref().unwrap_or("-"), ev.payload);
            }
            if events.lagged() {
                tracing::warn!("event stream fell behind; waiting for the journey to finish");
                service.orchestrator().wait(&started.execution_id).await?;
            }
            let status = service.query_status(&started.execution_id).await?;
            print_json(&status);
            finished_ok(status.status)
        }
        Commands::Status { execution_id } => {
            print_json(&service.query_status(&execution_id).await?);
            Ok(())
        }
        Commands::Replay { execution_id } => {
            print_json(&service.orchestrator().replay(&execution_id).await?);
            Ok(())
        }
        Commands::Recover => {
            let report = service.orchestrator().recover().await?;
            for (execution_id, err) in &report.refused {
                eprintln!("refused {execution_id}: {err}");
            }
            for execution_id in &report.resumed {
                let finished = service.orchestrator().wait(execution_id).await?;
                println!("{execution_id} {:?}", finished.status);
            }
            if report.resumed.is_empty() && report.refused.is_empty() {
                println!("nothing to recover");
            }
            Ok(())
        }
        Commands::Cancel { execution_id } => {
            service.orchestrator().cancel(&execution_id).await?;
            println!("cancel requested for {execution_id}");
            Ok(())
        }
    }
}

fn finished_ok(status: JourneyStatus) -> CliResult<()> {
    match status {
        JourneyStatus::Completed => Ok(()),
        other => Err(CliError::Rejected(ErrorBody { error: format!("journey finished as {other:?}"),
                                                    error_code: ErrorCode::RuntimeError,
                                                    execution_id: None })),
    }
}

/// `key=value`; el valor se toma como JSON cuando parsea, si no como texto.
fn parse_params(raw: &[String]) -> CliResult<Params> {
    let mut params = Params::new();
    for pair in raw {
        let (key, value) = pair.split_once('=')
                               .ok_or_else(|| CliError::Usage(format!("param '{pair}' is not key=value")))?;
        if key.trim().is_empty() {
            return Err(CliError::Usage(format!("param '{pair}' has an empty key")));
        }
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        params.insert(key.trim().to_string(), value);
    }
    Ok(params)
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("[intentflow] unserializable output: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn params_prefer_json_values() {
        let p = parse_params(&["n=3".into(), "doc=hello world".into(), "flag=true".into()]).unwrap();
        assert_eq!(p["n"], json!(3));
        assert_eq!(p["doc"], json!("hello world"));
        assert_eq!(p["flag"], json!(true));
    }

    #[test]
    fn params_reject_missing_separator() {
        assert!(matches!(parse_params(&["oops".into()]), Err(CliError::Usage(_))));
        assert!(matches!(parse_params(&["=v".into()]), Err(CliError::Usage(_))));
    }

    #[test]
    fn storage_errors_map_to_backend() {
        let e: CliError = IntentError::Storage("down".into()).into();
        assert!(matches!(e, CliError::Backend(_)));
        let e: CliError = IntentError::Validation("bad".into()).into();
        assert!(matches!(e, CliError::Rejected(_)));
    }

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
