use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use eyre::{Result, WrapErr};
use strata_core::{DesiredState, ResourceSpec};
use strata_provisioner::config::{default_config_path, load_config, StateSettings};
use strata_provisioner::{
    DestroyTarget, ExecutionReport, ProviderContext, ReconcileError, Reconciler, SandboxCloud,
    StrataConfig,
};
use strata_storage::StateStore;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Print the plan and exit.
    Plan,
    /// Plan, apply, exit.
    Apply,
    /// Tear down everything recorded in state.
    Destroy,
    /// Apply, then keep drift detection and scaling running until Ctrl-C.
    Run,
}

impl FromStr for Mode {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "plan" => Ok(Self::Plan),
            "apply" => Ok(Self::Apply),
            "destroy" => Ok(Self::Destroy),
            "run" => Ok(Self::Run),
            other => Err(eyre::eyre!(
                "unknown STRATA_MODE {other:?} (expected plan, apply, destroy or run)"
            )),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if env::var("STRATA_LOG_FORMAT").is_ok_and(|f| f == "json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_or_default_config() -> Result<StrataConfig> {
    let path = match env::var_os("STRATA_CONFIG") {
        Some(path) => PathBuf::from(path),
        None => default_config_path()?,
    };
    if !path.exists() {
        let region = env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string());
        tracing::info!(path = %path.display(), region = %region, "no config file, using defaults");
        return Ok(StrataConfig::new(ProviderContext::new(region)));
    }
    let config = load_config(&path)?;
    tracing::info!(
        path = %path.display(),
        region = %config.provider.region,
        credentials = %config.provider.credentials.describe(),
        "config loaded"
    );
    Ok(config)
}

fn load_desired() -> Result<DesiredState> {
    let path = env::var("STRATA_DESIRED").unwrap_or_else(|_| "desired.json".to_string());
    let contents = std::fs::read_to_string(&path)
        .wrap_err_with(|| format!("failed to read desired state at {path}"))?;
    let desired = DesiredState::from_json(&contents)
        .wrap_err_with(|| format!("failed to parse desired state at {path}"))?;
    tracing::info!(path = %path, resources = desired.resources.len(), "desired state loaded");
    Ok(desired)
}

fn print_report(report: &ExecutionReport) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

/// Print whatever part of a plan ran before the error, then pass it on.
fn finish(result: Result<ExecutionReport, ReconcileError>) -> Result<()> {
    match result {
        Ok(report) => print_report(&report),
        Err(e) => {
            if let Some(report) = e.report() {
                print_report(report)?;
            }
            Err(e.into())
        }
    }
}

/// Real provider adapters live outside this repository and the agent drives
/// the in-memory sandbox, so recorded state must not outlive it either.
fn sandbox_store(state: &StateSettings) -> StateStore {
    if state.local_path.is_some() || state.s3_bucket.is_some() {
        tracing::warn!(
            local_path = ?state.local_path,
            s3_bucket = ?state.s3_bucket,
            "ignoring configured state location, sandbox state lives in memory"
        );
    }
    StateStore::in_memory()
}

/// First reconcile in `run` mode. A failure is scoped to this plan: it is
/// reported and the loops start anyway.
async fn initial_reconcile(
    reconciler: &Reconciler,
    specs: &[ResourceSpec],
    shutdown: &CancellationToken,
) -> bool {
    match finish(reconciler.reconcile(specs, shutdown).await) {
        Ok(()) => true,
        Err(e) => {
            tracing::error!(error = %e, "initial reconcile did not complete");
            false
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    init_tracing();

    let mode: Mode = env::var("STRATA_MODE")
        .unwrap_or_else(|_| "run".to_string())
        .parse()?;
    let config = load_or_default_config()?;

    let store = Arc::new(sandbox_store(&config.state));
    let cloud = SandboxCloud::new();
    let reconciler = Reconciler::with_tracing(
        cloud.registry(),
        store,
        config.provider.clone(),
        &config.engine,
    );

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
                shutdown.cancel();
            }
        });
    }

    match mode {
        Mode::Plan => {
            let desired = load_desired()?;
            let plan = reconciler.plan(&desired.resources)?;
            println!("{}", serde_json::to_string_pretty(&plan)?);
        }
        Mode::Apply => {
            let desired = load_desired()?;
            finish(reconciler.reconcile(&desired.resources, &shutdown).await)?;
        }
        Mode::Destroy => {
            let plan = reconciler.plan_destroy(&DestroyTarget::All)?;
            finish(reconciler.destroy(&plan, &shutdown).await)?;
        }
        Mode::Run => {
            let desired = load_desired()?;
            initial_reconcile(&reconciler, &desired.resources, &shutdown).await;

            let loops = reconciler.spawn_loops(
                config.engine.drift_interval(),
                config.engine.scaling_interval(),
                &shutdown,
            );
            shutdown.cancelled().await;
            for handle in loops {
                handle.await?;
            }
        }
    }

    tracing::info!("agent finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{ResourceId, ResourceStatus};
    use strata_provisioner::{CallKind, EngineSettings};

    fn layered_app() -> Vec<ResourceSpec> {
        DesiredState::from_json(include_str!("../desired/layered-app.json"))
            .unwrap()
            .resources
    }

    fn sandbox_reconciler(cloud: &SandboxCloud, store: StateStore) -> Reconciler {
        Reconciler::with_tracing(
            cloud.registry(),
            Arc::new(store),
            ProviderContext::new("us-east-1"),
            &EngineSettings::default(),
        )
    }

    #[tokio::test]
    async fn failed_initial_reconcile_leaves_the_agent_running() {
        let cloud = SandboxCloud::new();
        let reconciler = sandbox_reconciler(&cloud, StateStore::in_memory());
        let db = ResourceId::new("db1").unwrap();
        cloud.fail_next(&db, CallKind::CreateOrUpdate, "insufficient capacity");

        let shutdown = CancellationToken::new();
        assert!(!initial_reconcile(&reconciler, &layered_app(), &shutdown).await);

        let net = reconciler.get_state(&ResourceId::new("net1").unwrap()).unwrap();
        assert_eq!(net.status, ResourceStatus::Applied);

        let loops = reconciler.spawn_loops(
            std::time::Duration::from_secs(60),
            std::time::Duration::from_secs(60),
            &shutdown,
        );
        shutdown.cancel();
        for handle in loops {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn configured_state_location_is_not_used_with_the_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let settings = StateSettings {
            local_path: Some(path.clone()),
            ..StateSettings::default()
        };

        let cloud = SandboxCloud::new();
        let reconciler = sandbox_reconciler(&cloud, sandbox_store(&settings));
        assert!(initial_reconcile(&reconciler, &layered_app(), &CancellationToken::new()).await);

        assert_eq!(reconciler.list_state().len(), 5);
        assert!(!path.exists());
    }
}
