use super::report::write_report;
use anyhow::Context;
use shardstrap::{
    AdminOp, BootstrapConfig, BootstrapOrchestrator, BootstrapPlan, BootstrapReport, EXIT_DONE,
    InMemoryCluster,
};
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, event};

/// Loads a config with environment overrides; prints the problem on failure.
fn load(path: &Path) -> Result<BootstrapConfig, u8> {
    BootstrapConfig::load(path).map_err(|err| {
        eprintln!("{}: {}", path.display(), err);
        err.exit_code()
    })
}

pub fn validate(path: &Path) -> anyhow::Result<u8> {
    let config = match load(path) {
        Ok(config) => config,
        Err(code) => return Ok(code),
    };
    println!(
        "{}: ok ({} shard groups, {} routers, {} collections)",
        path.display(),
        config.topology.shards.len(),
        config.topology.routers.len(),
        config.schema.collections.len()
    );
    Ok(EXIT_DONE)
}

pub fn plan(path: &Path) -> anyhow::Result<u8> {
    let config = match load(path) {
        Ok(config) => config,
        Err(code) => return Ok(code),
    };
    let rendered = BootstrapPlan::build(&config)
        .to_json_pretty()
        .context("render plan")?;
    println!("{}", rendered);
    Ok(EXIT_DONE)
}

pub async fn simulate(
    path: &Path,
    flaky_ops: u32,
    election_delay: u32,
    report_path: Option<&Path>,
) -> anyhow::Result<u8> {
    let config = match load(path) {
        Ok(config) => config,
        Err(code) => return Ok(code),
    };

    let cluster = InMemoryCluster::from_topology(&config.topology);
    cluster.set_election_delay(election_delay).await;
    if flaky_ops > 0 {
        for op in AdminOp::ALL.into_iter().filter(AdminOp::is_mutation) {
            cluster.inject_failures(op, flaky_ops).await;
        }
    }

    let orchestrator = BootstrapOrchestrator::new(Arc::new(cluster), config)
        .context("build orchestrator")?;

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            event!(Level::WARN, "interrupt received, cancelling bootstrap");
            interrupt.cancel();
        }
    });

    let result = orchestrator.run(&cancel).await;
    Ok(conclude(result, &orchestrator.report(), report_path))
}

/// Prints the outcome, writes the report if requested and returns the exit status.
///
/// A report that cannot be written is logged; the status always reflects the run.
fn conclude(
    result: shardstrap::Result<BootstrapReport>,
    report: &BootstrapReport,
    report_path: Option<&Path>,
) -> u8 {
    let code = match result {
        Ok(done) => {
            println!(
                "bootstrap {} reached {} ({} shards registered, {} collections)",
                done.run_id,
                done.phase,
                done.registered_shards.len(),
                done.collections.len()
            );
            EXIT_DONE
        }
        Err(err) => {
            eprintln!("bootstrap {} failed: {}", report.run_id, err);
            err.exit_code()
        }
    };

    if let Some(report_path) = report_path {
        if let Err(err) = write_report(report_path, report) {
            event!(
                Level::WARN,
                path = %report_path.display(),
                error = %format!("{:#}", err),
                "could not write run report"
            );
        }
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardstrap::{BootstrapError, BootstrapState, EXIT_CANCELLED, EXIT_STEP_FAILED};
    use tempfile::TempDir;

    fn unwritable(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("missing").join("report.json")
    }

    #[test]
    fn test_unwritable_report_keeps_done_status() {
        let dir = TempDir::new().unwrap();
        let report: BootstrapReport = BootstrapState::default().into();

        let code = conclude(Ok(report.clone()), &report, Some(&unwritable(&dir)));

        assert_eq!(code, EXIT_DONE);
    }

    #[test]
    fn test_unwritable_report_keeps_failure_status() {
        let dir = TempDir::new().unwrap();
        let report: BootstrapReport = BootstrapState::default().into();

        let cancelled = conclude(
            Err(BootstrapError::cancelled("shard_groups")),
            &report,
            Some(&unwritable(&dir)),
        );
        let conflict = conclude(
            Err(BootstrapError::conflict("principal", "role mismatch")),
            &report,
            Some(&unwritable(&dir)),
        );

        assert_eq!(cancelled, EXIT_CANCELLED);
        assert_eq!(conflict, EXIT_STEP_FAILED);
    }

    #[test]
    fn test_report_written_after_outcome() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");
        let report: BootstrapReport = BootstrapState::default().into();

        let code = conclude(
            Err(BootstrapError::cancelled("balancer")),
            &report,
            Some(&path),
        );

        assert_eq!(code, EXIT_CANCELLED);
        assert!(path.exists());
    }
}
