//! Migrate the workload objects of one namespace to the current release
//!
//! Meant to run once after each upgrade, before the new release starts
//! serving. Exits non-zero when any object failed to migrate; rerunning is
//! safe and only touches the objects left behind.
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::Client;
use lrp::{Config, Engine, Stores};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(version, about)]
struct App {
    /// Namespace holding the workloads
    #[arg(long, short, env = "LRP_NAMESPACE")]
    namespace: String,
    /// Engine configuration as YAML, defaults apply without one
    #[arg(long, short, env = "LRP_CONFIG")]
    config: Option<PathBuf>,
    /// Log as JSON lines
    #[arg(long)]
    json_logs: bool,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let Some(path) = path else {
        return Ok(Config::default());
    };
    let yaml = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Config::from_yaml(&yaml).with_context(|| format!("invalid config {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let app = App::parse();
    init_tracing(app.json_logs);

    let config = load_config(app.config.as_ref())?;
    let client = Client::try_default().await.context("failed to connect to the cluster")?;
    let engine = Engine::new(&config, Stores::kube(client, config.store_timeout()))?;

    let report = engine.migrations.migrate(&app.namespace).await?;
    for (object, err) in &report.failed {
        error!(%object, error = %err, "not migrated");
    }
    info!(
        migrated = report.migrated.len(),
        up_to_date = report.skipped.len(),
        failed = report.failed.len(),
        "done"
    );
    if !report.is_success() {
        bail!("{} objects failed to migrate", report.failed.len());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_shape_is_valid() {
        use clap::CommandFactory;
        App::command().debug_assert();
    }

    #[test]
    fn parses_namespace_and_flags() {
        let app = App::try_parse_from(["lrp-migrate", "--namespace", "apps", "--json-logs"]).unwrap();
        assert_eq!(app.namespace, "apps");
        assert!(app.json_logs);
        assert!(app.config.is_none());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load_config(Some(&PathBuf::from("/nonexistent/lrp.yaml"))).is_err());
        assert_eq!(load_config(None).unwrap(), Config::default());
    }
}
