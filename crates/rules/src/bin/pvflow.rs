//! pvflow: load record recipes and drive the rule engine from the command line.
//!
//! Subcommands:
//! - `check`: load and validate every recipe, print a summary
//! - `put <record> <field=value>...`: apply one request, print the committed record
//! - `script <file>`: run a YAML list of put/post/get steps against one registry

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};

use pvflow_core::config::{load_dotenv, Config};
use pvflow_core::Value;
use pvflow_rules::recipe::{install_recipes, LoadStatus};
use pvflow_rules::{CallerContext, FieldUpdates, MemoryRegistry, RecipeLoader};

// ── CLI ─────────────────────────────────────────────────────────────

/// Record processing rule engine driven by YAML recipes.
#[derive(Parser, Debug)]
#[command(name = "pvflow", version, about)]
struct Cli {
    /// Recipes directory (overrides PVFLOW_RECIPES_DIR from the profile).
    #[arg(long)]
    recipes_dir: Option<PathBuf>,

    /// Upper bound on any single registry operation, in seconds.
    #[arg(long, env = "PVFLOW_OP_TIMEOUT", default_value_t = 10)]
    op_timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load and validate all recipes.
    Check {
        /// Keep watching the recipes directory and re-validate on change.
        #[arg(long)]
        watch: bool,
    },
    /// Apply one request to a record.
    Put {
        record: String,
        /// Field assignments, e.g. `value=4.5` or `valueAlarm.active=false`.
        #[arg(required = true)]
        assignments: Vec<String>,
        /// Account recorded in the caller context.
        #[arg(long)]
        account: Option<String>,
    },
    /// Run a YAML list of steps.
    Script { file: PathBuf },
}

// ── Script steps ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Step {
    Put {
        record: String,
        fields: FieldUpdates,
        #[serde(default)]
        account: Option<String>,
    },
    Post {
        record: String,
        fields: FieldUpdates,
    },
    Get {
        record: String,
    },
}

fn parse_assignment(raw: &str) -> anyhow::Result<(String, Value)> {
    let (path, value) = raw
        .split_once('=')
        .ok_or_else(|| anyhow!("expected field=value, got '{}'", raw))?;
    let value: Value =
        serde_yaml::from_str(value).with_context(|| format!("invalid value in '{}'", raw))?;
    Ok((path.trim().to_string(), value))
}

fn caller(account: Option<String>) -> CallerContext {
    account.map(CallerContext::for_account).unwrap_or_default()
}

/// Run a blocking registry call off the async runtime, bounded by `timeout`.
async fn blocking<T, F>(timeout: Duration, f: F) -> anyhow::Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    tokio::time::timeout(timeout, tokio::task::spawn_blocking(f))
        .await
        .map_err(|_| anyhow!("operation timed out after {:?}", timeout))??
}

fn load_recipes(config: &Config) -> anyhow::Result<RecipeLoader> {
    let loader = RecipeLoader::new(config.recipes.recipes_dir.clone());
    let results = loader
        .load_all()
        .with_context(|| format!("scanning {}", config.recipes.recipes_dir.display()))?;

    let mut failed = 0;
    for result in &results {
        match &result.status {
            LoadStatus::Loaded { records } => {
                info!(path = %result.path.display(), records = records.len(), "ok");
            }
            LoadStatus::Skipped { reason } => {
                info!(path = %result.path.display(), %reason, "skipped");
            }
            LoadStatus::Failed { error } => {
                warn!(path = %result.path.display(), %error, "failed");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{} recipe file(s) failed to load", failed);
    }
    loader.check_links()?;
    Ok(loader)
}

async fn install(config: &Config, loader: &RecipeLoader, timeout: Duration) -> anyhow::Result<MemoryRegistry> {
    let registry = MemoryRegistry::new(config.registry.clone());
    let engine_config = config.engine.clone();
    let recipes = loader.recipes();
    let target = registry.clone();
    let installed = blocking(timeout, move || {
        Ok(install_recipes(&recipes, &target, &engine_config)?)
    })
    .await?;
    info!(records = installed.len(), "registry ready");
    Ok(registry)
}

fn print_summary(loader: &RecipeLoader) {
    for (name, recipe) in loader.recipes() {
        let kind = recipe.kind.map(|k| k.to_string()).unwrap_or_default();
        println!("{:<32} {:<8} {}", name, kind, recipe.description.unwrap_or_default());
    }
    println!("{} record(s) valid", loader.len());
}

/// Re-validate the trigger graph whenever the catalog changes, until Ctrl-C.
async fn watch_recipes(loader: &RecipeLoader) {
    let mut last = loader.recipes();
    let mut tick = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = tick.tick() => {
                let current = loader.recipes();
                if current == last {
                    continue;
                }
                match loader.check_links() {
                    Ok(()) => print_summary(loader),
                    Err(e) => warn!(error = %e, "recipe set no longer valid"),
                }
                last = current;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("stopping recipe watch");
                break;
            }
        }
    }
}

fn print_record(name: &str, record: &pvflow_core::Record) -> anyhow::Result<()> {
    let json = serde_json::json!({ "record": name, "state": record.to_json() });
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

async fn run_step(registry: &MemoryRegistry, step: Step, timeout: Duration) -> anyhow::Result<()> {
    let registry = registry.clone();
    let (name, record) = blocking(timeout, move || {
        let result = match step {
            Step::Put { record, fields, account } => {
                let committed = registry.put(&record, fields, &caller(account))?;
                (record, committed)
            }
            Step::Post { record, fields } => {
                let committed = registry.post(&record, fields)?;
                (record, committed)
            }
            Step::Get { record } => {
                let state = registry.current_committed_state(&record)?;
                (record, state)
            }
        };
        Ok(result)
    })
    .await?;
    print_record(&name, &record)
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let mut config = Config::from_env();
    let cli = Cli::parse();
    if let Some(dir) = cli.recipes_dir {
        config.recipes.recipes_dir = dir;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.filter)),
        )
        .with_writer(std::io::stderr)
        .init();
    config.log_summary();

    let timeout = Duration::from_secs(cli.op_timeout);

    match cli.command {
        Command::Check { watch } => {
            let mut loader = load_recipes(&config)?;
            print_summary(&loader);
            if watch || config.recipes.watch {
                loader.watch()?;
                watch_recipes(&loader).await;
            }
        }
        Command::Put { record, assignments, account } => {
            let updates = assignments
                .iter()
                .map(|a| parse_assignment(a))
                .collect::<anyhow::Result<FieldUpdates>>()?;
            let loader = load_recipes(&config)?;
            let registry = install(&config, &loader, timeout).await?;
            let step = Step::Put { record, fields: updates, account };
            run_step(&registry, step, timeout).await?;
        }
        Command::Script { file } => {
            let contents = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let steps: Vec<Step> = serde_yaml::from_str(&contents)
                .with_context(|| format!("parsing {}", file.display()))?;

            let loader = load_recipes(&config)?;
            let registry = install(&config, &loader, timeout).await?;
            for (index, step) in steps.into_iter().enumerate() {
                run_step(&registry, step, timeout)
                    .await
                    .with_context(|| format!("step {}", index + 1))?;
            }
        }
    }
    Ok(())
}
