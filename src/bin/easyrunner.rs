//! easyrunner CLI - runs declarative HTTP test suites.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use clap::{Parser, ValueEnum};
use easyrunner::{
    CaseStatus, CheckResult, DefaultCaseExecutor, ExecutorConfig, LoadedSuite,
    SuiteLoader, SuiteRunResult, SuiteRunner,
};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::exit;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, EnvFilter};

/// Run declarative HTTP test suites.
#[derive(Parser, Debug)]
#[command(name = "easyrunner", version, about)]
struct Cli {
    /// Suite file or directory path.
    #[arg(short = 'p', long = "path")]
    test_path: Option<String>,

    /// Filter suites by name (partial match).
    #[arg(short = 'f', long = "filter")]
    test_filter: Option<String>,

    /// Default environment name, replacing the one set in each suite.
    #[arg(short = 'e', long = "env")]
    env_name: Option<String>,

    /// Run one case against another environment (CASE_ID=ENV).
    #[arg(long = "case-env", value_parser = parse_case_env)]
    case_envs: Vec<(u64, String)>,

    /// Enable verbose logging.
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Request timeout in seconds.
    #[arg(short = 't', long = "timeout", env = "EASYRUNNER_TIMEOUT")]
    timeout: Option<u64>,

    /// Directory to save suite reports.
    #[arg(short = 'r', long = "report-dir")]
    report_dir: Option<String>,

    /// Report output format.
    #[arg(long = "report-format", default_value = "json")]
    report_format: ReportFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, ValueEnum)]
enum ReportFormat {
    Json,
    Yaml,
}

fn parse_case_env(raw: &str) -> Result<(u64, String), String> {
    let (id, env) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected CASE_ID=ENV, got '{raw}'"))?;
    let id = id
        .trim()
        .parse::<u64>()
        .map_err(|err| format!("invalid case id '{id}': {err}"))?;
    let env = env.trim();
    if env.is_empty() {
        return Err(format!("missing environment name in '{raw}'"));
    }
    Ok((id, env.to_string()))
}

fn init_tracing(verbose: bool) {
    if std::env::var_os("RUST_LOG").is_none() {
        let level = if verbose { "debug" } else { "info" };
        std::env::set_var("RUST_LOG", level);
    }

    if tracing::dispatcher::has_been_set() {
        return;
    }

    let _ = fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_level(true)
        .try_init();
}

fn print_suite_result(result: &SuiteRunResult, verbose: bool) {
    let status = if result.success() {
        "\x1b[32mPASS\x1b[0m"
    } else {
        "\x1b[31mFAIL\x1b[0m"
    };
    info!(
        "{} suite: {} ({} ms)",
        status, result.suite_name, result.duration_ms
    );

    for (i, case) in result.results.iter().enumerate() {
        let mark = match case.result.status {
            CaseStatus::Passed => "\x1b[32m✓\x1b[0m",
            CaseStatus::Failed => "\x1b[31m✗\x1b[0m",
            CaseStatus::Error => "\x1b[31m!\x1b[0m",
        };
        info!(
            "  {}. {} {} ({:.1} ms)",
            i + 1,
            mark,
            case.case_name,
            case.result.response_time_ms
        );

        if !case.result.error_message.is_empty() {
            error!("     \x1b[31m{}\x1b[0m", case.result.error_message);
        }

        if verbose {
            if let Some(status) = case.result.response_status_code {
                debug!("     Response: Status {}", status);
            }
            for record in &case.result.validators {
                let outcome = match record.check_result {
                    CheckResult::Pass => "pass",
                    CheckResult::Failed => "failed",
                };
                debug!(
                    "     {} {} {} -> {} ({})",
                    record.check,
                    record.comparator,
                    record.expect,
                    record.check_value,
                    outcome
                );
            }
        }
    }
}

fn save_suite_report(
    result: &SuiteRunResult,
    report_dir: &Path,
    format: ReportFormat,
) -> Result<PathBuf> {
    if !report_dir.exists() {
        fs::create_dir_all(report_dir)?;
    }

    let timestamp = Utc::now().timestamp();
    let sanitized_name = result.suite_name.replace([' ', '/'], "_");

    let (filename, content) = match format {
        ReportFormat::Json => (
            format!("{sanitized_name}-{timestamp}.json"),
            serde_json::to_string_pretty(result)?,
        ),
        ReportFormat::Yaml => (
            format!("{sanitized_name}-{timestamp}.yaml"),
            serde_yaml::to_string(result)?,
        ),
    };

    let file_path = report_dir.join(filename);
    let mut file = File::create(&file_path)?;
    file.write_all(content.as_bytes())?;

    Ok(file_path)
}

fn load_suites(test_path: Option<String>) -> Result<Vec<LoadedSuite>> {
    let mut loader = SuiteLoader::new();
    loader.add_path("suites");

    let suites = match test_path {
        Some(path) => {
            let path = PathBuf::from(path);
            if !path.exists() {
                return Err(anyhow!("Path does not exist: {}", path.display()));
            }
            if path.is_file() {
                vec![loader.load_suite(&path).context(format!(
                    "Failed to load suite: {}",
                    path.display()
                ))?]
            } else {
                loader.load_suites_from_dir(&path).context(format!(
                    "Failed to load suites from directory: {}",
                    path.display()
                ))?
            }
        }
        None => loader.load_all_suites()?,
    };

    if suites.is_empty() {
        return Err(anyhow!("No test suites found"));
    }
    Ok(suites)
}

async fn run_all_suites(
    suites: Vec<LoadedSuite>,
    args: &Cli,
    config: ExecutorConfig,
) -> Result<bool> {
    let executor = DefaultCaseExecutor::new(config)
        .context("Failed to build HTTP client")?;
    let runner = SuiteRunner::new(executor);
    let report_dir = args.report_dir.as_deref().map(Path::new);

    let filtered: Vec<LoadedSuite> = match &args.test_filter {
        Some(filter) => suites
            .into_iter()
            .filter(|s| {
                s.suite
                    .name
                    .to_lowercase()
                    .contains(&filter.to_lowercase())
            })
            .collect(),
        None => suites,
    };

    if filtered.is_empty() {
        return Err(anyhow!("No suites matching the filter were found"));
    }

    let total_start = Instant::now();
    let total = filtered.len();
    let mut passed = 0;
    let mut failed = 0;
    info!("Running {} suite(s)...", total);

    for (idx, mut loaded) in filtered.into_iter().enumerate() {
        info!("Suite {}/{}: {}", idx + 1, total, loaded.suite.name);

        if let Some(name) = &args.env_name {
            if let Err(err) = loaded.use_default_environment(name) {
                error!("\x1b[31m{}\x1b[0m", err);
                failed += 1;
                continue;
            }
        }
        let overrides = loaded.resolve_overrides(&args.case_envs);

        let result = runner
            .execute_suite(&loaded.suite, &loaded.default_environment, &overrides)
            .await;
        print_suite_result(&result, args.verbose);

        if let Some(dir) = report_dir {
            match save_suite_report(&result, dir, args.report_format) {
                Ok(path) => info!("Report saved: {}", path.display()),
                Err(e) => error!("Failed to save report: {}", e),
            }
        }

        if result.success() {
            passed += 1;
        } else {
            failed += 1;
        }
    }

    info!(
        "Summary:\n  Total: {}\n  \x1b[32mPassed: {}\x1b[0m\n  \x1b[31mFailed: {}\x1b[0m\n  Duration: {} ms",
        passed + failed,
        passed,
        failed,
        total_start.elapsed().as_millis()
    );

    Ok(failed == 0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.verbose);

    let suites = load_suites(args.test_path.clone())?;

    let mut config = ExecutorConfig::default();
    if let Some(timeout) = args.timeout {
        config = config.with_timeout(Duration::from_secs(timeout));
    }

    if !run_all_suites(suites, &args, config).await? {
        exit(1);
    }

    Ok(())
}
