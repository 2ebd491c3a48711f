use clap::{Parser, Subcommand};
use s3_permcheck::domain::config::{BackendKind, ConfigError, ConfigValidator, HarnessConfig};
use s3_permcheck::domain::storage::BackendConnector;
use s3_permcheck::domain::yaml_config::ResolvedSuite;
use s3_permcheck::error::AppError;
use s3_permcheck::harness::matrix::self_check_suite;
use s3_permcheck::harness::suite::{
    discover_suites, run_files, run_suite, ConnectorFactory, SuiteRun,
};
use s3_permcheck::harness::HarnessSettings;
use s3_permcheck::infra::memory::MemoryConnector;
use s3_permcheck::infra::s3::S3Connector;
use s3_permcheck::report::{console_summary, write_reports, Report};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "s3-permcheck")]
#[command(about = "Permission matrix checker for S3-compatible object storage")]
struct Cli {
    #[command(flatten)]
    config: HarnessConfig,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one suite file, or every suite file found in the suite directory
    Run {
        /// Suite file; omit to discover suites
        file: Option<PathBuf>,

        #[arg(
            long,
            env = "PERMCHECK_SUITE_DIR",
            default_value = "suites",
            help = "Directory searched for suite files"
        )]
        suite_dir: PathBuf,

        #[arg(
            long,
            default_value = ".suite.yaml",
            help = "File name suffix of suite files"
        )]
        pattern: String,
    },
    /// Run every permission combination against every operation on an
    /// in-memory service
    SelfCheck,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.config.debug {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .init();
    } else {
        tracing_subscriber::fmt::init();
    }

    if let Err(e) = cli.config.validate().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }

    let mut settings = HarnessSettings::from(&cli.config);

    let runs = match cli.command {
        Command::Run {
            file,
            suite_dir,
            pattern,
        } => {
            let paths = match file {
                Some(file) => vec![file],
                None => match discover_suites(&suite_dir, &pattern).await {
                    Ok(paths) => paths,
                    Err(e) => {
                        eprintln!();
                        eprintln!(
                            "Failed to read suite directory {}: {}",
                            suite_dir.display(),
                            e
                        );
                        eprintln!();
                        std::process::exit(1);
                    }
                },
            };

            if paths.is_empty() {
                eprintln!("{}", ConfigError::MissingField("SUITE_FILE"));
                std::process::exit(1);
            }

            let connectors: Box<ConnectorFactory> = match cli.config.backend {
                BackendKind::S3 => Box::new(|_: &ResolvedSuite| -> Arc<dyn BackendConnector> {
                    Arc::new(S3Connector)
                }),
                BackendKind::Memory => {
                    tracing::info!("Dry run against a conformant in-memory service");
                    Box::new(|suite: &ResolvedSuite| -> Arc<dyn BackendConnector> {
                        Arc::new(MemoryConnector::conformant(suite))
                    })
                }
            };

            tracing::info!(
                "Running {} suite file(s) with {} worker(s)",
                paths.len(),
                cli.config.workers
            );
            run_files(paths, connectors.as_ref(), &settings, cli.config.workers).await
        }
        Command::SelfCheck => {
            // Small parts keep the multipart path cheap in memory
            settings.multipart_threshold = 256 * 1024;
            settings.part_size = 64 * 1024;

            let (suite, connector) = self_check_suite();
            let context = run_suite(&suite, &connector, &settings).await;
            vec![SuiteRun {
                path: PathBuf::from("built-in"),
                name: suite.name,
                outcome: Ok(context),
            }]
        }
    };

    let report = Report::from_runs(&runs, settings.enforcement);
    print!("{}", console_summary(&report));

    match write_reports(&cli.config.report_dir, &report, cli.config.max_reports).await {
        Ok(files) => {
            tracing::info!(
                "Reports written to {} and {}",
                files.json.display(),
                files.html.display()
            );
        }
        Err(e) => {
            eprintln!();
            eprintln!("{}", AppError::from(e));
            eprintln!();
            std::process::exit(1);
        }
    }

    if !report.all_passed() {
        std::process::exit(1);
    }

    Ok(())
}
