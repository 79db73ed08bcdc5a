use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use grade_equivalency::backend::{fetch_reconciled, find_rule};
use grade_equivalency::config::SourceConfig;
use grade_equivalency::conversion::{self, format_converted, format_grade, ConversionService};
use grade_equivalency::models::CurrentUser;
use grade_equivalency::{report, snapshot, CoreError, TransferEquivalencyCoordinator};

#[derive(Parser)]
#[command(name = "grade-equivalency")]
#[command(about = "Grade conversion and institution-transfer equivalency tool", long_about = None)]
struct Cli {
    #[command(flatten)]
    source: SourceArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct SourceArgs {
    /// Base URL of the academic API
    #[arg(long, global = true, env = "GRADE_API_URL")]
    api_url: Option<String>,
    /// Offline JSON snapshot used instead of the API
    #[arg(long, global = true, env = "GRADE_SNAPSHOT")]
    snapshot: Option<PathBuf>,
    #[arg(long, global = true, env = "GRADE_API_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a demo snapshot
    Seed {
        #[arg(long, default_value = "snapshot.json")]
        out: PathBuf,
    },
    /// Import ledger records from a CSV file into the snapshot
    ImportLedger {
        #[arg(long)]
        csv: PathBuf,
    },
    /// List conversion rules
    Rules,
    /// Show a student's reconciled grades
    Reconcile {
        #[arg(long)]
        student: String,
    },
    /// Convert a student's grades with a rule
    Preview {
        #[arg(long)]
        student: String,
        #[arg(long)]
        rule: String,
    },
    /// Persist one subject's conversion
    Apply {
        #[arg(long)]
        student: String,
        /// Subject id or code
        #[arg(long)]
        subject: String,
        #[arg(long)]
        rule: String,
        /// Create the missing ledger record first
        #[arg(long)]
        create: bool,
    },
    /// Move a student to another institution, homologating grades
    Transfer {
        #[arg(long)]
        student: String,
        #[arg(long)]
        institution: String,
        #[arg(long)]
        rule: String,
    },
    /// Generate a markdown conversion report
    Report {
        #[arg(long)]
        student: String,
        #[arg(long)]
        rule: String,
        #[arg(long, default_value = "conversion-report.md")]
        out: PathBuf,
    },
}

fn init_tracing() {
    let log_format =
        std::env::var("GRADE_EQUIVALENCY_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "grade_equivalency=info".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = SourceConfig {
        api_url: cli.source.api_url,
        snapshot: cli.source.snapshot,
        timeout_secs: cli.source.timeout_secs,
    };

    match cli.command {
        Commands::Seed { out } => {
            snapshot::save(&out, &snapshot::seed())?;
            println!("Seed snapshot written to {}.", out.display());
        }
        Commands::ImportLedger { csv } => {
            let path = config
                .snapshot
                .context("import-ledger needs --snapshot (or GRADE_SNAPSHOT)")?;
            let mut data = snapshot::load(&path)?;
            let inserted = snapshot::import_ledger_csv(&mut data, &csv)?;
            snapshot::save(&path, &data)?;
            println!("Inserted {inserted} ledger records from {}.", csv.display());
        }
        Commands::Rules => {
            let source = config.open()?;
            let rules = source.backend().fetch_rules().await?;
            if rules.is_empty() {
                println!("No conversion rules available.");
            }
            for rule in rules.iter() {
                println!("- {} ({}): {} entries", rule.code, rule.name, rule.mapping.len());
            }
        }
        Commands::Reconcile { student } => {
            let source = config.open()?;
            let grades = fetch_reconciled(source.backend(), &student).await?;

            if grades.is_empty() {
                println!("No grades to convert for this student.");
                return Ok(());
            }

            for grade in grades.iter() {
                println!(
                    "- {} {} [{}] {} ({}) ledger {}",
                    grade.subject_code,
                    grade.subject_name,
                    grade.status,
                    format_grade(&grade.grade_value),
                    grade.grade_type,
                    grade.ledger_record_id.as_deref().unwrap_or("missing")
                );
            }
        }
        Commands::Preview { student, rule } => {
            let source = config.open()?;
            let backend = source.backend();
            let (grades, rules) = tokio::try_join!(
                fetch_reconciled(backend, &student),
                backend.fetch_rules()
            )?;
            let rule = find_rule(&rules, &rule).with_context(|| format!("unknown rule {rule}"))?;
            let converted = conversion::preview(&grades, rule)?;

            if converted.is_empty() {
                println!("No grades to convert for this student.");
                return Ok(());
            }

            println!("Grades converted with {} ({}):", rule.name, rule.code);
            for grade in converted.iter() {
                println!(
                    "- {} {}: {} -> {}",
                    grade.reconciled.subject_code,
                    grade.reconciled.subject_name,
                    format_grade(&grade.reconciled.grade_value),
                    format_converted(&grade.converted_value)
                );
            }
        }
        Commands::Apply {
            student,
            subject,
            rule,
            create,
        } => {
            let source = config.open()?;
            let backend = source.backend();
            let (grades, rules) = tokio::try_join!(
                fetch_reconciled(backend, &student),
                backend.fetch_rules()
            )?;
            let rule = find_rule(&rules, &rule).with_context(|| format!("unknown rule {rule}"))?;
            let converted = conversion::preview(&grades, rule)?;
            let mut target = converted
                .into_iter()
                .find(|grade| grade.reconciled.subject_id == subject || grade.reconciled.subject_code == subject)
                .with_context(|| format!("no convertible grade for subject {subject}"))?;

            let service = ConversionService::new(backend);
            if create {
                target = service.create_missing_record(&student, &target).await?;
            }

            match service.apply(&target).await {
                Ok(applied) => {
                    println!(
                        "Applied {} to {}: {}.",
                        applied.rule_code,
                        target.reconciled.subject_code,
                        format_grade(&applied.persisted_value)
                    );
                }
                Err(CoreError::NotPersistable { subject_id }) => {
                    bail!("subject {subject_id} has no ledger record yet; rerun with --create");
                }
                Err(err) => return Err(err.into()),
            }
            source.commit()?;
        }
        Commands::Transfer {
            student,
            institution,
            rule,
        } => {
            let source = config.open()?;
            let backend = source.backend();
            let profile = backend.fetch_profile(&student).await?;
            let user = CurrentUser {
                id: profile.id.clone(),
                name: profile.name.clone(),
                email: profile.email.clone(),
                role: "student".to_string(),
                institution_id: Some(profile.institution_id.clone()),
                institution_name: Some(profile.institution_name.clone()),
            };

            let outcome = TransferEquivalencyCoordinator::new(backend)
                .coordinate_transfer(&user, &student, &institution, &rule)
                .await?;

            println!(
                "{} now belongs to {}; {} subjects approved by equivalency.",
                outcome.user.name,
                outcome.profile.institution_name,
                outcome.total_homologated
            );
            if !outcome.is_refreshed() {
                println!("Transfer committed, but the updated record could not be read back; run `reconcile` to see it.");
            }
            for grade in outcome.homologated() {
                println!(
                    "- {} {}: {}",
                    grade.subject_code,
                    grade.subject_name,
                    format_grade(&grade.grade_value)
                );
            }
            source.commit()?;
        }
        Commands::Report { student, rule, out } => {
            let source = config.open()?;
            let backend = source.backend();
            let (profile, grades, rules) = tokio::try_join!(
                backend.fetch_profile(&student),
                fetch_reconciled(backend, &student),
                backend.fetch_rules()
            )?;
            let rule = find_rule(&rules, &rule).with_context(|| format!("unknown rule {rule}"))?;
            let converted = conversion::preview(&grades, rule)?;
            let report = report::build_report(&profile, rule, &converted);
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}
