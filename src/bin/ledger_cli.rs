use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use order_ledger::{
    config::{self, AppConfig},
    db::{self, DbPool},
    entities::inventory_record::{self, Entity as InventoryRecord},
    events::{process_events, EventSender},
    services::{factory::ServiceFactory, reconciliation::ReconciliationReport},
};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use serde::Serialize;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let context = CliContext::initialize().await?;

    match cli.command {
        Commands::Migrate => {
            db::run_migrations(&context.db)
                .await
                .context("failed to run migrations")?;
            println!("Migrations applied");
        }
        Commands::Reconcile { po_number } => {
            let report = context
                .factory
                .reconciliation_service()
                .reconcile(&po_number)
                .await
                .context("reconciliation failed")?
                .ok_or_else(|| anyhow!("no purchase order {}", po_number))?;
            if cli.json {
                print_json(&report)?;
            } else {
                render_report(&report);
            }
        }
        Commands::ReconcileAll => {
            let reports = context
                .factory
                .reconciliation_service()
                .reconcile_all()
                .await
                .context("reconciliation failed")?;
            if cli.json {
                print_json(&reports)?;
            } else {
                for report in &reports {
                    render_report(report);
                }
                println!("{} orders reconciled", reports.len());
            }
        }
        Commands::Stock { part_no } => {
            let records = InventoryRecord::find()
                .filter(inventory_record::Column::PartNo.eq(part_no.as_str()))
                .order_by_asc(inventory_record::Column::Id)
                .all(context.db.as_ref())
                .await
                .context("failed to load inventory")?;
            if cli.json {
                print_json(&records)?;
            } else if records.is_empty() {
                println!("No stock for part {}", part_no);
            } else {
                for record in &records {
                    render_record(record);
                }
            }
        }
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "ledger-cli",
    about = "Operator tooling for the order ledger",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    /// Recompute delivered fields and status for one order
    Reconcile {
        #[arg(long)]
        po_number: String,
    },
    /// Recompute every order
    ReconcileAll,
    /// Show stock records for a part
    Stock {
        #[arg(long)]
        part_no: String,
    },
}

struct CliContext {
    db: Arc<DbPool>,
    factory: ServiceFactory,
}

impl CliContext {
    async fn initialize() -> Result<Self> {
        let config: AppConfig = config::load_config().context("failed to load application config")?;
        config::init_tracing(config.log_level(), config.log_json);

        let db_pool = db::establish_connection_from_app_config(&config)
            .await
            .context("failed to connect to database")?;
        if config.auto_migrate {
            db::run_migrations(&db_pool)
                .await
                .context("failed to run migrations")?;
        }
        let db = Arc::new(db_pool);

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        tokio::spawn(process_events(event_rx, Vec::new()));

        let factory = ServiceFactory::new(
            db.clone(),
            Some(event_sender),
            config.reconciliation.clone(),
        );

        Ok(Self { db, factory })
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_report(report: &ReconciliationReport) {
    let status = if report.status_changed() {
        format!("{} -> {}", report.previous_status, report.status)
    } else {
        report.status.to_string()
    };
    println!(
        "- {} • {} items ({} updated) • status {}",
        report.po_number, report.items_examined, report.items_updated, status
    );
}

fn render_record(record: &inventory_record::Model) {
    println!(
        "- #{} • project {} • {} @ {} • received {} • sold {} • balance {} ({})",
        record.id,
        record.project_no.as_deref().unwrap_or("-"),
        record.description.as_deref().unwrap_or("-"),
        record.unit_price,
        record.quantity,
        record.sold_quantity,
        record.balance,
        record.balance_amount
    );
}
