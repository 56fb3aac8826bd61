use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};

use shopmover::ledger::{EntityKind, Ledger};
use shopmover::migration_ops::context::MigrationContext;
use shopmover::migration_ops::summary::{RunOutcome, RunSummary};
use shopmover::migration_ops::transfer::{export_doc, export_identities, parse_import};
use shopmover::migration_ops::{self, list_source};
use shopmover::platform::{CommerceApi, EnvTokenProvider, HttpCommerceApi, RateGate, TokenProvider};
use shopmover::tracing::init_tracing;
use shopmover::util::db::Db;
use shopmover::util::env as env_util;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum KindArg {
    Categories,
    Contacts,
    Discounts,
    Orders,
    Products,
    All,
}

impl KindArg {
    fn single(self) -> Option<EntityKind> {
        match self {
            KindArg::Categories => Some(EntityKind::Category),
            KindArg::Contacts => Some(EntityKind::Contact),
            KindArg::Discounts => Some(EntityKind::Discount),
            KindArg::Orders => Some(EntityKind::Order),
            KindArg::Products => Some(EntityKind::Product),
            KindArg::All => None,
        }
    }
}

/// Store-to-store migration runner for one commerce platform.
#[derive(Parser)]
#[command(name = "shopmover", version, about)]
struct Cli {
    /// Tenant/user id owning the migration ledger rows.
    #[arg(long, global = true, default_value_t = 1)]
    owner: i64,

    /// Postgres URL override (defaults to DATABASE_URL / DB_URL / DB_* parts).
    #[arg(long, global = true)]
    db_url: Option<String>,

    /// Platform API base URL override (defaults to PLATFORM_API_BASE).
    #[arg(long, global = true)]
    api_base: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Migrate entities from one store into another.
    Migrate {
        #[arg(value_enum)]
        kind: KindArg,
        #[arg(long)]
        source_store: String,
        #[arg(long)]
        dest_store: String,
        /// Claim and normalize but send nothing to the destination.
        #[arg(long)]
        dry_run: bool,
    },
    /// Export one entity kind from a source store to a JSON document.
    Export {
        #[arg(value_enum)]
        kind: KindArg,
        #[arg(long)]
        source_store: String,
        /// Output path for the export document.
        #[arg(long)]
        out: std::path::PathBuf,
    },
    /// Import a previously exported JSON document into a destination store.
    Import {
        #[arg(value_enum)]
        kind: KindArg,
        #[arg(long)]
        dest_store: String,
        /// Path of the export document to load.
        #[arg(long)]
        file: std::path::PathBuf,
        #[arg(long)]
        dry_run: bool,
    },
    /// Print per-status ledger row counts for every entity kind.
    LedgerCounts,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    init_tracing("info,sqlx=warn")?;

    let cli = Cli::parse();
    env_util::preflight_check(
        "shopmover",
        &[],
        &["DATABASE_URL", "PLATFORM_API_BASE", "PLATFORM_TOKEN"],
    )?;

    let db_url = match &cli.db_url {
        Some(url) => url.clone(),
        None => env_util::db_url().context("no database URL configured")?,
    };
    let max_conns = env_util::env_parse("DB_MAX_CONNS", 5u32);
    let db = Db::connect(&db_url, max_conns).await?;
    let ledger = Ledger::new(&db);

    let api_base = cli
        .api_base
        .clone()
        .or_else(|| env_util::env_opt("PLATFORM_API_BASE"))
        .context("no platform API base configured; set PLATFORM_API_BASE")?;

    let summary = match &cli.command {
        Command::Migrate {
            kind,
            source_store,
            dest_store,
            dry_run,
        } => {
            let gate = RateGate::new();
            let api = build_api(&api_base, &[source_store, dest_store], gate.clone())?;
            let mut ctx =
                MigrationContext::new(cli.owner, source_store, dest_store, gate, *dry_run);
            run_migrate(&api, &ledger, &mut ctx, *kind).await?
        }
        Command::Export {
            kind,
            source_store,
            out,
        } => {
            let kind = kind
                .single()
                .context("export needs a concrete entity kind, not 'all'")?;
            let gate = RateGate::new();
            let api = build_api(&api_base, &[source_store], gate)?;
            run_export(&api, &ledger, cli.owner, kind, source_store, out).await?
        }
        Command::Import {
            kind,
            dest_store,
            file,
            dry_run,
        } => {
            let kind = kind
                .single()
                .context("import needs a concrete entity kind, not 'all'")?;
            let gate = RateGate::new();
            let api = build_api(&api_base, &[dest_store], gate.clone())?;
            run_import(
                &api, &ledger, cli.owner, kind, dest_store, file, gate, *dry_run,
            )
            .await?
        }
        Command::LedgerCounts => {
            for kind in EntityKind::ALL {
                let counts = ledger.counts(kind, cli.owner).await?;
                if counts.is_empty() {
                    println!("{kind}: (no rows)");
                    continue;
                }
                let line: Vec<String> = counts
                    .iter()
                    .map(|(status, n)| format!("{status}={n}"))
                    .collect();
                println!("{kind}: {}", line.join(" "));
            }
            return Ok(());
        }
    };

    println!("{summary}");
    match summary.outcome() {
        RunOutcome::Success { warning: false } => info!("run complete"),
        RunOutcome::Success { warning: true } => {
            warn!(failed = summary.failed, "run complete with failures")
        }
        RunOutcome::Noop => info!("nothing to migrate"),
        RunOutcome::Error => bail!("run failed: {summary}"),
    }
    Ok(())
}

/// Resolve bearer tokens for every store the run touches up front; a missing
/// token is a precondition failure, not a mid-run surprise.
fn build_api(api_base: &str, stores: &[&String], gate: RateGate) -> Result<HttpCommerceApi> {
    let provider = EnvTokenProvider;
    let mut tokens = HashMap::new();
    for store in stores {
        tokens.insert((*store).clone(), provider.token_for(store)?);
    }
    HttpCommerceApi::new(api_base, tokens, gate)
}

async fn run_migrate(
    api: &HttpCommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    kind: KindArg,
) -> Result<RunSummary> {
    match kind.single() {
        Some(kind) => migrate_kind(api, ledger, ctx, kind).await,
        None => {
            // Dependency order: orders attach to contacts, discount triggers
            // point at products and categories.
            let mut total = RunSummary::default();
            for kind in [
                EntityKind::Category,
                EntityKind::Product,
                EntityKind::Contact,
                EntityKind::Discount,
                EntityKind::Order,
            ] {
                let summary = migrate_kind(api, ledger, ctx, kind).await?;
                total.absorb(&summary);
            }
            Ok(total)
        }
    }
}

async fn migrate_kind(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    ctx: &mut MigrationContext,
    kind: EntityKind,
) -> Result<RunSummary> {
    match kind {
        EntityKind::Category => migration_ops::categories::migrate(api, ledger, ctx).await,
        EntityKind::Contact => migration_ops::contacts::migrate(api, ledger, ctx).await,
        EntityKind::Discount => migration_ops::discounts::migrate(api, ledger, ctx).await,
        EntityKind::Order => migration_ops::orders::migrate(api, ledger, ctx).await,
        EntityKind::Product => migration_ops::products::migrate(api, ledger, ctx).await,
    }
}

async fn run_export(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    owner: i64,
    kind: EntityKind,
    source_store: &str,
    out: &std::path::Path,
) -> Result<RunSummary> {
    let (path_v3, path_v1) = source_paths(kind);
    let records = list_source(api, source_store, path_v3, path_v1).await?;
    let doc = export_doc(kind, source_store, &records);
    std::fs::write(out, serde_json::to_string_pretty(&doc)?)
        .with_context(|| format!("writing export to {}", out.display()))?;

    // Append-only history: each export adds fresh pending rows, never touches
    // earlier ones.
    let identities = export_identities(kind, &records);
    let inserted = ledger
        .record_export(kind, owner, source_store, &identities)
        .await?;
    info!(
        kind = %kind,
        records = records.len(),
        ledger_rows = inserted,
        path = %out.display(),
        "export written"
    );
    Ok(RunSummary {
        exported: records.len() as u64,
        ..Default::default()
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_import(
    api: &dyn CommerceApi,
    ledger: &Ledger,
    owner: i64,
    kind: EntityKind,
    dest_store: &str,
    file: &std::path::Path,
    gate: RateGate,
    dry_run: bool,
) -> Result<RunSummary> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("reading import file {}", file.display()))?;
    let doc: Value = serde_json::from_str(&text).context("import file is not valid JSON")?;
    let Some((from_store_id, records)) = parse_import(kind, &doc).records() else {
        bail!(
            "unrecognized import document shape for {kind}; expected meta-wrapped or legacy flat"
        );
    };
    info!(
        kind = %kind,
        from_store = from_store_id.as_str(),
        records = records.len(),
        "import document parsed"
    );

    let mut ctx = MigrationContext::new(owner, from_store_id, dest_store, gate, dry_run);
    match kind {
        EntityKind::Category => {
            migration_ops::categories::migrate_records(api, ledger, &mut ctx, records).await
        }
        EntityKind::Contact => {
            migration_ops::contacts::migrate_records(api, ledger, &mut ctx, records).await
        }
        EntityKind::Discount => {
            migration_ops::discounts::migrate_records(api, ledger, &mut ctx, records).await
        }
        EntityKind::Order => {
            migration_ops::orders::migrate_records(api, ledger, &mut ctx, records).await
        }
        EntityKind::Product => {
            migration_ops::products::migrate_records(api, ledger, &mut ctx, records).await
        }
    }
}

fn source_paths(kind: EntityKind) -> (&'static str, &'static str) {
    match kind {
        EntityKind::Category => ("categories", "legacy/categories"),
        EntityKind::Contact => ("contacts", "legacy/contacts"),
        EntityKind::Discount => ("discounts", "legacy/discounts"),
        EntityKind::Order => ("orders", "legacy/orders"),
        EntityKind::Product => ("products", "legacy/products"),
    }
}
