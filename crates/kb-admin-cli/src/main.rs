use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use kb_admin_api::KbAdminApi;
use kb_admin_core::{
    plan_list, AdminError, ListRequest, SortDirection, Table, DEFAULT_PAGE_SIZE,
};
use serde_json::{json, Value};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const LOG_ENV: &str = "KB_ADMIN_LOG";

#[derive(Debug, Parser)]
#[command(name = "kba")]
#[command(about = "Knowledge base admin CLI")]
struct Cli {
    #[arg(long, env = "KB_ADMIN_DB", default_value = "./kb_admin.sqlite3")]
    db: PathBuf,

    #[arg(
        long,
        env = "KB_ADMIN_PAGE_SIZE",
        default_value_t = DEFAULT_PAGE_SIZE,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    page_size: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: Box<DbCommand>,
    },
    /// One page of a list view.
    List(ListArgs),
    /// One record with its joined display fields.
    Show(RecordArgs),
    /// Distinct non-empty values of a column, for filter dropdowns.
    Distinct(DistinctArgs),
    Options {
        #[command(subcommand)]
        command: OptionsCommand,
    },
    Create(CreateArgs),
    Update(UpdateArgs),
    Delete(RecordArgs),
    Dashboard,
    SyncStatus,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Subcommand)]
enum OptionsCommand {
    /// Category, document, and fund pickers.
    Dropdowns,
    FundStatus,
    DataTypes,
}

#[derive(Debug, Args)]
struct ListArgs {
    table: TableArg,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long)]
    search: Option<String>,
    /// Defaults to the table's list-view search columns.
    #[arg(long = "search-column")]
    search_columns: Vec<String>,
    /// Defaults to the table's list-view filter column.
    #[arg(long)]
    filter_column: Option<String>,
    #[arg(long)]
    filter: Option<String>,
    #[arg(long)]
    sort: Option<String>,
    #[arg(long, default_value_t = false)]
    desc: bool,
    /// Print the planned SQL and parameters instead of running them.
    #[arg(long, default_value_t = false)]
    explain: bool,
}

#[derive(Debug, Args)]
struct RecordArgs {
    table: TableArg,
    id: i64,
}

#[derive(Debug, Args)]
struct DistinctArgs {
    table: TableArg,
    column: String,
}

#[derive(Debug, Args)]
struct CreateArgs {
    table: TableArg,
    /// JSON object of column values.
    #[arg(long)]
    json: String,
}

#[derive(Debug, Args)]
struct UpdateArgs {
    table: TableArg,
    id: i64,
    #[arg(long)]
    json: String,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum TableArg {
    #[value(name = "funds", alias = "research_funds")]
    Funds,
    #[value(name = "glossary_terms")]
    GlossaryTerms,
    #[value(name = "documents")]
    Documents,
    #[value(name = "categories")]
    Categories,
    #[value(name = "manual_chunks")]
    ManualChunks,
    #[value(name = "support_stories")]
    SupportStories,
}

impl From<TableArg> for Table {
    fn from(value: TableArg) -> Self {
        match value {
            TableArg::Funds => Self::Funds,
            TableArg::GlossaryTerms => Self::GlossaryTerms,
            TableArg::Documents => Self::Documents,
            TableArg::Categories => Self::Categories,
            TableArg::ManualChunks => Self::ManualChunks,
            TableArg::SupportStories => Self::SupportStories,
        }
    }
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn error_envelope(err: &AdminError) -> Value {
    let mut body = serde_json::Map::new();
    body.insert("kind".to_string(), Value::String(err.kind().to_string()));
    body.insert("message".to_string(), Value::String(err.to_string()));
    match err {
        AdminError::ReferentialIntegrity(violation) => {
            body.insert("table".to_string(), Value::String(violation.table.to_string()));
            body.insert("id".to_string(), Value::from(violation.id));
            body.insert(
                "blockers".to_string(),
                serde_json::to_value(&violation.blockers).unwrap_or_default(),
            );
        }
        AdminError::DanglingReference { table, column, parent, value } => {
            body.insert("table".to_string(), Value::String(table.to_string()));
            body.insert("column".to_string(), Value::String(column.clone()));
            body.insert("parent".to_string(), Value::String(parent.to_string()));
            body.insert("value".to_string(), Value::String(value.clone()));
        }
        AdminError::NotFound { table, id } => {
            body.insert("table".to_string(), Value::String(table.to_string()));
            body.insert("id".to_string(), Value::from(*id));
        }
        _ => {}
    }
    json!({ "error": Value::Object(body) })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    // stdout carries the JSON contract; logs go to stderr.
    let installed =
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
    if let Err(err) = installed {
        eprintln!("failed to install log subscriber: {err}");
    }
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report_error(&err),
    }
}

fn report_error(err: &anyhow::Error) -> ExitCode {
    if let Some(admin_error) = err.downcast_ref::<AdminError>() {
        if let Err(emit_err) = emit_json(error_envelope(admin_error)) {
            eprintln!("error: {admin_error} (failed to encode error envelope: {emit_err})");
        }
        return ExitCode::from(2);
    }
    eprintln!("error: {err:#}");
    ExitCode::FAILURE
}

fn run(cli: Cli) -> Result<()> {
    debug!(db = %cli.db.display(), "opening knowledge base");
    let api = KbAdminApi::new(cli.db);
    match cli.command {
        Command::Db { command } => run_db(*command, &api),
        Command::List(args) => run_list(&api, &args, cli.page_size),
        Command::Show(args) => {
            let record = api.get_record(args.table.into(), args.id)?;
            emit_json(Value::Object(record))
        }
        Command::Distinct(args) => {
            let table = Table::from(args.table);
            let values = api.distinct_values(table, &args.column)?;
            emit_json(json!({ "table": table, "column": args.column, "values": values }))
        }
        Command::Options { command } => run_options(command, &api),
        Command::Create(args) => {
            let data = parse_json_arg(&args.json)?;
            emit_json(serde_json::to_value(api.create_json(args.table.into(), data)?)?)
        }
        Command::Update(args) => {
            let data = parse_json_arg(&args.json)?;
            emit_json(serde_json::to_value(api.update_json(args.table.into(), args.id, data)?)?)
        }
        Command::Delete(args) => {
            emit_json(serde_json::to_value(api.delete(args.table.into(), args.id)?)?)
        }
        Command::Dashboard => emit_json(serde_json::to_value(api.dashboard_stats()?)?),
        Command::SyncStatus => emit_json(serde_json::to_value(api.sync_status()?)?),
    }
}

fn run_db(command: DbCommand, api: &KbAdminApi) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => emit_json(serde_json::to_value(api.schema_status()?)?),
        DbCommand::Migrate(args) => emit_json(serde_json::to_value(api.migrate(args.dry_run)?)?),
        DbCommand::IntegrityCheck => emit_json(serde_json::to_value(api.integrity_check()?)?),
    }
}

fn run_options(command: OptionsCommand, api: &KbAdminApi) -> Result<()> {
    match command {
        OptionsCommand::Dropdowns => emit_json(serde_json::to_value(api.dropdown_options()?)?),
        OptionsCommand::FundStatus => emit_json(json!({ "options": api.fund_status_options()? })),
        OptionsCommand::DataTypes => emit_json(json!({ "options": api.data_type_options()? })),
    }
}

fn run_list(api: &KbAdminApi, args: &ListArgs, page_size: u32) -> Result<()> {
    let table = Table::from(args.table);
    let request = list_request(table, args, page_size);
    if args.explain {
        let plan = plan_list(table, &request)?;
        return emit_json(serde_json::to_value(plan)?);
    }
    emit_json(serde_json::to_value(api.list_page(table, request)?)?)
}

fn list_request(table: Table, args: &ListArgs, page_size: u32) -> ListRequest {
    let descriptor = table.descriptor();
    let mut request = ListRequest::default().page(args.page).page_size(page_size);

    if let Some(term) = &args.search {
        let columns = if args.search_columns.is_empty() {
            descriptor.search_columns.iter().map(ToString::to_string).collect()
        } else {
            args.search_columns.clone()
        };
        request = request.search(term.clone(), columns);
    }

    if let Some(value) = &args.filter {
        let column =
            args.filter_column.clone().unwrap_or_else(|| descriptor.filter_column.to_string());
        request = request.filter(column, value.clone());
    }

    if let Some(column) = &args.sort {
        let direction = if args.desc { SortDirection::Desc } else { SortDirection::Asc };
        request = request.sort(column.clone(), direction);
    }

    request
}

fn parse_json_arg(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).context("--json must be a JSON object of column values")
}
