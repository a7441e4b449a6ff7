//! Argument definitions and command dispatch.

use crate::output::render_table;
use anyhow::Result;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use mp_client::{
    ApiClient, EngageParams, EventCountsParams, ExportParams, FlowsQueryType, FrequencyParams,
    FunnelParams, PropertyCountsParams, RetentionParams, SegmentationParams, Unit,
};
use mp_core::{CancellationToken, ConfigStore, Region, Secret, resolve_credentials};
use mp_services::{Discovery, Fetcher, FetchOptions, LiveQuery, ParallelFetchOptions};
use mp_store::Store;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Parser)]
#[command(name = "mp", about = "Fetch, store, and query Mixpanel data", version)]
pub struct Cli {
    /// Named account from the config file (default account otherwise).
    #[arg(long, global = true)]
    pub account: Option<String>,

    /// Emit JSON instead of text tables.
    #[arg(long, global = true)]
    pub json: bool,

    /// Store file to use (default: ~/.mixpanel_data/{project_id}.db).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage stored accounts.
    #[command(subcommand)]
    Account(AccountCommand),
    /// Fetch data from Mixpanel into the local store.
    #[command(subcommand)]
    Fetch(FetchCommand),
    /// Run SQL against the local store.
    Sql {
        query: String,
        /// Emit CSV instead of a text table.
        #[arg(long)]
        csv: bool,
    },
    /// List local tables.
    Tables,
    /// Show a table's column schema.
    Schema { table: String },
    /// Random sample of rows.
    Sample {
        table: String,
        #[arg(short = 'n', long, default_value_t = 10)]
        rows: usize,
    },
    /// Per-column summary statistics.
    Summarize { table: String },
    /// Per-event breakdown of an events table.
    Events { table: String },
    /// Distinct top-level JSON property keys.
    Props {
        table: String,
        #[arg(long)]
        event: Option<String>,
    },
    /// Distribution of a column or JSON path expression.
    Stats {
        table: String,
        column: String,
        #[arg(long, default_value_t = 10)]
        top: usize,
    },
    /// Drop a table (and its metadata).
    Drop {
        table: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Live queries against the Mixpanel API.
    #[command(subcommand)]
    Query(QueryCommand),
    /// Discover events, properties, and saved entities.
    #[command(subcommand)]
    Discover(DiscoverCommand),
}

#[derive(Debug, Subcommand)]
pub enum AccountCommand {
    /// Store a new account.
    Add {
        name: String,
        #[arg(long)]
        username: String,
        #[arg(long)]
        secret: String,
        #[arg(long)]
        project_id: String,
        #[arg(long, default_value = "us")]
        region: String,
    },
    /// List stored accounts (secrets never shown).
    List,
    /// Remove an account.
    Remove { name: String },
    /// Make an account the default.
    Use { name: String },
}

#[derive(Debug, Args)]
pub struct DateRange {
    #[arg(long)]
    pub from: NaiveDate,
    #[arg(long)]
    pub to: NaiveDate,
}

#[derive(Debug, Subcommand)]
pub enum FetchCommand {
    /// Fetch raw events over a date range.
    Events {
        table: String,
        #[command(flatten)]
        range: DateRange,
        /// Restrict to these event names.
        #[arg(long, value_delimiter = ',')]
        events: Option<Vec<String>>,
        #[arg(long = "where")]
        where_expr: Option<String>,
        #[arg(long)]
        limit: Option<u64>,
        #[arg(long)]
        append: bool,
        /// Fetch date chunks concurrently.
        #[arg(long)]
        parallel: bool,
        #[arg(long, default_value_t = 7)]
        chunk_days: u32,
        #[arg(long, default_value_t = 10)]
        workers: usize,
    },
    /// Fetch user profiles.
    Profiles {
        table: String,
        #[arg(long = "where")]
        where_expr: Option<String>,
        #[arg(long)]
        cohort: Option<i64>,
        #[arg(long)]
        append: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum QueryCommand {
    Segmentation {
        event: String,
        #[command(flatten)]
        range: DateRange,
        #[arg(long)]
        on: Option<String>,
        #[arg(long, default_value = "day")]
        unit: String,
        #[arg(long = "where")]
        where_expr: Option<String>,
    },
    Funnel {
        funnel_id: i64,
        #[command(flatten)]
        range: DateRange,
    },
    Retention {
        born_event: String,
        #[command(flatten)]
        range: DateRange,
        #[arg(long)]
        return_event: Option<String>,
        #[arg(long, default_value = "week")]
        unit: String,
    },
    /// Per-event counts over a date range.
    Events {
        #[arg(value_delimiter = ',')]
        events: Vec<String>,
        #[command(flatten)]
        range: DateRange,
        #[arg(long, default_value = "day")]
        unit: String,
    },
    /// Per-value counts of one event property.
    Properties {
        event: String,
        property: String,
        #[command(flatten)]
        range: DateRange,
        #[arg(long, default_value = "day")]
        unit: String,
        #[arg(long)]
        limit: Option<u32>,
    },
    /// Frequency of use (how many sub-periods users were active).
    Frequency {
        #[command(flatten)]
        range: DateRange,
        #[arg(long)]
        event: Option<String>,
        #[arg(long, default_value = "week")]
        unit: String,
        #[arg(long, default_value = "day")]
        addiction_unit: String,
    },
    /// Raw event feed of specific users.
    Activity {
        #[arg(value_delimiter = ',')]
        distinct_ids: Vec<String>,
        #[command(flatten)]
        range: DateRange,
    },
    Jql {
        /// Inline script, or @path to read a file.
        script: String,
    },
    /// Any saved insights/retention/funnel report by bookmark id.
    Saved { bookmark_id: i64 },
    /// A saved flows report by bookmark id.
    Flows {
        bookmark_id: i64,
        #[arg(long)]
        sankey: bool,
    },
    TopEvents {
        #[arg(long)]
        limit: Option<u32>,
    },
}

#[derive(Debug, Subcommand)]
pub enum DiscoverCommand {
    Events,
    Properties { event: String },
    Values { event: String, property: String },
    Funnels,
    Cohorts,
    Bookmarks,
    TopEvents,
    /// Lexicon schema definitions, raw JSON.
    Schemas,
}

fn parse_unit(raw: &str) -> Result<Unit> {
    Ok(match raw {
        "hour" => Unit::Hour,
        "day" => Unit::Day,
        "week" => Unit::Week,
        "month" => Unit::Month,
        other => anyhow::bail!("unknown unit '{other}' (expected hour, day, week, or month)"),
    })
}

/// Cancellation token wired to Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let child = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling");
            child.cancel();
        }
    });
    cancel
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Account(cmd) => run_account(cmd, cli.json),
        command => {
            let credentials = resolve_credentials(cli.account.as_deref())?;
            let project_id = credentials.project_id.clone();
            let open_store = || match &cli.db {
                Some(path) => Store::open(path),
                None => Store::for_project(&project_id),
            };
            let client = ApiClient::new(credentials)?;
            let cancel = interrupt_token();
            dispatch(command, client, open_store, cli.json, &cancel).await
        }
    }
}

fn run_account(cmd: AccountCommand, json: bool) -> Result<()> {
    let store = ConfigStore::new()?;
    match cmd {
        AccountCommand::Add { name, username, secret, project_id, region } => {
            let region = Region::from_str(&region)?;
            let info = store.add(&name, &username, Secret::new(secret), &project_id, region)?;
            println!("added account '{}' (project {})", info.name, info.project_id);
        }
        AccountCommand::List => {
            let accounts = store.list()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&accounts)?);
            } else {
                for account in accounts {
                    let marker = if account.is_default { "*" } else { " " };
                    println!(
                        "{marker} {}  {}  project={}  region={}",
                        account.name, account.username, account.project_id, account.region
                    );
                }
            }
        }
        AccountCommand::Remove { name } => {
            store.remove(&name)?;
            println!("removed account '{name}'");
        }
        AccountCommand::Use { name } => {
            store.set_default(&name)?;
            println!("default account is now '{name}'");
        }
    }
    Ok(())
}

async fn dispatch(
    command: Command,
    client: ApiClient,
    open_store: impl Fn() -> mp_core::Result<Store>,
    json: bool,
    cancel: &CancellationToken,
) -> Result<()> {
    match command {
        Command::Account(_) => unreachable!("handled before credential resolution"),

        Command::Fetch(cmd) => {
            let fetcher = Fetcher::new(client);
            let mut store = open_store()?;
            match cmd {
                FetchCommand::Events {
                    table,
                    range,
                    events,
                    where_expr,
                    limit,
                    append,
                    parallel,
                    chunk_days,
                    workers,
                } => {
                    let mut params = ExportParams::new(range.from, range.to);
                    params.events = events;
                    params.where_expr = where_expr;
                    params.limit = limit;
                    if parallel {
                        let options = ParallelFetchOptions {
                            chunk_days,
                            max_workers: workers,
                            append,
                            ..Default::default()
                        };
                        let result = fetcher
                            .fetch_events_parallel(&mut store, &table, params, options, cancel)
                            .await?;
                        emit(json, &result.to_dict(), || render_table(result.to_table()));
                    } else {
                        let mut progress =
                            |n: u64| tracing::info!(records = n, table = %table, "fetching");
                        let options = FetchOptions {
                            append,
                            progress: Some(&mut progress),
                            ..Default::default()
                        };
                        let result = fetcher
                            .fetch_events(&mut store, &table, params, options, cancel)
                            .await?;
                        emit(json, &result.to_dict(), || render_table(result.to_table()));
                    }
                }
                FetchCommand::Profiles { table, where_expr, cohort, append } => {
                    let params = EngageParams {
                        where_expr,
                        cohort_id: cohort,
                        ..Default::default()
                    };
                    let options = FetchOptions { append, ..Default::default() };
                    let result =
                        fetcher.fetch_profiles(&mut store, &table, params, options, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
            }
        }

        Command::Sql { query, csv } => {
            let store = open_store()?;
            let table = store.sql_rows(&query)?;
            if csv {
                println!("{}", table.to_csv());
            } else {
                emit(json, &serde_json::to_value(&table)?, || render_table(&table));
            }
        }

        Command::Tables => {
            let store = open_store()?;
            let tables = store.list_tables()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&tables)?);
            } else {
                for t in tables {
                    println!(
                        "{}  {}  rows={}  fetched_at={}",
                        t.name,
                        t.kind.as_str(),
                        t.row_count,
                        t.fetched_at.to_rfc3339()
                    );
                }
            }
        }

        Command::Schema { table } => {
            let store = open_store()?;
            let schema = store.get_schema(&table)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&schema)?);
            } else {
                for column in schema {
                    let null = if column.nullable { "" } else { " NOT NULL" };
                    println!("{}  {}{null}", column.column, column.type_name);
                }
            }
        }

        Command::Sample { table, rows } => {
            let store = open_store()?;
            let sample = store.sample(&table, rows)?;
            emit(json, &serde_json::to_value(&sample)?, || render_table(&sample));
        }

        Command::Summarize { table } => {
            let store = open_store()?;
            let summary = store.summarize(&table)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        Command::Events { table } => {
            let store = open_store()?;
            let breakdown = store.event_breakdown(&table)?;
            println!("{}", serde_json::to_string_pretty(&breakdown)?);
        }

        Command::Props { table, event } => {
            let store = open_store()?;
            for key in store.property_keys(&table, event.as_deref())? {
                println!("{key}");
            }
        }

        Command::Stats { table, column, top } => {
            let store = open_store()?;
            let stats = store.column_stats(&table, &column, top)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }

        Command::Drop { table, all } => {
            let mut store = open_store()?;
            if all {
                let dropped = store.drop_all()?;
                println!("dropped {} table(s)", dropped.len());
            } else if let Some(table) = table {
                store.drop_table(&table)?;
                println!("dropped '{table}'");
            } else {
                anyhow::bail!("pass a table name or --all");
            }
        }

        Command::Query(cmd) => {
            let live = LiveQuery::new(client);
            match cmd {
                QueryCommand::Segmentation { event, range, on, unit, where_expr } => {
                    let mut params = SegmentationParams::new(event, range.from, range.to);
                    params.unit = parse_unit(&unit)?;
                    params.on = on;
                    params.where_expr = where_expr;
                    let result = live.segmentation(params, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
                QueryCommand::Funnel { funnel_id, range } => {
                    let params = FunnelParams {
                        funnel_id,
                        from_date: range.from,
                        to_date: range.to,
                        unit: None,
                    };
                    let result = live.funnel(params, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
                QueryCommand::Retention { born_event, range, return_event, unit } => {
                    let params = RetentionParams {
                        born_event,
                        return_event,
                        from_date: range.from,
                        to_date: range.to,
                        unit: parse_unit(&unit)?,
                        born_where: None,
                        where_expr: None,
                        interval_count: None,
                    };
                    let result = live.retention(params, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
                QueryCommand::Events { events, range, unit } => {
                    let params = EventCountsParams {
                        events,
                        from_date: range.from,
                        to_date: range.to,
                        unit: parse_unit(&unit)?,
                    };
                    let result = live.event_counts(params, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
                QueryCommand::Properties { event, property, range, unit, limit } => {
                    let params = PropertyCountsParams {
                        event,
                        property,
                        from_date: range.from,
                        to_date: range.to,
                        unit: parse_unit(&unit)?,
                        values: None,
                        limit,
                    };
                    let result = live.property_counts(params, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
                QueryCommand::Frequency { range, event, unit, addiction_unit } => {
                    let params = FrequencyParams {
                        event,
                        from_date: range.from,
                        to_date: range.to,
                        unit: parse_unit(&unit)?,
                        addiction_unit: parse_unit(&addiction_unit)?,
                        where_expr: None,
                    };
                    let result = live.frequency(params, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
                QueryCommand::Activity { distinct_ids, range } => {
                    let result =
                        live.activity_feed(&distinct_ids, range.from, range.to, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
                QueryCommand::Jql { script } => {
                    let script = match script.strip_prefix('@') {
                        Some(path) => std::fs::read_to_string(path)?,
                        None => script,
                    };
                    let result = live.jql(&script, None, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
                QueryCommand::Saved { bookmark_id } => {
                    let result = live.query_saved_report(bookmark_id, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
                QueryCommand::Flows { bookmark_id, sankey } => {
                    let query_type =
                        if sankey { FlowsQueryType::FlowsSankey } else { FlowsQueryType::Flows };
                    let result = live.query_flows(bookmark_id, query_type, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
                QueryCommand::TopEvents { limit } => {
                    let result = live.top_events(limit, cancel).await?;
                    emit(json, &result.to_dict(), || render_table(result.to_table()));
                }
            }
        }

        Command::Discover(cmd) => {
            let discovery = Discovery::new(client);
            match cmd {
                DiscoverCommand::Events => {
                    print_lines(&discovery.list_events(None, cancel).await?)
                }
                DiscoverCommand::Properties { event } => {
                    print_lines(&discovery.list_properties(&event, None, cancel).await?)
                }
                DiscoverCommand::Values { event, property } => print_lines(
                    &discovery.list_property_values(&event, &property, None, cancel).await?,
                ),
                DiscoverCommand::Funnels => {
                    for funnel in discovery.list_funnels(cancel).await? {
                        println!("{}  {}", funnel.funnel_id, funnel.name);
                    }
                }
                DiscoverCommand::Cohorts => {
                    for cohort in discovery.list_cohorts(cancel).await? {
                        println!("{}  {}  ({} users)", cohort.id, cohort.name, cohort.count);
                    }
                }
                DiscoverCommand::Bookmarks => {
                    for bookmark in discovery.list_bookmarks(cancel).await? {
                        println!("{}  [{}]  {}", bookmark.id, bookmark.kind, bookmark.name);
                    }
                }
                DiscoverCommand::TopEvents => {
                    print_lines(&discovery.list_top_events(None, cancel).await?)
                }
                DiscoverCommand::Schemas => {
                    let schemas = discovery.lexicon_schemas(cancel).await?;
                    println!("{schemas:#}");
                }
            }
        }
    }
    Ok(())
}

fn emit(json: bool, payload: &serde_json::Value, text: impl FnOnce() -> String) {
    if json {
        println!("{payload:#}");
    } else {
        print!("{}", text());
    }
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("{line}");
    }
}
