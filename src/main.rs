mod currency;
mod db;
mod error;
mod insights;
mod model;
mod risk;

use std::path::PathBuf;

use anyhow::Result;
use chrono::{Datelike, Duration, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use crate::currency::{format_cost, last_used_currency, total_cost, DEFAULT_CURRENCY};
use crate::db::{default_db_path, EntryQuery, Store};
use crate::model::{
    Entry, EntryType, InformationEdge, LiquidityRating, Ownership, RiskEntry, RiskStatus, RiskType,
};

#[derive(Parser)]
#[command(name = "daylog", about = "Local daily log and risk tracker", version)]
struct Cli {
    /// Database file (defaults to ./data/daylog.db)
    #[arg(long, env = "DAYLOG_DB_PATH", global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a quick entry; #words become tags
    Log {
        text: Vec<String>,
        /// Entry type
        #[arg(long, value_enum, default_value = "note")]
        r#type: EntryType,
        #[arg(long = "tag")]
        tags: Vec<String>,
        /// Provenance (manual/auto/sync)
        #[arg(long)]
        source: Option<String>,
    },
    /// Record a new risk entry
    Risk(RiskArgs),
    /// Update an existing risk entry
    UpdateRisk(UpdateRiskArgs),
    /// List risk entries with portfolio totals
    Risks {
        #[arg(long, value_enum)]
        r#type: Option<RiskType>,
        #[arg(long, value_enum)]
        status: Option<RiskStatus>,
        /// Include closed, realized and written-off entries
        #[arg(long)]
        show_all: bool,
        /// Print reward and opportunity-cost history per entry
        #[arg(long)]
        show_history: bool,
    },
    /// Show today's entries
    Today {
        #[command(flatten)]
        filter: ViewFilter,
    },
    /// Show this week's entries
    Week {
        #[command(flatten)]
        filter: ViewFilter,
    },
    /// Show the most recent entries
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[command(flatten)]
        filter: ViewFilter,
    },
    /// Pattern analysis over recent risk entries
    Insights {
        #[command(subcommand)]
        report: InsightReport,
    },
    /// Soft-field usage and suggestions
    Fields {
        #[arg(long, default_value_t = insights::DEFAULT_WINDOW_DAYS)]
        days: i64,
    },
    /// Review prompts for open and recently closed risks
    Review,
}

#[derive(Subcommand)]
enum InsightReport {
    /// How often decisions went against your own judgement
    Misalignment {
        #[arg(long, default_value_t = insights::DEFAULT_WINDOW_DAYS)]
        days: i64,
    },
    /// Runs of consecutive misaligned decisions
    Drift {
        #[arg(long, default_value_t = insights::DEFAULT_WINDOW_DAYS)]
        days: i64,
    },
    /// Outcomes split by who really made the call
    Ownership {
        #[arg(long, default_value_t = insights::DEFAULT_WINDOW_DAYS)]
        days: i64,
    },
}

#[derive(clap::Args)]
struct ViewFilter {
    #[arg(long, value_enum)]
    r#type: Option<EntryType>,
    #[arg(long = "tag")]
    tags: Vec<String>,
}

impl ViewFilter {
    fn apply(&self, mut query: EntryQuery) -> EntryQuery {
        query.entry_type = self.r#type;
        if !self.tags.is_empty() {
            query.tags = Some(self.tags.clone());
        }
        query
    }
}

#[derive(clap::Args)]
struct RiskArgs {
    #[arg(value_enum)]
    risk_type: RiskType,
    /// What you put in
    cost: f64,
    #[arg(long)]
    currency: Option<String>,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long = "tag")]
    tags: Vec<String>,

    #[arg(long)]
    expected_value: Option<f64>,
    /// Confidence in the expected value, 0.0-1.0
    #[arg(long)]
    confidence: Option<f64>,
    /// Perceived opportunity cost at entry
    #[arg(long)]
    opportunity_cost: Option<f64>,
    #[arg(long)]
    opportunity_cost_real: Option<f64>,
    #[arg(long)]
    oc_notes: Option<String>,

    /// Your probability of the win case, 0.0-1.0
    #[arg(long)]
    my_probability: Option<f64>,
    /// The market's implied probability, 0.0-1.0
    #[arg(long)]
    market_probability: Option<f64>,

    #[arg(long)]
    odds: Option<f64>,
    #[arg(long)]
    fair_value: Option<f64>,
    #[arg(long)]
    max_loss: Option<f64>,
    #[arg(long)]
    max_gain: Option<f64>,
    #[arg(long = "risk-factor")]
    risk_factors: Vec<String>,
    #[arg(long)]
    exit_strategy: Option<String>,
    #[arg(long, value_enum)]
    liquidity: Option<LiquidityRating>,
    #[arg(long)]
    time_to_exit: Option<String>,
    #[arg(long)]
    timeframe: Option<String>,

    #[arg(long)]
    allocation_pct: Option<f64>,
    #[arg(long, value_enum)]
    information_edge: Option<InformationEdge>,
    #[arg(long)]
    hours: Option<f64>,
    #[arg(long)]
    gas_fee: Option<f64>,
    #[arg(long)]
    gas_fee_currency: Option<String>,

    /// Who really made this call
    #[arg(long, value_enum)]
    ownership: Option<Ownership>,
    /// Does this align with your own judgement (true/false)
    #[arg(long)]
    aligned: Option<bool>,
    #[arg(long)]
    voluntary: Option<bool>,
    #[arg(long = "voice")]
    voices: Vec<String>,
    #[arg(long)]
    motivation_internal: Option<bool>,
    #[arg(long)]
    motivation: Option<String>,
    /// Trust in the information source, 0.0-1.0
    #[arg(long)]
    trust: Option<f64>,

    #[arg(long = "related-trade")]
    related_trades: Vec<i64>,
    #[arg(long = "related-alpha")]
    related_alpha: Vec<i64>,
    #[arg(long = "related-code")]
    related_code: Vec<i64>,
}

#[derive(clap::Args)]
struct UpdateRiskArgs {
    id: i64,
    /// New expected value (appends to reward history)
    #[arg(long)]
    expected_value: Option<f64>,
    #[arg(long)]
    reason: Option<String>,
    #[arg(long)]
    confidence: Option<f64>,
    #[arg(long)]
    opportunity_cost: Option<f64>,
    #[arg(long)]
    opportunity_cost_real: Option<f64>,
    #[arg(long)]
    my_probability: Option<f64>,
    #[arg(long)]
    market_probability: Option<f64>,
    #[arg(long, value_enum)]
    status: Option<RiskStatus>,
    /// What actually came back (with --status)
    #[arg(long)]
    realized_value: Option<f64>,
    #[arg(long)]
    realized_currency: Option<String>,
    #[arg(long)]
    notes: Option<String>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = Store::open(&cli.db.unwrap_or_else(default_db_path))?;

    match cli.command {
        Commands::Log {
            text,
            r#type,
            tags,
            source,
        } => cmd_log(&store, text, r#type, tags, source)?,
        Commands::Risk(args) => cmd_risk(&store, args)?,
        Commands::UpdateRisk(args) => cmd_update_risk(&store, args)?,
        Commands::Risks {
            r#type,
            status,
            show_all,
            show_history,
        } => cmd_risks(&store, r#type, status, show_all, show_history)?,
        Commands::Today { filter } => {
            let start = Utc::now()
                .date_naive()
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .unwrap_or_else(Utc::now);
            cmd_list(&store, filter.apply(EntryQuery::default().since(start)), "Today")?;
        }
        Commands::Week { filter } => {
            let today = Utc::now().date_naive();
            let monday = today - Duration::days(today.weekday().num_days_from_monday() as i64);
            let start = monday
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .unwrap_or_else(Utc::now);
            cmd_list(
                &store,
                filter.apply(EntryQuery::default().since(start)),
                "This week",
            )?;
        }
        Commands::Recent { limit, filter } => {
            cmd_list(
                &store,
                filter.apply(EntryQuery::default().with_limit(limit)),
                "Recent",
            )?;
        }
        Commands::Insights { report } => match report {
            InsightReport::Misalignment { days } => cmd_misalignment(&store, days),
            InsightReport::Drift { days } => cmd_drift(&store, days),
            InsightReport::Ownership { days } => cmd_ownership(&store, days),
        },
        Commands::Fields { days } => cmd_fields(&store, days),
        Commands::Review => cmd_review(&store),
    }
    Ok(())
}

/// Words starting with '#' become tags; the text is stored as written.
fn extract_hashtags(words: &[String]) -> Vec<String> {
    words
        .iter()
        .filter_map(|w| w.strip_prefix('#'))
        .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric() && c != '_').to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn cmd_log(
    store: &Store,
    text: Vec<String>,
    entry_type: EntryType,
    tags: Vec<String>,
    source: Option<String>,
) -> Result<()> {
    let notes = text.join(" ");
    if notes.trim().is_empty() {
        println!("Nothing to log.");
        return Ok(());
    }
    let mut entry = Entry::new(entry_type, notes);
    entry.tags = tags;
    for tag in extract_hashtags(&text) {
        if !entry.tags.contains(&tag) {
            entry.tags.push(tag);
        }
    }
    if let Some(source) = source {
        entry.source = source;
    }
    let id = store.add_entry(&entry)?;
    if entry.tags.is_empty() {
        println!("Logged {} entry #{id}.", entry_type.as_str());
    } else {
        println!(
            "Logged {} entry #{id} [{}].",
            entry_type.as_str(),
            entry.tags.join(", ")
        );
    }
    Ok(())
}

fn cmd_risk(store: &Store, args: RiskArgs) -> Result<()> {
    let mut entry = RiskEntry::new(args.risk_type, args.cost);
    entry.currency = match args.currency {
        Some(c) => c,
        None => last_used_currency(store)?.unwrap_or_else(|| DEFAULT_CURRENCY.to_string()),
    };
    entry.initial_expected_value = args.expected_value;
    entry.confidence_level = args.confidence;
    entry.opportunity_cost_perceived = args.opportunity_cost;
    entry.opportunity_cost_real = args.opportunity_cost_real;
    entry.opportunity_cost_notes = args.oc_notes;
    entry.my_probability = args.my_probability;
    entry.market_probability = args.market_probability;
    entry.odds_or_price = args.odds;
    entry.fair_value = args.fair_value;
    entry.max_loss = args.max_loss;
    entry.max_gain = args.max_gain;
    entry.risk_factors = args.risk_factors;
    entry.exit_strategy = args.exit_strategy;
    entry.liquidity_rating = args.liquidity;
    entry.time_to_exit = args.time_to_exit;
    entry.expected_timeframe = args.timeframe;
    entry.portfolio_allocation_pct = args.allocation_pct;
    entry.information_edge = args.information_edge;
    entry.time_invested_hours = args.hours;
    entry.gas_fee = args.gas_fee;
    entry.gas_fee_currency = args.gas_fee_currency;
    entry.ownership = args.ownership;
    entry.aligned_with_self = args.aligned;
    entry.voluntary = args.voluntary;
    entry.voices_present = args.voices;
    entry.motivation_internal = args.motivation_internal;
    entry.motivation_type = args.motivation;
    entry.trust_level = args.trust;
    entry.related_trades = args.related_trades;
    entry.related_alpha = args.related_alpha;
    entry.related_code = args.related_code;

    let cost_str = format_cost(args.cost, &entry.currency);
    let id = risk::create_risk_entry(store, entry, args.notes, args.tags)?;
    println!("Recorded risk #{id}: {cost_str} at stake.");
    if let Ok((_, saved)) = risk::load_risk(store, id) {
        if let Some(edge) = saved.edge_pct {
            println!("  Edge: {edge:+.1}% vs market");
        }
        if let Some(ev) = saved.initial_expected_value {
            println!("  Expected value: {}", format_cost(ev, &saved.currency));
        }
    }
    Ok(())
}

fn cmd_update_risk(store: &Store, args: UpdateRiskArgs) -> Result<()> {
    let id = args.id;
    let mut touched = false;

    if let Some(value) = args.expected_value {
        let change = risk::update_reward(
            store,
            id,
            value,
            args.reason.clone(),
            args.notes.clone(),
            args.confidence,
        )?;
        let (_, current) = risk::load_risk(store, id)?;
        match change.old {
            Some(old) => {
                let arrow = if value >= old { "↑".green() } else { "↓".red() };
                println!(
                    "Expected value updated: {} → {} {arrow}",
                    format_cost(old, &current.currency),
                    format_cost(value, &current.currency)
                );
                if let Some(pct) = change.delta_pct() {
                    println!("  Change: {pct:+.1}%");
                }
            }
            None => println!(
                "Expected value set: {}",
                format_cost(value, &current.currency)
            ),
        }
        touched = true;
    }

    if args.opportunity_cost.is_some() || args.opportunity_cost_real.is_some() {
        let change = risk::update_opportunity_cost(
            store,
            id,
            args.opportunity_cost,
            args.opportunity_cost_real,
            args.notes.clone(),
        )?;
        if let Some(p) = change.perceived {
            match p.old {
                Some(old) => println!("Perceived opportunity cost updated: {old} → {}", p.new),
                None => println!("Perceived opportunity cost set: {}", p.new),
            }
        }
        if let Some(r) = change.real {
            match r.old {
                Some(old) => println!("Real opportunity cost updated: {old} → {}", r.new),
                None => println!("Real opportunity cost set: {}", r.new),
            }
        }
        touched = true;
    }

    if args.my_probability.is_some() || args.market_probability.is_some() {
        let edge =
            risk::update_probabilities(store, id, args.my_probability, args.market_probability)?;
        match edge {
            Some(edge) => println!("Edge recomputed: {edge:+.1}% vs market"),
            None => println!("Probability recorded; edge needs both sides."),
        }
        touched = true;
    }

    if let Some(status) = args.status {
        let change = risk::set_status(
            store,
            id,
            status,
            args.realized_value,
            args.realized_currency,
            args.notes.clone(),
        )?;
        println!("Status: {}", styled_status(status));
        if let (Some(pnl), Some(roi)) = (change.pnl, change.roi_pct) {
            let line = format!("  PnL: {pnl:+.2} ({roi:+.1}% ROI)");
            if pnl >= 0.0 {
                println!("{}", line.green());
            } else {
                println!("{}", line.red());
            }
        }
        touched = true;
    }

    if !touched {
        println!("Nothing to update for risk #{id}.");
    }
    Ok(())
}

fn styled_status(status: RiskStatus) -> colored::ColoredString {
    match status {
        RiskStatus::Open => status.as_str().yellow(),
        RiskStatus::Realized => status.as_str().green(),
        RiskStatus::Closed => status.as_str().blue(),
        RiskStatus::WrittenOff => status.as_str().red(),
    }
}

fn cmd_risks(
    store: &Store,
    type_filter: Option<RiskType>,
    status_filter: Option<RiskStatus>,
    show_all: bool,
    show_history: bool,
) -> Result<()> {
    let entries = store.get_entries(&EntryQuery::of_type(EntryType::Risk))?;
    let risks: Vec<(&Entry, &RiskEntry)> = entries
        .iter()
        .filter_map(|entry| entry.payload.risk().map(|r| (entry, r)))
        .filter(|(_, r)| type_filter.map_or(true, |t| r.risk_type == t))
        .filter(|(_, r)| match status_filter {
            Some(status) => r.status == status,
            None => show_all || r.status == RiskStatus::Open,
        })
        .collect();

    if risks.is_empty() {
        println!("No matching risk entries.");
        return Ok(());
    }

    for (entry, r) in &risks {
        let id = entry.id.map(|i| i.to_string()).unwrap_or_default();
        println!(
            "#{id} [{}] {} — {} ({})",
            styled_status(r.status),
            entry.timestamp.format("%Y-%m-%d"),
            entry.notes,
            r.risk_type.as_str()
        );
        println!("    Cost: {}", format_cost(total_cost(r), &r.currency));
        if let Some(ev) = r.current_expected_value {
            println!("    Expected: {}", format_cost(ev, &r.currency));
        }
        if let Some(edge) = r.edge_pct {
            println!("    Edge: {edge:+.1}%");
        }
        if let Some(oc) = r.effective_opportunity_cost() {
            println!("    Opportunity cost: {}", format_cost(oc, &r.currency));
        }
        if let (Some(pnl), Some(roi)) = (r.pnl(), r.roi_pct()) {
            let line = format!("    PnL: {pnl:+.2} ({roi:+.1}% ROI)");
            if pnl >= 0.0 {
                println!("{}", line.green());
            } else {
                println!("{}", line.red());
            }
        }
        if show_history {
            for record in &r.reward_history {
                println!(
                    "      {} ev={} {}",
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    record.expected_value,
                    record.reason.as_deref().unwrap_or("")
                );
            }
            for record in &r.opportunity_cost_history {
                println!(
                    "      {} oc[{}]={}",
                    record.timestamp.format("%Y-%m-%d %H:%M"),
                    record.kind.as_str(),
                    record.opportunity_cost
                );
            }
        }
    }

    print_portfolio_summary(&risks);
    Ok(())
}

/// Per-currency totals over the listed entries. Explicit-zero opportunity
/// costs count as answered; unset ones do not.
fn print_portfolio_summary(risks: &[(&Entry, &RiskEntry)]) {
    use std::collections::BTreeMap;

    let mut at_stake: BTreeMap<&str, f64> = BTreeMap::new();
    let mut expected: BTreeMap<&str, f64> = BTreeMap::new();
    let mut realized: BTreeMap<&str, f64> = BTreeMap::new();
    let mut pnl: BTreeMap<&str, f64> = BTreeMap::new();
    let mut open = 0usize;
    let mut oc_answered = 0usize;
    let mut oc_total = 0.0;

    for (_, r) in risks {
        if r.status == RiskStatus::Open {
            open += 1;
            *at_stake.entry(r.currency.as_str()).or_insert(0.0) += total_cost(r);
            if let Some(ev) = r.current_expected_value {
                *expected.entry(r.currency.as_str()).or_insert(0.0) += ev;
            }
        }
        if let Some(v) = r.realized_value {
            *realized.entry(r.currency.as_str()).or_insert(0.0) += v;
        }
        if let Some(p) = r.pnl() {
            *pnl.entry(r.currency.as_str()).or_insert(0.0) += p;
        }
        if let Some(oc) = r.effective_opportunity_cost() {
            oc_answered += 1;
            oc_total += oc;
        }
    }

    println!();
    println!("{}", "Portfolio".bold());
    println!("  {} entries, {open} open", risks.len());
    for (cur, amount) in &at_stake {
        println!("  At stake: {}", format_cost(*amount, cur));
    }
    for (cur, amount) in &expected {
        println!("  Expected back: {}", format_cost(*amount, cur));
    }
    for (cur, amount) in &realized {
        println!("  Realized: {}", format_cost(*amount, cur));
    }
    for (cur, amount) in &pnl {
        let line = format!("  Realized PnL: {}", format_cost(*amount, cur));
        if *amount >= 0.0 {
            println!("{}", line.green());
        } else {
            println!("{}", line.red());
        }
    }
    if oc_answered > 0 {
        println!("  Opportunity cost noted on {oc_answered} entries, total {oc_total:.2}");
    }
}

fn cmd_list(store: &Store, query: EntryQuery, heading: &str) -> Result<()> {
    let entries = store.get_entries(&query)?;
    if entries.is_empty() {
        println!("{heading}: no entries.");
        return Ok(());
    }
    println!("{}", heading.bold());
    for entry in &entries {
        let id = entry.id.map(|i| i.to_string()).unwrap_or_default();
        let tags = if entry.tags.is_empty() {
            String::new()
        } else {
            format!(" [{}]", entry.tags.join(", "))
        };
        println!(
            "  #{id} {} {:<11} {}{tags}",
            entry.timestamp.format("%m-%d %H:%M"),
            entry.entry_type.as_str(),
            entry.notes
        );
    }
    Ok(())
}

fn cmd_misalignment(store: &Store, days: i64) {
    let report = insights::misalignment(store, days);
    println!("{}", format!("Alignment, last {days} days").bold());
    if report.total == 0 {
        println!("  No risk entries in the window.");
        return;
    }
    println!(
        "  {} entries: {} aligned, {} misaligned ({:.0}% misalignment rate)",
        report.total,
        report.aligned,
        report.misaligned,
        report.misalignment_rate * 100.0
    );
    if !report.top_misaligned.is_empty() {
        println!("  Went against yourself on:");
        for item in &report.top_misaligned {
            let id = item.id.map(|i| i.to_string()).unwrap_or_default();
            let outcome = match item.pnl {
                Some(pnl) => format!(" (pnl {pnl:+.2})"),
                None => String::new(),
            };
            println!(
                "    #{id} {} {} — {}{outcome}",
                item.timestamp.format("%Y-%m-%d"),
                format_cost(item.entry_cost, &item.currency),
                item.notes
            );
        }
    }
    print_breakdown("By ownership", &report.ownership_breakdown);
    print_breakdown("Voices present", &report.voices_breakdown);
    print_breakdown("Motivation", &report.motivation_breakdown);
}

fn print_breakdown(label: &str, counts: &std::collections::BTreeMap<String, usize>) {
    if counts.is_empty() {
        return;
    }
    println!("  {label}:");
    for (key, count) in counts {
        println!("    {key}: {count}");
    }
}

fn cmd_drift(store: &Store, days: i64) {
    let report = insights::drift(store, days);
    println!("{}", format!("Drift, last {days} days").bold());
    if report.sequences == 0 {
        println!("  No misalignment sequences. Holding your own line.");
        return;
    }
    println!(
        "  {} sequences, {} corrected, longest run {}",
        report.sequences, report.corrections, report.longest_run
    );
    if report.currently_drifting {
        println!("{}", "  Currently in a misaligned run.".red());
    }
    for c in &report.recent_corrections {
        println!(
            "  Corrected a run of {} on {} (drifted for {} days)",
            c.run_length,
            c.timestamp.format("%Y-%m-%d"),
            c.run_days
        );
    }
}

fn cmd_ownership(store: &Store, days: i64) {
    let stats = insights::ownership_correlation(store, days);
    println!("{}", format!("Ownership vs outcome, last {days} days").bold());
    for (bucket, s) in &stats {
        if s.tracked == 0 {
            continue;
        }
        match (s.avg_pnl, s.avg_roi_pct) {
            (Some(pnl), Some(roi)) => println!(
                "  {}: {} entries, {} realized, avg pnl {pnl:+.2}, avg ROI {roi:+.1}%",
                bucket.as_str(),
                s.tracked,
                s.count
            ),
            _ => println!(
                "  {}: {} entries, none realized yet",
                bucket.as_str(),
                s.tracked
            ),
        }
    }
    if stats.iter().all(|(_, s)| s.tracked == 0) {
        println!("  No ownership-tagged risk entries in the window.");
    }
}

fn cmd_fields(store: &Store, days: i64) {
    let report = insights::field_usage(store, days);
    println!("{}", format!("Field usage, last {days} days").bold());
    if report.total_risks == 0 {
        println!("  No risk entries in the window.");
        return;
    }
    for f in &report.fields {
        println!("  {:<28} {:>3} ({:.0}%)", f.name, f.count, f.pct * 100.0);
    }
    let popular = report.popular();
    if !popular.is_empty() {
        let names: Vec<&str> = popular.iter().map(|f| f.name).collect();
        println!("  Working for you: {}", names.join(", "));
    }
    let unused = report.unused();
    if !unused.is_empty() {
        let names: Vec<&str> = unused.iter().map(|f| f.name).collect();
        println!("  Barely used, consider dropping: {}", names.join(", "));
    }
}

fn cmd_review(store: &Store) {
    let prompts = insights::review_prompts(store);
    if prompts.is_empty() {
        println!("Nothing to review right now.");
        return;
    }
    println!("{}", "Review".bold());
    for p in &prompts {
        let id = p.entry_id.map(|i| i.to_string()).unwrap_or_default();
        println!("  #{id} {}", p.prompt);
    }
}
