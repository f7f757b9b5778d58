//! Pattern analysis over risk entries: alignment, drift, ownership
//! correlation and soft-field usage. These are advisory read paths; any
//! failure degrades to a neutral report instead of surfacing an error.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::db::{EntryQuery, Store};
use crate::model::{Entry, EntryType, Ownership, RiskEntry, RiskStatus};

pub const DEFAULT_WINDOW_DAYS: i64 = 90;

/// Optional self-knowledge fields tracked by the usage report. Anything not
/// a typed field is looked up in the payload's extension map.
pub const SOFT_FIELDS: [&str; 19] = [
    "my_probability",
    "market_probability",
    "gut_feeling",
    "trust_level",
    "what_i_see",
    "why_i_trust_this",
    "red_flags",
    "pattern_match",
    "related_trades",
    "related_alpha",
    "related_code",
    "domain_knowledge_applied",
    "cash_out_available",
    "sportsbook",
    "game_id",
    "bet_type",
    "gas_fee",
    "how_i_calculated",
    "what_market_missing",
];

const UNUSED_THRESHOLD: f64 = 0.10;
const POPULAR_THRESHOLD: f64 = 0.20;

/// Risk entries in the window, oldest first. Storage failures log and
/// yield an empty set so callers stay on the neutral path.
fn fetch_risks(store: &Store, days: i64) -> Vec<(Entry, RiskEntry)> {
    let start = Utc::now() - Duration::days(days);
    let query = EntryQuery::of_type(EntryType::Risk).since(start);
    let entries = match store.get_entries(&query) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(%err, "risk fetch failed, returning empty analysis window");
            return Vec::new();
        }
    };
    let mut risks: Vec<(Entry, RiskEntry)> = entries
        .into_iter()
        .filter_map(|entry| {
            let risk = entry.payload.risk().cloned()?;
            Some((entry, risk))
        })
        .collect();
    risks.sort_by_key(|(entry, _)| entry.timestamp);
    risks
}

#[derive(Debug, Clone)]
pub struct MisalignedEntry {
    pub id: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub notes: String,
    pub entry_cost: f64,
    pub currency: String,
    pub pnl: Option<f64>,
}

/// Alignment tally for a window. The rate divides misaligned entries by
/// every risk entry in the window, including ones that never answered the
/// alignment question.
#[derive(Debug, Clone, Default)]
pub struct MisalignmentReport {
    pub total: usize,
    pub aligned: usize,
    pub misaligned: usize,
    pub misalignment_rate: f64,
    pub top_misaligned: Vec<MisalignedEntry>,
    pub ownership_breakdown: BTreeMap<String, usize>,
    pub voices_breakdown: BTreeMap<String, usize>,
    pub motivation_breakdown: BTreeMap<String, usize>,
}

pub fn misalignment(store: &Store, days: i64) -> MisalignmentReport {
    let risks = fetch_risks(store, days);
    let mut report = MisalignmentReport {
        total: risks.len(),
        ..Default::default()
    };

    for (entry, risk) in &risks {
        match risk.aligned_with_self {
            Some(true) => report.aligned += 1,
            Some(false) => {
                report.misaligned += 1;
                if report.top_misaligned.len() < 10 {
                    report.top_misaligned.push(MisalignedEntry {
                        id: entry.id,
                        timestamp: entry.timestamp,
                        notes: entry.notes.clone(),
                        entry_cost: risk.entry_cost,
                        currency: risk.currency.clone(),
                        pnl: risk.pnl(),
                    });
                }
                if let Some(ownership) = risk.ownership {
                    *report
                        .ownership_breakdown
                        .entry(ownership.as_str().to_string())
                        .or_insert(0) += 1;
                }
                for voice in &risk.voices_present {
                    *report.voices_breakdown.entry(voice.clone()).or_insert(0) += 1;
                }
                // Named motivations carry more signal; internal/external is
                // the fallback when only the flag was answered.
                if let Some(kind) = &risk.motivation_type {
                    *report
                        .motivation_breakdown
                        .entry(kind.clone())
                        .or_insert(0) += 1;
                } else if let Some(internal) = risk.motivation_internal {
                    let key = if internal { "internal" } else { "external" };
                    *report
                        .motivation_breakdown
                        .entry(key.to_string())
                        .or_insert(0) += 1;
                }
            }
            None => {}
        }
    }
    if report.total > 0 {
        report.misalignment_rate = report.misaligned as f64 / report.total as f64;
    }
    report
}

#[derive(Debug, Clone)]
pub struct DriftCorrection {
    pub timestamp: DateTime<Utc>,
    pub run_length: usize,
    /// Days between the first misaligned entry of the run and the
    /// correcting entry.
    pub run_days: i64,
}

/// Runs of consecutive misaligned entries in chronological order. A run
/// still open at the end of the window counts as a sequence without a
/// correction.
#[derive(Debug, Clone, Default)]
pub struct DriftReport {
    pub sequences: usize,
    pub corrections: usize,
    pub longest_run: usize,
    pub currently_drifting: bool,
    pub recent_corrections: Vec<DriftCorrection>,
}

pub fn drift(store: &Store, days: i64) -> DriftReport {
    let risks = fetch_risks(store, days);
    let mut report = DriftReport::default();
    let mut run = 0usize;
    let mut run_started: Option<DateTime<Utc>> = None;

    for (entry, risk) in &risks {
        match risk.aligned_with_self {
            Some(false) => {
                if run == 0 {
                    run_started = Some(entry.timestamp);
                }
                run += 1;
            }
            Some(true) => {
                if run > 0 {
                    report.sequences += 1;
                    report.corrections += 1;
                    report.longest_run = report.longest_run.max(run);
                    let run_days = run_started
                        .map(|start| (entry.timestamp - start).num_days())
                        .unwrap_or(0);
                    report.recent_corrections.push(DriftCorrection {
                        timestamp: entry.timestamp,
                        run_length: run,
                        run_days,
                    });
                    run = 0;
                    run_started = None;
                }
            }
            None => {}
        }
    }
    if run > 0 {
        report.sequences += 1;
        report.longest_run = report.longest_run.max(run);
        report.currently_drifting = true;
    }
    // Keep the newest corrections when there are many.
    if report.recent_corrections.len() > 10 {
        let skip = report.recent_corrections.len() - 10;
        report.recent_corrections.drain(..skip);
    }
    report
}

/// Per-bucket outcome stats. `count` covers the entries the averages are
/// taken over (realized value recorded, positive cost); `tracked` is every
/// entry tagged with the bucket, realized or not.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnershipStats {
    pub count: usize,
    pub tracked: usize,
    pub avg_pnl: Option<f64>,
    pub avg_roi_pct: Option<f64>,
}

pub fn ownership_correlation(store: &Store, days: i64) -> Vec<(Ownership, OwnershipStats)> {
    let risks = fetch_risks(store, days);
    [Ownership::Mine, Ownership::Influenced, Ownership::Performed]
        .into_iter()
        .map(|bucket| {
            let mut stats = OwnershipStats::default();
            let mut pnl_sum = 0.0;
            let mut roi_sum = 0.0;
            for (_, risk) in risks.iter().filter(|(_, r)| r.ownership == Some(bucket)) {
                stats.tracked += 1;
                if risk.entry_cost <= 0.0 {
                    continue;
                }
                if let (Some(pnl), Some(roi)) = (risk.pnl(), risk.roi_pct()) {
                    stats.count += 1;
                    pnl_sum += pnl;
                    roi_sum += roi;
                }
            }
            if stats.count > 0 {
                stats.avg_pnl = Some(pnl_sum / stats.count as f64);
                stats.avg_roi_pct = Some(roi_sum / stats.count as f64);
            }
            (bucket, stats)
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct FieldUsage {
    pub name: &'static str,
    pub count: usize,
    pub pct: f64,
}

#[derive(Debug, Clone, Default)]
pub struct FieldUsageReport {
    pub total_risks: usize,
    pub fields: Vec<FieldUsage>,
}

impl FieldUsageReport {
    pub fn unused(&self) -> Vec<&FieldUsage> {
        self.fields
            .iter()
            .filter(|f| f.pct < UNUSED_THRESHOLD)
            .collect()
    }

    pub fn popular(&self) -> Vec<&FieldUsage> {
        self.fields
            .iter()
            .filter(|f| f.pct >= POPULAR_THRESHOLD)
            .collect()
    }
}

/// Fill rate per soft field, recomputed from scratch on every call.
pub fn field_usage(store: &Store, days: i64) -> FieldUsageReport {
    let risks = fetch_risks(store, days);
    let total = risks.len();
    let mut report = FieldUsageReport {
        total_risks: total,
        ..Default::default()
    };
    for name in SOFT_FIELDS {
        let count = risks.iter().filter(|(_, r)| r.field_is_set(name)).count();
        let pct = if total > 0 {
            count as f64 / total as f64
        } else {
            0.0
        };
        report.fields.push(FieldUsage { name, count, pct });
    }
    report
        .fields
        .sort_by(|a, b| b.count.cmp(&a.count).then(a.name.cmp(b.name)));
    report
}

#[derive(Debug, Clone)]
pub struct ReviewPrompt {
    pub entry_id: Option<i64>,
    pub prompt: String,
}

/// Questions worth asking about open positions and recent exits. Recency is
/// judged from the newest history record, falling back to the entry itself.
pub fn review_prompts(store: &Store) -> Vec<ReviewPrompt> {
    let risks = fetch_risks(store, DEFAULT_WINDOW_DAYS);
    let now = Utc::now();
    let mut prompts = Vec::new();

    for (entry, risk) in &risks {
        if risk.status == RiskStatus::Open {
            let mut prompt = format!(
                "Still open: {} ({} {}). Has anything changed?",
                entry.notes, risk.entry_cost, risk.currency
            );
            if risk.current_expected_value.is_none() {
                prompt.push_str(" No expected value recorded yet.");
            }
            if risk.exit_strategy.is_none() {
                prompt.push_str(" What is the exit plan?");
            }
            prompts.push(ReviewPrompt {
                entry_id: entry.id,
                prompt,
            });
        } else {
            let last_touched = risk
                .reward_history
                .last()
                .map(|r| r.timestamp)
                .unwrap_or(entry.timestamp);
            if (now - last_touched).num_days() < 7 {
                let outcome = match risk.pnl() {
                    Some(pnl) if pnl >= 0.0 => format!("made {pnl:.2}"),
                    Some(pnl) => format!("lost {:.2}", -pnl),
                    None => "closed without a recorded outcome".to_string(),
                };
                prompts.push(ReviewPrompt {
                    entry_id: entry.id,
                    prompt: format!(
                        "Recently {}: {} ({}). What would you repeat, what would you avoid?",
                        risk.status.as_str(),
                        entry.notes,
                        outcome
                    ),
                });
            }
        }
    }
    prompts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Payload, RiskType};

    fn store_with(risks: Vec<RiskEntry>) -> Store {
        let store = Store::open_in_memory().unwrap();
        let base = Utc::now() - Duration::days(5);
        for (i, risk) in risks.into_iter().enumerate() {
            let mut entry = Entry::new(EntryType::Risk, format!("risk {i}"));
            entry.timestamp = base + Duration::hours(i as i64);
            entry.payload = Payload::Risk(Box::new(risk));
            store.add_entry(&entry).unwrap();
        }
        store
    }

    fn aligned_risk(aligned: Option<bool>) -> RiskEntry {
        let mut risk = RiskEntry::new(RiskType::Trade, 100.0);
        risk.aligned_with_self = aligned;
        risk
    }

    #[test]
    fn misalignment_rate_uses_all_entries_as_denominator() {
        let mut risks = Vec::new();
        for _ in 0..3 {
            risks.push(aligned_risk(Some(false)));
        }
        for _ in 0..7 {
            risks.push(aligned_risk(Some(true)));
        }
        let store = store_with(risks);

        let report = misalignment(&store, DEFAULT_WINDOW_DAYS);
        assert_eq!(report.total, 10);
        assert_eq!(report.misaligned, 3);
        assert_eq!(report.aligned, 7);
        assert!((report.misalignment_rate - 0.3).abs() < 1e-9);
        assert_eq!(report.top_misaligned.len(), 3);
    }

    #[test]
    fn unanswered_alignment_dilutes_the_rate() {
        let store = store_with(vec![
            aligned_risk(Some(false)),
            aligned_risk(None),
            aligned_risk(None),
            aligned_risk(None),
        ]);
        let report = misalignment(&store, DEFAULT_WINDOW_DAYS);
        assert_eq!(report.total, 4);
        assert!((report.misalignment_rate - 0.25).abs() < 1e-9);
    }

    #[test]
    fn misalignment_breakdowns_cover_only_misaligned() {
        let mut bad = aligned_risk(Some(false));
        bad.ownership = Some(Ownership::Influenced);
        bad.voices_present = vec!["discord".to_string(), "twitter".to_string()];
        bad.motivation_type = Some("fomo".to_string());
        bad.motivation_internal = Some(false);
        let mut flag_only = aligned_risk(Some(false));
        flag_only.motivation_internal = Some(false);
        let mut good = aligned_risk(Some(true));
        good.ownership = Some(Ownership::Mine);
        let store = store_with(vec![bad, flag_only, good]);

        let report = misalignment(&store, DEFAULT_WINDOW_DAYS);
        assert_eq!(report.ownership_breakdown.get("influenced"), Some(&1));
        assert_eq!(report.ownership_breakdown.get("mine"), None);
        assert_eq!(report.voices_breakdown.len(), 2);
        // A named motivation wins; the flag only fills in when no name exists.
        assert_eq!(report.motivation_breakdown.get("fomo"), Some(&1));
        assert_eq!(report.motivation_breakdown.get("external"), Some(&1));
    }

    #[test]
    fn drift_counts_runs_and_corrections() {
        let pattern = [
            Some(true),
            Some(false),
            Some(false),
            Some(true),
            Some(false),
            Some(true),
        ];
        let store = store_with(pattern.into_iter().map(aligned_risk).collect());

        let report = drift(&store, DEFAULT_WINDOW_DAYS);
        assert_eq!(report.sequences, 2);
        assert_eq!(report.corrections, 2);
        assert_eq!(report.longest_run, 2);
        assert!(!report.currently_drifting);
        assert_eq!(report.recent_corrections[0].run_length, 2);
        assert_eq!(report.recent_corrections[1].run_length, 1);
    }

    #[test]
    fn correction_reports_days_since_the_run_began() {
        let store = Store::open_in_memory().unwrap();
        let base = Utc::now() - Duration::days(20);
        // Misaligned on day 0 and day 3, corrected on day 5.
        for (day, aligned) in [(0, false), (3, false), (5, true)] {
            let mut entry = Entry::new(EntryType::Risk, format!("day {day}"));
            entry.timestamp = base + Duration::days(day);
            entry.payload = Payload::Risk(Box::new(aligned_risk(Some(aligned))));
            store.add_entry(&entry).unwrap();
        }

        let report = drift(&store, DEFAULT_WINDOW_DAYS);
        assert_eq!(report.corrections, 1);
        assert_eq!(report.recent_corrections[0].run_length, 2);
        assert_eq!(report.recent_corrections[0].run_days, 5);
    }

    #[test]
    fn trailing_run_is_a_sequence_without_correction() {
        let store = store_with(vec![
            aligned_risk(Some(true)),
            aligned_risk(Some(false)),
            aligned_risk(Some(false)),
            aligned_risk(Some(false)),
        ]);
        let report = drift(&store, DEFAULT_WINDOW_DAYS);
        assert_eq!(report.sequences, 1);
        assert_eq!(report.corrections, 0);
        assert_eq!(report.longest_run, 3);
        assert!(report.currently_drifting);
    }

    #[test]
    fn ownership_averages_only_realized_entries() {
        let mut winner = RiskEntry::new(RiskType::Trade, 100.0);
        winner.ownership = Some(Ownership::Mine);
        winner.realized_value = Some(150.0);
        let mut loser = RiskEntry::new(RiskType::Trade, 100.0);
        loser.ownership = Some(Ownership::Mine);
        loser.realized_value = Some(50.0);
        let mut open = RiskEntry::new(RiskType::Trade, 100.0);
        open.ownership = Some(Ownership::Mine);
        let store = store_with(vec![winner, loser, open]);

        let stats = ownership_correlation(&store, DEFAULT_WINDOW_DAYS);
        let (_, mine) = stats
            .iter()
            .find(|(o, _)| *o == Ownership::Mine)
            .copied()
            .unwrap();
        assert_eq!(mine.tracked, 3);
        assert_eq!(mine.count, 2);
        assert!((mine.avg_pnl.unwrap() - 0.0).abs() < 1e-9);
        assert!((mine.avg_roi_pct.unwrap() - 0.0).abs() < 1e-9);

        let (_, influenced) = stats
            .iter()
            .find(|(o, _)| *o == Ownership::Influenced)
            .copied()
            .unwrap();
        assert_eq!(influenced.tracked, 0);
        assert_eq!(influenced.count, 0);
        assert_eq!(influenced.avg_pnl, None);
    }

    #[test]
    fn field_usage_thresholds() {
        let mut risks = Vec::new();
        for i in 0..10 {
            let mut risk = RiskEntry::new(RiskType::SportsBet, 50.0);
            // trust_level on 3 of 10 entries, my_probability on 1 of 10.
            if i < 3 {
                risk.trust_level = Some(0.5);
            }
            if i == 0 {
                risk.my_probability = Some(0.4);
            }
            risks.push(risk);
        }
        let store = store_with(risks);

        let report = field_usage(&store, DEFAULT_WINDOW_DAYS);
        assert_eq!(report.total_risks, 10);
        let trust = report.fields.iter().find(|f| f.name == "trust_level").unwrap();
        assert_eq!(trust.count, 3);
        assert!(report.popular().iter().any(|f| f.name == "trust_level"));
        assert!(report.unused().iter().all(|f| f.name != "trust_level"));
        // Exactly 10% sits on the boundary: not unused, not popular.
        assert!(report.unused().iter().all(|f| f.name != "my_probability"));
        assert!(report.popular().iter().all(|f| f.name != "my_probability"));
        assert!(report.unused().iter().any(|f| f.name == "gut_feeling"));
    }

    #[test]
    fn empty_window_yields_neutral_reports() {
        let store = Store::open_in_memory().unwrap();
        let report = misalignment(&store, DEFAULT_WINDOW_DAYS);
        assert_eq!(report.total, 0);
        assert_eq!(report.misalignment_rate, 0.0);
        let report = drift(&store, DEFAULT_WINDOW_DAYS);
        assert_eq!(report.sequences, 0);
        let report = field_usage(&store, DEFAULT_WINDOW_DAYS);
        assert_eq!(report.total_risks, 0);
        assert!(report.popular().is_empty());
        assert!(review_prompts(&store).is_empty());
    }

    #[test]
    fn review_prompts_cover_open_and_recent_exits() {
        let mut open = RiskEntry::new(RiskType::Nft, 6.3);
        open.status = RiskStatus::Open;
        let mut realized = RiskEntry::new(RiskType::Trade, 100.0);
        realized.status = RiskStatus::Realized;
        realized.realized_value = Some(140.0);
        let store = store_with(vec![open, realized]);

        let prompts = review_prompts(&store);
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].prompt.contains("Still open"));
        assert!(prompts[0].prompt.contains("exit plan"));
        assert!(prompts[1].prompt.contains("made 40.00"));
    }
}
