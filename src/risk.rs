//! Risk-entry lifecycle: validated creation, append-only history tracking
//! and status transitions. Mutations are strict: every invariant is checked
//! before the single write-back, so a failed operation leaves no partial
//! state behind.

use chrono::Utc;

use crate::db::Store;
use crate::error::{Error, Result};
use crate::model::{
    Entry, EntryType, OpportunityCostKind, OpportunityCostUpdate, Payload, RewardUpdate,
    RiskEntry, RiskStatus,
};

/// Fields checked against the unit interval on create and update.
const UNIT_FIELDS: [&str; 4] = [
    "confidence_level",
    "my_probability",
    "market_probability",
    "trust_level",
];

pub fn validate(risk: &RiskEntry) -> Result<()> {
    // NaN fails a `<= 0.0` comparison, so test the positive case.
    if !risk.entry_cost.is_finite() || !(risk.entry_cost > 0.0) {
        return Err(Error::Validation(
            "entry cost must be greater than 0".to_string(),
        ));
    }
    if risk.currency.trim().is_empty() {
        return Err(Error::Validation("currency must not be empty".to_string()));
    }
    check_finite("initial_expected_value", risk.initial_expected_value)?;
    check_finite("opportunity_cost_perceived", risk.opportunity_cost_perceived)?;
    check_finite("opportunity_cost_real", risk.opportunity_cost_real)?;
    check_finite("gas_fee", risk.gas_fee)?;
    let values = [
        risk.confidence_level,
        risk.my_probability,
        risk.market_probability,
        risk.trust_level,
    ];
    for (field, value) in UNIT_FIELDS.iter().zip(values) {
        check_unit_interval(field, value)?;
    }
    Ok(())
}

fn check_unit_interval(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !(0.0..=1.0).contains(&v) => Err(Error::Validation(format!(
            "{field} must be between 0.0 and 1.0"
        ))),
        _ => Ok(()),
    }
}

/// A non-finite monetary value serializes as JSON null, which a later load
/// cannot read back into the history records. Reject it before any write.
fn check_finite(field: &str, value: Option<f64>) -> Result<()> {
    match value {
        Some(v) if !v.is_finite() => Err(Error::Validation(format!(
            "{field} must be a finite number"
        ))),
        _ => Ok(()),
    }
}

/// Validates and persists a new risk entry. The initial expected value is
/// copied into the current value and seeds the reward history; initial
/// opportunity costs seed their history streams.
pub fn create_risk_entry(
    store: &Store,
    mut risk: RiskEntry,
    notes: Option<String>,
    extra_tags: Vec<String>,
) -> Result<i64> {
    validate(&risk)?;

    let now = Utc::now();
    risk.current_expected_value = risk.initial_expected_value;
    risk.recompute_edge();

    if let Some(ev) = risk.initial_expected_value {
        risk.reward_history.push(RewardUpdate {
            timestamp: now,
            expected_value: ev,
            notes: Some("Initial expected value".to_string()),
            reason: Some("initial".to_string()),
            confidence_level: risk.confidence_level,
        });
    }
    if let Some(oc) = risk.opportunity_cost_perceived {
        risk.opportunity_cost_history.push(OpportunityCostUpdate {
            timestamp: now,
            opportunity_cost: oc,
            kind: OpportunityCostKind::Perceived,
            notes: risk
                .opportunity_cost_notes
                .clone()
                .or_else(|| Some("Initial perceived opportunity cost".to_string())),
        });
    }
    if let Some(oc) = risk.opportunity_cost_real {
        risk.opportunity_cost_history.push(OpportunityCostUpdate {
            timestamp: now,
            opportunity_cost: oc,
            kind: OpportunityCostKind::Real,
            notes: risk
                .opportunity_cost_notes
                .clone()
                .or_else(|| Some("Initial real opportunity cost".to_string())),
        });
    }

    let notes = notes.filter(|n| !n.trim().is_empty()).unwrap_or_else(|| {
        format!(
            "{}: {} {}",
            risk.risk_type.as_str(),
            risk.entry_cost,
            risk.currency
        )
    });

    let mut tags = vec![risk.risk_type.as_str().to_string(), "risk".to_string()];
    for tag in extra_tags {
        if !tags.contains(&tag) {
            tags.push(tag);
        }
    }

    let mut entry = Entry::new(EntryType::Risk, notes);
    entry.tags = tags;
    entry.payload = Payload::Risk(Box::new(risk));
    store.add_entry(&entry)
}

/// Fetches an entry and its risk payload, or fails with NotFound/WrongType.
pub fn load_risk(store: &Store, id: i64) -> Result<(Entry, RiskEntry)> {
    let entry = store.get_entry(id)?.ok_or(Error::NotFound(id))?;
    if entry.entry_type != EntryType::Risk {
        return Err(Error::WrongType(id));
    }
    // A risk entry whose metadata failed to decode is unusable for lifecycle
    // operations even though read paths tolerate it.
    let risk = entry.payload.risk().cloned().ok_or(Error::WrongType(id))?;
    Ok((entry, risk))
}

/// Outcome of a reward update. `old` is `None` only when no prior value
/// existed; a prior zero is a real prior value, so callers can tell a first
/// "set" apart from an "update".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardChange {
    pub old: Option<f64>,
    pub new: f64,
}

impl RewardChange {
    pub fn delta(&self) -> Option<f64> {
        self.old.map(|old| self.new - old)
    }

    pub fn delta_pct(&self) -> Option<f64> {
        self.old.map(|old| {
            if old > 0.0 {
                (self.new / old - 1.0) * 100.0
            } else {
                0.0
            }
        })
    }
}

pub fn update_reward(
    store: &Store,
    id: i64,
    new_value: f64,
    reason: Option<String>,
    notes: Option<String>,
    confidence: Option<f64>,
) -> Result<RewardChange> {
    check_finite("expected_value", Some(new_value))?;
    check_unit_interval("confidence_level", confidence)?;
    let (_, mut risk) = load_risk(store, id)?;

    let old = risk.current_expected_value;
    risk.current_expected_value = Some(new_value);
    risk.reward_history.push(RewardUpdate {
        timestamp: Utc::now(),
        expected_value: new_value,
        notes: notes.filter(|n| !n.is_empty()),
        reason: reason.or_else(|| Some("updated".to_string())),
        confidence_level: confidence.or(risk.confidence_level),
    });
    if let Some(c) = confidence {
        risk.confidence_level = Some(c);
    }

    store.update_entry_metadata(id, &Payload::Risk(Box::new(risk)))?;
    Ok(RewardChange { old, new: new_value })
}

/// Old/new values per opportunity-cost stream; a stream not touched by the
/// call is `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct OpportunityCostChange {
    pub perceived: Option<RewardChange>,
    pub real: Option<RewardChange>,
}

pub fn update_opportunity_cost(
    store: &Store,
    id: i64,
    perceived: Option<f64>,
    real: Option<f64>,
    notes: Option<String>,
) -> Result<OpportunityCostChange> {
    if perceived.is_none() && real.is_none() {
        return Err(Error::Validation(
            "no opportunity cost value given".to_string(),
        ));
    }
    check_finite("opportunity_cost_perceived", perceived)?;
    check_finite("opportunity_cost_real", real)?;
    let (_, mut risk) = load_risk(store, id)?;
    let now = Utc::now();
    let mut change = OpportunityCostChange::default();

    if let Some(value) = perceived {
        change.perceived = Some(RewardChange {
            old: risk.opportunity_cost_perceived,
            new: value,
        });
        risk.opportunity_cost_perceived = Some(value);
        risk.opportunity_cost_history.push(OpportunityCostUpdate {
            timestamp: now,
            opportunity_cost: value,
            kind: OpportunityCostKind::Perceived,
            notes: notes.clone().filter(|n| !n.is_empty()),
        });
    }
    if let Some(value) = real {
        change.real = Some(RewardChange {
            old: risk.opportunity_cost_real,
            new: value,
        });
        risk.opportunity_cost_real = Some(value);
        risk.opportunity_cost_history.push(OpportunityCostUpdate {
            timestamp: now,
            opportunity_cost: value,
            kind: OpportunityCostKind::Real,
            notes: notes.filter(|n| !n.is_empty()),
        });
    }

    store.update_entry_metadata(id, &Payload::Risk(Box::new(risk)))?;
    Ok(change)
}

pub fn update_probabilities(
    store: &Store,
    id: i64,
    my_probability: Option<f64>,
    market_probability: Option<f64>,
) -> Result<Option<f64>> {
    if my_probability.is_none() && market_probability.is_none() {
        return Err(Error::Validation("no probability value given".to_string()));
    }
    check_unit_interval("my_probability", my_probability)?;
    check_unit_interval("market_probability", market_probability)?;

    let (_, mut risk) = load_risk(store, id)?;
    if let Some(p) = my_probability {
        risk.my_probability = Some(p);
    }
    if let Some(p) = market_probability {
        risk.market_probability = Some(p);
    }
    risk.recompute_edge();
    let edge = risk.edge_pct;

    store.update_entry_metadata(id, &Payload::Risk(Box::new(risk)))?;
    Ok(edge)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusChange {
    pub status: RiskStatus,
    pub realized_value: Option<f64>,
    pub pnl: Option<f64>,
    pub roi_pct: Option<f64>,
}

/// Explicit status set, optionally recording the realized value. PnL and
/// ROI are derived on the spot and never stored.
pub fn set_status(
    store: &Store,
    id: i64,
    status: RiskStatus,
    realized_value: Option<f64>,
    realized_currency: Option<String>,
    notes: Option<String>,
) -> Result<StatusChange> {
    check_finite("realized_value", realized_value)?;
    let (_, mut risk) = load_risk(store, id)?;

    risk.status = status;
    if let Some(value) = realized_value {
        risk.realized_value = Some(value);
        if realized_currency.is_some() {
            risk.realized_value_currency = realized_currency;
        }
        risk.reward_history.push(RewardUpdate {
            timestamp: Utc::now(),
            expected_value: value,
            notes: notes
                .filter(|n| !n.is_empty())
                .or_else(|| Some("Realized value".to_string())),
            reason: Some("realized".to_string()),
            confidence_level: None,
        });
    }

    let change = StatusChange {
        status,
        realized_value: risk.realized_value,
        pnl: risk.pnl(),
        roi_pct: risk.roi_pct(),
    };
    store.update_entry_metadata(id, &Payload::Risk(Box::new(risk)))?;
    Ok(change)
}
