use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum EntryType {
    Trade,
    Code,
    Alpha,
    Learning,
    Action,
    Note,
    Opportunity,
    Risk,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Trade => "trade",
            EntryType::Code => "code",
            EntryType::Alpha => "alpha",
            EntryType::Learning => "learning",
            EntryType::Action => "action",
            EntryType::Note => "note",
            EntryType::Opportunity => "opportunity",
            EntryType::Risk => "risk",
        }
    }

    pub fn parse(s: &str) -> Option<EntryType> {
        match s {
            "trade" => Some(EntryType::Trade),
            "code" => Some(EntryType::Code),
            "alpha" => Some(EntryType::Alpha),
            "learning" => Some(EntryType::Learning),
            "action" => Some(EntryType::Action),
            "note" => Some(EntryType::Note),
            "opportunity" => Some(EntryType::Opportunity),
            "risk" => Some(EntryType::Risk),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum RiskType {
    Nft,
    SportsBet,
    PredictionMarket,
    Trade,
    Crypto,
    Other,
}

impl RiskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskType::Nft => "nft",
            RiskType::SportsBet => "sports_bet",
            RiskType::PredictionMarket => "prediction_market",
            RiskType::Trade => "trade",
            RiskType::Crypto => "crypto",
            RiskType::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum RiskStatus {
    Open,
    Closed,
    Realized,
    WrittenOff,
}

impl RiskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskStatus::Open => "open",
            RiskStatus::Closed => "closed",
            RiskStatus::Realized => "realized",
            RiskStatus::WrittenOff => "written_off",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum LiquidityRating {
    High,
    Medium,
    Low,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum InformationEdge {
    Public,
    Private,
    Research,
    Insider,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum Ownership {
    Mine,
    Influenced,
    Performed,
}

impl Ownership {
    pub fn as_str(&self) -> &'static str {
        match self {
            Ownership::Mine => "mine",
            Ownership::Influenced => "influenced",
            Ownership::Performed => "performed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityCostKind {
    Perceived,
    Real,
}

impl OpportunityCostKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityCostKind::Perceived => "perceived",
            OpportunityCostKind::Real => "real",
        }
    }
}

/// One reward-history record. Appended, never edited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardUpdate {
    pub timestamp: DateTime<Utc>,
    pub expected_value: f64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub confidence_level: Option<f64>,
}

/// One opportunity-cost-history record, tagged perceived or real.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpportunityCostUpdate {
    pub timestamp: DateTime<Utc>,
    pub opportunity_cost: f64,
    #[serde(rename = "type")]
    pub kind: OpportunityCostKind,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Structured payload of a risk entry. Every nullable field is an `Option`
/// because an explicit zero and "never set" mean different things here;
/// several aggregates depend on that distinction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEntry {
    pub risk_type: RiskType,
    pub entry_cost: f64,
    #[serde(default = "default_currency")]
    pub currency: String,

    #[serde(default)]
    pub initial_expected_value: Option<f64>,
    #[serde(default)]
    pub current_expected_value: Option<f64>,
    #[serde(default)]
    pub confidence_level: Option<f64>,

    #[serde(default)]
    pub my_probability: Option<f64>,
    #[serde(default)]
    pub market_probability: Option<f64>,
    #[serde(default)]
    pub edge_pct: Option<f64>,

    #[serde(default)]
    pub opportunity_cost_perceived: Option<f64>,
    #[serde(default)]
    pub opportunity_cost_real: Option<f64>,
    #[serde(default)]
    pub opportunity_cost_notes: Option<String>,

    #[serde(default)]
    pub odds_or_price: Option<f64>,
    #[serde(default)]
    pub fair_value: Option<f64>,
    #[serde(default)]
    pub max_loss: Option<f64>,
    #[serde(default)]
    pub max_gain: Option<f64>,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub exit_strategy: Option<String>,
    #[serde(default)]
    pub liquidity_rating: Option<LiquidityRating>,
    #[serde(default)]
    pub time_to_exit: Option<String>,
    #[serde(default)]
    pub expected_timeframe: Option<String>,
    #[serde(default)]
    pub cash_out_available: Option<bool>,
    #[serde(default)]
    pub missed_cash_out_value: Option<f64>,
    #[serde(default)]
    pub why_stuck: Option<String>,

    #[serde(default)]
    pub portfolio_allocation_pct: Option<f64>,
    #[serde(default)]
    pub correlated_risks: Vec<String>,
    #[serde(default)]
    pub information_edge: Option<InformationEdge>,
    #[serde(default)]
    pub time_invested_hours: Option<f64>,

    #[serde(default)]
    pub gas_fee: Option<f64>,
    #[serde(default)]
    pub gas_fee_currency: Option<String>,

    #[serde(default)]
    pub ownership: Option<Ownership>,
    #[serde(default)]
    pub aligned_with_self: Option<bool>,
    #[serde(default)]
    pub voluntary: Option<bool>,
    #[serde(default)]
    pub voices_present: Vec<String>,
    #[serde(default)]
    pub motivation_internal: Option<bool>,
    #[serde(default)]
    pub motivation_type: Option<String>,
    #[serde(default)]
    pub trust_level: Option<f64>,

    #[serde(default)]
    pub related_trades: Vec<i64>,
    #[serde(default)]
    pub related_alpha: Vec<i64>,
    #[serde(default)]
    pub related_code: Vec<i64>,

    #[serde(default = "default_status")]
    pub status: RiskStatus,
    #[serde(default)]
    pub realized_value: Option<f64>,
    #[serde(default)]
    pub realized_value_currency: Option<String>,

    #[serde(default)]
    pub reward_history: Vec<RewardUpdate>,
    #[serde(default)]
    pub opportunity_cost_history: Vec<OpportunityCostUpdate>,

    /// Keys from older schema revisions or ad-hoc experiments survive a
    /// load/store round trip here.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_status() -> RiskStatus {
    RiskStatus::Open
}

impl RiskEntry {
    pub fn new(risk_type: RiskType, entry_cost: f64) -> Self {
        RiskEntry {
            risk_type,
            entry_cost,
            currency: default_currency(),
            initial_expected_value: None,
            current_expected_value: None,
            confidence_level: None,
            my_probability: None,
            market_probability: None,
            edge_pct: None,
            opportunity_cost_perceived: None,
            opportunity_cost_real: None,
            opportunity_cost_notes: None,
            odds_or_price: None,
            fair_value: None,
            max_loss: None,
            max_gain: None,
            risk_factors: Vec::new(),
            exit_strategy: None,
            liquidity_rating: None,
            time_to_exit: None,
            expected_timeframe: None,
            cash_out_available: None,
            missed_cash_out_value: None,
            why_stuck: None,
            portfolio_allocation_pct: None,
            correlated_risks: Vec::new(),
            information_edge: None,
            time_invested_hours: None,
            gas_fee: None,
            gas_fee_currency: None,
            ownership: None,
            aligned_with_self: None,
            voluntary: None,
            voices_present: Vec::new(),
            motivation_internal: None,
            motivation_type: None,
            trust_level: None,
            related_trades: Vec::new(),
            related_alpha: Vec::new(),
            related_code: Vec::new(),
            status: RiskStatus::Open,
            realized_value: None,
            realized_value_currency: None,
            reward_history: Vec::new(),
            opportunity_cost_history: Vec::new(),
            extra: Map::new(),
        }
    }

    /// Edge is derived, never carried forward: recompute whenever either
    /// probability changes, clear it while one side is missing.
    pub fn recompute_edge(&mut self) {
        self.edge_pct = match (self.my_probability, self.market_probability) {
            (Some(mine), Some(market)) => Some((mine - market) * 100.0),
            _ => None,
        };
    }

    pub fn pnl(&self) -> Option<f64> {
        self.realized_value.map(|v| v - self.entry_cost)
    }

    pub fn roi_pct(&self) -> Option<f64> {
        self.pnl().map(|pnl| {
            if self.entry_cost > 0.0 {
                pnl / self.entry_cost * 100.0
            } else {
                0.0
            }
        })
    }

    /// Real opportunity cost wins over perceived; an explicit zero counts.
    pub fn effective_opportunity_cost(&self) -> Option<f64> {
        self.opportunity_cost_real.or(self.opportunity_cost_perceived)
    }

    /// Whether a named soft field carries a value, for usage statistics.
    /// Unknown names fall through to the extension map.
    pub fn field_is_set(&self, name: &str) -> bool {
        match name {
            "my_probability" => self.my_probability.is_some(),
            "market_probability" => self.market_probability.is_some(),
            "trust_level" => self.trust_level.is_some(),
            "cash_out_available" => self.cash_out_available.is_some(),
            "gas_fee" => self.gas_fee.is_some(),
            "related_trades" => !self.related_trades.is_empty(),
            "related_alpha" => !self.related_alpha.is_empty(),
            "related_code" => !self.related_code.is_empty(),
            other => self.extra.get(other).map_or(false, |v| !v.is_null()),
        }
    }
}

/// Entry metadata, closed over the entry type: risk entries carry a typed
/// payload, everything else an open map.
#[derive(Debug, Clone)]
pub enum Payload {
    Risk(Box<RiskEntry>),
    Map(Map<String, Value>),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Map(Map::new())
    }
}

impl Payload {
    pub fn risk(&self) -> Option<&RiskEntry> {
        match self {
            Payload::Risk(risk) => Some(risk),
            Payload::Map(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Payload::Risk(risk) => serde_json::to_value(risk.as_ref()).unwrap_or(Value::Null),
            Payload::Map(map) => Value::Object(map.clone()),
        }
    }

    /// Lenient decode: a risk entry whose stored metadata no longer parses as
    /// a risk payload degrades to a plain map instead of failing the whole
    /// query. Read paths treat such entries as non-risk.
    pub fn decode(entry_type: EntryType, raw: &str) -> Payload {
        if entry_type == EntryType::Risk {
            if let Ok(risk) = serde_json::from_str::<RiskEntry>(raw) {
                return Payload::Risk(Box::new(risk));
            }
        }
        match serde_json::from_str::<Map<String, Value>>(raw) {
            Ok(map) => Payload::Map(map),
            Err(_) => Payload::Map(Map::new()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub id: Option<i64>,
    pub entry_type: EntryType,
    pub timestamp: DateTime<Utc>,
    pub notes: String,
    pub tags: Vec<String>,
    pub source: String,
    pub payload: Payload,
}

impl Entry {
    pub fn new(entry_type: EntryType, notes: impl Into<String>) -> Self {
        Entry {
            id: None,
            entry_type,
            timestamp: Utc::now(),
            notes: notes.into(),
            tags: Vec::new(),
            source: "manual".to_string(),
            payload: Payload::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edge_recomputed_from_probabilities() {
        let mut risk = RiskEntry::new(RiskType::SportsBet, 100.0);
        risk.my_probability = Some(0.45);
        risk.market_probability = Some(0.30);
        risk.recompute_edge();
        assert!((risk.edge_pct.unwrap() - 15.0).abs() < 1e-9);

        risk.market_probability = Some(0.40);
        risk.recompute_edge();
        assert!((risk.edge_pct.unwrap() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn edge_unset_with_one_probability() {
        let mut risk = RiskEntry::new(RiskType::SportsBet, 100.0);
        risk.my_probability = Some(0.6);
        risk.recompute_edge();
        assert!(risk.edge_pct.is_none());
    }

    #[test]
    fn roi_guards_zero_cost() {
        let mut risk = RiskEntry::new(RiskType::Trade, 100.0);
        risk.realized_value = Some(150.0);
        assert_eq!(risk.pnl(), Some(50.0));
        assert!((risk.roi_pct().unwrap() - 50.0).abs() < 1e-9);

        risk.entry_cost = 0.0;
        assert_eq!(risk.roi_pct(), Some(0.0));
    }

    #[test]
    fn explicit_zero_opportunity_cost_is_kept() {
        let mut risk = RiskEntry::new(RiskType::Nft, 10.0);
        assert_eq!(risk.effective_opportunity_cost(), None);
        risk.opportunity_cost_real = Some(0.0);
        assert_eq!(risk.effective_opportunity_cost(), Some(0.0));
    }

    #[test]
    fn extension_map_round_trips_unknown_keys() {
        let mut risk = RiskEntry::new(RiskType::Other, 5.0);
        risk.extra
            .insert("gut_feeling".to_string(), Value::String("uneasy".to_string()));
        let raw = serde_json::to_string(&risk).unwrap();
        let back: RiskEntry = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.extra.get("gut_feeling").unwrap(), "uneasy");
        assert!(back.field_is_set("gut_feeling"));
        assert!(!back.field_is_set("what_i_see"));
    }

    #[test]
    fn malformed_risk_payload_degrades_to_map() {
        let payload = Payload::decode(EntryType::Risk, r#"{"risk_type": "bogus"}"#);
        assert!(payload.risk().is_none());
    }
}
