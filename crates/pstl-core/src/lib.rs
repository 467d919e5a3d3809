//! Core domain model and annotation heuristics for PSTL.
//!
//! Everything downstream (fetchers, cache, web) trades in [`Opportunity`]
//! records built from a [`LeadDraft`] via [`LeadDraft::annotate`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

pub const CRATE_NAME: &str = "pstl-core";

/// Ordinal urgency label derived from deadline proximity and budget size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tier {
    #[serde(rename = "Tier 1 - Urgent")]
    Urgent,
    #[serde(rename = "Tier 2 - High Priority")]
    HighPriority,
    #[serde(rename = "Tier 3 - Standard")]
    Standard,
}

impl Tier {
    /// Urgency derivation: a near deadline or a large budget promotes the lead.
    /// An unknown deadline contributes no urgency on its own.
    pub fn derive(deadline: &Deadline, budget: &BudgetRange, today: NaiveDate) -> Self {
        let days = deadline.days_until(today);
        let max_budget = budget.max.unwrap_or(0.0);
        if matches!(days, Some(d) if d <= 45) || max_budget >= 10_000_000.0 {
            Tier::Urgent
        } else if matches!(days, Some(d) if d <= 90) || max_budget >= 5_000_000.0 {
            Tier::HighPriority
        } else {
            Tier::Standard
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Tier::Urgent => "Tier 1 - Urgent",
            Tier::HighPriority => "Tier 2 - High Priority",
            Tier::Standard => "Tier 3 - Standard",
        }
    }

    /// Loose matching for the `tier` query parameter: accepts "1", "tier 2",
    /// "urgent", "high priority", "standard", in any case.
    pub fn matches_filter(&self, raw: &str) -> bool {
        let needle = raw.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return true;
        }
        self.label().to_ascii_lowercase().contains(&needle)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Workflow state of a lead. New records always start as `New`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadStatus {
    #[serde(rename = "New")]
    New,
    #[serde(rename = "Contacted")]
    Contacted,
    #[serde(rename = "Proposal Submitted")]
    ProposalSubmitted,
    #[serde(rename = "Won")]
    Won,
    #[serde(rename = "Lost")]
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingCategory {
    #[serde(rename = "Digital Skills Training")]
    DigitalSkills,
    #[serde(rename = "Leadership Development")]
    Leadership,
    #[serde(rename = "Compliance Training")]
    Compliance,
    #[serde(rename = "DEI Training")]
    Dei,
    #[serde(rename = "Sustainability Training")]
    Sustainability,
    #[serde(rename = "Indigenous Capacity Building")]
    IndigenousCapacity,
    #[serde(rename = "Professional Development")]
    ProfessionalDevelopment,
}

impl TrainingCategory {
    /// Keyword-bucket classification over title + description. First match
    /// wins; dedicated funding streams (digital, Indigenous) are checked
    /// before the generic buckets.
    pub fn classify(title: &str, description: &str) -> Self {
        let text = format!("{} {}", title, description).to_ascii_lowercase();
        if contains_any(&text, &["digital", "technology", "cyber", "cloud"]) || has_word(&text, "ai")
        {
            TrainingCategory::DigitalSkills
        } else if text.contains("indigenous") || text.contains("first nations") {
            TrainingCategory::IndigenousCapacity
        } else if contains_any(&text, &["leadership", "management", "governance"]) {
            TrainingCategory::Leadership
        } else if contains_any(&text, &["compliance", "mandatory", "aoda", "accessibility"]) {
            TrainingCategory::Compliance
        } else if contains_any(&text, &["diversity", "inclusion", "equity"]) {
            TrainingCategory::Dei
        } else if contains_any(&text, &["climate", "sustainability", "net-zero"]) {
            TrainingCategory::Sustainability
        } else {
            TrainingCategory::ProfessionalDevelopment
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TrainingCategory::DigitalSkills => "Digital Skills Training",
            TrainingCategory::Leadership => "Leadership Development",
            TrainingCategory::Compliance => "Compliance Training",
            TrainingCategory::Dei => "DEI Training",
            TrainingCategory::Sustainability => "Sustainability Training",
            TrainingCategory::IndigenousCapacity => "Indigenous Capacity Building",
            TrainingCategory::ProfessionalDevelopment => "Professional Development",
        }
    }
}

impl fmt::Display for TrainingCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrgLevel {
    Federal,
    Provincial,
    Municipal,
    Other,
}

const PROVINCES: &[&str] = &[
    "ontario",
    "british columbia",
    "alberta",
    "quebec",
    "manitoba",
    "saskatchewan",
    "nova scotia",
    "new brunswick",
    "newfoundland",
    "prince edward island",
];

impl OrgLevel {
    pub fn classify(organization: &str) -> Self {
        let org = organization.to_ascii_lowercase();
        if org.contains("city") || org.contains("municipal") || org.contains("town of") {
            OrgLevel::Municipal
        } else if PROVINCES.iter().any(|p| org.contains(p)) {
            OrgLevel::Provincial
        } else if org.contains("canada") || org.contains("federal") || org.contains("treasury board")
        {
            OrgLevel::Federal
        } else {
            OrgLevel::Other
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OrgLevel::Federal => "Federal",
            OrgLevel::Provincial => "Provincial",
            OrgLevel::Municipal => "Municipal",
            OrgLevel::Other => "Other",
        }
    }
}

impl fmt::Display for OrgLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical deadline with an explicit unknown sentinel. Serializes as an
/// ISO date string or JSON null; malformed input deserializes to `Unknown`
/// rather than failing the whole record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    Date(NaiveDate),
    Unknown,
}

impl Deadline {
    /// Parse a deadline from free text: either the whole string is an ISO
    /// date, or the first `YYYY-MM-DD` substring found anywhere in it.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Deadline::Date(date);
        }
        match extract_iso_date(trimmed) {
            Some(date) => Deadline::Date(date),
            None => Deadline::Unknown,
        }
    }

    pub fn days_until(&self, today: NaiveDate) -> Option<i64> {
        match self {
            Deadline::Date(date) => Some((*date - today).num_days()),
            Deadline::Unknown => None,
        }
    }

    pub fn as_iso(&self) -> Option<String> {
        match self {
            Deadline::Date(date) => Some(date.format("%Y-%m-%d").to_string()),
            Deadline::Unknown => None,
        }
    }
}

impl Serialize for Deadline {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_iso() {
            Some(text) => serializer.serialize_some(&text),
            None => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for Deadline {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Option::<String>::deserialize(deserializer)?;
        Ok(match raw {
            Some(text) => Deadline::parse(&text),
            None => Deadline::Unknown,
        })
    }
}

/// Scan for the first `YYYY-MM-DD` window in arbitrary text. Listing pages
/// bury closing dates mid-sentence ("closing 2026-03-15 at 2pm EST").
pub fn extract_iso_date(text: &str) -> Option<NaiveDate> {
    let bytes = text.as_bytes();
    if bytes.len() < 10 {
        return None;
    }
    for start in 0..=(bytes.len() - 10) {
        let window = &bytes[start..start + 10];
        let shape_ok = window.iter().enumerate().all(|(i, b)| match i {
            4 | 7 => *b == b'-',
            _ => b.is_ascii_digit(),
        });
        if !shape_ok {
            continue;
        }
        // Window is pure ASCII, so the str slice is valid.
        if let Ok(candidate) = std::str::from_utf8(window) {
            if let Ok(date) = NaiveDate::parse_from_str(candidate, "%Y-%m-%d") {
                return Some(date);
            }
        }
    }
    None
}

/// Structured budget range in dollars. Upstream budgets arrive as free text
/// ("$15M - $20M", "Up to $1M", "$500K"); both bounds stay `None` when
/// nothing parseable is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetRange {
    pub currency: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl BudgetRange {
    pub fn unknown() -> Self {
        Self {
            currency: "CAD".to_string(),
            min: None,
            max: None,
        }
    }

    pub fn new(min: f64, max: f64) -> Self {
        Self {
            currency: "CAD".to_string(),
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn parse(text: &str) -> Self {
        let amounts = extract_dollar_amounts(text);
        let lower = text.to_ascii_lowercase();
        match amounts.as_slice() {
            [] => Self::unknown(),
            [only] if lower.contains("up to") => Self {
                currency: "CAD".to_string(),
                min: None,
                max: Some(*only),
            },
            [only] => Self::new(*only, *only),
            [first, second, ..] => Self::new(first.min(*second), first.max(*second)),
        }
    }

    fn format_amount(value: f64) -> String {
        if value >= 1_000_000.0 {
            let m = value / 1_000_000.0;
            if (m - m.round()).abs() < f64::EPSILON {
                format!("${}M", m.round() as i64)
            } else {
                format!("${:.1}M", m)
            }
        } else if value >= 1_000.0 {
            format!("${}K", (value / 1_000.0).round() as i64)
        } else {
            format!("${}", value.round() as i64)
        }
    }
}

impl fmt::Display for BudgetRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (Some(min), Some(max)) if (min - max).abs() < f64::EPSILON => {
                f.write_str(&Self::format_amount(min))
            }
            (Some(min), Some(max)) => write!(
                f,
                "{} - {}",
                Self::format_amount(min),
                Self::format_amount(max)
            ),
            (None, Some(max)) => write!(f, "Up to {}", Self::format_amount(max)),
            _ => f.write_str("unspecified"),
        }
    }
}

/// Extract `$`-anchored amounts from free text, honouring `K`/`M` suffixes
/// and comma grouping. Anchoring on the dollar sign keeps dates and notice
/// numbers in surrounding text from being read as money.
fn extract_dollar_amounts(text: &str) -> Vec<f64> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' {
            i += 1;
            continue;
        }
        i += 1;
        while i < chars.len() && chars[i] == ' ' {
            i += 1;
        }
        let mut digits = String::new();
        while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == ',' || chars[i] == '.') {
            if chars[i] != ',' {
                digits.push(chars[i]);
            }
            i += 1;
        }
        let digits = digits.trim_end_matches('.');
        let Ok(mut value) = digits.parse::<f64>() else {
            continue;
        };
        let mut j = i;
        while j < chars.len() && chars[j] == ' ' {
            j += 1;
        }
        if j < chars.len() {
            match chars[j].to_ascii_lowercase() {
                'k' => {
                    value *= 1_000.0;
                    i = j + 1;
                }
                'm' => {
                    value *= 1_000_000.0;
                    i = j + 1;
                }
                _ => {}
            }
        }
        out.push(value);
    }
    out
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Whole-word match; a plain substring test for "ai" would hit "training".
fn has_word(haystack: &str, word: &str) -> bool {
    haystack
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| token == word)
}

/// Canned sales intelligence attached to every lead. All values are
/// deterministic functions of the record itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insights {
    pub win_probability: u8,
    pub competition: String,
    pub recommended_actions: Vec<String>,
    pub key_requirements: Vec<String>,
}

pub fn win_probability(
    title: &str,
    category: TrainingCategory,
    org_level: OrgLevel,
    deadline: &Deadline,
    budget: &BudgetRange,
    today: NaiveDate,
) -> u8 {
    let mut score: i32 = 50;
    let max_budget = budget.max.unwrap_or(0.0);
    score += if max_budget >= 10_000_000.0 {
        20
    } else if max_budget >= 1_000_000.0 {
        15
    } else if max_budget >= 100_000.0 {
        10
    } else if budget.max.is_some() {
        5
    } else {
        0
    };
    match deadline.days_until(today) {
        Some(d) if d <= 45 => score += 15,
        Some(d) if d <= 90 => score += 10,
        _ => {}
    }
    score += match org_level {
        OrgLevel::Federal => 10,
        OrgLevel::Provincial => 5,
        _ => 0,
    };
    let title_lower = title.to_ascii_lowercase();
    if contains_any(
        &title_lower,
        &["digital", "technology", "cyber", "transformation"],
    ) || has_word(&title_lower, "ai")
    {
        score += 15;
    }
    if category == TrainingCategory::IndigenousCapacity {
        score += 10;
    }
    score.clamp(0, 100) as u8
}

pub fn competition_note(budget: &BudgetRange) -> String {
    let max_budget = budget.max.unwrap_or(0.0);
    if max_budget >= 10_000_000.0 {
        "High competition expected from major consulting firms. \
         Differentiation through specialized expertise is critical."
            .to_string()
    } else if max_budget >= 5_000_000.0 {
        "Medium competition from national training providers. \
         Local presence and government experience are key advantages."
            .to_string()
    } else {
        "Lower competition but price sensitivity is high. \
         Focus on value proposition and proven ROI."
            .to_string()
    }
}

pub fn recommended_actions(win_probability: u8) -> Vec<String> {
    let actions: &[&str] = if win_probability > 70 {
        &[
            "Prioritize immediately",
            "Schedule internal strategy session this week",
            "Reach out to the procurement contact",
        ]
    } else if win_probability > 50 {
        &[
            "Conduct feasibility assessment",
            "Research similar past contracts",
            "Identify potential partners or subcontractors",
        ]
    } else {
        &[
            "Monitor and set up alerts",
            "Build relationships for future opportunities",
        ]
    };
    actions.iter().map(ToString::to_string).collect()
}

pub fn key_requirements(description: &str) -> Vec<String> {
    let text = description.to_ascii_lowercase();
    let mut requirements = Vec::new();
    if text.contains("bilingual") || text.contains("french") {
        requirements.push("Bilingual delivery (English/French)".to_string());
    }
    if text.contains("accessib") || text.contains("aoda") {
        requirements.push("WCAG 2.1 AA compliance".to_string());
    }
    if text.contains("indigenous") {
        requirements.push("Indigenous cultural competency".to_string());
    }
    if text.contains("security") {
        requirements.push("Security clearance".to_string());
    }
    if text.contains("virtual") || text.contains("online") {
        requirements.push("Virtual delivery platform".to_string());
    }
    requirements.push("Proven government training experience".to_string());
    requirements
}

/// One listing record as served to clients. Built exclusively through
/// [`LeadDraft::annotate`] so derived fields can never drift from the inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: Uuid,
    pub source_id: String,
    pub organization: String,
    pub title: String,
    pub description: String,
    pub source_url: String,
    pub contact: Option<String>,
    pub category: TrainingCategory,
    pub org_level: OrgLevel,
    pub deadline: Deadline,
    pub budget: BudgetRange,
    pub tier: Tier,
    pub status: LeadStatus,
    pub date_found: NaiveDate,
    pub insights: Insights,
}

/// Pre-annotation handoff contract from fetchers.
#[derive(Debug, Clone, PartialEq)]
pub struct LeadDraft {
    pub source_id: String,
    pub organization: String,
    pub title: String,
    pub description: String,
    pub source_url: String,
    pub contact: Option<String>,
    pub deadline: Deadline,
    pub budget: BudgetRange,
}

impl LeadDraft {
    pub fn annotate(self, today: NaiveDate) -> Opportunity {
        let category = TrainingCategory::classify(&self.title, &self.description);
        let org_level = OrgLevel::classify(&self.organization);
        let tier = Tier::derive(&self.deadline, &self.budget, today);
        let probability = win_probability(
            &self.title,
            category,
            org_level,
            &self.deadline,
            &self.budget,
            today,
        );
        let insights = Insights {
            win_probability: probability,
            competition: competition_note(&self.budget),
            recommended_actions: recommended_actions(probability),
            key_requirements: key_requirements(&self.description),
        };
        Opportunity {
            id: deterministic_lead_id(&self.source_id, &self.title),
            source_id: self.source_id,
            organization: self.organization,
            title: self.title,
            description: self.description,
            source_url: self.source_url,
            contact: self.contact,
            category,
            org_level,
            deadline: self.deadline,
            budget: self.budget,
            tier,
            status: LeadStatus::New,
            date_found: today,
            insights,
        }
    }
}

/// Lowercase alphanumeric key used for ids and near-duplicate detection.
pub fn normalize_title_key(title: &str) -> String {
    title
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Stable id: the same source + title always maps to the same UUID, so
/// clients can correlate records across refreshes even though the cache
/// replaces the list wholesale.
pub fn deterministic_lead_id(source_id: &str, title: &str) -> Uuid {
    let key = format!("{}:{}", source_id, normalize_title_key(title));
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes())
}

/// Aggregates for the dashboard and `/api/stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub total_leads: usize,
    pub urgent_leads: usize,
    pub high_priority_leads: usize,
    pub standard_leads: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_org_level: BTreeMap<String, usize>,
    pub total_pipeline_value: f64,
    pub avg_win_probability: f64,
}

impl DashboardStats {
    pub fn from_leads(leads: &[Opportunity]) -> Self {
        let mut by_category = BTreeMap::new();
        let mut by_org_level = BTreeMap::new();
        let mut pipeline = 0.0;
        let mut win_total: u64 = 0;
        let mut urgent = 0;
        let mut high = 0;
        let mut standard = 0;
        for lead in leads {
            *by_category
                .entry(lead.category.label().to_string())
                .or_default() += 1;
            *by_org_level
                .entry(lead.org_level.label().to_string())
                .or_default() += 1;
            pipeline += lead.budget.max.unwrap_or(0.0);
            win_total += u64::from(lead.insights.win_probability);
            match lead.tier {
                Tier::Urgent => urgent += 1,
                Tier::HighPriority => high += 1,
                Tier::Standard => standard += 1,
            }
        }
        let avg = if leads.is_empty() {
            0.0
        } else {
            win_total as f64 / leads.len() as f64
        };
        Self {
            total_leads: leads.len(),
            urgent_leads: urgent,
            high_priority_leads: high,
            standard_leads: standard,
            by_category,
            by_org_level,
            total_pipeline_value: pipeline,
            avg_win_probability: avg,
        }
    }
}
