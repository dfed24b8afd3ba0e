// berthwatch/src/config.rs
//
// Runtime configuration, read from the environment (optionally a .env file).
//
// Everything has a default except credentials. Credentials are only checked
// by the component that needs them (`require_*`), so a missing Gemini key
// stops `ask` without stopping `monitor`. Sections load independently: a
// malformed `CHUNK_SIZE` fails `publish` and leaves `monitor` and `bot` alone.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::alerts::Criticality;
use crate::engine::decision::{DelayModel, TierCuts};
use crate::engine::dispatcher::DEFAULT_CONSOLIDATE_ABOVE;
use crate::engine::publisher::DEFAULT_CHUNK_SIZE;
use crate::engine::selector::{OrderBy, SelectionPolicy};
use crate::error::ConfigError;
use crate::records::{RiskLevel, RowSchema};

pub const DEFAULT_CAP_PER_TIER: &str = "CRITICAL=3,WARNING=3,NORMAL=3";

// ── Store ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Sheets,
    File,
}

impl std::str::FromStr for StoreBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sheets" | "google" => Ok(Self::Sheets),
            "file" | "csv"      => Ok(Self::File),
            _ => Err(ConfigError::Invalid {
                key:    "BERTHWATCH_STORE",
                value:  s.to_string(),
                reason: "expected `sheets` or `file`".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backend:        StoreBackend,
    pub spreadsheet_id: Option<String>,
    pub access_token:   Option<String>,
    pub sheet_name:     String,
    pub sheet_gid:      u32,
    pub file:           PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend:        StoreBackend::Sheets,
            spreadsheet_id: None,
            access_token:   None,
            sheet_name:     "Sheet1".into(),
            sheet_gid:      0,
            file:           PathBuf::from("berthwatch_store.csv"),
        }
    }
}

impl StoreConfig {
    pub fn require_spreadsheet_id(&self) -> Result<&str, ConfigError> {
        require(&self.spreadsheet_id, "SPREADSHEET_ID")
    }

    pub fn require_access_token(&self) -> Result<&str, ConfigError> {
        require(&self.access_token, "SHEETS_ACCESS_TOKEN")
    }
}

// ── Notifier ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    pub bot_token: Option<String>,
    pub chat_id:   Option<String>,
    pub api_base:  String,
    /// Server-side wait for getUpdates long polling.
    pub poll_secs: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            chat_id:   None,
            api_base:  crate::clients::telegram::API_BASE.into(),
            poll_secs: 25,
        }
    }
}

impl NotifierConfig {
    pub fn require_bot_token(&self) -> Result<&str, ConfigError> {
        require(&self.bot_token, "TELEGRAM_TOKEN")
    }

    pub fn require_chat_id(&self) -> Result<&str, ConfigError> {
        require(&self.chat_id, "TELEGRAM_CHAT_ID")
    }
}

// ── Assistant ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantConfig {
    pub api_key:           Option<String>,
    pub model:             String,
    pub api_base:          String,
    /// Upper bound on snapshot rows sent with each question.
    pub max_snapshot_rows: usize,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            api_key:           None,
            model:             "gemini-1.5-flash".into(),
            api_base:          crate::clients::gemini::API_BASE.into(),
            max_snapshot_rows: 200,
        }
    }
}

impl AssistantConfig {
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        require(&self.api_key, "GEMINI_API_KEY")
    }
}

// ── Monitor ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub interval_secs:      u64,
    pub initial_delay_secs: u64,
    pub criticality:        Criticality,
    pub consolidate_above:  usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs:      60,
            initial_delay_secs: 10,
            criticality:        Criticality::Level,
            consolidate_above:  DEFAULT_CONSOLIDATE_ABOVE,
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration { Duration::from_secs(self.interval_secs.max(1)) }

    pub fn initial_delay(&self) -> Duration { Duration::from_secs(self.initial_delay_secs) }
}

// ── Publish ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishConfig {
    pub chunk_size:     usize,
    pub chunk_pause_ms: u64,
    pub selection:      SelectionPolicy,
    pub schema:         RowSchema,
    pub cuts:           TierCuts,
    pub delay:          DelayModel,
}

impl Default for PublishConfig {
    fn default() -> Self {
        let mut selection = SelectionPolicy::default();
        selection.cap_per_tier = parse_tier_caps(DEFAULT_CAP_PER_TIER).ok().flatten();
        Self {
            chunk_size:     DEFAULT_CHUNK_SIZE,
            chunk_pause_ms: 0,
            selection,
            schema:         RowSchema::default(),
            cuts:           TierCuts::default(),
            delay:          DelayModel::default(),
        }
    }
}

impl PublishConfig {
    pub fn chunk_pause(&self) -> Duration { Duration::from_millis(self.chunk_pause_ms) }
}

// ── Top level ─────────────────────────────────────────────────────────────────

/// Trimmed, non-blank value of one key.
type Lookup<'a> = dyn Fn(&str) -> Option<String> + 'a;

impl StoreConfig {
    fn load(get: &Lookup<'_>) -> Result<Self, ConfigError> {
        let mut s = Self::default();
        if let Some(v) = get("BERTHWATCH_STORE") { s.backend = v.parse()?; }
        s.spreadsheet_id = get("SPREADSHEET_ID");
        s.access_token   = get("SHEETS_ACCESS_TOKEN");
        if let Some(v) = get("SHEET_NAME") { s.sheet_name = v; }
        if let Some(v) = get("SHEET_GID")  { s.sheet_gid  = number("SHEET_GID", &v)?; }
        if let Some(v) = get("STORE_FILE") { s.file       = PathBuf::from(v); }
        Ok(s)
    }
}

impl NotifierConfig {
    fn load(get: &Lookup<'_>) -> Result<Self, ConfigError> {
        let mut n = Self { bot_token: get("TELEGRAM_TOKEN"), chat_id: get("TELEGRAM_CHAT_ID"), ..Self::default() };
        if let Some(v) = get("TELEGRAM_API_BASE")  { n.api_base  = v; }
        if let Some(v) = get("TELEGRAM_POLL_SECS") { n.poll_secs = number("TELEGRAM_POLL_SECS", &v)?; }
        Ok(n)
    }
}

impl AssistantConfig {
    fn load(get: &Lookup<'_>) -> Result<Self, ConfigError> {
        let mut a = Self { api_key: get("GEMINI_API_KEY"), ..Self::default() };
        if let Some(v) = get("GEMINI_MODEL")       { a.model    = v; }
        if let Some(v) = get("GEMINI_API_BASE")    { a.api_base = v; }
        if let Some(v) = get("CHAT_SNAPSHOT_ROWS") { a.max_snapshot_rows = number("CHAT_SNAPSHOT_ROWS", &v)?; }
        Ok(a)
    }
}

impl MonitorConfig {
    fn load(get: &Lookup<'_>) -> Result<Self, ConfigError> {
        let mut m = Self::default();
        if let Some(v) = get("CRITICALITY")                { m.criticality        = v.parse()?; }
        if let Some(v) = get("MONITOR_INTERVAL_SECS")      { m.interval_secs      = number("MONITOR_INTERVAL_SECS", &v)?; }
        if let Some(v) = get("MONITOR_INITIAL_DELAY_SECS") { m.initial_delay_secs = number("MONITOR_INITIAL_DELAY_SECS", &v)?; }
        if let Some(v) = get("CONSOLIDATE_ABOVE")          { m.consolidate_above  = number("CONSOLIDATE_ABOVE", &v)?; }
        Ok(m)
    }
}

impl PublishConfig {
    fn load(get: &Lookup<'_>) -> Result<Self, ConfigError> {
        let mut p = Self::default();
        if let Some(v) = get("CHUNK_SIZE")     { p.chunk_size     = positive("CHUNK_SIZE", &v)?; }
        if let Some(v) = get("CHUNK_PAUSE_MS") { p.chunk_pause_ms = number("CHUNK_PAUSE_MS", &v)?; }
        if let Some(v) = get("ORDER_BY") {
            p.selection.order_by = v.parse::<OrderBy>()
                .map_err(|reason| invalid("ORDER_BY", &v, &reason))?;
        }
        if let Some(v) = get("CAP_TOTAL") {
            p.selection.cap_total = if is_off(&v) { None } else { Some(number("CAP_TOTAL", &v)?) };
        }
        if let Some(v) = get("CAP_PER_TIER") { p.selection.cap_per_tier = parse_tier_caps(&v)?; }
        if let Some(v) = get("TIER_ORDER")   { p.selection.tier_order   = parse_tier_order(&v)?; }
        if let Some(v) = get("INCLUDE_DELAY_COLUMN") { p.schema.include_delay = flag("INCLUDE_DELAY_COLUMN", &v)?; }
        if let Some(v) = get("CRITICAL_CUT")         { p.cuts.critical_at     = unit("CRITICAL_CUT", &v)?; }
        if let Some(v) = get("WARNING_CUT")          { p.cuts.warning_at      = unit("WARNING_CUT", &v)?; }
        if let Some(v) = get("MAX_DELAY_MINUTES")    { p.delay.max_minutes    = number("MAX_DELAY_MINUTES", &v)?; }
        if let Some(v) = get("DELAY_JITTER_MINUTES") { p.delay.jitter_minutes = number("DELAY_JITTER_MINUTES", &v)?; }
        if let Some(v) = get("DELAY_SEED")           { p.delay.seed           = Some(number("DELAY_SEED", &v)?); }
        if p.cuts.warning_at > p.cuts.critical_at {
            return Err(invalid("WARNING_CUT", &p.cuts.warning_at.to_string(), "must not exceed CRITICAL_CUT"));
        }
        Ok(p)
    }
}

pub const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

/// Each section is parsed on its own. A bad key only fails the section it
/// belongs to; components ask for the sections they need and surface that
/// error themselves.
#[derive(Debug, Clone)]
pub struct Config {
    store:             Result<StoreConfig, ConfigError>,
    notifier:          Result<NotifierConfig, ConfigError>,
    assistant:         Result<AssistantConfig, ConfigError>,
    monitor:           Result<MonitorConfig, ConfigError>,
    publish:           Result<PublishConfig, ConfigError>,
    call_timeout_secs: Result<u64, ConfigError>,
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key → value source. Unset or blank keys keep defaults;
    /// a set key that fails to parse fails its section only.
    pub fn from_lookup<F>(get: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            store:             StoreConfig::load(&get),
            notifier:          NotifierConfig::load(&get),
            assistant:         AssistantConfig::load(&get),
            monitor:           MonitorConfig::load(&get),
            publish:           PublishConfig::load(&get),
            call_timeout_secs: get("CALL_TIMEOUT_SECS")
                .map_or(Ok(DEFAULT_CALL_TIMEOUT_SECS), |v| positive("CALL_TIMEOUT_SECS", &v)),
        }
    }

    pub fn store(&self)     -> Result<&StoreConfig, ConfigError>     { self.store.as_ref().map_err(Clone::clone) }
    pub fn notifier(&self)  -> Result<&NotifierConfig, ConfigError>  { self.notifier.as_ref().map_err(Clone::clone) }
    pub fn assistant(&self) -> Result<&AssistantConfig, ConfigError> { self.assistant.as_ref().map_err(Clone::clone) }
    pub fn monitor(&self)   -> Result<&MonitorConfig, ConfigError>   { self.monitor.as_ref().map_err(Clone::clone) }
    pub fn publish(&self)   -> Result<&PublishConfig, ConfigError>   { self.publish.as_ref().map_err(Clone::clone) }

    pub fn call_timeout(&self) -> Result<Duration, ConfigError> {
        self.call_timeout_secs.clone().map(Duration::from_secs)
    }

    /// Command-line store overrides. A store section that failed to load stays failed.
    pub fn override_store(&mut self, backend: Option<StoreBackend>, file: Option<PathBuf>) {
        let Ok(store) = self.store.as_mut() else { return };
        if let Some(b) = backend { store.backend = b; }
        if let Some(f) = file    { store.file    = f; }
    }

    /// Sections that failed to load, for a startup warning.
    pub fn section_errors(&self) -> Vec<(&'static str, &ConfigError)> {
        [
            ("store",     self.store.as_ref().err()),
            ("notifier",  self.notifier.as_ref().err()),
            ("assistant", self.assistant.as_ref().err()),
            ("monitor",   self.monitor.as_ref().err()),
            ("publish",   self.publish.as_ref().err()),
            ("general",   self.call_timeout_secs.as_ref().err()),
        ]
        .into_iter()
        .filter_map(|(name, e)| e.map(|e| (name, e)))
        .collect()
    }
}

// ── Parsing helpers ───────────────────────────────────────────────────────────

fn require<'a>(v: &'a Option<String>, key: &'static str) -> Result<&'a str, ConfigError> {
    v.as_deref().filter(|s| !s.trim().is_empty()).ok_or(ConfigError::Missing(key))
}

fn invalid(key: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { key, value: value.to_string(), reason: reason.to_string() }
}

fn number<T: std::str::FromStr>(key: &'static str, v: &str) -> Result<T, ConfigError> {
    v.parse().map_err(|_| invalid(key, v, "not a non-negative integer"))
}

fn positive<T>(key: &'static str, v: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match v.parse::<T>() {
        Ok(n) if n > T::default() => Ok(n),
        _ => Err(invalid(key, v, "must be a positive integer")),
    }
}

fn unit(key: &'static str, v: &str) -> Result<f64, ConfigError> {
    match v.parse::<f64>() {
        Ok(x) if (0.0..=1.0).contains(&x) => Ok(x),
        _ => Err(invalid(key, v, "must be a number in [0, 1]")),
    }
}

fn flag(key: &'static str, v: &str) -> Result<bool, ConfigError> {
    match v.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on"  => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(key, v, "expected true or false")),
    }
}

fn is_off(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "none" | "off" | "unlimited")
}

/// `CRITICAL=3,WARNING=3,NORMAL=3`. `none`/`off` selects global top-N.
pub fn parse_tier_caps(v: &str) -> Result<Option<BTreeMap<RiskLevel, usize>>, ConfigError> {
    if is_off(v.trim()) { return Ok(None); }
    let mut caps = BTreeMap::new();
    for part in v.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (tier, cap) = part.split_once('=')
            .ok_or_else(|| invalid("CAP_PER_TIER", v, "expected TIER=N pairs"))?;
        let tier = RiskLevel::parse(tier)
            .ok_or_else(|| invalid("CAP_PER_TIER", v, "unknown tier (use CRITICAL, WARNING, NORMAL)"))?;
        let cap: usize = cap.trim().parse()
            .map_err(|_| invalid("CAP_PER_TIER", v, "cap is not a non-negative integer"))?;
        caps.insert(tier, cap);
    }
    if caps.is_empty() { return Err(invalid("CAP_PER_TIER", v, "no tiers given")); }
    Ok(Some(caps))
}

/// `CRITICAL,WARNING,NORMAL` in any order, no repeats.
pub fn parse_tier_order(v: &str) -> Result<Vec<RiskLevel>, ConfigError> {
    let mut order = Vec::new();
    for part in v.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let tier = RiskLevel::parse(part)
            .ok_or_else(|| invalid("TIER_ORDER", v, "unknown tier"))?;
        if order.contains(&tier) { return Err(invalid("TIER_ORDER", v, "tier listed twice")); }
        order.push(tier);
    }
    Ok(order)
}
