//! Token-bucket rate limiter for model tiers and external API families.
//!
//! One bucket per [`ModelTier`] and one per [`ApiFamily`]. Refill is
//! continuous: tokens accrue in proportion to elapsed time on every check.
//! All bucket state lives behind one mutex, so concurrent `acquire` calls
//! can never both spend the same token.

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::{BucketConfig, RateLimitConfig};
use crate::error::{HeraldError, Result};
use crate::routing::ModelTier;

// ============================================================================
// Bucket keys
// ============================================================================

/// External service families that share a rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiFamily {
    Calendar,
    Email,
    Drive,
    Sheets,
    Slack,
    Github,
    Search,
    CodeSandbox,
}

impl ApiFamily {
    pub fn all() -> [ApiFamily; 8] {
        [
            ApiFamily::Calendar,
            ApiFamily::Email,
            ApiFamily::Drive,
            ApiFamily::Sheets,
            ApiFamily::Slack,
            ApiFamily::Github,
            ApiFamily::Search,
            ApiFamily::CodeSandbox,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ApiFamily::Calendar => "calendar",
            ApiFamily::Email => "email",
            ApiFamily::Drive => "drive",
            ApiFamily::Sheets => "sheets",
            ApiFamily::Slack => "slack",
            ApiFamily::Github => "github",
            ApiFamily::Search => "search",
            ApiFamily::CodeSandbox => "code_sandbox",
        }
    }

    fn parse(s: &str) -> Option<ApiFamily> {
        ApiFamily::all().into_iter().find(|f| f.as_str() == s)
    }
}

/// Identifies one token bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BucketKey {
    Model(ModelTier),
    Api(ApiFamily),
}

impl BucketKey {
    /// Every bucket the limiter maintains.
    pub fn all() -> Vec<BucketKey> {
        ModelTier::all()
            .into_iter()
            .map(BucketKey::Model)
            .chain(ApiFamily::all().into_iter().map(BucketKey::Api))
            .collect()
    }

    /// Parse the config form: `model:<tier>` or `api:<family>`.
    pub fn parse(s: &str) -> Option<BucketKey> {
        let (kind, name) = s.split_once(':')?;
        match kind {
            "model" => name.parse().ok().map(BucketKey::Model),
            "api" => ApiFamily::parse(name).map(BucketKey::Api),
            _ => None,
        }
    }

    /// Built-in size and refill rate for this bucket.
    pub fn default_config(&self) -> BucketConfig {
        match self {
            BucketKey::Model(ModelTier::Fast) => BucketConfig::new(60.0, 2.0),
            BucketKey::Model(ModelTier::Default) => BucketConfig::new(40.0, 1.0),
            BucketKey::Model(ModelTier::Code) => BucketConfig::new(20.0, 0.5),
            BucketKey::Model(ModelTier::Frontier) => BucketConfig::new(10.0, 0.25),
            BucketKey::Model(ModelTier::Heavy) => BucketConfig::new(5.0, 0.1),
            BucketKey::Api(ApiFamily::Search) => BucketConfig::new(20.0, 2.0),
            BucketKey::Api(ApiFamily::CodeSandbox) => BucketConfig::new(5.0, 0.2),
            BucketKey::Api(_) => BucketConfig::new(10.0, 1.0),
        }
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BucketKey::Model(tier) => write!(f, "model:{}", tier),
            BucketKey::Api(family) => write!(f, "api:{}", family.as_str()),
        }
    }
}

/// Substring → family table, checked in order. Service names come before
/// generic verbs so `gmail_search` lands on email, not search.
const TOOL_FAMILY_TABLE: &[(&str, ApiFamily)] = &[
    ("calendar", ApiFamily::Calendar),
    ("gcal", ApiFamily::Calendar),
    ("gmail", ApiFamily::Email),
    ("outlook", ApiFamily::Email),
    ("email", ApiFamily::Email),
    ("mail", ApiFamily::Email),
    ("googlesheets", ApiFamily::Sheets),
    ("spreadsheet", ApiFamily::Sheets),
    ("sheet", ApiFamily::Sheets),
    ("googledrive", ApiFamily::Drive),
    ("gdrive", ApiFamily::Drive),
    ("drive", ApiFamily::Drive),
    ("slack", ApiFamily::Slack),
    ("github", ApiFamily::Github),
    ("sandbox", ApiFamily::CodeSandbox),
    ("code_interpreter", ApiFamily::CodeSandbox),
    ("run_code", ApiFamily::CodeSandbox),
    ("execute_code", ApiFamily::CodeSandbox),
    ("search", ApiFamily::Search),
    ("tavily", ApiFamily::Search),
    ("serp", ApiFamily::Search),
    ("web_fetch", ApiFamily::Search),
];

/// Map a tool name to the external API bucket it draws from.
///
/// Returns `None` for tools that do not touch a rate-limited service.
///
/// # Example
/// ```
/// use herald::guard::{classify_api_from_tool, ApiFamily};
///
/// assert_eq!(classify_api_from_tool("GOOGLECALENDAR_LIST_EVENTS"), Some(ApiFamily::Calendar));
/// assert_eq!(classify_api_from_tool("calendar_create_event"), Some(ApiFamily::Calendar));
/// assert_eq!(classify_api_from_tool("echo"), None);
/// ```
pub fn classify_api_from_tool(tool_name: &str) -> Option<ApiFamily> {
    let lower = tool_name.to_lowercase();
    TOOL_FAMILY_TABLE
        .iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, family)| *family)
}

// ============================================================================
// Token bucket
// ============================================================================

/// A continuously refilling token bucket.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(config: BucketConfig) -> Self {
        Self {
            capacity: config.capacity,
            refill_per_sec: config.refill_per_sec,
            tokens: config.capacity,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        if now <= self.last_refill {
            return;
        }
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take `cost` tokens, or report how long until they would be available.
    ///
    /// `Err(None)` means the request can never be satisfied (no refill, or
    /// cost above capacity).
    pub fn try_take(&mut self, cost: f64, now: Instant) -> std::result::Result<(), Option<Duration>> {
        self.refill(now);
        if self.tokens >= cost {
            self.tokens -= cost;
            return Ok(());
        }
        if cost > self.capacity || self.refill_per_sec <= 0.0 {
            return Err(None);
        }
        let deficit = cost - self.tokens;
        Err(Duration::try_from_secs_f64(deficit / self.refill_per_sec).ok())
    }

    /// Tokens currently available.
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }
}

// ============================================================================
// Rate limiter
// ============================================================================

/// Owns every token bucket. Knows nothing about workspaces or priorities.
pub struct RateLimiter {
    buckets: Mutex<HashMap<BucketKey, TokenBucket>>,
    overrides: HashMap<String, BucketConfig>,
    max_wait: Duration,
}

impl RateLimiter {
    /// Build all model and API buckets, applying config overrides.
    pub fn new(config: &RateLimitConfig) -> Self {
        let buckets = BucketKey::all()
            .into_iter()
            .map(|key| {
                let cfg = bucket_config(&config.buckets, &key);
                (key, TokenBucket::new(cfg))
            })
            .collect();
        Self {
            buckets: Mutex::new(buckets),
            overrides: config.buckets.clone(),
            max_wait: Duration::from_millis(config.max_wait_ms),
        }
    }

    /// Override the bounded wait used by [`acquire`](Self::acquire).
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Take `cost` tokens without waiting.
    pub fn try_acquire(&self, key: BucketKey, cost: f64) -> Result<()> {
        let mut buckets = self.buckets.lock().unwrap();
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| TokenBucket::new(bucket_config(&self.overrides, &key)));
        bucket
            .try_take(cost, Instant::now())
            .map_err(|wait| rate_limited(key, wait, self.max_wait))
    }

    /// Take `cost` tokens, waiting up to the configured bound.
    ///
    /// Fails with [`HeraldError::RateLimited`] as soon as it is clear the
    /// tokens will not arrive within the bound.
    pub async fn acquire(&self, key: BucketKey, cost: f64) -> Result<()> {
        let deadline = Instant::now() + self.max_wait;
        loop {
            let now = Instant::now();
            let wait = {
                let mut buckets = self.buckets.lock().unwrap();
                let bucket = buckets
                    .entry(key)
                    .or_insert_with(|| TokenBucket::new(bucket_config(&self.overrides, &key)));
                match bucket.try_take(cost, now) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            match wait {
                Some(wait) if now.checked_add(wait).is_some_and(|t| t <= deadline) => {
                    debug!(bucket = %key, wait_ms = wait.as_millis() as u64, "Waiting for token");
                    tokio::time::sleep(wait).await;
                }
                other => {
                    warn!(bucket = %key, "Rate limit exhausted");
                    return Err(rate_limited(key, other, self.max_wait));
                }
            }
        }
    }

    /// Gate a tool call on its API family bucket, if it has one.
    ///
    /// Returns the bucket that was charged.
    pub async fn acquire_for_tool(&self, tool_name: &str) -> Result<Option<BucketKey>> {
        match classify_api_from_tool(tool_name) {
            Some(family) => {
                let key = BucketKey::Api(family);
                self.acquire(key, 1.0).await?;
                Ok(Some(key))
            }
            None => Ok(None),
        }
    }

    /// Tokens currently available in a bucket.
    pub fn available(&self, key: BucketKey) -> f64 {
        let mut buckets = self.buckets.lock().unwrap();
        buckets
            .get_mut(&key)
            .map(|b| b.available(Instant::now()))
            .unwrap_or(0.0)
    }
}

fn bucket_config(overrides: &HashMap<String, BucketConfig>, key: &BucketKey) -> BucketConfig {
    overrides
        .get(&key.to_string())
        .copied()
        .unwrap_or_else(|| key.default_config())
}

fn rate_limited(key: BucketKey, wait: Option<Duration>, max_wait: Duration) -> HeraldError {
    HeraldError::RateLimited {
        bucket: key.to_string(),
        retry_after_ms: wait.unwrap_or(max_wait).as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter_with(key: &str, capacity: f64, refill: f64, max_wait_ms: u64) -> RateLimiter {
        let mut config = RateLimitConfig {
            max_wait_ms,
            ..Default::default()
        };
        config
            .buckets
            .insert(key.to_string(), BucketConfig::new(capacity, refill));
        RateLimiter::new(&config)
    }

    #[test]
    fn test_bucket_key_parse_and_display() {
        for key in BucketKey::all() {
            assert_eq!(BucketKey::parse(&key.to_string()), Some(key));
        }
        assert_eq!(BucketKey::all().len(), 13);
        assert!(BucketKey::parse("api:fax").is_none());
        assert!(BucketKey::parse("calendar").is_none());
    }

    #[test]
    fn test_calendar_tools_share_one_bucket() {
        let names = [
            "calendar_list_events",
            "GOOGLECALENDAR_CREATE_EVENT",
            "gcal_delete_event",
        ];
        for name in names {
            assert_eq!(classify_api_from_tool(name), Some(ApiFamily::Calendar));
        }
    }

    #[test]
    fn test_service_wins_over_generic_verb() {
        assert_eq!(classify_api_from_tool("gmail_search"), Some(ApiFamily::Email));
        assert_eq!(
            classify_api_from_tool("github_search_code"),
            Some(ApiFamily::Github)
        );
        assert_eq!(classify_api_from_tool("web_search"), Some(ApiFamily::Search));
        assert_eq!(
            classify_api_from_tool("sandbox_run_python"),
            Some(ApiFamily::CodeSandbox)
        );
        assert_eq!(classify_api_from_tool("echo"), None);
    }

    #[test]
    fn test_token_bucket_refills_continuously() {
        let mut bucket = TokenBucket::new(BucketConfig::new(2.0, 10.0));
        let start = Instant::now();
        assert!(bucket.try_take(2.0, start).is_ok());
        let wait = bucket.try_take(1.0, start).unwrap_err().unwrap();
        assert!(wait <= Duration::from_millis(100));
        assert!(bucket
            .try_take(1.0, start + Duration::from_millis(150))
            .is_ok());
    }

    #[test]
    fn test_token_bucket_impossible_cost() {
        let mut bucket = TokenBucket::new(BucketConfig::new(2.0, 1.0));
        assert_eq!(bucket.try_take(3.0, Instant::now()), Err(None));
    }

    #[tokio::test]
    async fn test_capacity_three_no_refill_admits_exactly_three() {
        let limiter = Arc::new(limiter_with("api:calendar", 3.0, 0.0, 50));
        let key = BucketKey::Api(ApiFamily::Calendar);

        let mut handles = Vec::new();
        for _ in 0..4 {
            let limiter = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { limiter.acquire(key, 1.0).await }));
        }

        let mut ok = 0;
        let mut limited = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(()) => ok += 1,
                Err(HeraldError::RateLimited { bucket, .. }) => {
                    assert_eq!(bucket, "api:calendar");
                    limited += 1;
                }
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert_eq!(ok, 3);
        assert_eq!(limited, 1);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_refill_within_bound() {
        let limiter = limiter_with("model:code", 1.0, 20.0, 1_000);
        let key = BucketKey::Model(ModelTier::Code);
        limiter.acquire(key, 1.0).await.unwrap();

        let start = Instant::now();
        limiter.acquire(key, 1.0).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_acquire_fails_fast_when_refill_exceeds_bound() {
        let limiter = limiter_with("model:frontier", 1.0, 1.0, 100);
        let key = BucketKey::Model(ModelTier::Frontier);
        limiter.acquire(key, 1.0).await.unwrap();

        let start = Instant::now();
        let err = limiter.acquire(key, 1.0).await.unwrap_err();
        assert!(start.elapsed() < Duration::from_millis(100));
        match err {
            HeraldError::RateLimited { retry_after_ms, .. } => assert!(retry_after_ms > 500),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_acquire_for_tool_charges_family_bucket() {
        let limiter = limiter_with("api:email", 2.0, 0.0, 10);
        let charged = limiter.acquire_for_tool("gmail_send_email").await.unwrap();
        assert_eq!(charged, Some(BucketKey::Api(ApiFamily::Email)));
        assert!((limiter.available(BucketKey::Api(ApiFamily::Email)) - 1.0).abs() < 1e-6);

        assert_eq!(limiter.acquire_for_tool("echo").await.unwrap(), None);
    }

    #[test]
    fn test_try_acquire_does_not_wait() {
        let limiter = limiter_with("api:slack", 1.0, 0.001, 10_000);
        let key = BucketKey::Api(ApiFamily::Slack);
        assert!(limiter.try_acquire(key, 1.0).is_ok());
        assert!(matches!(
            limiter.try_acquire(key, 1.0),
            Err(HeraldError::RateLimited { .. })
        ));
    }
}
