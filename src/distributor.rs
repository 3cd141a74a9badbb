// Admission-controlled distributor
// First-N giveaway rounds: admits at most N claimants, pays each through the
// cross-chain router and hands the slot back when a payment fails
//
// Numan Thabit 2025 Nov

use crate::config::NetworkId;
use crate::errors::RouteError;
use crate::identity::{extract_tag, IdentityResolver};
use crate::metrics::CLAIMS;
use crate::router::outcome::{ExecutionOutcome, FailureKind, TransferRequest};
use crate::router::CrossChainRouter;
use crate::units::to_units;
use alloy_primitives::Address;
use futures::{Stream, StreamExt};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RoundConfig {
    pub capacity: usize,
    pub per_claim_amount: Decimal,
    pub network: NetworkId,
    pub duration: Duration,
    /// Paying account
    pub host: Address,
    /// Prefix of every per-claim idempotency token
    pub round_token: String,
    pub retry_failed_claimants: bool,
}

/// One externally submitted claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub claimant: String,
    pub tag: Option<String>,
}

impl Claim {
    pub fn new(claimant: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            claimant: claimant.into(),
            tag: Some(tag.into()),
        }
    }

    /// Claim whose recipient tag is pulled out of a free-text message.
    pub fn from_text(claimant: impl Into<String>, text: &str) -> Self {
        Self {
            claimant: claimant.into(),
            tag: extract_tag(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundEnd {
    CapacityReached,
    FundsExhausted,
    AuthorizationMissing,
    Timeout,
    StreamClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    RoundClosed(RoundEnd),
    NoTag,
    UnresolvedTag(String),
    AlreadyAdmitted,
    PreviouslyFailed,
    CapacityFull,
    Invalid(String),
}

impl RejectReason {
    fn label(&self) -> &'static str {
        match self {
            RejectReason::RoundClosed(_) => "round_closed",
            RejectReason::NoTag => "no_tag",
            RejectReason::UnresolvedTag(_) => "unresolved_tag",
            RejectReason::AlreadyAdmitted => "already_admitted",
            RejectReason::PreviouslyFailed => "previously_failed",
            RejectReason::CapacityFull => "capacity_full",
            RejectReason::Invalid(_) => "invalid",
        }
    }
}

/// What happened to one admitted claim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimReport {
    pub claimant: String,
    pub recipient: Address,
    /// 1-based slot the claim held while executing
    pub slot: usize,
    pub outcome: ExecutionOutcome,
    /// Slots held after settling this claim
    pub admitted: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ClaimDecision {
    Rejected { claimant: String, reason: RejectReason },
    Processed(ClaimReport),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoundSummary {
    pub end: Option<RoundEnd>,
    pub capacity: usize,
    /// Paid claims, ordered by slot
    pub admissions: Vec<ClaimReport>,
    /// Every processed claim in settlement order, failures included
    pub history: Vec<ClaimReport>,
}

impl RoundSummary {
    pub fn winners(&self) -> Vec<&str> {
        self.admissions.iter().map(|a| a.claimant.as_str()).collect()
    }
}

/// Slot bookkeeping. Only `GiveawayRound` touches it, and only under its
/// lock.
struct AdmissionBook {
    capacity: usize,
    free_slots: BTreeSet<usize>,
    /// claimant -> slot, for claims in flight or paid
    admitted: HashMap<String, usize>,
    failed: HashSet<String>,
    paid: Vec<ClaimReport>,
    history: Vec<ClaimReport>,
    end: Option<RoundEnd>,
}

impl AdmissionBook {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            free_slots: (1..=capacity).collect(),
            admitted: HashMap::new(),
            failed: HashSet::new(),
            paid: Vec::new(),
            history: Vec::new(),
            end: None,
        }
    }

    fn screen(&self, claimant: &str, retry_failed: bool) -> Result<(), RejectReason> {
        if let Some(end) = self.end {
            return Err(RejectReason::RoundClosed(end));
        }
        if self.admitted.contains_key(claimant) {
            return Err(RejectReason::AlreadyAdmitted);
        }
        if !retry_failed && self.failed.contains(claimant) {
            return Err(RejectReason::PreviouslyFailed);
        }
        Ok(())
    }

    /// Check-and-reserve; the lowest free slot is handed out first.
    fn admit(&mut self, claimant: &str, retry_failed: bool) -> Result<usize, RejectReason> {
        self.screen(claimant, retry_failed)?;
        let slot = self
            .free_slots
            .pop_first()
            .ok_or(RejectReason::CapacityFull)?;
        self.admitted.insert(claimant.to_string(), slot);
        Ok(slot)
    }

    fn release(&mut self, claimant: &str, slot: usize) {
        self.admitted.remove(claimant);
        self.free_slots.insert(slot);
        self.failed.insert(claimant.to_string());
    }

    fn close(&mut self, end: RoundEnd) -> bool {
        if self.end.is_none() {
            self.end = Some(end);
            true
        } else {
            false
        }
    }

    fn held(&self) -> usize {
        self.admitted.len()
    }
}

/// Failure kinds that end the whole round rather than just one claim.
fn terminal_end(outcome: &ExecutionOutcome) -> Option<RoundEnd> {
    match outcome {
        ExecutionOutcome::NeedsAuthorization(_) => Some(RoundEnd::AuthorizationMissing),
        ExecutionOutcome::Failed(f) => match f.kind {
            FailureKind::InsufficientBalance | FailureKind::ContractUnderfunded => {
                Some(RoundEnd::FundsExhausted)
            }
            FailureKind::InsufficientAllowance => Some(RoundEnd::AuthorizationMissing),
            FailureKind::Reverted | FailureKind::NetworkUnreachable => None,
        },
        ExecutionOutcome::Success(_) => None,
    }
}

pub struct GiveawayRound {
    id: u64,
    config: RoundConfig,
    deadline: Instant,
    router: Arc<CrossChainRouter>,
    resolver: Arc<dyn IdentityResolver>,
    book: Mutex<AdmissionBook>,
}

impl GiveawayRound {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn config(&self) -> &RoundConfig {
        &self.config
    }

    pub async fn end(&self) -> Option<RoundEnd> {
        self.book.lock().await.end
    }

    async fn close(&self, end: RoundEnd) {
        if self.book.lock().await.close(end) {
            info!(round = self.id, end = ?end, "giveaway round closed");
        }
    }

    /// Close on timeout once the deadline has passed.
    pub async fn poll_deadline(&self) -> Option<RoundEnd> {
        if Instant::now() >= self.deadline {
            self.close(RoundEnd::Timeout).await;
        }
        self.end().await
    }

    fn reject(&self, claimant: &str, reason: RejectReason) -> ClaimDecision {
        CLAIMS.with_label_values(&[reason.label()]).inc();
        debug!(round = self.id, claimant, reason = ?reason, "claim rejected");
        ClaimDecision::Rejected {
            claimant: claimant.to_string(),
            reason,
        }
    }

    /// Screen, resolve, reserve a slot, pay, then settle the slot. Claims may
    /// arrive concurrently; the slot reservation is the serialization point.
    pub async fn on_claim(&self, claim: Claim) -> ClaimDecision {
        let claimant = claim.claimant.trim();
        if let Some(end) = self.poll_deadline().await {
            return self.reject(claimant, RejectReason::RoundClosed(end));
        }
        let Some(tag) = claim.tag.as_deref().filter(|t| !t.trim().is_empty()) else {
            return self.reject(claimant, RejectReason::NoTag);
        };
        let retry_failed = self.config.retry_failed_claimants;
        if let Err(reason) = self.book.lock().await.screen(claimant, retry_failed) {
            return self.reject(claimant, reason);
        }
        let recipient = match self.resolver.resolve_recipient(tag).await {
            Ok(address) => address,
            Err(err) => return self.reject(claimant, RejectReason::UnresolvedTag(err.to_string())),
        };
        let slot = match self.book.lock().await.admit(claimant, retry_failed) {
            Ok(slot) => slot,
            Err(reason) => return self.reject(claimant, reason),
        };
        info!(round = self.id, claimant, slot, "claim admitted");

        let outcome = match self.pay(claimant, recipient).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(round = self.id, claimant, error = %err, "claim could not be routed");
                let mut book = self.book.lock().await;
                book.admitted.remove(claimant);
                book.free_slots.insert(slot);
                drop(book);
                return self.reject(claimant, RejectReason::Invalid(err.to_string()));
            }
        };

        let mut book = self.book.lock().await;
        if outcome.is_success() {
            CLAIMS.with_label_values(&["paid"]).inc();
        } else {
            CLAIMS.with_label_values(&["failed"]).inc();
            book.release(claimant, slot);
        }
        let report = ClaimReport {
            claimant: claimant.to_string(),
            recipient,
            slot,
            outcome,
            admitted: book.held(),
            capacity: book.capacity,
        };
        if report.outcome.is_success() {
            book.paid.push(report.clone());
            if book.paid.len() == book.capacity && book.close(RoundEnd::CapacityReached) {
                info!(round = self.id, "giveaway capacity reached");
            }
        } else if let Some(end) = terminal_end(&report.outcome) {
            if book.close(end) {
                info!(round = self.id, end = ?end, "giveaway round closed");
            }
        }
        book.history.push(report.clone());
        ClaimDecision::Processed(report)
    }

    async fn pay(&self, claimant: &str, recipient: Address) -> Result<ExecutionOutcome, RouteError> {
        let req = TransferRequest::new(
            self.config.host,
            recipient,
            self.config.per_claim_amount,
            claim_token(&self.config.round_token, claimant),
            self.config.network.clone(),
        )?;
        self.router.route_and_execute(&req).await
    }

    /// Feed claims one at a time until the round closes, the deadline
    /// passes or the stream ends. A claim already executing when the
    /// deadline passes is allowed to finish.
    pub async fn run<S>(&self, claims: S) -> RoundSummary
    where
        S: Stream<Item = Claim>,
    {
        let claims = claims.fuse();
        tokio::pin!(claims);
        let deadline = tokio::time::sleep_until(self.deadline);
        tokio::pin!(deadline);
        while self.end().await.is_none() {
            tokio::select! {
                _ = &mut deadline => self.close(RoundEnd::Timeout).await,
                next = claims.next() => match next {
                    Some(claim) => {
                        self.on_claim(claim).await;
                    }
                    None => self.close(RoundEnd::StreamClosed).await,
                },
            }
        }
        self.summary().await
    }

    pub async fn summary(&self) -> RoundSummary {
        let book = self.book.lock().await;
        let mut admissions = book.paid.clone();
        admissions.sort_by_key(|a| a.slot);
        RoundSummary {
            end: book.end,
            capacity: book.capacity,
            admissions,
            history: book.history.clone(),
        }
    }
}

pub fn claim_token(round_token: &str, claimant: &str) -> String {
    format!("{round_token}:{claimant}")
}

/// Starts rounds and keeps them addressable by id.
pub struct Distributor {
    router: Arc<CrossChainRouter>,
    resolver: Arc<dyn IdentityResolver>,
    rounds: RwLock<HashMap<u64, Arc<GiveawayRound>>>,
    next_id: AtomicU64,
}

impl Distributor {
    pub fn new(router: Arc<CrossChainRouter>, resolver: Arc<dyn IdentityResolver>) -> Self {
        Self {
            router,
            resolver,
            rounds: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn resolver(&self) -> &Arc<dyn IdentityResolver> {
        &self.resolver
    }

    pub async fn start(&self, config: RoundConfig) -> Result<Arc<GiveawayRound>, RouteError> {
        if config.capacity == 0 {
            return Err(RouteError::InvalidRound("capacity must be at least 1".into()));
        }
        if config.per_claim_amount <= Decimal::ZERO {
            return Err(RouteError::InvalidAmount(format!(
                "per-claim amount must be positive, got {}",
                config.per_claim_amount
            )));
        }
        if config.round_token.trim().is_empty() {
            return Err(RouteError::MissingToken);
        }
        let network = self
            .router
            .registry()
            .config(config.network.as_str())
            .ok_or_else(|| RouteError::UnknownNetwork(config.network.to_string()))?;
        to_units(config.per_claim_amount, network.decimals)
            .map_err(|e| RouteError::InvalidAmount(e.to_string()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let round = Arc::new(GiveawayRound {
            id,
            deadline: Instant::now() + config.duration,
            book: Mutex::new(AdmissionBook::new(config.capacity)),
            router: Arc::clone(&self.router),
            resolver: Arc::clone(&self.resolver),
            config,
        });
        info!(
            round = id,
            capacity = round.config.capacity,
            amount = %round.config.per_claim_amount,
            network = %round.config.network,
            duration_secs = round.config.duration.as_secs(),
            "giveaway round started"
        );
        self.rounds.write().await.insert(id, Arc::clone(&round));
        Ok(round)
    }

    pub async fn round(&self, id: u64) -> Option<Arc<GiveawayRound>> {
        self.rounds.read().await.get(&id).cloned()
    }
}
