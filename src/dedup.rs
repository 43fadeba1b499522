use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::domain::{Crossing, Snapshot, ThresholdRecord, TrackingKey};
use crate::store::{PersistenceError, ThresholdStore};

/// How an observed count is mapped onto a multiple of the step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rounding {
    /// Largest multiple not above the count. Never fires before the count is reached.
    #[default]
    Floor,
    /// Nearest multiple, halves rounding up. Can fire up to half a step early.
    Nearest,
}

impl FromStr for Rounding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "floor" => Ok(Self::Floor),
            "nearest" | "round" => Ok(Self::Nearest),
            other => Err(format!("unknown rounding mode: {other}")),
        }
    }
}

impl fmt::Display for Rounding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Floor => write!(f, "floor"),
            Self::Nearest => write!(f, "nearest"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreationRule {
    #[default]
    AtLeast,
    Above,
}

impl FromStr for CreationRule {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "at_least" | "gte" => Ok(Self::AtLeast),
            "above" | "gt" => Ok(Self::Above),
            other => Err(format!("unknown creation rule: {other}")),
        }
    }
}

impl fmt::Display for CreationRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtLeast => write!(f, "at_least"),
            Self::Above => write!(f, "above"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdPolicy {
    step: u64,
    rounding: Rounding,
    creation: CreationRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Create { multiple: u64 },
    Raise { from: u64, to: u64 },
    Skip,
}

impl ThresholdPolicy {
    pub fn new(step: u64, rounding: Rounding, creation: CreationRule) -> Option<Self> {
        (step > 0).then_some(Self {
            step,
            rounding,
            creation,
        })
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn multiple_of(&self, quantity: u64) -> u64 {
        let steps = match self.rounding {
            Rounding::Floor => quantity / self.step,
            Rounding::Nearest => quantity.saturating_add(self.step / 2) / self.step,
        };
        steps.saturating_mul(self.step)
    }

    pub fn decide(&self, quantity: u64, existing: Option<&ThresholdRecord>) -> Decision {
        let multiple = self.multiple_of(quantity);
        match existing {
            None => {
                let reached = match self.creation {
                    CreationRule::AtLeast => quantity >= self.step,
                    CreationRule::Above => quantity > self.step,
                };
                if reached && multiple > 0 {
                    Decision::Create { multiple }
                } else {
                    Decision::Skip
                }
            }
            Some(record) if multiple > record.quantity => Decision::Raise {
                from: record.quantity,
                to: multiple,
            },
            Some(_) => Decision::Skip,
        }
    }
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        Self {
            step: 50,
            rounding: Rounding::Floor,
            creation: CreationRule::AtLeast,
        }
    }
}

#[derive(Debug)]
pub struct KeyFailure {
    pub key: TrackingKey,
    pub error: PersistenceError,
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub evaluated: usize,
    pub crossings: Vec<Crossing>,
    pub failures: Vec<KeyFailure>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DedupEngine {
    policy: ThresholdPolicy,
}

impl DedupEngine {
    pub fn new(policy: ThresholdPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ThresholdPolicy {
        &self.policy
    }

    /// Evaluates every snapshot concurrently. A failure for one key never stops
    /// the others. Duplicate keys in one list race and the last write wins.
    pub async fn evaluate(
        &self,
        store: &dyn ThresholdStore,
        snapshots: &[Snapshot],
        now: DateTime<Utc>,
    ) -> DedupOutcome {
        let results = join_all(
            snapshots
                .iter()
                .map(|snapshot| self.evaluate_one(store, snapshot, now)),
        )
        .await;

        let mut outcome = DedupOutcome {
            evaluated: snapshots.len(),
            ..Default::default()
        };
        for (snapshot, result) in snapshots.iter().zip(results) {
            match result {
                Ok(Some(crossing)) => outcome.crossings.push(crossing),
                Ok(None) => {}
                Err(error) => {
                    let key = snapshot.key();
                    warn!(key = %key, error = %error, "Skipping key after store failure");
                    outcome.failures.push(KeyFailure { key, error });
                }
            }
        }
        outcome
    }

    async fn evaluate_one(
        &self,
        store: &dyn ThresholdStore,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<Option<Crossing>, PersistenceError> {
        let key = snapshot.key();
        let existing = store.get(&key).await?;

        let (multiple, previous) = match self.policy.decide(snapshot.quantity, existing.as_ref()) {
            Decision::Skip => return Ok(None),
            Decision::Create { multiple } => (multiple, None),
            Decision::Raise { from, to } => (to, Some(from)),
        };

        store.upsert_quantity(&key, multiple, now).await?;
        debug!(key = %key, quantity = snapshot.quantity, multiple, ?previous, "Recorded threshold crossing");

        Ok(Some(Crossing {
            snapshot: snapshot.clone(),
            multiple,
            previous,
        }))
    }
}
