//! The vote ledger records who voted for which photo, and is the only source of vote counts.
//!
//! Votes are keyed by `"<voter>-<photo id>"`, the format the original contest data files
//! use, so a single key lookup answers "has this voter already voted for this photo". The
//! check and the insert of [`VoteLedger::record_vote`] happen under the same lock, which
//! also covers the write to `votes.json` : two concurrent votes from the same voter for the
//! same photo can never both succeed.

use crate::{photo::PhotoId, storage::JsonFile, Error, Result};
use chrono::{DateTime, Utc};
use rocket::tokio::sync::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;


/// Stable identity of a voter, as resolved by a [`crate::identity::VoterIdentity`]
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VoterId(String);

impl VoterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Ledger key of a vote of this voter for the given photo
    pub fn vote_key(&self, photo_id: PhotoId) -> String {
        format!("{}-{}", self.as_str(), photo_id)
    }
}

impl std::fmt::Display for VoterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}


/// A single vote. Never modified once recorded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VoteRecord {
    pub photo_id: PhotoId,
    pub client_id: String,
    pub timestamp: DateTime<Utc>,
}


pub struct VoteLedger {
    file: JsonFile,
    votes: Mutex<BTreeMap<String, VoteRecord>>,
}

impl VoteLedger {
    pub const FILENAME: &'static str = "votes.json";

    /// Load the ledger from the given data directory
    pub async fn open(data_dir: &Path) -> Result<Self> {
        let file = JsonFile::new(data_dir.join(Self::FILENAME));
        let votes: BTreeMap<String, VoteRecord> = file.load_or_init().await?;
        tracing::debug!("Loaded {} vote(s) from \"{}\"", votes.len(), file.path().display());
        Ok(Self {
            file,
            votes: Mutex::new(votes),
        })
    }

    pub async fn has_voted(&self, voter: &VoterId, photo_id: PhotoId) -> bool {
        self.votes.lock().await.contains_key(&voter.vote_key(photo_id))
    }

    /// Record a vote, unless this voter already voted for this photo
    pub async fn record_vote(&self, voter: &VoterId, photo_id: PhotoId) -> Result<VoteRecord> {
        let mut votes = self.votes.lock().await;

        let key = voter.vote_key(photo_id);
        if votes.contains_key(&key) {
            return Err(Error::AlreadyVoted);
        }

        let record = VoteRecord {
            photo_id,
            client_id: voter.as_str().to_string(),
            timestamp: Utc::now(),
        };
        votes.insert(key.clone(), record.clone());

        // A vote that couldn't be persisted doesn't count
        if let Err(error) = self.file.save(&*votes).await {
            votes.remove(&key);
            return Err(error);
        }
        Ok(record)
    }

    /// Number of votes for the given photo
    pub async fn count_for(&self, photo_id: PhotoId) -> usize {
        self.votes.lock().await
            .values()
            .filter(|vote| vote.photo_id == photo_id)
            .count()
    }

    /// Number of votes of every photo that received at least one, in a single pass
    pub async fn counts(&self) -> HashMap<PhotoId, usize> {
        let votes = self.votes.lock().await;
        let mut counts = HashMap::new();
        for vote in votes.values() {
            *counts.entry(vote.photo_id).or_insert(0) += 1;
        }
        counts
    }

    /// Total number of votes
    pub async fn len(&self) -> usize {
        self.votes.lock().await.len()
    }

    /// Remove every vote for the given photo and return how many were removed
    pub async fn remove_for(&self, photo_id: PhotoId) -> Result<usize> {
        let mut votes = self.votes.lock().await;

        let removed = votes.iter()
            .filter(|(_, vote)| vote.photo_id == photo_id)
            .map(|(key, vote)| (key.clone(), vote.clone()))
            .collect::<Vec<(String, VoteRecord)>>();
        if removed.is_empty() {
            return Ok(0);
        }
        for (key, _) in &removed {
            votes.remove(key);
        }

        if let Err(error) = self.file.save(&*votes).await {
            votes.extend(removed);
            return Err(error);
        }
        Ok(removed.len())
    }
}
