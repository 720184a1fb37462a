//! Upload and vote limits.
//!
//! Every check works on the complete list of entries fetched from the store.
//! Vote counting uses exact membership in each entry's voter list, so a user
//! named `ann` never picks up the votes of `anna`.

use crate::error::QuotaError;
use crate::model::Entry;

pub const MAX_IMAGES: usize = 2;
pub const MAX_VOTES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VotePolicy {
    pub allow_self_vote: bool,
}

impl Default for VotePolicy {
    fn default() -> Self {
        VotePolicy {
            allow_self_vote: true,
        }
    }
}

pub fn owned_entry<'a>(entries: &'a [Entry], user: &str) -> Option<&'a Entry> {
    entries.iter().find(|entry| entry.owner == user)
}

pub fn remaining_upload_slots(entries: &[Entry], user: &str) -> usize {
    owned_entry(entries, user)
        .map(|entry| MAX_IMAGES.saturating_sub(entry.images.len()))
        .unwrap_or(MAX_IMAGES)
}

pub fn remaining_votes(entries: &[Entry], user: &str) -> usize {
    let cast = entries.iter().filter(|entry| entry.has_voted(user)).count();
    MAX_VOTES.saturating_sub(cast)
}

/// Returns the target entry if `user` may vote for it.
pub fn check_vote<'a>(
    entries: &'a [Entry],
    user: &str,
    target_id: &str,
    policy: VotePolicy,
) -> Result<&'a Entry, QuotaError> {
    let target = entries
        .iter()
        .find(|entry| entry.id == target_id)
        .ok_or_else(|| QuotaError::UnknownEntry(target_id.to_owned()))?;
    if target.has_voted(user) {
        return Err(QuotaError::AlreadyVoted(target.id.clone()));
    }
    if remaining_votes(entries, user) == 0 {
        return Err(QuotaError::QuotaExceeded);
    }
    if !policy.allow_self_vote && target.owner == user {
        return Err(QuotaError::OwnEntry);
    }
    Ok(target)
}

pub fn can_vote(entries: &[Entry], user: &str, target_id: &str, policy: VotePolicy) -> bool {
    check_vote(entries, user, target_id, policy).is_ok()
}

pub fn can_upload(entries: &[Entry], user: &str, proposed: usize) -> bool {
    remaining_upload_slots(entries, user) >= proposed
}

/// Adds `user` to the entry's voters. `remaining` is the caller's global
/// budget from [`remaining_votes`]; it is not recomputed here.
pub fn apply_vote(mut entry: Entry, user: &str, remaining: usize) -> Result<Entry, QuotaError> {
    if entry.has_voted(user) {
        return Err(QuotaError::AlreadyVoted(entry.id));
    }
    if remaining == 0 {
        return Err(QuotaError::QuotaExceeded);
    }
    entry.voted_users.push(user.to_owned());
    Ok(entry)
}

/// Appends `new_files` to the user's entry, or starts a new one without an id.
pub fn apply_upload(
    entry: Option<Entry>,
    user: &str,
    new_files: &[String],
) -> Result<Entry, QuotaError> {
    let mut entry = entry.unwrap_or_else(|| Entry {
        id: String::new(),
        owner: user.to_owned(),
        images: Vec::new(),
        voted_users: Vec::new(),
    });
    if entry.images.len() + new_files.len() > MAX_IMAGES {
        return Err(QuotaError::TooManyFiles {
            existing: entry.images.len(),
            proposed: new_files.len(),
            max: MAX_IMAGES,
        });
    }
    entry.images.extend(new_files.iter().cloned());
    Ok(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, owner: &str, images: usize, voters: &[&str]) -> Entry {
        Entry {
            id: id.to_owned(),
            owner: owner.to_owned(),
            images: (0..images).map(|i| format!("{}_{}.jpg", owner, i)).collect(),
            voted_users: voters.iter().map(|v| v.to_string()).collect(),
        }
    }

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn first_upload_creates_entry() {
        let entries = vec![entry("e1", "bob", 1, &[])];
        assert_eq!(remaining_upload_slots(&entries, "alice"), 2);
        assert!(can_upload(&entries, "alice", 2));

        let created = apply_upload(None, "alice", &files(&["a.jpg", "b.png"])).unwrap();
        assert_eq!(created.owner, "alice");
        assert_eq!(created.images, files(&["a.jpg", "b.png"]));

        let entries = vec![Entry {
            id: "e2".to_owned(),
            ..created
        }];
        assert_eq!(remaining_upload_slots(&entries, "alice"), 0);
    }

    #[test]
    fn third_image_is_rejected() {
        let entries = vec![entry("e1", "alice", 2, &[])];
        assert!(!can_upload(&entries, "alice", 1));
        let err = apply_upload(entries.first().cloned(), "alice", &files(&["c.jpg"])).unwrap_err();
        assert_eq!(
            err,
            QuotaError::TooManyFiles {
                existing: 2,
                proposed: 1,
                max: 2
            }
        );
        assert!(apply_upload(None, "carol", &files(&["a.jpg", "b.jpg", "c.jpg"])).is_err());
    }

    #[test]
    fn upload_appends_to_existing_entry() {
        let existing = entry("e1", "alice", 1, &["bob"]);
        let updated = apply_upload(Some(existing.clone()), "alice", &files(&["new.png"])).unwrap();
        assert_eq!(updated.id, "e1");
        assert_eq!(updated.images.len(), 2);
        assert_eq!(updated.voted_users, existing.voted_users);
    }

    #[test]
    fn upload_slots_stay_in_range() {
        for images in 0..=4 {
            let entries = vec![entry("e1", "alice", images, &[])];
            let slots = remaining_upload_slots(&entries, "alice");
            assert!(slots <= MAX_IMAGES);
        }
    }

    #[test]
    fn five_votes_exhaust_the_budget() {
        let mut entries: Vec<Entry> = (0..5)
            .map(|i| entry(&format!("e{}", i), &format!("user{}", i), 1, &["bob"]))
            .collect();
        entries.push(entry("e5", "user5", 1, &[]));

        assert_eq!(remaining_votes(&entries, "bob"), 0);
        assert!(!can_vote(&entries, "bob", "e5", VotePolicy::default()));
        assert_eq!(
            check_vote(&entries, "bob", "e5", VotePolicy::default()).unwrap_err(),
            QuotaError::QuotaExceeded
        );
    }

    #[test]
    fn repeated_vote_is_already_voted_regardless_of_budget() {
        let entries = vec![entry("e1", "alice", 1, &["bob"])];
        assert_eq!(remaining_votes(&entries, "bob"), 4);
        assert_eq!(
            check_vote(&entries, "bob", "e1", VotePolicy::default()).unwrap_err(),
            QuotaError::AlreadyVoted("e1".to_owned())
        );
        let err = apply_vote(entries[0].clone(), "bob", 4).unwrap_err();
        assert_eq!(err, QuotaError::AlreadyVoted("e1".to_owned()));
        let err = apply_vote(entries[0].clone(), "bob", 0).unwrap_err();
        assert_eq!(err, QuotaError::AlreadyVoted("e1".to_owned()));
    }

    #[test]
    fn apply_vote_respects_caller_budget() {
        let target = entry("e1", "alice", 1, &[]);
        assert_eq!(
            apply_vote(target, "bob", 0).unwrap_err(),
            QuotaError::QuotaExceeded
        );
    }

    #[test]
    fn vote_decrements_remaining_by_one() {
        let mut entries = vec![
            entry("e1", "alice", 1, &["carol"]),
            entry("e2", "carol", 2, &["bob"]),
        ];
        let before = remaining_votes(&entries, "bob");
        let remaining = before;
        entries[0] = apply_vote(entries[0].clone(), "bob", remaining).unwrap();
        assert_eq!(remaining_votes(&entries, "bob"), before - 1);
        assert_eq!(remaining_votes(&entries, "carol"), 4);
    }

    #[test]
    fn substring_names_do_not_share_votes() {
        let entries = vec![
            entry("e1", "x", 1, &["anna"]),
            entry("e2", "y", 1, &["joanna", "anna"]),
        ];
        assert_eq!(remaining_votes(&entries, "ann"), MAX_VOTES);
        assert_eq!(remaining_votes(&entries, "anna"), 3);
        assert!(can_vote(&entries, "ann", "e1", VotePolicy::default()));
    }

    #[test]
    fn can_vote_is_idempotent() {
        let entries = vec![entry("e1", "alice", 1, &[]), entry("e2", "bob", 1, &["carol"])];
        for target in ["e1", "e2", "missing"] {
            let first = can_vote(&entries, "carol", target, VotePolicy::default());
            let second = can_vote(&entries, "carol", target, VotePolicy::default());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn self_vote_follows_policy() {
        let entries = vec![entry("e1", "alice", 1, &[])];
        assert!(can_vote(&entries, "alice", "e1", VotePolicy::default()));
        let strict = VotePolicy {
            allow_self_vote: false,
        };
        assert_eq!(
            check_vote(&entries, "alice", "e1", strict).unwrap_err(),
            QuotaError::OwnEntry
        );
        assert!(can_vote(&entries, "bob", "e1", strict));
    }

    #[test]
    fn unknown_target_cannot_be_voted() {
        let entries = vec![entry("e1", "alice", 1, &[])];
        assert_eq!(
            check_vote(&entries, "bob", "nope", VotePolicy::default()).unwrap_err(),
            QuotaError::UnknownEntry("nope".to_owned())
        );
    }
}
