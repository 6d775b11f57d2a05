//! Change detection: decides whether the contract record must be re-published.

use meterlink_core::PublishDecision;

/// Result of comparing the stored fingerprint with the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Nothing stored locally; the remote store decides between create and update.
    Unknown,
    Changed,
    Unchanged,
}

pub fn compare(stored: Option<&str>, current: &str) -> Comparison {
    match stored {
        None => Comparison::Unknown,
        Some(fp) if fp == current => Comparison::Unchanged,
        Some(_) => Comparison::Changed,
    }
}

/// Final decision. `exists_remotely` is only consulted for [`Comparison::Unknown`].
pub fn decide(comparison: Comparison, exists_remotely: impl FnOnce() -> bool) -> PublishDecision {
    match comparison {
        Comparison::Unchanged => PublishDecision::Skip,
        Comparison::Changed => PublishDecision::Update,
        Comparison::Unknown if exists_remotely() => PublishDecision::Update,
        Comparison::Unknown => PublishDecision::Create,
    }
}
