//! HTTP clients and wire models for the UK Parliament APIs.

pub mod client;
pub mod models;

pub use client::{ContributionSource, DebateSource, HansardClient};
pub use models::{
    ContributionItem, ContributionSearchResult, ContributionSummary, Debate, DebateItem,
    DebateOverview,
};
