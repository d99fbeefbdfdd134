//! Coordination service: wire schema and the reqwest adapter.

pub mod client;
pub mod schema;

pub use client::SafeServiceClient;
pub use schema::{
    ConfirmationRequest, Page, PageRequest, ProposalRequest, ServiceConfirmation,
    ServiceTransaction,
};
