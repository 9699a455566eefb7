//! The versioned record and its transaction machinery.

mod entity;
mod transaction;

pub use entity::{Collaborators, Revisionable};
pub(crate) use transaction::TransactionController;
