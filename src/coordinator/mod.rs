//! Coordinators — the slow-moving control plane.
//!
//! The deployment coordinator owns the contract-address snapshot; the
//! network coordinator owns the active network set and fans changes
//! out to listeners.

pub mod deployment;
pub mod network;
