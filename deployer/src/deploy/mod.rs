//! Deployment orchestration

pub mod check;
pub mod fsm;
pub mod orchestrator;
pub mod report;
