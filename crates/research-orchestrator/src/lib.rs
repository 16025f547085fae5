pub mod allocator;
pub mod assemble;
pub mod data;
pub mod engine;
pub mod governor;
pub mod policy;
pub mod worker;


pub use allocator::EvidenceIdAllocator;
pub use assemble::{assemble_valuation_inputs, AssembledValuation};
pub use data::{CompanySnapshot, MarketDataProvider, StaticMarketData};
pub use engine::{AnalysisOutcome, Orchestrator};
pub use governor::{CostGovernor, GovernorDecision};
pub use policy::{
    aggregate_confidence, check_stop, evidence_confidence, should_synthesize, StopReason,
};
pub use worker::call_worker;
