//! Weighted consensus over agent findings

pub mod aggregator;

pub use aggregator::{
    AgentContribution, AggregationError, AggregationResult, AggregatorConfig,
    ConsensusAggregator, ConsensusResult, FindingSource, RankedFinding, RULE_FINDING_WEIGHT,
};
