pub mod aggregate;
pub mod corpus;
pub mod labels;
pub mod matcher;
pub mod report;

pub use aggregate::{evaluate, EvaluationAggregator};
pub use matcher::{match_boxes, match_detections, MatchCount, MatchOrder};
