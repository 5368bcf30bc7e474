//! The grading pipeline: preprocessing, answer segmentation, AI grading
//! and fact-checking, driven by a per-submission [`state::GradingState`].
//! Stages talk to the outside world only through the capability traits
//! in [`crate::providers`].

mod factcheck;
mod grade;
pub(crate) mod orchestrator;
pub(crate) mod parse;
mod preprocess;
mod segment;
pub(crate) mod state;
#[cfg(test)]
pub(crate) mod testing;
pub(crate) mod types;

pub(crate) use orchestrator::GradingPipeline;
