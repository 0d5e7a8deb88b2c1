//! # Assessment Module
//!
//! Ties the collaborators and the scoring engine together into the three
//! stages of an assessment:
//! 1. **Checker**: did the learner say the reference sentence?
//! 2. **Assessor**: how well was each phoneme produced?
//! 3. **Diagnostician**: what should the learner change for the weak ones?

pub mod pipeline;
pub mod schema;
pub mod word_mapper;

pub use pipeline::{AssessmentReport, AssessmentSettings, Assessor, Collaborators};
pub use schema::SpeechRequest;
