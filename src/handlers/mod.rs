//! HTTP handlers

pub mod assessor;
pub mod detections;
pub mod health;
pub mod score;
pub mod thresholds;
