//! Recorder module for capturing touch gestures and turning them into test steps
//!
//! This module provides:
//! - Decoding of raw `getevent` output into gestures
//! - A background event recorder feeding a bounded gesture queue
//! - Step generation from recorded gestures

pub mod event_recorder;
pub mod step_generator;
pub mod touch_decoder;

pub use event_recorder::EventRecorder;
pub use step_generator::StepGenerator;
pub use touch_decoder::{Gesture, TouchDecoder, TouchThresholds};
