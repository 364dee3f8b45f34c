//! Converts recorded gestures into scripted steps

use super::touch_decoder::Gesture;
use crate::parser::types::{Step, StepKind, Target, TestCase};

const DOUBLE_TAP: &str = "double tap";

#[derive(Debug, Default)]
pub struct StepGenerator {
    /// Gaps at least this long become `wait` steps
    min_wait_ms: Option<u64>,
    steps: Vec<Step>,
    last_ended_ms: Option<u64>,
    /// Index of the single tap a following double tap replaces
    open_tap: Option<usize>,
}

impl StepGenerator {
    pub fn new(min_wait_ms: Option<u64>) -> Self {
        Self {
            min_wait_ms,
            ..Default::default()
        }
    }

    pub fn push(&mut self, gesture: &Gesture) {
        match gesture {
            Gesture::DoubleTap { at, .. } => {
                if let Some(index) = self.open_tap.take() {
                    self.steps.truncate(index);
                } else {
                    self.push_wait(gesture.started_ms());
                }
                for _ in 0..2 {
                    let mut step = tap(at.x, at.y);
                    step.description = Some(DOUBLE_TAP.to_string());
                    self.steps.push(step);
                }
            }
            Gesture::Tap { at, .. } => {
                self.push_wait(gesture.started_ms());
                self.open_tap = Some(self.steps.len());
                self.steps.push(tap(at.x, at.y));
            }
            Gesture::Swipe {
                from,
                to,
                duration_ms,
                ..
            } => {
                self.push_wait(gesture.started_ms());
                self.open_tap = None;
                self.steps.push(Step::new(StepKind::Swipe {
                    from: *from,
                    to: *to,
                    duration_ms: Some(*duration_ms),
                }));
            }
        }
        self.last_ended_ms = Some(gesture.ended_ms());
    }

    fn push_wait(&mut self, started_ms: u64) {
        let (Some(min), Some(last)) = (self.min_wait_ms, self.last_ended_ms) else {
            return;
        };
        let gap = started_ms.saturating_sub(last);
        if gap >= min {
            self.open_tap = None;
            self.steps.push(Step::new(StepKind::Wait { duration_ms: gap }));
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn finish(self) -> Vec<Step> {
        self.steps
    }
}

fn tap(x: i32, y: i32) -> Step {
    Step::new(StepKind::Tap {
        target: Target::Point { x, y },
    })
}

/// Wrap recorded steps into a test case ready to be written out
pub fn to_test_case(id: &str, name: Option<&str>, suite_id: &str, steps: Vec<Step>) -> TestCase {
    TestCase {
        id: id.to_string(),
        suite_id: suite_id.to_string(),
        name: name.map(|n| n.to_string()),
        steps,
        ..Default::default()
    }
}
