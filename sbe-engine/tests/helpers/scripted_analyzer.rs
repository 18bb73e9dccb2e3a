//! Scripted analysis service
//!
//! Answers each call with the next scripted step, or succeeds for every
//! member once the script runs out. Records every call it receives.

use async_trait::async_trait;
use sbe_engine::analyzer::{AnalyzeFailure, AnalyzeResponse, Analyzer, SampleDescriptor, SampleResult};
use sbe_engine::models::{FailureKind, SampleId};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

type Responder = Box<dyn Fn(&[SampleDescriptor]) -> AnalyzeResponse + Send + Sync>;

enum Step {
    Respond(Responder),
    /// Never answer
    Hang,
}

/// One Analyze call as seen by the service
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub at: Instant,
    pub ids: Vec<SampleId>,
}

/// Result payload the scripted service returns for `id`
pub fn payload_for(id: &SampleId) -> Value {
    json!({ "hash": id.as_str(), "tempo_bpm": 120 })
}

fn all_ok(samples: &[SampleDescriptor]) -> AnalyzeResponse {
    AnalyzeResponse::PerSample(
        samples
            .iter()
            .map(|s| SampleResult::ok(s.id.clone(), payload_for(&s.id)))
            .collect(),
    )
}

#[derive(Default)]
pub struct ScriptedAnalyzer {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<RecordedCall>>,
    call_made: Notify,
}

impl ScriptedAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next call fails as a whole
    pub fn push_batch_failure(&self, failure: AnalyzeFailure) {
        self.push(Step::Respond(Box::new(move |_| AnalyzeResponse::Batch(failure.clone()))));
    }

    /// Next call fails the members at `positions`; the rest succeed
    pub fn push_member_failures(&self, failures: Vec<(usize, FailureKind)>) {
        let failures: HashMap<usize, FailureKind> = failures.into_iter().collect();
        self.push(Step::Respond(Box::new(move |samples| {
            AnalyzeResponse::PerSample(
                samples
                    .iter()
                    .enumerate()
                    .map(|(i, s)| match failures.get(&i) {
                        Some(kind) => SampleResult::failed(s.id.clone(), *kind, format!("scripted {}", kind)),
                        None => SampleResult::ok(s.id.clone(), payload_for(&s.id)),
                    })
                    .collect(),
            )
        })));
    }

    /// Next call succeeds for every member
    pub fn push_success(&self) {
        self.push(Step::Respond(Box::new(all_ok)));
    }

    /// Next call never returns
    pub fn push_hang(&self) {
        self.push(Step::Hang);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Batch sizes in call order
    pub fn call_sizes(&self) -> Vec<usize> {
        self.calls().iter().map(|c| c.ids.len()).collect()
    }

    /// Wait until at least `n` calls have been received
    pub async fn wait_for_calls(&self, n: usize) {
        while self.call_count() < n {
            self.call_made.notified().await;
        }
    }

    fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }
}

#[async_trait]
impl Analyzer for ScriptedAnalyzer {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn analyze(&self, samples: &[SampleDescriptor]) -> AnalyzeResponse {
        self.calls.lock().unwrap().push(RecordedCall {
            at: Instant::now(),
            ids: samples.iter().map(|s| s.id.clone()).collect(),
        });
        let step = self.script.lock().unwrap().pop_front();
        self.call_made.notify_one();

        match step {
            Some(Step::Respond(respond)) => respond(samples),
            Some(Step::Hang) => std::future::pending().await,
            None => all_ok(samples),
        }
    }
}
