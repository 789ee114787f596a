//! Scripted producers for exercising the runners without real tools.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::tools::producer::{ToolProducer, ToolUpdate};
use crate::tools::{ToolError, ToolResult};

use super::batch::ToolInvocation;
use super::slot::ProducerFactory;

#[derive(Debug, Clone)]
pub(crate) enum ScriptStep {
    Sleep(u64),
    Progress(&'static str),
    Done(&'static str),
    Fail(&'static str),
}

#[derive(Default)]
struct Probe {
    active: AtomicUsize,
    peak: AtomicUsize,
    started: Mutex<Vec<usize>>,
    log: Mutex<Vec<String>>,
}

impl Probe {
    fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    fn note(&self, entry: String) {
        self.log.lock().unwrap().push(entry);
    }
}

/// Hands out scripted producers keyed by invocation id `call-<n>`.
pub(crate) struct ScriptedFactory {
    scripts: HashMap<String, (usize, Vec<ScriptStep>)>,
    probe: Arc<Probe>,
}

impl ScriptedFactory {
    pub fn new(scripts: Vec<Vec<ScriptStep>>) -> Self {
        let scripts = scripts
            .into_iter()
            .enumerate()
            .map(|(i, steps)| (format!("call-{i}"), (i, steps)))
            .collect();
        Self {
            scripts,
            probe: Arc::new(Probe::default()),
        }
    }

    pub fn peak_active(&self) -> usize {
        self.probe.peak.load(Ordering::SeqCst)
    }

    /// Script indexes in admission order.
    pub fn started(&self) -> Vec<usize> {
        self.probe.started.lock().unwrap().clone()
    }

    /// `begin:<n>` / `end:<n>` markers in the order producers ran.
    pub fn log(&self) -> Vec<String> {
        self.probe.log.lock().unwrap().clone()
    }
}

impl ProducerFactory for ScriptedFactory {
    fn start(&self, invocation: &ToolInvocation) -> Box<dyn ToolProducer> {
        let (index, steps) = self
            .scripts
            .get(&invocation.id)
            .cloned()
            .unwrap_or((usize::MAX, Vec::new()));
        self.probe.started.lock().unwrap().push(index);
        Box::new(ScriptedProducer {
            index,
            steps: steps.into(),
            probe: Arc::clone(&self.probe),
            begun: false,
            ended: false,
        })
    }
}

struct ScriptedProducer {
    index: usize,
    steps: VecDeque<ScriptStep>,
    probe: Arc<Probe>,
    begun: bool,
    ended: bool,
}

impl ScriptedProducer {
    fn end(&mut self) {
        if self.begun && !self.ended {
            self.ended = true;
            self.probe.note(format!("end:{}", self.index));
            self.probe.leave();
        }
    }
}

impl Drop for ScriptedProducer {
    fn drop(&mut self) {
        self.end();
    }
}

#[async_trait]
impl ToolProducer for ScriptedProducer {
    async fn next_update(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<Result<ToolUpdate, ToolError>> {
        if !self.begun {
            self.begun = true;
            self.probe.enter();
            self.probe.note(format!("begin:{}", self.index));
        }
        while let Some(step) = self.steps.pop_front() {
            match step {
                ScriptStep::Sleep(ms) => {
                    tokio::select! {
                        () = cancel.cancelled() => {
                            self.end();
                            return None;
                        }
                        () = tokio::time::sleep(Duration::from_millis(ms)) => {}
                    }
                }
                ScriptStep::Progress(text) => {
                    return Some(Ok(ToolUpdate::Progress(text.to_string())));
                }
                ScriptStep::Done(text) => {
                    return Some(Ok(ToolUpdate::Done(ToolResult::success(text))));
                }
                ScriptStep::Fail(text) => {
                    self.end();
                    return Some(Err(ToolError::execution_failed(text)));
                }
            }
        }
        self.end();
        None
    }
}
