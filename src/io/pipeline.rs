//! Linked body pipeline.
//!
//! Stages are linked head-to-tail in traversal order: each stage's output
//! feeds the next stage's input, and the last stage feeds the tail sink (the
//! chain's terminal body/end handlers). An empty pipeline writes straight to
//! the tail.

use bytes::Bytes;

use crate::io::stream::{BodySink, BodyTransformer};
use crate::policy::scope::PolicyScope;
use crate::policy::PolicyError;

/// A transformer together with the scope it executes under.
pub struct Stage {
    scope: PolicyScope,
    transformer: Box<dyn BodyTransformer>,
}

impl Stage {
    pub fn new(scope: PolicyScope, transformer: Box<dyn BodyTransformer>) -> Self {
        Self { scope, transformer }
    }

    pub fn scope(&self) -> &PolicyScope {
        &self.scope
    }

    /// Run one transformer call; a panic surfaces as a body error of this stage.
    fn call<F>(&mut self, call: F) -> Result<(), PolicyError>
    where
        F: FnOnce(&mut dyn BodyTransformer, &PolicyScope) -> Result<(), PolicyError>,
    {
        let Stage { scope, transformer } = self;
        scope
            .run(|scope| call(transformer.as_mut(), scope))
            .unwrap_or_else(|panic| Err(PolicyError::body(scope.name(), format!("panicked: {panic}"))))
    }
}

/// Ordered, linked body stages of one chain.
#[derive(Default)]
pub struct BodyPipeline {
    stages: Vec<Stage>,
}

impl BodyPipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Scope names in pipeline order.
    pub fn scopes(&self) -> impl Iterator<Item = &PolicyScope> {
        self.stages.iter().map(Stage::scope)
    }

    /// Push a chunk into the pipeline head.
    pub fn write(&mut self, chunk: Bytes, tail: &mut dyn BodySink) -> Result<(), PolicyError> {
        write_through(&mut self.stages, chunk, tail)
    }

    /// Signal end-of-stream into the pipeline head.
    pub fn end(&mut self, tail: &mut dyn BodySink) -> Result<(), PolicyError> {
        end_through(&mut self.stages, tail)
    }

    /// Give every stage a chance to release its resources.
    pub fn abort(&mut self, error: &PolicyError) {
        for stage in &mut self.stages {
            let result = stage.call(|transformer, scope| {
                transformer.abort(error, scope);
                Ok(())
            });
            if let Err(err) = result {
                tracing::warn!(scope = %stage.scope, error = %err, "Body stage failed to abort");
            }
        }
    }
}

fn write_through(stages: &mut [Stage], chunk: Bytes, tail: &mut dyn BodySink) -> Result<(), PolicyError> {
    match stages.split_first_mut() {
        None => tail.write(chunk),
        Some((stage, rest)) => {
            let mut next = Link { rest, tail };
            stage.call(|transformer, scope| transformer.write(chunk, &mut next, scope))
        }
    }
}

fn end_through(stages: &mut [Stage], tail: &mut dyn BodySink) -> Result<(), PolicyError> {
    match stages.split_first_mut() {
        None => tail.end(),
        Some((stage, rest)) => {
            let mut next = Link { rest, tail };
            stage.call(|transformer, scope| transformer.end(&mut next, scope))
        }
    }
}

/// The downstream handed to a stage: the remaining stages, then the tail.
struct Link<'a> {
    rest: &'a mut [Stage],
    tail: &'a mut dyn BodySink,
}

impl BodySink for Link<'_> {
    fn write(&mut self, chunk: Bytes) -> Result<(), PolicyError> {
        write_through(self.rest, chunk, self.tail)
    }

    fn end(&mut self) -> Result<(), PolicyError> {
        end_through(self.rest, self.tail)
    }
}
