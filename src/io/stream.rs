//! Body stream contracts and reusable stages.

use bytes::{Bytes, BytesMut};

use crate::policy::{PolicyError, PolicyScope};

/// Receives chunks and the end-of-stream signal from an upstream stage.
pub trait BodySink {
    fn write(&mut self, chunk: Bytes) -> Result<(), PolicyError>;

    fn end(&mut self) -> Result<(), PolicyError>;
}

/// One stage of a body pipeline, contributed by a data-capable policy.
///
/// A stage may emit zero or more chunks downstream per chunk it receives, and
/// may hold data back until `end`. It must forward the end-of-stream signal
/// exactly once. Every call receives the scope of the policy that
/// contributed the stage.
pub trait BodyTransformer: Send {
    fn write(
        &mut self,
        chunk: Bytes,
        downstream: &mut dyn BodySink,
        scope: &PolicyScope,
    ) -> Result<(), PolicyError>;

    fn end(&mut self, downstream: &mut dyn BodySink, _scope: &PolicyScope) -> Result<(), PolicyError> {
        downstream.end()
    }

    /// Called when the exchange hits an unrecoverable error. Release any
    /// buffered data or held resources here.
    fn abort(&mut self, _error: &PolicyError, _scope: &PolicyScope) {}
}

/// Applies a function to every chunk as it passes.
pub struct MapChunks<F> {
    map: F,
}

impl<F> MapChunks<F>
where
    F: FnMut(Bytes) -> Bytes + Send,
{
    pub fn new(map: F) -> Self {
        Self { map }
    }
}

impl<F> BodyTransformer for MapChunks<F>
where
    F: FnMut(Bytes) -> Bytes + Send,
{
    fn write(
        &mut self,
        chunk: Bytes,
        downstream: &mut dyn BodySink,
        _scope: &PolicyScope,
    ) -> Result<(), PolicyError> {
        downstream.write((self.map)(chunk))
    }
}

type Finish = Box<dyn FnOnce(Bytes) -> Result<Bytes, PolicyError> + Send>;

/// Collects the whole body and transforms it once at end-of-stream.
///
/// Useful for payload rewrites that need the complete document.
pub struct BufferedBody {
    buffer: BytesMut,
    finish: Option<Finish>,
}

impl BufferedBody {
    pub fn new<F>(finish: F) -> Self
    where
        F: FnOnce(Bytes) -> Result<Bytes, PolicyError> + Send + 'static,
    {
        Self {
            buffer: BytesMut::new(),
            finish: Some(Box::new(finish)),
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

impl BodyTransformer for BufferedBody {
    fn write(
        &mut self,
        chunk: Bytes,
        _downstream: &mut dyn BodySink,
        _scope: &PolicyScope,
    ) -> Result<(), PolicyError> {
        self.buffer.extend_from_slice(&chunk);
        Ok(())
    }

    fn end(&mut self, downstream: &mut dyn BodySink, _scope: &PolicyScope) -> Result<(), PolicyError> {
        let body = self.buffer.split().freeze();
        let body = match self.finish.take() {
            Some(finish) => finish(body)?,
            None => body,
        };
        if !body.is_empty() {
            downstream.write(body)?;
        }
        downstream.end()
    }

    fn abort(&mut self, _error: &PolicyError, _scope: &PolicyScope) {
        self.buffer.clear();
        self.finish = None;
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Sink that records everything it receives.
    #[derive(Debug, Default)]
    pub struct VecSink {
        pub chunks: Vec<Bytes>,
        pub ended: usize,
    }

    impl BodySink for VecSink {
        fn write(&mut self, chunk: Bytes) -> Result<(), PolicyError> {
            self.chunks.push(chunk);
            Ok(())
        }

        fn end(&mut self) -> Result<(), PolicyError> {
            self.ended += 1;
            Ok(())
        }
    }
}
