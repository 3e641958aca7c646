use std::pin::Pin;

use futures_core::Stream;

/// A pinned, boxed, sendable stream — the return type of every streaming
/// provider call.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = T> + Send + 'a>>;
