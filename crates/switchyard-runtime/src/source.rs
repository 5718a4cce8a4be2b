//! Update sources.
//!
//! An [`UpdateSource`] is the inbound half of a platform connection: it
//! yields decoded updates one at a time and names the [`Platform`] client
//! that answers them. Polling, webhooks and wire decoding live behind it.

use std::fmt;
use std::pin::Pin;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use switchyard_core::{BoxedPlatform, Update};
use tokio::sync::mpsc;

/// Inbound stream of updates for one platform connection.
#[async_trait]
pub trait UpdateSource: Send {
    /// Client used to answer updates from this source.
    fn platform(&self) -> BoxedPlatform;

    /// Waits for the next update.
    ///
    /// `Ok(None)` means the source is exhausted and the runtime stops. An
    /// error is reported and receiving continues.
    async fn next_update(&mut self) -> anyhow::Result<Option<Update>>;
}

/// Source fed through a tokio channel.
///
/// ```rust,ignore
/// let (source, tx) = ChannelSource::new(platform, 64);
/// tokio::spawn(async move { tx.send(update).await });
/// runtime.run(source).await?;
/// ```
pub struct ChannelSource {
    platform: BoxedPlatform,
    rx: mpsc::Receiver<Update>,
}

impl ChannelSource {
    /// Returns the source and the sender feeding it. The source ends when
    /// every sender is dropped.
    pub fn new(platform: BoxedPlatform, capacity: usize) -> (Self, mpsc::Sender<Update>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { platform, rx }, tx)
    }
}

#[async_trait]
impl UpdateSource for ChannelSource {
    fn platform(&self) -> BoxedPlatform {
        self.platform.clone()
    }

    async fn next_update(&mut self) -> anyhow::Result<Option<Update>> {
        Ok(self.rx.recv().await)
    }
}

impl fmt::Debug for ChannelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSource")
            .field("platform", &self.platform.id())
            .finish_non_exhaustive()
    }
}

type UpdateStream = Pin<Box<dyn Stream<Item = anyhow::Result<Update>> + Send>>;

/// Source backed by any stream of decoded updates.
pub struct StreamSource {
    platform: BoxedPlatform,
    stream: UpdateStream,
}

impl StreamSource {
    pub fn new<S>(platform: BoxedPlatform, stream: S) -> Self
    where
        S: Stream<Item = anyhow::Result<Update>> + Send + 'static,
    {
        Self {
            platform,
            stream: Box::pin(stream),
        }
    }
}

#[async_trait]
impl UpdateSource for StreamSource {
    fn platform(&self) -> BoxedPlatform {
        self.platform.clone()
    }

    async fn next_update(&mut self) -> anyhow::Result<Option<Update>> {
        self.stream.next().await.transpose()
    }
}

impl fmt::Debug for StreamSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamSource")
            .field("platform", &self.platform.id())
            .finish_non_exhaustive()
    }
}
