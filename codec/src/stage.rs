use tokio::sync::mpsc;

use crate::backend::CodecBackend;
use crate::CodecError;

/// A decode or encode stage: one backend plus the bounded channel its
/// outputs flow through.
///
/// Downstream code consumes the `Receiver` handed out by [`new`]; the
/// channel closing means the stage has been flushed and every output
/// has been delivered. Sending into a full channel suspends the stage,
/// which is the pipeline's back-pressure.
///
/// [`new`]: CodecStage::new
pub struct CodecStage<B: CodecBackend> {
    backend: B,
    tx: mpsc::Sender<B::Output>,
}

impl<B: CodecBackend> CodecStage<B> {
    pub fn new(backend: B, capacity: usize) -> (Self, mpsc::Receiver<B::Output>) {
        let (tx, rx) = mpsc::channel(capacity);
        (CodecStage { backend, tx }, rx)
    }

    pub fn configure(&mut self, config: &B::Config) -> Result<(), CodecError> {
        self.backend.configure(config)
    }

    /// Feed one input unit and forward any outputs that became ready.
    pub async fn submit(&mut self, input: B::Input) -> Result<(), CodecError> {
        self.backend.submit(input)?;
        self.forward_ready().await
    }

    /// Flush the backend, deliver everything still in flight, and close
    /// the output channel by consuming the stage. The backend comes
    /// back reset, ready for the next run.
    pub async fn finish(mut self) -> Result<B, CodecError> {
        self.backend.flush()?;
        self.forward_ready().await?;
        self.backend.reset();
        Ok(self.backend)
    }

    /// Hard-reset the backend and recover it for a later run.
    pub fn abort(mut self) -> B {
        self.backend.reset();
        self.backend
    }

    async fn forward_ready(&mut self) -> Result<(), CodecError> {
        while let Some(output) = self.backend.poll_output()? {
            self.tx
                .send(output)
                .await
                .map_err(|_| CodecError::ChannelClosed)?;
        }
        Ok(())
    }
}
