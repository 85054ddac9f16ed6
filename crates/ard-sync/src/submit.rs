use std::sync::Arc;

use api::Backend;
use ard_log::{error, trace};
use crossbeam_channel::{self, Receiver, Sender};

use crate::batch::BatchState;

/// Submits batches in the order they are sent, off the recording thread.
pub(crate) struct SubmitThread<B: Backend> {
    /// The thread batches are submitted from.
    thread: Option<std::thread::JoinHandle<()>>,
    /// Used to send messages to the submission thread.
    messages: Sender<SubmitMessage<B>>,
}

enum SubmitMessage<B: Backend> {
    Shutdown,
    Submit(Arc<BatchState<B>>),
}

impl<B: Backend> SubmitThread<B> {
    pub fn new(name: String, timeline: bool) -> std::io::Result<Self> {
        let (messages_send, messages_recv) = crossbeam_channel::unbounded();

        let thread = std::thread::Builder::new()
            .name(name)
            .spawn(move || Self::message_pump(messages_recv, timeline))?;

        Ok(Self {
            thread: Some(thread),
            messages: messages_send,
        })
    }

    /// Queues the batch for submission. Hands the batch back if the thread is gone.
    pub fn submit(&self, batch: Arc<BatchState<B>>) -> Result<(), Arc<BatchState<B>>> {
        self.messages
            .send(SubmitMessage::Submit(batch))
            .map_err(|err| match err.0 {
                SubmitMessage::Submit(batch) => batch,
                SubmitMessage::Shutdown => unreachable!(),
            })
    }

    fn message_pump(messages: Receiver<SubmitMessage<B>>, timeline: bool) {
        while let Ok(message) = messages.recv() {
            match message {
                SubmitMessage::Shutdown => break,
                SubmitMessage::Submit(batch) => {
                    puffin::profile_scope!("submit_batch");
                    trace!("submitting batch {}", batch.id());
                    if let Err(err) = batch.submit(timeline) {
                        error!("submission of batch {} failed: {err}", batch.id());
                    }
                }
            }
        }
    }
}

impl<B: Backend> Drop for SubmitThread<B> {
    fn drop(&mut self) {
        // Everything queued before the shutdown message is still submitted
        let _ = self.messages.send(SubmitMessage::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
