//! The command-queue runtime shared by the master and the slave.
//!
//! Each node owns exactly one bounded [`mpsc`] channel of a node-specific
//! command enum. Every piece of in-memory state (the slave registry, the
//! scheduler's service list, the group list, the service manager's table,
//! screen buffers) is mutated only by the single task draining that
//! channel. Reader tasks, the reconciliation ticker and the REPL reader all
//! produce commands into the same queue instead of touching state directly;
//! when a caller needs an answer it builds the command around a
//! [`oneshot`] reply channel and awaits it.

use tokio::sync::{mpsc, oneshot};

/// The sending half of a node's command queue. Cheap to clone; every
/// producer task holds one.
#[derive(Clone)]
pub struct Handle<Cmd> {
    tx: mpsc::Sender<Cmd>,
}

/// A reply channel embedded in a command. The consumer fills it in and the
/// producer that built the command awaits it.
pub type Reply<T> = oneshot::Sender<T>;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("command queue consumer has shut down")]
    Closed,
    #[error("reply channel was dropped before the consumer answered")]
    NoReply,
}

impl<Cmd> Handle<Cmd> {
    /// Enqueue a fire-and-forget command.
    pub async fn send(&self, cmd: Cmd) -> Result<(), QueueError> {
        self.tx.send(cmd).await.map_err(|_| QueueError::Closed)
    }

    /// Build a command around a fresh reply channel, enqueue it, and await
    /// the consumer's answer. This is the standard "enqueue, block on
    /// reply" pattern every reader task uses.
    pub async fn call<R>(&self, build: impl FnOnce(Reply<R>) -> Cmd) -> Result<R, QueueError> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(build(tx)).await.map_err(|_| QueueError::Closed)?;
        rx.await.map_err(|_| QueueError::NoReply)
    }
}

/// Create a bounded mailbox: a cloneable [`Handle`] for producers and the
/// [`mpsc::Receiver`] the single consumer task drains.
pub fn mailbox<Cmd>(capacity: usize) -> (Handle<Cmd>, mpsc::Receiver<Cmd>) {
    let (tx, rx) = mpsc::channel(capacity);
    (Handle { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Cmd {
        Add(u32, u32, Reply<u32>),
        Shutdown,
    }

    #[tokio::test]
    async fn enqueued_commands_are_processed_in_order_with_replies() {
        let (handle, mut rx) = mailbox::<Cmd>(8);

        let consumer = tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                match cmd {
                    Cmd::Add(a, b, reply) => {
                        let _ = reply.send(a + b);
                    }
                    Cmd::Shutdown => break,
                }
            }
        });

        let r1 = handle.call(|reply| Cmd::Add(2, 3, reply)).await.unwrap();
        let r2 = handle.call(|reply| Cmd::Add(10, 20, reply)).await.unwrap();
        assert_eq!(r1, 5);
        assert_eq!(r2, 30);

        handle.send(Cmd::Shutdown).await.unwrap();
        consumer.await.unwrap();
    }

    #[tokio::test]
    async fn calling_after_shutdown_reports_closed() {
        let (handle, mut rx) = mailbox::<Cmd>(8);
        drop(tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                if let Cmd::Shutdown = cmd {
                    break;
                }
            }
        }));
        handle.send(Cmd::Shutdown).await.unwrap();
        // give the consumer a moment to drain and drop its receiver
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let err = handle.call(|reply| Cmd::Add(1, 1, reply)).await;
        assert!(matches!(err, Err(QueueError::Closed)));
    }
}
