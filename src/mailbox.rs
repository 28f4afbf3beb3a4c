//! Per-entity FIFO message queue.
//!
//! Every registered [`EntityId`] owns exactly one [`Mailbox`]. Delivery is
//! strict FIFO with no priorities; the queue transitions `ACTIVE ->
//! TERMINATED` exactly once, after which `put` always fails and `get`
//! drains whatever is left before failing too.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout as tokio_timeout;

use crate::message::Message;

/// Failure modes of [`Mailbox`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MailboxError {
    /// The mailbox has been closed and the operation cannot proceed.
    #[error("mailbox is closed")]
    Closed,

    /// `get` did not receive a message before its deadline.
    #[error("mailbox get timed out")]
    Timeout,
}

#[derive(Debug, Default)]
struct MailboxState {
    queue: VecDeque<Message>,
    closed: bool,
}

/// An async FIFO queue of [`Message`]s addressed to a single entity.
///
/// Cloning a `Mailbox` handle is cheap and shares the underlying queue;
/// every clone observes the same close signal.
#[derive(Debug, Clone)]
pub struct Mailbox {
    state: std::sync::Arc<Mutex<MailboxState>>,
    notify: std::sync::Arc<Notify>,
}

impl Mailbox {
    /// Creates a new, empty, active mailbox.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: std::sync::Arc::new(Mutex::new(MailboxState::default())),
            notify: std::sync::Arc::new(Notify::new()),
        }
    }

    /// Enqueues `message`. Fails with [`MailboxError::Closed`] if the
    /// mailbox has already been closed.
    pub async fn put(&self, message: Message) -> Result<(), MailboxError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(MailboxError::Closed);
        }
        state.queue.push_back(message);
        drop(state);
        self.notify.notify_waiters();
        Ok(())
    }

    /// Dequeues the next message, waiting up to `timeout` if the queue is
    /// momentarily empty.
    ///
    /// Returns [`MailboxError::Closed`] once the queue is closed and empty,
    /// even if messages were available earlier in the call. Returns
    /// [`MailboxError::Timeout`] if `timeout` elapses with nothing queued.
    pub async fn get(&self, timeout: Duration) -> Result<Message, MailboxError> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(message) = state.queue.pop_front() {
                    return Ok(message);
                }
                if state.closed {
                    return Err(MailboxError::Closed);
                }
            }

            if tokio_timeout(timeout, notified).await.is_err() {
                return Err(MailboxError::Timeout);
            }
        }
    }

    /// Marks the mailbox terminated. Idempotent; wakes every pending
    /// `get` so it can observe the closed state.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        state.closed = true;
        drop(state);
        self.notify.notify_waiters();
    }

    /// `true` once [`Mailbox::close`] has been called.
    pub async fn closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Number of messages currently queued, regardless of close state.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// `true` if no messages are queued.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{AgentId, UserId};
    use crate::identifier::EntityId;
    use crate::message::RequestMessage;

    fn sample_message() -> Message {
        let src: EntityId = UserId::new().into();
        let dest: EntityId = AgentId::<()>::new().into();
        Message::request(src, dest, RequestMessage::PingRequest)
    }

    #[tokio::test]
    async fn put_then_get_is_fifo() {
        let mailbox = Mailbox::new();
        let first = sample_message();
        let second = sample_message();
        mailbox.put(first.clone()).await.unwrap();
        mailbox.put(second.clone()).await.unwrap();

        assert_eq!(mailbox.get(Duration::from_millis(50)).await.unwrap(), first);
        assert_eq!(mailbox.get(Duration::from_millis(50)).await.unwrap(), second);
    }

    #[tokio::test]
    async fn get_times_out_when_empty() {
        let mailbox = Mailbox::new();
        let err = mailbox.get(Duration::from_millis(10)).await.unwrap_err();
        assert_eq!(err, MailboxError::Timeout);
    }

    #[tokio::test]
    async fn put_after_close_fails() {
        let mailbox = Mailbox::new();
        mailbox.close().await;
        let err = mailbox.put(sample_message()).await.unwrap_err();
        assert_eq!(err, MailboxError::Closed);
    }

    #[tokio::test]
    async fn get_drains_then_reports_closed() {
        let mailbox = Mailbox::new();
        mailbox.put(sample_message()).await.unwrap();
        mailbox.close().await;

        assert!(mailbox.get(Duration::from_millis(50)).await.is_ok());
        let err = mailbox.get(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err, MailboxError::Closed);
    }

    #[tokio::test]
    async fn closing_wakes_a_pending_waiter() {
        let mailbox = Mailbox::new();
        let waiter = {
            let mailbox = mailbox.clone();
            tokio::spawn(async move { mailbox.get(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        mailbox.close().await;

        let result = tokio::time::timeout(Duration::from_millis(200), waiter)
            .await
            .expect("waiter did not wake")
            .unwrap();
        assert_eq!(result.unwrap_err(), MailboxError::Closed);
    }

    mod properties {
        use super::*;
        use crate::message::RequestMessage;
        use proptest::prelude::*;

        fn labeled_message(n: usize) -> Message {
            let src: EntityId = UserId::new().into();
            let dest: EntityId = AgentId::<()>::new().into();
            Message::request(
                src,
                dest,
                RequestMessage::ActionRequest {
                    action_name: format!("op-{n}"),
                    pargs: Vec::new(),
                    kargs: serde_json::Map::new(),
                },
            )
        }

        proptest! {
            #[test]
            fn delivery_order_matches_send_order(count in 0usize..12) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(async {
                    let mailbox = Mailbox::new();
                    let sent: Vec<Message> = (0..count).map(labeled_message).collect();
                    for message in &sent {
                        mailbox.put(message.clone()).await.unwrap();
                    }

                    let mut received = Vec::new();
                    for _ in 0..count {
                        received.push(mailbox.get(Duration::from_millis(50)).await.unwrap());
                    }
                    prop_assert_eq!(received, sent);
                    Ok(())
                })?;
            }

            #[test]
            fn status_is_monotone_once_closed(puts_before_close in 0usize..5) {
                let rt = tokio::runtime::Runtime::new().unwrap();
                rt.block_on(async {
                    let mailbox = Mailbox::new();
                    for n in 0..puts_before_close {
                        mailbox.put(labeled_message(n)).await.unwrap();
                    }
                    prop_assert!(!mailbox.closed().await);

                    mailbox.close().await;
                    prop_assert!(mailbox.closed().await);

                    // Draining whatever was queued never un-closes the mailbox,
                    // and every put attempted afterward still fails.
                    while mailbox.get(Duration::from_millis(10)).await.is_ok() {}
                    prop_assert!(mailbox.closed().await);
                    prop_assert_eq!(
                        mailbox.put(labeled_message(0)).await.unwrap_err(),
                        MailboxError::Closed
                    );
                    Ok(())
                })?;
            }
        }
    }
}
