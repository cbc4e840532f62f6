// SPDX-License-Identifier: Apache-2.0

//! Small wrapper over a bounded flume channel.
//!
//! The pipeline thread is not async while the forwarder is, so both sides
//! need blocking, non-blocking and async variants of send and receive.

use flume::{Receiver, Sender};
use std::fmt;
use std::time::Duration;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}

#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError {
    Full,
    Disconnected,
}

impl fmt::Display for TrySendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full => write!(f, "channel full"),
            TrySendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl<T> BoundedSender<T> {
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        self.tx
            .send_async(item)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    /// Blocks until there is capacity in the channel. For non-async callers.
    pub fn send_blocking(&self, item: T) -> Result<(), SendError> {
        self.tx.send(item).map_err(|_| SendError::Disconnected)
    }

    /// Never blocks. A full channel hands back `TrySendError::Full`.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError> {
        self.tx.try_send(item).map_err(|e| match e {
            flume::TrySendError::Full(_) => TrySendError::Full,
            flume::TrySendError::Disconnected(_) => TrySendError::Disconnected,
        })
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Resolves to None once every sender is gone
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Returns None if nothing is queued or the channel is disconnected
    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<T> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Everything currently queued, without waiting
    pub fn drain(&self) -> Vec<T> {
        self.rx.drain().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{SendError, TrySendError, bounded};
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn receiver_wakes_on_send() {
        let (tx, mut rx) = bounded(3);

        let mut send1 = spawn(async { tx.send(10).await });
        let mut recv1 = spawn(async { rx.next().await });

        assert_pending!(recv1.poll());
        assert_ok!(assert_ready!(send1.poll()));
        assert!(recv1.is_woken());
        assert_eq!(Some(10), assert_ready!(recv1.poll()));

        drop(send1);
        drop(recv1);

        let mut recv2 = spawn(async { rx.next().await });
        drop(tx);
        assert_eq!(None, assert_ready!(recv2.poll()));
    }

    #[tokio::test]
    async fn async_send_waits_for_capacity() {
        let (tx, mut rx) = bounded(1);

        let mut send1 = spawn(async { tx.send(1).await });
        assert_ok!(assert_ready!(send1.poll()));
        drop(send1);

        let mut send2 = spawn(async { tx.send(2).await });
        assert_pending!(send2.poll());

        let mut recv1 = spawn(async { rx.next().await });
        assert_eq!(Some(1), assert_ready!(recv1.poll()));
        assert_ok!(assert_ready!(send2.poll()));
    }

    #[test]
    fn try_send_reports_full_and_disconnected() {
        let (tx, rx) = bounded(1);

        assert_eq!(Ok(()), tx.try_send(1));
        assert_eq!(Err(TrySendError::Full), tx.try_send(2));
        assert_eq!(vec![1], rx.drain());
        assert!(rx.try_recv().is_none());

        drop(rx);
        assert_eq!(Err(TrySendError::Disconnected), tx.try_send(3));
        assert_eq!(Err(SendError::Disconnected), tx.send_blocking(4));
    }
}
