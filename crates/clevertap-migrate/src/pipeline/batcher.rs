//! Groups API records into upload batches.

use tokio::sync::mpsc;
use tracing::debug;

use super::cancel::Sink;
use crate::error::Result;
use crate::record::{ApiBatch, DestinationRecord, RecordKind};

/// Accumulates records until a batch is full.
///
/// Profiles and events are kept apart so every batch holds a single
/// [`RecordKind`].
#[derive(Debug)]
pub struct Batcher {
    batch_size: usize,
    profiles: Vec<DestinationRecord>,
    events: Vec<DestinationRecord>,
}

impl Batcher {
    /// Creates a batcher emitting batches of at most `batch_size` records.
    #[must_use]
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            profiles: Vec::new(),
            events: Vec::new(),
        }
    }

    fn pending_mut(&mut self, kind: RecordKind) -> &mut Vec<DestinationRecord> {
        match kind {
            RecordKind::Profile => &mut self.profiles,
            RecordKind::Event => &mut self.events,
        }
    }

    /// Adds a record, returning a full batch of its kind when one is ready.
    pub fn push(&mut self, record: DestinationRecord) -> Option<ApiBatch> {
        let batch_size = self.batch_size;
        let pending = self.pending_mut(record.kind);
        pending.push(record);
        if pending.len() >= batch_size {
            return Some(ApiBatch {
                records: std::mem::take(pending),
            });
        }
        None
    }

    /// Returns the partial batches, profiles first.
    pub fn flush(&mut self) -> Vec<ApiBatch> {
        [
            std::mem::take(&mut self.profiles),
            std::mem::take(&mut self.events),
        ]
        .into_iter()
        .filter(|records| !records.is_empty())
        .map(|records| ApiBatch { records })
        .collect()
    }
}

/// Batches records from `rx` into `sink` until `rx` closes.
///
/// # Errors
///
/// Returns [`crate::Error::Cancelled`] when the run is cancelled.
pub async fn run_batcher(
    mut rx: mpsc::Receiver<DestinationRecord>,
    batch_size: usize,
    sink: Sink<ApiBatch>,
) -> Result<()> {
    let mut batcher = Batcher::new(batch_size);
    while let Some(record) = rx.recv().await {
        if let Some(batch) = batcher.push(record) {
            sink.send(batch).await?;
        }
    }
    for batch in batcher.flush() {
        debug!(records = batch.len(), profile = batch.is_profile(), "Flushing partial batch");
        sink.send(batch).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::cancel::channel;
    use crate::record::Identity;
    use tokio_util::sync::CancellationToken;

    fn event(i: usize) -> DestinationRecord {
        DestinationRecord::event(Identity::Identity(format!("u{i}")), 1, "e".into(), None)
    }

    #[test]
    fn test_push_and_flush() {
        let mut batcher = Batcher::new(2);
        assert!(batcher.push(event(0)).is_none());
        let full = batcher.push(event(1)).unwrap();
        assert_eq!(full.len(), 2);
        assert!(batcher.flush().is_empty());

        batcher.push(event(2));
        assert_eq!(batcher.flush()[0].len(), 1);
    }

    fn profile(i: usize) -> DestinationRecord {
        DestinationRecord::profile(Identity::Identity(format!("u{i}")), 1, serde_json::Map::new())
    }

    fn kinds(batch: &ApiBatch) -> Vec<RecordKind> {
        batch.records.iter().map(|r| r.kind).collect()
    }

    #[test]
    fn test_interleaved_kinds_never_share_a_batch() {
        let mut batcher = Batcher::new(2);
        assert!(batcher.push(event(0)).is_none());
        assert!(batcher.push(profile(0)).is_none());
        assert!(batcher.push(event(1)).is_none());
        assert!(batcher.push(profile(1)).is_none());

        let events = batcher.push(event(2)).unwrap();
        assert_eq!(kinds(&events), vec![RecordKind::Event, RecordKind::Event]);
        assert!(!events.is_profile());

        let profiles = batcher.push(profile(2)).unwrap();
        assert_eq!(kinds(&profiles), vec![RecordKind::Profile, RecordKind::Profile]);
        assert!(profiles.is_profile());

        let rest = batcher.flush();
        assert_eq!(rest.len(), 2);
        assert_eq!(kinds(&rest[0]), vec![RecordKind::Profile]);
        assert_eq!(kinds(&rest[1]), vec![RecordKind::Event]);
        assert!(batcher.flush().is_empty());
    }

    #[tokio::test]
    async fn test_run_batcher_flushes_both_kinds() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);
        let (sink, mut out) = channel(16, &token);

        let task = tokio::spawn(run_batcher(rx, 10, sink));
        for i in 0..3 {
            tx.send(profile(i)).await.unwrap();
            tx.send(event(i)).await.unwrap();
        }
        drop(tx);
        task.await.unwrap().unwrap();

        let mut batches = Vec::new();
        while let Ok(batch) = out.try_recv() {
            batches.push(kinds(&batch));
        }
        assert_eq!(
            batches,
            vec![vec![RecordKind::Profile; 3], vec![RecordKind::Event; 3]]
        );
    }

    #[tokio::test]
    async fn test_run_batcher_bounds() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(16);
        let (sink, mut out) = channel(16, &token);

        let task = tokio::spawn(run_batcher(rx, 3, sink));
        for i in 0..7 {
            tx.send(event(i)).await.unwrap();
        }
        drop(tx);
        task.await.unwrap().unwrap();

        let mut sizes = Vec::new();
        while let Ok(batch) = out.try_recv() {
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![3, 3, 1]);
    }

    #[tokio::test]
    async fn test_empty_input_emits_nothing() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel::<DestinationRecord>(1);
        let (sink, mut out) = channel(1, &token);
        drop(tx);

        run_batcher(rx, 10, sink).await.unwrap();
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_batcher_stops() {
        let token = CancellationToken::new();
        let (tx, rx) = mpsc::channel(4);
        let (sink, _out) = channel(1, &token);

        tx.send(event(0)).await.unwrap();
        tx.send(event(1)).await.unwrap();
        let task = tokio::spawn(run_batcher(rx, 1, sink));
        token.cancel();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(crate::error::Error::Cancelled)));
    }
}
