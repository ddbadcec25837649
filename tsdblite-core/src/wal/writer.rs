//! Group-commit WAL writer

use super::{list_segments, segment_path, WalConfig, WalRecord};
use crate::{Result, TsdbError};
use bytes::BytesMut;
use crossbeam_channel::{select, tick, Receiver, Sender};
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::thread::{self, JoinHandle};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::oneshot;
use tokio::task;
use tracing::{debug, error, info};

type Ack = oneshot::Sender<Result<()>>;

enum WalMessage {
    Append { record: WalRecord, ack: Ack },
    Shutdown,
}

/// Completion signal for one submitted record.
///
/// Resolves once the sync covering the record has finished, or with
/// `TsdbError::Durability` if it could not be made durable.
#[derive(Debug)]
pub struct Commit {
    rx: oneshot::Receiver<Result<()>>,
}

impl Commit {
    /// Block until the record is durable.
    ///
    /// On a multi-threaded tokio runtime the worker is handed off with
    /// `block_in_place` while waiting. A current-thread runtime cannot
    /// block, so the call fails with `TsdbError::Config`; use
    /// [`Commit::wait_async`] there.
    pub fn wait(self) -> Result<()> {
        let rx = self.rx;
        let received = match Handle::try_current() {
            Ok(_) => {
                ensure_can_block()?;
                task::block_in_place(|| rx.blocking_recv())
            }
            Err(_) => rx.blocking_recv(),
        };
        received.unwrap_or_else(|_| Err(stopped()))
    }

    /// Wait asynchronously until the record is durable
    pub async fn wait_async(self) -> Result<()> {
        self.rx.await.unwrap_or_else(|_| Err(stopped()))
    }
}

/// Fails on a runtime whose worker cannot be handed off for a blocking wait
pub(crate) fn ensure_can_block() -> Result<()> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() != RuntimeFlavor::MultiThread => Err(
            TsdbError::Config(
                "cannot block on the write-ahead log from a current-thread runtime; \
                 use the async variant"
                    .into(),
            ),
        ),
        _ => Ok(()),
    }
}

fn stopped() -> TsdbError {
    TsdbError::Durability("write-ahead log stopped before the record was committed".into())
}

/// Handle to the WAL writer thread
pub struct WalWriter {
    tx: Sender<WalMessage>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WalWriter {
    /// Open a fresh segment in `config.dir` and start the writer thread.
    ///
    /// Existing segments are never appended to, so a torn tail left by a
    /// crash stays at the end of its own file.
    pub fn open(config: WalConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;

        let segment_id = list_segments(&config.dir)?
            .last()
            .map(|(id, _)| id + 1)
            .unwrap_or(0);
        let segment = Segment::open(&config, segment_id)?;

        let writer = Self::start(GroupCommitLog::new(config, segment))?;
        info!("WAL writer started on segment {}", segment_id);
        Ok(writer)
    }

    fn start(mut log: GroupCommitLog) -> Result<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let handle = thread::Builder::new()
            .name("tsdb-wal".into())
            .spawn(move || log.run(rx))?;

        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Writer whose segment rejects every write
    #[cfg(test)]
    pub(crate) fn open_read_only(config: WalConfig) -> Result<Self> {
        fs::create_dir_all(&config.dir)?;
        let segment = Segment::read_only(&config, 0)?;
        Self::start(GroupCommitLog::new(config, segment))
    }

    /// Queue a record. The returned [`Commit`] resolves after the record is
    /// synced.
    pub fn submit(&self, record: WalRecord) -> Result<Commit> {
        let (ack, rx) = oneshot::channel();
        self.tx
            .send(WalMessage::Append { record, ack })
            .map_err(|_| stopped())?;
        Ok(Commit { rx })
    }

    /// Commit everything queued so far and stop the writer thread.
    /// Later submissions fail with `TsdbError::Durability`.
    pub fn close(&self) {
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = self.tx.send(WalMessage::Shutdown);
            if handle.join().is_err() {
                error!("WAL writer thread panicked");
            }
        }
    }
}

impl Drop for WalWriter {
    fn drop(&mut self) {
        self.close();
    }
}

/// Current segment file
struct Segment {
    id: u64,
    file: File,
    bytes_written: usize,
}

impl Segment {
    fn open(config: &WalConfig, id: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(segment_path(&config.dir, id))?;
        let bytes_written = file.metadata()?.len() as usize;
        Ok(Self {
            id,
            file,
            bytes_written,
        })
    }

    #[cfg(test)]
    fn read_only(config: &WalConfig, id: u64) -> Result<Self> {
        let path = segment_path(&config.dir, id);
        File::create(&path)?;
        Ok(Self {
            id,
            file: File::open(&path)?,
            bytes_written: 0,
        })
    }
}

/// State owned by the writer thread
struct GroupCommitLog {
    config: WalConfig,
    segment: Segment,
    buffer: BytesMut,
    pending: Vec<Ack>,
    /// Set after the first write or sync error; the log refuses all later
    /// records since earlier bytes may have been lost
    failure: Option<String>,
}

impl GroupCommitLog {
    fn new(config: WalConfig, segment: Segment) -> Self {
        Self {
            buffer: BytesMut::with_capacity(config.buffer_threshold),
            pending: Vec::new(),
            config,
            segment,
            failure: None,
        }
    }

    fn run(&mut self, rx: Receiver<WalMessage>) {
        let ticker = tick(self.config.flush_interval);
        loop {
            select! {
                recv(rx) -> msg => match msg {
                    Ok(WalMessage::Append { record, ack }) => self.push(record, ack),
                    Ok(WalMessage::Shutdown) | Err(_) => break,
                },
                recv(ticker) -> _ => self.commit(),
            }
        }

        // anything queued before shutdown still gets committed
        while let Ok(msg) = rx.try_recv() {
            if let WalMessage::Append { record, ack } = msg {
                self.push(record, ack);
            }
        }
        self.commit();
        debug!("WAL writer stopped on segment {}", self.segment.id);
    }

    fn push(&mut self, record: WalRecord, ack: Ack) {
        if let Some(reason) = &self.failure {
            let _ = ack.send(Err(TsdbError::Durability(reason.clone())));
            return;
        }
        if let Err(e) = record.encode_into(&mut self.buffer) {
            let _ = ack.send(Err(e));
            return;
        }
        self.pending.push(ack);

        if self.buffer.len() >= self.config.buffer_threshold {
            if let Err(e) = self.write_buffer() {
                self.fail(e);
            }
        }
    }

    /// Write pending bytes, sync, then release every waiting request
    fn commit(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        match self.write_buffer().and_then(|_| self.sync()) {
            Ok(()) => {
                for ack in self.pending.drain(..) {
                    let _ = ack.send(Ok(()));
                }
            }
            Err(e) => self.fail(e),
        }
    }

    fn write_buffer(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        if self.segment.bytes_written > 0
            && self.segment.bytes_written + self.buffer.len() > self.config.segment_size
        {
            self.rotate()?;
        }
        self.segment.file.write_all(&self.buffer)?;
        self.segment.bytes_written += self.buffer.len();
        self.buffer.clear();
        Ok(())
    }

    fn sync(&mut self) -> Result<()> {
        self.segment.file.sync_data()?;
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        // bytes already in the old segment belong to pending requests
        self.sync()?;
        let next = self.segment.id + 1;
        self.segment = Segment::open(&self.config, next)?;
        debug!("Rotated WAL to segment {}", next);
        Ok(())
    }

    fn fail(&mut self, e: TsdbError) {
        let reason = e.to_string();
        error!("WAL write failed, refusing further records: {}", reason);
        for ack in self.pending.drain(..) {
            let _ = ack.send(Err(TsdbError::Durability(reason.clone())));
        }
        self.buffer.clear();
        self.failure = Some(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::WalReader;
    use crate::Point;
    use std::thread;
    use std::time::{Duration, Instant};
    use tempfile::TempDir;
    use tokio::sync::oneshot::error::TryRecvError;

    fn config(dir: &TempDir) -> WalConfig {
        WalConfig {
            dir: dir.path().to_path_buf(),
            flush_interval: Duration::from_millis(5),
            ..Default::default()
        }
    }

    fn log_len(dir: &TempDir) -> u64 {
        list_segments(dir.path())
            .unwrap()
            .iter()
            .map(|(_, path)| fs::metadata(path).unwrap().len())
            .sum()
    }

    #[test]
    fn test_commit_resolves_after_sync() {
        let dir = TempDir::new().unwrap();
        let writer = WalWriter::open(config(&dir)).unwrap();

        let commit = writer
            .submit(WalRecord::append_point("cpu", Point::new(1, 1.0)))
            .unwrap();
        commit.wait().unwrap();

        // the acknowledged bytes are already in the file
        assert!(log_len(&dir) > 0);
    }

    #[test]
    fn test_commit_withheld_until_sync() {
        let dir = TempDir::new().unwrap();
        let cfg = WalConfig {
            flush_interval: Duration::from_secs(3600),
            ..config(&dir)
        };
        let writer = WalWriter::open(cfg).unwrap();

        let mut commit = writer
            .submit(WalRecord::append_point("cpu", Point::new(1, 1.0)))
            .unwrap();
        thread::sleep(Duration::from_millis(50));

        // buffered but not synced: nobody is acknowledged yet
        assert!(matches!(commit.rx.try_recv(), Err(TryRecvError::Empty)));
        assert_eq!(log_len(&dir), 0);

        writer.close();
        commit.wait().unwrap();
        assert!(log_len(&dir) > 0);
    }

    #[test]
    fn test_write_failure_fails_pending_and_later_records() {
        let dir = TempDir::new().unwrap();
        let cfg = config(&dir);
        let segment = Segment::read_only(&cfg, 0).unwrap();
        let mut log = GroupCommitLog::new(cfg, segment);

        let (first_ack, mut first) = oneshot::channel();
        let (second_ack, mut second) = oneshot::channel();
        log.push(WalRecord::append_point("cpu", Point::new(1, 1.0)), first_ack);
        log.push(WalRecord::append_point("cpu", Point::new(2, 2.0)), second_ack);
        log.commit();

        assert!(matches!(first.try_recv(), Ok(Err(TsdbError::Durability(_)))));
        assert!(matches!(second.try_recv(), Ok(Err(TsdbError::Durability(_)))));
        assert!(log.failure.is_some());

        // the log stays failed
        let (third_ack, mut third) = oneshot::channel();
        log.push(WalRecord::append_point("cpu", Point::new(3, 3.0)), third_ack);
        assert!(matches!(third.try_recv(), Ok(Err(TsdbError::Durability(_)))));
        assert!(log.pending.is_empty());
    }

    #[test]
    fn test_read_only_writer_reports_durability() {
        let dir = TempDir::new().unwrap();
        let writer = WalWriter::open_read_only(config(&dir)).unwrap();

        for i in 0..2 {
            let result = writer
                .submit(WalRecord::append_point("cpu", Point::new(i, 0.0)))
                .and_then(Commit::wait);
            assert!(matches!(result, Err(TsdbError::Durability(_))));
        }
    }

    #[test]
    fn test_group_commit_batches_concurrent_submits() {
        let dir = TempDir::new().unwrap();
        let cfg = WalConfig {
            flush_interval: Duration::from_millis(50),
            ..config(&dir)
        };
        let writer = WalWriter::open(cfg.clone()).unwrap();

        let start = Instant::now();
        let commits: Vec<Commit> = (0..100)
            .map(|i| {
                writer
                    .submit(WalRecord::append_point("cpu", Point::new(i, i as f64)))
                    .unwrap()
            })
            .collect();
        for commit in commits {
            commit.wait().unwrap();
        }
        // one or two ticks, not one per record
        assert!(start.elapsed() < Duration::from_secs(2));

        writer.close();
        let records = WalReader::new(cfg).recover().unwrap();
        assert_eq!(records.len(), 100);
    }

    #[test]
    fn test_close_commits_queued_records() {
        let dir = TempDir::new().unwrap();
        let cfg = WalConfig {
            flush_interval: Duration::from_secs(3600),
            ..config(&dir)
        };
        let writer = WalWriter::open(cfg.clone()).unwrap();

        let commit = writer
            .submit(WalRecord::append_point("cpu", Point::new(7, 7.0)))
            .unwrap();
        writer.close();
        commit.wait().unwrap();

        let late = writer
            .submit(WalRecord::append_point("cpu", Point::new(8, 8.0)))
            .and_then(Commit::wait);
        assert!(matches!(late, Err(TsdbError::Durability(_))));

        let records = WalReader::new(cfg).recover().unwrap();
        assert_eq!(records, vec![WalRecord::append_point("cpu", Point::new(7, 7.0))]);
    }

    #[test]
    fn test_reopen_starts_new_segment() {
        let dir = TempDir::new().unwrap();
        {
            let writer = WalWriter::open(config(&dir)).unwrap();
            writer
                .submit(WalRecord::append_point("cpu", Point::new(1, 1.0)))
                .unwrap()
                .wait()
                .unwrap();
        }
        let _writer = WalWriter::open(config(&dir)).unwrap();

        let ids: Vec<u64> = list_segments(dir.path())
            .unwrap()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec![0, 1]);
    }

    #[test]
    fn test_segment_rotation() {
        let dir = TempDir::new().unwrap();
        let cfg = WalConfig {
            buffer_threshold: 64,
            segment_size: 256,
            ..config(&dir)
        };
        let writer = WalWriter::open(cfg.clone()).unwrap();

        let commits: Vec<Commit> = (0..200)
            .map(|i| {
                writer
                    .submit(WalRecord::append_point("cpu{host=a}", Point::new(i, 0.5)))
                    .unwrap()
            })
            .collect();
        for commit in commits {
            commit.wait().unwrap();
        }
        writer.close();

        assert!(list_segments(dir.path()).unwrap().len() > 1);
        let records = WalReader::new(cfg).recover().unwrap();
        let timestamps: Vec<i64> = records
            .iter()
            .map(|r| match r {
                WalRecord::AppendPoint { point, .. } => point.timestamp,
                other => panic!("unexpected record {:?}", other),
            })
            .collect();
        assert_eq!(timestamps, (0..200).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_wait_async() {
        let dir = TempDir::new().unwrap();
        let writer = WalWriter::open(config(&dir)).unwrap();

        writer
            .submit(WalRecord::create_series("cpu", &crate::Tags::new()))
            .unwrap()
            .wait_async()
            .await
            .unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocking_wait_on_multi_thread_runtime() {
        let dir = TempDir::new().unwrap();
        let writer = WalWriter::open(config(&dir)).unwrap();

        writer
            .submit(WalRecord::append_point("cpu", Point::new(1, 1.0)))
            .unwrap()
            .wait()
            .unwrap();
    }

    #[tokio::test]
    async fn test_blocking_wait_on_current_thread_runtime_is_refused() {
        let dir = TempDir::new().unwrap();
        let writer = WalWriter::open(config(&dir)).unwrap();

        let commit = writer
            .submit(WalRecord::append_point("cpu", Point::new(1, 1.0)))
            .unwrap();
        assert!(matches!(commit.wait(), Err(TsdbError::Config(_))));
    }
}
