use std::io::{self, Read, Seek, SeekFrom};
use std::time::Duration;

use crate::buffer::TransferBuffer;
use crate::engine::{
    Credentials, HttpTransport, Readiness, TransferRequest, Transport,
};
use crate::session::TransferSession;
use crate::{Result, StreamConfig, StreamError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    NotStarted,
    Running,
    Finished,
    /// No further progress is made, buffered bytes stay readable.
    Failed,
}

/// Pull-based reader over a remote resource.
///
/// Bytes are buffered on demand while the transfer progresses. Consumed
/// bytes may be evicted to make room, so seeking backwards only works
/// inside the window that is still buffered.
pub struct BufferedTransferStream {
    session: TransferSession,
    buffer: TransferBuffer,
    phase: Phase,
    wait_timeout: Duration,
}

impl BufferedTransferStream {
    /// Open `url` over HTTP(S) with the default configuration.
    pub fn open(url: &str, credentials: Option<Credentials>) -> Result<Self> {
        let request = TransferRequest::new(url)?.with_credentials(credentials);
        let transport = HttpTransport::global()?;
        Self::with_transport(&transport, &request, StreamConfig::default())
    }

    pub fn with_transport(
        transport: &dyn Transport,
        request: &TransferRequest,
        config: StreamConfig,
    ) -> Result<Self> {
        let session = TransferSession::begin(transport, request)?;
        let buffer =
            TransferBuffer::new(config.initial_capacity, config.max_capacity);
        Ok(Self {
            session,
            buffer,
            phase: Phase::NotStarted,
            wait_timeout: config.wait_timeout(),
        })
    }

    pub fn url(&self) -> &str {
        self.session.url()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Absolute position of the next byte to be read.
    pub fn position(&self) -> u64 {
        self.buffer.position()
    }

    /// Bytes readable without further network progress.
    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }

    fn pump(&mut self) {
        let buffer = &mut self.buffer;
        self.session.pump(&mut |bytes: &[u8]| buffer.append(bytes));
        if self.phase == Phase::Running && !self.session.is_running() {
            self.phase = Phase::Finished;
        }
    }

    /// Kick the transfer off if nothing has been requested yet.
    pub fn ensure_started(&mut self) -> Result<()> {
        if self.phase != Phase::NotStarted {
            return Ok(());
        }
        self.pump();
        if self.buffer.remaining() == 0 && !self.session.is_running() {
            return Err(self.exhausted());
        }
        self.phase = if self.session.is_running() {
            Phase::Running
        } else {
            Phase::Finished
        };
        Ok(())
    }

    fn exhausted(&mut self) -> StreamError {
        self.phase = Phase::Failed;
        let reason = self.session.failure().map(str::to_owned);
        log::warn!(
            "stream/{}: transfer ended before any data arrived",
            self.url()
        );
        StreamError::TransferExhausted {
            url: self.url().to_owned(),
            reason,
        }
    }

    /// Block until `want` unread bytes are buffered or the transfer ends.
    pub fn fill(&mut self, want: usize) -> Result<()> {
        self.ensure_started()?;
        if self.phase != Phase::Running || self.buffer.remaining() >= want {
            return Ok(());
        }

        let mut want = want;
        if self.buffer.free_space() < want {
            let evicted = self.buffer.evict();
            if evicted > 0 {
                log::trace!(
                    "stream/{}: evicted {} bytes, window starts at {}",
                    self.url(),
                    evicted,
                    self.buffer.file_offset()
                );
            }
        }
        if self.buffer.free_space() < want {
            want = self.buffer.grow_for(want);
        }

        while self.phase == Phase::Running && self.buffer.remaining() < want {
            match self.session.wait_readable(self.wait_timeout) {
                Readiness::Ready | Readiness::TimedOut => self.pump(),
                Readiness::Failed(error) => {
                    log::warn!(
                        "stream/{}: waiting for data failed: {}",
                        self.url(),
                        error
                    );
                    self.phase = Phase::Failed;
                    return Err(StreamError::TransferIo(error));
                }
            }
        }
        if self.phase == Phase::Finished && self.buffer.window_end() == 0 {
            return Err(self.exhausted());
        }
        Ok(())
    }

    /// Fill `dest` completely or fail with [`StreamError::ShortRead`],
    /// in which case nothing is consumed.
    pub fn read_exact(&mut self, dest: &mut [u8]) -> Result<()> {
        let wanted = dest.len();
        self.fill(wanted)?;
        let available = self.buffer.remaining();
        if available < wanted {
            return Err(StreamError::ShortRead { wanted, available });
        }
        self.buffer.take(dest);
        Ok(())
    }

    /// Read whatever is available up to `dest.len()` bytes.
    pub fn read_available(&mut self, dest: &mut [u8]) -> Result<usize> {
        self.fill(dest.len())?;
        Ok(self.buffer.take(dest))
    }

    pub fn is_eof(&self) -> bool {
        self.buffer.remaining() == 0
            && matches!(self.phase, Phase::Finished | Phase::Failed)
    }

    /// Move the cursor to `position`.
    ///
    /// Targets behind the retained window fail without side effects, as
    /// do targets past a length the server declared. When the length is
    /// only discovered while skipping, the failed seek leaves the cursor
    /// at the end of the stream.
    pub fn seek_absolute(&mut self, position: u64) -> Result<()> {
        self.seek_to(position)
    }

    pub fn seek_relative(&mut self, delta: i64) -> Result<()> {
        let position = self.buffer.position();
        match position.checked_add_signed(delta) {
            Some(target) => self.seek_to(target),
            None if delta < 0 => Err(StreamError::UnsupportedSeek {
                target: (position as i64).saturating_add(delta),
                window_start: self.buffer.file_offset(),
            }),
            None => Err(StreamError::SeekBeyondEnd {
                target: u64::MAX,
                end: self.buffer.window_end(),
            }),
        }
    }

    fn seek_to(&mut self, target: u64) -> Result<()> {
        let window_start = self.buffer.file_offset();
        if target < window_start {
            return Err(StreamError::UnsupportedSeek {
                target: target as i64,
                window_start,
            });
        }
        if target < self.buffer.window_end() {
            self.buffer.seek_within(target);
            return Ok(());
        }

        if let Some(end) = self.known_length() {
            if target > end {
                return Err(StreamError::SeekBeyondEnd { target, end });
            }
        }

        // Skip what is buffered, then refill half a buffer at a time. The
        // other half stays free for the overshoot of the last chunk, so
        // the buffer does not grow however far the target is.
        loop {
            let needed = target - self.buffer.position();
            if needed == 0 {
                return Ok(());
            }
            let needed = usize::try_from(needed).unwrap_or(usize::MAX);
            if self.buffer.skip(needed) > 0 {
                continue;
            }
            if matches!(self.phase, Phase::Finished | Phase::Failed) {
                return Err(StreamError::SeekBeyondEnd {
                    target,
                    end: self.buffer.window_end(),
                });
            }
            let half = (self.buffer.capacity() / 2).max(1);
            let step = needed.min(half);
            if self.buffer.free_space() < step + half {
                self.buffer.evict();
            }
            self.fill(step)?;
        }
    }

    /// Length of the resource if the session already knows it, without
    /// making progress on the transfer.
    fn known_length(&mut self) -> Option<u64> {
        if self.phase == Phase::NotStarted {
            return None;
        }
        self.session.content_length()
    }

    /// Total size of the resource, `None` while it is unknown.
    pub fn size(&mut self) -> Result<Option<u64>> {
        if self.phase == Phase::NotStarted {
            self.fill(1)?;
        }
        Ok(self.session.content_length())
    }

    pub fn response_code(&mut self) -> Result<u32> {
        if self.phase == Phase::NotStarted {
            self.fill(1)?;
        }
        Ok(self.session.response_code())
    }

    pub fn effective_url(&mut self) -> Result<String> {
        if self.phase == Phase::NotStarted {
            self.fill(1)?;
        }
        Ok(self.session.effective_url())
    }
}

impl Read for BufferedTransferStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_available(buf)?)
    }
}

impl Seek for BufferedTransferStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Start(position) => self.seek_absolute(position)?,
            SeekFrom::Current(delta) => self.seek_relative(delta)?,
            SeekFrom::End(delta) => {
                let size = self.size()?.ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::Unsupported,
                        "size of the stream is unknown",
                    )
                })?;
                let target = size.checked_add_signed(delta).ok_or_else(|| {
                    io::Error::new(
                        io::ErrorKind::InvalidInput,
                        "seek before the start of the stream",
                    )
                })?;
                self.seek_absolute(target)?
            }
        }
        Ok(self.position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{MemoryTransfer, MemoryTransport};

    fn body(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn open(transfer: MemoryTransfer, config: StreamConfig) -> BufferedTransferStream {
        let _ = env_logger::builder().is_test(true).try_init();
        let transport = MemoryTransport::new(transfer);
        let request =
            TransferRequest::new("http://example.com/archive.zip").unwrap();
        BufferedTransferStream::with_transport(&transport, &request, config)
            .unwrap()
    }

    fn small_buffer(initial_capacity: usize) -> StreamConfig {
        StreamConfig {
            initial_capacity,
            ..StreamConfig::default()
        }
    }

    #[test]
    fn ten_byte_resource_in_one_read() {
        let mut stream = open(MemoryTransfer::new(body(10)), StreamConfig::default());
        assert!(!stream.is_eof());

        let mut dest = [0u8; 10];
        stream.read_exact(&mut dest).unwrap();
        assert_eq!(dest.to_vec(), body(10));
        assert!(stream.is_eof());
    }

    #[test]
    fn larger_than_buffer_in_hundred_byte_chunks() {
        let mut stream = open(
            MemoryTransfer::new(body(5000)).chunk_size(100),
            StreamConfig::default(),
        );
        let mut read = Vec::new();
        let mut dest = [0u8; 100];
        while !stream.is_eof() {
            stream.read_exact(&mut dest).unwrap();
            read.extend_from_slice(&dest);
            stream.buffer.assert_invariants();
        }

        assert_eq!(read.len(), 5000);
        assert_eq!(read, body(5000));
        assert_eq!(stream.buffer.capacity(), 2048);
        assert_eq!(stream.buffer.file_offset(), 4000);
    }

    #[test]
    fn backward_seek_into_evicted_data_fails() {
        let mut stream = open(
            MemoryTransfer::new(body(5000)).chunk_size(100),
            small_buffer(256),
        );
        let mut dest = [0u8; 100];
        for _ in 0..10 {
            stream.read_exact(&mut dest).unwrap();
        }
        assert!(stream.buffer.file_offset() > 0);
        let window_start = stream.buffer.file_offset();

        let result = stream.seek_absolute(0);
        assert!(matches!(
            result,
            Err(StreamError::UnsupportedSeek { target: 0, window_start: w })
                if w == window_start
        ));
        assert_eq!(stream.position(), 1000);
        assert_eq!(stream.buffer.file_offset(), window_start);

        let error = stream.seek(SeekFrom::Start(0)).unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::Unsupported);

        stream.read_exact(&mut dest).unwrap();
        assert_eq!(dest.to_vec(), body(5000)[1000..1100].to_vec());
    }

    #[test]
    fn seeking_inside_the_window_needs_no_io() {
        let mut stream = open(
            MemoryTransfer::new(body(5000)).chunk_size(1000),
            StreamConfig::default(),
        );
        let mut dest = [0u8; 10];
        stream.read_exact(&mut dest).unwrap();
        let buffered = stream.buffer.buffered();

        stream.seek_absolute(500).unwrap();
        stream.seek_relative(-200).unwrap();
        assert_eq!(stream.position(), 300);
        assert_eq!(stream.buffer.buffered(), buffered);

        stream.read_exact(&mut dest).unwrap();
        assert_eq!(dest.to_vec(), body(5000)[300..310].to_vec());
    }

    #[test]
    fn forward_seek_beyond_the_buffer() {
        let data = body(5000);
        let mut stream = open(
            MemoryTransfer::new(data.clone()).chunk_size(100),
            StreamConfig::default(),
        );
        stream.seek_absolute(3000).unwrap();
        assert_eq!(stream.position(), 3000);

        let mut dest = [0u8; 10];
        stream.read_exact(&mut dest).unwrap();
        assert_eq!(dest.to_vec(), data[3000..3010].to_vec());
    }

    #[test]
    fn forward_seek_with_capped_buffer_discards_and_refills() {
        let data = body(5000);
        let config = StreamConfig {
            initial_capacity: 128,
            max_capacity: Some(256),
            ..StreamConfig::default()
        };
        let mut stream =
            open(MemoryTransfer::new(data.clone()).chunk_size(100), config);

        stream.seek_absolute(4000).unwrap();
        let mut dest = [0u8; 100];
        stream.read_exact(&mut dest).unwrap();
        assert_eq!(dest.to_vec(), data[4000..4100].to_vec());
        assert!(stream.buffer.capacity() <= 256);
        stream.buffer.assert_invariants();
    }

    #[test]
    fn seek_past_the_end_fails() {
        let mut stream = open(
            MemoryTransfer::new(body(5000)).chunk_size(700),
            StreamConfig::default(),
        );
        let result = stream.seek_absolute(6000);
        assert!(matches!(
            result,
            Err(StreamError::SeekBeyondEnd { target: 6000, end: 5000 })
        ));

        stream.seek_absolute(5000).unwrap();
        assert!(stream.is_eof());
    }

    #[test]
    fn seek_past_a_declared_length_keeps_the_cursor() {
        let mut stream = open(
            MemoryTransfer::new(body(5000))
                .chunk_size(100)
                .declare_length(),
            StreamConfig::default(),
        );
        let mut dest = [0u8; 10];
        stream.read_exact(&mut dest).unwrap();
        let window_end = stream.buffer.window_end();

        assert!(matches!(
            stream.seek_absolute(6000),
            Err(StreamError::SeekBeyondEnd { target: 6000, end: 5000 })
        ));
        assert_eq!(stream.position(), 10);
        assert_eq!(stream.buffer.file_offset(), 0);
        assert_eq!(stream.buffer.window_end(), window_end);

        stream.read_exact(&mut dest).unwrap();
        assert_eq!(dest.to_vec(), body(5000)[10..20].to_vec());
    }

    #[test]
    fn long_forward_seek_does_not_grow_the_buffer() {
        let data = body(2_000_000);
        let mut stream = open(
            MemoryTransfer::new(data.clone()).chunk_size(100),
            StreamConfig::default(),
        );
        stream.seek_absolute(1_500_000).unwrap();
        assert_eq!(stream.position(), 1_500_000);
        assert_eq!(stream.buffer.capacity(), 2048);

        let mut dest = [0u8; 100];
        stream.read_exact(&mut dest).unwrap();
        assert_eq!(dest.to_vec(), data[1_500_000..1_500_100].to_vec());
        assert_eq!(stream.buffer.capacity(), 2048);
        stream.buffer.assert_invariants();
    }

    #[test]
    fn capped_growth_gives_short_reads_instead_of_failing() {
        let config = StreamConfig {
            initial_capacity: 64,
            max_capacity: Some(128),
            ..StreamConfig::default()
        };
        let mut stream =
            open(MemoryTransfer::new(body(1000)).chunk_size(50), config);

        let mut dest = [0u8; 500];
        let count = stream.read_available(&mut dest).unwrap();
        assert_eq!(count, 128);
        assert_eq!(dest[..count].to_vec(), body(1000)[..128].to_vec());

        let result = stream.read_exact(&mut dest);
        assert!(matches!(
            result,
            Err(StreamError::ShortRead { wanted: 500, available: 128 })
        ));
    }

    #[test]
    fn short_read_consumes_nothing() {
        let mut stream = open(MemoryTransfer::new(body(10)), StreamConfig::default());
        let mut too_big = [0u8; 20];
        assert!(matches!(
            stream.read_exact(&mut too_big),
            Err(StreamError::ShortRead { wanted: 20, available: 10 })
        ));

        let mut dest = [0u8; 10];
        stream.read_exact(&mut dest).unwrap();
        assert_eq!(dest.to_vec(), body(10));
    }

    #[test]
    fn size_is_declared_before_the_body_arrives() {
        let mut stream = open(
            MemoryTransfer::new(body(5000))
                .chunk_size(100)
                .declare_length(),
            StreamConfig::default(),
        );
        assert_eq!(stream.size().unwrap(), Some(5000));
        assert_eq!(stream.size().unwrap(), Some(5000));
        assert!(stream.buffer.buffered() < 5000);
        assert_eq!(stream.position(), 0);
    }

    #[test]
    fn size_is_known_once_the_transfer_finished() {
        let mut stream = open(
            MemoryTransfer::new(body(300)).chunk_size(100),
            StreamConfig::default(),
        );
        assert_eq!(stream.size().unwrap(), None);
        assert_eq!(stream.size().unwrap(), None);

        let mut all = Vec::new();
        stream.read_to_end(&mut all).unwrap();
        assert_eq!(all, body(300));
        assert_eq!(stream.size().unwrap(), Some(300));
    }

    #[test]
    fn wait_failure_is_a_transfer_io_error() {
        let mut stream = open(
            MemoryTransfer::new(body(5000))
                .chunk_size(100)
                .fail_wait_after(2),
            StreamConfig::default(),
        );
        let mut dest = [0u8; 1000];
        assert!(matches!(
            stream.read_exact(&mut dest),
            Err(StreamError::TransferIo(_))
        ));
        assert_eq!(stream.phase(), Phase::Failed);

        assert_eq!(stream.read_available(&mut dest).unwrap(), 300);
        assert!(stream.is_eof());
        assert!(matches!(
            stream.read_exact(&mut dest[..1]),
            Err(StreamError::ShortRead { .. })
        ));
    }

    #[test]
    fn timeouts_keep_the_transfer_alive() {
        let mut stream = open(
            MemoryTransfer::new(body(300)).chunk_size(100).timeouts(3),
            StreamConfig::default(),
        );
        let mut dest = [0u8; 300];
        stream.read_exact(&mut dest).unwrap();
        assert_eq!(dest.to_vec(), body(300));
    }

    #[test]
    fn empty_transfer_is_exhausted() {
        let mut stream =
            open(MemoryTransfer::new(Vec::new()), StreamConfig::default());
        let mut dest = [0u8; 1];
        assert!(matches!(
            stream.read_exact(&mut dest),
            Err(StreamError::TransferExhausted { .. })
        ));
        assert_eq!(stream.phase(), Phase::Failed);
        assert_eq!(stream.read_available(&mut dest).unwrap(), 0);
        assert!(stream.is_eof());
    }

    #[test]
    fn eof_stays_eof() {
        let mut stream = open(MemoryTransfer::new(body(10)), StreamConfig::default());
        let mut dest = [0u8; 16];
        assert_eq!(stream.read_available(&mut dest).unwrap(), 10);
        assert!(stream.is_eof());
        for _ in 0..3 {
            assert_eq!(stream.read_available(&mut dest).unwrap(), 0);
            assert!(stream.is_eof());
        }
    }

    #[test]
    fn metadata_forces_the_transfer_to_start() {
        let mut stream = open(
            MemoryTransfer::new(body(10))
                .response_code(200)
                .effective_url("https://cdn.example.com/archive.zip"),
            StreamConfig::default(),
        );
        assert_eq!(stream.phase(), Phase::NotStarted);
        assert_eq!(stream.response_code().unwrap(), 200);
        assert_ne!(stream.phase(), Phase::NotStarted);
        assert_eq!(
            stream.effective_url().unwrap(),
            "https://cdn.example.com/archive.zip"
        );
    }

    #[test]
    fn dropping_mid_transfer_releases_the_session() {
        let transport =
            MemoryTransport::new(MemoryTransfer::new(body(5000)).chunk_size(100));
        let request =
            TransferRequest::new("http://example.com/archive.zip").unwrap();
        let mut stream = BufferedTransferStream::with_transport(
            &transport,
            &request,
            StreamConfig::default(),
        )
        .unwrap();
        let mut dest = [0u8; 250];
        stream.read_exact(&mut dest).unwrap();
        assert_eq!(stream.phase(), Phase::Running);

        drop(stream);
        assert_eq!(transport.close_count(), 1);
    }

    #[test]
    fn std_io_seek_from_end() {
        let data = body(1000);
        let mut stream = open(
            MemoryTransfer::new(data.clone())
                .chunk_size(100)
                .declare_length(),
            StreamConfig::default(),
        );
        assert_eq!(stream.seek(SeekFrom::End(-10)).unwrap(), 990);
        let mut tail = Vec::new();
        stream.read_to_end(&mut tail).unwrap();
        assert_eq!(tail, data[990..].to_vec());

        assert_eq!(stream.seek(SeekFrom::Start(0)).unwrap(), 0);
        let mut head = [0u8; 10];
        Read::read_exact(&mut stream, &mut head).unwrap();
        assert_eq!(head.to_vec(), data[..10].to_vec());
    }

    #[test]
    fn reads_match_the_transferred_bytes() {
        for seed in 0..16 {
            let mut rng = fastrand::Rng::with_seed(seed);
            let len = rng.usize(1..20_000);
            let data: Vec<u8> = (0..len).map(|_| rng.u8(..)).collect();
            let config = small_buffer(rng.usize(1..4096));
            let mut stream = open(
                MemoryTransfer::new(data.clone()).chunk_size(rng.usize(1..3000)),
                config,
            );

            let mut read = Vec::with_capacity(len);
            let mut last_window_start = 0;
            while read.len() < len {
                let size = rng.usize(1..1500).min(len - read.len());
                let mut dest = vec![0u8; size];
                stream.read_exact(&mut dest).unwrap();
                read.extend_from_slice(&dest);

                stream.buffer.assert_invariants();
                assert!(stream.buffer.file_offset() >= last_window_start);
                last_window_start = stream.buffer.file_offset();
                assert_eq!(stream.position(), read.len() as u64);
            }
            assert_eq!(read, data, "seed {seed}");
            assert!(stream.is_eof());
        }
    }
}
