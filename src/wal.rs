use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::store::StoreEvent;

const MAGIC: [u8; 4] = *b"BKLN";
const VERSION: u16 = 1;
/// Magic, version, two reserved bytes.
const HEADER_LEN: usize = 8;
/// Record length plus checksum.
const FRAME_LEN: usize = 8;

fn header() -> [u8; HEADER_LEN] {
    let mut h = [0u8; HEADER_LEN];
    h[..4].copy_from_slice(&MAGIC);
    h[4..6].copy_from_slice(&VERSION.to_le_bytes());
    h
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Frame one event as `[u32 len][u32 crc][bincode]`. The checksum covers the
/// length bytes as well as the payload, so a damaged length is caught too.
fn frame(event: &StoreEvent) -> io::Result<Vec<u8>> {
    let payload = bincode::serialize(event).map_err(|e| invalid(e.to_string()))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| invalid(format!("record of {} bytes", payload.len())))?
        .to_le_bytes();
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&len);
    hasher.update(&payload);

    let mut out = Vec::with_capacity(FRAME_LEN + payload.len());
    out.extend_from_slice(&len);
    out.extend_from_slice(&hasher.finalize().to_le_bytes());
    out.extend_from_slice(&payload);
    Ok(out)
}

/// Why replay stopped before the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailFault {
    /// The last record was cut short, typically a crash mid-append.
    Truncated,
    Checksum,
    /// The checksum held but the record is not a known event.
    Undecodable,
}

impl fmt::Display for TailFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TailFault::Truncated => "truncated record",
            TailFault::Checksum => "checksum mismatch",
            TailFault::Undecodable => "undecodable record",
        })
    }
}

/// Bytes dropped from the end of the journal during recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TailDamage {
    /// Where the first bad record started.
    pub offset: u64,
    pub discarded: u64,
    pub fault: TailFault,
}

/// What recovery found on disk.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<StoreEvent>,
    pub damage: Option<TailDamage>,
}

/// Walk the records after the header. Stops at the first bad record; the
/// journal is append-only, so nothing after it can be trusted.
fn parse(bytes: &[u8]) -> io::Result<Replay> {
    if bytes.len() < HEADER_LEN || bytes[..4] != MAGIC {
        return Err(invalid("not a bookline journal".into()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != VERSION {
        return Err(invalid(format!("unsupported journal version {version}")));
    }

    let mut replay = Replay::default();
    let mut pos = HEADER_LEN;
    while pos < bytes.len() {
        let fault = match next_record(&bytes[pos..]) {
            Ok((event, used)) => {
                replay.events.push(event);
                pos += used;
                continue;
            }
            Err(fault) => fault,
        };
        replay.damage = Some(TailDamage {
            offset: pos as u64,
            discarded: (bytes.len() - pos) as u64,
            fault,
        });
        break;
    }
    Ok(replay)
}

fn next_record(buf: &[u8]) -> Result<(StoreEvent, usize), TailFault> {
    if buf.len() < FRAME_LEN {
        return Err(TailFault::Truncated);
    }
    let len_bytes = &buf[..4];
    let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let crc = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let end = FRAME_LEN
        .checked_add(len)
        .filter(|end| *end <= buf.len())
        .ok_or(TailFault::Truncated)?;
    let payload = &buf[FRAME_LEN..end];

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(len_bytes);
    hasher.update(payload);
    if hasher.finalize() != crc {
        return Err(TailFault::Checksum);
    }
    let event = bincode::deserialize(payload).map_err(|_| TailFault::Undecodable)?;
    Ok((event, end))
}

/// Append-only journal of store writes.
///
/// The file starts with an 8-byte header (`BKLN`, u16 version, reserved)
/// followed by `[u32 len][u32 crc32][bincode StoreEvent]` records.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open the journal at `path`, creating it if needed, and return what it
    /// holds. A damaged tail is cut off so later appends land right after the
    /// last good record; an unknown header is an error and nothing is touched.
    pub fn recover(path: &Path) -> io::Result<(Self, Replay)> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };

        let replay = if bytes.is_empty() {
            let mut file = File::create(path)?;
            file.write_all(&header())?;
            file.sync_all()?;
            Replay::default()
        } else {
            let replay = parse(&bytes)?;
            if let Some(damage) = replay.damage {
                let file = OpenOptions::new().write(true).open(path)?;
                file.set_len(damage.offset)?;
                file.sync_all()?;
            }
            replay
        };

        let file = OpenOptions::new().append(true).open(path)?;
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((wal, replay))
    }

    /// Append one event and fsync before returning.
    pub fn append(&mut self, event: &StoreEvent) -> io::Result<()> {
        self.writer.write_all(&frame(event)?)?;
        self.appends_since_compact += 1;
        self.flush_sync()
    }

    fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replace the journal with `events`: write a temp file, fsync, rename
    /// over the live file and reopen for appends.
    pub fn compact(&mut self, events: &[StoreEvent]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            writer.write_all(&header())?;
            for event in events {
                writer.write_all(&frame(event)?)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }
}
