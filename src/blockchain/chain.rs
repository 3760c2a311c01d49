//! File-backed chain: genesis balances plus an append-only JSON-lines block log.

use super::block::BlockRecord;
use super::state::{BlockLog, Ledger, LedgerError, LedgerSnapshot};
use super::transaction::Account;
use crate::utils::Hash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genesis {
    pub genesis_time: DateTime<Utc>,
    pub chain_id: String,
    pub balances: HashMap<Account, u64>,
}

impl Genesis {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Genesis, LedgerError> {
        let raw = fs::read(path)?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

pub struct FileLog {
    path: PathBuf,
    file: File,
}

impl FileLog {
    /// Opens the log for reading and appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<FileLog, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        Ok(FileLog { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Feeds every record to `visit` in file order until it returns `false`.
    /// The read cursor is back at the start afterwards.
    fn scan<F>(&mut self, mut visit: F) -> Result<(), LedgerError>
    where
        F: FnMut(BlockRecord) -> Result<bool, LedgerError>,
    {
        self.file.seek(SeekFrom::Start(0))?;
        let result = read_records(&self.file, &mut visit);
        self.file.seek(SeekFrom::Start(0))?;
        result
    }
}

fn read_records<F>(file: &File, visit: &mut F) -> Result<(), LedgerError>
where
    F: FnMut(BlockRecord) -> Result<bool, LedgerError>,
{
    let reader = BufReader::new(file);
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: BlockRecord =
            serde_json::from_str(&line).map_err(|source| LedgerError::CorruptLog {
                line: index + 1,
                source,
            })?;
        if !visit(record)? {
            break;
        }
    }
    Ok(())
}

/// A log sink that can be cut back to an earlier length.
trait Truncate: Write {
    fn truncate_to(&mut self, len: u64) -> io::Result<()>;
}

impl Truncate for File {
    fn truncate_to(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Writes one whole line or nothing: a failed write is cut back to `start`
/// so the log never ends in a fragment.
fn append_line<W: Truncate>(out: &mut W, start: u64, line: &[u8]) -> io::Result<()> {
    let written = out.write_all(line).and_then(|()| out.flush());
    if let Err(err) = written {
        if let Err(cut) = out.truncate_to(start) {
            warn!(error = %cut, len = start, "could not cut partial record from block log");
        }
        return Err(err);
    }
    Ok(())
}

impl BlockLog for FileLog {
    fn append(&mut self, record: &BlockRecord) -> Result<(), LedgerError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let start = self.file.metadata()?.len();
        append_line(&mut self.file, start, &line)?;
        Ok(())
    }

    fn records_after(&mut self, from: &Hash) -> Result<Vec<BlockRecord>, LedgerError> {
        let mut found = from.is_zero();
        let mut records = Vec::new();
        self.scan(|record| {
            if found {
                records.push(record);
            } else if record.hash == *from {
                found = true;
            }
            Ok(true)
        })?;
        debug!(from = %from, count = records.len(), "collected blocks after hash");
        Ok(records)
    }
}

/// The node's ledger, persisted to a block log file.
pub type FileState = Ledger<FileLog>;

impl Ledger<FileLog> {
    /// Rebuilds balances from genesis and replays the block log.
    ///
    /// Logged blocks are trusted history: their transactions are applied but
    /// chain linkage is not re-checked.
    pub fn load(
        genesis_path: impl AsRef<Path>,
        log_path: impl AsRef<Path>,
    ) -> Result<FileState, LedgerError> {
        let genesis = Genesis::from_file(genesis_path)?;
        info!(
            chain_id = %genesis.chain_id,
            genesis_time = %genesis.genesis_time,
            accounts = genesis.balances.len(),
            "genesis loaded"
        );

        let mut snapshot = LedgerSnapshot::new(genesis.balances);
        let mut log = FileLog::open(log_path)?;
        let mut replayed = 0usize;
        log.scan(|record| {
            snapshot.apply_txs(&record.block.transactions)?;
            snapshot.advance(record.hash, record.block.header.height);
            replayed += 1;
            Ok(true)
        })?;
        info!(
            path = %log.path().display(),
            blocks = replayed,
            height = snapshot.latest_height(),
            "block log replayed"
        );

        Ok(Ledger::from_parts(snapshot, log))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::{Block, Reason, State, Transaction};
    use tempfile::TempDir;

    const ALICE: &str = "0x1111111111111111111111111111111111111111";
    const BOB: &str = "0x2222222222222222222222222222222222222222";

    fn account(address: &str) -> Account {
        Account::new(address).unwrap()
    }

    fn setup() -> (TempDir, PathBuf, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let genesis = dir.path().join("genesis.json");
        fs::write(
            &genesis,
            format!(
                r#"{{"genesis_time":"2022-01-01T00:00:00Z","chain_id":"testnet","balances":{{"{ALICE}":1000}}}}"#
            ),
        )
        .unwrap();
        let log = dir.path().join("blocks.db");
        (dir, genesis, log)
    }

    fn transfer(value: u64, time: u64) -> Transaction {
        Transaction::new(account(ALICE), account(BOB), value, Reason::Other, time)
    }

    /// Accepts `room` more bytes, then fails every write.
    struct TornWriter {
        data: Vec<u8>,
        room: usize,
    }

    impl Write for TornWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.room == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = buf.len().min(self.room);
            self.data.extend_from_slice(&buf[..n]);
            self.room -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Truncate for TornWriter {
        fn truncate_to(&mut self, len: u64) -> io::Result<()> {
            self.data.truncate(len as usize);
            Ok(())
        }
    }

    #[test]
    fn test_failed_append_leaves_no_fragment() {
        let existing = b"{\"first\":1}\n".to_vec();
        let mut out = TornWriter {
            data: existing.clone(),
            room: 5,
        };
        let err = append_line(&mut out, existing.len() as u64, b"{\"second\":2}\n").unwrap_err();
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(out.data, existing);

        // The next line lands right after the last whole record.
        out.room = usize::MAX;
        append_line(&mut out, existing.len() as u64, b"{\"third\":3}\n").unwrap();
        assert_eq!(out.data, b"{\"first\":1}\n{\"third\":3}\n".to_vec());
    }

    #[test]
    fn test_log_with_cut_fragment_reloads() {
        let (_dir, genesis, log) = setup();
        let state = FileState::load(&genesis, &log).unwrap();
        state
            .add_block(&Block::new(Hash::ZERO, 1, 0, 10, vec![transfer(100, 1)]))
            .unwrap();
        let whole = fs::read(&log).unwrap();
        drop(state);

        let mut file = OpenOptions::new().append(true).open(&log).unwrap();
        file.write_all(b"{\"hash\":\"ab").unwrap();
        file.truncate_to(whole.len() as u64).unwrap();
        drop(file);

        assert_eq!(fs::read(&log).unwrap(), whole);
        let state = FileState::load(&genesis, &log).unwrap();
        assert_eq!(state.latest_block_height(), 1);
        assert_eq!(state.balances()[&account(BOB)], 100);
    }

    #[test]
    fn test_load_creates_empty_log() {
        let (_dir, genesis, log) = setup();
        let state = FileState::load(&genesis, &log).unwrap();
        assert!(log.exists());
        assert_eq!(state.latest_block_height(), 0);
        assert!(state.latest_block_hash().is_zero());
        assert_eq!(state.balances()[&account(ALICE)], 1000);
    }

    #[test]
    fn test_add_block_appends_one_record() {
        let (_dir, genesis, log) = setup();
        let state = FileState::load(&genesis, &log).unwrap();
        let block = Block::new(Hash::ZERO, 1, 42, 10, vec![transfer(100, 1)]);
        let hash = state.add_block(&block).unwrap();

        let contents = fs::read_to_string(&log).unwrap();
        assert_eq!(contents.lines().count(), 1);
        let record: BlockRecord = serde_json::from_str(contents.trim()).unwrap();
        assert_eq!(record.hash, hash);
        assert_eq!(record.block, block);
        assert_eq!(state.latest_block_height(), 1);
        assert_eq!(state.balances()[&account(BOB)], 100);
    }

    #[test]
    fn test_rejected_block_leaves_log_byte_identical() {
        let (_dir, genesis, log) = setup();
        let state = FileState::load(&genesis, &log).unwrap();
        state
            .add_block(&Block::new(Hash::ZERO, 1, 0, 10, vec![transfer(100, 1)]))
            .unwrap();
        let bytes_before = fs::read(&log).unwrap();
        let balances_before = state.balances();
        let tip_before = state.latest_block_hash();

        let wrong_height = Block::new(tip_before, 3, 0, 11, vec![transfer(1, 2)]);
        let wrong_parent = Block::new(Hash::ZERO, 2, 0, 11, vec![transfer(1, 2)]);
        let overdraft = Block::new(tip_before, 2, 0, 11, vec![transfer(5000, 2)]);
        assert!(matches!(
            state.add_block(&wrong_height),
            Err(LedgerError::NextBlockHeight { .. })
        ));
        assert!(matches!(
            state.add_block(&wrong_parent),
            Err(LedgerError::NextBlockHash { .. })
        ));
        assert!(matches!(
            state.add_block(&overdraft),
            Err(LedgerError::InsufficientBalance { .. })
        ));

        assert_eq!(fs::read(&log).unwrap(), bytes_before);
        assert_eq!(state.balances(), balances_before);
        assert_eq!(state.latest_block_hash(), tip_before);
        assert_eq!(state.latest_block_height(), 1);
    }

    #[test]
    fn test_reload_replays_log() {
        let (_dir, genesis, log) = setup();
        let tip = {
            let state = FileState::load(&genesis, &log).unwrap();
            let first = state
                .add_block(&Block::new(Hash::ZERO, 1, 0, 10, vec![transfer(100, 1)]))
                .unwrap();
            state
                .add_block(&Block::new(first, 2, 0, 11, vec![transfer(50, 2)]))
                .unwrap()
        };

        let reloaded = FileState::load(&genesis, &log).unwrap();
        assert_eq!(reloaded.latest_block_hash(), tip);
        assert_eq!(reloaded.latest_block_height(), 2);
        assert_eq!(reloaded.balances()[&account(ALICE)], 850);
        assert_eq!(reloaded.balances()[&account(BOB)], 150);
    }

    #[test]
    fn test_next_blocks_from_hash_scans_log() {
        let (_dir, genesis, log) = setup();
        let state = FileState::load(&genesis, &log).unwrap();
        let first = state
            .add_block(&Block::new(Hash::ZERO, 1, 0, 10, vec![transfer(1, 1)]))
            .unwrap();
        let second = state
            .add_block(&Block::new(first, 2, 0, 11, vec![transfer(2, 2)]))
            .unwrap();

        for _ in 0..2 {
            let all = state.next_blocks_from_hash(&Hash::ZERO).unwrap();
            assert_eq!(
                all.iter().map(|r| r.hash).collect::<Vec<_>>(),
                vec![first, second]
            );
        }
        let after_first = state.next_blocks_from_hash(&first).unwrap();
        assert_eq!(after_first.len(), 1);
        assert_eq!(after_first[0].block.header.height, 2);
        assert!(state.next_blocks_from_hash(&second).unwrap().is_empty());
    }

    #[test]
    fn test_persist_writes_pending_block() {
        let (_dir, genesis, log) = setup();
        let state = FileState::load(&genesis, &log).unwrap();
        state.add(transfer(10, 1)).unwrap();
        state.add(transfer(20, 2)).unwrap();
        let hash = state.persist().unwrap();

        let records = state.next_blocks_from_hash(&Hash::ZERO).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].hash, hash);
        assert_eq!(records[0].block.transactions.len(), 2);
        assert_eq!(records[0].block.header.parent, Hash::ZERO);

        let reloaded = FileState::load(&genesis, &log).unwrap();
        assert_eq!(reloaded.balances()[&account(BOB)], 30);
    }

    #[test]
    fn test_malformed_inputs_fail_load() {
        let (dir, genesis, log) = setup();
        fs::write(&log, "{\"hash\": \"nope\"}\n").unwrap();
        assert!(matches!(
            FileState::load(&genesis, &log),
            Err(LedgerError::CorruptLog { line: 1, .. })
        ));

        let bad_genesis = dir.path().join("bad.json");
        fs::write(
            &bad_genesis,
            r#"{"genesis_time":"2022-01-01T00:00:00Z","chain_id":"x","balances":{"andrej":1}}"#,
        )
        .unwrap();
        assert!(FileState::load(&bad_genesis, dir.path().join("other.db")).is_err());
        assert!(matches!(
            FileState::load(dir.path().join("missing.json"), &log),
            Err(LedgerError::Io(_))
        ));
    }
}
