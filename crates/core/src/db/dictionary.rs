//! The persistent term dictionary.
//!
//! Inline-encodable terms (small integers, decimals, millisecond UTC
//! dateTimes, booleans) never touch storage. Everything else is interned:
//! `id2str` maps the id to the canonical term bytes, `str2id` maps the
//! canonical bytes back, and both rows plus the advanced sequence counter
//! commit in one atomic batch with the triple that introduced the term.
//!
//! Sequence counters are strictly monotonic. The authoritative copy lives
//! in the KV store (reserved key 2 of `id2str`); a secondary copy sits in a
//! `counters.json` file next to the store for disaster recovery. When both
//! are lost, the counters are rebuilt from the maximum existing id per tag
//! plus a safety margin, so a restart can never re-issue a used id.

use crate::kv::{BatchOp, ColumnFamily, KvStore};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use triad_model::canonical::{decode_term, encode_term};
use triad_model::id::{IdTag, PAYLOAD_MASK};
use triad_model::{inline, Result, StoreError, Term, TermId};

/// Reserved `id2str` key carrying the statistics blob.
pub const STATS_KEY: u64 = 1;
/// Reserved `id2str` key carrying the sequence-counter blob.
pub const COUNTERS_KEY: u64 = 2;
/// First sequence number handed out for any interned tag; payloads below
/// this are reserved for meta keys like the two above.
pub const SEQUENCE_FLOOR: u64 = 16;
/// Ids skipped per tag when counters are rebuilt without their
/// authoritative copy.
pub const SAFETY_MARGIN: u64 = 1024;

pub fn reserved_key(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    /// Next unissued sequence number, indexed by interned tag.
    pub next: [u64; 4],
}

impl Default for CounterState {
    fn default() -> Self {
        Self {
            next: [SEQUENCE_FLOOR; 4],
        }
    }
}

pub struct Dictionary {
    kv: Arc<dyn KvStore>,
    alloc: Mutex<CounterState>,
    counter_file: Option<PathBuf>,
}

impl Dictionary {
    pub fn open(kv: Arc<dyn KvStore>, counter_file: Option<PathBuf>) -> Result<Self> {
        let counters = load_counters(kv.as_ref(), counter_file.as_deref())?;
        Ok(Self {
            kv,
            alloc: Mutex::new(counters),
            counter_file,
        })
    }

    /// Read-only lookup. Inline-encodable terms resolve without storage.
    pub fn lookup(&self, term: &Term) -> Result<Option<TermId>> {
        if let Some(id) = inline::inline_id(term) {
            return Ok(Some(id));
        }
        let canonical = encode_term(term);
        self.lookup_canonical(&canonical)
    }

    fn lookup_canonical(&self, canonical: &[u8]) -> Result<Option<TermId>> {
        match self.kv.get(ColumnFamily::Str2Id, canonical)? {
            Some(raw) => Ok(Some(decode_id_value(&raw)?)),
            None => Ok(None),
        }
    }

    /// The id of a term that must already be known.
    pub fn encode(&self, term: &Term) -> Result<TermId> {
        self.lookup(term)?.ok_or_else(|| {
            StoreError::InvalidInput(format!("term {term} is not in the dictionary"))
        })
    }

    /// Insert-if-absent, committing the dictionary rows on its own.
    pub fn encode_new(&self, term: &Term) -> Result<TermId> {
        let mut batch = self.batch();
        let id = batch.encode_new(term)?;
        let ops = batch.finish();
        if !ops.is_empty() {
            self.kv.write_batch(ops, false)?;
        }
        Ok(id)
    }

    /// Start staging dictionary writes into a caller-owned batch, so they
    /// commit jointly with the index keys that reference them.
    pub fn batch(&self) -> DictBatch<'_> {
        DictBatch {
            dict: self,
            ops: Vec::new(),
            pending: FxHashMap::default(),
            allocated: false,
        }
    }

    pub fn decode(&self, id: TermId) -> Result<Term> {
        if let Some(term) = inline::decode_inline(id) {
            return Ok(term);
        }
        match self.kv.get(ColumnFamily::Id2Str, &id.to_be_bytes())? {
            Some(canonical) => decode_term(&canonical),
            None => Err(StoreError::DictionaryMissing { id: id.as_u64() }),
        }
    }

    /// Allocate the next id for `tag`. The in-memory counter advances even
    /// if the surrounding batch is later discarded; burning ids keeps the
    /// monotonicity invariant without coordination.
    fn allocate(&self, tag: IdTag) -> Result<TermId> {
        let mut counters = self.alloc.lock();
        let slot = &mut counters.next[tag as usize];
        if *slot > PAYLOAD_MASK {
            return Err(StoreError::CounterExhausted { tag: tag as u8 });
        }
        let id = TermId::from_parts(tag, *slot);
        *slot += 1;
        Ok(id)
    }

    /// Write the secondary counter file. Called on flush and close; a
    /// failure here only degrades disaster recovery, so it logs instead of
    /// propagating.
    pub fn persist_counter_file(&self) {
        let Some(path) = &self.counter_file else {
            return;
        };
        let counters = *self.alloc.lock();
        match serde_json::to_vec(&counters) {
            Ok(bytes) => {
                if let Err(e) = std::fs::write(path, bytes) {
                    log::warn!("failed to write counter file {}: {e}", path.display());
                }
            }
            Err(e) => log::warn!("failed to serialize counters: {e}"),
        }
    }

    pub fn counters(&self) -> CounterState {
        *self.alloc.lock()
    }
}

/// Staged dictionary encoding. Every new term adds its two rows to `ops`;
/// `finish` appends the counter blob once and hands the operations back
/// for a joint commit.
pub struct DictBatch<'a> {
    dict: &'a Dictionary,
    ops: Vec<BatchOp>,
    /// Terms allocated in this batch but not yet visible in `str2id`.
    pending: FxHashMap<Vec<u8>, TermId>,
    allocated: bool,
}

impl<'a> DictBatch<'a> {
    pub fn encode_new(&mut self, term: &Term) -> Result<TermId> {
        self.encode_prepared(&prepare_term(term))
    }

    /// The staged operations, with the advanced counter state appended when
    /// anything was allocated.
    pub fn finish(mut self) -> Vec<BatchOp> {
        if self.allocated {
            let counters = self.dict.counters();
            let blob = serde_json::to_vec(&counters).expect("counter state serializes");
            self.ops.push(BatchOp::put(
                ColumnFamily::Id2Str,
                reserved_key(COUNTERS_KEY).to_vec(),
                blob,
            ));
        }
        self.ops
    }

    pub fn has_allocations(&self) -> bool {
        self.allocated
    }
}

/// A term with its CPU-bound encoding work already done. The loader
/// prepares these on a worker pool; the serial writer stage then only
/// probes and allocates.
#[derive(Debug, Clone)]
pub enum EncodedTerm {
    Inline(TermId),
    Interned { canonical: Vec<u8>, tag: IdTag },
}

/// Canonicalize a term off the writer thread.
pub fn prepare_term(term: &Term) -> EncodedTerm {
    match inline::inline_id(term) {
        Some(id) => EncodedTerm::Inline(id),
        None => EncodedTerm::Interned {
            canonical: encode_term(term),
            tag: interned_tag(term),
        },
    }
}

impl<'a> DictBatch<'a> {
    /// Stage a pre-canonicalized term.
    pub fn encode_prepared(&mut self, encoded: &EncodedTerm) -> Result<TermId> {
        let (canonical, tag) = match encoded {
            EncodedTerm::Inline(id) => return Ok(*id),
            EncodedTerm::Interned { canonical, tag } => (canonical, *tag),
        };
        if let Some(id) = self.pending.get(canonical) {
            return Ok(*id);
        }
        if let Some(id) = self.dict.lookup_canonical(canonical)? {
            return Ok(id);
        }
        let id = self.dict.allocate(tag)?;
        self.ops.push(BatchOp::put(
            ColumnFamily::Id2Str,
            id.to_be_bytes().to_vec(),
            canonical.clone(),
        ));
        self.ops.push(BatchOp::put(
            ColumnFamily::Str2Id,
            canonical.clone(),
            id.to_be_bytes().to_vec(),
        ));
        self.pending.insert(canonical.clone(), id);
        self.allocated = true;
        Ok(id)
    }
}

pub(crate) fn interned_tag(term: &Term) -> IdTag {
    match term {
        Term::NamedNode(_) => IdTag::Iri,
        Term::BlankNode(_) => IdTag::BlankNode,
        Term::Literal(l) if l.is_simple() => IdTag::SimpleLiteral,
        Term::Literal(_) => IdTag::TypedLiteral,
    }
}

fn decode_id_value(raw: &[u8]) -> Result<TermId> {
    let bytes: [u8; 8] = raw.try_into().map_err(|_| StoreError::CorruptionDetected {
        context: "str2id".into(),
        detail: format!("id value of length {}", raw.len()),
    })?;
    Ok(TermId::from_be_bytes(bytes))
}

/// Counter recovery. The KV blob is authoritative (it commits atomically
/// with every allocation); without it, take the best of the secondary file
/// and a full scan of existing ids, plus the safety margin.
fn load_counters(kv: &dyn KvStore, file: Option<&Path>) -> Result<CounterState> {
    if let Some(blob) = kv.get(ColumnFamily::Id2Str, &reserved_key(COUNTERS_KEY))? {
        let counters: CounterState =
            serde_json::from_slice(&blob).map_err(|e| StoreError::CorruptionDetected {
                context: "counter blob".into(),
                detail: e.to_string(),
            })?;
        return Ok(counters);
    }

    let from_file: Option<CounterState> = file
        .and_then(|p| std::fs::read(p).ok())
        .and_then(|bytes| serde_json::from_slice(&bytes).ok());
    let scanned = scan_max_ids(kv)?;

    let mut counters = CounterState::default();
    for tag in 0..4 {
        let rebuilt = scanned[tag]
            .map(|max| max + 1 + SAFETY_MARGIN)
            .unwrap_or(SEQUENCE_FLOOR);
        let filed = from_file.map(|c| c.next[tag]).unwrap_or(SEQUENCE_FLOOR);
        counters.next[tag] = rebuilt.max(filed).max(SEQUENCE_FLOOR);
    }
    if scanned.iter().any(Option::is_some) || from_file.is_some() {
        log::warn!(
            "sequence counter blob missing; rebuilt counters {:?} from file/scan",
            counters.next
        );
    }
    Ok(counters)
}

/// Highest issued sequence number per interned tag, skipping reserved
/// meta keys.
fn scan_max_ids(kv: &dyn KvStore) -> Result<[Option<u64>; 4]> {
    let mut max: [Option<u64>; 4] = [None; 4];
    for entry in kv.prefix_iter(ColumnFamily::Id2Str, &[])? {
        let (key, _) = entry?;
        let Ok(bytes) = <[u8; 8]>::try_from(key.as_slice()) else {
            continue;
        };
        let id = TermId::from_be_bytes(bytes);
        if id.is_inline() {
            continue;
        }
        let payload = id.payload();
        if payload < SEQUENCE_FLOOR {
            continue;
        }
        let slot = &mut max[id.tag() as usize];
        *slot = Some(slot.map_or(payload, |m| m.max(payload)));
    }
    Ok(max)
}
