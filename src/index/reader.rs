use crate::error::{IndexError, Result};
use crate::index::directory::IndexDirectory;
use crate::index::types::*;
use crate::utils::{decode_postings, read_u16_le, read_u32_le, read_u64_le};
use memmap2::Mmap;
use roaring::RoaringBitmap;
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

/// Token dictionary entry
struct TokenDictEntry {
    token: String,
    offset: u64,
    length: u32,
    doc_freq: u32,
}

/// Reader for a single segment
struct SegmentReader {
    generation: u64,
    documents: Vec<Document>,
    /// Sorted by token (written from a BTreeMap)
    dict: Vec<TokenDictEntry>,
    postings: Option<Mmap>,
    path: PathBuf,
}

impl SegmentReader {
    fn open(segment_path: &Path, generation: u64) -> Result<Self> {
        let docs_file = File::open(segment_path.join("docs.json"))?;
        let documents: Vec<Document> = serde_json::from_reader(BufReader::new(docs_file))
            .map_err(|e| IndexError::corrupt(segment_path, e.to_string()))?;

        let dict = read_token_dict(segment_path)?;

        let postings_file = File::open(segment_path.join("tokens.postings"))?;
        // mapping a zero-length file fails on some platforms
        let postings = if postings_file.metadata()?.len() > 0 {
            Some(unsafe { Mmap::map(&postings_file)? })
        } else {
            None
        };

        Ok(Self {
            generation,
            documents,
            dict,
            postings,
            path: segment_path.to_path_buf(),
        })
    }

    fn lookup(&self, token: &str) -> Option<&TokenDictEntry> {
        self.dict
            .binary_search_by(|e| e.token.as_str().cmp(token))
            .ok()
            .map(|i| &self.dict[i])
    }

    /// `(ordinal, term frequency)` pairs for a token
    fn postings(&self, token: &str) -> Result<Vec<(DocOrdinal, u32)>> {
        let (Some(entry), Some(postings)) = (self.lookup(token), self.postings.as_ref()) else {
            return Ok(Vec::new());
        };

        let start = entry.offset as usize;
        let end = start + entry.length as usize;
        if end > postings.len() {
            return Err(IndexError::corrupt(&self.path, format!("postings for '{}' out of range", token)));
        }
        let list = decode_postings(&postings[start..end])
            .ok_or_else(|| IndexError::corrupt(&self.path, format!("truncated postings for '{}'", token)))?;
        if list.len() != entry.doc_freq as usize {
            return Err(IndexError::corrupt(&self.path, format!("doc frequency mismatch for '{}'", token)));
        }
        Ok(list)
    }
}

fn read_token_dict(segment_path: &Path) -> Result<Vec<TokenDictEntry>> {
    let dict_path = segment_path.join("tokens.dict");
    let mut reader = BufReader::new(File::open(&dict_path)?);

    let count = read_u32_le(&mut reader)? as usize;
    let mut entries = Vec::with_capacity(count);

    for _ in 0..count {
        let len = read_u16_le(&mut reader)? as usize;
        let mut token_bytes = vec![0u8; len];
        reader.read_exact(&mut token_bytes)?;
        let token = String::from_utf8(token_bytes)
            .map_err(|_| IndexError::corrupt(&dict_path, "token is not UTF-8"))?;

        entries.push(TokenDictEntry {
            token,
            offset: read_u64_le(&mut reader)?,
            length: read_u32_le(&mut reader)?,
            doc_freq: read_u32_le(&mut reader)?,
        });
    }

    Ok(entries)
}

/// Read view over the committed state of one index directory.
///
/// When the same document id appears in several segments the newest copy
/// wins; copies in segments at or before a tombstone's generation are dead.
pub struct ShardReader {
    shard: ShardId,
    generation: u64,
    /// Oldest first
    segments: Vec<SegmentReader>,
    /// Live document id -> (segment index, ordinal)
    live: FxHashMap<String, (usize, DocOrdinal)>,
}

impl ShardReader {
    /// Open the committed state of `directory`; an uncommitted directory
    /// reads as empty.
    pub fn open(shard: ShardId, directory: &IndexDirectory) -> Result<Self> {
        let manifest = directory.read_manifest_or_default()?;

        let mut segments = Vec::with_capacity(manifest.segments.len());
        for info in &manifest.segments {
            let segment = SegmentReader::open(&directory.segment_path(info.generation), info.generation)?;
            if segment.documents.len() != info.doc_count as usize {
                return Err(IndexError::corrupt(
                    &segment.path,
                    format!("expected {} documents, found {}", info.doc_count, segment.documents.len()),
                ));
            }
            segments.push(segment);
        }

        let mut live = FxHashMap::default();
        for (seg_idx, segment) in segments.iter().enumerate().rev() {
            for (ordinal, doc) in segment.documents.iter().enumerate() {
                if live.contains_key(&doc.id) {
                    continue;
                }
                let deleted = manifest
                    .tombstones
                    .get(&doc.id)
                    .is_some_and(|&at| segment.generation <= at);
                if !deleted {
                    live.insert(doc.id.clone(), (seg_idx, ordinal as DocOrdinal));
                }
            }
        }

        Ok(Self {
            shard,
            generation: manifest.generation,
            segments,
            live,
        })
    }

    pub fn shard(&self) -> ShardId {
        self.shard
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn doc_count(&self) -> usize {
        self.live.len()
    }

    pub fn get(&self, id: &str) -> Option<&Document> {
        self.live
            .get(id)
            .map(|&(seg, ord)| &self.segments[seg].documents[ord as usize])
    }

    /// Live documents in no particular order
    pub fn documents(&self) -> impl Iterator<Item = &Document> + '_ {
        self.live
            .values()
            .map(|&(seg, ord)| &self.segments[seg].documents[ord as usize])
    }

    /// Documents containing every term; score is the summed term frequency
    pub fn search(&self, terms: &[String]) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        if terms.is_empty() {
            return Ok(hits);
        }

        for (seg_idx, segment) in self.segments.iter().enumerate() {
            let mut matching: Option<RoaringBitmap> = None;
            let mut scores: FxHashMap<DocOrdinal, u32> = FxHashMap::default();

            for term in terms {
                let postings = segment.postings(term)?;
                let bitmap: RoaringBitmap = postings.iter().map(|&(ord, _)| ord).collect();
                for (ord, freq) in postings {
                    *scores.entry(ord).or_insert(0) += freq;
                }
                matching = Some(match matching {
                    Some(acc) => acc & bitmap,
                    None => bitmap,
                });
                if matching.as_ref().is_some_and(|m| m.is_empty()) {
                    break;
                }
            }

            for ord in matching.unwrap_or_default() {
                let doc = segment.documents.get(ord as usize).ok_or_else(|| {
                    IndexError::corrupt(&segment.path, format!("posting references missing document {}", ord))
                })?;
                if self.live.get(&doc.id) != Some(&(seg_idx, ord)) {
                    continue;
                }
                hits.push(SearchHit {
                    id: doc.id.clone(),
                    path: doc.path.clone(),
                    shard: self.shard,
                    score: scores.get(&ord).copied().unwrap_or(0) as f32,
                });
            }
        }

        Ok(hits)
    }
}
