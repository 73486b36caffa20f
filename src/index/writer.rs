use crate::error::Result;
use crate::index::directory::{IndexDirectory, now_millis};
use crate::index::types::*;
use crate::utils::{encode_postings, term_frequencies, write_u16_le, write_u32_le, write_u64_le};
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

/// A document with its terms extracted (computed in parallel during rebuilds)
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    pub document: Document,
    pub terms: Vec<(String, u32)>,
}

/// Tokenize a document's content
pub fn process_document(document: Document) -> ProcessedDocument {
    let mut terms: Vec<_> = term_frequencies(&document.content).into_iter().collect();
    terms.sort_unstable();
    ProcessedDocument { document, terms }
}

/// Buffers adds and deletes for one index directory and writes them out as
/// a new segment plus a new commit point.
pub struct SegmentWriter {
    directory: IndexDirectory,
    manifest: SegmentsManifest,
    buffered: Vec<ProcessedDocument>,
    positions: FxHashMap<String, usize>,
    deletions: BTreeSet<String>,
}

impl SegmentWriter {
    /// Open a writer that appends to whatever is committed in `directory`
    pub fn open(directory: IndexDirectory) -> Result<Self> {
        directory.ensure_exists()?;
        let manifest = directory.read_manifest_or_default()?;
        // leftovers of a commit that never reached its manifest
        let orphans = directory.remove_unreferenced(&manifest)?;
        if orphans > 0 {
            log::debug!(
                "removed {} unreferenced segments from {}",
                orphans,
                directory.path().display()
            );
        }
        Ok(Self::with_manifest(directory, manifest))
    }

    /// Open a writer over an emptied `directory`
    pub fn create(directory: IndexDirectory) -> Result<Self> {
        directory.ensure_exists()?;
        directory.clear()?;
        Ok(Self::with_manifest(directory, SegmentsManifest::default()))
    }

    fn with_manifest(directory: IndexDirectory, manifest: SegmentsManifest) -> Self {
        Self {
            directory,
            manifest,
            buffered: Vec::new(),
            positions: FxHashMap::default(),
            deletions: BTreeSet::new(),
        }
    }

    pub fn directory(&self) -> &IndexDirectory {
        &self.directory
    }

    /// Generation of the last commit this writer knows about
    pub fn generation(&self) -> u64 {
        self.manifest.generation
    }

    /// Buffer a document; a later add with the same id replaces it
    pub fn add(&mut self, document: ProcessedDocument) {
        let id = document.document.id.clone();
        self.deletions.remove(&id);
        match self.positions.get(&id) {
            Some(&pos) => self.buffered[pos] = document,
            None => {
                self.positions.insert(id, self.buffered.len());
                self.buffered.push(document);
            }
        }
    }

    /// Buffer a delete for committed copies of `id` and drop any buffered one
    pub fn delete(&mut self, id: &str) {
        if let Some(pos) = self.positions.remove(id) {
            self.buffered.swap_remove(pos);
            if let Some(moved) = self.buffered.get(pos) {
                self.positions.insert(moved.document.id.clone(), pos);
            }
        }
        self.deletions.insert(id.to_string());
    }

    /// Number of buffered operations
    pub fn pending(&self) -> usize {
        self.buffered.len() + self.deletions.len()
    }

    /// Discard everything buffered since the last commit
    pub fn rollback(&mut self) {
        self.buffered.clear();
        self.positions.clear();
        self.deletions.clear();
    }

    /// Write buffered operations. Returns false when there was nothing to write.
    pub fn commit(&mut self) -> Result<bool> {
        if self.pending() == 0 {
            return Ok(false);
        }

        let generation = self.manifest.generation + 1;
        let mut manifest = self.manifest.clone();

        if !self.buffered.is_empty() {
            write_segment(&self.directory.segment_path(generation), &self.buffered)?;
            manifest.segments.push(SegmentInfo {
                generation,
                doc_count: self.buffered.len() as u32,
            });
            for processed in &self.buffered {
                manifest.tombstones.remove(&processed.document.id);
            }
        }

        for id in &self.deletions {
            manifest.tombstones.insert(id.clone(), generation);
        }

        let now = now_millis();
        if manifest.created_at == 0 {
            manifest.created_at = now;
        }
        manifest.generation = generation;
        manifest.last_modified = now;

        self.directory.write_manifest(&manifest)?;
        log::trace!(
            "committed generation {} to {} ({} docs, {} deletes)",
            generation,
            self.directory.path().display(),
            self.buffered.len(),
            self.deletions.len()
        );

        self.manifest = manifest;
        self.rollback();
        Ok(true)
    }

    /// Like [`commit`](Self::commit), but writes a fresh commit point even
    /// when nothing is buffered so the directory's timestamp moves forward.
    pub fn commit_point(&mut self) -> Result<()> {
        if self.commit()? {
            return Ok(());
        }

        let now = now_millis();
        let mut manifest = self.manifest.clone();
        if manifest.created_at == 0 {
            manifest.created_at = now;
        }
        manifest.generation += 1;
        manifest.last_modified = now;

        self.directory.write_manifest(&manifest)?;
        self.manifest = manifest;
        Ok(())
    }
}

/// Write one segment: stored documents, token dictionary and postings
fn write_segment(segment_path: &Path, documents: &[ProcessedDocument]) -> Result<()> {
    fs::create_dir_all(segment_path)?;

    let stored: Vec<&Document> = documents.iter().map(|p| &p.document).collect();
    let mut docs_file = BufWriter::new(File::create(segment_path.join("docs.json"))?);
    serde_json::to_writer(&mut docs_file, &stored)?;
    docs_file.flush()?;

    // Ordinals are visited in ascending order, so each postings list is sorted
    let mut postings: BTreeMap<&str, Vec<(DocOrdinal, u32)>> = BTreeMap::new();
    for (ordinal, processed) in documents.iter().enumerate() {
        for (term, freq) in &processed.terms {
            postings
                .entry(term.as_str())
                .or_default()
                .push((ordinal as DocOrdinal, *freq));
        }
    }

    let mut dict_file = BufWriter::new(File::create(segment_path.join("tokens.dict"))?);
    let mut postings_file = BufWriter::new(File::create(segment_path.join("tokens.postings"))?);

    write_u32_le(&mut dict_file, postings.len() as u32)?;

    let mut offset: u64 = 0;
    let mut encoded = Vec::new();
    for (term, list) in &postings {
        encoded.clear();
        encode_postings(list, &mut encoded);

        let term_bytes = term.as_bytes();
        write_u16_le(&mut dict_file, term_bytes.len() as u16)?;
        dict_file.write_all(term_bytes)?;
        write_u64_le(&mut dict_file, offset)?;
        write_u32_le(&mut dict_file, encoded.len() as u32)?;
        write_u32_le(&mut dict_file, list.len() as u32)?;

        postings_file.write_all(&encoded)?;
        offset += encoded.len() as u64;
    }

    dict_file.flush()?;
    postings_file.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, content: &str) -> ProcessedDocument {
        process_document(Document::new(id, content))
    }

    #[test]
    fn test_commit_writes_segment_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let directory = IndexDirectory::new(dir.path());
        let mut writer = SegmentWriter::create(directory.clone()).unwrap();

        assert!(!writer.commit().unwrap());
        writer.add(doc("a", "alpha beta"));
        writer.add(doc("b", "beta gamma"));
        assert!(writer.commit().unwrap());

        let manifest = directory.read_manifest().unwrap();
        assert_eq!(manifest.generation, 1);
        assert_eq!(manifest.segments, vec![SegmentInfo { generation: 1, doc_count: 2 }]);
        assert!(directory.segment_path(1).join("tokens.dict").exists());
        assert!(manifest.last_modified > 0);
    }

    #[test]
    fn test_re_add_replaces_buffered_copy() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SegmentWriter::create(IndexDirectory::new(dir.path())).unwrap();
        writer.add(doc("a", "one"));
        writer.add(doc("b", "two"));
        writer.add(doc("a", "three"));
        assert_eq!(writer.pending(), 2);
    }

    #[test]
    fn test_delete_drops_buffered_and_records_tombstone() {
        let dir = tempfile::tempdir().unwrap();
        let directory = IndexDirectory::new(dir.path());
        let mut writer = SegmentWriter::create(directory.clone()).unwrap();
        writer.add(doc("a", "one"));
        writer.add(doc("b", "two"));
        writer.add(doc("c", "three"));
        writer.delete("a");
        writer.add(doc("a", "four"));
        writer.delete("b");
        writer.commit().unwrap();

        let manifest = directory.read_manifest().unwrap();
        assert_eq!(manifest.segments[0].doc_count, 2);
        assert_eq!(manifest.tombstones.get("b"), Some(&1));
        assert!(!manifest.tombstones.contains_key("a"));
    }

    #[test]
    fn test_commit_point_stamps_empty_directory() {
        let dir = tempfile::tempdir().unwrap();
        let directory = IndexDirectory::new(dir.path());
        let mut writer = SegmentWriter::create(directory.clone()).unwrap();
        assert!(directory.last_modified().unwrap_err().is_no_segments());

        writer.commit_point().unwrap();
        let manifest = directory.read_manifest().unwrap();
        assert_eq!(manifest.generation, 1);
        assert!(manifest.segments.is_empty());
        assert!(manifest.last_modified > 0);
    }

    #[test]
    fn test_open_removes_orphaned_segments() {
        let dir = tempfile::tempdir().unwrap();
        let directory = IndexDirectory::new(dir.path());
        let mut writer = SegmentWriter::create(directory.clone()).unwrap();
        writer.add(doc("a", "one"));
        writer.commit().unwrap();

        fs::create_dir_all(directory.segment_path(2)).unwrap();
        let writer = SegmentWriter::open(directory.clone()).unwrap();

        assert_eq!(writer.generation(), 1);
        assert!(directory.segment_path(1).exists());
        assert!(!directory.segment_path(2).exists());
    }
}
