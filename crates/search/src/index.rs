use models::{IntegrationId, Part};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tantivy::collector::Count;
use tantivy::query::TermQuery;
use tantivy::schema::{Field, IndexRecordOption, Schema, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, Term};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("search index operation failed: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("failed to open index directory: {0}")]
    Open(String),

    #[error("stored search document was not a valid part: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("scan of the primary store failed: {0}")]
    Scan(String),
}

const WRITER_HEAP: usize = 64 * 1024 * 1024;

pub(crate) struct Fields {
    pub integration_id: Field,
    pub key: Field,
    pub search_text: Field,
    pub brand: Field,
    pub supplier: Field,
    pub document: Field,
}

/// The search store. One document per Part; `integration_id` is a raw term
/// so a whole integration deletes with a single `delete_term`.
pub struct PartIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    pub(crate) fields: Fields,
    /// True while a bulk import suppresses per-batch commits.
    bulk: AtomicBool,
    /// Sticky "the index has documents" cache for the read contract.
    known_nonempty: AtomicBool,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let fields = Fields {
        integration_id: builder.add_text_field("integration_id", STRING | STORED),
        key: builder.add_text_field("key", STRING),
        search_text: builder.add_text_field("search_text", TEXT),
        brand: builder.add_text_field("brand", STRING),
        supplier: builder.add_text_field("supplier", STRING),
        document: builder.add_text_field("document", STORED),
    };
    (builder.build(), fields)
}

fn part_key(part: &Part) -> String {
    format!(
        "{}\u{1f}{}\u{1f}{}",
        part.integration_id, part.part_number, part.supplier
    )
}

impl PartIndex {
    /// Opens (or creates) the index under `dir`.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SearchError> {
        std::fs::create_dir_all(dir.as_ref())
            .map_err(|err| SearchError::Open(err.to_string()))?;
        let directory = tantivy::directory::MmapDirectory::open(dir.as_ref())
            .map_err(|err| SearchError::Open(err.to_string()))?;
        let (schema, fields) = build_schema();
        let index = Index::open_or_create(directory, schema)?;
        Self::from_index(index, fields)
    }

    fn from_index(index: Index, fields: Fields) -> Result<Self, SearchError> {
        let writer = index.writer(WRITER_HEAP)?;
        let reader = index.reader()?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            fields,
            bulk: AtomicBool::new(false),
            known_nonempty: AtomicBool::new(false),
        })
    }

    pub(crate) fn searcher(&self) -> tantivy::Searcher {
        self.reader.searcher()
    }

    /// Switch to throughput-friendly settings for a bulk import: batches
    /// stop committing (and refreshing readers) per call, and only become
    /// visible at `finalize`.
    pub fn prepare_for_bulk(&self) {
        self.bulk.store(true, Ordering::SeqCst);
        tracing::debug!("search index switched to bulk mode");
    }

    /// Commit everything indexed during the bulk window and restore
    /// per-batch commits.
    pub fn finalize(&self) -> Result<(), SearchError> {
        {
            let mut writer = self.writer.lock();
            writer.commit()?;
        }
        self.bulk.store(false, Ordering::SeqCst);
        self.reader.reload()?;
        tracing::debug!("search index finalized");
        Ok(())
    }

    /// Index one batch of parts, replacing any existing documents with the
    /// same key. Outside a bulk window the batch commits immediately.
    pub fn index_batch(&self, parts: &[Part]) -> Result<(), SearchError> {
        {
            let writer = self.writer.lock();
            for part in parts {
                let mut search_text = format!(
                    "{} {} {}",
                    part.part_number, part.description, part.brand
                );
                if let Some(category) = &part.category {
                    search_text.push(' ');
                    search_text.push_str(category);
                }
                writer.delete_term(Term::from_field_text(self.fields.key, &part_key(part)));
                writer.add_document(doc!(
                    self.fields.integration_id => part.integration_id.to_string(),
                    self.fields.key => part_key(part),
                    self.fields.search_text => search_text,
                    self.fields.brand => part.brand.to_lowercase(),
                    self.fields.supplier => part.supplier.to_lowercase(),
                    self.fields.document => serde_json::to_string(part)?,
                ))?;
            }
        }
        if !self.bulk.load(Ordering::SeqCst) {
            let mut writer = self.writer.lock();
            writer.commit()?;
            self.reader.reload()?;
        }
        Ok(())
    }

    /// Drops every document of one integration and commits.
    pub fn delete_by_integration(&self, id: IntegrationId) -> Result<(), SearchError> {
        {
            let mut writer = self.writer.lock();
            writer.delete_term(Term::from_field_text(
                self.fields.integration_id,
                &id.to_string(),
            ));
            writer.commit()?;
        }
        self.reader.reload()?;
        // The index may have just gone empty; drop the sticky cache.
        self.known_nonempty.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Whether the search store holds any documents at all. Positive
    /// answers are cached; the read contract uses this to pick between the
    /// search store and the primary-store fallback.
    pub fn has_documents(&self) -> bool {
        if self.known_nonempty.load(Ordering::SeqCst) {
            return true;
        }
        let nonempty = self.reader.searcher().num_docs() > 0;
        if nonempty {
            self.known_nonempty.store(true, Ordering::SeqCst);
        }
        nonempty
    }

    /// Number of documents mirrored for one integration.
    pub fn count_for_integration(&self, id: IntegrationId) -> Result<u64, SearchError> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(
            Term::from_field_text(self.fields.integration_id, &id.to_string()),
            IndexRecordOption::Basic,
        );
        let count = searcher.search(&query, &Count)?;
        Ok(count as u64)
    }
}
