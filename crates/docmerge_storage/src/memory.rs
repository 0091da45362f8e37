//! In-memory document backend for testing.

use crate::backend::{DocRef, DocStream, DocumentBackend, StreamQuery};
use crate::error::{StorageError, StorageResult};
use crate::header::{Header, HeaderPatch, TableContext, TableCounters};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

/// An in-memory document backend.
///
/// This backend keeps every partition in memory and is suitable for:
/// - Unit and integration tests
/// - Simulations driven from the CLI
///
/// # Thread Safety
///
/// All state sits behind one `RwLock`; the backend can be shared across
/// threads.
///
/// # Example
///
/// ```rust
/// use docmerge_storage::{DocumentBackend, Header, InMemoryBackend, TableContext};
///
/// let backend = InMemoryBackend::new();
/// let ctx = TableContext::new("topic", "table");
/// backend.prepare_table(&ctx).unwrap();
///
/// let (doc_ref, _) = backend
///     .add_document(&ctx, Header::for_table(&ctx), b"blob".to_vec())
///     .unwrap();
/// assert_eq!(backend.get_blob(&ctx, doc_ref).unwrap(), b"blob");
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    tables: RwLock<HashMap<TableContext, TableState>>,
    next_ref: AtomicU64,
    writes: AtomicU64,
}

#[derive(Debug, Default)]
struct TableState {
    documents: HashMap<DocRef, StoredDocument>,
    /// (sort_key, ref); refs grow monotonically so ties keep creation order.
    ordered: BTreeSet<(String, DocRef)>,
    merge_keys: HashMap<String, DocRef>,
    table_header: Option<DocRef>,
}

#[derive(Debug, Clone)]
struct StoredDocument {
    header: Header,
    blob: Vec<u8>,
}

impl TableState {
    fn claim_merge_key(&self, header: &Header, owner: Option<DocRef>) -> StorageResult<()> {
        if let Some(key) = &header.merge_key {
            match self.merge_keys.get(key) {
                Some(existing) if Some(*existing) != owner => {
                    return Err(StorageError::DuplicateMergeKey {
                        merge_key: key.clone(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn index(&mut self, doc_ref: DocRef, header: &Header) {
        self.ordered.insert((header.sort_key.clone(), doc_ref));
        if let Some(key) = &header.merge_key {
            self.merge_keys.insert(key.clone(), doc_ref);
        }
        if header.is_table_header() {
            self.table_header = Some(doc_ref);
        }
    }

    fn unindex(&mut self, doc_ref: DocRef, header: &Header) {
        self.ordered.remove(&(header.sort_key.clone(), doc_ref));
        if let Some(key) = &header.merge_key {
            if self.merge_keys.get(key) == Some(&doc_ref) {
                self.merge_keys.remove(key);
            }
        }
        if self.table_header == Some(doc_ref) {
            self.table_header = None;
        }
    }
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls served so far.
    ///
    /// Tests use this to assert that an operation had no side effects.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of live documents in a partition, table header included.
    #[must_use]
    pub fn document_count(&self, ctx: &TableContext) -> usize {
        self.tables
            .read()
            .get(ctx)
            .map_or(0, |table| table.documents.len())
    }

    /// All live documents of a partition in `sort_key` order.
    #[must_use]
    pub fn snapshot(&self, ctx: &TableContext) -> Vec<(DocRef, Header)> {
        let tables = self.tables.read();
        let Some(table) = tables.get(ctx) else {
            return Vec::new();
        };
        table
            .ordered
            .iter()
            .filter_map(|(_, doc_ref)| {
                table
                    .documents
                    .get(doc_ref)
                    .map(|doc| (*doc_ref, doc.header.clone()))
            })
            .collect()
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }

    fn unknown_table(ctx: &TableContext) -> StorageError {
        StorageError::UnknownTable {
            topic_id: ctx.topic_id.clone(),
            table_id: ctx.table_id.clone(),
        }
    }
}

impl DocumentBackend for InMemoryBackend {
    fn prepare_table(&self, ctx: &TableContext) -> StorageResult<()> {
        self.tables.write().entry(ctx.clone()).or_default();
        Ok(())
    }

    fn add_document(
        &self,
        ctx: &TableContext,
        header: Header,
        blob: Vec<u8>,
    ) -> StorageResult<(DocRef, Header)> {
        let mut tables = self.tables.write();
        let table = tables.get_mut(ctx).ok_or_else(|| Self::unknown_table(ctx))?;
        table.claim_merge_key(&header, None)?;

        let doc_ref = DocRef::new(self.next_ref.fetch_add(1, Ordering::SeqCst));
        table.index(doc_ref, &header);
        table.documents.insert(
            doc_ref,
            StoredDocument {
                header: header.clone(),
                blob,
            },
        );
        self.record_write();
        Ok((doc_ref, header))
    }

    fn update_document(
        &self,
        ctx: &TableContext,
        doc_ref: DocRef,
        header: Header,
        blob: Vec<u8>,
    ) -> StorageResult<Header> {
        let mut tables = self.tables.write();
        let table = tables.get_mut(ctx).ok_or_else(|| Self::unknown_table(ctx))?;
        let old = table
            .documents
            .get(&doc_ref)
            .map(|doc| doc.header.clone())
            .ok_or(StorageError::DocumentNotFound(doc_ref))?;
        table.claim_merge_key(&header, Some(doc_ref))?;

        table.unindex(doc_ref, &old);
        table.index(doc_ref, &header);
        table.documents.insert(
            doc_ref,
            StoredDocument {
                header: header.clone(),
                blob,
            },
        );
        self.record_write();
        Ok(header)
    }

    fn update_header(
        &self,
        ctx: &TableContext,
        doc_ref: DocRef,
        patch: &HeaderPatch,
    ) -> StorageResult<Header> {
        let mut tables = self.tables.write();
        let table = tables.get_mut(ctx).ok_or_else(|| Self::unknown_table(ctx))?;
        let doc = table
            .documents
            .get_mut(&doc_ref)
            .ok_or(StorageError::DocumentNotFound(doc_ref))?;

        let mut header = doc.header.clone();
        patch.apply(&mut header)?;
        doc.header = header.clone();
        self.record_write();
        Ok(header)
    }

    fn delete_documents(&self, ctx: &TableContext, refs: &[DocRef]) -> StorageResult<bool> {
        if refs.is_empty() {
            return Ok(true);
        }
        let mut tables = self.tables.write();
        if let Some(table) = tables.get_mut(ctx) {
            for doc_ref in refs {
                if let Some(doc) = table.documents.remove(doc_ref) {
                    table.unindex(*doc_ref, &doc.header);
                }
            }
        }
        self.record_write();
        Ok(true)
    }

    fn get_ref_by_merge_key(
        &self,
        ctx: &TableContext,
        merge_key: &str,
    ) -> StorageResult<Option<DocRef>> {
        Ok(self
            .tables
            .read()
            .get(ctx)
            .and_then(|table| table.merge_keys.get(merge_key).copied()))
    }

    fn get_table_header(&self, ctx: &TableContext) -> StorageResult<Option<DocRef>> {
        Ok(self
            .tables
            .read()
            .get(ctx)
            .and_then(|table| table.table_header))
    }

    fn inc_table_header(
        &self,
        ctx: &TableContext,
        counters: TableCounters,
    ) -> StorageResult<Header> {
        let mut tables = self.tables.write();
        let table = tables.get_mut(ctx).ok_or_else(|| Self::unknown_table(ctx))?;
        let doc = table
            .table_header
            .and_then(|doc_ref| table.documents.get_mut(&doc_ref))
            .ok_or_else(|| StorageError::NoTableHeader {
                topic_id: ctx.topic_id.clone(),
                table_id: ctx.table_id.clone(),
            })?;

        counters.add_to(&mut doc.header);
        self.record_write();
        Ok(doc.header.clone())
    }

    fn get_header_from_ref(
        &self,
        ctx: &TableContext,
        doc_ref: DocRef,
    ) -> StorageResult<Option<Header>> {
        Ok(self
            .tables
            .read()
            .get(ctx)
            .and_then(|table| table.documents.get(&doc_ref))
            .map(|doc| doc.header.clone()))
    }

    fn get_blob(&self, ctx: &TableContext, doc_ref: DocRef) -> StorageResult<Vec<u8>> {
        self.tables
            .read()
            .get(ctx)
            .and_then(|table| table.documents.get(&doc_ref))
            .map(|doc| doc.blob.clone())
            .ok_or(StorageError::DocumentNotFound(doc_ref))
    }

    fn get_stream_by_sort_key(
        &self,
        ctx: &TableContext,
        query: &StreamQuery,
    ) -> StorageResult<DocStream> {
        let tables = self.tables.read();
        let Some(table) = tables.get(ctx) else {
            return Ok(Box::new(std::iter::empty()));
        };

        let matches = |(sort_key, doc_ref): &&(String, DocRef)| {
            table.documents.get(doc_ref).is_some_and(|doc| {
                query.matches(sort_key, doc.header.merge_status, doc.header.merge_level)
            })
        };
        let refs: Vec<DocRef> = if query.reverse {
            table.ordered.iter().rev().filter(matches).map(|(_, r)| *r).collect()
        } else {
            table.ordered.iter().filter(matches).map(|(_, r)| *r).collect()
        };

        Ok(Box::new(refs.into_iter()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::MergeStatus;

    fn ctx() -> TableContext {
        TableContext::new("topic", "table")
    }

    fn doc(sort_key: &str, merge_key: Option<&str>) -> Header {
        Header {
            sort_key: sort_key.to_string(),
            merge_key: merge_key.map(str::to_string),
            ..Header::for_table(&ctx())
        }
    }

    fn prepared() -> InMemoryBackend {
        let backend = InMemoryBackend::new();
        backend.prepare_table(&ctx()).unwrap();
        backend
    }

    #[test]
    fn add_requires_prepared_table() {
        let backend = InMemoryBackend::new();
        let result = backend.add_document(&ctx(), doc("a", None), vec![]);
        assert!(matches!(result, Err(StorageError::UnknownTable { .. })));
    }

    #[test]
    fn merge_key_lookup_and_uniqueness() {
        let backend = prepared();
        let (r1, _) = backend.add_document(&ctx(), doc("a", Some("k1")), vec![1]).unwrap();

        assert_eq!(backend.get_ref_by_merge_key(&ctx(), "k1").unwrap(), Some(r1));
        assert_eq!(backend.get_ref_by_merge_key(&ctx(), "nope").unwrap(), None);

        let dup = backend.add_document(&ctx(), doc("b", Some("k1")), vec![]);
        assert!(matches!(dup, Err(StorageError::DuplicateMergeKey { .. })));

        backend.delete_documents(&ctx(), &[r1]).unwrap();
        assert_eq!(backend.get_ref_by_merge_key(&ctx(), "k1").unwrap(), None);
        assert!(backend.add_document(&ctx(), doc("b", Some("k1")), vec![]).is_ok());
    }

    #[test]
    fn delete_is_idempotent() {
        let backend = prepared();
        let (r1, _) = backend.add_document(&ctx(), doc("a", None), vec![]).unwrap();
        assert!(backend.delete_documents(&ctx(), &[r1]).unwrap());
        assert!(backend.delete_documents(&ctx(), &[r1, DocRef::new(999)]).unwrap());
        assert_eq!(backend.document_count(&ctx()), 0);
    }

    #[test]
    fn stream_orders_by_sort_key_then_creation() {
        let backend = prepared();
        let (rb, _) = backend.add_document(&ctx(), doc("b", None), vec![]).unwrap();
        let (ra, _) = backend.add_document(&ctx(), doc("a", None), vec![]).unwrap();
        let (rb2, _) = backend.add_document(&ctx(), doc("b", None), vec![]).unwrap();

        let forward: Vec<_> = backend
            .get_stream_by_sort_key(&ctx(), &StreamQuery::all())
            .unwrap()
            .collect();
        assert_eq!(forward, vec![ra, rb, rb2]);

        let older: Vec<_> = backend
            .get_stream_by_sort_key(&ctx(), &StreamQuery::older_than("b"))
            .unwrap()
            .collect();
        assert_eq!(older, vec![ra]);
    }

    #[test]
    fn stream_is_a_snapshot() {
        let backend = prepared();
        let (ra, _) = backend.add_document(&ctx(), doc("a", None), vec![]).unwrap();
        let (rb, _) = backend.add_document(&ctx(), doc("b", None), vec![]).unwrap();

        let stream = backend
            .get_stream_by_sort_key(&ctx(), &StreamQuery::all())
            .unwrap();
        backend.delete_documents(&ctx(), &[ra]).unwrap();
        backend.add_document(&ctx(), doc("c", None), vec![]).unwrap();

        assert_eq!(stream.collect::<Vec<_>>(), vec![ra, rb]);
        assert_eq!(backend.get_header_from_ref(&ctx(), ra).unwrap(), None);
    }

    #[test]
    fn stream_filters_status_and_level() {
        let backend = prepared();
        let mut high = doc("a", None);
        high.merge_level = 3;
        let (r_high, _) = backend.add_document(&ctx(), high, vec![]).unwrap();
        backend.add_document(&ctx(), doc("b", None), vec![]).unwrap();

        let query = StreamQuery::all()
            .statuses(&[MergeStatus::Initial])
            .min_merge_level(2);
        let refs: Vec<_> = backend.get_stream_by_sort_key(&ctx(), &query).unwrap().collect();
        assert_eq!(refs, vec![r_high]);
    }

    #[test]
    fn update_document_reindexes_sort_key() {
        let backend = prepared();
        let (r1, _) = backend.add_document(&ctx(), doc("a", Some("k")), vec![1]).unwrap();
        backend
            .update_document(&ctx(), r1, doc("z", Some("k")), vec![2])
            .unwrap();

        assert_eq!(backend.get_blob(&ctx(), r1).unwrap(), vec![2]);
        let older: Vec<_> = backend
            .get_stream_by_sort_key(&ctx(), &StreamQuery::older_than("m"))
            .unwrap()
            .collect();
        assert!(older.is_empty());
    }

    #[test]
    fn update_header_applies_patch() {
        let backend = prepared();
        let (r1, _) = backend.add_document(&ctx(), doc("a", None), vec![]).unwrap();
        let header = backend
            .update_header(&ctx(), r1, &HeaderPatch::new().merged_level(2))
            .unwrap();
        assert_eq!(header.merged_level, 2);

        let bad = backend.update_header(&ctx(), r1, &HeaderPatch::new().merged_level(1));
        assert!(matches!(bad, Err(StorageError::InvalidPatch { .. })));
        let stored = backend.get_header_from_ref(&ctx(), r1).unwrap().unwrap();
        assert_eq!(stored.merged_level, 2);
    }

    #[test]
    fn table_header_counters() {
        let backend = prepared();
        let missing = backend.inc_table_header(&ctx(), TableCounters::merged(1, 1));
        assert!(matches!(missing, Err(StorageError::NoTableHeader { .. })));

        let mut header = doc("", None);
        header.merge_status = MergeStatus::Header;
        let (r_header, _) = backend.add_document(&ctx(), header, vec![]).unwrap();
        assert_eq!(backend.get_table_header(&ctx()).unwrap(), Some(r_header));

        backend
            .inc_table_header(&ctx(), TableCounters::merged(10, 2))
            .unwrap();
        let header = backend
            .inc_table_header(&ctx(), TableCounters::packaged(5, 1))
            .unwrap();
        assert_eq!(header.merged_size, 10);
        assert_eq!(header.packaged_lines, 1);
    }

    #[test]
    fn write_count_tracks_mutations_only() {
        let backend = prepared();
        let (r1, _) = backend.add_document(&ctx(), doc("a", None), vec![]).unwrap();
        let before = backend.write_count();
        backend.get_header_from_ref(&ctx(), r1).unwrap();
        backend.get_blob(&ctx(), r1).unwrap();
        backend
            .get_stream_by_sort_key(&ctx(), &StreamQuery::all())
            .unwrap()
            .for_each(drop);
        assert_eq!(backend.write_count(), before);
    }

    proptest::proptest! {
        #[test]
        fn stream_is_sorted_both_ways(keys in proptest::collection::vec("[a-d]{0,3}", 0..20)) {
            let backend = prepared();
            for key in &keys {
                backend.add_document(&ctx(), doc(key, None), vec![]).unwrap();
            }

            let sort_keys = |query: &StreamQuery| -> Vec<String> {
                backend
                    .get_stream_by_sort_key(&ctx(), query)
                    .unwrap()
                    .map(|r| backend.get_header_from_ref(&ctx(), r).unwrap().unwrap().sort_key)
                    .collect()
            };

            let mut expected = keys.clone();
            expected.sort();
            proptest::prop_assert_eq!(sort_keys(&StreamQuery::all()), expected.clone());

            let reverse = StreamQuery { reverse: true, ..StreamQuery::all() };
            expected.reverse();
            proptest::prop_assert_eq!(sort_keys(&reverse), expected);
        }
    }
}
