use std::collections::BTreeSet;

use crate::types::DocumentId;

/// Documents present in the snapshot but missing from the record.
///
/// Both inputs are treated as sets. The result is ordered so ingestion runs
/// in a stable order.
pub fn delta<'a, I>(snapshot: I, record: &BTreeSet<DocumentId>) -> BTreeSet<DocumentId>
where
    I: IntoIterator<Item = &'a DocumentId>,
{
    snapshot.into_iter().filter(|id| !record.contains(*id)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> BTreeSet<DocumentId> {
        names.iter().map(|n| DocumentId::new(*n).expect("valid id")).collect()
    }

    #[test]
    fn everything_is_new_against_an_empty_record() {
        let corpus = ids(&["a.txt", "b.txt"]);
        assert_eq!(delta(&corpus, &BTreeSet::new()), corpus);
    }

    #[test]
    fn only_unrecorded_documents_are_new() {
        let corpus = ids(&["a.txt", "b.txt", "c.txt"]);
        let record = ids(&["a.txt", "b.txt"]);
        assert_eq!(delta(&corpus, &record), ids(&["c.txt"]));
    }

    #[test]
    fn removed_documents_are_not_reported() {
        let corpus = ids(&["b.txt"]);
        let record = ids(&["a.txt", "b.txt"]);
        assert!(delta(&corpus, &record).is_empty());
    }
}
