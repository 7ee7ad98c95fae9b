//! Iterator wrappers over `Cursor` (spec.md §4.5's navigation ops) for
//! heed-like `for` loop iteration instead of manual `next()?` calls.

use crate::{
    comparator::Comparator,
    cursor::Cursor,
    db::{Database, Key, Value},
    error::Result,
    txn::{mode::Mode, Transaction},
};
use std::ops::Range;

/// Forward iterator over every entry in a database, driven by `Cursor::next`.
pub struct Iter<'txn, K, V, C>
where
    K: Key,
    V: Value,
    C: Comparator,
{
    cursor: Cursor<'txn, K, V, C>,
}

impl<'txn, K, V, C> Iter<'txn, K, V, C>
where
    K: Key,
    V: Value,
    C: Comparator,
{
    /// Create a new iterator
    ///
    /// # Safety
    /// The database must outlive the transaction and iterator
    pub fn new<M: Mode>(db: &'txn Database<K, V, C>, txn: &'txn Transaction<'txn, M>) -> Result<Self> {
        let cursor = db.cursor(txn)?;
        Ok(Self { cursor })
    }
}

impl<'txn, K, V, C> Iterator for Iter<'txn, K, V, C>
where
    K: Key,
    V: Value,
    C: Comparator,
{
    type Item = Result<(Vec<u8>, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.next() {
            Ok(Some((key, value))) => Some(Ok((key, value))),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Reverse iterator over every entry in a database, driven by `Cursor::prev`.
pub struct IterRev<'txn, K, V, C>
where
    K: Key,
    V: Value,
    C: Comparator,
{
    cursor: Cursor<'txn, K, V, C>,
    started: bool,
}

impl<'txn, K, V, C> Iterator for IterRev<'txn, K, V, C>
where
    K: Key,
    V: Value,
    C: Comparator,
{
    type Item = Result<(Vec<u8>, V)>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = if self.started { self.cursor.prev() } else { self.cursor.last() };
        self.started = true;
        match result {
            Ok(Some((key, value))) => Some(Ok((key, value))),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Forward iterator over a DUPSORT database that skips every key's
/// remaining duplicates (`Cursor::next_nodup`, spec.md §4.5's NEXT_NODUP),
/// so each distinct key is yielded exactly once regardless of how many
/// duplicate values it holds.
pub struct KeysNoDup<'txn, K, V, C>
where
    K: Key,
    V: Value,
    C: Comparator,
{
    cursor: Cursor<'txn, K, V, C>,
    started: bool,
}

impl<'txn, K, V, C> Iterator for KeysNoDup<'txn, K, V, C>
where
    K: Key,
    V: Value,
    C: Comparator,
{
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = if self.started { self.cursor.next_nodup() } else { self.cursor.first_raw() };
        self.started = true;
        match result {
            Ok(Some((key, _))) => Some(Ok(key.to_vec())),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// Convenience function to create a forward iterator
///
/// This provides a heed-compatible API for iteration.
///
/// # Example
/// ```ignore
/// // Instead of using cursors directly:
/// let mut cursor = db.cursor(&txn)?;
/// while let Some((key, value)) = cursor.next()? {
///     // process
/// }
///
/// // You can use iterators:
/// for result in iter(&db, &txn)? {
///     let (key, value) = result?;
///     // process
/// }
/// ```
pub fn iter<'txn, K, V, C, M>(
    db: &'txn Database<K, V, C>,
    txn: &'txn Transaction<'txn, M>,
) -> Result<Iter<'txn, K, V, C>>
where
    K: Key,
    V: Value,
    C: Comparator,
    M: Mode,
{
    Iter::new(db, txn)
}

/// Iterate a database back to front.
pub fn iter_rev<'txn, K, V, C, M>(
    db: &'txn Database<K, V, C>,
    txn: &'txn Transaction<'txn, M>,
) -> Result<IterRev<'txn, K, V, C>>
where
    K: Key,
    V: Value,
    C: Comparator,
    M: Mode,
{
    Ok(IterRev { cursor: db.cursor(txn)?, started: false })
}

/// Iterate a DUPSORT database's distinct keys only, one yield per key no
/// matter how many duplicate values it holds.
pub fn iter_nodup<'txn, K, V, C, M>(
    db: &'txn Database<K, V, C>,
    txn: &'txn Transaction<'txn, M>,
) -> Result<KeysNoDup<'txn, K, V, C>>
where
    K: Key,
    V: Value,
    C: Comparator,
    M: Mode,
{
    Ok(KeysNoDup { cursor: db.cursor(txn)?, started: false })
}

/// Create an iterator starting from a specific key
pub fn iter_from<'txn, K, V, C, M>(
    db: &'txn Database<K, V, C>,
    txn: &'txn Transaction<'txn, M>,
    start_key: &K,
) -> Result<Iter<'txn, K, V, C>>
where
    K: Key,
    V: Value,
    C: Comparator,
    M: Mode,
{
    let mut cursor = db.cursor(txn)?;
    cursor.seek(start_key)?;
    Ok(Iter { cursor })
}

/// Create a range iterator
pub fn range<'txn, K, V, C, M>(
    db: &'txn Database<K, V, C>,
    txn: &'txn Transaction<'txn, M>,
    range: Range<&K>,
) -> Result<impl Iterator<Item = Result<(Vec<u8>, V)>> + 'txn>
where
    K: Key + PartialOrd,
    V: Value + 'txn,
    C: Comparator,
    M: Mode,
{
    let mut cursor = db.cursor(txn)?;
    cursor.seek(range.start)?;
    
    // Pre-encode the end key to avoid repeated encoding
    let end_bytes = range.end.encode()?;
    
    Ok(std::iter::from_fn(move || {
        match cursor.current() {
            Ok(Some((key, value))) => {
                // Check if we're past the range
                if key >= end_bytes {
                    return None;
                }
                
                // Move to next for subsequent calls
                let result = Some(Ok((key.clone(), value)));
                let _ = cursor.next();
                result
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        db::DatabaseFlags,
        env::EnvBuilder,
    };
    use tempfile::TempDir;

    #[test]
    fn test_iterator() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let env = EnvBuilder::new().open(temp_dir.path())?;
        let db = Database::<Vec<u8>, Vec<u8>>::open(&env, None, DatabaseFlags::empty())?;

        // Insert test data
        let mut txn = env.write_txn()?;
        for i in 0..10 {
            let key = format!("key{:02}", i).into_bytes();
            let value = format!("value{}", i).into_bytes();
            db.put(&mut txn, key, value)?;
        }
        txn.commit()?;

        // Test basic iteration
        let txn = env.read_txn()?;
        let items: Vec<_> = iter(&db, &txn)?.collect::<Result<Vec<_>>>()?;
        assert_eq!(items.len(), 10);
        assert_eq!(items[0].0, b"key00");
        assert_eq!(items[9].0, b"key09");
        
        // Test range iteration
        let start = b"key02".to_vec();
        let end = b"key05".to_vec();
        let items: Vec<_> = range(&db, &txn, &start..&end)?.collect::<Result<Vec<_>>>()?;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].0, b"key02");
        assert_eq!(items[2].0, b"key04");

        // Test reverse iteration
        let items: Vec<_> = iter_rev(&db, &txn)?.collect::<Result<Vec<_>>>()?;
        assert_eq!(items.len(), 10);
        assert_eq!(items[0].0, b"key09");
        assert_eq!(items[9].0, b"key00");

        Ok(())
    }

    #[test]
    fn test_iter_nodup_skips_duplicates() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let env = EnvBuilder::new().open(temp_dir.path())?;
        let mut txn = env.write_txn()?;
        let db: Database<String, String> = env.create_database_with_flags(
            &mut txn,
            Some("nodup"),
            DatabaseFlags::DUP_SORT,
        )?;
        db.put_dup(&mut txn, "a".to_string(), "1".to_string())?;
        db.put_dup(&mut txn, "a".to_string(), "2".to_string())?;
        db.put_dup(&mut txn, "b".to_string(), "1".to_string())?;
        db.put_dup(&mut txn, "c".to_string(), "1".to_string())?;
        db.put_dup(&mut txn, "c".to_string(), "2".to_string())?;
        db.put_dup(&mut txn, "c".to_string(), "3".to_string())?;
        txn.commit()?;

        let txn = env.read_txn()?;
        let keys: Vec<_> = iter_nodup(&db, &txn)?.collect::<Result<Vec<_>>>()?;
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        Ok(())
    }
}