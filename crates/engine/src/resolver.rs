//! Key resolution against a snapshot
//!
//! Maps a readable external key to the documents whose key field holds that
//! exact value. The key is encoded with the key field's term encoding before
//! the lookup, so `"9"` finds an integer field's term for 9, not a text term.

use extscore_core::{DocId, Error, IndexSnapshot, Result, TermDictionary, TermEncoding};

/// Resolves keys to document ids within one snapshot
///
/// Opened once per build; the term dictionary and scratch buffer are reused
/// across every key.
pub struct KeyResolver<'a> {
    field: String,
    encoding: TermEncoding,
    terms: Option<Box<dyn TermDictionary + 'a>>,
    max_doc: u32,
    scratch: Vec<u8>,
}

impl<'a> KeyResolver<'a> {
    /// Open the term dictionary of `field` in `snapshot`
    ///
    /// # Errors
    ///
    /// Returns `Resolution` if the snapshot cannot open the field's terms.
    pub fn open(
        snapshot: &'a dyn IndexSnapshot,
        field: &str,
        encoding: TermEncoding,
    ) -> Result<Self> {
        let terms = snapshot
            .terms(field)
            .map_err(|e| as_resolution(field, e))?;
        Ok(KeyResolver {
            field: field.to_string(),
            encoding,
            terms,
            max_doc: snapshot.max_doc(),
            scratch: Vec::with_capacity(32),
        })
    }

    /// Whether the field has any indexed terms at all
    pub fn has_terms(&self) -> bool {
        self.terms.is_some()
    }

    /// Replace the contents of `out` with the documents matching `key`.
    ///
    /// A key absent from the index leaves `out` empty.
    ///
    /// # Errors
    ///
    /// Returns `MalformedEntry` if the key cannot be encoded for the field,
    /// and `Resolution` if the term dictionary or postings cannot be read or
    /// name a document outside the snapshot.
    pub fn resolve_into(&mut self, key: &str, out: &mut Vec<DocId>) -> Result<()> {
        out.clear();
        let Some(terms) = self.terms.as_mut() else {
            return Ok(());
        };
        self.encoding.encode(key, &mut self.scratch)?;

        let found = terms
            .seek_exact(&self.scratch)
            .map_err(|e| as_resolution(&self.field, e))?;
        if !found {
            return Ok(());
        }
        terms
            .postings(out)
            .map_err(|e| as_resolution(&self.field, e))?;

        if let Some(&bad) = out.iter().find(|&&doc| doc >= self.max_doc) {
            return Err(Error::resolution(
                &self.field,
                format!("postings name doc {} beyond max_doc {}", bad, self.max_doc),
            ));
        }
        Ok(())
    }

    /// Documents matching `key`
    pub fn resolve(&mut self, key: &str) -> Result<Vec<DocId>> {
        let mut out = Vec::new();
        self.resolve_into(key, &mut out)?;
        Ok(out)
    }
}

/// Anything that goes wrong reading the index is a resolution failure
fn as_resolution(field: &str, e: Error) -> Error {
    match e {
        Error::Resolution { .. } => e,
        other => Error::resolution(field, other),
    }
}
