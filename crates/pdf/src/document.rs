//! In-memory document: object table plus trailer view.

use std::collections::BTreeMap;
use std::collections::HashSet;

use crate::error::PdfError;
use crate::object::{Dict, Object, ObjectId};
use crate::parser;

/// Depth cap when chasing reference chains; real documents are shallow and
/// a cycle must not hang normalization.
const MAX_RESOLVE_DEPTH: usize = 32;

/// A parsed PDF document.
#[derive(Debug, Clone)]
pub struct Document {
    pub version: String,
    pub objects: BTreeMap<ObjectId, Object>,
    pub trailer: Dict,
}

impl Document {
    /// Parse a document, enforcing `limit` as the maximum input size.
    pub fn parse_with_limit(data: &[u8], limit: usize) -> Result<Self, PdfError> {
        if data.len() > limit {
            return Err(PdfError::TooLarge {
                size: data.len(),
                limit,
            });
        }
        let parsed = parser::parse_file(data)?;
        Ok(Self {
            version: parsed.version,
            objects: parsed.objects,
            trailer: parsed.trailer,
        })
    }

    /// Parse with the default size limit.
    pub fn parse(data: &[u8]) -> Result<Self, PdfError> {
        Self::parse_with_limit(data, crate::normalize::DEFAULT_SIZE_LIMIT)
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        self.objects.get_mut(&id)
    }

    /// Follow reference chains until a direct object (or a dangling end).
    pub fn resolve<'a>(&'a self, object: &'a Object) -> Option<&'a Object> {
        let mut current = object;
        for _ in 0..MAX_RESOLVE_DEPTH {
            match current {
                Object::Reference(id) => current = self.objects.get(id)?,
                direct => return Some(direct),
            }
        }
        None
    }

    /// The object id a value ultimately points at, if it is a reference.
    pub fn resolve_id(&self, object: &Object) -> Option<ObjectId> {
        let mut current = object;
        let mut id = None;
        for _ in 0..MAX_RESOLVE_DEPTH {
            match current {
                Object::Reference(next) => {
                    id = Some(*next);
                    current = self.objects.get(next)?;
                }
                _ => return id,
            }
        }
        None
    }

    /// The document catalog's object id (trailer `/Root`).
    pub fn catalog_id(&self) -> Result<ObjectId, PdfError> {
        let root = self
            .trailer
            .get("Root")
            .ok_or_else(|| PdfError::invalid("trailer has no /Root"))?;
        self.resolve_id(root)
            .filter(|id| self.objects.contains_key(id))
            .ok_or_else(|| PdfError::invalid("/Root does not resolve to an object"))
    }

    fn max_object_number(&self) -> u32 {
        self.objects.keys().map(|id| id.number).max().unwrap_or(0)
    }

    /// Allocate a fresh object id and insert `object` under it.
    pub fn insert(&mut self, object: Object) -> ObjectId {
        let id = ObjectId::new(self.max_object_number() + 1, 0);
        self.objects.insert(id, object);
        id
    }

    /// Drop every object unreachable from the trailer.
    ///
    /// Flattening detaches annotation and form machinery; sweeping keeps the
    /// rewritten file from carrying the husks along.
    pub fn sweep_unreachable(&mut self) {
        let mut reachable: HashSet<ObjectId> = HashSet::new();
        let mut stack: Vec<ObjectId> = Vec::new();

        for value in self.trailer.values() {
            collect_references(value, &mut stack);
        }
        while let Some(id) = stack.pop() {
            if !reachable.insert(id) {
                continue;
            }
            if let Some(object) = self.objects.get(&id) {
                collect_references(object, &mut stack);
            }
        }

        self.objects.retain(|id, _| reachable.contains(id));
    }
}

fn collect_references(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        Object::Dictionary(dict) => {
            for value in dict.values() {
                collect_references(value, out);
            }
        }
        Object::Stream(stream) => {
            for value in stream.dict.values() {
                collect_references(value, out);
            }
        }
        _ => {}
    }
}
