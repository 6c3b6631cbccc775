//! Flattening: bake interactive structure into page content.
//!
//! Annotation appearance streams are already Form XObjects in all but name;
//! flattening registers each one in its page's resources, draws it where the
//! annotation's `/Rect` put it, and removes the annotation itself. Form
//! fields are widget annotations plus the catalog's `/AcroForm` machinery,
//! so the same pass covers them. Optional-content groups are stripped so
//! nothing in the output can be toggled invisible.

use std::collections::HashSet;

use thiserror::Error;
use tracing::debug;

use crate::document::Document;
use crate::object::{Dict, Object, ObjectId, Stream};
use crate::writer::format_real;

/// Annotation flag bits that mean "not rendered for viewing".
const FLAG_HIDDEN: i64 = 1 << 1;
const FLAG_NO_VIEW: i64 = 1 << 5;

const EPSILON: f64 = 1e-6;

/// Flattening failure. Callers treat any of these as "leave the document
/// alone", so the variants only matter for logging.
#[derive(Debug, Error)]
pub enum FlattenError {
    #[error("no usable catalog: {0}")]
    MissingCatalog(String),

    #[error("malformed page tree: {0}")]
    PageTree(String),

    #[error("malformed object graph: {0}")]
    Malformed(String),
}

/// What a flattening pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlattenSummary {
    pub pages: usize,
    pub stamped_annotations: usize,
    pub dropped_annotations: usize,
    pub stripped_optional_content: bool,
    pub removed_acroform: bool,
}

impl FlattenSummary {
    /// True when the pass changed the document at all.
    pub fn changed(&self) -> bool {
        self.stamped_annotations > 0
            || self.dropped_annotations > 0
            || self.stripped_optional_content
            || self.removed_acroform
    }
}

/// Flatten a parsed document in place.
pub fn flatten(doc: &mut Document) -> Result<FlattenSummary, FlattenError> {
    let catalog_id = doc
        .catalog_id()
        .map_err(|e| FlattenError::MissingCatalog(e.to_string()))?;

    let mut summary = FlattenSummary::default();

    summary.stripped_optional_content = strip_optional_content(doc, catalog_id);

    let pages = collect_pages(doc, catalog_id)?;
    summary.pages = pages.len();
    for page_id in pages {
        let (stamped, dropped) = flatten_page(doc, page_id)?;
        summary.stamped_annotations += stamped;
        summary.dropped_annotations += dropped;
    }

    if let Some(catalog) = doc.get_mut(catalog_id).and_then(Object::as_dict_mut) {
        summary.removed_acroform = catalog.remove("AcroForm").is_some();
    }

    doc.sweep_unreachable();

    debug!(
        pages = summary.pages,
        stamped = summary.stamped_annotations,
        dropped = summary.dropped_annotations,
        "flattened document"
    );
    Ok(summary)
}

/// Remove `/OCProperties` from the catalog and `/OC` membership entries
/// everywhere. Returns whether anything was removed.
fn strip_optional_content(doc: &mut Document, catalog_id: ObjectId) -> bool {
    let mut stripped = false;
    if let Some(catalog) = doc.get_mut(catalog_id).and_then(Object::as_dict_mut) {
        stripped |= catalog.remove("OCProperties").is_some();
    }
    for object in doc.objects.values_mut() {
        if let Some(dict) = object.as_dict_mut() {
            stripped |= dict.remove("OC").is_some();
        }
    }
    stripped
}

/// Walk the page tree and return every leaf page's object id.
fn collect_pages(doc: &Document, catalog_id: ObjectId) -> Result<Vec<ObjectId>, FlattenError> {
    let catalog = doc
        .get(catalog_id)
        .and_then(Object::as_dict)
        .ok_or_else(|| FlattenError::Malformed("catalog is not a dictionary".into()))?;
    let root = catalog
        .get("Pages")
        .and_then(|v| doc.resolve_id(v))
        .ok_or_else(|| FlattenError::PageTree("catalog has no resolvable /Pages".into()))?;

    let mut pages = Vec::new();
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut stack = vec![root];

    while let Some(node_id) = stack.pop() {
        if !visited.insert(node_id) {
            continue;
        }
        let node = doc
            .get(node_id)
            .and_then(Object::as_dict)
            .ok_or_else(|| FlattenError::PageTree(format!("node {node_id} is not a dictionary")))?;

        let node_type = Object::dict_name(node, "Type");
        let is_leaf = node_type == Some("Page")
            || (node_type.is_none() && !node.contains_key("Kids"));
        if is_leaf {
            pages.push(node_id);
            continue;
        }

        let kids = node
            .get("Kids")
            .and_then(|v| doc.resolve(v))
            .and_then(Object::as_array)
            .ok_or_else(|| FlattenError::PageTree(format!("node {node_id} has no /Kids array")))?;
        for kid in kids {
            let kid_id = doc
                .resolve_id(kid)
                .ok_or_else(|| FlattenError::PageTree("dangling /Kids entry".into()))?;
            stack.push(kid_id);
        }
    }

    Ok(pages)
}

/// A planned appearance stamp: which XObject to draw and where.
struct StampPlan {
    xobject_id: ObjectId,
    sx: f64,
    sy: f64,
    tx: f64,
    ty: f64,
}

fn flatten_page(doc: &mut Document, page_id: ObjectId) -> Result<(usize, usize), FlattenError> {
    let page = doc
        .get(page_id)
        .and_then(Object::as_dict)
        .ok_or_else(|| FlattenError::Malformed(format!("page {page_id} is not a dictionary")))?;

    let Some(annots_value) = page.get("Annots") else {
        return Ok((0, 0));
    };
    let annots: Vec<Object> = doc
        .resolve(annots_value)
        .and_then(Object::as_array)
        .map(<[Object]>::to_vec)
        .unwrap_or_default();

    let mut plans: Vec<StampPlan> = Vec::new();
    let mut dropped = 0usize;
    for annot in &annots {
        match plan_stamp(doc, annot) {
            Some(plan) => plans.push(plan),
            None => dropped += 1,
        }
    }

    let mut page_dict = page.clone();
    page_dict.remove("Annots");

    if !plans.is_empty() {
        for plan in &plans {
            promote_to_form_xobject(doc, plan.xobject_id);
        }
        let names = register_xobjects(doc, &mut page_dict, &plans)?;
        let mut ops = String::new();
        for (plan, name) in plans.iter().zip(&names) {
            ops.push_str(&format!(
                "q {} 0. 0. {} {} {} cm /{} Do Q\n",
                format_real(plan.sx),
                format_real(plan.sy),
                format_real(plan.tx),
                format_real(plan.ty),
                name
            ));
        }
        append_content(doc, &mut page_dict, ops.into_bytes())?;
    }

    doc.objects.insert(page_id, Object::Dictionary(page_dict));
    Ok((plans.len(), dropped))
}

/// Work out how to stamp one annotation, or `None` to drop it.
fn plan_stamp(doc: &Document, annot: &Object) -> Option<StampPlan> {
    let dict = doc.resolve(annot)?.as_dict()?;

    if let Some(flags) = dict.get("F").and_then(|v| doc.resolve(v)).and_then(Object::as_integer) {
        if flags & (FLAG_HIDDEN | FLAG_NO_VIEW) != 0 {
            return None;
        }
    }

    let appearance = dict.get("AP").and_then(|v| doc.resolve(v))?.as_dict()?;
    let normal = appearance.get("N")?;
    let xobject_id = match doc.resolve(normal)? {
        Object::Stream(_) => doc.resolve_id(normal)?,
        Object::Dictionary(states) => {
            let state = Object::dict_name(dict, "AS");
            let entry = match state {
                Some(name) => states.get(name)?,
                None if states.len() == 1 => states.values().next()?,
                None => return None,
            };
            doc.resolve_id(entry)
                .filter(|id| matches!(doc.get(*id), Some(Object::Stream(_))))?
        }
        _ => return None,
    };

    let stream = doc.get(xobject_id)?.as_stream()?;
    let bbox = number_array(doc, stream.dict.get("BBox")?, 4)?;
    let matrix = match stream.dict.get("Matrix") {
        Some(value) => number_array(doc, value, 6)?,
        None => vec![1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
    };
    let rect = number_array(doc, dict.get("Rect")?, 4)?;

    let (rx0, ry0) = (rect[0].min(rect[2]), rect[1].min(rect[3]));
    let (rw, rh) = ((rect[2] - rect[0]).abs(), (rect[3] - rect[1]).abs());
    if rw < EPSILON || rh < EPSILON {
        return None;
    }

    // Transform the BBox corners and bound them, per the form XObject
    // rendering model.
    let corners = [
        (bbox[0], bbox[1]),
        (bbox[2], bbox[1]),
        (bbox[2], bbox[3]),
        (bbox[0], bbox[3]),
    ];
    let mut tx0 = f64::INFINITY;
    let mut ty0 = f64::INFINITY;
    let mut tx1 = f64::NEG_INFINITY;
    let mut ty1 = f64::NEG_INFINITY;
    for (x, y) in corners {
        let px = matrix[0] * x + matrix[2] * y + matrix[4];
        let py = matrix[1] * x + matrix[3] * y + matrix[5];
        tx0 = tx0.min(px);
        ty0 = ty0.min(py);
        tx1 = tx1.max(px);
        ty1 = ty1.max(py);
    }
    let (tw, th) = (tx1 - tx0, ty1 - ty0);
    if tw < EPSILON || th < EPSILON {
        return None;
    }

    let sx = rw / tw;
    let sy = rh / th;
    Some(StampPlan {
        xobject_id,
        sx,
        sy,
        tx: rx0 - tx0 * sx,
        ty: ry0 - ty0 * sy,
    })
}

/// Appearance streams become first-class Form XObjects.
fn promote_to_form_xobject(doc: &mut Document, id: ObjectId) {
    if let Some(stream) = doc.get_mut(id).and_then(Object::as_stream_mut) {
        stream
            .dict
            .entry("Type".to_string())
            .or_insert_with(|| Object::name("XObject"));
        stream
            .dict
            .entry("Subtype".to_string())
            .or_insert_with(|| Object::name("Form"));
    }
}

/// Register the planned XObjects in the page's resources, materializing
/// shared (indirect) resource dictionaries as page-local copies first.
fn register_xobjects(
    doc: &mut Document,
    page_dict: &mut Dict,
    plans: &[StampPlan],
) -> Result<Vec<String>, FlattenError> {
    let mut resources = match page_dict.get("Resources") {
        None => Dict::new(),
        Some(value) => doc
            .resolve(value)
            .and_then(Object::as_dict)
            .cloned()
            .ok_or_else(|| FlattenError::Malformed("unresolvable /Resources".into()))?,
    };
    let mut xobjects = match resources.get("XObject") {
        None => Dict::new(),
        Some(value) => doc
            .resolve(value)
            .and_then(Object::as_dict)
            .cloned()
            .ok_or_else(|| FlattenError::Malformed("unresolvable /XObject resources".into()))?,
    };

    let mut names = Vec::with_capacity(plans.len());
    let mut counter = 0usize;
    for plan in plans {
        let name = loop {
            let candidate = format!("FXO{counter}");
            counter += 1;
            if !xobjects.contains_key(&candidate) {
                break candidate;
            }
        };
        xobjects.insert(name.clone(), Object::Reference(plan.xobject_id));
        names.push(name);
    }

    resources.insert("XObject".into(), Object::Dictionary(xobjects));
    page_dict.insert("Resources".into(), Object::Dictionary(resources));
    Ok(names)
}

/// Append stamp operators to the page's content, isolating the original
/// content's graphics state with a `q`/`Q` pair around it.
fn append_content(
    doc: &mut Document,
    page_dict: &mut Dict,
    ops: Vec<u8>,
) -> Result<(), FlattenError> {
    let existing: Vec<Object> = match page_dict.get("Contents") {
        None => Vec::new(),
        Some(Object::Reference(id)) => vec![Object::Reference(*id)],
        Some(Object::Array(items)) => items.clone(),
        Some(other) => {
            return Err(FlattenError::Malformed(format!(
                "page /Contents is {other:?}"
            )));
        }
    };

    let mut contents = Vec::new();
    if existing.is_empty() {
        let stamp = doc.insert(Object::Stream(Stream {
            dict: Dict::new(),
            data: ops,
        }));
        contents.push(Object::Reference(stamp));
    } else {
        let mut tail = b"Q\n".to_vec();
        tail.extend_from_slice(&ops);
        let prelude = doc.insert(Object::Stream(Stream {
            dict: Dict::new(),
            data: b"q\n".to_vec(),
        }));
        let postlude = doc.insert(Object::Stream(Stream {
            dict: Dict::new(),
            data: tail,
        }));
        contents.push(Object::Reference(prelude));
        contents.extend(existing);
        contents.push(Object::Reference(postlude));
    }

    page_dict.insert("Contents".into(), Object::Array(contents));
    Ok(())
}

/// Resolve `value` to an array of exactly `expected` numbers.
fn number_array(doc: &Document, value: &Object, expected: usize) -> Option<Vec<f64>> {
    let array = doc.resolve(value)?.as_array()?;
    if array.len() != expected {
        return None;
    }
    array
        .iter()
        .map(|item| doc.resolve(item)?.as_number())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn dict(entries: Vec<(&str, Object)>) -> Dict {
        entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect()
    }

    /// One-page document with a widget annotation whose appearance stream is
    /// object 6, plus an AcroForm entry. The shape every test starts from.
    fn fixture() -> Document {
        let catalog = dict(vec![
            ("Type", Object::name("Catalog")),
            ("Pages", Object::reference(2, 0)),
            (
                "AcroForm",
                Object::Dictionary(dict(vec![(
                    "Fields",
                    Object::Array(vec![Object::reference(5, 0)]),
                )])),
            ),
        ]);
        let pages = dict(vec![
            ("Type", Object::name("Pages")),
            ("Kids", Object::Array(vec![Object::reference(3, 0)])),
            ("Count", Object::Integer(1)),
        ]);
        let page = dict(vec![
            ("Type", Object::name("Page")),
            ("Parent", Object::reference(2, 0)),
            ("Contents", Object::reference(4, 0)),
            ("Annots", Object::Array(vec![Object::reference(5, 0)])),
        ]);
        let widget = dict(vec![
            ("Subtype", Object::name("Widget")),
            (
                "Rect",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(200),
                    Object::Integer(100),
                ]),
            ),
            (
                "AP",
                Object::Dictionary(dict(vec![("N", Object::reference(6, 0))])),
            ),
        ]);
        let appearance = Stream {
            dict: dict(vec![(
                "BBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(100),
                    Object::Integer(50),
                ]),
            )]),
            data: b"0 0 100 50 re f".to_vec(),
        };

        let mut trailer = Dict::new();
        trailer.insert("Root".into(), Object::reference(1, 0));

        let objects: BTreeMap<ObjectId, Object> = [
            (ObjectId::new(1, 0), Object::Dictionary(catalog)),
            (ObjectId::new(2, 0), Object::Dictionary(pages)),
            (ObjectId::new(3, 0), Object::Dictionary(page)),
            (
                ObjectId::new(4, 0),
                Object::Stream(Stream {
                    dict: Dict::new(),
                    data: b"BT ET".to_vec(),
                }),
            ),
            (ObjectId::new(5, 0), Object::Dictionary(widget)),
            (ObjectId::new(6, 0), Object::Stream(appearance)),
        ]
        .into_iter()
        .collect();

        Document {
            version: "1.7".into(),
            objects,
            trailer,
        }
    }

    fn page_dict(doc: &Document) -> &Dict {
        doc.get(ObjectId::new(3, 0)).unwrap().as_dict().unwrap()
    }

    #[test]
    fn widget_is_stamped_and_interactive_structure_removed() {
        let mut doc = fixture();
        let summary = flatten(&mut doc).unwrap();

        assert_eq!(summary.pages, 1);
        assert_eq!(summary.stamped_annotations, 1);
        assert_eq!(summary.dropped_annotations, 0);
        assert!(summary.removed_acroform);

        let page = page_dict(&doc);
        assert!(!page.contains_key("Annots"));

        let catalog = doc.get(ObjectId::new(1, 0)).unwrap().as_dict().unwrap();
        assert!(!catalog.contains_key("AcroForm"));

        // Appearance became a form XObject reachable from page resources.
        let resources = page.get("Resources").unwrap().as_dict().unwrap();
        let xobjects = resources.get("XObject").unwrap().as_dict().unwrap();
        assert_eq!(
            xobjects.get("FXO0").unwrap().as_reference(),
            Some(ObjectId::new(6, 0))
        );
        let appearance = doc.get(ObjectId::new(6, 0)).unwrap().as_stream().unwrap();
        assert_eq!(Object::dict_name(&appearance.dict, "Subtype"), Some("Form"));
    }

    #[test]
    fn stamp_scales_bbox_into_rect() {
        let mut doc = fixture();
        flatten(&mut doc).unwrap();

        // Rect is 200x100, BBox 100x50, both anchored at the origin.
        let contents = page_dict(&doc).get("Contents").unwrap().as_array().unwrap();
        assert_eq!(contents.len(), 3);
        let postlude_id = contents[2].as_reference().unwrap();
        let postlude = doc.get(postlude_id).unwrap().as_stream().unwrap();
        let text = String::from_utf8_lossy(&postlude.data);
        assert!(text.starts_with("Q\n"), "got: {text}");
        assert!(text.contains("q 2. 0. 0. 2. 0. 0. cm /FXO0 Do Q"), "got: {text}");
    }

    #[test]
    fn original_content_is_isolated_with_a_state_push() {
        let mut doc = fixture();
        flatten(&mut doc).unwrap();

        let contents = page_dict(&doc).get("Contents").unwrap().as_array().unwrap();
        let prelude = doc
            .get(contents[0].as_reference().unwrap())
            .unwrap()
            .as_stream()
            .unwrap();
        assert_eq!(prelude.data, b"q\n");
        assert_eq!(contents[1].as_reference(), Some(ObjectId::new(4, 0)));
    }

    #[test]
    fn annotation_without_appearance_is_dropped() {
        let mut doc = fixture();
        doc.get_mut(ObjectId::new(5, 0))
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .remove("AP");

        let summary = flatten(&mut doc).unwrap();
        assert_eq!(summary.stamped_annotations, 0);
        assert_eq!(summary.dropped_annotations, 1);
        assert!(!page_dict(&doc).contains_key("Annots"));
        // Content untouched when nothing was stamped.
        assert_eq!(
            page_dict(&doc).get("Contents").unwrap().as_reference(),
            Some(ObjectId::new(4, 0))
        );
    }

    #[test]
    fn hidden_annotations_are_dropped() {
        let mut doc = fixture();
        doc.get_mut(ObjectId::new(5, 0))
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .insert("F".into(), Object::Integer(FLAG_HIDDEN));

        let summary = flatten(&mut doc).unwrap();
        assert_eq!(summary.stamped_annotations, 0);
        assert_eq!(summary.dropped_annotations, 1);
    }

    #[test]
    fn appearance_states_follow_the_as_selector() {
        let mut doc = fixture();
        let off = doc.insert(Object::Stream(Stream {
            dict: dict(vec![(
                "BBox",
                Object::Array(vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(10),
                    Object::Integer(10),
                ]),
            )]),
            data: Vec::new(),
        }));
        let widget = doc
            .get_mut(ObjectId::new(5, 0))
            .unwrap()
            .as_dict_mut()
            .unwrap();
        widget.insert(
            "AP".into(),
            Object::Dictionary(dict(vec![(
                "N",
                Object::Dictionary(dict(vec![
                    ("Off", Object::Reference(off)),
                    ("On", Object::reference(6, 0)),
                ])),
            )])),
        );
        widget.insert("AS".into(), Object::name("On"));

        let summary = flatten(&mut doc).unwrap();
        assert_eq!(summary.stamped_annotations, 1);
        let resources = page_dict(&doc).get("Resources").unwrap().as_dict().unwrap();
        let xobjects = resources.get("XObject").unwrap().as_dict().unwrap();
        assert_eq!(
            xobjects.get("FXO0").unwrap().as_reference(),
            Some(ObjectId::new(6, 0))
        );
    }

    #[test]
    fn optional_content_is_stripped() {
        let mut doc = fixture();
        doc.get_mut(ObjectId::new(1, 0))
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .insert("OCProperties".into(), Object::Dictionary(Dict::new()));
        doc.get_mut(ObjectId::new(5, 0))
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .insert("OC".into(), Object::reference(9, 0));

        let summary = flatten(&mut doc).unwrap();
        assert!(summary.stripped_optional_content);
        let catalog = doc.get(ObjectId::new(1, 0)).unwrap().as_dict().unwrap();
        assert!(!catalog.contains_key("OCProperties"));
    }

    #[test]
    fn unreachable_field_objects_are_swept() {
        let mut doc = fixture();
        flatten(&mut doc).unwrap();
        // The widget dictionary is no longer referenced by anything.
        assert!(doc.get(ObjectId::new(5, 0)).is_none());
    }

    #[test]
    fn missing_root_fails() {
        let mut doc = fixture();
        doc.trailer.remove("Root");
        assert!(matches!(
            flatten(&mut doc),
            Err(FlattenError::MissingCatalog(_))
        ));
    }

    #[test]
    fn cyclic_page_tree_terminates() {
        let mut doc = fixture();
        // Point the page's Parent back into Kids to build a cycle.
        doc.get_mut(ObjectId::new(2, 0))
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .insert(
                "Kids".into(),
                Object::Array(vec![Object::reference(3, 0), Object::reference(2, 0)]),
            );
        let summary = flatten(&mut doc).unwrap();
        assert_eq!(summary.pages, 1);
    }

    #[test]
    fn flattened_document_flattens_to_a_no_op() {
        let mut doc = fixture();
        flatten(&mut doc).unwrap();
        let second = flatten(&mut doc).unwrap();
        assert!(!second.changed());
    }
}
