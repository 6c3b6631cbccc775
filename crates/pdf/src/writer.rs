//! Deterministic PDF serialization.
//!
//! Writes the object table in id order, rebuilds a single classic xref
//! section, and emits a trailer synthesized from the document's trailer view
//! (minus keys that only make sense for the file layout being replaced).
//! Identical documents serialize to identical bytes.

use std::collections::BTreeMap;

use crate::document::Document;
use crate::object::{Dict, Object, ObjectId};

/// Trailer keys tied to the previous file's xref layout; never carried over.
const STALE_TRAILER_KEYS: &[&str] = &[
    "Prev",
    "XRefStm",
    "Type",
    "W",
    "Index",
    "Filter",
    "DecodeParms",
    "Length",
];

/// Serialize a document to bytes.
pub fn serialize(doc: &Document) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-");
    out.extend_from_slice(doc.version.as_bytes());
    // Binary-content marker comment, per convention.
    out.extend_from_slice(b"\n%\xc7\xec\x8f\xa2\n");

    let mut offsets: BTreeMap<u32, (u16, usize)> = BTreeMap::new();
    for (id, object) in &doc.objects {
        offsets.insert(id.number, (id.generation, out.len()));
        out.extend_from_slice(format!("{} {} obj\n", id.number, id.generation).as_bytes());
        write_object(&mut out, object);
        out.extend_from_slice(b"\nendobj\n");
    }

    let max_number = doc.objects.keys().map(|id| id.number).max().unwrap_or(0);
    let xref_offset = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", max_number + 1).as_bytes());
    out.extend_from_slice(b"0000000000 65535 f \n");
    for number in 1..=max_number {
        match offsets.get(&number) {
            Some((generation, offset)) => {
                out.extend_from_slice(format!("{offset:010} {generation:05} n \n").as_bytes());
            }
            None => out.extend_from_slice(b"0000000000 65535 f \n"),
        }
    }

    let mut trailer = doc.trailer.clone();
    for key in STALE_TRAILER_KEYS {
        trailer.remove(*key);
    }
    trailer.insert("Size".into(), Object::Integer(max_number as i64 + 1));

    out.extend_from_slice(b"trailer\n");
    write_object(&mut out, &Object::Dictionary(trailer));
    out.extend_from_slice(format!("\nstartxref\n{xref_offset}\n%%EOF\n").as_bytes());
    out
}

/// Write one object in canonical form.
pub(crate) fn write_object(out: &mut Vec<u8>, object: &Object) {
    match object {
        Object::Null => out.extend_from_slice(b"null"),
        Object::Boolean(true) => out.extend_from_slice(b"true"),
        Object::Boolean(false) => out.extend_from_slice(b"false"),
        Object::Integer(value) => out.extend_from_slice(value.to_string().as_bytes()),
        Object::Real(value) => out.extend_from_slice(format_real(*value).as_bytes()),
        Object::String(bytes) => write_literal_string(out, bytes),
        Object::Name(name) => write_name(out, name),
        Object::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b' ');
                }
                write_object(out, item);
            }
            out.push(b']');
        }
        Object::Dictionary(dict) => write_dict(out, dict),
        Object::Stream(stream) => {
            // /Length always reflects the data actually written.
            let mut dict = stream.dict.clone();
            dict.insert("Length".into(), Object::Integer(stream.data.len() as i64));
            write_dict(out, &dict);
            out.extend_from_slice(b"\nstream\n");
            out.extend_from_slice(&stream.data);
            out.extend_from_slice(b"\nendstream");
        }
        Object::Reference(ObjectId { number, generation }) => {
            out.extend_from_slice(format!("{number} {generation} R").as_bytes());
        }
    }
}

fn write_dict(out: &mut Vec<u8>, dict: &Dict) {
    out.extend_from_slice(b"<<");
    for (key, value) in dict {
        out.push(b' ');
        write_name(out, key);
        out.push(b' ');
        write_object(out, value);
    }
    out.extend_from_slice(b" >>");
}

fn write_name(out: &mut Vec<u8>, name: &str) {
    out.push(b'/');
    for byte in name.bytes() {
        let needs_escape = byte == b'#'
            || byte < b'!'
            || byte > b'~'
            || b"()<>[]{}/%".contains(&byte);
        if needs_escape {
            out.extend_from_slice(format!("#{byte:02X}").as_bytes());
        } else {
            out.push(byte);
        }
    }
}

fn write_literal_string(out: &mut Vec<u8>, bytes: &[u8]) {
    out.push(b'(');
    for &byte in bytes {
        match byte {
            b'(' | b')' | b'\\' => {
                out.push(b'\\');
                out.push(byte);
            }
            b'\n' => out.extend_from_slice(b"\\n"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\t' => out.extend_from_slice(b"\\t"),
            0x08 => out.extend_from_slice(b"\\b"),
            0x0c => out.extend_from_slice(b"\\f"),
            b if b < 0x20 || b >= 0x7f => {
                out.extend_from_slice(format!("\\{b:03o}").as_bytes());
            }
            b => out.push(b),
        }
    }
    out.push(b')');
}

/// Shortest stable decimal rendering of a real (6 fractional digits, then
/// trailing zeros trimmed). The decimal point is kept even for whole values
/// so the token reparses as a real, not an integer.
pub(crate) fn format_real(value: f64) -> String {
    if !value.is_finite() {
        return "0.".to_string();
    }
    let mut text = format!("{value:.6}");
    while text.ends_with('0') {
        text.pop();
    }
    if text == "-0." {
        text = "0.".to_string();
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Stream;
    use proptest::prelude::*;

    fn written(object: &Object) -> Vec<u8> {
        let mut out = Vec::new();
        write_object(&mut out, object);
        out
    }

    fn reparse(bytes: &[u8]) -> Object {
        crate::parser::Lexer::new(bytes).parse_object().unwrap()
    }

    #[test]
    fn reals_render_minimally_but_stay_reals() {
        assert_eq!(format_real(2.0), "2.");
        assert_eq!(format_real(2.5), "2.5");
        assert_eq!(format_real(-0.125), "-0.125");
        assert_eq!(format_real(0.0), "0.");
    }

    #[test]
    fn names_escape_irregular_bytes() {
        assert_eq!(written(&Object::name("A B#")), b"/A#20B#23");
    }

    #[test]
    fn strings_survive_round_trips() {
        let original = Object::String(b"weird (bytes) \\ \n \x01 \xff".to_vec());
        assert_eq!(reparse(&written(&original)), original);
    }

    #[test]
    fn streams_rewrite_length() {
        let mut dict = Dict::new();
        dict.insert("Length".into(), Object::Integer(999));
        let stream = Object::Stream(Stream {
            dict,
            data: b"12345".to_vec(),
        });
        let bytes = written(&stream);
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/Length 5"), "got: {text}");
    }

    #[test]
    fn serialized_documents_reparse() {
        let mut catalog = Dict::new();
        catalog.insert("Type".into(), Object::name("Catalog"));
        let mut trailer = Dict::new();
        trailer.insert("Root".into(), Object::reference(1, 0));

        let doc = Document {
            version: "1.4".into(),
            objects: [(ObjectId::new(1, 0), Object::Dictionary(catalog))]
                .into_iter()
                .collect(),
            trailer,
        };

        let bytes = serialize(&doc);
        let reparsed = Document::parse(&bytes).unwrap();
        assert_eq!(reparsed.version, "1.4");
        assert_eq!(reparsed.objects, doc.objects);
        assert_eq!(
            reparsed.trailer.get("Root"),
            Some(&Object::reference(1, 0))
        );
        // Second serialization is byte-identical.
        assert_eq!(serialize(&reparsed), bytes);
    }

    fn object_strategy() -> impl Strategy<Value = Object> {
        let leaf = prop_oneof![
            Just(Object::Null),
            any::<bool>().prop_map(Object::Boolean),
            any::<i64>().prop_map(Object::Integer),
            (-1_000_000i64..1_000_000)
                .prop_map(|n| Object::Real(n as f64 / 64.0)),
            proptest::collection::vec(any::<u8>(), 0..32).prop_map(Object::String),
            "[A-Za-z][A-Za-z0-9]{0,8}".prop_map(Object::Name),
            (1u32..9999, 0u16..9).prop_map(|(n, g)| Object::reference(n, g)),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Object::Array),
                proptest::collection::btree_map(
                    "[A-Za-z][A-Za-z0-9]{0,8}",
                    inner,
                    0..4
                )
                .prop_map(Object::Dictionary),
            ]
        })
    }

    proptest! {
        #[test]
        fn any_object_round_trips(object in object_strategy()) {
            prop_assert_eq!(reparse(&written(&object)), object);
        }
    }
}
