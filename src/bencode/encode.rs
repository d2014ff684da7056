use super::value::Value;

/// Serializes a value in canonical bencode form.
///
/// Infallible: output goes to an in-memory buffer, and dictionary entries
/// are already held in key order, so emission is a single append pass with
/// no sorting and no failure path. Encoding the result of
/// [`decode`](super::decode()) reproduces the original input byte for byte.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(128);
    append(value, &mut out);
    out
}

fn append(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Integer(n) => {
            out.push(b'i');
            out.extend_from_slice(n.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(bytes) => append_string(bytes, out),
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                append(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(entries) => {
            out.push(b'd');
            for (key, val) in entries {
                append_string(key, out);
                append(val, out);
            }
            out.push(b'e');
        }
    }
}

// <decimal length>:<bytes>, shared by byte strings and dictionary keys.
fn append_string(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}
