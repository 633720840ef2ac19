use serde::Serialize;

use crate::Result;

pub const DOCUMENT_PREAMBLE: &str = "---\n";

/// Agent check file body: `init_config` is always an empty list.
#[derive(Serialize)]
struct ConfigDocument<'a, T> {
    init_config: &'a [String],
    instances: &'a [T],
}

/// Renders already sorted instances into the bytes written to disk.
pub fn render<T: Serialize>(instances: &[T]) -> Result<Vec<u8>> {
    let body = serde_yaml::to_string(&ConfigDocument {
        init_config: &[],
        instances,
    })?;

    let mut out = String::with_capacity(DOCUMENT_PREAMBLE.len() + body.len());
    out.push_str(DOCUMENT_PREAMBLE);
    out.push_str(&body);
    Ok(out.into_bytes())
}
