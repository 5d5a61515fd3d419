//! Name normalization shared by the pack reader and the resolver

/// Normalize a relative name for lookup inside a pack
///
/// Backslashes become `/`, empty and `.` segments are dropped and `..`
/// segments pop their parent. Returns `None` when `..` would climb above the
/// root. Case is preserved.
pub fn normalize_name(name: &str) -> Option<String> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in name.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

/// Replace backslashes with forward slashes and collapse repeated separators
pub fn fix_slashes(path: &str) -> String {
    let mut fixed = String::with_capacity(path.len());
    let mut last_was_separator = false;
    for (i, ch) in path.chars().enumerate() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            // keep a leading `//` intact for UNC-style roots
            if last_was_separator && i > 1 {
                continue;
            }
            last_was_separator = true;
        } else {
            last_was_separator = false;
        }
        fixed.push(ch);
    }
    fixed
}

/// 64-bit FNV-1a hash of a name with ASCII case folded
pub fn caseless_hash(name: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    name.bytes().fold(OFFSET_BASIS, |hash, byte| {
        let byte = if byte == b'\\' {
            b'/'
        } else {
            byte.to_ascii_lowercase()
        };
        (hash ^ u64::from(byte)).wrapping_mul(PRIME)
    })
}

/// File extension of the last path segment, without the dot
pub fn extension(name: &str) -> Option<&str> {
    let file = file_name(name);
    let dot = file.rfind('.')?;
    Some(&file[dot + 1..])
}

/// Last path segment of a name
pub fn file_name(name: &str) -> &str {
    name.rsplit(['/', '\\']).next().unwrap_or(name)
}
