use std::path::Path;

/// Content type for a served file, guessed from its extension.
///
/// Unknown extensions fall back to `application/octet-stream`.
pub fn content_type_for(path: &Path) -> String {
    let mime = mime_guess::from_path(path).first_or_octet_stream();

    if mime.type_() == mime_guess::mime::TEXT {
        format!("{}; charset=utf-8", mime.essence_str())
    } else {
        mime.essence_str().to_string()
    }
}
