pub const NS_METS: &str = "http://www.loc.gov/METS/";
pub const NS_MODS: &str = "http://www.loc.gov/mods/v3";
pub const NS_XLINK: &str = "http://www.w3.org/1999/xlink";
pub const NS_XSI: &str = "http://www.w3.org/2001/XMLSchema-instance";

pub(crate) const SCHEMA_LOCATION: &str = "http://www.loc.gov/mods/v3 \
http://www.loc.gov/standards/mods/v3/mods-3-6.xsd \
http://www.loc.gov/METS/ http://www.loc.gov/standards/mets/version17/mets.v1-7.xsd";

/// Filter values starting with this marker are full-string regular expressions.
pub const REGEX_PREFIX: &str = "//";

/// `mods:identifier/@type` values consulted for the unique identifier, best first.
pub const IDENTIFIER_PRIORITY: [&str; 4] = ["purl", "urn", "doi", "url"];

pub const MIMETYPE_PAGE: &str = "application/vnd.prima.page+xml";
pub const MIMETYPE_ALTO: &str = "application/alto+xml";

/// Extension to MIME type table used when scanning folders. Matched by suffix, last hit wins.
pub const EXT_TO_MIME: &[(&str, &str)] = &[
    (".tif", "image/tiff"),
    (".tiff", "image/tiff"),
    (".png", "image/png"),
    (".jpg", "image/jpeg"),
    (".jpeg", "image/jpeg"),
    (".jp2", "image/jp2"),
    (".xml", MIMETYPE_PAGE),
    (".json", "application/json"),
    (".txt", "text/plain"),
];

pub const DEFAULT_MIMETYPE: &str = "application/octet-stream";

/// Returns the MIME type for `filename` according to [`EXT_TO_MIME`].
#[must_use]
pub fn mimetype_for_filename(filename: &str) -> &'static str {
    let lowered = filename.to_ascii_lowercase();
    EXT_TO_MIME
        .iter()
        .rev()
        .find(|(ext, _)| lowered.ends_with(ext))
        .map_or(DEFAULT_MIMETYPE, |(_, mime)| mime)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mimetype_lookup_is_case_insensitive() {
        assert_eq!(mimetype_for_filename("scan_0001.TIF"), "image/tiff");
        assert_eq!(mimetype_for_filename("page.xml"), MIMETYPE_PAGE);
        assert_eq!(mimetype_for_filename("README"), DEFAULT_MIMETYPE);
    }
}
